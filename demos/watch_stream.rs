use std::error::Error;

use fleetline_sdk::stream::client::{EventStreamClient, StreamCallbacks, StreamPayload};
use secrecy::SecretString;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetline_sdk=debug".into()),
        )
        .init();

    let token = "REPLACE_WITH_SESSION_TOKEN".to_string();
    let endpoint = "https://console.fleetline.example/v1/events/vehicles".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = EventStreamClient::new(SecretString::new(token))?;
        let callbacks = StreamCallbacks {
            on_open: Some(Box::new(|| println!("stream open"))),
            on_message: Some(Box::new(|payload| match payload {
                StreamPayload::Json(value) => println!("event: {value}"),
                StreamPayload::Raw(text) => println!("event (raw): {text}"),
            })),
            on_error: Some(Box::new(|error| eprintln!("stream error: {error}"))),
        };
        let mut subscription = client.open(endpoint, callbacks);

        tokio::signal::ctrl_c().await?;
        subscription.close();
        subscription.closed().await;

        Ok::<(), Box<dyn Error>>(())
    })
}
