use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use fleetline_sdk::access::AccessStore;
use fleetline_sdk::cancel::CancelRegistry;
use fleetline_sdk::stream::client::{
    EventStreamClient, StreamError, StreamObserver, StreamPayload, StreamState,
};
use secrecy::SecretString;

struct ConsoleObserver {
    access: Arc<AccessStore>,
}

impl StreamObserver for ConsoleObserver {
    fn on_open(&self) {
        println!("live events connected");
    }

    fn on_message(&self, payload: StreamPayload) {
        match payload {
            StreamPayload::Json(value) => {
                // Permission refreshes ride the same stream as telemetry.
                if let Some(keys) = value.get("permittedKeys").and_then(|keys| keys.as_array()) {
                    let keys: Vec<String> = keys
                        .iter()
                        .filter_map(|key| key.as_str().map(str::to_owned))
                        .collect();
                    self.access.set_permitted(keys);
                    println!("permitted keys refreshed: {:?}", self.access.permitted());
                } else {
                    println!("telemetry: {value}");
                }
            }
            StreamPayload::Raw(text) => println!("notice: {text}"),
        }
    }

    fn on_error(&self, error: &StreamError) {
        eprintln!("stream error: {error}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let token = "REPLACE_WITH_SESSION_TOKEN".to_string();
    let role_marker = std::env::var("FLEETLINE_ROLE").ok();
    let endpoint = "https://console.fleetline.example/v1/events/vehicles".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let access = Arc::new(AccessStore::from_marker(role_marker.as_deref()));
        println!("session starts with keys {:?}", access.permitted());
        if access.is_permitted("11") {
            println!("vehicle console enabled");
        }

        let registry = CancelRegistry::new();
        let client = EventStreamClient::new(SecretString::new(token))?;
        let observer = ConsoleObserver {
            access: Arc::clone(&access),
        };
        let subscription = Arc::new(client.open(endpoint, observer));
        registry.register_fn({
            let subscription = Arc::clone(&subscription);
            move || subscription.close()
        });

        // A background poller, torn down with everything else on exit.
        let heartbeat = tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                println!("session heartbeat");
            }
        });
        registry.register(heartbeat);

        tokio::signal::ctrl_c().await?;
        registry.cancel_all();

        let mut states = subscription.state_receiver();
        let _ = states.wait_for(|state| *state == StreamState::Closed).await;

        Ok::<(), Box<dyn Error>>(())
    })
}
