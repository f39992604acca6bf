//! Server-push event stream client.
//!
//! [`EventStreamClient`] dials an event-stream endpoint with bearer
//! authentication and hands every inbound event to a caller-supplied
//! [`StreamObserver`]. A spawned worker owns the HTTP connection and
//! redials with capped backoff whenever the transport fails; only an
//! explicit [`StreamSubscription::close`], dropping the subscription, or
//! a `204 No Content` answer from the server ends the cycle.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{
    HeaderValue, InvalidHeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::wire::{Frame, FrameParser};

const EVENT_STREAM_MIME: &str = "text/event-stream";
const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Ceiling for reconnect delay growth.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Default TCP connect timeout for each dial attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry point for opening authenticated event stream subscriptions.
///
/// A client is cheap to clone and may open any number of concurrent
/// subscriptions; each [`open`](EventStreamClient::open) call spawns its
/// own transport worker.
#[derive(Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
    auth_header: HeaderValue,
    options: StreamOptions,
}

impl EventStreamClient {
    /// Creates a client for a pre-issued bearer token with default
    /// tuning.
    ///
    /// The only way this fails is a token that cannot form a valid
    /// header value; expired or revoked tokens surface later as
    /// [`StreamError::HttpStatus`] through the observer.
    pub fn new(token: SecretString) -> Result<Self, StreamError> {
        Self::with_options(token, StreamOptions::default())
    }

    /// Creates a client with explicit tuning.
    ///
    /// The underlying HTTP client keeps a cookie store so deployments
    /// fronted by cookie-based session affinity keep working across
    /// redials.
    pub fn with_options(token: SecretString, options: StreamOptions) -> Result<Self, StreamError> {
        let mut auth_header = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))?;
        auth_header.set_sensitive(true);

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            auth_header,
            options,
        })
    }

    /// Opens a subscription to `endpoint`.
    ///
    /// Returns immediately after spawning the transport worker; dial
    /// progress, events, and failures are all reported through
    /// `observer` and the subscription's state channel. Must be called
    /// from within a Tokio runtime.
    pub fn open(
        &self,
        endpoint: impl Into<String>,
        observer: impl StreamObserver + 'static,
    ) -> StreamSubscription {
        let endpoint = endpoint.into();
        let observer: Arc<dyn StreamObserver> = Arc::new(observer);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);

        let worker = StreamWorker {
            http: self.http.clone(),
            auth_header: self.auth_header.clone(),
            endpoint,
            reconnect: self.options.reconnect.clone(),
            base_delay: self.options.reconnect.initial_delay,
            last_event_id: String::new(),
            observer,
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(worker.run());

        StreamSubscription {
            cancel,
            state: state_rx,
            task: Some(task),
        }
    }
}

/// Tuning knobs for [`EventStreamClient`].
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// TCP connect timeout applied to every dial attempt.
    pub connect_timeout: Duration,
    /// Reconnect pacing after transport failures.
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Reconnect pacing.
///
/// The delay starts at `initial_delay`, doubles per consecutive failed
/// attempt up to `max_delay`, and resets once a connection is
/// established. A `retry:` hint from the server replaces the base delay
/// for the rest of the subscription.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Delay before the first redial after a failure.
    pub initial_delay: Duration,
    /// Ceiling the doubling never exceeds.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
        }
    }
}

/// Ready state of one subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// Dialing, or waiting out a reconnect delay after a failure.
    Connecting,
    /// Connected; events are flowing.
    Open,
    /// Terminated by [`StreamSubscription::close`], by dropping the
    /// subscription, or by a `204 No Content` answer.
    Closed,
}

/// Callbacks invoked by the stream worker.
///
/// Every method defaults to a no-op so implementors opt into exactly the
/// notifications they care about. Calls arrive on the worker task; keep
/// them brief and use interior mutability for shared state.
pub trait StreamObserver: Send + Sync {
    /// Called once per successful connection establishment, including
    /// after every transparent reconnect.
    fn on_open(&self) {}

    /// Called once per inbound event, in arrival order.
    fn on_message(&self, payload: StreamPayload) {
        let _ = payload;
    }

    /// Called for every transport failure. The worker keeps redialing
    /// afterwards; an error never ends the subscription by itself.
    fn on_error(&self, error: &StreamError) {
        let _ = error;
    }
}

impl<T: StreamObserver + ?Sized> StreamObserver for Arc<T> {
    fn on_open(&self) {
        (**self).on_open();
    }

    fn on_message(&self, payload: StreamPayload) {
        (**self).on_message(payload);
    }

    fn on_error(&self, error: &StreamError) {
        (**self).on_error(error);
    }
}

/// Decoded event payload handed to [`StreamObserver::on_message`].
#[derive(Clone, Debug, PartialEq)]
pub enum StreamPayload {
    /// Event data that parsed as JSON.
    Json(serde_json::Value),
    /// Event data that did not parse as JSON, delivered verbatim rather
    /// than dropped.
    Raw(String),
}

impl StreamPayload {
    /// The parsed document, when the payload was JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            StreamPayload::Json(value) => Some(value),
            StreamPayload::Raw(_) => None,
        }
    }

    /// The verbatim text, when the payload was not JSON.
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            StreamPayload::Json(_) => None,
            StreamPayload::Raw(text) => Some(text),
        }
    }
}

/// Closure-backed [`StreamObserver`] for hosts that do not want a
/// dedicated observer type. Unset fields keep the no-op default.
#[derive(Default)]
pub struct StreamCallbacks {
    /// Called once per connection establishment.
    pub on_open: Option<Box<dyn Fn() + Send + Sync>>,
    /// Called for every inbound event.
    pub on_message: Option<Box<dyn Fn(StreamPayload) + Send + Sync>>,
    /// Called for every transport failure.
    pub on_error: Option<Box<dyn Fn(&StreamError) + Send + Sync>>,
}

impl StreamObserver for StreamCallbacks {
    fn on_open(&self) {
        if let Some(callback) = &self.on_open {
            callback();
        }
    }

    fn on_message(&self, payload: StreamPayload) {
        if let Some(callback) = &self.on_message {
            callback(payload);
        }
    }

    fn on_error(&self, error: &StreamError) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

/// Live handle for one open subscription.
///
/// Dropping the handle tears the worker down the same way
/// [`close`](StreamSubscription::close) does.
#[derive(Debug)]
pub struct StreamSubscription {
    cancel: CancellationToken,
    state: watch::Receiver<StreamState>,
    task: Option<JoinHandle<()>>,
}

impl StreamSubscription {
    /// Current ready state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch channel carrying ready-state changes.
    pub fn state_receiver(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Terminates the subscription.
    ///
    /// Delivery stops as soon as the worker observes the cancellation;
    /// the token is re-checked immediately before every callback, and
    /// events the transport already has in flight are discarded. A
    /// callback the worker had already entered may still finish; await
    /// [`closed`](StreamSubscription::closed) for the strict cutoff.
    /// Safe to call repeatedly and from any thread.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Waits until the worker has fully wound down. Once the worker has
    /// been joined, later calls return immediately.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How one connection attempt ended.
enum AttemptEnd {
    /// The subscription was closed.
    Closed,
    /// The server answered `204 No Content`: stop without error.
    Finished,
    /// The transport failed; `established` records whether the
    /// connection got as far as an open notification.
    Failed {
        error: StreamError,
        established: bool,
    },
}

/// Owns the connection for one subscription: dials, reads, dispatches,
/// and paces reconnects until cancelled or finished.
struct StreamWorker {
    http: reqwest::Client,
    auth_header: HeaderValue,
    endpoint: String,
    reconnect: ReconnectPolicy,
    base_delay: Duration,
    last_event_id: String,
    observer: Arc<dyn StreamObserver>,
    cancel: CancellationToken,
    state: watch::Sender<StreamState>,
}

impl StreamWorker {
    async fn run(mut self) {
        let mut delay = self.base_delay;

        loop {
            match self.run_attempt().await {
                AttemptEnd::Closed => break,
                AttemptEnd::Finished => {
                    debug!(endpoint = %self.endpoint, "server ended the event stream");
                    break;
                }
                AttemptEnd::Failed { error, established } => {
                    if established {
                        delay = self.base_delay;
                    }
                    let _ = self.state.send(StreamState::Connecting);
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.observer.on_error(&error);
                    warn!(
                        endpoint = %self.endpoint,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "event stream attempt failed, will redial"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.reconnect.next_delay(delay);
                }
            }
        }

        let _ = self.state.send(StreamState::Closed);
    }

    async fn run_attempt(&mut self) -> AttemptEnd {
        let mut request = self
            .http
            .get(&self.endpoint)
            .header(AUTHORIZATION, self.auth_header.clone())
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");
        if !self.last_event_id.is_empty() {
            request = request.header(LAST_EVENT_ID_HEADER, self.last_event_id.clone());
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return AttemptEnd::Closed,
            sent = request.send() => match sent {
                Ok(response) => response,
                Err(error) => {
                    return AttemptEnd::Failed {
                        error: error.into(),
                        established: false,
                    }
                }
            },
        };

        if response.status() == StatusCode::NO_CONTENT {
            return AttemptEnd::Finished;
        }
        if !response.status().is_success() {
            return AttemptEnd::Failed {
                error: StreamError::HttpStatus(response.status()),
                established: false,
            };
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if !content_type
            .as_deref()
            .is_some_and(|value| value.starts_with(EVENT_STREAM_MIME))
        {
            return AttemptEnd::Failed {
                error: StreamError::ContentType(content_type),
                established: false,
            };
        }

        if self.cancel.is_cancelled() {
            return AttemptEnd::Closed;
        }
        let _ = self.state.send(StreamState::Open);
        debug!(endpoint = %self.endpoint, "event stream connected");
        self.observer.on_open();

        let mut parser = FrameParser::resume(self.last_event_id.as_str());
        let mut body = response.bytes_stream();
        let outcome = loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => break AttemptEnd::Closed,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for frame in parser.feed(&bytes) {
                        deliver(self.observer.as_ref(), &self.cancel, frame);
                    }
                    if let Some(hint) = parser.retry_hint() {
                        self.base_delay = hint;
                    }
                }
                Some(Err(error)) => {
                    break AttemptEnd::Failed {
                        error: error.into(),
                        established: true,
                    }
                }
                None => {
                    break AttemptEnd::Failed {
                        error: StreamError::Ended,
                        established: true,
                    }
                }
            }
        };

        self.last_event_id = parser.last_event_id().to_owned();
        outcome
    }
}

/// Hands a frame to the observer unless the subscription closed in the
/// meantime. The gate sits immediately before the call so data already
/// pulled off the wire is discarded after `close`.
fn deliver(observer: &dyn StreamObserver, gate: &CancellationToken, frame: Frame) {
    if gate.is_cancelled() {
        return;
    }
    observer.on_message(decode_payload(frame.data));
}

fn decode_payload(data: String) -> StreamPayload {
    match serde_json::from_str(&data) {
        Ok(value) => StreamPayload::Json(value),
        Err(error) => {
            debug!(error = %error, "event payload is not JSON, delivering raw");
            StreamPayload::Raw(data)
        }
    }
}

/// Errors surfaced through [`StreamObserver::on_error`] or returned when
/// building a client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Dial or mid-stream transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("server returned status {0}")]
    HttpStatus(StatusCode),

    /// The endpoint answered with a body that is not an event stream.
    #[error("unexpected content type {0:?}")]
    ContentType(Option<String>),

    /// The bearer token cannot be carried in an HTTP header.
    #[error("invalid bearer token: {0}")]
    InvalidToken(#[from] InvalidHeaderValue),

    /// The server closed the stream without a terminal status.
    #[error("event stream ended")]
    Ended,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        opens: AtomicUsize,
        payloads: Mutex<Vec<StreamPayload>>,
        errors: AtomicUsize,
    }

    impl StreamObserver for Recording {
        fn on_open(&self) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&self, payload: StreamPayload) {
            self.payloads.lock().push(payload);
        }

        fn on_error(&self, _error: &StreamError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(data: &str) -> Frame {
        Frame {
            name: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn valid_tokens_build_a_client() {
        let client = EventStreamClient::new(SecretString::new("fleet-3a9f".to_string()));
        assert!(client.is_ok());
    }

    #[test]
    fn tokens_with_control_bytes_are_rejected_up_front() {
        let client = EventStreamClient::new(SecretString::new("fleet\ntoken".to_string()));
        assert!(matches!(client, Err(StreamError::InvalidToken(_))));
    }

    #[test]
    fn json_payloads_decode_and_everything_else_passes_raw() {
        let decoded = decode_payload(r#"{"vehicleId":"V-102","longitude":121.47}"#.to_string());
        let value = decoded.as_json().unwrap();
        assert_eq!(value["vehicleId"], "V-102");

        assert_eq!(decode_payload("42".to_string()), StreamPayload::Json(42.into()));
        assert_eq!(
            decode_payload("vehicle offline".to_string()),
            StreamPayload::Raw("vehicle offline".to_string())
        );
        assert_eq!(decode_payload(String::new()), StreamPayload::Raw(String::new()));
    }

    #[test]
    fn payload_accessors_are_mutually_exclusive() {
        let json = decode_payload("{}".to_string());
        assert!(json.as_json().is_some());
        assert!(json.as_raw().is_none());

        let raw = decode_payload("plain".to_string());
        assert!(raw.as_json().is_none());
        assert_eq!(raw.as_raw(), Some("plain"));
    }

    #[test]
    fn delivery_stops_at_a_cancelled_gate() {
        let observer = Recording::default();
        let gate = CancellationToken::new();

        deliver(&observer, &gate, frame("{\"seq\":1}"));
        assert_eq!(observer.payloads.lock().len(), 1);

        gate.cancel();
        deliver(&observer, &gate, frame("{\"seq\":2}"));
        deliver(&observer, &gate, frame("{\"seq\":3}"));
        assert_eq!(observer.payloads.lock().len(), 1);
    }

    #[test]
    fn reconnect_delay_doubles_up_to_the_ceiling() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.next_delay(Duration::from_secs(3)),
            Duration::from_secs(6)
        );
        assert_eq!(
            policy.next_delay(Duration::from_secs(20)),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.next_delay(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn default_options_match_the_documented_constants() {
        let options = StreamOptions::default();
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.reconnect.initial_delay, DEFAULT_RECONNECT_DELAY);
        assert_eq!(options.reconnect.max_delay, MAX_RECONNECT_DELAY);
    }

    #[test]
    fn callback_observers_route_to_their_closures() {
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let callbacks = StreamCallbacks {
            on_message: Some(Box::new({
                let hits = std::sync::Arc::clone(&hits);
                move |_payload| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })),
            ..StreamCallbacks::default()
        };

        // Unset hooks fall back to the no-op default.
        callbacks.on_open();
        callbacks.on_error(&StreamError::Ended);
        callbacks.on_message(StreamPayload::Raw("x".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_calls_pass_through_shared_handles() {
        let observer = std::sync::Arc::new(Recording::default());
        let shared: std::sync::Arc<dyn StreamObserver> = observer.clone();
        shared.on_open();
        shared.on_message(StreamPayload::Raw("x".to_string()));
        assert_eq!(observer.opens.load(Ordering::SeqCst), 1);
        assert_eq!(observer.payloads.lock().len(), 1);
    }
}
