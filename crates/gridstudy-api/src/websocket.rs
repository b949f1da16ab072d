//! Study notification stream with auto-reconnect.
//!
//! Connects to the study notification WebSocket and streams parsed
//! [`StudyEvent`]s through a [`tokio::sync::broadcast`] channel. Handles
//! reconnection with exponential backoff + jitter automatically, and
//! reports every successful (re)connection as [`StudyEvent::Opened`] so
//! consumers can invalidate state after messages may have been missed.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridstudy_api::websocket::{NotificationHandle, ReconnectConfig, notification_url};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let url = notification_url(&base, study, None)?;
//!
//! let handle = NotificationHandle::spawn(url, ReconnectConfig::default(), cancel.clone());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── Events ───────────────────────────────────────────────────────────

/// Something that happened on the notification channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StudyEvent {
    /// The socket is (re)connected. `reconnect` is `true` once any earlier
    /// connection dropped or attempt failed: messages may have been lost.
    Opened { reconnect: bool },
    /// A notification pushed by the server.
    Message(StudyNotification),
}

/// A notification message: routing headers plus an optional payload.
///
/// The payload is itself a JSON document encoded as a string; its shape
/// depends on `headers.update_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyNotification {
    pub headers: NotificationHeaders,

    #[serde(default)]
    pub payload: Option<String>,
}

/// Routing headers of a notification.
///
/// Uses `#[serde(flatten)]` to keep every header beyond the core set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationHeaders {
    #[serde(default)]
    pub study_uuid: Option<Uuid>,

    /// Notification kind, e.g. `"study"`, `"nodeAliasesUpdated"`.
    #[serde(default)]
    pub update_type: Option<String>,

    /// Node the notification is about, when it concerns a single node.
    #[serde(default)]
    pub node: Option<Uuid>,

    /// Nodes the notification is about, when it concerns several.
    #[serde(default)]
    pub nodes: Vec<Uuid>,

    #[serde(default)]
    pub root_network_uuid: Option<Uuid>,

    /// All remaining headers the server sends.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Build the notification URL for a study.
///
/// `{base}/notify?studyUuid={study}[&access_token={token}]`; an `http(s)`
/// base is switched to `ws(s)`.
pub fn notification_url(
    base: &Url,
    study: Uuid,
    token: Option<&SecretString>,
) -> Result<Url, Error> {
    let trimmed = base.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{trimmed}/notify"))?;

    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme {scheme}")))?;
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("studyUuid", &study.to_string());
        if let Some(token) = token {
            query.append_pair("access_token", token.expose_secret());
        }
    }
    Ok(url)
}

// ── NotificationHandle ───────────────────────────────────────────────

/// Handle to a running notification stream.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed in) to
/// tear down the background task.
pub struct NotificationHandle {
    event_rx: broadcast::Receiver<Arc<StudyEvent>>,
    cancel: CancellationToken,
}

impl NotificationHandle {
    /// Spawn the connect/read/reconnect loop.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Must be called from within a Tokio runtime.
    pub fn spawn(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StudyEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<StudyEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    // Set once a connection dropped or an attempt failed.
    let mut interrupted = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel, interrupted) => {
                interrupted = true;
                match result {
                    // Clean disconnect (server close frame or stream ended).
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        tracing::info!("notification socket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "notification socket error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "notification reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("notification loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single WebSocket connection, read messages until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<StudyEvent>>,
    cancel: &CancellationToken,
    interrupted: bool,
) -> Result<(), Error> {
    tracing::info!(host = url.host_str().unwrap_or(""), "connecting to notification socket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(reconnect = interrupted, "notification socket connected");
    // Ignore send errors -- just means no active subscribers right now
    let _ = event_tx.send(Arc::new(StudyEvent::Opened {
        reconnect: interrupted,
    }));

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("notification socket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "close frame received"
                            );
                        } else {
                            tracing::info!("close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("notification stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse a text frame and broadcast it if it is a well-formed notification.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<StudyEvent>>) {
    match serde_json::from_str::<StudyNotification>(text) {
        Ok(notification) => {
            tracing::trace!(
                update_type = notification.headers.update_type.as_deref().unwrap_or(""),
                "notification received"
            );
            let _ = event_tx.send(Arc::new(StudyEvent::Message(notification)));
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse notification frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from many clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn notification_url_switches_scheme_and_adds_study() {
        let base = Url::parse("https://grid.example.org/study-notification/").unwrap();
        let study = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let token = SecretString::from("t0k".to_string());

        let url = notification_url(&base, study, Some(&token)).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/study-notification/notify");
        assert_eq!(
            url.query(),
            Some("studyUuid=11111111-1111-1111-1111-111111111111&access_token=t0k")
        );
    }

    #[test]
    fn deserialize_notification_keeps_extra_headers() {
        let json = r#"{
            "headers": {
                "studyUuid": "11111111-1111-1111-1111-111111111111",
                "updateType": "study",
                "node": "22222222-2222-2222-2222-222222222222",
                "rootNetworkUuid": "33333333-3333-3333-3333-333333333333",
                "userId": "alice"
            },
            "payload": "{\"impactedSubstationsIds\":[\"S1\"]}"
        }"#;

        let n: StudyNotification = serde_json::from_str(json).unwrap();
        assert_eq!(n.headers.update_type.as_deref(), Some("study"));
        assert!(n.headers.node.is_some());
        assert!(n.headers.nodes.is_empty());
        assert_eq!(n.headers.extra["userId"], "alice");
        assert!(n.payload.unwrap().contains("S1"));
    }

    #[test]
    fn parse_and_broadcast_notification() {
        let (tx, mut rx) = broadcast::channel(16);

        let raw = serde_json::json!({
            "headers": { "studyUuid": "11111111-1111-1111-1111-111111111111", "updateType": "nodeAliasesUpdated" }
        });
        parse_and_broadcast(&raw.to_string(), &tx);

        let event = rx.try_recv().unwrap();
        match &*event {
            StudyEvent::Message(n) => {
                assert_eq!(n.headers.update_type.as_deref(), Some("nodeAliasesUpdated"));
                assert!(n.payload.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_after_failed_first_attempt_is_a_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/notify", listener.local_addr().unwrap())).unwrap();
        let server = tokio::spawn(async move {
            // Drop the first connection before the handshake completes.
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (second, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(second).await.unwrap();
            std::future::pending::<()>().await;
            drop(ws);
        });

        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries: Some(5),
        };
        let cancel = CancellationToken::new();
        let handle = NotificationHandle::spawn(url, reconnect, cancel.clone());
        let mut rx = handle.subscribe();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*event, StudyEvent::Opened { reconnect: true });

        cancel.cancel();
        server.abort();
    }

    #[test]
    fn parse_and_broadcast_malformed_json() {
        let (tx, mut rx) = broadcast::channel::<Arc<StudyEvent>>(16);

        parse_and_broadcast("not json at all", &tx);

        // Should not panic, should just log and skip
        assert!(rx.try_recv().is_err());
    }
}
