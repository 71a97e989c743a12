use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling cadence used on pull-only transports when nothing else is configured.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1000);

/// How a ledger connection is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportKind {
    WebSocket,
    Ipc,
    Http,
    /// Anything else; the connection states whether it can push.
    Custom { push: bool },
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Ipc => "ipc",
            TransportKind::Http => "http",
            TransportKind::Custom { .. } => "custom",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the connection delivers server-initiated notifications.
pub fn is_push_capable(kind: TransportKind) -> bool {
    match kind {
        TransportKind::WebSocket | TransportKind::Ipc => true,
        TransportKind::Http => false,
        TransportKind::Custom { push } => push,
    }
}

/// `None` on push-capable connections (rely on push, do not poll);
/// otherwise `fallback`.
pub fn optimal_polling_interval(kind: TransportKind, fallback: Duration) -> Option<Duration> {
    if is_push_capable(kind) {
        None
    } else {
        Some(fallback)
    }
}

/// The delivery mode an engine settles on for its feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Push,
    Poll(Duration),
}

impl Delivery {
    pub fn detect(kind: TransportKind, fallback: Duration) -> Self {
        match optimal_polling_interval(kind, fallback) {
            None => Delivery::Push,
            Some(interval) => Delivery::Poll(interval),
        }
    }

    /// Apply a per-call interval override. Push delivery ignores it.
    pub fn with_interval(self, interval: Option<Duration>) -> Self {
        match (self, interval) {
            (Delivery::Poll(_), Some(d)) => Delivery::Poll(d),
            (d, _) => d,
        }
    }
}
