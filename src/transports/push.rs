//! Real-time push to connected operator sessions.
//!
//! Each registered sink receives one line of JSON per broadcast. A sink that
//! fails a write is dropped from the hub.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::TransportError;

pub trait PushSink: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), TransportError>;
}

/// Sink backed by an unbounded channel; the receiving half belongs to the
/// session that registered it.
pub struct ChannelSink {
    client_id: String,
    sender: UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(client_id: impl Into<String>, sender: UnboundedSender<String>) -> Self {
        Self {
            client_id: client_id.into(),
            sender,
        }
    }
}

impl PushSink for ChannelSink {
    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        self.sender
            .send(format!("{line}\n"))
            .map_err(|_| TransportError::SinkClosed {
                client_id: self.client_id.clone(),
            })
    }
}

#[derive(Default)]
pub struct PushHub {
    sinks: RwLock<HashMap<String, Arc<dyn PushSink>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink, replacing any previous sink with the same id.
    pub fn register(&self, client_id: impl Into<String>, sink: Arc<dyn PushSink>) {
        let client_id = client_id.into();
        debug!(client_id = %client_id, "Push client registered");
        self.sinks
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(client_id, sink);
    }

    pub fn unregister(&self, client_id: &str) -> bool {
        self.sinks
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(client_id)
            .is_some()
    }

    pub fn client_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    /// Write `payload` to every sink and return how many accepted it.
    pub fn broadcast(&self, payload: &Value) -> usize {
        let line = payload.to_string();
        let snapshot: Vec<(String, Arc<dyn PushSink>)> = self
            .sinks
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .map(|(id, sink)| (id.clone(), Arc::clone(sink)))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (client_id, sink) in snapshot {
            match sink.write_line(&line) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(client_id = %client_id, error = %err, "Dropping failed push sink");
                    failed.push(client_id);
                }
            }
        }

        if !failed.is_empty() {
            let mut sinks = self
                .sinks
                .write()
                .unwrap_or_else(|poison| poison.into_inner());
            for client_id in failed {
                sinks.remove(&client_id);
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn broadcast_writes_one_json_line_per_sink() {
        let hub = PushHub::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        hub.register("a", Arc::new(ChannelSink::new("a", tx_a)));
        hub.register("b", Arc::new(ChannelSink::new("b", tx_b)));

        let delivered = hub.broadcast(&json!({"type": "notification", "severity": "critical"}));

        assert_eq!(delivered, 2);
        let line = rx_a.try_recv().unwrap();
        assert!(line.ends_with('\n'));
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["severity"], "critical");
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn failing_sink_is_unregistered() {
        let hub = PushHub::new();
        let (tx_live, _rx_live) = unbounded_channel();
        let (tx_dead, rx_dead) = unbounded_channel();
        drop(rx_dead);
        hub.register("live", Arc::new(ChannelSink::new("live", tx_live)));
        hub.register("dead", Arc::new(ChannelSink::new("dead", tx_dead)));

        assert_eq!(hub.broadcast(&json!({"n": 1})), 1);
        assert_eq!(hub.client_count(), 1);
        assert!(!hub.unregister("dead"));
        assert!(hub.unregister("live"));
    }
}
