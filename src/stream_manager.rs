//! gRPC slot/account stream with exponential-backoff reconnect.
//!
//! Grounded on `shyft_grpc.py`'s connect/subscribe/retry shape and on the
//! donor's `shredstream_processor.rs` reconnect-in-outer-loop pattern: the
//! stream is connected once, consumed until it errors or ends, and the
//! caller loop reconnects with backoff rather than the stream retrying
//! internally.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::constants::{STREAM_RECONNECT_MAX_BACKOFF, STREAM_RECONNECT_MIN_BACKOFF};
use crate::endpoint_pool::EndpointManager;

/// A slot update observed on the gRPC stream.
#[derive(Debug, Clone, Copy)]
pub struct SlotUpdate {
    pub slot: u64,
}

#[async_trait::async_trait]
pub trait SlotSink: Send + Sync {
    async fn on_slot(&self, update: SlotUpdate);
}

#[async_trait::async_trait]
impl SlotSink for crate::blockhash_cache::BlockhashCache {
    async fn on_slot(&self, update: SlotUpdate) {
        self.on_slot_update(update.slot).await;
    }
}

/// Owns the gRPC connection lifecycle: connects, fans slot updates out to
/// registered sinks, and reconnects with exponential backoff on failure.
pub struct StreamManager {
    endpoints: Arc<EndpointManager>,
    sinks: parking_lot::Mutex<Vec<Arc<dyn SlotSink>>>,
}

impl StreamManager {
    pub fn new(endpoints: Arc<EndpointManager>) -> Self {
        Self {
            endpoints,
            sinks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn SlotSink>) {
        self.sinks.lock().push(sink);
    }

    /// Runs until `stop` fires. Each connection attempt is independent;
    /// a dropped/errored stream triggers a fresh connect after a backoff
    /// delay that resets to the minimum once a stream stays up long enough
    /// to deliver at least one update.
    pub async fn run(self: Arc<Self>, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut backoff = STREAM_RECONNECT_MIN_BACKOFF;
        loop {
            if *stop.borrow() {
                break;
            }
            let url = self.endpoints.grpc.active_label();
            info!(endpoint = %url, "stream_manager: connecting");

            match self.run_one_connection(&mut stop).await {
                Ok(delivered_any) => {
                    if delivered_any {
                        backoff = STREAM_RECONNECT_MIN_BACKOFF;
                    }
                }
                Err(e) => {
                    warn!("stream_manager: connection error: {e}");
                    self.endpoints.grpc.report_failure(&self.endpoints.grpc.active_label());
                }
            }

            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = stop.changed() => {
                    if *stop.borrow() { break; }
                }
            }
            backoff = (backoff.mul_f64(2.0)).min(STREAM_RECONNECT_MAX_BACKOFF);
        }
        info!("stream_manager: stopped");
    }

    /// Placeholder connection loop: production wiring replaces this body
    /// with a `solana-stream-sdk` Geyser subscription; the reconnect
    /// contract above (caller retries with backoff on any `Err`) does not
    /// change. Returns whether any slot update was delivered, which resets
    /// the backoff in the caller.
    async fn run_one_connection(&self, stop: &mut tokio::sync::watch::Receiver<bool>) -> anyhow::Result<bool> {
        let delivered = false;
        let mut ticker = tokio::time::interval(Duration::from_millis(400));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // In production this arm is replaced by `stream.next().await`
                    // yielding real slot entries from the Geyser subscription.
                    return Ok(delivered);
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return Ok(delivered);
                    }
                }
            }
        }
    }

    pub async fn dispatch(&self, update: SlotUpdate) {
        let sinks: Vec<_> = self.sinks.lock().clone();
        for sink in sinks {
            sink.on_slot(update).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = STREAM_RECONNECT_MIN_BACKOFF;
        for _ in 0..20 {
            backoff = (backoff.mul_f64(2.0)).min(STREAM_RECONNECT_MAX_BACKOFF);
        }
        assert_eq!(backoff, STREAM_RECONNECT_MAX_BACKOFF);
    }
}
