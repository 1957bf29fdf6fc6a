//! Ordered endpoint pools with consecutive-failure demotion and
//! probe-based recovery, one per protocol (RPC, WS, gRPC, RabbitStream).
//!
//! Grounded on the original `endpoint_manager.py`: insertion order defines
//! priority, `active()` never reorders the list, and recovery is gated on
//! consecutive successful probes rather than a single lucky one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::constants::{FAIL_THRESHOLD, PROBE_INTERVAL, PROBE_TIMEOUT, RECOVERY_PROBES};
use crate::models::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Rpc,
    Ws,
    Grpc,
    Rabbit,
}

/// A single protocol's ordered endpoint list, guarded by one mutex.
pub struct EndpointPool {
    protocol: Protocol,
    endpoints: Mutex<Vec<Endpoint>>,
    fail_threshold: u32,
    recovery_probes: u32,
}

impl EndpointPool {
    pub fn new(protocol: Protocol, endpoints: Vec<Endpoint>, fail_threshold: u32, recovery_probes: u32) -> Self {
        Self {
            protocol,
            endpoints: Mutex::new(endpoints),
            fail_threshold,
            recovery_probes,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// First healthy endpoint, or the first endpoint unconditionally if
    /// none are healthy. Tie-break is insertion order.
    pub fn active(&self) -> Endpoint {
        let endpoints = self.endpoints.lock();
        endpoints
            .iter()
            .find(|e| e.healthy)
            .cloned()
            .unwrap_or_else(|| endpoints[0].clone())
    }

    pub fn active_label(&self) -> String {
        self.active().label
    }

    pub fn report_success(&self, label: &str) {
        let mut endpoints = self.endpoints.lock();
        if let Some(ep) = endpoints.iter_mut().find(|e| e.label == label) {
            ep.consecutive_failures = 0;
            ep.total_successes += 1;
            ep.last_success_time = Some(Utc::now());
        }
    }

    /// Returns `true` if this report caused a demotion.
    pub fn report_failure(&self, label: &str) -> bool {
        let mut endpoints = self.endpoints.lock();
        let Some(ep) = endpoints.iter_mut().find(|e| e.label == label) else {
            return false;
        };
        ep.consecutive_failures += 1;
        ep.total_failures += 1;
        ep.last_failure_time = Some(Utc::now());

        if ep.healthy && ep.consecutive_failures >= self.fail_threshold {
            ep.healthy = false;
            warn!(
                protocol = ?self.protocol,
                label = %ep.label,
                "endpoint DEMOTED after {} consecutive failures, failing over",
                ep.consecutive_failures
            );
            return true;
        }
        false
    }

    fn promote(&self, label: &str) {
        let mut endpoints = self.endpoints.lock();
        if let Some(ep) = endpoints.iter_mut().find(|e| e.label == label) {
            ep.healthy = true;
            ep.consecutive_failures = 0;
            ep.consecutive_recovery_probes = 0;
            info!(protocol = ?self.protocol, label = %ep.label, "endpoint RECOVERED, promoted back");
        }
    }

    fn degraded_labels(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .iter()
            .filter(|e| !e.healthy)
            .map(|e| e.label.clone())
            .collect()
    }

    fn record_probe_result(&self, label: &str, ok: bool) {
        let should_promote = {
            let mut endpoints = self.endpoints.lock();
            let Some(ep) = endpoints.iter_mut().find(|e| e.label == label) else {
                return;
            };
            if ok {
                ep.consecutive_recovery_probes += 1;
                ep.consecutive_recovery_probes >= self.recovery_probes
            } else {
                ep.consecutive_recovery_probes = 0;
                false
            }
        };
        if should_promote {
            self.promote(label);
        }
    }

    pub fn status(&self) -> Vec<Endpoint> {
        self.endpoints.lock().clone()
    }
}

/// Owns all four protocol pools and the shared background probe worker.
pub struct EndpointManager {
    pub rpc: Arc<EndpointPool>,
    pub ws: Arc<EndpointPool>,
    pub grpc: Arc<EndpointPool>,
    pub rabbit: Arc<EndpointPool>,
    probe_timeout: Duration,
    http: reqwest::Client,
}

impl EndpointManager {
    pub fn new(cfg: &crate::config::Config) -> Self {
        let fail_threshold = cfg.fail_threshold;
        let recovery_probes = cfg.recovery_probes;

        let rpc = Arc::new(EndpointPool::new(
            Protocol::Rpc,
            vec![
                Endpoint::new(cfg.rpc_primary.clone(), "rpc-primary"),
                Endpoint::new(cfg.rpc_secondary.clone(), "rpc-secondary"),
            ],
            fail_threshold,
            recovery_probes,
        ));
        let ws = Arc::new(EndpointPool::new(
            Protocol::Ws,
            vec![
                Endpoint::new(cfg.ws_primary.clone(), "ws-primary"),
                Endpoint::new(cfg.ws_secondary.clone(), "ws-secondary"),
            ],
            fail_threshold,
            recovery_probes,
        ));
        let grpc = Arc::new(EndpointPool::new(
            Protocol::Grpc,
            vec![
                Endpoint::new(cfg.grpc_primary.clone(), "grpc-primary"),
                Endpoint::new(cfg.grpc_secondary.clone(), "grpc-secondary"),
            ],
            fail_threshold,
            recovery_probes,
        ));
        let rabbit = Arc::new(EndpointPool::new(
            Protocol::Rabbit,
            vec![
                Endpoint::new(cfg.rabbit_primary.clone(), "rabbit-primary"),
                Endpoint::new(cfg.rabbit_secondary.clone(), "rabbit-secondary"),
            ],
            fail_threshold,
            recovery_probes,
        ));

        Self {
            rpc,
            ws,
            grpc,
            rabbit,
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs.max(1)),
            http: reqwest::Client::new(),
        }
    }

    pub fn rpc_url(&self) -> String {
        self.rpc.active().url
    }

    /// Background probe loop; one task shared across all pools, per spec §4.1.
    pub async fn run_probe_loop(self: Arc<Self>, probe_interval: Duration, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(probe_interval) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }
            self.probe_degraded().await;
        }
    }

    async fn probe_degraded(&self) {
        for pool in [&self.rpc, &self.ws, &self.grpc, &self.rabbit] {
            for label in pool.degraded_labels() {
                let ep = pool
                    .status()
                    .into_iter()
                    .find(|e| e.label == label);
                let Some(ep) = ep else { continue };
                let ok = self.probe_rpc(&ep.url).await;
                pool.record_probe_result(&label, ok);
            }
        }
    }

    async fn probe_rpc(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "getSlot"});
        match tokio::time::timeout(self.probe_timeout, self.http.post(url).json(&body).send()).await {
            Ok(Ok(resp)) => resp.status().is_success(),
            _ => false,
        }
    }
}

pub fn default_probe_interval() -> Duration {
    PROBE_INTERVAL
}

pub fn default_probe_timeout() -> Duration {
    PROBE_TIMEOUT
}

pub fn default_fail_threshold() -> u32 {
    FAIL_THRESHOLD
}

pub fn default_recovery_probes() -> u32 {
    RECOVERY_PROBES
}
