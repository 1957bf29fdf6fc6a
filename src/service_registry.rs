//! Lifecycle registry for the engine's long-running services.
//!
//! Ported from `service_registry.py`: registration is a descriptor plus
//! an instance, `set_stream_manager` auto-wires gRPC consumers, and
//! `start_all`/`stop_all` drive every registered service without the
//! caller needing to know the concrete set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub key: String,
    pub name: String,
    pub auto_start: bool,
    /// True if this service consumes gRPC slot/account updates and should
    /// be wired into the `StreamManager` when one is attached.
    pub needs_stream: bool,
}

impl ServiceDescriptor {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            auto_start: false,
            needs_stream: false,
        }
    }

    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn needs_stream(mut self) -> Self {
        self.needs_stream = true;
        self
    }
}

pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
    descriptors: HashMap<String, ServiceDescriptor>,
    order: Vec<String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ServiceDescriptor, instance: Arc<dyn Service>) {
        let key = descriptor.key.clone();
        if self.services.contains_key(&key) {
            warn!(key = %key, "service already registered, overwriting");
        } else {
            self.order.push(key.clone());
        }
        info!(key = %key, name = %descriptor.name, "registered service");
        self.services.insert(key.clone(), instance);
        self.descriptors.insert(key, descriptor);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Service>> {
        self.services.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn stream_sink_keys(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|k| self.descriptors.get(*k).map(|d| d.needs_stream).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub async fn start_all(&self, auto_only: bool) {
        for key in &self.order {
            let Some(desc) = self.descriptors.get(key) else { continue };
            if auto_only && !desc.auto_start {
                continue;
            }
            let Some(svc) = self.services.get(key) else { continue };
            if svc.is_running() {
                continue;
            }
            match svc.start().await {
                Ok(()) => info!(key = %key, "auto-started service"),
                Err(e) => warn!(key = %key, "failed to auto-start: {e}"),
            }
        }
    }

    pub async fn stop_all(&self) {
        for key in self.order.iter().rev() {
            let Some(svc) = self.services.get(key) else { continue };
            if !svc.is_running() {
                continue;
            }
            if let Err(e) = svc.stop().await {
                warn!(key = %key, "error stopping service: {e}");
            } else {
                info!(key = %key, "stopped service");
            }
        }
    }

    pub fn status_all(&self) -> Vec<ServiceStatus> {
        self.order
            .iter()
            .filter_map(|key| {
                let desc = self.descriptors.get(key)?;
                let running = self.services.get(key).map(|s| s.is_running()).unwrap_or(false);
                Some(ServiceStatus { name: desc.name.clone(), running })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Dummy(AtomicBool);

    #[async_trait]
    impl Service for Dummy {
        async fn start(&self) -> anyhow::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.0.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_running(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn auto_start_only_starts_flagged_services() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            ServiceDescriptor::new("a", "A").auto_start(),
            Arc::new(Dummy(AtomicBool::new(false))),
        );
        registry.register(ServiceDescriptor::new("b", "B"), Arc::new(Dummy(AtomicBool::new(false))));

        registry.start_all(true).await;
        assert!(registry.get("a").unwrap().is_running());
        assert!(!registry.get("b").unwrap().is_running());
    }

    #[tokio::test]
    async fn stop_all_only_stops_running_services() {
        let mut registry = ServiceRegistry::new();
        registry.register(ServiceDescriptor::new("a", "A"), Arc::new(Dummy(AtomicBool::new(true))));
        registry.stop_all().await;
        assert!(!registry.get("a").unwrap().is_running());
    }
}
