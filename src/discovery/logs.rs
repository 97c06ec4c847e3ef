//! Text-log producer discovery

use crate::clock::{run_periodic, Clock};
use crate::sources::ProducerTransport;
use crate::sync::lock;
use crate::worker::WorkerHandle;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Producers already attached during this session
pub type PortSet = Arc<Mutex<BTreeSet<String>>>;

/// Periodically attaches new text-log producers to the local log port
///
/// A producer is recorded in the [`PortSet`] before the connection attempt
/// and never tried again this session, whether the attempt succeeds or the
/// connection drops later.
pub struct LogDiscoveryWorker {
    transport: Arc<dyn ProducerTransport>,
    prefix: String,
    subnames: Vec<String>,
    local_port: String,
    connected: PortSet,
}

impl LogDiscoveryWorker {
    pub fn new(
        transport: Arc<dyn ProducerTransport>,
        prefix: impl Into<String>,
        subnames: Vec<String>,
        local_port: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            prefix: prefix.into(),
            subnames,
            local_port: local_port.into(),
            connected: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Handle to the set of attached producers
    pub fn port_set(&self) -> PortSet {
        Arc::clone(&self.connected)
    }

    /// Whether a producer name passes the prefix and subname filters
    pub fn accepts(&self, producer: &str) -> bool {
        producer.starts_with(&self.prefix)
            && (self.subnames.is_empty() || self.subnames.iter().any(|s| producer.contains(s.as_str())))
    }

    /// Scan once and attach every new producer
    ///
    /// Returns the number of connection attempts made.
    pub fn run_cycle(&self) -> usize {
        let mut attempts = 0;
        for producer in self.transport.list_active_producers() {
            if !self.accepts(&producer) {
                continue;
            }
            if lock(&self.connected).contains(&producer) {
                continue;
            }
            if !self.transport.exists(&producer) {
                continue;
            }

            lock(&self.connected).insert(producer.clone());
            attempts += 1;
            if self.transport.connect(&producer, &self.local_port) {
                tracing::info!("Connected text-log producer {} to {}", producer, self.local_port);
            } else {
                tracing::warn!(
                    "Unable to connect text-log producer {}; it will not be retried",
                    producer
                );
            }
        }
        attempts
    }

    /// Move the worker onto its own thread, scanning every `period` seconds
    pub fn spawn(self, clock: Arc<dyn Clock>, period: f64) -> std::io::Result<WorkerHandle> {
        WorkerHandle::spawn("log-discovery", move |running| {
            run_periodic(clock.as_ref(), period, &running, "Log discovery", || {
                self.run_cycle();
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockProducerTransport;
    use mockall::predicate::eq;

    fn producers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_connects_each_producer_at_most_once() {
        let mut transport = MockProducerTransport::new();
        transport
            .expect_list_active_producers()
            .times(2)
            .returning(|| producers(&["/log/host/walking/12"]));
        transport.expect_exists().returning(|_| true);
        transport
            .expect_connect()
            .with(eq("/log/host/walking/12"), eq("/robot-logger/log:i"))
            .times(1)
            .returning(|_, _| true);

        let worker = LogDiscoveryWorker::new(
            Arc::new(transport),
            "/log/",
            Vec::new(),
            "/robot-logger/log:i",
        );
        assert_eq!(worker.run_cycle(), 1);
        assert_eq!(worker.run_cycle(), 0);
        assert!(lock(&worker.port_set()).contains("/log/host/walking/12"));
    }

    #[test]
    fn test_failed_connection_is_not_retried() {
        let mut transport = MockProducerTransport::new();
        transport
            .expect_list_active_producers()
            .returning(|| producers(&["/log/host/balancing/3"]));
        transport.expect_exists().returning(|_| true);
        transport.expect_connect().times(1).returning(|_, _| false);

        let worker = LogDiscoveryWorker::new(Arc::new(transport), "/log/", Vec::new(), "/in");
        worker.run_cycle();
        worker.run_cycle();
        worker.run_cycle();
    }

    #[test]
    fn test_filters_by_prefix_and_subnames() {
        let mut transport = MockProducerTransport::new();
        transport.expect_list_active_producers().returning(|| {
            producers(&["/log/a/walking/1", "/log/a/vision/2", "/camera/rgb", "/log/b/walking/3"])
        });
        transport.expect_exists().returning(|_| true);
        transport
            .expect_connect()
            .withf(|producer, _| producer.contains("walking"))
            .times(2)
            .returning(|_, _| true);

        let worker = LogDiscoveryWorker::new(
            Arc::new(transport),
            "/log/",
            vec!["walking".to_string()],
            "/in",
        );
        assert!(!worker.accepts("/camera/rgb"));
        assert_eq!(worker.run_cycle(), 2);
    }

    #[test]
    fn test_unreachable_producer_is_retried_later() {
        let mut transport = MockProducerTransport::new();
        transport
            .expect_list_active_producers()
            .returning(|| producers(&["/log/x/y/1"]));
        let mut seq = mockall::Sequence::new();
        transport
            .expect_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| false);
        transport
            .expect_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| true);
        transport.expect_connect().times(1).returning(|_, _| true);

        let worker = LogDiscoveryWorker::new(Arc::new(transport), "/log/", Vec::new(), "/in");
        assert_eq!(worker.run_cycle(), 0);
        assert_eq!(worker.run_cycle(), 1);
    }
}
