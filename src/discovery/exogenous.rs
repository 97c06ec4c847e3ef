//! Exogenous signal discovery
//!
//! Every configured binding starts `Pending`. The worker retries the
//! connection each cycle until it succeeds. After the first successful
//! connection of a `vectors_collection` binding, exactly one schema
//! negotiation is attempted; when it fails the binding stays connected but
//! schema-less and its channels get empty labels.

use crate::clock::{run_periodic, Clock};
use crate::sources::{BindingSpec, ExogenousKind, ExogenousTransport};
use crate::sync::lock;
use crate::types::BindingState;
use crate::worker::WorkerHandle;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// One configured exogenous signal and what is known about it
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub spec: BindingSpec,
    pub state: BindingState,
    /// Per-key element labels, once negotiated
    pub schema: Option<BTreeMap<String, Vec<String>>>,
}

impl Binding {
    pub fn pending(spec: BindingSpec) -> Self {
        Self {
            spec,
            state: BindingState::Pending,
            schema: None,
        }
    }

    /// Labels of a collection key, empty when unknown
    pub fn labels_for(&self, key: &str) -> Vec<String> {
        self.schema
            .as_ref()
            .and_then(|s| s.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

/// Bindings keyed by signal name, shared with the acquisition loop
pub type BindingTable = Arc<Mutex<BTreeMap<String, Binding>>>;

/// Build a binding table with every binding pending
pub fn binding_table(specs: impl IntoIterator<Item = BindingSpec>) -> BindingTable {
    let table = specs
        .into_iter()
        .map(|spec| (spec.signal_name.clone(), Binding::pending(spec)))
        .collect();
    Arc::new(Mutex::new(table))
}

/// Periodically connects pending exogenous bindings
pub struct ExogenousDiscoveryWorker {
    transport: Arc<dyn ExogenousTransport>,
    bindings: BindingTable,
}

impl ExogenousDiscoveryWorker {
    pub fn new(transport: Arc<dyn ExogenousTransport>, bindings: BindingTable) -> Self {
        Self {
            transport,
            bindings,
        }
    }

    pub fn bindings(&self) -> BindingTable {
        Arc::clone(&self.bindings)
    }

    /// Try every pending binding once
    ///
    /// The table lock is not held while talking to the transport. Returns
    /// the number of bindings that became connected.
    pub fn run_cycle(&self) -> usize {
        let pending: Vec<BindingSpec> = lock(&self.bindings)
            .values()
            .filter(|b| b.state == BindingState::Pending)
            .map(|b| b.spec.clone())
            .collect();

        let mut connected = 0;
        for spec in pending {
            if !self.transport.connect(&spec) {
                tracing::debug!(
                    "Exogenous signal '{}' not reachable at {} yet",
                    spec.signal_name,
                    spec.remote
                );
                continue;
            }
            connected += 1;
            tracing::info!("Connected exogenous signal '{}' ({})", spec.signal_name, spec.remote);

            let schema = match spec.kind {
                ExogenousKind::VectorsCollection => {
                    tracing::info!(
                        "Attempting to get the metadata of the vectors collection signal '{}'",
                        spec.signal_name
                    );
                    let schema = self.transport.negotiate_schema(&spec);
                    if schema.is_none() {
                        tracing::warn!(
                            "Unable to get the metadata of '{}'; its channels will have no labels",
                            spec.signal_name
                        );
                    }
                    schema
                }
                ExogenousKind::Vector => None,
            };

            if let Some(binding) = lock(&self.bindings).get_mut(&spec.signal_name) {
                binding.state = if schema.is_some() {
                    BindingState::SchemaKnown
                } else {
                    BindingState::Connected
                };
                binding.schema = schema;
            }
        }
        connected
    }

    /// Move the worker onto its own thread, scanning every `period` seconds
    pub fn spawn(self, clock: Arc<dyn Clock>, period: f64) -> std::io::Result<WorkerHandle> {
        WorkerHandle::spawn("exogenous-discovery", move |running| {
            run_periodic(clock.as_ref(), period, &running, "Exogenous discovery", || {
                self.run_cycle();
            });
        })
    }
}
