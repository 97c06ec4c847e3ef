//! Discovery workers
//!
//! Background workers that find and attach producers not known at
//! configuration time. Each runs on its own period through
//! [`run_periodic`](crate::clock::run_periodic), so a clock reset reseeds its
//! schedule and a stop request is observed within one sleep slice.
//!
//! - [`LogDiscoveryWorker`] - connects text-log producers, at most once each
//! - [`ExogenousDiscoveryWorker`] - connects exogenous bindings and
//!   negotiates their schema
//!
//! The state each worker maintains (the port set, the binding table) is
//! shared with the acquisition loop behind a single mutex per structure.

pub mod exogenous;
pub mod logs;

pub use exogenous::{binding_table, Binding, BindingTable, ExogenousDiscoveryWorker};
pub use logs::{LogDiscoveryWorker, PortSet};
