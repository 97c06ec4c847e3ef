//! Channel registry
//!
//! Maps a hierarchical channel name to its fixed-shape descriptor. The
//! registry is append-only for the lifetime of a session: channels are
//! created lazily on first sight and never removed.
//!
//! A channel that later receives a sample of the wrong size is poisoned.
//! Poisoning is reported once; every later write to that channel is
//! rejected without further logging.

pub mod names;

use crate::error::{LoggerError, Result};
use crate::types::{ChannelDescriptor, Payload};
use std::collections::{BTreeMap, HashSet};

/// Result of registering a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The channel did not exist and was created
    Created,
    /// The channel already existed with the same shape
    Existing,
}

/// Append-only set of channel descriptors
#[derive(Debug, Default, Clone)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelDescriptor>,
    poisoned: HashSet<String>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel
    ///
    /// Registering an existing name with the same shape is a no-op. A
    /// different shape fails with [`LoggerError::DuplicateChannel`]. Labels,
    /// when given, must match the element count.
    pub fn register(&mut self, descriptor: ChannelDescriptor) -> Result<Registration> {
        if let Some(existing) = self.channels.get(&descriptor.name) {
            if existing.same_shape(&descriptor) {
                return Ok(Registration::Existing);
            }
            return Err(LoggerError::DuplicateChannel {
                name: descriptor.name,
                existing: existing.size,
                requested: descriptor.size,
            });
        }

        if !descriptor.labels.is_empty() && descriptor.labels.len() != descriptor.size {
            return Err(LoggerError::Configuration(format!(
                "Channel '{}' has {} labels for {} elements",
                descriptor.name,
                descriptor.labels.len(),
                descriptor.size
            )));
        }

        self.channels.insert(descriptor.name.clone(), descriptor);
        Ok(Registration::Created)
    }

    pub fn get(&self, name: &str) -> Option<&ChannelDescriptor> {
        self.channels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate descriptors in name order
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.values()
    }

    pub fn is_poisoned(&self, name: &str) -> bool {
        self.poisoned.contains(name)
    }

    /// Check that `payload` fits the channel
    ///
    /// On a mismatch the channel is poisoned and the mismatch is returned
    /// once; later checks on a poisoned channel return `Ok(false)`.
    /// Returns `Ok(true)` when the payload may be stored.
    pub fn check(&mut self, name: &str, payload: &Payload) -> Result<bool> {
        if self.poisoned.contains(name) {
            return Ok(false);
        }
        let descriptor = self
            .channels
            .get(name)
            .ok_or_else(|| LoggerError::UnknownChannel(name.to_string()))?;

        if descriptor.kind != payload.kind() || descriptor.size != payload.len() {
            let expected = descriptor.size;
            self.poisoned.insert(name.to_string());
            return Err(LoggerError::SchemaMismatch {
                name: name.to_string(),
                expected,
                got: payload.len(),
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ChannelRegistry::new();
        let desc = ChannelDescriptor::numeric("joints_state::positions", 3);
        assert_eq!(registry.register(desc.clone()).unwrap(), Registration::Created);
        assert_eq!(registry.register(desc).unwrap(), Registration::Existing);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_different_shape_fails() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(ChannelDescriptor::numeric("imu", 9))
            .unwrap();
        let err = registry
            .register(ChannelDescriptor::numeric("imu", 6))
            .unwrap_err();
        assert!(matches!(
            err,
            LoggerError::DuplicateChannel {
                existing: 9,
                requested: 6,
                ..
            }
        ));
        assert_eq!(registry.get("imu").unwrap().size, 9);
    }

    #[test]
    fn test_label_count_must_match() {
        let mut registry = ChannelRegistry::new();
        let err = registry
            .register(ChannelDescriptor::numeric("ft", 6).with_labels(["f_x", "f_y"]))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mismatch_poisons_once() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(ChannelDescriptor::numeric("ft", 6))
            .unwrap();
        assert!(registry
            .check("ft", &Payload::Numeric(vec![0.0; 6]))
            .unwrap());
        assert!(matches!(
            registry.check("ft", &Payload::Numeric(vec![0.0; 3])),
            Err(LoggerError::SchemaMismatch { expected: 6, got: 3, .. })
        ));
        assert!(registry.is_poisoned("ft"));
        // Poisoned channels reject silently, even well-formed samples
        assert!(!registry
            .check("ft", &Payload::Numeric(vec![0.0; 6]))
            .unwrap());
    }

    #[test]
    fn test_text_payload_on_numeric_channel() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(ChannelDescriptor::numeric("scalar", 1))
            .unwrap();
        assert!(registry
            .check("scalar", &Payload::Text("x".into()))
            .is_err());
    }

    #[test]
    fn test_check_unknown_channel() {
        let mut registry = ChannelRegistry::new();
        assert!(matches!(
            registry.check("nope", &Payload::Numeric(vec![])),
            Err(LoggerError::UnknownChannel(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_register_twice_is_noop(name in "[a-z]{1,8}(::[a-z]{1,8}){0,3}", size in 1usize..64, other in 1usize..64) {
            let mut registry = ChannelRegistry::new();
            registry.register(ChannelDescriptor::numeric(name.clone(), size)).unwrap();
            prop_assert_eq!(
                registry.register(ChannelDescriptor::numeric(name.clone(), size)).unwrap(),
                Registration::Existing
            );
            let res = registry.register(ChannelDescriptor::numeric(name.clone(), other));
            if other == size {
                prop_assert!(res.is_ok());
            } else {
                let is_duplicate = matches!(res, Err(LoggerError::DuplicateChannel { .. }));
                prop_assert!(is_duplicate);
            }
            prop_assert_eq!(registry.len(), 1);
        }
    }
}
