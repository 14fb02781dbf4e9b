//! Active-configuration snapshot and staleness checks.
//!
//! The tracker records the connection-relevant settings at connect time and
//! later answers whether a caller's configuration would still produce the
//! same connection. Readers take an `Arc` of the current snapshot, so a
//! concurrent replacement never exposes a half-written map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::config::{ClientConfig, MetaVar};

/// Anything that can produce the string value of a configuration key.
pub trait ConfigSource {
    fn conf_value(&self, key: &str) -> Option<String>;
}

impl ConfigSource for ClientConfig {
    fn conf_value(&self, key: &str) -> Option<String> {
        MetaVar::ALL
            .iter()
            .find(|var| var.key() == key)
            .map(|var| self.get_as_string(*var))
    }
}

impl ConfigSource for HashMap<String, String> {
    fn conf_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A key compared by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedKey {
    pub name: String,
    pub case_sensitive: bool,
    /// Values are left out of the stale-connection log.
    pub secret: bool,
}

impl TrackedKey {
    pub fn new(name: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            name: name.into(),
            case_sensitive,
            secret: false,
        }
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

type Snapshot = Arc<HashMap<String, String>>;

#[derive(Debug)]
pub struct ConsistencyTracker {
    keys: Vec<TrackedKey>,
    current: RwLock<Option<Snapshot>>,
}

impl ConsistencyTracker {
    #[must_use]
    pub fn new(keys: Vec<TrackedKey>) -> Self {
        Self {
            keys,
            current: RwLock::new(None),
        }
    }

    /// Tracker over every connection-relevant client setting.
    #[must_use]
    pub fn for_client() -> Self {
        Self::new(
            MetaVar::ALL
                .iter()
                .map(|var| {
                    let key = TrackedKey::new(var.key(), var.is_case_sensitive());
                    if var.is_secret() {
                        key.secret()
                    } else {
                        key
                    }
                })
                .collect(),
        )
    }

    /// Replace the snapshot with the source's current values.
    pub fn snapshot(&self, source: &dyn ConfigSource) {
        let values: HashMap<String, String> = self
            .keys
            .iter()
            .filter_map(|key| source.conf_value(&key.name).map(|v| (key.name.clone(), v)))
            .collect();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(values));
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Whether the candidate matches the snapshot on every tracked key.
    ///
    /// Returns `false` when no snapshot exists.
    #[must_use]
    pub fn is_compatible(&self, candidate: &dyn ConfigSource) -> bool {
        let Some(snapshot) = self
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            return false;
        };

        for key in &self.keys {
            let old = snapshot.get(&key.name);
            let new = candidate.conf_value(&key.name);
            let equal = match (old, new.as_deref()) {
                (Some(old), Some(new)) if key.case_sensitive => old == new,
                (Some(old), Some(new)) => old.eq_ignore_ascii_case(new),
                _ => false,
            };
            if !equal {
                if key.secret {
                    info!(key = %key.name, "Metastore setting changed, connection is stale");
                } else {
                    info!(
                        key = %key.name,
                        old = ?old,
                        new = ?new,
                        "Metastore setting changed, connection is stale"
                    );
                }
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn tracker() -> ConsistencyTracker {
        ConsistencyTracker::new(vec![
            TrackedKey::new("keyA", true),
            TrackedKey::new("keyB", false),
        ])
    }

    #[test]
    fn test_no_snapshot_is_incompatible() {
        let tracker = tracker();
        assert!(!tracker.is_compatible(&conf(&[("keyA", "x"), ("keyB", "Y")])));
    }

    #[test]
    fn test_case_rules_per_key() {
        let tracker = tracker();
        tracker.snapshot(&conf(&[("keyA", "x"), ("keyB", "Y")]));
        assert!(tracker.is_compatible(&conf(&[("keyA", "x"), ("keyB", "y")])));
        assert!(!tracker.is_compatible(&conf(&[("keyA", "X"), ("keyB", "y")])));
    }

    #[test]
    fn test_missing_values_are_incompatible() {
        let tracker = tracker();
        tracker.snapshot(&conf(&[("keyA", "x")]));
        assert!(!tracker.is_compatible(&conf(&[("keyA", "x"), ("keyB", "y")])));
    }

    #[test]
    fn test_clear_drops_snapshot() {
        let tracker = tracker();
        tracker.snapshot(&conf(&[("keyA", "x"), ("keyB", "y")]));
        assert!(tracker.has_snapshot());
        tracker.clear();
        assert!(!tracker.has_snapshot());
        assert!(!tracker.is_compatible(&conf(&[("keyA", "x"), ("keyB", "y")])));
    }

    #[test]
    fn test_client_config_source() {
        let tracker = ConsistencyTracker::for_client();
        let config = ClientConfig::with_uris("thrift://a:9083");
        tracker.snapshot(&config);
        assert!(tracker.is_compatible(&config.clone()));

        let mut moved = config.clone();
        moved.uris = "thrift://b:9083".to_string();
        assert!(!tracker.is_compatible(&moved));

        let mut sasl = config.clone();
        sasl.use_sasl = true;
        assert!(!tracker.is_compatible(&sasl));

        let mut rotated = config;
        rotated.tls.truststore_password = "rotated".to_string();
        assert!(!tracker.is_compatible(&rotated));
    }

    #[test]
    fn test_client_tracker_marks_password_secret() {
        let tracker = ConsistencyTracker::for_client();
        let password = tracker
            .keys
            .iter()
            .find(|k| k.name == "tls.truststore_password")
            .unwrap();
        assert!(password.secret);
        assert!(password.case_sensitive);
        assert!(tracker.keys.iter().filter(|k| k.secret).count() == 1);
    }
}
