//! Config comparison
//!
//! Compares two configs field by field over their serialized trees, after
//! stripping `config_history` and `created_at` (which legitimately differ
//! between otherwise-identical configs). Nested fields are reported under
//! dotted key paths.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::ExperimentConfig;
use crate::error::Result;

/// Fields excluded from comparison
const IGNORED_FIELDS: [&str; 2] = ["config_history", "created_at"];

/// One changed field between two configs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FieldChange {
    /// Present only in the second config
    Added {
        /// The new value
        value: Value,
    },
    /// Present only in the first config
    Removed {
        /// The removed value
        value: Value,
    },
    /// Present in both with different values
    Modified {
        /// Value in the first config
        old_value: Value,
        /// Value in the second config
        new_value: Value,
    },
}

/// Compare two configs, returning changes keyed by dotted field path
pub fn diff_configs(
    a: &ExperimentConfig,
    b: &ExperimentConfig,
) -> Result<BTreeMap<String, FieldChange>> {
    let mut flat_a = BTreeMap::new();
    let mut flat_b = BTreeMap::new();
    flatten("", &strip_ignored(serde_json::to_value(a)?), &mut flat_a);
    flatten("", &strip_ignored(serde_json::to_value(b)?), &mut flat_b);

    let mut changes = BTreeMap::new();

    for (key, value_a) in &flat_a {
        match flat_b.get(key) {
            None => {
                changes.insert(key.clone(), FieldChange::Removed { value: value_a.clone() });
            }
            Some(value_b) if value_b != value_a => {
                changes.insert(
                    key.clone(),
                    FieldChange::Modified {
                        old_value: value_a.clone(),
                        new_value: value_b.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (key, value_b) in &flat_b {
        if !flat_a.contains_key(key) {
            changes.insert(key.clone(), FieldChange::Added { value: value_b.clone() });
        }
    }

    Ok(changes)
}

fn strip_ignored(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        for field in IGNORED_FIELDS {
            obj.remove(field);
        }
    }
    value
}

/// Flatten a JSON tree into dotted leaf paths
fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MetricMode;
    use crate::config::{Architecture, Dataset, ExperimentConfig};

    fn base_config() -> ExperimentConfig {
        ExperimentConfig::new("diff test", Dataset::Dataset1, Architecture::Cnn, "/tmp/r")
    }

    #[test]
    fn test_identical_configs_have_no_diff() {
        let a = base_config();
        let mut b = a.clone();
        // Timestamp and history drift must not register as differences.
        b.created_at = chrono::Utc::now();
        b.config_history = a.config_history.clone();

        assert!(diff_configs(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn test_modified_scalar_field() {
        let a = base_config();
        let mut b = a.clone();
        b.learning_rate = 5e-4;

        let changes = diff_configs(&a, &b).unwrap();
        assert_eq!(changes.len(), 1);
        match changes.get("learning_rate").unwrap() {
            FieldChange::Modified { old_value, new_value } => {
                assert_eq!(old_value.as_f64().unwrap(), 1e-3);
                assert_eq!(new_value.as_f64().unwrap(), 5e-4);
            }
            other => panic!("expected Modified, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_field_reported_with_dotted_path() {
        let a = base_config();
        let mut b = a.clone();
        b.early_stopping.mode = MetricMode::Max;
        b.early_stopping.patience = 5;

        let changes = diff_configs(&a, &b).unwrap();
        assert!(changes.contains_key("early_stopping.mode"));
        assert!(changes.contains_key("early_stopping.patience"));
    }

    #[test]
    fn test_added_and_removed_fields() {
        let a = base_config();
        let mut b = a.clone();
        b.preprocessing = Some(crate::config::PreprocessingConfig::minimal());

        let changes = diff_configs(&a, &b).unwrap();
        // `preprocessing` is null in `a`, an object in `b`: its leaves show
        // up as additions and the null leaf as modified-or-removed.
        assert!(changes.keys().any(|k| k.starts_with("preprocessing")));
    }

    #[test]
    fn test_status_serialization_shape() {
        let change = FieldChange::Modified {
            old_value: serde_json::json!(1),
            new_value: serde_json::json!(2),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value.get("status").unwrap(), "modified");
        assert_eq!(value.get("old_value").unwrap(), 1);
        assert_eq!(value.get("new_value").unwrap(), 2);
    }
}
