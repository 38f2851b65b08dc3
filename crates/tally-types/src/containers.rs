use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Signed container balance per container type for one counterparty.
///
/// Positive values mean the counterparty owes containers; negative values mean
/// the counterparty is owed containers. Values are never clamped. The stored
/// form is sparse: types whose balance is exactly zero are omitted.
///
/// Deserialization is lenient. Stored maps written by older clients may be a
/// JSON string holding an object, or garbage; anything that is not a mapping
/// of container type to integer reads as an empty map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContainerBalances(BTreeMap<String, i64>);

impl ContainerBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a stored value, falling back to an empty map.
    pub fn from_stored(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut balances = BTreeMap::new();
                for (container_type, amount) in map {
                    match amount.as_i64() {
                        Some(n) => {
                            balances.insert(container_type.clone(), n);
                        }
                        None => return Self::default(),
                    }
                }
                Self(balances).cleaned()
            }
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(inner @ Value::Object(_)) => Self::from_stored(&inner),
                _ => Self::default(),
            },
            _ => Self::default(),
        }
    }

    pub fn get(&self, container_type: &str) -> i64 {
        self.0.get(container_type).copied().unwrap_or(0)
    }

    /// Add `delta` to one container type, dropping the entry if it reaches zero.
    /// Saturates at the `i64` bounds.
    pub fn apply(&mut self, container_type: &str, delta: i64) {
        let next = self.get(container_type).saturating_add(delta);
        if next == 0 {
            self.0.remove(container_type);
        } else {
            self.0.insert(container_type.to_string(), next);
        }
    }

    /// Copy with zero-valued types removed.
    #[must_use]
    pub fn cleaned(mut self) -> Self {
        self.0.retain(|_, v| *v != 0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(*v)))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for ContainerBalances {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_stored(&value))
    }
}

impl FromIterator<(String, i64)> for ContainerBalances {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        let mut balances = Self::new();
        for (container_type, delta) in iter {
            balances.apply(&container_type, delta);
        }
        balances
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn egress_then_ingress_nets_out() {
        let mut balances = ContainerBalances::new();
        balances.apply("Bin-20kg", 50);
        balances.apply("Bin-20kg", -20);
        assert_eq!(balances.get("Bin-20kg"), 30);
    }

    #[test]
    fn zero_entries_are_dropped() {
        let mut balances = ContainerBalances::new();
        balances.apply("Crate", 5);
        balances.apply("Crate", -5);
        assert!(balances.is_empty());
        assert_eq!(balances.to_value(), json!({}));
    }

    #[test]
    fn negative_balances_are_kept() {
        let mut balances = ContainerBalances::new();
        balances.apply("Crate", -5);
        assert_eq!(balances.get("Crate"), -5);
    }

    #[test]
    fn apply_saturates_instead_of_overflowing() {
        let mut balances = ContainerBalances::new();
        balances.apply("Crate", i64::MAX);
        balances.apply("Crate", 1);
        assert_eq!(balances.get("Crate"), i64::MAX);
        balances.apply("Bin", i64::MIN);
        balances.apply("Bin", -1);
        assert_eq!(balances.get("Bin"), i64::MIN);
    }

    #[test]
    fn stored_object_is_read_and_cleaned() {
        let balances = ContainerBalances::from_stored(&json!({"Crate": 3, "Bin": 0}));
        assert_eq!(balances.len(), 1);
        assert_eq!(balances.get("Crate"), 3);
    }

    #[test]
    fn string_encoded_map_is_accepted() {
        let balances = ContainerBalances::from_stored(&json!("{\"Crate\": 4}"));
        assert_eq!(balances.get("Crate"), 4);
    }

    #[test]
    fn malformed_values_read_as_empty() {
        for value in [
            json!("not json"),
            json!(null),
            json!([1, 2, 3]),
            json!({"Crate": "many"}),
            json!("[1]"),
        ] {
            assert!(ContainerBalances::from_stored(&value).is_empty(), "{value}");
        }
    }

    #[test]
    fn deserialize_uses_lenient_reading() {
        let balances: ContainerBalances = serde_json::from_value(json!(42)).unwrap();
        assert!(balances.is_empty());
    }
}
