use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::document::Document;
use crate::error::StoreError;

/// Conjunction of field-equals conditions.
///
/// Field paths may be dotted (`source.doc_type`); the pseudo-field `id`
/// matches the record id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            if field == "id" {
                expected.as_str() == Some(doc.id.as_str())
            } else {
                doc.field(field) == Some(expected)
            }
        })
    }
}

/// Sort key for list and filter requests. Ties are always broken by id so
/// page boundaries are stable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Ascending by record id.
    pub fn by_id() -> Self {
        Self::asc("id")
    }

    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let primary = if self.field == "id" {
            Ordering::Equal
        } else {
            compare_values(a.field(&self.field), b.field(&self.field))
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field)
        } else {
            f.write_str(&self.field)
        }
    }
}

impl FromStr for OrderKey {
    type Err = StoreError;

    /// Parse `field` or `-field`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, descending) = match s.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if field.is_empty() {
            return Err(StoreError::InvalidQuery(format!("empty order key: {s:?}")));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }
}

/// Total order over JSON scalars: missing < null < bool < number < string.
/// Arrays and objects compare equal to each other and sort last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tally_types::RecordId;

    use super::*;

    fn doc(id: &str, body: Value) -> Document {
        Document {
            id: RecordId::from(id),
            version: 1,
            body,
        }
    }

    #[test]
    fn filter_matches_nested_fields_and_id() {
        let d = doc("7", json!({"source": {"doc_type": "shipment", "id": "s9"}}));
        assert!(Filter::new().eq("source.doc_type", "shipment").matches(&d));
        assert!(Filter::new().eq("id", "7").matches(&d));
        assert!(!Filter::new()
            .eq("source.doc_type", "shipment")
            .eq("source.id", "other")
            .matches(&d));
        assert!(Filter::new().matches(&d));
    }

    #[test]
    fn order_by_date_breaks_ties_by_id() {
        let a = doc("2", json!({"date": "2024-01-05"}));
        let b = doc("1", json!({"date": "2024-01-05"}));
        let c = doc("3", json!({"date": "2024-01-01"}));
        let mut docs = vec![a, b, c];
        let key = OrderKey::asc("date");
        docs.sort_by(|x, y| key.compare(x, y));
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["3", "1", "2"]);

        let key: OrderKey = "-date".parse().unwrap();
        docs.sort_by(|x, y| key.compare(x, y));
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["2", "1", "3"]);
    }

    #[test]
    fn numbers_compare_numerically() {
        let a = doc("1", json!({"stock": 10}));
        let b = doc("2", json!({"stock": 9}));
        assert_eq!(OrderKey::asc("stock").compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn empty_order_key_is_rejected() {
        assert!("-".parse::<OrderKey>().is_err());
        assert_eq!(OrderKey::desc("date").to_string(), "-date");
    }
}
