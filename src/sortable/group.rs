use std::fmt;

use crc32fast::Hasher;

use crate::value::FieldValue;

/// Identity of one ordering space: a collection plus its group column values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    collection: String,
    values: Vec<FieldValue>,
}

impl GroupKey {
    pub fn new(collection: impl Into<String>, groups: &[(String, FieldValue)]) -> Self {
        Self {
            collection: collection.into(),
            values: groups.iter().map(|(_, value)| value.clone()).collect(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Short stable digest used in log lines.
    pub fn digest(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(self.collection.as_bytes());
        for value in &self.values {
            hasher.update(b"/");
            match value {
                FieldValue::Null => hasher.update(b"\0null"),
                FieldValue::Bool(value) => hasher.update(if *value { b"\0t" } else { b"\0f" }),
                FieldValue::Int(value) => {
                    hasher.update(b"\0i");
                    hasher.update(&value.to_le_bytes());
                }
                FieldValue::Text(value) => {
                    hasher.update(b"\0s");
                    hasher.update(value.as_bytes());
                }
            }
        }
        hasher.finalize()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{:08x}", self.collection, self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(values: &[FieldValue]) -> Vec<(String, FieldValue)> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| (format!("g{index}"), value.clone()))
            .collect()
    }

    #[test]
    fn keys_distinguish_types_and_order() {
        let text = GroupKey::new("items", &groups(&[FieldValue::from("1")]));
        let int = GroupKey::new("items", &groups(&[FieldValue::Int(1)]));
        assert_ne!(text, int);
        assert_ne!(text.digest(), int.digest());

        let ab = GroupKey::new("items", &groups(&[FieldValue::Int(1), FieldValue::Int(2)]));
        let ba = GroupKey::new("items", &groups(&[FieldValue::Int(2), FieldValue::Int(1)]));
        assert_ne!(ab.digest(), ba.digest());
    }

    #[test]
    fn ungrouped_key_is_stable() {
        let first = GroupKey::new("items", &[]);
        let second = GroupKey::new("items", &[]);
        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }
}
