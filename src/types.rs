use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Scalar identifiers ───────────────────────────────────────

/// Opaque identifier of a contact in the external CRM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactRef(pub u64);

impl fmt::Display for ContactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contact number of a slot ("Contact 2" is `SlotId(2)`). Unique per form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u16);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact_{}", self.0)
    }
}

/// Field key to value. Values are plain strings; blank means "no value".
pub type FieldValues = BTreeMap<String, String>;

/// A contact record as returned by the CRM, restricted to mapped fields.
pub type ContactRecord = BTreeMap<String, String>;

/// True if the value is empty after trimming.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// "First Last" style display name built from a record or slot values.
pub fn display_name(values: &BTreeMap<String, String>) -> String {
    if let Some(name) = values.get("display_name").filter(|v| !is_blank(v)) {
        return name.trim().to_string();
    }
    ["first_name", "last_name", "household_name", "organization_name"]
        .iter()
        .filter_map(|k| values.get(*k))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Gate markers ─────────────────────────────────────────────

/// A required field that blocked navigation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvalidField {
    pub slot: SlotId,
    pub field: String,
}

impl InvalidField {
    pub fn new(slot: SlotId, field: impl Into<String>) -> Self {
        Self {
            slot,
            field: field.into(),
        }
    }
}

impl fmt::Display for InvalidField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_explicit() {
        let mut values = FieldValues::new();
        values.insert("first_name".into(), "John Paul".into());
        values.insert("last_name".into(), "Jones".into());
        assert_eq!(display_name(&values), "John Paul Jones");

        values.insert("display_name".into(), "JPJ".into());
        assert_eq!(display_name(&values), "JPJ");
    }

    #[test]
    fn test_display_name_skips_blank_parts() {
        let mut values = FieldValues::new();
        values.insert("first_name".into(), "Prince".into());
        values.insert("last_name".into(), "  ".into());
        assert_eq!(display_name(&values), "Prince");
    }
}
