//! Validation Gate
//!
//! Required-field check run before forward navigation and submit. A field
//! fails when it is required, visible, and blank after trimming. Hidden
//! required fields never block.

use std::collections::BTreeSet;

use crate::definition::FormDefinition;
use crate::slot::Slot;
use crate::types::{is_blank, InvalidField};

/// Check the given slots. Slots unknown to the definition are skipped.
pub fn check<'a>(
    definition: &FormDefinition,
    slots: impl IntoIterator<Item = &'a Slot>,
) -> BTreeSet<InvalidField> {
    let mut failing = BTreeSet::new();

    for slot in slots {
        let Some(def) = definition.slot(slot.id) else {
            continue;
        };
        for field in def.fields.iter().filter(|f| f.required) {
            let state = slot.field_state(def, &field.key);
            if state.visible && is_blank(slot.value(&field.key)) {
                failing.insert(InvalidField::new(slot.id, field.key.clone()));
            }
        }
    }

    failing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::record;
    use crate::types::{ContactRef, SlotId};

    const FORM: &str = r#"
id: gate
pages:
  - slots:
      - contact: 1
        hide_fields: [first_name, last_name, email]
        hide_method: hidden
        fields:
          - { key: first_name, required: true }
          - { key: last_name, required: true }
          - { key: email, required: true, default: "email@example.com" }
          - { key: job_title }
"#;

    #[test]
    fn test_visible_blank_required_fails() {
        let def = FormDefinition::from_yaml(FORM).unwrap();
        let slot = Slot::new(def.slot(SlotId(1)).unwrap(), 0);

        let failing = check(&def, [&slot]);
        assert_eq!(
            failing.into_iter().collect::<Vec<_>>(),
            vec![
                InvalidField::new(SlotId(1), "first_name"),
                InvalidField::new(SlotId(1), "last_name"),
            ]
        );
    }

    #[test]
    fn test_whitespace_counts_as_blank() {
        let def = FormDefinition::from_yaml(FORM).unwrap();
        let slot_def = def.slot(SlotId(1)).unwrap();
        let mut slot = Slot::new(slot_def, 0);
        slot.set_field(slot_def, "first_name", "   ").unwrap();
        slot.set_field(slot_def, "last_name", "Gaye").unwrap();

        let failing = check(&def, [&slot]);
        assert_eq!(failing.len(), 1);
        assert!(failing.contains(&InvalidField::new(SlotId(1), "first_name")));
    }

    #[test]
    fn test_hidden_required_never_blocks() {
        let def = FormDefinition::from_yaml(FORM).unwrap();
        let slot_def = def.slot(SlotId(1)).unwrap();
        let mut slot = Slot::new(slot_def, 0);
        slot.bind(
            slot_def,
            ContactRef(4),
            &record(&[("first_name", "Robert"), ("last_name", "Plant")]),
        );

        assert!(!slot.field_state(slot_def, "email").visible);
        assert!(check(&def, [&slot]).is_empty());
    }
}
