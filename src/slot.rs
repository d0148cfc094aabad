//! Contact Slot
//!
//! Live state of one contact region on the form: which contact (if any) is
//! bound, the field values shown, and which of them are locked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::definition::{HideMethod, SlotDef};
use crate::error::FormError;
use crate::types::{is_blank, ContactRecord, ContactRef, FieldValues, SlotId};

pub const NONE_FOUND_LABEL: &str = "- None Found -";
pub const CREATE_NEW_LABEL: &str = "+ Create new +";

/// Render state of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldState {
    pub visible: bool,
    pub disabled: bool,
    pub locked: bool,
}

impl FieldState {
    pub fn editable(&self) -> bool {
        self.visible && !self.disabled
    }
}

/// A contact slot's live values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    /// Page owning this slot
    pub page: usize,
    /// Existing contact currently bound
    pub contact: Option<ContactRef>,
    /// User chose "+ Create new +"
    #[serde(default)]
    pub create_new: bool,
    pub values: FieldValues,
    /// Fields that were blank when the current contact was bound
    #[serde(default)]
    pub blank_at_bind: BTreeSet<String>,
    /// Defaults have been computed for this slot
    #[serde(default)]
    pub resolved: bool,
    /// The user has edited this slot directly
    #[serde(default)]
    pub user_edited: bool,
    /// Bumped on every bind/unbind; stale lookups compare against it
    #[serde(default)]
    pub generation: u64,
}

impl Slot {
    /// An unresolved slot holding static defaults
    pub fn new(def: &SlotDef, page: usize) -> Self {
        Self {
            id: def.id(),
            page,
            contact: None,
            create_new: false,
            values: static_defaults(def),
            blank_at_bind: BTreeSet::new(),
            resolved: false,
            user_edited: false,
            generation: 0,
        }
    }

    /// Copy every mapped field from `record`. Blank record values fall back to
    /// the field's static default. Values are frozen until the next bind.
    pub fn bind(&mut self, def: &SlotDef, contact: ContactRef, record: &ContactRecord) -> &FieldValues {
        self.values = def
            .fields
            .iter()
            .map(|f| {
                let value = record
                    .get(&f.key)
                    .filter(|v| !is_blank(v))
                    .cloned()
                    .unwrap_or_else(|| f.default_value());
                (f.key.clone(), value)
            })
            .collect();
        self.blank_at_bind = self
            .values
            .iter()
            .filter(|(_, v)| is_blank(v))
            .map(|(k, _)| k.clone())
            .collect();
        self.contact = Some(contact);
        self.create_new = false;
        self.resolved = true;
        self.generation += 1;
        &self.values
    }

    /// Drop the bound contact and restore static defaults
    pub fn unbind(&mut self, def: &SlotDef) -> &FieldValues {
        self.values = static_defaults(def);
        self.blank_at_bind.clear();
        self.contact = None;
        self.create_new = false;
        self.resolved = true;
        self.generation += 1;
        &self.values
    }

    /// Switch to "create new contact": unbound, defaults restored, editable
    pub fn start_new(&mut self, def: &SlotDef) -> &FieldValues {
        self.unbind(def);
        self.create_new = true;
        &self.values
    }

    pub fn field_state(&self, def: &SlotDef, key: &str) -> FieldState {
        let locked = self.contact.is_some()
            && def.is_hide_field(key)
            && !(def.no_hide_blank && self.blank_at_bind.contains(key));
        match (locked, def.hide_method) {
            (false, _) => FieldState {
                visible: true,
                disabled: false,
                locked,
            },
            (true, HideMethod::Hidden) => FieldState {
                visible: false,
                disabled: false,
                locked,
            },
            (true, HideMethod::Disabled) => FieldState {
                visible: true,
                disabled: true,
                locked,
            },
        }
    }

    /// Edit a field the user can see and change
    pub fn set_field(&mut self, def: &SlotDef, key: &str, value: &str) -> Result<(), FormError> {
        if def.field(key).is_none() {
            return Err(FormError::UnknownField {
                slot: self.id,
                field: key.to_string(),
            });
        }
        if !self.field_state(def, key).editable() {
            return Err(FormError::FieldNotEditable {
                slot: self.id,
                field: key.to_string(),
            });
        }
        self.values.insert(key.to_string(), value.to_string());
        self.user_edited = true;
        Ok(())
    }

    pub fn value(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Values that go into the submission: locked fields only with `submit_disabled`
    pub fn payload(&self, def: &SlotDef) -> FieldValues {
        def.fields
            .iter()
            .filter(|f| def.submit_disabled || !self.field_state(def, &f.key).locked)
            .map(|f| (f.key.clone(), self.value(&f.key).to_string()))
            .collect()
    }

    /// Text of the static widget
    pub fn static_label(&self, def: &SlotDef) -> String {
        match self.contact {
            Some(_) => crate::types::display_name(&self.values),
            None if def.allow_create => CREATE_NEW_LABEL.to_string(),
            None => NONE_FOUND_LABEL.to_string(),
        }
    }

    /// Any field holds something other than blank or its static default
    pub fn has_data(&self, def: &SlotDef) -> bool {
        def.fields.iter().any(|f| {
            let value = self.value(&f.key);
            !is_blank(value) && value != f.default_value()
        })
    }
}

fn static_defaults(def: &SlotDef) -> FieldValues {
    def.fields
        .iter()
        .map(|f| (f.key.clone(), f.default_value()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FieldDef;
    use crate::services::record;

    fn field(key: &str, required: bool, default: Option<&str>) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            label: String::new(),
            required,
            default: default.map(str::to_string),
        }
    }

    fn slot_def(hide_method: HideMethod) -> SlotDef {
        SlotDef {
            contact: 1,
            title: None,
            description: None,
            contact_type: "Individual".to_string(),
            widget: Default::default(),
            default: Default::default(),
            hide_fields: vec!["first_name".to_string(), "last_name".to_string()],
            hide_method,
            no_hide_blank: true,
            submit_disabled: false,
            allow_create: true,
            results_display: vec!["display_name".to_string()],
            fields: vec![
                field("first_name", true, None),
                field("last_name", true, None),
                field("job_title", false, Some("Accountant")),
            ],
        }
    }

    #[test]
    fn test_bind_copies_record_and_falls_back_to_defaults() {
        let def = slot_def(HideMethod::Disabled);
        let mut slot = Slot::new(&def, 0);
        assert_eq!(slot.value("job_title"), "Accountant");

        let maarten = record(&[("first_name", "Maarten"), ("last_name", "van der Weijden")]);
        slot.bind(&def, ContactRef(1), &maarten);

        assert_eq!(slot.value("first_name"), "Maarten");
        assert_eq!(slot.value("last_name"), "van der Weijden");
        assert_eq!(slot.value("job_title"), "Accountant");
        assert!(slot.resolved);
    }

    #[test]
    fn test_locked_nonblank_is_disabled_blank_is_editable() {
        let def = slot_def(HideMethod::Disabled);
        let mut slot = Slot::new(&def, 0);

        // Unbound: nothing is locked
        assert!(slot.field_state(&def, "first_name").editable());
        slot.set_field(&def, "first_name", "FIRST").unwrap();

        let prince = record(&[("first_name", "Prince"), ("job_title", "Guitar, vocals")]);
        slot.bind(&def, ContactRef(8), &prince);

        let first = slot.field_state(&def, "first_name");
        assert!(first.visible && first.disabled && first.locked);
        assert!(matches!(
            slot.set_field(&def, "first_name", "Other"),
            Err(FormError::FieldNotEditable { .. })
        ));

        // Blank at bind time stays editable, even once filled in
        assert!(slot.field_state(&def, "last_name").editable());
        slot.set_field(&def, "last_name", "CONTACT 8 LAST NAME").unwrap();
        assert!(slot.field_state(&def, "last_name").editable());
    }

    #[test]
    fn test_hidden_method_hides_locked_fields() {
        let def = slot_def(HideMethod::Hidden);
        let mut slot = Slot::new(&def, 0);
        slot.bind(
            &def,
            ContactRef(3),
            &record(&[("first_name", "Jimmy"), ("last_name", "Page")]),
        );
        let state = slot.field_state(&def, "first_name");
        assert!(!state.visible);
        assert!(!state.disabled);
    }

    #[test]
    fn test_payload_excludes_locked_unless_submit_disabled() {
        let mut def = slot_def(HideMethod::Hidden);
        let mut slot = Slot::new(&def, 0);
        slot.bind(
            &def,
            ContactRef(3),
            &record(&[("first_name", "Jimmy"), ("last_name", "Page")]),
        );

        let payload = slot.payload(&def);
        assert!(!payload.contains_key("first_name"));
        assert_eq!(payload.get("job_title").unwrap(), "Accountant");

        def.submit_disabled = true;
        let payload = slot.payload(&def);
        assert_eq!(payload.get("first_name").unwrap(), "Jimmy");
    }

    #[test]
    fn test_static_labels() {
        let mut def = slot_def(HideMethod::Hidden);
        let mut slot = Slot::new(&def, 0);
        assert_eq!(slot.static_label(&def), CREATE_NEW_LABEL);
        def.allow_create = false;
        assert_eq!(slot.static_label(&def), NONE_FOUND_LABEL);

        slot.bind(
            &def,
            ContactRef(7),
            &record(&[("first_name", "Fred"), ("last_name", "Pinto")]),
        );
        assert_eq!(slot.static_label(&def), "Fred Pinto");
    }

    #[test]
    fn test_generation_advances_on_every_binding_change() {
        let def = slot_def(HideMethod::Hidden);
        let mut slot = Slot::new(&def, 0);
        slot.bind(&def, ContactRef(1), &ContactRecord::new());
        slot.start_new(&def);
        assert_eq!(slot.generation, 2);
        assert!(slot.create_new);
        assert!(slot.contact.is_none());
    }

    #[test]
    fn test_static_defaults_are_not_data() {
        let def = slot_def(HideMethod::Hidden);
        let mut slot = Slot::new(&def, 0);
        assert!(!slot.has_data(&def));
        slot.set_field(&def, "first_name", "Marvin").unwrap();
        assert!(slot.has_data(&def));
    }
}
