//! Form Definition Types and YAML Loading
//!
//! A form is an ordered list of pages, each owning an ordered list of contact
//! slots. Definitions are loaded from YAML and validated before a session can
//! be opened against them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::DefinitionError;
use crate::resolver::SlotGraph;
use crate::types::SlotId;

/// A complete form definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Form identifier
    pub id: String,
    /// Human-readable title
    #[serde(default)]
    pub title: String,
    /// Wizard pages in display order
    pub pages: Vec<PageDef>,
    /// Outbound notification templates rendered at submit
    #[serde(default)]
    pub notifications: Vec<NotificationDef>,
}

/// One wizard page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDef {
    #[serde(default)]
    pub title: String,
    pub slots: Vec<SlotDef>,
}

/// Configuration of one contact slot (the existing-contact element plus its fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDef {
    /// Contact number, unique across the form
    pub contact: u16,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_contact_type")]
    pub contact_type: String,
    #[serde(default)]
    pub widget: Widget,
    #[serde(default)]
    pub default: DefaultPolicy,
    /// Fields locked while an existing contact is bound
    #[serde(default)]
    pub hide_fields: Vec<String>,
    #[serde(default)]
    pub hide_method: HideMethod,
    /// Leave locked fields editable when their value is blank
    #[serde(default)]
    pub no_hide_blank: bool,
    /// Keep locked fields in the submission payload
    #[serde(default)]
    pub submit_disabled: bool,
    /// Offer "+ Create new +" in place of an existing contact
    #[serde(default = "default_true")]
    pub allow_create: bool,
    /// Record fields shown (and searched) by the autocomplete widget
    #[serde(default = "default_results_display")]
    pub results_display: Vec<String>,
    pub fields: Vec<FieldDef>,
}

fn default_contact_type() -> String {
    "Individual".to_string()
}

fn default_true() -> bool {
    true
}

fn default_results_display() -> Vec<String> {
    vec!["display_name".to_string()]
}

impl SlotDef {
    pub fn id(&self) -> SlotId {
        SlotId(self.contact)
    }

    pub fn field(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Submission element key for one of this slot's fields
    pub fn element_key(&self, field: &str) -> String {
        format!("contact_{}_{}", self.contact, field)
    }

    /// Submission element key of the existing-contact selector
    pub fn existing_key(&self) -> String {
        self.element_key("existing")
    }

    pub fn label(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Contact {}", self.contact))
    }

    pub fn is_hide_field(&self, key: &str) -> bool {
        self.hide_fields.iter().any(|f| f == key)
    }
}

/// One data field of a slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Contact record field this maps to (e.g. "first_name")
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    /// Static default used when unbound, or when the bound record is blank
    #[serde(default)]
    pub default: Option<String>,
}

impl FieldDef {
    pub fn default_value(&self) -> String {
        self.default.clone().unwrap_or_default()
    }

    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            self.key.clone()
        } else {
            self.label.clone()
        }
    }
}

/// How the existing-contact selector is presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    #[default]
    Autocomplete,
    SelectList,
    /// Read-only display of the resolved contact
    Static,
    Hidden,
}

impl Widget {
    /// Whether the user may pick a different contact
    pub fn is_selectable(&self) -> bool {
        matches!(self, Widget::Autocomplete | Widget::SelectList)
    }
}

/// How locked fields are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideMethod {
    #[default]
    Hidden,
    Disabled,
}

/// Initial binding of a slot when no draft exists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    None,
    /// A fixed contact
    Specified { contact_id: u64 },
    /// The contact acting on the session (the logged-in user)
    CurrentUser,
    /// First contact related to another slot's bound contact
    Relationship {
        to: u16,
        relationship_type: String,
    },
}

impl DefaultPolicy {
    /// Slot this default is derived from, if any
    pub fn depends_on(&self) -> Option<SlotId> {
        match self {
            DefaultPolicy::Relationship { to, .. } => Some(SlotId(*to)),
            _ => None,
        }
    }
}

/// Outbound notification template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDef {
    pub to: String,
    #[serde(default)]
    pub subject: String,
    pub body: String,
}

impl FormDefinition {
    /// Load a definition from a YAML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a definition from a YAML string and validate it
    pub fn from_yaml(content: &str) -> Result<Self, DefinitionError> {
        let definition: FormDefinition = serde_yaml::from_str(content)?;
        let errors = definition.validate();
        if errors.is_empty() {
            Ok(definition)
        } else {
            Err(DefinitionError::Invalid(errors))
        }
    }

    /// All slots in page order
    pub fn slots(&self) -> impl Iterator<Item = &SlotDef> {
        self.pages.iter().flat_map(|p| p.slots.iter())
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotDef> {
        self.slots().find(|s| s.id() == id)
    }

    /// Page index owning a slot
    pub fn page_of(&self, id: SlotId) -> Option<usize> {
        self.pages
            .iter()
            .position(|p| p.slots.iter().any(|s| s.id() == id))
    }

    pub fn last_page(&self) -> usize {
        self.pages.len().saturating_sub(1)
    }

    /// Validate structure. Returns all errors found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.pages.is_empty() {
            errors.push(ValidationError::new("empty_form", "Form has no pages"));
        }

        for (index, page) in self.pages.iter().enumerate() {
            if page.slots.is_empty() {
                errors.push(ValidationError::new(
                    "empty_page",
                    format!("Page {} has no slots", index + 1),
                ));
            }
        }

        let mut seen: HashMap<u16, usize> = HashMap::new();
        for slot in self.slots() {
            *seen.entry(slot.contact).or_default() += 1;
        }
        let mut duplicates: Vec<u16> = seen
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(contact, _)| *contact)
            .collect();
        duplicates.sort_unstable();
        for contact in duplicates {
            errors.push(ValidationError::new(
                "duplicate_slot",
                format!("Contact {} is defined more than once", contact),
            ));
        }

        for slot in self.slots() {
            let mut keys = HashSet::new();
            for field in &slot.fields {
                if !keys.insert(field.key.as_str()) {
                    errors.push(ValidationError::new(
                        "duplicate_field",
                        format!("Contact {}: duplicate field '{}'", slot.contact, field.key),
                    ));
                }
            }

            for hidden in &slot.hide_fields {
                if !keys.contains(hidden.as_str()) {
                    errors.push(ValidationError::new(
                        "unknown_hide_field",
                        format!(
                            "Contact {}: hide_fields names unknown field '{}'",
                            slot.contact, hidden
                        ),
                    ));
                }
            }

            if let DefaultPolicy::Relationship { to, .. } = &slot.default {
                if *to == slot.contact {
                    errors.push(ValidationError::new(
                        "self_relationship",
                        format!("Contact {}: relationship default refers to itself", slot.contact),
                    ));
                } else if !seen.contains_key(to) {
                    errors.push(ValidationError::new(
                        "unknown_relationship_target",
                        format!(
                            "Contact {}: relationship default refers to unknown Contact {}",
                            slot.contact, to
                        ),
                    ));
                }
            }
        }

        let graph = SlotGraph::build(self);
        if let Err(slot) = graph.order() {
            errors.push(ValidationError::new(
                "dependency_cycle",
                format!("Relationship defaults form a cycle through {}", slot),
            ));
        }

        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}
