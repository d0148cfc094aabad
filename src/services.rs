//! External Service Abstractions
//!
//! The CRM is reached only through these traits. `MemoryDirectory` is the
//! in-process implementation used by tests and by the replay tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::types::{display_name, is_blank, ContactRecord, ContactRef, FieldValues};

/// Error type for CRM calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Contact not found: {0}")]
    NotFound(ContactRef),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// One autocomplete result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMatch {
    pub contact: ContactRef,
    pub label: String,
}

/// Contact lookup, fetch and write
#[async_trait]
pub trait ContactService: Send + Sync {
    /// Find contacts whose display fields contain `query`
    async fn search(
        &self,
        query: &str,
        display_fields: &[String],
        limit: usize,
    ) -> Result<Vec<ContactMatch>, ServiceError>;

    /// Current record of a contact; `None` if it no longer exists
    async fn get(&self, contact: ContactRef) -> Result<Option<ContactRecord>, ServiceError>;

    async fn create(
        &self,
        contact_type: &str,
        fields: &FieldValues,
    ) -> Result<ContactRef, ServiceError>;

    /// Write the given fields onto an existing contact
    async fn update(&self, contact: ContactRef, fields: &FieldValues) -> Result<(), ServiceError>;
}

/// Relationship lookup used by relationship-derived defaults
#[async_trait]
pub trait RelationshipService: Send + Sync {
    async fn find_related(
        &self,
        contact: ContactRef,
        relationship_type: &str,
    ) -> Result<Option<ContactRef>, ServiceError>;
}

/// A directed relationship: `contact_a` is `relationship_type` `contact_b`
/// ("Fred" is "Child of" "Maarten").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub contact_a: ContactRef,
    pub contact_b: ContactRef,
    pub relationship_type: String,
}

#[derive(Debug, Default)]
struct DirectoryState {
    contacts: BTreeMap<ContactRef, ContactRecord>,
    relationships: Vec<Relationship>,
    next_id: u64,
    unavailable: bool,
}

/// In-memory CRM (for tests and replay)
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a contact with a fixed id
    pub fn with_contact(mut self, id: u64, record: ContactRecord) -> Self {
        let state = self.state.get_mut();
        state.contacts.insert(ContactRef(id), record);
        state.next_id = state.next_id.max(id);
        self
    }

    pub fn with_relationship(
        mut self,
        contact_a: u64,
        relationship_type: &str,
        contact_b: u64,
    ) -> Self {
        self.state.get_mut().relationships.push(Relationship {
            contact_a: ContactRef(contact_a),
            contact_b: ContactRef(contact_b),
            relationship_type: relationship_type.to_string(),
        });
        self
    }

    /// Simulate an outage: every call fails with `Unavailable`
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Overwrite fields on a contact directly, bypassing any form
    pub async fn patch(&self, contact: ContactRef, fields: &[(&str, &str)]) {
        let mut state = self.state.write().await;
        if let Some(record) = state.contacts.get_mut(&contact) {
            for (k, v) in fields {
                record.insert((*k).to_string(), (*v).to_string());
            }
        }
    }

    pub async fn remove(&self, contact: ContactRef) {
        self.state.write().await.contacts.remove(&contact);
    }

    pub async fn contact(&self, contact: ContactRef) -> Option<ContactRecord> {
        self.state.read().await.contacts.get(&contact).cloned()
    }

    /// Contacts whose record matches every given field exactly
    pub async fn find_by(&self, fields: &[(&str, &str)]) -> Vec<ContactRef> {
        let state = self.state.read().await;
        state
            .contacts
            .iter()
            .filter(|(_, record)| {
                fields.iter().all(|(k, v)| {
                    record.get(*k).map(String::as_str).unwrap_or_default() == *v
                })
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.contacts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(state: &DirectoryState) -> Result<(), ServiceError> {
        if state.unavailable {
            Err(ServiceError::Unavailable("directory offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Value of a display field; `display_name` is derived from the name parts.
fn display_value(record: &ContactRecord, field: &str) -> String {
    if field == "display_name" {
        display_name(record)
    } else {
        record.get(field).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ContactService for MemoryDirectory {
    async fn search(
        &self,
        query: &str,
        display_fields: &[String],
        limit: usize,
    ) -> Result<Vec<ContactMatch>, ServiceError> {
        let state = self.state.read().await;
        Self::check(&state)?;

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let matches = state
            .contacts
            .iter()
            .filter_map(|(id, record)| {
                let values: Vec<String> = display_fields
                    .iter()
                    .map(|f| display_value(record, f))
                    .filter(|v| !is_blank(v))
                    .collect();
                values
                    .iter()
                    .any(|v| v.to_lowercase().contains(&needle))
                    .then(|| ContactMatch {
                        contact: *id,
                        label: values.join(" :: "),
                    })
            })
            .take(limit)
            .collect();
        Ok(matches)
    }

    async fn get(&self, contact: ContactRef) -> Result<Option<ContactRecord>, ServiceError> {
        let state = self.state.read().await;
        Self::check(&state)?;
        Ok(state.contacts.get(&contact).cloned())
    }

    async fn create(
        &self,
        contact_type: &str,
        fields: &FieldValues,
    ) -> Result<ContactRef, ServiceError> {
        let mut state = self.state.write().await;
        Self::check(&state)?;

        state.next_id += 1;
        let id = ContactRef(state.next_id);
        let mut record = fields.clone();
        record.insert("contact_type".to_string(), contact_type.to_string());
        state.contacts.insert(id, record);
        Ok(id)
    }

    async fn update(&self, contact: ContactRef, fields: &FieldValues) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        Self::check(&state)?;

        let record = state
            .contacts
            .get_mut(&contact)
            .ok_or(ServiceError::NotFound(contact))?;
        for (k, v) in fields {
            record.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RelationshipService for MemoryDirectory {
    async fn find_related(
        &self,
        contact: ContactRef,
        relationship_type: &str,
    ) -> Result<Option<ContactRef>, ServiceError> {
        let state = self.state.read().await;
        Self::check(&state)?;

        // "Child of X" asks for the contact on the a-side of a relationship with X
        let related = state
            .relationships
            .iter()
            .find(|r| r.relationship_type == relationship_type && r.contact_b == contact)
            .map(|r| r.contact_a)
            .or_else(|| {
                state
                    .relationships
                    .iter()
                    .find(|r| r.relationship_type == relationship_type && r.contact_a == contact)
                    .map(|r| r.contact_b)
            });
        Ok(related)
    }
}

/// Build a record from field pairs
pub fn record(fields: &[(&str, &str)]) -> ContactRecord {
    fields
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_contact(
                3,
                record(&[
                    ("first_name", "James"),
                    ("last_name", "Doe"),
                    ("source", "Webform Testing"),
                ]),
            )
            .with_contact(4, record(&[("first_name", "Fred"), ("last_name", "Pinto")]))
            .with_relationship(4, "Child of", 3)
    }

    #[tokio::test]
    async fn test_search_matches_any_display_field() {
        let dir = directory();
        let fields = vec!["display_name".to_string(), "source".to_string()];

        let by_name = dir.search("james", &fields, 10).await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].contact, ContactRef(3));
        assert_eq!(by_name[0].label, "James Doe :: Webform Testing");

        let by_source = dir.search("Webform Testing", &fields, 10).await.unwrap();
        assert_eq!(by_source[0].contact, ContactRef(3));

        // source is not searched unless it is a display field
        let name_only = vec!["display_name".to_string()];
        assert!(dir.search("Webform", &name_only, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_ids() {
        let dir = directory();
        let id = dir
            .create("Individual", &record(&[("first_name", "Marvin")]))
            .await
            .unwrap();
        assert_eq!(id, ContactRef(5));
        let stored = dir.contact(id).await.unwrap();
        assert_eq!(stored.get("contact_type").unwrap(), "Individual");
    }

    #[tokio::test]
    async fn test_find_related_both_directions() {
        let dir = directory();
        assert_eq!(
            dir.find_related(ContactRef(3), "Child of").await.unwrap(),
            Some(ContactRef(4))
        );
        assert_eq!(
            dir.find_related(ContactRef(4), "Child of").await.unwrap(),
            Some(ContactRef(3))
        );
        assert_eq!(dir.find_related(ContactRef(3), "Spouse of").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let dir = directory();
        dir.set_unavailable(true).await;
        assert!(matches!(
            dir.get(ContactRef(3)).await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(dir.search("james", &[], 10).await.is_err());
    }
}
