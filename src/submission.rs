use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{ContactRef, SlotId};

/// A finalized form submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub form_id: String,
    pub session_key: String,
    /// Element key ("contact_1_first_name") to submitted value. The selector
    /// element ("contact_1_existing") holds the contact id.
    pub values: BTreeMap<String, String>,
    /// Contact bound to each slot after submit (existing or newly created)
    pub contacts: BTreeMap<SlotId, ContactRef>,
    /// Display name of each slot's contact, from the slot's full values
    pub contact_names: BTreeMap<SlotId, String>,
    /// Slots whose contact was created by this submission
    pub created: Vec<SlotId>,
    /// Slots whose existing contact was updated
    pub updated: Vec<SlotId>,
    pub linked: BTreeMap<String, Vec<u64>>,
    pub notifications: Vec<RenderedNotification>,
    pub submitted_at: DateTime<Utc>,
}

/// Notification with every token resolved; delivery is up to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedNotification {
    pub to: String,
    pub subject: String,
    pub body: String,
}
