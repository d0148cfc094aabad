use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContactRef, InvalidField, SlotId};

/// Which pages a gate run covered
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateScope {
    Page(usize),
    AllPages,
}

/// Session events: the audit trail of every operation on one form session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Opened {
        form_id: String,
        session_key: String,
        resumed: bool,
    },
    PageEntered {
        page: usize,
    },
    SlotResolved {
        slot: SlotId,
        contact: Option<ContactRef>,
    },
    SlotBound {
        slot: SlotId,
        contact: ContactRef,
    },
    SlotCleared {
        slot: SlotId,
        create_new: bool,
    },
    /// A relationship default was re-run because its source slot changed
    DefaultRecomputed {
        slot: SlotId,
        source: SlotId,
        contact: Option<ContactRef>,
    },
    FieldEdited {
        slot: SlotId,
        field: String,
    },
    /// A lookup finished after the slot had been rebound
    StaleBindDiscarded {
        slot: SlotId,
        contact: ContactRef,
        ticket_generation: u64,
        current_generation: u64,
    },
    SearchFailed {
        slot: SlotId,
        reason: String,
    },
    GateFailed {
        scope: GateScope,
        failures: Vec<InvalidField>,
    },
    /// Draft snapshot referenced something that no longer exists
    DraftRepaired {
        slot: Option<SlotId>,
        reason: String,
    },
    DraftSaved {
        page: usize,
        content_hash: String,
        written: bool,
    },
    ContactCreated {
        slot: SlotId,
        contact: ContactRef,
    },
    ContactUpdated {
        slot: SlotId,
        contact: ContactRef,
        fields: Vec<String>,
    },
    Submitted {
        submission_id: Uuid,
    },
}
