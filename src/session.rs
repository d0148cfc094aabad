//! Form Session State
//!
//! The live slot set of one user working through one form. The session is
//! plain state; operations that reach the CRM or the draft store live on
//! [`FormEngine`](crate::engine::FormEngine) and take the session by `&mut`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::definition::{FormDefinition, PageDef, SlotDef};
use crate::draft::{content_hash, Draft, DraftStoreError};
use crate::error::FormError;
use crate::events::SessionEvent;
use crate::slot::{FieldState, Slot};
use crate::types::{ContactRecord, ContactRef, SlotId};

/// One field as it would be rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub key: String,
    pub label: String,
    pub value: String,
    pub required: bool,
    pub state: FieldState,
}

/// One slot as it would be rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub slot: SlotId,
    pub title: String,
    pub contact: Option<ContactRef>,
    /// Static-widget text ("+ Create new +", "- None Found -" or the name)
    pub label: String,
    pub fields: Vec<FieldView>,
}

/// Issued when a contact lookup for a slot starts. The lookup's result is
/// applied only if the slot has not been rebound in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTicket {
    pub slot: SlotId,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct FormSession {
    definition: Arc<FormDefinition>,
    session_key: String,
    /// Contact acting on the session (the logged-in user), if known
    actor: Option<ContactRef>,
    current_page: usize,
    slots: BTreeMap<SlotId, Slot>,
    resumed: bool,
    submitted: bool,
    /// Records linked by the caller (e.g. "activity" -> [12]), exposed as tokens
    linked: BTreeMap<String, Vec<u64>>,
    events: Vec<SessionEvent>,
}

impl FormSession {
    /// Fresh session on page 0; every slot unresolved
    pub fn new(
        definition: Arc<FormDefinition>,
        session_key: impl Into<String>,
        actor: Option<ContactRef>,
    ) -> Self {
        let slots = initial_slots(&definition);
        Self {
            definition,
            session_key: session_key.into(),
            actor,
            current_page: 0,
            slots,
            resumed: false,
            submitted: false,
            linked: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Rebuild a session from a draft. Slots the definition no longer has are
    /// dropped, missing ones start unresolved, and an out-of-range page falls
    /// back to page 0. Bound contacts are checked separately by the engine.
    pub fn restore(
        definition: Arc<FormDefinition>,
        draft: Draft,
        actor: Option<ContactRef>,
    ) -> Self {
        let mut session = Self::new(definition, draft.session_key, actor);
        session.resumed = true;

        for (id, mut slot) in draft.slots {
            let Some(page) = session.definition.page_of(id) else {
                warn!(slot = %id, "draft slot not in form, dropping");
                session.record(SessionEvent::DraftRepaired {
                    slot: Some(id),
                    reason: "slot not in form".to_string(),
                });
                continue;
            };
            slot.id = id;
            slot.page = page;
            session.slots.insert(id, slot);
        }

        if draft.current_page < session.definition.pages.len() {
            session.current_page = draft.current_page;
        } else {
            warn!(page = draft.current_page, "draft page out of range, starting over");
            session.record(SessionEvent::DraftRepaired {
                slot: None,
                reason: format!("page {} out of range", draft.current_page),
            });
        }

        session
    }

    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    pub fn form_id(&self) -> &str {
        &self.definition.id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn actor(&self) -> Option<ContactRef> {
        self.actor
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page(&self) -> Option<&PageDef> {
        self.definition.pages.get(self.current_page)
    }

    pub fn is_last_page(&self) -> bool {
        self.current_page == self.definition.last_page()
    }

    /// True when the session was restored from a draft
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn submitted(&self) -> bool {
        self.submitted
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn slots(&self) -> &BTreeMap<SlotId, Slot> {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    /// Slots owned by a page, in definition order
    pub fn page_slots(&self, page: usize) -> Vec<&Slot> {
        self.definition
            .pages
            .get(page)
            .map(|p| p.slots.iter().filter_map(|s| self.slots.get(&s.id())).collect())
            .unwrap_or_default()
    }

    pub fn field_state(&self, slot: SlotId, field: &str) -> Result<FieldState, FormError> {
        let (def, slot_state) = self.lookup(slot)?;
        if def.field(field).is_none() {
            return Err(FormError::UnknownField {
                slot,
                field: field.to_string(),
            });
        }
        Ok(slot_state.field_state(def, field))
    }

    /// Text shown by a static contact widget
    pub fn static_label(&self, slot: SlotId) -> Result<String, FormError> {
        let (def, slot_state) = self.lookup(slot)?;
        Ok(slot_state.static_label(def))
    }

    /// What a page displays right now
    pub fn render_page(&self, page: usize) -> Vec<SlotView> {
        let Some(page_def) = self.definition.pages.get(page) else {
            return Vec::new();
        };
        page_def
            .slots
            .iter()
            .filter_map(|def| {
                let slot = self.slots.get(&def.id())?;
                Some(SlotView {
                    slot: def.id(),
                    title: def.label(),
                    contact: slot.contact,
                    label: slot.static_label(def),
                    fields: def
                        .fields
                        .iter()
                        .map(|f| FieldView {
                            key: f.key.clone(),
                            label: f.display_label(),
                            value: slot.value(&f.key).to_string(),
                            required: f.required,
                            state: slot.field_state(def, &f.key),
                        })
                        .collect(),
                })
            })
            .collect()
    }

    pub fn linked(&self) -> &BTreeMap<String, Vec<u64>> {
        &self.linked
    }

    /// Attach a record created alongside this submission (e.g. an activity)
    pub fn link_record(&mut self, kind: impl Into<String>, id: u64) {
        self.linked.entry(kind.into()).or_default().push(id);
    }

    /// Edit one field. The field must exist, be visible and not disabled.
    pub fn set_field(&mut self, slot: SlotId, field: &str, value: &str) -> Result<(), FormError> {
        self.ensure_open()?;
        let def = self
            .definition
            .slot(slot)
            .ok_or(FormError::UnknownSlot(slot))?;
        let state = self.slots.get_mut(&slot).ok_or(FormError::UnknownSlot(slot))?;
        state.set_field(def, field, value)?;
        self.record(SessionEvent::FieldEdited {
            slot,
            field: field.to_string(),
        });
        Ok(())
    }

    /// Start a contact lookup for a slot
    pub fn begin_bind(&self, slot: SlotId) -> Result<BindTicket, FormError> {
        let state = self.slots.get(&slot).ok_or(FormError::UnknownSlot(slot))?;
        Ok(BindTicket {
            slot,
            generation: state.generation,
        })
    }

    /// Apply a finished lookup. Returns `false` (and leaves the slot alone)
    /// when the slot was rebound after the ticket was issued.
    pub fn complete_bind(
        &mut self,
        ticket: BindTicket,
        contact: ContactRef,
        record: &ContactRecord,
    ) -> Result<bool, FormError> {
        self.ensure_open()?;
        let def = self
            .definition
            .slot(ticket.slot)
            .ok_or(FormError::UnknownSlot(ticket.slot))?;
        let state = self
            .slots
            .get_mut(&ticket.slot)
            .ok_or(FormError::UnknownSlot(ticket.slot))?;

        if state.generation != ticket.generation {
            let current_generation = state.generation;
            debug!(slot = %ticket.slot, %contact, "discarding stale bind");
            self.record(SessionEvent::StaleBindDiscarded {
                slot: ticket.slot,
                contact,
                ticket_generation: ticket.generation,
                current_generation,
            });
            return Ok(false);
        }

        state.bind(def, contact, record);
        state.user_edited = true;
        self.record(SessionEvent::SlotBound {
            slot: ticket.slot,
            contact,
        });
        Ok(true)
    }

    /// Whole-snapshot copy of the current state
    pub fn snapshot(&self) -> Result<Draft, DraftStoreError> {
        Draft::new(
            self.session_key.clone(),
            self.definition.id.clone(),
            self.current_page,
            self.slots.clone(),
        )
    }

    /// Hash of what a save would write now
    pub fn content_hash(&self) -> Result<String, DraftStoreError> {
        Ok(content_hash(self.current_page, &self.slots)?)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), FormError> {
        if self.submitted {
            Err(FormError::AlreadySubmitted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn lookup(&self, slot: SlotId) -> Result<(&SlotDef, &Slot), FormError> {
        let def = self
            .definition
            .slot(slot)
            .ok_or(FormError::UnknownSlot(slot))?;
        let state = self.slots.get(&slot).ok_or(FormError::UnknownSlot(slot))?;
        Ok((def, state))
    }

    pub(crate) fn definition_arc(&self) -> Arc<FormDefinition> {
        self.definition.clone()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut BTreeMap<SlotId, Slot> {
        &mut self.slots
    }

    pub(crate) fn set_current_page(&mut self, page: usize) {
        self.current_page = page;
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.submitted = true;
    }

    pub(crate) fn record(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

fn initial_slots(definition: &FormDefinition) -> BTreeMap<SlotId, Slot> {
    let mut slots = BTreeMap::new();
    for (index, page) in definition.pages.iter().enumerate() {
        for def in &page.slots {
            slots.entry(def.id()).or_insert_with(|| Slot::new(def, index));
        }
    }
    slots
}
