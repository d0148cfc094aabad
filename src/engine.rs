//! Form Engine
//!
//! Page sequencing and every operation that reaches a collaborator: default
//! resolution, contact lookup, draft persistence and the final submit.
//! Sessions are owned by the caller and passed in by `&mut`; the engine holds
//! only shared, read-only state and can serve any number of sessions.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::definition::{FormDefinition, SlotDef};
use crate::draft::DraftStore;
use crate::error::{FormError, Result};
use crate::events::{GateScope, SessionEvent};
use crate::gate;
use crate::resolver::{DefaultResolver, SlotGraph};
use crate::services::{ContactMatch, ContactService, RelationshipService, ServiceError};
use crate::session::{BindTicket, FormSession};
use crate::slot::Slot;
use crate::submission::Submission;
use crate::tokens::TokenRenderer;
use crate::types::{
    display_name, is_blank, ContactRecord, ContactRef, FieldValues, InvalidField, SlotId,
};

/// Result of Next / Previous
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavOutcome {
    Moved {
        page: usize,
    },
    /// The gate failed; the session stays on `page`
    Blocked {
        page: usize,
        invalid: BTreeSet<InvalidField>,
    },
}

/// Result of Submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Submitted(Box<Submission>),
    /// The gate failed; the session moved to the first page with a failure
    Invalid {
        page: usize,
        invalid: BTreeSet<InvalidField>,
    },
}

/// The form engine
pub struct FormEngine {
    contacts: Arc<dyn ContactService>,
    resolver: DefaultResolver,
    drafts: Arc<dyn DraftStore>,
    config: EngineConfig,
    definitions: Arc<HashMap<String, Arc<FormDefinition>>>,
}

impl FormEngine {
    /// Create a new engine over validated definitions
    pub fn new(
        definitions: impl IntoIterator<Item = FormDefinition>,
        contacts: Arc<dyn ContactService>,
        relationships: Arc<dyn RelationshipService>,
        drafts: Arc<dyn DraftStore>,
        config: EngineConfig,
    ) -> Self {
        let definitions = definitions
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        Self {
            resolver: DefaultResolver::new(contacts.clone(), relationships),
            contacts,
            drafts,
            config,
            definitions: Arc::new(definitions),
        }
    }

    pub fn definitions(&self) -> &HashMap<String, Arc<FormDefinition>> {
        &self.definitions
    }

    pub fn definition(&self, form_id: &str) -> Result<Arc<FormDefinition>> {
        self.definitions
            .get(form_id)
            .cloned()
            .ok_or_else(|| FormError::UnknownForm(form_id.to_string()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Session lifecycle ────────────────────────────────────────

    /// Open a session, resuming the draft stored under `session_key` if any
    pub async fn open(
        &self,
        form_id: &str,
        session_key: &str,
        actor: Option<ContactRef>,
    ) -> Result<FormSession> {
        let definition = self.definition(form_id)?;

        let mut session = match self.drafts.load(session_key).await? {
            Some(draft) if draft.form_id == definition.id => {
                FormSession::restore(definition, draft, actor)
            }
            Some(draft) => {
                warn!(
                    key = session_key,
                    stored = %draft.form_id,
                    "draft belongs to another form, ignoring"
                );
                FormSession::new(definition, session_key, actor)
            }
            None => FormSession::new(definition, session_key, actor),
        };

        let repaired = if session.resumed() {
            info!(form = form_id, key = session_key, "A partially-completed form was found");
            self.verify_bound_contacts(&mut session).await?
        } else {
            Vec::new()
        };

        session.record(SessionEvent::Opened {
            form_id: form_id.to_string(),
            session_key: session_key.to_string(),
            resumed: session.resumed(),
        });
        self.enter_page(&mut session).await?;

        // A repaired slot may now bind elsewhere; its relationship dependents follow
        if !repaired.is_empty() {
            self.resolve_pending(&mut session, repaired.clone()).await?;
            for id in repaired {
                self.recompute(&mut session, id).await?;
            }
        }
        Ok(session)
    }

    /// Reset draft slots whose contact no longer exists so they re-resolve.
    /// Returns the slots reset.
    async fn verify_bound_contacts(&self, session: &mut FormSession) -> Result<Vec<SlotId>> {
        let bound: Vec<(SlotId, ContactRef)> = session
            .slots()
            .values()
            .filter_map(|s| s.contact.map(|c| (s.id, c)))
            .collect();

        let mut repaired = Vec::new();
        for (id, contact) in bound {
            if self.contacts.get(contact).await?.is_some() {
                continue;
            }
            warn!(slot = %id, %contact, "draft contact no longer exists, re-resolving");
            let definition = session.definition_arc();
            if let (Some(def), Some(page)) = (definition.slot(id), definition.page_of(id)) {
                session.slots_mut().insert(id, Slot::new(def, page));
            }
            session.record(SessionEvent::DraftRepaired {
                slot: Some(id),
                reason: format!("contact {} no longer exists", contact),
            });
            repaired.push(id);
        }
        Ok(repaired)
    }

    /// Resolve any never-resolved slot on the current page
    async fn enter_page(&self, session: &mut FormSession) -> Result<()> {
        let page = session.current_page();
        let ids: Vec<SlotId> = session.page_slots(page).iter().map(|s| s.id).collect();
        self.resolve_pending(session, ids).await?;
        session.record(SessionEvent::PageEntered { page });
        debug!(page, "page entered");
        Ok(())
    }

    async fn resolve_pending(&self, session: &mut FormSession, ids: Vec<SlotId>) -> Result<()> {
        let definition = session.definition_arc();
        let actor = session.actor();
        let before: BTreeSet<SlotId> = unresolved(session);

        for id in ids {
            self.resolver
                .ensure_resolved(&definition, session.slots_mut(), id, actor)
                .await?;
        }

        let after = unresolved(session);
        for id in before.difference(&after) {
            let contact = session.slot(*id).and_then(|s| s.contact);
            session.record(SessionEvent::SlotResolved { slot: *id, contact });
        }
        Ok(())
    }

    // ─── Slot operations ──────────────────────────────────────────

    /// Autocomplete lookup for a slot. Service failures yield no results.
    pub async fn search(
        &self,
        session: &mut FormSession,
        slot: SlotId,
        query: &str,
    ) -> Result<Vec<ContactMatch>> {
        let (def, _) = session.lookup(slot)?;
        let display_fields = def.results_display.clone();

        match self
            .contacts
            .search(query, &display_fields, self.config.search_limit)
            .await
        {
            Ok(matches) => Ok(matches),
            Err(e) => {
                warn!(slot = %slot, error = %e, "contact search failed");
                session.record(SessionEvent::SearchFailed {
                    slot,
                    reason: e.to_string(),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Bind an existing contact chosen by the user
    ///
    /// Returns `false` if the slot was rebound while the contact was being
    /// fetched, in which case the fetched record is discarded.
    pub async fn select_contact(
        &self,
        session: &mut FormSession,
        slot: SlotId,
        contact: ContactRef,
    ) -> Result<bool> {
        session.ensure_open()?;
        let (def, _) = session.lookup(slot)?;
        if !def.widget.is_selectable() {
            return Err(FormError::NotSelectable(slot));
        }

        let ticket = session.begin_bind(slot)?;
        let record = self
            .contacts
            .get(contact)
            .await?
            .ok_or(FormError::ContactNotFound(contact))?;
        self.complete_bind(session, ticket, contact, &record).await
    }

    /// Apply a lookup started with [`FormSession::begin_bind`], then re-run
    /// relationship defaults that depend on the slot
    pub async fn complete_bind(
        &self,
        session: &mut FormSession,
        ticket: BindTicket,
        contact: ContactRef,
        record: &ContactRecord,
    ) -> Result<bool> {
        if !session.complete_bind(ticket, contact, record)? {
            return Ok(false);
        }
        self.recompute(session, ticket.slot).await?;
        Ok(true)
    }

    /// Switch a slot to "+ Create new +"
    pub async fn create_new(&self, session: &mut FormSession, slot: SlotId) -> Result<()> {
        session.ensure_open()?;
        let definition = session.definition_arc();
        let def = definition.slot(slot).ok_or(FormError::UnknownSlot(slot))?;
        if !def.allow_create {
            return Err(FormError::CreateNotAllowed(slot));
        }
        let state = session
            .slots_mut()
            .get_mut(&slot)
            .ok_or(FormError::UnknownSlot(slot))?;
        state.start_new(def);
        state.user_edited = true;
        session.record(SessionEvent::SlotCleared {
            slot,
            create_new: true,
        });
        self.recompute(session, slot).await
    }

    /// Unbind a slot without creating a new contact
    pub async fn clear_contact(&self, session: &mut FormSession, slot: SlotId) -> Result<()> {
        session.ensure_open()?;
        let definition = session.definition_arc();
        let def = definition.slot(slot).ok_or(FormError::UnknownSlot(slot))?;
        if !def.widget.is_selectable() {
            return Err(FormError::NotSelectable(slot));
        }
        let state = session
            .slots_mut()
            .get_mut(&slot)
            .ok_or(FormError::UnknownSlot(slot))?;
        state.unbind(def);
        state.user_edited = true;
        session.record(SessionEvent::SlotCleared {
            slot,
            create_new: false,
        });
        self.recompute(session, slot).await
    }

    async fn recompute(&self, session: &mut FormSession, source: SlotId) -> Result<()> {
        let definition = session.definition_arc();
        let actor = session.actor();
        let rebound = self
            .resolver
            .recompute_dependents(&definition, session.slots_mut(), source, actor)
            .await?;
        for slot in rebound {
            let contact = session.slot(slot).and_then(|s| s.contact);
            debug!(slot = %slot, %source, "relationship default recomputed");
            session.record(SessionEvent::DefaultRecomputed {
                slot,
                source,
                contact,
            });
        }
        Ok(())
    }

    // ─── Navigation ───────────────────────────────────────────────

    /// Gate the current page, then advance
    pub async fn next(&self, session: &mut FormSession) -> Result<NavOutcome> {
        session.ensure_open()?;
        if session.is_last_page() {
            return Err(FormError::InvalidNavigation(
                "already on the last page; submit instead".to_string(),
            ));
        }

        let page = session.current_page();
        let invalid = gate::check(session.definition(), session.page_slots(page));
        if !invalid.is_empty() {
            info!(page, failures = invalid.len(), "next blocked by validation");
            session.record(SessionEvent::GateFailed {
                scope: GateScope::Page(page),
                failures: invalid.iter().cloned().collect(),
            });
            return Ok(NavOutcome::Blocked { page, invalid });
        }

        session.set_current_page(page + 1);
        self.enter_page(session).await?;
        self.auto_save(session).await?;
        info!(from = page, to = page + 1, "next");
        Ok(NavOutcome::Moved { page: page + 1 })
    }

    /// Go back one page. Never gated; values on the current page are kept.
    pub async fn previous(&self, session: &mut FormSession) -> Result<NavOutcome> {
        session.ensure_open()?;
        let page = session.current_page();
        if page == 0 {
            return Err(FormError::InvalidNavigation(
                "already on the first page".to_string(),
            ));
        }

        session.set_current_page(page - 1);
        self.enter_page(session).await?;
        self.auto_save(session).await?;
        info!(from = page, to = page - 1, "previous");
        Ok(NavOutcome::Moved { page: page - 1 })
    }

    /// Persist the whole slot set. Never gated. Returns whether anything was written.
    pub async fn save_draft(&self, session: &mut FormSession) -> Result<bool> {
        session.ensure_open()?;
        let draft = session.snapshot()?;
        let written = self.drafts.save(&draft).await?;
        info!(key = %draft.session_key, page = draft.current_page, written, "draft saved");
        session.record(SessionEvent::DraftSaved {
            page: draft.current_page,
            content_hash: draft.content_hash,
            written,
        });
        Ok(written)
    }

    async fn auto_save(&self, session: &mut FormSession) -> Result<()> {
        if self.config.auto_save {
            self.save_draft(session).await?;
        }
        Ok(())
    }

    // ─── Submit ───────────────────────────────────────────────────

    /// Gate every page, then write contacts to the CRM and clear the draft.
    ///
    /// A failing CRM call aborts with `FormError::Service`; the draft is left
    /// in place so the user can retry.
    pub async fn submit(&self, session: &mut FormSession) -> Result<SubmitOutcome> {
        session.ensure_open()?;
        if !session.is_last_page() {
            return Err(FormError::InvalidNavigation(
                "submit is only available on the last page".to_string(),
            ));
        }

        let definition = session.definition_arc();

        // Slots on pages never visited still get their defaults
        let order = SlotGraph::build(&definition)
            .order()
            .unwrap_or_else(|_| definition.slots().map(|s| s.id()).collect());
        self.resolve_pending(session, order).await?;

        let invalid = gate::check(&definition, session.slots().values());
        if !invalid.is_empty() {
            let page = invalid
                .iter()
                .filter_map(|f| definition.page_of(f.slot))
                .min()
                .unwrap_or(0);
            info!(page, failures = invalid.len(), "submit blocked by validation");
            session.set_current_page(page);
            session.record(SessionEvent::GateFailed {
                scope: GateScope::AllPages,
                failures: invalid.iter().cloned().collect(),
            });
            return Ok(SubmitOutcome::Invalid { page, invalid });
        }

        let mut values = BTreeMap::new();
        let mut contacts = BTreeMap::new();
        let mut contact_names = BTreeMap::new();
        let mut created = Vec::new();
        let mut updated = Vec::new();

        for def in definition.slots() {
            let id = def.id();
            let Some(slot) = session.slot(id).cloned() else {
                continue;
            };
            let payload = slot.payload(def);

            match slot.contact {
                Some(contact) => {
                    let record = self
                        .contacts
                        .get(contact)
                        .await?
                        .ok_or(ServiceError::NotFound(contact))?;
                    let changes = contact_changes(def, &slot, &record);
                    if !changes.is_empty() {
                        self.contacts.update(contact, &changes).await?;
                        updated.push(id);
                        session.record(SessionEvent::ContactUpdated {
                            slot: id,
                            contact,
                            fields: changes.keys().cloned().collect(),
                        });
                    }
                    contacts.insert(id, contact);
                }
                None if slot.has_data(def) => {
                    let fields: FieldValues = payload
                        .iter()
                        .filter(|(_, v)| !is_blank(v))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let contact = self.contacts.create(&def.contact_type, &fields).await?;
                    info!(slot = %id, %contact, "contact created");

                    // Bind now so a retried submit updates instead of creating again
                    if let Some(state) = session.slots_mut().get_mut(&id) {
                        state.bind(def, contact, &fields);
                        state.user_edited = true;
                    }
                    created.push(id);
                    contacts.insert(id, contact);
                    session.record(SessionEvent::ContactCreated { slot: id, contact });
                }
                None => {}
            }

            for (key, value) in payload {
                values.insert(def.element_key(&key), value);
            }
            if let Some(contact) = contacts.get(&id) {
                values.insert(def.existing_key(), contact.to_string());
                if let Some(bound) = session.slot(id) {
                    contact_names.insert(id, display_name(&bound.values));
                }
            }
        }

        let mut submission = Submission {
            id: Uuid::now_v7(),
            form_id: definition.id.clone(),
            session_key: session.session_key().to_string(),
            values,
            contacts,
            contact_names,
            created,
            updated,
            linked: session.linked().clone(),
            notifications: Vec::new(),
            submitted_at: chrono::Utc::now(),
        };

        let renderer =
            TokenRenderer::new(&definition, &submission, &self.config.contact_link_template);
        let notifications = definition
            .notifications
            .iter()
            .map(|n| renderer.render_notification(n))
            .collect();
        submission.notifications = notifications;

        self.drafts.delete(session.session_key()).await?;
        session.mark_submitted();
        session.record(SessionEvent::Submitted {
            submission_id: submission.id,
        });
        info!(
            form = %submission.form_id,
            submission = %submission.id,
            created = submission.created.len(),
            updated = submission.updated.len(),
            "form submitted"
        );

        Ok(SubmitOutcome::Submitted(Box::new(submission)))
    }
}

fn unresolved(session: &FormSession) -> BTreeSet<SlotId> {
    session
        .slots()
        .values()
        .filter(|s| !s.resolved)
        .map(|s| s.id)
        .collect()
}

/// Fields of a bound slot to write back to its contact: submitted values the
/// record does not already hold. Locked fields take part only under
/// `submit_disabled`, same as the payload.
fn contact_changes(def: &SlotDef, slot: &Slot, record: &ContactRecord) -> FieldValues {
    slot.payload(def)
        .into_iter()
        .filter(|(key, value)| {
            let current = record.get(key).map(String::as_str).unwrap_or_default();
            !is_blank(value) && value != current
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::MemoryDraftStore;
    use crate::services::{record, MemoryDirectory};

    const FORM: &str = r#"
id: engine
pages:
  - slots:
      - contact: 1
        default: { kind: current_user }
        hide_fields: [first_name, last_name]
        fields:
          - { key: first_name, required: true }
          - { key: last_name, required: true }
  - slots:
      - contact: 2
        fields:
          - { key: first_name, required: true }
          - { key: last_name }
"#;

    fn engine(dir: Arc<MemoryDirectory>, drafts: Arc<MemoryDraftStore>) -> FormEngine {
        FormEngine::new(
            [FormDefinition::from_yaml(FORM).unwrap()],
            dir.clone(),
            dir,
            drafts,
            EngineConfig::default(),
        )
    }

    fn directory() -> Arc<MemoryDirectory> {
        Arc::new(MemoryDirectory::new().with_contact(
            3,
            record(&[("first_name", "Jimmy"), ("last_name", "Page")]),
        ))
    }

    #[tokio::test]
    async fn test_open_unknown_form() {
        let engine = engine(directory(), Arc::new(MemoryDraftStore::new()));
        assert!(matches!(
            engine.open("nope", "s", None).await,
            Err(FormError::UnknownForm(_))
        ));
    }

    #[tokio::test]
    async fn test_navigation_bounds() {
        let engine = engine(directory(), Arc::new(MemoryDraftStore::new()));
        let mut session = engine.open("engine", "s", Some(ContactRef(3))).await.unwrap();

        assert!(matches!(
            engine.previous(&mut session).await,
            Err(FormError::InvalidNavigation(_))
        ));
        assert!(matches!(
            engine.submit(&mut session).await,
            Err(FormError::InvalidNavigation(_))
        ));
        assert_eq!(
            engine.next(&mut session).await.unwrap(),
            NavOutcome::Moved { page: 1 }
        );
        assert!(matches!(
            engine.next(&mut session).await,
            Err(FormError::InvalidNavigation(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_creates_and_clears_draft() {
        let dir = directory();
        let drafts = Arc::new(MemoryDraftStore::new());
        let engine = engine(dir.clone(), drafts.clone());
        let mut session = engine.open("engine", "s", Some(ContactRef(3))).await.unwrap();
        engine.next(&mut session).await.unwrap();
        session.set_field(SlotId(2), "first_name", "Marvin").unwrap();
        engine.save_draft(&mut session).await.unwrap();
        assert_eq!(drafts.len().await, 1);

        let submission = match engine.submit(&mut session).await.unwrap() {
            SubmitOutcome::Submitted(s) => s,
            other => panic!("expected submission, got {:?}", other),
        };
        assert_eq!(submission.created, vec![SlotId(2)]);
        assert_eq!(submission.contacts[&SlotId(1)], ContactRef(3));
        assert_eq!(submission.values["contact_2_first_name"], "Marvin");
        assert_eq!(submission.contact_names[&SlotId(2)], "Marvin");
        assert_eq!(
            session.slot(SlotId(2)).unwrap().contact,
            Some(submission.contacts[&SlotId(2)])
        );
        assert!(!submission.values.contains_key("contact_1_first_name"));
        assert!(drafts.is_empty().await);
        assert_eq!(dir.len().await, 2);

        assert!(matches!(
            engine.next(&mut session).await,
            Err(FormError::AlreadySubmitted)
        ));
    }

    #[tokio::test]
    async fn test_failed_create_keeps_draft() {
        let dir = directory();
        let drafts = Arc::new(MemoryDraftStore::new());
        let engine = engine(dir.clone(), drafts.clone());
        let mut session = engine.open("engine", "s", Some(ContactRef(3))).await.unwrap();
        engine.next(&mut session).await.unwrap();
        session.set_field(SlotId(2), "first_name", "Marvin").unwrap();
        engine.save_draft(&mut session).await.unwrap();

        dir.set_unavailable(true).await;
        assert!(matches!(
            engine.submit(&mut session).await,
            Err(FormError::Service(ServiceError::Unavailable(_)))
        ));
        assert_eq!(drafts.len().await, 1);
        assert!(!session.submitted());
    }

    #[tokio::test]
    async fn test_search_degrades_to_empty() {
        let dir = directory();
        let engine = engine(dir.clone(), Arc::new(MemoryDraftStore::new()));
        let mut session = engine.open("engine", "s", None).await.unwrap();

        let found = engine.search(&mut session, SlotId(1), "jimmy").await.unwrap();
        assert_eq!(found.len(), 1);

        dir.set_unavailable(true).await;
        let found = engine.search(&mut session, SlotId(1), "jimmy").await.unwrap();
        assert!(found.is_empty());
        assert!(matches!(
            session.events().last(),
            Some(SessionEvent::SearchFailed { .. })
        ));
    }
}
