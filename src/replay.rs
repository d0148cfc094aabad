//! Scripted Sessions
//!
//! Drives a form session from a YAML script against fixture contacts. Used by
//! the `replay` CLI subcommand and by integration tests.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use crate::engine::{FormEngine, SubmitOutcome};
use crate::error::FormError;
use crate::services::{MemoryDirectory, Relationship};
use crate::session::FormSession;
use crate::types::{ContactRecord, ContactRef, SlotId};

/// Seed data for a `MemoryDirectory`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub contacts: Vec<FixtureContact>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureContact {
    pub id: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl Fixtures {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn into_directory(self) -> MemoryDirectory {
        let mut directory = MemoryDirectory::new();
        for contact in self.contacts {
            let record: ContactRecord = contact.fields;
            directory = directory.with_contact(contact.id, record);
        }
        for r in self.relationships {
            directory =
                directory.with_relationship(r.contact_a.0, &r.relationship_type, r.contact_b.0);
        }
        directory
    }
}

/// A recorded sequence of user actions
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub session: String,
    #[serde(default)]
    pub actor: Option<u64>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Select { slot: u16, contact: u64 },
    Set { slot: u16, field: String, value: String },
    CreateNew { slot: u16 },
    Clear { slot: u16 },
    Search { slot: u16, query: String },
    Link { kind: String, id: u64 },
    Next,
    Previous,
    SaveDraft,
    /// Drop the live session and open it again from the draft store
    Reopen,
    Render,
    Submit,
}

impl Script {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub action: String,
    /// Page after the step
    pub page: usize,
    pub result: serde_json::Value,
}

/// Run a script to completion, stopping at the first error
pub async fn run(
    engine: &FormEngine,
    form_id: &str,
    script: &Script,
) -> Result<Vec<StepReport>, FormError> {
    let actor = script.actor.map(ContactRef);
    let mut session = engine.open(form_id, &script.session, actor).await?;
    let mut reports = Vec::with_capacity(script.steps.len());

    for (index, step) in script.steps.iter().enumerate() {
        let (action, result) =
            run_step(engine, form_id, &script.session, actor, &mut session, step).await?;
        info!(step = index + 1, action = %action, "replayed");
        reports.push(StepReport {
            step: index + 1,
            action,
            page: session.current_page(),
            result,
        });
    }

    Ok(reports)
}

async fn run_step(
    engine: &FormEngine,
    form_id: &str,
    session_key: &str,
    actor: Option<ContactRef>,
    session: &mut FormSession,
    step: &Step,
) -> Result<(String, serde_json::Value), FormError> {
    let reported = match step {
        Step::Select { slot, contact } => {
            let applied = engine
                .select_contact(session, SlotId(*slot), ContactRef(*contact))
                .await?;
            ("select".to_string(), json!({ "applied": applied }))
        }
        Step::Set { slot, field, value } => {
            session.set_field(SlotId(*slot), field, value)?;
            ("set".to_string(), json!(null))
        }
        Step::CreateNew { slot } => {
            engine.create_new(session, SlotId(*slot)).await?;
            ("create_new".to_string(), json!(null))
        }
        Step::Clear { slot } => {
            engine.clear_contact(session, SlotId(*slot)).await?;
            ("clear".to_string(), json!(null))
        }
        Step::Search { slot, query } => {
            let matches = engine.search(session, SlotId(*slot), query).await?;
            ("search".to_string(), json!(matches))
        }
        Step::Link { kind, id } => {
            session.link_record(kind.clone(), *id);
            ("link".to_string(), json!(null))
        }
        Step::Next => {
            let outcome = engine.next(session).await?;
            ("next".to_string(), json!(outcome))
        }
        Step::Previous => {
            let outcome = engine.previous(session).await?;
            ("previous".to_string(), json!(outcome))
        }
        Step::SaveDraft => {
            let written = engine.save_draft(session).await?;
            ("save_draft".to_string(), json!({ "written": written }))
        }
        Step::Reopen => {
            *session = engine.open(form_id, session_key, actor).await?;
            ("reopen".to_string(), json!({ "resumed": session.resumed() }))
        }
        Step::Render => {
            let view = session.render_page(session.current_page());
            ("render".to_string(), json!(view))
        }
        Step::Submit => {
            let outcome = engine.submit(session).await?;
            let result = match &outcome {
                SubmitOutcome::Submitted(submission) => json!(submission),
                SubmitOutcome::Invalid { .. } => json!(outcome),
            };
            ("submit".to_string(), result)
        }
    };
    Ok(reported)
}
