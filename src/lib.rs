//! Contact Wizard - contact slot reconciliation for multi-page forms
//!
//! A form is a sequence of pages; each page owns contact slots bound to
//! records in an external CRM. This crate decides what every slot shows when
//! a page is (re)rendered, how edits interact with drafts and validation, and
//! what the CRM receives on final submit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contact_wizard::{EngineConfig, FormDefinition, FormEngine, MemoryDirectory, MemoryDraftStore};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let form = FormDefinition::from_file("config/forms/band_registration.yaml")?;
//! let directory = Arc::new(MemoryDirectory::new());
//! let engine = FormEngine::new(
//!     [form],
//!     directory.clone(),
//!     directory,
//!     Arc::new(MemoryDraftStore::new()),
//!     EngineConfig::default(),
//! );
//! let mut session = engine.open("band_registration", "session-1", None).await?;
//! engine.next(&mut session).await?;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;
pub mod types;

// Form structure
pub mod definition;
pub mod slot;

// Collaborators
pub mod draft;
pub mod services;

// Session state and sequencing
pub mod engine;
pub mod events;
pub mod gate;
pub mod resolver;
pub mod session;

// Submit output
pub mod submission;
pub mod tokens;

pub mod config;
pub mod replay;

pub use config::{DraftBackend, DraftConfig, EngineConfig};
pub use definition::{
    DefaultPolicy, FieldDef, FormDefinition, HideMethod, NotificationDef, PageDef, SlotDef,
    ValidationError, Widget,
};
pub use draft::{Draft, DraftStore, DraftStoreError, FileDraftStore, MemoryDraftStore};
pub use engine::{FormEngine, NavOutcome, SubmitOutcome};
pub use error::{ConfigError, DefinitionError, FormError, Result};
pub use events::{GateScope, SessionEvent};
pub use resolver::{DefaultResolver, Resolution, SlotGraph};
pub use services::{
    ContactMatch, ContactService, MemoryDirectory, Relationship, RelationshipService,
    ServiceError,
};
pub use session::{BindTicket, FieldView, FormSession, SlotView};
pub use slot::{FieldState, Slot, CREATE_NEW_LABEL, NONE_FOUND_LABEL};
pub use submission::{RenderedNotification, Submission};
pub use tokens::TokenRenderer;
pub use types::{ContactRecord, ContactRef, FieldValues, InvalidField, SlotId};
