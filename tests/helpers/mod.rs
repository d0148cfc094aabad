//! Shared fixtures for integration tests: the shipped band registration form
//! and its contacts.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use contact_wizard::replay::Fixtures;
use contact_wizard::{
    DraftStore, EngineConfig, FormDefinition, FormEngine, MemoryDirectory, MemoryDraftStore,
};

pub const FORM_ID: &str = "band_registration";

pub fn config_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join(relative)
}

pub fn band_form() -> FormDefinition {
    FormDefinition::from_file(config_path("forms/band_registration.yaml"))
        .expect("band registration form should load")
}

pub fn band_directory() -> Arc<MemoryDirectory> {
    let content = std::fs::read_to_string(config_path("fixtures/band.yaml"))
        .expect("fixtures should be readable");
    Arc::new(
        Fixtures::from_yaml(&content)
            .expect("fixtures should parse")
            .into_directory(),
    )
}

pub fn engine_with(
    directory: Arc<MemoryDirectory>,
    drafts: Arc<dyn DraftStore>,
    config: EngineConfig,
) -> FormEngine {
    FormEngine::new([band_form()], directory.clone(), directory, drafts, config)
}

/// Engine over fresh fixtures and an in-memory draft store
pub fn engine() -> (FormEngine, Arc<MemoryDirectory>, Arc<MemoryDraftStore>) {
    let directory = band_directory();
    let drafts = Arc::new(MemoryDraftStore::new());
    let engine = engine_with(directory.clone(), drafts.clone(), EngineConfig::default());
    (engine, directory, drafts)
}
