//! Integration tests for draft save and resume

mod helpers;

use std::sync::Arc;

use contact_wizard::{
    ContactRef, DraftBackend, DraftConfig, DraftStore, EngineConfig, FileDraftStore,
    NavOutcome, SessionEvent, SlotId,
};
use helpers::{band_directory, engine, engine_with, FORM_ID};
use tempfile::TempDir;

const JIMMY_PAGE: ContactRef = ContactRef(3);

#[tokio::test]
async fn test_save_on_page_two_then_reload() {
    let (engine, _, _) = engine();
    let mut session = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    let page_one_before: Vec<_> = session.page_slots(0).into_iter().cloned().collect();

    engine.next(&mut session).await.unwrap();
    session
        .set_field(SlotId(4), "last_name", "Plant Jr.")
        .unwrap();
    assert!(engine.save_draft(&mut session).await.unwrap());

    let reloaded = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    assert!(reloaded.resumed());
    assert_eq!(reloaded.current_page(), 1);

    let page_one_after: Vec<_> = reloaded.page_slots(0).into_iter().cloned().collect();
    assert_eq!(page_one_after, page_one_before);

    let c4 = reloaded.slot(SlotId(4)).unwrap();
    assert_eq!(c4.value("last_name"), "Plant Jr.");
    assert_eq!(c4.value("first_name"), "Robert");
    assert_eq!(reloaded.slots(), session.slots());
}

#[tokio::test]
async fn test_draft_includes_unvisited_slots() {
    let (engine, _, drafts) = engine();
    let mut session = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    session.set_field(SlotId(2), "first_name", "Marvin").unwrap();
    engine.save_draft(&mut session).await.unwrap();

    let draft = drafts.load("s1").await.unwrap().unwrap();
    assert_eq!(&draft.slots, session.slots());
    assert_eq!(draft.slots.len(), 5);
    assert!(!draft.slots[&SlotId(4)].resolved);
}

#[tokio::test]
async fn test_repeated_save_is_noop() {
    let (engine, _, _) = engine();
    let mut session = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();

    assert!(engine.save_draft(&mut session).await.unwrap());
    assert!(!engine.save_draft(&mut session).await.unwrap());

    session.set_field(SlotId(2), "first_name", "Marvin").unwrap();
    assert!(engine.save_draft(&mut session).await.unwrap());
}

#[tokio::test]
async fn test_deleted_contact_in_draft_reresolves() {
    let (engine, directory, _) = engine();
    let mut session = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    engine.next(&mut session).await.unwrap();
    assert_eq!(session.slot(SlotId(4)).unwrap().contact, Some(ContactRef(4)));
    engine.save_draft(&mut session).await.unwrap();

    directory.remove(ContactRef(4)).await;

    let reloaded = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    assert!(reloaded.resumed());
    let c4 = reloaded.slot(SlotId(4)).unwrap();
    assert!(c4.resolved);
    assert_eq!(c4.contact, None);
    assert!(reloaded.events().iter().any(|e| matches!(
        e,
        SessionEvent::DraftRepaired {
            slot: Some(SlotId(4)),
            ..
        }
    )));
}

#[tokio::test]
async fn test_deleted_source_contact_recomputes_relationship_default() {
    let (engine, directory, _) = engine();
    let mut session = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    engine.next(&mut session).await.unwrap();
    assert_eq!(session.slot(SlotId(1)).unwrap().contact, Some(JIMMY_PAGE));
    assert_eq!(session.slot(SlotId(4)).unwrap().contact, Some(ContactRef(4)));
    engine.save_draft(&mut session).await.unwrap();

    directory.remove(JIMMY_PAGE).await;

    let reloaded = engine.open(FORM_ID, "s1", Some(JIMMY_PAGE)).await.unwrap();
    let c1 = reloaded.slot(SlotId(1)).unwrap();
    assert!(c1.resolved);
    assert_eq!(c1.contact, None);

    // Robert Plant was only the default because he is Jimmy Page's bandmate
    assert_eq!(reloaded.slot(SlotId(4)).unwrap().contact, None);
    assert!(reloaded.events().iter().any(|e| matches!(
        e,
        SessionEvent::DefaultRecomputed {
            slot: SlotId(4),
            source: SlotId(1),
            ..
        }
    )));
}

#[tokio::test]
async fn test_auto_save_to_file_store_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = EngineConfig {
        auto_save: true,
        draft: DraftConfig {
            backend: DraftBackend::File,
            dir: temp_dir.path().join("drafts"),
        },
        ..EngineConfig::default()
    };

    let first = engine_with(band_directory(), config.draft.build(), config.clone());
    let mut session = first.open(FORM_ID, "resume-me", Some(JIMMY_PAGE)).await.unwrap();
    assert_eq!(
        first.next(&mut session).await.unwrap(),
        NavOutcome::Moved { page: 1 }
    );
    drop(first);

    let store = Arc::new(FileDraftStore::new(temp_dir.path().join("drafts")));
    assert!(store.load("resume-me").await.unwrap().is_some());

    let second = engine_with(band_directory(), store.clone(), config);
    let resumed = second.open(FORM_ID, "resume-me", Some(JIMMY_PAGE)).await.unwrap();
    assert!(resumed.resumed());
    assert_eq!(resumed.current_page(), 1);
    assert_eq!(resumed.slots(), session.slots());
}
