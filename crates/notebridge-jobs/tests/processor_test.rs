//! Integration tests for per-user update processing.
//!
//! This test suite validates:
//! - Process-001: multiple-note mode creates one note per update
//! - Process-002: one-note mode creates, reuses and replaces the running note
//! - Process-003: unsupported request types stay queued without notification
//! - Process-004: notification and deletion only follow a confirmed write
//! - Process-005: a failed running-note write commits nothing
//! - Process-006: note re-creation never duplicates across retries
//! - Process-007: partial failures, aborted batches and remote timeouts
//! - Process-008: the running note keeps its seed whatever the store echoes back

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{World, NOTEBOOK_GUID};
use notebridge_jobs::{
    defaults, ContentHandler, HandlerRegistry, NoteDraft, NoteMode, NoteStore, RemoteNote,
    RequestType, Resource, Result, UpdateQueue, UpdateRecord,
};
use notebridge_remote::mock::MockNoteStore;

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_multiple_note_two_updates() {
    let world = World::new();
    world.add_user(1, NoteMode::MultipleNote);
    world.text(1, "Buy milk").await;
    world.text(1, "Call Bob").await;

    let batch = world.claim(1).await;
    let outcome = world.processor().process(1, batch).await;

    assert_eq!(outcome.processed.len(), 2);
    assert_eq!(outcome.cleaned.len(), 2);
    assert!(outcome.failed.is_empty());

    let mut titles: Vec<String> = world.notes.notes().into_iter().map(|n| n.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["Buy milk", "Call Bob"]);

    let messages = world.chat.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.text == "✅ Text saved"));
    assert!(messages.iter().all(|m| m.chat_id == 100));
    assert!(world.queue.inner.is_empty());
}

#[tokio::test]
async fn test_one_note_happy_path_creates_running_note() {
    let world = World::new();
    world.add_user(2, NoteMode::OneNote);
    world.text(2, "Hello").await;

    let batch = world.claim(2).await;
    let outcome = world.processor().process(2, batch).await;
    assert_eq!(outcome.processed.len(), 1);

    let notes = world.notes.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, defaults::DEFAULT_NOTE_TITLE);
    assert!(notes[0].content.contains("Hello"));
    assert_eq!(notes[0].notebook_guid.as_deref(), Some(NOTEBOOK_GUID));

    let user = world.users.snapshot(2).unwrap();
    assert_eq!(user.default_note_guid(), notes[0].guid.as_deref());
    assert_eq!(world.chat.messages().len(), 1);
    assert!(world.queue.inner.is_empty());
    // Only the seed was in the batch, so no follow-up write.
    assert_eq!(world.log.count("update_note"), 0);
}

#[tokio::test]
async fn test_one_note_appends_to_existing_note_in_order() {
    let world = World::new();
    world.add_user(3, NoteMode::OneNote);
    let guid = world.seed_note("earlier");
    world.set_running_note(3, &guid);
    for text in ["first", "second", "third"] {
        world.text(3, text).await;
    }

    let batch = world.claim(3).await;
    let outcome = world.processor().process(3, batch).await;
    assert_eq!(outcome.processed.len(), 3);

    let note = world.notes.note(&guid).unwrap();
    let earlier = note.content.find("earlier").unwrap();
    let first = note.content.find("first").unwrap();
    let second = note.content.find("second").unwrap();
    let third = note.content.find("third").unwrap();
    assert!(earlier < first && first < second && second < third);
    assert_eq!(world.notes.notes().len(), 1);
    assert_eq!(world.log.count("update_note"), 1);
}

#[tokio::test]
async fn test_one_note_stale_note_is_replaced() {
    let world = World::new();
    world.add_user(4, NoteMode::OneNote);
    world.set_running_note(4, "deleted-guid");
    world.text(4, "New content").await;

    let batch = world.claim(4).await;
    let outcome = world.processor().process(4, batch).await;
    assert_eq!(outcome.processed.len(), 1);
    assert!(outcome.aborted.is_none());

    let notes = world.notes.notes();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].content.contains("New content"));

    let user = world.users.snapshot(4).unwrap();
    let running = user.default_note_guid().unwrap();
    assert_ne!(running, "deleted-guid");
    assert_eq!(Some(running), notes[0].guid.as_deref());

    let messages = world.chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "✅ Text saved");
}

#[tokio::test]
async fn test_unsupported_type_stays_queued() {
    let world = World::new();
    world.add_user(5, NoteMode::MultipleNote);
    let photo = world.typed(5, RequestType::Photo).await;

    let batch = world.claim(5).await;
    let outcome = world.processor().process(5, batch).await;

    assert!(outcome.processed.is_empty());
    assert!(outcome.is_failed(photo));
    assert!(world.chat.messages().is_empty());
    assert!(world.notes.notes().is_empty());
    let record = world.queue.inner.get(photo).unwrap();
    assert!(record.in_process);
}

#[tokio::test]
async fn test_unsupported_type_in_one_note_skips_write() {
    let world = World::new();
    world.add_user(6, NoteMode::OneNote);
    let guid = world.seed_note("kept");
    world.set_running_note(6, &guid);
    let photo = world.typed(6, RequestType::Photo).await;

    let batch = world.claim(6).await;
    let outcome = world.processor().process(6, batch).await;

    assert!(outcome.is_failed(photo));
    assert_eq!(world.log.count("update_note"), 0);
    assert!(world.queue.inner.get(photo).is_some());
}

// ============================================================================
// ORDERING
// ============================================================================

#[tokio::test]
async fn test_notify_and_delete_follow_running_note_write() {
    let world = World::new();
    world.add_user(7, NoteMode::OneNote);
    let guid = world.seed_note("base");
    world.set_running_note(7, &guid);
    let mut ids = Vec::new();
    for text in ["a", "b", "c"] {
        ids.push(world.text(7, text).await);
    }

    let batch = world.claim(7).await;
    world.processor().process(7, batch).await;

    let write = world.log.first_ok("update_note", &guid).unwrap();
    for id in &ids {
        let delete = world.log.first_ok("delete", &id.to_string()).unwrap();
        assert!(write < delete, "record {} deleted before the note write", id);
    }
    for call in world.log.calls() {
        if call.operation == "edit_message_text" {
            assert!(write < call.seq, "notification sent before the note write");
        }
    }
}

#[tokio::test]
async fn test_notify_and_delete_follow_each_created_note() {
    let world = World::new();
    world.add_user(8, NoteMode::MultipleNote);
    let first = world.text(8, "one").await;
    let second = world.text(8, "two").await;

    let batch = world.claim(8).await;
    world.processor().process(8, batch).await;

    let last_save = world.log.last_ok("save_note").unwrap();
    let first_notify = world
        .log
        .calls()
        .into_iter()
        .find(|c| c.operation == "edit_message_text")
        .unwrap()
        .seq;
    // Cleanup runs after every note in the batch is written.
    assert!(last_save < first_notify);
    assert!(last_save < world.log.first_ok("delete", &first.to_string()).unwrap());
    assert!(last_save < world.log.first_ok("delete", &second.to_string()).unwrap());
}

#[tokio::test]
async fn test_record_without_status_message_gets_new_message() {
    let world = World::new();
    world.add_user(9, NoteMode::MultipleNote);
    world
        .queue
        .inner
        .enqueue(notebridge_jobs::NewUpdate::text(9, 900, "plain"))
        .await
        .unwrap();

    let batch = world.claim(9).await;
    world.processor().process(9, batch).await;

    let messages = world.chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id, None);
    assert_eq!(messages[0].chat_id, 900);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_failed_running_note_write_commits_nothing() {
    let world = World::new();
    world.add_user(10, NoteMode::OneNote);
    let guid = world.seed_note("before");
    world.set_running_note(10, &guid);
    for text in ["x", "y", "z"] {
        world.text(10, text).await;
    }
    world.notes.fail_next_updates(1);

    let batch = world.claim(10).await;
    let outcome = world.processor().process(10, batch).await;

    assert!(outcome.processed.is_empty());
    assert_eq!(outcome.failed.len(), 3);
    assert!(world.chat.messages().is_empty());
    assert_eq!(world.queue.inner.len(), 3);
    assert!(!world.notes.note(&guid).unwrap().content.contains('x'));
}

#[tokio::test]
async fn test_recreation_is_not_duplicated_across_retries() {
    let world = World::new();
    world.add_user(11, NoteMode::OneNote);
    world.set_running_note(11, "vanished");
    world.text(11, "seed").await;
    world.text(11, "follow-up").await;

    // Pass 1: creating the replacement fails, nothing is committed.
    world.notes.fail_next_saves(1);
    let outcome = world.processor().process(11, world.claim(11).await).await;
    assert!(outcome.aborted.is_some());
    assert!(world.notes.notes().is_empty());

    // Pass 2: the replacement is created, but the follow-up write fails.
    world.release_all().await;
    world.notes.fail_next_updates(1);
    let outcome = world.processor().process(11, world.claim(11).await).await;
    assert_eq!(outcome.processed.len(), 1);
    assert_eq!(world.notes.notes().len(), 1);

    // Pass 3: the follow-up lands in the same note.
    world.release_all().await;
    let outcome = world.processor().process(11, world.claim(11).await).await;
    assert_eq!(outcome.processed.len(), 1);

    let notes = world.notes.notes();
    assert_eq!(notes.len(), 1, "exactly one replacement note");
    assert!(notes[0].content.contains("seed"));
    assert!(notes[0].content.contains("follow-up"));
    let user = world.users.snapshot(11).unwrap();
    assert_eq!(user.places.len(), 1);
    assert_eq!(user.default_note_guid(), notes[0].guid.as_deref());
    assert!(world.queue.inner.is_empty());
}

#[tokio::test]
async fn test_partial_failure_commits_successes() {
    let world = World::new();
    world.add_user(12, NoteMode::MultipleNote);
    let first = world.text(12, "fails").await;
    let second = world.text(12, "works").await;
    world.notes.fail_next_saves(1);

    let outcome = world.processor().process(12, world.claim(12).await).await;

    assert!(outcome.is_failed(first));
    assert!(outcome.is_processed(second));
    assert!(world.queue.inner.get(first).is_some());
    assert!(world.queue.inner.get(second).is_none());
    assert_eq!(world.chat.messages().len(), 1);
}

#[tokio::test]
async fn test_unknown_user_aborts_batch() {
    let world = World::new();
    world.text(13, "orphan").await;

    let outcome = world.processor().process(13, world.claim(13).await).await;

    assert!(outcome.aborted.unwrap().contains("User not found"));
    assert!(outcome.processed.is_empty());
    assert_eq!(world.queue.inner.len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_aborts_without_recreating() {
    let world = World::new();
    world.add_user(14, NoteMode::OneNote);
    let guid = world.seed_note("base");
    world.set_running_note(14, &guid);
    world.text(14, "later").await;
    world.notes.fail_next_gets(1);

    let outcome = world.processor().process(14, world.claim(14).await).await;

    assert!(outcome.aborted.is_some());
    assert_eq!(world.notes.notes().len(), 1);
    assert_eq!(world.users.save_count(), 0);
    assert_eq!(world.queue.inner.len(), 1);
}

#[tokio::test]
async fn test_failed_seed_content_still_creates_note() {
    let world = World::new();
    world.add_user(15, NoteMode::OneNote);
    let photo = world.typed(15, RequestType::Photo).await;
    let text = world.text(15, "after photo").await;

    let outcome = world.processor().process(15, world.claim(15).await).await;

    assert!(outcome.is_failed(photo));
    assert!(outcome.is_processed(text));
    let notes = world.notes.notes();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].content.contains("after photo"));
    assert!(world.queue.inner.get(photo).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_slow_note_store_times_out() {
    let world = World::new();
    world.add_user(16, NoteMode::MultipleNote);
    let id = world.text(16, "slow").await;
    let slow = world.notes.clone().with_latency_ms(5_000);

    let processor = world
        .processor_with(Arc::new(slow), HandlerRegistry::with_defaults())
        .with_remote_timeout(Duration::from_secs(1));
    let outcome = processor.process(16, world.claim(16).await).await;

    assert!(outcome.is_failed(id));
    let reason = &outcome.failed[0].1;
    assert!(reason.contains("Timed out after 1s"), "got {}", reason);
    assert!(world.queue.inner.get(id).is_some());
}

#[tokio::test]
async fn test_failed_notification_still_deletes() {
    let world = World::new();
    world.add_user(17, NoteMode::MultipleNote);
    let id = world.text(17, "saved anyway").await;
    world.chat.fail_next(1);

    let outcome = world.processor().process(17, world.claim(17).await).await;

    assert!(outcome.is_processed(id));
    assert_eq!(outcome.cleaned, vec![id]);
    assert!(world.queue.inner.is_empty());
}

/// Note store whose create reply carries only the assigned guid.
struct GuidOnlyStore(MockNoteStore);

#[async_trait::async_trait]
impl NoteStore for GuidOnlyStore {
    async fn get_note(&self, token: &str, guid: &str) -> Result<RemoteNote> {
        self.0.get_note(token, guid).await
    }

    async fn save_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        let saved = self.0.save_note(token, note).await?;
        Ok(RemoteNote {
            guid: saved.guid,
            ..RemoteNote::default()
        })
    }

    async fn update_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        self.0.update_note(token, note).await
    }
}

#[tokio::test]
async fn test_running_note_keeps_seed_when_create_reply_is_bare() {
    let world = World::new();
    world.add_user(19, NoteMode::OneNote);
    world.text(19, "seed text").await;
    world.text(19, "follow-up").await;

    let processor = world.processor_with(
        Arc::new(GuidOnlyStore(world.notes.clone())),
        HandlerRegistry::with_defaults(),
    );
    let outcome = processor.process(19, world.claim(19).await).await;

    assert_eq!(outcome.processed.len(), 2);
    let notes = world.notes.notes();
    assert_eq!(notes.len(), 1);
    let content = &notes[0].content;
    let seed = content.find("seed text").expect("seed text kept");
    let follow = content.find("follow-up").expect("follow-up appended");
    assert!(seed < follow);
    assert_eq!(notes[0].title, defaults::DEFAULT_NOTE_TITLE);
}

// ============================================================================
// EXTENSION
// ============================================================================

/// Attaches the payload as a file, standing in for a future media handler.
struct DocumentHandler;

#[async_trait::async_trait]
impl ContentHandler for DocumentHandler {
    fn request_type(&self) -> RequestType {
        RequestType::Document
    }

    async fn append(&self, draft: &mut NoteDraft, update: &UpdateRecord) -> Result<()> {
        let body = update.data.to_string().into_bytes();
        draft.add_resource(Resource::new("application/json", body, Some("update.json".into())));
        Ok(())
    }
}

#[tokio::test]
async fn test_registered_handler_extends_request_types() {
    let world = World::new();
    world.add_user(18, NoteMode::MultipleNote);
    world.typed(18, RequestType::Document).await;

    let mut handlers = HandlerRegistry::with_defaults();
    handlers.register(DocumentHandler);
    let processor = world.processor_with(Arc::new(world.notes.clone()), handlers);
    let outcome = processor.process(18, world.claim(18).await).await;

    assert_eq!(outcome.processed.len(), 1);
    let note = &world.notes.notes()[0];
    assert_eq!(note.resources.len(), 1);
    assert!(note.content.contains("<en-media"));
    assert_eq!(world.chat.messages()[0].text, "✅ Document saved");
}
