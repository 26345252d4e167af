//! Per-user update processing.
//!
//! One [`UpdateProcessor::process`] call handles one user's claimed batch,
//! strictly in order. Records whose content reached the note store are
//! confirmed in chat and deleted; everything else stays claimed for a later
//! pass.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};
use uuid::Uuid;

use notebridge_core::{
    defaults, ChatNotifier, Error, NoteDraft, NoteMode, NoteStore, Result, UpdateQueue,
    UpdateRecord, User, UserRepository,
};

use crate::handler::HandlerRegistry;
use crate::report::{FailureRecord, FailureReporter, FailureStage};

/// What happened to one user's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub user_id: i64,
    /// Records whose content is committed remotely, in batch order.
    pub processed: Vec<Uuid>,
    /// Records left claimed, with the reason.
    pub failed: Vec<(Uuid, String)>,
    /// Processed records that were also deleted from the queue.
    pub cleaned: Vec<Uuid>,
    /// Set when the whole batch was abandoned.
    pub aborted: Option<String>,
}

impl BatchOutcome {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn is_processed(&self, id: Uuid) -> bool {
        self.processed.contains(&id)
    }

    pub fn is_failed(&self, id: Uuid) -> bool {
        self.failed.iter().any(|(failed, _)| *failed == id)
    }

    fn mark_processed(&mut self, id: Uuid) {
        if !self.is_processed(id) {
            self.processed.push(id);
        }
    }

    fn mark_failed(&mut self, id: Uuid, err: &Error) {
        let reason = err.to_string();
        match self.failed.iter_mut().find(|(failed, _)| *failed == id) {
            Some(entry) => entry.1 = reason,
            None => self.failed.push((id, reason)),
        }
    }

    fn abort(&mut self, err: &Error) {
        self.aborted = Some(err.to_string());
    }
}

/// Processes one user's batch against the note store.
#[derive(Clone)]
pub struct UpdateProcessor {
    queue: Arc<dyn UpdateQueue>,
    users: Arc<dyn UserRepository>,
    notes: Arc<dyn NoteStore>,
    chat: Arc<dyn ChatNotifier>,
    handlers: Arc<HandlerRegistry>,
    reporter: FailureReporter,
    remote_timeout: Duration,
}

impl UpdateProcessor {
    pub fn new(
        queue: Arc<dyn UpdateQueue>,
        users: Arc<dyn UserRepository>,
        notes: Arc<dyn NoteStore>,
        chat: Arc<dyn ChatNotifier>,
        handlers: Arc<HandlerRegistry>,
        reporter: FailureReporter,
    ) -> Self {
        Self {
            queue,
            users,
            notes,
            chat,
            handlers,
            reporter,
            remote_timeout: Duration::from_secs(defaults::REMOTE_TIMEOUT_SECS),
        }
    }

    /// Deadline applied to every remote call.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Process `updates`, all owned by `user_id`, in order.
    #[instrument(
        skip(self, updates),
        fields(subsystem = "dealer", component = "processor", count = updates.len())
    )]
    pub async fn process(&self, user_id: i64, updates: Vec<UpdateRecord>) -> BatchOutcome {
        let start = Instant::now();
        let mut outcome = BatchOutcome::new(user_id);
        if updates.is_empty() {
            debug!("No updates for user");
            return outcome;
        }

        let user = match self.remote(self.users.get(user_id)).await {
            Ok(user) => user,
            Err(e) => {
                self.reporter
                    .report(FailureRecord::from_error(FailureStage::LoadUser, &e).for_user(user_id));
                outcome.abort(&e);
                return outcome;
            }
        };

        match user.mode {
            NoteMode::OneNote => {
                debug!(op = "one_note", "Merging batch into running note");
                self.one_note(user, &updates, &mut outcome).await;
            }
            NoteMode::MultipleNote => {
                debug!(op = "multiple_note", "Creating one note per update");
                self.multiple_note(&user, &updates, &mut outcome).await;
            }
        }

        self.cleanup(&updates, &mut outcome).await;

        info!(
            processed = outcome.processed.len(),
            failed = outcome.failed.len(),
            cleaned = outcome.cleaned.len(),
            aborted = outcome.aborted.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "User batch finished"
        );
        outcome
    }

    async fn multiple_note(&self, user: &User, updates: &[UpdateRecord], outcome: &mut BatchOutcome) {
        for update in updates {
            match self.create_note_for(user, update).await {
                Ok(guid) => {
                    debug!(update_id = %update.id, note_guid = %guid, "Created note for update");
                    outcome.mark_processed(update.id);
                }
                Err((stage, e)) => {
                    self.reporter
                        .report(FailureRecord::from_error(stage, &e).for_update(update));
                    outcome.mark_failed(update.id, &e);
                }
            }
        }
    }

    async fn create_note_for(
        &self,
        user: &User,
        update: &UpdateRecord,
    ) -> std::result::Result<String, (FailureStage, Error)> {
        let handler = self
            .handlers
            .get(&update.request_type)
            .map_err(|e| (FailureStage::Content, e))?;
        let mut draft = NoteDraft::new(handler.title(update), notebook_guid(user));
        handler
            .append(&mut draft, update)
            .await
            .map_err(|e| (FailureStage::Content, e))?;
        let saved = self
            .remote(self.notes.save_note(&user.access_token, draft.into_note()))
            .await
            .map_err(|e| (FailureStage::CreateNote, e))?;
        Ok(saved.guid.unwrap_or_default())
    }

    async fn one_note(&self, mut user: User, updates: &[UpdateRecord], outcome: &mut BatchOutcome) {
        let token = user.access_token.clone();

        let existing = match user.default_note_guid().map(str::to_string) {
            None => None,
            Some(guid) => match self.remote(self.notes.get_note(&token, &guid)).await {
                Ok(note) => Some(note),
                Err(e) if e.is_note_not_found() => {
                    debug!(note_guid = %guid, "Running note is gone, creating a replacement");
                    None
                }
                Err(e) => {
                    self.reporter.report(
                        FailureRecord::from_error(FailureStage::FetchNote, &e)
                            .for_user(user.id)
                            .with_note(guid),
                    );
                    outcome.abort(&e);
                    return;
                }
            },
        };

        let (mut draft, rest) = match existing {
            Some(note) => (NoteDraft::wrap(note), updates),
            None => {
                let Some((seed, rest)) = updates.split_first() else {
                    return;
                };
                match self.create_running_note(&mut user, seed, outcome).await {
                    Ok(draft) => (draft, rest),
                    Err(e) => {
                        self.reporter.report(
                            FailureRecord::from_error(FailureStage::CreateNote, &e)
                                .for_user(user.id),
                        );
                        outcome.abort(&e);
                        return;
                    }
                }
            }
        };

        let mut merged = Vec::with_capacity(rest.len());
        for update in rest {
            match self.handlers.append(&mut draft, update).await {
                Ok(()) => merged.push(update.id),
                Err(e) => {
                    self.reporter
                        .report(FailureRecord::from_error(FailureStage::Content, &e).for_update(update));
                    outcome.mark_failed(update.id, &e);
                }
            }
        }

        if merged.is_empty() {
            debug!("Nothing merged, skipping note write");
            return;
        }

        let guid = draft.guid().unwrap_or_default().to_string();
        match self.remote(self.notes.update_note(&token, draft.into_note())).await {
            Ok(_) => {
                debug!(note_guid = %guid, merged = merged.len(), "Running note updated");
                for id in merged {
                    outcome.mark_processed(id);
                }
            }
            Err(e) => {
                self.reporter.report(
                    FailureRecord::from_error(FailureStage::WriteNote, &e)
                        .for_user(user.id)
                        .with_note(guid),
                );
                for id in merged {
                    outcome.mark_failed(id, &e);
                }
            }
        }
    }

    /// Create the running note from `seed` and point the user's current
    /// notebook at it. The seed counts as processed once the note exists.
    async fn create_running_note(
        &self,
        user: &mut User,
        seed: &UpdateRecord,
        outcome: &mut BatchOutcome,
    ) -> Result<NoteDraft> {
        let mut draft = NoteDraft::new(defaults::DEFAULT_NOTE_TITLE, notebook_guid(user));
        let seeded = match self.handlers.append(&mut draft, seed).await {
            Ok(()) => true,
            Err(e) => {
                self.reporter
                    .report(FailureRecord::from_error(FailureStage::Content, &e).for_update(seed));
                outcome.mark_failed(seed.id, &e);
                false
            }
        };

        let mut note = draft.into_note();
        let saved = self
            .remote(self.notes.save_note(&user.access_token, note.clone()))
            .await?;
        let guid = saved
            .guid
            .ok_or_else(|| Error::NoteStore("created note has no guid".into()))?;
        if seeded {
            outcome.mark_processed(seed.id);
        }

        user.set_default_note(guid.clone());
        if let Err(e) = self.remote(self.users.save(user)).await {
            // The note exists either way; the next pass just creates another one.
            self.reporter.report(
                FailureRecord::from_error(FailureStage::CreateNote, &e)
                    .for_user(user.id)
                    .with_note(guid.clone()),
            );
        }
        info!(note_guid = %guid, notebook_guid = %user.current_notebook.guid, "Running note created");

        // Continue from what was sent; the store's reply need not echo the body.
        note.guid = Some(guid);
        Ok(NoteDraft::wrap(note))
    }

    /// Confirm and delete every processed record.
    async fn cleanup(&self, updates: &[UpdateRecord], outcome: &mut BatchOutcome) {
        let processed = &outcome.processed;
        for update in updates.iter().filter(|u| processed.contains(&u.id)) {
            let text = format!("✅ {} saved", update.request_type.label());
            let notified = match update.status_message_id {
                Some(message_id) => {
                    self.remote(self.chat.edit_message_text(update.chat_id, message_id, &text))
                        .await
                }
                None => self.remote(self.chat.send_text(update.chat_id, &text)).await,
            };
            if let Err(e) = notified {
                self.reporter
                    .report(FailureRecord::from_error(FailureStage::Notify, &e).for_update(update));
            }

            match self.remote(self.queue.delete(update.id)).await {
                Ok(removed) => {
                    if !removed {
                        debug!(update_id = %update.id, "Record already deleted");
                    }
                    outcome.cleaned.push(update.id);
                }
                Err(e) => self
                    .reporter
                    .report(FailureRecord::from_error(FailureStage::Delete, &e).for_update(update)),
            }
        }
    }

    async fn remote<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.remote_timeout.as_secs())),
        }
    }
}

fn notebook_guid(user: &User) -> Option<String> {
    let guid = &user.current_notebook.guid;
    (!guid.is_empty()).then(|| guid.clone())
}
