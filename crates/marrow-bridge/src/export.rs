//! Generic export engine: pushes local operations through a [`Sink`].
//!
//! Every pushed operation is recorded by appending a `no_op` marker that
//! points at it (`export-of`) and carries the remote ids the sink assigned.
//! Markers are what make a later export skip the operation and a later
//! import recognize the remote copy.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use marrow_core::cache::EXPORT_MARKER_KEY;
use marrow_core::model::{ContentHash, EntityId, IdentityId, OpPayload, Operation, Status};
use marrow_core::{CacheError, EntityGuard, ErrorCode, RepoCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::result::{ExportResult, RunStats};
use crate::source::{MetadataKeys, ORIGIN_KEY};
use crate::stream::{Emitter, ResultStream, spawn_run};

/// Metadata key on export markers naming the sink they were pushed to.
pub const EXPORT_TARGET_KEY: &str = "export-target";

/// A remote object created by a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub id: String,
    pub url: String,
}

/// Errors a sink reports. Every one is terminal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {message}")]
    Encode { what: String, message: String },

    #[error("{0}")]
    Rejected(String),
}

impl SinkError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::RemoteWriteFailure
    }
}

/// Write side of a remote tracker.
///
/// Methods returning a list report the remote events the change created, so
/// a later import of the same remote can recognize them. An empty list means
/// the sink cannot tell.
pub trait Sink: Send {
    /// Tag recorded on markers (`github`, `jsonl`, ...).
    fn target(&self) -> &str;

    fn create_item(&mut self, title: &str, body: &str) -> Result<RemoteRef, SinkError>;

    fn add_comment(&mut self, item: &RemoteRef, body: &str) -> Result<RemoteRef, SinkError>;

    /// Replace the item description.
    fn edit_body(&mut self, item: &RemoteRef, body: &str) -> Result<Vec<RemoteRef>, SinkError>;

    fn edit_comment(
        &mut self,
        item: &RemoteRef,
        comment: &RemoteRef,
        body: &str,
    ) -> Result<Vec<RemoteRef>, SinkError>;

    fn set_status(&mut self, item: &RemoteRef, status: Status) -> Result<Vec<RemoteRef>, SinkError>;

    fn set_title(&mut self, item: &RemoteRef, title: &str) -> Result<Vec<RemoteRef>, SinkError>;

    fn change_labels(
        &mut self,
        item: &RemoteRef,
        added: &[String],
        removed: &[String],
    ) -> Result<Vec<RemoteRef>, SinkError>;

    /// Called once after the last entity, also after a failed run.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Export every entity in `repo` through `sink`.
///
/// Markers are authored by `author`. Operations older than `since` are
/// left alone. Must be called from within a tokio runtime.
pub fn export_all(
    repo: Arc<RepoCache>,
    sink: Box<dyn Sink>,
    author: IdentityId,
    since: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    buffer: usize,
) -> ResultStream<ExportResult> {
    spawn_run(buffer, move |out| {
        Exporter {
            repo: &repo,
            keys: MetadataKeys::for_target(sink.target()),
            sink,
            author,
            since: since.map(|t| t.timestamp()),
            out: &out,
            stats: RunStats::default(),
        }
        .run(&cancel);
    })
}

enum Halt {
    Failed(SyncError),
    Disconnected,
}

impl From<SyncError> for Halt {
    fn from(e: SyncError) -> Self {
        Self::Failed(e)
    }
}

impl From<SinkError> for Halt {
    fn from(e: SinkError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<CacheError> for Halt {
    fn from(e: CacheError) -> Self {
        Self::Failed(e.into())
    }
}

/// Remote counterparts already known for one entity.
#[derive(Default)]
struct RemoteRefs {
    item: Option<RemoteRef>,
    comments: HashMap<ContentHash, RemoteRef>,
    exported: HashSet<ContentHash>,
}

impl RemoteRefs {
    fn scan(ops: &[Operation], keys: &MetadataKeys) -> Self {
        let mut refs = Self::default();
        let root = ops.first().map(|op| op.hash().clone());
        for op in ops {
            let (subject, marked) = match op.payload() {
                OpPayload::NoOp(_) => {
                    if op.get_metadata(EXPORT_TARGET_KEY) != Some(keys.target.as_str()) {
                        continue;
                    }
                    let Some(hash) = op
                        .get_metadata(EXPORT_MARKER_KEY)
                        .and_then(|raw| ContentHash::parse(raw).ok())
                    else {
                        continue;
                    };
                    refs.exported.insert(hash.clone());
                    (hash, true)
                }
                _ if op.get_metadata(ORIGIN_KEY) == Some(keys.target.as_str()) => {
                    (op.hash().clone(), false)
                }
                _ => continue,
            };
            let is_root = Some(&subject) == root.as_ref();
            let id_key = if is_root { &keys.item_id } else { &keys.id };
            let (Some(id), Some(url)) = (op.get_metadata(id_key), op.get_metadata(&keys.url))
            else {
                continue;
            };
            let remote = RemoteRef {
                id: id.to_string(),
                url: url.to_string(),
            };
            if is_root {
                refs.item = Some(remote);
            } else if marked || matches!(op.payload(), OpPayload::AddComment(_)) {
                refs.comments.insert(subject, remote);
            }
        }
        refs
    }
}

struct Exporter<'a> {
    repo: &'a RepoCache,
    sink: Box<dyn Sink>,
    keys: MetadataKeys,
    author: IdentityId,
    since: Option<i64>,
    out: &'a Emitter<ExportResult>,
    stats: RunStats,
}

impl Exporter<'_> {
    fn run(mut self, cancel: &CancellationToken) {
        info!(target_name = %self.keys.target, "export started");
        let mut context = String::new();
        let outcome = self.run_entities(cancel, &mut context);
        let finished = self.sink.finish();
        let outcome = match (outcome, finished) {
            (Ok(()), Err(e)) => Err(Halt::Failed(e.into())),
            (outcome, Err(e)) => {
                warn!(error = %e, "sink failed to finish after an aborted export");
                outcome
            }
            (outcome, Ok(())) => outcome,
        };
        match outcome {
            Ok(()) => info!(
                target_name = %self.keys.target,
                changes = self.stats.changes(),
                unchanged = self.stats.nothing,
                "export finished"
            ),
            Err(Halt::Disconnected) => info!("result consumer went away, export stopped"),
            Err(Halt::Failed(error)) => {
                warn!(error = %error, context = %context, code = %error.code(), "export aborted");
                let _ = self.out.emit(ExportResult::Error { error, context });
            }
        }
    }

    fn run_entities(&mut self, cancel: &CancellationToken, context: &mut String) -> Result<(), Halt> {
        for id in self.repo.entity_ids() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }
            *context = id.to_string();
            self.export_entity(&id)?;
        }
        Ok(())
    }

    fn emit(&mut self, result: ExportResult) -> Result<(), Halt> {
        self.stats.tally_export(&result);
        if self.out.emit(result) {
            Ok(())
        } else {
            Err(Halt::Disconnected)
        }
    }

    fn export_entity(&mut self, id: &EntityId) -> Result<(), Halt> {
        let repo = self.repo;
        let mut guard = repo.lock(id)?;
        let pushed = self.export_ops(&mut guard);
        // Markers for operations already pushed are kept even when a later
        // push fails; the remote has them.
        if let Err(e) = guard.flush_if_dirty() {
            guard.rollback();
            return Err(SyncError::Commit {
                entity: id.to_string(),
                source: e,
            }
            .into());
        }
        pushed
    }

    fn export_ops(&mut self, guard: &mut EntityGuard<'_>) -> Result<(), Halt> {
        let entity = guard.id().clone();
        let ops: Vec<Operation> = guard.entity().operations().to_vec();
        let mut refs = RemoteRefs::scan(&ops, &self.keys);

        for op in &ops {
            if matches!(op.payload(), OpPayload::NoOp(_)) {
                continue;
            }
            if self.since.is_some_and(|since| op.timestamp() < since) {
                continue;
            }
            if op.get_metadata(ORIGIN_KEY) == Some(self.keys.target.as_str()) {
                self.emit(ExportResult::Nothing {
                    entity: Some(entity.clone()),
                    reason: format!("imported from {}", self.keys.target),
                })?;
                continue;
            }
            if refs.exported.contains(op.hash()) {
                self.emit(ExportResult::Nothing {
                    entity: Some(entity.clone()),
                    reason: "already exported".to_string(),
                })?;
                continue;
            }
            self.export_op(guard, op, &mut refs)?;
        }
        Ok(())
    }

    fn export_op(
        &mut self,
        guard: &mut EntityGuard<'_>,
        op: &Operation,
        refs: &mut RemoteRefs,
    ) -> Result<(), Halt> {
        let entity = guard.id().clone();
        let hash = op.hash().clone();

        if let OpPayload::Create(data) = op.payload() {
            let remote = self.sink.create_item(&data.title, &data.message)?;
            self.mark(guard, &hash, std::slice::from_ref(&remote))?;
            debug!(entity = %entity.human(), remote = %remote.url, "exported entity");
            let remote_url = remote.url.clone();
            refs.item = Some(remote);
            return self.emit(ExportResult::Entity {
                id: entity,
                remote_url,
            });
        }

        let Some(item) = refs.item.clone() else {
            return self.emit(ExportResult::Nothing {
                entity: Some(entity),
                reason: format!("entity has no {} counterpart", self.keys.target),
            });
        };

        let result = match op.payload() {
            OpPayload::AddComment(data) => {
                let remote = self.sink.add_comment(&item, &data.message)?;
                self.mark(guard, &hash, std::slice::from_ref(&remote))?;
                refs.comments.insert(hash.clone(), remote);
                ExportResult::Comment { entity, op: hash }
            }
            OpPayload::EditComment(data) if &data.target == guard.id() => {
                let revisions = self.sink.edit_body(&item, &data.message)?;
                self.mark(guard, &hash, &revisions)?;
                ExportResult::CommentEdition { entity, op: hash }
            }
            OpPayload::EditComment(data) => {
                let Some(comment) = refs.comments.get(&data.target).cloned() else {
                    return self.emit(ExportResult::Nothing {
                        entity: Some(entity),
                        reason: format!("comment {} was never exported", data.target.human()),
                    });
                };
                let revisions = self.sink.edit_comment(&item, &comment, &data.message)?;
                self.mark(guard, &hash, &revisions)?;
                ExportResult::CommentEdition { entity, op: hash }
            }
            OpPayload::SetTitle(data) => {
                let events = self.sink.set_title(&item, &data.title)?;
                self.mark(guard, &hash, &events)?;
                ExportResult::TitleEdition { entity, op: hash }
            }
            OpPayload::LabelChange(data) => {
                let events = self.sink.change_labels(&item, &data.added, &data.removed)?;
                self.mark(guard, &hash, &events)?;
                ExportResult::LabelChange { entity, op: hash }
            }
            OpPayload::SetStatus(data) => {
                let events = self.sink.set_status(&item, data.status)?;
                self.mark(guard, &hash, &events)?;
                ExportResult::StatusChange { entity, op: hash }
            }
            OpPayload::Create(_) | OpPayload::NoOp(_) => return Ok(()),
        };
        self.emit(result)
    }

    /// Append the markers recording that `hash` now exists remotely: one per
    /// remote object, or a single bare one when there is none.
    ///
    /// The create op's remote id goes under the item-id key. A remote event
    /// already standing for another operation is not claimed again.
    fn mark(
        &self,
        guard: &mut EntityGuard<'_>,
        hash: &ContentHash,
        remotes: &[RemoteRef],
    ) -> Result<(), Halt> {
        let now = Utc::now().timestamp();
        let is_root = hash == guard.id();
        let id_key = if is_root { &self.keys.item_id } else { &self.keys.id };
        let base = {
            let mut meta = BTreeMap::new();
            meta.insert(EXPORT_MARKER_KEY.to_string(), hash.to_string());
            meta.insert(EXPORT_TARGET_KEY.to_string(), self.keys.target.clone());
            meta
        };

        let mut written = 0;
        for remote in remotes {
            let claimed = if is_root {
                None
            } else {
                guard.resolve_operation_by_metadata(id_key, &remote.id)?
            };
            if claimed.is_some_and(|other| &other != hash) {
                warn!(
                    entity = %guard.id().human(),
                    remote = %remote.id,
                    "remote event already stands for another operation"
                );
                continue;
            }
            let mut meta = base.clone();
            meta.insert(id_key.clone(), remote.id.clone());
            meta.insert(self.keys.url.clone(), remote.url.clone());
            guard.no_op_raw(&self.author, now, meta)?;
            written += 1;
        }
        if written == 0 {
            guard.no_op_raw(&self.author, now, base)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marrow_core::model::{AddCommentData, Entity, NoOpData};

    fn author() -> IdentityId {
        ContentHash::of_bytes(b"me")
    }

    #[test]
    fn scan_reads_markers_and_imported_metadata() {
        let keys = MetadataKeys::for_target("jsonl");
        let (mut entity, _) =
            Entity::create(author(), 1, "title", "body", BTreeMap::new()).expect("create");
        let root = entity.id().clone();

        let mut imported = BTreeMap::new();
        imported.insert(ORIGIN_KEY.to_string(), "jsonl".to_string());
        imported.insert("jsonl-id".to_string(), "c1".to_string());
        imported.insert("jsonl-url".to_string(), "file#c1".to_string());
        let comment = entity
            .append(
                author(),
                2,
                OpPayload::AddComment(AddCommentData {
                    message: "hi".into(),
                }),
                imported,
            )
            .expect("comment");

        let mut marker = BTreeMap::new();
        marker.insert(EXPORT_MARKER_KEY.to_string(), root.to_string());
        marker.insert(EXPORT_TARGET_KEY.to_string(), "jsonl".to_string());
        marker.insert("jsonl-item-id".to_string(), "7".to_string());
        marker.insert("jsonl-url".to_string(), "file#7".to_string());
        entity
            .append(author(), 3, OpPayload::NoOp(NoOpData {}), marker)
            .expect("marker");

        let refs = RemoteRefs::scan(entity.operations(), &keys);
        assert_eq!(refs.item.as_ref().map(|r| r.id.as_str()), Some("7"));
        assert_eq!(
            refs.comments.get(comment.hash()).map(|r| r.url.as_str()),
            Some("file#c1")
        );
        assert!(refs.exported.contains(&root));
    }

    #[test]
    fn scan_ignores_other_targets() {
        let keys = MetadataKeys::for_target("github");
        let (mut entity, _) =
            Entity::create(author(), 1, "title", "body", BTreeMap::new()).expect("create");
        let mut marker = BTreeMap::new();
        marker.insert(EXPORT_MARKER_KEY.to_string(), entity.id().to_string());
        marker.insert(EXPORT_TARGET_KEY.to_string(), "jsonl".to_string());
        entity
            .append(author(), 2, OpPayload::NoOp(NoOpData {}), marker)
            .expect("marker");

        let refs = RemoteRefs::scan(entity.operations(), &keys);
        assert!(refs.item.is_none());
        assert!(refs.exported.is_empty());
    }
}
