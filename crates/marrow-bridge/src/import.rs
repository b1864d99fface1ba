//! Generic import engine: drives any [`Source`] into the entity cache.
//!
//! A run walks items one at a time. Each item is resolved (or created) by its
//! remote url, its events are turned into operations deduplicated by remote
//! id, and the entity is flushed before the next item starts. The first error
//! rolls back the current item and ends the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use marrow_core::model::{ContentHash, IdentityId, Status};
use marrow_core::{CacheError, EntityGuard, IdentityError, RepoCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::result::{ImportResult, RunStats};
use crate::source::{
    MetadataKeys, ORIGIN_KEY, RemoteActor, RemoteEdit, RemoteEvent, RemoteEventKind, RemoteItem,
    Source, SourceError,
};
use crate::stream::{Emitter, ResultStream, spawn_run};

/// Import everything `source` yields into `repo`.
///
/// Results stream in processing order; a failure ends the stream with a
/// single `Error`. Must be called from within a tokio runtime.
pub fn import_all(
    repo: Arc<RepoCache>,
    source: Box<dyn Source>,
    cancel: CancellationToken,
    buffer: usize,
) -> ResultStream<ImportResult> {
    spawn_run(buffer, move |out| {
        Importer::new(&repo, source, &out).run(&cancel);
    })
}

/// Normalize remote text before it is stored.
#[must_use]
pub fn clean_text(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim_end().to_string()
}

/// Titles are single-line.
#[must_use]
pub fn clean_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

enum Halt {
    Failed(SyncError),
    /// The consumer dropped the stream.
    Disconnected,
}

impl From<SyncError> for Halt {
    fn from(e: SyncError) -> Self {
        Self::Failed(e)
    }
}

impl From<SourceError> for Halt {
    fn from(e: SourceError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<CacheError> for Halt {
    fn from(e: CacheError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<IdentityError> for Halt {
    fn from(e: IdentityError) -> Self {
        Self::Failed(e.into())
    }
}

struct Importer<'a> {
    repo: &'a RepoCache,
    source: Box<dyn Source>,
    keys: MetadataKeys,
    out: &'a Emitter<ImportResult>,
    stats: RunStats,
}

impl<'a> Importer<'a> {
    fn new(repo: &'a RepoCache, source: Box<dyn Source>, out: &'a Emitter<ImportResult>) -> Self {
        let keys = MetadataKeys::for_target(source.target());
        Self {
            repo,
            source,
            keys,
            out,
            stats: RunStats::default(),
        }
    }

    fn run(mut self, cancel: &CancellationToken) {
        info!(target_name = %self.keys.target, "import started");
        let mut context = String::new();
        let outcome = self.run_items(cancel, &mut context);
        match outcome {
            Ok(()) => info!(
                target_name = %self.keys.target,
                entities = self.stats.entities,
                changes = self.stats.changes(),
                unchanged = self.stats.nothing,
                "import finished"
            ),
            Err(Halt::Disconnected) => info!("result consumer went away, import stopped"),
            Err(Halt::Failed(error)) => {
                warn!(error = %error, context = %context, code = %error.code(), "import aborted");
                let _ = self.out.emit(ImportResult::Error { error, context });
            }
        }
    }

    fn run_items(&mut self, cancel: &CancellationToken, context: &mut String) -> Result<(), Halt> {
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }
            let Some(item) = self.source.next_item()? else {
                return Ok(());
            };
            context.clone_from(&item.url);
            self.import_item(&item)?;
        }
    }

    fn emit(&mut self, result: ImportResult) -> Result<(), Halt> {
        self.stats.tally_import(&result);
        if self.out.emit(result) {
            Ok(())
        } else {
            Err(Halt::Disconnected)
        }
    }

    fn ensure_actor(&mut self, actor: &RemoteActor) -> Result<IdentityId, Halt> {
        let (identity, created) = self
            .repo
            .identities()
            .ensure_identity(&self.keys.login, actor.profile())?;
        let id = identity.id().clone();
        if created {
            self.emit(ImportResult::Identity { id: id.clone() })?;
        }
        Ok(id)
    }

    fn metadata(&self, remote_id: &str, url: Option<&str>) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert(ORIGIN_KEY.to_string(), self.keys.target.clone());
        meta.insert(self.keys.id.clone(), remote_id.to_string());
        if let Some(url) = url {
            meta.insert(self.keys.url.clone(), url.to_string());
        }
        meta
    }

    fn item_metadata(&self, item: &RemoteItem) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert(ORIGIN_KEY.to_string(), self.keys.target.clone());
        meta.insert(self.keys.item_id.clone(), item.id.clone());
        meta.insert(self.keys.url.clone(), item.url.clone());
        meta
    }

    fn import_item(&mut self, item: &RemoteItem) -> Result<(), Halt> {
        let repo = self.repo;
        let author = self.ensure_actor(&item.author)?;

        let opening = self.source.next_event()?.ok_or_else(|| SyncError::NoEvents {
            item: item.id.clone(),
        })?;
        let RemoteEventKind::Comment { body, edits, .. } = &opening.kind else {
            return Err(SyncError::UnexpectedOpening {
                item: item.id.clone(),
                kind: event_kind_name(&opening.kind).to_string(),
            }
            .into());
        };

        let (mut guard, is_new) = repo.resolve_or_create_by_metadata(
            &self.keys.url,
            &author,
            item.created_at.timestamp(),
            &clean_title(&item.title),
            &clean_text(original_text(body, edits)),
            self.item_metadata(item),
        )?;
        let id = guard.id().clone();
        let imported = if is_new {
            debug!(item = %item.id, entity = %id.human(), "created entity for remote item");
            self.emit(ImportResult::Entity { id })
        } else {
            self.emit(ImportResult::Nothing {
                entity: Some(id),
                reason: "entity already imported".to_string(),
            })
        };
        if let Err(halt) = imported {
            guard.rollback();
            return Err(halt);
        }

        let processed = self.import_events(&mut guard, &opening, body, edits, is_new);
        if let Err(halt) = processed {
            guard.rollback();
            return Err(halt);
        }
        if let Err(e) = guard.flush_if_dirty() {
            guard.rollback();
            return Err(SyncError::Commit {
                entity: guard.id().to_string(),
                source: e,
            }
            .into());
        }
        Ok(())
    }

    fn import_events(
        &mut self,
        guard: &mut EntityGuard<'_>,
        opening: &RemoteEvent,
        body: &str,
        edits: &[RemoteEdit],
        is_new: bool,
    ) -> Result<(), Halt> {
        let root = guard.id().clone();
        let revision = Revision {
            author: &opening.actor,
            at: opening.created_at.timestamp(),
            body,
            edits,
        };
        self.import_edits(guard, &root, &revision, is_new)?;
        while let Some(event) = self.source.next_event()? {
            self.import_event(guard, &event)?;
        }
        Ok(())
    }

    fn import_event(&mut self, guard: &mut EntityGuard<'_>, event: &RemoteEvent) -> Result<(), Halt> {
        let actor = self.ensure_actor(&event.actor)?;
        let at = event.created_at.timestamp();
        let entity = guard.id().clone();
        let known = guard.resolve_operation_by_metadata(&self.keys.id, &event.id)?;
        let meta = self.metadata(&event.id, None);

        let result = match &event.kind {
            RemoteEventKind::Comment { body, url, edits } => {
                let target = if known.is_some() {
                    self.emit(ImportResult::Nothing {
                        entity: Some(entity),
                        reason: "comment already imported".to_string(),
                    })?;
                    None
                } else {
                    let op = guard.add_comment_raw(
                        &actor,
                        at,
                        &clean_text(original_text(body, edits)),
                        self.metadata(&event.id, url.as_deref()),
                    )?;
                    self.emit(ImportResult::Comment {
                        entity,
                        op: op.hash().clone(),
                    })?;
                    Some(op.hash().clone())
                };
                let is_new = target.is_some();
                let target = match target.or(known) {
                    Some(hash) => hash,
                    None => return Ok(()),
                };
                let revision = Revision {
                    author: &event.actor,
                    at,
                    body,
                    edits,
                };
                return self.import_edits(guard, &target, &revision, is_new);
            }
            _ if known.is_some() => ImportResult::Nothing {
                entity: Some(entity),
                reason: "event already imported".to_string(),
            },
            RemoteEventKind::StatusChange { status } => {
                let op = guard.set_status_raw(&actor, at, *status, meta)?;
                ImportResult::StatusChange {
                    entity,
                    op: op.hash().clone(),
                }
            }
            RemoteEventKind::LabelAdd { label } => {
                let op = guard.change_labels_raw(&actor, at, vec![label.clone()], Vec::new(), meta)?;
                ImportResult::LabelChange {
                    entity,
                    op: op.hash().clone(),
                }
            }
            RemoteEventKind::LabelRemove { label } => {
                let op = guard.change_labels_raw(&actor, at, Vec::new(), vec![label.clone()], meta)?;
                ImportResult::LabelChange {
                    entity,
                    op: op.hash().clone(),
                }
            }
            RemoteEventKind::TitleChange { title } => {
                let op = guard.set_title_raw(&actor, at, &clean_title(title), meta)?;
                ImportResult::TitleEdition {
                    entity,
                    op: op.hash().clone(),
                }
            }
            RemoteEventKind::Unsupported { kind } => ImportResult::Nothing {
                entity: Some(entity),
                reason: format!("unsupported event {kind}"),
            },
        };
        self.emit(result)
    }

    /// Bring the comment created by `target` up to date with its remote
    /// revisions.
    ///
    /// With an edit history, `edits[0]` is the text the comment was created
    /// with and every later revision is deduplicated by its remote id. Without
    /// one, a differing remote body on an already-known comment becomes a
    /// single edit stamped with the comment's own remote time, so the same
    /// remote state always yields the same operation.
    fn import_edits(
        &mut self,
        guard: &mut EntityGuard<'_>,
        target: &ContentHash,
        revision: &Revision<'_>,
        is_new: bool,
    ) -> Result<(), Halt> {
        let entity = guard.id().clone();
        let Revision {
            author,
            at,
            body,
            edits,
        } = *revision;

        if edits.is_empty() {
            if is_new {
                return Ok(());
            }
            let remote = clean_text(body);
            match guard.snapshot().search_comment(target) {
                Some(local) if local.message != remote => {}
                _ => return Ok(()),
            }
            let editor = self.ensure_actor(author)?;
            let mut meta = BTreeMap::new();
            meta.insert(ORIGIN_KEY.to_string(), self.keys.target.clone());
            let op = guard.edit_comment_raw(&editor, at, target, &remote, meta)?;
            debug!(entity = %entity.human(), comment = %target.human(), "remote text changed without history");
            return self.emit(ImportResult::CommentEdition {
                entity,
                op: op.hash().clone(),
            });
        }

        for edit in edits.iter().skip(1) {
            if guard
                .resolve_operation_by_metadata(&self.keys.id, &edit.id)?
                .is_some()
            {
                self.emit(ImportResult::Nothing {
                    entity: Some(entity.clone()),
                    reason: "edit already imported".to_string(),
                })?;
                continue;
            }
            let Some(text) = &edit.body else {
                self.emit(ImportResult::Nothing {
                    entity: Some(entity.clone()),
                    reason: "comment deletion is not supported".to_string(),
                })?;
                continue;
            };
            let editor = self.ensure_actor(&edit.editor)?;
            let op = guard.edit_comment_raw(
                &editor,
                edit.created_at.timestamp(),
                target,
                &clean_text(text),
                self.metadata(&edit.id, None),
            )?;
            self.emit(ImportResult::CommentEdition {
                entity: entity.clone(),
                op: op.hash().clone(),
            })?;
        }
        Ok(())
    }
}

/// Current remote state of one comment.
#[derive(Clone, Copy)]
struct Revision<'e> {
    author: &'e RemoteActor,
    at: i64,
    body: &'e str,
    edits: &'e [RemoteEdit],
}

/// Text a comment was first posted with.
fn original_text<'e>(body: &'e str, edits: &'e [RemoteEdit]) -> &'e str {
    edits
        .first()
        .and_then(|e| e.body.as_deref())
        .unwrap_or(body)
}

const fn event_kind_name(kind: &RemoteEventKind) -> &'static str {
    match kind {
        RemoteEventKind::Comment { .. } => "comment",
        RemoteEventKind::StatusChange { status: Status::Open } => "reopen",
        RemoteEventKind::StatusChange { status: Status::Closed } => "close",
        RemoteEventKind::LabelAdd { .. } => "label_add",
        RemoteEventKind::LabelRemove { .. } => "label_remove",
        RemoteEventKind::TitleChange { .. } => "title_change",
        RemoteEventKind::Unsupported { .. } => "unsupported",
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn text_cleanup() {
        assert_eq!(clean_text("a\r\nb\r\n\r\n"), "a\nb");
        assert_eq!(clean_text("  keep leading"), "  keep leading");
        assert_eq!(clean_title(" Crash\non  start "), "Crash on start");
    }

    #[test]
    fn original_text_prefers_first_revision() {
        let edit = |body: Option<&str>| RemoteEdit {
            id: "e".into(),
            editor: RemoteActor::new("a"),
            created_at: Utc::now(),
            body: body.map(str::to_string),
        };
        assert_eq!(original_text("now", &[]), "now");
        assert_eq!(original_text("now", &[edit(Some("then")), edit(Some("now"))]), "then");
        assert_eq!(original_text("now", &[edit(None)]), "now");
    }
}
