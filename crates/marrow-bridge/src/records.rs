//! Newline-delimited JSON tracker dumps.
//!
//! Each line is one [`RemoteRecord`]: an item plus its events, opening post
//! first. The same file works as a source and, through [`JsonlSink`], as an
//! export target, which makes it a convenient offline stand-in for a hosted
//! tracker.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use marrow_core::model::Status;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::export::{RemoteRef, Sink, SinkError};
use crate::source::{
    RemoteActor, RemoteEdit, RemoteEvent, RemoteEventKind, RemoteItem, Source, SourceError,
};

/// Target name used by the JSONL bridge.
pub const JSONL_TARGET: &str = "jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub item: RemoteItem,
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
}

impl RemoteRecord {
    /// Most recent activity on the item, edits included.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        let mut latest = self.item.created_at;
        for event in &self.events {
            latest = latest.max(event.created_at);
            if let RemoteEventKind::Comment { edits, .. } = &event.kind {
                for edit in edits {
                    latest = latest.max(edit.created_at);
                }
            }
        }
        latest
    }
}

/// A [`Source`] over records already in memory.
pub struct RecordSource {
    target: String,
    records: std::vec::IntoIter<RemoteRecord>,
    events: std::vec::IntoIter<RemoteEvent>,
}

impl RecordSource {
    /// Records with no activity at or after `since` are dropped.
    ///
    /// Activity is read from event and edit timestamps only. A comment whose
    /// body was rewritten without an edit entry looks unchanged, so with
    /// `since` set such a change is only picked up by a full run.
    /// [`JsonlSink`] always records an edit entry.
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        records: Vec<RemoteRecord>,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        let records: Vec<RemoteRecord> = records
            .into_iter()
            .filter(|r| since.is_none_or(|since| r.last_activity() >= since))
            .collect();
        Self {
            target: target.into(),
            records: records.into_iter(),
            events: Vec::new().into_iter(),
        }
    }

    /// Read every record from a JSONL file.
    pub fn open_jsonl(path: &Path, since: Option<DateTime<Utc>>) -> Result<Self, SourceError> {
        let records = read_records(path).map_err(|e| match e {
            ReadError::Io(source) => SourceError::Io {
                path: path.display().to_string(),
                source,
            },
            ReadError::Decode { line, message } => SourceError::Decode {
                what: format!("{} line {line}", path.display()),
                message,
            },
        })?;
        Ok(Self::new(JSONL_TARGET, records, since))
    }
}

impl Source for RecordSource {
    fn target(&self) -> &str {
        &self.target
    }

    fn next_item(&mut self) -> Result<Option<RemoteItem>, SourceError> {
        let Some(record) = self.records.next() else {
            return Ok(None);
        };
        self.events = record.events.into_iter();
        Ok(Some(record.item))
    }

    fn next_event(&mut self) -> Result<Option<RemoteEvent>, SourceError> {
        Ok(self.events.next())
    }
}

enum ReadError {
    Io(std::io::Error),
    Decode { line: usize, message: String },
}

fn read_records(path: &Path) -> Result<Vec<RemoteRecord>, ReadError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ReadError::Io(e)),
    };
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| ReadError::Decode {
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    debug!(path = %path.display(), count = records.len(), "read remote records");
    Ok(records)
}

/// A [`Sink`] that edits a JSONL dump in memory and writes it back on
/// [`finish`](Sink::finish).
pub struct JsonlSink {
    path: PathBuf,
    records: Vec<RemoteRecord>,
    actor: RemoteActor,
    next_event: u64,
    dirty: bool,
}

impl JsonlSink {
    /// Load the dump at `path` (a missing file starts empty). Records written
    /// by this sink are attributed to `actor`.
    pub fn open(path: impl Into<PathBuf>, actor: RemoteActor) -> Result<Self, SinkError> {
        let path = path.into();
        let records = read_records(&path).map_err(|e| match e {
            ReadError::Io(source) => SinkError::Io {
                path: path.display().to_string(),
                source,
            },
            ReadError::Decode { line, message } => {
                SinkError::Rejected(format!("{} line {line}: {message}", path.display()))
            }
        })?;
        // Event and revision ids share one counter.
        let next_event = records
            .iter()
            .flat_map(|r| &r.events)
            .map(|e| match &e.kind {
                RemoteEventKind::Comment { edits, .. } => 1 + edits.len() as u64,
                _ => 1,
            })
            .sum::<u64>()
            + 1;
        Ok(Self {
            path,
            records,
            actor,
            next_event,
            dirty: false,
        })
    }

    #[must_use]
    pub fn records(&self) -> &[RemoteRecord] {
        &self.records
    }

    fn record_mut(&mut self, item: &RemoteRef) -> Result<&mut RemoteRecord, SinkError> {
        self.records
            .iter_mut()
            .find(|r| r.item.id == item.id)
            .ok_or_else(|| SinkError::Rejected(format!("no item {} in {}", item.id, self.path.display())))
    }

    fn event_id(&mut self, item: &RemoteRef) -> String {
        let id = format!("{}-e{}", item.id, self.next_event);
        self.next_event += 1;
        id
    }

    fn push_event(&mut self, item: &RemoteRef, kind: RemoteEventKind) -> Result<RemoteRef, SinkError> {
        let id = self.event_id(item);
        let url = format!("{}#{id}", item.url);
        let event = RemoteEvent {
            id: id.clone(),
            actor: self.actor.clone(),
            created_at: Utc::now(),
            kind,
        };
        self.record_mut(item)?.events.push(event);
        self.dirty = true;
        Ok(RemoteRef { id, url })
    }

    /// Rewrite a comment body and append the revision to its edit history,
    /// seeding the history with the previous text on first edit.
    fn revise_comment(
        &mut self,
        item: &RemoteRef,
        comment_id: Option<&str>,
        body: &str,
    ) -> Result<Vec<RemoteRef>, SinkError> {
        let path = self.path.display().to_string();
        let revision = self.event_id(item);
        let editor = self.actor.clone();
        let Some(record) = self.records.iter_mut().find(|r| r.item.id == item.id) else {
            return Err(SinkError::Rejected(format!("no item {} in {path}", item.id)));
        };
        let event = match comment_id {
            None => record.events.first_mut(),
            Some(id) => record.events.iter_mut().find(|e| e.id == id),
        };
        match event {
            Some(RemoteEvent {
                id,
                actor,
                created_at,
                kind: RemoteEventKind::Comment {
                    body: current,
                    edits,
                    ..
                },
            }) => {
                if edits.is_empty() {
                    edits.push(RemoteEdit {
                        id: format!("{id}-r0"),
                        editor: actor.clone(),
                        created_at: *created_at,
                        body: Some(current.clone()),
                    });
                }
                edits.push(RemoteEdit {
                    id: revision.clone(),
                    editor,
                    created_at: Utc::now(),
                    body: Some(body.to_string()),
                });
                *current = body.to_string();
                self.dirty = true;
                let url = format!("{}#{revision}", item.url);
                Ok(vec![RemoteRef { id: revision, url }])
            }
            _ => Err(SinkError::Rejected(format!(
                "no comment {} on item {} in {path}",
                comment_id.unwrap_or("(description)"),
                item.id
            ))),
        }
    }
}

impl Sink for JsonlSink {
    fn target(&self) -> &str {
        JSONL_TARGET
    }

    fn create_item(&mut self, title: &str, body: &str) -> Result<RemoteRef, SinkError> {
        let next = self
            .records
            .iter()
            .filter_map(|r| r.item.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = next.to_string();
        let url = format!("{}#{id}", self.path.display());
        let now = Utc::now();
        self.records.push(RemoteRecord {
            item: RemoteItem {
                id: id.clone(),
                url: url.clone(),
                title: title.to_string(),
                author: self.actor.clone(),
                created_at: now,
            },
            events: vec![RemoteEvent {
                id: format!("{id}-body"),
                actor: self.actor.clone(),
                created_at: now,
                kind: RemoteEventKind::Comment {
                    body: body.to_string(),
                    url: None,
                    edits: Vec::new(),
                },
            }],
        });
        self.dirty = true;
        Ok(RemoteRef { id, url })
    }

    fn add_comment(&mut self, item: &RemoteRef, body: &str) -> Result<RemoteRef, SinkError> {
        let id = self.event_id(item);
        let url = format!("{}#{id}", item.url);
        let event = RemoteEvent {
            id: id.clone(),
            actor: self.actor.clone(),
            created_at: Utc::now(),
            kind: RemoteEventKind::Comment {
                body: body.to_string(),
                url: Some(url.clone()),
                edits: Vec::new(),
            },
        };
        self.record_mut(item)?.events.push(event);
        self.dirty = true;
        Ok(RemoteRef { id, url })
    }

    fn edit_body(&mut self, item: &RemoteRef, body: &str) -> Result<Vec<RemoteRef>, SinkError> {
        self.revise_comment(item, None, body)
    }

    fn edit_comment(
        &mut self,
        item: &RemoteRef,
        comment: &RemoteRef,
        body: &str,
    ) -> Result<Vec<RemoteRef>, SinkError> {
        self.revise_comment(item, Some(&comment.id), body)
    }

    fn set_status(&mut self, item: &RemoteRef, status: Status) -> Result<Vec<RemoteRef>, SinkError> {
        let event = self.push_event(item, RemoteEventKind::StatusChange { status })?;
        Ok(vec![event])
    }

    fn set_title(&mut self, item: &RemoteRef, title: &str) -> Result<Vec<RemoteRef>, SinkError> {
        let event = self.push_event(
            item,
            RemoteEventKind::TitleChange {
                title: title.to_string(),
            },
        )?;
        self.record_mut(item)?.item.title = title.to_string();
        Ok(vec![event])
    }

    fn change_labels(
        &mut self,
        item: &RemoteRef,
        added: &[String],
        removed: &[String],
    ) -> Result<Vec<RemoteRef>, SinkError> {
        let mut events = Vec::with_capacity(added.len() + removed.len());
        for label in added {
            events.push(self.push_event(item, RemoteEventKind::LabelAdd { label: label.clone() })?);
        }
        for label in removed {
            events.push(self.push_event(item, RemoteEventKind::LabelRemove { label: label.clone() })?);
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if !self.dirty {
            return Ok(());
        }
        let io_err = |source| SinkError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let mut out = Vec::new();
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|e| SinkError::Encode {
                what: format!("item {}", record.item.id),
                message: e.to_string(),
            })?;
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&out).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), count = self.records.len(), "wrote remote records");
        self.dirty = false;
        Ok(())
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        if self.dirty {
            warn!(path = %self.path.display(), "jsonl sink dropped with unwritten changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn record(id: &str, created: i64, comment_at: Option<i64>) -> RemoteRecord {
        let author = RemoteActor::new("octo");
        let mut events = vec![RemoteEvent {
            id: format!("{id}-body"),
            actor: author.clone(),
            created_at: at(created),
            kind: RemoteEventKind::Comment {
                body: "desc".into(),
                url: None,
                edits: Vec::new(),
            },
        }];
        if let Some(t) = comment_at {
            events.push(RemoteEvent {
                id: format!("{id}-c"),
                actor: author.clone(),
                created_at: at(t),
                kind: RemoteEventKind::Comment {
                    body: "later".into(),
                    url: None,
                    edits: Vec::new(),
                },
            });
        }
        RemoteRecord {
            item: RemoteItem {
                id: id.into(),
                url: format!("mem#{id}"),
                title: format!("item {id}"),
                author,
                created_at: at(created),
            },
            events,
        }
    }

    #[test]
    fn since_keeps_items_with_recent_activity() {
        let records = vec![record("1", 10, None), record("2", 10, Some(50)), record("3", 60, None)];
        let mut source = RecordSource::new("mem", records, Some(at(40)));
        let mut ids = Vec::new();
        while let Some(item) = source.next_item().expect("item") {
            ids.push(item.id);
        }
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn events_follow_current_item() {
        let mut source = RecordSource::new("mem", vec![record("1", 10, Some(11))], None);
        assert!(source.next_item().expect("item").is_some());
        assert_eq!(source.next_event().expect("event").map(|e| e.id), Some("1-body".into()));
        assert_eq!(source.next_event().expect("event").map(|e| e.id), Some("1-c".into()));
        assert!(source.next_event().expect("event").is_none());
        assert!(source.next_item().expect("item").is_none());
    }

    #[test]
    fn sink_writes_back_and_reads_again() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("dump.jsonl");
        let mut sink = JsonlSink::open(&path, RemoteActor::new("marrow")).expect("open");
        let item = sink.create_item("Bug", "desc").expect("create");
        let comment = sink.add_comment(&item, "first").expect("comment");
        let revision = sink.edit_comment(&item, &comment, "first, edited").expect("edit");
        let close = sink.set_status(&item, Status::Closed).expect("close");
        let labels = sink
            .change_labels(&item, &["bug".to_string()], &["old".to_string()])
            .expect("labels");
        assert_eq!(labels.len(), 2);
        assert_ne!(labels[0].id, labels[1].id);
        sink.finish().expect("finish");

        let mut source = RecordSource::open_jsonl(&path, None).expect("reopen");
        let got = source.next_item().expect("item").expect("one item");
        assert_eq!(got.id, item.id);
        assert_eq!(got.url, item.url);
        let _opening = source.next_event().expect("event");
        let edited = source.next_event().expect("event").expect("comment");
        let RemoteEventKind::Comment { body, edits, .. } = &edited.kind else {
            panic!("expected a comment, got {edited:?}");
        };
        assert_eq!(body, "first, edited");
        let history: Vec<_> = edits.iter().map(|e| e.body.as_deref()).collect();
        assert_eq!(history, [Some("first"), Some("first, edited")]);
        assert_eq!(edits[1].id, revision[0].id);
        let closed = source.next_event().expect("event").expect("status");
        assert_eq!(closed.kind, RemoteEventKind::StatusChange { status: Status::Closed });
        assert_eq!(closed.id, close[0].id);
    }

    #[test]
    fn reopened_sink_never_reuses_ids() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("dump.jsonl");
        let mut sink = JsonlSink::open(&path, RemoteActor::new("marrow")).expect("open");
        let item = sink.create_item("Bug", "desc").expect("create");
        let mut seen = vec![sink.edit_body(&item, "v2").expect("edit")[0].id.clone()];
        seen.push(sink.set_status(&item, Status::Closed).expect("close")[0].id.clone());
        sink.finish().expect("finish");

        let mut sink = JsonlSink::open(&path, RemoteActor::new("marrow")).expect("reopen");
        let next = sink.set_status(&item, Status::Open).expect("reopen item");
        assert!(!seen.contains(&next[0].id), "{next:?} reuses one of {seen:?}");
    }

    #[test]
    fn since_sees_recorded_revisions() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("dump.jsonl");
        let mut sink = JsonlSink::open(&path, RemoteActor::new("marrow")).expect("open");
        let item = sink.create_item("Bug", "desc").expect("create");
        sink.finish().expect("finish");
        let checkpoint = Utc::now();

        let mut sink = JsonlSink::open(&path, RemoteActor::new("marrow")).expect("reopen");
        sink.edit_body(&item, "rewritten").expect("edit");
        sink.finish().expect("finish");

        let mut source = RecordSource::open_jsonl(&path, Some(checkpoint)).expect("source");
        assert!(source.next_item().expect("item").is_some());
    }

    #[test]
    fn since_misses_rewrites_without_edit_entries() {
        let mut rec = record("1", 10, None);
        if let RemoteEventKind::Comment { body, .. } = &mut rec.events[0].kind {
            *body = "rewritten by hand".into();
        }
        let mut source = RecordSource::new("mem", vec![rec], Some(at(40)));
        assert!(source.next_item().expect("item").is_none());
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("bad.jsonl");
        fs::write(&path, "{not json}\n").expect("write");
        let err = RecordSource::open_jsonl(&path, None).err().expect("must fail");
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
