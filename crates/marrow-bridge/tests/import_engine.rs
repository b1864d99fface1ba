//! Import engine runs against in-memory stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use marrow_bridge::{
    ImportResult, RecordSource, RemoteActor, RemoteEdit, RemoteEvent, RemoteEventKind, RemoteItem,
    RemoteRecord, RunStats, Source, SourceError, SyncError, import_all,
};
use marrow_core::model::Status;
use marrow_core::store::Store;
use marrow_core::{ErrorCode, MemoryStore, RepoCache};
use tokio_util::sync::CancellationToken;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

fn event(id: &str, login: &str, secs: i64, kind: RemoteEventKind) -> RemoteEvent {
    RemoteEvent {
        id: id.to_string(),
        actor: RemoteActor::new(login),
        created_at: at(secs),
        kind,
    }
}

fn comment(body: &str) -> RemoteEventKind {
    RemoteEventKind::Comment {
        body: body.to_string(),
        url: None,
        edits: Vec::new(),
    }
}

fn record(id: &str, title: &str, body: &str, comments: &[(&str, &str)]) -> RemoteRecord {
    let mut events = vec![event(&format!("{id}-body"), "octo", 0, comment(body))];
    for (i, (cid, text)) in comments.iter().enumerate() {
        events.push(event(cid, "hubot", 10 + i as i64, comment(text)));
    }
    RemoteRecord {
        item: RemoteItem {
            id: id.to_string(),
            url: format!("https://tracker.test/items/{id}"),
            title: title.to_string(),
            author: RemoteActor::new("octo"),
            created_at: at(0),
        },
        events,
    }
}

fn setup() -> (Arc<MemoryStore>, Arc<RepoCache>) {
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(RepoCache::open(store.clone()).expect("open"));
    (store, repo)
}

async fn import(repo: &Arc<RepoCache>, source: Box<dyn Source>) -> Vec<ImportResult> {
    import_all(repo.clone(), source, CancellationToken::new(), 4)
        .collect()
        .await
}

async fn import_records(repo: &Arc<RepoCache>, records: Vec<RemoteRecord>) -> Vec<ImportResult> {
    import(repo, Box::new(RecordSource::new("jsonl", records, None))).await
}

fn stats(results: &[ImportResult]) -> RunStats {
    let mut stats = RunStats::default();
    for r in results {
        stats.tally_import(r);
    }
    stats
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn imports_item_with_comments() {
    let (store, repo) = setup();
    let results = import_records(
        &repo,
        vec![record("42", "Bug A", "desc", &[("c1", "first"), ("c2", "second")])],
    )
    .await;

    let s = stats(&results);
    assert_eq!(s.entities, 1);
    assert_eq!(s.comments, 2);
    assert_eq!(s.identities, 2);
    assert_eq!(s.errors, 0, "{results:?}");

    let ids = repo.entity_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.read_log(&ids[0]).expect("log").len(), 3);

    let snap = repo.snapshot(&ids[0]).expect("snapshot");
    assert_eq!(snap.title, "Bug A");
    assert_eq!(snap.comments[0].message, "desc");
    assert_eq!(snap.create_metadata("origin"), Some("jsonl"));
    assert_eq!(snap.create_metadata("jsonl-item-id"), Some("42"));
    assert_eq!(snap.create_metadata("jsonl-id"), None);
    assert_eq!(
        snap.create_metadata("jsonl-url"),
        Some("https://tracker.test/items/42")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_changes_nothing() {
    let (store, repo) = setup();
    let records = vec![record("42", "Bug A", "desc", &[("c1", "first"), ("c2", "second")])];
    import_records(&repo, records.clone()).await;
    let appends = store.append_calls();

    let again = import_records(&repo, records).await;
    assert_eq!(again.len(), 3);
    assert!(again.iter().all(ImportResult::is_nothing), "{again:?}");
    assert_eq!(store.append_calls(), appends);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_remote_comment_is_the_only_change() {
    let (store, repo) = setup();
    import_records(
        &repo,
        vec![record("42", "Bug A", "desc", &[("c1", "first"), ("c2", "second")])],
    )
    .await;

    let results = import_records(
        &repo,
        vec![record(
            "42",
            "Bug A",
            "desc",
            &[("c1", "first"), ("c2", "second"), ("c3", "third")],
        )],
    )
    .await;
    let s = stats(&results);
    assert_eq!(s.comments, 1);
    assert_eq!(s.nothing, 3);
    assert_eq!(s.changes(), 1);

    let id = &repo.entity_ids()[0];
    assert_eq!(store.read_log(id).expect("log").len(), 4);
}

/// Cancels the run once the first item's events are exhausted.
struct CancelAfterFirst {
    inner: RecordSource,
    token: CancellationToken,
    items: usize,
}

impl Source for CancelAfterFirst {
    fn target(&self) -> &str {
        self.inner.target()
    }

    fn next_item(&mut self) -> Result<Option<RemoteItem>, SourceError> {
        self.items += 1;
        self.inner.next_item()
    }

    fn next_event(&mut self) -> Result<Option<RemoteEvent>, SourceError> {
        let event = self.inner.next_event()?;
        if event.is_none() && self.items == 1 {
            self.token.cancel();
        }
        Ok(event)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn comment_sharing_the_item_id_is_imported() {
    let (_store, repo) = setup();
    let records = vec![record("1", "Bug", "desc", &[("1", "first comment")])];

    let results = import_records(&repo, records.clone()).await;
    let s = stats(&results);
    assert_eq!(s.comments, 1, "{results:?}");
    assert_eq!(s.edits, 0, "{results:?}");

    let snap = repo.snapshot(&repo.entity_ids()[0]).expect("snapshot");
    let messages: Vec<&str> = snap.comments.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(messages, ["desc", "first comment"]);

    let again = stats(&import_records(&repo, records).await);
    assert_eq!(again.changes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_create_one_entity_per_item() {
    let (store, repo) = setup();
    let records: Vec<RemoteRecord> = (0..40)
        .map(|i| record(&i.to_string(), "item", "body", &[("c", "hello")]))
        .collect();

    let (first, second) = tokio::join!(
        import_records(&repo, records.clone()),
        import_records(&repo, records.clone())
    );
    assert!(!first.iter().chain(&second).any(ImportResult::is_error));
    assert_eq!(stats(&first).entities + stats(&second).entities, 40);
    assert_eq!(repo.entity_ids().len(), 40);
    assert_eq!(store.list_entities().expect("list").len(), 40);

    let again = import_records(&repo, records).await;
    assert!(again.iter().all(ImportResult::is_nothing), "{again:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_keeps_committed_items_only() {
    let (store, repo) = setup();
    let token = CancellationToken::new();
    let source = CancelAfterFirst {
        inner: RecordSource::new(
            "jsonl",
            vec![
                record("1", "one", "a", &[]),
                record("2", "two", "b", &[]),
                record("3", "three", "c", &[]),
            ],
            None,
        ),
        token: token.clone(),
        items: 0,
    };

    let results = import_all(repo.clone(), Box::new(source), token, 4)
        .collect()
        .await;
    match results.last() {
        Some(ImportResult::Error {
            error: SyncError::Cancelled,
            ..
        }) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(results.iter().filter(|r| r.is_error()).count(), 1);
    assert_eq!(repo.entity_ids().len(), 1);
    assert_eq!(store.list_entities().expect("list").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn item_without_events_is_a_fetch_failure() {
    let (_store, repo) = setup();
    let mut empty = record("9", "empty", "", &[]);
    empty.events.clear();

    let results = import_records(&repo, vec![record("1", "ok", "fine", &[]), empty]).await;
    let Some(ImportResult::Error { error, context }) = results.last() else {
        panic!("expected an error, got {results:?}");
    };
    assert_eq!(error.code(), ErrorCode::RemoteFetchFailure);
    assert_eq!(context, "https://tracker.test/items/9");
    assert_eq!(repo.entity_ids().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_label_title_and_unsupported_events() {
    let (_store, repo) = setup();
    let mut rec = record("5", "Old title", "desc", &[]);
    rec.events.extend([
        event("l1", "octo", 1, RemoteEventKind::LabelAdd { label: "bug".into() }),
        event("l2", "octo", 2, RemoteEventKind::LabelAdd { label: "ui".into() }),
        event("l3", "octo", 3, RemoteEventKind::LabelRemove { label: "ui".into() }),
        event("t1", "octo", 4, RemoteEventKind::TitleChange { title: "New title".into() }),
        event("s1", "octo", 5, RemoteEventKind::StatusChange { status: Status::Closed }),
        event("x1", "octo", 6, RemoteEventKind::Unsupported { kind: "assigned".into() }),
    ]);

    let results = import_records(&repo, vec![rec.clone()]).await;
    let s = stats(&results);
    assert_eq!(s.label_changes, 3);
    assert_eq!(s.title_changes, 1);
    assert_eq!(s.status_changes, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        ImportResult::Nothing { reason, .. } if reason.contains("unsupported event assigned")
    )));

    let snap = repo.snapshot(&repo.entity_ids()[0]).expect("snapshot");
    assert_eq!(snap.labels, vec!["bug".to_string()]);
    assert_eq!(snap.title, "New title");
    assert_eq!(snap.status, Status::Closed);

    let again = stats(&import_records(&repo, vec![rec]).await);
    assert_eq!(again.changes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_history_is_replayed_once() {
    let (_store, repo) = setup();
    let revision = |id: &str, secs: i64, body: Option<&str>| RemoteEdit {
        id: id.to_string(),
        editor: RemoteActor::new("editor"),
        created_at: at(secs),
        body: body.map(str::to_string),
    };
    let mut rec = record("7", "Edited", "v3", &[]);
    rec.events[0].kind = RemoteEventKind::Comment {
        body: "v3".into(),
        url: None,
        edits: vec![
            revision("r0", 0, Some("v1")),
            revision("r1", 5, Some("v2")),
            revision("r2", 6, None),
            revision("r3", 7, Some("v3")),
        ],
    };

    let results = import_records(&repo, vec![rec.clone()]).await;
    let s = stats(&results);
    assert_eq!(s.edits, 2);
    assert!(results.iter().any(|r| matches!(
        r,
        ImportResult::Nothing { reason, .. } if reason.contains("deletion")
    )));
    let id = repo.entity_ids()[0].clone();
    let snap = repo.snapshot(&id).expect("snapshot");
    assert_eq!(snap.comments[0].message, "v3");

    let again = stats(&import_records(&repo, vec![rec]).await);
    assert_eq!(again.changes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn changed_text_without_history_becomes_one_edit() {
    let (store, repo) = setup();
    import_records(&repo, vec![record("8", "T", "desc", &[("c1", "typo")])]).await;

    let results =
        import_records(&repo, vec![record("8", "T", "desc", &[("c1", "fixed")])]).await;
    let s = stats(&results);
    assert_eq!(s.edits, 1);
    assert_eq!(s.comments, 0);

    let id = repo.entity_ids()[0].clone();
    let snap = repo.snapshot(&id).expect("snapshot");
    assert_eq!(snap.comments[1].message, "fixed");
    let log = store.read_log(&id).expect("log");
    let edit = log.last().expect("edit op");
    assert_eq!(edit.timestamp(), at(10).timestamp());

    let again = stats(&import_records(&repo, vec![record("8", "T", "desc", &[("c1", "fixed")])]).await);
    assert_eq!(again.changes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_failure_aborts_and_rolls_back() {
    let (store, repo) = setup();
    import_records(&repo, vec![record("1", "one", "a", &[])]).await;
    store.fail_appends(true);

    let results = import_records(
        &repo,
        vec![record("1", "one", "a", &[]), record("2", "two", "b", &[])],
    )
    .await;
    let Some(ImportResult::Error { error, .. }) = results.last() else {
        panic!("expected an error, got {results:?}");
    };
    assert!(matches!(error, SyncError::Commit { .. }), "{error:?}");
    assert_eq!(error.code(), ErrorCode::StorageFailure);
    assert_eq!(repo.entity_ids().len(), 1);
}

/// Counts items handed out.
struct Counting {
    inner: RecordSource,
    served: Arc<AtomicUsize>,
}

impl Source for Counting {
    fn target(&self) -> &str {
        self.inner.target()
    }

    fn next_item(&mut self) -> Result<Option<RemoteItem>, SourceError> {
        self.served.fetch_add(1, Ordering::SeqCst);
        self.inner.next_item()
    }

    fn next_event(&mut self) -> Result<Option<RemoteEvent>, SourceError> {
        self.inner.next_event()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_stream_stops_the_run() {
    let (_store, repo) = setup();
    let records: Vec<RemoteRecord> = (0..50)
        .map(|i| record(&i.to_string(), "item", "body", &[]))
        .collect();
    let served = Arc::new(AtomicUsize::new(0));
    let source = Counting {
        inner: RecordSource::new("jsonl", records, None),
        served: served.clone(),
    };

    let mut stream = import_all(repo.clone(), Box::new(source), CancellationToken::new(), 1);
    assert!(stream.next().await.is_some());
    drop(stream);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(served.load(Ordering::SeqCst) < 50);
}
