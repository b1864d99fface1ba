//! File-backed store.
//!
//! # Layout
//!
//! ```text
//! .marrow/
//!   config.toml
//!   identities.jsonl        # one identity per line
//!   entities/
//!     <entity id>.ops       # one operation per line, append-only
//!     <entity id>.ops.lock  # advisory lock for the log above
//!   bridges/<name>.toml     # sync watermarks
//! ```
//!
//! Every append writes the whole batch with a single `write_all` on an
//! `O_APPEND` handle under an exclusive advisory lock, then syncs. A crash
//! mid-write leaves at most one torn trailing line; readers ignore it and the
//! next writer truncates it before appending.

use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::{
    Store, StoreError, complete_lines, decode_identity, decode_operation, encode_identity,
    encode_operation,
};
use crate::identity::Identity;
use crate::lock::{DEFAULT_LOCK_TIMEOUT, ReadLock, WriteLock, lock_path_for};
use crate::model::hash::{ContentHash, EntityId};
use crate::model::Operation;

/// Directory name of a marrow repository inside a project.
pub const MARROW_DIR: &str = ".marrow";

const ENTITIES_DIR: &str = "entities";
const IDENTITIES_FILE: &str = "identities.jsonl";
const LOG_EXT: &str = "ops";

/// Durable store rooted at a `.marrow` directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    /// Create the directory layout under `dir` (idempotent) and open it.
    pub fn init(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(ENTITIES_DIR))?;
        let identities = dir.join(IDENTITIES_FILE);
        if !identities.exists() {
            fs::File::create(&identities)?;
        }
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Open an existing repository.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotInitialized`] if `dir` has no `entities/` directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.join(ENTITIES_DIR).is_dir() {
            return Err(StoreError::NotInitialized(dir));
        }
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The `.marrow` directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn entity_path(&self, id: &EntityId) -> PathBuf {
        self.dir
            .join(ENTITIES_DIR)
            .join(format!("{id}.{LOG_EXT}"))
    }

    fn identities_path(&self) -> PathBuf {
        self.dir.join(IDENTITIES_FILE)
    }

    fn append_lines(&self, path: &Path, lines: &str) -> Result<(), StoreError> {
        let _lock = WriteLock::acquire(&lock_path_for(path), self.lock_timeout)?;

        if let Some(dropped) = repair_torn_tail(path)? {
            warn!(path = %path.display(), bytes = dropped, "truncated torn trailing line");
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(lines.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<String, StoreError> {
        let _lock = ReadLock::acquire(&lock_path_for(path), self.lock_timeout)?;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };
        String::from_utf8(bytes).map_err(|e| {
            let valid = e.utf8_error().valid_up_to();
            let line = e.as_bytes()[..valid].iter().filter(|&&b| b == b'\n').count() + 1;
            StoreError::Corrupt {
                path: path.display().to_string(),
                line,
                reason: format!("invalid UTF-8 at byte {valid}"),
            }
        })
    }
}

impl Store for FileStore {
    fn append_operations(&self, entity: &EntityId, ops: &[Operation]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for op in ops {
            buf.push_str(&encode_operation(op)?);
        }
        self.append_lines(&self.entity_path(entity), &buf)?;
        debug!(entity = %entity.human(), count = ops.len(), "appended operations");
        Ok(())
    }

    fn read_log(&self, entity: &EntityId) -> Result<Vec<Operation>, StoreError> {
        let path = self.entity_path(entity);
        let content = self.read_file(&path)?;
        let origin = path.display().to_string();
        complete_lines(&content, &origin)
            .into_iter()
            .map(|(lineno, line)| decode_operation(line, &origin, lineno))
            .collect()
    }

    fn list_entities(&self) -> Result<Vec<EntityId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.dir.join(ENTITIES_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ContentHash::parse(stem) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unrecognised log file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn append_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.append_lines(&self.identities_path(), &encode_identity(identity)?)
    }

    fn read_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let path = self.identities_path();
        let content = self.read_file(&path)?;
        let origin = path.display().to_string();
        complete_lines(&content, &origin)
            .into_iter()
            .map(|(lineno, line)| decode_identity(line, &origin, lineno))
            .collect()
    }
}

/// Truncate bytes after the last newline. Returns the number of bytes removed.
fn repair_torn_tail(path: &Path) -> io::Result<Option<u64>> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let keep = content.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    if keep == content.len() {
        return Ok(None);
    }
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    Ok(Some((content.len() - keep) as u64))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;
    use crate::model::{AddCommentData, Entity, OpPayload};

    fn setup() -> (TempDir, FileStore) {
        let tmp = TempDir::new().expect("tempdir");
        let store = FileStore::init(tmp.path().join(MARROW_DIR)).expect("init");
        (tmp, store)
    }

    fn entity_with_comments(n: usize) -> Entity {
        let author = ContentHash::of_bytes(b"alice");
        let (mut entity, _) =
            Entity::create(author.clone(), 1, "t", "body", BTreeMap::new()).expect("create");
        for i in 0..n {
            entity
                .append(
                    author.clone(),
                    2,
                    OpPayload::AddComment(AddCommentData {
                        message: format!("comment number {i}"),
                    }),
                    BTreeMap::new(),
                )
                .expect("append");
        }
        entity
    }

    #[test]
    fn open_requires_init() {
        let tmp = TempDir::new().expect("tempdir");
        assert!(matches!(
            FileStore::open(tmp.path().join(MARROW_DIR)),
            Err(StoreError::NotInitialized(_))
        ));
        FileStore::init(tmp.path().join(MARROW_DIR)).expect("init");
        FileStore::init(tmp.path().join(MARROW_DIR)).expect("init twice");
        FileStore::open(tmp.path().join(MARROW_DIR)).expect("open");
    }

    #[test]
    fn append_and_read_back() {
        let (_tmp, store) = setup();
        let entity = entity_with_comments(2);
        store
            .append_operations(entity.id(), entity.operations())
            .expect("append");
        let log = store.read_log(entity.id()).expect("read");
        assert_eq!(log, entity.operations());
        assert_eq!(store.list_entities().expect("list"), vec![entity.id().clone()]);
    }

    #[test]
    fn unknown_entity_reads_empty() {
        let (_tmp, store) = setup();
        assert!(
            store
                .read_log(&ContentHash::of_bytes(b"nope"))
                .expect("read")
                .is_empty()
        );
    }

    #[test]
    fn torn_tail_ignored_then_repaired() {
        let (_tmp, store) = setup();
        let entity = entity_with_comments(2);
        let (head, tail) = entity.operations().split_at(2);
        store.append_operations(entity.id(), head).expect("append");

        let path = store.entity_path(entity.id());
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"deadbeef\t{\"trunc").expect("write torn");
        drop(file);

        assert_eq!(store.read_log(entity.id()).expect("read").len(), 2);

        store.append_operations(entity.id(), tail).expect("append after torn");
        let log = store.read_log(entity.id()).expect("read");
        assert_eq!(log, entity.operations());
    }

    #[test]
    fn edited_line_is_corrupt() {
        let (_tmp, store) = setup();
        let entity = entity_with_comments(1);
        store
            .append_operations(entity.id(), entity.operations())
            .expect("append");
        let path = store.entity_path(entity.id());
        let content = fs::read_to_string(&path).expect("read");
        fs::write(&path, content.replace("comment number 0", "comment number 9")).expect("write");
        assert!(matches!(
            store.read_log(entity.id()),
            Err(StoreError::Corrupt { line: 2, .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let (_tmp, store) = setup();
        let entity = entity_with_comments(1);
        store
            .append_operations(entity.id(), entity.operations())
            .expect("append");
        let path = store.entity_path(entity.id());
        let mut bytes = fs::read(&path).expect("read");
        let second = bytes.iter().position(|&b| b == b'\n').expect("newline") + 1;
        bytes[second + 3] = 0xFF;
        fs::write(&path, bytes).expect("write");

        let err = store.read_log(entity.id()).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }), "{err:?}");
        assert_eq!(err.code(), crate::error::ErrorCode::CorruptLog);
    }

    #[test]
    fn list_skips_foreign_files() {
        let (_tmp, store) = setup();
        let entity = entity_with_comments(0);
        store
            .append_operations(entity.id(), entity.operations())
            .expect("append");
        fs::write(store.dir().join(ENTITIES_DIR).join("notes.txt"), "x").expect("write");
        fs::write(store.dir().join(ENTITIES_DIR).join("zzz.ops"), "").expect("write");
        assert_eq!(store.list_entities().expect("list").len(), 1);
    }

    #[test]
    fn identities_persist() {
        let (_tmp, store) = setup();
        let ident = Identity::new(crate::identity::IdentityProfile::with_login("a")).expect("id");
        store.append_identity(&ident).expect("append");
        let reopened = FileStore::open(store.dir()).expect("open");
        assert_eq!(reopened.read_identities().expect("read"), vec![ident]);
    }
}
