use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::EXPORT_MARKER_KEY;
use crate::model::hash::{EntityId, IdentityId};
use crate::model::{OpPayload, Snapshot, Status};

/// Lightweight summary of an entity, kept for every entity in the cache.
///
/// Listing and metadata resolution run against excerpts only, so they never
/// touch an entity lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityExcerpt {
    pub id: EntityId,
    pub title: String,
    pub status: Status,
    pub labels: Vec<String>,
    pub author: IdentityId,
    pub created_at: i64,
    pub edited_at: i64,
    pub comment_count: usize,
    pub create_metadata: BTreeMap<String, String>,
    /// Every `(key, value)` that identifies this entity remotely: create-op
    /// metadata plus metadata of export markers pointing at the create op.
    #[serde(skip)]
    external: BTreeSet<(String, String)>,
}

impl EntityExcerpt {
    #[must_use]
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let create_metadata = snap
            .operations
            .first()
            .map(|op| op.metadata().clone())
            .unwrap_or_default();

        let mut external: BTreeSet<(String, String)> = create_metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let root = snap.id.as_str();
        for op in &snap.operations {
            if matches!(op.payload(), OpPayload::NoOp(_))
                && op.get_metadata(EXPORT_MARKER_KEY) == Some(root)
            {
                external.extend(
                    op.metadata()
                        .iter()
                        .filter(|(k, _)| k.as_str() != EXPORT_MARKER_KEY)
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
        }

        Self {
            id: snap.id.clone(),
            title: snap.title.clone(),
            status: snap.status,
            labels: snap.labels.clone(),
            author: snap.author.clone(),
            created_at: snap.created_at,
            edited_at: snap.edited_at,
            comment_count: snap.comments.len(),
            create_metadata,
            external,
        }
    }

    /// True if this entity is known remotely under `key = value`.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.external
            .iter()
            .any(|(k, v)| k == key && v == value)
    }
}
