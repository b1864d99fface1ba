use std::collections::HashSet;

use marrow_core::model::Status;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::GITHUB_TARGET;
use super::client::{GitHubClient, RepoSlug, encode_segment};
use super::source::fetch_timeline;
use crate::export::{RemoteRef, Sink, SinkError};
use crate::source::{RemoteEvent, RemoteEventKind};

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedComment {
    id: u64,
    html_url: String,
}

/// Writes issues, comments and their changes to one repository.
pub struct GitHubSink {
    client: GitHubClient,
    repo: RepoSlug,
}

impl GitHubSink {
    #[must_use]
    pub const fn new(client: GitHubClient, repo: RepoSlug) -> Self {
        Self { client, repo }
    }

    fn patch_issue(&self, item: &RemoteRef, body: &serde_json::Value) -> Result<(), SinkError> {
        let url = self.client.repo_url(&self.repo, &format!("/issues/{}", item.id));
        let _: serde_json::Value = self.client.send_json("PATCH", &url, body)?;
        Ok(())
    }

    /// Timeline events a write just produced, looked up by kind.
    fn produced_events(
        &self,
        item: &RemoteRef,
        expected: &[RemoteEventKind],
    ) -> Result<Vec<RemoteRef>, SinkError> {
        let timeline = fetch_timeline(&self.client, &self.repo, &item.id)?;
        Ok(match_produced(&timeline, expected, item))
    }
}

/// Newest unclaimed timeline event of each expected kind. A write that changed
/// nothing remotely may leave a kind unmatched.
fn match_produced(
    timeline: &[RemoteEvent],
    expected: &[RemoteEventKind],
    item: &RemoteRef,
) -> Vec<RemoteRef> {
    let mut claimed = HashSet::new();
    let mut refs = Vec::with_capacity(expected.len());
    for kind in expected {
        let found = timeline
            .iter()
            .rev()
            .find(|e| &e.kind == kind && !claimed.contains(e.id.as_str()));
        let Some(event) = found else {
            debug!(item = %item.id, ?kind, "no timeline event for exported change");
            continue;
        };
        claimed.insert(event.id.as_str());
        refs.push(RemoteRef {
            id: event.id.clone(),
            url: format!("{}#event-{}", item.url, event.id),
        });
    }
    refs
}

impl Sink for GitHubSink {
    fn target(&self) -> &str {
        GITHUB_TARGET
    }

    fn create_item(&mut self, title: &str, body: &str) -> Result<RemoteRef, SinkError> {
        let url = self.client.repo_url(&self.repo, "/issues");
        let created: CreatedIssue = self
            .client
            .send_json("POST", &url, &json!({ "title": title, "body": body }))?;
        debug!(repo = %self.repo.full_name(), number = created.number, "created issue");
        Ok(RemoteRef {
            id: created.number.to_string(),
            url: created.html_url,
        })
    }

    fn add_comment(&mut self, item: &RemoteRef, body: &str) -> Result<RemoteRef, SinkError> {
        let url = self
            .client
            .repo_url(&self.repo, &format!("/issues/{}/comments", item.id));
        let created: CreatedComment = self.client.send_json("POST", &url, &json!({ "body": body }))?;
        Ok(RemoteRef {
            id: created.id.to_string(),
            url: created.html_url,
        })
    }

    // REST keeps no edit history, so edits are matched by text on import.
    fn edit_body(&mut self, item: &RemoteRef, body: &str) -> Result<Vec<RemoteRef>, SinkError> {
        self.patch_issue(item, &json!({ "body": body }))?;
        Ok(Vec::new())
    }

    fn edit_comment(
        &mut self,
        _item: &RemoteRef,
        comment: &RemoteRef,
        body: &str,
    ) -> Result<Vec<RemoteRef>, SinkError> {
        let url = self
            .client
            .repo_url(&self.repo, &format!("/issues/comments/{}", comment.id));
        let _: serde_json::Value = self.client.send_json("PATCH", &url, &json!({ "body": body }))?;
        Ok(Vec::new())
    }

    fn set_status(&mut self, item: &RemoteRef, status: Status) -> Result<Vec<RemoteRef>, SinkError> {
        let state = match status {
            Status::Open => "open",
            Status::Closed => "closed",
        };
        self.patch_issue(item, &json!({ "state": state }))?;
        self.produced_events(item, &[RemoteEventKind::StatusChange { status }])
    }

    fn set_title(&mut self, item: &RemoteRef, title: &str) -> Result<Vec<RemoteRef>, SinkError> {
        self.patch_issue(item, &json!({ "title": title }))?;
        self.produced_events(
            item,
            &[RemoteEventKind::TitleChange {
                title: title.to_string(),
            }],
        )
    }

    fn change_labels(
        &mut self,
        item: &RemoteRef,
        added: &[String],
        removed: &[String],
    ) -> Result<Vec<RemoteRef>, SinkError> {
        if !added.is_empty() {
            let url = self
                .client
                .repo_url(&self.repo, &format!("/issues/{}/labels", item.id));
            let _: serde_json::Value = self
                .client
                .send_json("POST", &url, &json!({ "labels": added }))?;
        }
        for label in removed {
            let url = self.client.repo_url(
                &self.repo,
                &format!("/issues/{}/labels/{}", item.id, encode_segment(label)),
            );
            self.client.delete(&url)?;
        }
        let expected: Vec<RemoteEventKind> = added
            .iter()
            .map(|label| RemoteEventKind::LabelAdd { label: label.clone() })
            .chain(
                removed
                    .iter()
                    .map(|label| RemoteEventKind::LabelRemove { label: label.clone() }),
            )
            .collect();
        self.produced_events(item, &expected)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        debug!(requests = self.client.request_count(), "github export finished");
        Ok(())
    }
}
