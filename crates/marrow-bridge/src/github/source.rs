use chrono::{DateTime, Utc};
use marrow_core::model::Status;
use serde::Deserialize;
use tracing::debug;

use super::GITHUB_TARGET;
use super::client::{GitHubClient, HttpError, RepoSlug};
use crate::source::{RemoteActor, RemoteEvent, RemoteEventKind, RemoteItem, Source, SourceError};

#[derive(Debug, Clone, Deserialize)]
pub(super) struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl GitHubUser {
    fn actor(user: Option<&Self>) -> RemoteActor {
        user.map_or_else(RemoteActor::ghost, |u| RemoteActor {
            avatar_url: u.avatar_url.clone(),
            ..RemoteActor::new(&u.login)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<GitHubUser>,
    html_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubRename {
    to: String,
}

/// One entry of `/issues/{n}/timeline`. Fields vary by `event`.
#[derive(Debug, Clone, Deserialize)]
struct TimelineEntry {
    event: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    actor: Option<GitHubUser>,
    #[serde(default)]
    user: Option<GitHubUser>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    label: Option<GitHubLabel>,
    #[serde(default)]
    rename: Option<GitHubRename>,
}

impl TimelineEntry {
    /// `None` for entries without a stable id or timestamp (commits and
    /// cross references), which the model cannot place.
    fn into_event(self) -> Option<RemoteEvent> {
        let id = self
            .id
            .map(|id| id.to_string())
            .or_else(|| self.node_id.clone())?;
        let created_at = self.created_at?;
        let kind = match self.event.as_str() {
            "commented" => RemoteEventKind::Comment {
                body: self.body.unwrap_or_default(),
                url: self.html_url,
                edits: Vec::new(),
            },
            "closed" => RemoteEventKind::StatusChange {
                status: Status::Closed,
            },
            "reopened" => RemoteEventKind::StatusChange {
                status: Status::Open,
            },
            "labeled" | "unlabeled" => match self.label {
                Some(label) if self.event == "labeled" => RemoteEventKind::LabelAdd { label: label.name },
                Some(label) => RemoteEventKind::LabelRemove { label: label.name },
                None => RemoteEventKind::Unsupported { kind: self.event.clone() },
            },
            "renamed" => match self.rename {
                Some(rename) => RemoteEventKind::TitleChange { title: rename.to },
                None => RemoteEventKind::Unsupported { kind: self.event.clone() },
            },
            _ => RemoteEventKind::Unsupported { kind: self.event.clone() },
        };
        let actor = if matches!(kind, RemoteEventKind::Comment { .. }) {
            GitHubUser::actor(self.user.as_ref().or(self.actor.as_ref()))
        } else {
            GitHubUser::actor(self.actor.as_ref())
        };
        Some(RemoteEvent {
            id,
            actor,
            created_at,
            kind,
        })
    }
}

/// Timeline of issue `number` as model events, in timeline order.
pub(super) fn fetch_timeline(
    client: &GitHubClient,
    repo: &RepoSlug,
    number: &str,
) -> Result<Vec<RemoteEvent>, HttpError> {
    let url = client.repo_url(repo, &format!("/issues/{number}/timeline"));
    let entries: Vec<TimelineEntry> = client.get_paged(&url)?;
    let total = entries.len();
    let events: Vec<RemoteEvent> = entries
        .into_iter()
        .filter_map(TimelineEntry::into_event)
        .collect();
    debug!(
        issue = number,
        events = events.len(),
        skipped = total - events.len(),
        "fetched timeline"
    );
    Ok(events)
}

/// Issues of one repository, oldest first. Pull requests are skipped.
pub struct GitHubSource {
    client: GitHubClient,
    repo: RepoSlug,
    since: Option<DateTime<Utc>>,
    issues: Option<std::vec::IntoIter<GitHubIssue>>,
    events: std::vec::IntoIter<RemoteEvent>,
}

impl GitHubSource {
    #[must_use]
    pub fn new(client: GitHubClient, repo: RepoSlug, since: Option<DateTime<Utc>>) -> Self {
        Self {
            client,
            repo,
            since,
            issues: None,
            events: Vec::new().into_iter(),
        }
    }

    fn fetch_issues(&self) -> Result<Vec<GitHubIssue>, SourceError> {
        let mut url = self.client.repo_url(
            &self.repo,
            "/issues?state=all&sort=created&direction=asc",
        );
        if let Some(since) = self.since {
            url.push_str("&since=");
            url.push_str(&since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        }
        let issues: Vec<GitHubIssue> = self.client.get_paged(&url)?;
        let issues: Vec<GitHubIssue> = issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect();
        debug!(repo = %self.repo.full_name(), count = issues.len(), "fetched issues");
        Ok(issues)
    }

    fn fetch_events(&self, issue: &GitHubIssue) -> Result<Vec<RemoteEvent>, SourceError> {
        let timeline = fetch_timeline(&self.client, &self.repo, &issue.number.to_string())?;
        let mut events = Vec::with_capacity(timeline.len() + 1);
        events.push(RemoteEvent {
            id: issue.id.to_string(),
            actor: GitHubUser::actor(issue.user.as_ref()),
            created_at: issue.created_at,
            kind: RemoteEventKind::Comment {
                body: issue.body.clone().unwrap_or_default(),
                url: Some(issue.html_url.clone()),
                edits: Vec::new(),
            },
        });
        events.extend(timeline);
        Ok(events)
    }
}

impl Source for GitHubSource {
    fn target(&self) -> &str {
        GITHUB_TARGET
    }

    fn next_item(&mut self) -> Result<Option<RemoteItem>, SourceError> {
        if self.issues.is_none() {
            self.issues = Some(self.fetch_issues()?.into_iter());
        }
        let Some(issue) = self.issues.as_mut().and_then(Iterator::next) else {
            return Ok(None);
        };
        self.events = self.fetch_events(&issue)?.into_iter();
        Ok(Some(RemoteItem {
            id: issue.number.to_string(),
            url: issue.html_url,
            title: issue.title,
            author: GitHubUser::actor(issue.user.as_ref()),
            created_at: issue.created_at,
        }))
    }

    fn next_event(&mut self) -> Result<Option<RemoteEvent>, SourceError> {
        Ok(self.events.next())
    }
}
