use std::cell::Cell;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::export::SinkError;
use crate::source::SourceError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
#[error("GitHub API request failed for {url}: {message}")]
pub struct HttpError {
    pub url: String,
    pub message: String,
}

impl From<HttpError> for SourceError {
    fn from(e: HttpError) -> Self {
        Self::Http {
            url: e.url,
            message: e.message,
        }
    }
}

impl From<HttpError> for SinkError {
    fn from(e: HttpError) -> Self {
        Self::Http {
            url: e.url,
            message: e.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(owner: &str, repo: &str) -> Result<Self, String> {
        let (owner, repo) = (owner.trim(), repo.trim());
        if owner.is_empty() || repo.is_empty() || owner.contains('/') || repo.contains('/') {
            return Err(format!("invalid repository '{owner}/{repo}': expected <owner>/<repo>"));
        }
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Minimal blocking REST client.
pub struct GitHubClient {
    agent: ureq::Agent,
    api_url: String,
    token: Option<String>,
    requests: Cell<usize>,
}

impl GitHubClient {
    #[must_use]
    pub fn new(api_url: Option<&str>, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            agent,
            api_url: api_url
                .unwrap_or(DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            token,
            requests: Cell::new(0),
        }
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.get()
    }

    /// `{api_url}/repos/{owner}/{repo}{path}`
    #[must_use]
    pub fn repo_url(&self, repo: &RepoSlug, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_url, repo.owner, repo.repo)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.requests.set(self.requests.get() + 1);
        let mut request = self
            .agent
            .request(method, url)
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", "marrow");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let response = self.request("GET", url).call().map_err(|e| http_error(url, &e))?;
        response.into_json::<T>().map_err(|e| HttpError {
            url: url.to_string(),
            message: format!("failed to decode response: {e}"),
        })
    }

    /// Fetch every page of a list endpoint.
    pub fn get_paged<T: DeserializeOwned>(&self, base: &str) -> Result<Vec<T>, HttpError> {
        let mut out = Vec::new();
        let mut page = 1_u32;
        loop {
            let url = paged_url(base, page);
            let batch: Vec<T> = self.get_json(&url)?;
            let raw_len = batch.len();
            out.extend(batch);
            if raw_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        debug!(url = base, count = out.len(), pages = page, "fetched list");
        Ok(out)
    }

    pub fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        let response = self
            .request(method, url)
            .send_json(body)
            .map_err(|e| http_error(url, &e))?;
        response.into_json::<T>().map_err(|e| HttpError {
            url: url.to_string(),
            message: format!("failed to decode response: {e}"),
        })
    }

    /// DELETE; a 404 counts as success.
    pub fn delete(&self, url: &str) -> Result<(), HttpError> {
        match self.request("DELETE", url).call() {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(http_error(url, &e)),
        }
    }
}

fn http_error(url: &str, err: &ureq::Error) -> HttpError {
    HttpError {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn paged_url(base: &str, page: u32) -> String {
    if base.contains('?') {
        format!("{base}&per_page={PAGE_SIZE}&page={page}")
    } else {
        format!("{base}?per_page={PAGE_SIZE}&page={page}")
    }
}

/// Percent-encode one path segment.
#[must_use]
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert_eq!(
            RepoSlug::new("octo", "hello").expect("valid").full_name(),
            "octo/hello"
        );
        assert!(RepoSlug::new("", "hello").is_err());
        assert!(RepoSlug::new("a/b", "c").is_err());
    }

    #[test]
    fn paged_url_appends_query_params() {
        assert_eq!(
            paged_url("https://api.github.com/x", 2),
            "https://api.github.com/x?per_page=100&page=2"
        );
        assert_eq!(
            paged_url("https://api.github.com/x?a=1", 3),
            "https://api.github.com/x?a=1&per_page=100&page=3"
        );
    }

    #[test]
    fn repo_url_respects_custom_api() {
        let client = GitHubClient::new(Some("https://ghe.example.test/api/v3/"), None);
        let repo = RepoSlug::new("o", "r").expect("valid");
        assert_eq!(
            client.repo_url(&repo, "/issues"),
            "https://ghe.example.test/api/v3/repos/o/r/issues"
        );
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn segment_encoding() {
        assert_eq!(encode_segment("good first issue"), "good%20first%20issue");
        assert_eq!(encode_segment("p1"), "p1");
    }
}
