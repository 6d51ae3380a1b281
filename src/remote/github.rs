//! GitHub REST client

use super::{
    CommitSummary, EntryKind, RemoteError, RemoteFile, RemoteHost, RemoteResult, RepoMetadata,
    TreeEntry,
};
use crate::RepoId;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub const GITHUB_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("repoctx/", env!("CARGO_PKG_VERSION"));

/// Commits fetched per `commits_since` call.
const COMMIT_PAGE_SIZE: &str = "100";

/// GitHub-backed [`RemoteHost`].
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: GITHUB_API_URL.to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Build from `GITHUB_TOKEN`. An unset token means anonymous, rate-limited access.
    pub fn from_env() -> Self {
        let token = std::env::var("GITHUB_TOKEN").ok();
        if token.is_none() {
            warn!("GITHUB_TOKEN not set, using anonymous GitHub access");
        }
        Self::new(token)
    }

    /// Point at a GitHub Enterprise (or mock) API root.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn endpoint(&self, repo: &RepoId, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| RemoteError::Decode(format!("bad api url {}: {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Decode(format!("api url cannot be a base: {}", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> RemoteResult<T> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, url.path(), body));
        }

        resp.json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn contents(&self, repo: &RepoId, path: &str, reference: &str) -> RemoteResult<ContentsResponse> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(repo, &segments)?;
        url.query_pairs_mut().append_pair("ref", reference);

        let body: ContentsResponse = self.get_json(url).await?;
        if body.kind != "file" {
            return Err(RemoteError::Decode(format!("{} is a {}, not a file", path, body.kind)));
        }
        Ok(body)
    }
}

fn classify(status: StatusCode, path: &str, body: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED => RemoteError::Auth(body),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if body.contains("rate limit") => {
            RemoteError::RateLimited(body)
        }
        StatusCode::FORBIDDEN => RemoteError::Auth(body),
        _ => RemoteError::Http {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Decode a base64 contents payload. GitHub wraps the encoding at 60 columns.
fn decode_content(encoded: &str) -> RemoteResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Deserialize)]
struct RepoResponse {
    description: Option<String>,
    language: Option<String>,
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct BranchResponse {
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CommitListItem {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Deserialize)]
struct CommitFile {
    filename: String,
}

#[async_trait]
impl RemoteHost for GitHubClient {
    async fn repo_metadata(&self, repo: &RepoId) -> RemoteResult<RepoMetadata> {
        let body: RepoResponse = self.get_json(self.endpoint(repo, &[])?).await?;
        Ok(RepoMetadata {
            description: body.description,
            language: body.language,
            default_branch: body.default_branch,
        })
    }

    async fn head_revision(&self, repo: &RepoId, branch: &str) -> RemoteResult<String> {
        let body: BranchResponse = self
            .get_json(self.endpoint(repo, &["branches", branch])?)
            .await?;
        Ok(body.commit.sha)
    }

    async fn list_tree(&self, repo: &RepoId, reference: &str) -> RemoteResult<Vec<TreeEntry>> {
        let mut url = self.endpoint(repo, &["git", "trees", reference])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let body: TreeResponse = self.get_json(url).await?;
        if body.truncated {
            warn!("Tree listing for {} was truncated by GitHub", repo);
        }

        Ok(body
            .tree
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    "commit" => EntryKind::Commit,
                    _ => return None,
                };
                Some(TreeEntry {
                    path: item.path,
                    sha: item.sha,
                    kind,
                })
            })
            .collect())
    }

    async fn fetch_file(&self, repo: &RepoId, path: &str, reference: &str) -> RemoteResult<RemoteFile> {
        let body = self.contents(repo, path, reference).await?;
        let encoded = body
            .content
            .ok_or_else(|| RemoteError::Decode(format!("{} has no inline content", path)))?;
        Ok(RemoteFile {
            content: decode_content(&encoded)?,
            sha: body.sha,
        })
    }

    async fn file_content_id(&self, repo: &RepoId, path: &str, reference: &str) -> RemoteResult<String> {
        Ok(self.contents(repo, path, reference).await?.sha)
    }

    async fn commits_since(&self, repo: &RepoId, branch: &str, since: &str) -> RemoteResult<Vec<CommitSummary>> {
        let mut url = self.endpoint(repo, &["commits"])?;
        url.query_pairs_mut()
            .append_pair("sha", branch)
            .append_pair("per_page", COMMIT_PAGE_SIZE);

        let body: Vec<CommitListItem> = self.get_json(url).await?;
        Ok(body
            .into_iter()
            .take_while(|c| c.sha != since)
            .map(|c| CommitSummary {
                sha: c.sha,
                message: c.commit.message,
            })
            .collect())
    }

    async fn commit_files(&self, repo: &RepoId, sha: &str) -> RemoteResult<Vec<String>> {
        let body: CommitResponse = self.get_json(self.endpoint(repo, &["commits", sha])?).await?;
        Ok(body.files.into_iter().map(|f| f.filename).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wrapped_base64() {
        let encoded = "ZGVmIGZvbygpOiBw\nYXNzCg==\n";
        assert_eq!(decode_content(encoded).unwrap(), "def foo(): pass\n");
    }

    #[test]
    fn test_endpoint_encodes_path_segments() {
        let client = GitHubClient::new(None).with_api_url("https://ghe.example.com/api/v3/");
        let repo = RepoId::new("octo", "widgets");
        let url = client
            .endpoint(&repo, &["contents", "src", "my file.rs"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/octo/widgets/contents/src/my%20file.rs"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(classify(StatusCode::NOT_FOUND, "/x", String::new()).is_not_found());
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, "/x", "API rate limit exceeded".into()),
            RemoteError::RateLimited(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "/x", "Bad credentials".into()),
            RemoteError::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "/x", String::new()),
            RemoteError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn test_tree_response_parsing() {
        let body: TreeResponse = serde_json::from_str(
            r#"{"sha":"t","truncated":false,"tree":[
                {"path":"src","mode":"040000","type":"tree","sha":"d1"},
                {"path":"src/a.py","mode":"100644","type":"blob","sha":"f1","size":16}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.tree.len(), 2);
        assert_eq!(body.tree[1].kind, "blob");
    }
}
