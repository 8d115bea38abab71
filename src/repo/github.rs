//! GitHub REST metadata and codeload archive download

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::{DownloadProgress, DownloadStage, MaterializeError, ProgressFn};
use crate::config::GithubSettings;

/// Minimum gap between two progress reports while streaming
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// The subset of `GET /repos/{owner}/{repo}` we use
#[derive(Debug, Clone, Deserialize)]
pub struct RepoMetadata {
    pub full_name: String,
    /// Repository size in KiB, as GitHub reports it
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepoMetadata {
    pub fn size_bytes(&self) -> u64 {
        self.size.saturating_mul(1024)
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

pub struct GithubApi {
    client: reqwest::Client,
    api_url: String,
    archive_url: String,
    token: Option<String>,
}

impl GithubApi {
    pub fn new(settings: &GithubSettings) -> Result<Self, MaterializeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MaterializeError::Download(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            archive_url: settings.archive_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("bugsweep"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    pub async fn fetch_metadata(&self, owner: &str, repo: &str) -> Result<RepoMetadata, MaterializeError> {
        let url = format!("{}/repos/{}/{}", self.api_url, owner, repo);
        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| MaterializeError::Download(format!("metadata request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MaterializeError::NotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text);
            return Err(MaterializeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<RepoMetadata>()
            .await
            .map_err(|e| MaterializeError::Download(format!("unreadable metadata: {e}")))
    }

    /// Stream the branch archive to `dest`, reporting progress along the way.
    ///
    /// Aborts as soon as more than `max_bytes` have arrived, since the
    /// metadata size is only an estimate.
    pub async fn download_archive(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        dest: &Path,
        max_bytes: u64,
        progress: &ProgressFn<'_>,
    ) -> Result<u64, MaterializeError> {
        let url = format!("{}/{}/{}/zip/refs/heads/{}", self.archive_url, owner, repo, branch);
        tracing::debug!("Downloading {}", url);

        let mut response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| MaterializeError::Download(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MaterializeError::NotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        }
        if !status.is_success() {
            return Err(MaterializeError::Download(format!(
                "archive request returned {}",
                status.as_u16()
            )));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let started = Instant::now();
        let mut last_report = started;
        let mut downloaded: u64 = 0;

        progress(DownloadProgress {
            total_bytes: total,
            ..DownloadProgress::stage(DownloadStage::Downloading)
        });

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MaterializeError::Download(e.to_string()))?
        {
            downloaded += chunk.len() as u64;
            if downloaded > max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(MaterializeError::RepositoryTooLarge {
                    size_bytes: downloaded,
                    limit_bytes: max_bytes,
                });
            }
            file.write_all(&chunk).await?;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                progress(transfer_snapshot(downloaded, total, started.elapsed()));
            }
        }
        file.flush().await?;

        progress(transfer_snapshot(downloaded, total.or(Some(downloaded)), started.elapsed()));
        tracing::info!(
            "Downloaded {}/{} archive ({} bytes in {:.1}s)",
            owner,
            repo,
            downloaded,
            started.elapsed().as_secs_f64()
        );
        Ok(downloaded)
    }
}

fn transfer_snapshot(downloaded: u64, total: Option<u64>, elapsed: Duration) -> DownloadProgress {
    let secs = elapsed.as_secs_f64();
    let bytes_per_sec = if secs > 0.0 { downloaded as f64 / secs } else { 0.0 };
    let eta_secs = match total {
        Some(total) if bytes_per_sec > 0.0 && total >= downloaded => {
            Some((total - downloaded) as f64 / bytes_per_sec)
        }
        _ => None,
    };
    DownloadProgress {
        stage: DownloadStage::Downloading,
        downloaded_bytes: downloaded,
        total_bytes: total,
        bytes_per_sec,
        eta_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let meta: RepoMetadata = serde_json::from_str(r#"{"full_name": "octo/hello"}"#).unwrap();
        assert_eq!(meta.default_branch, "main");
        assert_eq!(meta.size_bytes(), 0);
        assert!(meta.language.is_none());

        let meta: RepoMetadata = serde_json::from_str(
            r#"{"full_name": "octo/hello", "size": 2, "default_branch": "dev", "language": "Go"}"#,
        )
        .unwrap();
        assert_eq!(meta.size_bytes(), 2048);
        assert_eq!(meta.default_branch, "dev");
    }

    #[test]
    fn test_transfer_snapshot_eta() {
        let snap = transfer_snapshot(500, Some(1000), Duration::from_secs(1));
        assert_eq!(snap.bytes_per_sec, 500.0);
        assert_eq!(snap.eta_secs, Some(1.0));
        assert_eq!(snap.fraction(), Some(0.5));

        let unknown = transfer_snapshot(500, None, Duration::from_secs(1));
        assert!(unknown.eta_secs.is_none());
    }

    #[test]
    fn test_token_sets_authorization() {
        let settings = GithubSettings {
            token: Some("abc".into()),
            ..Default::default()
        };
        let api = GithubApi::new(&settings).unwrap();
        let headers = api.headers();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "bugsweep");
    }
}
