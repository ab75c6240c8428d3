//! Where update manifests and payloads come from.

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("packwatch/", env!("CARGO_PKG_VERSION"));

/// Version document, both remote (`version.json`) and persisted locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    /// Monotonic unit version.
    pub version: u64,
}

/// Remote provider of the latest manifest and unit payload.
pub trait UpdateSource: Send + Sync {
    /// Fetches the remote manifest.
    fn fetch_manifest(&self) -> BoxFuture<'_, Result<Manifest>>;

    /// Fetches the payload. `Ok(None)` means the remote has no payload.
    fn fetch_payload(&self) -> BoxFuture<'_, Result<Option<Bytes>>>;
}

/// Rewrites a GitHub repository URL to its raw-content host.
#[must_use]
pub fn raw_repo_url(repo_url: &str) -> String {
    if repo_url.contains("www.github.com") {
        tracing::info!("rewriting {} to raw.githubusercontent.com", repo_url);
        repo_url.replacen("www.github.com", "raw.githubusercontent.com", 1)
    } else if repo_url.contains("github.com") {
        tracing::info!("rewriting {} to raw.githubusercontent.com", repo_url);
        repo_url.replacen("github.com", "raw.githubusercontent.com", 1)
    } else {
        repo_url.to_string()
    }
}

/// Update source backed by a raw-content HTTP host.
#[derive(Debug, Clone)]
pub struct HttpUpdateSource {
    client: reqwest::Client,
    manifest_url: String,
    payload_url: String,
}

impl HttpUpdateSource {
    /// Creates a source for `{repo}/main/version.json` and `{repo}/main/{filename}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(repo_url: &str, filename: &str) -> Result<Self> {
        let base = raw_repo_url(repo_url);
        let base = base.trim_end_matches('/');
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let source = Self {
            client,
            manifest_url: format!("{base}/main/version.json"),
            payload_url: format!("{base}/main/{filename}"),
        };
        tracing::info!("version url is {}", source.manifest_url);
        Ok(source)
    }

    /// URL of the remote manifest.
    #[must_use]
    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// URL of the payload.
    #[must_use]
    pub fn payload_url(&self) -> &str {
        &self.payload_url
    }

    async fn get_manifest(&self) -> Result<Manifest> {
        let response = self
            .client
            .get(&self.manifest_url)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                message: format!("manifest request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                message: format!("manifest request returned {status}"),
            });
        }

        let body = response.text().await.map_err(|e| Error::Fetch {
            message: format!("failed to read manifest: {e}"),
        })?;
        serde_json::from_str(&body).map_err(|e| Error::Fetch {
            message: format!("invalid manifest: {e}"),
        })
    }

    async fn get_payload(&self) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(&self.payload_url)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                message: format!("payload request failed: {e}"),
            })?;

        match response.status() {
            StatusCode::OK => {
                tracing::info!("fetched latest unit, status {}", StatusCode::OK);
                let payload = response.bytes().await.map_err(|e| Error::Fetch {
                    message: format!("failed to read payload: {e}"),
                })?;
                Ok(Some(payload))
            }
            StatusCode::NOT_FOUND => {
                tracing::info!("unit not found at {}", self.payload_url);
                Ok(None)
            }
            status => Err(Error::Fetch {
                message: format!("payload request returned {status}"),
            }),
        }
    }
}

impl UpdateSource for HttpUpdateSource {
    fn fetch_manifest(&self) -> BoxFuture<'_, Result<Manifest>> {
        Box::pin(self.get_manifest())
    }

    fn fetch_payload(&self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(self.get_payload())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::*;

    #[test]
    fn test_raw_repo_url_rewrites() {
        assert_eq!(
            raw_repo_url("https://www.github.com/acme/packs/"),
            "https://raw.githubusercontent.com/acme/packs/"
        );
        assert_eq!(
            raw_repo_url("https://github.com/acme/packs/"),
            "https://raw.githubusercontent.com/acme/packs/"
        );
        assert_eq!(
            raw_repo_url("https://raw.githubusercontent.com/acme/packs/"),
            "https://raw.githubusercontent.com/acme/packs/"
        );
        assert_eq!(raw_repo_url("http://10.0.0.2:8080"), "http://10.0.0.2:8080");
    }

    #[test]
    fn test_urls_are_joined_once() {
        let with_slash = HttpUpdateSource::new("http://host/repo/", "agent").unwrap();
        let without = HttpUpdateSource::new("http://host/repo", "agent").unwrap();
        assert_eq!(with_slash.manifest_url(), "http://host/repo/main/version.json");
        assert_eq!(without.manifest_url(), with_slash.manifest_url());
        assert_eq!(without.payload_url(), "http://host/repo/main/agent");
    }

    #[tokio::test]
    async fn test_fetch_manifest() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/main/version.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"version": 7}"#)
            .create_async()
            .await;

        let source = HttpUpdateSource::new(&server.url(), "agent").unwrap();
        let manifest = source.fetch_manifest().await.unwrap();
        assert_eq!(manifest, Manifest { version: 7 });

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_manifest_rejects_garbage() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/main/version.json")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let source = HttpUpdateSource::new(&server.url(), "agent").unwrap();
        let result = source.fetch_manifest().await;
        assert!(matches!(result, Err(Error::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_fetch_payload_statuses() {
        let mut server = Server::new_async().await;
        let found = server
            .mock("GET", "/main/agent")
            .with_status(200)
            .with_body("new unit")
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/main/absent")
            .with_status(404)
            .create_async()
            .await;
        let broken = server
            .mock("GET", "/main/broken")
            .with_status(500)
            .create_async()
            .await;

        let source = HttpUpdateSource::new(&server.url(), "agent").unwrap();
        let payload = source.fetch_payload().await.unwrap().unwrap();
        assert_eq!(&payload[..], b"new unit");

        let source = HttpUpdateSource::new(&server.url(), "absent").unwrap();
        assert!(source.fetch_payload().await.unwrap().is_none());

        let source = HttpUpdateSource::new(&server.url(), "broken").unwrap();
        assert!(matches!(
            source.fetch_payload().await,
            Err(Error::Fetch { .. })
        ));

        found.assert_async().await;
        missing.assert_async().await;
        broken.assert_async().await;
    }
}
