//! TorrServer API client
//!
//! HTTP interface to the running streaming daemon: torrent listing,
//! add/drop/remove, per-file status, preload, settings and stream URLs.
//! API reference: https://github.com/YouROK/TorrServer

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{FileStatus, TorrentStatus};

/// Errors from daemon requests
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("TorrServer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Failed to read torrent file: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations a playback session needs from the daemon
///
/// Implemented by [`TorrServerClient`]; kept as a trait so sessions can be
/// driven against a scripted daemon.
#[async_trait]
pub trait StreamingApi: Send + Sync {
    /// Extended status of one torrent, including its file list
    async fn torrent_info(&self, hash: &str) -> Result<TorrentStatus, ApiError>;

    /// Buffering status of a single file
    async fn file_status(&self, hash: &str, file_id: u32) -> Result<FileStatus, ApiError>;

    /// Start prioritized download of a file; returns once the daemon answers
    async fn preload(&self, hash: &str, file_id: u32) -> Result<(), ApiError>;

    /// Stop active download, keep registration
    async fn drop_torrent(&self, hash: &str) -> Result<(), ApiError>;

    /// Unregister a torrent. `save_to_db` is forwarded to the daemon as is.
    async fn remove_torrent(&self, hash: &str, save_to_db: bool) -> Result<(), ApiError>;

    /// Deterministic URL the player streams from
    fn stream_url(&self, hash: &str, path: &str, file_id: u32) -> String;
}

/// Response of the add endpoints (only the hash matters)
#[derive(Debug, Deserialize)]
struct AddResponse {
    hash: String,
}

/// TorrServer HTTP client
#[derive(Clone)]
pub struct TorrServerClient {
    base_url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
}

impl TorrServerClient {
    /// Create a client for `host:port`
    pub fn new(host: &str, port: u16, ssl: bool) -> Self {
        let scheme = if ssl { "https" } else { "http" };
        Self::with_base_url(format!("{}://{}:{}", scheme, host, port))
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Use HTTP basic auth for every request
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Per-request timeout (30s by default)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    /// Base URL of the daemon
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// Send a request and fail on any status >= 400
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let body = self.send(builder).await?.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("JSON parse error: {}", e)))
    }

    /// POST an action to `/torrents`
    async fn torrents_action(&self, body: Value) -> Result<reqwest::Response, ApiError> {
        self.send(self.request(Method::POST, "/torrents").json(&body))
            .await
    }

    // =========================================================================
    // Server
    // =========================================================================

    /// Daemon version; doubles as the liveness probe
    pub async fn echo(&self) -> Result<String, ApiError> {
        let response = self.send(self.request(Method::GET, "/echo")).await?;
        Ok(response.text().await?)
    }

    /// Current daemon settings
    pub async fn settings(&self) -> Result<Value, ApiError> {
        self.send_json(
            self.request(Method::POST, "/settings")
                .json(&json!({"action": "get"})),
        )
        .await
    }

    /// Replace daemon settings
    pub async fn set_settings(&self, sets: &Value) -> Result<(), ApiError> {
        self.send(
            self.request(Method::POST, "/settings")
                .json(&json!({"action": "set", "sets": sets})),
        )
        .await?;
        Ok(())
    }

    // =========================================================================
    // Torrents
    // =========================================================================

    /// All registered torrents (file stats are not filled)
    pub async fn torrents(&self) -> Result<Vec<TorrentStatus>, ApiError> {
        self.send_json(
            self.request(Method::POST, "/torrents")
                .json(&json!({"action": "list"})),
        )
        .await
    }

    /// Summary of one torrent
    pub async fn torrent(&self, hash: &str) -> Result<TorrentStatus, ApiError> {
        self.send_json(
            self.request(Method::POST, "/torrents")
                .json(&json!({"action": "get", "hash": hash})),
        )
        .await
    }

    /// Register a magnet link, returns its info-hash
    pub async fn add_magnet(&self, link: &str, title: &str) -> Result<String, ApiError> {
        let body = self
            .torrents_action(json!({
                "action": "add",
                "link": link,
                "title": title,
                "poster": "",
                "data": "",
                "save_to_db": true,
            }))
            .await?
            .text()
            .await?;
        parse_hash(&body)
    }

    /// Upload a .torrent file from disk
    pub async fn add_torrent_file(&self, path: &Path) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.torrent".to_string());
        self.add_torrent_bytes(&name, bytes).await
    }

    /// Upload raw .torrent contents
    pub async fn add_torrent_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("save", "true")
            .text("title", name.to_string());
        let builder = self.request(Method::POST, "/torrent/upload").multipart(form);
        let body = self.send(builder).await?.text().await?;
        parse_hash(&body)
    }

    /// Register any link the daemon can stream (magnet, http .torrent, hash)
    pub async fn add_stream(&self, link: &str, title: &str) -> Result<String, ApiError> {
        let builder = self.request(Method::GET, "/stream").query(&[
            ("link", link),
            ("title", title),
            ("save", ""),
            ("stat", ""),
        ]);
        let body = self.send(builder).await?.text().await?;
        parse_hash(&body)
    }

    /// Contents of a (small) file, read through its stream URL
    pub async fn read_text(&self, hash: &str, path: &str, file_id: u32) -> Result<String, ApiError> {
        let url = self.stream_url(hash, path, file_id);
        let builder = self.client.get(url);
        let builder = match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        };
        Ok(self.send(builder).await?.text().await?)
    }
}

/// Fetch a .torrent from a third-party URL (no daemon credentials)
pub async fn download_torrent(url: &str) -> Result<Vec<u8>, ApiError> {
    let response = reqwest::get(url).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.bytes().await?.to_vec())
}

#[async_trait]
impl StreamingApi for TorrServerClient {
    async fn torrent_info(&self, hash: &str) -> Result<TorrentStatus, ApiError> {
        self.send_json(
            self.request(Method::GET, "/stream")
                .query(&[("link", hash), ("stat", "")]),
        )
        .await
    }

    async fn file_status(&self, hash: &str, file_id: u32) -> Result<FileStatus, ApiError> {
        let index = file_id.to_string();
        let status: TorrentStatus = self
            .send_json(self.request(Method::GET, "/stream").query(&[
                ("link", hash),
                ("index", index.as_str()),
                ("stat", ""),
            ]))
            .await?;
        Ok(FileStatus::from_torrent(&status, file_id))
    }

    async fn preload(&self, hash: &str, file_id: u32) -> Result<(), ApiError> {
        let index = file_id.to_string();
        debug!(hash, file_id, "Requesting preload");
        self.send(self.request(Method::GET, "/stream").query(&[
            ("link", hash),
            ("index", index.as_str()),
            ("preload", ""),
        ]))
        .await?;
        Ok(())
    }

    async fn drop_torrent(&self, hash: &str) -> Result<(), ApiError> {
        self.torrents_action(json!({"action": "drop", "hash": hash}))
            .await?;
        Ok(())
    }

    async fn remove_torrent(&self, hash: &str, save_to_db: bool) -> Result<(), ApiError> {
        self.torrents_action(json!({"action": "rem", "hash": hash, "save_to_db": save_to_db}))
            .await?;
        Ok(())
    }

    fn stream_url(&self, hash: &str, path: &str, file_id: u32) -> String {
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        format!(
            "{}/stream/{}?link={}&index={}&play",
            self.base_url,
            urlencoding::encode(name),
            hash,
            file_id
        )
    }
}

fn parse_hash(body: &str) -> Result<String, ApiError> {
    let added: AddResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidResponse(format!("JSON parse error: {}", e)))?;
    if added.hash.is_empty() {
        return Err(ApiError::InvalidResponse("empty torrent hash".to_string()));
    }
    Ok(added.hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_from_host() {
        let client = TorrServerClient::new("127.0.0.1", 8090, false);
        assert_eq!(client.base_url(), "http://127.0.0.1:8090");
        let client = TorrServerClient::new("nas.local", 443, true);
        assert_eq!(client.base_url(), "https://nas.local:443");
    }

    #[test]
    fn test_stream_url_encodes_file_name() {
        let client = TorrServerClient::with_base_url("http://localhost:8090/");
        let url = client.stream_url("abc123", "Season 1/Show S01E01.mkv", 3);
        assert_eq!(
            url,
            "http://localhost:8090/stream/Show%20S01E01.mkv?link=abc123&index=3&play"
        );
    }

    #[test]
    fn test_parse_hash_rejects_empty() {
        assert!(parse_hash(r#"{"hash":"abc"}"#).is_ok());
        assert!(parse_hash(r#"{"hash":""}"#).is_err());
        assert!(parse_hash("not json").is_err());
    }
}
