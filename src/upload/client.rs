use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::config::UploadConfig;
use crate::upload::types::display_name;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Network error during upload: {0}")]
    Network(#[source] reqwest::Error),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response (status {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    #[error("Upload failed - no URL in response")]
    MissingUrl { status: u16 },
}

impl UploadError {
    /// HTTP status of the response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Rejected { status, .. }
            | UploadError::MalformedResponse { status, .. }
            | UploadError::MissingUrl { status } => Some(*status),
            UploadError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Connection refused, timeouts and other transport failures.
    pub fn is_network(&self) -> bool {
        matches!(self, UploadError::Network(_))
    }
}

/// Body of a successful `POST /upload`. Fields other than `url` are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UploadResponse {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// The URL, ignoring empty strings.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }
}

/// Uploads one file, blocking the calling thread until the server answers.
pub trait UploadClient: Send + Sync {
    fn upload(&self, path: &Path) -> Result<UploadResponse, UploadError>;

    /// Reported as `service_name` in success events.
    fn service_name(&self) -> &str;
}

/// Multipart uploader for the self-hosted file server.
///
/// Requests run on the given tokio runtime; [`UploadClient::upload`] blocks
/// on them, so it must be called from a thread outside that runtime (the
/// coordinator's worker thread).
pub struct HttpUploadClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    service_name: String,
    upload_timeout: Duration,
    health_timeout: Duration,
    runtime: Handle,
}

impl HttpUploadClient {
    pub fn new(config: &UploadConfig, runtime: Handle) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("photo2url/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(UploadError::Client)?;

        Ok(Self {
            http,
            base_url: crate::config::normalize_base_url(&config.api_base_url),
            api_key: config.api_key.clone(),
            service_name: config.service_name.clone(),
            upload_timeout: config.upload_timeout(),
            health_timeout: config.health_timeout(),
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    pub async fn upload_async(&self, path: &Path) -> Result<UploadResponse, UploadError> {
        if !path.is_file() {
            return Err(UploadError::FileNotFound(path.to_path_buf()));
        }

        let filename = display_name(path);
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let part = Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(content_type_for(path))
            .map_err(UploadError::Client)?;
        let form = Form::new().part("file", part).text("filename", filename);

        let response = self
            .authorize(self.http.post(self.endpoint("upload")))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::Network)?;

        if status != StatusCode::OK {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: UploadResponse =
            serde_json::from_str(&body).map_err(|e| UploadError::MalformedResponse {
                status: status.as_u16(),
                message: e.to_string(),
            })?;

        if parsed.url().is_none() {
            return Err(UploadError::MissingUrl {
                status: status.as_u16(),
            });
        }

        Ok(parsed)
    }

    /// `GET {base}/health`, returning the server's JSON status document.
    pub async fn health_check_async(&self) -> Result<serde_json::Value, UploadError> {
        self.get_json("health", "Health check failed").await
    }

    pub fn health_check(&self) -> Result<serde_json::Value, UploadError> {
        self.runtime.block_on(self.health_check_async())
    }

    /// `GET {base}/admin/files`: every file the server currently holds.
    pub async fn list_files_async(&self) -> Result<Vec<serde_json::Value>, UploadError> {
        let listing = self.get_json("admin/files", "Failed to get files").await?;
        let files = match listing {
            serde_json::Value::Array(files) => Some(files),
            // {"files": [...]} 형태도 허용
            serde_json::Value::Object(mut map) => match map.remove("files") {
                Some(serde_json::Value::Array(files)) => Some(files),
                _ => None,
            },
            _ => None,
        };
        files.ok_or_else(|| UploadError::MalformedResponse {
            status: StatusCode::OK.as_u16(),
            message: "expected a list of files".to_string(),
        })
    }

    pub fn list_files(&self) -> Result<Vec<serde_json::Value>, UploadError> {
        self.runtime.block_on(self.list_files_async())
    }

    /// `DELETE {base}/admin/files/{id}`
    pub async fn delete_file_async(&self, file_id: &str) -> Result<(), UploadError> {
        let response = self
            .authorize(self.http.delete(self.endpoint(&format!("admin/files/{file_id}"))))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(UploadError::Network)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message: format!("Failed to delete file {}: {}", file_id, status.as_u16()),
            });
        }
        Ok(())
    }

    pub fn delete_file(&self, file_id: &str) -> Result<(), UploadError> {
        self.runtime.block_on(self.delete_file_async(file_id))
    }

    /// `GET {base}/admin/stats`
    pub async fn server_stats_async(&self) -> Result<serde_json::Value, UploadError> {
        self.get_json("admin/stats", "Failed to get statistics").await
    }

    pub fn server_stats(&self) -> Result<serde_json::Value, UploadError> {
        self.runtime.block_on(self.server_stats_async())
    }

    async fn get_json(&self, path: &str, failure: &str) -> Result<serde_json::Value, UploadError> {
        let response = self
            .authorize(self.http.get(self.endpoint(path)))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(UploadError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::Network)?;

        if status != StatusCode::OK {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message: format!("{}: {}", failure, status.as_u16()),
            });
        }

        serde_json::from_str(&body).map_err(|e| UploadError::MalformedResponse {
            status: status.as_u16(),
            message: e.to_string(),
        })
    }
}

impl UploadClient for HttpUploadClient {
    fn upload(&self, path: &Path) -> Result<UploadResponse, UploadError> {
        let result = self.runtime.block_on(self.upload_async(path));

        if let Err(e) = &result {
            if e.is_network() {
                log::warn!("Upload of {} failed at network level: {}", path.display(), e);
            } else {
                log::error!(
                    "Upload of {} rejected (status {:?}): {}",
                    path.display(),
                    e.status(),
                    e
                );
            }
        }

        result
    }

    fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Picks the failure reason out of an error body (`detail` or `error`).
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["detail", "error"]
                .iter()
                .find_map(|key| json.get(*key).cloned())
        });

    match detail {
        Some(serde_json::Value::String(message)) => message,
        Some(serde_json::Value::Null) | None => {
            format!("Upload failed with status {}", status.as_u16())
        }
        Some(other) => other.to_string(),
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tiff" | "tif" => "image/tiff",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mkv" => "video/x-matroska",
        "m4v" => "video/x-m4v",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "wma" => "audio/x-ms-wma",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        "7z" => "application/x-7z-compressed",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tempfile::TempDir;

    fn client_for(server: &mockito::Server, runtime: &tokio::runtime::Runtime) -> HttpUploadClient {
        let config = UploadConfig {
            api_base_url: server.url(),
            api_key: "secret".to_string(),
            ..UploadConfig::default()
        };
        HttpUploadClient::new(&config, runtime.handle().clone()).unwrap()
    }

    fn write_shot(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("shot1.png");
        std::fs::write(&path, b"fake png bytes").unwrap();
        path
    }

    #[test]
    fn test_upload_success() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", Matcher::Regex("multipart/form-data".to_string()))
            .match_body(Matcher::Regex(r#"name="file"; filename="shot1.png""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"url": "http://x/y", "id": "abc"}"#)
            .create();

        let dir = TempDir::new().unwrap();
        let client = client_for(&server, &runtime);
        let response = client.upload(&write_shot(&dir)).unwrap();

        mock.assert();
        assert_eq!(response.url(), Some("http://x/y"));
        assert_eq!(response.extra.get("id"), Some(&serde_json::json!("abc")));
        assert_eq!(client.service_name(), "Custom Server");
    }

    #[test]
    fn test_upload_missing_url_is_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/upload")
            .with_status(200)
            .with_body("{}")
            .create();

        let dir = TempDir::new().unwrap();
        let err = client_for(&server, &runtime)
            .upload(&write_shot(&dir))
            .unwrap_err();

        assert!(matches!(err, UploadError::MissingUrl { status: 200 }));
        assert_eq!(err.to_string(), "Upload failed - no URL in response");
    }

    #[test]
    fn test_upload_rejected_uses_detail() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/upload")
            .with_status(401)
            .with_body(r#"{"detail": "Invalid API key"}"#)
            .create();

        let dir = TempDir::new().unwrap();
        let err = client_for(&server, &runtime)
            .upload(&write_shot(&dir))
            .unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert!(!err.is_network());
        assert_eq!(err.to_string(), "Invalid API key");
    }

    #[test]
    fn test_upload_rejected_without_body() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/upload")
            .with_status(500)
            .with_body("Internal Server Error")
            .create();

        let dir = TempDir::new().unwrap();
        let err = client_for(&server, &runtime)
            .upload(&write_shot(&dir))
            .unwrap_err();

        assert_eq!(err.to_string(), "Upload failed with status 500");
    }

    #[test]
    fn test_upload_malformed_body() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/upload")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create();

        let dir = TempDir::new().unwrap();
        let err = client_for(&server, &runtime)
            .upload(&write_shot(&dir))
            .unwrap_err();

        assert!(matches!(err, UploadError::MalformedResponse { status: 200, .. }));
    }

    #[test]
    fn test_upload_missing_file() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = mockito::Server::new();
        let dir = TempDir::new().unwrap();

        let err = client_for(&server, &runtime)
            .upload(&dir.path().join("gone.png"))
            .unwrap_err();

        assert!(matches!(err, UploadError::FileNotFound(_)));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_connection_refused_is_network_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        // 열려 있지 않은 포트
        let config = UploadConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            ..UploadConfig::default()
        };
        let client = HttpUploadClient::new(&config, runtime.handle().clone()).unwrap();
        let dir = TempDir::new().unwrap();

        let err = client.upload(&write_shot(&dir)).unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_health_check() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "healthy"}"#)
            .create();

        let health = client_for(&server, &runtime).health_check().unwrap();
        assert_eq!(health["status"], "healthy");
    }

    #[test]
    fn test_health_check_failure() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/health").with_status(503).create();

        let err = client_for(&server, &runtime).health_check().unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "Health check failed: 503");
    }

    #[test]
    fn test_list_files() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/admin/files")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"[{"id": "abc", "filename": "shot1.png"}, {"id": "def"}]"#)
            .create();

        let files = client_for(&server, &runtime).list_files().unwrap();

        mock.assert();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["id"], "abc");
    }

    #[test]
    fn test_list_files_wrapped_and_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _wrapped = server
            .mock("GET", "/admin/files")
            .with_status(200)
            .with_body(r#"{"files": [{"id": "abc"}]}"#)
            .create();

        let client = client_for(&server, &runtime);
        assert_eq!(client.list_files().unwrap().len(), 1);

        let mut server = mockito::Server::new();
        let _denied = server.mock("GET", "/admin/files").with_status(403).create();
        let err = client_for(&server, &runtime).list_files().unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "Failed to get files: 403");
    }

    #[test]
    fn test_delete_file() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let deleted = server
            .mock("DELETE", "/admin/files/abc")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"message": "deleted"}"#)
            .create();
        let _missing = server
            .mock("DELETE", "/admin/files/nope")
            .with_status(404)
            .create();

        let client = client_for(&server, &runtime);
        client.delete_file("abc").unwrap();
        deleted.assert();

        let err = client.delete_file("nope").unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "Failed to delete file nope: 404");
    }

    #[test]
    fn test_server_stats() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut server = mockito::Server::new();
        let _ok = server
            .mock("GET", "/admin/stats")
            .with_status(200)
            .with_body(r#"{"total_files": 12, "total_size": 4096}"#)
            .create();

        let stats = client_for(&server, &runtime).server_stats().unwrap();
        assert_eq!(stats["total_files"], 12);

        let mut server = mockito::Server::new();
        let _err = server.mock("GET", "/admin/stats").with_status(500).create();
        let err = client_for(&server, &runtime).server_stats().unwrap_err();
        assert_eq!(err.to_string(), "Failed to get statistics: 500");
    }

    #[test]
    fn test_error_message_extraction() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(status, r#"{"error": "too big"}"#), "too big");
        assert_eq!(
            error_message(status, r#"{"detail": [{"msg": "field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
        assert_eq!(error_message(status, ""), "Upload failed with status 400");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
