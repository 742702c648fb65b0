//! Cloud drive storage for plant photos.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::capture::CapturedImage;
use crate::config::DriveConfig;

const THUMBNAIL_BASE: &str = "https://lh3.googleusercontent.com/u/0/d";
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 2000;

/// File created by an upload. Only `id` is meaningful to us.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Upload failures that callers need to tell apart.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The bearer token was rejected (HTTP 401).
    #[error("access token rejected by drive")]
    Unauthorized,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a photo is uploaded; decides the file name prefix on the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// First photo of a newly registered plant
    NewPlant,
    /// Later photo of an existing plant
    Update,
}

impl UploadKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            UploadKind::NewPlant => "plant",
            UploadKind::Update => "update",
        }
    }
}

/// Object storage holding the photos referenced by plant records.
pub trait RemoteStore: Send + Sync {
    fn upload(
        &self,
        image: &CapturedImage,
        kind: UploadKind,
        access_token: &str,
    ) -> Result<RemoteFile, UploadError>;

    /// Remove a previously uploaded file.
    fn delete(&self, file_id: &str, access_token: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct FileMetadata<'a> {
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    parents: Vec<&'a str>,
}

/// Google Drive v3 client using the single-request multipart upload.
pub struct DriveClient {
    upload_endpoint: String,
    files_endpoint: String,
    folder_id: Option<String>,
    timeout: Duration,
}

impl DriveClient {
    pub fn from_config(config: &DriveConfig) -> Self {
        Self {
            upload_endpoint: config.upload_endpoint.clone(),
            files_endpoint: config.files_endpoint.clone(),
            folder_id: config.folder_id.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn metadata_for<'a>(
        &'a self,
        image: &'a CapturedImage,
        kind: UploadKind,
        millis: u128,
    ) -> FileMetadata<'a> {
        FileMetadata {
            name: upload_name(kind, &image.file_name, millis),
            mime_type: &image.mime_type,
            parents: self.folder_id.as_deref().into_iter().collect(),
        }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }
}

impl RemoteStore for DriveClient {
    fn upload(
        &self,
        image: &CapturedImage,
        kind: UploadKind,
        access_token: &str,
    ) -> Result<RemoteFile, UploadError> {
        let metadata = self.metadata_for(image, kind, unix_millis());
        let metadata_json = serde_json::to_vec(&metadata).map_err(anyhow::Error::from)?;

        let boundary = format!("plantcare-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata_json, &image.mime_type, &image.bytes);

        tracing::debug!(name = %metadata.name, bytes = image.size(), "Uploading photo to drive");

        let response = self
            .agent()
            .post(&self.upload_endpoint)
            .query("uploadType", "multipart")
            .query("fields", "id,name")
            .set("Authorization", &format!("Bearer {}", access_token))
            .set(
                "Content-Type",
                &format!("multipart/related; boundary={}", boundary),
            )
            .send_bytes(&body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(401, _)) => return Err(UploadError::Unauthorized),
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!("Drive upload returned HTTP {}: {}", code, detail.trim()).into());
            }
            Err(e) => return Err(anyhow!("Drive upload failed: {}", e).into()),
        };

        let file: RemoteFile = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse drive response: {}", e))?;

        if file.id.trim().is_empty() {
            return Err(anyhow!("Drive response did not contain a file id").into());
        }

        Ok(file)
    }

    fn delete(&self, file_id: &str, access_token: &str) -> Result<()> {
        if file_id.is_empty() {
            bail!("Refusing to delete a file without id");
        }
        let url = format!("{}/{}", self.files_endpoint, file_id);
        self.agent()
            .delete(&url)
            .set("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| anyhow!("Drive delete failed: {}", e))?;
        Ok(())
    }
}

/// Public thumbnail URL of a drive image, or an empty string without an id.
pub fn image_url(file_id: &str, size: u32) -> String {
    if file_id.is_empty() {
        return String::new();
    }
    format!("{}/{}=s{}", THUMBNAIL_BASE, file_id, size)
}

fn upload_name(kind: UploadKind, original: &str, millis: u128) -> String {
    format!("{}_{}_{}", kind.prefix(), millis, original)
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// `multipart/related` body: JSON metadata part followed by the media part.
fn multipart_related_body(boundary: &str, metadata: &[u8], mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server, folder: Option<&str>) -> DriveClient {
        DriveClient::from_config(&DriveConfig {
            upload_endpoint: format!("{}/upload/drive/v3/files", server.url()),
            files_endpoint: format!("{}/drive/v3/files", server.url()),
            folder_id: folder.map(|f| f.to_string()),
            timeout_secs: 5,
        })
    }

    fn sample_image() -> CapturedImage {
        CapturedImage::from_bytes("fern.png", crate::capture::tests::png_bytes(2, 2)).unwrap()
    }

    #[test]
    fn test_image_url() {
        assert_eq!(
            image_url("abc123", DEFAULT_THUMBNAIL_SIZE),
            "https://lh3.googleusercontent.com/u/0/d/abc123=s2000"
        );
        assert_eq!(image_url("abc123", 400), "https://lh3.googleusercontent.com/u/0/d/abc123=s400");
        assert_eq!(image_url("", 400), "");
    }

    #[test]
    fn test_upload_name() {
        assert_eq!(
            upload_name(UploadKind::NewPlant, "fern.png", 1700000000000),
            "plant_1700000000000_fern.png"
        );
        assert_eq!(
            upload_name(UploadKind::Update, "fern.png", 1700000000000),
            "update_1700000000000_fern.png"
        );
    }

    #[test]
    fn test_metadata_parents() {
        let server = mockito::Server::new();
        let image = sample_image();

        let json = serde_json::to_value(client(&server, Some("folder-1")).metadata_for(&image, UploadKind::NewPlant, 5)).unwrap();
        assert_eq!(json["name"], "plant_5_fern.png");
        assert_eq!(json["mimeType"], "image/png");
        assert_eq!(json["parents"], serde_json::json!(["folder-1"]));

        let json = serde_json::to_value(client(&server, None).metadata_for(&image, UploadKind::Update, 5)).unwrap();
        assert_eq!(json["name"], "update_5_fern.png");
        assert_eq!(json["parents"], serde_json::json!([]));
    }

    #[test]
    fn test_multipart_layout() {
        let body = multipart_related_body("b1", br#"{"name":"x"}"#, "image/png", b"PNGDATA");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b1\r\nContent-Type: application/json"));
        assert!(text.contains("{\"name\":\"x\"}\r\n--b1\r\nContent-Type: image/png\r\n\r\nPNGDATA"));
        assert!(text.ends_with("\r\n--b1--\r\n"));
    }

    #[test]
    fn test_upload_returns_file_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "multipart".into()))
            .match_header("authorization", "Bearer tok")
            .match_header("content-type", Matcher::Regex("^multipart/related; boundary=".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"abc123","name":"plant_1_fern.png"}"#)
            .create();

        let file = client(&server, Some("folder-1")).upload(&sample_image(), UploadKind::NewPlant, "tok").unwrap();
        mock.assert();
        assert_eq!(file.id, "abc123");
    }

    #[test]
    fn test_upload_unauthorized() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(401)
            .create();

        let err = client(&server, None).upload(&sample_image(), UploadKind::NewPlant, "stale").unwrap_err();
        assert!(matches!(err, UploadError::Unauthorized));
    }

    #[test]
    fn test_upload_server_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("backend unavailable")
            .create();

        let err = client(&server, None).upload(&sample_image(), UploadKind::NewPlant, "tok").unwrap_err();
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[test]
    fn test_upload_without_id_is_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"id":""}"#)
            .create();

        assert!(client(&server, None).upload(&sample_image(), UploadKind::NewPlant, "tok").is_err());
    }

    #[test]
    fn test_delete() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("DELETE", "/drive/v3/files/abc123")
            .match_header("authorization", "Bearer tok")
            .with_status(204)
            .create();

        client(&server, None).delete("abc123", "tok").unwrap();
        mock.assert();
        assert!(client(&server, None).delete("", "tok").is_err());
    }
}
