//! HTTP transport against the storage service.
//!
//! Wire contract:
//! - `POST /upload/chunk/direct?block_id&file_name&content_type[&version_id]`
//!   body = raw bytes, returns `{key, version_id, etag}`.
//! - `PUT /upload/manifest` body = manifest update, returns `{etag}`;
//!   409/412 on a stale expected etag.
//! - `GET /download/url?key=...` returns `{download_url}`; the URL serves
//!   the raw bytes.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::error::StorageError;
use crate::transport::{ManifestUpdate, StorageTransport, UploadReceipt};

/// reqwest-backed [`StorageTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
  http: reqwest::Client,
  base_url: Url,
}

#[derive(Debug, Deserialize)]
struct EtagResponse {
  etag: String,
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
  download_url: String,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self, StorageError> {
    Ok(Self {
      http: reqwest::Client::new(),
      base_url: Url::parse(base_url)?,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
    Ok(self.base_url.join(path)?)
  }

  async fn unexpected(context: &str, response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::UnexpectedStatus {
      status,
      context: context.to_string(),
      body,
    }
  }
}

#[async_trait]
impl StorageTransport for HttpTransport {
  async fn upload_direct(
    &self,
    block_id: &str,
    file_name: &str,
    content_type: &str,
    version_id: Option<&str>,
    body: Bytes,
  ) -> Result<UploadReceipt, StorageError> {
    let mut url = self.endpoint("upload/chunk/direct")?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("block_id", block_id);
      query.append_pair("file_name", file_name);
      query.append_pair("content_type", content_type);
      if let Some(version_id) = version_id {
        query.append_pair("version_id", version_id);
      }
    }

    let response = self
      .http
      .post(url)
      .header(reqwest::header::CONTENT_TYPE, content_type)
      .body(body)
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(Self::unexpected("upload/chunk/direct", response).await);
    }
    Ok(response.json().await?)
  }

  async fn update_manifest(&self, update: &ManifestUpdate) -> Result<String, StorageError> {
    let url = self.endpoint("upload/manifest")?;
    let response = self.http.put(url).json(update).send().await?;

    match response.status() {
      status if status.is_success() => {
        let body: EtagResponse = response.json().await?;
        Ok(body.etag)
      }
      StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(StorageError::Conflict {
        key: format!("{}/{}", update.block_id, update.version_id),
        expected_etag: update.expected_etag.clone(),
      }),
      _ => Err(Self::unexpected("upload/manifest", response).await),
    }
  }

  async fn get_manifest(
    &self,
    key: &str,
  ) -> Result<(crate::manifest::Manifest, String), StorageError> {
    let url = self.download_url(key).await?;
    let response = self.http.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(StorageError::NotFound(key.to_string()));
    }
    if !response.status().is_success() {
      return Err(Self::unexpected("manifest download", response).await);
    }

    let etag = response
      .headers()
      .get(reqwest::header::ETAG)
      .and_then(|value| value.to_str().ok())
      .map(|value| value.trim_matches('"').to_string())
      .unwrap_or_default();
    let manifest = serde_json::from_slice(&response.bytes().await?)?;
    Ok((manifest, etag))
  }

  async fn download_url(&self, key: &str) -> Result<String, StorageError> {
    let mut url = self.endpoint("download/url")?;
    url.query_pairs_mut().append_pair("key", key);

    let response = self.http.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(StorageError::NotFound(key.to_string()));
    }
    if !response.status().is_success() {
      return Err(Self::unexpected("download/url", response).await);
    }
    let body: DownloadUrlResponse = response.json().await?;
    Ok(body.download_url)
  }

  async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
    let url = self.download_url(key).await?;
    let response = self.http.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(StorageError::NotFound(key.to_string()));
    }
    if !response.status().is_success() {
      return Err(Self::unexpected("download", response).await);
    }
    Ok(response.bytes().await?)
  }
}
