use crate::config::CdnConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;

/// Bounded to 1920x1080, automatic quality, automatic delivery format.
pub const UPLOAD_TRANSFORMATION: &str = "c_limit,h_1080,w_1920/q_auto:eco/f_auto";
pub const UPLOAD_FORMAT: &str = "webp";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Hosts one source image and returns its public URL.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(
        &self,
        serial_number: &str,
        source_url: &str,
        index: usize,
    ) -> Result<String, UploadError>;
}

#[derive(Debug, Clone)]
pub struct CloudinaryUploader {
    config: CdnConfig,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryUploader {
    pub fn new(config: CdnConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.config.cloud_name
        )
    }

    /// Parameters covered by the signature, for one image of one record.
    fn signed_params(
        &self,
        serial_number: &str,
        index: usize,
        timestamp: i64,
    ) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("folder", format!("{}/{}", self.config.folder, serial_number)),
            ("format", UPLOAD_FORMAT.to_string()),
            ("overwrite", "true".to_string()),
            ("public_id", format!("image_{index}")),
            ("timestamp", timestamp.to_string()),
            ("transformation", UPLOAD_TRANSFORMATION.to_string()),
        ])
    }
}

/// `k=v` pairs sorted by key, joined with `&`, followed by the secret, SHA-256
/// hex encoded.
pub fn sign_params(params: &BTreeMap<&'static str, String>, api_secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[async_trait]
impl ImageUploader for CloudinaryUploader {
    async fn upload(
        &self,
        serial_number: &str,
        source_url: &str,
        index: usize,
    ) -> Result<String, UploadError> {
        let params = self.signed_params(serial_number, index, Utc::now().timestamp());
        let signature = sign_params(&params, &self.config.api_secret);

        let mut form: Vec<(&str, String)> = params.into_iter().collect();
        form.push(("file", source_url.to_string()));
        form.push(("api_key", self.config.api_key.clone()));
        form.push(("signature", signature));

        let response = self
            .http
            .post(self.endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(UploadError::Rejected(message));
        }

        let payload: UploadResponse = response
            .json()
            .await
            .map_err(|err| UploadError::Deserialize(err.to_string()))?;
        Ok(payload.secure_url)
    }
}
