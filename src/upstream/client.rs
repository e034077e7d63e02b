//! Qwen chat HTTP client
//!
//! Three calls are made on behalf of a caller: downloading a remote image,
//! uploading a file to the chat service, and asking the chat model about an
//! uploaded file. All of them forward the caller's token and cookie.

use hyper::body::Bytes;
use reqwest::multipart::Part;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::{RelayError, Result};
use crate::logger;
use crate::recognition::{Credentials, FAILURE_TEXT};

/// File name used when the image did not arrive as a named upload
pub const DEFAULT_FILE_NAME: &str = "image.png";
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Image bytes plus the metadata sent in the multipart upload
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn png(data: impl Into<Bytes>) -> Self {
        Self::with_mime(data, DEFAULT_MIME_TYPE)
    }

    pub fn with_mime(data: impl Into<Bytes>, mime_type: &str) -> Self {
        Self {
            data: data.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            mime_type: mime_type.to_string(),
        }
    }
}

/// Successful answer of the file endpoint, kept verbatim for proxying
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl UploadResponse {
    /// Identifier of the stored file, if the service returned one
    ///
    /// Numeric ids are accepted and rendered as text; empty strings and zero
    /// count as missing.
    pub fn file_id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) if id.as_f64() != Some(0.0) => Some(id.to_string()),
            _ => None,
        }
    }
}

pub struct QwenClient {
    client: Client,
    files_url: String,
    completions_url: String,
    model: String,
}

impl QwenClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            files_url: config.files_url(),
            completions_url: config.completions_url(),
            model: config.model.clone(),
        })
    }

    /// Download an image the caller referenced by URL
    pub async fn fetch_image(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        logger::log_upstream_call("GET", url, status.as_u16());

        if !status.is_success() {
            return Err(RelayError::upstream(format!(
                "Failed to download image from URL: {}",
                reason(status)
            )));
        }
        Ok(response.bytes().await?)
    }

    /// Upload a file to the chat service
    ///
    /// `label` prefixes the error message, e.g. "File upload" or "Proxy upload".
    pub async fn upload_file(
        &self,
        credentials: &Credentials,
        payload: ImagePayload,
        label: &str,
    ) -> Result<UploadResponse> {
        let form = reqwest::multipart::Form::new().part("file", file_part(&payload)?);

        let response = self
            .client
            .post(&self.files_url)
            .header("accept", "application/json")
            .header("authorization", credentials.bearer())
            .header("cookie", credentials.cookie.as_str())
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success(response, &self.files_url, label).await?;

        let status = response.status();
        let body: Value = response.json().await?;
        Ok(UploadResponse { status, body })
    }

    /// Upload an image and return the identifier the chat model refers to
    pub async fn upload_image(
        &self,
        credentials: &Credentials,
        payload: ImagePayload,
    ) -> Result<String> {
        let upload = self.upload_file(credentials, payload, "File upload").await?;
        upload
            .file_id()
            .ok_or_else(|| RelayError::upstream("File upload failed: No ID received"))
    }

    /// Ask the chat model about an uploaded image
    ///
    /// Returns the model's raw answer, or [`FAILURE_TEXT`] when it gave none.
    pub async fn chat_completion(
        &self,
        credentials: &Credentials,
        prompt: &str,
        image_id: &str,
    ) -> Result<String> {
        let body = json!({
            "stream": false,
            "chat_type": "t2t",
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt, "chat_type": "t2t" },
                    { "type": "image", "image": image_id, "chat_type": "t2t" },
                ],
            }],
        });

        let response = self
            .client
            .post(&self.completions_url)
            .header("accept", "*/*")
            .header("authorization", credentials.bearer())
            .header("cookie", credentials.cookie.as_str())
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, &self.completions_url, "Qwen API request").await?;

        let answer: Value = response.json().await?;
        Ok(extract_content(&answer))
    }
}

/// `choices[0].message.content`, or the failure placeholder
fn extract_content(answer: &Value) -> String {
    answer
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .unwrap_or(FAILURE_TEXT)
        .to_string()
}

/// Multipart part for `payload`, sent as `image/png` when its type does not parse
fn file_part(payload: &ImagePayload) -> Result<Part> {
    let part = |mime: &str| {
        Part::bytes(payload.data.to_vec())
            .file_name(payload.file_name.clone())
            .mime_str(mime)
    };
    match part(&payload.mime_type) {
        Ok(part) => Ok(part),
        Err(_) => {
            logger::log_warning(&format!(
                "Unusable content type '{}', uploading as {DEFAULT_MIME_TYPE}",
                payload.mime_type
            ));
            part(DEFAULT_MIME_TYPE).map_err(RelayError::from)
        }
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

/// Log the call and turn a non-2xx answer into `"<label> failed: <reason> - <body>"`
async fn ensure_success(response: Response, url: &str, label: &str) -> Result<Response> {
    let status = response.status();
    logger::log_upstream_call("POST", url, status.as_u16());
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RelayError::upstream(format!(
        "{label} failed: {} - {body}",
        reason(status)
    )))
}
