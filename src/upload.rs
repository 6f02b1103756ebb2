use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{error, info, warn};
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::Config;

lazy_static::lazy_static! {
    static ref UPLOAD_TOTAL: IntCounterVec = register_int_counter_vec!("sudea_upload_total", "finished uploads by outcome", &["outcome"]).unwrap();
    static ref OPEN_RETRIES: IntCounter = register_int_counter!("sudea_upload_open_retries", "file opens retried because the file was locked").unwrap();
}

/// Where the bytes of a freshly created image come from.
pub trait ImageSource {
    fn read(&self, path: &Path) -> impl Future<Output = io::Result<Vec<u8>>> + Send;
}

pub struct FsSource;

impl ImageSource for FsSource {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// True for open failures caused by another process still holding the file.
pub fn is_lock_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    {
        matches!(e.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

pub fn is_image_path(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|x| x.to_str()) else {
        return false;
    };
    extensions.iter().any(|x| x.eq_ignore_ascii_case(ext))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|x| x.to_str())
        .map(|x| x.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded { body: Value },
    Rejected { status: u16, body: String },
    Locked,
    Failed { reason: String },
}

impl UploadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Uploaded { .. } => "uploaded",
            UploadOutcome::Rejected { .. } => "rejected",
            UploadOutcome::Locked => "locked",
            UploadOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct UploadAttempt {
    pub path: PathBuf,
    pub attempts: u32,
    pub outcome: UploadOutcome,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.open_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct UploadClient {
    client: Client,
    url: Url,
    form_field: String,
    api_token: Option<String>,
}

impl UploadClient {
    pub fn new(url: Url, form_field: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            form_field: form_field.into(),
            api_token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.upload_url.clone(),
            config.form_field.clone(),
            config.api_token.clone(),
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends one multipart POST. Only HTTP 200 counts as success.
    pub async fn post(&self, path: &Path, bytes: Vec<u8>) -> Result<UploadOutcome, UploadError> {
        let file_name = path
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or("image")
            .to_string();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))?;
        let form = Form::new().part(self.form_field.clone(), part);

        let mut request = self.client.post(self.url.clone()).multipart(form);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Ok(UploadOutcome::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let body = match serde_json::from_str::<Value>(&body) {
            Ok(json) => json,
            Err(_) => Value::String(body),
        };
        Ok(UploadOutcome::Uploaded { body })
    }
}

/// Opens `path` through `source`, retrying only while the file is locked.
///
/// Makes at most `policy.attempts` opens with `policy.delay` between them.
/// Returns the number of opens made and either the bytes or the terminal
/// outcome.
pub async fn read_with_retry<S: ImageSource>(
    source: &S,
    path: &Path,
    policy: &RetryPolicy,
) -> (u32, Result<Vec<u8>, UploadOutcome>) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match source.read(path).await {
            Ok(bytes) => return (attempts, Ok(bytes)),
            Err(e) if is_lock_error(&e) => {
                warn!(
                    "{} is locked, retrying ({attempts}/{})",
                    path.display(),
                    policy.attempts
                );
                if attempts >= policy.attempts {
                    return (attempts, Err(UploadOutcome::Locked));
                }
                OPEN_RETRIES.inc();
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                return (
                    attempts,
                    Err(UploadOutcome::Failed {
                        reason: format!("failed to read file: {e}"),
                    }),
                );
            }
        }
    }
}

/// Reads `path` through `source` and uploads it once.
///
/// A rejected or failed POST is reported and never retried.
pub async fn upload_with_retry<S: ImageSource>(
    source: &S,
    client: &UploadClient,
    path: &Path,
    policy: &RetryPolicy,
) -> UploadAttempt {
    let (attempts, bytes) = read_with_retry(source, path, policy).await;
    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(outcome) => return finish(path, attempts, outcome),
    };

    let outcome = match client.post(path, bytes).await {
        Ok(outcome) => outcome,
        Err(e) => UploadOutcome::Failed {
            reason: format!("failed to send upload: {e}"),
        },
    };
    finish(path, attempts, outcome)
}

/// Console text for a successful upload: the server's response as pretty JSON.
pub fn report(outcome: &UploadOutcome) -> Option<String> {
    match outcome {
        UploadOutcome::Uploaded { body } => {
            Some(serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string()))
        }
        _ => None,
    }
}

fn finish(path: &Path, attempts: u32, outcome: UploadOutcome) -> UploadAttempt {
    UPLOAD_TOTAL.with_label_values(&[outcome.label()]).inc();
    match &outcome {
        UploadOutcome::Uploaded { body } => {
            info!("uploaded {}: {body}", path.display());
            if let Some(text) = report(&outcome) {
                println!("{text}");
            }
        }
        UploadOutcome::Rejected { status, body } => {
            error!(
                "failed to upload {}: HTTP status {status}:\n{body}",
                path.display()
            );
        }
        UploadOutcome::Locked => {
            error!(
                "could not access {} after {attempts} attempts, giving up",
                path.display()
            );
        }
        UploadOutcome::Failed { reason } => {
            error!("failed to upload {}: {reason}", path.display());
        }
    }
    UploadAttempt {
        path: path.to_path_buf(),
        attempts,
        outcome,
    }
}
