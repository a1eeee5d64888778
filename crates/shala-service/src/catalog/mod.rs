//! A typed client for the catalog endpoints of the backend API.
//!
//! The catalog lists standards, subjects, chapters and the resources attached to chapters.
//! PDF resources carry the path that is passed to the [`PdfCache`](crate::caching::PdfCache).

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

mod types;

pub use self::types::*;

/// An error talking to the catalog endpoints.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to send request")]
    Request(#[from] reqwest::Error),
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("an auth token is required for this operation")]
    MissingAuthToken,
    #[error("invalid url")]
    InvalidUrl(#[from] url::ParseError),
    #[error("`{0}` is not a PDF file")]
    NotPdf(String),
}

impl CatalogError {
    /// Returns the HTTP status code, if the backend rejected the request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl CatalogClient {
    pub fn new(client: Client, base_url: Url, auth_token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            auth_token,
        }
    }

    /// Lists all standards with their subjects.
    pub async fn standards(&self) -> Result<Vec<Standard>, CatalogError> {
        self.get_json(&["standards"]).await
    }

    pub async fn standard(&self, id: &str) -> Result<Standard, CatalogError> {
        self.get_json(&["standards", id]).await
    }

    pub async fn subject(&self, id: &str) -> Result<Subject, CatalogError> {
        self.get_json(&["subjects", id]).await
    }

    pub async fn chapter(&self, id: &str) -> Result<Chapter, CatalogError> {
        self.get_json(&["chapters", id]).await
    }

    /// Lists the resources of a chapter, grouped by resource type.
    pub async fn chapter_resources(
        &self,
        chapter_id: &str,
    ) -> Result<GroupedResources, CatalogError> {
        self.get_json(&["chapter-resources", "chapter", chapter_id, "grouped"])
            .await
    }

    /// Uploads a PDF file through the admin endpoint.
    ///
    /// Requires an auth token. Files without a `.pdf` extension are rejected before anything is
    /// sent.
    pub async fn upload_pdf(
        &self,
        file_name: &str,
        contents: Bytes,
    ) -> Result<UploadedFile, CatalogError> {
        if !file_name.to_ascii_lowercase().ends_with(".pdf") {
            return Err(CatalogError::NotPdf(file_name.to_owned()));
        }
        let token = self
            .auth_token
            .as_deref()
            .ok_or(CatalogError::MissingAuthToken)?;

        let url = self.endpoint(&["upload", "pdf"])?;
        tracing::debug!(size = contents.len(), "Uploading `{}` to `{}`", file_name, url);

        let part = Part::stream(contents)
            .file_name(file_name.to_owned())
            .mime_str("application/pdf")?;
        let form = Form::new().part("pdf", part);

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Appends `segments` to the base URL, percent-encoding each of them.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, CatalogError> {
        let url = self.endpoint(segments)?;
        tracing::debug!("Fetching catalog data from `{}`", url);

        let mut request = self.client.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!("Unexpected status code from `{}`: {}", status, body);
    Err(CatalogError::Status {
        status: status.as_u16(),
        body,
    })
}
