//! HTTP(S) source provider.
//!
//! URLs are formed as prefix ⊕ identifier ⊕ suffix, or resolved through the
//! delegate's `get_url` hook. Basic auth and (for test environments) blanket
//! TLS trust are supported. Opened handles are range readers; origins that
//! do not advertise `Accept-Ranges: bytes` transparently fall back to
//! buffering through a temporary file.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::delegate::{hooks, resolve_required, Delegate};
use crate::error::Error;
use crate::format::{detect_format, Format, MAGIC_LEN};
use crate::io::{HttpCredentials, HttpRangeReader, RangeReader};

use super::{LookupStrategy, Source, SourceHandle};

/// HTTP(S)-backed implementation of [`Source`].
pub struct HttpSource {
    client: Client,
    prefix: String,
    suffix: String,
    credentials: Option<HttpCredentials>,
    lookup: LookupStrategy,
    delegate: Option<Arc<dyn Delegate>>,
}

impl HttpSource {
    /// Create a provider for the given URL affixes.
    ///
    /// `trust_all_certs` disables TLS verification; it exists for test
    /// fixtures with self-signed certificates.
    pub fn new(
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        credentials: Option<HttpCredentials>,
        trust_all_certs: bool,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .danger_accept_invalid_certs(trust_all_certs)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(Self {
            client,
            prefix: prefix.into(),
            suffix: suffix.into(),
            credentials,
            lookup: LookupStrategy::Basic,
            delegate: None,
        })
    }

    /// Resolve URLs through the delegate's `get_url` hook.
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.lookup = LookupStrategy::Script;
        self.delegate = Some(delegate);
        self
    }

    async fn resolve_url(&self, identifier: &str) -> Result<String, Error> {
        let url = match self.lookup {
            LookupStrategy::Script => {
                let delegate = self
                    .delegate
                    .as_ref()
                    .ok_or_else(|| Error::Internal("script lookup without a delegate".into()))?;
                resolve_required(delegate.as_ref(), hooks::GET_URL, identifier).await?
            }
            LookupStrategy::Basic => {
                format!("{}{}{}", self.prefix, identifier, self.suffix)
            }
        };

        Url::parse(&url)
            .map_err(|e| Error::InvalidRequest(format!("bad source URL '{}': {}", url, e)))?;
        Ok(url)
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn probe(&self, identifier: &str) -> Result<Format, Error> {
        // (a) extension
        if let Some(format) = Format::from_identifier(identifier) {
            return Ok(format);
        }

        let url = self.resolve_url(identifier).await?;
        let reader = HttpRangeReader::open(
            self.client.clone(),
            url.clone(),
            self.credentials.clone(),
        )
        .await
        .map_err(Error::from)?;

        // (b) leading bytes
        let len = (reader.size() as usize).min(MAGIC_LEN);
        if len > 0 {
            if let Ok(head) = reader.read_exact_at(0, len).await {
                if let Some(format) = detect_format(&head) {
                    return Ok(format);
                }
            }
        }

        // (c) origin's Content-Type
        let content_type =
            HttpRangeReader::head_content_type(&self.client, &url, self.credentials.as_ref())
                .await
                .map_err(Error::from)?;
        content_type
            .as_deref()
            .and_then(Format::from_media_type)
            .ok_or_else(|| {
                Error::UnsupportedSourceFormat(format!(
                    "{}: neither bytes nor Content-Type matched",
                    identifier
                ))
            })
    }

    async fn open(&self, identifier: &str) -> Result<SourceHandle, Error> {
        let url = self.resolve_url(identifier).await?;
        let reader = HttpRangeReader::open(self.client.clone(), url, self.credentials.clone())
            .await
            .map_err(Error::from)?;
        Ok(SourceHandle::Stream(Arc::new(reader)))
    }
}

// =============================================================================
// Tests
// =============================================================================
