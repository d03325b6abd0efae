//! Request orchestration.
//!
//! [`ImageService`] is the core's entry point: given an identifier, a
//! normalized operation list, and an output writer, it consults the
//! derivative cache, resolves and opens the source, detects the real format,
//! serves or populates the info cache, runs the pipeline, stores the result,
//! and streams it to the caller. Concurrent identical requests collapse into
//! one build by default.
//!
//! The service knows nothing about HTTP; identifiers arrive already decoded
//! and responses are plain byte streams.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{DerivativeCache, InfoCache};
use crate::config::Config;
use crate::delegate::{hooks, Delegate};
use crate::error::Error;
use crate::format::{sniff_format, Format};
use crate::image::ImageInfo;
use crate::io::BlockCachedReader;
use crate::ops::{Fingerprint, OperationList};
use crate::pipeline::PipelineExecutor;
use crate::reader::open_reader;
use crate::source::Source;

// =============================================================================
// Builder
// =============================================================================

/// Assembles an [`ImageService`] from its collaborators.
pub struct ImageServiceBuilder {
    config: Arc<Config>,
    sources: HashMap<&'static str, Arc<dyn Source>>,
    delegate: Option<Arc<dyn Delegate>>,
    derivative_cache: Option<Arc<DerivativeCache>>,
}

impl ImageServiceBuilder {
    /// Register a source provider under its name.
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.insert(source.name(), source);
        self
    }

    /// Attach the delegate used for scripted lookups and resolver selection.
    pub fn delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Attach a derivative cache.
    pub fn derivative_cache(mut self, cache: Arc<DerivativeCache>) -> Self {
        self.derivative_cache = Some(cache);
        self
    }

    /// Finish construction.
    pub fn build(self) -> ImageService {
        let info_capacity = self.config.info_cache_entries;
        ImageService {
            config: self.config,
            sources: self.sources,
            delegate: self.delegate,
            derivative_cache: self.derivative_cache,
            info_cache: InfoCache::new(info_capacity),
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

// =============================================================================
// ImageService
// =============================================================================

/// A finished build, shared between the leader and any waiters.
struct BuildState {
    notify: Notify,
    result: Mutex<Option<Result<(Bytes, Format), Error>>>,
}

/// The core image-delivery service.
pub struct ImageService {
    config: Arc<Config>,
    sources: HashMap<&'static str, Arc<dyn Source>>,
    delegate: Option<Arc<dyn Delegate>>,
    derivative_cache: Option<Arc<DerivativeCache>>,
    info_cache: InfoCache,
    in_flight: Mutex<HashMap<String, Arc<BuildState>>>,
}

impl ImageService {
    /// Start building a service over a config snapshot.
    pub fn builder(config: Arc<Config>) -> ImageServiceBuilder {
        ImageServiceBuilder {
            config,
            sources: HashMap::new(),
            delegate: None,
            derivative_cache: None,
        }
    }

    /// Produce a derivative and stream it to `output`.
    ///
    /// Returns the derivative's format. The request is bounded by the
    /// configured total timeout and can be cancelled via `cancel`; partial
    /// writes already flushed to `output` are the caller's responsibility.
    pub async fn handle<W>(
        &self,
        identifier: &str,
        ops: &OperationList,
        output: &mut W,
        cancel: CancellationToken,
    ) -> Result<Format, Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let budget = std::time::Duration::from_secs(self.config.request_timeout_secs);
        match timeout(budget, self.handle_inner(identifier, ops, output, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                stage: "request",
                seconds: self.config.request_timeout_secs,
            }),
        }
    }

    async fn handle_inner<W>(
        &self,
        identifier: &str,
        ops: &OperationList,
        output: &mut W,
        cancel: CancellationToken,
    ) -> Result<Format, Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let fingerprint = Fingerprint::compute(identifier, ops, &self.config);

        // The derivative cache answers before any source is touched.
        if let Some(cache) = &self.derivative_cache {
            if let Some(hit) = cache.get(&fingerprint).await {
                debug!(identifier, fingerprint = %fingerprint, "derivative cache hit");
                let payload = hit.read().await?;
                output
                    .write_all(&payload)
                    .await
                    .map_err(|e| Error::Internal(format!("response write: {}", e)))?;
                return Ok(hit.format);
            }
        }

        let (payload, format) = if self.config.single_flight {
            self.build_single_flight(identifier, ops, &fingerprint, cancel)
                .await?
        } else {
            self.build(identifier, ops, &fingerprint, cancel).await?
        };

        output
            .write_all(&payload)
            .await
            .map_err(|e| Error::Internal(format!("response write: {}", e)))?;
        Ok(format)
    }

    /// Collapse concurrent identical builds: one leader works, everyone else
    /// waits on its completion signal and shares the result.
    async fn build_single_flight(
        &self,
        identifier: &str,
        ops: &OperationList,
        fingerprint: &Fingerprint,
        cancel: CancellationToken,
    ) -> Result<(Bytes, Format), Error> {
        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(fingerprint.hex()) {
                    state.clone()
                } else {
                    let state = Arc::new(BuildState {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(fingerprint.hex().to_string(), state.clone());
                    drop(in_flight);

                    let result = self.build(identifier, ops, fingerprint, cancel).await;

                    {
                        let mut slot = state.result.lock().await;
                        *slot = Some(result.clone());
                    }
                    {
                        let mut in_flight = self.in_flight.lock().await;
                        in_flight.remove(fingerprint.hex());
                    }
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Register for the wakeup before checking the slot, so a leader
            // finishing in between cannot be missed.
            let mut notified = std::pin::pin!(state.notify.notified());
            notified.as_mut().enable();
            {
                let slot = state.result.lock().await;
                match &*slot {
                    // A cancelled leader helps no one; retry for leadership.
                    Some(Err(Error::Cancelled)) | None => {}
                    Some(result) => return result.clone(),
                }
            }
            notified.await;
            {
                let slot = state.result.lock().await;
                match &*slot {
                    Some(Err(Error::Cancelled)) | None => {}
                    Some(result) => return result.clone(),
                }
            }
        }
    }

    /// One full build: resolve, open, detect, decode, encode, cache.
    async fn build(
        &self,
        identifier: &str,
        ops: &OperationList,
        fingerprint: &Fingerprint,
        cancel: CancellationToken,
    ) -> Result<(Bytes, Format), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let source = self.select_source(identifier).await?;

        let open_budget = std::time::Duration::from_secs(self.config.open_timeout_secs);
        let handle = timeout(open_budget, source.open(identifier))
            .await
            .map_err(|_| Error::Timeout {
                stage: "source open",
                seconds: self.config.open_timeout_secs,
            })??;

        let raw = handle.into_range_reader().await?;
        let cached_reader: Arc<dyn crate::io::RangeReader> =
            Arc::new(BlockCachedReader::new(raw));

        // The bytes decide the format; an identifier's extension is only the
        // probe-time hint and may lie.
        let format = match sniff_format(cached_reader.as_ref()).await {
            Ok(format) => format,
            Err(_) => source.probe(identifier).await?,
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let reader = open_reader(format, cached_reader, identifier, &self.config).await?;
        self.info_cache
            .put(Arc::new(reader.info().clone()))
            .await;

        let executor = PipelineExecutor::new(&self.config);
        let built = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(identifier, "request cancelled during pipeline");
                return Err(Error::Cancelled);
            }
            result = executor.execute(reader.as_ref(), ops) => result?,
        };
        let (bytes, out_format) = built;

        // Cache only successful builds; failures leave no trace.
        if let Some(cache) = &self.derivative_cache {
            let mut staged = cache.put(fingerprint, out_format)?;
            staged.write_all(&bytes)?;
            cache.install(staged).await?;

            let cache = cache.clone();
            tokio::spawn(async move {
                cache.evict_over_cap().await;
            });
        }

        Ok((bytes, out_format))
    }

    /// Resolve which provider serves this identifier.
    async fn select_source(&self, identifier: &str) -> Result<Arc<dyn Source>, Error> {
        let name = if self.config.delegate_resolver {
            match &self.delegate {
                Some(delegate) => delegate
                    .call(hooks::GET_RESOLVER, identifier)
                    .await?
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| self.config.resolver.clone()),
                None => self.config.resolver.clone(),
            }
        } else {
            self.config.resolver.clone()
        };

        self.sources
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no source registered as '{}'", name)))
    }

    /// Source-image facts, served from the info cache when warm.
    pub async fn info(&self, identifier: &str) -> Result<Arc<ImageInfo>, Error> {
        if let Some(info) = self.info_cache.get(identifier).await {
            return Ok(info);
        }

        let source = self.select_source(identifier).await?;
        let handle = source.open(identifier).await?;
        let raw = handle.into_range_reader().await?;
        let cached_reader: Arc<dyn crate::io::RangeReader> =
            Arc::new(BlockCachedReader::new(raw));
        let format = match sniff_format(cached_reader.as_ref()).await {
            Ok(format) => format,
            Err(_) => source.probe(identifier).await?,
        };
        let reader = open_reader(format, cached_reader, identifier, &self.config).await?;

        let info = Arc::new(reader.info().clone());
        self.info_cache.put(info.clone()).await;
        Ok(info)
    }

    /// Purge both caches for one identifier.
    pub async fn purge(&self, identifier: &str) {
        self.info_cache.purge(identifier).await;
        if let Some(cache) = &self.derivative_cache {
            cache.purge_identifier_prefix(identifier).await;
        }
    }

    /// Purge everything from both caches.
    pub async fn purge_all(&self) {
        self.info_cache.purge_all().await;
        if let Some(cache) = &self.derivative_cache {
            cache.purge_all().await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
