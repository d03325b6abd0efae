//! User-supplied lookup callbacks.
//!
//! A delegate resolves opaque identifiers into backing-store locators:
//! filesystem paths, URLs, object keys, or a provider name. The core depends
//! only on this narrow callable surface — a scripting runtime, a compiled
//! policy object, or a test closure all satisfy it equally.
//!
//! Delegate runtimes are frequently thread-unsafe, so all calls are funneled
//! through a single-permit gate by [`SerializedDelegate`]. No cache or
//! registry lock is ever held across an invocation; callers resolve first,
//! lock after.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::Error;

/// Hook names the core invokes.
pub mod hooks {
    /// Filesystem provider path lookup.
    pub const GET_PATHNAME: &str = "get_pathname";

    /// HTTP provider URL lookup.
    pub const GET_URL: &str = "get_url";

    /// Object-store key lookup (S3-compatible stores).
    pub const GET_S3_OBJECT_KEY: &str = "get_s3_object_key";

    /// Object-store key lookup (Azure-compatible stores).
    pub const GET_AZURE_BLOB_KEY: &str = "get_azure_blob_key";

    /// Provider selection per request.
    pub const GET_RESOLVER: &str = "get_resolver";
}

/// The callback interface.
///
/// Each hook receives the request identifier and returns a locator string,
/// or `None` when the identifier does not resolve — which the core renders
/// as `NotFound`. Failures inside the delegate surface as `Internal`.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn call(&self, hook: &str, identifier: &str) -> Result<Option<String>, Error>;
}

/// Serializes all delegate calls through one permit.
pub struct SerializedDelegate {
    inner: Arc<dyn Delegate>,
    gate: Semaphore,
}

impl SerializedDelegate {
    /// Wrap a delegate so at most one call runs at a time.
    pub fn new(inner: Arc<dyn Delegate>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(1),
        }
    }
}

#[async_trait]
impl Delegate for SerializedDelegate {
    async fn call(&self, hook: &str, identifier: &str) -> Result<Option<String>, Error> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::Internal("delegate gate closed".into()))?;
        self.inner.call(hook, identifier).await
    }
}

/// Invoke a hook, rendering an empty return as `NotFound`.
pub async fn resolve_required(
    delegate: &dyn Delegate,
    hook: &str,
    identifier: &str,
) -> Result<String, Error> {
    match delegate.call(hook, identifier).await? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::NotFound(format!(
            "{}: {} returned nothing",
            identifier, hook
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================
