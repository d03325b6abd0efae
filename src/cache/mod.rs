//! Caches: derivative payloads on disk, source-image facts in memory.

mod derivative;
mod info;

pub use derivative::{CachedDerivative, DerivativeCache, StagedDerivative};
pub use info::InfoCache;
