//! Sample loading contract

use std::future::Future;
use std::pin::Pin;

use drumkit_core::SampleSource;
use thiserror::Error;

use crate::clock::SampleHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Failed to load sample '{name}': {reason}")]
    Sample { name: String, reason: String },
    #[error("Loader returned {got} handles for {expected} samples")]
    HandleCount { expected: usize, got: usize },
}

/// Future resolving to one handle per requested source, in order
pub type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<SampleHandle>, LoadError>> + Send + 'a>>;

/// Turns sample locators into playable handles
pub trait SampleLoader: Send + Sync {
    fn load<'a>(&'a self, sources: &'a [SampleSource]) -> LoadFuture<'a>;
}
