use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// A type-erased producer error.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// An error returned directly to the caller of a fetch, before any work was done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request itself is malformed, for example an empty key.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// The reason a producer invocation did not yield a value.
///
/// One `LoadError` is shared by the initiator and every caller that coalesced onto the same
/// invocation, which is why it is cheaply clonable.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The producer returned an error.
    #[error("producer failed: {0}")]
    Producer(Arc<dyn Error + Send + Sync + 'static>),
    /// The producer panicked.
    ///
    /// The attached string contains the panic message, if it could be extracted.
    #[error("producer panicked: {0}")]
    Panicked(String),
    /// The caller running the producer went away before it completed.
    #[error("in-flight load was abandoned")]
    Abandoned,
}

impl LoadError {
    pub(crate) fn producer(err: impl Into<BoxError>) -> Self {
        Self::Producer(Arc::from(err.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        Self::Panicked(message)
    }

    /// Returns the producer's error, if that is what failed.
    pub fn producer_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Producer(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// A short name of the failure kind, used for metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::Producer(_) => "error",
            Self::Panicked(_) => "panic",
            Self::Abandoned => "abandoned",
        }
    }
}
