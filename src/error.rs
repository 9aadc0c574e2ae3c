use std::path::PathBuf;

/// A boxed error returned from a wrapped computation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by key normalization, cache lookups and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unhashable type: {type_name:?} has neither a hash key nor a cache key")]
    Unhashable { type_name: String },

    #[error("{function}() {message}")]
    InvalidArguments { function: String, message: String },

    #[error("no cached value for {key}")]
    NotCached { key: String },

    #[error("corrupted cache entry {path:?}: the stored key does not match")]
    Corrupted { path: PathBuf },

    #[error("incompatible pickle: {message}")]
    IncompatiblePickle { message: String },

    #[error("no cached callable registered as {path:?}")]
    UnknownCallable { path: String },

    #[error("the instance of cached method {name:?} has been dropped")]
    InstanceDropped { name: String },

    #[error("expected {expected}, found {found}")]
    Type { expected: &'static str, found: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Compute(BoxError),
}

impl Error {
    /// Wrap an arbitrary error raised by a cached computation.
    pub fn compute(err: impl Into<BoxError>) -> Self {
        Self::Compute(err.into())
    }

    pub(crate) fn not_cached(key: &impl std::fmt::Debug) -> Self {
        Self::NotCached { key: format!("{key:?}") }
    }

    pub(crate) fn invalid_arguments(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.into(),
            message: message.into(),
        }
    }
}
