use thiserror::Error;

/// Error taxonomy for the weight loader, tensor catalog, and transformer
/// layer driver . `LayoutMismatch` on a hot-path weight, a
/// manifest arithmetic failure, and `AllocationFailed` beyond the probed
/// heap ceiling are fatal: the engine never serves a partially loaded
/// model. A `packed_q4k` classification without `allow_packed_fallback`
/// surfaces as `LayoutMismatch` too, rather than silently routing through
/// dequant-on-load.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    #[error("shard missing: {0}")]
    ShardMissing(String),
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),
    #[error("allocation failed: {0}")]
    AllocationFailed(String),
    #[error("tensor not found in catalog: {0}")]
    TensorNotFound(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("tensor error: {0}")]
    Tensor(#[from] doppler_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
