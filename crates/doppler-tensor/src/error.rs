use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("cannot broadcast shapes {a:?} and {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("q4k tensor has packed (flat) layout; fused matmul requires row-wise layout")]
    LayoutMismatch,
    #[error("no GPU adapter satisfied the requested limits")]
    NoSuitableAdapter,
    #[error("GPU device lost: {0}")]
    DeviceLost(String),
    #[error("GPU allocation of {requested} bytes failed (ceiling {ceiling} bytes)")]
    AllocationFailed { requested: usize, ceiling: usize },
    #[error("uniform struct field order mismatch for kernel '{kernel}': {detail}")]
    UniformLayout { kernel: String, detail: String },
    #[error("bind group layout for kernel '{kernel}' omits binding {binding}")]
    BindGroupLayout { kernel: String, binding: u32 },
    #[error("debug readback attempted while recorder '{0}' still holds undispatched work")]
    RecorderNotFlushed(String),
    #[error("attention tier mismatch: shape (T={t}, D={d}) requires '{expected}' but got '{got}'")]
    AttentionTierMismatch {
        t: usize,
        d: usize,
        expected: String,
        got: String,
    },
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
