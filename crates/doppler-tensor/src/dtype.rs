use std::fmt;

/// Supported element types for tensor storage, on host or on device.
///
/// `Q4K` is always row-wise addressable (144 bytes per 256-element block,
/// see [`Q4K_BLOCK_ELEMENTS`] / [`Q4K_BLOCK_BYTES`]); tensors loaded from a
/// legacy flat-packed layout are dequantized on load and carry `F16` instead
/// (see `doppler_model::loader`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// 16-bit brain float.
    Bf16,
    /// 8-bit signed integer, per-tensor or per-block scale applied by the caller.
    I8,
    /// 4-bit row-wise block quantization, 256 elements/block, 144 bytes/block.
    Q4K,
    /// GGML-style Q4_0: 32 elements/block, 18 bytes/block (scale + nibbles).
    Q4_0,
    /// GGML-style Q4_1: 32 elements/block, 20 bytes/block (scale + min + nibbles).
    Q4_1,
}

/// Elements per Q4K quantization block.
pub const Q4K_BLOCK_ELEMENTS: usize = 256;
/// Bytes per Q4K quantization block (see `doppler_tensor::cpu::quant` for the layout).
pub const Q4K_BLOCK_BYTES: usize = 144;

impl DType {
    /// Returns the size in bytes of a single element for non-quantized types,
    /// or the block size in bytes for quantized types.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::Bf16 => 2,
            DType::I8 => 1,
            DType::Q4K => Q4K_BLOCK_BYTES,
            DType::Q4_0 => 18,
            DType::Q4_1 => 20,
        }
    }

    /// Returns the number of elements per quantization block, or 1 for
    /// non-quantized types.
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 | DType::Bf16 | DType::I8 => 1,
            DType::Q4K => Q4K_BLOCK_ELEMENTS,
            DType::Q4_0 | DType::Q4_1 => 32,
        }
    }

    /// Returns true if this dtype is a block-quantized format.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q4K | DType::Q4_0 | DType::Q4_1)
    }

    /// Computes the byte size of `numel` contiguous elements of this dtype,
    /// rounding block-quantized types up to a whole number of blocks.
    pub fn data_size(&self, numel: usize) -> usize {
        let n_blocks = numel.div_ceil(self.block_size());
        n_blocks * self.size_in_bytes()
    }

    /// Computes the byte size of a row-major 2D tensor of this dtype with
    /// `rows` rows of `cols` elements each, assuming row-wise block
    /// addressing: each row starts a fresh run of blocks.
    pub fn row_major_2d_size(&self, rows: usize, cols: usize) -> usize {
        rows * cols.div_ceil(self.block_size()) * self.size_in_bytes()
    }

    /// Maps a manifest dtype string (as found in `manifest.json` tensor
    /// entries) to a `DType`.
    pub fn from_manifest_str(s: &str) -> Option<DType> {
        match s {
            "f32" => Some(DType::F32),
            "f16" => Some(DType::F16),
            "bf16" => Some(DType::Bf16),
            "i8" => Some(DType::I8),
            "q4k" => Some(DType::Q4K),
            "q4_0" => Some(DType::Q4_0),
            "q4_1" => Some(DType::Q4_1),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::Bf16 => write!(f, "bf16"),
            DType::I8 => write!(f, "i8"),
            DType::Q4K => write!(f, "q4k"),
            DType::Q4_0 => write!(f, "q4_0"),
            DType::Q4_1 => write!(f, "q4_1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::Q4K.size_in_bytes(), 144);
        assert_eq!(DType::Q4_0.size_in_bytes(), 18);
        assert_eq!(DType::Q4_1.size_in_bytes(), 20);
    }

    #[test]
    fn test_manifest_str_roundtrip() {
        for dtype in [
            DType::F32,
            DType::F16,
            DType::Bf16,
            DType::I8,
            DType::Q4K,
            DType::Q4_0,
            DType::Q4_1,
        ] {
            let s = dtype.to_string();
            assert_eq!(DType::from_manifest_str(&s), Some(dtype));
        }
    }

    #[test]
    fn test_manifest_str_unknown() {
        assert!(DType::from_manifest_str("nonsense").is_none());
    }

    #[test]
    fn test_q4k_row_major_invariant() {
        // rows=4, cols=1152 => ceil(1152/256) = 5 blocks/row => 4*5*144 bytes.
        assert_eq!(DType::Q4K.row_major_2d_size(4, 1152), 4 * 5 * 144);
    }

    #[test]
    fn test_data_size_rounds_up_partial_block() {
        // 257 elements needs 2 Q4K blocks even though the second is not full.
        assert_eq!(DType::Q4K.data_size(257), 2 * 144);
    }
}
