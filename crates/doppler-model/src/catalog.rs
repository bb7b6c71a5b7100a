//! Tensor Catalog: resident device buffers keyed by manifest tensor name,
//! each tagged with a `TensorVariant` so the matmul kernel selection in
//! the transformer driver can match on a plain enum rather than reaching
//! back into the loader for layout decisions.

use std::collections::HashMap;
use std::sync::Arc;

use doppler_tensor::gpu::buffers::GpuBuffer;

use crate::error::{ModelError, Result};

/// How a catalog entry's bytes are laid out on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorVariant {
    /// Plain row-major dense tensor (f32/f16/bf16).
    Dense,
    /// Row-wise-addressable Q4K blocks: each row starts a fresh run of
    /// blocks, so the matmul kernel can dequantize a single row without
    /// touching the rest of the tensor.
    Q4KRowwise,
    /// Source data used a legacy flat-packed Q4K layout that is not
    /// row-wise addressable; the loader dequantized it to F16 on load
    /// (the dequant-on-load fallback).
    Q4KDequantized,
}

/// One named tensor's device-resident buffer plus the variant describing
/// how the transformer driver should read it.
#[derive(Debug)]
pub struct CatalogEntry {
    pub buffer: GpuBuffer,
    pub variant: TensorVariant,
}

/// Loaded model weights, keyed by manifest tensor name. Tied-embedding
/// models alias the same `CatalogEntry` under two names rather than
/// duplicating the device buffer (the supplemented tied-embeddings
/// feature).
#[derive(Debug, Default)]
pub struct TensorCatalog {
    entries: HashMap<String, Arc<CatalogEntry>>,
}

impl TensorCatalog {
    pub fn new() -> Self {
        TensorCatalog {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(name.into(), Arc::new(entry));
    }

    /// Aliases `existing_name`'s entry under `alias_name`, sharing the
    /// device buffer rather than re-uploading it. Used for tied
    /// input/output embeddings.
    pub fn alias(&mut self, existing_name: &str, alias_name: impl Into<String>) -> Result<()> {
        let entry = self
            .entries
            .get(existing_name)
            .ok_or_else(|| ModelError::TensorNotFound(existing_name.to_string()))?
            .clone();
        self.entries.insert(alias_name.into(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&CatalogEntry> {
        self.entries
            .get(name)
            .map(|e| e.as_ref())
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of every distinct device buffer's byte length. Aliased entries
    /// (tied embeddings) are counted once since they share a buffer and
    /// `Arc::ptr_eq` would dedupe them; this walks unique `Arc` pointers.
    pub fn estimated_vram_bytes(&self) -> u64 {
        let mut seen: Vec<*const CatalogEntry> = Vec::new();
        let mut total = 0u64;
        for entry in self.entries.values() {
            let ptr = Arc::as_ptr(entry);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            total += entry.buffer.byte_len();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppler_tensor::dtype::DType;
    use doppler_tensor::gpu::device::{DeviceConfig, GpuDevice};
    use doppler_tensor::shape::Shape;

    fn test_gpu() -> Option<GpuDevice> {
        GpuDevice::new(DeviceConfig::default()).ok()
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = TensorCatalog::new();
        assert!(catalog.is_empty());
        assert_eq!(catalog.estimated_vram_bytes(), 0);
    }

    #[test]
    fn test_missing_tensor_errors() {
        let catalog = TensorCatalog::new();
        assert!(catalog.get("token_embd.weight").is_err());
    }

    #[test]
    fn test_alias_shares_buffer_and_counts_once() {
        // Without a real adapter (headless CI has none) this test only
        // exercises the aliasing/bookkeeping path, not GPU upload.
        let Some(gpu) = test_gpu() else { return };
        let mut catalog = TensorCatalog::new();
        let buffer =
            GpuBuffer::zeros(&gpu, Shape::new(vec![4, 4]), DType::F32, "embd").unwrap();
        catalog.insert(
            "token_embd.weight",
            CatalogEntry {
                buffer,
                variant: TensorVariant::Dense,
            },
        );
        catalog
            .alias("token_embd.weight", "lm_head.weight")
            .unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("lm_head.weight").is_ok());

        let per_buffer = 4 * 4 * 4;
        assert_eq!(catalog.estimated_vram_bytes(), per_buffer);
    }

    #[test]
    fn test_alias_missing_source_errors() {
        let mut catalog = TensorCatalog::new();
        assert!(catalog.alias("nonexistent", "alias").is_err());
    }
}
