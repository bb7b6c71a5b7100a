//! Weight loader . Parses a manifest, memory-maps its shards,
//! classifies each Q4K tensor's on-disk layout, applies the Gemma-3
//! `(1+w)` norm-weight offset exactly once at load time (design
//! decision: fixed in the loader, not the kernel, so the kernel stays
//! architecture-agnostic), and streams every tensor to the device through
//! [`doppler_tensor::gpu::buffers::GpuBuffer::upload_staged`].

use std::path::Path;

use memmap2::Mmap;

use doppler_tensor::dtype::DType;
use doppler_tensor::gpu::buffers::GpuBuffer;
use doppler_tensor::gpu::device::GpuDevice;
use doppler_tensor::shape::Shape;

use crate::architecture::Architecture;
use crate::catalog::{CatalogEntry, TensorCatalog, TensorVariant};
use crate::error::{ModelError, Result};
use crate::manifest::{Manifest, TensorEntry};

/// Loader behavior knobs. Kept separate from [`doppler_tensor::gpu::DeviceConfig`]
/// since these govern weight-loading policy, not device negotiation.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// If true, a Q4K tensor whose on-disk layout is not row-wise
    /// addressable is dequantized to F16 on load instead of erroring.
    pub allow_packed_fallback: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            allow_packed_fallback: true,
        }
    }
}

/// Suffixes identifying a tensor as an RMSNorm weight subject to the
/// Gemma-3 `(1+w)` offset.
const NORM_WEIGHT_SUFFIXES: &[&str] = &[
    "norm.weight",
    "attn_norm.weight",
    "ffn_norm.weight",
    "post_attention_norm.weight",
    "post_ffn_norm.weight",
    "q_norm.weight",
    "k_norm.weight",
];

fn is_norm_weight(name: &str) -> bool {
    NORM_WEIGHT_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Loads every tensor named in `manifest` onto `gpu`, returning the
/// populated catalog and the resolved architecture.
pub fn load(
    gpu: &GpuDevice,
    manifest_path: impl AsRef<Path>,
    loader_config: &LoaderConfig,
) -> Result<(TensorCatalog, Architecture)> {
    let manifest = Manifest::load(manifest_path.as_ref())?;
    let architecture = Architecture::from_manifest(&manifest)?;

    let base_dir = Manifest::base_dir(manifest_path.as_ref());
    let mut shard_mmaps = Vec::with_capacity(manifest.shards.len());
    for shard in &manifest.shards {
        let path = base_dir.join(&shard.path);
        let file = std::fs::File::open(&path).map_err(ModelError::Io)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(ModelError::Io)?;
        if mmap.len() as u64 != shard.size {
            return Err(ModelError::ShardMissing(format!(
                "shard '{}' is {} bytes on disk, manifest declares {}",
                shard.path,
                mmap.len(),
                shard.size
            )));
        }
        shard_mmaps.push(mmap);
    }

    let apply_gemma_offset = manifest.is_gemma3_style();
    let mut catalog = TensorCatalog::new();

    for (name, entry) in &manifest.tensors {
        let bytes = tensor_bytes(&shard_mmaps, entry)?;
        let dtype = DType::from_manifest_str(&entry.dtype)
            .ok_or_else(|| ModelError::UnsupportedDType(entry.dtype.clone()))?;
        let shape = Shape::new(entry.shape.clone());

        let catalog_entry = if dtype == DType::Q4K {
            load_q4k_tensor(gpu, name, bytes, &shape, loader_config)?
        } else if apply_gemma_offset && is_norm_weight(name) {
            load_offset_norm_weight(gpu, name, bytes, dtype, shape)?
        } else {
            let buffer = GpuBuffer::upload_staged(gpu, bytes, shape, dtype, name)?;
            CatalogEntry {
                buffer,
                variant: TensorVariant::Dense,
            }
        };

        catalog.insert(name.clone(), catalog_entry);
    }

    if architecture.tied_embeddings
        && catalog.contains("token_embd.weight")
        && !catalog.contains("lm_head.weight")
    {
        catalog.alias("token_embd.weight", "lm_head.weight")?;
        log::debug!("tied embeddings: aliased lm_head.weight to token_embd.weight");
    }

    log::debug!(
        "loader: {} tensors loaded, estimated {} bytes of VRAM",
        catalog.len(),
        catalog.estimated_vram_bytes()
    );

    Ok((catalog, architecture))
}

fn tensor_bytes<'a>(shard_mmaps: &'a [Mmap], entry: &TensorEntry) -> Result<&'a [u8]> {
    let mmap = shard_mmaps
        .get(entry.shard)
        .ok_or_else(|| ModelError::ShardMissing(format!("no shard index {}", entry.shard)))?;
    let start = entry.offset as usize;
    let end = start + entry.length as usize;
    mmap.get(start..end)
        .ok_or_else(|| ModelError::ShardMissing("tensor range exceeds mapped shard".to_string()))
}

/// Classifies a Q4K tensor's on-disk layout and uploads it, dequantizing
/// to F16 on the fly when the layout is not row-wise addressable and the
/// loader config allows the fallback (step 2).
fn load_q4k_tensor(
    gpu: &GpuDevice,
    name: &str,
    bytes: &[u8],
    shape: &Shape,
    loader_config: &LoaderConfig,
) -> Result<CatalogEntry> {
    if shape.ndim() != 2 {
        let buffer = GpuBuffer::upload_staged(gpu, bytes, shape.clone(), DType::Q4K, name)?;
        return Ok(CatalogEntry {
            buffer,
            variant: TensorVariant::Q4KRowwise,
        });
    }

    let rows = shape.dim(0);
    let cols = shape.dim(1);
    let row_wise_size = DType::Q4K.row_major_2d_size(rows, cols);

    if bytes.len() == row_wise_size {
        let buffer =
            GpuBuffer::upload_staged(gpu, bytes, shape.clone(), DType::Q4K, name)?;
        Ok(CatalogEntry {
            buffer,
            variant: TensorVariant::Q4KRowwise,
        })
    } else if bytes.len() > row_wise_size {
        // Strictly larger than the row-wise invariant is not a recognized
        // packed layout (packed is always *smaller*, §4.2 step 1 / §8
        // property 6) — the manifest's declared byte length is wrong.
        Err(ModelError::MalformedManifest(format!(
            "tensor '{name}' has {} bytes, exceeding the row-wise q4k size {row_wise_size}",
            bytes.len()
        )))
    } else if loader_config.allow_packed_fallback {
        log::warn!(
            "tensor '{name}' is packed q4k ({} bytes, expected {row_wise_size} row-wise); dequantizing to f16 on load",
            bytes.len()
        );
        let mut dequantized = doppler_tensor::cpu::quant::dequantize_q4k(bytes)?;
        dequantized.truncate(rows * cols);
        let f16_bytes: Vec<u8> = dequantized
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect();
        let buffer =
            GpuBuffer::upload_staged(gpu, &f16_bytes, shape.clone(), DType::F16, name)?;
        Ok(CatalogEntry {
            buffer,
            variant: TensorVariant::Q4KDequantized,
        })
    } else {
        Err(ModelError::LayoutMismatch(format!(
            "tensor '{name}' is packed q4k ({} bytes, expected {row_wise_size} row-wise) and allow_packed_fallback is disabled",
            bytes.len()
        )))
    }
}

/// Applies the Gemma-3 `(1+w)` offset to a norm weight's values, once,
/// before upload (: "fix in the loader, not the kernel, so the
/// kernel's RMSNorm stays architecture-agnostic").
fn load_offset_norm_weight(
    gpu: &GpuDevice,
    name: &str,
    bytes: &[u8],
    dtype: DType,
    shape: Shape,
) -> Result<CatalogEntry> {
    let offset_bytes = match dtype {
        DType::F32 => {
            let values: &[f32] = bytemuck::cast_slice(bytes);
            let offset: Vec<f32> = values.iter().map(|v| v + 1.0).collect();
            bytemuck::cast_slice(&offset).to_vec()
        }
        DType::F16 => {
            let values: &[half::f16] = bytemuck::cast_slice(bytes);
            let offset: Vec<half::f16> = values
                .iter()
                .map(|v| half::f16::from_f32(v.to_f32() + 1.0))
                .collect();
            bytemuck::cast_slice(&offset).to_vec()
        }
        other => {
            return Err(ModelError::UnsupportedDType(format!(
                "norm weight '{name}' has unsupported dtype {other} for gemma offset"
            )))
        }
    };
    let buffer = GpuBuffer::upload_staged(gpu, &offset_bytes, shape, dtype, name)?;
    Ok(CatalogEntry {
        buffer,
        variant: TensorVariant::Dense,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_norm_weight_matches_known_suffixes() {
        assert!(is_norm_weight("blk.0.attn_norm.weight"));
        assert!(is_norm_weight("blk.0.post_ffn_norm.weight"));
        assert!(!is_norm_weight("blk.0.attn_q.weight"));
    }

    #[test]
    fn test_default_loader_config_allows_fallback() {
        assert!(LoaderConfig::default().allow_packed_fallback);
    }
}
