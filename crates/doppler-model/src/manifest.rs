//! `manifest.json` parsing . The manifest is the only
//! configuration surface for model topology — there is no separate config
//! file (see `doppler_tensor::gpu::DeviceConfig` for the device-side
//! knobs, which are programmatic, not manifest-driven).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ModelError, Result};

/// Per-layer feed-forward kind. The manifest declares this explicitly per
/// layer so a model can mix dense and MoE blocks across its depth instead
/// of committing to one FFN kind for every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfnKind {
    Dense,
    Moe,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoeConfig {
    pub n_experts: usize,
    pub top_k: usize,
}

/// Target architecture hyperparameters: layer count, head counts, rope
/// theta, norm epsilon, vocab size, and optional MoE config.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub head_dim: usize,
    pub vocab_size: usize,
    pub rope_theta: f32,
    pub norm_eps: f32,
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub moe: Option<MoeConfig>,
    #[serde(default)]
    pub activation: Option<String>,
    #[serde(default)]
    pub sandwich_norm: bool,
    #[serde(default)]
    pub qk_norm: bool,
    #[serde(default)]
    pub tied_embeddings: bool,
    /// Per-layer FFN kind, length `num_hidden_layers`. Absent means every
    /// layer is dense.
    #[serde(default)]
    pub ffn_layout: Option<Vec<FfnKind>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardDesc {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TensorEntry {
    pub shard: usize,
    pub offset: u64,
    pub length: u64,
    pub dtype: String,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub layout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub architecture: String,
    pub quantization: String,
    pub config: ModelConfig,
    pub shards: Vec<ShardDesc>,
    pub tensors: HashMap<String, TensorEntry>,
}

impl Manifest {
    /// Loads and parses `manifest.json` at `path`, then validates it
    /// (step 1). Returns `ModelError::MalformedManifest` on any
    /// arithmetic invariant violation.
    pub fn load(path: impl AsRef<Path>) -> Result<Manifest> {
        let text = fs::read_to_string(path.as_ref()).map_err(ModelError::Io)?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| ModelError::MalformedManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Directory containing `manifest.json`, used to resolve shard paths.
    pub fn base_dir(manifest_path: impl AsRef<Path>) -> PathBuf {
        manifest_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Validates structural and arithmetic invariants (step 1):
    /// every tensor references a declared shard and fits within it, GQA
    /// head counts divide evenly, and every row-wise-addressable q4k 2-D
    /// tensor's declared byte length is at least the row-wise minimum.
    fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(ModelError::MalformedManifest(
                "manifest declares no shards".to_string(),
            ));
        }
        if self.config.num_attention_heads == 0
            || self.config.num_key_value_heads == 0
            || self.config.num_attention_heads % self.config.num_key_value_heads != 0
        {
            return Err(ModelError::MalformedManifest(format!(
                "num_attention_heads={} is not a whole multiple of num_key_value_heads={}",
                self.config.num_attention_heads, self.config.num_key_value_heads
            )));
        }
        if let Some(layout) = &self.config.ffn_layout {
            if layout.len() != self.config.num_hidden_layers {
                return Err(ModelError::MalformedManifest(format!(
                    "ffn_layout has {} entries but num_hidden_layers={}",
                    layout.len(),
                    self.config.num_hidden_layers
                )));
            }
        }

        for (name, entry) in &self.tensors {
            if entry.shard >= self.shards.len() {
                return Err(ModelError::MalformedManifest(format!(
                    "tensor '{name}' references shard {} but manifest declares only {} shards",
                    entry.shard,
                    self.shards.len()
                )));
            }
            let shard_size = self.shards[entry.shard].size;
            if entry.offset + entry.length > shard_size {
                return Err(ModelError::MalformedManifest(format!(
                    "tensor '{name}' range [{}, {}) exceeds shard {} size {}",
                    entry.offset,
                    entry.offset + entry.length,
                    entry.shard,
                    shard_size
                )));
            }

            if entry.dtype == "q4k" && entry.shape.len() == 2 {
                let rows = entry.shape[0];
                let cols = entry.shape[1];
                let expected = doppler_tensor::DType::Q4K.row_major_2d_size(rows, cols);
                if (entry.length as usize) > expected {
                    return Err(ModelError::MalformedManifest(format!(
                        "tensor '{name}' declares {} bytes, more than the row-wise maximum {} for shape [{rows},{cols}]",
                        entry.length, expected
                    )));
                }
            }
        }

        Ok(())
    }

    /// True if this manifest targets a Gemma-3-style architecture, which
    /// applies the `(1+w)` norm-weight offset once at load time rather
    /// than branching on it in the norm kernel itself.
    pub fn is_gemma3_style(&self) -> bool {
        self.architecture.to_ascii_lowercase().contains("gemma")
            || self.config.sandwich_norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("manifest.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    fn minimal_manifest_json() -> String {
        r#"{
            "architecture": "gemma3",
            "quantization": "q4k",
            "config": {
                "hidden_size": 1152,
                "num_hidden_layers": 2,
                "num_attention_heads": 4,
                "num_key_value_heads": 2,
                "head_dim": 256,
                "vocab_size": 262144,
                "rope_theta": 10000.0,
                "norm_eps": 1e-6,
                "max_position_embeddings": 8192,
                "sandwich_norm": true,
                "qk_norm": true,
                "tied_embeddings": true
            },
            "shards": [{"path": "shard0.bin", "size": 1000000}],
            "tensors": {
                "token_embd.weight": {
                    "shard": 0, "offset": 0, "length": 100,
                    "dtype": "f32", "shape": [262144, 1152]
                }
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_load_valid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(&dir, &minimal_manifest_json());
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.config.num_hidden_layers, 2);
        assert!(manifest.is_gemma3_style());
    }

    #[test]
    fn test_rejects_uneven_gqa_heads() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_manifest_json()).unwrap();
        json["config"]["num_key_value_heads"] = serde_json::json!(3);
        let path = write_manifest(&dir, &json.to_string());
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_rejects_tensor_range_exceeding_shard() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_manifest_json()).unwrap();
        json["tensors"]["token_embd.weight"]["offset"] = serde_json::json!(999_999_999);
        let path = write_manifest(&dir, &json.to_string());
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_rejects_q4k_byte_size_over_rowwise_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_manifest_json()).unwrap();
        // rows=4, cols=1152 => ceil(1152/256)=5 blocks/row => max 4*5*144 bytes.
        json["tensors"]["token_embd.weight"]["dtype"] = serde_json::json!("q4k");
        json["tensors"]["token_embd.weight"]["shape"] = serde_json::json!([4, 1152]);
        json["tensors"]["token_embd.weight"]["length"] = serde_json::json!(4 * 5 * 144 + 1);
        let path = write_manifest(&dir, &json.to_string());
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_accepts_packed_q4k_smaller_than_rowwise() {
        // A packed (flat-block) layout is smaller than the row-wise
        // maximum; the manifest accepts it, the loader classifies it.
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_manifest_json()).unwrap();
        json["tensors"]["token_embd.weight"]["dtype"] = serde_json::json!("q4k");
        json["tensors"]["token_embd.weight"]["shape"] = serde_json::json!([4, 1152]);
        json["tensors"]["token_embd.weight"]["length"] = serde_json::json!(4 * 5 * 144 - 144);
        let path = write_manifest(&dir, &json.to_string());
        assert!(Manifest::load(&path).is_ok());
    }

    #[test]
    fn test_rejects_ffn_layout_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&minimal_manifest_json()).unwrap();
        json["config"]["ffn_layout"] = serde_json::json!(["dense"]);
        let path = write_manifest(&dir, &json.to_string());
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_base_dir() {
        let p = PathBuf::from("/models/gemma3-1b/manifest.json");
        assert_eq!(Manifest::base_dir(&p), PathBuf::from("/models/gemma3-1b"));
    }
}
