//! Resolved architecture hyperparameters, derived from a [`Manifest`]'s
//! `config` section . Distinct from [`Manifest`] itself so
//! that downstream code (the transformer driver, KV-cache manager) works
//! against a single validated, denormalized struct rather than re-deriving
//! per-layer facts from JSON on every call.

use crate::error::{ModelError, Result};
use crate::manifest::{FfnKind, Manifest};

/// Denormalized, validated architecture description consumed by the
/// transformer layer driver and KV-cache manager.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub head_dim: usize,
    pub vocab_size: usize,
    pub rope_theta: f32,
    pub norm_eps: f32,
    pub max_position_embeddings: usize,
    pub sandwich_norm: bool,
    pub qk_norm: bool,
    pub tied_embeddings: bool,
    pub n_experts: usize,
    pub experts_top_k: usize,
    /// Per-layer FFN kind, length `num_hidden_layers`.
    pub ffn_layout: Vec<FfnKind>,
}

impl Architecture {
    /// Derives and validates an `Architecture` from a parsed manifest
    /// (step 1, continued: head-count divisibility was already
    /// checked by `Manifest::validate`; this adds MoE-specific checks).
    pub fn from_manifest(manifest: &Manifest) -> Result<Architecture> {
        let cfg = &manifest.config;

        let ffn_layout = match &cfg.ffn_layout {
            Some(layout) => layout.clone(),
            None => vec![FfnKind::Dense; cfg.num_hidden_layers],
        };

        let needs_moe = ffn_layout.iter().any(|k| *k == FfnKind::Moe);
        let (n_experts, experts_top_k) = match &cfg.moe {
            Some(moe) => {
                if moe.top_k == 0 || moe.top_k > moe.n_experts {
                    return Err(ModelError::MalformedManifest(format!(
                        "moe.top_k={} invalid for moe.n_experts={}",
                        moe.top_k, moe.n_experts
                    )));
                }
                (moe.n_experts, moe.top_k)
            }
            None if needs_moe => {
                return Err(ModelError::MalformedManifest(
                    "ffn_layout declares an moe layer but config.moe is absent".to_string(),
                ));
            }
            None => (0, 0),
        };

        Ok(Architecture {
            hidden_size: cfg.hidden_size,
            num_hidden_layers: cfg.num_hidden_layers,
            num_attention_heads: cfg.num_attention_heads,
            num_key_value_heads: cfg.num_key_value_heads,
            head_dim: cfg.head_dim,
            vocab_size: cfg.vocab_size,
            rope_theta: cfg.rope_theta,
            norm_eps: cfg.norm_eps,
            max_position_embeddings: cfg.max_position_embeddings,
            sandwich_norm: cfg.sandwich_norm,
            qk_norm: cfg.qk_norm,
            tied_embeddings: cfg.tied_embeddings,
            n_experts,
            experts_top_k,
            ffn_layout,
        })
    }

    /// Number of query heads sharing each key/value head (GQA group size).
    pub fn gqa_group_size(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }

    pub fn ffn_kind(&self, layer: usize) -> FfnKind {
        self.ffn_layout[layer]
    }

    /// The post-gather embedding scale (§2 control flow: "Gather
    /// (embedding lookup + scale)"). Gemma-3-style architectures (the same
    /// `sandwich_norm` flag that selects the sandwich-norm block layout)
    /// scale token embeddings by `sqrt(hidden_size)` immediately after the
    /// lookup; architectures without it leave embeddings unscaled.
    pub fn embedding_scale(&self) -> Option<f32> {
        if self.sandwich_norm {
            Some((self.hidden_size as f32).sqrt())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn manifest_json(extra_config: &str) -> String {
        format!(
            r#"{{
                "architecture": "gemma3",
                "quantization": "q4k",
                "config": {{
                    "hidden_size": 1152,
                    "num_hidden_layers": 2,
                    "num_attention_heads": 4,
                    "num_key_value_heads": 2,
                    "head_dim": 256,
                    "vocab_size": 262144,
                    "rope_theta": 10000.0,
                    "norm_eps": 1e-6,
                    "max_position_embeddings": 8192
                    {extra_config}
                }},
                "shards": [{{"path": "shard0.bin", "size": 1000000}}],
                "tensors": {{}}
            }}"#
        )
    }

    fn parse(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults_to_all_dense() {
        let manifest = parse(&manifest_json(""));
        let arch = Architecture::from_manifest(&manifest).unwrap();
        assert_eq!(arch.ffn_layout, vec![FfnKind::Dense, FfnKind::Dense]);
        assert_eq!(arch.gqa_group_size(), 2);
    }

    #[test]
    fn test_embedding_scale_unset_without_sandwich_norm() {
        let manifest = parse(&manifest_json(""));
        let arch = Architecture::from_manifest(&manifest).unwrap();
        assert_eq!(arch.embedding_scale(), None);
    }

    #[test]
    fn test_embedding_scale_is_sqrt_hidden_size_for_sandwich_norm() {
        let manifest = parse(&manifest_json(r#", "sandwich_norm": true"#));
        let arch = Architecture::from_manifest(&manifest).unwrap();
        assert_eq!(arch.embedding_scale(), Some(1152f32.sqrt()));
    }

    #[test]
    fn test_moe_layout_requires_moe_config() {
        let manifest = parse(&manifest_json(
            r#", "ffn_layout": ["dense", "moe"]"#,
        ));
        assert!(Architecture::from_manifest(&manifest).is_err());
    }

    #[test]
    fn test_moe_layout_with_config() {
        let manifest = parse(&manifest_json(
            r#", "ffn_layout": ["dense", "moe"], "moe": {"n_experts": 8, "top_k": 2}"#,
        ));
        let arch = Architecture::from_manifest(&manifest).unwrap();
        assert_eq!(arch.n_experts, 8);
        assert_eq!(arch.experts_top_k, 2);
        assert_eq!(arch.ffn_kind(1), FfnKind::Moe);
    }

    #[test]
    fn test_rejects_top_k_over_n_experts() {
        let manifest = parse(&manifest_json(
            r#", "ffn_layout": ["moe", "moe"], "moe": {"n_experts": 4, "top_k": 8}"#,
        ));
        assert!(Architecture::from_manifest(&manifest).is_err());
    }
}
