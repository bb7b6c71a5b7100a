use std::fmt::Debug;

use crate::error::Result;

/// Trait for the reference compute backend used as ground truth in tests.
///
/// All operations work on f32 slices. Data is passed in as slices and
/// returned as owned vectors. The GPU kernel library (`crate::gpu`) is
/// dispatched against the same shapes and is checked against this backend's
/// output in tests, but does not itself implement this trait — it operates
/// on device buffers through a command recorder, not host slices.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "metal").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// RMS normalization.
    ///
    /// For each row of `hidden_size` elements in `x`:
    ///   rms = sqrt(mean(x^2) + eps)
    ///   result[i] = x[i] * weight[i] / rms
    ///
    /// - `x`: input data, length must be a multiple of `hidden_size`
    /// - `weight`: per-element scale weights, length == `hidden_size`
    /// - `eps`: small constant for numerical stability
    /// - `hidden_size`: size of each row to normalize
    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Softmax over chunks of `n_vocab` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>>;

    /// Rotary Position Embedding (RoPE).
    ///
    /// Applies rotary embeddings to query and key tensors.
    ///
    /// - `q`: query data, shape [n_heads_q, head_dim]
    /// - `k`: key data, shape [n_heads_k, head_dim]
    /// - `head_dim`: dimension of each attention head
    /// - `pos`: token position for computing rotation angles
    /// - `n_heads_q`: number of query heads
    /// - `n_heads_k`: number of key heads
    /// - `theta`: RoPE base frequency (from the manifest's `rope_theta`)
    ///
    /// Returns (rotated_q, rotated_k).
    #[allow(clippy::too_many_arguments)]
    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)>;

    /// SiLU activation: result[i] = x[i] * sigmoid(x[i]) = x[i] / (1 + exp(-x[i])).
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// SwiGLU gate: result[i] = silu(gate[i]) * up[i]. `gate` and `up` must
    /// be the same length.
    fn silu_gated(&self, gate: &[f32], up: &[f32]) -> Result<Vec<f32>>;

    /// Causal, grouped-query attention.
    ///
    /// - `q`: shape `[t, h_q, head_dim]`
    /// - `k`, `v`: shape `[t_k, h_kv, head_dim]` (from the KV-cache)
    /// - `h_q` must be an integer multiple of `h_kv`; each group of
    ///   `h_q / h_kv` query heads shares one KV head.
    /// - Position `i` of `q` (0-indexed within the current forward call) may
    ///   attend to key/value positions `0..=(t_k - t + i)`, i.e. the causal
    ///   mask is anchored at the end of the KV-cache, not at `i` itself,
    ///   so a one-token decode step (`t == 1`) attends to the whole cache.
    ///
    /// Returns shape `[t, h_q, head_dim]`.
    #[allow(clippy::too_many_arguments)]
    fn attention(
        &self,
        q: &[f32],
        k: &[f32],
        v: &[f32],
        t: usize,
        t_k: usize,
        h_q: usize,
        h_kv: usize,
        head_dim: usize,
    ) -> Result<Vec<f32>>;

    /// Embedding lookup: for each of `indices`, copy the row of `row_size`
    /// elements at `table[index * row_size .. (index + 1) * row_size]`.
    ///
    /// Returns shape `[indices.len(), row_size]`.
    fn gather_rows(&self, table: &[f32], indices: &[u32], row_size: usize) -> Result<Vec<f32>>;

    /// MoE router: softmax over `n_experts` logits per token, then selects
    /// the top `top_k` experts and renormalizes their weights to sum to 1.
    ///
    /// - `router_logits`: shape `[n_tokens, n_experts]`
    /// - Returns `(expert_ids, weights)`, each of length `n_tokens * top_k`,
    ///   grouped by token (the first `top_k` entries are token 0's routed
    ///   experts in descending weight order, and so on).
    fn moe_route(
        &self,
        router_logits: &[f32],
        n_tokens: usize,
        n_experts: usize,
        top_k: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)>;

    /// MoE combine: weighted scatter-add of per-token, per-routed-expert
    /// outputs back into one row per token.
    ///
    /// - `expert_outputs`: shape `[n_tokens * top_k, hidden_size]`, the
    ///   output of running each token's routed experts in the same order
    ///   `moe_route` returned them.
    /// - `weights`: shape `[n_tokens * top_k]`, as returned by `moe_route`.
    ///
    /// Returns shape `[n_tokens, hidden_size]`.
    fn moe_combine(
        &self,
        expert_outputs: &[f32],
        weights: &[f32],
        n_tokens: usize,
        top_k: usize,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;
}
