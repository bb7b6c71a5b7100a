//! Model wrapper and sampling loop. `Model` owns the device, pipeline
//! cache, tensor catalog, KV-cache and architecture; `generate` hands
//! ownership to a [`TokenStream`], a cancellation-safe pull iterator that
//! decodes one token per `next()` call — an ordinary synchronous iterator
//! stands in for an async stream since the engine has no async runtime.

use std::path::Path;
use std::time::Instant;

use doppler_sampler::{
    DistSampler, RepetitionPenaltySampler, SamplerChain, TemperatureSampler, TopKSampler, TopPSampler,
};
use doppler_tensor::dtype::DType;
use doppler_tensor::gpu::buffers::GpuBuffer;
use doppler_tensor::gpu::device::{DeviceConfig, GpuDevice};
use doppler_tensor::gpu::pipeline::PipelineCache;
use doppler_tensor::gpu::recorder::CommandRecorder;
use doppler_tensor::shape::Shape;

use crate::architecture::Architecture;
use crate::catalog::TensorCatalog;
use crate::error::{ModelError, Result};
use crate::loader::{self, LoaderConfig};
use crate::transformer::driver;
use crate::transformer::kv_cache::KvCache;

/// Sampling and generation-length parameters for one `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub repetition_window: usize,
    pub seed: u64,
    pub eos_token: Option<u32>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            max_tokens: 256,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.1,
            repetition_window: 64,
            seed: 0,
            eos_token: None,
        }
    }
}

/// Observable generation-performance counters (the supplemented
/// `GenerationStats` feature). Populated incrementally as a `TokenStream`
/// decodes; a snapshot is always a valid-so-far view, not only available
/// at the end.
#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    pub ttft_ms: f64,
    pub prefill_ms: f64,
    pub prefill_tokens_per_sec: f64,
    pub decode_ms_total: f64,
    pub decode_ms_per_token_p50: f64,
    pub decode_ms_per_token_p90: f64,
    pub decode_ms_per_token_p99: f64,
    pub decode_tokens_per_sec: f64,
    pub gpu_submit_count_prefill: usize,
    pub gpu_submit_count_decode: usize,
    pub estimated_vram_bytes_peak: u64,
}

fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let idx = ((sorted_ms.len() as f64 - 1.0) * p).round() as usize;
    sorted_ms[idx.min(sorted_ms.len() - 1)]
}

/// A loaded model, ready to drive `generate` calls. Only one `TokenStream`
/// may be active at a time since it takes ownership of the `Model`.
pub struct Model {
    gpu: GpuDevice,
    pipeline_cache: PipelineCache,
    catalog: TensorCatalog,
    arch: Architecture,
    kv_cache: KvCache,
}

impl Model {
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Model> {
        Self::load_with_config(manifest_path, DeviceConfig::default(), LoaderConfig::default())
    }

    pub fn load_with_config(
        manifest_path: impl AsRef<Path>,
        device_config: DeviceConfig,
        loader_config: LoaderConfig,
    ) -> Result<Model> {
        let gpu = GpuDevice::new(device_config).map_err(ModelError::Tensor)?;
        let (catalog, arch) = loader::load(&gpu, manifest_path, &loader_config)?;
        let kv_cache = KvCache::new(&gpu, &arch)?;
        Ok(Model {
            gpu,
            pipeline_cache: PipelineCache::new(),
            catalog,
            arch,
            kv_cache,
        })
    }

    pub fn architecture(&self) -> &Architecture {
        &self.arch
    }

    pub fn estimated_vram_bytes(&self) -> u64 {
        self.catalog.estimated_vram_bytes()
    }

    /// Clears every layer's KV-cache cursor, starting a fresh conversation
    /// without reloading weights (the `clearKVCache` API entry point).
    pub fn clear_kv_cache(&mut self) {
        self.kv_cache.clear_conversation();
    }

    /// Runs one forward pass over `tokens` starting at `pos`, returning the
    /// full vocabulary logit row for the final token. `n_submits` is set
    /// to the recorder's real GPU submission count, which `GenerationStats`
    /// reports at the command-batch granularity, not per-kernel.
    fn forward(&mut self, tokens: &[u32], pos: usize, n_submits: &mut usize) -> Result<Vec<f32>> {
        let mut recorder = CommandRecorder::with_auto_submit(
            &self.gpu,
            "forward",
            !self.gpu.config.batch_commands,
        );
        let n_tokens = tokens.len();

        let mut x = driver::embed(
            &self.gpu,
            &mut self.pipeline_cache,
            &mut recorder,
            &self.catalog,
            &self.arch,
            tokens,
        )?;

        for layer in 0..self.arch.num_hidden_layers {
            x = driver::forward_block(
                &self.gpu,
                &mut self.pipeline_cache,
                &mut recorder,
                &self.catalog,
                &mut self.kv_cache,
                &self.arch,
                layer,
                &x,
                pos,
                n_tokens,
            )?;
        }

        let final_norm_w = self.catalog.get("output_norm.weight")?;
        let normed = GpuBuffer::zeros(&self.gpu, x.shape().clone(), DType::F32, "final-norm")
            .map_err(ModelError::Tensor)?;
        dispatch_final_norm(
            &self.gpu,
            &mut self.pipeline_cache,
            &mut recorder,
            x.buffer(),
            final_norm_w.buffer.buffer(),
            normed.buffer(),
            n_tokens * self.arch.hidden_size,
            self.arch.hidden_size,
            self.arch.norm_eps,
        )?;

        let lm_head = self.catalog.get("lm_head.weight")?;
        let logits = GpuBuffer::zeros(
            &self.gpu,
            Shape::new(vec![n_tokens, self.arch.vocab_size]),
            DType::F32,
            "logits",
        )
        .map_err(ModelError::Tensor)?;
        driver::dispatch_matmul(
            &self.gpu,
            &mut self.pipeline_cache,
            &mut recorder,
            &lm_head.buffer,
            lm_head.variant,
            normed.buffer(),
            logits.buffer(),
            n_tokens,
            self.arch.hidden_size,
            self.arch.vocab_size,
        )?;

        recorder.submit(&self.gpu).map_err(ModelError::Tensor)?;
        recorder.await_completion(&self.gpu);
        *n_submits = recorder.total_submits();

        let all_logits = logits.read_to_f32(&self.gpu).map_err(ModelError::Tensor)?;
        let last_row_start = (n_tokens - 1) * self.arch.vocab_size;
        Ok(all_logits[last_row_start..last_row_start + self.arch.vocab_size].to_vec())
    }

    /// Begins generation: runs the prefill pass over `prompt_tokens`, then
    /// returns a `TokenStream` that decodes one token per `next()` call.
    pub fn generate(mut self, prompt_tokens: &[u32], options: GenerateOptions) -> Result<TokenStream> {
        if prompt_tokens.is_empty() {
            return Err(ModelError::Generation("prompt must not be empty".to_string()));
        }

        let mut stats = GenerationStats::default();
        let start = Instant::now();
        let mut prefill_submits = 0usize;
        let logits = self.forward(prompt_tokens, 0, &mut prefill_submits)?;
        let prefill_ms = start.elapsed().as_secs_f64() * 1000.0;
        stats.ttft_ms = prefill_ms;
        stats.prefill_ms = prefill_ms;
        stats.prefill_tokens_per_sec = prompt_tokens.len() as f64 / (prefill_ms / 1000.0).max(1e-9);
        stats.gpu_submit_count_prefill = prefill_submits;
        stats.estimated_vram_bytes_peak = self.estimated_vram_bytes();

        let chain = SamplerChain::new()
            .with(Box::new(TemperatureSampler::new(options.temperature)))
            .with(Box::new(TopKSampler::new(options.top_k)))
            .with(Box::new(TopPSampler::new(options.top_p)))
            .with(Box::new(DistSampler::new(options.seed)));
        let mut repetition = RepetitionPenaltySampler::new(options.repetition_penalty, options.repetition_window);
        for &t in prompt_tokens {
            repetition.add_token(t);
        }

        Ok(TokenStream {
            model: self,
            options,
            chain,
            repetition,
            pending_first_logits: Some(logits),
            last_emitted_token: prompt_tokens.last().copied(),
            pos: prompt_tokens.len(),
            emitted: 0,
            decode_times_ms: Vec::new(),
            stats,
            cancelled: false,
            finished: false,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_final_norm(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    x: &wgpu::Buffer,
    weight: &wgpu::Buffer,
    out: &wgpu::Buffer,
    x_len: usize,
    hidden_size: usize,
    eps: f32,
) -> Result<()> {
    use doppler_tensor::gpu::kernels::rmsnorm;
    let (uniforms, workgroups) =
        rmsnorm::plan(x_len, hidden_size, hidden_size, eps).map_err(ModelError::Tensor)?;
    driver::dispatch_kernel(
        gpu,
        cache,
        recorder,
        "rms_norm",
        rmsnorm::SHADER_SRC,
        rmsnorm::ENTRY_POINT,
        &rmsnorm::bindings(),
        uniforms,
        &[x, weight, out],
        workgroups,
    )
}

/// Cancellation-safe pull iterator over generated token IDs. Each `next()`
/// call performs exactly one decode step; dropping the stream or ceasing
/// to call `next()` leaves the model's KV-cache in a consistent state to
/// resume counting positions from the last emitted token's position, so a
/// cancelled stream never corrupts future generations against the same
/// `Model` (once reclaimed via `into_model`).
pub struct TokenStream {
    model: Model,
    options: GenerateOptions,
    chain: SamplerChain,
    repetition: RepetitionPenaltySampler,
    pending_first_logits: Option<Vec<f32>>,
    last_emitted_token: Option<u32>,
    pos: usize,
    emitted: usize,
    decode_times_ms: Vec<f64>,
    stats: GenerationStats,
    cancelled: bool,
    finished: bool,
}

impl TokenStream {
    /// Marks the stream cancelled; the next `next()` call (if any) returns
    /// `None` instead of decoding further.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// A snapshot of generation stats as of the last completed step.
    pub fn stats(&self) -> GenerationStats {
        let mut stats = self.stats.clone();
        if !self.decode_times_ms.is_empty() {
            let mut sorted = self.decode_times_ms.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            stats.decode_ms_total = sorted.iter().sum();
            stats.decode_ms_per_token_p50 = percentile(&sorted, 0.50);
            stats.decode_ms_per_token_p90 = percentile(&sorted, 0.90);
            stats.decode_ms_per_token_p99 = percentile(&sorted, 0.99);
            stats.decode_tokens_per_sec =
                sorted.len() as f64 / (stats.decode_ms_total / 1000.0).max(1e-9);
        }
        stats.gpu_submit_count_decode = self.decode_times_ms.len();
        stats
    }

    /// Reclaims the underlying `Model` once generation has stopped, so it
    /// can be reused for another `generate` call without reloading weights.
    pub fn into_model(self) -> Model {
        self.model
    }

    fn sample_next(&mut self, logits: &[f32]) -> u32 {
        let mut logits = logits.to_vec();
        apply_repetition_in_place(&self.repetition, &mut logits);
        self.chain.sample(&logits)
    }
}

fn to_token_logits(logits: &[f32]) -> Vec<doppler_sampler::TokenLogit> {
    logits
        .iter()
        .enumerate()
        .map(|(i, &logit)| doppler_sampler::TokenLogit {
            token_id: i as u32,
            logit,
        })
        .collect()
}

fn apply_repetition_in_place(repetition: &RepetitionPenaltySampler, logits: &mut [f32]) {
    let mut token_logits = to_token_logits(logits);
    doppler_sampler::Sampler::apply(repetition, &mut token_logits);
    for tl in token_logits {
        logits[tl.token_id as usize] = tl.logit;
    }
}

impl Iterator for TokenStream {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled || self.finished || self.emitted >= self.options.max_tokens {
            return None;
        }

        let step_start = Instant::now();

        let logits = match self.pending_first_logits.take() {
            Some(logits) => logits,
            None => {
                let last_token = match self.last_emitted_token {
                    Some(t) => t,
                    None => return None,
                };
                let mut submits = 0usize;
                match self
                    .model
                    .forward(&[last_token], self.pos, &mut submits)
                {
                    Ok(logits) => logits,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }
        };

        let token = self.sample_next(&logits);
        self.repetition.add_token(token);
        self.pos += 1;
        self.emitted += 1;
        self.last_emitted_token = Some(token);

        self.decode_times_ms
            .push(step_start.elapsed().as_secs_f64() * 1000.0);

        if self.options.eos_token == Some(token) {
            self.finished = true;
        }

        Some(Ok(token))
    }
}
