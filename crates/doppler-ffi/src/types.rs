/// Status codes returned by every FFI entry point. Mirrors the load/
/// generation error taxonomy from : `ErrorNotFound` /
/// `ErrorMalformedManifest` / `ErrorLayoutMismatch` / `ErrorAllocationFailed`
/// cover `loadModel`'s documented error set, `ErrorGenerate` covers a
/// generation-time failure reported to the caller, `ErrorInternal` covers a
/// caught panic.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DopplerStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorNotFound = 2,
    ErrorMalformedManifest = 3,
    ErrorLayoutMismatch = 4,
    ErrorAllocationFailed = 5,
    ErrorGenerate = 6,
    ErrorInternal = 7,
}

/// Sampling and generation-length parameters for one `doppler_generate` call,
/// the C-ABI mirror of `doppler_model::GenerateOptions`. `has_eos_token`
/// distinguishes "no EOS configured" from an EOS id of 0.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DopplerGenerateParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub repetition_window: u32,
    pub seed: u64,
    pub eos_token: u32,
    pub has_eos_token: bool,
}

impl Default for DopplerGenerateParams {
    fn default() -> Self {
        let defaults = doppler_model::GenerateOptions::default();
        DopplerGenerateParams {
            max_tokens: defaults.max_tokens as u32,
            temperature: defaults.temperature,
            top_k: defaults.top_k as u32,
            top_p: defaults.top_p,
            repetition_penalty: defaults.repetition_penalty,
            repetition_window: defaults.repetition_window as u32,
            seed: defaults.seed,
            eos_token: 0,
            has_eos_token: false,
        }
    }
}

impl From<DopplerGenerateParams> for doppler_model::GenerateOptions {
    fn from(p: DopplerGenerateParams) -> Self {
        doppler_model::GenerateOptions {
            max_tokens: p.max_tokens as usize,
            temperature: p.temperature,
            top_k: p.top_k as usize,
            top_p: p.top_p,
            repetition_penalty: p.repetition_penalty,
            repetition_window: p.repetition_window as usize,
            seed: p.seed,
            eos_token: p.has_eos_token.then_some(p.eos_token),
        }
    }
}

/// Callback for streaming token output, invoked once per generated token
/// id. The engine has no tokenizer: applying a chat template or
/// detokenizing ids into text is left to the caller. Returns `true` to
/// continue generation, `false` to stop early.
pub type DopplerStreamCallback =
    Option<extern "C" fn(token_id: u32, user_data: *mut std::os::raw::c_void) -> bool>;

/// Snapshot of `doppler_model::GenerationStats`, the observable counters
/// from 
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DopplerGenerationStats {
    pub ttft_ms: f64,
    pub prefill_ms: f64,
    pub prefill_tokens_per_sec: f64,
    pub decode_ms_total: f64,
    pub decode_ms_per_token_p50: f64,
    pub decode_ms_per_token_p90: f64,
    pub decode_ms_per_token_p99: f64,
    pub decode_tokens_per_sec: f64,
    pub gpu_submit_count_prefill: u64,
    pub gpu_submit_count_decode: u64,
    pub estimated_vram_bytes_peak: u64,
}

impl From<doppler_model::GenerationStats> for DopplerGenerationStats {
    fn from(s: doppler_model::GenerationStats) -> Self {
        DopplerGenerationStats {
            ttft_ms: s.ttft_ms,
            prefill_ms: s.prefill_ms,
            prefill_tokens_per_sec: s.prefill_tokens_per_sec,
            decode_ms_total: s.decode_ms_total,
            decode_ms_per_token_p50: s.decode_ms_per_token_p50,
            decode_ms_per_token_p90: s.decode_ms_per_token_p90,
            decode_ms_per_token_p99: s.decode_ms_per_token_p99,
            decode_tokens_per_sec: s.decode_tokens_per_sec,
            gpu_submit_count_prefill: s.gpu_submit_count_prefill as u64,
            gpu_submit_count_decode: s.gpu_submit_count_decode as u64,
            estimated_vram_bytes_peak: s.estimated_vram_bytes_peak,
        }
    }
}
