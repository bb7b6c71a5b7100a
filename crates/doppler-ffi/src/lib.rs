//! C ABI boundary exposing the model-serving API to an external harness.
//! The engine receives already-tokenized prompt ids and emits
//! already-tokenized output ids — applying a chat template or
//! tokenizing/detokenizing text is a caller concern, not this crate's.

mod context;
mod error;
mod streaming;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;

use doppler_model::Model;

/// Execute a closure that returns an `DopplerStatus`, catching any panics and
/// converting them into `DopplerStatus::ErrorInternal` so a panic never unwinds
/// across the C ABI (propagation policy).
fn catch_panic<F: FnOnce() -> DopplerStatus + std::panic::UnwindSafe>(f: F) -> DopplerStatus {
    match std::panic::catch_unwind(f) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            DopplerStatus::ErrorInternal
        }
    }
}

fn status_for_error(e: &doppler_model::ModelError) -> DopplerStatus {
    use doppler_model::ModelError::*;
    match e {
        Io(_) | ShardMissing(_) => DopplerStatus::ErrorNotFound,
        MalformedManifest(_) => DopplerStatus::ErrorMalformedManifest,
        LayoutMismatch(_) => DopplerStatus::ErrorLayoutMismatch,
        AllocationFailed(_) => DopplerStatus::ErrorAllocationFailed,
        Generation(_) => DopplerStatus::ErrorGenerate,
        Tensor(te) => status_for_tensor_error(te),
        UnsupportedDType(_) | UnsupportedArchitecture(_) | TensorNotFound(_) | Other(_) => {
            DopplerStatus::ErrorInternal
        }
    }
}

fn status_for_tensor_error(e: &doppler_tensor::TensorError) -> DopplerStatus {
    use doppler_tensor::TensorError::*;
    match e {
        AllocationFailed { .. } => DopplerStatus::ErrorAllocationFailed,
        LayoutMismatch => DopplerStatus::ErrorLayoutMismatch,
        NoSuitableAdapter | DeviceLost(_) | Gpu(_) => DopplerStatus::ErrorInternal,
        _ => DopplerStatus::ErrorGenerate,
    }
}

/// Create a new, empty inference context.
///
/// On success, writes a heap-allocated `DopplerContext` pointer into `*ctx_out`
/// and returns `DopplerStatus::Ok`. The caller must later call
/// `doppler_context_destroy` to free the context.
#[no_mangle]
pub extern "C" fn doppler_context_create(ctx_out: *mut *mut DopplerContext) -> DopplerStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return DopplerStatus::ErrorInvalidArgument;
        }
        let ctx = Box::new(DopplerContext::new());
        unsafe {
            *ctx_out = Box::into_raw(ctx);
        }
        DopplerStatus::Ok
    })
}

/// Destroy a context previously created by `doppler_context_create`, releasing
/// any loaded model's GPU buffers, heap segments, and scratch.
///
/// Passing a null pointer is a no-op and returns `DopplerStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn doppler_context_destroy(ctx: *mut DopplerContext) -> DopplerStatus {
    if ctx.is_null() {
        return DopplerStatus::Ok;
    }
    drop(unsafe { Box::from_raw(ctx) });
    DopplerStatus::Ok
}

/// Load a model package (`manifest.json` plus shards, ) into `ctx`.
///
/// Errors: `ErrorNotFound` (manifest or a shard is missing),
/// `ErrorMalformedManifest`, `ErrorLayoutMismatch` (a hot-path weight's
/// on-disk layout doesn't match its declared shape),
/// `ErrorAllocationFailed` (GPU or segmented-heap ceiling exceeded).
#[no_mangle]
pub unsafe extern "C" fn doppler_model_load(
    ctx: *mut DopplerContext,
    manifest_path: *const c_char,
) -> DopplerStatus {
    catch_panic(|| {
        if ctx.is_null() || manifest_path.is_null() {
            set_last_error("null argument".to_string());
            return DopplerStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let path_str = match unsafe { CStr::from_ptr(manifest_path) }.to_str() {
            Ok(s) => s,
            Err(e) => {
                set_last_error(format!("invalid path: {e}"));
                return DopplerStatus::ErrorInvalidArgument;
            }
        };

        match Model::load(Path::new(path_str)) {
            Ok(model) => {
                ctx.model = Some(model);
                DopplerStatus::Ok
            }
            Err(e) => {
                let status = status_for_error(&e);
                set_last_error(e.to_string());
                status
            }
        }
    })
}

/// Generate up to `params.max_tokens` token ids from `prompt_ids`,
/// delivering each one to `callback` as it's decoded — the
/// `generate(handle, prompt_ids, {...}) -> stream of token_id` entry point.
///
/// `callback` returning `false` stops generation early, equivalent to
/// dropping the stream — in-flight GPU work completes and no partial host
/// state is observable (cancellation guarantee). Pass `None` to
/// collect every token without early termination. If `stats_out` is
/// non-null, the generation's observable counters  are written
/// there before returning, whether generation completed, was cancelled, or
/// errored mid-stream.
///
/// A failure constructing the stream (e.g. an empty prompt, or a prefill
/// error) leaves `ctx` without a model — the caller must `doppler_model_load`
/// again. A failure partway through decoding does not: the model is always
/// restored into `ctx` once the stream stops.
#[no_mangle]
pub unsafe extern "C" fn doppler_generate(
    ctx: *mut DopplerContext,
    prompt_ids: *const u32,
    prompt_len: usize,
    params: DopplerGenerateParams,
    callback: DopplerStreamCallback,
    user_data: *mut std::os::raw::c_void,
    stats_out: *mut DopplerGenerationStats,
) -> DopplerStatus {
    catch_panic(|| {
        if ctx.is_null() || prompt_ids.is_null() || prompt_len == 0 {
            set_last_error("null context or empty prompt".to_string());
            return DopplerStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let tokens = unsafe { std::slice::from_raw_parts(prompt_ids, prompt_len) };

        let model = match ctx.model.take() {
            Some(m) => m,
            None => {
                set_last_error("model not loaded".to_string());
                return DopplerStatus::ErrorInvalidArgument;
            }
        };

        let mut stream = match model.generate(tokens, params.into()) {
            Ok(s) => s,
            Err(e) => {
                let status = status_for_error(&e);
                set_last_error(e.to_string());
                return status;
            }
        };

        let mut status = DopplerStatus::Ok;
        while let Some(result) = stream.next() {
            match result {
                Ok(token) => {
                    if !streaming::invoke_callback(callback, user_data, token) {
                        stream.cancel();
                    }
                }
                Err(e) => {
                    status = status_for_error(&e);
                    set_last_error(e.to_string());
                    break;
                }
            }
        }

        if !stats_out.is_null() {
            unsafe { *stats_out = stream.stats().into() };
        }
        ctx.model = Some(stream.into_model());
        status
    })
}

/// Reset the model's KV cache to start a new conversation without
/// reloading weights (`clearKVCache`).
#[no_mangle]
pub unsafe extern "C" fn doppler_clear_kv_cache(ctx: *mut DopplerContext) -> DopplerStatus {
    if ctx.is_null() {
        return DopplerStatus::ErrorInvalidArgument;
    }
    let ctx = unsafe { &mut *ctx };
    match ctx.model.as_mut() {
        Some(model) => {
            model.clear_kv_cache();
            DopplerStatus::Ok
        }
        None => {
            set_last_error("model not loaded".to_string());
            DopplerStatus::ErrorInvalidArgument
        }
    }
}

/// Release the loaded model's GPU buffers, heap segments, and scratch
/// without destroying the context itself (`releaseModel`). The
/// context can be reused with another `doppler_model_load` call.
#[no_mangle]
pub unsafe extern "C" fn doppler_release_model(ctx: *mut DopplerContext) -> DopplerStatus {
    if ctx.is_null() {
        return DopplerStatus::ErrorInvalidArgument;
    }
    let ctx = unsafe { &mut *ctx };
    ctx.model = None;
    DopplerStatus::Ok
}

/// Retrieve the last error message set by any entry point in this crate.
///
/// Returns a pointer to a C string, or null if no error has occurred since
/// the last call. The caller must free a non-null result with
/// `doppler_free_string`.
#[no_mangle]
pub extern "C" fn doppler_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `doppler_last_error`.
#[no_mangle]
pub unsafe extern "C" fn doppler_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}
