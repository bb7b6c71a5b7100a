use crate::types::DopplerStreamCallback;

/// Invoke a streaming callback with a generated token id.
///
/// Returns `true` if generation should continue, `false` to stop. With no
/// callback installed, always continues — used by callers that only want
/// the final `doppler_generate` status and stats, not per-token delivery.
pub fn invoke_callback(
    callback: DopplerStreamCallback,
    user_data: *mut std::os::raw::c_void,
    token_id: u32,
) -> bool {
    match callback {
        Some(cb) => cb(token_id, user_data),
        None => true,
    }
}
