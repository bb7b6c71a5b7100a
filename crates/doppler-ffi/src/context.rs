use doppler_model::Model;

/// Opaque handle owning a loaded model (`ModelHandle`).
///
/// `model` is `None` before `doppler_model_load` succeeds or after
/// `doppler_release_model`. `doppler_generate` temporarily takes ownership of the
/// model to drive its `TokenStream` and always restores it — on success or
/// on error — before returning, so the handle never observes a generation
/// in progress.
pub struct DopplerContext {
    pub model: Option<Model>,
}

impl DopplerContext {
    pub fn new() -> Self {
        DopplerContext { model: None }
    }
}

impl Default for DopplerContext {
    fn default() -> Self {
        Self::new()
    }
}
