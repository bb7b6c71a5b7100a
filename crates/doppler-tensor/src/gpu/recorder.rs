use crate::error::{Result, TensorError};
use crate::gpu::device::GpuDevice;

/// Ordered sequence of kernel dispatches pending submission.
///
/// Lifecycle: `new` (created) → `dispatch`/`barrier` (appended to) →
/// `submit` (submitted) → `await_completion` (awaited) → dropped or reused
/// via `clear`. A recorder borrows buffer handles — it never owns them —
/// and its lifetime must stay shorter than the buffers it references.
/// Debug readbacks are forbidden while a recorder still holds undispatched
/// work against a buffer; callers must submit and await first.
pub struct CommandRecorder {
    label: String,
    encoder: Option<wgpu::CommandEncoder>,
    dispatch_count: usize,
    submitted: bool,
    /// When set, every `dispatch()` submits and awaits immediately instead
    /// of accumulating into one end-of-block submission — the layer
    /// driver's command-batching flag, disabled case.
    auto_submit: bool,
    /// Cumulative count of real GPU submissions this recorder has made,
    /// whether via auto-submit flushes or explicit `submit()` calls.
    /// Empty flushes (no dispatch recorded since the last one) don't count.
    total_submits: usize,
}

impl CommandRecorder {
    pub fn new(gpu: &GpuDevice, label: &str) -> Self {
        Self::with_auto_submit(gpu, label, false)
    }

    /// Like `new`, but with `auto_submit` controlling whether each
    /// `dispatch()` call submits and fences immediately (unbatched) or
    /// accumulates for a single end-of-block `submit()` (batched).
    pub fn with_auto_submit(gpu: &GpuDevice, label: &str, auto_submit: bool) -> Self {
        let encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
        CommandRecorder {
            label: label.to_string(),
            encoder: Some(encoder),
            dispatch_count: 0,
            submitted: false,
            auto_submit,
            total_submits: 0,
        }
    }

    /// Number of dispatches appended since the last `clear`.
    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count
    }

    /// Cumulative number of real (non-empty) GPU submissions made by this
    /// recorder so far, counting both auto-submit flushes and explicit
    /// `submit()` calls. This is what the the `gpu_submit_count_*`
    /// counters should report.
    pub fn total_submits(&self) -> usize {
        self.total_submits
    }

    /// Submits the current encoder immediately if it holds any dispatch,
    /// then starts a fresh one. A no-op (and not counted) if nothing has
    /// been recorded since the last flush.
    fn flush_now(&mut self, gpu: &GpuDevice) -> Result<()> {
        if self.dispatch_count == 0 {
            return Ok(());
        }
        let encoder = self.encoder.take().ok_or_else(|| {
            TensorError::Other(format!("recorder '{}' has no live encoder", self.label))
        })?;
        gpu.queue.submit(Some(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
        self.total_submits += 1;
        self.encoder = Some(
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&self.label),
                }),
        );
        self.dispatch_count = 0;
        self.submitted = false;
        Ok(())
    }

    /// True once this recorder has been submitted but not yet cleared for
    /// reuse. Debug readbacks against any buffer this recorder touched must
    /// wait until `submit` + `await_completion` have both run.
    pub fn has_undispatched_work(&self) -> bool {
        !self.submitted && self.dispatch_count > 0
    }

    /// Appends one compute dispatch: bind the given pipeline and bind
    /// group, then dispatch `(x, y, z)` workgroups. 2-D/3-D dispatches must
    /// have already linearized their global ID via a uniform-provided
    /// `workgroupsX` field if the shader only reads `global_id.x`; this
    /// recorder does not itself enforce that (the kernel module does, at
    /// uniform-construction time).
    pub fn dispatch(
        &mut self,
        gpu: &GpuDevice,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: (u32, u32, u32),
    ) -> Result<()> {
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            TensorError::RecorderNotFlushed(format!(
                "recorder '{}' already submitted; call clear() before reuse",
                self.label
            ))
        })?;

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
        }

        self.dispatch_count += 1;
        if self.auto_submit {
            self.flush_now(gpu)?;
        }
        Ok(())
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            TensorError::RecorderNotFlushed(format!(
                "recorder '{}' already submitted; call clear() before reuse",
                self.label
            ))
        })?;
        encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
        Ok(())
    }

    /// Submits every dispatch appended so far. Does not block; call
    /// `await_completion` to wait for the GPU. A no-op if auto-submit
    /// already flushed everything recorded (nothing left to submit).
    pub fn submit(&mut self, gpu: &GpuDevice) -> Result<()> {
        if self.dispatch_count == 0 {
            self.submitted = true;
            return Ok(());
        }
        let encoder = self.encoder.take().ok_or_else(|| {
            TensorError::Other(format!("recorder '{}' already submitted", self.label))
        })?;
        gpu.queue.submit(Some(encoder.finish()));
        self.total_submits += 1;
        self.submitted = true;
        Ok(())
    }

    /// Blocks until every submission on this device has completed. This is
    /// one of the engine's three host suspension points.
    pub fn await_completion(&self, gpu: &GpuDevice) {
        gpu.device.poll(wgpu::Maintain::Wait);
    }

    /// Resets the recorder for reuse with a fresh encoder, after
    /// `submit` + `await_completion`.
    pub fn clear(&mut self, gpu: &GpuDevice) {
        self.encoder = Some(
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&self.label),
                }),
        );
        self.dispatch_count = 0;
        self.submitted = false;
    }

    /// Returns an error if this recorder still holds undispatched work,
    /// per the "no debug readback while a recorder holds undispatched
    /// work" invariant.
    pub fn assert_flushed(&self) -> Result<()> {
        if self.has_undispatched_work() {
            return Err(TensorError::RecorderNotFlushed(self.label.clone()));
        }
        Ok(())
    }
}

// Constructing a `CommandRecorder` requires a live `GpuDevice` (itself
// requiring a real adapter), so its dispatch-count/flush-state bookkeeping
// is exercised indirectly through `crate::gpu::kernels` tests, which stub
// shape and uniform validation without requiring a device. See
// `crate::cpu` for the numeric ground truth every kernel is checked
// against.
