use wgpu::util::DeviceExt;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::gpu::device::GpuDevice;
use crate::shape::Shape;

/// A device-resident tensor buffer: a `wgpu::Buffer` plus the shape/dtype
/// metadata needed to validate kernel dispatches against it. Owned
/// exclusively by whichever component created it (the Tensor Catalog or
/// the KV-Cache); the Command Recorder only ever borrows the inner buffer.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    shape: Shape,
    dtype: DType,
}

impl GpuBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn byte_len(&self) -> u64 {
        self.buffer.size()
    }

    /// Allocates a zeroed device-local storage buffer sized for `shape` at
    /// `dtype`, usable as both a dispatch input and output.
    pub fn zeros(gpu: &GpuDevice, shape: Shape, dtype: DType, label: &str) -> Result<Self> {
        let byte_len = dtype.data_size(shape.numel()) as u64;
        if byte_len > gpu.max_storage_binding_size() {
            return Err(TensorError::AllocationFailed {
                requested: byte_len as usize,
                ceiling: gpu.max_storage_binding_size() as usize,
            });
        }
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: byte_len,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(GpuBuffer {
            buffer,
            shape,
            dtype,
        })
    }

    /// Uploads `bytes` to a fresh device-local buffer by streaming through
    /// staging chunks no larger than `gpu.config.max_staging_bytes`, per
    /// the loader's streamed-upload step: copy into staging, dispatch a
    /// copy to the device-local buffer, fence.
    pub fn upload_staged(
        gpu: &GpuDevice,
        bytes: &[u8],
        shape: Shape,
        dtype: DType,
        label: &str,
    ) -> Result<Self> {
        let dest = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes.len() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let chunk_size = gpu.config.max_staging_bytes as usize;
        let mut offset = 0usize;
        while offset < bytes.len() {
            let end = (offset + chunk_size).min(bytes.len());
            let chunk = &bytes[offset..end];

            let staging = gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("doppler-staging"),
                    contents: chunk,
                    usage: wgpu::BufferUsages::COPY_SRC,
                });

            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("doppler-staging-copy"),
                });
            encoder.copy_buffer_to_buffer(&staging, 0, &dest, offset as u64, chunk.len() as u64);
            gpu.queue.submit(Some(encoder.finish()));

            offset = end;
        }

        log::debug!(
            "uploaded {} bytes to '{}' in {}-byte chunks",
            bytes.len(),
            label,
            chunk_size
        );

        Ok(GpuBuffer {
            buffer: dest,
            shape,
            dtype,
        })
    }

    /// Reads the buffer back to a host `Vec<f32>`. Must only be called
    /// once every recorder referencing this buffer has been submitted and
    /// awaited (see `CommandRecorder::assert_flushed`).
    pub fn read_to_f32(&self, gpu: &GpuDevice) -> Result<Vec<f32>> {
        if self.dtype != DType::F32 {
            return Err(TensorError::DTypeMismatch {
                expected: DType::F32.to_string(),
                got: self.dtype.to_string(),
            });
        }

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("doppler-readback-staging"),
            size: self.buffer.size(),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("doppler-readback-copy"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, self.buffer.size());
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| TensorError::Gpu(e.to_string()))?
            .map_err(|e| TensorError::Gpu(e.to_string()))?;

        let data = slice.get_mapped_range();
        let floats: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();

        Ok(floats)
    }
}
