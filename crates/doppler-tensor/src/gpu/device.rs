use crate::error::{Result, TensorError};

/// Device selection and resource-ceiling policy, constructed programmatically
/// (there is no separate config file — see the manifest for model topology).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Request `TIMESTAMP_QUERY` if the adapter supports it. Correctness
    /// must never depend on this being granted.
    pub request_timestamps: bool,
    /// Upper bound on any single staging-buffer upload during weight
    /// loading (the "≤16 MiB" streamed-upload rule).
    pub max_staging_bytes: u64,
    /// The layer driver's command-batching flag : when true,
    /// one block's dispatches accumulate into a single end-of-block
    /// submission; when false, every dispatch submits and fences
    /// immediately. Defaults to batched — unbatched mode exists for the
    /// command-batching invariant  and for isolating a single
    /// dispatch's failure during debugging.
    pub batch_commands: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            power_preference: wgpu::PowerPreference::HighPerformance,
            request_timestamps: true,
            max_staging_bytes: 16 << 20,
            batch_commands: true,
        }
    }
}

/// An initialized GPU device: instance, adapter, logical device and queue.
/// Owns nothing else — buffers belong to the Tensor Catalog or the
/// KV-Cache, never to this type.
#[derive(Debug)]
pub struct GpuDevice {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: DeviceConfig,
    /// True if the adapter granted `TIMESTAMP_QUERY`.
    pub timestamps_available: bool,
}

impl GpuDevice {
    /// Creates a device from the given config, blocking on adapter/device
    /// negotiation (there is no async runtime in this engine — see
    /// the concurrency model's single-host-thread scheduling rule).
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(TensorError::NoSuitableAdapter)?;

        let adapter_features = adapter.features();
        let want_timestamps =
            config.request_timestamps && adapter_features.contains(wgpu::Features::TIMESTAMP_QUERY);
        let mut features = wgpu::Features::empty();
        if want_timestamps {
            features |= wgpu::Features::TIMESTAMP_QUERY;
        }

        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("doppler-device"),
                required_features: features,
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| TensorError::Gpu(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|e| {
            log::error!("uncaptured wgpu error: {e}");
        }));

        log::debug!(
            "gpu device ready: adapter={:?}, timestamps={}",
            adapter.get_info().name,
            want_timestamps
        );

        Ok(GpuDevice {
            instance,
            adapter,
            device,
            queue,
            config,
            timestamps_available: want_timestamps,
        })
    }

    pub fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    pub fn max_storage_binding_size(&self) -> u64 {
        self.device.limits().max_storage_buffer_binding_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_batches_commands_and_caps_staging_at_16mib() {
        let cfg = DeviceConfig::default();
        assert!(cfg.batch_commands);
        assert_eq!(cfg.max_staging_bytes, 16 << 20);
        assert_eq!(cfg.power_preference, wgpu::PowerPreference::HighPerformance);
    }

    #[test]
    fn config_is_cloneable_for_per_call_overrides() {
        let mut cfg = DeviceConfig::default();
        cfg.batch_commands = false;
        let cloned = cfg.clone();
        assert!(!cloned.batch_commands);
        assert!(DeviceConfig::default().batch_commands);
    }
}
