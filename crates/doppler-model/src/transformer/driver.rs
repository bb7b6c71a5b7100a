//! Transformer layer driver : dispatches the Gemma-3
//! sandwich-norm decoder block — pre/post attention norm, per-head Q/K
//! norm, GQA attention, pre/post FFN norm, dense or MoE FFN — using the
//! kernel library's `plan()`/`bindings()`/`SHADER_SRC` triples.
//!
//! `doppler_tensor`'s kernel modules stop at planning a dispatch; actually
//! building the bind group and recording it is this driver's job, via the
//! small `dispatch_kernel` helper below.

use doppler_tensor::dtype::DType;
use doppler_tensor::gpu::buffers::GpuBuffer;
use doppler_tensor::gpu::device::GpuDevice;
use doppler_tensor::gpu::kernels::{attention, gather, matmul, residual, rmsnorm, rope, scale};
use doppler_tensor::gpu::pipeline::{BindingDesc, PipelineCache};
use doppler_tensor::gpu::recorder::CommandRecorder;
use doppler_tensor::gpu::uniform::KernelUniform;
use doppler_tensor::shape::Shape;
use wgpu::util::DeviceExt;

use crate::architecture::Architecture;
use crate::catalog::{TensorCatalog, TensorVariant};
use crate::error::{ModelError, Result};
use crate::transformer::ffn;
use crate::transformer::kv_cache::KvCache;

/// One logical dispatch: a compiled kernel, the buffers bound in binding
/// order, and the workgroup count already computed by `plan()`.
pub(crate) fn dispatch_kernel<U: KernelUniform>(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    kernel_name: &'static str,
    shader_src: &str,
    entry_point: &str,
    bindings: &[BindingDesc],
    uniforms: U,
    buffers: &[&wgpu::Buffer],
    workgroups: (u32, u32, u32),
) -> Result<()> {
    U::assert_matches_shader(shader_src).map_err(ModelError::Tensor)?;

    let uniform_buf = gpu
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(kernel_name),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

    let compiled = cache.get_or_compile(gpu, kernel_name, shader_src, entry_point, bindings);

    let mut entries = Vec::with_capacity(buffers.len() + 1);
    entries.push(wgpu::BindGroupEntry {
        binding: 0,
        resource: uniform_buf.as_entire_binding(),
    });
    for (i, buf) in buffers.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: (i + 1) as u32,
            resource: buf.as_entire_binding(),
        });
    }

    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(kernel_name),
        layout: &compiled.bind_group_layout,
        entries: &entries,
    });

    recorder
        .dispatch(gpu, &compiled.pipeline, &bind_group, workgroups)
        .map_err(ModelError::Tensor)
}

/// Dispatches RoPE against one token's `[n_heads, head_dim]` slice of a
/// packed `[n_tokens, n_heads * head_dim]` buffer, since the shader
/// rotates a single position at a time (the `startPos` continuation:
/// prefill applies this once per token at increasing positions, decode
/// applies it once at the new token's position).
fn dispatch_rope_token(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    buf: &wgpu::Buffer,
    byte_offset: u64,
    byte_size: u64,
    uniforms: rope::RopeUniforms,
    workgroups: (u32, u32, u32),
) -> Result<()> {
    rope::RopeUniforms::assert_matches_shader(rope::SHADER_SRC).map_err(ModelError::Tensor)?;

    let uniform_buf = gpu
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rope"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

    let compiled = cache.get_or_compile(
        gpu,
        "rope",
        rope::SHADER_SRC,
        rope::ENTRY_POINT,
        &rope::bindings(),
    );

    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("rope"),
        layout: &compiled.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: buf,
                    offset: byte_offset,
                    size: std::num::NonZeroU64::new(byte_size),
                }),
            },
        ],
    });

    recorder
        .dispatch(gpu, &compiled.pipeline, &bind_group, workgroups)
        .map_err(ModelError::Tensor)
}

/// Selects the matmul kernel (plain dense vs fused q4k-dequant) by the
/// weight's catalog variant, so callers never branch on variant
/// themselves (tagged-`TensorVariant` redesign).
pub(crate) fn dispatch_matmul(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    weight: &GpuBuffer,
    weight_variant: TensorVariant,
    input: &wgpu::Buffer,
    output: &wgpu::Buffer,
    m: usize,
    k: usize,
    n: usize,
) -> Result<()> {
    match weight_variant {
        TensorVariant::Q4KRowwise => {
            use doppler_tensor::gpu::kernels::dequant;
            let (uniforms, workgroups) =
                dequant::plan(m, k, n, weight.byte_len() as usize).map_err(ModelError::Tensor)?;
            dispatch_kernel(
                gpu,
                cache,
                recorder,
                "matmul_q4k",
                dequant::SHADER_SRC,
                dequant::ENTRY_POINT,
                &dequant::bindings(),
                uniforms,
                &[input, weight.buffer(), output],
                workgroups,
            )
        }
        TensorVariant::Dense | TensorVariant::Q4KDequantized => {
            let (uniforms, workgroups) = matmul::plan(m, k, k, n).map_err(ModelError::Tensor)?;
            dispatch_kernel(
                gpu,
                cache,
                recorder,
                "matmul_dense",
                matmul::SHADER_SRC,
                matmul::ENTRY_POINT,
                &matmul::bindings(),
                uniforms,
                &[input, weight.buffer(), output],
                workgroups,
            )
        }
    }
}

/// Dispatches RMSNorm over `x` (`n_rows` of `hidden_size`) into `out`,
/// scaled by `weight`.
#[allow(clippy::too_many_arguments)]
fn dispatch_rmsnorm(
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
    let (uniforms, workgroups) =
        rmsnorm::plan(x_len, hidden_size, hidden_size, eps).map_err(ModelError::Tensor)?;
    dispatch_kernel(
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

/// Embeds `tokens` via the token-embedding table (Gather step), applying
/// `arch.embedding_scale()` (Gemma-3's `sqrt(hidden_size)` normalizer) as a
/// separate dispatch right after — `gather` itself stays an exact copy
/// (`maxError == 0` is one of its correctness invariants).
pub fn embed(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    catalog: &TensorCatalog,
    arch: &Architecture,
    tokens: &[u32],
) -> Result<GpuBuffer> {
    let hidden_size = arch.hidden_size;
    let embd = catalog.get("token_embd.weight")?;
    let indices = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("gather-indices"),
        contents: bytemuck::cast_slice(tokens),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    });
    let out = GpuBuffer::zeros(
        gpu,
        Shape::new(vec![tokens.len(), hidden_size]),
        DType::F32,
        "embedded-tokens",
    )
    .map_err(ModelError::Tensor)?;

    let (uniforms, workgroups) = gather::plan(
        embd.buffer.shape().numel(),
        tokens.len(),
        hidden_size,
    )
    .map_err(ModelError::Tensor)?;
    dispatch_kernel(
        gpu,
        cache,
        recorder,
        "gather",
        gather::SHADER_SRC,
        gather::ENTRY_POINT,
        &gather::bindings(),
        uniforms,
        &[embd.buffer.buffer(), &indices, out.buffer()],
        workgroups,
    )?;

    if let Some(factor) = arch.embedding_scale() {
        let (uniforms, workgroups) =
            scale::plan(tokens.len() * hidden_size, factor).map_err(ModelError::Tensor)?;
        dispatch_kernel(
            gpu,
            cache,
            recorder,
            "scale",
            scale::SHADER_SRC,
            scale::ENTRY_POINT,
            &scale::bindings(),
            uniforms,
            &[out.buffer(), out.buffer()],
            workgroups,
        )?;
    }

    Ok(out)
}

/// One decoder block's forward pass (pseudocode):
///
/// ```text
/// residual = x
/// h = rmsnorm(x, attn_norm_w)
/// q, k, v = project(h)
/// q, k = qk_norm(q, k)           # if arch.qk_norm
/// q, k = rope(q, k, pos)
/// attn_out = attention(q, k, v, kv_cache)
/// attn_out = project_out(attn_out)
/// attn_out = rmsnorm(attn_out, post_attn_norm_w)   # sandwich norm
/// x = residual + attn_out
/// residual = x
/// h = rmsnorm(x, ffn_norm_w)
/// ffn_out = ffn(h)                # dense swiglu or moe
/// ffn_out = rmsnorm(ffn_out, post_ffn_norm_w)      # sandwich norm
/// x = residual + ffn_out
/// ```
#[allow(clippy::too_many_arguments)]
pub fn forward_block(
    gpu: &GpuDevice,
    cache: &mut PipelineCache,
    recorder: &mut CommandRecorder,
    catalog: &TensorCatalog,
    kv_cache: &mut KvCache,
    arch: &Architecture,
    layer: usize,
    x: &GpuBuffer,
    pos: usize,
    n_tokens: usize,
) -> Result<GpuBuffer> {
    let prefix = format!("blk.{layer}");
    let hidden = arch.hidden_size;
    let head_dim = arch.head_dim;
    let h_q = arch.num_attention_heads;
    let h_kv = arch.num_key_value_heads;

    let attn_norm_w = catalog.get(&format!("{prefix}.attn_norm.weight"))?;
    let normed = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "attn-normed")
        .map_err(ModelError::Tensor)?;
    dispatch_rmsnorm(
        gpu,
        cache,
        recorder,
        x.buffer(),
        attn_norm_w.buffer.buffer(),
        normed.buffer(),
        n_tokens * hidden,
        hidden,
        arch.norm_eps,
    )?;

    let q_w = catalog.get(&format!("{prefix}.attn_q.weight"))?;
    let k_w = catalog.get(&format!("{prefix}.attn_k.weight"))?;
    let v_w = catalog.get(&format!("{prefix}.attn_v.weight"))?;

    let q = GpuBuffer::zeros(
        gpu,
        Shape::new(vec![n_tokens, h_q * head_dim]),
        DType::F32,
        "q-proj",
    )
    .map_err(ModelError::Tensor)?;
    let k = GpuBuffer::zeros(
        gpu,
        Shape::new(vec![n_tokens, h_kv * head_dim]),
        DType::F32,
        "k-proj",
    )
    .map_err(ModelError::Tensor)?;
    let v = GpuBuffer::zeros(
        gpu,
        Shape::new(vec![n_tokens, h_kv * head_dim]),
        DType::F32,
        "v-proj",
    )
    .map_err(ModelError::Tensor)?;

    dispatch_matmul(
        gpu,
        cache,
        recorder,
        &q_w.buffer,
        q_w.variant,
        normed.buffer(),
        q.buffer(),
        n_tokens,
        hidden,
        h_q * head_dim,
    )?;
    dispatch_matmul(
        gpu,
        cache,
        recorder,
        &k_w.buffer,
        k_w.variant,
        normed.buffer(),
        k.buffer(),
        n_tokens,
        hidden,
        h_kv * head_dim,
    )?;
    dispatch_matmul(
        gpu,
        cache,
        recorder,
        &v_w.buffer,
        v_w.variant,
        normed.buffer(),
        v.buffer(),
        n_tokens,
        hidden,
        h_kv * head_dim,
    )?;

    if arch.qk_norm {
        let q_norm_w = catalog.get(&format!("{prefix}.attn_q_norm.weight"))?;
        let k_norm_w = catalog.get(&format!("{prefix}.attn_k_norm.weight"))?;
        dispatch_rmsnorm(
            gpu,
            cache,
            recorder,
            q.buffer(),
            q_norm_w.buffer.buffer(),
            q.buffer(),
            n_tokens * h_q * head_dim,
            head_dim,
            arch.norm_eps,
        )?;
        dispatch_rmsnorm(
            gpu,
            cache,
            recorder,
            k.buffer(),
            k_norm_w.buffer.buffer(),
            k.buffer(),
            n_tokens * h_kv * head_dim,
            head_dim,
            arch.norm_eps,
        )?;
    }

    for (buf, n_heads) in [(q.buffer(), h_q), (k.buffer(), h_kv)] {
        let token_stride = (n_heads * head_dim * DType::F32.size_in_bytes()) as u64;
        for t in 0..n_tokens {
            let (uniforms, workgroups) =
                rope::plan(n_heads * head_dim, n_heads, head_dim, pos + t, arch.rope_theta)
                    .map_err(ModelError::Tensor)?;
            dispatch_rope_token(
                gpu,
                cache,
                recorder,
                buf,
                t as u64 * token_stride,
                (n_heads * head_dim) as u64 * DType::F32.size_in_bytes() as u64,
                uniforms,
                workgroups,
            )?;
        }
    }

    let cache_start = kv_cache.advance(layer, n_tokens).map_err(|_| {
        ModelError::Generation(format!("kv-cache overflow at layer {layer}, pos {pos}"))
    })?;
    let (k_cache_buf, v_cache_buf) = kv_cache.buffers(layer)?;
    let elem_size = DType::F32.size_in_bytes() as u64;
    recorder
        .copy_buffer_to_buffer(
            k.buffer(),
            0,
            k_cache_buf.buffer(),
            cache_start as u64 * h_kv as u64 * head_dim as u64 * elem_size,
            k.byte_len(),
        )
        .map_err(ModelError::Tensor)?;
    recorder
        .copy_buffer_to_buffer(
            v.buffer(),
            0,
            v_cache_buf.buffer(),
            cache_start as u64 * h_kv as u64 * head_dim as u64 * elem_size,
            v.byte_len(),
        )
        .map_err(ModelError::Tensor)?;

    let t_k = kv_cache.cursor(layer)?;
    let is_decode = n_tokens == 1;
    let tier = attention::select_tier(n_tokens, is_decode);
    let attn_raw = GpuBuffer::zeros(
        gpu,
        Shape::new(vec![n_tokens, h_q * head_dim]),
        DType::F32,
        "attn-out-raw",
    )
    .map_err(ModelError::Tensor)?;
    let (uniforms, workgroups) =
        attention::plan(tier, n_tokens, t_k, h_q, h_kv, head_dim).map_err(ModelError::Tensor)?;
    let (k_cache_buf, v_cache_buf) = kv_cache.buffers(layer)?;
    dispatch_kernel(
        gpu,
        cache,
        recorder,
        match tier {
            attention::AttentionTier::Streaming => "attention_streaming",
            attention::AttentionTier::TiledSmall => "attention_tiled_small",
            attention::AttentionTier::TiledLarge => "attention_tiled_large",
        },
        tier.shader_src(),
        attention::ENTRY_POINT,
        &attention::bindings(),
        uniforms,
        &[
            q.buffer(),
            k_cache_buf.buffer(),
            v_cache_buf.buffer(),
            attn_raw.buffer(),
        ],
        workgroups,
    )?;

    let o_w = catalog.get(&format!("{prefix}.attn_output.weight"))?;
    let attn_out = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "attn-out-proj")
        .map_err(ModelError::Tensor)?;
    dispatch_matmul(
        gpu,
        cache,
        recorder,
        &o_w.buffer,
        o_w.variant,
        attn_raw.buffer(),
        attn_out.buffer(),
        n_tokens,
        h_q * head_dim,
        hidden,
    )?;

    let attn_final = if arch.sandwich_norm {
        let post_attn_norm_w = catalog.get(&format!("{prefix}.post_attention_norm.weight"))?;
        let normed_attn = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "post-attn-normed")
            .map_err(ModelError::Tensor)?;
        dispatch_rmsnorm(
            gpu,
            cache,
            recorder,
            attn_out.buffer(),
            post_attn_norm_w.buffer.buffer(),
            normed_attn.buffer(),
            n_tokens * hidden,
            hidden,
            arch.norm_eps,
        )?;
        normed_attn
    } else {
        attn_out
    };

    let after_attn = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "after-attn-residual")
        .map_err(ModelError::Tensor)?;
    let (uniforms, workgroups) =
        residual::plan(n_tokens * hidden, n_tokens * hidden).map_err(ModelError::Tensor)?;
    dispatch_kernel(
        gpu,
        cache,
        recorder,
        "residual",
        residual::SHADER_SRC,
        residual::ENTRY_POINT,
        &residual::bindings(),
        uniforms,
        &[x.buffer(), attn_final.buffer(), after_attn.buffer()],
        workgroups,
    )?;

    let ffn_norm_w = catalog.get(&format!("{prefix}.ffn_norm.weight"))?;
    let ffn_normed = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "ffn-normed")
        .map_err(ModelError::Tensor)?;
    dispatch_rmsnorm(
        gpu,
        cache,
        recorder,
        after_attn.buffer(),
        ffn_norm_w.buffer.buffer(),
        ffn_normed.buffer(),
        n_tokens * hidden,
        hidden,
        arch.norm_eps,
    )?;

    let ffn_out = ffn::dispatch_ffn(
        gpu, cache, recorder, catalog, arch, layer, &ffn_normed, n_tokens,
    )?;

    let ffn_final = if arch.sandwich_norm {
        let post_ffn_norm_w = catalog.get(&format!("{prefix}.post_ffn_norm.weight"))?;
        let normed_ffn = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "post-ffn-normed")
            .map_err(ModelError::Tensor)?;
        dispatch_rmsnorm(
            gpu,
            cache,
            recorder,
            ffn_out.buffer(),
            post_ffn_norm_w.buffer.buffer(),
            normed_ffn.buffer(),
            n_tokens * hidden,
            hidden,
            arch.norm_eps,
        )?;
        normed_ffn
    } else {
        ffn_out
    };

    let block_out = GpuBuffer::zeros(gpu, x.shape().clone(), DType::F32, "block-out")
        .map_err(ModelError::Tensor)?;
    let (uniforms, workgroups) =
        residual::plan(n_tokens * hidden, n_tokens * hidden).map_err(ModelError::Tensor)?;
    dispatch_kernel(
        gpu,
        cache,
        recorder,
        "residual",
        residual::SHADER_SRC,
        residual::ENTRY_POINT,
        &residual::bindings(),
        uniforms,
        &[after_attn.buffer(), ffn_final.buffer(), block_out.buffer()],
        workgroups,
    )?;

    Ok(block_out)
}
