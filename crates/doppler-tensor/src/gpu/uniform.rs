use crate::error::{Result, TensorError};

/// A uniform struct shared with a compute shader. `FIELD_ORDER` must list
/// the struct's fields in the exact order the shader's `struct` declares
/// them — see the softmax postmortem in the design notes. Every kernel
/// module's uniform type implements this and is checked against its WGSL
/// source by a test in that module, so a drift between the two is a test
/// failure rather than a silent runtime corruption.
pub trait KernelUniform: bytemuck::Pod + bytemuck::Zeroable {
    /// Name of the kernel this uniform belongs to, for error messages.
    const KERNEL: &'static str;
    /// Field names in host-struct declaration order.
    const FIELD_ORDER: &'static [&'static str];

    /// Asserts `FIELD_ORDER` matches the field order declared in the WGSL
    /// source's `struct Uniforms { ... }` block, by checking every name
    /// appears in `wgsl_source` in the same relative order.
    fn assert_matches_shader(wgsl_source: &str) -> Result<()> {
        let mut search_from = 0usize;
        for field in Self::FIELD_ORDER {
            match wgsl_source[search_from..].find(field) {
                Some(pos) => search_from += pos + field.len(),
                None => {
                    return Err(TensorError::UniformLayout {
                        kernel: Self::KERNEL.to_string(),
                        detail: format!("field '{field}' not found after the previous field"),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Example {
        m: u32,
        n: u32,
        k: u32,
    }

    impl KernelUniform for Example {
        const KERNEL: &'static str = "example";
        const FIELD_ORDER: &'static [&'static str] = &["m", "n", "k"];
    }

    #[test]
    fn test_matching_order_passes() {
        let wgsl = "struct Uniforms { m: u32, n: u32, k: u32 }";
        assert!(Example::assert_matches_shader(wgsl).is_ok());
    }

    #[test]
    fn test_swapped_order_fails() {
        let wgsl = "struct Uniforms { n: u32, m: u32, k: u32 }";
        assert!(Example::assert_matches_shader(wgsl).is_err());
    }

    #[test]
    fn test_missing_field_fails() {
        let wgsl = "struct Uniforms { m: u32, k: u32 }";
        assert!(Example::assert_matches_shader(wgsl).is_err());
    }
}
