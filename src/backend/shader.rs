// Shader module loading
//
// SPIR-V is produced by build.rs and embedded at compile time.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

use super::VulkanDevice;

pub const SQUARE_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/square.vert.spv"));
pub const SQUARE_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/square.frag.spv"));

/// Decode SPIR-V bytes into aligned words
pub fn decode_spirv(name: &str, code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        anyhow::bail!(
            "Shader {} was not compiled (glslc missing at build time). Install the Vulkan SDK and rebuild.",
            name
        );
    }

    ash::util::read_spv(&mut Cursor::new(code))
        .with_context(|| format!("Shader {} is not valid SPIR-V", name))
}

/// Create a shader module from embedded SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, name: &str, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = decode_spirv(name, code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .with_context(|| format!("Failed to create shader module {}", name))
}
