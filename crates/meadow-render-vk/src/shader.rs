// SPDX-License-Identifier: CEPL-1.0
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::{vk, Device};

/// Where build.rs leaves the compiled SPIR-V.
pub const SHADER_BINARY_DIR: &str = env!("OUT_DIR");

pub const VERTEX_SHADER: &str = "triangle.vert.spv";
pub const FRAGMENT_SHADER: &str = "triangle.frag.spv";

pub fn shader_dir(configured: Option<&Path>) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(SHADER_BINARY_DIR))
}

/// Reads an opaque SPIR-V blob. The length and magic number are checked by
/// `read_spv`; nothing else is.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file =
        File::open(path).with_context(|| format!("open shader {}", path.display()))?;
    read_spv(&mut file).with_context(|| format!("read SPIR-V from {}", path.display()))
}

pub unsafe fn create_shader_module(device: &Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("create_shader_module")
}
