// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Compiled modules are read from
// `<assets>/shaders/<name>.<stage>.spv`.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;
use crate::config::AssetConfig;
use crate::renderer::RendererError;

/// A loaded shader module and the pipeline stage it is used at.
pub struct ShaderStage {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<VulkanDevice>,
}

impl ShaderStage {
    pub fn load(
        device: Arc<VulkanDevice>,
        assets: &AssetConfig,
        name: &str,
        stage_name: &str,
        stage: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let path = assets.shader_path(name, stage_name);
        let code = read_spirv(&path)?;
        let module = create_shader_module(&device, &code)?;
        log::debug!("Loaded shader module {:?}", path);

        Ok(Self {
            module,
            stage,
            device,
        })
    }
}

impl Drop for ShaderStage {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

/// Read a SPIR-V file as aligned words.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|_| RendererError::ShaderLoad {
            path: path.to_path_buf(),
        })?;
    ash::util::read_spv(&mut Cursor::new(bytes))
        .with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader_reports_path() {
        let err = read_spirv(Path::new("nowhere/Missing.vert.spv")).unwrap_err();
        match err.downcast_ref::<RendererError>() {
            Some(RendererError::ShaderLoad { path }) => {
                assert!(path.ends_with("Missing.vert.spv"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn spirv_words_are_read_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.spv");
        // magic number followed by one word
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(read_spirv(&path).unwrap(), vec![0x0723_0203, 7]);
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.spv");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(read_spirv(&path).is_err());
    }
}
