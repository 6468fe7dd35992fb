use crate::error::RenderError;

use std::path::Path;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

pub const VERTEX_ENTRY: &[u8] = b"vertMain\0";
pub const FRAGMENT_ENTRY: &[u8] = b"fragMain\0";

/// Reads a compiled SPIR-V module from disk. A missing or
/// unreadable file is fatal and the error names the path.
pub fn load_shader(path: &Path) -> Result<Vec<u8>, RenderError> {
    let bytecode = std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Loaded shader `{}` ({} bytes).", path.display(), bytecode.len());
    Ok(bytecode)
}

/// SPIR-V is a stream of 32-bit words. Bytes are copied into
/// words so that the result is aligned whatever the source
/// buffer's alignment.
pub fn bytecode_to_words(bytecode: &[u8]) -> Result<Vec<u32>, RenderError> {
    if bytecode.is_empty() || bytecode.len() % 4 != 0 {
        return Err(RenderError::UnalignedShader(bytecode.len()));
    }

    Ok(bytecode
        .chunks_exact(4)
        .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

pub unsafe fn create_shader_module(device: &Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let code = bytecode_to_words(bytecode)?;

    // The size is given in bytes even though the code is
    // handed over as words.
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.len())
        .code(&code);

    Ok(device.create_shader_module(&info, None)?)
}
