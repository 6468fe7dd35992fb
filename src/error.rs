use std::path::PathBuf;

use thiserror::Error;
use vulkanalia::vk;

/// Fatal conditions raised by the renderer. Everything in here
/// ends the process; swapchain staleness is not an error and is
/// reported through `SwapchainStatus` instead.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Unsupported Vulkan layers:\n{}", bullet_list(.0))]
    UnsupportedLayers(Vec<String>),

    #[error("Unsupported Vulkan instance extensions:\n{}", bullet_list(.0))]
    UnsupportedExtensions(Vec<String>),

    #[error("Failed to find a suitable GPU.")]
    NoSuitableDevice,

    #[error("No queue family supports graphics operations.")]
    NoGraphicsQueue,

    #[error("Could not find a queue family able to present to the surface.")]
    NoPresentQueue,

    #[error("Failed to open shader file `{}`", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shader bytecode is not properly aligned ({0} bytes).")]
    UnalignedShader(usize),

    #[error("No memory type matches the requested properties {0:?}.")]
    NoMemoryType(vk::MemoryPropertyFlags),

    #[error("Unexpected result from {operation}: {code:?}")]
    UnexpectedResult {
        operation: &'static str,
        code: vk::ErrorCode,
    },

    #[error("Failed to wait for in-flight fence: {0:?}")]
    FenceWait(vk::ErrorCode),
}

fn bullet_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!(" - {n}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_layers_lists_every_name() {
        let error = RenderError::UnsupportedLayers(vec![
            "VK_LAYER_KHRONOS_validation".to_string(),
            "VK_LAYER_LUNARG_monitor".to_string(),
        ]);

        assert_eq!(
            error.to_string(),
            "Unsupported Vulkan layers:\n - VK_LAYER_KHRONOS_validation\n - VK_LAYER_LUNARG_monitor"
        );
    }

    #[test]
    fn shader_load_names_the_path() {
        let error = RenderError::ShaderLoad {
            path: PathBuf::from("shaders/missing.spv"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };

        assert!(error.to_string().contains("shaders/missing.spv"));
    }
}
