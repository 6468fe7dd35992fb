use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_SHADER_PATH: &str = "shaders/shader.spv";

/// Command line of the `ariel` binary.
#[derive(Parser, Debug)]
#[command(name = "ariel", version, about = "Minimal Vulkan renderer")]
pub struct Args {
    /// Requested window width, in logical pixels.
    #[arg(
        long,
        default_value_t = DEFAULT_WIDTH,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub width: u32,

    /// Requested window height, in logical pixels.
    #[arg(
        long,
        default_value_t = DEFAULT_HEIGHT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub height: u32,

    /// Window title.
    #[arg(long, default_value = "ariel")]
    pub title: String,

    /// Path to the compiled SPIR-V module holding `vertMain` and
    /// `fragMain`.
    #[arg(long, default_value = DEFAULT_SHADER_PATH)]
    pub shader: PathBuf,

    /// Enable alpha blending on the color attachment.
    #[arg(long)]
    pub blend: bool,

    /// Force the Khronos validation layer on.
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Force the Khronos validation layer off.
    #[arg(long)]
    pub no_validation: bool,
}

/// Everything the engine needs to know from the outside world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub shader_path: PathBuf,
    pub blend: bool,
    /// Validation layers and the debug messenger; on by default
    /// in debug builds only.
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: "ariel".to_string(),
            shader_path: PathBuf::from(DEFAULT_SHADER_PATH),
            blend: false,
            validation: cfg!(debug_assertions),
        }
    }
}

impl From<Args> for EngineConfig {
    fn from(args: Args) -> Self {
        let validation = if args.validation {
            true
        } else if args.no_validation {
            false
        } else {
            cfg!(debug_assertions)
        };

        Self {
            width: args.width,
            height: args.height,
            title: args.title,
            shader_path: args.shader,
            blend: args.blend,
            validation,
        }
    }
}
