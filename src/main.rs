mod app;
mod buffers;
mod commands;
mod config;
mod core;
mod descriptors;
mod error;
mod frame;
mod image;
mod logging;
mod pipeline;
mod renderer;
mod shaders;
mod sync;
mod vertex;
mod window;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use config::{Args, EngineConfig};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(LevelFilter::Info);

    app::run(EngineConfig::from(args))
}
