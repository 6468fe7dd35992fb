use crate::{
    config::EngineConfig,
    frame::FrameOutcome,
    renderer::Renderer,
    window::WindowHost,
};

use anyhow::Result;
use log::*;

/// The window and the renderer drawing into it.
pub struct App {
    renderer: Renderer,
    host: WindowHost,
    frames_drawn: u64,
}

impl App {
    pub fn create(config: &EngineConfig) -> Result<Self> {
        let mut host = WindowHost::open(config)?;
        let renderer = unsafe { Renderer::create(&mut host, config)? };

        Ok(Self {
            renderer,
            host,
            frames_drawn: 0,
        })
    }

    /// Draws until the window is closed. Close requests are only
    /// looked at between frames.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.host.poll_events()?;
            if self.host.should_close() {
                break;
            }

            let outcome = unsafe { self.renderer.draw_frame(&mut self.host)? };
            if outcome == FrameOutcome::Presented {
                self.frames_drawn += 1;
            }
        }

        info!("Window closed after {} frames.", self.frames_drawn);
        Ok(())
    }

    pub fn destroy(&mut self) {
        unsafe { self.renderer.destroy() };
        info!("Destroyed the app.");
    }
}

/// Runs the engine to completion. The GPU side is released before
/// the window, whether drawing stopped on a close or an error.
pub fn run(config: EngineConfig) -> Result<()> {
    let mut app = App::create(&config)?;

    let result = app.run();
    app.destroy();

    result
}
