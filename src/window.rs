use crate::config::EngineConfig;

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::*;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

/// What the renderer needs to know about the window it draws
/// into. Kept as a trait so the swapchain and frame logic can run
/// against a fake window in tests.
pub trait FramebufferSource {
    /// Current size of the drawable area, in physical pixels.
    fn framebuffer_size(&self) -> (u32, u32);
    /// Blocks until at least one window event has been handled.
    fn wait_events(&mut self);
    /// Returns whether the window was resized since the last
    /// call, and clears the flag.
    fn take_resized(&mut self) -> bool;
    /// Whether the user asked for the window to close.
    fn close_requested(&self) -> bool;
}

/// Window state driven by winit's application handler.
struct WindowState {
    title: String,
    size: LogicalSize<u32>,
    window: Option<Window>,
    creation_error: Option<OsError>,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(self.size);

        match event_loop.create_window(attributes) {
            Ok(window) => {
                info!("Window created ({}x{}).", self.size.width, self.size.height);
                self.window = Some(window);
            }
            Err(error) => self.creation_error = Some(error),
        }
    }

    fn window_event(
        &mut self,
        _: &ActiveEventLoop,
        _: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                debug!("Window close requested.");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                trace!("Window resized to {}x{}.", size.width, size.height);
                self.resized = true;
            }
            _ => (),
        }
    }
}

/// Owns the winit event loop and the window. Events are pumped
/// explicitly, which lets the renderer block on events while the
/// window is minimised.
pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WindowHost {
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut host = Self {
            event_loop,
            state: WindowState {
                title: config.title.clone(),
                size: LogicalSize::new(config.width, config.height),
                window: None,
                creation_error: None,
                resized: false,
                close_requested: false,
            },
        };

        // The window only exists once the event loop has resumed,
        // which happens during the first pumps.
        while host.state.window.is_none() {
            host.pump(Some(Duration::ZERO))?;
            if let Some(error) = host.state.creation_error.take() {
                return Err(anyhow!("Failed to create window: {error}"));
            }
            if host.state.close_requested {
                return Err(anyhow!("Window closed before it was created."));
            }
        }

        Ok(host)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.event_loop.pump_app_events(timeout, &mut self.state) {
            PumpStatus::Continue => Ok(()),
            PumpStatus::Exit(code) => {
                self.state.close_requested = true;
                if code == 0 {
                    Ok(())
                } else {
                    Err(anyhow!("Event loop exited with code {code}."))
                }
            }
        }
    }

    /// Handles pending events without blocking.
    pub fn poll_events(&mut self) -> Result<()> {
        self.pump(Some(Duration::ZERO))
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }

    /// The native window, for surface creation. `open` guarantees
    /// it exists.
    pub fn window(&self) -> Result<&Window> {
        self.state
            .window
            .as_ref()
            .ok_or_else(|| anyhow!("Window has not been created."))
    }
}

impl FramebufferSource for WindowHost {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state
            .window
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                (size.width, size.height)
            })
            .unwrap_or((0, 0))
    }

    fn wait_events(&mut self) {
        if let Err(error) = self.pump(None) {
            warn!("Event loop stopped while waiting for events: {error}");
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}

#[cfg(test)]
pub mod fake {
    use super::FramebufferSource;
    use std::collections::VecDeque;

    /// A window whose framebuffer size follows a script: every
    /// call to `wait_events` moves to the next scripted size.
    pub struct FakeWindow {
        pub size: (u32, u32),
        pub pending_sizes: VecDeque<(u32, u32)>,
        pub resized: bool,
        pub waits: usize,
        /// The window is closed once this many waits have passed.
        pub close_after_waits: Option<usize>,
    }

    impl FakeWindow {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                pending_sizes: VecDeque::new(),
                resized: false,
                waits: 0,
                close_after_waits: None,
            }
        }

        /// Resizes the window and raises the resize flag, as the
        /// windowing system would.
        pub fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.resized = true;
        }
    }

    impl FramebufferSource for FakeWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.size
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(size) = self.pending_sizes.pop_front() {
                self.size = size;
            }
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn close_requested(&self) -> bool {
            self.close_after_waits.is_some_and(|n| self.waits >= n)
        }
    }
}
