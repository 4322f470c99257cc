//! Window input
//!
//! The playback loop owns the thread, so the OS event queue is pumped
//! without blocking once per loop iteration and translated into the few
//! events the player understands.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

use crate::config::SurfaceConfig;
use crate::render::PresentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Quit,
    SeekForward,
    SeekBackward,
    Resized { width: u32, height: u32 },
}

/// Anything that can hand the loop its pending input
pub trait EventSource {
    /// Append every pending event to `out` without blocking
    fn poll_events(&mut self, out: &mut Vec<InputEvent>);
}

/// Arrow keys seek, every other key is ignored
pub fn map_key(code: KeyCode, state: ElementState) -> Option<InputEvent> {
    if state != ElementState::Pressed {
        return None;
    }
    match code {
        KeyCode::ArrowRight => Some(InputEvent::SeekForward),
        KeyCode::ArrowLeft => Some(InputEvent::SeekBackward),
        _ => None,
    }
}

// ============================================================================
// winit
// ============================================================================

#[derive(Default)]
struct Collector {
    pending: Vec<InputEvent>,
}

impl Collector {
    fn on_key(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            if let Some(input) = map_key(code, event.state) {
                self.pending.push(input);
            }
        }
    }
}

impl ApplicationHandler for Collector {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.pending.push(InputEvent::Quit);
            }
            WindowEvent::Resized(size) => {
                self.pending.push(InputEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
            }
            WindowEvent::KeyboardInput { event, .. } => self.on_key(&event),
            _ => {}
        }
    }
}

/// Event loop plus the handler that turns its events into `InputEvent`s
pub struct WinitEvents {
    event_loop: EventLoop<()>,
    collector: Collector,
    exited: bool,
}

impl WinitEvents {
    pub fn new() -> Result<Self, PresentError> {
        let event_loop = EventLoop::new()
            .map_err(|e| PresentError::SurfaceCreateFailed(format!("Event loop: {e}")))?;
        Ok(Self {
            event_loop,
            collector: Collector::default(),
            exited: false,
        })
    }

    /// Open the playback window
    pub fn create_window(
        &self,
        config: &SurfaceConfig,
        video_width: u32,
        video_height: u32,
    ) -> Result<Arc<Window>, PresentError> {
        let (width, height) = config.resolve(video_width, video_height);
        let attributes = Window::default_attributes()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(width, height));

        // Windows are created before the loop is pumped for the first time
        #[allow(deprecated)]
        let window = self
            .event_loop
            .create_window(attributes)
            .map_err(|e| PresentError::SurfaceCreateFailed(format!("Window: {e}")))?;

        debug!(width, height, title = %config.title, "Created window");
        Ok(Arc::new(window))
    }
}

impl EventSource for WinitEvents {
    fn poll_events(&mut self, out: &mut Vec<InputEvent>) {
        if !self.exited {
            let status = self
                .event_loop
                .pump_app_events(Some(Duration::ZERO), &mut self.collector);
            if let PumpStatus::Exit(code) = status {
                debug!(code, "Event loop exited");
                self.exited = true;
                self.collector.pending.push(InputEvent::Quit);
            }
        }
        out.append(&mut self.collector.pending);
    }
}

/// Input source for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl EventSource for NoInput {
    fn poll_events(&mut self, _out: &mut Vec<InputEvent>) {}
}
