// SPDX-License-Identifier: CEPL-1.0
//! Native window handle: what to open and which window events matter.
//!
//! `winit` is re-exported so the app does not need its own dependency on it.

use anyhow::{Context, Result};
use tracing::debug;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

pub use winit;

pub const DEFAULT_TITLE: &str = "Meadow";
pub const DEFAULT_WIDTH: u32 = 1000;
pub const DEFAULT_HEIGHT: u32 = 800;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec {
            title: DEFAULT_TITLE.to_owned(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl WindowSpec {
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width.max(1), self.height.max(1)))
    }

    pub fn open(&self, event_loop: &ActiveEventLoop) -> Result<Window> {
        let window = event_loop
            .create_window(self.attributes())
            .context("create_window")?;
        debug!("window '{}' opened", self.title);
        Ok(window)
    }
}

/// Size of the drawable area in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferSize {
    pub width: u32,
    pub height: u32,
}

impl FramebufferSize {
    /// Minimised windows report a zero dimension; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<PhysicalSize<u32>> for FramebufferSize {
    fn from(size: PhysicalSize<u32>) -> Self {
        FramebufferSize {
            width: size.width,
            height: size.height,
        }
    }
}

pub fn framebuffer_size(window: &Window) -> FramebufferSize {
    window.inner_size().into()
}

/// The subset of window events the frame loop reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowRequest {
    Close,
    Resize(FramebufferSize),
    Redraw,
}

impl WindowRequest {
    pub fn from_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => Some(WindowRequest::Close),
            WindowEvent::Resized(size) => Some(WindowRequest::Resize((*size).into())),
            WindowEvent::RedrawRequested => Some(WindowRequest::Redraw),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_matches_compiled_in_constants() {
        let spec = WindowSpec::default();
        assert_eq!(spec.title, "Meadow");
        assert_eq!((spec.width, spec.height), (1000, 800));
    }

    #[test]
    fn zero_dimension_is_empty() {
        assert!(FramebufferSize { width: 0, height: 600 }.is_empty());
        assert!(FramebufferSize { width: 800, height: 0 }.is_empty());
        assert!(!FramebufferSize { width: 1, height: 1 }.is_empty());
    }

    #[test]
    fn window_events_map_to_requests() {
        assert_eq!(
            WindowRequest::from_event(&WindowEvent::CloseRequested),
            Some(WindowRequest::Close)
        );
        assert_eq!(
            WindowRequest::from_event(&WindowEvent::Resized(PhysicalSize::new(640, 480))),
            Some(WindowRequest::Resize(FramebufferSize {
                width: 640,
                height: 480
            }))
        );
        assert_eq!(
            WindowRequest::from_event(&WindowEvent::RedrawRequested),
            Some(WindowRequest::Redraw)
        );
        assert_eq!(WindowRequest::from_event(&WindowEvent::Focused(true)), None);
    }
}
