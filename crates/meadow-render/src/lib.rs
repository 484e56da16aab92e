// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod error;
pub mod frame;

pub use error::FrameError;
pub use frame::{
    AcquiredImage, FrameBackend, FrameReport, FrameRing, PresentStatus, SlotState,
    DEFAULT_FRAMES_IN_FLIGHT, MAX_ACQUIRE_ATTEMPTS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How the presentation engine should pace frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Mailbox, then immediate, then FIFO.
    #[default]
    LowLatency,
    /// FIFO only: wait for vertical blank.
    Vsync,
}

impl PresentPolicy {
    pub fn from_vsync(vsync: bool) -> Self {
        if vsync {
            PresentPolicy::Vsync
        } else {
            PresentPolicy::LowLatency
        }
    }
}

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub present_policy: PresentPolicy,
    /// Enable the validation layer and debug messenger even in release builds.
    pub validation: bool,
    /// Directory holding the SPIR-V blobs; the backend's build output when `None`.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            clear_color: DEFAULT_CLEAR_COLOR,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            present_policy: PresentPolicy::default(),
            validation: cfg!(debug_assertions),
            shader_dir: None,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
