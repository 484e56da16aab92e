// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use meadow_render::{
    FrameError, FrameRing, PresentPolicy, RenderSettings, RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

pub mod backend;
pub mod context;
pub mod debug;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;

pub use backend::{SlotSync, VkFrameBackend, VkFrameSlot};
pub use context::GpuContext;

pub struct VkRenderer {
    ring: FrameRing<VkFrameBackend>,
    paused: bool,
}

// STRICT ORDER (setup):
// GpuContext (instance, surface, device) -> backend (swapchain, pipeline, pool)
// -> frame ring (per-slot command buffers and sync objects)
unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    settings: &RenderSettings,
) -> Result<VkRenderer> {
    let ctx = GpuContext::new(window, display, settings.validation)?;
    let backend = VkFrameBackend::new(ctx, settings, size)?;
    let ring = FrameRing::new(backend, settings.frames_in_flight).context("create frame ring")?;

    info!(
        "vk renderer ready: {}x{}, {} frames in flight, {:?}",
        size.width, size.height, settings.frames_in_flight, settings.present_policy
    );
    Ok(VkRenderer {
        ring,
        paused: size.is_empty(),
    })
}

impl VkRenderer {
    pub fn backend(&self) -> &VkFrameBackend {
        self.ring.backend()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.ring.frames_submitted()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Full recreation. A surface that is still 0x0 defers it to a later frame.
    fn recreate(&mut self) -> Result<()> {
        match self.ring.recreate() {
            Ok(()) => Ok(()),
            Err(FrameError::OutOfDate) => {
                debug!("vk: surface not ready, recreation deferred");
                Ok(())
            }
            Err(e) => Err(e).context("recreate swapchain"),
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, settings) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }

        if self.paused {
            info!("vk: resize to {}x{} → paused=false", size.width, size.height);
        }
        self.paused = false;

        self.ring.backend_mut().set_hint(size);
        self.recreate()
    }

    // One ring cycle per call; see FrameRing::advance_frame for the ordering.
    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }

        // Guard for minimized surfaces
        let caps = unsafe { self.ring.backend().context().surface_capabilities() };
        match caps {
            Ok(caps) if caps.current_extent.width == 0 || caps.current_extent.height == 0 => {
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(anyhow::anyhow!("surface capabilities: {e:?}")),
        }

        match self.ring.advance_frame() {
            Ok(report) => {
                if report.recreated {
                    debug!("frame {} recreated the swapchain", self.ring.frames_submitted());
                }
                Ok(())
            }
            // still stale after the bounded retries: skip, try again next tick
            Err(FrameError::OutOfDate) => Ok(()),
            Err(e) => Err(e).context("render frame"),
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.ring.backend_mut().set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        let policy = PresentPolicy::from_vsync(on);
        if self.ring.backend().policy() == policy {
            return;
        }
        self.ring.backend_mut().set_policy(policy);
        if let Err(e) = self.recreate() {
            tracing::error!("vk: present mode change failed: {e:#}");
        }
    }
}
