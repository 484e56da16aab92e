// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::debug::DebugMessenger;
use crate::device::{self, QueueFamilies, RenderPath, RenderingFns};
use crate::instance;

/// Instance, surface and logical device for one window.
pub struct GpuContext {
    // field order is irrelevant; teardown happens in Drop
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    path: RenderPath,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    rendering: RenderingFns,
}

impl GpuContext {
    // STRICT ORDER (setup):
    // instance -> debug messenger -> surface -> physical device -> logical device
    // Every failure unwinds what was built before it.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let entry = Entry::load().context("load Vulkan loader")?;

        let display_raw = display.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        let instance = instance::create_instance(&entry, display_raw, validation)?;

        let debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface =
            match ash_window::create_surface(&entry, &instance, display_raw, window_raw, None)
                .context("create_surface")
            {
                Ok(s) => s,
                Err(e) => {
                    Self::unwind(&instance, debug, None);
                    return Err(e);
                }
            };

        let built = device::pick_physical_device(&instance, &surface_loader, surface)
            .and_then(|choice| {
                device::create_logical_device(&instance, &choice).map(|d| (choice, d))
            });
        let (choice, device) = match built {
            Ok(pair) => pair,
            Err(e) => {
                Self::unwind(&instance, debug, Some((&surface_loader, surface)));
                return Err(e);
            }
        };

        let graphics_queue = device.get_device_queue(choice.families.graphics, 0);
        let present_queue = device.get_device_queue(choice.families.present, 0);
        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let rendering = RenderingFns::new(&instance, &device, choice.path);

        info!("GPU context ready");
        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: choice.phys,
            families: choice.families,
            path: choice.path,
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
            rendering,
        })
    }

    unsafe fn unwind(
        instance: &Instance,
        debug: Option<DebugMessenger>,
        surface: Option<(&surface::Instance, vk::SurfaceKHR)>,
    ) {
        if let Some((loader, s)) = surface {
            loader.destroy_surface(s, None);
        }
        if let Some(d) = debug {
            d.destroy();
        }
        instance.destroy_instance(None);
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn render_path(&self) -> RenderPath {
        self.path
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn rendering(&self) -> &RenderingFns {
        &self.rendering
    }

    pub unsafe fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
        self.surface_loader
            .get_physical_device_surface_capabilities(self.phys, self.surface)
    }
}

// STRICT TEARDOWN ORDER:
// - device (callers must have drained it and destroyed their objects)
// - surface AFTER device
// - debug messenger, then instance last
impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle before device teardown failed: {e:?}");
            }
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
