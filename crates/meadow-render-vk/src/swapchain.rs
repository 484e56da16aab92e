// SPDX-License-Identifier: CEPL-1.0
//! Swapchain selection policies and the swapchain bundle itself.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use meadow_render::{PresentPolicy, RenderSize};
use tracing::info;

use crate::context::GpuContext;

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// 8-bit sRGB when offered, otherwise whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every implementation must support.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: PresentPolicy,
) -> vk::PresentModeKHR {
    match policy {
        PresentPolicy::Vsync => vk::PresentModeKHR::FIFO,
        PresentPolicy::LowLatency => [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|m| modes.contains(m))
            .unwrap_or(vk::PresentModeKHR::FIFO),
    }
}

/// The surface's current extent, or the framebuffer size clamped to the
/// surface limits when the surface leaves it to us (`u32::MAX`).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(ctx: &GpuContext) -> Result<Self, vk::Result> {
        let loader = ctx.surface_loader();
        let (phys, surface) = (ctx.physical_device(), ctx.surface());
        Ok(Self {
            caps: loader.get_physical_device_surface_capabilities(phys, surface)?,
            formats: loader.get_physical_device_surface_formats(phys, surface)?,
            modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
        })
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// `old` is handed to the driver for resource reuse; the caller still owns
    /// and destroys it.
    pub unsafe fn create(
        ctx: &GpuContext,
        support: &SwapchainSupport,
        policy: PresentPolicy,
        hint: RenderSize,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let caps = &support.caps;
        let format = choose_surface_format(&support.formats)
            .ok_or_else(|| anyhow!("surface reports no formats"))?;
        let present_mode = choose_present_mode(&support.modes, policy);
        let extent = choose_extent(caps, hint);
        let image_count = choose_image_count(caps);

        // Prefer IDENTITY if supported, otherwise use current to avoid extra blits.
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = ctx.families();
        let family_indices = [families.graphics, families.present];
        let (sharing, index_count) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0)
        } else {
            (vk::SharingMode::CONCURRENT, family_indices.len() as u32)
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: index_count,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let loader = ctx.swapchain_loader();
        let handle = loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;
        let images = match loader.get_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                loader.destroy_swapchain(handle, None);
                return Err(e).context("get_swapchain_images");
            }
        };

        let mut swapchain = Self {
            handle,
            format,
            present_mode,
            extent,
            images,
            views: Vec::new(),
        };

        // View format MUST match the swapchain image format.
        for image in swapchain.images.clone() {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                subresource_range: color_range(),
                ..Default::default()
            };
            match ctx.device().create_image_view(&iv_info, None) {
                Ok(view) => swapchain.views.push(view),
                Err(e) => {
                    swapchain.destroy(ctx);
                    return Err(e).context("create_image_view");
                }
            }
        }

        info!(
            "swapchain: {:?} / {:?}, {:?}, {}x{}, {} images (min {})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            swapchain.images.len(),
            caps.min_image_count
        );
        Ok(swapchain)
    }

    /// Views BEFORE the swapchain. Device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        for view in self.views.drain(..) {
            ctx.device().destroy_image_view(view, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader().destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
