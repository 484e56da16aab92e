// SPDX-License-Identifier: CEPL-1.0
//! Vulkan side of the frame ring.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ash::vk;
use meadow_render::{
    AcquiredImage, FrameBackend, FrameError, PresentPolicy, PresentStatus, RenderSettings,
    RenderSize,
};
use tracing::{debug, info, warn};

use crate::context::GpuContext;
use crate::pipeline::Pipeline;
use crate::shader;
use crate::swapchain::{self, Swapchain, SwapchainSupport};

/// Maps a failed Vulkan call onto the frame protocol's error kinds.
pub fn map_vk(op: &'static str, r: vk::Result) -> FrameError {
    match r {
        vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::OutOfDate,
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        other => FrameError::backend(op, format!("{other:?}")),
    }
}

pub fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

pub struct VkFrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// The semaphores and fence of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl VkFrameSlot {
    pub fn sync(&self) -> SlotSync {
        SlotSync {
            image_available: self.image_available,
            render_finished: self.render_finished,
            in_flight: self.in_flight,
        }
    }

    /// Installs `fresh` and hands back the objects it replaced.
    pub fn swap_sync(&mut self, fresh: SlotSync) -> SlotSync {
        let old = self.sync();
        self.image_available = fresh.image_available;
        self.render_finished = fresh.render_finished;
        self.in_flight = fresh.in_flight;
        old
    }
}

pub struct VkFrameBackend {
    swapchain: Swapchain,
    pipeline: Pipeline,
    cmd_pool: vk::CommandPool,
    clear: vk::ClearValue,
    policy: PresentPolicy,
    hint: RenderSize,
    shader_dir: PathBuf,
    // declared last: everything above is destroyed against it
    ctx: GpuContext,
}

impl VkFrameBackend {
    pub unsafe fn new(ctx: GpuContext, settings: &RenderSettings, hint: RenderSize) -> Result<Self> {
        let shader_dir = shader::shader_dir(settings.shader_dir.as_deref());
        let policy = settings.present_policy;

        let support = SwapchainSupport::query(&ctx).context("query surface support")?;
        let mut swapchain =
            Swapchain::create(&ctx, &support, policy, hint, vk::SwapchainKHR::null())?;

        let mut pipeline =
            match Pipeline::create(ctx.device(), swapchain.format.format, &shader_dir) {
                Ok(p) => p,
                Err(e) => {
                    swapchain.destroy(&ctx);
                    return Err(e);
                }
            };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.families().graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = match ctx.device().create_command_pool(&pool_info, None) {
            Ok(pool) => pool,
            Err(e) => {
                pipeline.destroy(ctx.device());
                swapchain.destroy(&ctx);
                return Err(e).context("create_command_pool");
            }
        };

        Ok(Self {
            swapchain,
            pipeline,
            cmd_pool,
            clear: clear_value(settings.clear_color),
            policy,
            hint,
            shader_dir,
            ctx,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn policy(&self) -> PresentPolicy {
        self.policy
    }

    /// Framebuffer size used when the surface leaves the extent to us.
    pub fn set_hint(&mut self, hint: RenderSize) {
        self.hint = hint;
    }

    /// Applied from the next recorded frame on.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }

    /// Takes effect at the next swapchain recreation.
    pub fn set_policy(&mut self, policy: PresentPolicy) {
        self.policy = policy;
    }

    unsafe fn create_sync(&self) -> Result<SlotSync, FrameError> {
        let device = self.ctx.device();
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let image_available = device
            .create_semaphore(&sem_ci, None)
            .map_err(|e| map_vk("create_semaphore", e))?;
        let render_finished = match device.create_semaphore(&sem_ci, None) {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                return Err(map_vk("create_semaphore", e));
            }
        };
        let in_flight = match device.create_fence(&fence_ci, None) {
            Ok(f) => f,
            Err(e) => {
                device.destroy_semaphore(render_finished, None);
                device.destroy_semaphore(image_available, None);
                return Err(map_vk("create_fence", e));
            }
        };
        Ok(SlotSync {
            image_available,
            render_finished,
            in_flight,
        })
    }

    unsafe fn destroy_sync(&self, sync: SlotSync) {
        let device = self.ctx.device();
        device.destroy_semaphore(sync.image_available, None);
        device.destroy_semaphore(sync.render_finished, None);
        device.destroy_fence(sync.in_flight, None);
    }

    unsafe fn transition_to_color(&self, cmd: vk::CommandBuffer, image: vk::Image) {
        let pre_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
            src_access_mask: vk::AccessFlags2::empty(),
            dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            image,
            subresource_range: swapchain::color_range(),
            ..Default::default()
        };
        let dep_pre = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &pre_barrier,
            ..Default::default()
        };
        self.ctx.rendering().cmd_pipeline_barrier2(cmd, &dep_pre);
    }

    #[inline]
    unsafe fn begin_rendering(&self, cmd: vk::CommandBuffer, image_view: vk::ImageView) {
        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: self.clear,
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: self.full_rect(),
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            ..Default::default()
        };
        self.ctx.rendering().cmd_begin_rendering(cmd, &rendering_info);
    }

    #[inline]
    unsafe fn bind_draw_triangle(&self, cmd: vk::CommandBuffer) {
        let device = self.ctx.device();
        let extent = self.swapchain.extent;
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle);

        let vp = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&self.full_rect()));

        device.cmd_draw(cmd, 3, 1, 0, 0);
    }

    #[inline]
    unsafe fn transition_to_present(&self, cmd: vk::CommandBuffer, image: vk::Image) {
        let post_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            dst_access_mask: vk::AccessFlags2::empty(),
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            image,
            subresource_range: swapchain::color_range(),
            ..Default::default()
        };
        let dep_post = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &post_barrier,
            ..Default::default()
        };
        self.ctx.rendering().cmd_pipeline_barrier2(cmd, &dep_post);
    }

    fn full_rect(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent,
        }
    }

    unsafe fn rebuild_pipeline(&mut self) -> Result<(), FrameError> {
        let device = self.ctx.device();
        self.pipeline.destroy(device);
        self.pipeline = Pipeline::create(device, self.swapchain.format.format, &self.shader_dir)
            .map_err(|e| FrameError::backend("create_pipeline", format!("{e:#}")))?;
        Ok(())
    }
}

impl FrameBackend for VkFrameBackend {
    type Slot = VkFrameSlot;

    fn create_slot(&mut self, index: usize) -> Result<VkFrameSlot, FrameError> {
        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: self.cmd_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let cmd = self
                .ctx
                .device()
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| map_vk("allocate_command_buffers", e))?[0];

            let sync = match self.create_sync() {
                Ok(sync) => sync,
                Err(e) => {
                    self.ctx.device().free_command_buffers(self.cmd_pool, &[cmd]);
                    return Err(e);
                }
            };

            debug!("frame slot {index} created");
            Ok(VkFrameSlot {
                cmd,
                image_available: sync.image_available,
                render_finished: sync.render_finished,
                in_flight: sync.in_flight,
            })
        }
    }

    // New objects first: a failed create leaves the slot's current (live) ones in place.
    fn recreate_slot_sync(&mut self, slot: &mut VkFrameSlot) -> Result<(), FrameError> {
        unsafe {
            let fresh = self.create_sync()?;
            let old = slot.swap_sync(fresh);
            self.destroy_sync(old);
        }
        Ok(())
    }

    fn destroy_slot(&mut self, slot: VkFrameSlot) {
        unsafe {
            self.destroy_sync(slot.sync());
            self.ctx
                .device()
                .free_command_buffers(self.cmd_pool, &[slot.cmd]);
        }
    }

    fn wait_for_fence(&mut self, slot: &VkFrameSlot) -> Result<(), FrameError> {
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
                .map_err(|e| map_vk("wait_for_fences", e))
        }
    }

    fn reset_fence(&mut self, slot: &VkFrameSlot) -> Result<(), FrameError> {
        unsafe {
            self.ctx
                .device()
                .reset_fences(&[slot.in_flight])
                .map_err(|e| map_vk("reset_fences", e))
        }
    }

    fn acquire_image(&mut self, slot: &VkFrameSlot) -> Result<AcquiredImage, FrameError> {
        let (index, suboptimal) = unsafe {
            self.ctx
                .swapchain_loader()
                .acquire_next_image(
                    self.swapchain.handle,
                    u64::MAX,
                    slot.image_available,
                    vk::Fence::null(),
                )
                .map_err(|e| map_vk("acquire_next_image", e))?
        };
        Ok(AcquiredImage { index, suboptimal })
    }

    fn record(&mut self, slot: &VkFrameSlot, image_index: u32) -> Result<(), FrameError> {
        let i = image_index as usize;
        let (Some(&image), Some(&view)) =
            (self.swapchain.images.get(i), self.swapchain.views.get(i))
        else {
            return Err(FrameError::backend(
                "record",
                format!("image index {image_index} outside swapchain"),
            ));
        };

        let device = self.ctx.device();
        let cmd = slot.cmd;
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_vk("reset_command_buffer", e))?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .map_err(|e| map_vk("begin_command_buffer", e))?;

            self.transition_to_color(cmd, image);
            self.begin_rendering(cmd, view);
            self.bind_draw_triangle(cmd);
            self.ctx.rendering().cmd_end_rendering(cmd);
            self.transition_to_present(cmd, image);

            device
                .end_command_buffer(cmd)
                .map_err(|e| map_vk("end_command_buffer", e))
        }
    }

    fn submit(&mut self, slot: &VkFrameSlot) -> Result<(), FrameError> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &slot.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(
                    self.ctx.graphics_queue(),
                    std::slice::from_ref(&submit),
                    slot.in_flight,
                )
                .map_err(|e| map_vk("queue_submit", e))
        }
    }

    fn present(&mut self, slot: &VkFrameSlot, image_index: u32) -> Result<PresentStatus, FrameError> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let suboptimal = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.present_queue(), &present)
                .map_err(|e| map_vk("queue_present", e))?
        };
        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe {
            self.ctx
                .device()
                .device_wait_idle()
                .map_err(|e| map_vk("device_wait_idle", e))
        }
    }

    // STRICT ORDER (recreate):
    // 1) query support; a zero extent bails out before anything is destroyed
    // 2) create the new swapchain from the old handle
    // 3) destroy old views BEFORE the old swapchain
    // 4) rebuild the pipeline only if the color format changed
    fn recreate_swapchain(&mut self) -> Result<(), FrameError> {
        unsafe {
            let support =
                SwapchainSupport::query(&self.ctx).map_err(|e| map_vk("query_surface", e))?;
            let extent = swapchain::choose_extent(&support.caps, self.hint);
            if extent.width == 0 || extent.height == 0 {
                debug!("surface is 0x0, swapchain left as is");
                return Err(FrameError::OutOfDate);
            }

            let fresh = Swapchain::create(
                &self.ctx,
                &support,
                self.policy,
                self.hint,
                self.swapchain.handle,
            )
            .map_err(|e| FrameError::backend("create_swapchain", format!("{e:#}")))?;

            let mut old = std::mem::replace(&mut self.swapchain, fresh);
            old.destroy(&self.ctx);

            if self.swapchain.format.format != self.pipeline.color_format {
                info!(
                    "swapchain format {:?} -> {:?}, rebuilding pipeline",
                    self.pipeline.color_format, self.swapchain.format.format
                );
                self.rebuild_pipeline()?;
            }
        }
        Ok(())
    }
}

// STRICT TEARDOWN ORDER:
// - device idle
// - pipeline/layout BEFORE swapchain
// - views BEFORE swapchain
// - command pool (slots already freed their buffers)
// - GpuContext drops last: device, surface, instance
impl Drop for VkFrameBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device().device_wait_idle() {
                warn!("device_wait_idle before teardown failed: {e:?}");
            }
            self.pipeline.destroy(self.ctx.device());
            self.swapchain.destroy(&self.ctx);
            self.ctx.device().destroy_command_pool(self.cmd_pool, None);
        }
    }
}
