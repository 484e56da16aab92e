// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use anyhow::{anyhow, Result};
use ash::{vk, Device};
use tracing::debug;

use crate::shader::{self, FRAGMENT_SHADER, VERTEX_SHADER};

/// The triangle pipeline, bound to one color attachment format.
pub struct Pipeline {
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
    pub color_format: vk::Format,
}

impl Pipeline {
    // STRICT: color_attachment_formats MUST match the current swapchain format.
    // When the swapchain format changes, rebuild before recording.
    pub unsafe fn create(device: &Device, color_format: vk::Format, shader_dir: &Path) -> Result<Self> {
        let vs_code = shader::load_spirv(&shader_dir.join(VERTEX_SHADER))?;
        let fs_code = shader::load_spirv(&shader_dir.join(FRAGMENT_SHADER))?;

        let vs = shader::create_shader_module(device, &vs_code)?;
        let fs = match shader::create_shader_module(device, &fs_code) {
            Ok(fs) => fs,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e);
            }
        };

        let built = Self::build(device, color_format, vs, fs);

        // modules are only needed during creation
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
        built
    }

    unsafe fn build(
        device: &Device,
        color_format: vk::Format,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
    ) -> Result<Self> {
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // Vertex input (none: positions and colors live in the vertex shader)
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        // counts only; the rects are set at record time
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        // The shader's triangle winds clockwise in framebuffer space.
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| anyhow!("create_pipeline_layout: {e:?}"))?;

        // Dynamic rendering replaces the render pass; no depth attachment.
        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &color_format,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next: (&rendering as *const vk::PipelineRenderingCreateInfo<'_>).cast(),
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            ..Default::default()
        };

        let handle = match device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p[0],
            Err((_, err)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(anyhow!("create_graphics_pipelines failed: {:?}", err));
            }
        };

        debug!("triangle pipeline built for {:?}", color_format);
        Ok(Self {
            layout,
            handle,
            color_format,
        })
    }

    /// Pipeline BEFORE its layout. Device must be idle.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.handle != vk::Pipeline::null() {
            device.destroy_pipeline(self.handle, None);
            self.handle = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}
