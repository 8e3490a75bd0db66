// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// Viewport, scissor and line width are dynamic so swapchain recreation never
// needs a pipeline rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::command_buffer::CommandBuffer;
use super::shader::ShaderStage;
use super::VulkanDevice;

const ENTRY_POINT: &CStr = c"main";

/// Two mat4 on the vertex stage.
pub const PUSH_CONSTANT_SIZE: u32 = 128;

pub struct PipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub vertex_stride: u32,
    pub attributes: &'a [vk::VertexInputAttributeDescription],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub stages: &'a [ShaderStage],
    pub wireframe: bool,
}

pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(device: Arc<VulkanDevice>, desc: &PipelineDesc<'_>) -> Result<Self> {
        let shader_stages: Vec<_> = desc
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        // Vertex input
        let bindings = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(desc.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(desc.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(if desc.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            })
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Alpha blending
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let push_constant_ranges = [vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)
            .build()];

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(desc.set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        let handle = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e).context("Failed to create graphics pipeline");
            }
        };
        log::debug!("Graphics pipeline created");

        Ok(Self {
            handle,
            layout,
            device,
        })
    }

    pub fn bind(&self, command_buffer: &CommandBuffer, bind_point: vk::PipelineBindPoint) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(command_buffer.handle, bind_point, self.handle);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.handle, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
