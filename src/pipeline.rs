use crate::{
    shaders::{create_shader_module, FRAGMENT_ENTRY, VERTEX_ENTRY},
    vertex::Vertex,
};

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

/// The graphics pipeline drawing the quad, with its layout. Built
/// once: viewport and scissor are dynamic, so a resize does not
/// invalidate it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pipeline {
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

/// Color attachment state. The alpha-over factors are always set;
/// `blend` decides whether they are used.
pub fn color_blend_attachment(blend: bool) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(blend)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

impl Pipeline {
    pub unsafe fn create(
        device: &Device,
        bytecode: &[u8],
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
        blend: bool,
    ) -> Result<Self> {
        let set_layouts = &[set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = device.create_pipeline_layout(&layout_info, None)?;

        // Both stages live in the same module. It is only needed
        // until the pipeline exists.
        let module = match create_shader_module(device, bytecode) {
            Ok(module) => module,
            Err(error) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(error);
            }
        };

        let handle = create_graphics_pipeline(device, module, layout, color_format, blend);
        device.destroy_shader_module(module, None);

        match handle {
            Ok(handle) => {
                info!("Pipeline created (blending {}).", if blend { "on" } else { "off" });
                Ok(Self { layout, handle })
            }
            Err(error) => {
                device.destroy_pipeline_layout(layout, None);
                Err(error)
            }
        }
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_pipeline(self.handle, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

unsafe fn create_graphics_pipeline(
    device: &Device,
    module: vk::ShaderModule,
    layout: vk::PipelineLayout,
    color_format: vk::Format,
    blend: bool,
) -> Result<vk::Pipeline> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(module)
        .name(VERTEX_ENTRY);

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(module)
        .name(FRAGMENT_ENTRY);

    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only; the actual rectangles are set while recording.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    let attachments = &[color_blend_attachment(blend)];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(attachments)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

    // No render pass: the attachment formats are declared here
    // and matched by the rendering info at record time.
    let color_formats = &[color_format];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
        .color_attachment_formats(color_formats);

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?
        .0;

    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blending_is_off_by_default() {
        let attachment = color_blend_attachment(false);

        assert_eq!(attachment.blend_enable, vk::FALSE);
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::all());
    }

    #[test]
    fn blending_uses_alpha_over() {
        let attachment = color_blend_attachment(true);

        assert_eq!(attachment.blend_enable, vk::TRUE);
        assert_eq!(attachment.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(attachment.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(attachment.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(attachment.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }
}
