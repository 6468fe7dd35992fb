use crate::{
    image::transition_image_layout,
    pipeline::Pipeline,
};

use anyhow::Result;
use log::*;
use vulkanalia::{prelude::v1_0::*, vk::DeviceV1_3};

/// Pool for the graphics family. Buffers are re-recorded every
/// frame, so they must be individually resettable.
pub unsafe fn create_command_pool(device: &Device, queue_family: u32) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family);

    let pool = device.create_command_pool(&info, None)?;

    info!("Command pool created.");
    Ok(pool)
}

pub unsafe fn allocate_command_buffers(
    device: &Device,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    Ok(device.allocate_command_buffers(&info)?)
}

/// Starts a throwaway command buffer for a one-off transfer.
pub unsafe fn begin_single_command(
    device: &Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let command_buffer = allocate_command_buffers(device, pool, 1)?[0];

    let info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    if let Err(error) = device.begin_command_buffer(command_buffer, &info) {
        device.free_command_buffers(pool, &[command_buffer]);
        return Err(error.into());
    }

    Ok(command_buffer)
}

/// Submits the buffer, waits for the queue to drain, and frees
/// the buffer.
pub unsafe fn end_single_command(
    device: &Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let result = (|| -> Result<()> {
        device.end_command_buffer(command_buffer)?;

        let command_buffers = &[command_buffer];
        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

        device.queue_submit(queue, &[info], vk::Fence::null())?;
        device.queue_wait_idle(queue)?;
        Ok(())
    })();

    device.free_command_buffers(pool, &[command_buffer]);
    result
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build()
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(extent)
        .build()
}

/// Everything one frame's draw needs.
pub struct DrawInfo<'a> {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub pipeline: &'a Pipeline,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Resets and records the frame's command buffer: the image is
/// moved to an attachment layout, cleared to opaque black, the
/// quad is drawn, and the image is moved to the present layout.
pub unsafe fn record_frame(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    draw: &DrawInfo,
) -> Result<()> {
    device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;

    let info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(command_buffer, &info)?;

    transition_image_layout(
        device,
        command_buffer,
        draw.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;

    let color_attachment = vk::RenderingAttachmentInfo::builder()
        .image_view(draw.view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        });

    let color_attachments = &[color_attachment];
    let rendering_info = vk::RenderingInfo::builder()
        .render_area(full_scissor(draw.extent))
        .layer_count(1)
        .color_attachments(color_attachments);

    device.cmd_begin_rendering(command_buffer, &rendering_info);

    device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.handle);
    device.cmd_bind_vertex_buffers(command_buffer, 0, &[draw.vertex_buffer], &[0]);
    device.cmd_bind_index_buffer(command_buffer, draw.index_buffer, 0, vk::IndexType::UINT32);
    device.cmd_bind_descriptor_sets(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        draw.pipeline.layout,
        0,
        &[draw.descriptor_set],
        &[],
    );

    // Viewport and scissor are dynamic so that the pipeline
    // survives swapchain recreation.
    device.cmd_set_viewport(command_buffer, 0, &[full_viewport(draw.extent)]);
    device.cmd_set_scissor(command_buffer, 0, &[full_scissor(draw.extent)]);

    device.cmd_draw_indexed(command_buffer, draw.index_count, 1, 0, 0, 0);

    device.cmd_end_rendering(command_buffer);

    transition_image_layout(
        device,
        command_buffer,
        draw.image,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )?;

    device.end_command_buffer(command_buffer)?;

    trace!("Recorded frame commands ({} indices).", draw.index_count);
    Ok(())
}
