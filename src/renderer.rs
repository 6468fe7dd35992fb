use crate::{
    buffers::{upload_buffer, Buffer, TransferContext},
    commands::{allocate_command_buffers, create_command_pool, record_frame, DrawInfo},
    config::EngineConfig,
    core::{
        allocator::Allocator,
        context::GpuContext,
        swapchain::{wait_for_drawable_size, Swapchain},
    },
    descriptors::{
        aspect_ratio, create_descriptor_pool, create_descriptor_set_layout,
        create_descriptor_sets, Mvp,
    },
    error::RenderError,
    frame::{
        classify_acquire, classify_present, Acquired, FrameBackend, FrameData,
        FrameOutcome, FrameScheduler, SwapchainStatus, MAX_FRAMES_IN_FLIGHT,
    },
    pipeline::Pipeline,
    shaders::load_shader,
    sync::{create_image_semaphores, destroy_semaphores, semaphore_submit},
    vertex::{INDICES, VERTICES},
    window::{FramebufferSource, WindowHost},
};

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::*;
use vulkanalia::{
    prelude::v1_0::*,
    vk::{DeviceV1_3, KhrSwapchainExtension},
};

/// Draws the spinning quad into the window, two frames at a time.
pub struct Renderer {
    scheduler: FrameScheduler,
    state: RenderState,
}

/// Every GPU object the renderer owns. Null handles and empty
/// lists stand for objects not created yet, so a half-built state
/// can be torn down with the same `destroy`.
struct RenderState {
    context: GpuContext,
    allocator: Allocator,
    swapchain: Swapchain,
    pipeline: Pipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    command_pool: vk::CommandPool,
    frames: Vec<FrameData>,
    /// Indexed by swapchain image.
    render_finished: Vec<vk::Semaphore>,
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
    start: Instant,
}

impl Renderer {
    pub unsafe fn create(host: &mut WindowHost, config: &EngineConfig) -> Result<Self> {
        // Read before touching Vulkan, so a bad path fails fast.
        let bytecode = load_shader(&config.shader_path)?;

        let framebuffer = wait_for_drawable_size(host)
            .ok_or_else(|| anyhow!("Window closed before rendering started."))?;
        let window = host.window()?;

        let context = GpuContext::create(window, config.validation)?;
        let allocator = Allocator::new(&context.instance, context.physical_device);

        let mut state = RenderState {
            context,
            allocator,
            swapchain: Swapchain::default(),
            pipeline: Pipeline::default(),
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            command_pool: vk::CommandPool::null(),
            frames: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            render_finished: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            start: Instant::now(),
        };

        if let Err(error) = state.init(framebuffer, &bytecode, config.blend) {
            state.destroy();
            return Err(error);
        }

        info!("Renderer ready.");
        Ok(Self {
            scheduler: FrameScheduler::new(),
            state,
        })
    }

    pub unsafe fn draw_frame(
        &mut self,
        window: &mut dyn FramebufferSource,
    ) -> Result<FrameOutcome> {
        self.scheduler.draw_frame(&mut self.state, window)
    }

    /// Waits for the GPU to go idle, then releases everything in
    /// reverse creation order. The window must outlive this call.
    pub unsafe fn destroy(&mut self) {
        self.state.destroy();
    }
}

impl RenderState {
    unsafe fn init(&mut self, framebuffer: (u32, u32), bytecode: &[u8], blend: bool) -> Result<()> {
        let device = &self.context.device;

        self.swapchain = Swapchain::create(&self.context, framebuffer)?;
        self.render_finished = create_image_semaphores(device, self.swapchain.images.len())?;

        self.set_layout = create_descriptor_set_layout(device)?;
        self.pipeline = Pipeline::create(
            device,
            bytecode,
            self.swapchain.format.format,
            self.set_layout,
            blend,
        )?;

        self.command_pool = create_command_pool(device, self.context.queues.indices.graphics)?;

        let transfer = TransferContext {
            pool: self.command_pool,
            queue: self.context.queues.graphics,
        };

        let vertices = upload_buffer(
            device,
            &mut self.allocator,
            transfer,
            &VERTICES,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .context("Failed to upload vertices")?;
        self.vertex_buffer = Some(vertices);

        let indices = upload_buffer(
            device,
            &mut self.allocator,
            transfer,
            &INDICES,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )
        .context("Failed to upload indices")?;
        self.index_buffer = Some(indices);

        let command_buffers =
            allocate_command_buffers(device, self.command_pool, MAX_FRAMES_IN_FLIGHT as u32)?;
        for command_buffer in command_buffers {
            let frame = FrameData::create(device, &mut self.allocator, command_buffer)?;
            self.frames.push(frame);
        }

        self.descriptor_pool = create_descriptor_pool(device, MAX_FRAMES_IN_FLIGHT as u32)?;
        let uniforms = self.frames.iter().map(|f| &f.uniform).collect::<Vec<_>>();
        let sets =
            create_descriptor_sets(device, self.descriptor_pool, self.set_layout, &uniforms)?;
        for (frame, set) in self.frames.iter_mut().zip(sets) {
            frame.descriptor_set = set;
        }

        Ok(())
    }

    unsafe fn destroy(&mut self) {
        let device = &self.context.device;

        if let Err(error) = device.device_wait_idle() {
            error!("Failed to wait for the device to go idle: {error:?}");
        }

        // Sets go with their pool, command buffers with theirs.
        for frame in self.frames.drain(..) {
            frame.destroy(device, &mut self.allocator);
        }
        destroy_semaphores(device, &mut self.render_finished);
        device.destroy_command_pool(self.command_pool, None);

        if let Some(buffer) = self.vertex_buffer.take() {
            buffer.destroy(device, &mut self.allocator);
        }
        if let Some(buffer) = self.index_buffer.take() {
            buffer.destroy(device, &mut self.allocator);
        }
        self.allocator.destroy(device);

        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
        self.pipeline.destroy(device);
        self.swapchain.destroy(device);

        self.context.destroy();
    }
}

impl FrameBackend for RenderState {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames[slot].in_flight_fence;
        unsafe { self.context.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(RenderError::FenceWait)?;
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames[slot].in_flight_fence;
        unsafe { self.context.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired> {
        let result = unsafe {
            self.context.device.acquire_next_image_khr(
                self.swapchain.handle,
                u64::MAX,
                self.frames[slot].image_available,
                vk::Fence::null(),
            )
        };

        Ok(classify_acquire(result)?)
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<()> {
        let frame = &self.frames[slot];
        let extent = self.swapchain.extent;

        let mvp = Mvp::at(self.start.elapsed().as_secs_f32(), aspect_ratio(extent));

        let (vertex_buffer, index_buffer) = match (self.vertex_buffer, self.index_buffer) {
            (Some(vertices), Some(indices)) => (vertices.handle, indices.handle),
            _ => return Err(anyhow!("Recording before the geometry was uploaded.")),
        };

        let draw = DrawInfo {
            image: self.swapchain.images[image as usize],
            view: self.swapchain.views[image as usize],
            extent,
            pipeline: &self.pipeline,
            descriptor_set: frame.descriptor_set,
            vertex_buffer,
            index_buffer,
            index_count: INDICES.len() as u32,
        };

        unsafe {
            frame.uniform.write(&mvp);
            record_frame(&self.context.device, frame.command_buffer, &draw)
        }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let frame = &self.frames[slot];

        let wait_infos = &[semaphore_submit(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            frame.image_available,
        )];
        let signal_infos = &[semaphore_submit(
            vk::PipelineStageFlags2::ALL_GRAPHICS,
            self.render_finished[image as usize],
        )];
        let command_buffer_infos = &[vk::CommandBufferSubmitInfo::builder()
            .command_buffer(frame.command_buffer)];

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(wait_infos)
            .signal_semaphore_infos(signal_infos)
            .command_buffer_infos(command_buffer_infos);

        unsafe {
            self.context.device.queue_submit2(
                self.context.queues.graphics,
                &[submit_info],
                frame.in_flight_fence,
            )?;
        }

        Ok(())
    }

    fn present(&mut self, image: u32) -> Result<SwapchainStatus> {
        let wait_semaphores = &[self.render_finished[image as usize]];
        let swapchains = &[self.swapchain.handle];
        let image_indices = &[image];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = unsafe {
            self.context
                .device
                .queue_present_khr(self.context.queues.present, &info)
        };

        Ok(classify_present(result)?)
    }

    fn recreate_swapchain(&mut self, window: &mut dyn FramebufferSource) -> Result<()> {
        let device = &self.context.device;
        let old_format = self.swapchain.format.format;
        let old_count = self.swapchain.images.len();

        unsafe {
            device.device_wait_idle()?;
            self.swapchain.destroy(device);
        }

        // Nothing is drawn after a close, so the swapchain can stay
        // destroyed.
        let Some(framebuffer) = wait_for_drawable_size(window) else {
            debug!("Window closed while minimised, swapchain not recreated.");
            return Ok(());
        };
        self.swapchain = unsafe { Swapchain::create(&self.context, framebuffer)? };

        if self.swapchain.format.format != old_format {
            // The pipeline was built for the old format.
            warn!(
                "Swapchain format changed from {:?} to {:?}.",
                old_format, self.swapchain.format.format
            );
        }

        if self.swapchain.images.len() != old_count {
            debug!(
                "Swapchain image count changed from {old_count} to {}.",
                self.swapchain.images.len()
            );
            let device = &self.context.device;
            unsafe {
                destroy_semaphores(device, &mut self.render_finished);
                self.render_finished =
                    create_image_semaphores(device, self.swapchain.images.len())?;
            }
        }

        Ok(())
    }
}
