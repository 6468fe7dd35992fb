use crate::{
    buffers::UniformBuffer,
    core::allocator::Allocator,
    descriptors::Mvp,
    error::RenderError,
    sync::{create_fence, create_semaphore},
    window::FramebufferSource,
};

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Data for a single frame slot.
pub struct FrameData {
    /// Re-recorded every time the slot comes round.
    pub command_buffer: vk::CommandBuffer,
    /// Signalled when the acquired swapchain image is ready to
    /// be rendered to.
    pub image_available: vk::Semaphore,
    /// Signalled by the GPU once the slot's submission is done.
    pub in_flight_fence: vk::Fence,
    pub uniform: UniformBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

impl FrameData {
    /// Creates the slot's sync objects and uniform buffer. The
    /// descriptor set is filled in once every slot exists, since
    /// the sets are allocated together.
    pub unsafe fn create(
        device: &Device,
        allocator: &mut Allocator,
        command_buffer: vk::CommandBuffer,
    ) -> Result<Self> {
        let image_available = create_semaphore(device)?;

        // Signalled, so the first wait on the slot returns at once.
        let in_flight_fence = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(error) => {
                device.destroy_semaphore(image_available, None);
                return Err(error);
            }
        };

        let size = std::mem::size_of::<Mvp>() as vk::DeviceSize;
        let uniform = match UniformBuffer::create(device, allocator, size) {
            Ok(uniform) => uniform,
            Err(error) => {
                device.destroy_fence(in_flight_fence, None);
                device.destroy_semaphore(image_available, None);
                return Err(error);
            }
        };

        Ok(Self {
            command_buffer,
            image_available,
            in_flight_fence,
            uniform,
            descriptor_set: vk::DescriptorSet::null(),
        })
    }

    /// The command buffer goes with its pool and the descriptor
    /// set with its pool; only the rest is released here.
    pub unsafe fn destroy(self, device: &Device, allocator: &mut Allocator) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_fence(self.in_flight_fence, None);
        self.uniform.destroy(device, allocator);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    /// The slot's previous submission, if any, has completed.
    #[default]
    Idle,
    Recording,
    /// Work was submitted and the fence has not been waited on
    /// yet.
    Submitted,
}

/// Outcome of acquiring a swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// How well the swapchain still matches the surface after a
/// present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain was stale on acquire and has been rebuilt;
    /// nothing was drawn and the slot did not advance.
    Skipped,
}

pub fn classify_acquire(
    result: Result<(u32, vk::SuccessCode), vk::ErrorCode>,
) -> Result<Acquired, RenderError> {
    match result {
        Ok((index, code)) => Ok(Acquired::Image {
            index,
            suboptimal: code == vk::SuccessCode::SUBOPTIMAL_KHR,
        }),
        Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
        Err(code) => Err(RenderError::UnexpectedResult {
            operation: "vkAcquireNextImageKHR",
            code,
        }),
    }
}

pub fn classify_present(
    result: Result<vk::SuccessCode, vk::ErrorCode>,
) -> Result<SwapchainStatus, RenderError> {
    match result {
        Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => Ok(SwapchainStatus::Suboptimal),
        Ok(_) => Ok(SwapchainStatus::Optimal),
        Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(code) => Err(RenderError::UnexpectedResult {
            operation: "vkQueuePresentKHR",
            code,
        }),
    }
}

/// The GPU side of a frame, one call per step. The scheduler
/// decides the order and what to do about stale swapchains.
pub trait FrameBackend {
    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    /// Returns the slot's fence to the unsignalled state.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired>;
    fn record(&mut self, slot: usize, image: u32) -> Result<()>;
    /// Submits the slot's commands; the slot's fence is signalled
    /// when they complete.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;
    fn present(&mut self, image: u32) -> Result<SwapchainStatus>;
    fn recreate_swapchain(&mut self, window: &mut dyn FramebufferSource) -> Result<()>;
}

/// Cycles through the frame slots and drives the acquire, record,
/// submit and present sequence, rebuilding the swapchain when it
/// goes stale or the window is resized.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    slots: [SlotState; MAX_FRAMES_IN_FLIGHT],
    current: usize,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[cfg(test)]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Slots whose submission may still be running on the GPU.
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|&&s| s == SlotState::Submitted).count()
    }

    pub fn draw_frame(
        &mut self,
        backend: &mut dyn FrameBackend,
        window: &mut dyn FramebufferSource,
    ) -> Result<FrameOutcome> {
        let slot = self.current;

        backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;

        let image = match backend.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    trace!("Acquired image {index} from a suboptimal swapchain.");
                }
                index
            }
            Acquired::OutOfDate => {
                // The fence is still signalled, so the next wait
                // on this slot returns at once.
                debug!("Swapchain out of date on acquire, recreating.");
                backend.recreate_swapchain(window)?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        // Only reset once work is certain to be submitted.
        backend.reset_slot(slot)?;

        self.slots[slot] = SlotState::Recording;
        backend.record(slot, image)?;
        backend.submit(slot, image)?;
        self.slots[slot] = SlotState::Submitted;
        trace!("Submitted slot {slot} ({} in flight).", self.outstanding());

        let status = backend.present(image)?;
        let resized = window.take_resized();

        if resized || status != SwapchainStatus::Optimal {
            debug!("Recreating swapchain (resized: {resized}, status: {status:?}).");
            backend.recreate_swapchain(window)?;
        }

        self.current = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(FrameOutcome::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::swapchain::wait_for_drawable_size,
        window::fake::FakeWindow,
    };

    use std::collections::VecDeque;

    use anyhow::anyhow;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Fence {
        Signaled,
        Unsignaled,
        Pending,
    }

    /// Tracks fences and swapchain views the way the driver would,
    /// completing submitted work as soon as it is waited on.
    struct FakeBackend {
        fences: [Fence; MAX_FRAMES_IN_FLIGHT],
        max_pending: usize,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<SwapchainStatus>,
        image_count: u32,
        next_image: u32,
        extent: (u32, u32),
        views_alive: usize,
        views_created: usize,
        views_destroyed: usize,
        recreations: usize,
        presented: Vec<u32>,
    }

    impl FakeBackend {
        fn new(extent: (u32, u32)) -> Self {
            Self {
                fences: [Fence::Signaled; MAX_FRAMES_IN_FLIGHT],
                max_pending: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_count: 3,
                next_image: 0,
                extent,
                views_alive: 3,
                views_created: 3,
                views_destroyed: 0,
                recreations: 0,
                presented: Vec::new(),
            }
        }

        fn pending(&self) -> usize {
            self.fences.iter().filter(|&&f| f == Fence::Pending).count()
        }
    }

    impl FrameBackend for FakeBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            match self.fences[slot] {
                Fence::Unsignaled => Err(anyhow!("Waiting on slot {slot} would never return.")),
                _ => {
                    self.fences[slot] = Fence::Signaled;
                    Ok(())
                }
            }
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            assert_eq!(self.fences[slot], Fence::Signaled, "reset before wait");
            self.fences[slot] = Fence::Unsignaled;
            Ok(())
        }

        fn acquire_image(&mut self, _: usize) -> Result<Acquired> {
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquired::Image { index, suboptimal: false })
        }

        fn record(&mut self, slot: usize, _: u32) -> Result<()> {
            assert_eq!(self.fences[slot], Fence::Unsignaled, "recording a busy slot");
            Ok(())
        }

        fn submit(&mut self, slot: usize, _: u32) -> Result<()> {
            self.fences[slot] = Fence::Pending;
            self.max_pending = self.max_pending.max(self.pending());
            Ok(())
        }

        fn present(&mut self, image: u32) -> Result<SwapchainStatus> {
            self.presented.push(image);
            Ok(self.present_script.pop_front().unwrap_or(SwapchainStatus::Optimal))
        }

        fn recreate_swapchain(&mut self, window: &mut dyn FramebufferSource) -> Result<()> {
            // Device idle: everything in flight completes.
            for fence in &mut self.fences {
                if *fence == Fence::Pending {
                    *fence = Fence::Signaled;
                }
            }

            self.views_destroyed += self.views_alive;
            self.views_alive = 0;

            let Some(extent) = wait_for_drawable_size(window) else {
                return Ok(());
            };
            self.extent = extent;

            self.views_alive = self.image_count as usize;
            self.views_created += self.image_count as usize;
            self.next_image = 0;
            self.recreations += 1;
            Ok(())
        }
    }

    #[test]
    fn at_most_two_frames_are_in_flight() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);

        for _ in 0..10 {
            let outcome = scheduler.draw_frame(&mut backend, &mut window).unwrap();
            assert_eq!(outcome, FrameOutcome::Presented);
            assert!(scheduler.outstanding() <= MAX_FRAMES_IN_FLIGHT);
        }

        assert_eq!(backend.max_pending, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(backend.presented, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(backend.recreations, 0);
    }

    #[test]
    fn slots_alternate() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.slot_state(0), SlotState::Submitted);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.outstanding(), 2);
    }

    #[test]
    fn resize_recreates_with_the_new_extent() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        window.resize(640, 480);
        scheduler.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(backend.recreations, 1);
        assert_eq!(backend.extent, (640, 480));

        // The next frame draws normally into the new swapchain.
        let outcome = scheduler.draw_frame(&mut backend, &mut window).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(backend.recreations, 1);
    }

    #[test]
    fn stale_present_recreates() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);
        backend.present_script.extend([SwapchainStatus::Suboptimal, SwapchainStatus::OutOfDate]);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        scheduler.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(backend.recreations, 2);
        assert_eq!(backend.presented.len(), 2);
    }

    #[test]
    fn minimised_window_blocks_recreation_until_restored() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        window.resize(0, 0);
        window.pending_sizes.extend([(0, 0), (1024, 768)]);
        scheduler.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(window.waits, 2);
        assert_eq!(backend.extent, (1024, 768));
    }

    #[test]
    fn closing_while_minimised_does_not_hang() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);

        scheduler.draw_frame(&mut backend, &mut window).unwrap();
        window.resize(0, 0);
        window.close_after_waits = Some(1);

        let outcome = scheduler.draw_frame(&mut backend, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert!(window.close_requested());
        assert_eq!(window.waits, 1);
        assert_eq!(backend.recreations, 0);
        assert_eq!(backend.views_alive, 0);
        assert_eq!(backend.views_created, backend.views_destroyed);
    }

    #[test]
    fn out_of_date_acquires_skip_frames_without_leaking() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = FakeBackend::new((1280, 720));
        let mut window = FakeWindow::new(1280, 720);
        backend.acquire_script.extend([Acquired::OutOfDate, Acquired::OutOfDate]);

        assert_eq!(
            scheduler.draw_frame(&mut backend, &mut window).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(
            scheduler.draw_frame(&mut backend, &mut window).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(scheduler.current_slot(), 0);

        // A skipped frame leaves its fence signalled, so this does
        // not deadlock.
        assert_eq!(
            scheduler.draw_frame(&mut backend, &mut window).unwrap(),
            FrameOutcome::Presented
        );

        assert_eq!(backend.recreations, 2);
        assert_eq!(backend.views_alive, backend.image_count as usize);
        assert_eq!(backend.views_created - backend.views_destroyed, backend.views_alive);
    }

    #[test]
    fn acquire_results() {
        assert_eq!(
            classify_acquire(Ok((2, vk::SuccessCode::SUCCESS))).unwrap(),
            Acquired::Image { index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((0, vk::SuccessCode::SUBOPTIMAL_KHR))).unwrap(),
            Acquired::Image { index: 0, suboptimal: true }
        );
        assert_eq!(
            classify_acquire(Err(vk::ErrorCode::OUT_OF_DATE_KHR)).unwrap(),
            Acquired::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::ErrorCode::DEVICE_LOST)),
            Err(RenderError::UnexpectedResult { code: vk::ErrorCode::DEVICE_LOST, .. })
        ));
    }

    #[test]
    fn present_results() {
        assert_eq!(
            classify_present(Ok(vk::SuccessCode::SUCCESS)).unwrap(),
            SwapchainStatus::Optimal
        );
        assert_eq!(
            classify_present(Ok(vk::SuccessCode::SUBOPTIMAL_KHR)).unwrap(),
            SwapchainStatus::Suboptimal
        );
        assert_eq!(
            classify_present(Err(vk::ErrorCode::OUT_OF_DATE_KHR)).unwrap(),
            SwapchainStatus::OutOfDate
        );
        assert!(classify_present(Err(vk::ErrorCode::SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn backend_errors_propagate() {
        struct Broken;
        impl FrameBackend for Broken {
            fn wait_for_slot(&mut self, _: usize) -> Result<()> {
                Err(RenderError::FenceWait(vk::ErrorCode::DEVICE_LOST).into())
            }
            fn reset_slot(&mut self, _: usize) -> Result<()> {
                unreachable!()
            }
            fn acquire_image(&mut self, _: usize) -> Result<Acquired> {
                unreachable!()
            }
            fn record(&mut self, _: usize, _: u32) -> Result<()> {
                unreachable!()
            }
            fn submit(&mut self, _: usize, _: u32) -> Result<()> {
                unreachable!()
            }
            fn present(&mut self, _: u32) -> Result<SwapchainStatus> {
                unreachable!()
            }
            fn recreate_swapchain(&mut self, _: &mut dyn FramebufferSource) -> Result<()> {
                unreachable!()
            }
        }

        let mut scheduler = FrameScheduler::new();
        let error = scheduler
            .draw_frame(&mut Broken, &mut FakeWindow::new(1, 1))
            .unwrap_err();

        assert!(error.downcast_ref::<RenderError>().is_some());
    }
}
