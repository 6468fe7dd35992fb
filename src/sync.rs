use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

pub unsafe fn create_semaphore(device: &Device) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::builder();
    Ok(device.create_semaphore(&info, None)?)
}

/// Fences guarding frame slots start signalled, so that the very
/// first wait on each slot returns immediately.
pub unsafe fn create_fence(device: &Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let info = vk::FenceCreateInfo::builder().flags(flags);
    Ok(device.create_fence(&info, None)?)
}

/// One "render finished" semaphore per swapchain image. They are
/// indexed by image rather than by frame slot, since presentation
/// of an image may still be waiting on its semaphore when the
/// slot comes round again.
pub unsafe fn create_image_semaphores(device: &Device, count: usize) -> Result<Vec<vk::Semaphore>> {
    let mut semaphores = Vec::with_capacity(count);
    for _ in 0..count {
        match create_semaphore(device) {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(error) => {
                destroy_semaphores(device, &mut semaphores);
                return Err(error);
            }
        }
    }
    Ok(semaphores)
}

pub unsafe fn destroy_semaphores(device: &Device, semaphores: &mut Vec<vk::Semaphore>) {
    semaphores
        .drain(..)
        .for_each(|s| device.destroy_semaphore(s, None));
}

/// Binary semaphore entry of a `SubmitInfo2`, limited to
/// `stage_mask`.
pub fn semaphore_submit(
    stage_mask: vk::PipelineStageFlags2,
    semaphore: vk::Semaphore,
) -> vk::SemaphoreSubmitInfo {
    vk::SemaphoreSubmitInfo::builder()
        .semaphore(semaphore)
        .stage_mask(stage_mask)
        .device_index(0)
        .build()
}
