use crate::buffers::UniformBuffer;

use anyhow::Result;
use glam::{Mat4, Vec3};
use log::*;
use vulkanalia::prelude::v1_0::*;

/// Model, view and projection matrices, as read by the vertex
/// shader from binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mvp {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Mvp {
    /// Transforms `seconds` after start-up: the quad turns 90
    /// degrees per second around +Z, seen from (2, 2, 2) with +Z
    /// up. The projection keeps clip space Y pointing up, so the
    /// image is flipped in Vulkan's framebuffer and the quad's
    /// counter-clockwise winding ends up clockwise.
    pub fn at(seconds: f32, aspect: f32) -> Self {
        Self {
            model: Mat4::from_axis_angle(Vec3::Z, seconds * 90f32.to_radians()),
            view: Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Z),
            proj: Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0),
        }
    }
}

/// Width over height; a degenerate extent yields 1.
pub fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    }
}

pub unsafe fn create_descriptor_set_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX);

    let bindings = &[ubo_binding];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

    let layout = device.create_descriptor_set_layout(&info, None)?;

    info!("Descriptor set layout created.");
    Ok(layout)
}

/// Pool holding exactly `count` uniform buffer sets.
pub unsafe fn create_descriptor_pool(device: &Device, count: u32) -> Result<vk::DescriptorPool> {
    let ubo_size = vk::DescriptorPoolSize::builder()
        .type_(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(count);

    let pool_sizes = &[ubo_size];
    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(pool_sizes)
        .max_sets(count);

    Ok(device.create_descriptor_pool(&info, None)?)
}

/// Allocates one set per uniform buffer and points each set at
/// its buffer.
pub unsafe fn create_descriptor_sets(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    uniform_buffers: &[&UniformBuffer],
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; uniform_buffers.len()];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = device.allocate_descriptor_sets(&info)?;

    for (&set, uniform) in sets.iter().zip(uniform_buffers) {
        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(uniform.buffer.handle)
            .offset(0)
            .range(std::mem::size_of::<Mvp>() as u64);

        let buffer_infos = &[buffer_info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(buffer_infos);

        device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
    }

    debug!("Allocated {} descriptor sets.", sets.len());
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn approx(a: Vec4, b: Vec4) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn model_turns_a_quarter_per_second() {
        let mvp = Mvp::at(1.0, 16.0 / 9.0);

        let rotated = mvp.model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx(rotated, Vec4::new(0.0, 1.0, 0.0, 1.0)));
    }

    #[test]
    fn origin_is_in_front_of_the_camera() {
        let mvp = Mvp::at(0.0, 1.0);

        let clip = mvp.proj * mvp.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;

        assert!(clip.w > 0.0);
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<Mvp>(), 3 * 64);
    }

    #[test]
    fn aspect_handles_zero_height() {
        assert_eq!(aspect_ratio(vk::Extent2D { width: 1280, height: 720 }), 1280.0 / 720.0);
        assert_eq!(aspect_ratio(vk::Extent2D { width: 0, height: 0 }), 1.0);
    }
}
