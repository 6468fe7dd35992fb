use crate::error::RenderError;

use anyhow::Result;
use vulkanalia::{prelude::v1_0::*, vk::KhrSurfaceExtension};

/// Capabilities of one queue family that matter to the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

/// Queue families the renderer submits to. Both indices are the
/// same whenever a single family can do both jobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Resolves the graphics and present families, preferring a
    /// single family for both:
    ///  1. the first graphics family, if it can also present;
    ///  2. else the first family that can do both;
    ///  3. else the first graphics family along with the first
    ///     family able to present.
    pub fn resolve(families: &[QueueFamilyInfo]) -> Result<Self, RenderError> {
        let graphics = families
            .iter()
            .position(|f| f.graphics)
            .ok_or(RenderError::NoGraphicsQueue)? as u32;

        if families[graphics as usize].present {
            return Ok(Self { graphics, present: graphics });
        }

        if let Some(both) = families.iter().position(|f| f.graphics && f.present) {
            let both = both as u32;
            return Ok(Self { graphics: both, present: both });
        }

        let present = families
            .iter()
            .position(|f| f.present)
            .ok_or(RenderError::NoPresentQueue)? as u32;

        Ok(Self { graphics, present })
    }

    /// Queries the device's queue families against `surface`.
    pub unsafe fn get(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);

        let mut families = Vec::with_capacity(properties.len());
        for (index, family) in properties.iter().enumerate() {
            families.push(QueueFamilyInfo {
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: instance.get_physical_device_surface_support_khr(
                    physical_device,
                    index as u32,
                    surface,
                )?,
            });
        }

        Ok(Self::resolve(&families)?)
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// The device queues, one per role. They are the same handle when
/// the families are shared.
#[derive(Clone, Copy, Debug, Default)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub indices: QueueFamilyIndices,
}

impl Queues {
    pub unsafe fn get(device: &Device, indices: QueueFamilyIndices) -> Self {
        Self {
            graphics: device.get_device_queue(indices.graphics, 0),
            present: device.get_device_queue(indices.present, 0),
            indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPHICS: QueueFamilyInfo = QueueFamilyInfo { graphics: true, present: false };
    const PRESENT: QueueFamilyInfo = QueueFamilyInfo { graphics: false, present: true };
    const BOTH: QueueFamilyInfo = QueueFamilyInfo { graphics: true, present: true };
    const NEITHER: QueueFamilyInfo = QueueFamilyInfo { graphics: false, present: false };

    #[test]
    fn graphics_family_that_presents_is_used_for_both() {
        let indices = QueueFamilyIndices::resolve(&[NEITHER, BOTH, PRESENT]).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn later_family_with_both_wins_over_a_split() {
        let indices = QueueFamilyIndices::resolve(&[GRAPHICS, PRESENT, BOTH]).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
    }

    #[test]
    fn split_families_when_nothing_does_both() {
        let indices = QueueFamilyIndices::resolve(&[PRESENT, GRAPHICS, NEITHER]).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 0 });
        assert_eq!(indices.unique(), vec![1, 0]);
    }

    #[test]
    fn no_present_family_is_fatal() {
        let error = QueueFamilyIndices::resolve(&[GRAPHICS, NEITHER]).unwrap_err();

        assert!(matches!(error, RenderError::NoPresentQueue));
    }

    #[test]
    fn no_graphics_family_is_fatal() {
        let error = QueueFamilyIndices::resolve(&[PRESENT]).unwrap_err();

        assert!(matches!(error, RenderError::NoGraphicsQueue));
    }
}
