use crate::{
    core::{
        instance::{PORTABILITY_MACOS_VERSION, VALIDATION_LAYER},
        queues::{QueueFamilyIndices, Queues},
    },
    error::RenderError,
};

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use log::*;
use thiserror::Error;
use vulkanalia::{prelude::v1_0::*, Version};

/// Device extensions the renderer cannot run without. Dynamic
/// rendering and synchronization2 are core in 1.3 and enabled
/// through features instead.
pub const REQUIRED_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

pub const MIN_API_VERSION: Version = Version::new(1, 3, 0);

/// Required on portability drivers (MoltenVK). vulkanalia only
/// defines it with provisional extensions enabled.
pub const PORTABILITY_SUBSET_EXTENSION: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_KHR_portability_subset");

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// What device selection looks at, gathered from one physical
/// device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub api_version: Version,
    pub has_graphics_queue: bool,
    pub extensions: HashSet<vk::ExtensionName>,
}

impl DeviceCandidate {
    unsafe fn query(instance: &Instance, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let properties = instance.get_physical_device_properties(physical_device);

        let has_graphics_queue = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .any(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS));

        let extensions = instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect();

        Ok(Self {
            name: properties.device_name.to_string_lossy().into_owned(),
            api_version: Version::from(properties.api_version),
            has_graphics_queue,
            extensions,
        })
    }

    pub fn check(&self) -> Result<(), SuitabilityError> {
        if self.api_version < MIN_API_VERSION {
            return Err(SuitabilityError("Vulkan 1.3 support"));
        }
        if !self.has_graphics_queue {
            return Err(SuitabilityError("graphics queue family"));
        }
        if !REQUIRED_EXTENSIONS.iter().all(|e| self.extensions.contains(e)) {
            return Err(SuitabilityError("required device extensions"));
        }
        Ok(())
    }
}

/// Index of the first suitable candidate, in enumeration order.
/// Rejected candidates are logged along with the reason.
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates.iter().position(|candidate| match candidate.check() {
        Ok(()) => true,
        Err(error) => {
            warn!("Skipping physical device ({}): {}", candidate.name, error);
            false
        }
    })
}

pub unsafe fn pick_physical_device(instance: &Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let candidates = devices
        .iter()
        .map(|&d| DeviceCandidate::query(instance, d))
        .collect::<Result<Vec<_>>>()?;

    match select_device(&candidates) {
        Some(index) => {
            info!("Selected physical device: {}", candidates[index].name);
            Ok(devices[index])
        }
        None => Err(anyhow!(RenderError::NoSuitableDevice)),
    }
}

pub unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    validation: bool,
) -> Result<(Device, Queues)> {
    let indices = QueueFamilyIndices::get(instance, physical_device, surface)?;

    // One queue per distinct family. The priority still has to
    // be given even for a single queue.
    let priorities = &[1.0];
    let queue_infos = indices
        .unique()
        .iter()
        .map(|&index| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(index)
                .queue_priorities(priorities)
                .build()
        })
        .collect::<Vec<_>>();

    // Device layers are deprecated, but older loaders still
    // look at them.
    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut extensions = REQUIRED_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(PORTABILITY_SUBSET_EXTENSION.as_ptr());
    }

    let mut features11 = vk::PhysicalDeviceVulkan11Features::builder()
        .shader_draw_parameters(true);

    let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
        .buffer_device_address(true);

    // Dynamic rendering removes render passes and framebuffers;
    // synchronization2 gives the barrier and submit calls used by
    // the frame loop.
    let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
        .synchronization2(true)
        .dynamic_rendering(true);

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut features11)
        .push_next(&mut features12)
        .push_next(&mut features13);

    let device = instance.create_device(physical_device, &info, None)?;
    let queues = Queues::get(&device, indices);

    info!(
        "Logical device created (graphics family {}, present family {}).",
        indices.graphics, indices.present
    );
    Ok((device, queues))
}
