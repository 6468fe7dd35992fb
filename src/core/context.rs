use crate::core::{
    devices::{create_logical_device, pick_physical_device},
    instance::create_instance,
    queues::Queues,
};

use anyhow::{anyhow, Context, Result};
use log::*;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    prelude::v1_0::*,
    vk::{ExtDebugUtilsExtension, KhrSurfaceExtension},
    window as vk_window,
};
use winit::window::Window;

/// Everything that ties the renderer to one GPU: the loaded
/// library, the instance, the window surface, and the logical
/// device with its queues.
pub struct GpuContext {
    /// Owns the loaded library. Never read, but it has to outlive
    /// the instance.
    _entry: Entry,
    pub instance: Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queues: Queues,
}

impl GpuContext {
    pub unsafe fn create(window: &Window, validation: bool) -> Result<Self> {
        let loader = LibloadingLoader::new(LIBRARY).context("Failed to load the Vulkan library")?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let (instance, messenger) = create_instance(window, &entry, validation)?;

        // Past this point every failure has to unwind what was
        // already created.
        let destroy_instance = |instance: &Instance| {
            if messenger != vk::DebugUtilsMessengerEXT::null() {
                instance.destroy_debug_utils_messenger_ext(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface = match vk_window::create_surface(&instance, window, window) {
            Ok(surface) => surface,
            Err(error) => {
                destroy_instance(&instance);
                return Err(error).context("Failed to create window surface");
            }
        };
        info!("Surface created.");

        let device = pick_physical_device(&instance).and_then(|physical_device| {
            let (device, queues) =
                create_logical_device(&entry, &instance, physical_device, surface, validation)?;
            Ok((physical_device, device, queues))
        });

        let (physical_device, device, queues) = match device {
            Ok(device) => device,
            Err(error) => {
                instance.destroy_surface_khr(surface, None);
                destroy_instance(&instance);
                return Err(error);
            }
        };

        Ok(Self {
            _entry: entry,
            instance,
            messenger,
            surface,
            physical_device,
            device,
            queues,
        })
    }

    /// Destroys the device, then the surface, the debug messenger
    /// and the instance. Everything created from the device must
    /// be gone by then.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.instance.destroy_surface_khr(self.surface, None);

        if self.messenger != vk::DebugUtilsMessengerEXT::null() {
            self.instance.destroy_debug_utils_messenger_ext(self.messenger, None);
        }

        self.instance.destroy_instance(None);
        info!("Destroyed the Vulkan instance.");
    }
}
