use crate::{
    core::context::GpuContext,
    image::create_image_view,
    window::FramebufferSource,
};

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::{
    prelude::v1_0::*,
    vk::{KhrSurfaceExtension, KhrSwapchainExtension},
};

/// Swapchain images kept by default. The driver minimum wins when
/// it is higher.
pub const PREFERRED_IMAGE_COUNT: u32 = 3;

pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Queries the surface live; capabilities change with the
    /// window size.
    pub unsafe fn get(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

/// B8G8R8A8_SRGB with a non-linear sRGB color space when the
/// surface offers it, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .cloned()
}

/// MAILBOX replaces queued images instead of blocking, which keeps
/// latency low without tearing. FIFO is the fallback since every
/// driver has to support it.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless the window manager leaves
/// the choice to us (width set to `u32::MAX`), in which case the
/// framebuffer size is clamped to the allowed range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = PREFERRED_IMAGE_COUNT.max(capabilities.min_image_count);

    // A maximum of zero means there is no limit.
    if capabilities.max_image_count != 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainSettings {
    pub fn select(support: &SwapchainSupport, framebuffer: (u32, u32)) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| anyhow!("Surface does not report any format."))?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer),
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

/// Blocks on window events for as long as the framebuffer has a
/// zero dimension, which is the case while the window is
/// minimised. A swapchain cannot have a zero extent. Returns
/// `None` if the window is closed in the meantime.
pub fn wait_for_drawable_size(window: &mut dyn FramebufferSource) -> Option<(u32, u32)> {
    let mut size = window.framebuffer_size();
    while size.0 == 0 || size.1 == 0 {
        if window.close_requested() {
            return None;
        }
        window.wait_events();
        size = window.framebuffer_size();
    }
    Some(size)
}

#[derive(Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub unsafe fn create(context: &GpuContext, framebuffer: (u32, u32)) -> Result<Self> {
        let support =
            SwapchainSupport::get(&context.instance, context.physical_device, context.surface)?;
        let settings = SwapchainSettings::select(&support, framebuffer)?;

        // Images shared by two queue families would otherwise
        // need explicit ownership transfers.
        let indices = context.queues.indices;
        let queue_family_indices = indices.unique();
        let image_sharing_mode = if indices.is_shared() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let device = &context.device;
        let mut swapchain = Self {
            handle: device.create_swapchain_khr(&info, None)?,
            images: Vec::new(),
            views: Vec::new(),
            format: settings.surface_format,
            present_mode: settings.present_mode,
            extent: settings.extent,
        };

        if let Err(error) = swapchain.create_views(device) {
            swapchain.destroy(device);
            return Err(error);
        }

        info!(
            "Swapchain created ({}x{}, {} images, {:?}).",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.present_mode
        );
        Ok(swapchain)
    }

    unsafe fn create_views(&mut self, device: &Device) -> Result<()> {
        self.images = device.get_swapchain_images_khr(self.handle)?;

        for &image in &self.images {
            let view = create_image_view(device, image, self.format.format)?;
            self.views.push(view);
        }

        Ok(())
    }

    /// Destroys the image views, then the swapchain itself. The
    /// images belong to the swapchain and go with it.
    pub unsafe fn destroy(&mut self, device: &Device) {
        self.views
            .drain(..)
            .for_each(|v| device.destroy_image_view(v, None));
        self.images.clear();

        device.destroy_swapchain_khr(self.handle, None);
        self.handle = vk::SwapchainKHR::null();

        debug!("Destroyed the swapchain and its image views.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::fake::FakeWindow;

    fn capabilities(
        current: (u32, u32),
        min_images: u32,
        max_images: u32,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn preferred_format_and_mailbox_selection() {
        let support = SwapchainSupport {
            capabilities: capabilities((1280, 720), 2, 8),
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        let settings = SwapchainSettings::select(&support, (1280, 720)).unwrap();

        assert_eq!(settings.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(settings.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(settings.image_count, 3);
    }

    #[test]
    fn defaults_only_selection() {
        let support = SwapchainSupport {
            capabilities: capabilities((1280, 720), 2, 8),
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let settings = SwapchainSettings::select(&support, (1280, 720)).unwrap();

        assert_eq!(settings.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(settings.surface_format, support.formats[0]);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(settings.image_count, 3);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];

        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn fifo_without_mailbox() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];

        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn sentinel_extent_follows_the_framebuffer() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 0);

        assert_eq!(
            choose_extent(&caps, (640, 480)),
            vk::Extent2D { width: 640, height: 480 }
        );
        assert_eq!(
            choose_extent(&caps, (9000, 0)),
            vk::Extent2D { width: 4096, height: 1 }
        );
    }

    #[test]
    fn image_count_respects_driver_limits() {
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 4, 0)), 4);
        assert_eq!(choose_image_count(&capabilities((1, 1), 1, 2)), 2);
    }

    #[test]
    fn minimised_window_blocks_until_it_has_a_size() {
        let mut window = FakeWindow::new(0, 0);
        window.pending_sizes.extend([(0, 0), (0, 600), (800, 600)]);

        assert_eq!(wait_for_drawable_size(&mut window), Some((800, 600)));
        assert_eq!(window.waits, 3);
    }

    #[test]
    fn closing_a_minimised_window_stops_the_wait() {
        let mut window = FakeWindow::new(0, 0);
        window.pending_sizes.extend([(0, 0), (0, 0), (0, 0)]);
        window.close_after_waits = Some(2);

        assert_eq!(wait_for_drawable_size(&mut window), None);
        assert_eq!(window.waits, 2);
    }

    #[test]
    fn visible_window_does_not_wait() {
        let mut window = FakeWindow::new(1280, 720);

        assert_eq!(wait_for_drawable_size(&mut window), Some((1280, 720)));
        assert_eq!(window.waits, 0);
    }
}
