use crate::error::RenderError;

use std::collections::HashSet;
use std::ffi::CStr;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::{
    prelude::v1_0::*,
    vk::ExtDebugUtilsExtension,
    window as vk_window,
    Version,
};
use winit::window::Window;

pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

/// Since 1.3.216, portability drivers (MoltenVK) are only
/// enumerated when the instance opts in.
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

/// Returns every required name absent from `available`, in the
/// order they were required.
pub fn missing_names<'a>(
    required: impl IntoIterator<Item = &'a vk::ExtensionName>,
    available: &HashSet<vk::ExtensionName>,
) -> Vec<String> {
    required
        .into_iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn portability_enabled(entry: &Entry) -> Result<bool> {
    Ok(cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION)
}

/// Creates the Vulkan instance for the given window. The debug
/// messenger is returned alongside it when validation is on; a
/// messenger that cannot be registered is only logged.
pub unsafe fn create_instance(
    window: &Window,
    entry: &Entry,
    validation: bool,
) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
    // Layers are checked as a whole so that the error lists
    // every missing one at once.
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    let required_layers = if validation {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };

    let missing = missing_names(&required_layers, &available_layers);
    if !missing.is_empty() {
        return Err(anyhow!(RenderError::UnsupportedLayers(missing)));
    }

    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"ariel\0")
        .application_version(vk::make_version(0, 1, 0))
        .engine_name(b"ariel\0")
        .engine_version(vk::make_version(0, 1, 0))
        .api_version(vk::make_version(1, 3, 0));

    let mut required_extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| **e)
        .collect::<Vec<_>>();

    if validation {
        required_extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name);
    }

    let portability = portability_enabled(entry)?;
    if portability {
        info!("Enabling extensions for macOS portability.");
        required_extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name);
        required_extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name);
    }

    let available_extensions = entry
        .enumerate_instance_extension_properties(None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    let missing = missing_names(&required_extensions, &available_extensions);
    if !missing.is_empty() {
        return Err(anyhow!(RenderError::UnsupportedExtensions(missing)));
    }

    let layers = required_layers.iter().map(|l| l.as_ptr()).collect::<Vec<_>>();
    let extensions = required_extensions.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();

    let flags = if portability {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    // Chaining the messenger info onto the instance info also
    // covers messages emitted by instance creation itself.
    let mut debug_info = debug_messenger_info();
    if validation {
        info = info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&info, None)?;
    info!("Vulkan instance created.");

    let messenger = if validation {
        setup_debug_messenger(&instance)
    } else {
        vk::DebugUtilsMessengerEXT::null()
    };

    Ok((instance, messenger))
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback))
}

unsafe fn setup_debug_messenger(instance: &Instance) -> vk::DebugUtilsMessengerEXT {
    match instance.create_debug_utils_messenger_ext(&debug_messenger_info(), None) {
        Ok(messenger) => {
            debug!("Debug messenger registered.");
            messenger
        }
        Err(error) => {
            warn!("Failed to set up debug messenger: {error}");
            vk::DebugUtilsMessengerEXT::null()
        }
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }

    let data = unsafe { *data };
    if data.message.is_null() {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({type_:?}) {message}");
    } else {
        trace!("({type_:?}) {message}");
    }

    // Returning true would abort the call that triggered the
    // message.
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&[u8]]) -> Vec<vk::ExtensionName> {
        list.iter().map(|n| vk::ExtensionName::from_bytes(n)).collect()
    }

    #[test]
    fn nothing_missing_when_all_are_available() {
        let required = names(&[b"VK_KHR_surface", b"VK_KHR_xcb_surface"]);
        let available = names(&[b"VK_KHR_xcb_surface", b"VK_KHR_surface", b"VK_EXT_debug_utils"])
            .into_iter()
            .collect::<HashSet<_>>();

        assert!(missing_names(&required, &available).is_empty());
    }

    #[test]
    fn every_missing_name_is_listed() {
        let required = names(&[
            b"VK_KHR_surface",
            b"VK_EXT_debug_utils",
            b"VK_KHR_portability_enumeration",
        ]);
        let available = names(&[b"VK_KHR_surface"]).into_iter().collect::<HashSet<_>>();

        assert_eq!(
            missing_names(&required, &available),
            vec!["VK_EXT_debug_utils", "VK_KHR_portability_enumeration"]
        );
    }

    #[test]
    fn missing_validation_layer_error_names_it() {
        let missing = missing_names(&[VALIDATION_LAYER], &HashSet::new());
        let error = RenderError::UnsupportedLayers(missing);

        assert!(error.to_string().contains("VK_LAYER_KHRONOS_validation"));
    }
}
