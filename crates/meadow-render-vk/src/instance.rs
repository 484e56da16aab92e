// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use anyhow::{bail, Context, Result};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info};

pub const APP_NAME: &CStr = c"Meadow";
pub const ENGINE_NAME: &CStr = c"Meadow Engine";
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Reads a fixed-size, NUL-terminated name array from a properties struct.
///
/// # Safety
/// `raw` must contain a NUL byte.
pub(crate) unsafe fn c_name(raw: &[c_char]) -> &CStr {
    CStr::from_ptr(raw.as_ptr())
}

/// Names in `required` that do not appear in `available`, in `required` order.
pub fn missing_names<'a>(
    required: &[&CStr],
    available: impl IntoIterator<Item = &'a CStr>,
) -> Vec<String> {
    let available: Vec<&CStr> = available.into_iter().collect();
    required
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Instance extensions for presenting to `display_raw`, plus debug utils when
/// validating and portability enumeration on macOS.
pub fn required_instance_extensions(
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Vec<&'static CStr>> {
    let window_exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;

    let mut exts: Vec<&'static CStr> = window_exts
        .iter()
        .map(|&p| unsafe { CStr::from_ptr(p) })
        .collect();

    if validation {
        exts.push(ash::ext::debug_utils::NAME);
    }
    #[cfg(target_os = "macos")]
    exts.push(ash::khr::portability_enumeration::NAME);

    Ok(exts)
}

pub fn required_layers(validation: bool) -> Vec<&'static CStr> {
    if validation {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    }
}

unsafe fn verify_instance_support(
    entry: &Entry,
    extensions: &[&CStr],
    layers: &[&CStr],
) -> Result<()> {
    let ext_props = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    let missing = missing_names(
        extensions,
        ext_props.iter().map(|e| c_name(&e.extension_name)),
    );
    if !missing.is_empty() {
        bail!("required instance extensions unavailable: {}", missing.join(", "));
    }

    let layer_props = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    let missing = missing_names(layers, layer_props.iter().map(|l| c_name(&l.layer_name)));
    if !missing.is_empty() {
        bail!("required layers unavailable: {}", missing.join(", "));
    }
    Ok(())
}

pub unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let extensions = required_instance_extensions(display_raw, validation)?;
    let layers = required_layers(validation);
    verify_instance_support(entry, &extensions, &layers)?;

    for e in &extensions {
        debug!("instance extension {}", e.to_string_lossy());
    }

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        flags,
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    info!(
        "Vulkan instance ready ({} extensions, validation={})",
        extensions.len(),
        validation
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_present_means_nothing_missing() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface", c"VK_EXT_debug_utils"];
        let missing = missing_names(&[c"VK_KHR_surface", c"VK_EXT_debug_utils"], available);
        assert!(missing.is_empty());
    }

    #[test]
    fn reports_each_missing_name_in_order() {
        let available = [c"VK_KHR_surface"];
        let missing = missing_names(
            &[c"VK_EXT_debug_utils", c"VK_KHR_surface", VALIDATION_LAYER],
            available,
        );
        assert_eq!(missing, vec!["VK_EXT_debug_utils", "VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn empty_requirements_always_pass() {
        assert!(missing_names(&[], std::iter::empty()).is_empty());
    }

    #[test]
    fn validation_controls_layers() {
        assert_eq!(required_layers(true), vec![VALIDATION_LAYER]);
        assert!(required_layers(false).is_empty());
    }

    #[test]
    fn reads_nul_terminated_names() {
        let mut raw = [0 as c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"VK_KHR_surface") {
            *dst = *src as c_char;
        }
        assert_eq!(unsafe { c_name(&raw) }, c"VK_KHR_surface");
    }
}
