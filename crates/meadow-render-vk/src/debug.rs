// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use tracing::Level;

pub const LOG_TARGET: &str = "vulkan";

/// Validation severity to tracing level. The most severe bit wins.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    type Sev = vk::DebugUtilsMessageSeverityFlagsEXT;
    if severity.contains(Sev::ERROR) {
        Level::ERROR
    } else if severity.contains(Sev::WARNING) {
        Level::WARN
    } else if severity.contains(Sev::INFO) {
        Level::INFO
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();

    // tracing macros need a constant level
    let level = severity_level(severity);
    if level == Level::ERROR {
        tracing::error!(target: LOG_TARGET, ?types, "{msg}");
    } else if level == Level::WARN {
        tracing::warn!(target: LOG_TARGET, ?types, "{msg}");
    } else if level == Level::INFO {
        tracing::info!(target: LOG_TARGET, ?types, "{msg}");
    } else {
        tracing::trace!(target: LOG_TARGET, ?types, "{msg}");
    }
    vk::FALSE
}

/// Debug-utils messenger and the loader that owns its function pointers.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}
