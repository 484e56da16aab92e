// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr};

use anyhow::{bail, Context, Result};
use ash::khr::{dynamic_rendering, surface, swapchain, synchronization2};
use ash::{vk, Device, Instance};
use tracing::{debug, info};

use crate::instance::c_name;

pub const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

const DISCRETE_BONUS: u32 = 1000;

/// Higher is better: discrete GPUs first, then the largest 2D image size.
pub fn rate_device(props: &vk::PhysicalDeviceProperties) -> u32 {
    let bonus = if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_BONUS
    } else {
        0
    };
    bonus.saturating_add(props.limits.max_image_dimension2_d)
}

/// Highest score wins; the first of equal scores is kept.
pub fn select_best<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<T> {
    let mut best: Option<(T, u32)> = None;
    for (item, score) in candidates {
        let better = best.as_ref().map_or(true, |(_, top)| score > *top);
        if better {
            best = Some((item, score));
        }
    }
    best.map(|(item, _)| item)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Prefers one family that can both draw and present; otherwise the first
    /// graphics family and the first presenting family.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            let draws = family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let presents = supports_present(i);

            if draws && presents {
                return Some(Self {
                    graphics: i,
                    present: i,
                });
            }
            if draws && graphics.is_none() {
                graphics = Some(i);
            }
            if presents && present.is_none() {
                present = Some(i);
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Where dynamic rendering and synchronization2 come from on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPath {
    Core13,
    KhrExt,
}

impl RenderPath {
    pub fn detect(api_version: u32, has_sync2_khr: bool, has_dynren_khr: bool) -> Option<Self> {
        let maj = vk::api_version_major(api_version);
        let min = vk::api_version_minor(api_version);
        if maj > 1 || (maj == 1 && min >= 3) {
            Some(RenderPath::Core13)
        } else if has_sync2_khr && has_dynren_khr {
            Some(RenderPath::KhrExt)
        } else {
            None
        }
    }
}

pub fn device_extensions(path: RenderPath, portability_subset: bool) -> Vec<&'static CStr> {
    let mut exts = vec![swapchain::NAME];
    if path == RenderPath::KhrExt {
        exts.push(synchronization2::NAME);
        exts.push(dynamic_rendering::NAME);
    }
    if portability_subset {
        exts.push(PORTABILITY_SUBSET);
    }
    exts
}

unsafe fn device_extension_names(instance: &Instance, phys: vk::PhysicalDevice) -> Result<Vec<String>> {
    let props = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    Ok(props
        .iter()
        .map(|e| c_name(&e.extension_name).to_string_lossy().into_owned())
        .collect())
}

fn has_ext(available: &[String], name: &CStr) -> bool {
    let name = name.to_string_lossy();
    available.iter().any(|a| *a == name)
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceChoice {
    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub path: RenderPath,
}

/// `None` when the device cannot draw to `surface` at all.
unsafe fn check_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    props: &vk::PhysicalDeviceProperties,
) -> Result<Option<DeviceChoice>> {
    let families = instance.get_physical_device_queue_family_properties(phys);
    let Some(families) = QueueFamilies::find(&families, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    }) else {
        return Ok(None);
    };

    let exts = device_extension_names(instance, phys)?;
    if !has_ext(&exts, swapchain::NAME) {
        return Ok(None);
    }
    let Some(path) = RenderPath::detect(
        props.api_version,
        has_ext(&exts, synchronization2::NAME),
        has_ext(&exts, dynamic_rendering::NAME),
    ) else {
        return Ok(None);
    };

    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();
    if formats.is_empty() || modes.is_empty() {
        return Ok(None);
    }

    Ok(Some(DeviceChoice {
        phys,
        families,
        path,
    }))
}

pub unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<DeviceChoice> {
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    if devices.is_empty() {
        bail!("no Vulkan-capable GPU found");
    }

    let mut candidates = Vec::with_capacity(devices.len());
    for phys in devices {
        let props = instance.get_physical_device_properties(phys);
        let name = c_name(&props.device_name).to_string_lossy().into_owned();

        match check_device(instance, surface_loader, surface, phys, &props)? {
            Some(choice) => {
                let score = rate_device(&props);
                debug!("GPU candidate {name}: score {score}, {:?}", choice.path);
                candidates.push(((choice, name), score));
            }
            None => debug!("GPU {name} cannot present to this surface, skipped"),
        }
    }

    let Some((choice, name)) = select_best(candidates) else {
        bail!("no suitable GPU: none supports graphics, presentation and a swapchain for this surface");
    };
    info!(
        "using GPU {name} (graphics family {}, present family {})",
        choice.families.graphics, choice.families.present
    );
    Ok(choice)
}

pub unsafe fn create_logical_device(instance: &Instance, choice: &DeviceChoice) -> Result<Device> {
    // STRICT ORDER (feature pNext chain):
    // Core 1.3 path: feats13 -> chained after feats12 -> chained after feats2
    // KHR path:      feats_sync2_khr -> feats_dr_khr -> feats12 -> feats2
    // Never mix core 1.3 structs with their KHR equivalents in one chain.

    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = choice
        .families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let available = device_extension_names(instance, choice.phys)?;
    let exts = device_extensions(choice.path, has_ext(&available, PORTABILITY_SUBSET));
    let ext_ptrs: Vec<*const c_char> = exts.iter().map(|e| e.as_ptr()).collect();

    // Feature structs must outlive create_device.
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        ..Default::default()
    };
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        ..Default::default()
    };
    let mut feats_sync2_khr = vk::PhysicalDeviceSynchronization2FeaturesKHR {
        s_type: vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES_KHR,
        ..Default::default()
    };
    let mut feats_dr_khr = vk::PhysicalDeviceDynamicRenderingFeaturesKHR {
        s_type: vk::StructureType::PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES_KHR,
        ..Default::default()
    };
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        ..Default::default()
    };

    match choice.path {
        RenderPath::Core13 => {
            feats13.synchronization2 = vk::TRUE;
            feats13.dynamic_rendering = vk::TRUE;

            feats12.p_next = (&mut feats13) as *mut _ as *mut c_void;
        }
        RenderPath::KhrExt => {
            feats_sync2_khr.synchronization2 = vk::TRUE;
            feats_dr_khr.dynamic_rendering = vk::TRUE;

            feats_sync2_khr.p_next = (&mut feats_dr_khr) as *mut _ as *mut c_void;
            feats12.p_next = (&mut feats_sync2_khr) as *mut _ as *mut c_void;
        }
    }
    feats2.p_next = (&mut feats12) as *mut _ as *mut c_void;

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&feats2) as *const _ as *const c_void,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(choice.phys, &dinfo, None)
        .context("create_device")?;
    info!(
        "logical device ready ({:?}, {} queue families)",
        choice.path,
        queue_infos.len()
    );
    Ok(device)
}

/// Dynamic-rendering and sync2 commands from core 1.3 or the KHR extensions.
pub enum RenderingFns {
    Core(Device),
    Khr {
        dynamic_rendering: dynamic_rendering::Device,
        sync2: synchronization2::Device,
    },
}

impl RenderingFns {
    pub fn new(instance: &Instance, device: &Device, path: RenderPath) -> Self {
        match path {
            RenderPath::Core13 => RenderingFns::Core(device.clone()),
            RenderPath::KhrExt => RenderingFns::Khr {
                dynamic_rendering: dynamic_rendering::Device::new(instance, device),
                sync2: synchronization2::Device::new(instance, device),
            },
        }
    }

    pub unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        match self {
            RenderingFns::Core(d) => d.cmd_begin_rendering(cmd, info),
            RenderingFns::Khr {
                dynamic_rendering, ..
            } => dynamic_rendering.cmd_begin_rendering(cmd, info),
        }
    }

    pub unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        match self {
            RenderingFns::Core(d) => d.cmd_end_rendering(cmd),
            RenderingFns::Khr {
                dynamic_rendering, ..
            } => dynamic_rendering.cmd_end_rendering(cmd),
        }
    }

    pub unsafe fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dep: &vk::DependencyInfo<'_>) {
        match self {
            RenderingFns::Core(d) => d.cmd_pipeline_barrier2(cmd, dep),
            RenderingFns::Khr { sync2, .. } => sync2.cmd_pipeline_barrier2(cmd, dep),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(kind: vk::PhysicalDeviceType, max_2d: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type: kind,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: max_2d,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_gets_the_bonus() {
        assert_eq!(
            rate_device(&props(vk::PhysicalDeviceType::DISCRETE_GPU, 16384)),
            17384
        );
        assert_eq!(
            rate_device(&props(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384)),
            16384
        );
    }

    #[test]
    fn discrete_beats_larger_integrated() {
        let discrete = rate_device(&props(vk::PhysicalDeviceType::DISCRETE_GPU, 8192));
        let integrated = rate_device(&props(vk::PhysicalDeviceType::INTEGRATED_GPU, 9000));
        assert_eq!(select_best([("igpu", integrated), ("dgpu", discrete)]), Some("dgpu"));
    }

    #[test]
    fn select_best_keeps_first_on_tie_and_handles_empty() {
        assert_eq!(select_best([("a", 5), ("b", 5), ("c", 1)]), Some("a"));
        assert_eq!(select_best(Vec::<(&str, u32)>::new()), None);
    }

    #[test]
    fn shared_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // family 0 draws but cannot present; 1 and 2 present
        let found = QueueFamilies::find(&families, |i| i != 0).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 2, present: 2 });
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let found = QueueFamilies::find(&families, |i| i == 1).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 0, present: 1 });
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn no_graphics_or_no_present_is_none() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert_eq!(QueueFamilies::find(&compute_only, |_| true), None);

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(QueueFamilies::find(&graphics, |_| false), None);
    }

    #[test]
    fn empty_family_is_ignored_for_graphics() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                ..Default::default()
            },
            family(vk::QueueFlags::GRAPHICS),
        ];
        let found = QueueFamilies::find(&families, |_| true).unwrap();
        assert_eq!(found.graphics, 1);
    }

    #[test]
    fn render_path_prefers_core() {
        let v13 = vk::make_api_version(0, 1, 3, 0);
        let v12 = vk::make_api_version(0, 1, 2, 0);
        assert_eq!(RenderPath::detect(v13, false, false), Some(RenderPath::Core13));
        assert_eq!(RenderPath::detect(v12, true, true), Some(RenderPath::KhrExt));
        assert_eq!(RenderPath::detect(v12, true, false), None);
    }

    #[test]
    fn khr_path_enables_both_extensions() {
        assert_eq!(device_extensions(RenderPath::Core13, false), vec![swapchain::NAME]);
        assert_eq!(
            device_extensions(RenderPath::KhrExt, true),
            vec![
                swapchain::NAME,
                synchronization2::NAME,
                dynamic_rendering::NAME,
                PORTABILITY_SUBSET
            ]
        );
    }
}
