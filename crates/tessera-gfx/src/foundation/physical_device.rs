use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// 选出来的 queue family
///
/// compute 和 transfer 优先使用专用的 family，没有时回退到 graphics family
#[derive(Clone, Debug)]
pub struct GfxQueueFamilies {
    pub graphics: GfxQueueFamily,
    pub compute: GfxQueueFamily,
    pub transfer: GfxQueueFamily,
}
impl GfxQueueFamilies {
    pub fn select(queue_family_props: &[vk::QueueFamilyProperties]) -> Option<Self> {
        // 找到符合条件的 queue family
        let find_queue_family = |name: &str, include_flags: vk::QueueFlags, exclude_flags: vk::QueueFlags| {
            queue_family_props
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_flags.contains(include_flags) && (props.queue_flags & exclude_flags).is_empty()
                })
                .map(|(family_idx, props)| GfxQueueFamily {
                    name: name.to_string(),
                    queue_family_index: family_idx as u32,
                    queue_flags: props.queue_flags,
                    queue_count: props.queue_count,
                })
        };

        // 全能的 Queue：graphics, compute, transfer
        let graphics = find_queue_family(
            "gfx",
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::empty(),
        )?;

        let compute = find_queue_family("compute-only", vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
            .unwrap_or_else(|| graphics.clone());

        let transfer = find_queue_family(
            "transfer-only",
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or_else(|| graphics.clone());

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    /// 去重后的 family index，用于创建 device queue 以及 CONCURRENT 资源
    pub fn unique_indices(&self) -> Vec<u32> {
        [
            self.graphics.queue_family_index,
            self.compute.queue_family_index,
            self.transfer.queue_family_index,
        ]
        .into_iter()
        .unique()
        .collect_vec()
    }
}

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,

    pub(crate) queue_families: GfxQueueFamilies,
}

impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> Self {
        let pdevices = unsafe { instance.enumerate_physical_devices().or_fatal("enumerate physical devices") };
        pdevices
            .iter()
            .filter_map(|pdevice| GfxPhysicalDevice::new(*pdevice, instance))
            // 优先使用独立显卡
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .unwrap_or_else(|| gfx_fatal!("no physical device with a graphics queue found"))
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", physical_device_name);

            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            log::info!("physical device: queue family props:\n{:#?}", queue_family_props);

            let queue_families = GfxQueueFamilies::select(&queue_family_props)?;

            Some(Self {
                vk_handle: pdevice,
                basic_props,
                mem_props: instance.get_physical_device_memory_properties(pdevice),
                queue_families,
            })
        }
    }

    pub fn destroy(self) {
        // 无需销毁
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn queue_families(&self) -> &GfxQueueFamilies {
        &self.queue_families
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    #[inline]
    pub fn mem_props(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedicated_families_preferred() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let families = GfxQueueFamilies::select(&props).unwrap();
        assert_eq!(families.graphics.queue_family_index, 0);
        assert_eq!(families.compute.queue_family_index, 1);
        assert_eq!(families.transfer.queue_family_index, 2);
        assert_eq!(families.unique_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn test_fallback_to_graphics_family() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let families = GfxQueueFamilies::select(&props).unwrap();
        assert_eq!(families.compute, families.graphics);
        assert_eq!(families.transfer, families.graphics);
        assert_eq!(families.unique_indices(), vec![0]);
    }

    #[test]
    fn test_no_graphics_family() {
        let props = [family(vk::QueueFlags::TRANSFER)];
        assert!(GfxQueueFamilies::select(&props).is_none());
    }
}
