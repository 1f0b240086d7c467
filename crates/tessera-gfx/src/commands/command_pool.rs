use std::rc::Rc;

use ash::vk;

use crate::error::VkResultExt;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::GfxQueueFamily;

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue_family: GfxQueueFamily,

    device: Rc<GfxDevice>,
    debug_name: String,
    valid: bool,
}

// init & destroy
impl GfxCommandPool {
    pub fn new(
        device: Rc<GfxDevice>,
        queue_family: GfxQueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> Self {
        let pool = unsafe {
            device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .queue_family_index(queue_family.queue_family_index)
                        .flags(flags),
                    None,
                )
                .or_fatal("create command pool")
        };

        let command_pool = Self {
            handle: pool,
            queue_family,
            device: device.clone(),
            debug_name: debug_name.to_string(),
            valid: true,
        };
        device.set_debug_name(&command_pool, debug_name);
        command_pool
    }

    /// pool 中分配的 command buffer 随之一起释放
    pub fn destroy(mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "CommandPool must be destroyed manually.");
        log::info!("Dropping CommandPool: {}", self.debug_name);
    }
}
