use std::rc::Rc;

use ash::vk;

use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;

/// binary 或 timeline semaphore
///
/// # Destroy
/// 不实现 Drop，需要手动 destroy
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
    device: Rc<GfxDevice>,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(device: Rc<GfxDevice>, debug_name: &str) -> Self {
        let semaphore = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None).or_fatal("create binary semaphore")
        };

        let semaphore = Self { semaphore, device };
        semaphore.device.set_debug_name(&semaphore, debug_name);
        semaphore
    }

    pub fn new_timeline(device: Rc<GfxDevice>, initial_value: u64, debug_name: &str) -> Self {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore =
            unsafe { device.create_semaphore(&timeline_semaphore_ci, None).or_fatal("create timeline semaphore") };

        let semaphore = Self { semaphore, device };
        semaphore.device.set_debug_name(&semaphore, debug_name);
        semaphore
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

// tools
impl GfxSemaphore {
    /// 等待 timeline 到达 `timeline_value`，超时返回 false
    #[inline]
    pub fn wait_timeline(&self, timeline_value: u64, timeout_ns: u64) -> bool {
        let wait_semaphore = [self.semaphore];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&wait_semaphore)
            .values(std::slice::from_ref(&timeline_value));
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => gfx_fatal!("wait timeline semaphore failed: {:?}", e),
        }
    }

    /// GPU 已经完成的 timeline 值
    #[inline]
    pub fn counter_value(&self) -> u64 {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore).or_fatal("get semaphore counter value") }
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}
