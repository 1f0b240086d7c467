use ash::vk;

use crate::error::{SurfaceError, VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;

/// 窗口对应的 vk surface
///
/// # Destroy
/// 需要在 swapchain 之后、instance 之前手动 destroy
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
    pdevice: vk::PhysicalDevice,
}

// new & init
impl GfxSurface {
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: &GfxDevice,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> Self {
        let surface_pf = ash::khr::surface::Instance::new(vk_entry, instance);

        let handle = unsafe {
            ash_window::create_surface(vk_entry, instance, raw_display_handle, raw_window_handle, None)
                .or_fatal("create surface")
        };

        let surface = GfxSurface {
            handle,
            pf: surface_pf,
            pdevice,
        };
        device.set_debug_name(&surface, "main");
        surface
    }

    pub fn destroy(self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// surface 丢失时返回 [`SurfaceError::Lost`]
    pub fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceError> {
        unsafe { self.pf.get_physical_device_surface_capabilities(self.pdevice, self.handle) }.map_err(Self::map_err)
    }

    pub fn formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceError> {
        unsafe { self.pf.get_physical_device_surface_formats(self.pdevice, self.handle) }.map_err(Self::map_err)
    }

    pub fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>, SurfaceError> {
        unsafe { self.pf.get_physical_device_surface_present_modes(self.pdevice, self.handle) }.map_err(Self::map_err)
    }

    /// queue family 是否能向这个 surface present
    pub fn supports_queue_family(&self, queue_family_index: u32) -> bool {
        unsafe {
            self.pf
                .get_physical_device_surface_support(self.pdevice, queue_family_index, self.handle)
                .or_fatal("query surface support")
        }
    }

    fn map_err(e: vk::Result) -> SurfaceError {
        SurfaceError::from_vk(e).unwrap_or_else(|| gfx_fatal!("surface query failed: {:?}", e))
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
