use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::config::SwapchainConfig;
use crate::error::{GfxError, SurfaceError, VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;
use crate::swapchain::surface::GfxSurface;

pub struct GfxSwapchainImageInfo {
    pub image_extent: vk::Extent2D,
    pub image_cnt: usize,
    pub image_format: vk::Format,
}

/// 窗口的 swapchain 以及每个 image 的 view
///
/// # Destroy
/// 需要手动 destroy；重建时先 destroy 旧的再创建新的
pub struct GfxSwapchain {
    handle: vk::SwapchainKHR,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    current_image_index: u32,
    /// acquire 时得到 suboptimal，本帧仍然可以渲染，present 之后报告需要重建
    suboptimal: bool,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,

    device: Rc<GfxDevice>,
}

// new & init
impl GfxSwapchain {
    pub fn new(
        device: Rc<GfxDevice>,
        surface: &GfxSurface,
        config: &SwapchainConfig,
        window_physical_extent: vk::Extent2D,
    ) -> Result<Self, GfxError> {
        let _span = tracy_client::span!("GfxSwapchain::new");

        let surface_capabilities = surface.capabilities()?;
        let surface_format = Self::choose_surface_format(&surface.formats()?)
            .ok_or_else(|| GfxError::Config("surface reports no formats".to_string()))?;
        let present_mode = Self::choose_present_mode(&surface.present_modes()?, config.vk_present_mode()?);

        // 确定 window 的 extent 尺寸
        let extent = Self::calculate_swapchain_extent(&surface_capabilities, window_physical_extent);
        if extent.width == 0 || extent.height == 0 {
            // 窗口最小化
            return Err(SurfaceError::NeedsResize.into());
        }
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            window physical extent: {}x{}
            final swapchain extent: {}x{}, format: {:?}, present mode: {:?}",
            surface_capabilities.current_extent.width,
            surface_capabilities.current_extent.height,
            surface_capabilities.min_image_extent.width,
            surface_capabilities.min_image_extent.height,
            surface_capabilities.max_image_extent.width,
            surface_capabilities.max_image_extent.height,
            window_physical_extent.width,
            window_physical_extent.height,
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(Self::image_count(&surface_capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);

        let handle = unsafe { device.swapchain().create_swapchain(&create_info, None) }.map_err(|e| {
            SurfaceError::from_vk(e).unwrap_or_else(|| gfx_fatal!("create swapchain failed: {:?}", e))
        })?;
        device.set_object_debug_name(handle, "Swapchain::main");

        let images = unsafe { device.swapchain().get_swapchain_images(handle).or_fatal("get swapchain images") };
        let image_views = images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                let view = unsafe { device.create_image_view(&view_ci, None).or_fatal("create swapchain image view") };
                device.set_object_debug_name(view, format!("ImageView::swapchain-{}", idx));
                view
            })
            .collect_vec();

        Ok(Self {
            handle,
            images,
            image_views,
            current_image_index: 0,
            suboptimal: false,
            surface_format,
            present_mode,
            extent,
            device,
        })
    }

    /// 优先使用 B8G8R8A8_SRGB + SRGB_NONLINEAR，否则使用 surface 报告的第一个格式
    pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
        formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .copied()
    }

    /// 不支持配置的 present mode 时回退到 FIFO，FIFO 一定是支持的
    pub fn choose_present_mode(available: &[vk::PresentModeKHR], requested: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if available.contains(&requested) {
            requested
        } else {
            log::warn!("present mode {:?} is not supported, fallback to FIFO", requested);
            vk::PresentModeKHR::FIFO
        }
    }

    /// max_image_count == 0，表示不限制 image 数量
    pub fn image_count(surface_capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
        if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        }
    }

    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == 0xFFFFFFFF || surface_extent.height == 0xFFFFFFFF {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }
}

// getters
impl GfxSwapchain {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn current_image_index(&self) -> u32 {
        self.current_image_index
    }

    #[inline]
    pub fn current_image(&self) -> vk::Image {
        self.images[self.current_image_index as usize]
    }

    #[inline]
    pub fn current_image_view(&self) -> vk::ImageView {
        self.image_views[self.current_image_index as usize]
    }

    #[inline]
    pub fn image_infos(&self) -> GfxSwapchainImageInfo {
        GfxSwapchainImageInfo {
            image_extent: self.extent,
            image_cnt: self.images.len(),
            image_format: self.surface_format.format,
        }
    }
}

// update
impl GfxSwapchain {
    /// 获取下一个 image，最多等待 `timeout_ns`
    ///
    /// out of date 返回 [`SurfaceError::NeedsResize`]，超时返回 [`SurfaceError::AcquireTimeout`]
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore, timeout_ns: u64) -> Result<u32, SurfaceError> {
        let result = unsafe {
            self.device.swapchain().acquire_next_image(self.handle, timeout_ns, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, is_suboptimal)) => {
                if is_suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                self.suboptimal = is_suboptimal;
                self.current_image_index = image_index;
                Ok(image_index)
            }
            Err(e) => {
                let err = SurfaceError::from_vk(e)
                    .unwrap_or_else(|| gfx_fatal!("failed to acquire next swapchain image: {:?}", e));
                log::warn!("swapchain acquire failed: {}", err);
                Err(err)
            }
        }
    }

    /// present 当前的 image；需要重建时返回 [`SurfaceError::NeedsResize`]，不在内部重试
    pub fn present_image(&mut self, queue: vk::Queue, wait_semaphores: &[vk::Semaphore]) -> Result<(), SurfaceError> {
        let image_indices = [self.current_image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.handle));

        let result = unsafe { self.device.swapchain().queue_present(queue, &present_info) };
        let acquired_suboptimal = std::mem::take(&mut self.suboptimal);
        match result {
            Ok(is_suboptimal) if is_suboptimal || acquired_suboptimal => {
                log::warn!("swapchain present image index {} is not optimal", self.current_image_index);
                Err(SurfaceError::NeedsResize)
            }
            Ok(_) => Ok(()),
            Err(e) => Err(SurfaceError::from_vk(e)
                .unwrap_or_else(|| gfx_fatal!("failed to present swapchain image: {:?}", e))),
        }
    }
}

// destroy
impl GfxSwapchain {
    pub fn destroy(self) {
        unsafe {
            for view in &self.image_views {
                self.device.destroy_image_view(*view, None);
            }
            self.device.swapchain().destroy_swapchain(self.handle, None);
        }
    }
}

impl DebugType for GfxSwapchain {
    fn debug_type_name() -> &'static str {
        "GfxSwapchain"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_follows_surface_when_fixed() {
        let fixed = caps(vk::Extent2D {
            width: 800,
            height: 600,
        });
        let extent = GfxSwapchain::calculate_swapchain_extent(
            &fixed,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamped_when_surface_is_flexible() {
        let flexible = caps(vk::Extent2D {
            width: 0xFFFFFFFF,
            height: 0xFFFFFFFF,
        });
        let extent = GfxSwapchain::calculate_swapchain_extent(
            &flexible,
            vk::Extent2D {
                width: 5000,
                height: 0,
            },
        );
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn test_image_count() {
        let mut capabilities = caps(vk::Extent2D::default());
        assert_eq!(GfxSwapchain::image_count(&capabilities), 3);
        capabilities.max_image_count = 2;
        assert_eq!(GfxSwapchain::image_count(&capabilities), 2);
    }

    #[test]
    fn test_format_and_present_mode_fallback() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = |formats: &[vk::SurfaceFormatKHR]| GfxSwapchain::choose_surface_format(formats).map(|f| f.format);
        assert_eq!(chosen(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(chosen(&[unorm]), Some(vk::Format::R8G8B8A8_UNORM));
        assert_eq!(chosen(&[]), None);

        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            GfxSwapchain::choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            GfxSwapchain::choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }
}
