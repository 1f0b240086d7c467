use ash::vk;

use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;
use crate::memory::{AllocationRequest, AllocationUsage, MemoryKind, Suballocation};
use crate::resources::{GfxDeviceAllocator, RetiredResource, sharing_mode};

/// 格式相关的工具函数
pub struct GfxFormat;
impl GfxFormat {
    /// 每个像素的字节数，用于计算上传数据的大小
    ///
    /// 不支持的格式（压缩格式等）返回 None
    pub fn pixel_size_in_bytes(format: vk::Format) -> Option<usize> {
        match format {
            vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
            vk::Format::R8G8_UNORM => Some(2),
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::D32_SFLOAT => Some(4),
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => Some(8),
            vk::Format::R32G32B32A32_SFLOAT => Some(16),
            _ => None,
        }
    }

    pub fn aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// 2D image 的创建参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}
impl GfxImageDesc {
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
        }
    }

    /// 上传 mip 0 所需的字节数
    pub fn base_level_size(&self) -> Option<vk::DeviceSize> {
        GfxFormat::pixel_size_in_bytes(self.format)
            .map(|pixel| pixel as vk::DeviceSize * self.extent.width as vk::DeviceSize * self.extent.height as vk::DeviceSize)
    }

    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(GfxFormat::aspect(self.format))
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(1)
    }
}

/// device local 的 2D image，附带一个覆盖全部 mip 的默认 view
///
/// # Destroy
/// 通过 `Gfx::destroy_image` 交给延迟销毁队列
pub struct GfxImage {
    handle: vk::Image,
    view: vk::ImageView,
    allocation: Suballocation,

    desc: GfxImageDesc,
    debug_name: String,
}

// init & destroy
impl GfxImage {
    pub fn new(
        device: &GfxDevice,
        allocator: &mut GfxDeviceAllocator,
        queue_family_indices: &[u32],
        desc: GfxImageDesc,
        name: impl AsRef<str>,
    ) -> Self {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.mip_levels == 0 {
            gfx_fatal!("zero-size image `{}`: {:?}", name.as_ref(), desc);
        }

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent.into())
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(sharing_mode(queue_family_indices))
            .queue_family_indices(queue_family_indices)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let handle = unsafe { device.create_image(&image_ci, None).or_fatal("create image") };

        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let allocation = allocator.allocate(&AllocationRequest::from_requirements(
            &requirements,
            AllocationUsage::Image(desc.usage),
            MemoryKind::DeviceLocal,
        ));
        let block = allocator.block(allocation.block_index()).memory();
        unsafe {
            device
                .bind_image_memory(handle, block.device_memory(), block.memory_offset(allocation.offset()))
                .or_fatal("bind image memory");
        }

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(desc.full_range());
        let view = unsafe { device.create_image_view(&view_ci, None).or_fatal("create image view") };

        device.set_object_debug_name(handle, format!("Image::{}", name.as_ref()));
        device.set_object_debug_name(view, format!("ImageView::{}", name.as_ref()));
        Self {
            handle,
            view,
            allocation,
            desc,
            debug_name: name.as_ref().to_string(),
        }
    }

    #[inline]
    pub(crate) fn into_retired(self) -> RetiredResource {
        RetiredResource::Image {
            handle: self.handle,
            view: self.view,
            allocation: self.allocation,
        }
    }
}

// getters
impl GfxImage {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn default_view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn desc(&self) -> &GfxImageDesc {
        &self.desc
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn allocation(&self) -> &Suballocation {
        &self.allocation
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.debug_name
    }
}

impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
