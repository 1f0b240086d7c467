//! 对外的资源句柄：buffer、image、descriptor set layout
//!
//! 句柄都是 move-only 的，通过 [`crate::gfx::Gfx`] 显式销毁。销毁时 Vulkan 对象以及
//! 对应的 [`Suballocation`] 进入延迟销毁队列，在最后一个可能引用它的帧结束后才真正释放。

pub mod buffer;
pub mod descriptor_set_layout;
pub mod image;

use ash::vk;

use crate::foundation::device::GfxDevice;
use crate::memory::Suballocation;
use crate::memory::allocator::GfxAllocator;
use crate::memory::vma_source::VmaMemorySource;

/// 生产环境使用的分配器
pub type GfxDeviceAllocator = GfxAllocator<VmaMemorySource>;

/// 多个 queue family 时使用 CONCURRENT，避免 queue family ownership transfer
#[inline]
pub(crate) fn sharing_mode(queue_family_indices: &[u32]) -> vk::SharingMode {
    if queue_family_indices.len() > 1 { vk::SharingMode::CONCURRENT } else { vk::SharingMode::EXCLUSIVE }
}

/// 等待 GPU 完成后才能释放的资源
pub enum RetiredResource {
    Buffer {
        handle: vk::Buffer,
        allocation: Suballocation,
    },
    Image {
        handle: vk::Image,
        view: vk::ImageView,
        allocation: Suballocation,
    },
}

impl RetiredResource {
    /// 销毁 Vulkan 对象，并将内存归还给所属的 MemoryBlock
    pub fn destroy(self, device: &GfxDevice, allocator: &mut GfxDeviceAllocator) {
        match self {
            RetiredResource::Buffer { handle, allocation } => {
                unsafe { device.destroy_buffer(handle, None) };
                allocator.free(allocation);
            }
            RetiredResource::Image {
                handle,
                view,
                allocation,
            } => {
                unsafe {
                    device.destroy_image_view(view, None);
                    device.destroy_image(handle, None);
                }
                allocator.free(allocation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing_mode_by_family_count() {
        assert_eq!(sharing_mode(&[0]), vk::SharingMode::EXCLUSIVE);
        assert_eq!(sharing_mode(&[0, 2]), vk::SharingMode::CONCURRENT);
    }
}
