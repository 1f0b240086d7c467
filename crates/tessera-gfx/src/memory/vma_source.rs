use std::ptr::NonNull;

use ash::vk;
use vk_mem::Alloc;

use crate::error::VkResultExt;
use crate::memory::{BlockKey, MemorySource};

/// 通过 vk-mem 申请的一整块内存
pub struct VmaBlock {
    allocation: vk_mem::Allocation,
    device_memory: vk::DeviceMemory,
    /// VMA 返回的 allocation 在 device memory 中的起始位置
    base_offset: vk::DeviceSize,
    /// 只有 host visible 的 block 才有值，在创建时就持久映射
    mapped: Option<NonNull<u8>>,
}
impl VmaBlock {
    #[inline]
    pub fn device_memory(&self) -> vk::DeviceMemory {
        self.device_memory
    }

    /// 子分配的 offset 转换为 device memory 中的 offset
    #[inline]
    pub fn memory_offset(&self, offset: vk::DeviceSize) -> vk::DeviceSize {
        self.base_offset + offset
    }

    #[inline]
    pub fn mapped_ptr(&self, offset: vk::DeviceSize) -> Option<NonNull<u8>> {
        // offset 一定位于 block 内部
        self.mapped.map(|ptr| unsafe { ptr.add(offset as usize) })
    }
}

/// 由 vk-mem 提供整块的 device memory，子分配由 [`crate::memory::allocator::GfxAllocator`] 负责
///
/// 每个 block 都是 dedicated allocation，VMA 只负责选择 memory type
pub struct VmaMemorySource {
    vma: vk_mem::Allocator,
}

impl VmaMemorySource {
    /// vma 需要引用 Instance 以及 Device，需要在它们创建之后再创建，并且先于它们销毁
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> Self {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci).or_fatal("create vma allocator") };
        Self { vma }
    }

    pub fn destroy(self) {
        // 通过 drop 触发销毁
        log::info!("destroying vma");
    }
}

impl MemorySource for VmaMemorySource {
    type Block = VmaBlock;

    fn create_block(&mut self, key: &BlockKey, size: vk::DeviceSize) -> VmaBlock {
        let requirements = vk::MemoryRequirements {
            size,
            alignment: 1,
            memory_type_bits: key.memory_type_bits,
        };

        let mut flags = vk_mem::AllocationCreateFlags::DEDICATED_MEMORY;
        if key.kind.is_host_visible() {
            flags |= vk_mem::AllocationCreateFlags::MAPPED;
        }
        // allocate_memory 不支持 AUTO 系列的 usage，只能通过 required_flags 指定
        let create_info = vk_mem::AllocationCreateInfo {
            flags,
            usage: vk_mem::MemoryUsage::Unknown,
            required_flags: key.kind.required_flags(),
            ..Default::default()
        };

        let allocation =
            unsafe { self.vma.allocate_memory(&requirements, &create_info).or_fatal("allocate memory block") };
        let info = self.vma.get_allocation_info(&allocation);

        VmaBlock {
            allocation,
            device_memory: info.device_memory,
            base_offset: info.offset,
            mapped: NonNull::new(info.mapped_data as *mut u8),
        }
    }

    fn destroy_block(&mut self, mut block: VmaBlock) {
        unsafe {
            self.vma.free_memory(&mut block.allocation);
        }
    }
}
