//! 设备内存子分配
//!
//! - [`block::MemoryBlock`]：一整块 device memory 的簿记，free list + high-water mark
//! - [`allocator::GfxAllocator`]：按 (可见性, 用途, memory type) 分组管理 MemoryBlock
//! - [`staging::StagingPool`]：CPU 可见的 staging buffer 池
//! - [`vma_source::VmaMemorySource`]：通过 vk-mem 申请整块内存

pub mod allocator;
pub mod block;
pub mod staging;
pub mod vma_source;

use ash::vk;

/// 内存的可见性
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// 只有 GPU 可以访问
    DeviceLocal,
    /// CPU 写入，GPU 读取，用于 staging 和每帧更新的 uniform
    Upload,
    /// GPU 写入，CPU 读取
    Readback,
}
impl MemoryKind {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryKind::DeviceLocal)
    }

    #[inline]
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryKind::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryKind::Upload => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            MemoryKind::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED
            }
        }
    }
}

/// 资源的用途，决定子分配可以和谁共享同一个 MemoryBlock
///
/// buffer 和 image 不放在同一个 block 里，避免 bufferImageGranularity 的问题
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationUsage {
    Buffer(vk::BufferUsageFlags),
    Image(vk::ImageUsageFlags),
}

/// MemoryBlock 的分组依据
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub kind: MemoryKind,
    pub usage: AllocationUsage,
    /// 来自 vk::MemoryRequirements
    pub memory_type_bits: u32,
}

/// 一次分配请求，size 和 alignment 一般来自 vk::MemoryRequirements
#[derive(Clone, Copy, Debug)]
pub struct AllocationRequest {
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
    pub usage: AllocationUsage,
    pub kind: MemoryKind,
    pub memory_type_bits: u32,
}
impl AllocationRequest {
    pub fn from_requirements(
        requirements: &vk::MemoryRequirements,
        usage: AllocationUsage,
        kind: MemoryKind,
    ) -> Self {
        Self {
            size: requirements.size,
            alignment: requirements.alignment.max(1),
            usage,
            kind,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    #[inline]
    pub fn block_key(&self) -> BlockKey {
        BlockKey {
            kind: self.kind,
            usage: self.usage,
            memory_type_bits: self.memory_type_bits,
        }
    }
}

/// 从某个 MemoryBlock 中切出来的一段内存
///
/// 只记录 block 的下标，不持有 block 的引用；由拥有它的资源独占，
/// 资源销毁时通过 [`allocator::GfxAllocator::free`] 归还。
#[derive(Debug, PartialEq, Eq)]
pub struct Suballocation {
    pub(crate) block_index: usize,
    pub(crate) offset: vk::DeviceSize,
    pub(crate) size: vk::DeviceSize,
}
impl Suballocation {
    #[inline]
    pub fn block_index(&self) -> usize {
        self.block_index
    }
    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

/// 整块内存的来源
///
/// 生产环境由 [`vma_source::VmaMemorySource`] 实现，测试中可以替换为不访问 GPU 的实现
pub trait MemorySource {
    type Block;

    /// 申请一整块内存，失败属于资源耗尽，直接终止
    fn create_block(&mut self, key: &BlockKey, size: vk::DeviceSize) -> Self::Block;

    fn destroy_block(&mut self, block: Self::Block);
}

/// 分配器的统计信息
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub block_count: usize,
    pub capacity: vk::DeviceSize,
    pub live_bytes: vk::DeviceSize,
    pub free_bytes: vk::DeviceSize,
}

#[inline]
pub(crate) fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}
