use std::ptr::NonNull;

use ash::vk;

use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;
use crate::memory::staging::StagingCapacity;
use crate::memory::{AllocationRequest, AllocationUsage, MemoryKind, Suballocation};
use crate::resources::{GfxDeviceAllocator, RetiredResource, sharing_mode};

/// buffer 以及它在 MemoryBlock 中的子分配
///
/// # Destroy
/// 不实现 Clone，也不在 Drop 中释放；需要通过 `Gfx::destroy_buffer` 交给延迟销毁队列
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: Suballocation,

    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    kind: MemoryKind,

    /// host visible 的 block 在创建时持久映射，这里记录 buffer 起始位置
    mapped: Option<NonNull<u8>>,

    debug_name: String,
}

// init & destroy
impl GfxBuffer {
    pub fn new(
        device: &GfxDevice,
        allocator: &mut GfxDeviceAllocator,
        queue_family_indices: &[u32],
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        kind: MemoryKind,
        name: impl AsRef<str>,
    ) -> Self {
        if size == 0 {
            gfx_fatal!("zero-size buffer: {}", name.as_ref());
        }

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode(queue_family_indices))
            .queue_family_indices(queue_family_indices);
        let handle = unsafe { device.create_buffer(&buffer_ci, None).or_fatal("create buffer") };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = allocator.allocate(&AllocationRequest::from_requirements(
            &requirements,
            AllocationUsage::Buffer(usage),
            kind,
        ));

        let block = allocator.block(allocation.block_index()).memory();
        unsafe {
            device
                .bind_buffer_memory(handle, block.device_memory(), block.memory_offset(allocation.offset()))
                .or_fatal("bind buffer memory");
        }
        let mapped = if kind.is_host_visible() { block.mapped_ptr(allocation.offset()) } else { None };

        device.set_object_debug_name(handle, format!("Buffer::{}", name.as_ref()));
        Self {
            handle,
            allocation,
            size,
            usage,
            kind,
            mapped,
            debug_name: name.as_ref().to_string(),
        }
    }

    /// 交给延迟销毁队列
    #[inline]
    pub(crate) fn into_retired(self) -> RetiredResource {
        RetiredResource::Buffer {
            handle: self.handle,
            allocation: self.allocation,
        }
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn memory_kind(&self) -> MemoryKind {
        self.kind
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

// tools
impl GfxBuffer {
    /// 通过持久映射写入数据，memory 是 HOST_COHERENT 的，不需要 flush
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, data: &[u8]) {
        let Some(mapped) = self.mapped else {
            gfx_fatal!("buffer `{}` is not host visible", self.debug_name);
        };
        if offset + data.len() as vk::DeviceSize > self.size {
            gfx_fatal!(
                "write of {} bytes at {} overflows buffer `{}` ({} bytes)",
                data.len(),
                offset,
                self.debug_name,
                self.size
            );
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len());
        }
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) {
        self.write_bytes(offset, bytemuck::cast_slice(data));
    }
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// CPU 可见的上传 buffer，由 [`crate::memory::staging::StagingPool`] 复用
///
/// 借出后跟随提交进入 queue 的 in-flight 列表，timeline 越过提交值后才回到池中
pub struct GfxStagingBuffer {
    buffer: GfxBuffer,
}

impl GfxStagingBuffer {
    pub fn new(
        device: &GfxDevice,
        allocator: &mut GfxDeviceAllocator,
        size: vk::DeviceSize,
        name: impl AsRef<str>,
    ) -> Self {
        // 只被 transfer 命令读取，不需要 CONCURRENT
        let buffer = GfxBuffer::new(
            device,
            allocator,
            &[],
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryKind::Upload,
            name,
        );
        Self { buffer }
    }

    #[inline]
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.write_bytes(0, data);
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.vk_buffer()
    }

    #[inline]
    pub(crate) fn into_retired(self) -> RetiredResource {
        self.buffer.into_retired()
    }
}

impl StagingCapacity for GfxStagingBuffer {
    #[inline]
    fn capacity(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}
