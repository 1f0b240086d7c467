use std::collections::HashMap;

use ash::vk;

use crate::config::MemoryConfig;
use crate::error::gfx_fatal;
use crate::memory::block::MemoryBlock;
use crate::memory::{AllocationRequest, AllocatorStats, BlockKey, MemoryKind, MemorySource, Suballocation};

/// 设备内存的子分配器
///
/// 每个 [`BlockKey`] 对应若干 MemoryBlock。分配顺序：
/// 1. 所有匹配 block 的 free list，first-fit
/// 2. 匹配 block 未使用过的尾部
/// 3. 新建一个 `max(配置的块大小, size)` 的 block
///
/// block 通过下标访问，不会被移除，直到 [`GfxAllocator::destroy`]。
pub struct GfxAllocator<S: MemorySource> {
    source: S,
    config: MemoryConfig,

    blocks: Vec<MemoryBlock<S::Block>>,
    blocks_by_key: HashMap<BlockKey, Vec<usize>>,
}

// new & init
impl<S: MemorySource> GfxAllocator<S> {
    pub fn new(source: S, config: MemoryConfig) -> Self {
        Self {
            source,
            config,
            blocks: vec![],
            blocks_by_key: HashMap::new(),
        }
    }
}

// alloc & free
impl<S: MemorySource> GfxAllocator<S> {
    pub fn allocate(&mut self, request: &AllocationRequest) -> Suballocation {
        if request.size == 0 {
            gfx_fatal!("zero-size allocation requested ({:?})", request.usage);
        }
        if request.size > self.config.max_block_size {
            gfx_fatal!(
                "allocation of {} bytes exceeds memory.max_block_size ({})",
                request.size,
                self.config.max_block_size
            );
        }

        let key = request.block_key();
        let candidates = self.blocks_by_key.get(&key).cloned().unwrap_or_default();

        let from_free_list = candidates.iter().find_map(|&block_index| {
            self.blocks[block_index].alloc_from_free_list(request.size, request.alignment).map(|o| (block_index, o))
        });
        let found = from_free_list.or_else(|| {
            candidates.iter().find_map(|&block_index| {
                self.blocks[block_index].alloc_from_tail(request.size, request.alignment).map(|o| (block_index, o))
            })
        });

        let (block_index, offset) = match found {
            Some(found) => found,
            None => {
                let block_index = self.create_block(key, request.size);
                // 新 block 的 offset 0 满足任意对齐
                let offset = self.blocks[block_index]
                    .alloc_from_tail(request.size, request.alignment)
                    .unwrap_or_else(|| gfx_fatal!("new memory block cannot hold {} bytes", request.size));
                (block_index, offset)
            }
        };

        Suballocation {
            block_index,
            offset,
            size: request.size,
        }
    }

    pub fn free(&mut self, suballocation: Suballocation) {
        let Some(block) = self.blocks.get_mut(suballocation.block_index) else {
            gfx_fatal!("suballocation refers to unknown block {}", suballocation.block_index);
        };
        block.free(suballocation.offset, suballocation.size);
    }

    fn create_block(&mut self, key: BlockKey, min_size: vk::DeviceSize) -> usize {
        let chunk = match key.kind {
            MemoryKind::Upload => self.config.staging_block_size,
            _ => self.config.block_size,
        };
        let capacity = chunk.max(min_size);
        let memory = self.source.create_block(&key, capacity);

        let block_index = self.blocks.len();
        self.blocks.push(MemoryBlock::new(key, memory, capacity));
        self.blocks_by_key.entry(key).or_default().push(block_index);

        log::info!(
            "new memory block #{}: {} bytes, {:?}, {:?}, type bits {:#x}",
            block_index,
            capacity,
            key.kind,
            key.usage,
            key.memory_type_bits
        );
        block_index
    }
}

// getters
impl<S: MemorySource> GfxAllocator<S> {
    #[inline]
    pub fn block(&self, block_index: usize) -> &MemoryBlock<S::Block> {
        &self.blocks[block_index]
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn stats(&self) -> AllocatorStats {
        self.blocks.iter().fold(AllocatorStats::default(), |mut stats, block| {
            stats.block_count += 1;
            stats.capacity += block.capacity();
            stats.live_bytes += block.live_bytes();
            stats.free_bytes += block.free_bytes();
            stats
        })
    }
}

// destroy
impl<S: MemorySource> GfxAllocator<S> {
    pub fn destroy(mut self) -> S {
        let stats = self.stats();
        if stats.live_bytes > 0 {
            log::warn!("destroying allocator with {} live bytes", stats.live_bytes);
        }
        log::info!("destroying allocator: {:?}", stats);

        for block in std::mem::take(&mut self.blocks) {
            self.source.destroy_block(block.into_memory());
        }
        self.source
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::memory::AllocationUsage;

    /// 不访问 GPU 的内存来源，记录申请过的 block
    #[derive(Default)]
    pub(crate) struct CountingSource {
        pub created: Vec<(BlockKey, vk::DeviceSize)>,
        pub destroyed: usize,
    }
    impl MemorySource for CountingSource {
        type Block = usize;

        fn create_block(&mut self, key: &BlockKey, size: vk::DeviceSize) -> usize {
            self.created.push((*key, size));
            self.created.len() - 1
        }

        fn destroy_block(&mut self, _block: usize) {
            self.destroyed += 1;
        }
    }

    fn small_config() -> MemoryConfig {
        MemoryConfig {
            block_size: 1 << 16,
            max_block_size: 1 << 20,
            staging_block_size: 1 << 12,
            ..MemoryConfig::default()
        }
    }

    fn vertex_request(size: u64) -> AllocationRequest {
        AllocationRequest {
            size,
            alignment: 16,
            usage: AllocationUsage::Buffer(vk::BufferUsageFlags::VERTEX_BUFFER),
            kind: MemoryKind::DeviceLocal,
            memory_type_bits: 0b11,
        }
    }

    #[test]
    fn test_free_then_alloc_reuses_offset() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());

        let a = allocator.allocate(&vertex_request(1024));
        let (block, offset) = (a.block_index(), a.offset());
        allocator.free(a);

        let b = allocator.allocate(&vertex_request(1024));
        assert_eq!(b.block_index(), block);
        assert_eq!(b.offset(), offset);
        assert_eq!(allocator.block_count(), 1);
        allocator.free(b);
    }

    #[test]
    fn test_size_and_alignment_guaranteed() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        let mut subs = vec![];
        for (i, align) in [1u64, 4, 256, 64, 1024, 8].iter().enumerate() {
            let mut request = vertex_request(100 + i as u64 * 37);
            request.alignment = *align;
            let sub = allocator.allocate(&request);
            assert!(sub.size() >= request.size);
            assert_eq!(sub.offset() % align, 0);
            subs.push(sub);
        }
        let stats = allocator.stats();
        assert_eq!(stats.free_bytes + stats.live_bytes, stats.capacity);
        for sub in subs {
            allocator.free(sub);
        }
        assert_eq!(allocator.stats().live_bytes, 0);
    }

    #[test]
    fn test_blocks_are_separated_by_usage_and_kind() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        let vb = allocator.allocate(&vertex_request(64));

        let mut ib_request = vertex_request(64);
        ib_request.usage = AllocationUsage::Buffer(vk::BufferUsageFlags::INDEX_BUFFER);
        let ib = allocator.allocate(&ib_request);

        let mut upload_request = vertex_request(64);
        upload_request.kind = MemoryKind::Upload;
        let upload = allocator.allocate(&upload_request);

        assert_ne!(vb.block_index(), ib.block_index());
        assert_ne!(vb.block_index(), upload.block_index());
        assert_eq!(allocator.block_count(), 3);
        // upload 使用 staging 的块大小
        assert_eq!(allocator.block(upload.block_index()).capacity(), 1 << 12);

        allocator.free(vb);
        allocator.free(ib);
        allocator.free(upload);
    }

    #[test]
    fn test_new_block_when_full_and_oversized_block() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        let a = allocator.allocate(&vertex_request(1 << 16));
        let b = allocator.allocate(&vertex_request(16));
        assert_ne!(a.block_index(), b.block_index());

        // 比默认块更大的请求，block 大小等于请求大小
        let c = allocator.allocate(&vertex_request(200_000));
        assert_eq!(allocator.block(c.block_index()).capacity(), 200_000);
        assert_eq!(allocator.block_count(), 3);

        for sub in [a, b, c] {
            allocator.free(sub);
        }
        let source = allocator.destroy();
        assert_eq!(source.created.len(), 3);
        assert_eq!(source.destroyed, 3);
    }

    #[test]
    fn test_free_list_preferred_over_tail_of_other_block() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        let a = allocator.allocate(&vertex_request(512));
        let keep = allocator.allocate(&vertex_request(512));
        let a_offset = a.offset();
        allocator.free(a);

        let b = allocator.allocate(&vertex_request(256));
        assert_eq!(b.offset(), a_offset);
        allocator.free(b);
        allocator.free(keep);
    }

    #[test]
    #[should_panic(expected = "zero-size allocation")]
    fn test_zero_size_is_fatal() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        allocator.allocate(&vertex_request(0));
    }

    #[test]
    #[should_panic(expected = "exceeds memory.max_block_size")]
    fn test_oversized_request_is_fatal() {
        let mut allocator = GfxAllocator::new(CountingSource::default(), small_config());
        allocator.allocate(&vertex_request((1 << 20) + 1));
    }
}
