use ash::vk;

use crate::error::gfx_fatal;
use crate::memory::{BlockKey, align_up};

/// 一段空闲区间
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeRange {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}
impl FreeRange {
    #[inline]
    fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

/// 一整块 device memory 的簿记
///
/// 内存布局：`[0, high_water)` 是已经使用过的区域，其中被归还的部分记录在 free list 中；
/// `[high_water, capacity)` 是从未使用过的尾部。
///
/// 任何时刻都满足：free list 字节数 + 尾部字节数 + 存活字节数 == capacity
pub struct MemoryBlock<B> {
    key: BlockKey,
    memory: B,

    capacity: vk::DeviceSize,
    high_water: vk::DeviceSize,
    /// 按 offset 排序，相邻区间总是合并的
    free_ranges: Vec<FreeRange>,

    live_bytes: vk::DeviceSize,
    live_count: usize,
}

// new & init
impl<B> MemoryBlock<B> {
    pub fn new(key: BlockKey, memory: B, capacity: vk::DeviceSize) -> Self {
        Self {
            key,
            memory,
            capacity,
            high_water: 0,
            free_ranges: vec![],
            live_bytes: 0,
            live_count: 0,
        }
    }

    pub fn into_memory(self) -> B {
        self.memory
    }
}

// getters
impl<B> MemoryBlock<B> {
    #[inline]
    pub fn key(&self) -> &BlockKey {
        &self.key
    }
    #[inline]
    pub fn memory(&self) -> &B {
        &self.memory
    }
    #[inline]
    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }
    #[inline]
    pub fn high_water(&self) -> vk::DeviceSize {
        self.high_water
    }
    #[inline]
    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free_ranges
    }
    #[inline]
    pub fn live_bytes(&self) -> vk::DeviceSize {
        self.live_bytes
    }
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// free list 加上未使用的尾部
    #[inline]
    pub fn free_bytes(&self) -> vk::DeviceSize {
        self.free_ranges.iter().map(|r| r.size).sum::<vk::DeviceSize>() + (self.capacity - self.high_water)
    }
}

// alloc & free
impl<B> MemoryBlock<B> {
    /// 在 free list 中 first-fit
    pub fn alloc_from_free_list(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<vk::DeviceSize> {
        let (idx, aligned) = self.free_ranges.iter().enumerate().find_map(|(idx, range)| {
            let aligned = align_up(range.offset, alignment);
            (aligned + size <= range.end()).then_some((idx, aligned))
        })?;

        let range = self.free_ranges.remove(idx);
        // 先插入后半段，再插入前半段，保持有序
        let back = FreeRange {
            offset: aligned + size,
            size: range.end() - (aligned + size),
        };
        if back.size > 0 {
            self.free_ranges.insert(idx, back);
        }
        let front = FreeRange {
            offset: range.offset,
            size: aligned - range.offset,
        };
        if front.size > 0 {
            self.free_ranges.insert(idx, front);
        }

        self.on_alloc(size);
        Some(aligned)
    }

    /// 从未使用过的尾部切出一段，对齐产生的空隙放入 free list
    pub fn alloc_from_tail(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<vk::DeviceSize> {
        let aligned = align_up(self.high_water, alignment);
        if aligned + size > self.capacity {
            return None;
        }

        if aligned > self.high_water {
            self.free_ranges.push(FreeRange {
                offset: self.high_water,
                size: aligned - self.high_water,
            });
        }
        self.high_water = aligned + size;

        self.on_alloc(size);
        Some(aligned)
    }

    /// 归还一段内存，和左右相邻的空闲区间合并；紧贴尾部时退回到尾部
    pub fn free(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let end = offset + size;
        if size == 0 || end > self.high_water {
            gfx_fatal!("invalid free: [{}, {}) is outside the used range [0, {})", offset, end, self.high_water);
        }

        let idx = self.free_ranges.partition_point(|r| r.offset < offset);
        let merge_prev = match idx.checked_sub(1).map(|i| self.free_ranges[i]) {
            Some(prev) if prev.end() > offset => {
                gfx_fatal!("double free: [{}, {}) overlaps free range {:?}", offset, end, prev)
            }
            Some(prev) => prev.end() == offset,
            None => false,
        };
        let merge_next = match self.free_ranges.get(idx) {
            Some(next) if next.offset < end => {
                gfx_fatal!("double free: [{}, {}) overlaps free range {:?}", offset, end, next)
            }
            Some(next) => next.offset == end,
            None => false,
        };

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.free_ranges.remove(idx);
                self.free_ranges[idx - 1].size += size + next.size;
            }
            (true, false) => self.free_ranges[idx - 1].size += size,
            (false, true) => {
                self.free_ranges[idx].offset = offset;
                self.free_ranges[idx].size += size;
            }
            (false, false) => self.free_ranges.insert(idx, FreeRange { offset, size }),
        }

        // 最后一段空闲区间紧贴 high water 时，直接退回到尾部
        if let Some(last) = self.free_ranges.last().copied() {
            if last.end() == self.high_water {
                self.free_ranges.pop();
                self.high_water = last.offset;
            }
        }

        self.live_bytes -= size;
        self.live_count -= 1;
    }

    #[inline]
    fn on_alloc(&mut self, size: vk::DeviceSize) {
        self.live_bytes += size;
        self.live_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AllocationUsage, MemoryKind};

    fn test_block(capacity: vk::DeviceSize) -> MemoryBlock<()> {
        let key = BlockKey {
            kind: MemoryKind::DeviceLocal,
            usage: AllocationUsage::Buffer(vk::BufferUsageFlags::VERTEX_BUFFER),
            memory_type_bits: !0,
        };
        MemoryBlock::new(key, (), capacity)
    }

    fn alloc(block: &mut MemoryBlock<()>, size: u64, align: u64) -> Option<u64> {
        block.alloc_from_free_list(size, align).or_else(|| block.alloc_from_tail(size, align))
    }

    fn assert_accounting(block: &MemoryBlock<()>) {
        assert_eq!(block.free_bytes() + block.live_bytes(), block.capacity());
        // free list 有序且不相邻
        for pair in block.free_ranges().windows(2) {
            assert!(pair[0].end() < pair[1].offset);
        }
    }

    #[test]
    fn test_tail_alloc_with_alignment_padding() {
        let mut block = test_block(1024);
        assert_eq!(block.alloc_from_tail(10, 1), Some(0));
        assert_eq!(block.alloc_from_tail(16, 64), Some(64));
        // 10..64 的空隙进入 free list
        assert_eq!(block.free_ranges(), &[FreeRange { offset: 10, size: 54 }]);
        assert_eq!(block.high_water(), 80);
        assert_accounting(&block);
    }

    #[test]
    fn test_free_coalesces_both_sides() {
        let mut block = test_block(1024);
        let a = alloc(&mut block, 100, 1).unwrap();
        let b = alloc(&mut block, 100, 1).unwrap();
        let c = alloc(&mut block, 100, 1).unwrap();
        let _d = alloc(&mut block, 100, 1).unwrap();

        block.free(a, 100);
        block.free(c, 100);
        assert_eq!(block.free_ranges().len(), 2);
        block.free(b, 100);
        assert_eq!(block.free_ranges(), &[FreeRange { offset: 0, size: 300 }]);
        assert_accounting(&block);
    }

    #[test]
    fn test_free_at_tail_retreats_high_water() {
        let mut block = test_block(1024);
        let a = alloc(&mut block, 256, 1).unwrap();
        let b = alloc(&mut block, 256, 1).unwrap();
        block.free(b, 256);
        assert_eq!(block.high_water(), 256);
        block.free(a, 256);
        assert_eq!(block.high_water(), 0);
        assert!(block.free_ranges().is_empty());
        assert_eq!(block.live_count(), 0);
    }

    #[test]
    fn test_first_fit_splits_range_keeping_alignment() {
        let mut block = test_block(4096);
        let a = alloc(&mut block, 1000, 1).unwrap();
        let _keep = alloc(&mut block, 8, 1).unwrap();
        block.free(a, 1000);

        let offset = block.alloc_from_free_list(100, 256).unwrap();
        assert_eq!(offset, 0);
        let offset = block.alloc_from_free_list(100, 256).unwrap();
        assert_eq!(offset, 256);
        assert_eq!(
            block.free_ranges(),
            &[FreeRange { offset: 100, size: 156 }, FreeRange { offset: 356, size: 644 }]
        );
        assert_accounting(&block);
    }

    #[test]
    fn test_accounting_holds_for_mixed_sequence() {
        let mut block = test_block(1 << 20);
        let mut live: Vec<(u64, u64)> = vec![];
        // 简单的线性同余序列，保证测试可复现
        let mut seed: u64 = 0x2545F4914F6CDD1D;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        for _ in 0..2000 {
            if live.is_empty() || next() % 3 != 0 {
                let size = next() % 4096 + 1;
                let align = 1 << (next() % 9);
                if let Some(offset) = alloc(&mut block, size, align) {
                    assert_eq!(offset % align, 0);
                    live.push((offset, size));
                }
            } else {
                let idx = (next() as usize) % live.len();
                let (offset, size) = live.swap_remove(idx);
                block.free(offset, size);
            }
            assert_accounting(&block);
        }

        // 存活的区间互不重叠
        live.sort();
        for pair in live.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let mut block = test_block(1024);
        let a = alloc(&mut block, 64, 1).unwrap();
        let _b = alloc(&mut block, 64, 1).unwrap();
        block.free(a, 64);
        block.free(a, 64);
    }
}
