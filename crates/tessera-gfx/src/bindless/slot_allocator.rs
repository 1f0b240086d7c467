use crate::error::gfx_fatal;

/// 固定容量数组的下标分配器
///
/// 分配顺序：free list 弹出 → high-water 递增 → 槽位耗尽（致命错误）。
/// 释放的下标先进入等待队列，只有 `end_frame` 确认释放所在的帧已经执行完毕后才回到 free list
pub struct SlotAllocator {
    name: &'static str,
    capacity: u32,
    high_water: u32,
    free: Vec<u32>,
    /// (释放时的帧序号, 下标)
    pending_release: Vec<(u64, u32)>,
    live: Vec<bool>,
}

// new & init
impl SlotAllocator {
    pub fn new(name: &'static str, capacity: u32) -> Self {
        Self {
            name,
            capacity,
            high_water: 0,
            free: vec![],
            pending_release: vec![],
            live: vec![false; capacity as usize],
        }
    }
}

// tools
impl SlotAllocator {
    pub fn allocate(&mut self) -> u32 {
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else if self.high_water < self.capacity {
            self.high_water += 1;
            self.high_water - 1
        } else {
            gfx_fatal!("{} slots exhausted (capacity {})", self.name, self.capacity)
        };
        self.live[slot as usize] = true;
        slot
    }

    /// 下标进入等待队列，`frame_id` 是最后一个可能读取它的帧
    pub fn release(&mut self, slot: u32, frame_id: u64) {
        if slot >= self.capacity || !self.live[slot as usize] {
            gfx_fatal!("{} slot {} released while not allocated", self.name, slot);
        }
        self.live[slot as usize] = false;
        self.pending_release.push((frame_id, slot));
    }

    /// `retired_frame` 及之前的帧已经在 GPU 上执行完毕，对应的下标回到 free list
    pub fn end_frame(&mut self, retired_frame: u64) -> usize {
        let before = self.free.len();
        let free = &mut self.free;
        self.pending_release.retain(|&(frame_id, slot)| {
            if frame_id <= retired_frame {
                free.push(slot);
                false
            } else {
                true
            }
        });
        self.free.len() - before
    }
}

// getters
impl SlotAllocator {
    #[inline]
    pub fn is_live(&self, slot: u32) -> bool {
        self.live.get(slot as usize).copied().unwrap_or(false)
    }

    #[inline]
    pub fn is_free(&self, slot: u32) -> bool {
        self.free.contains(&slot)
    }

    #[inline]
    pub fn pending_release_count(&self) -> usize {
        self.pending_release.len()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_then_reuse_after_end_frame() {
        let mut slots = SlotAllocator::new("texture", 4);
        assert_eq!(slots.allocate(), 0);
        assert_eq!(slots.allocate(), 1);

        slots.release(0, 10);
        assert!(!slots.is_free(0));
        // 释放的下标还没有回到 free list，继续 bump
        assert_eq!(slots.allocate(), 2);

        assert_eq!(slots.end_frame(9), 0);
        assert!(!slots.is_free(0));
        assert_eq!(slots.end_frame(10), 1);
        assert!(slots.is_free(0));
        assert_eq!(slots.allocate(), 0);
        assert_eq!(slots.live_count(), 3);
    }

    #[test]
    #[should_panic(expected = "slots exhausted")]
    fn test_exhaustion_is_fatal() {
        let mut slots = SlotAllocator::new("sampler", 2);
        slots.allocate();
        slots.allocate();
        slots.allocate();
    }

    #[test]
    #[should_panic(expected = "released while not allocated")]
    fn test_double_release_is_fatal() {
        let mut slots = SlotAllocator::new("texture", 2);
        let slot = slots.allocate();
        slots.release(slot, 1);
        slots.release(slot, 1);
    }
}
