use ash::vk;

/// 可以放入 [`StagingPool`] 的 buffer
pub trait StagingCapacity {
    fn capacity(&self) -> vk::DeviceSize;
}

struct IdleStaging<B> {
    buffer: B,
    /// 归还时池的帧计数
    released_at: u64,
}

/// CPU 可见 staging buffer 的空闲池
///
/// 池里只放 GPU 已经用完的 buffer。借出的 buffer 跟随提交进入队列的 in-flight 列表，
/// 只有 timeline 越过对应的提交后才会通过 [`StagingPool::release`] 回到池中。
///
/// 新建的 buffer 容量向上取整到 2 的幂；在池中空闲超过一定帧数的 buffer 由
/// [`StagingPool::end_frame`] 交还给调用者销毁，池不会只增不减。
pub struct StagingPool<B> {
    free: Vec<IdleStaging<B>>,
    created_count: usize,
    frame: u64,
}

impl<B> Default for StagingPool<B> {
    fn default() -> Self {
        Self {
            free: vec![],
            created_count: 0,
            frame: 0,
        }
    }
}

// new & init
impl<B: StagingCapacity> StagingPool<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl<B: StagingCapacity> StagingPool<B> {
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn created_count(&self) -> usize {
        self.created_count
    }

    /// 空闲 buffer 的容量总和
    pub fn free_bytes(&self) -> vk::DeviceSize {
        self.free.iter().map(|idle| idle.buffer.capacity()).sum()
    }
}

// tools
impl<B: StagingCapacity> StagingPool<B> {
    /// 从池中取出第一个容量足够的 buffer（first-fit），没有时调用 `create` 新建
    ///
    /// 传给 `create` 的是向上取整后的容量
    pub fn acquire(&mut self, size: vk::DeviceSize, create: impl FnOnce(vk::DeviceSize) -> B) -> B {
        if let Some(idx) = self.free.iter().position(|idle| idle.buffer.capacity() >= size) {
            return self.free.remove(idx).buffer;
        }

        let capacity = size.max(1).next_power_of_two();
        self.created_count += 1;
        log::info!(
            "staging pool grows: #{} with {} bytes (requested {} bytes)",
            self.created_count,
            capacity,
            size
        );
        create(capacity)
    }

    /// GPU 确认使用完毕后归还
    pub fn release(&mut self, buffer: B) {
        self.free.push(IdleStaging {
            buffer,
            released_at: self.frame,
        });
    }

    /// 进入下一帧，取出空闲超过 `max_idle_frames` 帧的 buffer，由调用者销毁
    pub fn end_frame(&mut self, max_idle_frames: u64) -> Vec<B> {
        self.frame += 1;

        let frame = self.frame;
        let (expired, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.free).into_iter().partition(|idle| frame - idle.released_at > max_idle_frames);
        self.free = kept;

        if !expired.is_empty() {
            log::info!("staging pool trims {} idle buffers, {} left", expired.len(), self.free.len());
        }
        expired.into_iter().map(|idle| idle.buffer).collect()
    }
}

// destroy
impl<B: StagingCapacity> StagingPool<B> {
    /// 取出池中所有的 buffer，用于销毁
    pub fn drain(&mut self) -> Vec<B> {
        std::mem::take(&mut self.free).into_iter().map(|idle| idle.buffer).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct FakeStaging {
        pub id: usize,
        pub capacity: vk::DeviceSize,
    }
    impl StagingCapacity for FakeStaging {
        fn capacity(&self) -> vk::DeviceSize {
            self.capacity
        }
    }

    #[test]
    fn test_first_fit_reuse() {
        let mut pool = StagingPool::new();
        pool.release(FakeStaging { id: 0, capacity: 64 });
        pool.release(FakeStaging { id: 1, capacity: 4096 });
        pool.release(FakeStaging { id: 2, capacity: 1024 });

        let buffer = pool.acquire(512, |_| unreachable!());
        assert_eq!(buffer.id, 1);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.created_count(), 0);
    }

    #[test]
    fn test_create_when_nothing_fits() {
        let mut pool = StagingPool::new();
        pool.release(FakeStaging { id: 0, capacity: 64 });

        let buffer = pool.acquire(128, |size| FakeStaging { id: 7, capacity: size });
        assert_eq!(buffer, FakeStaging { id: 7, capacity: 128 });
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_new_buffer_capacity_is_rounded_up() {
        let mut pool: StagingPool<FakeStaging> = StagingPool::new();

        let buffer = pool.acquire(100, |size| FakeStaging { id: 0, capacity: size });
        assert_eq!(buffer.capacity, 128);

        // 归还后可以满足不超过取整容量的请求
        pool.release(buffer);
        let reused = pool.acquire(120, |_| unreachable!());
        assert_eq!(reused.id, 0);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_idle_buffers_are_trimmed() {
        let mut pool = StagingPool::new();
        pool.release(FakeStaging { id: 0, capacity: 64 });
        pool.release(FakeStaging { id: 1, capacity: 1024 });

        assert!(pool.end_frame(2).is_empty());
        // id 1 被再次使用，空闲计时从归还时重新开始
        let reused = pool.acquire(512, |_| unreachable!());
        pool.release(reused);
        assert!(pool.end_frame(2).is_empty());

        let trimmed = pool.end_frame(2);
        assert_eq!(trimmed, vec![FakeStaging { id: 0, capacity: 64 }]);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.free_bytes(), 1024);

        assert_eq!(pool.end_frame(2).len(), 1);
        assert_eq!(pool.free_count(), 0);
    }
}
