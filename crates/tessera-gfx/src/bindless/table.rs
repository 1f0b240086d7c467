use ash::vk;

use crate::bindless::slot_allocator::SlotAllocator;
use crate::config::BindlessConfig;

/// shader 中 sampled image 数组的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindlessTextureId(pub u32);

/// shader 中 sampler 数组的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindlessSamplerId(pub u32);

/// shader 中 storage image 数组的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindlessStorageImageId(pub u32);

/// 等待写入 descriptor set 的一项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindlessWrite {
    Texture { slot: u32, view: vk::ImageView },
    Sampler { slot: u32, sampler: vk::Sampler },
    StorageImage { slot: u32, view: vk::ImageView },
}

/// Bindless 下标的簿记，不直接访问设备
///
/// 新分配的下标产生一条 [`BindlessWrite`]，由 [`crate::bindless::descriptors::BindlessDescriptors::flush`]
/// 写入 descriptor set；释放的下标等 `end_frame` 确认对应帧执行完毕后才能复用
pub struct BindlessTable {
    textures: SlotAllocator,
    samplers: SlotAllocator,
    storage_images: SlotAllocator,

    pending_writes: Vec<BindlessWrite>,
}

// new & init
impl BindlessTable {
    pub fn new(config: &BindlessConfig) -> Self {
        Self {
            textures: SlotAllocator::new("texture", config.max_textures),
            samplers: SlotAllocator::new("sampler", config.max_samplers),
            storage_images: SlotAllocator::new("storage image", config.max_storage_images),
            pending_writes: vec![],
        }
    }
}

// create
impl BindlessTable {
    pub fn create_texture_id(&mut self, view: vk::ImageView) -> BindlessTextureId {
        let slot = self.textures.allocate();
        self.pending_writes.push(BindlessWrite::Texture { slot, view });
        BindlessTextureId(slot)
    }

    pub fn create_sampler_id(&mut self, sampler: vk::Sampler) -> BindlessSamplerId {
        let slot = self.samplers.allocate();
        self.pending_writes.push(BindlessWrite::Sampler { slot, sampler });
        BindlessSamplerId(slot)
    }

    pub fn create_storage_image_id(&mut self, view: vk::ImageView) -> BindlessStorageImageId {
        let slot = self.storage_images.allocate();
        self.pending_writes.push(BindlessWrite::StorageImage { slot, view });
        BindlessStorageImageId(slot)
    }
}

// release
impl BindlessTable {
    /// `frame_id` 是最后一个可能读取该下标的帧
    pub fn release_texture(&mut self, id: BindlessTextureId, frame_id: u64) {
        self.textures.release(id.0, frame_id);
        self.pending_writes.retain(|w| !matches!(w, BindlessWrite::Texture { slot, .. } if *slot == id.0));
    }

    pub fn release_sampler(&mut self, id: BindlessSamplerId, frame_id: u64) {
        self.samplers.release(id.0, frame_id);
        self.pending_writes.retain(|w| !matches!(w, BindlessWrite::Sampler { slot, .. } if *slot == id.0));
    }

    pub fn release_storage_image(&mut self, id: BindlessStorageImageId, frame_id: u64) {
        self.storage_images.release(id.0, frame_id);
        self.pending_writes.retain(|w| !matches!(w, BindlessWrite::StorageImage { slot, .. } if *slot == id.0));
    }

    /// `retired_frame` 及之前的帧已经执行完毕，释放的下标回到 free list
    pub fn end_frame(&mut self, retired_frame: u64) {
        let recycled = self.textures.end_frame(retired_frame)
            + self.samplers.end_frame(retired_frame)
            + self.storage_images.end_frame(retired_frame);
        if recycled > 0 {
            log::debug!("bindless: {} slots recycled at retired frame {}", recycled, retired_frame);
        }
    }
}

// getters
impl BindlessTable {
    /// 取出所有等待写入的项
    #[inline]
    pub fn take_writes(&mut self) -> Vec<BindlessWrite> {
        std::mem::take(&mut self.pending_writes)
    }

    #[inline]
    pub fn textures(&self) -> &SlotAllocator {
        &self.textures
    }

    #[inline]
    pub fn samplers(&self) -> &SlotAllocator {
        &self.samplers
    }

    #[inline]
    pub fn storage_images(&self) -> &SlotAllocator {
        &self.storage_images
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::frame::frame_counter::FrameTracker;

    fn small_config() -> BindlessConfig {
        BindlessConfig {
            max_textures: 8,
            max_samplers: 2,
            max_storage_images: 2,
        }
    }

    #[test]
    fn test_create_queues_single_write() {
        let mut table = BindlessTable::new(&small_config());
        let view = vk::ImageView::from_raw(7);
        let id = table.create_texture_id(view);
        let sampler = table.create_sampler_id(vk::Sampler::from_raw(3));

        assert_eq!(id, BindlessTextureId(0));
        assert_eq!(sampler, BindlessSamplerId(0));
        assert_eq!(
            table.take_writes(),
            vec![
                BindlessWrite::Texture { slot: 0, view },
                BindlessWrite::Sampler {
                    slot: 0,
                    sampler: vk::Sampler::from_raw(3)
                },
            ]
        );
        assert!(table.take_writes().is_empty());
    }

    #[test]
    fn test_release_drops_unflushed_write() {
        let mut table = BindlessTable::new(&small_config());
        let id = table.create_storage_image_id(vk::ImageView::from_raw(1));
        table.release_storage_image(id, 0);
        assert!(table.take_writes().is_empty());
    }

    /// 模拟 N 帧并行：第 F 帧结束时，GPU 只确认了 F - N 帧及之前的工作
    fn run_frames(frames_in_flight: u64) {
        let mut table = BindlessTable::new(&small_config());
        let mut tracker = FrameTracker::new();

        let id = table.create_texture_id(vk::ImageView::from_raw(1));
        let release_frame = 5;
        table.release_texture(id, release_frame);

        for frame in release_frame..release_frame + frames_in_flight {
            // 每帧 submit 的 timeline 值与帧序号相同
            tracker.record_submit(frame, frame);
            let completed = frame.saturating_sub(frames_in_flight);
            table.end_frame(tracker.retired_frame(completed));
            assert!(!table.textures().is_free(id.0), "slot reused at frame {} with {} frames in flight", frame, frames_in_flight);
        }

        let frame = release_frame + frames_in_flight;
        tracker.record_submit(frame, frame);
        table.end_frame(tracker.retired_frame(frame - frames_in_flight));
        assert!(table.textures().is_free(id.0));
    }

    #[test]
    fn test_slot_protected_single_frame_in_flight() {
        run_frames(1);
    }

    #[test]
    fn test_slot_protected_three_frames_in_flight() {
        run_frames(3);
    }
}
