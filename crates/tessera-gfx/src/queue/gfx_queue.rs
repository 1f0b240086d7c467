use std::ffi::CString;
use std::rc::Rc;

use ash::vk;

use crate::commands::command_buffer::GfxCommandBuffer;
use crate::commands::command_pool::GfxCommandPool;
use crate::commands::semaphore::GfxSemaphore;
use crate::commands::submit_info::GfxSubmitInfo;
use crate::error::VkResultExt;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::GfxQueueFamily;
use crate::memory::staging::StagingPool;
use crate::queue::in_flight::InFlightTracker;
use crate::resources::buffer::GfxStagingBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
    /// 与 Graphics 使用同一个 queue
    Present,
}
impl QueueKind {
    pub fn name(self) -> &'static str {
        match self {
            QueueKind::Graphics => "graphics",
            QueueKind::Compute => "compute",
            QueueKind::Transfer => "transfer",
            QueueKind::Present => "present",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimMode {
    /// 等待 GPU 完成最早的一次未完成提交，然后回收
    Blocking,
    /// 只回收已经完成的提交，不等待
    Opportunistic,
}

/// 提交时需要等待的 semaphore；`value` 为 None 表示 binary semaphore
#[derive(Clone, Copy, Debug)]
pub struct QueueWait {
    pub semaphore: vk::Semaphore,
    pub value: Option<u64>,
    pub stage: vk::PipelineStageFlags2,
}
impl QueueWait {
    #[inline]
    pub fn timeline(semaphore: vk::Semaphore, value: u64, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            value: Some(value),
            stage,
        }
    }

    #[inline]
    pub fn binary(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            value: None,
            stage,
        }
    }
}

/// 一次提交引用的所有临时资源
struct InFlightSubmission {
    command_buffer: GfxCommandBuffer,
    staging: Vec<GfxStagingBuffer>,
}

/// 硬件队列以及它的 timeline
///
/// 每次提交都会 signal 下一个 timeline 值，提交使用的 command buffer 和 staging buffer
/// 都带上这个值，GPU 的 timeline 越过之后才会被回收。
///
/// # Destroy
/// 需要手动调用 [`GfxQueue::destroy`]
pub struct GfxQueue {
    kind: QueueKind,
    vk_queue: vk::Queue,
    queue_family: GfxQueueFamily,

    command_pool: GfxCommandPool,
    /// 已经 reset 的 command buffer，可以直接复用
    free_command_buffers: Vec<GfxCommandBuffer>,

    timeline: GfxSemaphore,
    /// 最后一次提交使用的 timeline 值
    last_submitted: u64,
    in_flight: InFlightTracker<InFlightSubmission>,

    device: Rc<GfxDevice>,
}

// new & init
impl GfxQueue {
    pub fn new(device: Rc<GfxDevice>, kind: QueueKind, queue_family: GfxQueueFamily) -> Self {
        let vk_queue = unsafe { device.get_device_queue(queue_family.queue_family_index, 0) };

        let command_pool = GfxCommandPool::new(
            device.clone(),
            queue_family.clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            &format!("{}-queue", kind.name()),
        );
        let timeline = GfxSemaphore::new_timeline(device.clone(), 0, &format!("{}-timeline", kind.name()));

        let queue = Self {
            kind,
            vk_queue,
            queue_family,
            command_pool,
            free_command_buffers: vec![],
            timeline,
            last_submitted: 0,
            in_flight: InFlightTracker::new(),
            device,
        };
        queue.device.set_debug_name(&queue, kind.name());
        log::info!(
            "{} queue created on family {} ({})",
            kind.name(),
            queue.queue_family.queue_family_index,
            queue.queue_family.name
        );
        queue
    }
}

// getters
impl GfxQueue {
    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[inline]
    pub fn vk_queue(&self) -> vk::Queue {
        self.vk_queue
    }

    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn timeline(&self) -> &GfxSemaphore {
        &self.timeline
    }

    #[inline]
    pub fn last_submitted_value(&self) -> u64 {
        self.last_submitted
    }

    /// GPU 已经完成的 timeline 值
    #[inline]
    pub fn completed_value(&self) -> u64 {
        self.timeline.counter_value()
    }

    #[inline]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

// tools
impl GfxQueue {
    /// 分配一个 command buffer，优先复用已经回收的
    pub fn alloc_command_buffer(&mut self, debug_name: &str) -> GfxCommandBuffer {
        match self.free_command_buffers.pop() {
            Some(cmd) => {
                self.device.set_debug_name(&cmd, debug_name);
                cmd
            }
            None => GfxCommandBuffer::new(self.device.clone(), &self.command_pool, debug_name),
        }
    }

    /// 提交已经结束录制的 command buffer，返回这次提交的 timeline 值
    ///
    /// - `staging`：命令中读取的 staging buffer，和 command buffer 一起等到 timeline 越过后回收
    /// - `binary_signal`：给 present 使用的 binary semaphore
    pub fn submit(
        &mut self,
        command_buffer: GfxCommandBuffer,
        staging: Vec<GfxStagingBuffer>,
        waits: &[QueueWait],
        binary_signal: Option<vk::Semaphore>,
    ) -> u64 {
        let _span = tracy_client::span!("GfxQueue::submit");

        let value = self.last_submitted + 1;
        let mut submit_info = GfxSubmitInfo::new(&[command_buffer.vk_handle()]);
        for wait in waits {
            submit_info = submit_info.wait_raw(wait.semaphore, wait.stage, wait.value);
        }
        submit_info = submit_info.signal(&self.timeline, vk::PipelineStageFlags2::ALL_COMMANDS, Some(value));
        if let Some(semaphore) = binary_signal {
            submit_info = submit_info.signal_raw(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        }

        unsafe {
            self.device
                .queue_submit2(self.vk_queue, std::slice::from_ref(&submit_info.submit_info()), vk::Fence::null())
                .or_fatal("queue submit");
        }

        self.last_submitted = value;
        self.in_flight.push(
            value,
            InFlightSubmission {
                command_buffer,
                staging,
            },
        );
        value
    }

    /// 回收 GPU 已经完成的提交，staging buffer 归还到 `staging_pool`
    ///
    /// 返回回收的提交数量
    pub fn reclaim(&mut self, mode: ReclaimMode, staging_pool: &mut StagingPool<GfxStagingBuffer>) -> usize {
        let _span = tracy_client::span!("GfxQueue::reclaim");

        if mode == ReclaimMode::Blocking {
            if let Some(oldest) = self.in_flight.oldest_value() {
                self.timeline.wait_timeline(oldest, u64::MAX);
            }
        }

        let retired = self.in_flight.reclaim(self.timeline.counter_value());
        let count = retired.len();
        for submission in retired {
            let mut command_buffer = submission.command_buffer;
            command_buffer.reset();
            self.free_command_buffers.push(command_buffer);
            submission.staging.into_iter().for_each(|b| staging_pool.release(b));
        }
        count
    }

    /// vkQueueWaitIdle 和等待 Fence 的效率相同
    #[inline]
    pub fn wait_idle(&self) {
        unsafe { self.device.queue_wait_idle(self.vk_queue).or_fatal("queue wait idle") }
    }
}

// debug 相关命令
impl GfxQueue {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = CString::new(label_name).unwrap_or_default();
        unsafe {
            self.device.debug_utils().queue_begin_debug_utils_label(
                self.vk_queue,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    #[inline]
    pub fn end_label(&self) {
        unsafe {
            self.device.debug_utils().queue_end_debug_utils_label(self.vk_queue);
        }
    }
}

// destroy
impl GfxQueue {
    /// 等待 queue 空闲，in-flight 的 staging buffer 全部归还到 `staging_pool`
    pub fn destroy(mut self, staging_pool: &mut StagingPool<GfxStagingBuffer>) {
        self.wait_idle();

        let submissions = self.in_flight.drain_all();
        log::info!("destroying {} queue, {} submissions still tracked", self.kind.name(), submissions.len());
        for submission in submissions {
            submission.staging.into_iter().for_each(|b| staging_pool.release(b));
        }
        // command buffer 随 pool 一起释放
        self.free_command_buffers.clear();

        self.command_pool.destroy();
        self.timeline.destroy();
    }
}

impl DebugType for GfxQueue {
    fn debug_type_name() -> &'static str {
        "GfxQueue"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_wait_helpers() {
        use ash::vk::Handle;

        let timeline = QueueWait::timeline(vk::Semaphore::from_raw(3), 7, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(timeline.value, Some(7));
        let binary = QueueWait::binary(vk::Semaphore::from_raw(4), vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(binary.value, None);
        assert_eq!(QueueKind::Present.name(), "present");
    }
}
