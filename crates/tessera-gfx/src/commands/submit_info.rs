use ash::vk;
use itertools::Itertools;

use crate::commands::semaphore::GfxSemaphore;

/// Gfx 关于 submitInfo 的封装，更易用
#[derive(Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[vk::CommandBuffer]) -> Self {
        let command_buffers = commands
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            .collect_vec();

        Self {
            command_buffers,
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(&self.command_buffers)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }

    /// `value` 为 None 表示 binary semaphore
    #[inline]
    pub fn wait(self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_raw(semaphore.handle(), stage, value)
    }

    #[inline]
    pub fn wait_raw(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_infos.push(
            vk::SemaphoreSubmitInfo::default().semaphore(semaphore).stage_mask(stage).value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn signal(self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_raw(semaphore.handle(), stage, value)
    }

    #[inline]
    pub fn signal_raw(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_infos.push(
            vk::SemaphoreSubmitInfo::default().semaphore(semaphore).stage_mask(stage).value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn wait_count(&self) -> usize {
        self.wait_infos.len()
    }

    #[inline]
    pub fn signal_count(&self) -> usize {
        self.signal_infos.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_timeline_and_binary_values() {
        let info = GfxSubmitInfo::new(&[vk::CommandBuffer::from_raw(1)])
            .wait_raw(vk::Semaphore::from_raw(10), vk::PipelineStageFlags2::TRANSFER, Some(4))
            .signal_raw(vk::Semaphore::from_raw(11), vk::PipelineStageFlags2::ALL_COMMANDS, Some(5))
            .signal_raw(vk::Semaphore::from_raw(12), vk::PipelineStageFlags2::ALL_COMMANDS, None);
        assert_eq!(info.wait_count(), 1);
        assert_eq!(info.signal_count(), 2);
        assert_eq!(info.signal_infos[0].value, 5);
        assert_eq!(info.signal_infos[1].value, 0);

        let submit = info.submit_info();
        assert_eq!(submit.command_buffer_info_count, 1);
        assert_eq!(submit.signal_semaphore_info_count, 2);
    }
}
