use std::collections::VecDeque;
use std::fmt::Display;

/// 表示当前处于 Frames in Flight 的哪一帧，显示为 A/B/C...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLabel(usize);
impl FrameLabel {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = (b'A' + (self.0 % 26) as u8) as char;
        write!(f, "{}", letter)
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加，从 1 开始
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub fn new(fif_count: usize) -> Self {
        Self {
            frame_id: 1,
            fif_count: fif_count.max(1),
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel(self.frame_id as usize % self.fif_count)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

/// 记录每一帧最后一次提交的 timeline 值，用于把 timeline 进度换算成已经结束的帧
///
/// cache 和 bindless 的延迟释放都以帧序号为单位
#[derive(Default)]
pub struct FrameTracker {
    /// (frame id, timeline 值)，按帧序号递增
    submitted: VecDeque<(u64, u64)>,
    last_retired: u64,
}
impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一帧多次提交时，只保留最后一次的值
    pub fn record_submit(&mut self, frame_id: u64, timeline_value: u64) {
        match self.submitted.back_mut() {
            Some((frame, value)) if *frame == frame_id => *value = timeline_value,
            _ => self.submitted.push_back((frame_id, timeline_value)),
        }
    }

    /// 根据 GPU 已经完成的 timeline 值，返回已经完全结束的最新帧序号
    ///
    /// 还没有任何帧结束时返回 0
    pub fn retired_frame(&mut self, completed_value: u64) -> u64 {
        while let Some(&(frame, value)) = self.submitted.front() {
            if value > completed_value {
                break;
            }
            self.last_retired = frame;
            self.submitted.pop_front();
        }
        self.last_retired
    }

    /// 某一帧的 timeline 值，帧已经结束或者没有提交过时返回 None
    pub fn timeline_value_of(&self, frame_id: u64) -> Option<u64> {
        self.submitted.iter().find(|(frame, _)| *frame == frame_id).map(|(_, value)| *value)
    }

    #[inline]
    pub fn in_flight_frames(&self) -> usize {
        self.submitted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_name_and_label() {
        let mut counter = FrameCounter::new(3);
        assert_eq!(counter.frame_id(), 1);
        assert_eq!(counter.frame_name(), "[F1B]");

        counter.next_frame();
        counter.next_frame();
        assert_eq!(counter.frame_label().index(), 0);
        assert_eq!(counter.frame_name(), "[F3A]");
    }

    #[test]
    fn test_retired_frame_follows_timeline() {
        let mut tracker = FrameTracker::new();
        assert_eq!(tracker.retired_frame(100), 0);

        tracker.record_submit(1, 2);
        tracker.record_submit(2, 3);
        // 第 2 帧提交了两次
        tracker.record_submit(2, 5);
        tracker.record_submit(3, 6);

        assert_eq!(tracker.retired_frame(1), 0);
        assert_eq!(tracker.retired_frame(4), 1);
        assert_eq!(tracker.timeline_value_of(2), Some(5));
        assert_eq!(tracker.retired_frame(5), 2);
        assert_eq!(tracker.in_flight_frames(), 1);

        // 已经结束的帧不会回退
        assert_eq!(tracker.retired_frame(0), 2);
        assert_eq!(tracker.retired_frame(6), 3);
        assert_eq!(tracker.timeline_value_of(3), None);
    }
}
