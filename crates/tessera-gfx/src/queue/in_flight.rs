use std::collections::VecDeque;

/// 按提交顺序记录的 in-flight 资源，每项都带有提交时的 timeline 值
///
/// 同一个 queue 上 timeline 值单调递增，因此只需要从队首开始回收
pub struct InFlightTracker<T> {
    entries: VecDeque<(u64, T)>,
}

impl<T> Default for InFlightTracker<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> InFlightTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, timeline_value: u64, item: T) {
        debug_assert!(
            self.entries.back().is_none_or(|(last, _)| *last <= timeline_value),
            "timeline values must be pushed in order"
        );
        self.entries.push_back((timeline_value, item));
    }

    /// 取出所有 timeline 值不大于 `completed` 的项
    pub fn reclaim(&mut self, completed: u64) -> Vec<T> {
        let mut retired = vec![];
        while let Some((value, _)) = self.entries.front() {
            if *value > completed {
                break;
            }
            if let Some((_, item)) = self.entries.pop_front() {
                retired.push(item);
            }
        }
        retired
    }

    /// 最早的未完成提交
    #[inline]
    pub fn oldest_value(&self) -> Option<u64> {
        self.entries.front().map(|(value, _)| *value)
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, item)| item).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
