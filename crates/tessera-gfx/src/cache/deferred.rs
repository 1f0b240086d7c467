/// 延迟销毁队列
///
/// 每个对象都带有一个 retire 值（帧序号或者 timeline 值），表示最后一次可能引用它的工作。
/// 对象按 `retire % N` 放入 N 个槽中，只有当 GPU 确认完成的值不小于 retire 时才会被取出销毁。
pub struct DeferredDestroyRing<T> {
    slots: Vec<Vec<(u64, T)>>,
}

impl<T> DeferredDestroyRing<T> {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count.max(1)).map(|_| vec![]).collect(),
        }
    }

    #[inline]
    pub fn push(&mut self, retire_at: u64, object: T) {
        let slot = (retire_at % self.slots.len() as u64) as usize;
        self.slots[slot].push((retire_at, object));
    }

    /// 取出所有 `retire <= completed` 的对象
    pub fn drain_retired(&mut self, completed: u64) -> Vec<T> {
        let mut retired = vec![];
        for slot in &mut self.slots {
            let (ready, pending): (Vec<_>, Vec<_>) =
                std::mem::take(slot).into_iter().partition(|(retire_at, _)| *retire_at <= completed);
            *slot = pending;
            retired.extend(ready.into_iter().map(|(_, object)| object));
        }
        retired
    }

    /// 销毁阶段使用，调用前需要确保 device idle
    pub fn drain_all(&mut self) -> Vec<T> {
        self.slots.iter_mut().flat_map(|slot| std::mem::take(slot).into_iter().map(|(_, object)| object)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_released_only_after_retire_value() {
        let mut ring = DeferredDestroyRing::new(3);
        ring.push(5, "a");
        ring.push(6, "b");
        ring.push(8, "c");

        assert!(ring.drain_retired(4).is_empty());
        assert_eq!(ring.drain_retired(5), vec!["a"]);
        assert_eq!(ring.len(), 2);

        // 6 和 8 在同一个 ring 周期之外也能正确处理
        let mut rest = ring.drain_retired(10);
        rest.sort();
        assert_eq!(rest, vec!["b", "c"]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_same_slot_different_values() {
        let mut ring = DeferredDestroyRing::new(2);
        ring.push(2, 1);
        ring.push(4, 2);
        assert_eq!(ring.drain_retired(3), vec![1]);
        assert_eq!(ring.drain_all(), vec![2]);
    }
}
