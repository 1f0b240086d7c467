use std::collections::HashMap;
use std::hash::Hash;

use crate::error::gfx_fatal;

/// 缓存项的生命周期
///
/// Unrequested → Building → Ready → PendingDestroy → Destroyed
///
/// Destroyed 之后 entry 直接移出表，不保留记录，所以 [`ObjectCache::state`] 不会返回它
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Unrequested,
    Building,
    Ready,
    PendingDestroy,
}

enum Entry<V> {
    Building,
    Ready(V),
    /// 对象已经交给延迟销毁队列，这里只记录 retire 值
    PendingDestroy {
        retire_at: u64,
    },
}

/// key 到后端对象的缓存，每个 key 只构建一次
///
/// 只在录制线程上使用，没有内部加锁
pub struct ObjectCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    build_count: usize,
}

impl<K, V> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            build_count: 0,
        }
    }
}

impl<K: Hash + Eq + Clone, V: Copy + PartialEq> ObjectCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中时直接返回，否则调用 `build` 构建并缓存
    pub fn get_or_build(&mut self, key: &K, build: impl FnOnce(&K) -> V) -> V {
        match self.entries.get(key) {
            Some(Entry::Ready(value)) => return *value,
            Some(Entry::Building) => gfx_fatal!("cache entry re-entered while building"),
            _ => {}
        }

        self.entries.insert(key.clone(), Entry::Building);
        let value = build(key);
        self.entries.insert(key.clone(), Entry::Ready(value));
        self.build_count += 1;
        value
    }

    pub fn get(&self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(Entry::Ready(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn state(&self, key: &K) -> CacheState {
        match self.entries.get(key) {
            None => CacheState::Unrequested,
            Some(Entry::Building) => CacheState::Building,
            Some(Entry::Ready(_)) => CacheState::Ready,
            Some(Entry::PendingDestroy { .. }) => CacheState::PendingDestroy,
        }
    }

    /// Ready → PendingDestroy，返回需要延迟销毁的对象
    pub fn retire(&mut self, key: &K, retire_at: u64) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        match *entry {
            Entry::Ready(value) => {
                *entry = Entry::PendingDestroy { retire_at };
                Some(value)
            }
            _ => None,
        }
    }

    /// 将所有满足条件的 Ready 项转为 PendingDestroy
    pub fn retire_where(&mut self, retire_at: u64, mut pred: impl FnMut(&K, V) -> bool) -> Vec<V> {
        let mut retired = vec![];
        for (key, entry) in self.entries.iter_mut() {
            if let Entry::Ready(value) = *entry {
                if pred(key, value) {
                    *entry = Entry::PendingDestroy { retire_at };
                    retired.push(value);
                }
            }
        }
        retired
    }

    /// 延迟销毁队列完成销毁之后，PendingDestroy → Destroyed，entry 移出表
    ///
    /// 返回移除的数量
    pub fn mark_destroyed(&mut self, completed: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !matches!(*entry, Entry::PendingDestroy { retire_at } if retire_at <= completed));
        before - self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 根据对象反查 key
    pub fn find_key(&self, value: V) -> Option<K> {
        self.entries.iter().find_map(|(key, entry)| match entry {
            Entry::Ready(v) if *v == value => Some(key.clone()),
            _ => None,
        })
    }

    /// 取出所有 Ready 的对象，用于销毁阶段
    pub fn drain_ready(&mut self) -> Vec<V> {
        let values = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Ready(value) => Some(*value),
                _ => None,
            })
            .collect();
        self.entries.clear();
        values
    }

    #[inline]
    pub fn ready_count(&self) -> usize {
        self.entries.values().filter(|entry| matches!(entry, Entry::Ready(_))).count()
    }

    /// 累计构建次数
    #[inline]
    pub fn build_count(&self) -> usize {
        self.build_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_once_per_key() {
        let mut cache: ObjectCache<String, u64> = ObjectCache::new();
        let mut builds = 0;
        let a = cache.get_or_build(&"a".to_string(), |_| {
            builds += 1;
            10
        });
        let b = cache.get_or_build(&"a".to_string(), |_| {
            builds += 1;
            20
        });
        assert_eq!((a, b), (10, 10));
        assert_eq!(builds, 1);
        assert_eq!(cache.build_count(), 1);
        assert_eq!(cache.state(&"a".to_string()), CacheState::Ready);
        assert_eq!(cache.state(&"b".to_string()), CacheState::Unrequested);
    }

    #[test]
    fn test_state_machine_through_destroy() {
        let mut cache: ObjectCache<u32, u64> = ObjectCache::new();
        cache.get_or_build(&1, |_| 100);

        assert_eq!(cache.retire(&1, 7), Some(100));
        assert_eq!(cache.state(&1), CacheState::PendingDestroy);
        assert_eq!(cache.get(&1), None);
        // 已经是 PendingDestroy，不会重复交出对象
        assert_eq!(cache.retire(&1, 8), None);

        assert_eq!(cache.mark_destroyed(6), 0);
        assert_eq!(cache.state(&1), CacheState::PendingDestroy);
        assert_eq!(cache.mark_destroyed(7), 1);
        assert_eq!(cache.state(&1), CacheState::Unrequested);
        assert!(cache.is_empty());

        // 显式销毁之后再次请求会重新构建
        assert_eq!(cache.get_or_build(&1, |_| 101), 101);
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_retire_where_and_find_key() {
        let mut cache: ObjectCache<u32, u64> = ObjectCache::new();
        for key in 0..6 {
            cache.get_or_build(&key, |k| *k as u64 * 10);
        }
        assert_eq!(cache.find_key(30), Some(3));

        let mut retired = cache.retire_where(1, |key, _| key % 2 == 0);
        retired.sort();
        assert_eq!(retired, vec![0, 20, 40]);
        assert_eq!(cache.ready_count(), 3);
        assert_eq!(cache.find_key(20), None);
    }

    #[test]
    fn test_destroyed_entries_do_not_accumulate() {
        let mut cache: ObjectCache<u32, u64> = ObjectCache::new();
        for round in 0..10 {
            cache.get_or_build(&round, |k| *k as u64);
            cache.retire(&round, round as u64);
            cache.mark_destroyed(round as u64);
        }
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.build_count(), 10);
    }
}
