use ash::vk;

use crate::cache::factory::GfxObjectFactory;
use crate::cache::gfx_cache::GfxCache;
use crate::cache::pipeline_layout::{DescriptorSetLayoutKey, GfxDescriptorBinding};

/// descriptor set layout 句柄
///
/// 底层的 vk::DescriptorSetLayout 由 [`GfxCache`] 按内容去重，多个句柄可能共享同一个对象；
/// 对象在 cache 销毁时统一释放，句柄本身只记录 binding 信息。
///
/// 和 buffer、image 不同，释放句柄不会把 layout 放进 deferred destroy 队列：
/// 同样 binding 的 layout 之后仍然可以从 cache 中直接取回。
pub struct GfxDescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    key: DescriptorSetLayoutKey,
    debug_name: String,
}

impl GfxDescriptorSetLayout {
    pub fn new<F: GfxObjectFactory>(
        cache: &mut GfxCache<F>,
        bindings: Vec<GfxDescriptorBinding>,
        debug_name: impl AsRef<str>,
    ) -> Self {
        let key = DescriptorSetLayoutKey::new(bindings, false);
        let handle = cache.get_or_create_descriptor_set_layout(&key);
        Self {
            handle,
            key,
            debug_name: debug_name.as_ref().to_string(),
        }
    }
}

// getters
impl GfxDescriptorSetLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    #[inline]
    pub fn bindings(&self) -> &[GfxDescriptorBinding] {
        &self.key.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&GfxDescriptorBinding> {
        self.key.bindings.iter().find(|b| b.binding == binding)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.debug_name
    }
}

// destroy
impl GfxDescriptorSetLayout {
    /// 只放弃句柄，底层对象仍由 cache 持有，直到 [`GfxCache::destroy`]
    pub fn release(self) {
        log::debug!("release descriptor set layout handle: {}", self.debug_name);
    }
}
