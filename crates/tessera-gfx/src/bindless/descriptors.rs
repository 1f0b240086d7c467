use ash::vk;
use itertools::Itertools;

use crate::bindless::table::{BindlessTable, BindlessWrite};
use crate::cache::gfx_cache::GfxCache;
use crate::cache::pipeline_layout::{DescriptorSetLayoutKey, GfxDescriptorBinding};
use crate::config::BindlessConfig;
use crate::error::VkResultExt;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;

pub const TEXTURE_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const STORAGE_IMAGE_BINDING: u32 = 2;

/// bindless 表在设备上的部分：一个 UPDATE_AFTER_BIND 的 pool 和一个 descriptor set
///
/// layout 来自 [`GfxCache`]，由缓存负责销毁
pub struct BindlessDescriptors {
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
}

impl DebugType for BindlessDescriptors {
    fn debug_type_name() -> &'static str {
        "BindlessDescriptors"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.set
    }
}

// new & init
impl BindlessDescriptors {
    pub fn new(device: &GfxDevice, cache: &mut GfxCache<GfxDevice>, config: &BindlessConfig) -> Self {
        let layout = cache.get_or_create_descriptor_set_layout(&Self::layout_key(config));

        let pool_sizes = [
            (vk::DescriptorType::SAMPLED_IMAGE, config.max_textures),
            (vk::DescriptorType::SAMPLER, config.max_samplers),
            (vk::DescriptorType::STORAGE_IMAGE, config.max_storage_images),
        ]
        .iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: *ty,
            descriptor_count: *count,
        })
        .collect_vec();
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None).or_fatal("create bindless descriptor pool") };
        device.set_object_debug_name(pool, "DescriptorPool::bindless");

        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info).or_fatal("allocate bindless descriptor set") };

        let descriptors = Self {
            pool,
            layout,
            set: sets[0],
        };
        device.set_debug_name(&descriptors, "bindless");
        log::info!(
            "bindless table: {} textures, {} samplers, {} storage images",
            config.max_textures,
            config.max_samplers,
            config.max_storage_images
        );
        descriptors
    }

    /// 所有 binding 都是 PARTIALLY_BOUND | UPDATE_AFTER_BIND
    pub fn layout_key(config: &BindlessConfig) -> DescriptorSetLayoutKey {
        let stages = vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE;
        DescriptorSetLayoutKey::new(
            vec![
                GfxDescriptorBinding {
                    binding: TEXTURE_BINDING,
                    descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                    count: config.max_textures,
                    stages,
                },
                GfxDescriptorBinding {
                    binding: SAMPLER_BINDING,
                    descriptor_type: vk::DescriptorType::SAMPLER,
                    count: config.max_samplers,
                    stages,
                },
                GfxDescriptorBinding {
                    binding: STORAGE_IMAGE_BINDING,
                    descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                    count: config.max_storage_images,
                    stages,
                },
            ],
            true,
        )
    }
}

// update
impl BindlessDescriptors {
    /// # Phase: Before Render
    ///
    /// 将 table 中等待写入的项写入 descriptor set
    pub fn flush(&self, device: &GfxDevice, table: &mut BindlessTable) {
        let writes = table.take_writes();
        if writes.is_empty() {
            return;
        }
        let _span = tracy_client::span!("BindlessDescriptors::flush");

        let image_infos = writes
            .iter()
            .map(|w| match *w {
                BindlessWrite::Texture { view, .. } => vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                BindlessWrite::Sampler { sampler, .. } => vk::DescriptorImageInfo::default().sampler(sampler),
                BindlessWrite::StorageImage { view, .. } => {
                    vk::DescriptorImageInfo::default().image_view(view).image_layout(vk::ImageLayout::GENERAL)
                }
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .zip(image_infos.iter())
            .map(|(w, info)| {
                let (binding, slot, ty) = match *w {
                    BindlessWrite::Texture { slot, .. } => (TEXTURE_BINDING, slot, vk::DescriptorType::SAMPLED_IMAGE),
                    BindlessWrite::Sampler { slot, .. } => (SAMPLER_BINDING, slot, vk::DescriptorType::SAMPLER),
                    BindlessWrite::StorageImage { slot, .. } => {
                        (STORAGE_IMAGE_BINDING, slot, vk::DescriptorType::STORAGE_IMAGE)
                    }
                };
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(binding)
                    .dst_array_element(slot)
                    .descriptor_type(ty)
                    .image_info(std::slice::from_ref(info))
            })
            .collect_vec();

        unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
    }
}

// getters
impl BindlessDescriptors {
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}

// destroy
impl BindlessDescriptors {
    /// descriptor set 跟随 pool 一起销毁
    pub fn destroy(self, device: &GfxDevice) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}
