use ash::vk;
use itertools::Itertools;

use crate::error::VkResultExt;
use crate::foundation::device::GfxDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxPushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}
impl GfxPushConstantRange {
    #[inline]
    pub fn vk_range(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// pipeline layout 的缓存 key，与 render pass 无关，可以在多个 pass 之间复用
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutKey {
    /// 有序，下标即 set 序号
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<GfxPushConstantRange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// descriptor set layout 的缓存 key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetLayoutKey {
    /// 按 binding 排序
    pub bindings: Vec<GfxDescriptorBinding>,
    /// bindless 使用：所有 binding 都是 PARTIALLY_BOUND | UPDATE_AFTER_BIND
    pub update_after_bind: bool,
}
impl DescriptorSetLayoutKey {
    pub fn new(mut bindings: Vec<GfxDescriptorBinding>, update_after_bind: bool) -> Self {
        bindings.sort_by_key(|b| b.binding);
        Self {
            bindings,
            update_after_bind,
        }
    }
}

pub(crate) fn create_vk_pipeline_layout(device: &GfxDevice, key: &PipelineLayoutKey) -> vk::PipelineLayout {
    let ranges = key.push_constant_ranges.iter().map(GfxPushConstantRange::vk_range).collect_vec();
    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&key.set_layouts).push_constant_ranges(&ranges);

    unsafe { device.create_pipeline_layout(&create_info, None).or_fatal("create pipeline layout") }
}

pub(crate) fn create_vk_descriptor_set_layout(
    device: &GfxDevice,
    key: &DescriptorSetLayoutKey,
) -> vk::DescriptorSetLayout {
    let bindings = key
        .bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.descriptor_type)
                .descriptor_count(b.count)
                .stage_flags(b.stages)
        })
        .collect_vec();

    let binding_flags = vec![
        vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
        bindings.len()
    ];
    let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    if key.update_after_bind {
        create_info = create_info
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags_ci);
    }

    unsafe { device.create_descriptor_set_layout(&create_info, None).or_fatal("create descriptor set layout") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_layout_key_ignores_binding_order() {
        let a = GfxDescriptorBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
        };
        let b = GfxDescriptorBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 4,
            stages: vk::ShaderStageFlags::FRAGMENT,
        };
        assert_eq!(DescriptorSetLayoutKey::new(vec![a, b], false), DescriptorSetLayoutKey::new(vec![b, a], false));
        assert_ne!(DescriptorSetLayoutKey::new(vec![a], false), DescriptorSetLayoutKey::new(vec![a], true));
    }
}
