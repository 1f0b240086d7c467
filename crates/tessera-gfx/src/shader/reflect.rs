use std::collections::BTreeMap;

use ash::vk;
use itertools::Itertools;

use crate::cache::pipeline::{GfxVertexAttribute, GfxVertexBinding};
use crate::cache::pipeline_layout::{DescriptorSetLayoutKey, GfxDescriptorBinding, GfxPushConstantRange};
use crate::error::ShaderError;

/// 顶点输入的基础类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderBaseType {
    Float,
    Sint,
    Uint,
}

/// 根据基础类型、位宽以及分量数推导顶点格式
pub fn vertex_format(base_type: ShaderBaseType, bit_width: u32, components: u32) -> Option<vk::Format> {
    use ShaderBaseType::*;
    let format = match (base_type, bit_width, components) {
        (Float, 32, 1) => vk::Format::R32_SFLOAT,
        (Float, 32, 2) => vk::Format::R32G32_SFLOAT,
        (Float, 32, 3) => vk::Format::R32G32B32_SFLOAT,
        (Float, 32, 4) => vk::Format::R32G32B32A32_SFLOAT,
        (Float, 16, 1) => vk::Format::R16_SFLOAT,
        (Float, 16, 2) => vk::Format::R16G16_SFLOAT,
        (Float, 16, 4) => vk::Format::R16G16B16A16_SFLOAT,
        (Float, 64, 1) => vk::Format::R64_SFLOAT,
        (Float, 64, 2) => vk::Format::R64G64_SFLOAT,
        (Sint, 32, 1) => vk::Format::R32_SINT,
        (Sint, 32, 2) => vk::Format::R32G32_SINT,
        (Sint, 32, 3) => vk::Format::R32G32B32_SINT,
        (Sint, 32, 4) => vk::Format::R32G32B32A32_SINT,
        (Uint, 32, 1) => vk::Format::R32_UINT,
        (Uint, 32, 2) => vk::Format::R32G32_UINT,
        (Uint, 32, 3) => vk::Format::R32G32B32_UINT,
        (Uint, 32, 4) => vk::Format::R32G32B32A32_UINT,
        _ => return None,
    };
    Some(format)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReflectedVertexAttribute {
    pub location: u32,
    pub base_type: ShaderBaseType,
    pub bit_width: u32,
    pub components: u32,
    pub format: vk::Format,
}
impl ReflectedVertexAttribute {
    pub fn new(location: u32, base_type: ShaderBaseType, bit_width: u32, components: u32) -> Option<Self> {
        Some(Self {
            location,
            base_type,
            bit_width,
            components,
            format: vertex_format(base_type, bit_width, components)?,
        })
    }

    #[inline]
    pub fn byte_size(&self) -> u32 {
        self.bit_width / 8 * self.components
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// 数组长度，非数组为 1
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// push constant block 中实际使用的字节范围：(最小 offset, 最大 offset + size)
pub fn active_push_constant_range(members: &[(u32, u32)]) -> Option<(u32, u32)> {
    let start = members.iter().map(|(offset, _)| *offset).min()?;
    let end = members.iter().map(|(offset, size)| offset + size).max()?;
    Some((start, end - start))
}

const SPIRV_MAGIC: u32 = 0x0723_0203;
const SPIRV_HEADER_WORDS: usize = 5;

/// 一个 shader stage 的反射结果，每次编译生成一次并缓存
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderReflection {
    pub stage: vk::ShaderStageFlags,
    /// 按 location 排序，与源码中的声明顺序无关
    pub vertex_attributes: Vec<ReflectedVertexAttribute>,
    pub bindings: Vec<ReflectedBinding>,
    pub push_constant: Option<GfxPushConstantRange>,
}

// new & init
impl ShaderReflection {
    pub fn new(
        stage: vk::ShaderStageFlags,
        mut vertex_attributes: Vec<ReflectedVertexAttribute>,
        mut bindings: Vec<ReflectedBinding>,
        push_constant: Option<GfxPushConstantRange>,
    ) -> Self {
        vertex_attributes.sort_by_key(|a| a.location);
        bindings.sort_by_key(|b| (b.set, b.binding));
        Self {
            stage,
            vertex_attributes,
            bindings,
            push_constant,
        }
    }

    /// 从 SPIR-V 中读取 `entry_point` 用到的资源
    pub fn from_spirv(code: &[u32], entry_point: &str, stage: vk::ShaderStageFlags) -> Result<Self, ShaderError> {
        use spirq::ty::{DescriptorType, ScalarType, Type};
        use spirq::var::Variable;

        // spirq 假定 header 完整，header 不完整时会直接 panic
        if code.len() < SPIRV_HEADER_WORDS {
            return Err(ShaderError::Reflection(format!(
                "spir-v is {} words, shorter than its {}-word header",
                code.len(),
                SPIRV_HEADER_WORDS
            )));
        }
        if code[0] != SPIRV_MAGIC {
            return Err(ShaderError::Reflection(format!("bad spir-v magic number {:#010x}", code[0])));
        }

        let entry_points = spirq::ReflectConfig::new()
            .spv(code)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| ShaderError::Reflection(format!("{:?}", e)))?;
        let entry = entry_points
            .iter()
            .find(|ep| ep.name == entry_point)
            .ok_or_else(|| ShaderError::Reflection(format!("entry point `{}` not found", entry_point)))?;

        let mut vertex_attributes = vec![];
        let mut bindings = vec![];
        let mut push_constant = None;

        for var in entry.vars.iter() {
            match var {
                Variable::Input { location, ty, .. } if stage == vk::ShaderStageFlags::VERTEX => {
                    let (scalar, components) = match ty {
                        Type::Scalar(s) => (s, 1),
                        Type::Vector(v) => (&v.scalar_ty, v.nscalar),
                        other => {
                            return Err(ShaderError::Reflection(format!("unsupported vertex input type {:?}", other)));
                        }
                    };
                    let (base_type, bit_width) = match scalar {
                        ScalarType::Float { bits } => (ShaderBaseType::Float, *bits),
                        ScalarType::Integer { bits, is_signed: true } => (ShaderBaseType::Sint, *bits),
                        ScalarType::Integer { bits, is_signed: false } => (ShaderBaseType::Uint, *bits),
                        other => {
                            return Err(ShaderError::Reflection(format!("unsupported vertex input scalar {:?}", other)));
                        }
                    };
                    let attribute = ReflectedVertexAttribute::new(location.loc(), base_type, bit_width, components)
                        .ok_or_else(|| {
                            ShaderError::Reflection(format!(
                                "no vertex format for {:?}{}x{} at location {}",
                                base_type,
                                bit_width,
                                components,
                                location.loc()
                            ))
                        })?;
                    vertex_attributes.push(attribute);
                }
                Variable::Descriptor {
                    desc_bind,
                    desc_ty,
                    nbind,
                    ..
                } => {
                    let descriptor_type = match desc_ty {
                        DescriptorType::UniformBuffer(..) => vk::DescriptorType::UNIFORM_BUFFER,
                        DescriptorType::StorageBuffer(..) => vk::DescriptorType::STORAGE_BUFFER,
                        DescriptorType::CombinedImageSampler(..) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        DescriptorType::SampledImage(..) => vk::DescriptorType::SAMPLED_IMAGE,
                        DescriptorType::Sampler(..) => vk::DescriptorType::SAMPLER,
                        DescriptorType::StorageImage(..) => vk::DescriptorType::STORAGE_IMAGE,
                        other => {
                            return Err(ShaderError::Reflection(format!("unsupported descriptor type {:?}", other)));
                        }
                    };
                    bindings.push(ReflectedBinding {
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        descriptor_type,
                        // 运行时长度的数组 nbind 为 0，按 1 处理
                        count: (*nbind).max(1),
                        stages: stage,
                    });
                }
                Variable::PushConstant { ty, .. } => {
                    let members = match ty {
                        Type::Struct(st) => st
                            .members
                            .iter()
                            .filter_map(|m| Some((m.offset? as u32, m.ty.nbyte()? as u32)))
                            .collect_vec(),
                        _ => vec![],
                    };
                    push_constant = active_push_constant_range(&members).map(|(offset, size)| GfxPushConstantRange {
                        stages: stage,
                        offset,
                        size,
                    });
                }
                _ => {}
            }
        }

        Ok(Self::new(stage, vertex_attributes, bindings, push_constant))
    }

    /// 使用调用者声明的 push constant 范围替代反射得到的范围
    pub fn with_push_constant_override(mut self, offset: u32, size: u32) -> Self {
        self.push_constant = Some(GfxPushConstantRange {
            stages: self.stage,
            offset,
            size,
        });
        self
    }
}

// tools
impl ShaderReflection {
    /// 单个 vertex buffer，attribute 按 location 顺序紧密排列
    pub fn vertex_layout(&self, binding: u32) -> (Vec<GfxVertexBinding>, Vec<GfxVertexAttribute>) {
        if self.vertex_attributes.is_empty() {
            return (vec![], vec![]);
        }

        let mut offset = 0;
        let attributes = self
            .vertex_attributes
            .iter()
            .map(|a| {
                let attribute = GfxVertexAttribute {
                    location: a.location,
                    binding,
                    format: a.format,
                    offset,
                };
                offset += a.byte_size();
                attribute
            })
            .collect_vec();
        let bindings = vec![GfxVertexBinding {
            binding,
            stride: offset,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        (bindings, attributes)
    }

    /// 合并多个 stage 的反射结果：同一 (set, binding) 的 stage flags 取并集，push constant 范围取并集
    pub fn merge(reflections: &[ShaderReflection]) -> Result<MergedReflection, ShaderError> {
        let mut sets: BTreeMap<u32, BTreeMap<u32, ReflectedBinding>> = BTreeMap::new();
        let mut push_constant: Option<GfxPushConstantRange> = None;

        for reflection in reflections {
            for binding in &reflection.bindings {
                let set = sets.entry(binding.set).or_default();
                match set.get_mut(&binding.binding) {
                    Some(existing) => {
                        if existing.descriptor_type != binding.descriptor_type || existing.count != binding.count {
                            return Err(ShaderError::Reflection(format!(
                                "binding (set={}, binding={}) differs between stages: {:?} vs {:?}",
                                binding.set, binding.binding, existing.descriptor_type, binding.descriptor_type
                            )));
                        }
                        existing.stages |= binding.stages;
                    }
                    None => {
                        set.insert(binding.binding, *binding);
                    }
                }
            }

            if let Some(range) = reflection.push_constant {
                push_constant = Some(match push_constant {
                    None => range,
                    Some(merged) => {
                        let start = merged.offset.min(range.offset);
                        let end = (merged.offset + merged.size).max(range.offset + range.size);
                        GfxPushConstantRange {
                            stages: merged.stages | range.stages,
                            offset: start,
                            size: end - start,
                        }
                    }
                });
            }
        }

        let sets = sets
            .into_iter()
            .map(|(set, bindings)| {
                let bindings = bindings
                    .into_values()
                    .map(|b| GfxDescriptorBinding {
                        binding: b.binding,
                        descriptor_type: b.descriptor_type,
                        count: b.count,
                        stages: b.stages,
                    })
                    .collect_vec();
                (set, bindings)
            })
            .collect();

        Ok(MergedReflection { sets, push_constant })
    }
}

/// 一个 pipeline 所有 stage 合并后的布局
#[derive(Clone, Debug, PartialEq)]
pub struct MergedReflection {
    pub sets: BTreeMap<u32, Vec<GfxDescriptorBinding>>,
    pub push_constant: Option<GfxPushConstantRange>,
}
impl MergedReflection {
    /// 从 set 0 到最大的 set 序号，中间没有用到的 set 为空 layout
    pub fn set_layout_keys(&self) -> Vec<DescriptorSetLayoutKey> {
        let Some(max_set) = self.sets.keys().max().copied() else {
            return vec![];
        };
        (0..=max_set)
            .map(|set| DescriptorSetLayoutKey::new(self.sets.get(&set).cloned().unwrap_or_default(), false))
            .collect()
    }

    #[inline]
    pub fn push_constant_ranges(&self) -> Vec<GfxPushConstantRange> {
        self.push_constant.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(location: u32, components: u32) -> ReflectedVertexAttribute {
        ReflectedVertexAttribute::new(location, ShaderBaseType::Float, 32, components).unwrap()
    }

    #[test]
    fn test_vertex_format_from_base_type_and_width() {
        assert_eq!(vertex_format(ShaderBaseType::Float, 32, 3), Some(vk::Format::R32G32B32_SFLOAT));
        assert_eq!(vertex_format(ShaderBaseType::Uint, 32, 4), Some(vk::Format::R32G32B32A32_UINT));
        assert_eq!(vertex_format(ShaderBaseType::Float, 16, 2), Some(vk::Format::R16G16_SFLOAT));
        assert_eq!(vertex_format(ShaderBaseType::Sint, 8, 3), None);
    }

    #[test]
    fn test_attributes_ordered_by_location() {
        // 声明顺序：uv(2), position(0), normal(1)
        let reflection =
            ShaderReflection::new(vk::ShaderStageFlags::VERTEX, vec![attr(2, 2), attr(0, 3), attr(1, 3)], vec![], None);
        let locations = reflection.vertex_attributes.iter().map(|a| a.location).collect_vec();
        assert_eq!(locations, vec![0, 1, 2]);

        let (bindings, attributes) = reflection.vertex_layout(0);
        assert_eq!(bindings[0].stride, 12 + 12 + 8);
        assert_eq!(attributes.iter().map(|a| a.offset).collect_vec(), vec![0, 12, 24]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_push_constant_active_range() {
        assert_eq!(active_push_constant_range(&[(16, 16), (0, 4), (32, 8)]), Some((0, 40)));
        assert_eq!(active_push_constant_range(&[(64, 16)]), Some((64, 16)));
        assert_eq!(active_push_constant_range(&[]), None);

        let reflection = ShaderReflection::new(vk::ShaderStageFlags::FRAGMENT, vec![], vec![], None)
            .with_push_constant_override(0, 128);
        assert_eq!(reflection.push_constant.map(|r| r.size), Some(128));
    }

    #[test]
    fn test_merge_stages() {
        let ubo = |stage| ReflectedBinding {
            set: 0,
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: stage,
        };
        let texture = ReflectedBinding {
            set: 2,
            binding: 1,
            descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
            count: 16,
            stages: vk::ShaderStageFlags::FRAGMENT,
        };
        let vs = ShaderReflection::new(
            vk::ShaderStageFlags::VERTEX,
            vec![],
            vec![ubo(vk::ShaderStageFlags::VERTEX)],
            Some(GfxPushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 64,
            }),
        );
        let fs = ShaderReflection::new(
            vk::ShaderStageFlags::FRAGMENT,
            vec![],
            vec![texture, ubo(vk::ShaderStageFlags::FRAGMENT)],
            Some(GfxPushConstantRange {
                stages: vk::ShaderStageFlags::FRAGMENT,
                offset: 64,
                size: 16,
            }),
        );

        let merged = ShaderReflection::merge(&[vs, fs]).unwrap();
        assert_eq!(merged.sets[&0][0].stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            merged.push_constant,
            Some(GfxPushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: 80,
            })
        );

        let keys = merged.set_layout_keys();
        assert_eq!(keys.len(), 3);
        assert!(keys[1].bindings.is_empty());
        assert_eq!(keys[2].bindings[0].count, 16);
    }

    #[test]
    fn test_merge_rejects_conflicting_bindings() {
        let binding = |ty| ReflectedBinding {
            set: 0,
            binding: 3,
            descriptor_type: ty,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
        };
        let a = ShaderReflection::new(
            vk::ShaderStageFlags::VERTEX,
            vec![],
            vec![binding(vk::DescriptorType::UNIFORM_BUFFER)],
            None,
        );
        let b = ShaderReflection::new(
            vk::ShaderStageFlags::FRAGMENT,
            vec![],
            vec![binding(vk::DescriptorType::STORAGE_BUFFER)],
            None,
        );
        assert!(ShaderReflection::merge(&[a, b]).is_err());
    }

    #[test]
    fn test_invalid_spirv_is_reflection_error() {
        let err = ShaderReflection::from_spirv(&[0xdead_beef, 0, 0], "main", vk::ShaderStageFlags::VERTEX);
        assert!(matches!(err, Err(ShaderError::Reflection(_))));
    }

    #[test]
    fn test_truncated_spirv_is_reflection_error() {
        // magic 正确，但 header 不完整
        let err = ShaderReflection::from_spirv(&[SPIRV_MAGIC, 0x0001_0000], "main", vk::ShaderStageFlags::VERTEX);
        assert!(matches!(err, Err(ShaderError::Reflection(msg)) if msg.contains("header")));

        let empty = ShaderReflection::from_spirv(&[], "main", vk::ShaderStageFlags::FRAGMENT);
        assert!(matches!(empty, Err(ShaderError::Reflection(_))));
    }

    #[test]
    fn test_wrong_magic_is_reflection_error() {
        let code = [0xdead_beef, 0x0001_0000, 0, 8, 0];
        let err = ShaderReflection::from_spirv(&code, "main", vk::ShaderStageFlags::COMPUTE);
        assert!(matches!(err, Err(ShaderError::Reflection(msg)) if msg.contains("magic")));
    }
}
