use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::cache::key::FloatBits;
use crate::cache::pipeline_layout::GfxPushConstantRange;
use crate::cache::render_pass::RenderPassKey;
use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::device::GfxDevice;

/// 一个 shader stage：module 句柄加入口函数
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxVertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxVertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxRasterState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: bool,
    pub line_width: FloatBits,
}
impl Default for GfxRasterState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: false,
            line_width: 1.0.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDepthState {
    /// None 表示不开启深度测试
    pub compare_op: Option<vk::CompareOp>,
    pub write: bool,
}
impl Default for GfxDepthState {
    fn default() -> Self {
        Self {
            compare_op: Some(vk::CompareOp::LESS),
            write: true,
        }
    }
}

/// 单个 color attachment 的混合状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBlendState {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}
impl GfxBlendState {
    pub fn opaque() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    pub fn alpha_blend() -> Self {
        Self {
            enable: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Self::opaque()
        }
    }

    fn vk_state(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.enable)
            .src_color_blend_factor(self.src_color)
            .dst_color_blend_factor(self.dst_color)
            .color_blend_op(self.color_op)
            .src_alpha_blend_factor(self.src_alpha)
            .dst_alpha_blend_factor(self.dst_alpha)
            .alpha_blend_op(self.alpha_op)
            .color_write_mask(self.write_mask)
    }
}

/// graphics pipeline 的缓存 key
///
/// 包含 shader stages、固定管线状态、顶点布局以及 render pass 的结构
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub stages: Vec<GfxShaderStage>,
    pub vertex_bindings: Vec<GfxVertexBinding>,
    pub vertex_attributes: Vec<GfxVertexAttribute>,
    pub topology: vk::PrimitiveTopology,
    pub raster: GfxRasterState,
    pub depth: GfxDepthState,
    /// 每个 color attachment 一个
    pub blends: Vec<GfxBlendState>,
    pub samples: vk::SampleCountFlags,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub layout: vk::PipelineLayout,
    pub render_pass: RenderPassKey,
    pub subpass: u32,
}
impl PipelineKey {
    pub fn new(layout: vk::PipelineLayout, render_pass: RenderPassKey) -> Self {
        let blends = vec![GfxBlendState::opaque(); render_pass.colors.len()];
        Self {
            stages: vec![],
            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            raster: GfxRasterState::default(),
            depth: GfxDepthState::default(),
            blends,
            samples: vk::SampleCountFlags::TYPE_1,
            // viewport 和 scissor 具体值由 dynamic 决定
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            layout,
            render_pass,
            subpass: 0,
        }
    }

    /// builder
    #[inline]
    pub fn stage(mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule, entry_point: &str) -> Self {
        self.stages.push(GfxShaderStage {
            stage,
            module,
            entry_point: entry_point.to_string(),
        });
        self
    }

    /// builder
    #[inline]
    pub fn vertex_layout(mut self, bindings: Vec<GfxVertexBinding>, attributes: Vec<GfxVertexAttribute>) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    /// 是否引用了某个 shader module
    #[inline]
    pub fn uses_module(&self, module: vk::ShaderModule) -> bool {
        self.stages.iter().any(|s| s.module == module)
    }
}

/// 一次 graphics pipeline 请求
///
/// `push_constants` 是每次 draw 时写入的数据，不参与缓存 key。
/// specialization 值同样不会 bake 进 pipeline，而是作为 push constant 在 draw 时传入，
/// 因此只有这些数据不同的两个描述会命中同一个 pipeline。
///
/// `push_constant_range` 是 layout 中声明的范围（通常来自 [`MergedReflection`]），
/// 写入时的 stage flags 和 offset 都取自这里。
///
/// [`MergedReflection`]: crate::shader::reflect::MergedReflection
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub state: PipelineKey,
    pub push_constant_range: Option<GfxPushConstantRange>,
    pub push_constants: Vec<u8>,
}
impl GraphicsPipelineDesc {
    pub fn new(state: PipelineKey) -> Self {
        Self {
            state,
            push_constant_range: None,
            push_constants: vec![],
        }
    }

    #[inline]
    pub fn with_push_constants(mut self, range: GfxPushConstantRange, data: Vec<u8>) -> Self {
        self.push_constant_range = Some(range);
        self.push_constants = data;
        self
    }

    /// `cmd_push_constants` 的 (stage flags, offset)；没有数据时为 None
    #[inline]
    pub fn push_constant_target(&self) -> Option<(vk::ShaderStageFlags, u32)> {
        push_constant_target(self.push_constant_range, &self.push_constants)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub stage: GfxShaderStage,
    pub layout: vk::PipelineLayout,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc {
    pub state: ComputePipelineKey,
    pub push_constant_range: Option<GfxPushConstantRange>,
    pub push_constants: Vec<u8>,
}
impl ComputePipelineDesc {
    pub fn new(state: ComputePipelineKey) -> Self {
        Self {
            state,
            push_constant_range: None,
            push_constants: vec![],
        }
    }

    #[inline]
    pub fn with_push_constants(mut self, range: GfxPushConstantRange, data: Vec<u8>) -> Self {
        self.push_constant_range = Some(range);
        self.push_constants = data;
        self
    }

    #[inline]
    pub fn push_constant_target(&self) -> Option<(vk::ShaderStageFlags, u32)> {
        push_constant_target(self.push_constant_range, &self.push_constants)
    }
}

/// 数据必须落在 layout 声明的范围内，否则是调用方的错误
fn push_constant_target(range: Option<GfxPushConstantRange>, data: &[u8]) -> Option<(vk::ShaderStageFlags, u32)> {
    if data.is_empty() {
        return None;
    }
    let Some(range) = range else {
        gfx_fatal!("{} bytes of push constants without a push constant range", data.len());
    };
    if data.len() as u64 > range.size as u64 {
        gfx_fatal!(
            "{} bytes of push constants exceed the layout range (offset {}, size {})",
            data.len(),
            range.offset,
            range.size
        );
    }
    Some((range.stages, range.offset))
}

pub(crate) fn create_vk_graphics_pipeline(
    device: &GfxDevice,
    key: &PipelineKey,
    render_pass: vk::RenderPass,
) -> vk::Pipeline {
    let entry_names = key.stages.iter().map(|s| CString::new(s.entry_point.as_str()).unwrap_or_default()).collect_vec();
    let shader_stages_info = key
        .stages
        .iter()
        .zip(entry_names.iter())
        .map(|(stage, name)| {
            vk::PipelineShaderStageCreateInfo::default().stage(stage.stage).module(stage.module).name(name.as_c_str())
        })
        .collect_vec();

    let vertex_bindings = key
        .vertex_bindings
        .iter()
        .map(|b| vk::VertexInputBindingDescription {
            binding: b.binding,
            stride: b.stride,
            input_rate: b.input_rate,
        })
        .collect_vec();
    let vertex_attributes = key
        .vertex_attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.binding,
            format: a.format,
            offset: a.offset,
        })
        .collect_vec();
    let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(key.topology)
        .primitive_restart_enable(false);

    // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
    let viewport_info = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let rasterize_info = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(key.raster.polygon_mode)
        .cull_mode(key.raster.cull_mode)
        .front_face(key.raster.front_face)
        .depth_bias_enable(key.raster.depth_bias)
        .line_width(key.raster.line_width.get());

    let msaa_info = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(key.samples);

    let blend_states = key.blends.iter().map(GfxBlendState::vk_state).collect_vec();
    let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_states)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(key.depth.compare_op.is_some())
        .depth_write_enable(key.depth.write)
        .depth_compare_op(key.depth.compare_op.unwrap_or(vk::CompareOp::NEVER))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&key.dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages_info)
        .vertex_input_state(&vertex_input_state_info)
        .input_assembly_state(&input_assembly_info)
        .viewport_state(&viewport_info)
        .rasterization_state(&rasterize_info)
        .multisample_state(&msaa_info)
        .color_blend_state(&color_blend_info)
        .depth_stencil_state(&depth_stencil_info)
        .dynamic_state(&dynamic_state_info)
        .layout(key.layout)
        .render_pass(render_pass)
        .subpass(key.subpass);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
            .map_err(|(_, e)| e)
            .or_fatal("create graphics pipeline")
    };
    pipelines[0]
}

pub(crate) fn create_vk_compute_pipeline(device: &GfxDevice, key: &ComputePipelineKey) -> vk::Pipeline {
    let entry_name = CString::new(key.stage.entry_point.as_str()).unwrap_or_default();
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(key.stage.module)
        .name(entry_name.as_c_str());
    let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(key.layout);

    let pipelines = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
            .map_err(|(_, e)| e)
            .or_fatal("create compute pipeline")
    };
    pipelines[0]
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn vs_fs_key() -> PipelineKey {
        PipelineKey::new(vk::PipelineLayout::from_raw(1), RenderPassKey::new())
            .stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::from_raw(2), "main")
            .stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::from_raw(3), "main")
    }

    #[test]
    fn test_push_constants_use_layout_stages_and_offset() {
        // 只有 vertex stage 声明了 push constant block
        let range = GfxPushConstantRange {
            stages: vk::ShaderStageFlags::VERTEX,
            offset: 16,
            size: 64,
        };
        let desc = GraphicsPipelineDesc::new(vs_fs_key()).with_push_constants(range, vec![0; 64]);

        let (stages, offset) = desc.push_constant_target().unwrap();
        assert_eq!(stages, vk::ShaderStageFlags::VERTEX);
        assert!(!stages.contains(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(offset, 16);
    }

    #[test]
    fn test_no_push_constant_data_writes_nothing() {
        assert_eq!(GraphicsPipelineDesc::new(vs_fs_key()).push_constant_target(), None);
    }

    #[test]
    #[should_panic(expected = "without a push constant range")]
    fn test_push_constant_data_without_range_is_fatal() {
        let mut desc = GraphicsPipelineDesc::new(vs_fs_key());
        desc.push_constants = vec![1, 2, 3, 4];
        desc.push_constant_target();
    }

    #[test]
    #[should_panic(expected = "exceed the layout range")]
    fn test_push_constant_data_larger_than_range_is_fatal() {
        let key = ComputePipelineKey {
            stage: GfxShaderStage {
                stage: vk::ShaderStageFlags::COMPUTE,
                module: vk::ShaderModule::from_raw(4),
                entry_point: "main".to_string(),
            },
            layout: vk::PipelineLayout::from_raw(5),
        };
        let range = GfxPushConstantRange {
            stages: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: 8,
        };
        ComputePipelineDesc::new(key).with_push_constants(range, vec![0; 12]).push_constant_target();
    }
}
