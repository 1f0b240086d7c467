use ash::vk;
use itertools::Itertools;

use crate::error::VkResultExt;
use crate::foundation::device::GfxDevice;

/// 一个 attachment 的格式、load/store 以及 layout 变换
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxAttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}
impl GfxAttachmentDesc {
    /// 每帧清空后写入的 color attachment
    pub fn color(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// 每帧清空、不需要保留的 depth attachment
    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    /// builder
    #[inline]
    pub fn load_store(mut self, load_op: vk::AttachmentLoadOp, store_op: vk::AttachmentStoreOp) -> Self {
        self.load_op = load_op;
        self.store_op = store_op;
        self
    }

    /// builder
    #[inline]
    pub fn layouts(mut self, initial_layout: vk::ImageLayout, final_layout: vk::ImageLayout) -> Self {
        self.initial_layout = initial_layout;
        self.final_layout = final_layout;
        self
    }

    fn vk_desc(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(self.stencil_load_op)
            .stencil_store_op(self.stencil_store_op)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// render pass 的缓存 key：所有 color attachment 加上可选的 depth attachment，单个 subpass
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct RenderPassKey {
    pub colors: Vec<GfxAttachmentDesc>,
    pub depth: Option<GfxAttachmentDesc>,
}
impl RenderPassKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    #[inline]
    pub fn color(mut self, attachment: GfxAttachmentDesc) -> Self {
        self.colors.push(attachment);
        self
    }

    /// builder
    #[inline]
    pub fn depth(mut self, attachment: GfxAttachmentDesc) -> Self {
        self.depth = Some(attachment);
        self
    }

    /// framebuffer 需要的 image view 数量
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.colors.len() + self.depth.iter().len()
    }
}

/// 一次 render pass 请求：结构（参与缓存）以及本帧具体的 image view（不参与缓存）
pub struct RenderPassDesc<'a> {
    pub key: RenderPassKey,
    /// 顺序与 key 中的 attachment 一致，depth 在最后
    pub views: &'a [vk::ImageView],
    pub extent: vk::Extent2D,
}

/// 缓存的 render pass 加上本帧新建的 framebuffer
#[derive(Clone, Copy, Debug)]
pub struct RenderPassBinding {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

pub(crate) fn create_vk_render_pass(device: &GfxDevice, key: &RenderPassKey) -> vk::RenderPass {
    let attachments = key.colors.iter().chain(key.depth.iter()).map(GfxAttachmentDesc::vk_desc).collect_vec();

    let color_refs = (0..key.colors.len())
        .map(|idx| {
            vk::AttachmentReference::default()
                .attachment(idx as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        })
        .collect_vec();
    let depth_ref = vk::AttachmentReference::default()
        .attachment(key.colors.len() as u32)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if key.depth.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    // 等待之前对 attachment 的读写完成
    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    unsafe { device.create_render_pass(&create_info, None).or_fatal("create render pass") }
}

pub(crate) fn create_vk_framebuffer(
    device: &GfxDevice,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> vk::Framebuffer {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.create_framebuffer(&create_info, None).or_fatal("create framebuffer") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::content_hash;

    #[test]
    fn test_identical_descriptions_share_key() {
        let a = RenderPassKey::new()
            .color(GfxAttachmentDesc::color(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR))
            .depth(GfxAttachmentDesc::depth(vk::Format::D32_SFLOAT));
        let b = RenderPassKey::new()
            .color(GfxAttachmentDesc::color(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR))
            .depth(GfxAttachmentDesc::depth(vk::Format::D32_SFLOAT));
        assert_eq!(a, b);
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(a.attachment_count(), 2);
    }

    #[test]
    fn test_load_op_changes_key() {
        let clear = GfxAttachmentDesc::color(vk::Format::R8G8B8A8_UNORM, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let load = clear.load_store(vk::AttachmentLoadOp::LOAD, vk::AttachmentStoreOp::STORE);
        assert_ne!(RenderPassKey::new().color(clear), RenderPassKey::new().color(load));
    }
}
