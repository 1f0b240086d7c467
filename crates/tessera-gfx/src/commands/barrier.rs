use ash::vk;
use itertools::Itertools;

/// 抽象的资源访问方式，映射到具体的 (stage, access, layout)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessType {
    /// 没有之前的访问，image 的内容可以丢弃
    Nothing,
    VertexBuffer,
    IndexBuffer,
    UniformRead,
    /// fragment shader 中采样
    FragmentShaderSampled,
    ComputeShaderRead,
    ComputeShaderWrite,
    ColorAttachmentWrite,
    DepthStencilAttachmentWrite,
    TransferRead,
    TransferWrite,
    HostWrite,
    Present,
    /// 任意 stage 的读写，layout 为 GENERAL
    General,
}

/// barrier 使用的 src 或 dst 访问 mask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxAccessMask {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl AccessType {
    pub fn mask(self) -> GfxAccessMask {
        let (stage, access, layout) = match self {
            AccessType::Nothing => {
                (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED)
            }
            AccessType::VertexBuffer => (
                vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                vk::ImageLayout::UNDEFINED,
            ),
            AccessType::IndexBuffer => (
                vk::PipelineStageFlags2::INDEX_INPUT,
                vk::AccessFlags2::INDEX_READ,
                vk::ImageLayout::UNDEFINED,
            ),
            AccessType::UniformRead => (
                vk::PipelineStageFlags2::VERTEX_SHADER
                    | vk::PipelineStageFlags2::FRAGMENT_SHADER
                    | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::UNIFORM_READ,
                vk::ImageLayout::UNDEFINED,
            ),
            AccessType::FragmentShaderSampled => (
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            AccessType::ComputeShaderRead => (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_READ,
                vk::ImageLayout::GENERAL,
            ),
            AccessType::ComputeShaderWrite => (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_WRITE,
                vk::ImageLayout::GENERAL,
            ),
            AccessType::ColorAttachmentWrite => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            AccessType::DepthStencilAttachmentWrite => (
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            AccessType::TransferRead => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            AccessType::TransferWrite => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            AccessType::HostWrite => {
                (vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_WRITE, vk::ImageLayout::GENERAL)
            }
            // present engine 的访问通过 semaphore 同步
            AccessType::Present => {
                (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR)
            }
            AccessType::General => (
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                vk::ImageLayout::GENERAL,
            ),
        };
        GfxAccessMask { stage, access, layout }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessType::ComputeShaderWrite
                | AccessType::ColorAttachmentWrite
                | AccessType::DepthStencilAttachmentWrite
                | AccessType::TransferWrite
                | AccessType::HostWrite
                | AccessType::General
        )
    }
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    ///
    /// 根据前后两次访问设置 stage、access 以及 layout
    #[inline]
    pub fn access(mut self, prev: AccessType, next: AccessType) -> Self {
        let src = prev.mask();
        let dst = next.mask();
        self.inner.src_stage_mask = src.stage;
        // 只有写操作需要 make available
        self.inner.src_access_mask = if prev.is_write() { src.access } else { vk::AccessFlags2::NONE };
        self.inner.dst_stage_mask = dst.stage;
        self.inner.dst_access_mask = dst.access;
        self.inner.old_layout = src.layout;
        self.inner.new_layout = dst.layout;
        self
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.inner.src_queue_family_index = src_queue_family_index;
        self.inner.dst_queue_family_index = dst_queue_family_index;
        self
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    /// layer 和 miplevel 覆盖整个 image
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[derive(Clone, Copy)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn access(mut self, prev: AccessType, next: AccessType) -> Self {
        let src = prev.mask();
        let dst = next.mask();
        self.inner.src_stage_mask = src.stage;
        self.inner.src_access_mask = if prev.is_write() { src.access } else { vk::AccessFlags2::NONE };
        self.inner.dst_stage_mask = dst.stage;
        self.inner.dst_access_mask = dst.access;
        self
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

/// 一次 pipeline barrier 中的所有 image 和 buffer barrier
///
/// 两者都为空的 batch 是合法的，录制时什么也不做
#[derive(Default, Clone)]
pub struct GfxBarrierBatch {
    images: Vec<GfxImageBarrier>,
    buffers: Vec<GfxBufferBarrier>,
}

impl GfxBarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    #[inline]
    pub fn image(mut self, barrier: GfxImageBarrier) -> Self {
        self.images.push(barrier);
        self
    }

    /// builder
    #[inline]
    pub fn buffer(mut self, barrier: GfxBufferBarrier) -> Self {
        self.buffers.push(barrier);
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }

    pub fn vk_image_barriers(&self) -> Vec<vk::ImageMemoryBarrier2<'static>> {
        self.images.iter().map(|b| *b.inner()).collect_vec()
    }

    pub fn vk_buffer_barriers(&self) -> Vec<vk::BufferMemoryBarrier2<'static>> {
        self.buffers.iter().map(|b| *b.inner()).collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let barrier = GfxImageBarrier::new().access(AccessType::Nothing, AccessType::TransferWrite);
        let inner = barrier.inner();
        assert_eq!(inner.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(inner.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(inner.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);

        let barrier = GfxImageBarrier::new().access(AccessType::TransferWrite, AccessType::FragmentShaderSampled);
        let inner = barrier.inner();
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_read_after_read_has_no_src_access() {
        let barrier = GfxBufferBarrier::new().access(AccessType::VertexBuffer, AccessType::TransferWrite);
        assert_eq!(barrier.inner().src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.inner().src_stage_mask, vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT);
        assert_eq!(barrier.inner().size, vk::WHOLE_SIZE);
    }

    #[test]
    fn test_empty_batch() {
        let batch = GfxBarrierBatch::new();
        assert!(batch.is_empty());
        assert!(batch.vk_image_barriers().is_empty());

        let batch = batch.buffer(GfxBufferBarrier::new());
        assert!(!batch.is_empty());
        assert_eq!(batch.vk_buffer_barriers().len(), 1);
    }
}
