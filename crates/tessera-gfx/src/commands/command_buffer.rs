use std::ffi::CString;
use std::rc::Rc;

use ash::vk;

use crate::bindless::descriptors::BindlessDescriptors;
use crate::cache::gfx_cache::GfxCache;
use crate::cache::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::cache::render_pass::RenderPassBinding;
use crate::commands::barrier::GfxBarrierBatch;
use crate::commands::command_pool::GfxCommandPool;
use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::GfxDevice;

pub struct LabelColor;
impl LabelColor {
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);

    pub const COLOR_PASS: glam::Vec4 = Self::BLUE;
    pub const COLOR_STAGE: glam::Vec4 = Self::YELLOW;
    pub const COLOR_CMD: glam::Vec4 = Self::GREEN;
}

/// render pass 的嵌套检查
///
/// 没有配对的 end，或者在 end 之前再次 begin，都属于调用者的错误
#[derive(Debug, Default)]
pub struct RenderPassTracker {
    current: Option<String>,
}

impl RenderPassTracker {
    pub fn begin(&mut self, name: &str) {
        if let Some(current) = &self.current {
            gfx_fatal!("render pass `{}` begun while `{}` is still open", name, current);
        }
        self.current = Some(name.to_string());
    }

    pub fn end(&mut self) {
        if self.current.take().is_none() {
            gfx_fatal!("end render pass without a matching begin");
        }
    }

    #[inline]
    pub fn require_inside(&self, op: &str) {
        if self.current.is_none() {
            gfx_fatal!("{} recorded outside of a render pass", op);
        }
    }

    #[inline]
    pub fn require_outside(&self, op: &str) {
        if let Some(current) = &self.current {
            gfx_fatal!("{} recorded inside render pass `{}`", op, current);
        }
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        self.current.is_some()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// 命令缓冲封装
///
/// 单线程录制，不做任何加锁。render pass 的嵌套在录制时检查，错误的嵌套会直接终止。
///
/// # 使用示例
/// ```ignore
/// let mut cmd = queue.alloc_command_buffer("my-pass");
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "my-pass");
/// cmd.begin_render_pass(&binding, &clear_values, "forward");
/// cmd.bind_graphics_pipeline(&mut cache, &desc);
/// cmd.cmd_draw(3, 1, 0, 0);
/// cmd.end_render_pass();
/// cmd.end();
/// ```
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    command_pool_handle: vk::CommandPool,
    render_pass: RenderPassTracker,

    device: Rc<GfxDevice>,
    name: String,
}

// new & init
impl GfxCommandBuffer {
    pub fn new(device: Rc<GfxDevice>, command_pool: &GfxCommandPool, debug_name: &str) -> Self {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer =
            unsafe { device.allocate_command_buffers(&info).or_fatal("allocate command buffer")[0] };
        let cmd_buffer = GfxCommandBuffer {
            vk_handle: command_buffer,
            command_pool_handle: command_pool.handle(),
            render_pass: RenderPassTracker::default(),
            device,
            name: debug_name.to_string(),
        };
        cmd_buffer.device.set_debug_name(&cmd_buffer, debug_name);
        cmd_buffer
    }
}

// Basic 命令
impl GfxCommandBuffer {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&mut self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) {
        self.render_pass.reset();
        unsafe {
            self.device
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))
                .or_fatal("begin command buffer");
        }
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
    }

    /// 结束录制 command
    ///
    /// 结束 debug label
    #[inline]
    pub fn end(&mut self) {
        self.render_pass.require_outside("end command buffer");
        self.end_label();
        unsafe { self.device.end_command_buffer(self.vk_handle).or_fatal("end command buffer") }
    }

    /// 回到初始状态，需要 pool 带有 RESET_COMMAND_BUFFER
    pub fn reset(&mut self) {
        self.render_pass.reset();
        unsafe {
            self.device
                .reset_command_buffer(self.vk_handle, vk::CommandBufferResetFlags::empty())
                .or_fatal("reset command buffer");
        }
    }
}

// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn command_pool_handle(&self) -> vk::CommandPool {
        self.command_pool_handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// render pass
impl GfxCommandBuffer {
    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn begin_render_pass(&mut self, binding: &RenderPassBinding, clear_values: &[vk::ClearValue], label: &str) {
        self.render_pass.begin(label);
        self.begin_label(label, LabelColor::COLOR_PASS);

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: binding.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(binding.render_pass)
            .framebuffer(binding.framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(self.vk_handle, &begin_info, vk::SubpassContents::INLINE);
        }

        // 默认的 viewport 和 scissor 覆盖整个 render area，y 轴翻转
        let viewport = vk::Viewport {
            x: 0.0,
            y: binding.extent.height as f32,
            width: binding.extent.width as f32,
            height: -(binding.extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.cmd_set_viewport(0, std::slice::from_ref(&viewport));
        self.cmd_set_scissor(0, std::slice::from_ref(&render_area));
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn end_render_pass(&mut self) {
        self.render_pass.end();
        unsafe {
            self.device.cmd_end_render_pass(self.vk_handle);
        }
        self.end_label();
    }
}

// pipeline 绑定
impl GfxCommandBuffer {
    /// 从缓存中取得 pipeline 并绑定，描述中的 push constant 数据按 layout 声明的范围写入
    ///
    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_graphics_pipeline(&self, cache: &mut GfxCache<GfxDevice>, desc: &GraphicsPipelineDesc) -> vk::Pipeline {
        let pipeline = cache.get_or_create_pipeline(desc);
        self.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        if let Some((stages, offset)) = desc.push_constant_target() {
            self.cmd_push_constants(desc.state.layout, stages, offset, &desc.push_constants);
        }
        pipeline
    }

    /// - command type: state
    /// - supported queue types: compute
    pub fn bind_compute_pipeline(&self, cache: &mut GfxCache<GfxDevice>, desc: &ComputePipelineDesc) -> vk::Pipeline {
        self.render_pass.require_outside("bind compute pipeline");
        let pipeline = cache.get_or_create_compute_pipeline(desc);
        self.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
        if let Some((stages, offset)) = desc.push_constant_target() {
            self.cmd_push_constants(desc.state.layout, stages, offset, &desc.push_constants);
        }
        pipeline
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: Option<&[u32]>,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets.unwrap_or(&[]),
            );
        }
    }

    /// 将 bindless set 绑定到 `set_index`
    #[inline]
    pub fn bind_bindless(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        bindless: &BindlessDescriptors,
    ) {
        self.bind_descriptor_sets(bind_point, pipeline_layout, set_index, &[bindless.set()], None);
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
        }
    }
}

// 绘制类型的命令
impl GfxCommandBuffer {
    /// buffers 每个 vertex buffer 以及 offset
    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_vertex_buffers(&self, first_bind: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.vk_handle, first_bind, buffers, offsets);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device.cmd_bind_index_buffer(self.vk_handle, buffer, offset, index_type);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            self.device.cmd_set_viewport(self.vk_handle, first_viewport, viewports);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            self.device.cmd_set_scissor(self.vk_handle, first_scissor, scissors);
        }
    }

    /// 不使用 index buffer 的绘制
    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.render_pass.require_inside("draw");
        unsafe {
            self.device.cmd_draw(self.vk_handle, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn draw_indexed(
        &self,
        index_cnt: u32,
        first_index: u32,
        instance_cnt: u32,
        first_instance: u32,
        vertex_offset: i32,
    ) {
        self.render_pass.require_inside("draw indexed");
        unsafe {
            self.device.cmd_draw_indexed(
                self.vk_handle,
                index_cnt,
                instance_cnt,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

// 计算着色器相关命令
impl GfxCommandBuffer {
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        self.render_pass.require_outside("dispatch");
        unsafe {
            self.device.cmd_dispatch(self.vk_handle, group_cnt.x, group_cnt.y, group_cnt.z);
        }
    }
}

// 数据传输类型
impl GfxCommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.render_pass.require_outside("copy buffer");
        unsafe {
            self.device.cmd_copy_buffer(self.vk_handle, src, dst, regions);
        }
    }

    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer_to_image(&self, copy_info: &vk::CopyBufferToImageInfo2) {
        self.render_pass.require_outside("copy buffer to image");
        unsafe { self.device.cmd_copy_buffer_to_image2(self.vk_handle, copy_info) }
    }

    /// 将 data 传输到 buffer 中，大小限制：65536Bytes=64KB
    ///
    /// 需要在 render pass 之外进行，注意同步
    ///
    /// - command type: action
    /// - supported queue types: transfer, graphics, compute
    #[inline]
    pub fn cmd_update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        self.render_pass.require_outside("update buffer");
        unsafe { self.device.cmd_update_buffer(self.vk_handle, buffer, offset, data) }
    }
}

// 同步相关命令
impl GfxCommandBuffer {
    /// 空的 batch 不会录制任何命令
    ///
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    pub fn pipeline_barrier(&self, dependency_flags: vk::DependencyFlags, batch: &GfxBarrierBatch) {
        if batch.is_empty() {
            return;
        }
        let image_barriers = batch.vk_image_barriers();
        let buffer_barriers = batch.vk_buffer_barriers();
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .dependency_flags(dependency_flags);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn memory_barrier(&self, barriers: &[vk::MemoryBarrier2]) {
        if barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default().memory_barriers(barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}

// debug 相关命令
impl GfxCommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Ok(name) = CString::new(label_name) else {
            return;
        };
        unsafe {
            self.device.debug_utils().cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        unsafe {
            self.device.debug_utils().cmd_end_debug_utils_label(self.vk_handle);
        }
    }

    /// - command type: action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn insert_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Ok(name) = CString::new(label_name) else {
            return;
        };
        unsafe {
            self.device.debug_utils().cmd_insert_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }
}

impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_passes() {
        let mut tracker = RenderPassTracker::default();
        tracker.begin("shadow");
        tracker.require_inside("draw");
        tracker.end();
        tracker.require_outside("dispatch");
        tracker.begin("forward");
        assert!(tracker.is_inside());
        tracker.end();
        assert!(!tracker.is_inside());
    }

    #[test]
    #[should_panic(expected = "still open")]
    fn test_nested_begin_is_fatal() {
        let mut tracker = RenderPassTracker::default();
        tracker.begin("shadow");
        tracker.begin("forward");
    }

    #[test]
    #[should_panic(expected = "without a matching begin")]
    fn test_unmatched_end_is_fatal() {
        let mut tracker = RenderPassTracker::default();
        tracker.end();
    }

    #[test]
    #[should_panic(expected = "outside of a render pass")]
    fn test_draw_outside_pass_is_fatal() {
        RenderPassTracker::default().require_inside("draw");
    }
}
