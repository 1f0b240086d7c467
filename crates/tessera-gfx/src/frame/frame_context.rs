use ash::vk;
use itertools::Itertools;

use crate::commands::command_buffer::{GfxCommandBuffer, LabelColor};
use crate::commands::semaphore::GfxSemaphore;
use crate::error::{GfxError, SurfaceError, gfx_fatal};
use crate::gfx::Gfx;
use crate::queue::gfx_queue::{QueueKind, QueueWait};
use crate::swapchain::surface::GfxSurface;
use crate::swapchain::swapchain::GfxSwapchain;

/// 本帧获取到的 swapchain image
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image_index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// 窗口相关的帧状态：surface、swapchain 以及 acquire/present 使用的 binary semaphore
///
/// present engine 不能等待 timeline semaphore，所以这里仍然使用 binary semaphore，
/// 其余的同步都依赖各个 queue 的 timeline。
pub struct FrameContext {
    surface: GfxSurface,
    /// 窗口最小化时为 None
    swapchain: Option<GfxSwapchain>,

    /// 每个 frame in flight 一个
    image_available: Vec<GfxSemaphore>,
    /// 每个 swapchain image 一个
    render_finished: Vec<GfxSemaphore>,

    current: Option<FrameTarget>,
    acquire_timeout_ns: u64,
}

// new & init
impl FrameContext {
    pub fn new(
        gfx: &Gfx,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        window_physical_extent: vk::Extent2D,
    ) -> Result<Self, GfxError> {
        let surface = GfxSurface::new(
            gfx.vk_entry(),
            gfx.instance().ash_instance(),
            gfx.physical_device().vk_handle,
            gfx.device(),
            raw_display_handle,
            raw_window_handle,
        );
        let present_family = gfx.queue(QueueKind::Present).queue_family().queue_family_index;
        if !surface.supports_queue_family(present_family) {
            gfx_fatal!("graphics queue family {} can not present to the surface", present_family);
        }

        let swapchain =
            GfxSwapchain::new(gfx.device().clone(), &surface, &gfx.config().swapchain, window_physical_extent)?;
        let image_available = (0..gfx.frame_counter().fif_count())
            .map(|i| GfxSemaphore::new(gfx.device().clone(), &format!("image-available-{}", i)))
            .collect_vec();
        let render_finished = Self::create_render_finished(gfx, &swapchain);

        Ok(Self {
            surface,
            swapchain: Some(swapchain),
            image_available,
            render_finished,
            current: None,
            acquire_timeout_ns: gfx.config().swapchain.acquire_timeout_ns,
        })
    }

    fn create_render_finished(gfx: &Gfx, swapchain: &GfxSwapchain) -> Vec<GfxSemaphore> {
        (0..swapchain.image_infos().image_cnt)
            .map(|i| GfxSemaphore::new(gfx.device().clone(), &format!("render-finished-{}", i)))
            .collect_vec()
    }
}

// getters
impl FrameContext {
    #[inline]
    pub fn swapchain(&self) -> Option<&GfxSwapchain> {
        self.swapchain.as_ref()
    }

    #[inline]
    pub fn current_target(&self) -> Option<&FrameTarget> {
        self.current.as_ref()
    }
}

// 帧
impl FrameContext {
    /// 等待 frames in flight 之前的帧结束，然后获取 swapchain image
    ///
    /// surface 过期或丢失时返回错误，本帧不会开始；调用者需要先 [`Self::rebuild_swapchain`]
    pub fn begin_frame(&mut self, gfx: &mut Gfx) -> Result<FrameTarget, SurfaceError> {
        let _span = tracy_client::span!("FrameContext::begin_frame");
        if self.current.is_some() {
            gfx_fatal!("begin_frame called twice without end_frame");
        }
        let Some(swapchain) = self.swapchain.as_mut() else {
            return Err(SurfaceError::NeedsResize);
        };

        gfx.wait_frame_slot();

        let label = gfx.frame_counter().frame_label();
        let image_available = self.image_available[label.index()].handle();
        let image_index = swapchain.acquire_next_image(image_available, self.acquire_timeout_ns)?;

        let target = FrameTarget {
            image_index,
            image: swapchain.current_image(),
            view: swapchain.current_image_view(),
            extent: swapchain.extent(),
            format: swapchain.format(),
        };
        self.current = Some(target);
        Ok(target)
    }

    /// 提交本帧渲染到 swapchain image 的 command buffer
    ///
    /// 等待 image 可用以及之前的上传，signal present 使用的 binary semaphore
    pub fn submit(&mut self, gfx: &mut Gfx, command_buffer: GfxCommandBuffer) -> u64 {
        let Some(target) = self.current else {
            gfx_fatal!("submit outside of begin_frame/end_frame");
        };
        gfx.flush_bindless();

        let label = gfx.frame_counter().frame_label();
        let waits = Self::frame_waits(self.image_available[label.index()].handle(), gfx.pending_upload_waits());
        let render_finished = self.render_finished[target.image_index as usize].handle();

        let frame_name = gfx.frame_counter().frame_name();
        let queue = gfx.queue_mut(QueueKind::Graphics);
        queue.begin_label(&frame_name, LabelColor::COLOR_PASS);
        let value = queue.submit(command_buffer, vec![], &waits, Some(render_finished));
        queue.end_label();
        value
    }

    pub fn present(&mut self, gfx: &Gfx) -> Result<(), SurfaceError> {
        let _span = tracy_client::span!("FrameContext::present");
        let (Some(target), Some(swapchain)) = (self.current, self.swapchain.as_mut()) else {
            gfx_fatal!("present outside of begin_frame/end_frame");
        };

        let render_finished = self.render_finished[target.image_index as usize].handle();
        swapchain.present_image(gfx.queue(QueueKind::Present).vk_queue(), &[render_finished])
    }

    /// 进入下一帧，释放已经结束的帧引用的对象，返回已经结束的帧序号
    pub fn end_frame(&mut self, gfx: &mut Gfx) -> u64 {
        self.current = None;
        gfx.end_frame()
    }

    /// 窗口尺寸变化之后调用：等待 device idle，然后重建 swapchain
    ///
    /// 窗口最小化时 swapchain 为空，之后的 begin_frame 会继续返回 NeedsResize
    pub fn rebuild_swapchain(&mut self, gfx: &Gfx, window_physical_extent: vk::Extent2D) -> Result<(), GfxError> {
        let _span = tracy_client::span!("FrameContext::rebuild_swapchain");
        log::info!("rebuild swapchain with window extent {}x{}", window_physical_extent.width, window_physical_extent.height);
        gfx.device().wait_idle();

        self.current = None;
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
        for semaphore in self.render_finished.drain(..) {
            semaphore.destroy();
        }

        match GfxSwapchain::new(gfx.device().clone(), &self.surface, &gfx.config().swapchain, window_physical_extent) {
            Ok(swapchain) => {
                self.render_finished = Self::create_render_finished(gfx, &swapchain);
                self.swapchain = Some(swapchain);
                Ok(())
            }
            Err(GfxError::Surface(SurfaceError::NeedsResize)) => {
                log::info!("window is minimized, swapchain is not created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// graphics 提交的等待列表：swapchain image 可用，以及之前提交的上传
    fn frame_waits(image_available: vk::Semaphore, uploads: Vec<QueueWait>) -> Vec<QueueWait> {
        std::iter::once(QueueWait::binary(image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT))
            .chain(uploads)
            .collect_vec()
    }
}

// destroy
impl FrameContext {
    /// 需要在 [`Gfx::destroy`] 之前调用
    pub fn destroy(self, gfx: &Gfx) {
        gfx.device().wait_idle();
        if let Some(swapchain) = self.swapchain {
            swapchain.destroy();
        }
        self.image_available.into_iter().chain(self.render_finished).for_each(GfxSemaphore::destroy);
        self.surface.destroy();
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_frame_waits_image_then_uploads() {
        let upload = QueueWait::timeline(vk::Semaphore::from_raw(9), 4, vk::PipelineStageFlags2::ALL_COMMANDS);
        let waits = FrameContext::frame_waits(vk::Semaphore::from_raw(1), vec![upload]);

        assert_eq!(waits.len(), 2);
        assert_eq!(waits[0].semaphore, vk::Semaphore::from_raw(1));
        assert_eq!(waits[0].value, None);
        assert_eq!(waits[1].value, Some(4));
    }
}
