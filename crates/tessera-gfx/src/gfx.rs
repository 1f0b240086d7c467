use std::ffi::CStr;
use std::path::Path;
use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::bindless::descriptors::BindlessDescriptors;
use crate::bindless::table::{BindlessSamplerId, BindlessStorageImageId, BindlessTable, BindlessTextureId};
use crate::cache::deferred::DeferredDestroyRing;
use crate::cache::gfx_cache::GfxCache;
use crate::cache::pipeline_layout::GfxDescriptorBinding;
use crate::commands::barrier::{AccessType, GfxBarrierBatch, GfxImageBarrier};
use crate::config::GfxConfig;
use crate::error::{VkResultExt, gfx_fatal};
use crate::foundation::debug_messenger::GfxDebugMsger;
use crate::foundation::device::GfxDevice;
use crate::foundation::instance::GfxInstance;
use crate::foundation::physical_device::GfxPhysicalDevice;
use crate::frame::frame_counter::{FrameCounter, FrameTracker};
use crate::memory::MemoryKind;
use crate::memory::allocator::GfxAllocator;
use crate::memory::staging::StagingPool;
use crate::memory::vma_source::VmaMemorySource;
use crate::queue::gfx_queue::{GfxQueue, QueueKind, QueueWait, ReclaimMode};
use crate::resources::buffer::{GfxBuffer, GfxStagingBuffer};
use crate::resources::descriptor_set_layout::GfxDescriptorSetLayout;
use crate::resources::image::{GfxImage, GfxImageDesc};
use crate::resources::{GfxDeviceAllocator, RetiredResource};
use crate::shader::compiler::{GlslcCompiler, StdinCompileErrorHandler};
use crate::shader::library::ShaderLibrary;

/// GFX 层的上下文
///
/// 持有设备、内存分配器、对象缓存、bindless 表以及所有队列。不是单例，
/// 由调用者创建后通过引用传递到需要的地方，整个生命周期只在一个线程上使用。
///
/// # 初始化流程
/// ```ignore
/// let mut gfx = Gfx::new(GfxConfig::load_default()?, display_handle);
/// let mut frame_ctx = FrameContext::new(&gfx, display_handle, window_handle, extent)?;
/// // 每帧：begin_frame → 录制 → submit → present → end_frame
/// frame_ctx.destroy(&gfx);
/// gfx.destroy();
/// ```
pub struct Gfx {
    config: GfxConfig,

    vk_entry: ash::Entry,
    instance: GfxInstance,
    debug_msger: GfxDebugMsger,
    pdevice: GfxPhysicalDevice,
    device: Rc<GfxDevice>,

    allocator: GfxDeviceAllocator,
    staging_pool: StagingPool<GfxStagingBuffer>,
    cache: GfxCache<GfxDevice>,
    bindless_table: BindlessTable,
    bindless_descriptors: BindlessDescriptors,

    graphics_queue: GfxQueue,
    compute_queue: GfxQueue,
    transfer_queue: GfxQueue,

    frame_counter: FrameCounter,
    /// 顺序与 [`Self::queues`] 一致：graphics, compute, transfer
    frame_trackers: [FrameTracker; 3],
    /// 以帧序号为 retire 值的资源
    pending_resources: DeferredDestroyRing<RetiredResource>,
}

// new & init
impl Gfx {
    const ENGINE_NAME: &'static str = "tessera";

    pub fn new(config: GfxConfig, raw_display_handle: raw_window_handle::RawDisplayHandle) -> Self {
        tracy_client::Client::start();
        let _span = tracy_client::span!("Gfx::new");

        let vk_entry = unsafe { ash::Entry::load() }.unwrap_or_else(|e| gfx_fatal!("failed to load vulkan: {}", e));

        let surface_exts = ash_window::enumerate_required_extensions(raw_display_handle)
            .or_fatal("enumerate surface extensions")
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect_vec();
        let instance = GfxInstance::new(&vk_entry, &config.app_name, Self::ENGINE_NAME, &surface_exts);
        let debug_msger = GfxDebugMsger::new(&vk_entry, instance.ash_instance());

        let pdevice = GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance());
        let queue_priorities = [1.0_f32];
        let queue_create_infos = pdevice
            .queue_families()
            .unique_indices()
            .into_iter()
            .map(|family_index| {
                vk::DeviceQueueCreateInfo::default().queue_family_index(family_index).queue_priorities(&queue_priorities)
            })
            .collect_vec();
        let device = Rc::new(GfxDevice::new(instance.ash_instance(), pdevice.vk_handle, &queue_create_infos));

        let memory_source = VmaMemorySource::new(instance.ash_instance(), pdevice.vk_handle, &device);
        let allocator = GfxAllocator::new(memory_source, config.memory.clone());

        let mut cache = GfxCache::new(device.clone(), config.frames_in_flight);
        let bindless_table = BindlessTable::new(&config.bindless);
        let bindless_descriptors = BindlessDescriptors::new(&device, &mut cache, &config.bindless);

        let families = pdevice.queue_families().clone();
        let graphics_queue = GfxQueue::new(device.clone(), QueueKind::Graphics, families.graphics);
        let compute_queue = GfxQueue::new(device.clone(), QueueKind::Compute, families.compute);
        let transfer_queue = GfxQueue::new(device.clone(), QueueKind::Transfer, families.transfer);

        Self {
            frame_counter: FrameCounter::new(config.frames_in_flight),
            frame_trackers: Default::default(),
            pending_resources: DeferredDestroyRing::new(config.frames_in_flight),
            config,
            vk_entry,
            instance,
            debug_msger,
            pdevice,
            device,
            allocator,
            staging_pool: StagingPool::new(),
            cache,
            bindless_table,
            bindless_descriptors,
            graphics_queue,
            compute_queue,
            transfer_queue,
        }
    }

    /// 使用 glslc 的 shader 库，编译失败时在终端询问是否重试
    pub fn create_shader_library(&self, output_dir: impl AsRef<Path>) -> ShaderLibrary<GlslcCompiler> {
        ShaderLibrary::new(GlslcCompiler::new(&self.config.shader, output_dir), Box::new(StdinCompileErrorHandler))
    }
}

// getters
impl Gfx {
    #[inline]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }

    #[inline]
    pub fn vk_entry(&self) -> &ash::Entry {
        &self.vk_entry
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.pdevice
    }

    #[inline]
    pub fn device(&self) -> &Rc<GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn allocator(&self) -> &GfxDeviceAllocator {
        &self.allocator
    }

    #[inline]
    pub fn cache(&self) -> &GfxCache<GfxDevice> {
        &self.cache
    }

    #[inline]
    pub fn cache_mut(&mut self) -> &mut GfxCache<GfxDevice> {
        &mut self.cache
    }

    #[inline]
    pub fn bindless_table(&self) -> &BindlessTable {
        &self.bindless_table
    }

    #[inline]
    pub fn bindless_descriptors(&self) -> &BindlessDescriptors {
        &self.bindless_descriptors
    }

    #[inline]
    pub fn staging_pool(&self) -> &StagingPool<GfxStagingBuffer> {
        &self.staging_pool
    }

    /// Present 与 Graphics 使用同一个 queue
    #[inline]
    pub fn queue(&self, kind: QueueKind) -> &GfxQueue {
        match kind {
            QueueKind::Graphics | QueueKind::Present => &self.graphics_queue,
            QueueKind::Compute => &self.compute_queue,
            QueueKind::Transfer => &self.transfer_queue,
        }
    }

    #[inline]
    pub fn queue_mut(&mut self, kind: QueueKind) -> &mut GfxQueue {
        match kind {
            QueueKind::Graphics | QueueKind::Present => &mut self.graphics_queue,
            QueueKind::Compute => &mut self.compute_queue,
            QueueKind::Transfer => &mut self.transfer_queue,
        }
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }
}

// 资源
impl Gfx {
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        kind: MemoryKind,
        name: impl AsRef<str>,
    ) -> GfxBuffer {
        let families = self.pdevice.queue_families().unique_indices();
        GfxBuffer::new(&self.device, &mut self.allocator, &families, size, usage, kind, name)
    }

    pub fn create_image(&mut self, desc: GfxImageDesc, name: impl AsRef<str>) -> GfxImage {
        let families = self.pdevice.queue_families().unique_indices();
        GfxImage::new(&self.device, &mut self.allocator, &families, desc, name)
    }

    pub fn create_descriptor_set_layout(
        &mut self,
        bindings: Vec<GfxDescriptorBinding>,
        name: impl AsRef<str>,
    ) -> GfxDescriptorSetLayout {
        GfxDescriptorSetLayout::new(&mut self.cache, bindings, name)
    }

    /// 当前帧之后的 GPU 工作不会再引用这个 buffer，帧结束后释放
    pub fn destroy_buffer(&mut self, buffer: GfxBuffer) {
        self.pending_resources.push(self.frame_counter.frame_id(), buffer.into_retired());
    }

    pub fn destroy_image(&mut self, image: GfxImage) {
        self.pending_resources.push(self.frame_counter.frame_id(), image.into_retired());
    }

    /// 不同于其他 destroy 方法，这里不会释放任何 GPU 对象
    ///
    /// layout 按内容去重、由 cache 共享持有，其他句柄或 pipeline layout 可能仍在使用，
    /// 只会在 [`Gfx::destroy`] 销毁 cache 时释放
    pub fn destroy_descriptor_set_layout(&mut self, layout: GfxDescriptorSetLayout) {
        layout.release();
    }
}

// bindless
impl Gfx {
    #[inline]
    pub fn register_texture(&mut self, image: &GfxImage) -> BindlessTextureId {
        self.bindless_table.create_texture_id(image.default_view())
    }

    #[inline]
    pub fn register_sampler(&mut self, sampler: vk::Sampler) -> BindlessSamplerId {
        self.bindless_table.create_sampler_id(sampler)
    }

    #[inline]
    pub fn register_storage_image(&mut self, image: &GfxImage) -> BindlessStorageImageId {
        self.bindless_table.create_storage_image_id(image.default_view())
    }

    #[inline]
    pub fn release_texture(&mut self, id: BindlessTextureId) {
        self.bindless_table.release_texture(id, self.frame_counter.frame_id());
    }

    #[inline]
    pub fn release_sampler(&mut self, id: BindlessSamplerId) {
        self.bindless_table.release_sampler(id, self.frame_counter.frame_id());
    }

    #[inline]
    pub fn release_storage_image(&mut self, id: BindlessStorageImageId) {
        self.bindless_table.release_storage_image(id, self.frame_counter.frame_id());
    }

    /// 提交之前调用，将新注册的槽位写入 descriptor set
    pub fn flush_bindless(&mut self) {
        self.bindless_descriptors.flush(&self.device, &mut self.bindless_table);
    }
}

// 上传
impl Gfx {
    /// staging buffer 的尺寸取 2 的幂，方便复用
    fn acquire_staging(&mut self, size: vk::DeviceSize, name: &str) -> GfxStagingBuffer {
        let device = &self.device;
        let allocator = &mut self.allocator;
        self.staging_pool
            .acquire(size, |capacity| GfxStagingBuffer::new(device, allocator, capacity, format!("staging-{}", name)))
    }

    /// 通过 transfer queue 将数据写入 buffer，返回这次提交的 timeline 值
    ///
    /// staging buffer 带着这个值进入 in-flight 列表，GPU 完成后回到 staging 池
    pub fn upload_buffer(&mut self, dst: &GfxBuffer, dst_offset: vk::DeviceSize, data: &[u8]) -> u64 {
        let _span = tracy_client::span!("Gfx::upload_buffer");
        if data.is_empty() {
            gfx_fatal!("empty upload to buffer `{}`", dst.name());
        }
        if dst_offset + data.len() as vk::DeviceSize > dst.size() {
            gfx_fatal!("upload of {} bytes overflows buffer `{}` ({} bytes)", data.len(), dst.name(), dst.size());
        }

        let mut staging = self.acquire_staging(data.len() as vk::DeviceSize, dst.name());
        staging.write(data);

        let mut cmd = self.transfer_queue.alloc_command_buffer(&format!("upload-{}", dst.name()));
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &format!("upload-{}", dst.name()));
        cmd.cmd_copy_buffer(
            staging.vk_buffer(),
            dst.vk_buffer(),
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset,
                size: data.len() as vk::DeviceSize,
            }],
        );
        cmd.end();

        self.transfer_queue.submit(cmd, vec![staging], &[], None)
    }

    /// 上传 image 的 mip 0，结束后 image 处于 SHADER_READ_ONLY_OPTIMAL
    pub fn upload_image(&mut self, dst: &GfxImage, data: &[u8]) -> u64 {
        let _span = tracy_client::span!("Gfx::upload_image");
        let expected = dst
            .desc()
            .base_level_size()
            .unwrap_or_else(|| gfx_fatal!("upload to image `{}` with unsupported format {:?}", dst.name(), dst.format()));
        if data.len() as vk::DeviceSize != expected {
            gfx_fatal!("image `{}` expects {} bytes, got {}", dst.name(), expected, data.len());
        }

        let mut staging = self.acquire_staging(expected, dst.name());
        staging.write(data);

        let range = dst.desc().full_range();
        let to_transfer = GfxImageBarrier::new()
            .image(dst.vk_image())
            .image_aspect_flag(range.aspect_mask)
            .access(AccessType::Nothing, AccessType::TransferWrite);
        // 之后的读取通过 semaphore 与 graphics queue 同步
        let to_shader_read = GfxImageBarrier::new()
            .image(dst.vk_image())
            .image_aspect_flag(range.aspect_mask)
            .access(AccessType::TransferWrite, AccessType::Nothing)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let region = vk::BufferImageCopy2::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default().aspect_mask(range.aspect_mask).mip_level(0).layer_count(1),
            )
            .image_extent(dst.extent().into());
        let copy_info = vk::CopyBufferToImageInfo2::default()
            .src_buffer(staging.vk_buffer())
            .dst_image(dst.vk_image())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(std::slice::from_ref(&region));

        let mut cmd = self.transfer_queue.alloc_command_buffer(&format!("upload-{}", dst.name()));
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &format!("upload-{}", dst.name()));
        cmd.pipeline_barrier(vk::DependencyFlags::empty(), &GfxBarrierBatch::new().image(to_transfer));
        cmd.cmd_copy_buffer_to_image(&copy_info);
        cmd.pipeline_barrier(vk::DependencyFlags::empty(), &GfxBarrierBatch::new().image(to_shader_read));
        cmd.end();

        self.transfer_queue.submit(cmd, vec![staging], &[], None)
    }

    /// graphics 提交需要等待的上传
    pub fn pending_upload_waits(&self) -> Vec<QueueWait> {
        let value = self.transfer_queue.last_submitted_value();
        if value == 0 {
            return vec![];
        }
        vec![QueueWait::timeline(self.transfer_queue.timeline().handle(), value, vk::PipelineStageFlags2::ALL_COMMANDS)]
    }
}

// 帧
impl Gfx {
    #[inline]
    fn queues(&self) -> [&GfxQueue; 3] {
        [&self.graphics_queue, &self.compute_queue, &self.transfer_queue]
    }

    /// 等待 `frames_in_flight` 帧之前的工作完成，之后才能复用它的 per-frame 资源
    pub fn wait_frame_slot(&self) {
        let _span = tracy_client::span!("Gfx::wait_frame_slot");
        let fif = self.frame_counter.fif_count() as u64;
        let frame_id = self.frame_counter.frame_id();
        if frame_id <= fif {
            return;
        }

        let old_frame = frame_id - fif;
        for (queue, tracker) in self.queues().into_iter().zip(self.frame_trackers.iter()) {
            if let Some(value) = tracker.timeline_value_of(old_frame) {
                queue.timeline().wait_timeline(value, u64::MAX);
            }
        }
    }

    /// 回收某个 queue 上已经完成的提交
    pub fn reclaim(&mut self, kind: QueueKind, mode: ReclaimMode) -> usize {
        let queue = match kind {
            QueueKind::Graphics | QueueKind::Present => &mut self.graphics_queue,
            QueueKind::Compute => &mut self.compute_queue,
            QueueKind::Transfer => &mut self.transfer_queue,
        };
        queue.reclaim(mode, &mut self.staging_pool)
    }

    /// 帧结束：记录每个 queue 的 timeline 进度，释放已经结束的帧引用的对象，然后进入下一帧
    ///
    /// 返回已经完全结束的帧序号
    pub fn end_frame(&mut self) -> u64 {
        let _span = tracy_client::span!("Gfx::end_frame");
        let frame_id = self.frame_counter.frame_id();

        let submitted = self.queues().map(GfxQueue::last_submitted_value);
        let completed = self.queues().map(GfxQueue::completed_value);
        let retired_frame = self
            .frame_trackers
            .iter_mut()
            .zip(submitted.into_iter().zip(completed))
            .map(|(tracker, (submitted, completed))| {
                tracker.record_submit(frame_id, submitted);
                tracker.retired_frame(completed)
            })
            .min()
            .unwrap_or_default();

        self.cache.flush(retired_frame);
        self.bindless_table.end_frame(retired_frame);
        for resource in self.pending_resources.drain_retired(retired_frame) {
            resource.destroy(&self.device, &mut self.allocator);
        }

        self.graphics_queue.reclaim(ReclaimMode::Opportunistic, &mut self.staging_pool);
        self.compute_queue.reclaim(ReclaimMode::Opportunistic, &mut self.staging_pool);
        self.transfer_queue.reclaim(ReclaimMode::Opportunistic, &mut self.staging_pool);
        for staging in self.staging_pool.end_frame(self.config.memory.staging_max_idle_frames) {
            staging.into_retired().destroy(&self.device, &mut self.allocator);
        }

        self.frame_counter.next_frame();
        retired_frame
    }
}

// destroy
impl Gfx {
    /// 等待所有 queue 空闲，然后按依赖顺序销毁
    pub fn destroy(mut self) {
        log::info!("destroying gfx, allocator stats: {:?}", self.allocator.stats());
        self.device.wait_idle();

        self.graphics_queue.destroy(&mut self.staging_pool);
        self.compute_queue.destroy(&mut self.staging_pool);
        self.transfer_queue.destroy(&mut self.staging_pool);

        for resource in self.pending_resources.drain_all() {
            resource.destroy(&self.device, &mut self.allocator);
        }
        for staging in self.staging_pool.drain() {
            staging.into_retired().destroy(&self.device, &mut self.allocator);
        }

        self.bindless_descriptors.destroy(&self.device);
        self.cache.destroy();

        let memory_source = self.allocator.destroy();
        memory_source.destroy();

        self.device.destroy();
        self.pdevice.destroy();
        self.debug_msger.destroy();
        self.instance.destroy();
    }
}
