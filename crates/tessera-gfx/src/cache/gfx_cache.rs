use std::collections::HashSet;
use std::rc::Rc;

use ash::vk;

use crate::cache::deferred::DeferredDestroyRing;
use crate::cache::factory::{GfxObject, GfxObjectFactory};
use crate::cache::key::content_hash;
use crate::cache::object_cache::ObjectCache;
use crate::cache::pipeline::{ComputePipelineDesc, ComputePipelineKey, GraphicsPipelineDesc, PipelineKey};
use crate::cache::pipeline_layout::{DescriptorSetLayoutKey, GfxPushConstantRange, PipelineLayoutKey};
use crate::cache::render_pass::{RenderPassBinding, RenderPassDesc, RenderPassKey};
use crate::cache::sampler::GfxSamplerDesc;
use crate::error::gfx_fatal;

/// 设备级的对象缓存，由 Gfx 上下文持有，以引用的方式传给调用者
///
/// 所有 retire 值都是帧序号：对象在 `flush(completed_frame)` 中，
/// 当 `completed_frame` 不小于其 retire 值时才会被真正销毁。
pub struct GfxCache<F: GfxObjectFactory> {
    factory: Rc<F>,

    render_passes: ObjectCache<RenderPassKey, vk::RenderPass>,
    pipelines: ObjectCache<PipelineKey, vk::Pipeline>,
    compute_pipelines: ObjectCache<ComputePipelineKey, vk::Pipeline>,
    pipeline_layouts: ObjectCache<PipelineLayoutKey, vk::PipelineLayout>,
    set_layouts: ObjectCache<DescriptorSetLayoutKey, vk::DescriptorSetLayout>,
    samplers: ObjectCache<GfxSamplerDesc, vk::Sampler>,

    pending_destroy: DeferredDestroyRing<GfxObject>,
    /// 热重载替换掉的 module，引用它们的 key 不能再构建 pipeline
    retired_modules: HashSet<vk::ShaderModule>,
}

// new & init
impl<F: GfxObjectFactory> GfxCache<F> {
    pub fn new(factory: Rc<F>, frames_in_flight: usize) -> Self {
        Self {
            factory,
            render_passes: ObjectCache::new(),
            pipelines: ObjectCache::new(),
            compute_pipelines: ObjectCache::new(),
            pipeline_layouts: ObjectCache::new(),
            set_layouts: ObjectCache::new(),
            samplers: ObjectCache::new(),
            pending_destroy: DeferredDestroyRing::new(frames_in_flight),
            retired_modules: HashSet::new(),
        }
    }
}

// get or create
impl<F: GfxObjectFactory> GfxCache<F> {
    /// render pass 按结构缓存；framebuffer 每次调用都重新创建，并在 `frame_id` 结束后销毁
    pub fn get_or_create_render_pass(&mut self, desc: &RenderPassDesc, frame_id: u64) -> RenderPassBinding {
        if desc.views.len() != desc.key.attachment_count() {
            gfx_fatal!(
                "render pass expects {} attachments, got {} image views",
                desc.key.attachment_count(),
                desc.views.len()
            );
        }

        let render_pass = self.render_pass(&desc.key);
        let framebuffer = self.factory.create_framebuffer(render_pass, desc.views, desc.extent);
        self.pending_destroy.push(frame_id, GfxObject::Framebuffer(framebuffer));

        RenderPassBinding {
            render_pass,
            framebuffer,
            extent: desc.extent,
        }
    }

    /// push constant 数据不参与 key，只有它不同的两个描述返回同一个 pipeline
    pub fn get_or_create_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> vk::Pipeline {
        if let Some(pipeline) = self.pipelines.get(&desc.state) {
            return pipeline;
        }

        if let Some(module) = self.retired_modules.iter().find(|m| desc.state.uses_module(**m)) {
            gfx_fatal!("graphics pipeline requested with retired shader module {:?}", module);
        }

        let render_pass = self.render_pass(&desc.state.render_pass);
        let factory = &self.factory;
        self.pipelines.get_or_build(&desc.state, |key| {
            let name = format!("{:016x}", content_hash(key));
            log::info!("build graphics pipeline {}", name);
            factory.create_graphics_pipeline(key, render_pass, &name)
        })
    }

    pub fn get_or_create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> vk::Pipeline {
        if self.retired_modules.contains(&desc.state.stage.module) {
            gfx_fatal!("compute pipeline requested with retired shader module {:?}", desc.state.stage.module);
        }

        let factory = &self.factory;
        self.compute_pipelines.get_or_build(&desc.state, |key| {
            let name = format!("{}-{:016x}", key.stage.entry_point, content_hash(key));
            log::info!("build compute pipeline {}", name);
            factory.create_compute_pipeline(key, &name)
        })
    }

    pub fn get_or_create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[GfxPushConstantRange],
    ) -> vk::PipelineLayout {
        let key = PipelineLayoutKey {
            set_layouts: set_layouts.to_vec(),
            push_constant_ranges: push_constant_ranges.to_vec(),
        };
        let factory = &self.factory;
        self.pipeline_layouts.get_or_build(&key, |key| {
            log::info!("build pipeline layout: {} sets, {} push constant ranges", key.set_layouts.len(), key.push_constant_ranges.len());
            factory.create_pipeline_layout(key)
        })
    }

    pub fn get_or_create_descriptor_set_layout(&mut self, key: &DescriptorSetLayoutKey) -> vk::DescriptorSetLayout {
        let factory = &self.factory;
        self.set_layouts.get_or_build(key, |key| {
            log::info!("build descriptor set layout: {} bindings", key.bindings.len());
            factory.create_descriptor_set_layout(key)
        })
    }

    pub fn get_or_create_sampler(&mut self, desc: &GfxSamplerDesc) -> vk::Sampler {
        let factory = &self.factory;
        self.samplers.get_or_build(desc, |desc| {
            log::info!("build sampler {:?}", desc);
            factory.create_sampler(desc)
        })
    }

    fn render_pass(&mut self, key: &RenderPassKey) -> vk::RenderPass {
        let factory = &self.factory;
        self.render_passes.get_or_build(key, |key| {
            log::info!("build render pass {:016x}", content_hash(key));
            factory.create_render_pass(key)
        })
    }
}

// destroy
impl<F: GfxObjectFactory> GfxCache<F> {
    /// 不会立即销毁，而是等 `frame_id` 在 GPU 上执行完毕后由 `flush` 销毁
    pub fn destroy_pipeline(&mut self, pipeline: vk::Pipeline, frame_id: u64) {
        let retired = if let Some(key) = self.pipelines.find_key(pipeline) {
            self.pipelines.retire(&key, frame_id)
        } else if let Some(key) = self.compute_pipelines.find_key(pipeline) {
            self.compute_pipelines.retire(&key, frame_id)
        } else {
            None
        };

        match retired {
            Some(pipeline) => self.pending_destroy.push(frame_id, GfxObject::Pipeline(pipeline)),
            None => log::warn!("destroy_pipeline: {:?} is not a live cached pipeline", pipeline),
        }
    }

    /// 将 `completed_frame` 之前所有 retire 的对象真正销毁
    pub fn flush(&mut self, completed_frame: u64) {
        let retired = self.pending_destroy.drain_retired(completed_frame);
        for object in retired {
            self.factory.destroy_object(object);
        }

        self.render_passes.mark_destroyed(completed_frame);
        self.pipelines.mark_destroyed(completed_frame);
        self.compute_pipelines.mark_destroyed(completed_frame);
        self.pipeline_layouts.mark_destroyed(completed_frame);
        self.set_layouts.mark_destroyed(completed_frame);
        self.samplers.mark_destroyed(completed_frame);
    }

    /// 调用前需要确保 device idle
    pub fn destroy(mut self) {
        log::info!("destroying gfx cache: {} pending objects", self.pending_destroy.len());

        let mut objects = self.pending_destroy.drain_all();
        objects.extend(self.pipelines.drain_ready().into_iter().map(GfxObject::Pipeline));
        objects.extend(self.compute_pipelines.drain_ready().into_iter().map(GfxObject::Pipeline));
        objects.extend(self.pipeline_layouts.drain_ready().into_iter().map(GfxObject::PipelineLayout));
        objects.extend(self.set_layouts.drain_ready().into_iter().map(GfxObject::DescriptorSetLayout));
        objects.extend(self.render_passes.drain_ready().into_iter().map(GfxObject::RenderPass));
        objects.extend(self.samplers.drain_ready().into_iter().map(GfxObject::Sampler));

        for object in objects {
            self.factory.destroy_object(object);
        }
    }
}

// shader module
impl<F: GfxObjectFactory> GfxCache<F> {
    pub fn create_shader_module(&mut self, code: &[u32], name: &str) -> vk::ShaderModule {
        let module = self.factory.create_shader_module(code, name);
        // 旧 module 销毁后，driver 可能把同一个句柄值分配给新的 module
        self.retired_modules.remove(&module);
        module
    }

    /// shader 热重载之后调用：所有引用旧 module 的 pipeline 都会被移出缓存，
    /// 调用者需要用新 module 组成新的 key 再请求；之后仍引用旧 module 的请求是致命错误
    ///
    /// 旧 module 和被移除的 pipeline 都会在 `frame_id` 执行完毕之后销毁，返回移除的 pipeline 数量
    pub fn retire_shader_module(&mut self, old: vk::ShaderModule, frame_id: u64) -> usize {
        let mut evicted = self.pipelines.retire_where(frame_id, |key, _| key.uses_module(old));
        evicted.extend(self.compute_pipelines.retire_where(frame_id, |key, _| key.stage.module == old));

        let count = evicted.len();
        for pipeline in evicted {
            self.pending_destroy.push(frame_id, GfxObject::Pipeline(pipeline));
        }
        self.pending_destroy.push(frame_id, GfxObject::ShaderModule(old));
        self.retired_modules.insert(old);

        if count > 0 {
            log::info!("shader module {:?} replaced, {} pipelines evicted", old, count);
        }
        count
    }
}

// getters
impl<F: GfxObjectFactory> GfxCache<F> {
    #[inline]
    pub fn factory(&self) -> &Rc<F> {
        &self.factory
    }

    #[inline]
    pub fn cached_pipeline(&self, key: &PipelineKey) -> Option<vk::Pipeline> {
        self.pipelines.get(key)
    }

    #[inline]
    pub fn pipeline_build_count(&self) -> usize {
        self.pipelines.build_count()
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};

    use ash::vk::Handle;

    use super::*;
    use crate::cache::object_cache::CacheState;
    use crate::cache::pipeline::GfxShaderStage;
    use crate::cache::render_pass::GfxAttachmentDesc;

    /// 不访问 GPU 的工厂，句柄是递增的整数
    #[derive(Default)]
    pub(crate) struct FakeFactory {
        next_handle: Cell<u64>,
        pub(crate) builds: Cell<usize>,
        pub(crate) destroyed: RefCell<Vec<GfxObject>>,
    }
    impl FakeFactory {
        fn next<T: Handle>(&self) -> T {
            let handle = self.next_handle.get() + 1;
            self.next_handle.set(handle);
            T::from_raw(handle)
        }

        fn build<T: Handle>(&self) -> T {
            self.builds.set(self.builds.get() + 1);
            self.next()
        }
    }
    impl GfxObjectFactory for FakeFactory {
        fn create_render_pass(&self, _key: &RenderPassKey) -> vk::RenderPass {
            self.build()
        }
        fn create_framebuffer(&self, _: vk::RenderPass, _: &[vk::ImageView], _: vk::Extent2D) -> vk::Framebuffer {
            self.next()
        }
        fn create_descriptor_set_layout(&self, _key: &DescriptorSetLayoutKey) -> vk::DescriptorSetLayout {
            self.build()
        }
        fn create_pipeline_layout(&self, _key: &PipelineLayoutKey) -> vk::PipelineLayout {
            self.build()
        }
        fn create_graphics_pipeline(&self, _: &PipelineKey, _: vk::RenderPass, _: &str) -> vk::Pipeline {
            self.build()
        }
        fn create_compute_pipeline(&self, _: &ComputePipelineKey, _: &str) -> vk::Pipeline {
            self.build()
        }
        fn create_sampler(&self, _desc: &GfxSamplerDesc) -> vk::Sampler {
            self.build()
        }
        fn create_shader_module(&self, _code: &[u32], _name: &str) -> vk::ShaderModule {
            self.next()
        }
        fn destroy_object(&self, object: GfxObject) {
            self.destroyed.borrow_mut().push(object);
        }
    }

    fn forward_pass() -> RenderPassKey {
        RenderPassKey::new()
            .color(GfxAttachmentDesc::color(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR))
            .depth(GfxAttachmentDesc::depth(vk::Format::D32_SFLOAT))
    }

    fn pipeline_desc(vs: vk::ShaderModule, fs: vk::ShaderModule) -> GraphicsPipelineDesc {
        let key = PipelineKey::new(vk::PipelineLayout::from_raw(900), forward_pass())
            .stage(vk::ShaderStageFlags::VERTEX, vs, "main")
            .stage(vk::ShaderStageFlags::FRAGMENT, fs, "main");
        GraphicsPipelineDesc::new(key)
    }

    #[test]
    fn test_identical_pipeline_desc_builds_once() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let vs = vk::ShaderModule::from_raw(1000);
        let fs = vk::ShaderModule::from_raw(1001);

        // 两次独立构造，字段完全相同
        let a = cache.get_or_create_pipeline(&pipeline_desc(vs, fs));
        let b = cache.get_or_create_pipeline(&pipeline_desc(vs, fs));
        assert_eq!(a, b);
        assert_eq!(cache.pipeline_build_count(), 1);
        // render pass + pipeline
        assert_eq!(factory.builds.get(), 2);
    }

    #[test]
    fn test_push_constant_data_does_not_rebuild() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let vs = vk::ShaderModule::from_raw(1000);
        let fs = vk::ShaderModule::from_raw(1001);

        let mut a = pipeline_desc(vs, fs);
        a.push_constants = vec![1, 2, 3, 4];
        let mut b = pipeline_desc(vs, fs);
        b.push_constants = vec![9, 9, 9, 9];

        assert_eq!(cache.get_or_create_pipeline(&a), cache.get_or_create_pipeline(&b));
        assert_eq!(cache.pipeline_build_count(), 1);

        let mut c = pipeline_desc(vs, fs);
        c.state.raster.cull_mode = vk::CullModeFlags::NONE;
        assert_ne!(cache.get_or_create_pipeline(&c), cache.get_or_create_pipeline(&a));
        assert_eq!(cache.pipeline_build_count(), 2);
    }

    #[test]
    fn test_framebuffer_rebuilt_every_call() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 2);
        let views = [vk::ImageView::from_raw(50), vk::ImageView::from_raw(51)];
        let desc = RenderPassDesc {
            key: forward_pass(),
            views: &views,
            extent: vk::Extent2D { width: 640, height: 480 },
        };

        let first = cache.get_or_create_render_pass(&desc, 1);
        let second = cache.get_or_create_render_pass(&desc, 2);
        assert_eq!(first.render_pass, second.render_pass);
        assert_ne!(first.framebuffer, second.framebuffer);
        assert_eq!(factory.builds.get(), 1);

        // frame 1 完成之后，只有 frame 1 的 framebuffer 被销毁
        cache.flush(1);
        assert_eq!(*factory.destroyed.borrow(), vec![GfxObject::Framebuffer(first.framebuffer)]);
        assert_eq!(cache.pending_destroy_count(), 1);
    }

    #[test]
    #[should_panic(expected = "attachments")]
    fn test_render_pass_view_count_mismatch_is_fatal() {
        let mut cache = GfxCache::new(Rc::new(FakeFactory::default()), 2);
        let views = [vk::ImageView::from_raw(50)];
        let desc = RenderPassDesc {
            key: forward_pass(),
            views: &views,
            extent: vk::Extent2D { width: 1, height: 1 },
        };
        cache.get_or_create_render_pass(&desc, 0);
    }

    #[test]
    fn test_destroy_pipeline_is_deferred() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let desc = pipeline_desc(vk::ShaderModule::from_raw(1), vk::ShaderModule::from_raw(2));
        let pipeline = cache.get_or_create_pipeline(&desc);

        cache.destroy_pipeline(pipeline, 5);
        assert_eq!(cache.pipelines.state(&desc.state), CacheState::PendingDestroy);
        cache.flush(4);
        assert!(factory.destroyed.borrow().is_empty());

        cache.flush(5);
        assert_eq!(*factory.destroyed.borrow(), vec![GfxObject::Pipeline(pipeline)]);
        assert_eq!(cache.pipelines.state(&desc.state), CacheState::Unrequested);
        assert!(cache.pipelines.is_empty());
    }

    #[test]
    fn test_retire_shader_module_evicts_dependent_pipelines() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let old_vs = vk::ShaderModule::from_raw(10);
        let other_vs = vk::ShaderModule::from_raw(11);
        let fs = vk::ShaderModule::from_raw(12);

        let a = pipeline_desc(old_vs, fs);
        let b = pipeline_desc(other_vs, fs);
        cache.get_or_create_pipeline(&a);
        let kept = cache.get_or_create_pipeline(&b);

        assert_eq!(cache.retire_shader_module(old_vs, 7), 1);
        assert_eq!(cache.cached_pipeline(&a.state), None);
        assert_eq!(cache.cached_pipeline(&b.state), Some(kept));

        cache.flush(7);
        assert!(factory.destroyed.borrow().contains(&GfxObject::ShaderModule(old_vs)));
        // 被移除的 pipeline 不会在表里留下记录
        assert_eq!(cache.pipelines.len(), 1);
    }

    #[test]
    #[should_panic(expected = "retired shader module")]
    fn test_request_with_destroyed_module_is_fatal() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let old_vs = vk::ShaderModule::from_raw(10);
        let a = pipeline_desc(old_vs, vk::ShaderModule::from_raw(12));
        cache.get_or_create_pipeline(&a);

        cache.retire_shader_module(old_vs, 7);
        cache.flush(7);
        assert!(factory.destroyed.borrow().contains(&GfxObject::ShaderModule(old_vs)));

        // 旧 key 仍然引用已经销毁的 module，不能重新构建
        cache.get_or_create_pipeline(&a);
    }

    #[test]
    fn test_evicted_key_not_rebuilt_before_destroy() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let old_cs = vk::ShaderModule::from_raw(20);
        let desc = ComputePipelineDesc::new(ComputePipelineKey {
            stage: GfxShaderStage {
                stage: vk::ShaderStageFlags::COMPUTE,
                module: old_cs,
                entry_point: "main".to_string(),
            },
            layout: vk::PipelineLayout::from_raw(901),
        });
        cache.get_or_create_compute_pipeline(&desc);
        assert_eq!(cache.retire_shader_module(old_cs, 3), 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_or_create_compute_pipeline(&desc);
        }));
        assert!(result.is_err());
        // 只构建过一次
        assert_eq!(factory.builds.get(), 1);
    }

    #[test]
    fn test_recycled_module_handle_is_usable() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);
        let old_vs = cache.create_shader_module(&[], "old");
        cache.retire_shader_module(old_vs, 1);
        cache.flush(1);

        // driver 复用了同一个句柄值
        cache.factory.next_handle.set(old_vs.as_raw() - 1);
        let new_vs = cache.create_shader_module(&[], "new");
        assert_eq!(new_vs, old_vs);

        let pipeline = cache.get_or_create_pipeline(&pipeline_desc(new_vs, vk::ShaderModule::from_raw(900)));
        assert_ne!(pipeline, vk::Pipeline::null());
    }

    #[test]
    fn test_layouts_and_samplers_dedup() {
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 3);

        let set_key = DescriptorSetLayoutKey::new(vec![], true);
        let set_layout = cache.get_or_create_descriptor_set_layout(&set_key);
        assert_eq!(set_layout, cache.get_or_create_descriptor_set_layout(&set_key.clone()));

        let range = GfxPushConstantRange {
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
            offset: 0,
            size: 64,
        };
        let layout = cache.get_or_create_pipeline_layout(&[set_layout], &[range]);
        assert_eq!(layout, cache.get_or_create_pipeline_layout(&[set_layout], &[range]));

        let sampler = cache.get_or_create_sampler(&GfxSamplerDesc::default());
        assert_eq!(sampler, cache.get_or_create_sampler(&GfxSamplerDesc::default()));
        assert_ne!(sampler, cache.get_or_create_sampler(&GfxSamplerDesc::nearest_clamp()));

        assert_eq!(factory.builds.get(), 4);

        cache.destroy();
        assert_eq!(factory.destroyed.borrow().len(), 4);
    }
}
