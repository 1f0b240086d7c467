use std::time::SystemTime;

use ash::vk;
use slotmap::SlotMap;

use crate::cache::factory::GfxObjectFactory;
use crate::cache::gfx_cache::GfxCache;
use crate::cache::pipeline::GfxShaderStage;
use crate::shader::compiler::{
    CompileErrorHandler, ShaderCompileRequest, ShaderCompiler, compile_with_retry, source_write_time,
};
use crate::shader::reflect::ShaderReflection;

slotmap::new_key_type! {
    pub struct ShaderHandle;
}

/// 已经编译的 shader：module 句柄、反射结果以及编译时源文件的修改时间
pub struct TrackedShader {
    request: ShaderCompileRequest,
    module: vk::ShaderModule,
    reflection: ShaderReflection,
    compiled_at: SystemTime,
}
impl TrackedShader {
    #[inline]
    pub fn request(&self) -> &ShaderCompileRequest {
        &self.request
    }
    #[inline]
    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }
    #[inline]
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
    #[inline]
    pub fn compiled_at(&self) -> SystemTime {
        self.compiled_at
    }

    /// 用于构建 PipelineKey
    #[inline]
    pub fn stage(&self) -> GfxShaderStage {
        GfxShaderStage {
            stage: self.request.stage.vk_stage(),
            module: self.module,
            entry_point: self.request.entry_point.clone(),
        }
    }
}

/// 管理所有编译过的 shader，支持热重载
///
/// 调用者持有 [`ShaderHandle`]，热重载之后 handle 不变，但 module 句柄会被替换，
/// 引用旧 module 的 pipeline 会被移出缓存
pub struct ShaderLibrary<C: ShaderCompiler> {
    compiler: C,
    error_handler: Box<dyn CompileErrorHandler>,
    shaders: SlotMap<ShaderHandle, TrackedShader>,
}

// new & init
impl<C: ShaderCompiler> ShaderLibrary<C> {
    pub fn new(compiler: C, error_handler: Box<dyn CompileErrorHandler>) -> Self {
        Self {
            compiler,
            error_handler,
            shaders: SlotMap::with_key(),
        }
    }
}

// load
impl<C: ShaderCompiler> ShaderLibrary<C> {
    pub fn load<F: GfxObjectFactory>(&mut self, request: ShaderCompileRequest, cache: &mut GfxCache<F>) -> ShaderHandle {
        let (compiled, reflection) = compile_with_retry(&self.compiler, &request, self.error_handler.as_mut());
        let module = cache.create_shader_module(&compiled.code, &request.display_name());

        self.shaders.insert(TrackedShader {
            request,
            module,
            reflection,
            compiled_at: compiled.last_write_time,
        })
    }

    /// 检查所有 shader 的源文件，修改时间晚于编译时间的重新编译
    ///
    /// 旧 module 以及引用它的 pipeline 在 `frame_id` 执行完毕之后销毁，返回重新编译的 shader
    pub fn recompile_stale<F: GfxObjectFactory>(&mut self, cache: &mut GfxCache<F>, frame_id: u64) -> Vec<ShaderHandle> {
        let mut reloaded = vec![];
        for (handle, shader) in self.shaders.iter_mut() {
            let write_time = match source_write_time(&shader.request.path) {
                Ok(time) => time,
                Err(e) => {
                    log::warn!("skip hot reload of {}: {}", shader.request.display_name(), e);
                    continue;
                }
            };
            if write_time <= shader.compiled_at {
                continue;
            }

            log::info!("shader source changed: {}", shader.request.display_name());
            let (compiled, reflection) =
                compile_with_retry(&self.compiler, &shader.request, self.error_handler.as_mut());
            let new_module = cache.create_shader_module(&compiled.code, &shader.request.display_name());

            let old_module = std::mem::replace(&mut shader.module, new_module);
            shader.reflection = reflection;
            shader.compiled_at = compiled.last_write_time;
            cache.retire_shader_module(old_module, frame_id);

            reloaded.push(handle);
        }
        reloaded
    }

    /// module 在 `frame_id` 执行完毕之后销毁
    pub fn unload<F: GfxObjectFactory>(&mut self, handle: ShaderHandle, cache: &mut GfxCache<F>, frame_id: u64) {
        if let Some(shader) = self.shaders.remove(handle) {
            cache.retire_shader_module(shader.module, frame_id);
        }
    }
}

// getters
impl<C: ShaderCompiler> ShaderLibrary<C> {
    #[inline]
    pub fn get(&self, handle: ShaderHandle) -> Option<&TrackedShader> {
        self.shaders.get(handle)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

// destroy
impl<C: ShaderCompiler> ShaderLibrary<C> {
    pub fn destroy<F: GfxObjectFactory>(mut self, cache: &mut GfxCache<F>, frame_id: u64) {
        for (_, shader) in self.shaders.drain() {
            cache.retire_shader_module(shader.module, frame_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::cache::gfx_cache::tests::FakeFactory;
    use crate::cache::pipeline::{GraphicsPipelineDesc, PipelineKey};
    use crate::cache::render_pass::{GfxAttachmentDesc, RenderPassKey};
    use crate::error::ShaderError;
    use crate::shader::compiler::tests::FakeCompiler;
    use crate::shader::compiler::{CompileErrorAction, ShaderStage};
    use ash::vk::Handle;

    struct AbortHandler;
    impl CompileErrorHandler for AbortHandler {
        fn on_error(&mut self, _: &ShaderCompileRequest, _: &ShaderError) -> CompileErrorAction {
            CompileErrorAction::Abort
        }
    }

    fn temp_source(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tessera-library-{}-{}", std::process::id(), name));
        std::fs::write(&path, "void main() {}").unwrap();
        path
    }

    fn touch_future(path: &std::path::Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn test_recompile_stale_swaps_module_and_evicts_pipelines() {
        let path = temp_source("hot.vert");
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 2);
        let mut library = ShaderLibrary::new(FakeCompiler::new(0), Box::new(AbortHandler));

        let handle = library.load(ShaderCompileRequest::new(&path, ShaderStage::Vertex), &mut cache);
        let old_module = library.get(handle).unwrap().module();

        let render_pass = RenderPassKey::new()
            .color(GfxAttachmentDesc::color(vk::Format::R8G8B8A8_UNORM, vk::ImageLayout::PRESENT_SRC_KHR));
        let mut key = PipelineKey::new(vk::PipelineLayout::from_raw(1), render_pass);
        key.stages.push(library.get(handle).unwrap().stage());
        let desc = GraphicsPipelineDesc::new(key);
        cache.get_or_create_pipeline(&desc);

        // 源文件没有变化
        assert!(library.recompile_stale(&mut cache, 1).is_empty());
        assert!(cache.cached_pipeline(&desc.state).is_some());

        touch_future(&path);
        assert_eq!(library.recompile_stale(&mut cache, 1), vec![handle]);

        let new_module = library.get(handle).unwrap().module();
        assert_ne!(new_module, old_module);
        assert_eq!(cache.cached_pipeline(&desc.state), None);

        // 用新 module 组成的 key 重新构建
        let mut new_key = desc.state.clone();
        new_key.stages = vec![library.get(handle).unwrap().stage()];
        let rebuilt = cache.get_or_create_pipeline(&GraphicsPipelineDesc::new(new_key));
        assert_ne!(rebuilt, vk::Pipeline::null());
        assert_eq!(cache.pipeline_build_count(), 2);

        // 记录的编译时间已经更新，不会重复编译
        assert!(library.recompile_stale(&mut cache, 2).is_empty());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unload_retires_module() {
        let path = temp_source("unload.frag");
        let factory = Rc::new(FakeFactory::default());
        let mut cache = GfxCache::new(factory.clone(), 2);
        let mut library = ShaderLibrary::new(FakeCompiler::new(0), Box::new(AbortHandler));

        let handle = library.load(ShaderCompileRequest::new(&path, ShaderStage::Fragment), &mut cache);
        let module = library.get(handle).unwrap().module();
        library.unload(handle, &mut cache, 3);
        assert!(library.get(handle).is_none());

        cache.flush(3);
        assert!(factory.destroyed.borrow().contains(&crate::cache::factory::GfxObject::ShaderModule(module)));
        let _ = std::fs::remove_file(path);
    }
}
