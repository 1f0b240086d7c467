use ash::vk;

use crate::cache::pipeline::{ComputePipelineKey, PipelineKey, create_vk_compute_pipeline, create_vk_graphics_pipeline};
use crate::cache::pipeline_layout::{
    DescriptorSetLayoutKey, PipelineLayoutKey, create_vk_descriptor_set_layout, create_vk_pipeline_layout,
};
use crate::cache::render_pass::{RenderPassKey, create_vk_framebuffer, create_vk_render_pass};
use crate::cache::sampler::{GfxSamplerDesc, create_vk_sampler};
use crate::error::VkResultExt;
use crate::foundation::device::GfxDevice;

/// 缓存管理的所有后端对象，统一进入延迟销毁队列
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxObject {
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    Sampler(vk::Sampler),
    ShaderModule(vk::ShaderModule),
}

/// 创建与销毁后端对象
///
/// `GfxDevice` 是唯一的正式实现；测试中用计数的假实现替代，不需要 GPU
pub trait GfxObjectFactory {
    fn create_render_pass(&self, key: &RenderPassKey) -> vk::RenderPass;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> vk::Framebuffer;
    fn create_descriptor_set_layout(&self, key: &DescriptorSetLayoutKey) -> vk::DescriptorSetLayout;
    fn create_pipeline_layout(&self, key: &PipelineLayoutKey) -> vk::PipelineLayout;
    fn create_graphics_pipeline(&self, key: &PipelineKey, render_pass: vk::RenderPass, name: &str) -> vk::Pipeline;
    fn create_compute_pipeline(&self, key: &ComputePipelineKey, name: &str) -> vk::Pipeline;
    fn create_sampler(&self, desc: &GfxSamplerDesc) -> vk::Sampler;
    fn create_shader_module(&self, code: &[u32], name: &str) -> vk::ShaderModule;
    fn destroy_object(&self, object: GfxObject);
}

impl GfxObjectFactory for GfxDevice {
    fn create_render_pass(&self, key: &RenderPassKey) -> vk::RenderPass {
        let _span = tracy_client::span!("create_render_pass");
        create_vk_render_pass(self, key)
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> vk::Framebuffer {
        create_vk_framebuffer(self, render_pass, views, extent)
    }

    fn create_descriptor_set_layout(&self, key: &DescriptorSetLayoutKey) -> vk::DescriptorSetLayout {
        create_vk_descriptor_set_layout(self, key)
    }

    fn create_pipeline_layout(&self, key: &PipelineLayoutKey) -> vk::PipelineLayout {
        create_vk_pipeline_layout(self, key)
    }

    fn create_graphics_pipeline(&self, key: &PipelineKey, render_pass: vk::RenderPass, name: &str) -> vk::Pipeline {
        let _span = tracy_client::span!("create_graphics_pipeline");
        let pipeline = create_vk_graphics_pipeline(self, key, render_pass);
        self.set_object_debug_name(pipeline, format!("GraphicsPipeline::{}", name));
        pipeline
    }

    fn create_compute_pipeline(&self, key: &ComputePipelineKey, name: &str) -> vk::Pipeline {
        let _span = tracy_client::span!("create_compute_pipeline");
        let pipeline = create_vk_compute_pipeline(self, key);
        self.set_object_debug_name(pipeline, format!("ComputePipeline::{}", name));
        pipeline
    }

    fn create_sampler(&self, desc: &GfxSamplerDesc) -> vk::Sampler {
        create_vk_sampler(self, desc)
    }

    fn create_shader_module(&self, code: &[u32], name: &str) -> vk::ShaderModule {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.device.create_shader_module(&create_info, None).or_fatal("create shader module") };
        self.set_object_debug_name(module, format!("ShaderModule::{}", name));
        module
    }

    fn destroy_object(&self, object: GfxObject) {
        unsafe {
            match object {
                GfxObject::RenderPass(h) => self.destroy_render_pass(h, None),
                GfxObject::Framebuffer(h) => self.destroy_framebuffer(h, None),
                GfxObject::DescriptorSetLayout(h) => self.destroy_descriptor_set_layout(h, None),
                GfxObject::PipelineLayout(h) => self.destroy_pipeline_layout(h, None),
                GfxObject::Pipeline(h) => self.destroy_pipeline(h, None),
                GfxObject::Sampler(h) => self.destroy_sampler(h, None),
                GfxObject::ShaderModule(h) => self.destroy_shader_module(h, None),
            }
        }
    }
}
