use std::path::Path;

use ash::vk;
use serde::Deserialize;
use tessera_tools::resource::TesseraPath;

use crate::error::GfxError;

const MIB: u64 = 1024 * 1024;

/// GFX 层的全部配置，从 TOML 文件中读取，缺省字段使用默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    pub app_name: String,
    /// 同时在 GPU 上执行的帧数，也是 deferred destroy ring 的长度
    pub frames_in_flight: usize,
    pub memory: MemoryConfig,
    pub bindless: BindlessConfig,
    pub swapchain: SwapchainConfig,
    pub shader: ShaderConfig,
}
impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            app_name: "tessera".to_string(),
            frames_in_flight: 3,
            memory: MemoryConfig::default(),
            bindless: BindlessConfig::default(),
            swapchain: SwapchainConfig::default(),
            shader: ShaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 新建 MemoryBlock 的默认大小
    pub block_size: u64,
    /// 单次分配允许的最大尺寸，超过即为配置错误
    pub max_block_size: u64,
    /// CPU 可见的 staging block 的默认大小
    pub staging_block_size: u64,
    /// staging buffer 在池中空闲超过这么多帧后被销毁
    pub staging_max_idle_frames: u64,
}
impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * MIB,
            max_block_size: 256 * MIB,
            staging_block_size: 16 * MIB,
            staging_max_idle_frames: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BindlessConfig {
    pub max_textures: u32,
    pub max_samplers: u32,
    pub max_storage_images: u32,
}
impl Default for BindlessConfig {
    fn default() -> Self {
        Self {
            max_textures: 1024,
            max_samplers: 32,
            max_storage_images: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    /// 获取 swapchain image 的最长等待时间，单位：纳秒
    pub acquire_timeout_ns: u64,
    /// fifo / mailbox / immediate
    pub present_mode: String,
}
impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ns: 1_000_000_000,
            present_mode: "fifo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub glslc_path: String,
    pub include_dirs: Vec<String>,
}
impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            glslc_path: "glslc".to_string(),
            include_dirs: vec![],
        }
    }
}

// load
impl GfxConfig {
    /// 从指定的 TOML 文件读取配置，文件不存在时使用默认值
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: Self = tessera_tools::config::load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取工作区下的 `config/tessera.toml`
    pub fn load_default() -> anyhow::Result<Self> {
        Self::load(&TesseraPath::config_path("tessera.toml"))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = tessera_tools::config::parse_toml(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), GfxError> {
        if self.frames_in_flight == 0 {
            return Err(GfxError::Config("frames_in_flight must be at least 1".to_string()));
        }
        if self.memory.block_size == 0 || self.memory.staging_block_size == 0 {
            return Err(GfxError::Config("memory block sizes must be positive".to_string()));
        }
        if self.memory.block_size > self.memory.max_block_size {
            return Err(GfxError::Config(format!(
                "memory.block_size ({}) exceeds memory.max_block_size ({})",
                self.memory.block_size, self.memory.max_block_size
            )));
        }
        self.swapchain.vk_present_mode()?;
        Ok(())
    }
}

impl SwapchainConfig {
    pub fn vk_present_mode(&self) -> Result<vk::PresentModeKHR, GfxError> {
        match self.present_mode.to_ascii_lowercase().as_str() {
            "fifo" => Ok(vk::PresentModeKHR::FIFO),
            "mailbox" => Ok(vk::PresentModeKHR::MAILBOX),
            "immediate" => Ok(vk::PresentModeKHR::IMMEDIATE),
            other => Err(GfxError::Config(format!("unknown present mode: {}", other))),
        }
    }
}
