use std::path::PathBuf;

use ash::vk;

/// 输出调用位置和错误信息，然后终止
///
/// 用于调用方的编程错误（0 大小的分配、render pass 嵌套错误、槽位耗尽等）。
/// release 下 `panic = 'abort'`，会直接结束进程。
macro_rules! gfx_fatal {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        log::error!("[{}:{}] {}", file!(), line!(), msg);
        panic!("{}", msg)
    }};
}
pub(crate) use gfx_fatal;

/// 与 surface 相关的暂时性错误，调用方需要重建 swapchain 相关的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// surface 过期或者 suboptimal，通常是窗口尺寸发生了变化
    #[error("surface is out of date, swapchain needs resize")]
    NeedsResize,
    #[error("surface lost")]
    Lost,
    #[error("swapchain image acquisition timed out")]
    AcquireTimeout,
}
impl SurfaceError {
    /// 将 swapchain 相关调用的 vk::Result 转换为 SurfaceError
    ///
    /// 无法识别的错误返回 None，由调用者按致命错误处理
    pub fn from_vk(result: vk::Result) -> Option<Self> {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => Some(Self::NeedsResize),
            vk::Result::ERROR_SURFACE_LOST_KHR => Some(Self::Lost),
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Some(Self::AcquireTimeout),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("failed to access shader file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to compile {path:?}:\n{log}")]
    Compiler { path: PathBuf, log: String },
    #[error("failed to reflect shader: {0}")]
    Reflection(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("invalid gfx config: {0}")]
    Config(String),
}

/// 无法恢复的 Vulkan 调用结果（device lost，显存耗尽等）
pub trait VkResultExt<T> {
    /// 失败时输出调用位置，然后终止
    fn or_fatal(self, what: &str) -> T;
}
impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[track_caller]
    fn or_fatal(self, what: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                let location = std::panic::Location::caller();
                log::error!("[{}:{}] {} failed: {:?}", location.file(), location.line(), what, e);
                panic!("{} failed: {:?}", what, e)
            }
        }
    }
}
