//! Vulkan GFX 抽象层
//!
//! 位于场景渲染器与 Vulkan 之间，负责：
//! - 设备内存的子分配，以及 staging buffer 池
//! - render pass / pipeline / pipeline layout / sampler 等对象按内容去重缓存
//! - bindless 描述符数组的槽位管理
//! - shader 编译、反射与热重载
//! - 命令录制、barrier 转换、多队列提交与 timeline 回收
//!
//! 所有状态都挂在显式的 [`gfx::Gfx`] 上下文里，通过引用传递，不使用全局单例。

pub mod bindless;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod foundation;
pub mod frame;
pub mod gfx;
pub mod memory;
pub mod queue;
pub mod resources;
pub mod shader;
pub mod swapchain;
