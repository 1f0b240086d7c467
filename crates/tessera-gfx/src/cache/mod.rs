//! 按内容去重的 GFX 对象缓存
//!
//! render pass、pipeline、pipeline layout、descriptor set layout、sampler 都以描述结构体本身作为 key，
//! 字段值相同的两个描述（即使来自不同的调用点）会命中同一个缓存项。
//!
//! 缓存不会同步销毁对象，所有销毁都先进入 [`deferred::DeferredDestroyRing`]，
//! 等待引用它的帧在 GPU 上执行完毕后才真正销毁。

pub mod deferred;
pub mod factory;
pub mod gfx_cache;
pub mod key;
pub mod object_cache;
pub mod pipeline;
pub mod pipeline_layout;
pub mod render_pass;
pub mod sampler;
