//! Bindless 描述符表
//!
//! shader 通过一个小整数下标访问共享的大数组（sampled image / sampler / storage image），
//! 不需要每次 draw 重新绑定 descriptor set。
//!
//! # Bindless 架构
//! - Binding 0: sampled image 数组（SAMPLED_IMAGE）
//! - Binding 1: sampler 数组（SAMPLER）
//! - Binding 2: storage image 数组（STORAGE_IMAGE）
//!
//! 释放的下标不会立即复用，要等到释放时所在的帧在 GPU 上执行完毕

pub mod descriptors;
pub mod slot_allocator;
pub mod table;
