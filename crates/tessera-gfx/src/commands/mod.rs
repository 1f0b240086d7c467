//! 命令录制与提交相关的封装

pub mod barrier;
pub mod command_buffer;
pub mod command_pool;
pub mod semaphore;
pub mod submit_info;
