//! 多队列提交与 timeline 回收
//!
//! - [`gfx_queue::GfxQueue`]：一个硬件队列，拥有 command pool 和 timeline semaphore
//! - [`in_flight::InFlightTracker`]：按 timeline 值记录尚未完成的提交

pub mod gfx_queue;
pub mod in_flight;
