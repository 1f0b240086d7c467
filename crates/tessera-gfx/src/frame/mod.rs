//! 帧的生命周期：BeginFrame → 录制 → Submit → Present → EndFrame

pub mod frame_context;
pub mod frame_counter;
