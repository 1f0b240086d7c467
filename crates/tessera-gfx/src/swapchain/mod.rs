pub mod surface;
pub mod swapchain;
