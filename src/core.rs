pub mod instance;
pub mod devices;
pub mod queues;
pub mod context;
pub mod allocator;
pub mod swapchain;
