/// GPU context: device, shared memory state and lifecycle

pub mod context;
pub mod device;
pub mod gpu_context;

pub use context::Context;
pub use device::Device;
pub use gpu_context::GpuContext;
