/// Graphics device module - backend contract and GPU vocabulary

pub mod command_list;
pub mod graphics_device;
pub mod types;

pub use command_list::*;
pub use graphics_device::*;
pub use types::*;

// Recording backend for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
