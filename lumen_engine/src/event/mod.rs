/// Event module - typed publish/subscribe registry and engine events

pub mod event_bus;
pub mod events;

pub use event_bus::*;
pub use events::*;
