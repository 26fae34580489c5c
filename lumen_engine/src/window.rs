/// Window contract consumed by the engine
///
/// Windowing and input polling live outside the engine. An adapter over the
/// platform window implements this trait and translates native events into
/// engine events on the bus.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::event::EventBus;
use crate::graphics_device::Extent2D;

pub trait Window: HasDisplayHandle + HasWindowHandle {
    /// True once the user asked to close the window
    fn should_close(&self) -> bool;

    /// Pump native events, publishing `WindowResized`, `KeyInput`, ... on `events`
    fn poll_events(&mut self, events: &mut EventBus);

    /// Current framebuffer size in pixels (zero while minimized)
    fn extent_in_pixels(&self) -> Extent2D;
}
