/// Lumen engine: application loop and event orchestration
///
/// The engine owns the window, the event bus, the GPU context, the open scene
/// and the render system. Event handlers never touch engine state directly:
/// they push commands into an inbox that `tick` drains after polling the
/// window, so every reaction runs on the loop with full access to the engine.
///
/// Fields are dropped in declaration order: render system and scene release
/// their GPU resources before the context tears the device down.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::error::Result;
use crate::event::{
    BeforeCursorModeUpdated, BeforeSwapchainRecreated, BeforeWindowRecreated, CursorMode,
    EventBus, Key, KeyInput, Priority, SceneClosed, SceneOpened, SubscriberId,
    SwapchainRecreated, TryReloadShaders, WindowRecreated, WindowResized,
};
use crate::graphics_device::{Extent2D, GraphicsBackend};
use crate::render::{RenderSystem, UiDrawData};
use crate::scene::{Scene, SceneData};
use crate::window::Window;
use crate::{engine_error, engine_info, engine_warn};

const SOURCE: &str = "lumen::Engine";

/// Work queued by event handlers for the next inbox drain
#[derive(Debug, Clone)]
enum EngineCommand {
    Resize(Extent2D),
    OpenScene(Arc<SceneData>),
    CloseScene,
    ReloadShaders,
    KeyPressed(Key),
    BeforeWindowRecreated,
    WindowRecreated,
    CursorMode(CursorMode),
}

type Inbox = Rc<RefCell<VecDeque<EngineCommand>>>;

pub struct Engine {
    render_system: RenderSystem,
    scene: Option<Scene>,
    context: Context,
    events: EventBus,
    inbox: Inbox,
    subscriber: SubscriberId,
    suspended: bool,
    window: Box<dyn Window>,
}

impl Engine {
    pub fn create(backend: Box<dyn GraphicsBackend>, window: Box<dyn Window>, config: Config) -> Result<Self> {
        let mut events = EventBus::new();
        let context = Context::create(backend, window.as_ref(), &config)?;
        let render_system = RenderSystem::new(&context)?;

        let inbox: Inbox = Rc::default();
        let subscriber = events.register_subscriber();
        subscribe(&mut events, subscriber, &inbox);

        let suspended = window.extent_in_pixels().is_degenerate();
        engine_info!(SOURCE, "Engine created");
        Ok(Self {
            render_system,
            scene: None,
            context,
            events,
            inbox,
            subscriber,
            suspended,
            window,
        })
    }

    pub fn context(&self) -> &Context { &self.context }

    pub fn events(&self) -> &EventBus { &self.events }

    /// Register application handlers
    pub fn events_mut(&mut self) -> &mut EventBus { &mut self.events }

    pub fn render_system(&self) -> &RenderSystem { &self.render_system }

    pub fn render_system_mut(&mut self) -> &mut RenderSystem { &mut self.render_system }

    pub fn scene(&self) -> Option<&Scene> { self.scene.as_ref() }

    /// Open scene, e.g. to update its camera
    pub fn scene_mut(&mut self) -> Option<&mut Scene> { self.scene.as_mut() }

    /// True while the window has a zero-sized framebuffer
    pub fn is_suspended(&self) -> bool { self.suspended }

    pub fn window(&self) -> &dyn Window { self.window.as_ref() }

    pub fn set_ui_draw_data(&mut self, data: Option<UiDrawData>) {
        self.render_system.set_ui_draw_data(data);
    }

    // ===== LOOP =====

    /// Run until the window asks to close, then wait for the GPU
    pub fn run(&mut self) -> Result<()> {
        engine_info!(SOURCE, "Entering main loop");
        while !self.window.should_close() {
            self.tick()?;
        }
        engine_info!(SOURCE, "Main loop finished");
        self.context.device().wait_idle()
    }

    /// One loop iteration: poll, react, render unless suspended
    pub fn tick(&mut self) -> Result<()> {
        self.window.poll_events(&mut self.events);
        self.process_commands()?;
        if self.suspended {
            return Ok(());
        }
        self.render_system.render(self.context.swapchain(), self.scene.as_ref())
    }

    fn process_commands(&mut self) -> Result<()> {
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(command) = next else {
                return Ok(());
            };
            match command {
                EngineCommand::Resize(extent) => self.handle_resize(extent)?,
                EngineCommand::OpenScene(data) => self.load_scene(&data)?,
                EngineCommand::CloseScene => self.unload_scene()?,
                EngineCommand::ReloadShaders => {
                    self.render_system.on_try_reload_shaders()?;
                }
                EngineCommand::KeyPressed(Key::F5) => {
                    self.events.publish(&TryReloadShaders);
                }
                EngineCommand::KeyPressed(_) => {}
                EngineCommand::BeforeWindowRecreated => {
                    self.context.device().wait_idle()?;
                    self.suspended = true;
                }
                EngineCommand::WindowRecreated => {
                    let extent = self.window.extent_in_pixels();
                    self.handle_resize(extent)?;
                }
                EngineCommand::CursorMode(mode) => {
                    if let Some(ui) = self.render_system.ui_renderer_mut() {
                        ui.set_cursor_mode(mode);
                    }
                }
            }
        }
    }

    // ===== RESIZE =====

    fn handle_resize(&mut self, extent: Extent2D) -> Result<()> {
        self.context.device().wait_idle()?;

        self.suspended = extent.is_degenerate();
        if self.suspended {
            engine_info!(SOURCE, "Window minimized, rendering suspended");
            return Ok(());
        }

        self.events.publish(&BeforeSwapchainRecreated);
        self.render_system.on_before_swapchain_recreated();
        self.context.swapchain_mut().recreate(extent)?;
        let swapchain = self.context.swapchain();
        self.render_system.on_swapchain_recreated(swapchain)?;

        let recreated = SwapchainRecreated {
            extent: swapchain.extent(),
            image_count: swapchain.image_count(),
        };
        engine_info!(
            SOURCE,
            "Swapchain recreated: {}x{}, {} images",
            recreated.extent.width,
            recreated.extent.height,
            recreated.image_count
        );
        self.events.publish(&recreated);
        Ok(())
    }

    // ===== SCENE =====

    /// Upload `data` and make it the rendered scene (replaces the open one)
    pub fn open_scene(&mut self, data: Arc<SceneData>) -> Result<()> {
        self.events.publish(&SceneOpened { data });
        self.process_commands()
    }

    pub fn close_scene(&mut self) -> Result<()> {
        self.events.publish(&SceneClosed);
        self.process_commands()
    }

    fn load_scene(&mut self, data: &SceneData) -> Result<()> {
        self.unload_scene()?;
        let scene = Scene::new(self.context.gpu(), data)?;
        self.render_system.on_scene_open(self.context.descriptors_mut(), &scene)?;
        self.scene = Some(scene);
        engine_info!(SOURCE, "Scene opened");
        Ok(())
    }

    fn unload_scene(&mut self) -> Result<()> {
        if self.scene.is_none() {
            return Ok(());
        }
        self.render_system.on_scene_close(self.context.descriptors_mut())?;
        self.scene = None;
        engine_info!(SOURCE, "Scene closed");
        Ok(())
    }

    /// Unsubscribe, release the scene and render system, destroy the context
    pub fn destroy(self) {}
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.events.unsubscribe_all(self.subscriber);
        if let Err(e) = self.context.device().wait_idle() {
            engine_error!(SOURCE, "wait_idle failed during shutdown: {}", e);
        }
        if self.scene.is_some() {
            engine_warn!(SOURCE, "Destroying engine with a scene still open");
        }
        engine_info!(SOURCE, "Engine destroyed");
    }
}

fn subscribe(events: &mut EventBus, subscriber: SubscriberId, inbox: &Inbox) {
    let push = |inbox: &Inbox| {
        let inbox = Rc::clone(inbox);
        move |command: EngineCommand| inbox.borrow_mut().push_back(command)
    };

    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |e: &WindowResized| {
        send(EngineCommand::Resize(e.extent()))
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |e: &SceneOpened| {
        send(EngineCommand::OpenScene(Arc::clone(&e.data)))
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |_: &SceneClosed| {
        send(EngineCommand::CloseScene)
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |_: &TryReloadShaders| {
        send(EngineCommand::ReloadShaders)
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |e: &KeyInput| {
        if e.pressed {
            send(EngineCommand::KeyPressed(e.key))
        }
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::High, move |_: &BeforeWindowRecreated| {
        send(EngineCommand::BeforeWindowRecreated)
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |_: &WindowRecreated| {
        send(EngineCommand::WindowRecreated)
    });
    let send = push(inbox);
    events.subscribe(subscriber, Priority::Normal, move |e: &BeforeCursorModeUpdated| {
        send(EngineCommand::CursorMode(e.mode))
    });
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
