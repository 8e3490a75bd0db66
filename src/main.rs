// =============================================================================
// OKO SANDBOX
// =============================================================================
//
// Small winit application driving the renderer facade: one textured quad,
// FPS in the title, texture cycling and hot-reload.
//
// FRAME FLOW:
// 1. Drain texture changes from the file watcher
// 2. Compute delta time
// 3. Renderer::draw_frame (begin, record, end, present)
//
// KEYS:
//   Escape - quit
//   T      - cycle the test object's texture
//
// =============================================================================

use anyhow::{Context, Result};
use glam::Mat4;
use oko_renderer::{
    create_backend, BackendKind, Config, RenderPacket, Renderer, SurfaceProvider, TextureId,
    TextureWatcher,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

/// Textures cycled with the T key.
const TEST_TEXTURES: [&str; 3] = ["cobblestone", "paving", "paving2"];

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Oko sandbox");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(config.log_level());
    builder.init();

    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Oko Renderer Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
struct App {
    config: Config,

    renderer: Option<Renderer>,
    watcher: Option<TextureWatcher>,
    window: Option<Arc<Window>>,

    test_texture: Option<TextureId>,
    texture_index: usize,

    /// Window has a zero-sized framebuffer; drawing is suspended
    is_minimized: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            watcher: None,
            window: None,
            test_texture: None,
            texture_index: 0,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_renderer(&mut self, window: Arc<Window>) -> Result<()> {
        let surface: Arc<dyn SurfaceProvider> = window;
        let backend = create_backend(BackendKind::Vulkan, &self.config, Some(surface))?;
        let mut renderer = Renderer::new(backend, &self.config.window.title, &self.config)?;

        let texture = renderer.create_texture_slot(TEST_TEXTURES[0]);
        if let Err(e) = renderer.load_texture(texture, TEST_TEXTURES[0]) {
            log::warn!("Using default texture: {:#}", e);
        }
        renderer
            .add_object(Mat4::IDENTITY, Some(texture))
            .context("Failed to create test object")?;

        match TextureWatcher::new(&self.config.assets.texture_dir()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => log::warn!("Texture hot-reload disabled: {:#}", e),
        }

        self.test_texture = Some(texture);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn cycle_texture(&mut self) {
        let (Some(renderer), Some(texture)) = (self.renderer.as_mut(), self.test_texture) else {
            return;
        };
        self.texture_index = (self.texture_index + 1) % TEST_TEXTURES.len();
        let name = TEST_TEXTURES[self.texture_index];
        if let Err(e) = renderer.load_texture(texture, name) {
            log::error!("Failed to load texture '{}': {:#}", name, e);
        }
    }

    fn reload_changed_textures(&mut self) {
        let (Some(watcher), Some(renderer), Some(texture)) =
            (self.watcher.as_ref(), self.renderer.as_mut(), self.test_texture)
        else {
            return;
        };
        let current = TEST_TEXTURES[self.texture_index];
        for name in watcher.drain_changes() {
            if name != current {
                continue;
            }
            log::info!("Reloading texture '{}'", name);
            if let Err(e) = renderer.load_texture(texture, &name) {
                log::warn!("Reload of '{}' failed, keeping old data: {:#}", name, e);
            }
        }
    }

    /// Returns false when the renderer hit an unrecoverable error.
    fn render_frame(&mut self) -> bool {
        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        if self.is_minimized {
            return true;
        }
        self.reload_changed_textures();

        let Some(renderer) = self.renderer.as_mut() else {
            return true;
        };
        if renderer.draw_frame(&RenderPacket { delta_time }).is_err() {
            return false;
        }
        self.update_fps(delta_time);
        true
    }

    fn update_fps(&mut self, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    TEST_TEXTURES[self.texture_index]
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        self.watcher = None;
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(window.clone()) {
            log::error!("Failed to initialize renderer: {:#}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                self.is_minimized = size.width == 0 || size.height == 0;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.on_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.render_frame() {
                    self.shutdown();
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            KeyCode::KeyT => self.cycle_texture(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
