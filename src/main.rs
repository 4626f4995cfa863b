// =============================================================================
// VULKAN SQUARE - A rotating colored square, drawn the long way
// =============================================================================
//
// The smallest complete Vulkan program that survives real window handling:
// resizing, minimizing, an out-of-date swapchain, and a clean shutdown.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, config, FPS title)                      │
// │    └── Renderer (lifecycle controller, frame sequencing)        │
// │          └── VulkanBackend (pipeline, buffers, sync, targets)   │
// │                └── Swapchain + VulkanDevice                     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Advance the rotation
// 2. Wait for the sync slot's previous frame
// 3. Acquire swapchain image
// 4. Upload transform, submit the pre-recorded commands
// 5. Present rendered image to screen
//
// =============================================================================

mod backend;
mod config;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use backend::{BackendSettings, VulkanBackend, VulkanDevice};
use config::Config;
use renderer::{FrameStatus, Renderer, RendererSettings};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, config_error) = Config::load_or_default("config.toml");

    init_logging(&config)?;
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting Vulkan square");
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Release the GPU before reporting
    app.renderer = None;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            log::info!("Exited cleanly");
            Ok(())
        }
    }
}

/// Initialize logging, optionally redirected into the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        writeln!(file, "=== Vulkan Square Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Everything the event loop needs, owned in one place.
///
/// Field order matters for Drop: the renderer holds the Vulkan surface and
/// has to go before the window it was created for.
struct App {
    config: Config,
    quit_key: KeyCode,

    renderer: Option<Renderer<VulkanBackend>>,
    window: Option<Arc<Window>>,
    gpu_name: String,

    /// First unrecoverable error; turned into the process exit status
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let quit_key = config.get_quit_key();
        let now = Instant::now();
        Self {
            config,
            quit_key,
            renderer: None,
            window: None,
            gpu_name: String::new(),
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.debug.validation_layers && cfg!(debug_assertions),
            window,
        )?;

        let backend = VulkanBackend::new(
            device,
            BackendSettings {
                clear_color: self.config.graphics.clear_color,
                present_mode: self.config.get_present_mode(),
                swapchain_images: self.config.graphics.swapchain_images,
            },
        );
        self.gpu_name = backend.device_name();

        let size = window.inner_size();
        let renderer = Renderer::new(
            backend,
            size.width,
            size.height,
            RendererSettings {
                frames_in_flight: self.config.graphics.max_frames_in_flight,
                rotation_step: self.config.graphics.rotation_step,
            },
        )?;

        window.set_title(&format!("{} - {}", self.config.window.title, self.gpu_name));
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Record the error, tear the renderer down and leave the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        let state = self.renderer.as_ref().map(|r| r.state());
        log::error!("Fatal error (renderer state {:?}): {:?}", state, error);
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.shutdown() {
                log::error!("Shutdown after failure also failed: {:?}", e);
            }
        }
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    fn key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        if key == self.quit_key {
            log::info!("{:?} pressed, exiting...", key);
            event_loop.exit();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    self.gpu_name,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
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
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
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
                if let Some(renderer) = self.renderer.as_mut() {
                    log::info!("Swapchain was rebuilt {} times", renderer.rebuild_count());
                    if let Err(e) = renderer.shutdown() {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.resize(size.width, size.height) {
                    Ok(()) => match renderer.targets() {
                        Some(targets) => log::debug!(
                            "Surface targets: {}x{}, {} images",
                            targets.extent.width,
                            targets.extent.height,
                            targets.image_count
                        ),
                        None => log::debug!("Renderer is {:?}", renderer.state()),
                    },
                    Err(e) => self.fail(event_loop, e),
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.run() {
                    Ok(FrameStatus::Presented) => self.update_fps(),
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.key(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Keep drawing continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
