// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use meadow_core::LogContext;
use meadow_platform::{framebuffer_size, FramebufferSize, WindowRequest};
use meadow_render::{RenderSettings, RenderSize, Renderer};
use meadow_render_vk::VkRenderer;
use tracing::{debug, error, info, warn};

use meadow_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

use config::{AppConfig, ConfigSource, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; missing means compiled-in defaults
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory for verbose/info/warning/error logs (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn render_size(size: FramebufferSize) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

struct App {
    cfg: AppConfig,
    settings: RenderSettings,
    // renderer before window: the surface must go first
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    /// First fatal error; returned from main once the loop has stopped.
    failure: Option<anyhow::Error>,
    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppConfig) -> Self {
        let settings = cfg.render_settings();
        App {
            cfg,
            settings,
            renderer: None,
            window: None,
            failure: None,
            exiting: false,
            paused: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = self.cfg.window_spec().open(event_loop)?;
        let size = framebuffer_size(&window);

        let mut renderer = VkRenderer::new(&window, &window, render_size(size), &self.settings)?;
        renderer.set_clear_color(self.cfg.render.clear_color);
        renderer.set_vsync(self.cfg.render.vsync);

        info!(
            "window {}x{}, frames in flight = {}, present = {:?}",
            size.width, size.height, self.settings.frames_in_flight, self.settings.present_policy
        );
        self.paused = size.is_empty();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Keeps the first fatal error so main can exit non-zero with it.
    fn record_failure(&mut self, stage: &'static str, e: anyhow::Error) {
        error!("{stage} failed: {e:#}");
        if self.failure.is_none() {
            self.failure = Some(e.context(stage));
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, stage: &'static str, e: anyhow::Error) {
        self.record_failure(stage, e);
        self.shutdown(event_loop);
    }

    fn finish(mut self) -> Result<()> {
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.open(event_loop) {
                self.fail(event_loop, "meadow setup", e);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        let Some(request) = WindowRequest::from_event(&event) else {
            return;
        };

        match request {
            WindowRequest::Close => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowRequest::Resize(size) => {
                let now_paused = size.is_empty();
                if self.paused != now_paused {
                    info!("Resized → {}x{} (paused={})", size.width, size.height, now_paused);
                } else {
                    debug!("Resized → {}x{}", size.width, size.height);
                }
                self.paused = now_paused;

                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(render_size(size)) {
                        self.fail(event_loop, "resize", e);
                        return;
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowRequest::Redraw => {
                if self.exiting || self.paused {
                    return;
                }

                if let Some(renderer) = &mut self.renderer {
                    match renderer.render() {
                        Ok(()) => {
                            self.frames = self.frames.saturating_add(1);
                        }
                        Err(e) => self.fail(event_loop, "render loop", e),
                    }
                }
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // window-size=0 → sleep until the next event
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            debug!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (cfg, source) = AppConfig::load(&args.config);

    let log_dir = args.log_dir.clone().unwrap_or_else(|| cfg.logging.dir.clone());
    // Kept alive for the whole run; the file writers live in it.
    let logs = LogContext::new(&log_dir, &cfg.logging.console_filter)?;
    logs.install()?;

    match &source {
        ConfigSource::File => info!("config loaded from {}", args.config.display()),
        ConfigSource::Missing => debug!("no {}, using defaults", args.config.display()),
        ConfigSource::Invalid(why) => warn!("ignoring malformed config ({why}), using defaults"),
    }
    info!("logging to {}", logs.dir().display());

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    app.finish()
}
