//! Window integration: winit events in, [`MeshViewer`] calls out.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use glam::Vec2;
use log::{error, info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseButton as WinitMouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey as WinitNamedKey};
use winit::window::{Window, WindowId};

use crate::capture::{LogProgress, OffscreenTarget};
use crate::config::ViewerConfig;
use crate::frame::Clock;
use crate::gpu::GpuContext;
use crate::input::{KeyCode, MouseButton, NamedKey};
use crate::render::Renderer;
use crate::viewer::{KeyResponse, MeshViewer};

/// Wheel units reported per line of scrolling.
const WHEEL_UNITS_PER_LINE: f32 = 120.0;

/// The platform could not give us a window; callers may fall back to a
/// headless run.
#[derive(Debug)]
pub struct WindowInitError {
    message: String,
}

impl WindowInitError {
    pub fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    pub fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

struct Running {
    renderer: Renderer,
    viewer: MeshViewer,
    cursor: Vec2,
}

/// winit application driving one viewer window.
pub struct ViewerApp {
    config: ViewerConfig,
    mesh_path: Option<PathBuf>,
    running: Option<Running>,
    last_error: Option<anyhow::Error>,
}

impl ViewerApp {
    pub fn new(config: ViewerConfig, mesh_path: Option<PathBuf>) -> Self {
        Self {
            config,
            mesh_path,
            running: None,
            last_error: None,
        }
    }

    /// Runs until the window closes, returning the error that stopped it, if any.
    pub fn run(mut self, event_loop: EventLoop<()>) -> Result<()> {
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;
        match self.last_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );

        let renderer = block_on(Renderer::new(Arc::clone(&window)))?;
        let refresh = window
            .current_monitor()
            .and_then(|monitor| monitor.refresh_rate_millihertz());
        let fps = self.config.resolve_fps(refresh);
        info!("frame cap {fps} fps");

        let gpu = GpuContext::new(renderer.max_buffer_size());
        let size = renderer.size();
        let mut viewer = MeshViewer::new(&self.config, gpu, size.width, size.height, fps)?;
        if let Some(path) = &self.mesh_path {
            viewer.load_mesh_file(path)?;
        }

        Ok(Running {
            renderer,
            viewer,
            cursor: Vec2::ZERO,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.last_error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(running) => {
                running.renderer.window().request_redraw();
                self.running = Some(running);
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if window_id != running.renderer.window_id() {
            return;
        }
        let title = &self.config.window.title;
        match process_event(running, event_loop, event, title) {
            Ok(()) => {}
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.renderer.window().request_redraw();
        }
    }
}

fn process_event(
    running: &mut Running,
    event_loop: &ActiveEventLoop,
    event: WindowEvent,
    title: &str,
) -> Result<()> {
    let Running {
        renderer,
        viewer,
        cursor,
    } = running;
    match event {
        WindowEvent::CloseRequested => event_loop.exit(),
        WindowEvent::Resized(size) => {
            renderer.resize(size);
            viewer.resize(size.width, size.height);
        }
        WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
            let Some(key) = map_key(&event.logical_key) else {
                return Ok(());
            };
            match viewer.handle_key(key) {
                KeyResponse::Handled | KeyResponse::Ignored => {}
                KeyResponse::Quit => event_loop.exit(),
                KeyResponse::SaveScreenshot => {
                    capture_screenshots(viewer, renderer, false);
                }
                KeyResponse::ScreenshotBatch => {
                    capture_screenshots(viewer, renderer, true);
                }
            }
        }
        WindowEvent::MouseInput { state, button, .. } => {
            let button = map_mouse_button(button);
            match state {
                ElementState::Pressed => viewer.pointer_pressed(button, *cursor),
                ElementState::Released => viewer.pointer_released(button),
            }
        }
        WindowEvent::CursorMoved { position, .. } => {
            *cursor = Vec2::new(position.x as f32, position.y as f32);
            viewer.pointer_moved(*cursor);
        }
        WindowEvent::MouseWheel { delta, .. } => {
            let units = match delta {
                MouseScrollDelta::LineDelta(_, lines) => lines * WHEEL_UNITS_PER_LINE,
                MouseScrollDelta::PixelDelta(pixels) => pixels.y as f32,
            };
            viewer.wheel(units);
        }
        WindowEvent::DroppedFile(path) => {
            if let Err(err) = viewer.load_mesh_file(&path) {
                warn!("could not open {}: {err:#}", path.display());
            }
        }
        WindowEvent::RedrawRequested => {
            let frame = viewer.render_frame();
            let result = {
                let ctx = viewer.gpu().make_current()?;
                renderer.render(&ctx, &frame)
            };
            match result {
                Ok(()) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    let size = renderer.window().inner_size();
                    renderer.resize(size);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    return Err(anyhow!("GPU is out of memory"));
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    info!("Surface timeout; retrying next frame");
                }
                Err(err) => warn!("surface error: {err}"),
            }
            if let Some(fps) = viewer.poll_fps() {
                renderer.window().set_title(&format!("{title} - {fps} fps"));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Saves one screenshot or the configured batch. Failures are logged and the
/// viewer keeps running; returns how many images were written.
fn capture_screenshots<C: Clock>(
    viewer: &mut MeshViewer<C>,
    target: &mut dyn OffscreenTarget,
    batch: bool,
) -> Option<usize> {
    let request = viewer.screenshot_request().clone();
    let result = if batch {
        viewer.take_screenshots(&request, target, &mut LogProgress)
    } else {
        viewer
            .save_screenshot(target, &request.directory)
            .map(|path| vec![path])
    };
    match result {
        Ok(saved) => {
            info!("saved {} screenshot(s) to {}", saved.len(), request.directory.display());
            Some(saved.len())
        }
        Err(err) => {
            error!("screenshot failed: {err:#}");
            None
        }
    }
}

fn map_mouse_button(button: WinitMouseButton) -> MouseButton {
    let index = match button {
        WinitMouseButton::Left => 0,
        WinitMouseButton::Right => 1,
        WinitMouseButton::Middle => 2,
        WinitMouseButton::Back => 3,
        WinitMouseButton::Forward => 4,
        WinitMouseButton::Other(value) => value.min(u16::from(u8::MAX)),
    } as u8;
    MouseButton::new(index)
}

fn map_key(key: &Key) -> Option<KeyCode> {
    Some(match key {
        Key::Named(WinitNamedKey::ArrowUp) => KeyCode::Named(NamedKey::Up),
        Key::Named(WinitNamedKey::ArrowDown) => KeyCode::Named(NamedKey::Down),
        Key::Named(WinitNamedKey::ArrowLeft) => KeyCode::Named(NamedKey::Left),
        Key::Named(WinitNamedKey::ArrowRight) => KeyCode::Named(NamedKey::Right),
        Key::Named(WinitNamedKey::Escape) => KeyCode::Named(NamedKey::Escape),
        Key::Character(text) => KeyCode::character(text.chars().next()?),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ManualClock;
    use crate::gpu::ContextGuard;
    use crate::render::RenderFrame;
    use image::RgbaImage;

    struct BlankTarget {
        fail: bool,
    }

    impl OffscreenTarget for BlankTarget {
        fn size(&self) -> (u32, u32) {
            (2, 2)
        }

        fn render_to_image(&mut self, _ctx: &ContextGuard<'_>, _frame: &RenderFrame) -> Result<RgbaImage> {
            if self.fail {
                Err(anyhow!("device lost"))
            } else {
                Ok(RgbaImage::new(2, 2))
            }
        }
    }

    fn viewer_saving_to(directory: &std::path::Path) -> MeshViewer<ManualClock> {
        let mut config = ViewerConfig::default();
        config.screenshots.directory = directory.to_path_buf();
        config.screenshots.count = 2;
        MeshViewer::with_clock(&config, GpuContext::default(), 64, 48, 0, ManualClock::new()).unwrap()
    }

    #[test]
    fn failed_screenshots_leave_the_viewer_running() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"file").unwrap();

        let mut viewer = viewer_saving_to(&blocker);
        let mut target = BlankTarget { fail: false };
        assert_eq!(capture_screenshots(&mut viewer, &mut target, false), None);
        assert_eq!(capture_screenshots(&mut viewer, &mut target, true), None);

        let mut broken = BlankTarget { fail: true };
        assert_eq!(capture_screenshots(&mut viewer, &mut broken, false), None);
        assert!(!viewer.gpu().is_current());
        assert_eq!(viewer.compose_frame().draws.len(), 1);
    }

    #[test]
    fn screenshots_report_what_was_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut viewer = viewer_saving_to(dir.path());
        let mut target = BlankTarget { fail: false };
        assert_eq!(capture_screenshots(&mut viewer, &mut target, false), Some(1));
        assert_eq!(capture_screenshots(&mut viewer, &mut target, true), Some(2));
    }

    #[test]
    fn letters_and_arrows_are_mapped() {
        assert_eq!(
            map_key(&Key::Character("s".into())),
            Some(KeyCode::Character('S'))
        );
        assert_eq!(
            map_key(&Key::Named(WinitNamedKey::ArrowLeft)),
            Some(KeyCode::Named(NamedKey::Left))
        );
        assert_eq!(map_key(&Key::Named(WinitNamedKey::Tab)), None);
    }

    #[test]
    fn mouse_buttons_keep_their_index() {
        assert_eq!(map_mouse_button(WinitMouseButton::Middle), MouseButton::MIDDLE);
        assert_eq!(map_mouse_button(WinitMouseButton::Other(7)).index(), 7);
        assert_eq!(map_mouse_button(WinitMouseButton::Other(900)).index(), u8::MAX);
    }

    #[test]
    fn window_errors_carry_the_stage() {
        let err = WindowInitError::from_panic("event loop", Box::new("no display"));
        assert_eq!(err.to_string(), "failed to initialize event loop: no display");
    }
}
