//! The viewer: camera, light, axis gizmo and the loaded mesh, driven by
//! pointer/keyboard input and turned into one [`RenderFrame`] per redraw.

use std::path::{Path, PathBuf};

use anyhow::Result;
use glam::{Vec2, Vec3};
use log::{info, warn};
use rand::Rng;

use crate::camera::{Camera, KEY_STEP};
use crate::capture::{
    random_rotation, save_image, screenshot_path, upscale, ImageFormat, OffscreenTarget,
    ProgressSink, ScreenshotRequest,
};
use crate::config::{DisplayConfig, ViewerConfig};
use crate::drawable::{Axis, DrawableError, DrawableObject, Geometry, Mesh};
use crate::frame::{Clock, FrameLimiter, SystemClock};
use crate::gpu::GpuContext;
use crate::input::{DragMode, KeyCode, MouseButton, NamedKey, PointerState};
use crate::light::Light;
use crate::mesh_io::{self, TriMesh};
use crate::render::RenderFrame;
use crate::shader::{PolygonFill, PrimitiveMode, RasterState, ShaderContext, ShaderProgram};

/// Single screenshots are saved at this multiple of the window size.
pub const SCREENSHOT_SCALE: u32 = 2;

/// What the caller has to do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyResponse {
    /// The viewer changed its own state; redraw.
    Handled,
    Ignored,
    SaveScreenshot,
    ScreenshotBatch,
    Quit,
}

pub struct MeshViewer<C: Clock = SystemClock> {
    gpu: GpuContext,
    shader: ShaderProgram,
    camera: Camera,
    light: Light,
    axis: DrawableObject,
    mesh: Option<DrawableObject>,
    display: DisplayConfig,
    normalize_mesh: bool,
    screenshots: ScreenshotRequest,
    pointer: PointerState,
    limiter: FrameLimiter<C>,
}

impl MeshViewer<SystemClock> {
    pub fn new(
        config: &ViewerConfig,
        gpu: GpuContext,
        width: u32,
        height: u32,
        target_fps: u32,
    ) -> Result<Self, DrawableError> {
        Self::with_clock(config, gpu, width, height, target_fps, SystemClock::default())
    }
}

impl<C: Clock> MeshViewer<C> {
    pub fn with_clock(
        config: &ViewerConfig,
        gpu: GpuContext,
        width: u32,
        height: u32,
        target_fps: u32,
        clock: C,
    ) -> Result<Self, DrawableError> {
        let mut shader = ShaderProgram::standard();
        let light = Light::from_config(&config.light, shader.interface());
        shader.set_named_uniform(
            "wireframe_color",
            Vec3::from(config.display.wireframe_color).into(),
        );

        let axis = {
            let ctx = gpu.make_current()?;
            DrawableObject::from_descriptor(&ctx, shader.interface(), Axis::default().build())?
        };

        Ok(Self {
            gpu,
            shader,
            camera: Camera::new(config.camera, width, height),
            light,
            axis,
            mesh: None,
            display: config.display,
            normalize_mesh: config.normalize_mesh,
            screenshots: config.screenshots.clone(),
            pointer: PointerState::new(),
            limiter: FrameLimiter::with_clock(clock, target_fps),
        })
    }

    /// Reads a mesh file and shows it in place of the current one.
    pub fn load_mesh_file(&mut self, path: &Path) -> Result<()> {
        let surface = mesh_io::load_mesh(path)?;
        let label = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("mesh");
        self.replace_mesh(label, surface)?;
        Ok(())
    }

    /// Shows `surface` in place of the current mesh.
    pub fn swap_mesh(&mut self, surface: TriMesh) -> Result<(), DrawableError> {
        self.replace_mesh("mesh", surface)
    }

    fn replace_mesh(&mut self, label: &str, surface: TriMesh) -> Result<(), DrawableError> {
        let mut mesh = Mesh::new(label, surface);
        if self.normalize_mesh {
            mesh.normalize();
        }
        let ctx = self.gpu.make_current()?;
        let object = DrawableObject::from_descriptor(&ctx, self.shader.interface(), mesh.build())?;
        info!(
            "showing {label}: {} vertices, {} indices",
            object.vertex_count(),
            object.element_count()
        );
        self.mesh = Some(object);
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
    }

    /// Waits for the frame slot, then builds the frame.
    pub fn render_frame(&mut self) -> RenderFrame {
        self.limiter.begin_frame();
        self.compose_frame()
    }

    /// Pushes the per-frame uniforms and records the axis and mesh draws.
    pub fn compose_frame(&mut self) -> RenderFrame {
        let shader = &mut self.shader;
        shader.set_raster(RasterState {
            polygon: PolygonFill::Fill,
            cull_back_faces: self.display.cull_back_faces,
        });
        shader.set_named_uniform("smooth_on", self.display.smooth.into());
        shader.set_named_uniform("wireframe_on", false.into());
        self.light.sync_to_shader(shader);
        shader.set_named_uniform("projection", self.camera.projection().into());
        shader.set_named_uniform("view", self.camera.view().into());
        shader.set_named_uniform("view_inverse", self.camera.view_inverse().into());

        // The gizmo keeps its own colours.
        let lit = self.light.is_enabled();
        if lit {
            self.light.turn_off(shader);
        }
        self.axis.draw(shader, self.axis.primitive_mode());
        if lit {
            self.light.turn_on(shader);
        }

        if let Some(mesh) = &self.mesh {
            if self.display.fill {
                mesh.draw(shader, PrimitiveMode::Triangles);
            }
            if self.display.wireframe {
                let fill = shader.raster();
                shader.set_raster(RasterState {
                    polygon: PolygonFill::Line,
                    ..fill
                });
                shader.set_named_uniform("wireframe_on", true.into());
                mesh.draw(shader, PrimitiveMode::Triangles);
                shader.set_named_uniform("wireframe_on", false.into());
                shader.set_raster(fill);
            }
        }

        RenderFrame {
            clear_color: self.display.clear_color,
            draws: shader.take_draws(),
        }
    }

    pub fn pointer_pressed(&mut self, button: MouseButton, position: Vec2) {
        self.pointer.press(button, position);
    }

    pub fn pointer_released(&mut self, button: MouseButton) {
        self.pointer.release(button);
    }

    /// Rotates while the left button is held, pans while the middle one is.
    pub fn pointer_moved(&mut self, position: Vec2) {
        let last = self.pointer.move_to(position);
        match self.pointer.drag_mode() {
            Some(DragMode::Rotate) => self.camera.apply_drag(position, last),
            Some(DragMode::Pan) => self.camera.apply_pan(position - last),
            None => {}
        }
    }

    /// `delta` is in wheel units, 120 per notch.
    pub fn wheel(&mut self, delta: f32) {
        self.camera.apply_zoom(delta);
    }

    pub fn handle_key(&mut self, key: KeyCode) -> KeyResponse {
        match key {
            KeyCode::Named(NamedKey::Up) => self.camera.nudge(0.0, KEY_STEP),
            KeyCode::Named(NamedKey::Down) => self.camera.nudge(0.0, -KEY_STEP),
            KeyCode::Named(NamedKey::Left) => self.camera.nudge(KEY_STEP, 0.0),
            KeyCode::Named(NamedKey::Right) => self.camera.nudge(-KEY_STEP, 0.0),
            KeyCode::Named(NamedKey::Escape) => return KeyResponse::Quit,
            KeyCode::Character('V') => self.reset_view(),
            KeyCode::Character('W') => self.display_wireframe(!self.display.wireframe),
            KeyCode::Character('C') => self.draw_back_faces(self.display.cull_back_faces),
            KeyCode::Character('S') => return KeyResponse::SaveScreenshot,
            KeyCode::Character('R') => return KeyResponse::ScreenshotBatch,
            KeyCode::Character(_) => return KeyResponse::Ignored,
        }
        KeyResponse::Handled
    }

    pub fn reset_view(&mut self) {
        self.camera.reset_view();
    }

    pub fn set_target_fps(&mut self, fps: u32) {
        self.limiter.set_target_fps(fps);
    }

    /// Frames rendered since the last call; resets the count.
    pub fn take_computed_frames(&mut self) -> u64 {
        self.limiter.take_computed_frames()
    }

    /// Frame count of the last full second, at most once per second.
    pub fn poll_fps(&mut self) -> Option<u64> {
        self.limiter.poll_fps()
    }

    pub fn set_light_enabled(&mut self, enabled: bool) {
        if enabled {
            self.light.enable(self.shader.interface().uniform("light_on"));
        } else {
            self.light.turn_off(&mut self.shader);
            self.light.disable();
        }
    }

    pub fn set_light_fixed(&mut self, fixed: bool) {
        self.light.update_fixed(fixed);
    }

    pub fn set_light_position(&mut self, position: Vec3) {
        self.light.update_position(position);
    }

    pub fn set_light_color(&mut self, color: Vec3) {
        self.light.update_color(color);
    }

    pub fn set_light_ambient(&mut self, ambient: f32) {
        self.light.update_ambient(ambient);
    }

    pub fn smooth_render(&mut self, on: bool) {
        self.display.smooth = on;
    }

    pub fn display_wireframe(&mut self, on: bool) {
        self.display.wireframe = on;
    }

    pub fn display_fill(&mut self, on: bool) {
        self.display.fill = on;
    }

    /// Showing back faces means not culling them.
    pub fn draw_back_faces(&mut self, show: bool) {
        self.display.cull_back_faces = !show;
    }

    /// Renders the current view offscreen and saves it, upscaled, as a PNG.
    pub fn save_screenshot(
        &mut self,
        target: &mut dyn OffscreenTarget,
        directory: &Path,
    ) -> Result<PathBuf> {
        let frame = self.compose_frame();
        let image = {
            let ctx = self.gpu.make_current()?;
            target.render_to_image(&ctx, &frame)?
        };
        let path = screenshot_path(directory, ImageFormat::Png, 0);
        save_image(&upscale(&image, SCREENSHOT_SCALE), &path, ImageFormat::Png, 100)?;
        Ok(path)
    }

    /// Saves `request.count` images, each from a random rotation.
    ///
    /// The view keeps the last rotation afterwards.
    pub fn take_screenshots(
        &mut self,
        request: &ScreenshotRequest,
        target: &mut dyn OffscreenTarget,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<PathBuf>> {
        self.take_screenshots_with(request, target, progress, &mut rand::rng())
    }

    pub fn take_screenshots_with<R: Rng + ?Sized>(
        &mut self,
        request: &ScreenshotRequest,
        target: &mut dyn OffscreenTarget,
        progress: &mut dyn ProgressSink,
        rng: &mut R,
    ) -> Result<Vec<PathBuf>> {
        if self.mesh.is_none() {
            warn!("taking screenshots without a mesh loaded");
        }
        let mut saved = Vec::with_capacity(request.count);
        for index in 0..request.count {
            self.camera.set_rotation(random_rotation(rng));
            let frame = self.compose_frame();
            let image = {
                let ctx = self.gpu.make_current()?;
                target.render_to_image(&ctx, &frame)?
            };
            let path = screenshot_path(&request.directory, request.format, index);
            save_image(&image, &path, request.format, request.quality)?;
            progress.report(index + 1, request.count, &path);
            saved.push(path);
        }
        Ok(saved)
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn shader(&self) -> &ShaderProgram {
        &self.shader
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn light(&self) -> &Light {
        &self.light
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    pub fn axis(&self) -> &DrawableObject {
        &self.axis
    }

    pub fn mesh(&self) -> Option<&DrawableObject> {
        self.mesh.as_ref()
    }

    /// Batch settings from the configuration.
    pub fn screenshot_request(&self) -> &ScreenshotRequest {
        &self.screenshots
    }

    pub fn clock(&self) -> &C {
        self.limiter.clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ManualClock;
    use crate::gpu::ContextGuard;
    use crate::shader::{RecordedDraw, UniformValue};
    use image::RgbaImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn viewer() -> MeshViewer<ManualClock> {
        MeshViewer::with_clock(
            &ViewerConfig::default(),
            GpuContext::default(),
            800,
            600,
            60,
            ManualClock::new(),
        )
        .unwrap()
    }

    fn triangle() -> TriMesh {
        TriMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            triangles: vec![[0, 1, 2]],
        }
    }

    fn uniform(draw: &RecordedDraw, viewer: &MeshViewer<ManualClock>, name: &str) -> UniformValue {
        let slot = viewer.shader().interface().uniform(name).unwrap();
        draw.uniforms.get(slot).unwrap()
    }

    struct SolidTarget {
        renders: usize,
    }

    impl OffscreenTarget for SolidTarget {
        fn size(&self) -> (u32, u32) {
            (4, 3)
        }

        fn render_to_image(&mut self, ctx: &ContextGuard<'_>, frame: &RenderFrame) -> Result<RgbaImage> {
            assert!(ctx.context().is_current());
            assert!(!frame.draws.is_empty());
            self.renders += 1;
            Ok(RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255])))
        }
    }

    #[test]
    fn axis_is_drawn_unlit_and_light_restored() {
        let mut viewer = viewer();
        let frame = viewer.compose_frame();
        assert_eq!(frame.draws.len(), 1);
        let axis = &frame.draws[0];
        assert_eq!(axis.mode, PrimitiveMode::Lines);
        assert_eq!(axis.element_count, 6);
        assert_eq!(uniform(axis, &viewer, "light_on"), UniformValue::Bool(false));
        assert!(viewer.light().is_enabled());
        assert_eq!(
            viewer.shader().uniform_value("light_on"),
            Some(UniformValue::Bool(true))
        );
    }

    #[test]
    fn mesh_is_drawn_lit_with_camera_matrices() {
        let mut viewer = viewer();
        viewer.swap_mesh(triangle()).unwrap();
        let frame = viewer.compose_frame();
        assert_eq!(frame.draws.len(), 2);
        let mesh = &frame.draws[1];
        assert_eq!(mesh.element_count, 3);
        assert_eq!(uniform(mesh, &viewer, "light_on"), UniformValue::Bool(true));
        assert_eq!(uniform(mesh, &viewer, "wireframe_on"), UniformValue::Bool(false));
        assert_eq!(
            uniform(mesh, &viewer, "view"),
            UniformValue::Mat4(viewer.camera().view())
        );
        assert_eq!(mesh.layout.total_size(), 3 * 3 * 3 * 4);
    }

    #[test]
    fn wireframe_overlay_adds_a_line_draw() {
        let mut viewer = viewer();
        viewer.swap_mesh(triangle()).unwrap();
        assert_eq!(viewer.handle_key(KeyCode::character('w')), KeyResponse::Handled);
        let frame = viewer.compose_frame();
        assert_eq!(frame.draws.len(), 3);
        let wire = &frame.draws[2];
        assert_eq!(wire.raster.polygon, PolygonFill::Line);
        assert_eq!(uniform(wire, &viewer, "wireframe_on"), UniformValue::Bool(true));

        viewer.display_fill(false);
        assert_eq!(viewer.compose_frame().draws.len(), 2);
    }

    #[test]
    fn cull_key_toggles_back_faces() {
        let mut viewer = viewer();
        viewer.handle_key(KeyCode::character('c'));
        assert!(viewer.display().cull_back_faces);
        assert!(viewer.compose_frame().draws[0].raster.cull_back_faces);
        viewer.handle_key(KeyCode::character('c'));
        assert!(!viewer.display().cull_back_faces);
    }

    #[test]
    fn disabling_light_pushes_off_state() {
        let mut viewer = viewer();
        viewer.swap_mesh(triangle()).unwrap();
        viewer.set_light_enabled(false);
        let frame = viewer.compose_frame();
        assert_eq!(uniform(&frame.draws[1], &viewer, "light_on"), UniformValue::Bool(false));
        viewer.set_light_enabled(true);
        let frame = viewer.compose_frame();
        assert_eq!(uniform(&frame.draws[1], &viewer, "light_on"), UniformValue::Bool(true));
    }

    #[test]
    fn light_mutators_reach_the_shader() {
        let mut viewer = viewer();
        viewer.swap_mesh(triangle()).unwrap();
        viewer.set_light_ambient(0.9);
        viewer.set_light_fixed(false);
        let frame = viewer.compose_frame();
        assert_eq!(uniform(&frame.draws[1], &viewer, "light_ambient"), UniformValue::Float(0.9));
        assert_eq!(uniform(&frame.draws[1], &viewer, "light_fixed"), UniformValue::Bool(false));
    }

    #[test]
    fn left_drag_rotates_middle_drag_pans() {
        let mut viewer = viewer();
        viewer.pointer_moved(Vec2::new(10.0, 10.0));
        assert_eq!(viewer.camera().rotation(), glam::Mat4::IDENTITY);

        viewer.pointer_pressed(MouseButton::LEFT, Vec2::new(400.0, 300.0));
        viewer.pointer_moved(Vec2::new(420.0, 310.0));
        viewer.pointer_released(MouseButton::LEFT);
        assert_ne!(viewer.camera().rotation(), glam::Mat4::IDENTITY);

        viewer.pointer_pressed(MouseButton::MIDDLE, Vec2::new(100.0, 100.0));
        viewer.pointer_moved(Vec2::new(150.0, 100.0));
        assert!(viewer.camera().position().x > 0.0);

        assert_eq!(viewer.handle_key(KeyCode::character('v')), KeyResponse::Handled);
        assert_eq!(viewer.camera().rotation(), glam::Mat4::IDENTITY);
        assert_eq!(viewer.camera().position(), crate::camera::DEFAULT_POSITION);
    }

    #[test]
    fn arrow_keys_nudge_the_camera() {
        let mut viewer = viewer();
        viewer.handle_key(KeyCode::Named(NamedKey::Left));
        viewer.handle_key(KeyCode::Named(NamedKey::Down));
        assert_eq!(viewer.camera().position(), Vec3::new(0.5, 0.0, -2.5));
        assert_eq!(viewer.handle_key(KeyCode::Named(NamedKey::Escape)), KeyResponse::Quit);
        assert_eq!(viewer.handle_key(KeyCode::character('q')), KeyResponse::Ignored);
    }

    #[test]
    fn swapping_mesh_releases_previous_buffers() {
        let mut viewer = viewer();
        assert_eq!(viewer.gpu().live_buffers(), 2);
        viewer.swap_mesh(triangle()).unwrap();
        assert_eq!(viewer.gpu().live_buffers(), 4);
        viewer.swap_mesh(triangle()).unwrap();
        assert_eq!(viewer.gpu().live_buffers(), 4);
    }

    #[test]
    fn render_frame_is_throttled_and_counted() {
        let mut viewer = viewer();
        viewer.set_target_fps(30);
        let start = viewer.clock().now();
        for _ in 0..3 {
            viewer.render_frame();
        }
        assert!(viewer.clock().now() - start >= std::time::Duration::from_secs(2) / 30);
        assert_eq!(viewer.take_computed_frames(), 3);
    }

    #[test]
    fn screenshot_batch_writes_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut viewer = viewer();
        viewer.swap_mesh(triangle()).unwrap();
        let request = ScreenshotRequest {
            count: 3,
            quality: 90,
            format: ImageFormat::Jpeg,
            directory: dir.path().join("batch"),
        };
        let mut target = SolidTarget { renders: 0 };
        let mut reported = Vec::new();
        let mut progress = |done: usize, total: usize, _: &Path| reported.push((done, total));
        let paths = viewer
            .take_screenshots_with(&request, &mut target, &mut progress, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|path| path.exists()));
        assert_eq!(target.renders, 3);
        assert_eq!(reported, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(!viewer.gpu().is_current());
    }

    #[test]
    fn single_screenshot_is_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut viewer = viewer();
        let mut target = SolidTarget { renders: 0 };
        let path = viewer.save_screenshot(&mut target, dir.path()).unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (8, 6));
    }
}
