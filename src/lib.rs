//! Interactive mesh viewer.
//!
//! The crate keeps everything that does not need a window testable on its
//! own: drawables pack their vertex channels into host-mirrored buffers of a
//! [`GpuContext`], a [`ShaderProgram`] records the draws with their uniform
//! snapshot, and the wgpu [`Renderer`] only replays them. The arcball camera,
//! light and input handling live in [`MeshViewer`].

pub mod app;
pub mod arcball;
pub mod camera;
pub mod capture;
pub mod config;
pub mod drawable;
pub mod frame;
pub mod gpu;
pub mod input;
pub mod light;
pub mod mesh_io;
pub mod render;
pub mod shader;
pub mod viewer;

pub use app::{ViewerApp, WindowInitError};
pub use arcball::ArcBall;
pub use camera::{Camera, CameraConfig};
pub use capture::{ImageFormat, OffscreenTarget, ProgressSink, ScreenshotRequest};
pub use config::{DisplayConfig, ViewerConfig, WindowConfig};
pub use drawable::{Axis, DrawableError, DrawableObject, Geometry, GeometryDescriptor, Mesh};
pub use frame::{Clock, FrameLimiter, ManualClock, SystemClock};
pub use gpu::{BufferHandle, BufferUsage, ContextGuard, GpuContext, GpuError};
pub use input::{KeyCode, MouseButton, NamedKey, PointerState};
pub use light::{Light, LightConfig};
pub use mesh_io::{load_mesh, load_obj_from_str, load_off_from_str, TriMesh};
pub use render::{RenderFrame, Renderer};
pub use shader::{ShaderContext, ShaderInterface, ShaderProgram};
pub use viewer::{KeyResponse, MeshViewer};
