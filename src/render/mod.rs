pub mod native;

pub use native::Renderer;

use crate::shader::RecordedDraw;

/// Everything the renderer needs to produce one image.
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    pub clear_color: [f32; 3],
    pub draws: Vec<RecordedDraw>,
}
