pub mod display;
pub mod renderer;
pub mod shader;
pub mod surface;

pub use display::DisplayQueue;
pub use renderer::Renderer;
pub use shader::{ShaderCache, ShaderKind};
pub use surface::{ProgramId, RenderSurface};
