//! Rendering surface boundary.
//!
//! A thin, GL-shaped capability: the surface owns the context, a static
//! vertex buffer and the swap chain. Every state-changing call reports
//! failure as [`StreamError::Graphics`].

use crate::control::SwapCallback;
use crate::error::StreamError;

/// Opaque handle to a linked shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

pub trait RenderSurface: Send {
    /// Bind the surface at the stream resolution, clear to black, upload
    /// `vertices` as the static quad buffer and present once.
    fn initialize(&mut self, width: u32, height: u32, vertices: &[f32]) -> Result<(), StreamError>;

    /// Compile and link a program whose `s_texture` sampler is bound to
    /// texture unit 0 and whose attributes read the quad buffer.
    fn create_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId, StreamError>;

    /// Make `program` current, select texture unit 0 and set its
    /// `v_scale` uniform.
    fn use_program(&mut self, program: ProgramId, texcoord_scale: [f32; 2]) -> Result<(), StreamError>;

    fn bind_texture(&mut self, target: u32, texture_id: u32) -> Result<(), StreamError>;

    fn clear(&mut self) -> Result<(), StreamError>;

    /// Draw the quad as a 4-vertex triangle strip.
    fn draw_quad(&mut self) -> Result<(), StreamError>;

    /// Present the back buffer. `done` is completed once the swap has
    /// finished; completing it inside this call is allowed.
    fn swap_buffers(&mut self, done: SwapCallback) -> Result<(), StreamError>;

    fn delete_program(&mut self, program: ProgramId);
}
