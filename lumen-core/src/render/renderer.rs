use tracing::warn;

use crate::control::SwapCallback;
use crate::error::StreamError;
use crate::render::shader::{QUAD_VERTICES, ShaderCache, ShaderKind};
use crate::render::surface::RenderSurface;
use crate::video::decoder::Picture;

/// Draws pictures onto the surface, switching programs and texture
/// bindings only when the picture's target or texture changes.
pub struct Renderer {
    surface: Box<dyn RenderSurface>,
    shaders: ShaderCache,
    last_texture_target: u32,
    last_texture_id: u32,
}

impl Renderer {
    pub fn new(surface: Box<dyn RenderSurface>) -> Self {
        Self {
            surface,
            shaders: ShaderCache::new(),
            last_texture_target: 0,
            last_texture_id: 0,
        }
    }

    /// Bind the surface at the stream resolution and upload the quad.
    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), StreamError> {
        self.surface.initialize(width, height, &QUAD_VERTICES)
    }

    /// Forget the cached target and texture so the next draw rebinds.
    pub fn reset(&mut self) {
        self.last_texture_target = 0;
        self.last_texture_id = 0;
    }

    pub fn shaders(&self) -> &ShaderCache {
        &self.shaders
    }

    /// Clear, draw `picture` and start a swap that completes `done`.
    pub fn draw(&mut self, picture: &Picture, done: SwapCallback) -> Result<(), StreamError> {
        self.surface.clear()?;

        let target_changed = picture.texture_target != self.last_texture_target;
        if target_changed {
            match ShaderKind::from_target(picture.texture_target) {
                Some(kind) => {
                    let program = self.shaders.program(kind, &mut *self.surface)?;
                    self.surface
                        .use_program(program, kind.texcoord_scale(picture.texture_size))?;
                }
                None => warn!(
                    target = picture.texture_target,
                    "no shader for texture target"
                ),
            }
            self.last_texture_target = picture.texture_target;
        }

        if target_changed || picture.texture_id != self.last_texture_id {
            self.surface
                .bind_texture(picture.texture_target, picture.texture_id)?;
            self.last_texture_id = picture.texture_id;
        }

        self.surface.draw_quad()?;
        self.surface.swap_buffers(done)
    }

    /// Delete every built program.
    pub fn release(&mut self) {
        self.shaders.release(&mut *self.surface);
        self.reset();
    }
}
