//! Shader sources and the per-session program cache.
//!
//! Each texture target needs its own sampler type, so programs are
//! built lazily on first use of a target and kept until the decoder is
//! cleaned up.

use crate::error::StreamError;
use crate::render::surface::{ProgramId, RenderSurface};
use crate::video::decoder::{TEXTURE_2D, TEXTURE_EXTERNAL_OES, TEXTURE_RECTANGLE, TextureSize};

pub const VERTEX_SHADER: &str = "\
varying vec2 v_texCoord;
attribute vec4 a_position;
attribute vec2 a_texCoord;
uniform vec2 v_scale;
void main()
{
    v_texCoord = v_scale * a_texCoord;
    gl_Position = a_position;
}";

pub const FRAGMENT_SHADER_2D: &str = "\
precision mediump float;
varying vec2 v_texCoord;
uniform sampler2D s_texture;
void main()
{
    gl_FragColor = texture2D(s_texture, v_texCoord);
}";

pub const FRAGMENT_SHADER_RECTANGLE: &str = "\
#extension GL_ARB_texture_rectangle : require
precision mediump float;
varying vec2 v_texCoord;
uniform sampler2DRect s_texture;
void main()
{
    gl_FragColor = texture2DRect(s_texture, v_texCoord).rgba;
}";

pub const FRAGMENT_SHADER_EXTERNAL: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 v_texCoord;
uniform samplerExternalOES s_texture;
void main()
{
    gl_FragColor = texture2D(s_texture, v_texCoord);
}";

/// Full-screen quad drawn as a 4-vertex triangle strip: positions
/// followed by texture coordinates.
pub const QUAD_VERTICES: [f32; 16] = [
    -1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, // positions
    0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, // texture coordinates
];

// ── ShaderKind ───────────────────────────────────────────────────

/// Sampling mode required by a picture's texture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Plain2D,
    Rectangle,
    ExternalOes,
}

impl ShaderKind {
    pub fn from_target(target: u32) -> Option<Self> {
        match target {
            TEXTURE_2D => Some(ShaderKind::Plain2D),
            TEXTURE_RECTANGLE => Some(ShaderKind::Rectangle),
            TEXTURE_EXTERNAL_OES => Some(ShaderKind::ExternalOes),
            _ => None,
        }
    }

    pub fn fragment_source(self) -> &'static str {
        match self {
            ShaderKind::Plain2D => FRAGMENT_SHADER_2D,
            ShaderKind::Rectangle => FRAGMENT_SHADER_RECTANGLE,
            ShaderKind::ExternalOes => FRAGMENT_SHADER_EXTERNAL,
        }
    }

    /// Rectangle textures are sampled in texel units; the others in
    /// normalized coordinates.
    pub fn texcoord_scale(self, size: TextureSize) -> [f32; 2] {
        match self {
            ShaderKind::Rectangle => [size.width as f32, size.height as f32],
            ShaderKind::Plain2D | ShaderKind::ExternalOes => [1.0, 1.0],
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

// ── ShaderCache ──────────────────────────────────────────────────

/// One lazily built program per [`ShaderKind`].
#[derive(Debug, Default)]
pub struct ShaderCache {
    programs: [Option<ProgramId>; 3],
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The program for `kind`, compiling it on first request.
    pub fn program(
        &mut self,
        kind: ShaderKind,
        surface: &mut dyn RenderSurface,
    ) -> Result<ProgramId, StreamError> {
        if let Some(program) = self.programs[kind.slot()] {
            return Ok(program);
        }
        let program = surface.create_program(VERTEX_SHADER, kind.fragment_source())?;
        tracing::debug!(?kind, ?program, "built shader program");
        self.programs[kind.slot()] = Some(program);
        Ok(program)
    }

    pub fn is_built(&self, kind: ShaderKind) -> bool {
        self.programs[kind.slot()].is_some()
    }

    /// Delete every built program.
    pub fn release(&mut self, surface: &mut dyn RenderSurface) {
        for slot in self.programs.iter_mut() {
            if let Some(program) = slot.take() {
                surface.delete_program(program);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_map_to_kinds() {
        assert_eq!(ShaderKind::from_target(TEXTURE_2D), Some(ShaderKind::Plain2D));
        assert_eq!(
            ShaderKind::from_target(TEXTURE_RECTANGLE),
            Some(ShaderKind::Rectangle)
        );
        assert_eq!(
            ShaderKind::from_target(TEXTURE_EXTERNAL_OES),
            Some(ShaderKind::ExternalOes)
        );
        assert_eq!(ShaderKind::from_target(0), None);
    }

    #[test]
    fn rectangle_scale_is_texel_size() {
        let size = TextureSize {
            width: 1280,
            height: 720,
        };
        assert_eq!(ShaderKind::Rectangle.texcoord_scale(size), [1280.0, 720.0]);
        assert_eq!(ShaderKind::Plain2D.texcoord_scale(size), [1.0, 1.0]);
        assert_eq!(ShaderKind::ExternalOes.texcoord_scale(size), [1.0, 1.0]);
    }

    #[test]
    fn fragment_sources_use_matching_samplers() {
        assert!(ShaderKind::Plain2D.fragment_source().contains("sampler2D "));
        assert!(ShaderKind::Rectangle.fragment_source().contains("sampler2DRect"));
        assert!(ShaderKind::ExternalOes.fragment_source().contains("samplerExternalOES"));
        assert!(VERTEX_SHADER.contains("v_scale"));
    }
}
