// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contracts for the graphics and platform layers.
//!
//! The engine never touches pixels. Everything that allocates textures,
//! binds framebuffers or issues draw calls goes through a
//! [`GraphicsBackend`]; everything that knows about monitors goes through a
//! [`Platform`]. Both are consumed as traits so the engine can be driven by
//! a real GPU layer, a software rasterizer, or the recording
//! [`HeadlessBackend`](headless::HeadlessBackend) used in tests.
//!
//! # Pass structure
//!
//! For every rendertarget the engine issues, in order:
//!
//! ```text
//!   activate_rendertarget(handle, projection)
//!   clear(..)                         unless the target keeps its contents
//!   draw_3d(..)                       negative-order entries, first or last
//!   for each visible 2D entry:
//!       [prepare_stencil / draw / activate_stencil]   clipped entries
//!       activate_shader(..)
//!       activate_store(..) | activate_stores(..)
//!       blend_state(..)
//!       draw(..)
//!       [disable_stencil]
//!   request_readback(handle)          when a readback is due
//! ```

pub mod headless;

use core::fmt;

use crate::store::PixelFormat;
use crate::transform::Transform3d;

/// Opaque GPU texture handle handed out by [`GraphicsBackend::create_store`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(pub u64);

impl fmt::Debug for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuHandle({})", self.0)
    }
}

/// Opaque render-surface handle handed out by
/// [`GraphicsBackend::setup_rendertarget`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetHandle(pub u64);

impl fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetHandle({})", self.0)
    }
}

/// Identifier of a shader program known to the backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

impl fmt::Debug for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderId({})", self.0)
    }
}

/// How a draw is combined with what is already in the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending; the source replaces the destination.
    None,
    /// Regular alpha blending, applied only when the object is translucent.
    #[default]
    Normal,
    /// Alpha blending even for fully opaque objects.
    Force,
    /// Additive.
    Additive,
    /// Multiplicative.
    Multiply,
    /// Premultiplied alpha.
    Premultiplied,
}

/// Attachments requested for a rendertarget surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TargetMode {
    /// Color only.
    #[default]
    Color,
    /// Color and depth.
    ColorDepth,
    /// Color, depth and stencil.
    ColorDepthStencil,
}

/// A value for [`GraphicsBackend::set_uniform`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    /// Scalar.
    Float(f32),
    /// Two-component vector.
    Vec2([f32; 2]),
    /// Three-component vector.
    Vec3([f32; 3]),
    /// 4×4 matrix.
    Mat4(Transform3d),
}

/// What a single draw fills the quad with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Surface {
    /// Whatever stores were last activated.
    Textured,
    /// A flat color.
    Color([f32; 3]),
}

/// One textured or colored quad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    /// Slot index of the object being drawn.
    pub object: u32,
    /// Fill.
    pub surface: Surface,
    /// Model matrix; the quad spans `[-1, 1]` scaled by `half_extent`.
    pub model: Transform3d,
    /// Half width and half height in target pixels.
    pub half_extent: [f32; 2],
    /// Texture coordinates for the four corners (UL, UR, LR, LL as s,t pairs).
    pub txcos: [f32; 8],
    /// Resolved opacity.
    pub opacity: f32,
}

/// Pixels copied back from a rendertarget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readback {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
}

/// The texture-coordinate set covering a whole store.
pub const DEFAULT_TXCOS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

/// The graphics layer the engine draws through.
///
/// Methods with defaults are optional capabilities; a backend without a 3D
/// pipeline or readback support can leave them alone.
pub trait GraphicsBackend {
    /// Allocates a texture of the given size.
    fn create_store(&mut self, width: u32, height: u32, format: PixelFormat) -> GpuHandle;

    /// Uploads `pixels` (tightly packed rows) into `store`.
    fn update_store(&mut self, store: GpuHandle, width: u32, height: u32, pixels: &[u8]);

    /// Changes the size of `store`, discarding its contents.
    fn resize_store(&mut self, store: GpuHandle, width: u32, height: u32);

    /// Frees `store`.
    fn drop_store(&mut self, store: GpuHandle);

    /// Binds a single texture for the next draw, or unbinds with `None`.
    fn activate_store(&mut self, store: Option<GpuHandle>);

    /// Binds several textures to consecutive units for a multi-texture draw.
    fn activate_stores(&mut self, stores: &[GpuHandle]) {
        self.activate_store(stores.first().copied());
    }

    /// Creates a drawable surface that renders into `store`.
    fn setup_rendertarget(&mut self, store: GpuHandle, mode: TargetMode) -> TargetHandle;

    /// Destroys a surface created by [`setup_rendertarget`](Self::setup_rendertarget).
    fn drop_rendertarget(&mut self, target: TargetHandle);

    /// Directs following draws into `target` (`None` is the display).
    fn activate_rendertarget(&mut self, target: Option<TargetHandle>, projection: &Transform3d);

    /// Clears the active target.
    fn clear(&mut self, rgba: [f32; 4]);

    /// Sets the blend function for following draws.
    fn blend_state(&mut self, mode: BlendMode);

    /// Draws one quad.
    fn draw(&mut self, call: &DrawCall);

    /// Draws the 3D entries of the active target; returns the number drawn.
    fn draw_3d(&mut self, calls: &[DrawCall]) -> usize {
        _ = calls;
        0
    }

    /// Starts writing following draws into the stencil buffer only.
    fn prepare_stencil(&mut self) {}

    /// Switches from stencil writing to stencil-tested color drawing.
    fn activate_stencil(&mut self) {}

    /// Turns stencil testing off.
    fn disable_stencil(&mut self) {}

    /// Binds a shader program, or the default program with `None`.
    fn activate_shader(&mut self, shader: Option<ShaderId>);

    /// Sets a named uniform on the bound program.
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        _ = (name, value);
    }

    /// Starts an asynchronous copy of `target`'s pixels.
    fn request_readback(&mut self, target: TargetHandle) {
        _ = target;
    }

    /// Returns a completed readback for `target`, if one is ready.
    fn poll_readback(&mut self, target: TargetHandle) -> Option<Readback> {
        _ = target;
        None
    }
}

/// Monitor-side services.
pub trait Platform {
    /// Output dimensions in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Output density in pixels per centimeter.
    fn density(&self) -> f32 {
        DEFAULT_DENSITY
    }

    /// Presents the finished frame.
    fn present(&mut self);
}

/// Density assumed when the platform does not report one (96 dpi).
pub const DEFAULT_DENSITY: f32 = 37.795_276;
