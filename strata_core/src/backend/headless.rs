// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A backend that records calls instead of touching a GPU.

use std::collections::{BTreeMap, BTreeSet};

use super::{
    BlendMode, DEFAULT_DENSITY, DrawCall, GpuHandle, GraphicsBackend, Platform, Readback, ShaderId,
    TargetHandle, TargetMode, UniformValue,
};
use crate::store::PixelFormat;
use crate::transform::Transform3d;

/// A recorded [`GraphicsBackend::draw`] with the state it was issued under.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    /// The call as issued.
    pub call: DrawCall,
    /// Active rendertarget (`None` is the display).
    pub target: Option<TargetHandle>,
    /// Textures bound at the time.
    pub textures: Vec<GpuHandle>,
    /// Blend mode at the time.
    pub blend: BlendMode,
    /// Bound shader.
    pub shader: Option<ShaderId>,
    /// Whether the draw went into the stencil buffer.
    pub stencil_write: bool,
    /// Whether stencil testing was active.
    pub stencil_test: bool,
}

/// Records every call for later inspection.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: u64,
    stores: BTreeMap<GpuHandle, (u32, u32)>,
    targets: BTreeMap<TargetHandle, GpuHandle>,
    pending_readbacks: BTreeSet<TargetHandle>,
    active_target: Option<TargetHandle>,
    bound: Vec<GpuHandle>,
    blend: BlendMode,
    shader: Option<ShaderId>,
    stencil_write: bool,
    stencil_test: bool,
    /// Every draw in issue order.
    pub draws: Vec<DrawRecord>,
    /// Number of clears.
    pub clears: usize,
    /// Number of uploads.
    pub uploads: usize,
    /// Number of readback requests.
    pub readback_requests: usize,
    /// Number of 3D passes.
    pub passes_3d: usize,
    /// Named uniforms set, most recent last.
    pub uniforms: Vec<String>,
}

impl HeadlessBackend {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Number of GPU textures currently allocated.
    #[must_use]
    pub fn live_stores(&self) -> usize {
        self.stores.len()
    }

    /// Number of render surfaces currently allocated.
    #[must_use]
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    /// Dimensions of an allocated texture.
    #[must_use]
    pub fn store_size(&self, store: GpuHandle) -> Option<(u32, u32)> {
        self.stores.get(&store).copied()
    }

    /// Slot indices of the recorded draws, in order.
    #[must_use]
    pub fn drawn_objects(&self) -> Vec<u32> {
        self.draws
            .iter()
            .filter(|d| !d.stencil_write)
            .map(|d| d.call.object)
            .collect()
    }

    /// Forgets recorded draws and counters, keeping allocations.
    pub fn reset_log(&mut self) {
        self.draws.clear();
        self.clears = 0;
        self.uploads = 0;
        self.readback_requests = 0;
        self.passes_3d = 0;
        self.uniforms.clear();
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_store(&mut self, width: u32, height: u32, _format: PixelFormat) -> GpuHandle {
        let h = GpuHandle(self.next());
        self.stores.insert(h, (width, height));
        h
    }

    fn update_store(&mut self, store: GpuHandle, width: u32, height: u32, _pixels: &[u8]) {
        self.uploads += 1;
        if let Some(dims) = self.stores.get_mut(&store) {
            *dims = (width, height);
        }
    }

    fn resize_store(&mut self, store: GpuHandle, width: u32, height: u32) {
        if let Some(dims) = self.stores.get_mut(&store) {
            *dims = (width, height);
        }
    }

    fn drop_store(&mut self, store: GpuHandle) {
        self.stores.remove(&store);
    }

    fn activate_store(&mut self, store: Option<GpuHandle>) {
        self.bound.clear();
        self.bound.extend(store);
    }

    fn activate_stores(&mut self, stores: &[GpuHandle]) {
        self.bound.clear();
        self.bound.extend_from_slice(stores);
    }

    fn setup_rendertarget(&mut self, store: GpuHandle, _mode: TargetMode) -> TargetHandle {
        let h = TargetHandle(self.next());
        self.targets.insert(h, store);
        h
    }

    fn drop_rendertarget(&mut self, target: TargetHandle) {
        self.targets.remove(&target);
        self.pending_readbacks.remove(&target);
    }

    fn activate_rendertarget(&mut self, target: Option<TargetHandle>, _projection: &Transform3d) {
        self.active_target = target;
    }

    fn clear(&mut self, _rgba: [f32; 4]) {
        self.clears += 1;
    }

    fn blend_state(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn draw(&mut self, call: &DrawCall) {
        self.draws.push(DrawRecord {
            call: *call,
            target: self.active_target,
            textures: self.bound.clone(),
            blend: self.blend,
            shader: self.shader,
            stencil_write: self.stencil_write,
            stencil_test: self.stencil_test,
        });
    }

    fn draw_3d(&mut self, calls: &[DrawCall]) -> usize {
        self.passes_3d += 1;
        calls.len()
    }

    fn prepare_stencil(&mut self) {
        self.stencil_write = true;
    }

    fn activate_stencil(&mut self) {
        self.stencil_write = false;
        self.stencil_test = true;
    }

    fn disable_stencil(&mut self) {
        self.stencil_write = false;
        self.stencil_test = false;
    }

    fn activate_shader(&mut self, shader: Option<ShaderId>) {
        self.shader = shader;
    }

    fn set_uniform(&mut self, name: &str, _value: UniformValue) {
        self.uniforms.push(name.to_owned());
    }

    fn request_readback(&mut self, target: TargetHandle) {
        self.readback_requests += 1;
        self.pending_readbacks.insert(target);
    }

    fn poll_readback(&mut self, target: TargetHandle) -> Option<Readback> {
        if !self.pending_readbacks.remove(&target) {
            return None;
        }
        let store = self.targets.get(&target)?;
        let (width, height) = self.stores.get(store).copied().unwrap_or((0, 0));
        Some(Readback {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        })
    }
}

/// A fixed-size display that counts presents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadlessPlatform {
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Pixels per centimeter.
    pub ppcm: f32,
    /// Number of presented frames.
    pub presented: usize,
}

impl HeadlessPlatform {
    /// A display of the given size at the default density.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ppcm: DEFAULT_DENSITY,
            presented: 0,
        }
    }
}

impl Platform for HeadlessPlatform {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn density(&self) -> f32 {
        self.ppcm
    }

    fn present(&mut self) {
        self.presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DEFAULT_TXCOS, Surface};

    #[test]
    fn readback_is_delivered_once() {
        let mut gfx = HeadlessBackend::new();
        let store = gfx.create_store(4, 2, PixelFormat::Rgba8);
        let target = gfx.setup_rendertarget(store, TargetMode::Color);
        assert!(gfx.poll_readback(target).is_none(), "nothing requested");
        gfx.request_readback(target);
        let rb = gfx.poll_readback(target);
        assert_eq!(rb.map(|r| r.pixels.len()), Some(32));
        assert!(gfx.poll_readback(target).is_none(), "consumed");
    }

    #[test]
    fn stencil_draws_are_flagged() {
        let mut gfx = HeadlessBackend::new();
        let call = DrawCall {
            object: 3,
            surface: Surface::Color([1.0, 0.0, 0.0]),
            model: Transform3d::IDENTITY,
            half_extent: [1.0, 1.0],
            txcos: DEFAULT_TXCOS,
            opacity: 1.0,
        };
        gfx.prepare_stencil();
        gfx.draw(&call);
        gfx.activate_stencil();
        gfx.draw(&call);
        gfx.disable_stencil();
        assert!(gfx.draws[0].stencil_write);
        assert!(gfx.draws[1].stencil_test && !gfx.draws[1].stencil_write);
        assert_eq!(gfx.drawn_objects(), vec![3], "mask draws are not counted");
    }
}
