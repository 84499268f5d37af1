// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rendertarget management and the draw pass.
//!
//! A refresh walks every offscreen rendertarget and then the display one.
//! Each pass is skipped unless something could have changed: the display
//! counter (transforms still running after the last tick), the target's
//! own dirty counter, or its transform counter. A pass that runs:
//!
//! ```text
//!   activate + clear
//!   linked target's list     3D entries, then 2D entries
//!   own list                 3D entries, then 2D entries
//!   readback scheduling
//! ```
//!
//! with the 3D entries moved after the 2D ones under [`Order3d::Last`].

use kurbo::Rect;
use log::{debug, trace, warn};

use super::Engine;
use super::resolve::{half_extent, model_matrix, narrow};
use crate::backend::{
    BlendMode, DEFAULT_TXCOS, DrawCall, GpuHandle, GraphicsBackend, Platform, Surface,
};
use crate::chain::Properties;
use crate::config::Order3d;
use crate::error::{EngineError, Result};
use crate::math::EPSILON;
use crate::object::{ClipMode, FrameMode, INVALID, Mask, ObjectId, WORLD_IDX};
use crate::rendertarget::{RenderTargetOptions, Rendertarget};
use crate::store::{Backing, StoreId};
use crate::trace::{
    FrameSummaryBuilder, PassEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, Tracer,
};
use crate::transform::Transform3d;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Per-pass state shared by every entry drawn into one target.
#[derive(Clone, Copy, Debug)]
struct Pass {
    color: u32,
    base: Transform3d,
    min_order: i32,
    max_order: i32,
    fract: f32,
}

/// What an entry fills its quad with.
#[derive(Clone, Debug)]
enum Content {
    Color([f32; 3]),
    Texture(GpuHandle),
    Frames(Vec<GpuHandle>),
}

impl<B: GraphicsBackend> Engine<B> {
    // -- Setup and teardown --

    /// Turns the texture-backed object `color` into an offscreen
    /// rendertarget.
    ///
    /// The projection covers the object's logical size with the origin in
    /// the upper-left corner. With [`RenderTargetOptions::scale`] set,
    /// entries authored in display coordinates are scaled to the store.
    pub fn setup_rendertarget(&mut self, color: ObjectId, opts: RenderTargetOptions) -> Result<()> {
        let idx = self.live(color)?;
        if self.ctx.target(idx).is_some() {
            return Err(EngineError::BadArgument);
        }
        if self.ctx.targets.len() >= self.config.rendertarget_limit {
            return Err(EngineError::OutOfSpace);
        }
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        let (origw, origh) = (o.origw, o.origh);
        let store = o
            .store
            .and_then(|s| self.stores.get(s))
            .ok_or(EngineError::BadResource)?;
        let gpu = store.gpu().ok_or(EngineError::BadResource)?;
        let (sw, sh) = (store.width, store.height);

        let handle = self.backend.setup_rendertarget(gpu, opts.mode);
        let mut target = Rendertarget::new(
            idx,
            Transform3d::ortho(0.0, f64::from(origw), f64::from(origh), 0.0, 0.0, 1.0),
        );
        if opts.scale {
            target.base = Transform3d::from_scale(
                f64::from(sw) / f64::from(self.display.width),
                f64::from(sh) / f64::from(self.display.height),
                1.0,
            );
        }
        target.handle = Some(handle);
        target.mode = opts.mode;
        target.readback = opts.readback;
        target.readcnt = i64::from(opts.readback.unsigned_abs());
        target.no_clear = opts.no_clear;
        self.ctx.targets.push(target);
        debug!("rendertarget {handle:?} set up on slot {idx} ({sw}x{sh})");
        Ok(())
    }

    /// Tears down the rendertarget backed by `color`.
    ///
    /// Entries the target owned are deleted if they are clones or carry
    /// [`Mask::LIVING`], and moved to the display otherwise. Entries owned
    /// elsewhere only lose this attachment.
    pub(super) fn drop_rendertarget(&mut self, color: u32) {
        let Some(pos) = self.ctx.targets.iter().position(|t| t.color == color) else {
            return;
        };
        let target = self.ctx.targets.remove(pos);
        if let Some(h) = target.handle {
            self.backend.drop_rendertarget(h);
        }
        for t in self.ctx.targets.iter_mut().chain([&mut self.ctx.stdout]) {
            if t.link == Some(color) {
                t.link = None;
            }
        }
        debug!(
            "dropping rendertarget of slot {color} with {} entries",
            target.attached.len()
        );

        let mut rehome = Vec::new();
        let mut doomed = Vec::new();
        for &idx in &target.attached {
            let Some(o) = self.ctx.obj_mut(idx) else {
                continue;
            };
            if o.attachments == 0 {
                warn!("[BUG] attachment counter of slot {idx} already zero at teardown");
            } else {
                o.attachments -= 1;
            }
            if o.owner == Some(color) {
                o.owner = None;
                if o.flags.clone || o.mask.contains(Mask::LIVING) {
                    doomed.push(idx);
                } else {
                    rehome.push(idx);
                }
            }
        }
        for idx in rehome {
            trace!("slot {idx} moved to the display");
            self.attach_object(WORLD_IDX, idx);
        }
        for idx in doomed {
            trace!("slot {idx} deleted with its rendertarget");
            self.delete_index(idx);
        }
    }

    // -- Target policy --

    /// Makes `target` draw the list of `source` before its own, or stops
    /// doing so with `None`.
    pub fn link_rendertarget(&mut self, target: ObjectId, source: Option<ObjectId>) -> Result<()> {
        let t = self.ctx.index_of(target)?;
        if self.ctx.target(t).is_none() {
            return Err(EngineError::UnacceptedState);
        }
        let link = match source {
            None => None,
            Some(source) => {
                let s = self.ctx.index_of(source)?;
                let back = self.ctx.target(s).ok_or(EngineError::BadArgument)?.link;
                if s == t || back == Some(t) {
                    return Err(EngineError::BadArgument);
                }
                Some(s)
            }
        };
        if let Some(rt) = self.ctx.target_mut(t) {
            rt.link = link;
            rt.dirty += 1;
        }
        Ok(())
    }

    /// Restricts the 2D entries `target` draws to orders in `min..=max`.
    pub fn set_order_range(&mut self, target: ObjectId, min: i32, max: i32) -> Result<()> {
        if min > max {
            return Err(EngineError::BadArgument);
        }
        let t = self.ctx.index_of(target)?;
        let rt = self.ctx.target_mut(t).ok_or(EngineError::NoSuchObject)?;
        rt.min_order = min;
        rt.max_order = max;
        rt.dirty += 1;
        Ok(())
    }

    /// Changes how often `target` is read back: 0 off, `n < 0` every |n|
    /// refreshes, `n > 0` every n milliseconds of logical time.
    pub fn alter_readback(&mut self, target: ObjectId, rate: i32) -> Result<()> {
        let t = self.ctx.index_of(target)?;
        if t == WORLD_IDX {
            return Err(EngineError::BadArgument);
        }
        let rt = self.ctx.target_mut(t).ok_or(EngineError::UnacceptedState)?;
        rt.readback = rate;
        rt.readcnt = i64::from(rate.unsigned_abs());
        Ok(())
    }

    /// Keeps (or stops keeping) the previous contents of `target` between
    /// passes.
    pub fn set_no_clear(&mut self, target: ObjectId, no_clear: bool) -> Result<()> {
        let t = self.ctx.index_of(target)?;
        let rt = self.ctx.target_mut(t).ok_or(EngineError::NoSuchObject)?;
        rt.no_clear = no_clear;
        Ok(())
    }

    /// Runs one pass of `target` right now, dirty or not, and services its
    /// readback. Returns the number of draws.
    pub fn force_update(&mut self, target: ObjectId) -> Result<usize> {
        let t = self.ctx.index_of(target)?;
        if self.ctx.target(t).is_none() {
            return Err(EngineError::UnacceptedState);
        }
        self.ctx.flush_cache_invalidations();
        let draws = self.process_target(t, self.display.lerp);
        self.schedule_readback(t, self.display.lerp);
        self.poll_readback(t);
        Ok(draws)
    }

    // -- Refresh --

    /// Draws every rendertarget that has pending work, offscreen ones
    /// first. `fract` is the sub-tick position animations are sampled at.
    /// Returns the number of draws issued.
    pub fn refresh(&mut self, fract: f32, tracer: &mut Tracer<'_>) -> usize {
        self.refresh_passes(fract, tracer)
            .iter()
            .map(|p| p.draws as usize)
            .sum()
    }

    /// Refreshes and hands the frame to `platform` if any pass ran.
    pub fn present(&mut self, platform: &mut impl Platform, fract: f32, tracer: &mut Tracer<'_>) -> usize {
        let start = self.now_ns();
        let passes = self.refresh_passes(fract, tracer);
        let mut summary = FrameSummaryBuilder::new(self.display.frame_index, self.display.ticks);
        summary.phase_begin(PhaseKind::Refresh, start);
        summary.phase_end(PhaseKind::Refresh, self.now_ns());
        for p in &passes {
            summary.add_pass(p);
        }
        let presented = passes.iter().any(|p| !p.skipped);
        if presented {
            platform.present();
        }
        summary.set_presented(presented);
        tracer.frame_summary(&summary.finish());
        passes.iter().map(|p| p.draws as usize).sum()
    }

    fn refresh_passes(&mut self, fract: f32, tracer: &mut Tracer<'_>) -> Vec<PassEvent> {
        self.display.lerp = fract;
        self.display.frame_index += 1;
        let frame_index = self.display.frame_index;
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index,
            phase: PhaseKind::Refresh,
            timestamp: self.now_ns(),
        });

        self.ctx.flush_cache_invalidations();
        self.ctx.flush_content();

        let mut colors: Vec<u32> = self.ctx.targets.iter().map(|t| t.color).collect();
        colors.push(WORLD_IDX);
        let mut passes = Vec::with_capacity(colors.len());
        let mut transfc = 0;
        for color in colors {
            let pending = self.needs_pass(color);
            let draws = if pending {
                let n = self.process_target(color, fract);
                if color != WORLD_IDX {
                    self.ctx.bump_holders(color);
                }
                n
            } else {
                0
            };
            let e = PassEvent {
                frame_index,
                target: color,
                draws: u32::try_from(draws).unwrap_or(u32::MAX),
                skipped: !pending,
            };
            tracer.pass(&e);
            passes.push(e);
            self.schedule_readback(color, fract);
            transfc += self.ctx.target(color).map_or(0, |t| t.transfc);
        }
        self.display.dirty = transfc;

        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase: PhaseKind::Refresh,
            timestamp: self.now_ns(),
        });
        #[cfg(feature = "trace-rich")]
        {
            let changes = core::mem::take(&mut self.changes);
            tracer.object_events(frame_index, &changes);
        }
        passes
    }

    fn needs_pass(&self, color: u32) -> bool {
        if self.config.ignore_dirty || self.display.dirty > 0 {
            return true;
        }
        let busy = |t: &Rendertarget| t.dirty > 0 || t.transfc > 0;
        self.ctx.target(color).is_some_and(|t| {
            busy(t) || t.link.and_then(|s| self.ctx.target(s)).is_some_and(busy)
        })
    }

    /// Draws the lists of the target backed by `color`. Returns the number
    /// of draws.
    fn process_target(&mut self, color: u32, fract: f32) -> usize {
        let Some(t) = self.ctx.target(color) else {
            return 0;
        };
        if color != WORLD_IDX && t.handle.is_none() {
            return 0;
        }
        let pass = Pass {
            color,
            base: t.base,
            min_order: t.min_order,
            max_order: t.max_order,
            fract,
        };
        let (handle, projection, no_clear) = (t.handle, t.projection, t.no_clear);
        let linked = t
            .link
            .and_then(|s| self.ctx.target(s))
            .map(|s| s.attached.clone());
        let own = t.attached.clone();

        self.backend.activate_rendertarget(handle, &projection);
        if !no_clear {
            self.backend.clear(CLEAR_COLOR);
        }
        let mut draws = 0;
        if let Some(linked) = linked {
            draws += self.draw_list(&pass, &linked);
        }
        draws += self.draw_list(&pass, &own);
        self.backend.activate_rendertarget(None, &self.ctx.stdout.projection);

        if let Some(t) = self.ctx.target_mut(color) {
            t.dirty = 0;
        }
        draws
    }

    fn draw_list(&mut self, pass: &Pass, list: &[u32]) -> usize {
        let split = list.partition_point(|&i| self.ctx.order_of(i) < 0);
        let (three, two) = list.split_at(split);
        let mut draws = 0;
        if self.config.order3d == Order3d::First {
            draws += self.draw_3d(pass, three);
        }
        for &idx in two {
            if self.draw_entry(pass, idx) {
                draws += 1;
            }
        }
        if self.config.order3d == Order3d::Last {
            draws += self.draw_3d(pass, three);
        }
        draws
    }

    fn draw_3d(&mut self, pass: &Pass, entries: &[u32]) -> usize {
        if entries.is_empty() {
            return 0;
        }
        let mut calls = Vec::with_capacity(entries.len());
        for &idx in entries {
            let props = self.resolve_index(idx, pass.fract);
            if props.opacity < EPSILON {
                continue;
            }
            let surface = match self.content_of(idx) {
                Some(Content::Color(rgb)) => Surface::Color(rgb),
                Some(_) => Surface::Textured,
                None => continue,
            };
            if let Some(o) = self.ctx.obj(idx) {
                calls.push(DrawCall {
                    object: idx,
                    surface,
                    model: model_matrix(&pass.base, &props, o),
                    half_extent: half_extent(&props, o),
                    txcos: o.txcos.unwrap_or(DEFAULT_TXCOS),
                    opacity: props.opacity,
                });
            }
        }
        if calls.is_empty() {
            return 0;
        }
        self.backend.activate_shader(None);
        self.backend.draw_3d(&calls)
    }

    /// Draws one 2D entry; returns whether a draw was issued.
    fn draw_entry(&mut self, pass: &Pass, idx: u32) -> bool {
        if idx == pass.color {
            return false;
        }
        let Some(order) = self.ctx.obj(idx).map(|o| o.order) else {
            return false;
        };
        if order < pass.min_order || order > pass.max_order {
            return false;
        }
        let mut props = self.resolve_index(idx, pass.fract);
        if props.opacity < EPSILON {
            return false;
        }
        let Some(content) = self.content_of(idx) else {
            return false;
        };
        let Some(o) = self.ctx.obj(idx) else {
            return false;
        };
        let (parent, clip, blend, program, size) =
            (o.parent, o.clip, o.blend, o.program, (o.origw, o.origh));
        let mapped = if o.mask.contains(Mask::MAPPING) && parent != WORLD_IDX {
            self.ctx.obj(parent).and_then(|p| p.txcos)
        } else {
            o.txcos
        };
        let mut txcos = mapped.unwrap_or(DEFAULT_TXCOS);

        let mut stenciled = false;
        if clip != ClipMode::Off && parent != WORLD_IDX && parent != INVALID {
            if clip == ClipMode::Shallow && !props.rotation.is_rotated() {
                let pp = self.resolve_index(parent, pass.fract);
                let psize = self.ctx.obj(parent).map_or((0, 0), |p| (p.origw, p.origh));
                if !texclip(&mut props, &mut txcos, size, &pp, psize) {
                    return false;
                }
            } else {
                self.populate_stencil(pass, idx);
                stenciled = true;
            }
        }

        self.backend.activate_shader(program);
        let surface = match content {
            Content::Color(rgb) => Surface::Color(rgb),
            Content::Texture(h) => {
                self.backend.activate_store(Some(h));
                Surface::Textured
            }
            Content::Frames(frames) => {
                self.backend.activate_stores(&frames);
                Surface::Textured
            }
        };
        let mode = if props.opacity < 1.0 - EPSILON {
            blend
        } else if blend == BlendMode::Force {
            BlendMode::Force
        } else {
            BlendMode::Normal
        };
        self.backend.blend_state(mode);

        let Some(o) = self.ctx.obj(idx) else {
            return false;
        };
        let call = DrawCall {
            object: idx,
            surface,
            model: model_matrix(&pass.base, &props, o),
            half_extent: half_extent(&props, o),
            txcos,
            opacity: props.opacity,
        };
        self.backend.draw(&call);
        if stenciled {
            self.backend.disable_stencil();
        }
        true
    }

    /// Resolves what `idx` draws with: its color, its store, or the frames
    /// of its frameset (a clone's own index into its original's frames).
    fn content_of(&self, idx: u32) -> Option<Content> {
        let o = self.ctx.obj(idx)?;
        let store = o.store?;
        let gpu = |s: StoreId| self.stores.get(s).and_then(|s| s.gpu());

        if let Some(fs) = &o.frameset {
            let frames = if o.flags.clone {
                self.ctx.obj(o.parent)?.frameset.as_ref()?.frames.as_slice()
            } else {
                fs.frames.as_slice()
            };
            if !frames.is_empty() {
                return match fs.mode {
                    FrameMode::Split => frames.get(fs.index).copied().and_then(gpu).map(Content::Texture),
                    FrameMode::MultiTexture => {
                        let n = frames.len();
                        let ordered: Vec<GpuHandle> = if fs.index == 0 {
                            frames.iter().copied().filter_map(gpu).collect()
                        } else {
                            (0..n)
                                .map(|i| frames[(fs.index + n - i) % n])
                                .filter_map(gpu)
                                .collect()
                        };
                        (!ordered.is_empty()).then_some(Content::Frames(ordered))
                    }
                };
            }
        }
        match &self.stores.get(store)?.backing {
            Backing::Color(rgb) => Some(Content::Color(*rgb)),
            Backing::Texture { gpu: Some(h), .. } => Some(Content::Texture(*h)),
            Backing::Texture { gpu: None, .. } => None,
        }
    }

    /// Writes the clip shape of `idx` into the stencil buffer: the direct
    /// parent for shallow clipping, or for deep clipping every non-deep
    /// ancestor up to and including the first shallow one.
    fn populate_stencil(&mut self, pass: &Pass, idx: u32) {
        self.backend.prepare_stencil();
        self.backend.activate_shader(None);
        let shallow = self.ctx.obj(idx).is_some_and(|o| o.clip == ClipMode::Shallow);
        let mut cur = idx;
        while let Some(parent) = self
            .ctx
            .obj(cur)
            .map(|o| o.parent)
            .filter(|&p| p != WORLD_IDX && p != INVALID)
        {
            let pclip = self.ctx.obj(parent).map_or(ClipMode::Off, |p| p.clip);
            if shallow || pclip != ClipMode::Deep {
                self.stencil_shape(pass, parent);
            }
            if shallow || pclip == ClipMode::Shallow {
                break;
            }
            cur = parent;
        }
        self.backend.activate_stencil();
    }

    fn stencil_shape(&mut self, pass: &Pass, idx: u32) {
        let props = self.resolve_index(idx, pass.fract);
        if let Some(o) = self.ctx.obj(idx) {
            self.backend.draw(&DrawCall {
                object: idx,
                surface: Surface::Color([1.0; 3]),
                model: model_matrix(&pass.base, &props, o),
                half_extent: half_extent(&props, o),
                txcos: DEFAULT_TXCOS,
                opacity: 1.0,
            });
        }
    }

    // -- Readback --

    /// Requests a readback of the target backed by `color` if one is due.
    fn schedule_readback(&mut self, color: u32, fract: f32) {
        let stamp = clock_ms(self.display.ticks, fract, self.config.timer_tick_ms);
        let Some(t) = self.ctx.target_mut(color) else {
            return;
        };
        let Some(handle) = t.handle else {
            return;
        };
        if t.reading || t.readback == 0 {
            return;
        }
        if t.readback < 0 {
            t.readcnt -= 1;
            if t.readcnt > 0 {
                return;
            }
            t.readcnt = i64::from(t.readback.unsigned_abs());
        } else {
            if stamp - t.readcnt <= i64::from(t.readback) {
                return;
            }
            t.readcnt = stamp;
        }
        t.reading = true;
        self.backend.request_readback(handle);
    }

    /// Delivers every completed readback. Idempotent.
    pub(super) fn poll_readbacks(&mut self) {
        let reading: Vec<u32> = self
            .ctx
            .targets
            .iter()
            .filter(|t| t.reading)
            .map(|t| t.color)
            .collect();
        for color in reading {
            self.poll_readback(color);
        }
    }

    /// Hands a completed readback of the target backed by `color` to the
    /// color object's feed. Without a feed, readback is switched off.
    fn poll_readback(&mut self, color: u32) {
        let Some(handle) = self
            .ctx
            .target(color)
            .filter(|t| t.reading)
            .and_then(|t| t.handle)
        else {
            return;
        };
        let Some(frame) = self.backend.poll_readback(handle) else {
            return;
        };
        let feed = self
            .ctx
            .slots
            .get_mut(color as usize)
            .and_then(|s| s.feed.as_mut());
        let delivered = feed.is_some();
        if let Some(feed) = feed {
            feed.readback(&frame);
        }
        if let Some(t) = self.ctx.target_mut(color) {
            if !delivered {
                debug!("no feed on slot {color}, readback switched off");
                t.readback = 0;
            }
            t.reading = false;
        }
    }
}

/// Trims `props` and `txcos` to the box of the clipping parent. Returns
/// `false` when nothing is left to draw.
fn texclip(
    props: &mut Properties,
    txcos: &mut [f32; 8],
    size: (u32, u32),
    parent: &Properties,
    parent_size: (u32, u32),
) -> bool {
    let (origw, origh) = (f64::from(size.0), f64::from(size.1));
    let w = origw * f64::from(props.scale.x);
    let h = origh * f64::from(props.scale.y);
    if w <= 0.0 || h <= 0.0 {
        return false;
    }
    let bounds = Rect::from_origin_size(
        (f64::from(parent.position.x), f64::from(parent.position.y)),
        (
            f64::from(parent_size.0) * f64::from(parent.scale.x),
            f64::from(parent_size.1) * f64::from(parent.scale.y),
        ),
    );
    let own = Rect::from_origin_size(
        (f64::from(props.position.x), f64::from(props.position.y)),
        (w, h),
    );
    if own.x1 < bounds.x0 || own.y1 < bounds.y0 || own.x0 > bounds.x1 || own.y0 > bounds.y1 {
        return false;
    }
    let vis = own.intersect(bounds);
    if vis == own {
        return true;
    }

    let xrange = f64::from(txcos[2] - txcos[0]);
    let yrange = f64::from(txcos[7] - txcos[1]);
    let left = narrow((vis.x0 - own.x0) / w * xrange);
    let top = narrow((vis.y0 - own.y0) / h * yrange);
    let right = narrow((own.x1 - vis.x1) / w * xrange);
    let bottom = narrow((own.y1 - vis.y1) / h * yrange);
    txcos[0] += left;
    txcos[6] += left;
    txcos[1] += top;
    txcos[3] += top;
    txcos[2] -= right;
    txcos[4] -= right;
    txcos[5] -= bottom;
    txcos[7] -= bottom;

    props.position.x = narrow(vis.x0);
    props.position.y = narrow(vis.y0);
    props.scale.x = narrow(vis.width() / origw);
    props.scale.y = narrow(vis.height() / origh);
    true
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "logical clock in milliseconds fits i64"
)]
fn clock_ms(ticks: u64, fract: f32, tick_ms: u32) -> i64 {
    ((ticks as f64 + f64::from(fract)) * f64::from(tick_ms)).round() as i64
}
