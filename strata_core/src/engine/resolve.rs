// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property resolution, screen-space queries and picking.
//!
//! Resolving walks from an object up to World, combining each level's
//! local properties according to the child's mask. A result is cached on
//! the object (together with its model matrix) only when nothing on that
//! path is animating and the object is attached somewhere; any write that
//! could change it marks the object and its descendants stale through the
//! context's dirty tracker.

use kurbo::{Affine, Point};

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::chain::{Properties, Tick};
use crate::error::{EngineError, Result};
use crate::math::EPSILON;
use crate::object::{Anchor, INVALID, Mask, ObjectId, VObject, WORLD_IDX};
use crate::transform::Transform3d;

impl<B: GraphicsBackend> Engine<B> {
    /// Resolved properties of `id` at `fract` ticks past the current
    /// tick.
    pub fn resolve(&mut self, id: ObjectId, fract: f32) -> Result<Properties> {
        let idx = self.ctx.index_of(id)?;
        self.ctx.flush_cache_invalidations();
        Ok(self.resolve_index(idx, fract))
    }

    /// The four screen-space corners of `id` (UL, UR, LR, LL), rotated
    /// around the center by the resolved roll.
    ///
    /// Fails with [`EngineError::UnacceptedState`] for 3D objects.
    pub fn screen_coords(&mut self, id: ObjectId) -> Result<[Point; 4]> {
        let idx = self.live(id)?;
        self.ctx.flush_cache_invalidations();
        self.screen_coords_index(idx)
    }

    /// Whether the screen point `(x, y)` falls inside `id`.
    ///
    /// Rotated objects are tested as two triangles on integer coordinates;
    /// others against their box, edges included.
    pub fn hit_test(&mut self, id: ObjectId, x: i32, y: i32) -> Result<bool> {
        let idx = self.live(id)?;
        self.ctx.flush_cache_invalidations();
        Ok(self.hit_index(idx, x, y))
    }

    /// Local properties of `id` at absolute tick `tick`, looking through
    /// the whole queue.
    pub fn properties_at(&self, id: ObjectId, tick: Tick) -> Result<Properties> {
        let o = self.object(id)?;
        Ok(o.chain.value_at(o.current, tick))
    }

    /// Whether `id` currently has a non-zero opacity of its own.
    pub fn is_visible(&self, id: ObjectId) -> Result<bool> {
        let idx = self.live(id)?;
        Ok(self
            .ctx
            .obj(idx)
            .is_some_and(|o| o.current.opacity > EPSILON))
    }

    /// Objects of the display rendertarget under `(x, y)`, in drawing
    /// order (bottom first), up to `limit`.
    pub fn pick(&mut self, x: i32, y: i32, limit: usize) -> Vec<ObjectId> {
        let order = self.ctx.stdout.attached.clone();
        self.pick_from(order.into_iter(), x, y, limit)
    }

    /// Like [`pick`](Self::pick), topmost first.
    pub fn rpick(&mut self, x: i32, y: i32, limit: usize) -> Vec<ObjectId> {
        let order = self.ctx.stdout.attached.clone();
        self.pick_from(order.into_iter().rev(), x, y, limit)
    }

    fn pick_from(
        &mut self,
        candidates: impl Iterator<Item = u32>,
        x: i32,
        y: i32,
        limit: usize,
    ) -> Vec<ObjectId> {
        let mut out = Vec::new();
        if limit == 0 {
            return out;
        }
        self.ctx.flush_cache_invalidations();
        for idx in candidates {
            if out.len() >= limit {
                break;
            }
            let pickable = self
                .ctx
                .obj(idx)
                .is_some_and(|o| !o.mask.contains(Mask::UNPICKABLE));
            if pickable && self.visible_chain(idx) && self.hit_index(idx, x, y) {
                out.push(self.ctx.id_of(idx));
            }
        }
        out
    }

    /// Own opacity, then every ancestor reached through an inherited
    /// opacity bit.
    fn visible_chain(&self, idx: u32) -> bool {
        let mut cur = idx;
        loop {
            let Some(o) = self.ctx.obj(cur) else {
                return false;
            };
            if o.current.opacity <= EPSILON {
                return false;
            }
            if !o.mask.contains(Mask::OPACITY) || o.parent == WORLD_IDX || o.parent == INVALID {
                return true;
            }
            cur = o.parent;
        }
    }

    pub(super) fn screen_coords_index(&mut self, idx: u32) -> Result<[Point; 4]> {
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        if o.order < 0 {
            return Err(EngineError::UnacceptedState);
        }
        let (origw, origh) = (f64::from(o.origw), f64::from(o.origh));
        let lerp = self.display.lerp;
        let p = self.resolve_index(idx, lerp);

        let w = origw * f64::from(p.scale.x);
        let h = origh * f64::from(p.scale.y);
        let x = f64::from(p.position.x);
        let y = f64::from(p.position.y);
        let mut corners = [
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ];
        if p.rotation.roll.abs() > EPSILON {
            let center = Point::new(x + 0.5 * w, y + 0.5 * h);
            let rot = Affine::rotate_about(f64::from(p.rotation.roll).to_radians(), center);
            for c in &mut corners {
                *c = rot * *c;
            }
        }
        Ok(corners)
    }

    fn hit_index(&mut self, idx: u32, x: i32, y: i32) -> bool {
        let Ok(c) = self.screen_coords_index(idx) else {
            return false;
        };
        let rotated = self
            .ctx
            .obj(idx)
            .map(|o| {
                if o.valid_cache {
                    o.prop_cache.rotation.is_rotated()
                } else {
                    o.current.rotation.is_rotated()
                }
            })
            .unwrap_or(false);
        if rotated {
            let q = c.map(|p| (trunc(p.x), trunc(p.y)));
            in_triangle((x, y), [q[0], q[1], q[2]]) || in_triangle((x, y), [q[2], q[3], q[0]])
        } else {
            let (x, y) = (f64::from(x), f64::from(y));
            x >= c[0].x && y >= c[0].y && x <= c[2].x && y <= c[2].y
        }
    }

    /// Resolves `idx` without flushing pending invalidations first.
    pub(super) fn resolve_index(&mut self, idx: u32, lerp: f32) -> Properties {
        let Some(o) = self.ctx.obj(idx) else {
            return Properties::default();
        };
        if o.valid_cache {
            return o.prop_cache;
        }
        let at = self.display.ticks as f64 + f64::from(lerp);
        let mut props = local(o, at);
        let (parent, mask, anchor) = (o.parent, o.mask, o.anchor);

        if idx == WORLD_IDX {
            return props;
        }
        if parent != WORLD_IDX && parent != INVALID && self.ctx.obj(parent).is_some() {
            let pp = self.resolve_index(parent, lerp);
            inherit(&mut props, &pp, mask, false);
            if let Some(p) = self.ctx.obj(parent) {
                let pw = f64::from(p.origw) * f64::from(p.current.scale.x);
                let ph = f64::from(p.origh) * f64::from(p.current.scale.y);
                let (dx, dy) = match anchor {
                    Anchor::UpperLeft => (0.0, 0.0),
                    Anchor::UpperRight => (pw, 0.0),
                    Anchor::LowerLeft => (0.0, ph),
                    Anchor::LowerRight => (pw, ph),
                    Anchor::Center => (pw * 0.5, ph * 0.5),
                };
                props.position.x += narrow(dx);
                props.position.y += narrow(dy);
            }
        } else if let Some(world) = self.ctx.world() {
            inherit(&mut props, &world.current, mask, true);
        }

        if self.cacheable(idx) {
            let base = self
                .ctx
                .obj(idx)
                .and_then(|o| o.owner)
                .and_then(|owner| self.ctx.target(owner))
                .map(|t| t.base);
            if let Some(base) = base {
                if let Some(o) = self.ctx.obj_mut(idx) {
                    o.prop_matrix = model_matrix(&base, &props, o);
                    o.prop_cache = props;
                    o.valid_cache = true;
                }
            }
        }
        props
    }

    /// No queued transform anywhere from `idx` up to World.
    fn cacheable(&self, idx: u32) -> bool {
        let mut cur = idx;
        let mut guard = self.ctx.slots.len();
        while let Some(o) = self.ctx.obj(cur) {
            if o.chain.is_active() {
                return false;
            }
            if cur == WORLD_IDX || guard == 0 {
                break;
            }
            cur = o.parent;
            guard -= 1;
        }
        true
    }
}

/// Local properties of `o` at fractional tick `at`.
fn local(o: &VObject, at: f64) -> Properties {
    if o.chain.is_active() {
        o.chain.interpolate(o.current, at)
    } else {
        o.current
    }
}

/// Combines `props` with the resolved properties of its parent. `force`
/// applies position, orientation and opacity regardless of the mask.
fn inherit(props: &mut Properties, parent: &Properties, mask: Mask, force: bool) {
    if force || mask.contains(Mask::POSITION) {
        props.position = props.position + parent.position;
    }
    if force || mask.contains(Mask::ORIENTATION) {
        props.rotation.roll += parent.rotation.roll;
        props.rotation.pitch += parent.rotation.pitch;
        props.rotation.yaw += parent.rotation.yaw;
        props.rotation.quat = parent.rotation.quat * props.rotation.quat;
    }
    if force || mask.contains(Mask::OPACITY) {
        props.opacity *= parent.opacity;
    }
    if !force && mask.contains(Mask::SCALE) {
        props.scale.x *= parent.scale.x;
        props.scale.y *= parent.scale.y;
        props.scale.z *= parent.scale.z;
    }
}

/// Model matrix for drawing `o` with resolved properties `p`: the quad is
/// centered on the object's box and rotated around its origin offset.
pub(super) fn model_matrix(base: &Transform3d, p: &Properties, o: &VObject) -> Transform3d {
    let [hw, hh] = half_extent(p, o);
    let cx = f64::from(p.position.x) + f64::from(hw);
    let cy = f64::from(p.position.y) + f64::from(hh);
    if p.rotation.is_rotated() {
        let ox = f64::from(o.origin_offset.x);
        let oy = f64::from(o.origin_offset.y);
        *base
            * Transform3d::from_translation(cx + ox, cy + oy, 0.0)
            * Transform3d::from_quat(p.rotation.quat.normalize())
            * Transform3d::from_translation(-ox, -oy, 0.0)
    } else {
        *base * Transform3d::from_translation(cx, cy, 0.0)
    }
}

/// Half width and height of `o` drawn at scale `p.scale`.
pub(super) fn half_extent(p: &Properties, o: &VObject) -> [f32; 2] {
    [
        narrow(f64::from(o.origw) * f64::from(p.scale.x) * 0.5),
        narrow(f64::from(o.origh) * f64::from(p.scale.y) * 0.5),
    ]
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "screen-space offsets fit single precision"
)]
pub(super) fn narrow(v: f64) -> f32 {
    v as f32
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "hit testing works on whole pixels"
)]
fn trunc(v: f64) -> i32 {
    v as i32
}

fn edge(p: (i32, i32), a: (i32, i32), b: (i32, i32)) -> i64 {
    let (px, py) = (i64::from(p.0), i64::from(p.1));
    let (ax, ay) = (i64::from(a.0), i64::from(a.1));
    let (bx, by) = (i64::from(b.0), i64::from(b.1));
    (px - bx) * (ay - by) - (ax - bx) * (py - by)
}

fn in_triangle(p: (i32, i32), t: [(i32, i32); 3]) -> bool {
    let b1 = edge(p, t[0], t[1]) < 0;
    let b2 = edge(p, t[1], t[2]) < 0;
    let b3 = edge(p, t[2], t[0]) < 0;
    b1 == b2 && b2 == b3
}
