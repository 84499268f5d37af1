// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transform queueing and per-object property setters.
//!
//! A duration of 0 drops whatever was queued for the attribute and applies
//! the value at once; anything longer is appended behind the queue's last
//! segment.

use super::Engine;
use crate::backend::{BlendMode, GraphicsBackend, ShaderId};
use crate::chain::{Attribute, Interpolation};
use crate::error::{EngineError, Result};
use crate::math::{Rotation, Vec3};
use crate::object::{ClipMode, Mask, ObjectId, VObject, WORLD_IDX};

impl<B: GraphicsBackend> Engine<B> {
    /// Moves `id` to `to` (relative to its parent) over `duration` ticks.
    pub fn move_to(&mut self, id: ObjectId, to: Vec3, duration: u32) -> Result<()> {
        let now = self.display.ticks;
        self.animate(id, |o| {
            if duration == 0 {
                o.chain.wipe(Attribute::Position);
                o.current.position = to;
            } else {
                o.chain.queue_position(now, o.current.position, to, duration);
            }
        })
    }

    /// Scales `id` to `to` over `duration` ticks.
    pub fn scale_to(&mut self, id: ObjectId, to: Vec3, duration: u32) -> Result<()> {
        let now = self.display.ticks;
        self.animate(id, |o| {
            if duration == 0 {
                o.chain.wipe(Attribute::Scale);
                o.current.scale = to;
            } else {
                o.chain.queue_scale(now, o.current.scale, to, duration);
            }
        })
    }

    /// Rotates `id` to the given angles (degrees) over `duration` ticks.
    pub fn rotate_to(
        &mut self,
        id: ObjectId,
        roll: f32,
        pitch: f32,
        yaw: f32,
        duration: u32,
    ) -> Result<()> {
        let now = self.display.ticks;
        let to = Rotation::from_euler(roll, pitch, yaw);
        self.animate(id, |o| {
            if duration == 0 {
                o.chain.wipe(Attribute::Rotation);
                o.current.rotation = to;
            } else {
                o.chain.queue_rotation(now, o.current.rotation, to, duration);
            }
        })
    }

    /// Fades `id` to `to` (clamped to `[0, 1]`) over `duration` ticks.
    pub fn fade_to(&mut self, id: ObjectId, to: f32, duration: u32) -> Result<()> {
        let now = self.display.ticks;
        self.animate(id, |o| {
            if duration == 0 {
                o.chain.wipe(Attribute::Opacity);
                o.current.opacity = to.clamp(0.0, 1.0);
            } else {
                o.chain.queue_opacity(now, o.current.opacity, to, duration);
            }
        })
    }

    /// Changes the easing of the last queued segment of `attribute`.
    ///
    /// Fails with [`EngineError::UnacceptedState`] when nothing is queued.
    pub fn set_interp(
        &mut self,
        id: ObjectId,
        attribute: Attribute,
        interp: Interpolation,
    ) -> Result<()> {
        let o = self.animatable_mut(id)?;
        if o.chain.set_interp(attribute, interp) {
            Ok(())
        } else {
            Err(EngineError::UnacceptedState)
        }
    }

    /// Tags the last queued segment of `attribute`; its completion raises
    /// [`EngineEvent::ChainOver`](crate::event::EngineEvent::ChainOver).
    pub fn tag_transform(&mut self, id: ObjectId, attribute: Attribute, tag: u64) -> Result<()> {
        let o = self.animatable_mut(id)?;
        if o.chain.tag(attribute, tag) {
            Ok(())
        } else {
            Err(EngineError::UnacceptedState)
        }
    }

    /// Jumps every attribute to its final queued value.
    pub fn instant(&mut self, id: ObjectId) -> Result<()> {
        self.animate(id, |o| o.chain.instant(&mut o.current))
    }

    /// Drops every queued segment, leaving the object where it is.
    pub fn zap(&mut self, id: ObjectId) -> Result<()> {
        self.animate(id, |o| o.chain.zap())
    }

    /// Makes completed segments re-queue themselves.
    pub fn set_cyclic(&mut self, id: ObjectId, cyclic: bool) -> Result<()> {
        self.animatable_mut(id)?.flags.cyclic = cyclic;
        Ok(())
    }

    /// Copies the properties and queued transforms of `src` onto `dst`.
    pub fn copy_transform(&mut self, src: ObjectId, dst: ObjectId) -> Result<()> {
        let s = self.ctx.index_of(src)?;
        let d = self.live(dst)?;
        if s == d {
            return Ok(());
        }
        let (current, chain) = self
            .ctx
            .obj(s)
            .map(|o| (o.current, o.chain.clone()))
            .ok_or(EngineError::NoSuchObject)?;
        if let Some(o) = self.ctx.obj_mut(d) {
            o.current = current;
            o.chain = chain;
        }
        self.touch(d);
        Ok(())
    }

    /// Like [`copy_transform`](Self::copy_transform), then clears the queue
    /// of `src`.
    pub fn transfer_transform(&mut self, src: ObjectId, dst: ObjectId) -> Result<()> {
        self.copy_transform(src, dst)?;
        let s = self.ctx.index_of(src)?;
        if s != self.ctx.index_of(dst)? {
            if let Some(o) = self.ctx.obj_mut(s) {
                o.chain.zap();
            }
            self.touch(s);
        }
        Ok(())
    }

    // -- Setters --

    /// Replaces the inheritance mask.
    pub fn set_mask(&mut self, id: ObjectId, mask: Mask) -> Result<()> {
        self.animate(id, |o| o.mask = mask)
    }

    /// Sets or clears [`Mask::UNPICKABLE`].
    pub fn set_unpickable(&mut self, id: ObjectId, unpickable: bool) -> Result<()> {
        let o = self.animatable_mut(id)?;
        o.mask.set(Mask::UNPICKABLE, unpickable);
        Ok(())
    }

    /// Sets the clipping mode.
    pub fn set_clip(&mut self, id: ObjectId, clip: ClipMode) -> Result<()> {
        let idx = self.live(id)?;
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.clip = clip;
        }
        self.ctx.mark_content(idx);
        Ok(())
    }

    /// Sets the blend mode.
    pub fn set_blend(&mut self, id: ObjectId, blend: BlendMode) -> Result<()> {
        let idx = self.live(id)?;
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.blend = blend;
        }
        self.ctx.mark_content(idx);
        Ok(())
    }

    /// Sets the shader override; `None` restores the default program.
    pub fn set_program(&mut self, id: ObjectId, program: Option<ShaderId>) -> Result<()> {
        let idx = self.live(id)?;
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.program = program;
        }
        self.ctx.mark_content(idx);
        Ok(())
    }

    /// Overrides the texture coordinates (UL, UR, LR, LL as s,t pairs);
    /// `None` restores the full-store mapping.
    pub fn override_mapping(&mut self, id: ObjectId, txcos: Option<[f32; 8]>) -> Result<()> {
        let idx = self.live(id)?;
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.txcos = txcos;
        }
        self.ctx.mark_content(idx);
        Ok(())
    }

    /// Moves the rotation pivot away from the center.
    pub fn set_origin_offset(&mut self, id: ObjectId, offset: Vec3) -> Result<()> {
        self.animate(id, |o| o.origin_offset = offset)
    }

    /// Attaches a diagnostic tag.
    pub fn set_tracetag(&mut self, id: ObjectId, tag: Option<String>) -> Result<()> {
        self.animatable_mut(id)?.tracetag = tag;
        Ok(())
    }

    /// Gives `id` a lifetime in ticks; 0 means infinite. A finite lifetime
    /// also sets [`Mask::LIVING`].
    pub fn set_lifetime(&mut self, id: ObjectId, ticks: u32) -> Result<()> {
        let idx = self.live(id)?;
        let o = self.ctx.obj_mut(idx).ok_or(EngineError::NoSuchObject)?;
        o.lifetime = ticks;
        if ticks > 0 {
            o.mask.set(Mask::LIVING, true);
        }
        Ok(())
    }

    /// Applies `f` to the object behind `id` (World included) and
    /// invalidates its subtree.
    fn animate(&mut self, id: ObjectId, f: impl FnOnce(&mut VObject)) -> Result<()> {
        let idx = self.ctx.index_of(id)?;
        let o = self.ctx.obj_mut(idx).ok_or(EngineError::NoSuchObject)?;
        f(o);
        if idx == WORLD_IDX {
            self.ctx.stdout.dirty += 1;
        }
        self.touch(idx);
        Ok(())
    }

    fn animatable_mut(&mut self, id: ObjectId) -> Result<&mut VObject> {
        let idx = self.ctx.index_of(id)?;
        self.ctx.obj_mut(idx).ok_or(EngineError::NoSuchObject)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::event::EngineEvent;
    use crate::trace::Tracer;

    fn opacity(e: &TestEngine, id: ObjectId) -> f32 {
        e.object(id).unwrap().properties().opacity
    }

    #[test]
    fn chained_fades_play_back_to_back() {
        let mut e = engine();
        let a = visible(&mut e, 4, 4, 0);
        e.fade_to(a, 0.0, 10).unwrap();
        e.fade_to(a, 1.0, 10).unwrap();
        assert_eq!(e.object(a).unwrap().chain().len(Attribute::Opacity), 2);

        // Queued at tick 1; the first segment ends at tick 11.
        e.tick(6, &mut Tracer::none());
        assert!((opacity(&e, a) - 0.5).abs() < 1e-3, "halfway out");
        e.tick(5, &mut Tracer::none());
        assert!(opacity(&e, a) < 1e-3, "fully out before the fade in");
        e.tick(5, &mut Tracer::none());
        assert!((opacity(&e, a) - 0.5).abs() < 1e-3, "halfway in");
        e.tick(5, &mut Tracer::none());
        assert_eq!(opacity(&e, a), 1.0);
        assert!(!e.object(a).unwrap().chain().is_active());
    }

    #[test]
    fn zero_duration_applies_immediately() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.move_to(a, Vec3::new(5.0, 0.0, 0.0), 10).unwrap();
        e.move_to(a, Vec3::new(1.0, 2.0, 0.0), 0).unwrap();
        let o = e.object(a).unwrap();
        assert_eq!(o.properties().position, Vec3::new(1.0, 2.0, 0.0));
        assert!(!o.chain().is_active(), "queue wiped");
        assert!(e.drain_events().is_empty());
    }

    #[test]
    fn tagged_segments_report_completion() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.scale_to(a, Vec3::new(2.0, 2.0, 1.0), 3).unwrap();
        e.tag_transform(a, Attribute::Scale, 77).unwrap();
        assert_eq!(
            e.tag_transform(a, Attribute::Position, 1),
            Err(EngineError::UnacceptedState),
            "nothing queued"
        );
        e.tick(4, &mut Tracer::none());
        assert_eq!(
            e.drain_events(),
            vec![EngineEvent::ChainOver {
                id: a,
                attribute: Attribute::Scale,
                tag: 77
            }]
        );
        assert_eq!(e.object(a).unwrap().properties().scale, Vec3::new(2.0, 2.0, 1.0));
    }

    #[test]
    fn cyclic_transforms_requeue() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.set_cyclic(a, true).unwrap();
        e.rotate_to(a, 90.0, 0.0, 0.0, 4).unwrap();
        e.set_interp(a, Attribute::Rotation, Interpolation::Smoothstep)
            .unwrap();
        e.tick(5, &mut Tracer::none());
        let o = e.object(a).unwrap();
        assert!(o.chain().is_animating(Attribute::Rotation), "re-queued");
        assert!((o.properties().rotation.roll - 90.0).abs() < 1e-3);
    }

    #[test]
    fn instant_and_transfer() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        let b = e.create_null(4, 4, 0).unwrap();
        e.move_to(a, Vec3::new(10.0, 0.0, 0.0), 20).unwrap();
        e.move_to(a, Vec3::new(20.0, 0.0, 0.0), 20).unwrap();

        e.transfer_transform(a, b).unwrap();
        assert!(!e.object(a).unwrap().chain().is_active());
        assert_eq!(e.object(b).unwrap().chain().len(Attribute::Position), 2);

        e.instant(b).unwrap();
        let o = e.object(b).unwrap();
        assert_eq!(o.properties().position, Vec3::new(20.0, 0.0, 0.0));
        assert!(!o.chain().is_active());
    }

    #[test]
    fn opacity_is_clamped() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.fade_to(a, 3.0, 0).unwrap();
        assert_eq!(opacity(&e, a), 1.0);
        e.fade_to(a, -1.0, 0).unwrap();
        assert_eq!(opacity(&e, a), 0.0);
    }

    #[test]
    fn lifetime_sets_the_living_bit() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.set_mask(a, Mask::EMPTY).unwrap();
        e.set_lifetime(a, 3).unwrap();
        assert!(e.object(a).unwrap().mask().contains(Mask::LIVING));
        e.set_unpickable(a, true).unwrap();
        assert!(e.object(a).unwrap().mask().contains(Mask::UNPICKABLE));
        assert_eq!(e.set_lifetime(ObjectId::WORLD, 1), Err(EngineError::NoSuchObject));
    }
}
