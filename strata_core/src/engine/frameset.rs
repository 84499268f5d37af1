// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Framesets: several stores behind one object.
//!
//! Every frame slot holds a counted reference. A fresh frameset points all
//! of its slots at the object's own store; [`Engine::set_as_frame`] swaps
//! individual slots for other objects' stores.

use log::debug;

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::error::{EngineError, Result};
use crate::object::{FrameMode, Frameset, ObjectId};

impl<B: GraphicsBackend> Engine<B> {
    /// Gives `id` a frameset of `capacity` frames presented per `mode`.
    ///
    /// A frameset only grows: asking for fewer frames than it already has
    /// fails with [`EngineError::UnacceptedState`]. Every slot is reset to
    /// the object's own store; the active index and stepping mode survive.
    pub fn alloc_frames(&mut self, id: ObjectId, capacity: usize, mode: FrameMode) -> Result<()> {
        let idx = self.live(id)?;
        if capacity == 0 {
            return Err(EngineError::BadArgument);
        }
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        if o.flags.clone || o.flags.persist {
            return Err(EngineError::ClonePermission);
        }
        let store = o
            .store
            .filter(|&s| self.stores.get(s).is_some_and(|s| s.is_texture()))
            .ok_or(EngineError::UnacceptedState)?;
        if o.frameset.as_ref().is_some_and(|fs| fs.len() > capacity) {
            return Err(EngineError::UnacceptedState);
        }

        let old = self
            .ctx
            .obj_mut(idx)
            .and_then(|o| o.frameset.take())
            .unwrap_or(Frameset {
                frames: Vec::new(),
                index: 0,
                mode,
                ctr: 0,
                mctr: 0,
            });
        for &frame in &old.frames {
            self.stores.release(&mut self.backend, frame);
        }
        for _ in 0..capacity {
            self.stores.retain(store);
        }
        let fs = Frameset {
            frames: vec![store; capacity],
            index: old.index.min(capacity - 1),
            mode,
            ..old
        };
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.frameset = Some(fs);
        }
        debug!("{id:?} holds {capacity} frames ({mode:?})");
        self.touch(idx);
        Ok(())
    }

    /// Sets how the frameset of `id` steps: 0 only manually, `n > 0` every
    /// n ticks, `n < 0` every |n| new feed frames.
    pub fn frame_cycle(&mut self, id: ObjectId, mode: i32) -> Result<()> {
        let idx = self.live(id)?;
        let fs = self
            .ctx
            .obj_mut(idx)
            .and_then(|o| o.frameset.as_mut())
            .ok_or(EngineError::UnacceptedState)?;
        fs.mctr = mode;
        fs.ctr = mode.saturating_abs();
        Ok(())
    }

    /// Selects the frame `id` presents. Out-of-range indices select the
    /// first frame.
    pub fn set_active_frame(&mut self, id: ObjectId, index: usize) -> Result<()> {
        let idx = self.live(id)?;
        if self.ctx.obj(idx).is_none_or(|o| o.frameset.is_none()) {
            return Err(EngineError::UnacceptedState);
        }
        let len = self.frame_count(idx);
        if let Some(fs) = self.ctx.obj_mut(idx).and_then(|o| o.frameset.as_mut()) {
            fs.index = if index < len { index } else { 0 };
        }
        self.touch(idx);
        Ok(())
    }

    /// Puts the store of `src` into frame `index` of `dst`, releasing what
    /// the slot held before.
    pub fn set_as_frame(&mut self, dst: ObjectId, src: ObjectId, index: usize) -> Result<()> {
        let didx = self.live(dst)?;
        let sidx = self.live(src)?;
        let d = self.ctx.obj(didx).ok_or(EngineError::NoSuchObject)?;
        let Some(fs) = &d.frameset else {
            return Err(EngineError::UnacceptedState);
        };
        let store = self
            .ctx
            .obj(sidx)
            .and_then(|o| o.store)
            .filter(|&s| self.stores.get(s).is_some_and(|s| s.is_texture()))
            .ok_or(EngineError::UnacceptedState)?;
        if index >= fs.len() || d.flags.clone {
            return Err(EngineError::BadArgument);
        }
        let old = fs.frames[index];
        if old == store {
            return Ok(());
        }

        self.stores.retain(store);
        self.stores.release(&mut self.backend, old);
        if let Some(fs) = self.ctx.obj_mut(didx).and_then(|o| o.frameset.as_mut()) {
            fs.frames[index] = store;
        }
        self.touch(didx);
        Ok(())
    }

    /// Number of frames `idx` steps through; a clone uses its original's.
    pub(super) fn frame_count(&self, idx: u32) -> usize {
        let Some(o) = self.ctx.obj(idx) else {
            return 0;
        };
        let owner = if o.flags.clone {
            self.ctx.obj(o.parent)
        } else {
            Some(o)
        };
        owner
            .and_then(|o| o.frameset.as_ref())
            .map_or(0, Frameset::len)
    }

    /// Runs the stepping counter of `idx` once, moving to the next frame
    /// when it runs out.
    pub(super) fn count_frames_down(&mut self, idx: u32) {
        let len = self.frame_count(idx);
        let stepped = self
            .ctx
            .obj_mut(idx)
            .and_then(|o| o.frameset.as_mut())
            .is_some_and(|fs| {
                let due = fs.count_down();
                if due {
                    fs.step(len);
                }
                due
            });
        if stepped {
            self.ctx.mark_content(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::trace::Tracer;

    fn active(e: &TestEngine, id: ObjectId) -> usize {
        e.object(id).unwrap().frameset().map_or(usize::MAX, Frameset::index)
    }

    #[test]
    fn frames_hold_references_to_the_store() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        e.alloc_frames(a, 3, FrameMode::Split).unwrap();
        assert_eq!(e.store_of(a).map(|s| s.refcount()), Ok(4));

        e.alloc_frames(a, 5, FrameMode::Split).unwrap();
        assert_eq!(e.store_of(a).map(|s| s.refcount()), Ok(6), "old frames released");
        assert_eq!(e.object(a).unwrap().frameset().map(Frameset::len), Some(5));

        assert_eq!(
            e.alloc_frames(a, 2, FrameMode::Split),
            Err(EngineError::UnacceptedState),
            "framesets only grow"
        );
        e.delete(a).unwrap();
        assert!(e.stores().is_empty());
    }

    #[test]
    fn allocation_preconditions() {
        let mut e = engine();
        let c = visible(&mut e, 8, 8, 0);
        let n = e.create_null(8, 8, 0).unwrap();
        let t = textured(&mut e, 8, 8, 0);
        let k = e.clone_object(t).unwrap();

        assert_eq!(e.alloc_frames(t, 0, FrameMode::Split), Err(EngineError::BadArgument));
        assert_eq!(e.alloc_frames(c, 2, FrameMode::Split), Err(EngineError::UnacceptedState));
        assert_eq!(e.alloc_frames(n, 2, FrameMode::Split), Err(EngineError::UnacceptedState));
        assert_eq!(e.alloc_frames(k, 2, FrameMode::Split), Err(EngineError::ClonePermission));
        assert_eq!(
            e.alloc_frames(ObjectId::WORLD, 2, FrameMode::Split),
            Err(EngineError::NoSuchObject)
        );
        assert_eq!(e.frame_cycle(n, 1), Err(EngineError::UnacceptedState));
        assert_eq!(e.set_active_frame(n, 0), Err(EngineError::UnacceptedState));
    }

    #[test]
    fn active_frame_wraps_to_zero() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        e.alloc_frames(a, 3, FrameMode::Split).unwrap();
        e.set_active_frame(a, 2).unwrap();
        assert_eq!(active(&e, a), 2);
        e.set_active_frame(a, 3).unwrap();
        assert_eq!(active(&e, a), 0);
    }

    #[test]
    fn swapping_frames_moves_references() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        let b = textured(&mut e, 4, 4, 0);
        let c = visible(&mut e, 4, 4, 0);
        e.alloc_frames(a, 2, FrameMode::Split).unwrap();

        e.set_as_frame(a, b, 1).unwrap();
        assert_eq!(e.store_of(a).map(|s| s.refcount()), Ok(2));
        assert_eq!(e.store_of(b).map(|s| s.refcount()), Ok(2));
        e.set_as_frame(a, b, 1).unwrap();
        assert_eq!(e.store_of(b).map(|s| s.refcount()), Ok(2), "same store is a no-op");

        assert_eq!(e.set_as_frame(a, b, 2), Err(EngineError::BadArgument));
        assert_eq!(e.set_as_frame(a, c, 0), Err(EngineError::UnacceptedState));
        assert_eq!(e.set_as_frame(b, a, 0), Err(EngineError::UnacceptedState));

        // The frame outlives the object that provided it.
        e.delete(b).unwrap();
        e.set_active_frame(a, 1).unwrap();
        let frame = e.object(a).unwrap().frameset().and_then(|fs| fs.active());
        assert!(frame.is_some_and(|s| e.stores().get(s).is_some()));
    }

    #[test]
    fn tick_cycle_steps_every_n_ticks() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        e.alloc_frames(a, 3, FrameMode::Split).unwrap();
        e.frame_cycle(a, 2).unwrap();
        e.tick(1, &mut Tracer::none());
        assert_eq!(active(&e, a), 0);
        e.tick(1, &mut Tracer::none());
        assert_eq!(active(&e, a), 1);
        e.tick(4, &mut Tracer::none());
        assert_eq!(active(&e, a), 0, "wrapped after two more steps");

        e.frame_cycle(a, 0).unwrap();
        e.tick(10, &mut Tracer::none());
        assert_eq!(active(&e, a), 0, "manual mode never steps");
    }

    #[test]
    fn multitexture_binds_newest_first() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        let b = textured(&mut e, 8, 8, 0);
        let c = textured(&mut e, 8, 8, 0);
        e.alloc_frames(a, 3, FrameMode::MultiTexture).unwrap();
        e.set_as_frame(a, b, 1).unwrap();
        e.set_as_frame(a, c, 2).unwrap();
        let gpu = |e: &TestEngine, id| e.store_of(id).unwrap().gpu().unwrap();
        let (ga, gb, gc) = (gpu(&e, a), gpu(&e, b), gpu(&e, c));
        let ai = idx(&e, a);

        let bound = |e: &mut TestEngine| {
            e.backend_mut().reset_log();
            e.refresh(0.0, &mut Tracer::none());
            e.backend()
                .draws
                .iter()
                .find(|d| d.call.object == ai)
                .map(|d| d.textures.clone())
                .unwrap_or_default()
        };
        assert_eq!(bound(&mut e), vec![ga, gb, gc], "index 0 binds in slot order");
        e.set_active_frame(a, 1).unwrap();
        assert_eq!(bound(&mut e), vec![gb, ga, gc]);
    }

    #[test]
    fn clones_follow_their_originals_frames() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        let b = textured(&mut e, 8, 8, 0);
        e.alloc_frames(a, 2, FrameMode::Split).unwrap();
        e.set_as_frame(a, b, 1).unwrap();
        let k = e.clone_object(a).unwrap();
        e.fade_to(k, 1.0, 0).unwrap();

        assert_eq!(e.set_as_frame(k, b, 0), Err(EngineError::BadArgument));
        e.set_active_frame(k, 1).unwrap();
        assert_eq!(active(&e, k), 1, "bounded by the original's frames");
        assert_eq!(active(&e, a), 0);

        let ki = idx(&e, k);
        let gb = e.store_of(b).unwrap().gpu().unwrap();
        e.backend_mut().reset_log();
        e.refresh(0.0, &mut Tracer::none());
        let drawn = e.backend().draws.iter().find(|d| d.call.object == ki);
        assert_eq!(drawn.map(|d| d.textures.clone()), Some(vec![gb]));
    }
}
