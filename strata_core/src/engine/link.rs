// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parent links, deletion, clones and persistence.

use log::{debug, trace, warn};

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::chain::Attribute;
use crate::error::{EngineError, Result};
use crate::object::{Anchor, Frameset, Mask, ObjectId, RESERVED_IDX, ScalePolicy, VObject, WORLD_IDX};
#[cfg(feature = "trace-rich")]
use crate::trace::ObjectOp;

impl<B: GraphicsBackend> Engine<B> {
    /// Makes `child` a child of `parent`.
    ///
    /// A reserved `parent` means World. `mask` replaces the child's
    /// inheritance mask, with the scale bit taken from `scale`.
    /// Position, scale and rotation animations are dropped since they were
    /// relative to the old parent; an opacity fade keeps running.
    ///
    /// Fails with [`EngineError::ClonePermission`] when either side is a
    /// clone or persistent, or when `parent` is `child` or one of its
    /// descendants.
    pub fn link(
        &mut self,
        child: ObjectId,
        parent: ObjectId,
        mask: Mask,
        anchor: Anchor,
        scale: ScalePolicy,
    ) -> Result<()> {
        let src = self.live(child)?;
        if parent == child {
            return Err(EngineError::ClonePermission);
        }
        let dst = if parent.idx == RESERVED_IDX {
            WORLD_IDX
        } else {
            self.ctx.index_of(parent)?
        };

        let protected = |o: &VObject| o.flags.clone || o.flags.persist;
        if self.ctx.obj(src).is_some_and(protected) {
            return Err(EngineError::ClonePermission);
        }
        if dst != WORLD_IDX {
            if self.ctx.obj(dst).is_some_and(protected) {
                return Err(EngineError::ClonePermission);
            }
            if self.ctx.has_ancestor(dst, src) {
                return Err(EngineError::ClonePermission);
            }
        }

        let mut mask = mask;
        mask.set(Mask::SCALE, scale == ScalePolicy::Inherit);

        let relink = self.ctx.obj(src).is_some_and(|o| o.parent != dst);
        if relink {
            self.ctx.unlink_from_parent(src);
            if dst != WORLD_IDX {
                self.ctx.add_child(dst, src);
            }
            let parent_order = self.ctx.order_of(dst);
            if let Some(o) = self.ctx.obj_mut(src) {
                o.chain.wipe(Attribute::Position);
                o.chain.wipe(Attribute::Scale);
                o.chain.wipe(Attribute::Rotation);
            }
            if dst != WORLD_IDX && self.ctx.obj(src).is_some_and(|o| o.flags.order_offset) {
                self.reorder(src, parent_order);
            }
            #[cfg(feature = "trace-rich")]
            self.record(src, ObjectOp::Link);
        }
        if let Some(o) = self.ctx.obj_mut(src) {
            o.mask = mask;
            o.anchor = anchor;
        }
        trace!("linked slot {src} under {dst}");
        self.touch(src);
        Ok(())
    }

    /// Deletes an object.
    ///
    /// Children with the [`LIVING`](Mask::LIVING) bit, and clones, go with
    /// it; other children are handed to World. Deleting the color object of
    /// a rendertarget tears the rendertarget down first.
    ///
    /// Fails with [`EngineError::NoSuchObject`] for World or a stale handle
    /// and with [`EngineError::UnacceptedState`] for a persistent object
    /// that a lower context still holds.
    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        let idx = self.live(id)?;
        let persist = self.ctx.obj(idx).is_some_and(|o| o.flags.persist);
        if persist
            && self
                .saved
                .last()
                .and_then(|lower| lower.obj(idx))
                .is_some_and(|o| o.flags.persist)
        {
            return Err(EngineError::UnacceptedState);
        }
        self.delete_index(idx);
        Ok(())
    }

    /// Deletion cascade for a validated slot.
    pub(super) fn delete_index(&mut self, idx: u32) {
        if idx <= WORLD_IDX || self.ctx.obj(idx).is_none() {
            return;
        }

        if let Some(pending) = self.ctx.slots[idx as usize].pending.take() {
            debug!("joining load of {} before deleting slot {idx}", pending.path());
            _ = pending.join();
        }

        self.detach_all(idx);

        let (parent, is_clone) = self
            .ctx
            .obj(idx)
            .map_or((WORLD_IDX, false), |o| (o.parent, o.flags.clone));
        if is_clone && parent != WORLD_IDX {
            if let Some(p) = self.ctx.obj_mut(parent) {
                p.instances = p.instances.saturating_sub(1);
            }
        }
        self.ctx.unlink_from_parent(idx);

        if self.ctx.targets.iter().any(|t| t.color == idx) {
            self.drop_rendertarget(idx);
        }

        let mut pool = Vec::new();
        for child in self.ctx.children_of(idx) {
            let cascade = self
                .ctx
                .obj(child)
                .is_some_and(|c| c.flags.clone || c.mask.contains(Mask::LIVING));
            if self.ctx.obj(child).is_some_and(|c| c.flags.clone) {
                if let Some(o) = self.ctx.obj_mut(idx) {
                    o.instances = o.instances.saturating_sub(1);
                }
            }
            self.ctx.unlink_from_parent(child);
            self.ctx.invalidate(child);
            if cascade {
                pool.push(child);
            }
        }

        let Some(freed) = self.ctx.free(idx) else {
            return;
        };
        if let Some(mut feed) = freed.feed {
            feed.destroy();
        }
        let obj = freed.object;
        if !obj.flags.clone {
            if let Some(fs) = &obj.frameset {
                for &frame in &fs.frames {
                    self.stores.release(&mut self.backend, frame);
                }
            }
            self.release_store(obj.store);
        }
        if obj.attachments != 0 || obj.child_count != 0 || obj.instances != 0 {
            warn!(
                "[BUG] Broken reference counters on slot {idx}: attachments {} links {} instances {}",
                obj.attachments, obj.child_count, obj.instances
            );
        }
        if let Some(tag) = &obj.tracetag {
            trace!("deleted slot {idx} ({tag})");
        }
        #[cfg(feature = "trace-rich")]
        self.record(idx, ObjectOp::Delete);

        for child in pool {
            self.delete_index(child);
        }
    }

    /// Creates an instance of `id` that shares its store and frameset.
    ///
    /// Cloning a clone clones its original. The clone is a child of the
    /// original, so it follows it around and dies with it.
    pub fn clone_object(&mut self, id: ObjectId) -> Result<ObjectId> {
        let mut src = self.ctx.index_of(id)?;
        if src == WORLD_IDX {
            return Err(EngineError::BadArgument);
        }
        while let Some(o) = self.ctx.obj(src).filter(|o| o.flags.clone) {
            src = o.parent;
        }
        let orig = self.ctx.obj(src).ok_or(EngineError::NoSuchObject)?;
        if orig.flags.persist {
            return Err(EngineError::UnacceptedState);
        }
        self.ensure_space()?;

        let mut obj = VObject::new(src, orig.density);
        obj.flags.clone = true;
        obj.kind = orig.kind;
        obj.blend = orig.blend;
        obj.origw = orig.origw;
        obj.origh = orig.origh;
        obj.order = orig.order;
        obj.current.scale = orig.current.scale;
        obj.program = orig.program;
        obj.txcos = orig.txcos;
        obj.store = orig.store;
        obj.frameset = orig.frameset.as_ref().map(|fs| Frameset {
            frames: Vec::new(),
            index: fs.index,
            mode: fs.mode,
            ctr: fs.ctr,
            mctr: fs.mctr,
        });

        let clone = self.ctx.allocate(obj)?;
        self.ctx.add_child(src, clone.idx);
        if let Some(o) = self.ctx.obj_mut(src) {
            o.instances += 1;
        }
        self.attach_object(WORLD_IDX, clone.idx);
        #[cfg(feature = "trace-rich")]
        self.record(clone.idx, ObjectOp::Allocate);
        Ok(clone)
    }

    /// Marks an object as surviving context pushes.
    ///
    /// Only plain objects qualify: no clone, no frameset, sole owner of its
    /// store, linked to World.
    pub fn persist(&mut self, id: ObjectId) -> Result<()> {
        let idx = self.live(id)?;
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        let sole_owner = o
            .store
            .is_none_or(|s| self.stores.get(s).is_some_and(|s| s.refcount() == 1));
        if o.flags.clone || o.frameset.is_some() || !sole_owner || o.parent != WORLD_IDX {
            return Err(EngineError::UnacceptedState);
        }
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.flags.persist = true;
        }
        Ok(())
    }

    /// Points `dst` at the store of `src`, dropping the store it had.
    pub fn share_store(&mut self, src: ObjectId, dst: ObjectId) -> Result<()> {
        let s = self.live(src)?;
        let d = self.live(dst)?;
        let store = self
            .ctx
            .obj(s)
            .and_then(|o| o.store)
            .filter(|&st| self.stores.get(st).is_some_and(|st| st.is_texture()))
            .ok_or(EngineError::BadResource)?;
        if s == d {
            return Ok(());
        }
        let target = self.ctx.obj(d).ok_or(EngineError::NoSuchObject)?;
        if target.flags.clone || self.ctx.targets.iter().any(|t| t.color == d) {
            return Err(EngineError::UnacceptedState);
        }
        if target.store == Some(store) {
            return Ok(());
        }
        let old = target.store;
        self.stores.retain(store);
        self.release_store(old);
        if let Some(o) = self.ctx.obj_mut(d) {
            o.store = Some(store);
        }
        self.touch(d);
        Ok(())
    }

    // -- Queries --

    /// The parent of `id`; World's parent is World.
    pub fn parent_of(&self, id: ObjectId) -> Result<ObjectId> {
        let idx = self.ctx.index_of(id)?;
        match self.ctx.obj(idx).map(|o| o.parent) {
            Some(p) if p != WORLD_IDX && self.ctx.obj(p).is_some() => Ok(self.ctx.id_of(p)),
            _ => Ok(ObjectId::WORLD),
        }
    }

    /// The `n`-th child of `parent`, in link order.
    pub fn find_child(&self, parent: ObjectId, n: usize) -> Result<ObjectId> {
        let idx = self.live(parent)?;
        self.ctx
            .children_of(idx)
            .get(n)
            .map(|&c| self.ctx.id_of(c))
            .ok_or(EngineError::NoSuchObject)
    }

    /// Whether `ancestor` is on the parent path of `id`. World is an
    /// ancestor of everything.
    pub fn is_descendant(&self, id: ObjectId, ancestor: ObjectId) -> Result<bool> {
        let idx = self.live(id)?;
        let anc = self.ctx.index_of(ancestor)?;
        if anc == WORLD_IDX {
            return Ok(true);
        }
        Ok(idx != anc && self.ctx.has_ancestor(idx, anc))
    }

    /// Direct children of `id`, in link order.
    pub fn children(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        let idx = self.live(id)?;
        Ok(self
            .ctx
            .children_of(idx)
            .into_iter()
            .map(|c| self.ctx.id_of(c))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::error::EngineError;
    use crate::math::Vec3;
    use crate::object::{Anchor, Mask, ObjectId, ScalePolicy, WORLD_IDX};

    fn link(e: &mut TestEngine, c: ObjectId, p: ObjectId) -> Result<(), EngineError> {
        e.link(c, p, Mask::DEFAULT, Anchor::UpperLeft, ScalePolicy::Independent)
    }

    #[test]
    fn relinking_moves_child_counts() {
        let mut e = engine();
        let a = e.create_null(1, 1, 0).unwrap();
        let b = e.create_null(1, 1, 0).unwrap();
        let c = e.create_null(1, 1, 0).unwrap();

        link(&mut e, c, a).unwrap();
        assert_eq!(e.object(a).unwrap().child_count(), 1);

        link(&mut e, c, b).unwrap();
        assert_eq!(e.object(a).unwrap().child_count(), 0, "old parent decremented once");
        assert_eq!(e.object(b).unwrap().child_count(), 1);
        assert_eq!(e.parent_of(c), Ok(b));
        assert!(e.children(a).unwrap().is_empty(), "no dangling entry in old parent");
    }

    #[test]
    fn cycles_are_rejected() {
        let mut e = engine();
        let a = e.create_null(1, 1, 0).unwrap();
        let b = e.create_null(1, 1, 0).unwrap();
        let c = e.create_null(1, 1, 0).unwrap();
        link(&mut e, b, a).unwrap();
        link(&mut e, c, b).unwrap();

        assert_eq!(link(&mut e, a, c), Err(EngineError::ClonePermission));
        assert_eq!(link(&mut e, a, b), Err(EngineError::ClonePermission));
        assert_eq!(e.parent_of(a), Ok(ObjectId::WORLD), "unchanged on failure");
        assert_eq!(e.object(c).unwrap().child_count(), 0);
    }

    #[test]
    fn self_link_is_rejected() {
        let mut e = engine();
        let a = e.create_null(1, 1, 0).unwrap();
        let b = e.create_null(1, 1, 0).unwrap();
        link(&mut e, b, a).unwrap();
        assert_eq!(link(&mut e, b, b), Err(EngineError::ClonePermission));
        assert_eq!(e.parent_of(b), Ok(a), "parent unchanged on failure");
        assert_eq!(e.object(a).unwrap().child_count(), 1);

        let c = e.create_null(1, 1, 0).unwrap();
        assert_eq!(link(&mut e, c, c), Err(EngineError::ClonePermission));
        assert_eq!(e.parent_of(c), Ok(ObjectId::WORLD));
    }

    #[test]
    fn link_keeps_fades_and_drops_moves() {
        let mut e = engine();
        let p = e.create_null(1, 1, 0).unwrap();
        let c = e.create_null(1, 1, 0).unwrap();
        e.move_to(c, Vec3::new(10.0, 0.0, 0.0), 10).unwrap();
        e.fade_to(c, 1.0, 10).unwrap();
        link(&mut e, c, p).unwrap();
        let chain = e.object(c).unwrap().chain();
        assert!(!chain.is_animating(crate::chain::Attribute::Position));
        assert!(chain.is_animating(crate::chain::Attribute::Opacity));
    }

    #[test]
    fn scale_policy_controls_the_scale_bit() {
        let mut e = engine();
        let p = e.create_null(1, 1, 0).unwrap();
        let c = e.create_null(1, 1, 0).unwrap();
        e.link(c, p, Mask::DEFAULT, Anchor::Center, ScalePolicy::Inherit)
            .unwrap();
        let o = e.object(c).unwrap();
        assert!(o.mask().contains(Mask::SCALE));
        assert_eq!(o.anchor(), Anchor::Center);
    }

    #[test]
    fn delete_cascades_to_living_children_only() {
        let mut e = engine();
        let p = e.create_null(1, 1, 0).unwrap();
        let living = e.create_null(1, 1, 0).unwrap();
        let orphan = e.create_null(1, 1, 0).unwrap();
        link(&mut e, living, p).unwrap();
        let mut m = Mask::DEFAULT;
        m.set(Mask::LIVING, false);
        e.link(orphan, p, m, Anchor::UpperLeft, ScalePolicy::Independent)
            .unwrap();

        e.delete(p).unwrap();
        assert_eq!(e.object(living).err(), Some(EngineError::NoSuchObject));
        assert_eq!(e.parent_of(orphan), Ok(ObjectId::WORLD), "handed to World");
        assert_eq!(e.object(orphan).unwrap().attachments(), 1);
    }

    #[test]
    fn delete_is_final_and_counts_once() {
        let mut e = engine();
        let a = textured(&mut e, 4, 4, 0);
        let b = e.create_null(1, 1, 0).unwrap();
        e.share_store(a, b).unwrap();
        let store = e.object(a).unwrap().store().unwrap();
        assert_eq!(e.stores().get(store).map(|s| s.refcount()), Some(2));

        e.delete(a).unwrap();
        assert_eq!(e.delete(a), Err(EngineError::NoSuchObject));
        assert_eq!(e.stores().get(store).map(|s| s.refcount()), Some(1));
        assert!(!e.context().stdout.contains(a.index()));
        e.delete(b).unwrap();
        assert!(e.stores().get(store).is_none(), "last reference freed the store");
    }

    #[test]
    fn color_stores_cannot_be_shared() {
        let mut e = engine();
        let a = visible(&mut e, 4, 4, 0);
        let b = e.create_null(1, 1, 0).unwrap();
        assert_eq!(e.share_store(a, b), Err(EngineError::BadResource));
    }

    #[test]
    fn world_cannot_be_deleted() {
        let mut e = engine();
        assert_eq!(e.delete(ObjectId::WORLD), Err(EngineError::NoSuchObject));
    }

    #[test]
    fn clones_share_and_die_with_their_original() {
        let mut e = engine();
        let a = visible(&mut e, 8, 8, 4);
        let c1 = e.clone_object(a).unwrap();
        let c2 = e.clone_object(c1).unwrap();
        assert_eq!(e.parent_of(c2), Ok(a), "clone of a clone clones the original");
        assert_eq!(e.object(a).unwrap().instances, 2);
        let o = e.object(c1).unwrap();
        assert_eq!(o.store(), e.object(a).unwrap().store());
        assert_eq!(o.order(), 4);
        assert_eq!(e.store_of(a).map(|s| s.refcount()), Ok(1), "clones do not count");

        assert_eq!(
            link(&mut e, c1, ObjectId::WORLD),
            Err(EngineError::ClonePermission)
        );

        e.delete(a).unwrap();
        assert!(e.object(c1).is_err() && e.object(c2).is_err());
        assert_eq!(e.context().usage().0, 0);
    }

    #[test]
    fn deleting_a_clone_keeps_the_store() {
        let mut e = engine();
        let a = visible(&mut e, 8, 8, 0);
        let c = e.clone_object(a).unwrap();
        e.delete(c).unwrap();
        assert_eq!(e.object(a).unwrap().instances, 0);
        assert_eq!(e.object(a).unwrap().child_count(), 0);
        assert!(e.store_of(a).is_ok());
    }

    #[test]
    fn persist_preconditions() {
        let mut e = engine();
        let a = textured(&mut e, 2, 2, 0);
        let p = e.create_null(1, 1, 0).unwrap();
        let child = visible(&mut e, 2, 2, 0);
        link(&mut e, child, p).unwrap();
        assert_eq!(e.persist(child), Err(EngineError::UnacceptedState));

        let b = e.create_null(1, 1, 0).unwrap();
        e.share_store(a, b).unwrap();
        assert_eq!(e.persist(a), Err(EngineError::UnacceptedState), "shared store");

        let solo = visible(&mut e, 2, 2, 0);
        e.persist(solo).unwrap();
        assert!(e.object(solo).unwrap().flags().persist);
        assert_eq!(e.clone_object(solo), Err(EngineError::UnacceptedState));
        assert_eq!(link(&mut e, child, solo), Err(EngineError::ClonePermission));
    }

    #[test]
    fn queries() {
        let mut e = engine();
        let p = e.create_null(1, 1, 0).unwrap();
        let a = e.create_null(1, 1, 0).unwrap();
        let b = e.create_null(1, 1, 0).unwrap();
        link(&mut e, a, p).unwrap();
        link(&mut e, b, a).unwrap();
        assert_eq!(e.find_child(p, 0), Ok(a));
        assert_eq!(e.find_child(p, 1), Err(EngineError::NoSuchObject));
        assert_eq!(e.is_descendant(b, p), Ok(true));
        assert_eq!(e.is_descendant(p, b), Ok(false));
        assert_eq!(e.is_descendant(p, ObjectId::WORLD), Ok(true));
        assert_eq!(e.parent_of(ObjectId::WORLD), Ok(ObjectId::WORLD));
        assert_eq!(idx(&e, p), p.index());
        assert_ne!(idx(&e, p), WORLD_IDX);
    }
}
