// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Z-order and rendertarget attachment.

use log::trace;

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::error::{EngineError, Result};
use crate::object::{ObjectId, WORLD_IDX};

/// What happens to an object's other attachments when it is attached to a
/// rendertarget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttachMode {
    /// Leave the current owner's list; the new target becomes the owner.
    #[default]
    Detach,
    /// Stay in every list it is already in; the owner does not change.
    Retain,
}

const MAX_ORDER: i32 = 65_535;

impl<B: GraphicsBackend> Engine<B> {
    /// Adds `id` to the list of the rendertarget backed by `target`
    /// (World for the display).
    ///
    /// With [`AttachMode::Detach`] the object leaves its current owner
    /// first. Attaching to a list the object is already in moves nothing.
    pub fn attach_to(&mut self, target: ObjectId, id: ObjectId, mode: AttachMode) -> Result<()> {
        let src = self.ctx.index_of(id)?;
        if src == WORLD_IDX {
            return Err(EngineError::UnacceptedState);
        }
        let dst = self.ctx.index_of(target)?;
        if dst == src {
            return Err(EngineError::BadArgument);
        }
        let persist = |idx: u32| self.ctx.obj(idx).is_some_and(|o| o.flags.persist);
        if persist(src) || persist(dst) {
            return Err(EngineError::UnacceptedState);
        }
        if self.ctx.target(dst).is_none() {
            return Err(EngineError::BadArgument);
        }

        if mode == AttachMode::Detach {
            if let Some(owner) = self.ctx.obj(src).and_then(|o| o.owner) {
                if owner != dst {
                    self.detach_object(owner, src);
                }
            }
            if let Some(o) = self.ctx.obj_mut(src) {
                o.owner = Some(dst);
            }
        }
        self.attach_object(dst, src);
        trace!("slot {src} attached to target {dst} ({mode:?})");
        Ok(())
    }

    /// Changes the order of `id`, keeping every list it is in sorted.
    ///
    /// Children in order-offset mode move by the same delta. Fails with
    /// [`EngineError::UnacceptedState`] for objects without an owner and
    /// for order-offset children of a 3D parent.
    pub fn set_z(&mut self, id: ObjectId, order: i32) -> Result<()> {
        let idx = self.live(id)?;
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        if o.owner.is_none() {
            return Err(EngineError::UnacceptedState);
        }
        let mut order = order.clamp(0, MAX_ORDER);
        if o.flags.order_offset && o.parent != WORLD_IDX {
            let base = self.ctx.order_of(o.parent);
            if base < 0 {
                return Err(EngineError::UnacceptedState);
            }
            order = (base + order).clamp(0, MAX_ORDER);
        }
        if o.order < 0 {
            order = -order;
        }
        self.reorder(idx, order);
        Ok(())
    }

    /// Makes the order of `id` relative to its parent's (or absolute
    /// again).
    pub fn inherit_order(&mut self, id: ObjectId, on: bool) -> Result<()> {
        let idx = self.live(id)?;
        let o = self.ctx.obj_mut(idx).ok_or(EngineError::NoSuchObject)?;
        o.flags.order_offset = on;
        Ok(())
    }

    /// Highest order among the 2D entries of the display rendertarget.
    #[must_use]
    pub fn max_order(&self) -> i32 {
        self.ctx
            .stdout
            .attached
            .iter()
            .map(|&i| self.ctx.order_of(i))
            .filter(|&o| o >= 0)
            .max()
            .unwrap_or(0)
    }

    /// Writes a new order and re-sorts every list holding `idx`, then
    /// shifts order-offset children by the same amount.
    pub(super) fn reorder(&mut self, idx: u32, order: i32) {
        let Some(old) = self.ctx.obj(idx).map(|o| o.order) else {
            return;
        };
        let delta = order - old;
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.order = order;
        }

        let mut holders = Vec::new();
        if self.ctx.stdout.contains(idx) {
            holders.push(WORLD_IDX);
        }
        holders.extend(
            self.ctx
                .targets
                .iter()
                .filter(|t| t.contains(idx))
                .map(|t| t.color),
        );
        for color in holders {
            if let Some(t) = self.ctx.target_mut(color) {
                t.remove(idx);
            }
            self.ctx.attach_sorted(color, idx);
        }

        if delta != 0 {
            for child in self.ctx.children_of(idx) {
                let follow = self
                    .ctx
                    .obj(child)
                    .filter(|c| c.flags.order_offset)
                    .map(|c| c.order);
                if let Some(c) = follow {
                    let shifted = if c < 0 {
                        (c - delta).clamp(-MAX_ORDER, 0)
                    } else {
                        (c + delta).clamp(0, MAX_ORDER)
                    };
                    self.reorder(child, shifted);
                }
            }
        }
        self.ctx.mark_content(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::object::{Anchor, Mask, ScalePolicy};

    fn orders(e: &TestEngine) -> Vec<i32> {
        let ctx = e.context();
        ctx.stdout.attached().iter().map(|&i| ctx.order_of(i)).collect()
    }

    #[test]
    fn raising_past_a_sibling_reorders_the_list() {
        let mut e = engine();
        let a = e.create_null(1, 1, 5).unwrap();
        let b = e.create_null(1, 1, 10).unwrap();
        assert_eq!(e.context().stdout.attached(), &[a.index(), b.index()]);

        e.set_z(a, 12).unwrap();
        assert_eq!(e.context().stdout.attached(), &[b.index(), a.index()]);
        assert_eq!(e.max_order(), 12);
    }

    #[test]
    fn lists_stay_sorted_under_mixed_operations() {
        let mut e = engine();
        let ids: Vec<_> = [7, 3, 3, 9, 0, 65_535]
            .into_iter()
            .map(|o| e.create_null(1, 1, o).unwrap())
            .collect();
        e.set_z(ids[0], 1).unwrap();
        e.set_z(ids[3], 100_000).unwrap();
        e.set_z(ids[4], -4).unwrap();
        e.set_z(ids[1], 3).unwrap();
        let o = orders(&e);
        assert!(o.windows(2).all(|w| w[0] <= w[1]), "sorted: {o:?}");
        assert_eq!(e.object(ids[3]).unwrap().order(), 65_535, "clamped high");
        assert_eq!(e.object(ids[4]).unwrap().order(), 0, "clamped low");
    }

    #[test]
    fn equal_orders_keep_insertion_order() {
        let mut e = engine();
        let a = e.create_null(1, 1, 2).unwrap();
        let b = e.create_null(1, 1, 2).unwrap();
        let c = e.create_null(1, 1, 2).unwrap();
        e.set_z(a, 2).unwrap();
        assert_eq!(
            e.context().stdout.attached(),
            &[b.index(), c.index(), a.index()],
            "re-inserted after equal keys"
        );
    }

    #[test]
    fn order_offset_children_follow_their_parent() {
        let mut e = engine();
        let p = e.create_null(1, 1, 10).unwrap();
        let c = e.create_null(1, 1, 0).unwrap();
        e.inherit_order(c, true).unwrap();
        e.link(c, p, Mask::DEFAULT, Anchor::UpperLeft, ScalePolicy::Independent)
            .unwrap();
        e.set_z(c, 2).unwrap();
        assert_eq!(e.object(c).unwrap().order(), 12, "relative to parent");

        e.set_z(p, 20).unwrap();
        assert_eq!(e.object(c).unwrap().order(), 22, "shifted by the delta");
        let o = orders(&e);
        assert!(o.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn unowned_objects_cannot_be_reordered() {
        let mut e = engine();
        let a = e.create_null(1, 1, 0).unwrap();
        let mut mask = Mask::DEFAULT;
        mask.set(Mask::LIVING, false);
        e.set_mask(a, mask).unwrap();
        let rt = e.create_texture(16, 16, 0).unwrap();
        e.setup_rendertarget(rt, Default::default()).unwrap();
        e.attach_to(rt, a, AttachMode::Detach).unwrap();
        e.delete(rt).unwrap();
        // Re-homed to the display by the teardown.
        assert!(e.set_z(a, 3).is_ok());

        let b = e.create_null(1, 1, 0).unwrap();
        let idx = idx(&e, b);
        assert!(e.detach_object(WORLD_IDX, idx));
        assert_eq!(e.set_z(b, 3), Err(EngineError::UnacceptedState));
    }

    #[test]
    fn attach_modes() {
        let mut e = engine();
        let rt = e.create_texture(16, 16, 0).unwrap();
        e.setup_rendertarget(rt, Default::default()).unwrap();
        let a = e.create_null(1, 1, 0).unwrap();
        let b = e.create_null(1, 1, 0).unwrap();

        e.attach_to(rt, a, AttachMode::Retain).unwrap();
        let o = e.object(a).unwrap();
        assert_eq!(o.owner, Some(WORLD_IDX), "owner unchanged");
        assert_eq!(o.attachments(), 2);

        e.attach_to(rt, b, AttachMode::Detach).unwrap();
        let o = e.object(b).unwrap();
        assert_eq!(o.owner, Some(rt.index()));
        assert_eq!(o.attachments(), 1);
        assert!(!e.context().stdout.contains(b.index()));

        assert_eq!(
            e.attach_to(ObjectId::WORLD, ObjectId::WORLD, AttachMode::Detach),
            Err(EngineError::UnacceptedState)
        );
        assert_eq!(
            e.attach_to(b, a, AttachMode::Detach),
            Err(EngineError::BadArgument),
            "not a rendertarget"
        );
        assert_eq!(e.attach_to(a, a, AttachMode::Detach), Err(EngineError::BadArgument));
    }

    #[test]
    fn persistent_objects_stay_on_the_display() {
        let mut e = engine();
        let rt = e.create_texture(16, 16, 0).unwrap();
        e.setup_rendertarget(rt, Default::default()).unwrap();
        let a = e.create_null(1, 1, 0).unwrap();
        e.persist(a).unwrap();
        assert_eq!(
            e.attach_to(rt, a, AttachMode::Detach),
            Err(EngineError::UnacceptedState)
        );
    }
}
