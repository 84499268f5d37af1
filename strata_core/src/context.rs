// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One addressable universe of objects.
//!
//! A [`Context`] is a bounded slab of object slots with World at slot 1, the
//! display rendertarget, any offscreen rendertargets, and the dirty tracker
//! for resolved-property caches. The engine keeps a stack of contexts; only
//! the top one is live.

use core::fmt;

use log::warn;
use understory_dirty::{CycleHandling, DirtyTracker, EagerPolicy};

use crate::chain::Tick;
use crate::dirty;
use crate::error::{EngineError, Result};
use crate::feed::Feed;
use crate::loader::PendingLoad;
use crate::object::{INVALID, ObjectId, RESERVED_IDX, VObject, WORLD_IDX};
use crate::rendertarget::Rendertarget;

/// One object slot.
#[derive(Default)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) object: Option<VObject>,
    pub(crate) feed: Option<Box<dyn Feed>>,
    pub(crate) pending: Option<PendingLoad>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("generation", &self.generation)
            .field("object", &self.object.is_some())
            .field("feed", &self.feed.is_some())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// What [`Context::free`] hands back.
pub(crate) struct Freed {
    pub(crate) object: VObject,
    pub(crate) feed: Option<Box<dyn Feed>>,
    pub(crate) pending: Option<PendingLoad>,
}

/// A slab of objects with its World root and rendertargets.
pub struct Context {
    pub(crate) slots: Vec<Slot>,
    pub(crate) next_alloc: u32,
    pub(crate) limit: u32,
    pub(crate) alive: u32,
    pub(crate) stdout: Rendertarget,
    pub(crate) targets: Vec<Rendertarget>,
    pub(crate) last_tickstamp: Tick,
    pub(crate) dirty: DirtyTracker<u32>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("alive", &self.alive)
            .field("limit", &self.limit)
            .field("targets", &self.targets.len())
            .field("last_tickstamp", &self.last_tickstamp)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates a context of `limit` slots around `world`.
    pub(crate) fn new(limit: u32, world: VObject, stdout: Rendertarget) -> Self {
        let mut slots = Vec::with_capacity(64.min(limit as usize));
        slots.push(Slot::default());
        slots.push(Slot {
            object: Some(world),
            ..Slot::default()
        });
        Self {
            slots,
            next_alloc: WORLD_IDX + 1,
            limit,
            alive: 0,
            stdout,
            targets: Vec::new(),
            last_tickstamp: 0,
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
        }
    }

    // -- Allocation --

    /// Finds a free slot, scanning cyclically from the last allocation.
    pub(crate) fn allocate(&mut self, object: VObject) -> Result<ObjectId> {
        let limit = self.limit;
        for step in 0..limit {
            let idx = (self.next_alloc + step) % limit;
            if idx == RESERVED_IDX || idx == WORLD_IDX {
                continue;
            }
            if idx as usize >= self.slots.len() {
                self.slots.resize_with(idx as usize + 1, Slot::default);
            }
            let slot = &mut self.slots[idx as usize];
            if slot.object.is_none() {
                slot.object = Some(object);
                self.next_alloc = idx + 1;
                self.alive += 1;
                self.dirty.mark(idx, dirty::CONTENT);
                return Ok(ObjectId {
                    idx,
                    generation: slot.generation,
                });
            }
        }
        Err(EngineError::OutOfSpace)
    }

    /// Places `object` at a specific free slot under a given generation, so
    /// handles stay valid when an object migrates between contexts.
    pub(crate) fn place(&mut self, idx: u32, generation: u32, object: VObject) -> Result<ObjectId> {
        if idx <= WORLD_IDX || idx >= self.limit {
            return Err(EngineError::BadArgument);
        }
        if idx as usize >= self.slots.len() {
            self.slots.resize_with(idx as usize + 1, Slot::default);
        }
        let slot = &mut self.slots[idx as usize];
        if slot.object.is_some() {
            return Err(EngineError::UnacceptedState);
        }
        slot.object = Some(object);
        slot.generation = generation;
        self.alive += 1;
        self.dirty.mark(idx, dirty::CONTENT);
        Ok(ObjectId { idx, generation })
    }

    /// Takes an object out of its slot without bumping the generation; the
    /// object lives on in another context.
    pub(crate) fn evict(&mut self, idx: u32) -> Option<Freed> {
        if idx <= WORLD_IDX {
            return None;
        }
        let slot = self.slots.get_mut(idx as usize)?;
        let object = slot.object.take()?;
        self.alive -= 1;
        self.dirty.remove_key(idx);
        Some(Freed {
            object,
            feed: slot.feed.take(),
            pending: slot.pending.take(),
        })
    }

    /// Empties slot `idx`, bumping its generation.
    pub(crate) fn free(&mut self, idx: u32) -> Option<Freed> {
        if idx <= WORLD_IDX {
            return None;
        }
        let slot = self.slots.get_mut(idx as usize)?;
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.alive -= 1;
        self.dirty.remove_key(idx);
        Some(Freed {
            object,
            feed: slot.feed.take(),
            pending: slot.pending.take(),
        })
    }

    // -- Lookup --

    /// Resolves a handle to its slot index.
    pub(crate) fn index_of(&self, id: ObjectId) -> Result<u32> {
        if id.idx == WORLD_IDX {
            return Ok(WORLD_IDX);
        }
        match self.slots.get(id.idx as usize) {
            Some(slot) if slot.generation == id.generation && slot.object.is_some() => Ok(id.idx),
            _ => Err(EngineError::NoSuchObject),
        }
    }

    /// The current handle of a live slot.
    pub(crate) fn id_of(&self, idx: u32) -> ObjectId {
        if idx == WORLD_IDX {
            return ObjectId::WORLD;
        }
        ObjectId {
            idx,
            generation: self.slots.get(idx as usize).map_or(0, |s| s.generation),
        }
    }

    /// Object in a live slot.
    #[inline]
    pub(crate) fn obj(&self, idx: u32) -> Option<&VObject> {
        self.slots.get(idx as usize).and_then(|s| s.object.as_ref())
    }

    /// Mutable object in a live slot.
    #[inline]
    pub(crate) fn obj_mut(&mut self, idx: u32) -> Option<&mut VObject> {
        self.slots
            .get_mut(idx as usize)
            .and_then(|s| s.object.as_mut())
    }

    /// The World root.
    pub(crate) fn world(&self) -> Option<&VObject> {
        self.obj(WORLD_IDX)
    }

    /// Order of a live slot (0 for empty slots).
    pub(crate) fn order_of(&self, idx: u32) -> i32 {
        self.obj(idx).map_or(0, |o| o.order)
    }

    /// Indices of every live object except World.
    pub(crate) fn live_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .skip(WORLD_IDX as usize + 1)
            .filter(|(_, s)| s.object.is_some())
            .filter_map(|(i, _)| u32::try_from(i).ok())
            .collect()
    }

    /// Number of live objects (World excluded) and slot capacity.
    #[must_use]
    pub fn usage(&self) -> (u32, u32) {
        (self.alive, self.limit)
    }

    // -- Rendertargets --

    /// The rendertarget whose color object is `color`.
    pub(crate) fn target(&self, color: u32) -> Option<&Rendertarget> {
        if color == WORLD_IDX {
            return Some(&self.stdout);
        }
        self.targets.iter().find(|t| t.color == color)
    }

    /// Mutable rendertarget lookup.
    pub(crate) fn target_mut(&mut self, color: u32) -> Option<&mut Rendertarget> {
        if color == WORLD_IDX {
            return Some(&mut self.stdout);
        }
        self.targets.iter_mut().find(|t| t.color == color)
    }

    /// Inserts `idx` into the list of `color`, sorted by order.
    pub(crate) fn attach_sorted(&mut self, color: u32, idx: u32) -> bool {
        let order = self.order_of(idx);
        let Self {
            slots,
            stdout,
            targets,
            ..
        } = self;
        let order_of = |i: u32| {
            slots
                .get(i as usize)
                .and_then(|s| s.object.as_ref())
                .map_or(0, |o| o.order)
        };
        let target = if color == WORLD_IDX {
            Some(stdout)
        } else {
            targets.iter_mut().find(|t| t.color == color)
        };
        match target {
            Some(t) => {
                t.insert_sorted(idx, order, order_of);
                true
            }
            None => false,
        }
    }

    // -- Topology --

    /// Appends `c` to the child list of `p`.
    pub(crate) fn add_child(&mut self, p: u32, c: u32) {
        let first = self.obj(p).map_or(INVALID, |o| o.first_child);
        if first == INVALID {
            if let Some(o) = self.obj_mut(p) {
                o.first_child = c;
            }
            if let Some(o) = self.obj_mut(c) {
                o.prev_sibling = INVALID;
            }
        } else {
            let mut last = first;
            while let Some(next) = self.obj(last).map(|o| o.next_sibling) {
                if next == INVALID {
                    break;
                }
                last = next;
            }
            if let Some(o) = self.obj_mut(last) {
                o.next_sibling = c;
            }
            if let Some(o) = self.obj_mut(c) {
                o.prev_sibling = last;
            }
        }
        if let Some(o) = self.obj_mut(c) {
            o.parent = p;
            o.next_sibling = INVALID;
        }
        if let Some(o) = self.obj_mut(p) {
            o.child_count += 1;
        }
        let _ = self.dirty.add_dependency(c, p, dirty::CACHE);
    }

    /// Unlinks `c` from its parent's child list and reparents it to World.
    /// World keeps no child list, so objects already under it are left
    /// alone.
    pub(crate) fn unlink_from_parent(&mut self, c: u32) {
        let Some((p, prev, next)) = self
            .obj(c)
            .map(|o| (o.parent, o.prev_sibling, o.next_sibling))
        else {
            return;
        };
        if p == WORLD_IDX || p == INVALID {
            return;
        }
        if prev != INVALID {
            if let Some(o) = self.obj_mut(prev) {
                o.next_sibling = next;
            }
        } else if let Some(o) = self.obj_mut(p) {
            if o.first_child == c {
                o.first_child = next;
            }
        }
        if next != INVALID {
            if let Some(o) = self.obj_mut(next) {
                o.prev_sibling = prev;
            }
        }
        if let Some(o) = self.obj_mut(p) {
            if o.child_count == 0 {
                warn!("[BUG] child counter of slot {p} already zero while unlinking {c}");
            } else {
                o.child_count -= 1;
            }
        }
        if let Some(o) = self.obj_mut(c) {
            o.prev_sibling = INVALID;
            o.next_sibling = INVALID;
            o.parent = WORLD_IDX;
        }
        self.dirty.remove_dependency(c, p, dirty::CACHE);
    }

    /// Direct children of `p`, in link order.
    pub(crate) fn children_of(&self, p: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = self.obj(p).map_or(INVALID, |o| o.first_child);
        while cur != INVALID {
            out.push(cur);
            cur = self.obj(cur).map_or(INVALID, |o| o.next_sibling);
        }
        out
    }

    /// Whether `ancestor` appears on the parent path of `idx` (itself
    /// included).
    pub(crate) fn has_ancestor(&self, idx: u32, ancestor: u32) -> bool {
        let mut cur = idx;
        let mut guard = self.slots.len();
        while guard > 0 {
            if cur == ancestor {
                return true;
            }
            if cur == WORLD_IDX {
                return false;
            }
            cur = match self.obj(cur) {
                Some(o) => o.parent,
                None => return false,
            };
            guard -= 1;
        }
        false
    }

    // -- Dirty tracking --

    /// Invalidates the resolve cache of `idx` and every descendant.
    pub(crate) fn invalidate(&mut self, idx: u32) {
        self.dirty.mark_with(idx, dirty::CACHE, &EagerPolicy);
    }

    /// Marks `idx` for redraw.
    pub(crate) fn mark_content(&mut self, idx: u32) {
        self.dirty.mark(idx, dirty::CONTENT);
    }

    /// Clears the cache flag of everything invalidated since the last call.
    pub(crate) fn flush_cache_invalidations(&mut self) {
        let stale: Vec<u32> = self
            .dirty
            .drain(dirty::CACHE)
            .affected()
            .deterministic()
            .run()
            .collect();
        for idx in stale {
            if let Some(o) = self.obj_mut(idx) {
                o.valid_cache = false;
            }
        }
    }

    /// Drains the content channel and bumps the dirty counter of every
    /// rendertarget owning or listing a changed object. Returns the number
    /// of changed objects.
    pub(crate) fn flush_content(&mut self) -> usize {
        let changed: Vec<u32> = self
            .dirty
            .drain(dirty::CONTENT)
            .deterministic()
            .run()
            .collect();
        for &idx in &changed {
            self.bump_holders(idx);
        }
        changed.len()
    }

    /// Bumps the dirty counter of every rendertarget that owns or lists
    /// `idx`.
    pub(crate) fn bump_holders(&mut self, idx: u32) {
        let owner = self.obj(idx).and_then(|o| o.owner);
        if owner == Some(WORLD_IDX) || self.stdout.contains(idx) {
            self.stdout.dirty += 1;
        }
        for t in &mut self.targets {
            if owner == Some(t.color) || t.contains(idx) {
                t.dirty += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(limit: u32) -> Context {
        Context::new(limit, VObject::new(INVALID, 1.0), Rendertarget::display(32, 32))
    }

    #[test]
    fn allocation_skips_reserved_slots_and_wraps() {
        let mut c = ctx(5);
        let a = c.allocate(VObject::new(WORLD_IDX, 1.0)).ok();
        let b = c.allocate(VObject::new(WORLD_IDX, 1.0)).ok();
        let d = c.allocate(VObject::new(WORLD_IDX, 1.0)).ok();
        assert_eq!(a.map(ObjectId::index), Some(2));
        assert_eq!(b.map(ObjectId::index), Some(3));
        assert_eq!(d.map(ObjectId::index), Some(4));
        assert_eq!(
            c.allocate(VObject::new(WORLD_IDX, 1.0)),
            Err(EngineError::OutOfSpace),
            "full"
        );

        assert!(c.free(3).is_some());
        let e = c.allocate(VObject::new(WORLD_IDX, 1.0)).ok();
        assert_eq!(e.map(ObjectId::index), Some(3), "freed slot found by cyclic scan");
        assert_ne!(e.map(ObjectId::generation), b.map(ObjectId::generation));
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut c = ctx(8);
        let id = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap();
        assert_eq!(c.index_of(id), Ok(id.idx));
        c.free(id.idx);
        assert_eq!(c.index_of(id), Err(EngineError::NoSuchObject));
        assert_eq!(c.index_of(ObjectId::WORLD), Ok(WORLD_IDX));
    }

    #[test]
    fn child_lists_and_counters() {
        let mut c = ctx(8);
        let p = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap().idx;
        let a = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap().idx;
        let b = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap().idx;
        c.add_child(p, a);
        c.add_child(p, b);
        assert_eq!(c.children_of(p), vec![a, b]);
        assert_eq!(c.obj(p).map(|o| o.child_count), Some(2));
        assert!(c.has_ancestor(b, p));
        assert!(!c.has_ancestor(p, b));

        c.unlink_from_parent(a);
        assert_eq!(c.children_of(p), vec![b]);
        assert_eq!(c.obj(p).map(|o| o.child_count), Some(1));
        assert_eq!(c.obj(a).map(|o| o.parent), Some(WORLD_IDX));
    }

    #[test]
    fn invalidation_reaches_descendants() {
        let mut c = ctx(8);
        let p = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap().idx;
        let k = c.allocate(VObject::new(WORLD_IDX, 1.0)).unwrap().idx;
        c.add_child(p, k);
        for idx in [p, k] {
            if let Some(o) = c.obj_mut(idx) {
                o.valid_cache = true;
            }
        }
        c.invalidate(p);
        c.flush_cache_invalidations();
        assert_eq!(c.obj(k).map(|o| o.valid_cache), Some(false), "child invalidated");
    }
}
