// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The context stack.
//!
//! Pushing parks the active context below a fresh one: loads are finished,
//! GPU copies of everything that is not persistent are dropped, and feeds
//! are suspended. Persistent objects move up into the same slot of the new
//! context, so their handles keep working. Popping reverses this, re-basing
//! queued animations by the ticks that passed in between.

use log::{debug, trace, warn};

use super::{Engine, fresh_context};
use crate::backend::{BlendMode, GraphicsBackend};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::feed::{Feed, ObjectKind};
use crate::object::{INVALID, ObjectId, VObject, WORLD_IDX};
use crate::store::StoreId;
use crate::trace::{ContextEvent, ContextOp, Tracer};

/// What [`Engine::recover_external`] managed to keep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Recovery {
    /// External producers re-homed in the surviving context.
    pub saved: usize,
    /// External producers dropped for lack of space or refused adoption.
    pub truncated: usize,
}

/// An external producer lifted out of a context during recovery.
struct Salvage {
    store: Option<StoreId>,
    feed: Option<Box<dyn Feed>>,
    width: u32,
    height: u32,
    tracetag: Option<String>,
    order: i32,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Parks the active context and makes a fresh one current. Returns the
    /// number of pushes left.
    ///
    /// Fails with [`EngineError::OutOfSpace`] when the stack is full.
    pub fn push_context(&mut self, tracer: &mut Tracer<'_>) -> Result<usize> {
        if self.saved.len() + 1 >= self.config.context_stack_limit {
            return Err(EngineError::OutOfSpace);
        }
        self.ctx.last_tickstamp = self.display.ticks;
        for idx in self.ctx.live_indices() {
            self.join_pending(idx, true, false);
        }
        self.suspend_context();

        let fresh = fresh_context(
            &self.config,
            self.display.width,
            self.display.height,
            self.display.density,
        );
        let lower = core::mem::replace(&mut self.ctx, fresh);
        self.saved.push(lower);
        self.carry_persistent_up();
        self.display.dirty += 1;

        debug!("pushed context, depth {}", self.saved.len());
        self.trace_context(ContextOp::Push, tracer);
        Ok(self.free_contexts())
    }

    /// Discards the active context and re-activates the one below it.
    /// Popping the bottom context empties it instead. Returns the number of
    /// pushes left.
    pub fn pop_context(&mut self, tracer: &mut Tracer<'_>) -> usize {
        match self.saved.pop() {
            None => {
                self.clear_context();
                self.ctx = fresh_context(
                    &self.config,
                    self.display.width,
                    self.display.height,
                    self.display.density,
                );
            }
            Some(lower) => {
                let carried = self.take_persistent_down(&lower);
                self.clear_context();
                self.ctx = lower;
                for (idx, obj, feed) in carried {
                    self.restore_persistent(idx, obj, feed);
                }
                self.resume_context();
            }
        }
        self.display.dirty += 1;

        debug!("popped context, depth {}", self.saved.len());
        self.trace_context(ContextOp::Pop, tracer);
        self.free_contexts()
    }

    /// Salvages every external producer in the stack, collapses the stack
    /// to a single empty context and re-creates the producers there.
    ///
    /// Each survivor gets a fresh object ordered by the stack level it came
    /// from (bottom level is 1). Its feed and `adopt` must both accept the
    /// new id; refused objects are deleted again and counted as truncated,
    /// as are producers that do not fit in one context.
    pub fn recover_external(
        &mut self,
        mut adopt: impl FnMut(ObjectId) -> bool,
        tracer: &mut Tracer<'_>,
    ) -> Recovery {
        let capacity = self.config.clamped_object_limit().saturating_sub(2) as usize;
        let mut salvaged: Vec<Salvage> = Vec::new();
        let mut out = Recovery::default();

        let stack = self.saved.iter_mut().chain(core::iter::once(&mut self.ctx));
        for (level, ctx) in stack.enumerate() {
            for idx in ctx.live_indices() {
                let Some(o) = ctx.obj(idx).filter(|o| o.kind == ObjectKind::External) else {
                    continue;
                };
                if salvaged.len() >= capacity {
                    out.truncated += 1;
                    continue;
                }
                let s = Salvage {
                    store: o.store,
                    feed: None,
                    width: o.origw,
                    height: o.origh,
                    tracetag: o.tracetag.clone(),
                    order: i32::try_from(level + 1).unwrap_or(i32::MAX),
                };
                if let Some(store) = s.store {
                    self.stores.retain(store);
                }
                let feed = ctx.slots.get_mut(idx as usize).and_then(|slot| slot.feed.take());
                if let Some(o) = ctx.obj_mut(idx) {
                    o.kind = ObjectKind::None;
                }
                salvaged.push(Salvage { feed, ..s });
            }
        }
        debug!(
            "recovering {} external producer(s), {} over capacity",
            salvaged.len(),
            out.truncated
        );

        while !self.saved.is_empty() {
            self.pop_context(tracer);
        }
        self.pop_context(tracer);

        for s in salvaged {
            let mut obj = self.blank(s.width, s.height, s.order);
            obj.kind = ObjectKind::External;
            obj.store = s.store;
            obj.blend = BlendMode::Normal;
            obj.tracetag = s.tracetag;
            let id = match self.spawn(obj) {
                Ok(id) => id,
                Err(err) => {
                    warn!("could not re-create external producer: {err}");
                    if let Some(mut feed) = s.feed {
                        feed.destroy();
                    }
                    out.truncated += 1;
                    continue;
                }
            };
            if let Some(store) = s.store {
                self.stores.realloc_gpu(&mut self.backend, store);
            }
            let mut feed = s.feed;
            let accepted = feed.as_mut().is_none_or(|f| f.adopt(id)) && adopt(id);
            if let Some(slot) = self.ctx.slots.get_mut(id.idx as usize) {
                slot.feed = feed;
            }
            if accepted {
                out.saved += 1;
            } else {
                trace!("adoption of {id:?} refused");
                self.delete_index(id.idx);
                out.truncated += 1;
            }
        }

        self.trace_context(ContextOp::Recover, tracer);
        out
    }

    /// Live objects in the active context and how many it can hold.
    #[must_use]
    pub fn context_usage(&self) -> (u32, u32) {
        let (alive, limit) = self.ctx.usage();
        (alive, limit.saturating_sub(2))
    }

    /// Pushes left before the stack is full.
    #[must_use]
    pub fn free_contexts(&self) -> usize {
        self.config
            .context_stack_limit
            .saturating_sub(1 + self.saved.len())
    }

    /// Number of contexts below the active one.
    #[must_use]
    pub fn context_depth(&self) -> usize {
        self.saved.len()
    }

    // -- Helpers --

    /// Drops GPU resources of everything that does not follow the stack
    /// upwards.
    fn suspend_context(&mut self) {
        for t in &mut self.ctx.targets {
            if let Some(h) = t.handle.take() {
                self.backend.drop_rendertarget(h);
            }
        }
        for idx in self.ctx.live_indices() {
            let Some(o) = self.ctx.obj(idx).filter(|o| !o.flags.persist) else {
                continue;
            };
            let frames = o.frameset.as_ref().map(|fs| fs.frames.clone());
            for store in o.store.into_iter().chain(frames.into_iter().flatten()) {
                self.stores.null_gpu(&mut self.backend, store);
            }
            if let Some(feed) = self.ctx.slots.get_mut(idx as usize).and_then(|s| s.feed.as_mut()) {
                feed.suspend();
            }
        }
    }

    /// Re-creates GPU resources of the re-activated context and shifts its
    /// animations by the time it spent parked.
    fn resume_context(&mut self) {
        let elapsed = self.display.ticks.saturating_sub(self.ctx.last_tickstamp);
        for idx in self.ctx.live_indices() {
            let Some(o) = self.ctx.obj_mut(idx) else {
                continue;
            };
            if o.flags.persist || o.flags.clone {
                continue;
            }
            if elapsed > 0 {
                o.chain.rebase(elapsed);
            }
            let frames = o.frameset.as_ref().map(|fs| fs.frames.clone());
            for store in o.store.into_iter().chain(frames.into_iter().flatten()) {
                self.stores.realloc_gpu(&mut self.backend, store);
            }
            if let Some(feed) = self.ctx.slots.get_mut(idx as usize).and_then(|s| s.feed.as_mut()) {
                feed.resume();
            }
            self.ctx.invalidate(idx);
        }

        let stores = &self.stores;
        let backend = &mut self.backend;
        let slots = &self.ctx.slots;
        for t in &mut self.ctx.targets {
            let gpu = slots
                .get(t.color as usize)
                .and_then(|s| s.object.as_ref())
                .and_then(|o| o.store)
                .and_then(|s| stores.get(s))
                .and_then(|s| s.gpu());
            match gpu {
                Some(gpu) => t.handle = Some(backend.setup_rendertarget(gpu, t.mode)),
                None => warn!("rendertarget of slot {} lost its store", t.color),
            }
            t.dirty += 1;
        }
        self.ctx.stdout.dirty += 1;
    }

    /// Deletes every object of the active context.
    fn clear_context(&mut self) {
        for idx in self.ctx.live_indices() {
            self.delete_index(idx);
        }
    }

    /// Copies the persistent objects of the context just parked into the
    /// same slots of the active one. The parked copies leave their display
    /// list until they come back down.
    fn carry_persistent_up(&mut self) {
        let Some(lower) = self.saved.last_mut() else {
            return;
        };
        let mut carried = Vec::new();
        for idx in lower.live_indices() {
            let Some(o) = lower.obj(idx).filter(|o| o.flags.persist) else {
                continue;
            };
            let mut obj = o.clone();
            let generation = lower.slots[idx as usize].generation;
            let feed = lower.slots[idx as usize].feed.take();
            if lower.stdout.remove(idx) {
                if let Some(o) = lower.obj_mut(idx) {
                    o.attachments = o.attachments.saturating_sub(1);
                    o.owner = None;
                }
            }
            reset_topology(&mut obj);
            carried.push((idx, generation, obj, feed));
        }
        for (idx, generation, obj, feed) in carried {
            match self.ctx.place(idx, generation, obj) {
                Ok(_) => {
                    if let Some(slot) = self.ctx.slots.get_mut(idx as usize) {
                        slot.feed = feed;
                    }
                    self.attach_object(WORLD_IDX, idx);
                    trace!("carried persistent slot {idx} up");
                }
                Err(err) => warn!("[BUG] could not carry persistent slot {idx} up: {err}"),
            }
        }
    }

    /// Lifts the persistent objects that the context below still holds out
    /// of the active context.
    fn take_persistent_down(
        &mut self,
        lower: &Context,
    ) -> Vec<(u32, VObject, Option<Box<dyn Feed>>)> {
        let mut carried = Vec::new();
        for idx in self.ctx.live_indices() {
            let both = self.ctx.obj(idx).is_some_and(|o| o.flags.persist)
                && lower.obj(idx).is_some_and(|o| o.flags.persist);
            if !both {
                continue;
            }
            _ = self.ctx.stdout.remove(idx);
            if let Some(freed) = self.ctx.evict(idx) {
                carried.push((idx, freed.object, freed.feed));
            }
        }
        carried
    }

    /// Puts a persistent object back into its parked slot.
    fn restore_persistent(&mut self, idx: u32, mut obj: VObject, feed: Option<Box<dyn Feed>>) {
        reset_topology(&mut obj);
        let Some(slot) = self.ctx.slots.get_mut(idx as usize) else {
            return;
        };
        slot.object = Some(obj);
        slot.feed = feed;
        self.attach_object(WORLD_IDX, idx);
        self.touch(idx);
        trace!("carried persistent slot {idx} down");
    }

    fn trace_context(&self, op: ContextOp, tracer: &mut Tracer<'_>) {
        let (objects, _) = self.ctx.usage();
        tracer.context(&ContextEvent {
            op,
            depth: u32::try_from(self.saved.len()).unwrap_or(u32::MAX),
            objects,
        });
    }
}

/// Detaches a migrating object from everything it was linked to.
fn reset_topology(o: &mut VObject) {
    o.parent = WORLD_IDX;
    o.first_child = INVALID;
    o.next_sibling = INVALID;
    o.prev_sibling = INVALID;
    o.child_count = 0;
    o.instances = 0;
    o.owner = None;
    o.attachments = 0;
    o.valid_cache = false;
}
