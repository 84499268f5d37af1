// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Logical time: ticks, feed polling and density changes.
//!
//! A tick walks World, every offscreen rendertarget and finally the display
//! list. Each listed object is visited once per tick, even when it sits in
//! several lists:
//!
//! ```text
//!   join finished load ─► advance chain (parents first) ─► feed tick
//!                      ─► frameset counter ─► lifetime
//! ```

use std::collections::HashSet;

use log::{debug, trace};

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::chain::Tick;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::feed::{FeedStatus, ObjectKind};
use crate::object::{INVALID, Mask, WORLD_IDX};
use crate::trace::{PhaseBeginEvent, PhaseEndEvent, PhaseKind, TickEvent, Tracer};

impl<B: GraphicsBackend> Engine<B> {
    // -- Ticks --

    /// Runs `steps` logical ticks.
    ///
    /// Returns how many attribute animations were stepped in total; a
    /// non-zero result means the next refresh has work to do.
    pub fn tick(&mut self, steps: u32, tracer: &mut Tracer<'_>) -> usize {
        if steps == 0 {
            return 0;
        }
        let frame_index = self.display.frame_index;
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index,
            phase: PhaseKind::Tick,
            timestamp: self.now_ns(),
        });

        let mut active = 0_u32;
        for _ in 0..steps {
            let stamp = self.display.ticks;
            let mut upd = self.update_object(WORLD_IDX, stamp);

            let mut colors: Vec<u32> = self.ctx.targets.iter().map(|t| t.color).collect();
            colors.push(WORLD_IDX);
            let mut seen = HashSet::new();
            for color in colors {
                upd += self.tick_target(color, stamp, &mut seen);
            }

            self.display.dirty = self.display.dirty.saturating_add(upd);
            active = active.saturating_add(upd);
            self.display.ticks += 1;
        }
        trace!("ticked {steps} to {}, {active} animations", self.display.ticks);

        tracer.tick(&TickEvent {
            tick: self.display.ticks,
            steps,
            active,
        });
        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase: PhaseKind::Tick,
            timestamp: self.now_ns(),
        });
        active as usize
    }

    /// Ticks every entry of the target backed by `color` that was not
    /// already visited this tick. Returns the target's animation count.
    fn tick_target(&mut self, color: u32, stamp: Tick, seen: &mut HashSet<u32>) -> u32 {
        let Some(list) = self.ctx.target(color).map(|t| t.attached.clone()) else {
            return 0;
        };
        let mut transfc = 0;
        for idx in list {
            if self.ctx.obj(idx).is_none() {
                continue;
            }
            if self.ctx.obj(idx).is_some_and(|o| o.last_updated != stamp) {
                transfc += self.update_object(idx, stamp);
            }
            if !seen.insert(idx) {
                continue;
            }
            self.join_pending(idx, false, true);

            let slot = &mut self.ctx.slots[idx as usize];
            let clone = slot.object.as_ref().is_some_and(|o| o.flags.clone);
            if let Some(feed) = slot.feed.as_mut().filter(|_| !clone) {
                feed.tick();
            }
            let by_ticks = slot
                .object
                .as_ref()
                .and_then(|o| o.frameset.as_ref())
                .is_some_and(|fs| fs.mctr > 0);
            if by_ticks {
                self.count_frames_down(idx);
            }
            self.expire(idx);
        }
        if let Some(t) = self.ctx.target_mut(color) {
            t.transfc = transfc;
        }
        transfc
    }

    /// Advances the chain of `idx` to `stamp`, updating its parent first.
    /// Returns the number of attributes that were animating.
    fn update_object(&mut self, idx: u32, stamp: Tick) -> u32 {
        let Some(o) = self.ctx.obj(idx) else {
            return 0;
        };
        let parent = o.parent;
        let mut upd = 0;
        if o.last_updated < stamp
            && parent != WORLD_IDX
            && parent != INVALID
            && self.ctx.obj(parent).is_some_and(|p| p.last_updated != stamp)
        {
            upd += self.update_object(parent, stamp);
        }

        let Some(o) = self.ctx.obj_mut(idx) else {
            return upd;
        };
        o.last_updated = stamp;
        if !o.chain.is_active() {
            return upd;
        }
        let cyclic = o.flags.cyclic;
        let adv = o.chain.advance(stamp, &mut o.current, cyclic);
        if adv.active == 0 {
            return upd;
        }
        self.touch(idx);

        let id = self.ctx.id_of(idx);
        for done in adv.completed {
            if let Some(tag) = done.tag {
                self.events.push(EngineEvent::ChainOver {
                    id,
                    attribute: done.attribute,
                    tag,
                });
            }
        }
        upd + adv.active
    }

    /// Counts down the lifetime of a living object.
    fn expire(&mut self, idx: u32) {
        let Some(o) = self.ctx.obj_mut(idx) else {
            return;
        };
        if o.lifetime == 0 || !o.mask.contains(Mask::LIVING) {
            return;
        }
        o.lifetime -= 1;
        if o.lifetime > 0 {
            return;
        }
        if let Some(tag) = &o.tracetag {
            debug!("traced object {tag} expired");
        }
        let id = self.ctx.id_of(idx);
        self.events.push(EngineEvent::Expired { id });
    }

    // -- Polling --

    /// Delivers finished readbacks, then polls every listed feed once.
    ///
    /// A feed with a new frame steps a frameset cycling on feed frames,
    /// renders into its object's store and gets uploaded. Returns the number
    /// of new frames.
    pub fn poll_feeds(&mut self, tracer: &mut Tracer<'_>) -> usize {
        let frame_index = self.display.frame_index;
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index,
            phase: PhaseKind::Readback,
            timestamp: self.now_ns(),
        });
        self.poll_readbacks();
        let t = self.now_ns();
        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase: PhaseKind::Readback,
            timestamp: t,
        });
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index,
            phase: PhaseKind::Poll,
            timestamp: t,
        });

        self.display.cookie += 1;
        let cookie = self.display.cookie;
        let mut lists: Vec<Vec<u32>> = self.ctx.targets.iter().map(|t| t.attached.clone()).collect();
        lists.push(self.ctx.stdout.attached.clone());
        let frames = lists
            .into_iter()
            .flatten()
            .filter(|&idx| self.poll_feed(idx, cookie))
            .count();

        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase: PhaseKind::Poll,
            timestamp: self.now_ns(),
        });
        frames
    }

    fn poll_feed(&mut self, idx: u32, cookie: u64) -> bool {
        let Some(slot) = self
            .ctx
            .slots
            .get_mut(idx as usize)
            .filter(|s| s.feed.is_some())
        else {
            return false;
        };
        let Some(o) = slot.object.as_mut() else {
            return false;
        };
        if o.flags.clone || o.feed_cookie == cookie {
            return false;
        }
        o.feed_cookie = cookie;
        let store = o.store;
        let by_frames = o.frameset.as_ref().is_some_and(|fs| fs.mctr < 0);
        if slot.feed.as_mut().is_none_or(|f| f.poll() != FeedStatus::NewFrame) {
            return false;
        }

        self.ctx.mark_content(idx);
        if by_frames {
            self.count_frames_down(idx);
        }
        let feed = self.ctx.slots[idx as usize].feed.as_mut();
        let written = match (feed, store.and_then(|s| self.stores.get_mut(s))) {
            (Some(feed), Some(store)) => feed.render(store),
            _ => false,
        };
        if let Some(s) = store.filter(|_| written) {
            self.stores.sync(&mut self.backend, s);
        }
        true
    }

    // -- Density --

    /// Changes the output density to `ppcm` pixels per centimeter.
    ///
    /// Text objects rasterized at another density get an
    /// [`EngineEvent::DensityChanged`] so the layer above can re-render
    /// them. Non-positive or non-finite densities are rejected with
    /// [`EngineError::BadArgument`].
    pub fn update_density(&mut self, ppcm: f32) -> Result<()> {
        if !ppcm.is_finite() || ppcm <= 0.0 {
            return Err(EngineError::BadArgument);
        }
        if (self.display.density - ppcm).abs() < f32::EPSILON {
            return Ok(());
        }
        debug!("density {} -> {ppcm}", self.display.density);
        self.display.density = ppcm;
        if let Some(w) = self.ctx.obj_mut(WORLD_IDX) {
            w.density = ppcm;
        }
        for idx in self.ctx.live_indices() {
            let stale = self.ctx.obj(idx).is_some_and(|o| {
                o.kind == ObjectKind::Text && (o.density - ppcm).abs() >= f32::EPSILON
            });
            if stale {
                let id = self.ctx.id_of(idx);
                self.events.push(EngineEvent::DensityChanged { id });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::super::testing::*;
    use super::*;
    use crate::chain::Attribute;
    use crate::feed::Feed;
    use crate::loader::{DecodeError, DecodedImage, LoadConstraints};
    use crate::math::Vec3;
    use crate::object::{Anchor, FrameMode, ObjectId, ScalePolicy};
    use crate::rendertarget::RenderTargetOptions;
    use crate::store::{PixelFormat, Store};

    #[derive(Default)]
    struct Counters {
        ticks: Cell<u32>,
        polls: Cell<u32>,
        renders: Cell<u32>,
    }

    /// Reports a new frame on every poll and paints the store white.
    struct Producer(Rc<Counters>);

    impl Feed for Producer {
        fn poll(&mut self) -> FeedStatus {
            self.0.polls.set(self.0.polls.get() + 1);
            FeedStatus::NewFrame
        }

        fn render(&mut self, store: &mut Store) -> bool {
            self.0.renders.set(self.0.renders.get() + 1);
            match store.pixels_mut() {
                Some(px) => {
                    px.fill(255);
                    true
                }
                None => false,
            }
        }

        fn tick(&mut self) {
            self.0.ticks.set(self.0.ticks.get() + 1);
        }
    }

    fn producer(e: &mut TestEngine) -> (ObjectId, Rc<Counters>) {
        let counters = Rc::new(Counters::default());
        let id = e
            .create_feed(4, 4, 0, ObjectKind::External, Box::new(Producer(counters.clone())))
            .unwrap();
        (id, counters)
    }

    fn tick(e: &mut TestEngine, steps: u32) -> usize {
        e.tick(steps, &mut Tracer::none())
    }

    #[test]
    fn zero_steps_leave_the_clock_alone() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.move_to(a, Vec3::new(10.0, 0.0, 0.0), 5).unwrap();
        assert_eq!(tick(&mut e, 0), 0);
        assert_eq!(e.ticks(), 1);
    }

    #[test]
    fn tick_counts_animated_attributes() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.move_to(a, Vec3::new(10.0, 0.0, 0.0), 4).unwrap();
        e.fade_to(a, 1.0, 2).unwrap();
        assert_eq!(tick(&mut e, 2), 4, "two attributes over two ticks");
        assert_eq!(e.context().stdout.transform_count(), 2);
        // The fade lands on tick 3, the move on tick 5.
        assert_eq!(tick(&mut e, 5), 4);
        assert_eq!(e.context().stdout.transform_count(), 0);
        assert_eq!(e.ticks(), 8);
    }

    #[test]
    fn parents_advance_before_children() {
        let mut e = engine();
        let p = e.create_null(4, 4, 0).unwrap();
        let c = e.create_null(4, 4, 0).unwrap();
        e.link(c, p, Mask::DEFAULT, Anchor::UpperLeft, ScalePolicy::Independent)
            .unwrap();
        // The parent only sits in a list nobody ticks.
        let i = idx(&e, p);
        e.detach_object(WORLD_IDX, i);
        e.move_to(p, Vec3::new(8.0, 0.0, 0.0), 2).unwrap();

        tick(&mut e, 3);
        let po = e.object(p).unwrap();
        assert_eq!(po.properties().position.x, 8.0);
        assert_eq!(po.last_updated, 3);
        assert_eq!(e.resolve(c, 0.0).unwrap().position.x, 8.0);
    }

    #[test]
    fn lifetime_expires_once() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        let b = e.create_null(4, 4, 0).unwrap();
        e.set_lifetime(a, 3).unwrap();
        e.set_lifetime(b, 2).unwrap();
        e.set_mask(b, Mask::POSITION).unwrap();

        tick(&mut e, 2);
        assert!(e.drain_events().is_empty());
        tick(&mut e, 5);
        assert_eq!(e.drain_events(), vec![EngineEvent::Expired { id: a }]);
        assert!(e.object(a).is_ok(), "expired objects stay alive");
        assert_eq!(e.object(b).map(|o| o.lifetime()), Ok(2), "not living");
    }

    #[test]
    fn feeds_tick_once_per_tick() {
        let mut e = engine();
        let (a, counters) = producer(&mut e);
        let rt = textured(&mut e, 16, 16, 0);
        e.setup_rendertarget(rt, RenderTargetOptions::default()).unwrap();
        e.attach_to(rt, a, crate::engine::AttachMode::Retain).unwrap();

        tick(&mut e, 3);
        assert_eq!(counters.ticks.get(), 3, "listed twice, ticked once");

        let k = e.clone_object(a).unwrap();
        tick(&mut e, 1);
        assert_eq!(counters.ticks.get(), 4, "clones carry no feed");
        assert!(e.object(k).is_ok());
    }

    #[test]
    fn ticks_join_finished_loads() {
        fn decode(_: &str, _: LoadConstraints) -> core::result::Result<DecodedImage, DecodeError> {
            Ok(DecodedImage {
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
                pixels: vec![9; 4],
            })
        }
        let mut e = engine();
        e.set_decoder(Arc::new(decode));
        let id = e.load_image_async("x.png", LoadConstraints::default()).unwrap();
        for _ in 0..1000 {
            tick(&mut e, 1);
            if e.object(id).unwrap().kind() == ObjectKind::Image {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(e.object(id).map(|o| o.kind()), Ok(ObjectKind::Image));
        assert!(matches!(e.drain_events().as_slice(), [EngineEvent::AsyncLoaded { .. }]));
    }

    #[test]
    fn polling_renders_and_uploads_once_per_cycle() {
        let mut e = engine();
        let (a, counters) = producer(&mut e);
        let rt = textured(&mut e, 16, 16, 0);
        e.setup_rendertarget(rt, RenderTargetOptions::default()).unwrap();
        e.attach_to(rt, a, crate::engine::AttachMode::Retain).unwrap();
        e.backend_mut().reset_log();

        assert_eq!(e.poll_feeds(&mut Tracer::none()), 1);
        assert_eq!(counters.polls.get(), 1, "cookie stops the second list");
        assert_eq!(counters.renders.get(), 1);
        assert_eq!(e.backend().uploads, 1);
        assert!(e.store_of(a).unwrap().pixels().iter().all(|&b| b == 255));

        e.poll_feeds(&mut Tracer::none());
        assert_eq!(counters.polls.get(), 2, "next cycle polls again");
    }

    #[test]
    fn new_frames_drive_feed_cycling_framesets() {
        let mut e = engine();
        let (a, _) = producer(&mut e);
        e.alloc_frames(a, 2, FrameMode::Split).unwrap();
        e.frame_cycle(a, -2).unwrap();

        let index = |e: &TestEngine| e.object(a).unwrap().frameset().map(|fs| fs.index());
        tick(&mut e, 4);
        assert_eq!(index(&e), Some(0), "ticks do not step feed cycles");
        e.poll_feeds(&mut Tracer::none());
        assert_eq!(index(&e), Some(0));
        e.poll_feeds(&mut Tracer::none());
        assert_eq!(index(&e), Some(1));
    }

    #[test]
    fn chain_over_reports_through_tick() {
        let mut e = engine();
        let a = e.create_null(4, 4, 0).unwrap();
        e.fade_to(a, 1.0, 1).unwrap();
        e.tag_transform(a, Attribute::Opacity, 5).unwrap();
        tick(&mut e, 1);
        assert!(e.drain_events().is_empty(), "lands on the next tick");
        tick(&mut e, 1);
        assert_eq!(
            e.drain_events(),
            vec![EngineEvent::ChainOver {
                id: a,
                attribute: Attribute::Opacity,
                tag: 5
            }]
        );
    }

    #[test]
    fn density_changes_flag_text() {
        let mut e = engine();
        let t = e
            .create_feed(4, 4, 0, ObjectKind::Text, Box::new(Producer(Rc::default())))
            .unwrap();
        let _image = visible(&mut e, 4, 4, 0);
        let before = e.density();

        e.update_density(before).unwrap();
        assert!(e.drain_events().is_empty(), "unchanged density");
        e.update_density(before * 2.0).unwrap();
        assert_eq!(e.drain_events(), vec![EngineEvent::DensityChanged { id: t }]);
        assert_eq!(e.density(), before * 2.0);
        assert_eq!(e.update_density(0.0), Err(EngineError::BadArgument));
        assert_eq!(e.update_density(f32::NAN), Err(EngineError::BadArgument));
    }
}
