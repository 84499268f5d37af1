// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: single owner of the context stack and everything hanging off
//! it.
//!
//! ```text
//!   Engine
//!   ├── ctx: Context ─────────── active slab, World, rendertargets
//!   ├── saved: Vec<Context> ──── contexts below it, bottom first
//!   ├── stores: StoreArena ───── shared by every context
//!   ├── loader: AsyncLoader ──── decode workers
//!   └── backend: B ───────────── GraphicsBackend
//! ```
//!
//! All graph mutation happens through `&mut Engine`, on one thread. The
//! operations are split by concern across the submodules of this module;
//! every one of them validates its arguments before writing anything.

mod animate;
mod async_load;
mod frameset;
mod link;
mod order;
mod render;
mod resolve;
mod stack;
mod tick;

pub use order::AttachMode;
pub use stack::Recovery;

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::{trace, warn};

use crate::backend::{GraphicsBackend, Platform};
use crate::chain::Tick;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::feed::{Feed, ObjectKind};
use crate::loader::{AsyncLoader, DecodedImage, ImageDecoder, NoDecoder};
use crate::object::{INVALID, ObjectId, VObject, WORLD_IDX};
use crate::rendertarget::Rendertarget;
use crate::store::{PixelFormat, Store, StoreArena, StoreId};
#[cfg(feature = "trace-rich")]
use crate::trace::{ObjectEvent, ObjectOp};

/// Display-wide state shared by every context.
#[derive(Clone, Copy, Debug)]
struct Display {
    width: u32,
    height: u32,
    density: f32,
    /// Logical clock; starts at 1 so a fresh object (stamped 0) is always
    /// behind it.
    ticks: Tick,
    /// Sub-tick fraction of the last refresh.
    lerp: f32,
    dirty: u32,
    cookie: u64,
    frame_index: u64,
}

/// The compositor core.
pub struct Engine<B: GraphicsBackend> {
    config: EngineConfig,
    backend: B,
    stores: StoreArena,
    ctx: Context,
    saved: Vec<Context>,
    loader: AsyncLoader,
    events: Vec<EngineEvent>,
    display: Display,
    epoch: Instant,
    #[cfg(feature = "trace-rich")]
    changes: Vec<ObjectEvent>,
}

impl<B: GraphicsBackend> fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("display", &self.display)
            .field("context", &self.ctx)
            .field("depth", &self.saved.len())
            .field("stores", &self.stores.len())
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl<B: GraphicsBackend> Engine<B> {
    /// Creates an engine drawing through `backend` onto `platform`'s
    /// output.
    ///
    /// Fails with [`EngineError::BadVideoMode`] if the platform reports an
    /// empty output.
    pub fn new(backend: B, platform: &impl Platform, config: EngineConfig) -> Result<Self> {
        let (width, height) = platform.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::BadVideoMode);
        }
        let density = platform.density();
        let ctx = fresh_context(&config, width, height, density);
        Ok(Self {
            config,
            backend,
            stores: StoreArena::new(),
            ctx,
            saved: Vec::new(),
            loader: AsyncLoader::new(config.loader_workers, Arc::new(NoDecoder)),
            events: Vec::new(),
            display: Display {
                width,
                height,
                density,
                ticks: 1,
                lerp: 0.0,
                dirty: 1,
                cookie: 0,
                frame_index: 0,
            },
            epoch: Instant::now(),
            #[cfg(feature = "trace-rich")]
            changes: Vec::new(),
        })
    }

    // -- Accessors --

    /// Engine configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The graphics backend.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the graphics backend.
    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The store arena.
    #[inline]
    #[must_use]
    pub fn stores(&self) -> &StoreArena {
        &self.stores
    }

    /// The active context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Logical clock.
    #[inline]
    #[must_use]
    pub fn ticks(&self) -> Tick {
        self.display.ticks
    }

    /// Output size.
    #[inline]
    #[must_use]
    pub fn display_size(&self) -> (u32, u32) {
        (self.display.width, self.display.height)
    }

    /// Output density in pixels per centimeter.
    #[inline]
    #[must_use]
    pub fn density(&self) -> f32 {
        self.display.density
    }

    /// The object behind `id`.
    pub fn object(&self, id: ObjectId) -> Result<&VObject> {
        let idx = self.ctx.index_of(id)?;
        self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)
    }

    /// The store backing `id`.
    ///
    /// Fails with [`EngineError::BadResource`] for objects without one
    /// (null objects, World, loads still in flight).
    pub fn store_of(&self, id: ObjectId) -> Result<&Store> {
        self.object(id)?
            .store
            .and_then(|s| self.stores.get(s))
            .ok_or(EngineError::BadResource)
    }

    /// Takes every event raised since the last call.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        core::mem::take(&mut self.events)
    }

    /// Installs the decoder used by [`load_image_async`](Self::load_image_async).
    pub fn set_decoder(&mut self, decoder: Arc<dyn ImageDecoder>) {
        self.loader.set_decoder(decoder);
    }

    // -- Creation --

    /// Creates an object without content: a pivot for grouping and
    /// clipping.
    pub fn create_null(&mut self, width: u32, height: u32, order: i32) -> Result<ObjectId> {
        self.ensure_space()?;
        let mut obj = self.blank(width, height, order);
        obj.kind = ObjectKind::None;
        self.spawn(obj)
    }

    /// Creates a flat color fill.
    pub fn create_color(
        &mut self,
        rgb: [f32; 3],
        width: u32,
        height: u32,
        order: i32,
    ) -> Result<ObjectId> {
        self.ensure_space()?;
        let store = self.stores.create_color(rgb, width, height);
        let mut obj = self.blank(width, height, order);
        obj.kind = ObjectKind::Color;
        obj.store = Some(store);
        self.spawn(obj)
    }

    /// Creates an image object from already decoded pixels.
    pub fn create_image(&mut self, image: DecodedImage, order: i32) -> Result<ObjectId> {
        if image.pixels.len()
            < image.width as usize * image.height as usize * image.format.bytes_per_pixel()
        {
            return Err(EngineError::BadResource);
        }
        self.ensure_space()?;
        let (w, h) = (image.width, image.height);
        let store =
            self.stores
                .create_texture(&mut self.backend, w, h, image.format, image.pixels);
        let mut obj = self.blank(w, h, order);
        obj.kind = ObjectKind::Image;
        obj.store = Some(store);
        self.spawn(obj)
    }

    /// Creates a blank texture-backed object, e.g. the color surface of an
    /// offscreen rendertarget.
    pub fn create_texture(&mut self, width: u32, height: u32, order: i32) -> Result<ObjectId> {
        if width == 0 || height == 0 {
            return Err(EngineError::BadArgument);
        }
        self.ensure_space()?;
        let store = self.stores.create_texture(
            &mut self.backend,
            width,
            height,
            PixelFormat::Rgba8,
            Vec::new(),
        );
        let mut obj = self.blank(width, height, order);
        obj.store = Some(store);
        self.spawn(obj)
    }

    /// Creates an object whose content is produced by `feed`.
    pub fn create_feed(
        &mut self,
        width: u32,
        height: u32,
        order: i32,
        kind: ObjectKind,
        feed: Box<dyn Feed>,
    ) -> Result<ObjectId> {
        if width == 0 || height == 0 {
            return Err(EngineError::BadArgument);
        }
        self.ensure_space()?;
        let format = PixelFormat::Rgba8;
        let pixels = vec![0; width as usize * height as usize * format.bytes_per_pixel()];
        let store = self
            .stores
            .create_texture(&mut self.backend, width, height, format, pixels);
        let mut obj = self.blank(width, height, order);
        obj.kind = kind;
        obj.store = Some(store);
        let id = self.spawn(obj)?;
        if let Some(slot) = self.ctx.slots.get_mut(id.idx as usize) {
            slot.feed = Some(feed);
        }
        Ok(id)
    }

    /// Replaces the feed of an existing object, destroying the old one.
    pub fn set_feed(&mut self, id: ObjectId, kind: ObjectKind, feed: Box<dyn Feed>) -> Result<()> {
        let idx = self.live(id)?;
        if self.ctx.obj(idx).is_some_and(|o| o.flags.clone) {
            return Err(EngineError::UnacceptedState);
        }
        let slot = &mut self.ctx.slots[idx as usize];
        if let Some(mut old) = slot.feed.replace(feed) {
            old.destroy();
        }
        if let Some(o) = slot.object.as_mut() {
            o.kind = kind;
        }
        Ok(())
    }

    // -- Content --

    /// Resizes the store of `id` and the object's logical size with it.
    ///
    /// A load still in flight is finished first. Stores shared with other
    /// objects or frames are never resized: that fails with
    /// [`EngineError::UnacceptedState`].
    pub fn resize_store(&mut self, id: ObjectId, width: u32, height: u32) -> Result<()> {
        let idx = self.live(id)?;
        if width == 0 || height == 0 {
            return Err(EngineError::BadArgument);
        }
        self.join_pending(idx, true, true);
        let store = self.owned_store(idx)?;
        self.stores.resize(&mut self.backend, store, width, height)?;
        self.resized(idx, width, height);
        Ok(())
    }

    /// Replaces the pixels of `id`'s store and uploads them.
    ///
    /// `pixels` must cover `width` x `height` in the store's format. Changing
    /// the size follows the rules of [`resize_store`](Self::resize_store).
    pub fn upload(&mut self, id: ObjectId, width: u32, height: u32, pixels: Vec<u8>) -> Result<()> {
        let idx = self.live(id)?;
        if width == 0 || height == 0 {
            return Err(EngineError::BadArgument);
        }
        self.join_pending(idx, true, true);
        let store = self.owned_store(idx)?;
        let format = self.stores.get(store).ok_or(EngineError::BadResource)?.format;
        if pixels.len() < width as usize * height as usize * format.bytes_per_pixel() {
            return Err(EngineError::BadResource);
        }
        self.stores
            .upload(&mut self.backend, store, width, height, pixels)?;
        self.resized(idx, width, height);
        Ok(())
    }

    /// The store of `idx`, refusing clones, which only borrow theirs.
    fn owned_store(&self, idx: u32) -> Result<StoreId> {
        let o = self.ctx.obj(idx).ok_or(EngineError::NoSuchObject)?;
        if o.flags.clone {
            return Err(EngineError::ClonePermission);
        }
        o.store
            .filter(|&s| self.stores.get(s).is_some())
            .ok_or(EngineError::BadResource)
    }

    fn resized(&mut self, idx: u32, width: u32, height: u32) {
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.origw = width;
            o.origh = height;
        }
        self.touch(idx);
    }

    // -- Internal helpers --

    /// Resolves a handle to a non-World slot index.
    fn live(&self, id: ObjectId) -> Result<u32> {
        match self.ctx.index_of(id)? {
            WORLD_IDX => Err(EngineError::NoSuchObject),
            idx => Ok(idx),
        }
    }

    fn ensure_space(&self) -> Result<()> {
        let (alive, limit) = self.ctx.usage();
        if alive + 2 >= limit {
            Err(EngineError::OutOfSpace)
        } else {
            Ok(())
        }
    }

    fn blank(&self, width: u32, height: u32, order: i32) -> VObject {
        let mut obj = VObject::new(WORLD_IDX, self.display.density);
        obj.origw = width.max(1);
        obj.origh = height.max(1);
        obj.order = order.clamp(-i32::from(u16::MAX), i32::from(u16::MAX));
        obj
    }

    /// Allocates `obj` and attaches it to the display rendertarget.
    fn spawn(&mut self, obj: VObject) -> Result<ObjectId> {
        let store = obj.store;
        let id = match self.ctx.allocate(obj) {
            Ok(id) => id,
            Err(e) => {
                if let Some(s) = store {
                    self.stores.release(&mut self.backend, s);
                }
                return Err(e);
            }
        };
        self.attach_object(WORLD_IDX, id.idx);
        trace!("allocated {id:?}");
        #[cfg(feature = "trace-rich")]
        self.record(id.idx, ObjectOp::Allocate);
        Ok(id)
    }

    /// Inserts `idx` into the list of the target backed by `color`. The
    /// object's owner is only set if it has none.
    fn attach_object(&mut self, color: u32, idx: u32) {
        if self.ctx.target(color).is_some_and(|t| t.contains(idx)) {
            if let Some(o) = self.ctx.obj_mut(idx) {
                o.owner.get_or_insert(color);
            }
            return;
        }
        if !self.ctx.attach_sorted(color, idx) {
            return;
        }
        if let Some(o) = self.ctx.obj_mut(idx) {
            o.owner.get_or_insert(color);
            o.attachments += 1;
        }
        #[cfg(feature = "trace-rich")]
        self.record(idx, ObjectOp::Attach);
    }

    /// Removes `idx` from the list of the target backed by `color`.
    fn detach_object(&mut self, color: u32, idx: u32) -> bool {
        let removed = self.ctx.target_mut(color).is_some_and(|t| t.remove(idx));
        if removed {
            if let Some(o) = self.ctx.obj_mut(idx) {
                if o.attachments == 0 {
                    warn!("[BUG] attachment counter of slot {idx} already zero");
                } else {
                    o.attachments -= 1;
                }
                if o.owner == Some(color) {
                    o.owner = None;
                }
            }
        }
        removed
    }

    /// Removes `idx` from every rendertarget list.
    fn detach_all(&mut self, idx: u32) {
        self.detach_object(WORLD_IDX, idx);
        let colors: Vec<u32> = self.ctx.targets.iter().map(|t| t.color).collect();
        for color in colors {
            self.detach_object(color, idx);
        }
    }

    /// Invalidates the resolve cache of `idx` and its subtree and flags it
    /// for redraw.
    fn touch(&mut self, idx: u32) {
        self.ctx.invalidate(idx);
        self.ctx.mark_content(idx);
    }

    /// Nanoseconds since the engine was created.
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    #[cfg(feature = "trace-rich")]
    fn record(&mut self, object: u32, op: ObjectOp) {
        self.changes.push(ObjectEvent { object, op });
    }

    /// Releases a store unless the id is stale, logging double frees.
    fn release_store(&mut self, store: Option<StoreId>) {
        if let Some(s) = store {
            self.stores.release(&mut self.backend, s);
        }
    }
}

/// A context with a fresh World sized to the display.
fn fresh_context(config: &EngineConfig, width: u32, height: u32, density: f32) -> Context {
    let mut world = VObject::new(INVALID, density);
    world.origw = width;
    world.origh = height;
    world.current.opacity = 1.0;
    Context::new(
        config.clamped_object_limit(),
        world,
        Rendertarget::display(width, height),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessPlatform};

    pub(crate) type TestEngine = Engine<HeadlessBackend>;

    pub(crate) fn engine() -> TestEngine {
        engine_with(EngineConfig::desktop())
    }

    pub(crate) fn engine_with(config: EngineConfig) -> TestEngine {
        let _ = env_logger::builder().is_test(true).try_init();
        Engine::new(HeadlessBackend::new(), &HeadlessPlatform::new(640, 480), config).unwrap()
    }

    /// A fully opaque color object.
    pub(crate) fn visible(e: &mut TestEngine, w: u32, h: u32, order: i32) -> ObjectId {
        let id = e.create_color([1.0, 0.0, 0.0], w, h, order).unwrap();
        e.fade_to(id, 1.0, 0).unwrap();
        id
    }

    /// A fully opaque texture-backed object.
    pub(crate) fn textured(e: &mut TestEngine, w: u32, h: u32, order: i32) -> ObjectId {
        let id = e.create_texture(w, h, order).unwrap();
        e.fade_to(id, 1.0, 0).unwrap();
        id
    }

    pub(crate) fn idx(e: &TestEngine, id: ObjectId) -> u32 {
        e.context().index_of(id).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessPlatform};
    use crate::feed::FeedStatus;

    #[test]
    fn zero_sized_output_is_a_bad_video_mode() {
        let r = Engine::new(
            HeadlessBackend::new(),
            &HeadlessPlatform::new(0, 480),
            EngineConfig::desktop(),
        );
        assert_eq!(r.err(), Some(EngineError::BadVideoMode));
    }

    #[test]
    fn new_objects_land_on_the_display_list() {
        let mut e = engine();
        let id = e.create_color([0.5; 3], 10, 10, 3).unwrap();
        let o = e.object(id).unwrap();
        assert_eq!(o.owner, Some(WORLD_IDX));
        assert_eq!(o.attachments(), 1);
        assert_eq!(o.properties().opacity, 0.0, "objects start hidden");
        assert!(e.context().stdout.contains(id.idx));
        assert_eq!(e.store_of(id).map(Store::refcount), Ok(1));
    }

    #[test]
    fn world_has_display_dimensions() {
        let e = engine();
        let w = e.object(ObjectId::WORLD).unwrap();
        assert_eq!(w.size(), (640, 480));
        assert_eq!(w.properties().opacity, 1.0);
    }

    #[test]
    fn slab_exhaustion_is_out_of_space_without_leaking_stores() {
        let mut cfg = EngineConfig::desktop();
        cfg.object_limit = 4;
        let mut e = engine_with(cfg);
        e.create_color([0.0; 3], 1, 1, 0).unwrap();
        e.create_color([0.0; 3], 1, 1, 0).unwrap();
        let before = e.stores().len();
        assert_eq!(
            e.create_color([0.0; 3], 1, 1, 0),
            Err(EngineError::OutOfSpace)
        );
        assert_eq!(e.stores().len(), before, "no store created for a failed allocation");
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        let mut e = engine();
        let img = DecodedImage {
            width: 4,
            height: 4,
            format: PixelFormat::Rgba8,
            pixels: vec![0; 8],
        };
        assert_eq!(e.create_image(img, 0), Err(EngineError::BadResource));
        assert_eq!(e.context().usage().0, 0);
    }

    #[test]
    fn replacing_a_feed_destroys_the_old_one() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Probe(Rc<Cell<u32>>);
        impl Feed for Probe {
            fn poll(&mut self) -> FeedStatus {
                FeedStatus::Idle
            }
            fn destroy(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let destroyed = Rc::new(Cell::new(0));
        let mut e = engine();
        let id = e
            .create_feed(4, 4, 0, ObjectKind::Custom, Box::new(Probe(destroyed.clone())))
            .unwrap();
        e.set_feed(id, ObjectKind::External, Box::new(Probe(destroyed.clone())))
            .unwrap();
        assert_eq!(destroyed.get(), 1);
        assert_eq!(e.object(id).map(VObject::kind), Ok(ObjectKind::External));
        assert_eq!(idx(&e, id), id.index());
    }

    #[test]
    fn resizing_follows_the_object_unless_shared() {
        let mut e = engine();
        let a = textured(&mut e, 8, 8, 0);
        e.resize_store(a, 16, 4).unwrap();
        let s = e.store_of(a).unwrap();
        assert_eq!((s.width, s.height), (16, 4));
        assert_eq!(s.pixels().len(), 16 * 4 * 4);
        assert_eq!(e.object(a).map(VObject::size), Ok((16, 4)));
        assert_eq!(e.resize_store(a, 0, 4), Err(EngineError::BadArgument));

        let b = textured(&mut e, 2, 2, 0);
        e.share_store(a, b).unwrap();
        assert_eq!(e.resize_store(a, 2, 2), Err(EngineError::UnacceptedState));
        assert_eq!(e.object(a).map(VObject::size), Ok((16, 4)), "unchanged on failure");
        assert_eq!(e.store_of(b).map(|s| (s.width, s.height)), Ok((16, 4)));

        let k = e.clone_object(a).unwrap();
        assert_eq!(e.resize_store(k, 4, 4), Err(EngineError::ClonePermission));
    }

    #[test]
    fn uploads_replace_pixels_and_refuse_shared_resizes() {
        let mut e = engine();
        let a = textured(&mut e, 4, 4, 0);
        let before = e.backend().uploads;
        e.upload(a, 4, 4, vec![7; 4 * 4 * 4]).unwrap();
        assert_eq!(e.backend().uploads, before + 1);
        assert!(e.store_of(a).unwrap().pixels().iter().all(|&p| p == 7));

        assert_eq!(e.upload(a, 8, 8, vec![0; 16]), Err(EngineError::BadResource));
        e.upload(a, 8, 8, vec![1; 8 * 8 * 4]).unwrap();
        assert_eq!(e.object(a).map(VObject::size), Ok((8, 8)));

        let b = textured(&mut e, 2, 2, 0);
        e.share_store(a, b).unwrap();
        e.upload(a, 8, 8, vec![2; 8 * 8 * 4]).unwrap();
        assert_eq!(
            e.upload(a, 2, 2, vec![0; 2 * 2 * 4]),
            Err(EngineError::UnacceptedState)
        );
        assert_eq!(e.store_of(b).map(|s| s.pixels()[0]), Ok(2));
    }
}
