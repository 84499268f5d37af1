// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Background image loads.

use log::{debug, warn};

use super::Engine;
use crate::backend::GraphicsBackend;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::feed::ObjectKind;
use crate::loader::{DecodeError, DecodedImage, LoadConstraints};
use crate::object::ObjectId;
use crate::store::PixelFormat;

impl<B: GraphicsBackend> Engine<B> {
    /// Creates an object whose image is decoded in the background.
    ///
    /// The object has no store until the load is joined, either by
    /// [`tick`](Self::tick) once the worker is done, by
    /// [`join_async`](Self::join_async) or by [`push_async`](Self::push_async).
    /// A failed decode leaves a blank placeholder and raises
    /// [`EngineEvent::AsyncFailed`].
    pub fn load_image_async(&mut self, path: &str, constraints: LoadConstraints) -> Result<ObjectId> {
        self.ensure_space()?;
        let mut obj = self.blank(1, 1, 0);
        obj.kind = ObjectKind::AsyncLoading;
        let id = self.spawn(obj)?;
        let pending = self.loader.submit(path, constraints);
        if let Some(slot) = self.ctx.slots.get_mut(id.idx as usize) {
            slot.pending = Some(pending);
        }
        debug!("queued load of {path} into {id:?}");
        Ok(id)
    }

    /// Collects the load of `id` if it has finished, or waits for it with
    /// `blocking`. Returns whether the object now holds its image.
    ///
    /// Fails with [`EngineError::UnacceptedState`] when `id` is not loading.
    pub fn join_async(&mut self, id: ObjectId, blocking: bool) -> Result<bool> {
        let idx = self.live(id)?;
        if !self.is_loading(idx) {
            return Err(EngineError::UnacceptedState);
        }
        Ok(self.join_pending(idx, blocking, true))
    }

    /// Waits for the load of `id` without raising an event.
    pub fn push_async(&mut self, id: ObjectId) -> Result<()> {
        let idx = self.live(id)?;
        if !self.is_loading(idx) {
            return Err(EngineError::UnacceptedState);
        }
        self.join_pending(idx, true, false);
        Ok(())
    }

    fn is_loading(&self, idx: u32) -> bool {
        self.ctx
            .slots
            .get(idx as usize)
            .is_some_and(|s| s.pending.is_some())
    }

    /// Finishes the load of `idx` if there is one to finish.
    pub(super) fn join_pending(&mut self, idx: u32, blocking: bool, emit: bool) -> bool {
        let Some(pending) = self
            .ctx
            .slots
            .get_mut(idx as usize)
            .and_then(|s| s.pending.take())
        else {
            return false;
        };
        let path = pending.path().to_owned();
        let reply = if blocking {
            pending.join()
        } else {
            match pending.try_join() {
                Some(reply) => reply,
                None => {
                    self.ctx.slots[idx as usize].pending = Some(pending);
                    return false;
                }
            }
        };
        self.populate(idx, path, reply, emit);
        true
    }

    fn populate(
        &mut self,
        idx: u32,
        path: String,
        reply: core::result::Result<DecodedImage, DecodeError>,
        emit: bool,
    ) {
        let image = reply.and_then(|img| {
            let need = img.width as usize * img.height as usize * img.format.bytes_per_pixel();
            if img.width == 0 || img.height == 0 || img.pixels.len() < need {
                Err(DecodeError::Unsupported(path.clone()))
            } else {
                Ok(img)
            }
        });
        let (image, failed) = match image {
            Ok(img) => (img, false),
            Err(err) => {
                warn!("load of {path} failed ({err}), using placeholder");
                let side = self.config.placeholder_size.max(1);
                let format = PixelFormat::Rgba8;
                let pixels = vec![0; side as usize * side as usize * format.bytes_per_pixel()];
                let img = DecodedImage {
                    width: side,
                    height: side,
                    format,
                    pixels,
                };
                (img, true)
            }
        };
        let (width, height) = (image.width, image.height);
        let store = self
            .stores
            .create_texture(&mut self.backend, width, height, image.format, image.pixels);
        if let Some(s) = self.stores.get_mut(store) {
            s.source = Some(path);
        }
        let Some(o) = self.ctx.obj_mut(idx) else {
            self.stores.release(&mut self.backend, store);
            return;
        };
        o.origw = width;
        o.origh = height;
        o.kind = ObjectKind::Image;
        o.store = Some(store);
        self.touch(idx);

        if emit {
            let id = self.ctx.id_of(idx);
            self.events.push(if failed {
                EngineEvent::AsyncFailed { id, width, height }
            } else {
                EngineEvent::AsyncLoaded { id, width, height }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, mpsc};

    use super::super::testing::*;
    use super::*;

    fn decode(path: &str, _c: LoadConstraints) -> core::result::Result<DecodedImage, DecodeError> {
        if path.ends_with(".png") {
            Ok(DecodedImage {
                width: 2,
                height: 3,
                format: PixelFormat::Rgba8,
                pixels: vec![255; 24],
            })
        } else {
            Err(DecodeError::Unreadable(path.to_owned()))
        }
    }

    #[test]
    fn successful_load_fills_the_object() {
        let mut e = engine();
        e.set_decoder(Arc::new(decode));
        let id = e.load_image_async("a.png", LoadConstraints::default()).unwrap();
        assert_eq!(e.object(id).map(|o| o.kind()), Ok(ObjectKind::AsyncLoading));
        assert_eq!(e.store_of(id).err(), Some(EngineError::BadResource));

        assert_eq!(e.join_async(id, true), Ok(true));
        let o = e.object(id).unwrap();
        assert_eq!((o.size(), o.kind()), ((2, 3), ObjectKind::Image));
        assert_eq!(e.store_of(id).unwrap().source.as_deref(), Some("a.png"));
        assert_eq!(
            e.drain_events(),
            vec![EngineEvent::AsyncLoaded {
                id,
                width: 2,
                height: 3
            }]
        );
        assert_eq!(e.join_async(id, true), Err(EngineError::UnacceptedState));
    }

    #[test]
    fn failed_load_leaves_a_placeholder() {
        let mut e = engine();
        e.set_decoder(Arc::new(decode));
        let id = e.load_image_async("broken.txt", LoadConstraints::default()).unwrap();
        assert_eq!(e.join_async(id, true), Ok(true));

        let store = e.store_of(id).unwrap();
        assert_eq!((store.width, store.height), (32, 32));
        assert_eq!(store.pixels().len(), 32 * 32 * 4);
        assert!(store.pixels().iter().all(|&b| b == 0));
        assert_eq!(
            e.drain_events(),
            vec![EngineEvent::AsyncFailed {
                id,
                width: 32,
                height: 32
            }]
        );
    }

    #[test]
    fn non_blocking_join_waits_for_the_worker() {
        let (go, wait) = mpsc::channel::<()>();
        let wait = Arc::new(Mutex::new(wait));
        let gated = move |path: &str, c: LoadConstraints| {
            if let Ok(rx) = wait.lock() {
                _ = rx.recv();
            }
            decode(path, c)
        };

        let mut e = engine();
        e.set_decoder(Arc::new(gated));
        let id = e.load_image_async("a.png", LoadConstraints::default()).unwrap();
        assert_eq!(e.join_async(id, false), Ok(false));
        assert_eq!(e.object(id).map(|o| o.kind()), Ok(ObjectKind::AsyncLoading));

        go.send(()).unwrap();
        e.push_async(id).unwrap();
        assert_eq!(e.object(id).map(|o| o.size()), Ok((2, 3)));
        assert!(e.drain_events().is_empty(), "forced joins are silent");
        assert_eq!(e.push_async(id), Err(EngineError::UnacceptedState));
    }

    #[test]
    fn deleting_a_loading_object_joins_first() {
        let mut e = engine();
        e.set_decoder(Arc::new(decode));
        let id = e.load_image_async("a.png", LoadConstraints::default()).unwrap();
        e.delete(id).unwrap();
        assert!(e.stores().is_empty(), "nothing left behind");
        assert!(e.drain_events().is_empty());
    }
}
