// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference-counted backing stores.
//!
//! A [`Store`] describes the pixels behind one or more objects: either a flat
//! color fill or a texture with a CPU-side buffer and an optional GPU handle.
//! Stores live in a [`StoreArena`] and are addressed by generational
//! [`StoreId`]s. Objects that share a store share one reference each; the
//! last [`release`](StoreArena::release) frees the GPU resource.
//!
//! Shared stores can be redirected (an object pointed at another store) but
//! never resized in place; [`StoreArena::resize`] refuses unless the caller
//! holds the only reference.

use core::fmt;

use log::warn;

use crate::backend::{GpuHandle, GraphicsBackend};
use crate::error::{EngineError, Result};

/// Pixel layout of a texture store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba8,
    /// 8-bit BGRA.
    Bgra8,
    /// Single 8-bit channel.
    R8,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[inline]
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::R8 => 1,
        }
    }
}

/// Sampling filter used when drawn size differs from stored size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest neighbour.
    None,
    /// Linear.
    Linear,
    /// Bilinear.
    #[default]
    Bilinear,
    /// Trilinear.
    Trilinear,
}

/// How texture coordinates outside `0..1` are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    /// Tile the texture.
    Repeat,
    /// Clamp to the edge.
    #[default]
    Clamp,
}

/// What a store holds.
#[derive(Clone, Debug, PartialEq)]
pub enum Backing {
    /// A flat RGB color; no texture is mapped.
    Color([f32; 3]),
    /// Texture data. `raw` is kept so the GPU copy can be dropped and rebuilt
    /// across context switches.
    Texture {
        /// CPU-side pixels, `width * height * bpp` bytes (may be empty).
        raw: Vec<u8>,
        /// GPU-side resource, if currently allocated.
        gpu: Option<GpuHandle>,
    },
}

/// A reference-counted backing descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct Store {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Pixel data or fill color.
    pub backing: Backing,
    /// Sampling filter.
    pub filter: Filter,
    /// Wrap mode for s and t.
    pub wrap: (WrapMode, WrapMode),
    /// Where the pixels came from, if loaded from a path.
    pub source: Option<String>,
    pub(crate) refcount: u32,
}

impl Store {
    /// Whether this store is texture-mapped.
    #[inline]
    #[must_use]
    pub fn is_texture(&self) -> bool {
        matches!(self.backing, Backing::Texture { .. })
    }

    /// The GPU handle, if texture-mapped and allocated.
    #[inline]
    #[must_use]
    pub fn gpu(&self) -> Option<GpuHandle> {
        match self.backing {
            Backing::Texture { gpu, .. } => gpu,
            Backing::Color(_) => None,
        }
    }

    /// CPU-side pixels (empty for color stores).
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        match &self.backing {
            Backing::Texture { raw, .. } => raw,
            Backing::Color(_) => &[],
        }
    }

    /// Mutable CPU-side pixels, sized to the store's dimensions.
    ///
    /// Returns `None` for color stores.
    pub fn pixels_mut(&mut self) -> Option<&mut Vec<u8>> {
        let len = self.byte_len();
        match &mut self.backing {
            Backing::Texture { raw, .. } => {
                raw.resize(len, 0);
                Some(raw)
            }
            Backing::Color(_) => None,
        }
    }

    /// Number of live references.
    #[inline]
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Handle to a store in a [`StoreArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId {
    pub(crate) idx: u32,
    pub(crate) generation: u32,
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({}@gen{})", self.idx, self.generation)
    }
}

#[derive(Debug)]
struct StoreSlot {
    generation: u32,
    store: Option<Store>,
}

/// Owner of every store in the engine, shared by all contexts.
#[derive(Debug, Default)]
pub struct StoreArena {
    slots: Vec<StoreSlot>,
    free_list: Vec<u32>,
}

impl StoreArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, store: Store) -> StoreId {
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.generation += 1;
            slot.store = Some(store);
            StoreId {
                idx,
                generation: slot.generation,
            }
        } else {
            let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(StoreSlot {
                generation: 0,
                store: Some(store),
            });
            StoreId { idx, generation: 0 }
        }
    }

    /// Creates a flat color store with one reference.
    pub fn create_color(&mut self, rgb: [f32; 3], width: u32, height: u32) -> StoreId {
        self.insert(Store {
            width,
            height,
            format: PixelFormat::Rgba8,
            backing: Backing::Color(rgb),
            filter: Filter::default(),
            wrap: (WrapMode::Clamp, WrapMode::Clamp),
            source: None,
            refcount: 1,
        })
    }

    /// Creates a texture store with one reference and uploads `pixels`.
    ///
    /// An empty `pixels` buffer allocates the GPU resource without upload.
    pub fn create_texture<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> StoreId {
        let gpu = backend.create_store(width, height, format);
        if !pixels.is_empty() {
            backend.update_store(gpu, width, height, &pixels);
        }
        self.insert(Store {
            width,
            height,
            format,
            backing: Backing::Texture {
                raw: pixels,
                gpu: Some(gpu),
            },
            filter: Filter::default(),
            wrap: (WrapMode::Clamp, WrapMode::Clamp),
            source: None,
            refcount: 1,
        })
    }

    /// Returns the store behind `id`, if it is still alive.
    #[must_use]
    pub fn get(&self, id: StoreId) -> Option<&Store> {
        self.slots
            .get(id.idx as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.store.as_ref())
    }

    /// Mutable access to the store behind `id`.
    pub fn get_mut(&mut self, id: StoreId) -> Option<&mut Store> {
        self.slots
            .get_mut(id.idx as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.store.as_mut())
    }

    /// Number of live stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.store.is_some()).count()
    }

    /// Whether no store is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds one reference.
    pub fn retain(&mut self, id: StoreId) {
        match self.get_mut(id) {
            Some(store) => store.refcount += 1,
            None => warn!("retain on released store {id:?}"),
        }
    }

    /// Drops one reference, freeing the store (and its GPU resource) when it
    /// was the last. Returns whether the store was freed.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, id: StoreId) -> bool {
        let Some(store) = self.get_mut(id) else {
            warn!("[BUG] release on already freed store {id:?}");
            return false;
        };
        if store.refcount > 1 {
            store.refcount -= 1;
            return false;
        }
        if let Some(gpu) = store.gpu() {
            backend.drop_store(gpu);
        }
        self.slots[id.idx as usize].store = None;
        self.free_list.push(id.idx);
        true
    }

    /// Replaces the pixel contents, resizing if needed, and uploads.
    ///
    /// Resizing a shared store is refused with
    /// [`EngineError::UnacceptedState`].
    pub fn upload<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: StoreId,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<()> {
        let store = self.get_mut(id).ok_or(EngineError::BadResource)?;
        if (store.width, store.height) != (width, height) && store.refcount > 1 {
            return Err(EngineError::UnacceptedState);
        }
        let resized = (store.width, store.height) != (width, height);
        store.width = width;
        store.height = height;
        match &mut store.backing {
            Backing::Texture { raw, gpu } => {
                let handle = match *gpu {
                    Some(h) => {
                        if resized {
                            backend.resize_store(h, width, height);
                        }
                        h
                    }
                    None => {
                        let h = backend.create_store(width, height, store.format);
                        *gpu = Some(h);
                        h
                    }
                };
                backend.update_store(handle, width, height, &pixels);
                *raw = pixels;
            }
            Backing::Color(_) => {
                let h = backend.create_store(width, height, store.format);
                backend.update_store(h, width, height, &pixels);
                store.backing = Backing::Texture {
                    raw: pixels,
                    gpu: Some(h),
                };
            }
        }
        Ok(())
    }

    /// Pushes the CPU-side buffer to the GPU again.
    pub fn sync<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, id: StoreId) {
        if let Some(store) = self.get(id) {
            if let Backing::Texture { raw, gpu: Some(h) } = &store.backing {
                backend.update_store(*h, store.width, store.height, raw);
            }
        }
    }

    /// Resizes a store the caller owns exclusively.
    pub fn resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: StoreId,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let store = self.get_mut(id).ok_or(EngineError::BadResource)?;
        if store.refcount > 1 {
            return Err(EngineError::UnacceptedState);
        }
        store.width = width;
        store.height = height;
        let len = store.byte_len();
        if let Backing::Texture { raw, gpu } = &mut store.backing {
            raw.resize(len, 0);
            if let Some(h) = gpu {
                backend.resize_store(*h, width, height);
            }
        }
        Ok(())
    }

    /// Drops the GPU copy but keeps the CPU buffer.
    pub fn null_gpu<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, id: StoreId) {
        if let Some(Store {
            backing: Backing::Texture { gpu, .. },
            ..
        }) = self.get_mut(id)
        {
            if let Some(h) = gpu.take() {
                backend.drop_store(h);
            }
        }
    }

    /// Recreates a nulled GPU copy from the CPU buffer.
    pub fn realloc_gpu<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, id: StoreId) {
        let Some(store) = self.get_mut(id) else {
            return;
        };
        let (w, h, format) = (store.width, store.height, store.format);
        if let Backing::Texture { raw, gpu } = &mut store.backing {
            if gpu.is_none() {
                let handle = backend.create_store(w, h, format);
                if !raw.is_empty() {
                    backend.update_store(handle, w, h, raw);
                }
                *gpu = Some(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn last_release_frees_gpu() {
        let mut gfx = HeadlessBackend::new();
        let mut arena = StoreArena::new();
        let id = arena.create_texture(&mut gfx, 2, 2, PixelFormat::Rgba8, vec![0; 16]);
        arena.retain(id);
        assert_eq!(arena.get(id).map(Store::refcount), Some(2));

        assert!(!arena.release(&mut gfx, id), "still shared");
        assert_eq!(gfx.live_stores(), 1);
        assert!(arena.release(&mut gfx, id), "last reference frees");
        assert_eq!(gfx.live_stores(), 0);
        assert!(arena.get(id).is_none());
    }

    #[test]
    fn double_release_is_reported_not_fatal() {
        let mut gfx = HeadlessBackend::new();
        let mut arena = StoreArena::new();
        let id = arena.create_color([1.0, 0.0, 0.0], 4, 4);
        assert!(arena.release(&mut gfx, id));
        assert!(!arena.release(&mut gfx, id));
    }

    #[test]
    fn stale_id_after_slot_reuse() {
        let mut gfx = HeadlessBackend::new();
        let mut arena = StoreArena::new();
        let a = arena.create_color([0.0; 3], 1, 1);
        arena.release(&mut gfx, a);
        let b = arena.create_color([1.0; 3], 1, 1);
        assert_eq!(a.idx, b.idx);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn shared_store_refuses_resize() {
        let mut gfx = HeadlessBackend::new();
        let mut arena = StoreArena::new();
        let id = arena.create_texture(&mut gfx, 4, 4, PixelFormat::Rgba8, Vec::new());
        arena.retain(id);
        assert_eq!(
            arena.resize(&mut gfx, id, 8, 8),
            Err(EngineError::UnacceptedState)
        );
        assert_eq!(
            arena.upload(&mut gfx, id, 8, 8, vec![0; 256]),
            Err(EngineError::UnacceptedState)
        );
        arena.release(&mut gfx, id);
        assert!(arena.resize(&mut gfx, id, 8, 8).is_ok());
        assert_eq!(arena.get(id).map(|s| s.pixels().len()), Some(256));
    }

    #[test]
    fn null_and_realloc_round_trip() {
        let mut gfx = HeadlessBackend::new();
        let mut arena = StoreArena::new();
        let id = arena.create_texture(&mut gfx, 1, 1, PixelFormat::Rgba8, vec![9, 9, 9, 9]);
        arena.null_gpu(&mut gfx, id);
        assert_eq!(arena.get(id).and_then(Store::gpu), None);
        assert_eq!(gfx.live_stores(), 0);
        arena.realloc_gpu(&mut gfx, id);
        assert!(arena.get(id).and_then(Store::gpu).is_some());
        assert_eq!(gfx.live_stores(), 1);
    }
}
