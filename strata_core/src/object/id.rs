// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Object identity.

use core::fmt;

/// Sentinel value indicating "no object" in index fields.
pub const INVALID: u32 = u32::MAX;

/// Slot index reserved for "no object".
pub(crate) const RESERVED_IDX: u32 = 0;

/// Slot index of the World root in every context.
pub(crate) const WORLD_IDX: u32 = 1;

/// A handle to an object in the active context.
///
/// Contains both a slot index and a generation counter so that stale handles
/// are detected after an object is deleted and its slot reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub(crate) idx: u32,
    pub(crate) generation: u32,
}

impl ObjectId {
    /// The World root of the active context.
    pub const WORLD: Self = Self {
        idx: WORLD_IDX,
        generation: 0,
    };

    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Whether this is the World handle.
    #[inline]
    #[must_use]
    pub const fn is_world(self) -> bool {
        self.idx == WORLD_IDX
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_world() {
            f.write_str("ObjectId(WORLD)")
        } else {
            write!(f, "ObjectId({}@gen{})", self.idx, self.generation)
        }
    }
}
