// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The scene-graph node and its per-object state.

mod id;

pub use id::{INVALID, ObjectId};
pub(crate) use id::{RESERVED_IDX, WORLD_IDX};

use core::ops::{BitOr, BitOrAssign};

use crate::backend::{BlendMode, ShaderId};
use crate::chain::{Properties, Tick, TransformChain};
use crate::feed::ObjectKind;
use crate::math::Vec3;
use crate::store::StoreId;
use crate::transform::Transform3d;

/// Which properties an object inherits from its parent, plus a few behavior
/// bits that ride along in the same set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mask(u8);

impl Mask {
    /// No bits.
    pub const EMPTY: Self = Self(0);
    /// Position is relative to the parent.
    pub const POSITION: Self = Self(1);
    /// Scale is inherited.
    pub const SCALE: Self = Self(2);
    /// Opacity is multiplied with the parent's.
    pub const OPACITY: Self = Self(4);
    /// The object is deleted together with its parent.
    pub const LIVING: Self = Self(8);
    /// Orientation is combined with the parent's.
    pub const ORIENTATION: Self = Self(16);
    /// Skipped by picking.
    pub const UNPICKABLE: Self = Self(32);
    /// Frameset stepping is driven by the object's own counter.
    pub const FRAMESET: Self = Self(64);
    /// Texture coordinates are taken from the parent.
    pub const MAPPING: Self = Self(128);

    /// The mask given to new objects.
    pub const DEFAULT: Self = Self(
        Self::ORIENTATION.0 | Self::OPACITY.0 | Self::POSITION.0 | Self::FRAMESET.0 | Self::LIVING.0,
    );

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a mask from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Whether every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets or clears the bits of `other`.
    #[inline]
    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for Mask {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::fmt::Debug for Mask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const NAMES: [&str; 8] = [
            "POSITION",
            "SCALE",
            "OPACITY",
            "LIVING",
            "ORIENTATION",
            "UNPICKABLE",
            "FRAMESET",
            "MAPPING",
        ];
        let mut set = f.debug_set();
        for (bit, name) in NAMES.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                set.entry(name);
            }
        }
        set.finish()
    }
}

/// Point on the parent an object's position is measured from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// Upper-left corner.
    #[default]
    UpperLeft,
    /// Upper-right corner.
    UpperRight,
    /// Lower-left corner.
    LowerLeft,
    /// Lower-right corner.
    LowerRight,
    /// Center.
    Center,
}

/// Whether and how an object is clipped against its ancestors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClipMode {
    /// Not clipped.
    #[default]
    Off,
    /// Clipped to the direct parent.
    Shallow,
    /// Clipped to every ancestor up to the first shallow one.
    Deep,
}

/// Whether a child follows the parent's scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScalePolicy {
    /// Scale is the child's own.
    #[default]
    Independent,
    /// Scale is inherited.
    Inherit,
}

/// How the frames of a frameset are presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameMode {
    /// One frame at a time, selected by the active index.
    #[default]
    Split,
    /// Every frame bound at once, newest first.
    MultiTexture,
}

/// A carousel of stores attached to one object.
#[derive(Clone, Debug, PartialEq)]
pub struct Frameset {
    pub(crate) frames: Vec<StoreId>,
    pub(crate) index: usize,
    pub(crate) mode: FrameMode,
    /// Countdown to the next automatic step.
    pub(crate) ctr: i32,
    /// Stepping mode: 0 manual, `n > 0` every n ticks, `n < 0` every |n|
    /// new feed frames.
    pub(crate) mctr: i32,
}

impl Frameset {
    /// Number of frames.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the active frame.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Presentation mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// The active frame's store.
    #[must_use]
    pub fn active(&self) -> Option<StoreId> {
        self.frames.get(self.index).copied()
    }

    /// Frames starting at the active one and walking backwards, so the most
    /// recent frame comes first.
    #[must_use]
    pub fn history(&self) -> Vec<StoreId> {
        let n = self.frames.len();
        (0..n)
            .map(|i| self.frames[(self.index + n - i) % n])
            .collect()
    }

    /// Moves to the next of `len` frames, wrapping around. Clones step
    /// through their original's frames, so the length is passed in.
    pub(crate) fn step(&mut self, len: usize) {
        if len > 0 {
            self.index = (self.index + 1) % len;
        }
    }

    /// Counts down the stepping counter. Returns whether a step is due, in
    /// which case the counter has been reloaded.
    pub(crate) fn count_down(&mut self) -> bool {
        self.ctr -= 1;
        if self.ctr > 0 {
            return false;
        }
        self.ctr = self.mctr.saturating_abs();
        true
    }
}

/// Behavior flags that are not part of the inheritance mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObjectFlags {
    /// The object is a clone sharing its original's store.
    pub clone: bool,
    /// The object survives context pushes.
    pub persist: bool,
    /// Completed animation segments re-queue themselves.
    pub cyclic: bool,
    /// The order is kept relative to the parent's.
    pub order_offset: bool,
}

/// A scene-graph node.
#[derive(Clone, Debug)]
pub struct VObject {
    // -- Topology --
    pub(crate) parent: u32,
    pub(crate) first_child: u32,
    pub(crate) next_sibling: u32,
    pub(crate) prev_sibling: u32,
    pub(crate) child_count: u32,
    pub(crate) instances: u32,

    // -- Content --
    pub(crate) kind: ObjectKind,
    pub(crate) store: Option<StoreId>,
    pub(crate) frameset: Option<Frameset>,
    pub(crate) origw: u32,
    pub(crate) origh: u32,
    pub(crate) blend: BlendMode,
    pub(crate) program: Option<ShaderId>,
    pub(crate) txcos: Option<[f32; 8]>,

    // -- Placement --
    pub(crate) current: Properties,
    pub(crate) chain: TransformChain,
    pub(crate) origin_offset: Vec3,
    pub(crate) order: i32,
    pub(crate) mask: Mask,
    pub(crate) anchor: Anchor,
    pub(crate) clip: ClipMode,
    pub(crate) flags: ObjectFlags,
    pub(crate) lifetime: u32,

    // -- Attachment --
    pub(crate) owner: Option<u32>,
    pub(crate) attachments: u32,

    // -- Resolve cache --
    pub(crate) valid_cache: bool,
    pub(crate) prop_cache: Properties,
    pub(crate) prop_matrix: Transform3d,
    pub(crate) last_updated: Tick,

    // -- Bookkeeping --
    pub(crate) feed_cookie: u64,
    pub(crate) tracetag: Option<String>,
    pub(crate) density: f32,
}

impl VObject {
    pub(crate) fn new(parent: u32, density: f32) -> Self {
        Self {
            parent,
            first_child: INVALID,
            next_sibling: INVALID,
            prev_sibling: INVALID,
            child_count: 0,
            instances: 0,
            kind: ObjectKind::None,
            store: None,
            frameset: None,
            origw: 1,
            origh: 1,
            blend: BlendMode::Normal,
            program: None,
            txcos: None,
            current: Properties::default(),
            chain: TransformChain::new(),
            origin_offset: Vec3::ZERO,
            order: 0,
            mask: Mask::DEFAULT,
            anchor: Anchor::UpperLeft,
            clip: ClipMode::Off,
            flags: ObjectFlags::default(),
            lifetime: 0,
            owner: None,
            attachments: 0,
            valid_cache: false,
            prop_cache: Properties::default(),
            prop_matrix: Transform3d::IDENTITY,
            last_updated: 0,
            feed_cookie: 0,
            tracetag: None,
            density,
        }
    }

    /// Current (tick-resolution) local properties.
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.current
    }

    /// Pending animation segments.
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    /// Z order; negative values belong to the 3D pass.
    #[inline]
    #[must_use]
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Inheritance mask.
    #[inline]
    #[must_use]
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// Anchor on the parent.
    #[inline]
    #[must_use]
    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Clipping mode.
    #[inline]
    #[must_use]
    pub fn clip(&self) -> ClipMode {
        self.clip
    }

    /// What produces this object's content.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Backing store, if any.
    #[inline]
    #[must_use]
    pub fn store(&self) -> Option<StoreId> {
        self.store
    }

    /// Frameset, if allocated.
    #[inline]
    #[must_use]
    pub fn frameset(&self) -> Option<&Frameset> {
        self.frameset.as_ref()
    }

    /// Logical size in pixels.
    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.origw, self.origh)
    }

    /// Behavior flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// Number of linked children.
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> u32 {
        self.child_count
    }

    /// Number of rendertarget lists holding this object.
    #[inline]
    #[must_use]
    pub fn attachments(&self) -> u32 {
        self.attachments
    }

    /// Blend mode.
    #[inline]
    #[must_use]
    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    /// Shader override.
    #[inline]
    #[must_use]
    pub fn program(&self) -> Option<ShaderId> {
        self.program
    }

    /// Remaining lifetime in ticks, 0 meaning infinite.
    #[inline]
    #[must_use]
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    /// Diagnostic tag.
    #[must_use]
    pub fn tracetag(&self) -> Option<&str> {
        self.tracetag.as_deref()
    }

    /// Raster density the content was produced at.
    #[inline]
    #[must_use]
    pub fn density(&self) -> f32 {
        self.density
    }

    /// Whether the resolved-property cache is current.
    #[inline]
    #[must_use]
    pub fn has_valid_cache(&self) -> bool {
        self.valid_cache
    }
}
