// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Output pipelines.
//!
//! A [`Rendertarget`] is an attachment list of object slots kept sorted by
//! order, bound to the store of a color object. Every context has one
//! default rendertarget drawing to the display (its color is World) plus up
//! to [`EngineConfig::rendertarget_limit`](crate::config::EngineConfig)
//! offscreen ones.

use crate::backend::{TargetHandle, TargetMode};
use crate::object::WORLD_IDX;
use crate::transform::Transform3d;

/// Options for [`Engine::setup_rendertarget`](crate::engine::Engine::setup_rendertarget).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetOptions {
    /// Readback rate: 0 off, `n < 0` every |n| ticks, `n > 0` every n
    /// milliseconds of logical time.
    pub readback: i32,
    /// Scale content authored for the display size down (or up) to the
    /// target's size.
    pub scale: bool,
    /// Surface attachments.
    pub mode: TargetMode,
    /// Keep previous contents instead of clearing before each pass.
    pub no_clear: bool,
}

impl Default for RenderTargetOptions {
    fn default() -> Self {
        Self {
            readback: 0,
            scale: false,
            mode: TargetMode::Color,
            no_clear: false,
        }
    }
}

/// An ordered attachment list plus its output surface.
#[derive(Clone, Debug)]
pub struct Rendertarget {
    pub(crate) color: u32,
    pub(crate) attached: Vec<u32>,
    pub(crate) projection: Transform3d,
    pub(crate) base: Transform3d,
    pub(crate) handle: Option<TargetHandle>,
    pub(crate) mode: TargetMode,

    // -- Readback --
    pub(crate) readback: i32,
    pub(crate) readcnt: i64,
    pub(crate) reading: bool,

    // -- Refresh policy --
    pub(crate) no_clear: bool,
    pub(crate) transfc: u32,
    pub(crate) dirty: u32,
    pub(crate) link: Option<u32>,
    pub(crate) min_order: i32,
    pub(crate) max_order: i32,
}

impl Rendertarget {
    /// A rendertarget with an empty list, bound to `color`.
    pub(crate) fn new(color: u32, projection: Transform3d) -> Self {
        Self {
            color,
            attached: Vec::new(),
            projection,
            base: Transform3d::IDENTITY,
            handle: None,
            mode: TargetMode::Color,
            readback: 0,
            readcnt: 0,
            reading: false,
            no_clear: false,
            transfc: 0,
            dirty: 1,
            link: None,
            min_order: 0,
            max_order: i32::from(u16::MAX),
        }
    }

    /// The display rendertarget of a `width` × `height` output.
    pub(crate) fn display(width: u32, height: u32) -> Self {
        Self::new(
            WORLD_IDX,
            Transform3d::ortho(0.0, f64::from(width), f64::from(height), 0.0, 0.0, 1.0),
        )
    }

    /// Slot index of the color object (World for the display target).
    #[inline]
    #[must_use]
    pub fn color_index(&self) -> u32 {
        self.color
    }

    /// Attached slot indices in drawing order.
    #[inline]
    #[must_use]
    pub fn attached(&self) -> &[u32] {
        &self.attached
    }

    /// Projection matrix.
    #[inline]
    #[must_use]
    pub fn projection(&self) -> &Transform3d {
        &self.projection
    }

    /// Pending redraw requests.
    #[inline]
    #[must_use]
    pub fn dirty(&self) -> u32 {
        self.dirty
    }

    /// Objects that were animating during the last tick.
    #[inline]
    #[must_use]
    pub fn transform_count(&self) -> u32 {
        self.transfc
    }

    /// Drawn order range.
    #[inline]
    #[must_use]
    pub fn order_range(&self) -> (i32, i32) {
        (self.min_order, self.max_order)
    }

    /// Readback rate.
    #[inline]
    #[must_use]
    pub fn readback_rate(&self) -> i32 {
        self.readback
    }

    /// Whether `idx` is in the list.
    #[must_use]
    pub fn contains(&self, idx: u32) -> bool {
        self.attached.contains(&idx)
    }

    /// Inserts `idx` after every entry whose order is less than or equal to
    /// `order`.
    pub(crate) fn insert_sorted(&mut self, idx: u32, order: i32, order_of: impl Fn(u32) -> i32) {
        let at = self.attached.partition_point(|&i| order_of(i) <= order);
        self.attached.insert(at, idx);
        self.dirty += 1;
    }

    /// Removes `idx`; returns whether it was present.
    pub(crate) fn remove(&mut self, idx: u32) -> bool {
        match self.attached.iter().position(|&i| i == idx) {
            Some(pos) => {
                self.attached.remove(pos);
                self.dirty += 1;
                true
            }
            None => false,
        }
    }

    /// Whether entries are in non-decreasing order.
    pub(crate) fn is_sorted(&self, order_of: impl Fn(u32) -> i32) -> bool {
        self.attached
            .windows(2)
            .all(|w| order_of(w[0]) <= order_of(w[1]))
    }
}
