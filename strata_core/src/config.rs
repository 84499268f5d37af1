// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine-wide limits and policies.

/// Hard upper bound on objects in a single context, World included.
pub const VITEM_CONTEXT_LIMIT: u32 = 65_536;

/// When the 3D sub-pass of a rendertarget runs relative to the 2D pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Order3d {
    /// Negative-order entries are drawn before the 2D entries.
    #[default]
    First,
    /// Negative-order entries are drawn after the 2D entries.
    Last,
}

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Object slots per context, World and the reserved slot included.
    ///
    /// Clamped to [`VITEM_CONTEXT_LIMIT`].
    pub object_limit: u32,
    /// Depth of the context stack.
    pub context_stack_limit: usize,
    /// Maximum number of rendertargets per context, not counting the
    /// default one.
    pub rendertarget_limit: usize,
    /// Number of concurrent asynchronous image loads.
    pub loader_workers: usize,
    /// Width and height of the store given to objects whose load failed.
    pub placeholder_size: u32,
    /// Placement of the 3D sub-pass.
    pub order3d: Order3d,
    /// Process every rendertarget on refresh even when nothing is dirty.
    pub ignore_dirty: bool,
    /// Milliseconds per logical tick, used for clock-based readback.
    pub timer_tick_ms: u32,
}

impl EngineConfig {
    /// Defaults for a desktop session.
    #[must_use]
    pub const fn desktop() -> Self {
        Self {
            object_limit: 1024,
            context_stack_limit: 8,
            rendertarget_limit: 64,
            loader_workers: 12,
            placeholder_size: 32,
            order3d: Order3d::First,
            ignore_dirty: false,
            timer_tick_ms: 25,
        }
    }

    /// Smaller pools for memory-constrained devices.
    #[must_use]
    pub const fn constrained() -> Self {
        Self {
            object_limit: 256,
            context_stack_limit: 4,
            rendertarget_limit: 8,
            loader_workers: 2,
            placeholder_size: 32,
            order3d: Order3d::First,
            ignore_dirty: false,
            timer_tick_ms: 25,
        }
    }

    /// Object limit after clamping; always leaves room for the reserved
    /// slot, World, and at least one object.
    #[must_use]
    pub(crate) const fn clamped_object_limit(&self) -> u32 {
        let n = if self.object_limit > VITEM_CONTEXT_LIMIT {
            VITEM_CONTEXT_LIMIT
        } else {
            self.object_limit
        };
        if n < 3 { 3 } else { n }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::desktop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_limit_is_clamped() {
        let mut cfg = EngineConfig::desktop();
        cfg.object_limit = 1_000_000;
        assert_eq!(cfg.clamped_object_limit(), VITEM_CONTEXT_LIMIT);
        cfg.object_limit = 0;
        assert_eq!(cfg.clamped_object_limit(), 3, "room for one object");
    }

    #[test]
    fn default_is_desktop() {
        assert_eq!(EngineConfig::default(), EngineConfig::desktop());
        assert_eq!(EngineConfig::default().loader_workers, 12);
    }
}
