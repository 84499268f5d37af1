// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channel constants.
//!
//! Each context owns a [`DirtyTracker`](understory_dirty::DirtyTracker) keyed
//! by object slot index.
//!
//! - [`CACHE`] propagates from parent to child. Linking adds a dependency
//!   edge from the child to its parent, so invalidating an object also
//!   invalidates every descendant's resolved-property cache. The channel is
//!   drained right before any resolve pass.
//! - [`CONTENT`] is local-only. Marked when an object's store receives new
//!   pixels or its visual state changes; drained at refresh to bump the
//!   owning rendertarget's dirty counter.

use understory_dirty::Channel;

/// Resolved-property cache is stale.
pub const CACHE: Channel = Channel::new(0);

/// Visual content changed and the owning rendertarget must redraw.
pub const CONTENT: Channel = Channel::new(1);
