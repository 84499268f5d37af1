// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Events raised by the engine for the layer above.

use crate::chain::Attribute;
use crate::object::ObjectId;

/// Something the scripting or window-management layer should react to.
///
/// Events queue up inside the engine and are collected with
/// [`Engine::drain_events`](crate::engine::Engine::drain_events).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A tagged animation segment completed.
    ChainOver {
        /// The animated object.
        id: ObjectId,
        /// Which attribute finished.
        attribute: Attribute,
        /// The tag set with `tag_transform`.
        tag: u64,
    },
    /// An object's lifetime ran out. The object still exists.
    Expired {
        /// The expired object.
        id: ObjectId,
    },
    /// A background image load finished.
    AsyncLoaded {
        /// The loaded object.
        id: ObjectId,
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
    /// A background image load failed; the object holds a placeholder.
    AsyncFailed {
        /// The object.
        id: ObjectId,
        /// Placeholder width.
        width: u32,
        /// Placeholder height.
        height: u32,
    },
    /// A text object was rasterized at a different density than the output
    /// now has.
    DensityChanged {
        /// The object.
        id: ObjectId,
    },
}
