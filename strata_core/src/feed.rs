// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Content producers attached to objects.
//!
//! An object whose pixels change over time (a video decoder, a client
//! window, a terminal) carries a [`Feed`]. The frame driver polls every feed
//! once per poll cycle, lets it render into the object's store when it has a
//! new frame, and ticks it once per logical tick. All methods default to
//! "nothing happened", so a feed only implements what it needs.

use crate::backend::Readback;
use crate::object::ObjectId;
use crate::store::Store;

/// What produces an object's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Nothing; a pure grouping or placeholder node.
    #[default]
    None,
    /// A decoded still image.
    Image,
    /// Rasterized text.
    Text,
    /// An out-of-process producer.
    External,
    /// An image still being decoded in the background.
    AsyncLoading,
    /// A flat color fill.
    Color,
    /// Anything else with a feed.
    Custom,
}

/// Result of [`Feed::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FeedStatus {
    /// Nothing new.
    #[default]
    Idle,
    /// A new frame is ready to be rendered.
    NewFrame,
}

/// Capability interface of a content producer.
pub trait Feed {
    /// Checks for a new frame.
    fn poll(&mut self) -> FeedStatus {
        FeedStatus::Idle
    }

    /// Writes the pending frame into `store`. Returns whether pixels were
    /// written and need uploading.
    fn render(&mut self, store: &mut Store) -> bool {
        _ = store;
        false
    }

    /// Called once per logical tick.
    fn tick(&mut self) {}

    /// Called when the feed has been moved to a fresh object during
    /// recovery. Returning `false` refuses the adoption.
    fn adopt(&mut self, id: ObjectId) -> bool {
        _ = id;
        true
    }

    /// Called right before the owning object is deleted.
    fn destroy(&mut self) {}

    /// Receives pixels read back from the rendertarget this feed's object
    /// backs.
    fn readback(&mut self, frame: &Readback) {
        _ = frame;
    }

    /// The object's context was pushed down the stack.
    fn suspend(&mut self) {}

    /// The object's context became active again.
    fn resume(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;
    impl Feed for Silent {}

    #[test]
    fn defaults_are_inert() {
        let mut f = Silent;
        assert_eq!(f.poll(), FeedStatus::Idle);
        assert!(f.adopt(ObjectId::WORLD), "adoption accepted by default");
    }
}
