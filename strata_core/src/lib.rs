// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene graph and rendertarget pipeline for a display-server compositor.
//!
//! `strata_core` owns every visual object of a display server: images,
//! client surfaces, text, color fills and pure grouping nodes. Objects form a
//! tree, animate along queued transform chains in logical ticks, and are
//! drawn by ordered rendertargets, either to the display or offscreen into
//! other objects' stores.
//!
//! # Architecture
//!
//! ```text
//!   tick(steps) ──► chains advance, feeds tick, lifetimes run out
//!        │
//!   poll_feeds() ──► readbacks delivered, new frames rendered and uploaded
//!        │
//!   refresh(fract) ──► offscreen targets, then the display
//!        │                  │
//!        │                  └──► GraphicsBackend (draws, stencils, readbacks)
//!        ▼
//!   drain_events() ──► EngineEvent queue for the layer above
//! ```
//!
//! **[`engine`]**: the [`Engine`](engine::Engine) and every operation on the
//! graph: creation, linking, deletion, animation, ordering, framesets,
//! rendertargets, async loads and the context stack.
//!
//! **[`context`]**: one addressable slab of objects with its World root,
//! rendertargets and dirty tracker. Pushing a context suspends the one below.
//!
//! **[`object`]**: the [`VObject`](object::VObject) node, generational
//! [`ObjectId`](object::ObjectId) handles and the inheritance
//! [`Mask`](object::Mask).
//!
//! **[`chain`]**: per-attribute animation queues and interpolation curves.
//!
//! **[`store`]**: reference-counted pixel stores shared between objects.
//!
//! **[`rendertarget`]**: ordered attachment lists bound to a color object.
//!
//! **[`backend`]**: the [`GraphicsBackend`](backend::GraphicsBackend) and
//! [`Platform`](backend::Platform) contracts plus a recording headless
//! implementation.
//!
//! **[`feed`]**: the [`Feed`](feed::Feed) trait for content producers.
//!
//! **[`loader`]**: the bounded decode worker pool behind async image loads.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) and the zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-object
//!   allocate/delete/link/attach records.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod backend;
pub mod chain;
pub mod config;
pub mod context;
pub mod dirty;
pub mod engine;
pub mod error;
pub mod event;
pub mod feed;
pub mod loader;
pub mod math;
pub mod object;
pub mod rendertarget;
pub mod store;
pub mod trace;
pub mod transform;

pub use engine::Engine;
pub use error::{EngineError, Result};
