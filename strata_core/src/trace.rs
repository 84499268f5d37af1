// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the frame driver.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! engine calls while ticking, polling and refreshing. All method bodies
//! default to no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`FrameSummaryBuilder`] collects phase timestamps and per-pass draw counts
//! during one presented frame and produces a [`FrameSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace` enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`) gates [`ObjectEvent`] records plus the
//!   corresponding `TraceSink` method.

use crate::chain::Tick;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the frame driver is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Logical ticks: animation, feed ticks, lifetimes.
    Tick,
    /// Feed polling and readback delivery.
    Poll,
    /// Rendertarget processing.
    Refresh,
    /// Readback scheduling after the draw passes.
    Readback,
}

/// Which way the context stack moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextOp {
    /// A fresh context was pushed.
    Push,
    /// The top context was discarded.
    Pop,
    /// External producers were salvaged and the stack collapsed.
    Recover,
}

/// What happened to an object.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectOp {
    /// A slot was allocated.
    Allocate,
    /// The object was deleted.
    Delete,
    /// The object was linked to a new parent.
    Link,
    /// The object was attached to a rendertarget.
    Attach,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted after a batch of logical ticks.
#[derive(Clone, Copy, Debug)]
pub struct TickEvent {
    /// Logical clock after the batch.
    pub tick: Tick,
    /// Number of ticks processed.
    pub steps: u32,
    /// Attribute segments that were in flight.
    pub active: u32,
}

/// Emitted once per rendertarget per refresh.
#[derive(Clone, Copy, Debug)]
pub struct PassEvent {
    /// Refresh counter.
    pub frame_index: u64,
    /// Slot index of the target's color object (World for the display).
    pub target: u32,
    /// Draw calls issued, 3D pass included.
    pub draws: u32,
    /// Whether the target was clean and skipped.
    pub skipped: bool,
}

/// Marks the beginning of a frame-driver phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Refresh counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Nanoseconds since engine start.
    pub timestamp: u64,
}

/// Marks the end of a frame-driver phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Refresh counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Nanoseconds since engine start.
    pub timestamp: u64,
}

/// Emitted when the context stack changes.
#[derive(Clone, Copy, Debug)]
pub struct ContextEvent {
    /// Push, pop or recovery.
    pub op: ContextOp,
    /// Index of the active context afterwards.
    pub depth: u32,
    /// Live objects in the active context afterwards.
    pub objects: u32,
}

/// Per-frame summary produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Refresh counter.
    pub frame_index: u64,
    /// Logical clock at refresh.
    pub tick: Tick,
    /// Poll phase duration in nanoseconds (0 if not measured).
    pub poll_ns: u64,
    /// Refresh phase duration in nanoseconds (0 if not measured).
    pub refresh_ns: u64,
    /// Readback phase duration in nanoseconds (0 if not measured).
    pub readback_ns: u64,
    /// Rendertargets processed (not skipped).
    pub passes: u32,
    /// Draw calls issued.
    pub draws: u32,
    /// Whether anything was presented.
    pub presented: bool,
}

/// A per-object change record.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectEvent {
    /// Slot index of the object.
    pub object: u32,
    /// What happened.
    pub op: ObjectOp,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame driver.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called after a batch of ticks.
    fn on_tick(&mut self, e: &TickEvent) {
        _ = e;
    }

    /// Called after each rendertarget pass.
    fn on_pass(&mut self, e: &PassEvent) {
        _ = e;
    }

    /// Called at the beginning of a phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when the context stack changes.
    fn on_context(&mut self, e: &ContextEvent) {
        _ = e;
    }

    /// Called with a per-frame summary.
    fn on_frame_summary(&mut self, s: &FrameSummary) {
        _ = s;
    }

    /// Called with the object changes since the previous refresh (requires
    /// `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_object_events(&mut self, frame_index: u64, events: &[ObjectEvent]) {
        _ = (frame_index, events);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`TickEvent`].
    #[inline]
    pub fn tick(&mut self, e: &TickEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_tick(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PassEvent`].
    #[inline]
    pub fn pass(&mut self, e: &PassEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_pass(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ContextEvent`].
    #[inline]
    pub fn context(&mut self, e: &ContextEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_context(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameSummary`].
    #[inline]
    pub fn frame_summary(&mut self, s: &FrameSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_frame_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }

    /// Emits object changes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn object_events(&mut self, frame_index: u64, events: &[ObjectEvent]) {
        if let Some(s) = &mut self.sink {
            s.on_object_events(frame_index, events);
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps and pass counts during a frame and produces a
/// [`FrameSummary`].
#[derive(Debug)]
pub struct FrameSummaryBuilder {
    frame_index: u64,
    tick: Tick,
    phase_starts: [Option<u64>; 4],
    phase_ends: [Option<u64>; 4],
    passes: u32,
    draws: u32,
    presented: bool,
}

impl FrameSummaryBuilder {
    /// Starts building a summary for the given refresh.
    #[must_use]
    pub fn new(frame_index: u64, tick: Tick) -> Self {
        Self {
            frame_index,
            tick,
            phase_starts: [None; 4],
            phase_ends: [None; 4],
            passes: 0,
            draws: 0,
            presented: false,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: u64) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: u64) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Accounts for one rendertarget pass.
    pub fn add_pass(&mut self, e: &PassEvent) {
        if !e.skipped {
            self.passes += 1;
        }
        self.draws += e.draws;
    }

    /// Sets whether the frame reached the display.
    pub fn set_presented(&mut self, presented: bool) {
        self.presented = presented;
    }

    /// Consumes the builder and produces the final [`FrameSummary`].
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        FrameSummary {
            frame_index: self.frame_index,
            tick: self.tick,
            poll_ns: self.phase_duration(PhaseKind::Poll),
            refresh_ns: self.phase_duration(PhaseKind::Refresh),
            readback_ns: self.phase_duration(PhaseKind::Readback),
            passes: self.passes,
            draws: self.draws,
            presented: self.presented,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        }
    }
}

/// Maps a [`PhaseKind`] to an array index.
const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Tick => 0,
        PhaseKind::Poll => 1,
        PhaseKind::Refresh => 2,
        PhaseKind::Readback => 3,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
