// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are nanoseconds since engine start and are printed in microseconds.

use std::io::Write;

use strata_core::trace::{
    ContextEvent, FrameSummary, ObjectEvent, PassEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind,
    TickEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    /// Skip passes over clean rendertargets.
    quiet_skips: bool,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("quiet_skips", &self.quiet_skips)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self {
            writer,
            quiet_skips: false,
        }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            quiet_skips: false,
        }
    }

    /// Leaves out passes over rendertargets that had nothing to do.
    #[must_use]
    pub fn quiet_skips(mut self, quiet: bool) -> Self {
        self.quiet_skips = quiet;
        self
    }
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

fn phase_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::Tick => "tick",
        PhaseKind::Poll => "poll",
        PhaseKind::Refresh => "refresh",
        PhaseKind::Readback => "readback",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_tick(&mut self, e: &TickEvent) {
        let _ = writeln!(
            self.writer,
            "[tick] now={} steps={} animating={}",
            e.tick, e.steps, e.active,
        );
    }

    fn on_pass(&mut self, e: &PassEvent) {
        if e.skipped && self.quiet_skips {
            return;
        }
        let state = if e.skipped { "clean" } else { "drawn" };
        let _ = writeln!(
            self.writer,
            "[pass] frame={} target={} draws={} {state}",
            e.frame_index, e.target, e.draws,
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] frame={} {} at {:.1}µs",
            e.frame_index,
            phase_name(e.phase),
            ns_to_us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] frame={} {} at {:.1}µs",
            e.frame_index,
            phase_name(e.phase),
            ns_to_us(e.timestamp),
        );
    }

    fn on_context(&mut self, e: &ContextEvent) {
        let _ = writeln!(
            self.writer,
            "[context] {:?} depth={} objects={}",
            e.op, e.depth, e.objects,
        );
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        let presented = if s.presented { "presented" } else { "idle" };
        let _ = writeln!(
            self.writer,
            "[summary] frame={} tick={} passes={} draws={} poll={:.1}µs \
             refresh={:.1}µs readback={:.1}µs {presented}",
            s.frame_index,
            s.tick,
            s.passes,
            s.draws,
            ns_to_us(s.poll_ns),
            ns_to_us(s.refresh_ns),
            ns_to_us(s.readback_ns),
        );
    }

    fn on_object_events(&mut self, frame_index: u64, events: &[ObjectEvent]) {
        let _ = writeln!(
            self.writer,
            "[objects] frame={frame_index} changes={}",
            events.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(skipped: bool) -> PassEvent {
        PassEvent {
            frame_index: 4,
            target: 1,
            draws: 0,
            skipped,
        }
    }

    #[test]
    fn pretty_print_tick() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_tick(&TickEvent {
            tick: 12,
            steps: 2,
            active: 3,
        });
        let output = String::from_utf8(sink.writer).unwrap();
        assert!(output.contains("[tick]"), "got: {output}");
        assert!(output.contains("now=12"), "got: {output}");
    }

    #[test]
    fn quiet_skips_hide_clean_passes() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new()).quiet_skips(true);
        sink.on_pass(&pass(true));
        sink.on_pass(&pass(false));
        let output = String::from_utf8(sink.writer).unwrap();
        assert_eq!(output.lines().count(), 1, "got: {output}");
        assert!(output.contains("drawn"), "got: {output}");
    }
}
