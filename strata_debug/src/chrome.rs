// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Phases become duration slices. Events without a timestamp of their own
/// (ticks, passes, context changes, summaries) are placed at the most recent
/// phase boundary seen before them.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_ts = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::PhaseBegin(e) => {
                last_ts = ns_to_us(e.timestamp);
                events.push(json!({
                    "ph": "B",
                    "name": format!("{:?}", e.phase),
                    "cat": "Frame",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                last_ts = ns_to_us(e.timestamp);
                events.push(json!({
                    "ph": "E",
                    "name": format!("{:?}", e.phase),
                    "cat": "Frame",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::Tick(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Tick",
                    "cat": "Clock",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "tick": e.tick,
                        "steps": e.steps,
                        "animating": e.active,
                    }
                }));
            }
            RecordedEvent::Pass(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Pass",
                    "cat": "Refresh",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": e.target,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "draws": e.draws,
                        "skipped": e.skipped,
                    }
                }));
            }
            RecordedEvent::Context(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("Context{:?}", e.op),
                    "cat": "Context",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "depth": e.depth,
                        "objects": e.objects,
                    }
                }));
            }
            RecordedEvent::FrameSummary(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FrameSummary",
                    "cat": "Summary",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": s.frame_index,
                        "tick": s.tick,
                        "passes": s.passes,
                        "draws": s.draws,
                        "poll_us": ns_to_us(s.poll_ns),
                        "refresh_us": ns_to_us(s.refresh_ns),
                        "readback_us": ns_to_us(s.readback_ns),
                        "presented": s.presented,
                    }
                }));
            }
            RecordedEvent::ObjectEventsCount { frame_index, count } => {
                events.push(json!({
                    "ph": "i",
                    "name": "ObjectChanges",
                    "cat": "Rich",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": frame_index,
                        "count": count,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}
