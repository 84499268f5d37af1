// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Object change batches ([`on_object_events`](TraceSink::on_object_events))
//! store only the count.

use strata_core::trace::{
    ContextEvent, ContextOp, FrameSummary, ObjectEvent, PassEvent, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, TickEvent, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_TICK: u8 = 1;
const TAG_PASS: u8 = 2;
const TAG_PHASE_BEGIN: u8 = 3;
const TAG_PHASE_END: u8 = 4;
const TAG_CONTEXT: u8 = 5;
const TAG_FRAME_SUMMARY: u8 = 6;
const TAG_OBJECT_EVENTS_COUNT: u8 = 7;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::Tick => 0,
            PhaseKind::Poll => 1,
            PhaseKind::Refresh => 2,
            PhaseKind::Readback => 3,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_tick(&mut self, e: &TickEvent) {
        self.write_u8(TAG_TICK);
        self.write_u64(e.tick);
        self.write_u32(e.steps);
        self.write_u32(e.active);
    }

    fn on_pass(&mut self, e: &PassEvent) {
        self.write_u8(TAG_PASS);
        self.write_u64(e.frame_index);
        self.write_u32(e.target);
        self.write_u32(e.draws);
        self.write_bool(e.skipped);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp);
    }

    fn on_context(&mut self, e: &ContextEvent) {
        self.write_u8(TAG_CONTEXT);
        self.write_u8(match e.op {
            ContextOp::Push => 0,
            ContextOp::Pop => 1,
            ContextOp::Recover => 2,
        });
        self.write_u32(e.depth);
        self.write_u32(e.objects);
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.write_u8(TAG_FRAME_SUMMARY);
        self.write_u64(s.frame_index);
        self.write_u64(s.tick);
        self.write_u64(s.poll_ns);
        self.write_u64(s.refresh_ns);
        self.write_u64(s.readback_ns);
        self.write_u32(s.passes);
        self.write_u32(s.draws);
        self.write_bool(s.presented);
    }

    fn on_object_events(&mut self, frame_index: u64, events: &[ObjectEvent]) {
        self.write_u8(TAG_OBJECT_EVENTS_COUNT);
        self.write_u64(frame_index);
        self.write_u32(u32::try_from(events.len()).unwrap_or(u32::MAX));
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`TickEvent`].
    Tick(TickEvent),
    /// A [`PassEvent`].
    Pass(PassEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`ContextEvent`].
    Context(ContextEvent),
    /// A [`FrameSummary`].
    FrameSummary(FrameSummary),
    /// Object-change count for a refresh.
    ObjectEventsCount {
        /// Refresh counter.
        frame_index: u64,
        /// Number of object changes.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b != 0)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::Tick,
            1 => PhaseKind::Poll,
            2 => PhaseKind::Refresh,
            _ => PhaseKind::Readback,
        })
    }

    fn decode_tick(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Tick(TickEvent {
            tick: self.read_u64()?,
            steps: self.read_u32()?,
            active: self.read_u32()?,
        }))
    }

    fn decode_pass(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Pass(PassEvent {
            frame_index: self.read_u64()?,
            target: self.read_u32()?,
            draws: self.read_u32()?,
            skipped: self.read_bool()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_u64()?,
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_u64()?,
        }))
    }

    fn decode_context(&mut self) -> Option<RecordedEvent> {
        let op = match self.read_u8()? {
            0 => ContextOp::Push,
            1 => ContextOp::Pop,
            _ => ContextOp::Recover,
        };
        Some(RecordedEvent::Context(ContextEvent {
            op,
            depth: self.read_u32()?,
            objects: self.read_u32()?,
        }))
    }

    fn decode_frame_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FrameSummary(FrameSummary {
            frame_index: self.read_u64()?,
            tick: self.read_u64()?,
            poll_ns: self.read_u64()?,
            refresh_ns: self.read_u64()?,
            readback_ns: self.read_u64()?,
            passes: self.read_u32()?,
            draws: self.read_u32()?,
            presented: self.read_bool()?,
        }))
    }

    fn decode_object_events_count(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let count = self.read_u32()?;
        Some(RecordedEvent::ObjectEventsCount { frame_index, count })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_TICK => self.decode_tick(),
            TAG_PASS => self.decode_pass(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_CONTEXT => self.decode_context(),
            TAG_FRAME_SUMMARY => self.decode_frame_summary(),
            TAG_OBJECT_EVENTS_COUNT => self.decode_object_events_count(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::backend::headless::{HeadlessBackend, HeadlessPlatform};
    use strata_core::config::EngineConfig;
    use strata_core::engine::Engine;
    use strata_core::trace::{ObjectOp, Tracer};

    #[test]
    fn records_a_driven_frame() {
        let mut platform = HeadlessPlatform::new(64, 64);
        let mut engine =
            Engine::new(HeadlessBackend::new(), &platform, EngineConfig::desktop()).unwrap();
        let id = engine.create_color([1.0, 1.0, 1.0], 8, 8, 0).unwrap();
        engine.fade_to(id, 1.0, 2).unwrap();

        let mut rec = RecorderSink::new();
        {
            let mut tracer = Tracer::new(&mut rec);
            engine.tick(2, &mut tracer);
            engine.present(&mut platform, 0.0, &mut tracer);
        }

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert!(matches!(
            events[1],
            RecordedEvent::Tick(TickEvent {
                tick: 3,
                steps: 2,
                ..
            })
        ));
        let display_pass = events.iter().find_map(|e| match e {
            RecordedEvent::Pass(p) => Some(*p),
            _ => None,
        });
        assert!(display_pass.is_some_and(|p| !p.skipped && p.draws == 1));
        match events.last() {
            Some(RecordedEvent::FrameSummary(s)) => {
                assert!(s.presented);
                assert_eq!(s.draws, 1);
            }
            other => panic!("expected FrameSummary last, got {other:?}"),
        }
    }

    #[test]
    fn context_and_object_counts_round_trip() {
        let mut rec = RecorderSink::new();
        rec.on_context(&ContextEvent {
            op: ContextOp::Recover,
            depth: 0,
            objects: 12,
        });
        let changes = [ObjectEvent {
            object: 3,
            op: ObjectOp::Link,
        }; 5];
        rec.on_object_events(9, &changes);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            RecordedEvent::Context(e) => {
                assert_eq!(e.op, ContextOp::Recover);
                assert_eq!((e.depth, e.objects), (0, 12));
            }
            other => panic!("expected Context, got {other:?}"),
        }
        assert!(matches!(
            events[1],
            RecordedEvent::ObjectEventsCount {
                frame_index: 9,
                count: 5
            }
        ));
    }

    #[test]
    fn truncated_records_stop_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_pass(&PassEvent {
            frame_index: 1,
            target: 1,
            draws: 4,
            skipped: false,
        });
        let bytes = rec.into_bytes();
        assert_eq!(decode(&bytes).count(), 1);
        assert_eq!(decode(&bytes[..bytes.len() - 1]).count(), 0);
        assert!(decode(&[]).next().is_none());
    }
}
