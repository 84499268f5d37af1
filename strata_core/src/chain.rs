// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-object animation queues.
//!
//! A [`TransformChain`] holds four independent queues of [`Segment`]s, one
//! per animated [`Attribute`]. Each queue only ever advances its head
//! segment; queued segments start where the previous one ends, so repeated
//! requests play back to back instead of overlapping.
//!
//! Time is measured in logical ticks ([`Tick`]). Rendering between two ticks
//! passes a fractional offset to [`TransformChain::interpolate`] so motion
//! stays smooth at display rates higher than the tick rate.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;

use crate::math::{EPSILON, Rotation, Vec3};

/// Logical time, in ticks.
pub type Tick = u64;

/// Easing curve applied to a segment's progress fraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Interpolation {
    /// Constant speed.
    #[default]
    Linear,
    /// Quarter sine wave; fast start, soft landing.
    Sine,
    /// Exponential ease-in.
    EaseIn,
    /// Exponential ease-out.
    EaseOut,
    /// Exponential ease-in-out.
    EaseInOut,
    /// Hermite smoothstep over the middle 80% of the segment.
    Smoothstep,
}

impl Interpolation {
    /// Maps a linear progress fraction in `[0, 1]` onto this curve.
    #[must_use]
    pub fn ease(self, f: f32) -> f32 {
        match self {
            Self::Linear => f,
            Self::Sine => (FRAC_PI_2 * f).sin(),
            Self::EaseIn => {
                if f < EPSILON {
                    0.0
                } else {
                    2.0_f32.powf(10.0 * (f - 1.0))
                }
            }
            Self::EaseOut => {
                if f < EPSILON {
                    0.0
                } else {
                    1.0 - 2.0_f32.powf(-10.0 * f)
                }
            }
            Self::EaseInOut => {
                if f < EPSILON {
                    0.0
                } else if f > 1.0 - EPSILON {
                    1.0
                } else if f < 0.5 {
                    0.5 * 2.0_f32.powf(20.0 * f - 10.0)
                } else {
                    -0.5 * 2.0_f32.powf(-20.0 * f + 10.0) + 1.0
                }
            }
            Self::Smoothstep => {
                let r = ((f - 0.1) / 0.8).clamp(0.0, 1.0);
                r * r * (3.0 - 2.0 * r)
            }
        }
    }
}

/// Which animated attribute a segment or event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Position.
    Position,
    /// Scale factors.
    Scale,
    /// Orientation.
    Rotation,
    /// Opacity.
    Opacity,
}

/// The animated property set of an object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Properties {
    /// Position relative to the parent (or World).
    pub position: Vec3,
    /// Scale factors applied to the object's natural size.
    pub scale: Vec3,
    /// Orientation.
    pub rotation: Rotation,
    /// Opacity in `[0, 1]`.
    pub opacity: f32,
}

impl Properties {
    /// Identity properties: origin, unit scale, no rotation, given opacity.
    #[must_use]
    pub const fn with_opacity(opacity: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Rotation::IDENTITY,
            opacity,
        }
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::with_opacity(0.0)
    }
}

/// A value that can be animated along a segment.
pub trait Animatable: Copy {
    /// Value at eased fraction `t` between `from` and `to`.
    fn blend(from: Self, to: Self, t: f32) -> Self;
}

impl Animatable for f32 {
    #[inline]
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from + (to - from) * t
    }
}

impl Animatable for Vec3 {
    #[inline]
    fn blend(from: Self, to: Self, t: f32) -> Self {
        from.lerp(to, t)
    }
}

impl Animatable for Rotation {
    /// Interpolates the quaternion; the angles are re-derived from it.
    ///
    /// When any angle moves by more than half a turn the quaternions are
    /// blended directly so the long way round is honored; otherwise the
    /// shortest arc is taken.
    fn blend(from: Self, to: Self, t: f32) -> Self {
        let long_way = (from.roll - to.roll).abs() > 180.0
            || (from.pitch - to.pitch).abs() > 180.0
            || (from.yaw - to.yaw).abs() > 180.0;
        let quat = from.quat.nlerp(to.quat, t, !long_way);
        let angles = quat.to_euler();
        Self {
            roll: angles.x,
            pitch: angles.y,
            yaw: angles.z,
            quat,
        }
    }
}

/// One queued animation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment<T> {
    /// Tick the segment starts at.
    pub start: Tick,
    /// Tick the segment completes at (always `> start`).
    pub end: Tick,
    /// Value at `start`.
    pub from: T,
    /// Value at `end`.
    pub to: T,
    /// Easing curve.
    pub interp: Interpolation,
    /// Completion tag; a tagged segment emits an event when it completes.
    pub tag: Option<u64>,
}

impl<T: Animatable> Segment<T> {
    /// Linear progress at (possibly fractional) time `at`, clamped to `[0, 1]`.
    #[inline]
    #[must_use]
    pub fn fraction(&self, at: f64) -> f32 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "segment fractions only need single precision"
        )]
        let f = ((f64::from(EPSILON) + (at - self.start as f64)) / (self.end - self.start) as f64)
            as f32;
        f.clamp(0.0, 1.0)
    }

    /// Value at time `at`.
    #[must_use]
    pub fn sample(&self, at: f64) -> T {
        T::blend(self.from, self.to, self.interp.ease(self.fraction(at)))
    }

    #[inline]
    fn duration(&self) -> Tick {
        self.end - self.start
    }
}

/// A segment that ran to completion during [`TransformChain::advance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Which attribute finished.
    pub attribute: Attribute,
    /// The tag the segment carried, if any.
    pub tag: Option<u64>,
}

/// Outcome of one [`TransformChain::advance`] step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advance {
    /// Number of attributes that were animating during this step.
    pub active: u32,
    /// Segments that completed, in opacity, position, scale, rotation order.
    pub completed: Vec<Completion>,
}

/// Four attribute queues of pending animation segments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformChain {
    pub(crate) position: VecDeque<Segment<Vec3>>,
    pub(crate) scale: VecDeque<Segment<Vec3>>,
    pub(crate) rotation: VecDeque<Segment<Rotation>>,
    pub(crate) opacity: VecDeque<Segment<f32>>,
}

fn append<T: Animatable>(
    queue: &mut VecDeque<Segment<T>>,
    now: Tick,
    current: T,
    to: T,
    duration: u32,
) {
    let (start, from) = match queue.back() {
        Some(last) => (last.end.max(now), last.to),
        None => (now, current),
    };
    queue.push_back(Segment {
        start,
        end: start + Tick::from(duration.max(1)),
        from,
        to,
        interp: Interpolation::Linear,
        tag: None,
    });
}

/// Steps the head of one queue, returning the value to store and whether
/// the head completed.
fn step<T: Animatable>(queue: &VecDeque<Segment<T>>, tick: Tick) -> Option<(T, bool)> {
    let head = queue.front()?;
    let f = head.fraction(tick as f64);
    if f > 1.0 - EPSILON {
        Some((head.to, true))
    } else {
        Some((T::blend(head.from, head.to, head.interp.ease(f)), false))
    }
}

/// Finishes the head of `queue`: optionally re-queues it, then drops it.
fn complete<T: Animatable>(
    queue: &mut VecDeque<Segment<T>>,
    tick: Tick,
    cyclic: bool,
    attribute: Attribute,
    out: &mut Vec<Completion>,
) {
    let Some(head) = queue.front().copied() else {
        return;
    };
    if cyclic {
        let duration = u32::try_from(head.duration()).unwrap_or(u32::MAX);
        let current = head.to;
        append(queue, tick, current, head.to, duration);
        if let Some(last) = queue.back_mut() {
            last.interp = head.interp;
        }
    }
    out.push(Completion {
        attribute,
        tag: head.tag,
    });
    queue.pop_front();
}

fn value_at<T: Animatable>(queue: &VecDeque<Segment<T>>, tick: Tick) -> Option<T> {
    let seg = queue
        .iter()
        .find(|s| s.end > tick)
        .or_else(|| queue.back())?;
    if seg.end <= tick {
        Some(seg.to)
    } else if seg.start >= tick {
        Some(seg.from)
    } else {
        Some(seg.sample(tick as f64))
    }
}

impl TransformChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any attribute has a queued segment.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !(self.position.is_empty()
            && self.scale.is_empty()
            && self.rotation.is_empty()
            && self.opacity.is_empty())
    }

    /// Whether `attribute` has a queued segment.
    #[must_use]
    pub fn is_animating(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::Position => !self.position.is_empty(),
            Attribute::Scale => !self.scale.is_empty(),
            Attribute::Rotation => !self.rotation.is_empty(),
            Attribute::Opacity => !self.opacity.is_empty(),
        }
    }

    /// Number of queued segments for `attribute`.
    #[must_use]
    pub fn len(&self, attribute: Attribute) -> usize {
        match attribute {
            Attribute::Position => self.position.len(),
            Attribute::Scale => self.scale.len(),
            Attribute::Rotation => self.rotation.len(),
            Attribute::Opacity => self.opacity.len(),
        }
    }

    /// Appends a move ending at `to` after `duration` ticks.
    pub fn queue_position(&mut self, now: Tick, current: Vec3, to: Vec3, duration: u32) {
        append(&mut self.position, now, current, to, duration);
    }

    /// Appends a scale change.
    pub fn queue_scale(&mut self, now: Tick, current: Vec3, to: Vec3, duration: u32) {
        append(&mut self.scale, now, current, to, duration);
    }

    /// Appends a rotation.
    pub fn queue_rotation(&mut self, now: Tick, current: Rotation, to: Rotation, duration: u32) {
        append(&mut self.rotation, now, current, to, duration);
    }

    /// Appends an opacity change; `to` is clamped to `[0, 1]`.
    pub fn queue_opacity(&mut self, now: Tick, current: f32, to: f32, duration: u32) {
        append(&mut self.opacity, now, current, to.clamp(0.0, 1.0), duration);
    }

    /// Drops every queued segment of `attribute`.
    pub fn wipe(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::Position => self.position.clear(),
            Attribute::Scale => self.scale.clear(),
            Attribute::Rotation => self.rotation.clear(),
            Attribute::Opacity => self.opacity.clear(),
        }
    }

    /// Changes the easing of the last queued segment of `attribute`.
    ///
    /// Returns `false` if nothing is queued.
    pub fn set_interp(&mut self, attribute: Attribute, interp: Interpolation) -> bool {
        let slot = match attribute {
            Attribute::Position => self.position.back_mut().map(|s| &mut s.interp),
            Attribute::Scale => self.scale.back_mut().map(|s| &mut s.interp),
            Attribute::Rotation => self.rotation.back_mut().map(|s| &mut s.interp),
            Attribute::Opacity => self.opacity.back_mut().map(|s| &mut s.interp),
        };
        slot.map(|s| *s = interp).is_some()
    }

    /// Sets the completion tag of the last queued segment of `attribute`.
    ///
    /// Returns `false` if nothing is queued.
    pub fn tag(&mut self, attribute: Attribute, tag: u64) -> bool {
        let slot = match attribute {
            Attribute::Position => self.position.back_mut().map(|s| &mut s.tag),
            Attribute::Scale => self.scale.back_mut().map(|s| &mut s.tag),
            Attribute::Rotation => self.rotation.back_mut().map(|s| &mut s.tag),
            Attribute::Opacity => self.opacity.back_mut().map(|s| &mut s.tag),
        };
        slot.map(|s| *s = Some(tag)).is_some()
    }

    /// Advances every attribute's head segment to `tick`, writing the
    /// results into `props`.
    ///
    /// A rotation only updates the quaternion while in flight; the angles
    /// are written once the segment completes.
    pub fn advance(&mut self, tick: Tick, props: &mut Properties, cyclic: bool) -> Advance {
        let mut out = Advance::default();

        if let Some((v, done)) = step(&self.opacity, tick) {
            out.active += 1;
            props.opacity = v;
            if done {
                complete(&mut self.opacity, tick, cyclic, Attribute::Opacity, &mut out.completed);
            }
        }
        if let Some((v, done)) = step(&self.position, tick) {
            out.active += 1;
            props.position = v;
            if done {
                complete(&mut self.position, tick, cyclic, Attribute::Position, &mut out.completed);
            }
        }
        if let Some((v, done)) = step(&self.scale, tick) {
            out.active += 1;
            props.scale = v;
            if done {
                complete(&mut self.scale, tick, cyclic, Attribute::Scale, &mut out.completed);
            }
        }
        if let Some((v, done)) = step(&self.rotation, tick) {
            out.active += 1;
            if done {
                props.rotation = v;
                complete(&mut self.rotation, tick, cyclic, Attribute::Rotation, &mut out.completed);
            } else {
                props.rotation.quat = v.quat;
            }
        }
        out
    }

    /// Evaluates the head segments at fractional time `at` on top of `base`
    /// without consuming anything.
    #[must_use]
    pub fn interpolate(&self, base: Properties, at: f64) -> Properties {
        let mut p = base;
        if let Some(s) = self.position.front() {
            p.position = s.sample(at);
        }
        if let Some(s) = self.scale.front() {
            p.scale = s.sample(at);
        }
        if let Some(s) = self.opacity.front() {
            p.opacity = s.sample(at);
        }
        if let Some(s) = self.rotation.front() {
            p.rotation = s.sample(at);
        }
        p
    }

    /// Looks ahead through the whole queue for the values at absolute tick
    /// `tick`, without consuming anything.
    #[must_use]
    pub fn value_at(&self, base: Properties, tick: Tick) -> Properties {
        let mut p = base;
        if let Some(v) = value_at(&self.position, tick) {
            p.position = v;
        }
        if let Some(v) = value_at(&self.scale, tick) {
            p.scale = v;
        }
        if let Some(v) = value_at(&self.opacity, tick) {
            p.opacity = v;
        }
        if let Some(v) = value_at(&self.rotation, tick) {
            p.rotation = v;
        }
        p
    }

    /// Applies every attribute's final queued value and clears the chain.
    pub fn instant(&mut self, props: &mut Properties) {
        if let Some(s) = self.position.back() {
            props.position = s.to;
        }
        if let Some(s) = self.scale.back() {
            props.scale = s.to;
        }
        if let Some(s) = self.rotation.back() {
            props.rotation = s.to;
        }
        if let Some(s) = self.opacity.back() {
            props.opacity = s.to;
        }
        self.zap();
    }

    /// Drops every queued segment.
    pub fn zap(&mut self) {
        self.position.clear();
        self.scale.clear();
        self.rotation.clear();
        self.opacity.clear();
    }

    /// Shifts every segment `delta` ticks into the future.
    pub fn rebase(&mut self, delta: Tick) {
        for s in &mut self.position {
            s.start += delta;
            s.end += delta;
        }
        for s in &mut self.scale {
            s.start += delta;
            s.end += delta;
        }
        for s in &mut self.rotation {
            s.start += delta;
            s.end += delta;
        }
        for s in &mut self.opacity {
            s.start += delta;
            s.end += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn curves_hit_endpoints() {
        for interp in [
            Interpolation::Linear,
            Interpolation::Sine,
            Interpolation::EaseInOut,
            Interpolation::Smoothstep,
        ] {
            assert!(close(interp.ease(0.0), 0.0), "{interp:?} starts at 0");
            assert!(close(interp.ease(1.0), 1.0), "{interp:?} ends at 1");
        }
        assert!(close(Interpolation::EaseOut.ease(0.0), 0.0));
        assert!(Interpolation::EaseOut.ease(1.0) > 0.999);
        assert!(close(Interpolation::EaseIn.ease(1.0), 1.0));
    }

    #[test]
    fn smoothstep_is_flat_at_the_edges() {
        assert_eq!(Interpolation::Smoothstep.ease(0.05), 0.0);
        assert_eq!(Interpolation::Smoothstep.ease(0.95), 1.0);
        assert!(close(Interpolation::Smoothstep.ease(0.5), 0.5));
    }

    #[test]
    fn linear_move_is_monotonic_and_snaps() {
        let mut chain = TransformChain::new();
        let mut props = Properties::default();
        chain.queue_position(0, Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0), 10);

        let mut last = -1.0;
        for t in 1..10 {
            chain.advance(t, &mut props, false);
            assert!(props.position.x > last, "monotonic at tick {t}");
            assert!(props.position.x < 100.0);
            last = props.position.x;
        }
        let step = chain.advance(10, &mut props, false);
        assert_eq!(props.position.x, 100.0, "exact end value");
        assert_eq!(step.completed.len(), 1);
        assert!(!chain.is_active());

        let idle = chain.advance(11, &mut props, false);
        assert_eq!(idle.active, 0, "no-op once reached");
        assert_eq!(props.position.x, 100.0);
    }

    #[test]
    fn chained_fades_run_back_to_back() {
        let mut chain = TransformChain::new();
        let mut props = Properties::with_opacity(1.0);
        chain.queue_opacity(0, 1.0, 0.0, 10);
        chain.queue_opacity(0, 1.0, 1.0, 10);

        let second = chain.opacity[1];
        assert_eq!(second.start, 10, "second starts where the first ends");
        assert_eq!(second.from, 0.0, "and from its end value");

        for t in 1..=10 {
            chain.advance(t, &mut props, false);
            assert!(props.opacity <= 1.0 - (t as f32) * 0.09, "still fading out at {t}");
        }
        assert_eq!(props.opacity, 0.0, "fade-out fully applied first");
        chain.advance(15, &mut props, false);
        assert!(props.opacity > 0.4 && props.opacity < 0.6);
        chain.advance(20, &mut props, false);
        assert_eq!(props.opacity, 1.0);
    }

    #[test]
    fn opacity_targets_are_clamped() {
        let mut chain = TransformChain::new();
        chain.queue_opacity(0, 0.0, 3.0, 5);
        assert_eq!(chain.opacity[0].to, 1.0);
    }

    #[test]
    fn tags_are_reported_on_completion() {
        let mut chain = TransformChain::new();
        let mut props = Properties::default();
        chain.queue_scale(0, Vec3::ONE, Vec3::new(2.0, 2.0, 1.0), 4);
        assert!(chain.tag(Attribute::Scale, 77));
        assert!(!chain.tag(Attribute::Position, 1), "nothing queued");

        let step = chain.advance(4, &mut props, false);
        assert_eq!(
            step.completed,
            vec![Completion {
                attribute: Attribute::Scale,
                tag: Some(77)
            }]
        );
    }

    #[test]
    fn cyclic_pair_ping_pongs() {
        let mut chain = TransformChain::new();
        let mut props = Properties::default();
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 0.0, 0.0);
        chain.queue_position(0, a, b, 5);
        chain.queue_position(0, a, a, 5);

        chain.advance(5, &mut props, true);
        assert_eq!(chain.len(Attribute::Position), 2, "re-queued");
        chain.advance(10, &mut props, true);
        assert_eq!(props.position, a);
        chain.advance(15, &mut props, true);
        assert_eq!(props.position, b, "cycle keeps running");
    }

    #[test]
    fn rotation_angles_only_land_at_the_end() {
        let mut chain = TransformChain::new();
        let mut props = Properties::default();
        chain.queue_rotation(0, Rotation::IDENTITY, Rotation::from_euler(90.0, 0.0, 0.0), 10);
        chain.advance(5, &mut props, false);
        assert_eq!(props.rotation.roll, 0.0, "angles untouched mid-flight");
        assert_ne!(props.rotation.quat, Quat::IDENTITY);
        chain.advance(10, &mut props, false);
        assert_eq!(props.rotation.roll, 90.0);
    }

    #[test]
    fn rebase_and_value_at() {
        let mut chain = TransformChain::new();
        chain.queue_position(0, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 10);
        chain.queue_position(0, Vec3::ZERO, Vec3::new(10.0, 20.0, 0.0), 10);
        let base = Properties::default();
        assert_eq!(chain.value_at(base, 25).position, Vec3::new(10.0, 20.0, 0.0));
        assert_eq!(chain.value_at(base, 10).position, Vec3::new(10.0, 0.0, 0.0));

        chain.rebase(100);
        assert_eq!(chain.position[0].start, 100);
        assert_eq!(chain.value_at(base, 50).position, Vec3::ZERO);
    }

    #[test]
    fn instant_applies_final_values() {
        let mut chain = TransformChain::new();
        let mut props = Properties::default();
        chain.queue_opacity(0, 0.0, 0.5, 10);
        chain.queue_opacity(0, 0.0, 0.8, 10);
        chain.instant(&mut props);
        assert_eq!(props.opacity, 0.8);
        assert!(!chain.is_active());
    }
}
