//! Pattern entry state machine
//!
//! Nodes of an N x N grid are selected as the pointer passes within the hit
//! radius of their centers, at most once per gesture.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::EntryOutcome;
use crate::lockout::AttemptTracker;
use crate::types::TimestampMs;

/// Pointer position in view coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance_sq(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Grid layout within the pattern view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub size: u8,
    pub width: f32,
    pub height: f32,
    pub hit_radius: f32,
}

impl GridGeometry {
    /// Relative hit radius: fraction of the smaller cell side
    const HIT_RADIUS_FRACTION: f32 = 0.35;

    pub fn new(size: u8, width: f32, height: f32) -> Self {
        let size = size.max(1);
        let cell = (width / f32::from(size)).min(height / f32::from(size));
        Self {
            size,
            width,
            height,
            hit_radius: cell * Self::HIT_RADIUS_FRACTION,
        }
    }

    pub fn node_count(&self) -> usize {
        usize::from(self.size) * usize::from(self.size)
    }

    /// Center of node `index` (row-major)
    pub fn node_center(&self, index: u8) -> Point {
        let size = f32::from(self.size);
        let row = f32::from(index / self.size);
        let col = f32::from(index % self.size);
        Point::new(
            (col + 0.5) * self.width / size,
            (row + 0.5) * self.height / size,
        )
    }

    /// Node whose hit circle contains `point`, if any
    pub fn node_at(&self, point: Point) -> Option<u8> {
        let radius_sq = self.hit_radius * self.hit_radius;
        (0..self.node_count())
            .filter_map(|i| u8::try_from(i).ok())
            .map(|i| (i, point.distance_sq(self.node_center(i))))
            .filter(|&(_, d)| d <= radius_sq)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

/// Drag-gesture pattern pad
pub struct PatternPad {
    geometry: GridGeometry,
    min_nodes: usize,
    selected: Vec<u8>,
    visited: Vec<bool>,
    dragging: bool,
    tracker: AttemptTracker,
    error: bool,
    accepted: bool,
}

impl PatternPad {
    pub fn new(geometry: GridGeometry, min_nodes: usize, tracker: AttemptTracker) -> Self {
        Self {
            min_nodes,
            selected: Vec::with_capacity(geometry.node_count()),
            visited: vec![false; geometry.node_count()],
            geometry,
            dragging: false,
            tracker,
            error: false,
            accepted: false,
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Nodes selected so far in this gesture
    pub fn selected(&self) -> &[u8] {
        &self.selected
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut AttemptTracker {
        &mut self.tracker
    }

    pub fn attempts(&self) -> u32 {
        self.tracker.failed_attempts()
    }

    /// Pointer down
    pub fn begin(&mut self, point: Point, now: TimestampMs) -> EntryOutcome {
        if self.accepted {
            return EntryOutcome::Ignored;
        }
        if let Some(remaining_ms) = self.tracker.locked_out_for(now) {
            return EntryOutcome::LockedOut { remaining_ms };
        }

        self.reset_gesture();
        self.error = false;
        self.dragging = true;
        self.visit(point);
        EntryOutcome::Pending
    }

    /// Pointer moved
    pub fn drag(&mut self, point: Point) -> EntryOutcome {
        if !self.dragging {
            return EntryOutcome::Ignored;
        }
        self.visit(point);
        EntryOutcome::Pending
    }

    /// Pointer up: judge the gesture
    pub fn release<F>(&mut self, now: TimestampMs, verify: F) -> EntryOutcome
    where
        F: FnOnce(&[u8]) -> bool,
    {
        if !self.dragging {
            return EntryOutcome::Ignored;
        }
        self.dragging = false;

        if self.selected.len() < self.min_nodes {
            let cooldown_ms = self.fail(now);
            return EntryOutcome::TooShort {
                attempts_remaining: self.tracker.attempts_remaining(),
                cooldown_ms,
            };
        }

        if verify(&self.selected) {
            self.tracker.record_success();
            self.accepted = true;
            EntryOutcome::Accepted
        } else {
            let cooldown_ms = self.fail(now);
            EntryOutcome::Rejected {
                attempts_remaining: self.tracker.attempts_remaining(),
                cooldown_ms,
            }
        }
    }

    /// Replay a whole gesture: down at the first point, up after the last
    pub fn gesture<F>(&mut self, points: &[Point], now: TimestampMs, verify: F) -> EntryOutcome
    where
        F: FnOnce(&[u8]) -> bool,
    {
        let Some((&first, rest)) = points.split_first() else {
            return EntryOutcome::Ignored;
        };

        let outcome = self.begin(first, now);
        if outcome != EntryOutcome::Pending {
            return outcome;
        }
        for &point in rest {
            self.drag(point);
        }
        self.release(now, verify)
    }

    fn visit(&mut self, point: Point) {
        if let Some(node) = self.geometry.node_at(point) {
            let index = usize::from(node);
            if !self.visited[index] {
                self.visited[index] = true;
                self.selected.push(node);
            }
        }
    }

    fn fail(&mut self, now: TimestampMs) -> Option<u64> {
        let cooldown = self.tracker.record_failure(now);
        self.error = true;
        self.reset_gesture();
        cooldown
    }

    fn reset_gesture(&mut self) {
        self.selected.zeroize();
        self.visited.fill(false);
    }
}
