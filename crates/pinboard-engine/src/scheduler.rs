//! Flush scheduling with debounce.
//!
//! A mutation arms a per-org deadline a short delay out; edits that
//! land before it fires push it further out, so a burst of typing
//! becomes one flush. A retry lane can arm a longer deadline after a
//! failed pass, and a later debounce never pulls that deadline back
//! in. Going offline disarms everything at once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use pinboard_core::OrgId;

pub struct FlushScheduler {
    /// Debounce delay for the ordinary mutation lane.
    debounce: Duration,

    /// Armed deadline per org. This map is authoritative.
    deadlines: HashMap<OrgId, Instant>,

    /// Min-heap mirror of `deadlines` for cheap earliest-first reads.
    /// Superseded entries linger until scrubbed against the map.
    order: BinaryHeap<Reverse<(Instant, OrgId)>>,
}

impl FlushScheduler {
    pub fn new(debounce: Duration) -> Self {
        FlushScheduler {
            debounce,
            deadlines: HashMap::new(),
            order: BinaryHeap::new(),
        }
    }

    /// Arm (or push out) the debounced deadline for an org.
    pub fn schedule(&mut self, org: OrgId) {
        let debounce = self.debounce;
        self.arm(org, Instant::now() + debounce);
    }

    /// Arm a deadline a specific delay out, for the retry lane.
    pub fn schedule_after(&mut self, org: OrgId, delay: Duration) {
        self.arm(org, Instant::now() + delay);
    }

    /// Deadlines only ever move later; an armed deadline past the
    /// candidate stays where it is.
    fn arm(&mut self, org: OrgId, candidate: Instant) {
        let armed = match self.deadlines.get(&org) {
            Some(existing) => candidate.max(*existing),
            None => candidate,
        };
        if self.deadlines.get(&org) == Some(&armed) {
            return;
        }
        self.deadlines.insert(org.clone(), armed);
        self.order.push(Reverse((armed, org)));
    }

    /// Earliest armed deadline across all orgs.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.scrub();
        self.order.peek().map(|Reverse((at, _))| *at)
    }

    /// Take every org whose deadline has passed, earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<OrgId> {
        let mut due = Vec::new();
        loop {
            self.scrub();
            let Some(Reverse((at, _))) = self.order.peek() else {
                break;
            };
            if *at > now {
                break;
            }
            if let Some(Reverse((_, org))) = self.order.pop() {
                self.deadlines.remove(&org);
                due.push(org);
            }
        }
        due
    }

    /// Disarm every deadline, e.g. when connectivity drops.
    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
        self.order.clear();
    }

    /// Drop heap entries the map no longer agrees with, so the head is
    /// always a live deadline.
    fn scrub(&mut self) {
        while let Some(Reverse((at, org))) = self.order.peek() {
            if self.deadlines.get(org) == Some(at) {
                break;
            }
            let _ = self.order.pop();
        }
    }
}
