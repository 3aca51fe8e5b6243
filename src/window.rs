//! Bounded history of recent probe cycles.

use crate::probe::{ProbeCycleResult, Protocol, Sample};

use std::collections::VecDeque;
use std::time::Duration;

/// FIFO of the most recent probe cycles, oldest first.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    cycles: VecDeque<ProbeCycleResult>,
}

impl SlidingWindow {
    /// Create an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            cycles: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a cycle, evicting the oldest entries beyond capacity.
    pub fn push(&mut self, cycle: ProbeCycleResult) {
        self.cycles.push_back(cycle);
        while self.cycles.len() > self.capacity {
            self.cycles.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// The most recently pushed cycle.
    pub fn latest(&self) -> Option<&ProbeCycleResult> {
        self.cycles.back()
    }

    pub fn cycles(&self) -> impl Iterator<Item = &ProbeCycleResult> {
        self.cycles.iter()
    }

    /// Every sample held, in acquisition order.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.cycles.iter().flat_map(|c| c.samples())
    }

    /// Successful latencies for one protocol, in acquisition order.
    pub fn latencies(&self, protocol: Protocol) -> Vec<Duration> {
        self.cycles
            .iter()
            .flat_map(|c| match protocol {
                Protocol::Udp => c.udp_samples.iter(),
                Protocol::Http => c.http_samples.iter(),
            })
            .filter_map(Sample::latency)
            .collect()
    }
}
