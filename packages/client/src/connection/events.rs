//! Posted work and timers
//!
//! Only the initiating `send_request` call may run dispatch synchronously.
//! Every other trigger (socket readiness, completions, requeues) posts a
//! task here; the drive loop drains the queue after state mutation, which
//! keeps user callbacks from re-entering the engine mid-update.

use std::collections::VecDeque;
use std::time::Instant;

/// Deferred engine work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Post {
    /// Run a dispatch round.
    Dispatch,
    /// Continue streaming an upload on one channel.
    ResumeUpload(usize),
    /// Re-run response parsing on a channel with buffered bytes.
    ProcessReceived(usize),
}

#[derive(Debug, Default)]
pub struct PostQueue {
    tasks: VecDeque<Post>,
}

impl PostQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, post: Post) {
        // Collapse duplicate dispatch requests; one round covers them all.
        if post == Post::Dispatch && self.tasks.contains(&Post::Dispatch) {
            return;
        }
        self.tasks.push_back(post);
    }

    pub fn pop(&mut self) -> Option<Post> {
        self.tasks.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// What a timer firing means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Start the delayed (non-preferred) address family's connect race.
    DelayedFamilyRace,
}

#[derive(Debug, Default)]
pub struct Timers {
    entries: Vec<(TimerKind, Instant)>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, deadline: Instant) {
        self.cancel(kind);
        self.entries.push((kind, deadline));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.entries.retain(|(k, _)| *k != kind);
    }

    /// Pop every timer whose deadline has passed.
    pub fn due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        self.entries.retain(|(kind, deadline)| {
            if *deadline <= now {
                fired.push(*kind);
                false
            } else {
                true
            }
        });
        fired
    }

    #[must_use]
    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.entries.iter().any(|(k, _)| *k == kind)
    }
}
