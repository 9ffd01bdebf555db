//! Priority request queues
//!
//! Two physical FIFO queues: High, and Normal/Low sharing one. Pairs are
//! inserted at the head and serviced from the tail, so order within a
//! priority class is first-in first-out; High drains completely before
//! the shared queue is touched. `requeue` puts a pair back at the service
//! end so a retried exchange goes out next.

use std::collections::VecDeque;

use crate::http::{Priority, Reply, Request};

/// One queued (request, reply) pair.
pub struct InFlight {
    pub request: Request,
    pub reply: Reply,
    /// Challenge-retry counter for this exchange.
    pub auth_retries: u8,
}

impl InFlight {
    #[must_use]
    pub fn new(request: Request, reply: Reply) -> Self {
        Self {
            request,
            reply,
            auth_retries: 0,
        }
    }
}

#[derive(Default)]
pub struct RequestQueues {
    high: VecDeque<InFlight>,
    low: VecDeque<InFlight>,
}

impl RequestQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&mut self, priority: Priority) -> &mut VecDeque<InFlight> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal | Priority::Low => &mut self.low,
        }
    }

    /// Append a new pair (insert at head; service happens at the tail).
    pub fn enqueue(&mut self, pair: InFlight) {
        let priority = pair.request.priority();
        self.queue_for(priority).push_front(pair);
    }

    /// Put a pair back so it is serviced next within its class.
    pub fn requeue(&mut self, pair: InFlight) {
        let priority = pair.request.priority();
        self.queue_for(priority).push_back(pair);
    }

    /// Next pair to dispatch; High drains fully first.
    pub fn dequeue(&mut self) -> Option<InFlight> {
        self.high.pop_back().or_else(|| self.low.pop_back())
    }

    /// Next pipeline-eligible pair, searched from the service end of the
    /// High queue and then the shared queue.
    pub fn dequeue_pipeline_candidate(&mut self) -> Option<InFlight> {
        for queue in [&mut self.high, &mut self.low] {
            if let Some(pos) = queue
                .iter()
                .rev()
                .position(|pair| pair.request.is_pipeline_eligible())
            {
                let index = queue.len() - 1 - pos;
                return queue.remove(index);
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    /// Remove a specific reply's pair, wherever it is queued.
    pub fn remove(&mut self, reply: &Reply) -> Option<InFlight> {
        for queue in [&mut self.high, &mut self.low] {
            if let Some(pos) = queue.iter().position(|pair| pair.reply.same_reply(reply)) {
                return queue.remove(pos);
            }
        }
        None
    }

    /// Drain every queued pair, failing callers during teardown paths.
    pub fn drain(&mut self) -> Vec<InFlight> {
        self.high.drain(..).chain(self.low.drain(..)).collect()
    }
}
