//! Ordered request/response matching.
//!
//! A [`Dispatcher`] holds the outgoing queue of one connection. At most one
//! request is on the wire at a time: the next packet is only released once the
//! previous one was answered, so the server sees commands in exactly the order
//! the queue drains them. Responses are matched to requests purely by that
//! order, as the wire format carries no request ids.

use std::collections::VecDeque;

use tracing::debug;

use crate::protocol::{Packet, Response};

/// One queued request and whatever should receive its reply.
#[derive(Debug)]
pub struct Pending<R> {
    /// The request.
    pub packet: Packet,
    /// Reply routing, opaque to the dispatcher.
    pub reply: R,
}

/// Result of feeding a response into [`Dispatcher::resolve`].
#[derive(Debug)]
pub enum Resolution<R> {
    /// The response answers the in-flight request.
    Matched(Pending<R>, Response),
    /// The response answers a request that was flushed while on the wire.
    Stale(Response),
    /// Nothing was waiting for a response.
    Unsolicited(Response),
}

/// FIFO request queue with front-of-queue priority and a single in-flight slot.
#[derive(Debug)]
pub struct Dispatcher<R> {
    queue: VecDeque<Pending<R>>,
    in_flight: Option<Pending<R>>,
    /// Flushed requests that are still on the wire; their replies are discarded.
    stale: usize,
}

impl<R> Default for Dispatcher<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Dispatcher<R> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            stale: 0,
        }
    }

    /// Queue a packet. With `do_next` it goes to the front of the queue,
    /// ahead of everything not yet sent, otherwise to the back.
    pub fn enqueue(&mut self, packet: Packet, reply: R, do_next: bool) {
        let pending = Pending { packet, reply };
        if do_next {
            self.queue.push_front(pending);
        } else {
            self.queue.push_back(pending);
        }
    }

    /// Move the next queued packet into the in-flight slot and return it for
    /// transmission. Returns `None` while a response is still awaited.
    pub fn begin_next(&mut self) -> Option<&Packet> {
        if self.in_flight.is_some() || self.stale > 0 {
            return None;
        }
        self.in_flight = self.queue.pop_front();
        self.in_flight.as_ref().map(|pending| &pending.packet)
    }

    /// Drop the in-flight request without expecting a reply. Used when the
    /// packet never made it onto the wire.
    pub fn abandon_in_flight(&mut self) -> Option<R> {
        self.in_flight.take().map(|pending| pending.reply)
    }

    /// Match an incoming response against the in-flight request.
    pub fn resolve(&mut self, response: Response) -> Resolution<R> {
        if self.stale > 0 {
            self.stale -= 1;
            return Resolution::Stale(response);
        }
        match self.in_flight.take() {
            Some(pending) => Resolution::Matched(pending, response),
            None => Resolution::Unsolicited(response),
        }
    }

    /// Discard every pending entry, sent or not, and return their reply
    /// handles so the caller can drop them without answering.
    ///
    /// A flushed in-flight request is remembered as stale: its late reply is
    /// swallowed by [`resolve`](Self::resolve) and nothing else is sent
    /// before it arrives.
    pub fn flush(&mut self) -> Vec<R> {
        let mut dropped = Vec::with_capacity(self.len());
        if let Some(pending) = self.in_flight.take() {
            self.stale += 1;
            dropped.push(pending.reply);
        }
        dropped.extend(self.queue.drain(..).map(|pending| pending.reply));
        debug!(dropped = dropped.len(), stale = self.stale, "flushed request queue");
        dropped
    }

    /// Number of requests queued or in flight.
    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    /// Returns `true` when nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while a request awaits its response.
    pub fn is_awaiting(&self) -> bool {
        self.in_flight.is_some() || self.stale > 0
    }
}
