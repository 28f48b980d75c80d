use std::collections::VecDeque;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::queue::Event;
use super::{Flow, System};

/*
    One event loop per process. Events are handled strictly one at a time,
    in arrival order, so no abstraction ever needs a lock. Network listeners
    and timers only ever push onto the queue.

    Destroying the system drains the queue up to the next hub lifecycle
    event: whatever was queued before it belongs to the session that just
    ended. From that event on, everything stays in order in a backlog that
    is served before the channel, except local events, which can only have
    come from the destroyed session.
*/

pub struct EventProcessor {
    system: System,
    events: UnboundedReceiver<Event>,
    backlog: VecDeque<Event>,
    shutdown: CancellationToken,
    stopped: bool,
}

impl EventProcessor {
    pub fn new(system: System, events: UnboundedReceiver<Event>, shutdown: CancellationToken) -> Self {
        EventProcessor {
            system,
            events,
            backlog: VecDeque::new(),
            shutdown,
            stopped: false,
        }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub async fn run(mut self) {
        tracing::info!(process = %self.system.process_id(), "event loop started");
        while !self.stopped && !self.shutdown.is_cancelled() {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    event = self.events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                },
            };
            self.handle(event);
        }
        self.system.shutdown();
        tracing::info!(process = %self.system.process_id(), "event loop stopped");
    }

    /// Handles whatever is queued right now, up to `limit` events, without
    /// waiting for more. Returns how many were handled.
    pub fn process_pending(&mut self, limit: usize) -> usize {
        let mut handled = 0;
        while handled < limit && !self.stopped {
            let Some(event) = self.next_pending() else {
                break;
            };
            self.handle(event);
            handled += 1;
        }
        handled
    }

    fn next_pending(&mut self) -> Option<Event> {
        self.backlog.pop_front().or_else(|| self.events.try_recv().ok())
    }

    fn handle(&mut self, event: Event) {
        match self.system.handle_event(event) {
            Flow::Continue => {}
            Flow::Drain => self.drain(),
            Flow::Stop => self.stopped = true,
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.backlog.push_back(event);
        }
        let before = self.backlog.len();
        let stale = self.backlog.iter().position(Event::ends_drain).unwrap_or(before);
        self.backlog.drain(..stale);
        self.backlog.retain(|event| !matches!(event, Event::Local(_)));
        tracing::debug!(
            process = %self.system.process_id(),
            dropped = before - self.backlog.len(),
            kept = self.backlog.len(),
            "queue drained"
        );
    }
}
