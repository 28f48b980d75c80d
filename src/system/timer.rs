use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::common::{AbstractionId, Message};

use super::queue::EventQueue;

/// Posts messages back onto a process's own queue after a delay.
///
/// At most one timer is pending per target abstraction: scheduling again
/// replaces the previous one.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration, message: Message);

    fn cancel_all(&mut self);
}

pub struct TokioScheduler {
    queue: EventQueue,
    pending: HashMap<AbstractionId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(queue: EventQueue) -> Self {
        TokioScheduler {
            queue,
            pending: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.values().filter(|handle| !handle.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, message: Message) {
        let target = message.to_abstraction_id.clone();
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !queue.trigger(message) {
                tracing::trace!("event loop gone, timer dropped");
            }
        });
        if let Some(previous) = self.pending.insert(target, handle) {
            previous.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Payload;
    use crate::system::queue::Event;

    fn timeout(target: &str) -> Message {
        let id = AbstractionId::from(target);
        Message::new("sys", id.clone(), id, Payload::EpfdTimeout)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (queue, mut rx) = EventQueue::channel();
        let mut scheduler = TokioScheduler::new(queue);
        scheduler.schedule(Duration::from_millis(100), timeout("app.epfd"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        match rx.try_recv() {
            Ok(Event::Local(message)) => assert_eq!(message.payload, Payload::EpfdTimeout),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let (queue, mut rx) = EventQueue::channel();
        let mut scheduler = TokioScheduler::new(queue);
        scheduler.schedule(Duration::from_millis(100), timeout("app.epfd"));
        scheduler.schedule(Duration::from_millis(300), timeout("app.epfd"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (queue, mut rx) = EventQueue::channel();
        let mut scheduler = TokioScheduler::new(queue);
        scheduler.schedule(Duration::from_millis(100), timeout("a.epfd"));
        scheduler.schedule(Duration::from_millis(100), timeout("b.epfd"));
        assert_eq!(scheduler.pending(), 2);

        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending(), 0);
    }
}
