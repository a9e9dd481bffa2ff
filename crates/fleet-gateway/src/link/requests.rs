//! Request correlation for one homebase link.
//!
//! The table is owned exclusively by the link's supervisor task (single
//! writer), so plain collections suffice. Requests wait in a bounded queue
//! until an in-flight slot frees; each in-flight request holds a oneshot
//! continuation and a deadline swept by the supervisor.

use crate::domain::error::LinkError;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Continuation for an eval call.
pub type EvalReply = oneshot::Sender<Result<Value, LinkError>>;

/// A request accepted but not yet written to the socket.
pub struct QueuedRequest {
    pub script: String,
    pub timeout: Duration,
    pub reply: EvalReply,
    pub enqueued_at: Instant,
}

struct InFlight {
    reply: EvalReply,
    deadline: Instant,
    timeout: Duration,
}

/// Bounded queue + in-flight correlation table.
pub struct RequestTable {
    pending: HashMap<String, InFlight>,
    queue: VecDeque<QueuedRequest>,
    max_in_flight: usize,
    max_queue: usize,
}

impl RequestTable {
    pub fn new(max_in_flight: usize, max_queue: usize) -> Self {
        Self {
            pending: HashMap::new(),
            queue: VecDeque::new(),
            max_in_flight,
            max_queue,
        }
    }

    /// Accept a request into the wait queue.
    ///
    /// Over-capacity submissions fail immediately with `QueueFull` on the
    /// caller's reply channel and are never queued.
    pub fn submit(&mut self, script: String, timeout: Duration, reply: EvalReply) {
        if self.queue.len() >= self.max_queue {
            let _ = reply.send(Err(LinkError::QueueFull));
            return;
        }
        self.queue.push_back(QueuedRequest {
            script,
            timeout,
            reply,
            enqueued_at: Instant::now(),
        });
    }

    /// Pop the next request once an in-flight slot is available.
    ///
    /// The caller writes the frame and then calls [`track`](Self::track);
    /// popping and tracking are separate so a failed socket write can fail
    /// the request instead of leaking a slot.
    pub fn pop_ready(&mut self) -> Option<QueuedRequest> {
        if self.pending.len() < self.max_in_flight {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Track a request that was just written to the socket.
    pub fn track(&mut self, request_id: String, request: QueuedRequest, now: Instant) {
        self.pending.insert(
            request_id,
            InFlight {
                reply: request.reply,
                deadline: now + request.timeout,
                timeout: request.timeout,
            },
        );
    }

    /// Complete an in-flight request; unknown ids (late responses after a
    /// timeout already fired) return false.
    pub fn complete(&mut self, request_id: &str, result: Result<Value, LinkError>) -> bool {
        match self.pending.remove(request_id) {
            Some(inflight) => {
                // Receiver may have been dropped by an abandoned caller
                let _ = inflight.reply.send(result);
                true
            }
            None => {
                warn!(request_id, "Response for unknown or expired request id");
                false
            }
        }
    }

    /// Expire requests past their deadline, both in flight and still queued.
    ///
    /// Returns the number expired; freed slots let the caller drain the
    /// queue afterwards.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, r)| now >= r.deadline)
            .map(|(id, _)| id.clone())
            .collect();

        let mut count = expired.len();
        for id in expired {
            if let Some(inflight) = self.pending.remove(&id) {
                debug!(request_id = %id, "Request deadline expired");
                let _ = inflight
                    .reply
                    .send(Err(LinkError::Timeout(inflight.timeout.as_millis() as u64)));
            }
        }

        // Queued requests age out on the same clock
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        for queued in self.queue.drain(..) {
            if now.duration_since(queued.enqueued_at) >= queued.timeout {
                count += 1;
                let timeout_ms = queued.timeout.as_millis() as u64;
                let _ = queued.reply.send(Err(LinkError::Timeout(timeout_ms)));
            } else {
                remaining.push_back(queued);
            }
        }
        self.queue = remaining;

        count
    }

    /// Fail everything on link teardown.
    pub fn reject_all(&mut self, error: LinkError) {
        for (_, inflight) in self.pending.drain() {
            let _ = inflight.reply.send(Err(error.clone()));
        }
        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(Err(error.clone()));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> RequestTable {
        RequestTable::new(8, 200)
    }

    fn submit(table: &mut RequestTable, script: &str) -> oneshot::Receiver<Result<Value, LinkError>> {
        let (tx, rx) = oneshot::channel();
        table.submit(script.into(), Duration::from_secs(10), tx);
        rx
    }

    #[test]
    fn test_resolve_in_flight() {
        let mut t = table();
        let mut rx = submit(&mut t, "pump_voltage");
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, Instant::now());
        assert_eq!(t.in_flight(), 1);

        assert!(t.complete("R1", Ok(json!("3.3"))));
        assert_eq!(t.in_flight(), 0);
        assert_eq!(rx.try_recv().unwrap(), Ok(json!("3.3")));
    }

    #[test]
    fn test_reject_with_remote_error() {
        let mut t = table();
        let mut rx = submit(&mut t, "bad");
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, Instant::now());

        assert!(t.complete("R1", Err(LinkError::Remote("bad script".into()))));
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(LinkError::Remote("bad script".into()))
        );
    }

    #[test]
    fn test_unknown_id_ignored() {
        let mut t = table();
        assert!(!t.complete("nope", Ok(Value::Null)));
    }

    #[test]
    fn test_in_flight_cap() {
        let mut t = RequestTable::new(2, 200);
        let _rxs: Vec<_> = (0..5).map(|i| submit(&mut t, &format!("s{}", i))).collect();

        let now = Instant::now();
        let mut sent = 0;
        while let Some(req) = t.pop_ready() {
            t.track(format!("R{}", sent), req, now);
            sent += 1;
        }
        assert_eq!(sent, 2);
        assert_eq!(t.in_flight(), 2);
        assert_eq!(t.queued(), 3);

        // Completing one frees exactly one slot
        t.complete("R0", Ok(Value::Null));
        assert!(t.pop_ready().is_some());
        assert!(t.pop_ready().is_none());
    }

    #[test]
    fn test_queue_overflow_fails_synchronously() {
        let mut t = RequestTable::new(1, 2);
        let _rx0 = submit(&mut t, "a");
        let _rx1 = submit(&mut t, "b");
        let mut rx2 = submit(&mut t, "c");
        assert_eq!(t.queued(), 2);
        assert_eq!(rx2.try_recv().unwrap(), Err(LinkError::QueueFull));
    }

    #[test]
    fn test_sweep_expires_in_flight_and_queued() {
        let mut t = RequestTable::new(1, 10);
        let (tx1, mut rx1) = oneshot::channel();
        t.submit("a".into(), Duration::from_millis(5), tx1);
        let (tx2, mut rx2) = oneshot::channel();
        t.submit("b".into(), Duration::from_millis(5), tx2);

        let now = Instant::now();
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, now);

        let expired = t.sweep(now + Duration::from_millis(50));
        assert_eq!(expired, 2);
        assert_eq!(t.in_flight(), 0);
        assert_eq!(t.queued(), 0);
        assert!(matches!(rx1.try_recv().unwrap(), Err(LinkError::Timeout(_))));
        assert!(matches!(rx2.try_recv().unwrap(), Err(LinkError::Timeout(_))));
    }

    #[test]
    fn test_sweep_keeps_live_requests() {
        let mut t = table();
        let _rx = submit(&mut t, "a");
        let now = Instant::now();
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, now);

        assert_eq!(t.sweep(now + Duration::from_secs(1)), 0);
        assert_eq!(t.in_flight(), 1);
    }

    #[test]
    fn test_late_response_after_timeout_is_unknown() {
        let mut t = table();
        let (tx, _rx) = oneshot::channel();
        t.submit("a".into(), Duration::from_millis(1), tx);
        let now = Instant::now();
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, now);
        t.sweep(now + Duration::from_secs(1));

        // The entry was deleted atomically with the timeout
        assert!(!t.complete("R1", Ok(Value::Null)));
    }

    #[test]
    fn test_reject_all_on_teardown() {
        let mut t = table();
        let mut rx_pending = submit(&mut t, "a");
        let req = t.pop_ready().unwrap();
        t.track("R1".into(), req, Instant::now());
        let mut rx_queued = submit(&mut t, "b");

        t.reject_all(LinkError::LinkClosed);
        assert_eq!(rx_pending.try_recv().unwrap(), Err(LinkError::LinkClosed));
        assert_eq!(rx_queued.try_recv().unwrap(), Err(LinkError::LinkClosed));
        assert_eq!(t.in_flight(), 0);
        assert_eq!(t.queued(), 0);
    }

    #[test]
    fn test_out_of_order_responses() {
        let mut t = table();
        let mut rx_a = submit(&mut t, "a");
        let mut rx_b = submit(&mut t, "b");
        let now = Instant::now();
        let req = t.pop_ready().unwrap();
        t.track("RA".into(), req, now);
        let req = t.pop_ready().unwrap();
        t.track("RB".into(), req, now);

        // Responses arrive in reverse order; matching is purely by id
        t.complete("RB", Ok(json!(2)));
        t.complete("RA", Ok(json!(1)));
        assert_eq!(rx_a.try_recv().unwrap(), Ok(json!(1)));
        assert_eq!(rx_b.try_recv().unwrap(), Ok(json!(2)));
    }
}
