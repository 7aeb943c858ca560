//! Round-robin polling scheduler with timeout-based loss detection.
//!
//! One poll is in flight at a time. A tick either does nothing (a remote
//! request is still within its deadline), issues the next request, or
//! abandons a timed-out request and issues the next one in the same tick.
//! Abandonment never retries the same device within the cycle; loss causes
//! forward progress, so a window of `N × deadline` bounds the worst case
//! no matter how many devices are unresponsive. The trade-off is that a
//! merely slow device is counted as lost.
//!
//! The scheduler performs no IO. It returns [`TickEvent`]s and the server
//! executes them, which keeps the state machine directly testable.

use tokio::time::{Duration, Instant};

use super::registry::{DeviceRegistry, GATEWAY_ID};

/// Scheduler timing, typically sourced from Config.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Deadline for a remote poll reply.
    pub poll_timeout: Duration,
    /// Relaxed window armed when a device registers, so a joining device is
    /// neither instantly polled nor instantly counted lost.
    pub registration_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(400),
            registration_grace: Duration::from_millis(1500),
        }
    }
}

/// Who the next request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTarget {
    /// The gateway itself: pulled synchronously, no deadline.
    Local,
    /// A leaf: a token broadcast with an armed deadline.
    Remote { id: u16, identity: u32 },
}

/// What a tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// The in-flight request passed its deadline and was abandoned.
    Lost { id: u16, identity: u32 },
    /// Issue a request to this target.
    Issue(PollTarget),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u16,
    identity: u32,
    deadline: Instant,
}

#[derive(Debug)]
pub struct PollScheduler {
    cursor: u16,
    in_flight: Option<InFlight>,
    deferred_until: Option<Instant>,
    losses: u64,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            cursor: GATEWAY_ID,
            in_flight: None,
            deferred_until: None,
            losses: 0,
            config,
        }
    }

    /// Advance the state machine. Safe to call more often than necessary:
    /// a tick inside a pending deadline or a grace window is a no-op.
    pub fn on_tick(&mut self, registry: &DeviceRegistry, now: Instant) -> Vec<TickEvent> {
        let mut events = Vec::with_capacity(2);

        if let Some(until) = self.deferred_until {
            if now < until {
                return events;
            }
            self.deferred_until = None;
        }

        if let Some(fl) = self.in_flight {
            if now < fl.deadline {
                return events; // receive path will complete it
            }
            // Abandon and advance: one atomic step, the timed-out device is
            // not retried this cycle.
            self.losses += 1;
            self.in_flight = None;
            events.push(TickEvent::Lost {
                id: fl.id,
                identity: fl.identity,
            });
        }

        events.push(TickEvent::Issue(self.advance(registry, now)));
        events
    }

    fn advance(&mut self, registry: &DeviceRegistry, now: Instant) -> PollTarget {
        let entry = registry.next_active_after(self.cursor);
        self.cursor = entry.id;
        if entry.id == GATEWAY_ID {
            PollTarget::Local
        } else {
            self.in_flight = Some(InFlight {
                id: entry.id,
                identity: entry.identity,
                deadline: now + self.config.poll_timeout,
            });
            PollTarget::Remote {
                id: entry.id,
                identity: entry.identity,
            }
        }
    }

    /// Terminator received from `identity`. Clears the in-flight request if
    /// it matches; a stray late reply from anyone else is a harmless no-op.
    pub fn complete(&mut self, identity: u32) -> bool {
        match self.in_flight {
            Some(fl) if fl.identity == identity => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// A device (re)registered: defer the next request and relax any armed
    /// deadline so the join traffic cannot produce a spurious loss.
    pub fn note_registration(&mut self, now: Instant) {
        let until = now + self.config.registration_grace;
        self.deferred_until = Some(until);
        if let Some(fl) = &mut self.in_flight {
            if fl.deadline < until {
                fl.deadline = until;
            }
        }
    }

    /// Monotonic count of abandoned polls. Never resets.
    pub fn losses(&self) -> u64 {
        self.losses
    }

    /// The currently awaited (id, identity), if a remote poll is in flight.
    pub fn in_flight(&self) -> Option<(u16, u32)> {
        self.in_flight.map(|fl| (fl.id, fl.identity))
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::DeviceRegistry;

    fn fixture() -> (DeviceRegistry, PollScheduler) {
        let mut reg = DeviceRegistry::new(1);
        reg.register(100); // id 1
        reg.register(200); // id 2
        let sched = PollScheduler::new(SchedulerConfig {
            poll_timeout: Duration::from_millis(400),
            registration_grace: Duration::from_millis(1500),
        });
        (reg, sched)
    }

    #[test]
    fn visits_devices_in_cyclic_order() {
        let (reg, mut sched) = fixture();
        let t0 = Instant::now();
        let mut order = Vec::new();
        for i in 0..6 {
            let events = sched.on_tick(&reg, t0 + Duration::from_millis(i * 10));
            assert_eq!(events.len(), 1);
            match events[0] {
                TickEvent::Issue(PollTarget::Local) => {
                    order.push(0);
                }
                TickEvent::Issue(PollTarget::Remote { id, identity }) => {
                    order.push(id);
                    assert!(sched.complete(identity));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(order, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn tick_within_deadline_is_noop() {
        let (reg, mut sched) = fixture();
        let t0 = Instant::now();
        assert_eq!(sched.on_tick(&reg, t0).len(), 1);
        assert!(sched.on_tick(&reg, t0 + Duration::from_millis(100)).is_empty());
        assert!(sched.in_flight().is_some());
    }

    #[test]
    fn timeout_abandons_and_advances_in_one_tick() {
        let (reg, mut sched) = fixture();
        let t0 = Instant::now();
        sched.on_tick(&reg, t0); // issue to id 1
        let events = sched.on_tick(&reg, t0 + Duration::from_millis(500));
        assert_eq!(sched.losses(), 1);
        assert_eq!(
            events[0],
            TickEvent::Lost {
                id: 1,
                identity: 100
            }
        );
        assert_eq!(
            events[1],
            TickEvent::Issue(PollTarget::Remote {
                id: 2,
                identity: 200
            })
        );
    }

    #[test]
    fn stray_late_reply_is_harmless() {
        let (reg, mut sched) = fixture();
        let t0 = Instant::now();
        sched.on_tick(&reg, t0); // in flight: id 1
        assert!(!sched.complete(200), "reply from the wrong device ignored");
        assert!(sched.in_flight().is_some());
        assert!(sched.complete(100));
        assert!(sched.in_flight().is_none());
    }

    #[test]
    fn registration_grace_defers_loss_and_next_poll() {
        let (mut reg, mut sched) = fixture();
        let t0 = Instant::now();
        sched.on_tick(&reg, t0); // in flight: id 1, deadline t0+400
        reg.register(300);
        sched.note_registration(t0 + Duration::from_millis(390));
        // Just past the original deadline: grace holds, no loss.
        let events = sched.on_tick(&reg, t0 + Duration::from_millis(450));
        assert!(events.is_empty());
        assert_eq!(sched.losses(), 0);
        // After the grace window the deadline applies again.
        let events = sched.on_tick(&reg, t0 + Duration::from_millis(2000));
        assert_eq!(sched.losses(), 1);
        assert!(matches!(events[0], TickEvent::Lost { id: 1, .. }));
    }
}
