//! The scheduler loop: single owner of the [`Wheel`], driven by a timer
//! and a control channel.
//!
//! The loop extracts the soonest event, fires due events by handing their
//! payload to the runner over an mpsc (execution never blocks
//! scheduling), asks the recurrence collaborator for the next occurrence,
//! and re-holds the event. When the soonest event is not yet due it
//! blocks on a single `select!` over the timer and the control channel,
//! so table reloads and shutdown can preempt an arbitrarily long wait.
//! Wheel mutations only ever happen on this task.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::arena::EventId;
use crate::clock::Clock;
use crate::wheel::Wheel;

/// After a firing, the next occurrence is searched from one cron tick
/// past the firing instant so the same minute never matches twice.
pub const RESCHEDULE_GRACE_SECS: i64 = 60;

/// Recurrence collaborator: next absolute fire time for `payload` at or
/// after the given instant, or `None` when the schedule is exhausted.
pub type NextOccurrence<P> = Box<dyn Fn(&P, i64) -> Option<i64> + Send>;

/// One due event, handed to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing<P> {
    pub payload: P,
    pub fire_time: i64,
}

/// Mutations serialized into the loop's wait point.
pub enum ControlMsg<P> {
    /// Replace the whole pending set (job table reload). Entries are
    /// `(first_fire_time, payload)`.
    Replace(Vec<(i64, P)>),
    Shutdown,
}

pub struct SchedulerLoop<P, C> {
    wheel: Wheel<P>,
    clock: C,
    next_occurrence: NextOccurrence<P>,
    fire_tx: mpsc::Sender<Firing<P>>,
    control_rx: mpsc::Receiver<ControlMsg<P>>,
}

impl<P, C> SchedulerLoop<P, C>
where
    P: Clone + Send + 'static,
    C: Clock,
{
    pub fn new(
        wheel: Wheel<P>,
        clock: C,
        next_occurrence: NextOccurrence<P>,
        fire_tx: mpsc::Sender<Firing<P>>,
        control_rx: mpsc::Receiver<ControlMsg<P>>,
    ) -> Self {
        Self {
            wheel,
            clock,
            next_occurrence,
            fire_tx,
            control_rx,
        }
    }

    /// Enqueue initial events before the loop starts.
    pub fn seed(&mut self, entries: Vec<(i64, P)>) {
        for (t, payload) in entries {
            let ev = self.wheel.new_event(t, payload);
            self.wheel.hold(ev, 0);
        }
    }

    /// Run until shutdown. Consumes the loop; the wheel dies with it.
    pub async fn run(mut self) {
        info!(pending = self.wheel.len(), "scheduler loop started");
        loop {
            let Some(ev) = self.wheel.remove_min() else {
                if !self.wheel.is_empty() {
                    // Pending events are parked beyond the visible
                    // window; slide the window until they surface.
                    let orphans = self.wheel.advance_window();
                    for orphan in orphans {
                        self.wheel.hold(orphan, 0);
                    }
                    continue;
                }
                // Nothing scheduled at all: park on the control channel.
                match self.control_rx.recv().await {
                    Some(ControlMsg::Shutdown) | None => break,
                    Some(msg) => {
                        self.apply(msg);
                        continue;
                    }
                }
            };

            if !self.wait_and_fire(ev).await {
                break;
            }
        }
        info!("scheduler loop stopped");
    }

    /// Hold the extracted minimum until it is due, then fire it.
    /// Returns `false` on shutdown.
    async fn wait_and_fire(&mut self, ev: EventId) -> bool {
        loop {
            let now = self.clock.now();
            let fire_time = self.wheel.fire_time(ev);
            if fire_time <= now {
                self.fire(ev, now).await;
                return true;
            }

            let wait = Duration::from_secs((fire_time - now) as u64);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    // Jitter or an early wake must not fire a job before
                    // its time: loop around and re-check the clock.
                }
                msg = self.control_rx.recv() => {
                    // Park the in-hand event before mutating anything.
                    self.wheel.hold(ev, 0);
                    match msg {
                        Some(ControlMsg::Shutdown) | None => return false,
                        Some(m) => {
                            self.apply(m);
                            return true;
                        }
                    }
                }
            }
        }
    }

    async fn fire(&mut self, ev: EventId, now: i64) {
        let fire_time = self.wheel.fire_time(ev);
        let Some(payload) = self.wheel.payload(ev).cloned() else {
            self.wheel.retire(ev);
            return;
        };

        debug!(fire_time, now, "dispatching event");
        if self
            .fire_tx
            .send(Firing {
                payload: payload.clone(),
                fire_time,
            })
            .await
            .is_err()
        {
            warn!("runner channel closed, firing dropped");
        }

        // Rescheduling runs regardless of what happened to the dispatch:
        // a failing job must keep recurring.
        match (self.next_occurrence)(&payload, now + RESCHEDULE_GRACE_SECS) {
            Some(next) => self.wheel.hold(ev, next - fire_time),
            None => {
                debug!(fire_time, "schedule exhausted, retiring event");
                self.wheel.retire(ev);
            }
        }
    }

    fn apply(&mut self, msg: ControlMsg<P>) {
        match msg {
            ControlMsg::Replace(entries) => {
                info!(jobs = entries.len(), "replacing scheduled event set");
                self.wheel.reset(self.clock.now());
                self.seed(entries);
            }
            ControlMsg::Shutdown => {}
        }
    }
}
