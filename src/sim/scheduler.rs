//! Owns the background dispatch task, the deadline timer, and the bridge to
//! the external `CommRelay`.
//!
//! A single tokio task owns a time-ordered send queue and drains it against
//! a deadline: `tokio::time::sleep_until` stands in for a one-shot interval
//! timer, and a `tokio::sync::Notify` stands in for a condition variable
//! keyed to whichever due time is currently soonest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::logutil::escape_log;

use super::agenda::{Agenda, CallerId, MessageKind, ResponseMessage};
use super::error::SimError;
use super::manager::{Dispatch, ResponseManagerMap};

/// External collaborator that receives outgoing responses and is the source
/// of incoming commands/lookups. The core depends only on this trait; the
/// wire format on the other side of it is out of scope.
#[async_trait]
pub trait CommRelay: Send + Sync {
    /// Takes ownership of `msg`. Must not call back into
    /// [`Scheduler::schedule_command_response`] or
    /// [`Scheduler::answer_lookup_now`] synchronously in a way that could
    /// deadlock on the agenda lock — this method is never called while that
    /// lock is held.
    async fn send_response(&self, msg: ResponseMessage);
}

/// The Scheduling & Response Core's dispatch engine.
pub struct Scheduler {
    agenda: Arc<Agenda>,
    managers: Arc<ResponseManagerMap>,
    relay: Arc<dyn CommRelay>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(managers: ResponseManagerMap, agenda: Agenda, relay: Arc<dyn CommRelay>) -> Arc<Self> {
        Arc::new(Self {
            agenda: Arc::new(agenda),
            managers: Arc::new(managers),
            relay,
            notify: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Records session start time T0, rebases seeded telemetry onto it, and
    /// spawns the scheduler task. Fails if already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), SimError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SimError::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::Release);

        let t0 = Instant::now();
        self.agenda.shift_all(t0).await;

        let agenda = self.agenda.clone();
        let relay = self.relay.clone();
        let notify = self.notify.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(run_loop(agenda, relay, notify, shutdown));
        *self.task.lock().await = Some(handle);
        debug!("Scheduler: started at T0");
        Ok(())
    }

    /// Requests shutdown, cancels the outstanding wait, and waits for the
    /// task to finish. Idempotent.
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return; // already stopped, or never started
        };
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!("Scheduler: dispatch task panicked: {e}");
            }
        }
        self.started.store(false, Ordering::Release);
    }

    /// Called from an I/O thread/task on receipt of a command.
    pub async fn schedule_command_response(&self, name: &str, caller_id: CallerId) {
        let Some(manager_lock) = self.managers.get(name) else {
            debug!(
                "Scheduler: no response manager for command \"{}\", ignoring",
                escape_log(name)
            );
            return;
        };

        let dispatch = {
            let mut manager = manager_lock.lock().await;
            manager.next_response()
        };

        match dispatch {
            Dispatch::Entry(entry) => {
                let msg = ResponseMessage::new(
                    entry.name.clone(),
                    entry.value,
                    MessageKind::CommandReply,
                    caller_id,
                );
                let due = Instant::now() + entry.delay;
                self.agenda.schedule_response(due, msg).await;
                self.wake_for(due);
            }
            Dispatch::Exhausted => {
                debug!(
                    "Scheduler: command \"{}\" has no responses left, ignoring",
                    escape_log(name)
                );
            }
            Dispatch::NoMatchingResponse => {
                error!(
                    "Scheduler: command \"{}\" has no matching response and no default; ignoring",
                    escape_log(name)
                );
            }
        }
    }

    /// Called from an I/O thread/task on receipt of a lookup-now request.
    /// Returns `None` so the transport can answer "unknown" itself.
    pub async fn answer_lookup_now(&self, name: &str, caller_id: CallerId) -> Option<ResponseMessage> {
        let value = self.agenda.cached_value(name).await?;
        Some(ResponseMessage::new(
            name,
            value,
            MessageKind::LookupReply,
            caller_id,
        ))
    }

    /// Notify the dispatch task if `due` warrants an earlier wakeup than
    /// whatever it is currently waiting on. The task re-checks
    /// `peek_earliest_due_time` on every wakeup regardless, so a spurious
    /// notify only costs one extra lock/peek — always notifying is correct
    /// and simpler than tracking the currently-armed deadline separately.
    fn wake_for(&self, _due: Instant) {
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn agenda(&self) -> &Arc<Agenda> {
        &self.agenda
    }
}

/// The scheduler task's main loop.
async fn run_loop(
    agenda: Arc<Agenda>,
    relay: Arc<dyn CommRelay>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match agenda.peek_earliest_due_time().await {
            Some(due) if due <= Instant::now() => {
                drain_due_entries(&agenda, &relay, &shutdown).await;
            }
            Some(due) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = notify.notified() => {}
                }
            }
            None => {
                notify.notified().await;
            }
        }
    }
}

/// Loop while the agenda is non-empty and its earliest entry is due,
/// popping, caching telemetry, and dispatching each one.
async fn drain_due_entries(agenda: &Arc<Agenda>, relay: &Arc<dyn CommRelay>, shutdown: &Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        match agenda.peek_earliest_due_time().await {
            Some(due) if due <= Instant::now() => {}
            _ => return,
        }
        let Some(msg) = agenda.pop_and_cache().await else {
            return;
        };
        dispatch(relay, msg).await;
    }
}

/// Hands one message to the `CommRelay`, catching any panic so a single bad
/// send cannot take down the scheduler task.
async fn dispatch(relay: &Arc<dyn CommRelay>, msg: ResponseMessage) {
    let name = msg.name.clone();
    let outcome = std::panic::AssertUnwindSafe(relay.send_response(msg))
        .catch_unwind()
        .await;
    if let Err(panic) = outcome {
        error!(
            "Scheduler: CommRelay::send_response panicked while sending \"{}\": {panic:?}",
            escape_log(&name)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::manager::CommandResponseManager;
    use crate::sim::response::{ResponseEntry, Uses};
    use crate::sim::value::ReturnValue;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct RecordingRelay {
        tx: mpsc::UnboundedSender<ResponseMessage>,
    }

    #[async_trait]
    impl CommRelay for RecordingRelay {
        async fn send_response(&self, msg: ResponseMessage) {
            let _ = self.tx.send(msg);
        }
    }

    fn manager_map_with(name: &str, entries: Vec<(u32, ResponseEntry)>) -> ResponseManagerMap {
        let mut mgr = CommandResponseManager::new(name);
        for (idx, entry) in entries {
            mgr.add_response(entry, idx);
        }
        let mut map = ResponseManagerMap::new();
        map.insert(name.to_string(), Mutex::new(mgr));
        map
    }

    #[tokio::test]
    async fn s1_fixed_indexed_responses_in_order() {
        let entries = vec![
            (
                1,
                ResponseEntry::new("move", ReturnValue::Integer(42), Duration::ZERO, Uses::Finite(1)),
            ),
            (
                2,
                ResponseEntry::new("move", ReturnValue::Integer(43), Duration::ZERO, Uses::Finite(1)),
            ),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            manager_map_with("move", entries),
            Agenda::new(),
            Arc::new(RecordingRelay { tx }),
        );
        scheduler.start().await.unwrap();

        scheduler
            .schedule_command_response("move", CallerId::new("c1"))
            .await;
        scheduler
            .schedule_command_response("move", CallerId::new("c2"))
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.value, ReturnValue::Integer(42));
        assert_eq!(first.caller_id, CallerId::new("c1"));
        assert_eq!(second.value, ReturnValue::Integer(43));
        assert_eq!(second.caller_id, CallerId::new("c2"));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn s2_default_response_serves_every_invocation() {
        let entries = vec![(
            0,
            ResponseEntry::new("ping", ReturnValue::Integer(1), Duration::ZERO, Uses::Finite(9999)),
        )];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            manager_map_with("ping", entries),
            Agenda::new(),
            Arc::new(RecordingRelay { tx }),
        );
        scheduler.start().await.unwrap();

        for id in ["c1", "c2", "c3"] {
            scheduler
                .schedule_command_response("ping", CallerId::new(id))
                .await;
        }

        for id in ["c1", "c2", "c3"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.value, ReturnValue::Integer(1));
            assert_eq!(msg.caller_id, CallerId::new(id));
        }

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn s3_delay_ordering_b_before_a() {
        let entries_a = vec![(
            1,
            ResponseEntry::new(
                "A",
                ReturnValue::Integer(1),
                Duration::from_millis(200),
                Uses::Finite(1),
            ),
        )];
        let entries_b = vec![(
            1,
            ResponseEntry::new(
                "B",
                ReturnValue::Integer(2),
                Duration::from_millis(50),
                Uses::Finite(1),
            ),
        )];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut map = manager_map_with("A", entries_a);
        map.extend(manager_map_with("B", entries_b));
        let scheduler = Scheduler::new(map, Agenda::new(), Arc::new(RecordingRelay { tx }));
        scheduler.start().await.unwrap();

        scheduler
            .schedule_command_response("A", CallerId::new("ca"))
            .await;
        scheduler
            .schedule_command_response("B", CallerId::new("cb"))
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.name, "B");
        assert_eq!(second.name, "A");

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn s5_exhaustion_then_silence() {
        let entries = vec![(
            1,
            ResponseEntry::new("ping", ReturnValue::String("A".into()), Duration::ZERO, Uses::Finite(1)),
        )];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            manager_map_with("ping", entries),
            Agenda::new(),
            Arc::new(RecordingRelay { tx }),
        );
        scheduler.start().await.unwrap();

        scheduler
            .schedule_command_response("ping", CallerId::new("c1"))
            .await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.value, ReturnValue::String("A".into()));

        scheduler
            .schedule_command_response("ping", CallerId::new("c2"))
            .await;
        // No second message should ever arrive.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn s6_unknown_command_is_silently_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(ResponseManagerMap::new(), Agenda::new(), Arc::new(RecordingRelay { tx }));
        scheduler.start().await.unwrap();

        scheduler
            .schedule_command_response("foo", CallerId::new("c1"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn idempotent_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(ResponseManagerMap::new(), Agenda::new(), Arc::new(RecordingRelay { tx }));
        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.stop().await; // must not panic or hang
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(ResponseManagerMap::new(), Agenda::new(), Arc::new(RecordingRelay { tx }));
        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.start().await.unwrap();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn s8_thread_safety_n_threads_m_commands() {
        let mut map = ResponseManagerMap::new();
        for c in 0..3 {
            let name = format!("cmd{c}");
            let entries = vec![(
                0,
                ResponseEntry::new(&name, ReturnValue::Integer(c), Duration::ZERO, Uses::Unlimited),
            )];
            map.extend(manager_map_with(&name, entries));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(map, Agenda::new(), Arc::new(RecordingRelay { tx }));
        scheduler.start().await.unwrap();

        let received = Arc::new(StdMutex::new(0u32));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                for c in 0..3 {
                    scheduler
                        .schedule_command_response(&format!("cmd{c}"), CallerId::new(format!("t{t}c{c}")))
                        .await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for _ in 0..12 {
            rx.recv().await.unwrap();
            *received.lock().unwrap() += 1;
        }
        assert_eq!(*received.lock().unwrap(), 12);

        scheduler.stop().await;
    }
}
