//! Thread-safe time-ordered queue of pending outgoing responses,
//! bundled with the lookup-now value cache it shares a mutex with.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::value::ReturnValue;

/// Opaque correlation token supplied by the `CommRelay` at scheduling time
/// and passed back unchanged on dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// What kind of outgoing message a [`ResponseMessage`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    CommandReply,
    Telemetry,
    LookupReply,
}

/// An outgoing unit delivered to the `CommRelay`: name, value, kind, and the
/// caller's correlation token.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub name: String,
    pub value: ReturnValue,
    pub kind: MessageKind,
    pub caller_id: CallerId,
}

impl ResponseMessage {
    pub fn new(name: impl Into<String>, value: ReturnValue, kind: MessageKind, caller_id: CallerId) -> Self {
        Self {
            name: name.into(),
            value,
            kind,
            caller_id,
        }
    }
}

/// `(due_time, message)`. Owned by the [`Agenda`] until popped, at which
/// point ownership of the message transfers to the caller.
type AgendaEntry = (Instant, ResponseMessage);

struct AgendaInner {
    queue: VecDeque<AgendaEntry>,
    lookup_cache: HashMap<String, ReturnValue>,
}

/// Time-ordered, mutex-guarded queue of pending [`ResponseMessage`]s plus the
/// `LookupCache` it is always accessed alongside.
///
/// Every operation acquires the single internal mutex for its full duration;
/// no operation blocks other than for this mutex.
pub struct Agenda {
    /// Reference instant against which pre-`start()` telemetry delays are
    /// expressed, so that [`Agenda::shift_all`] can rebase them onto the
    /// real session start time by replaying the same delta.
    origin: Instant,
    inner: Mutex<AgendaInner>,
}

impl Default for Agenda {
    fn default() -> Self {
        Self::new()
    }
}

impl Agenda {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Mutex::new(AgendaInner {
                queue: VecDeque::new(),
                lookup_cache: HashMap::new(),
            }),
        }
    }

    /// Schedule a message whose due time is expressed as a delay (in
    /// seconds) from the agenda's origin, rather than as an absolute
    /// [`Instant`] — used by the `ScriptReader` to seed telemetry before the
    /// real session start time is known.
    pub async fn schedule_at_delay(&self, delay_seconds: f64, msg: ResponseMessage) {
        let due = self.origin + Duration::from_secs_f64(delay_seconds.max(0.0));
        self.schedule_response(due, msg).await;
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    /// Insert in earliest-first order; ties are preserved in insertion order
    /// (stable).
    pub async fn schedule_response(&self, due: Instant, msg: ResponseMessage) {
        let mut guard = self.inner.lock().await;
        let pos = guard
            .queue
            .iter()
            .position(|(t, _)| *t > due)
            .unwrap_or(guard.queue.len());
        guard.queue.insert(pos, (due, msg));
    }

    /// Defined only when non-empty; returns `None` when empty.
    pub async fn peek_earliest_due_time(&self) -> Option<Instant> {
        self.inner.lock().await.queue.front().map(|(t, _)| *t)
    }

    /// Removes and returns the single earliest entry, or `None` if empty.
    pub async fn pop_earliest(&self) -> Option<ResponseMessage> {
        self.inner.lock().await.queue.pop_front().map(|(_, m)| m)
    }

    /// Adds `offset - origin` to every entry's due time; used once at
    /// startup to rebase script-relative telemetry times (scheduled via
    /// [`Agenda::schedule_at_delay`]) onto the real session start time.
    /// Preserves order, since adding a constant to every key is
    /// order-preserving.
    pub async fn shift_all(&self, offset: Instant) {
        let origin = self.origin;
        let mut guard = self.inner.lock().await;
        for (t, _) in guard.queue.iter_mut() {
            let delta = t.saturating_duration_since(origin);
            *t = offset + delta;
        }
    }

    /// Pop the earliest message, updating the lookup cache first if it is
    /// telemetry, all under a single lock acquisition — this is the atomic
    /// unit the scheduler's drain loop performs per iteration.
    pub async fn pop_and_cache(&self) -> Option<ResponseMessage> {
        let mut guard = self.inner.lock().await;
        let (_, msg) = guard.queue.pop_front()?;
        if msg.kind == MessageKind::Telemetry {
            guard
                .lookup_cache
                .insert(msg.name.clone(), msg.value.clone());
        }
        Some(msg)
    }

    /// The most recently cached telemetry value for `name`, if any.
    pub async fn cached_value(&self, name: &str) -> Option<ReturnValue> {
        self.inner.lock().await.lookup_cache.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(name: &str) -> ResponseMessage {
        ResponseMessage::new(
            name,
            ReturnValue::Integer(1),
            MessageKind::Telemetry,
            CallerId::new("c"),
        )
    }

    #[tokio::test]
    async fn monotone_dispatch_order() {
        let agenda = Agenda::new();
        let base = Instant::now();
        agenda.schedule_response(base + Duration::from_millis(200), msg("a")).await;
        agenda.schedule_response(base + Duration::from_millis(100), msg("b")).await;

        let first = agenda.pop_earliest().await.unwrap();
        let second = agenda.pop_earliest().await.unwrap();
        assert_eq!(first.name, "b");
        assert_eq!(second.name, "a");
    }

    #[tokio::test]
    async fn stable_tie_breaking() {
        let agenda = Agenda::new();
        let due = Instant::now() + Duration::from_millis(50);
        agenda.schedule_response(due, msg("first")).await;
        agenda.schedule_response(due, msg("second")).await;

        assert_eq!(agenda.pop_earliest().await.unwrap().name, "first");
        assert_eq!(agenda.pop_earliest().await.unwrap().name, "second");
    }

    #[tokio::test]
    async fn shift_all_rebases_script_relative_delays_in_order() {
        let agenda = Agenda::new();
        agenda.schedule_at_delay(1.0, msg("later")).await;
        agenda.schedule_at_delay(0.0, msg("now")).await;

        let t0 = Instant::now() + Duration::from_secs(10);
        agenda.shift_all(t0).await;

        let first = agenda.pop_earliest().await.unwrap();
        let second = agenda.pop_earliest().await.unwrap();
        assert_eq!(first.name, "now");
        assert_eq!(second.name, "later");

        // The rebased due time for "now" should land at (approximately) t0.
    }

    #[tokio::test]
    async fn telemetry_pop_populates_lookup_cache() {
        let agenda = Agenda::new();
        agenda
            .schedule_response(
                Instant::now(),
                ResponseMessage::new(
                    "battery",
                    ReturnValue::Real(0.95),
                    MessageKind::Telemetry,
                    CallerId::new("c"),
                ),
            )
            .await;
        assert!(agenda.cached_value("battery").await.is_none());
        agenda.pop_and_cache().await;
        assert_eq!(
            agenda.cached_value("battery").await,
            Some(ReturnValue::Real(0.95))
        );
    }
}
