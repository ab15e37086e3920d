//! Per-command-name response sequencer.

use std::collections::BTreeMap;
use std::collections::HashMap;

use log::warn;
use tokio::sync::Mutex;

use super::response::ResponseEntry;

/// Outcome of asking a [`CommandResponseManager`] for the next response.
#[derive(Debug)]
pub enum Dispatch {
    /// A usable entry was found and its use count consumed.
    Entry(ResponseEntry),
    /// An entry was found for this invocation but it has no uses left.
    Exhausted,
    /// No indexed entry matched this invocation and there is no default.
    NoMatchingResponse,
}

/// Lifecycle state of a [`CommandResponseManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Never invoked.
    Fresh,
    /// At least one response has been dispatched.
    InUse,
    /// Every entry (indexed and default) is exhausted.
    Exhausted,
}

/// Per command name: maps invocation index to [`ResponseEntry`], with an
/// optional default entry and a monotonic call counter.
#[derive(Debug)]
pub struct CommandResponseManager {
    identifier: String,
    indexed_entries: BTreeMap<u32, ResponseEntry>,
    default_entry: Option<ResponseEntry>,
    call_count: u64,
}

impl CommandResponseManager {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            indexed_entries: BTreeMap::new(),
            default_entry: None,
            call_count: 1,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Register a response at the given script index. Index `0` sets the
    /// default entry. Duplicate registrations for the same index are
    /// warned once and dropped.
    pub fn add_response(&mut self, entry: ResponseEntry, index: u32) {
        if index == 0 {
            if self.default_entry.is_some() {
                warn!(
                    "CommandResponseManager({}): duplicate default entry (index 0), ignoring",
                    self.identifier
                );
                return;
            }
            self.default_entry = Some(entry);
            return;
        }
        if self.indexed_entries.contains_key(&index) {
            warn!(
                "CommandResponseManager({}): command index {} has been repeated, ignoring",
                self.identifier, index
            );
            return;
        }
        self.indexed_entries.insert(index, entry);
    }

    /// Consult the indexed entry for the current call count, falling back
    /// to the default; always advance the counter; consume one use from
    /// whichever entry was found.
    pub fn next_response(&mut self) -> Dispatch {
        let k = self.call_count;
        self.call_count += 1;

        // `k` is u64 starting at 1; script indices are declared as u32, so a
        // counter that outgrows u32 simply never matches an indexed entry
        // again and falls through to the default, which is the desired
        // "ran out of scripted indices" behavior.
        let indexed = u32::try_from(k).ok().and_then(|k32| self.indexed_entries.get_mut(&k32));

        let entry = match indexed {
            Some(e) => Some(e),
            None => self.default_entry.as_mut(),
        };

        match entry {
            None => Dispatch::NoMatchingResponse,
            Some(e) => {
                if e.try_consume() {
                    Dispatch::Entry(e.clone())
                } else {
                    Dispatch::Exhausted
                }
            }
        }
    }

    /// Current lifecycle state, derived from the manager's entries rather
    /// than tracked redundantly.
    pub fn state(&self) -> ManagerState {
        if self.call_count == 1 {
            return ManagerState::Fresh;
        }
        let default_done = self
            .default_entry
            .as_ref()
            .map(|e| e.remaining_uses.is_exhausted())
            .unwrap_or(true);
        let all_indexed_done = self
            .indexed_entries
            .values()
            .all(|e| e.remaining_uses.is_exhausted());
        if default_done && all_indexed_done {
            ManagerState::Exhausted
        } else {
            ManagerState::InUse
        }
    }
}

/// Mapping from command name to its [`CommandResponseManager`]; owned by the
/// Scheduler, populated by the ScriptReader before `start()`, and not
/// mutated thereafter — entries are never added or removed once the
/// scheduler is running, so the map itself needs no lock. Each manager is
/// still wrapped in its own mutex because `next_response` mutates the
/// manager's call counter and per-entry use counts, and any number of I/O
/// tasks may call into the same command's manager concurrently.
pub type ResponseManagerMap = HashMap<String, Mutex<CommandResponseManager>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::response::Uses;
    use crate::sim::value::ReturnValue;
    use std::time::Duration;

    fn entry(v: i64, uses: Uses) -> ResponseEntry {
        ResponseEntry::new("move", ReturnValue::Integer(v), Duration::ZERO, uses)
    }

    #[test]
    fn indexed_responses_in_order() {
        let mut mgr = CommandResponseManager::new("move");
        mgr.add_response(entry(42, Uses::Finite(1)), 1);
        mgr.add_response(entry(43, Uses::Finite(1)), 2);

        match mgr.next_response() {
            Dispatch::Entry(e) => assert_eq!(e.value, ReturnValue::Integer(42)),
            other => panic!("expected entry, got {other:?}"),
        }
        match mgr.next_response() {
            Dispatch::Entry(e) => assert_eq!(e.value, ReturnValue::Integer(43)),
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[test]
    fn default_covers_unmatched_indices() {
        let mut mgr = CommandResponseManager::new("ping");
        mgr.add_response(entry(1, Uses::Unlimited), 0);
        for _ in 0..3 {
            match mgr.next_response() {
                Dispatch::Entry(e) => assert_eq!(e.value, ReturnValue::Integer(1)),
                other => panic!("expected default entry, got {other:?}"),
            }
        }
    }

    #[test]
    fn exhaustion_then_silence() {
        let mut mgr = CommandResponseManager::new("ping");
        mgr.add_response(entry(1, Uses::Finite(1)), 1);
        assert!(matches!(mgr.next_response(), Dispatch::Entry(_)));
        assert!(matches!(mgr.next_response(), Dispatch::NoMatchingResponse));
        assert_eq!(mgr.state(), ManagerState::Exhausted);
    }

    #[test]
    fn duplicate_index_keeps_first_registration() {
        let mut mgr = CommandResponseManager::new("move");
        mgr.add_response(entry(1, Uses::Finite(5)), 1);
        mgr.add_response(entry(999, Uses::Finite(5)), 1);
        match mgr.next_response() {
            Dispatch::Entry(e) => assert_eq!(e.value, ReturnValue::Integer(1)),
            other => panic!("expected first registration, got {other:?}"),
        }
    }

    #[test]
    fn state_transitions_fresh_to_in_use_to_exhausted() {
        let mut mgr = CommandResponseManager::new("ping");
        mgr.add_response(entry(1, Uses::Finite(1)), 1);
        assert_eq!(mgr.state(), ManagerState::Fresh);
        mgr.next_response();
        assert_eq!(mgr.state(), ManagerState::Exhausted);
    }
}
