//! The Scheduling & Response Core: the time-ordered agenda of pending
//! responses, the per-command response sequencer, and the scheduler that
//! dispatches both against a real clock while an independent transport
//! injects commands and lookups concurrently.

pub mod agenda;
pub mod error;
pub mod manager;
pub mod response;
pub mod script;
pub mod scheduler;
pub mod value;

pub use agenda::{Agenda, CallerId, MessageKind, ResponseMessage};
pub use error::SimError;
pub use manager::{CommandResponseManager, Dispatch, ManagerState, ResponseManagerMap};
pub use response::{ResponseEntry, Uses};
pub use scheduler::{CommRelay, Scheduler};
pub use script::ScriptReader;
pub use value::{ReturnValue, ValueType};
