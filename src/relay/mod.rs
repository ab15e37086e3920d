//! Reference `CommRelay` adapter over a line-oriented TCP connection.
//!
//! The wire format here is not fixed by the core's contract (`sim::scheduler::CommRelay`
//! only dictates the trait boundary); this module exists so the binary can
//! be run end-to-end against a real peer. Each line in is `CMD <name>
//! <caller-id>` or `LOOKUP <name> <caller-id>`; each line out is one
//! JSON-encoded [`sim::ResponseMessage`].

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::sim::{CallerId, CommRelay, MessageKind, ResponseMessage, ReturnValue, Scheduler};

/// JSON-friendly mirror of [`ResponseMessage`]; the core's type is kept
/// transport-agnostic, so this adapter owns its own wire representation.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    name: String,
    value: ReturnValue,
    kind: &'static str,
    caller_id: String,
}

impl From<ResponseMessage> for WireMessage {
    fn from(msg: ResponseMessage) -> Self {
        let kind = match msg.kind {
            MessageKind::CommandReply => "COMMAND_REPLY",
            MessageKind::Telemetry => "TELEMETRY",
            MessageKind::LookupReply => "LOOKUP_REPLY",
        };
        Self {
            name: msg.name,
            value: msg.value,
            kind,
            caller_id: msg.caller_id.0,
        }
    }
}

/// `serde` needs `ReturnValue` to implement `Serialize`/`Deserialize`; done
/// here rather than on the core type itself, by hand-writing a small
/// tagged-enum shim, so the core crate stays free of a hard `serde`
/// dependency on its primary value type. See the manual impls below.
mod return_value_wire {
    use super::ReturnValue;
    use serde::de::{self, Deserializer, MapAccess, Visitor};
    use serde::ser::{SerializeMap, Serializer};
    use std::fmt;

    impl serde::Serialize for ReturnValue {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(1))?;
            match self {
                ReturnValue::Unknown => map.serialize_entry("unknown", &true)?,
                ReturnValue::Boolean(b) => map.serialize_entry("boolean", b)?,
                ReturnValue::Integer(i) => map.serialize_entry("integer", i)?,
                ReturnValue::Real(r) => map.serialize_entry("real", r)?,
                ReturnValue::String(s) => map.serialize_entry("string", s)?,
                ReturnValue::BooleanArray(v) => map.serialize_entry("booleanArray", v)?,
                ReturnValue::IntegerArray(v) => map.serialize_entry("integerArray", v)?,
                ReturnValue::RealArray(v) => map.serialize_entry("realArray", v)?,
                ReturnValue::StringArray(v) => map.serialize_entry("stringArray", v)?,
            }
            map.end()
        }
    }

    struct ReturnValueVisitor;

    impl<'de> Visitor<'de> for ReturnValueVisitor {
        type Value = ReturnValue;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a single-key object naming a ReturnValue variant")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let key: String = map
                .next_key()?
                .ok_or_else(|| de::Error::custom("empty ReturnValue object"))?;
            Ok(match key.as_str() {
                "unknown" => {
                    let _: bool = map.next_value()?;
                    ReturnValue::Unknown
                }
                "boolean" => ReturnValue::Boolean(map.next_value()?),
                "integer" => ReturnValue::Integer(map.next_value()?),
                "real" => ReturnValue::Real(map.next_value()?),
                "string" => ReturnValue::String(map.next_value()?),
                "booleanArray" => ReturnValue::BooleanArray(map.next_value()?),
                "integerArray" => ReturnValue::IntegerArray(map.next_value()?),
                "realArray" => ReturnValue::RealArray(map.next_value()?),
                "stringArray" => ReturnValue::StringArray(map.next_value()?),
                other => return Err(de::Error::unknown_variant(other, &[])),
            })
        }
    }

    impl<'de> serde::Deserialize<'de> for ReturnValue {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_map(ReturnValueVisitor)
        }
    }
}

/// Line-oriented request/response `CommRelay` over a TCP client connection
/// to `-central host:port`. Reads incoming command/lookup lines
/// and writes outgoing [`ResponseMessage`]s as JSON lines.
pub struct LineRelay {
    writer: Mutex<tokio::io::WriteHalf<TcpStream>>,
}

impl LineRelay {
    /// Connects to `addr` and returns the relay plus a future that drives
    /// the read loop against `scheduler` until the connection closes.
    pub async fn connect(
        addr: &str,
        scheduler: Arc<Scheduler>,
    ) -> std::io::Result<(Arc<Self>, impl std::future::Future<Output = ()>)> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let relay = Arc::new(Self {
            writer: Mutex::new(write_half),
        });
        let reader_task = read_loop(read_half, scheduler, relay.clone());
        Ok((relay, reader_task))
    }
}

#[async_trait]
impl CommRelay for LineRelay {
    async fn send_response(&self, msg: ResponseMessage) {
        let wire = WireMessage::from(msg);
        let line = match serde_json::to_string(&wire) {
            Ok(l) => l,
            Err(e) => {
                warn!("LineRelay: failed to encode response: {e}");
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("LineRelay: write failed: {e}");
            return;
        }
        let _ = writer.write_all(b"\n").await;
    }
}

async fn read_loop(read_half: tokio::io::ReadHalf<TcpStream>, scheduler: Arc<Scheduler>, relay: Arc<LineRelay>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&line, &scheduler, &relay).await,
            Ok(None) => {
                info!("LineRelay: peer closed connection");
                return;
            }
            Err(e) => {
                warn!("LineRelay: read error: {e}");
                return;
            }
        }
    }
}

async fn handle_line(line: &str, scheduler: &Arc<Scheduler>, relay: &Arc<LineRelay>) {
    let mut fields = line.split_whitespace();
    let Some(verb) = fields.next() else { return };
    let Some(name) = fields.next() else {
        warn!("LineRelay: missing name in \"{line}\"");
        return;
    };
    let caller_id = CallerId::new(fields.next().unwrap_or("anonymous"));

    match verb {
        "CMD" => scheduler.schedule_command_response(name, caller_id).await,
        "LOOKUP" => {
            // The lookup reply is synchronous rather than agenda-scheduled;
            // deliver it the same way agenda dispatches are, via the relay.
            if let Some(reply) = scheduler.answer_lookup_now(name, caller_id).await {
                relay.send_response(reply).await;
            }
        }
        other => warn!("LineRelay: unrecognized verb \"{other}\" in \"{line}\""),
    }
}
