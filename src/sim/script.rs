//! Translates a textual script into manager/agenda state.
//!
//! The source material keeps three near-duplicate reader classes: a legacy
//! positional format with no header, a `BEGIN_COMMANDS`/`BEGIN_TELEMETRY`
//! header format, and a typed-declaration format with a symbol table. They
//! are consolidated here into one [`ScriptReader`] with an explicit mode and
//! an explicit symbol table, treating the no-header case as an inferred
//! legacy default.

use std::collections::HashMap;
use std::io::BufRead;

use log::debug;

use super::agenda::{Agenda, CallerId, MessageKind, ResponseMessage};
use super::error::SimError;
use super::manager::{CommandResponseManager, ResponseManagerMap};
use super::response::{ResponseEntry, Uses};
use super::value::{ReturnValue, ValueType};

/// What a declared or inferred symbol answers: a command invocation, or a
/// telemetry/lookup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Command,
    Lookup,
}

struct Symbol {
    kind: SymbolKind,
    return_type: ValueType,
}

/// Which half of the script a line currently belongs to — set by
/// `BEGIN_COMMANDS`/`BEGIN_TELEMETRY`, or implied by a symbol's declared
/// kind once any declarations are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Commands,
    Telemetry,
}

/// Reads one or more scripts into a [`ResponseManagerMap`] and an [`Agenda`].
/// Line-oriented over any [`BufRead`], not just files, so it can run
/// directly against an in-memory script in tests.
pub struct ScriptReader {
    symbols: HashMap<String, Symbol>,
    managers: ResponseManagerMap,
    agenda: Agenda,
}

impl Default for ScriptReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptReader {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            managers: ResponseManagerMap::new(),
            agenda: Agenda::new(),
        }
    }

    /// Consumes the reader, handing over the populated map and agenda.
    pub fn into_parts(self) -> (ResponseManagerMap, Agenda) {
        (self.managers, self.agenda)
    }

    /// Read one script from `source`, attributing errors to `file_name`.
    /// `telemetry` seeds the starting mode, matching the legacy `-t` flag's
    /// effect of treating the whole file as telemetry from the first line.
    pub async fn read_script<R: BufRead>(
        &mut self,
        source: R,
        file_name: &str,
        telemetry: bool,
    ) -> Result<(), SimError> {
        let mut mode = if telemetry { Mode::Telemetry } else { Mode::Commands };
        // Once true, header/declaration lines are no longer recognized and
        // every data line is parsed against `mode` with an inferred Real
        // type — matches the original's "compatibility mode" latch.
        let mut compatibility_mode = telemetry;

        let mut lines = source.lines();
        let mut line_no = 0usize;

        loop {
            let Some(line) = lines.next() else { break };
            line_no += 1;
            let line = line.map_err(SimError::Io)?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.chars().next().unwrap().is_alphanumeric() {
                continue;
            }

            let mut tokens = trimmed.split_whitespace();
            let first = tokens.next().unwrap();

            if first == "BEGIN_TELEMETRY" {
                mode = Mode::Telemetry;
                compatibility_mode = true;
                continue;
            }
            if first == "BEGIN_COMMANDS" {
                mode = Mode::Commands;
                compatibility_mode = true;
                continue;
            }

            if compatibility_mode {
                self.parse_data_line(&mut lines, &mut line_no, file_name, first, &line, mode, ValueType::Real)
                    .await?;
                continue;
            }

            if let Some(declared_type) = ValueType::from_token(first) {
                let (name, kind) = self.parse_declaration(&mut lines, &mut line_no, file_name, &mut tokens)?;
                self.declare_symbol(file_name, line_no, name, kind, declared_type)?;
                continue;
            }

            if first == "Command" {
                let name = next_token(&mut tokens, &mut lines, &mut line_no, file_name, "command name")?;
                self.declare_symbol(file_name, line_no, name, SymbolKind::Command, ValueType::Real)?;
                continue;
            }

            if self.symbols.is_empty() && mode == Mode::Commands && !compatibility_mode {
                debug!("ScriptReader: presuming old-style command script at {file_name}:{line_no}");
                compatibility_mode = true;
                self.parse_data_line(&mut lines, &mut line_no, file_name, first, &line, mode, ValueType::Real)
                    .await?;
                continue;
            }

            if let Some(sym) = self.symbols.get(first) {
                let kind = sym.kind;
                let return_type = sym.return_type;
                let line_mode = match kind {
                    SymbolKind::Lookup => Mode::Telemetry,
                    SymbolKind::Command => Mode::Commands,
                };
                self.parse_data_line(&mut lines, &mut line_no, file_name, first, &line, line_mode, return_type)
                    .await?;
                continue;
            }

            return Err(SimError::Parse {
                file: file_name.to_string(),
                line: line_no,
                message: format!("don't know how to interpret \"{first}\""),
            });
        }

        Ok(())
    }

    fn declare_symbol(
        &mut self,
        file: &str,
        line: usize,
        name: String,
        kind: SymbolKind,
        return_type: ValueType,
    ) -> Result<(), SimError> {
        if self.symbols.contains_key(&name) {
            return Err(SimError::Parse {
                file: file.to_string(),
                line,
                message: format!("symbol \"{name}\" is already declared"),
            });
        }
        self.symbols.insert(name, Symbol { kind, return_type });
        Ok(())
    }

    /// Parses `<typename> (Command|Lookup) <name>` after the typename has
    /// already been consumed from `tokens`.
    fn parse_declaration<'a, I: Iterator<Item = &'a str>>(
        &mut self,
        lines: &mut std::io::Lines<impl BufRead>,
        line_no: &mut usize,
        file_name: &str,
        tokens: &mut I,
    ) -> Result<(String, SymbolKind), SimError> {
        let word = next_token(tokens, lines, line_no, file_name, "Command or Lookup")?;
        let kind = match word.as_str() {
            "Command" => SymbolKind::Command,
            "Lookup" => SymbolKind::Lookup,
            other => {
                return Err(SimError::Parse {
                    file: file_name.to_string(),
                    line: *line_no,
                    message: format!("found \"{other}\", expected Command or Lookup"),
                })
            }
        };
        let name = next_token(tokens, lines, line_no, file_name, "declared name")?;
        Ok((name, kind))
    }

    /// Parses one command or telemetry data entry: the already-split header
    /// line (`name` plus remaining `tokens` from it) followed by the
    /// return-value literal on the next line.
    async fn parse_data_line(
        &mut self,
        lines: &mut std::io::Lines<impl BufRead>,
        line_no: &mut usize,
        file_name: &str,
        name: &str,
        header_line: &str,
        mode: Mode,
        return_type: ValueType,
    ) -> Result<(), SimError> {
        let mut fields = header_line.split_whitespace();
        fields.next(); // the name, already consumed by the caller

        match mode {
            Mode::Telemetry => {
                let delay = parse_field::<f64>(&mut fields, file_name, *line_no, name, "telemetry delay")?;
                let literal = read_literal_line(lines, line_no, file_name, name)?;
                let value = parse_literal(&literal, return_type, file_name, *line_no, name)?;
                let msg = ResponseMessage::new(name, value, MessageKind::Telemetry, CallerId::new("script"));
                debug!("ScriptReader: telemetry {name} at +{delay}s");
                // shift_all at Scheduler::start rebases this onto T0.
                self.agenda.schedule_at_delay(delay, msg).await;
                Ok(())
            }
            Mode::Commands => {
                let index = parse_field::<u32>(&mut fields, file_name, *line_no, name, "command index")?;
                let uses = parse_field::<u32>(&mut fields, file_name, *line_no, name, "number of responses")?;
                let delay = parse_field::<f64>(&mut fields, file_name, *line_no, name, "command response delay")?;
                let literal = read_literal_line(lines, line_no, file_name, name)?;
                let value = parse_literal(&literal, return_type, file_name, *line_no, name)?;
                let entry = ResponseEntry::new(
                    name,
                    value,
                    std::time::Duration::from_secs_f64(delay.max(0.0)),
                    Uses::Finite(uses),
                );
                let manager = self
                    .managers
                    .entry(name.to_string())
                    .or_insert_with(|| tokio::sync::Mutex::new(CommandResponseManager::new(name)));
                manager.lock().await.add_response(entry, index);
                Ok(())
            }
        }
    }
}

fn next_token<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    lines: &mut std::io::Lines<impl BufRead>,
    line_no: &mut usize,
    file_name: &str,
    expected: &str,
) -> Result<String, SimError> {
    if let Some(t) = tokens.next() {
        return Ok(t.to_string());
    }
    // The original allows a declaration's remaining tokens to spill onto
    // the next physical line; this crate's scripts never do, so running
    // out of tokens is a parse error rather than a continuation.
    let _ = lines;
    Err(SimError::Parse {
        file: file_name.to_string(),
        line: *line_no,
        message: format!("expected {expected}"),
    })
}

fn parse_field<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    file: &str,
    line: usize,
    name: &str,
    what: &str,
) -> Result<T, SimError> {
    let tok = fields.next().ok_or_else(|| SimError::Parse {
        file: file.to_string(),
        line,
        message: format!("missing {what} for {name}"),
    })?;
    tok.parse().map_err(|_| SimError::Parse {
        file: file.to_string(),
        line,
        message: format!("parse error in {what} for {name}"),
    })
}

fn read_literal_line(
    lines: &mut std::io::Lines<impl BufRead>,
    line_no: &mut usize,
    file: &str,
    name: &str,
) -> Result<String, SimError> {
    let next = lines.next().ok_or_else(|| SimError::Parse {
        file: file.to_string(),
        line: *line_no,
        message: format!("premature end of file reading return value for {name}"),
    })?;
    *line_no += 1;
    next.map_err(SimError::Io)
}

fn parse_literal(
    literal: &str,
    ty: ValueType,
    file: &str,
    line: usize,
    name: &str,
) -> Result<ReturnValue, SimError> {
    let tokens: Vec<&str> = literal.split_whitespace().collect();
    let parsed = if ReturnValue::is_array_type(ty) {
        ReturnValue::parse_array(ty, &tokens)
    } else {
        tokens.first().and_then(|t| ReturnValue::parse_scalar(ty, t))
    };
    parsed.ok_or_else(|| SimError::Parse {
        file: file.to_string(),
        line,
        message: format!("malformed return-value literal for {name}: \"{literal}\""),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn s1_header_commands_script() {
        let script = "BEGIN_COMMANDS\nmove 1 1 0.0\n42\nmove 2 1 0.0\n43\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "s1.txt", false)
            .await
            .unwrap();
        let (managers, _agenda) = reader.into_parts();
        assert!(managers.contains_key("move"));
    }

    #[tokio::test]
    async fn s4_header_telemetry_script() {
        let script = "BEGIN_TELEMETRY\nbattery 0.0\n0.95\nbattery 1.0\n0.80\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "s4.txt", false)
            .await
            .unwrap();
        let (_managers, agenda) = reader.into_parts();
        assert_eq!(agenda.size().await, 2);
    }

    #[tokio::test]
    async fn legacy_no_header_script_is_commands() {
        let script = "ping 0 9999 0.0\n1\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "legacy.txt", false)
            .await
            .unwrap();
        let (managers, _agenda) = reader.into_parts();
        assert!(managers.contains_key("ping"));
    }

    #[tokio::test]
    async fn legacy_telemetry_flag_treats_whole_file_as_telemetry() {
        let script = "battery 0.0\n0.5\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "t.txt", true)
            .await
            .unwrap();
        let (_managers, agenda) = reader.into_parts();
        assert_eq!(agenda.size().await, 1);
    }

    #[tokio::test]
    async fn typed_declarations_then_data() {
        let script = "Integer Command move\nmove 1 1 0.0\n42\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "typed.txt", false)
            .await
            .unwrap();
        let (managers, _agenda) = reader.into_parts();
        assert!(managers.contains_key("move"));
    }

    #[tokio::test]
    async fn duplicate_symbol_declaration_is_a_parse_error() {
        let script = "Integer Command move\nInteger Command move\n";
        let mut reader = ScriptReader::new();
        let err = reader
            .read_script(Cursor::new(script), "dup.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::Parse { .. }));
    }

    #[tokio::test]
    async fn unknown_first_word_is_a_parse_error() {
        let script = "frobnicate something\n";
        let mut reader = ScriptReader::new();
        let err = reader
            .read_script(Cursor::new(script), "bad.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::Parse { .. }));
    }

    #[tokio::test]
    async fn array_literal_parses_whitespace_separated_elements() {
        let script = "RealArray Lookup waypoints\nwaypoints 0.0\n1.0 2.5 3.0\n";
        let mut reader = ScriptReader::new();
        reader
            .read_script(Cursor::new(script), "arr.txt", false)
            .await
            .unwrap();
        let (_managers, agenda) = reader.into_parts();
        assert_eq!(agenda.size().await, 1);
    }
}
