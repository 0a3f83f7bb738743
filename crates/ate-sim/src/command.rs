//! Command recognition for simulated endpoints.
//!
//! The simulator understands command *categories*, not an instrument dialect:
//! IEEE 488.2 common commands, the SCPI error queue, trace dumps, measurements,
//! and generic setpoint set/query pairs. Anything else is unconfigured.

use crate::error::SimulationConfigError;

/// A recognised command.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    /// `*IDN?`
    Identify,
    /// `*RST`
    Reset,
    /// `*CLS`
    ClearStatus,
    /// `*OPC?`
    OperationCompleteQuery,
    /// `*OPC`, `*WAI`
    Synchronize,
    /// `*TST?`
    SelfTest,
    /// `SYST:ERR?`
    NextError,
    /// `TRAC:DATA?`, `WAV:DATA?`
    Trace,
    /// `READ?`, `FETC?` on the primary quantity.
    Read,
    /// `MEAS:<quantity>[:...]? [(@ch)]`
    Measure {
        /// Quantity header as sent.
        quantity: String,
        /// Channel, 1 when not given.
        channel: u32,
    },
    /// `[SOUR:]<quantity>? [(@ch)]`
    QuerySetpoint {
        /// Quantity header as sent.
        quantity: String,
        /// Channel.
        channel: u32,
    },
    /// `[SOUR:]<quantity> <value>[,(@ch)]`
    SetSetpoint {
        /// Quantity header as sent.
        quantity: String,
        /// Channel.
        channel: u32,
        /// New setpoint.
        value: f64,
    },
}

const ROOT_PREFIXES: &[&str] = &["SOUR", "SOURCE", "SENS", "SENSE", "CONF", "CONFIGURE"];

/// Parse one command line.
pub fn parse(command: &str) -> Result<SimCommand, SimulationConfigError> {
    let text = command.trim();
    let (header, args) = match text.split_once(char::is_whitespace) {
        Some((h, a)) => (h, a.trim()),
        None => (text, ""),
    };
    let header = header.to_ascii_uppercase();
    let unsupported = || SimulationConfigError::UnsupportedCommand {
        command: text.to_string(),
    };

    if header.starts_with('*') {
        return match header.as_str() {
            "*IDN?" => Ok(SimCommand::Identify),
            "*RST" => Ok(SimCommand::Reset),
            "*CLS" => Ok(SimCommand::ClearStatus),
            "*OPC?" => Ok(SimCommand::OperationCompleteQuery),
            "*OPC" | "*WAI" => Ok(SimCommand::Synchronize),
            "*TST?" => Ok(SimCommand::SelfTest),
            _ => Err(unsupported()),
        };
    }

    let is_query = header.ends_with('?');
    let segments: Vec<&str> = header
        .trim_end_matches('?')
        .split(':')
        .filter(|s| !s.is_empty())
        .collect();
    let Some(first) = segments.first().copied() else {
        return Err(unsupported());
    };

    if is_query && is_system_error(&segments) {
        return Ok(SimCommand::NextError);
    }
    if is_query && is_trace(&segments) {
        return Ok(SimCommand::Trace);
    }
    if is_query && segments.len() == 1 && matches!(first, "READ" | "FETC" | "FETCH") {
        return Ok(SimCommand::Read);
    }

    let mut channel = parse_channel(args).unwrap_or(1);

    if matches!(first, "MEAS" | "MEASURE") {
        if !is_query {
            return Err(unsupported());
        }
        let quantity = segments.get(1).ok_or_else(unsupported)?;
        return Ok(SimCommand::Measure {
            quantity: quantity.to_string(),
            channel,
        });
    }

    let mut rest = &segments[..];
    if let Some((root, suffix)) = split_numeric_suffix(first) {
        if ROOT_PREFIXES.contains(&root) {
            if let Some(n) = suffix {
                channel = parse_channel(args).unwrap_or(n);
            }
            rest = &segments[1..];
        }
    }
    let quantity = rest.first().ok_or_else(unsupported)?.to_string();

    if is_query {
        return Ok(SimCommand::QuerySetpoint { quantity, channel });
    }

    let raw = args.split(',').next().unwrap_or_default().trim();
    if raw.is_empty() {
        return Err(unsupported());
    }
    let value = parse_value(raw).ok_or_else(|| SimulationConfigError::InvalidValue {
        value: raw.to_string(),
        command: text.to_string(),
    })?;
    Ok(SimCommand::SetSetpoint {
        quantity,
        channel,
        value,
    })
}

fn is_system_error(segments: &[&str]) -> bool {
    matches!(segments, ["SYST" | "SYSTEM", "ERR" | "ERROR", ..])
}

fn is_trace(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["TRAC" | "TRACE" | "WAV" | "WAVEFORM", "DATA", ..]
    )
}

/// `(@3)` anywhere in the argument list.
fn parse_channel(args: &str) -> Option<u32> {
    let start = args.find("(@")? + 2;
    let end = args[start..].find(')')? + start;
    args[start..end].trim().parse().ok()
}

/// `SOUR2` -> (`SOUR`, Some(2)); `SOUR` -> (`SOUR`, None).
fn split_numeric_suffix(segment: &str) -> Option<(&str, Option<u32>)> {
    let digits_at = segment
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(segment.len());
    let (root, digits) = segment.split_at(digits_at);
    if root.is_empty() {
        return None;
    }
    if digits.is_empty() {
        return Some((root, None));
    }
    digits.parse().ok().map(|n| (root, Some(n)))
}

fn parse_value(raw: &str) -> Option<f64> {
    match raw.to_ascii_uppercase().as_str() {
        "ON" => Some(1.0),
        "OFF" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_commands() {
        assert_eq!(parse("*idn?").unwrap(), SimCommand::Identify);
        assert_eq!(parse(" *RST ").unwrap(), SimCommand::Reset);
        assert_eq!(parse("*OPC?").unwrap(), SimCommand::OperationCompleteQuery);
        assert_eq!(parse("SYST:ERR?").unwrap(), SimCommand::NextError);
        assert_eq!(parse(":SYSTem:ERRor:NEXT?").unwrap(), SimCommand::NextError);
        assert!(parse("*FOO?").is_err());
    }

    #[test]
    fn test_measure_and_read() {
        assert_eq!(
            parse("MEAS:VOLT:DC? (@2)").unwrap(),
            SimCommand::Measure {
                quantity: "VOLT".into(),
                channel: 2
            }
        );
        assert_eq!(parse("READ?").unwrap(), SimCommand::Read);
        assert_eq!(parse("TRAC:DATA? TRACE1").unwrap(), SimCommand::Trace);
        assert!(parse("MEAS:VOLT").is_err());
    }

    #[test]
    fn test_setpoints() {
        assert_eq!(
            parse("VOLT 5.02").unwrap(),
            SimCommand::SetSetpoint {
                quantity: "VOLT".into(),
                channel: 1,
                value: 5.02
            }
        );
        assert_eq!(
            parse("SOUR2:FREQ 1e6").unwrap(),
            SimCommand::SetSetpoint {
                quantity: "FREQ".into(),
                channel: 2,
                value: 1e6
            }
        );
        assert_eq!(
            parse("CURR 0.5,(@3)").unwrap(),
            SimCommand::SetSetpoint {
                quantity: "CURR".into(),
                channel: 3,
                value: 0.5
            }
        );
        assert_eq!(
            parse("OUTP ON").unwrap(),
            SimCommand::SetSetpoint {
                quantity: "OUTP".into(),
                channel: 1,
                value: 1.0
            }
        );
        assert_eq!(
            parse("SOUR:VOLT?").unwrap(),
            SimCommand::QuerySetpoint {
                quantity: "VOLT".into(),
                channel: 1
            }
        );
    }

    #[test]
    fn test_bad_arguments() {
        assert!(matches!(
            parse("VOLT banana"),
            Err(SimulationConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("VOLT"),
            Err(SimulationConfigError::UnsupportedCommand { .. })
        ));
        assert!(parse("").is_err());
    }
}
