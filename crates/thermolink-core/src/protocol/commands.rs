//! Protocol commands
//!
//! Wire-level constants and line classification for the multimeter's
//! command-prompt protocol.

/// Break / interrupt byte; the instrument answers with a fresh prompt
pub const BREAK: u8 = 0x03;

/// Select DC volts, slow reading rate, and request identification
pub const SETUP_COMMAND: &[u8] = b"VDC; RATE S; *IDN?\r\n";

/// Request the primary display reading
pub const MEASURE_COMMAND: &[u8] = b"MEAS1?\r\n";

/// Second character of every prompt line
pub const PROMPT_MARKER: u8 = b'>';

/// Unit suffix on DC voltage data lines
pub const VOLTAGE_SUFFIX: &str = "VDC";

/// Prompt variants returned after each command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// `=>` command accepted
    Accepted,
    /// `?>` command not understood
    SyntaxError,
    /// `!>` command understood but could not be executed
    ExecutionError,
    /// Any other `<symbol>>` prompt
    Other(char),
}

/// Classify a line as a prompt
///
/// A prompt is a non-alphanumeric marker followed by `>`, e.g. `=>`.
pub fn prompt_kind(line: &str) -> Option<PromptKind> {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[1] != PROMPT_MARKER || bytes[0].is_ascii_alphanumeric() {
        return None;
    }
    Some(match bytes[0] {
        b'=' => PromptKind::Accepted,
        b'?' => PromptKind::SyntaxError,
        b'!' => PromptKind::ExecutionError,
        other => PromptKind::Other(other as char),
    })
}

/// Check whether a line is a prompt rather than data
pub fn is_prompt(line: &str) -> bool {
    prompt_kind(line).is_some()
}

/// Parse a data line such as `+1.234E-3 VDC` into volts
///
/// Returns `None` for anything that is not a finite number once the unit
/// suffix is stripped.
pub fn parse_voltage(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    let number = trimmed
        .strip_suffix(VOLTAGE_SUFFIX)
        .unwrap_or(trimmed)
        .trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}
