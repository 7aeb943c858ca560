//! Line codec for the radio modem link.
//!
//! The modem frames every packet as one text line. Two frame kinds exist:
//!
//!   `V,<sender_hex8>,<name>,<value>`   typed key-value packet
//!   `S,<sender_hex8>,<text>`           string packet
//!
//! on the inbound side, and the same shapes without the sender field on the
//! outbound side (the modem stamps the local identity on air). `<text>` is
//! everything after the second comma, so commas inside command payloads
//! survive. Malformed lines are reported as typed errors; callers count and
//! drop them.

use thiserror::Error;

use super::{RadioEvent, RadioPacket};

/// Largest accepted frame line. Anything longer is junk or a runaway device.
pub const MAX_FRAME_LEN: usize = 512;

/// Errors produced while decoding a modem line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too long: maximum {max} bytes, got {actual}")]
    TooLong { max: usize, actual: usize },

    #[error("unknown frame kind: {0:?}")]
    UnknownKind(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("bad sender identity: {0:?}")]
    BadSender(String),

    #[error("bad numeric value: {0:?}")]
    BadValue(String),

    #[error("empty value name")]
    EmptyName,
}

/// Parse one inbound line from the modem into a [`RadioEvent`].
pub fn parse_event(line: &str) -> Result<RadioEvent, FrameError> {
    if line.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLong {
            max: MAX_FRAME_LEN,
            actual: line.len(),
        });
    }
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(2, ',');
    let kind = parts.next().unwrap_or("");
    let rest = parts.next().ok_or(FrameError::MissingField("sender"))?;
    match kind {
        "V" => {
            let mut fields = rest.splitn(3, ',');
            let sender = parse_sender(fields.next().ok_or(FrameError::MissingField("sender"))?)?;
            let name = fields.next().ok_or(FrameError::MissingField("name"))?;
            if name.is_empty() {
                return Err(FrameError::EmptyName);
            }
            let raw = fields.next().ok_or(FrameError::MissingField("value"))?;
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| FrameError::BadValue(raw.to_string()))?;
            Ok(RadioEvent::Value {
                name: name.to_string(),
                value,
                sender,
            })
        }
        "S" => {
            let mut fields = rest.splitn(2, ',');
            let sender = parse_sender(fields.next().ok_or(FrameError::MissingField("sender"))?)?;
            let text = fields.next().ok_or(FrameError::MissingField("text"))?;
            Ok(RadioEvent::Text {
                content: text.to_string(),
                sender,
            })
        }
        other => Err(FrameError::UnknownKind(other.to_string())),
    }
}

/// Encode one outbound packet as a modem line (no trailing newline).
pub fn encode_packet(packet: &RadioPacket) -> String {
    match packet {
        RadioPacket::Value { name, value } => format!("V,{},{}", name, fmt_value(*value)),
        RadioPacket::Text(text) => format!("S,{}", text),
    }
}

fn parse_sender(field: &str) -> Result<u32, FrameError> {
    u32::from_str_radix(field.trim(), 16).map_err(|_| FrameError::BadSender(field.to_string()))
}

/// Render a value without a spurious fractional part: integral f64s print as
/// integers so the air format matches what devices actually send.
fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
