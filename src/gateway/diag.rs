//! Best-effort diagnostics records on the `device_log` stream.
//!
//! Gated by a runtime flag. Records share the uplink's line framing and its
//! writer discipline; nothing here blocks beyond that.

use super::assembler::{Append, MessageBuffer, Scalar, StreamKind, EOM_KEY};
use super::registry::GATEWAY_ID;

#[derive(Debug)]
pub struct Diagnostics {
    enabled: bool,
    buffer: MessageBuffer,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buffer: MessageBuffer::new(StreamKind::DeviceLog),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle at runtime; takes effect on the next emit.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Format one record as a complete `device_log` line, or `None` when
    /// diagnostics are off. The caller ships the line via the uplink.
    pub fn emit(&mut self, tag: &str, value: Scalar) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.buffer.append("id", Scalar::Int(GATEWAY_ID as i64));
        self.buffer.append(tag, value);
        match self.buffer.append(EOM_KEY, Scalar::Int(1)) {
            Append::Flushed(line) => Some(line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_emits_nothing() {
        let mut diag = Diagnostics::new(false);
        assert_eq!(diag.emit("drop", Scalar::Int(7)), None);
    }

    #[test]
    fn enabled_sink_formats_one_line() {
        let mut diag = Diagnostics::new(true);
        let line = diag.emit("drop", Scalar::from("0000BEEF")).expect("line");
        assert_eq!(
            line,
            r#"{"topic":"device_log","id":0,"drop":"0000BEEF","eom":1}"#
        );
        // Buffer resets: a second emit is standalone.
        let line = diag.emit("lost", Scalar::Int(3)).expect("line");
        assert_eq!(line, r#"{"topic":"device_log","id":0,"lost":3,"eom":1}"#);
    }
}
