//! Incremental message assembly for the three uplink streams.
//!
//! Every device owns one [`MessageBuffer`] per stream kind. A buffer is an
//! ordered key→scalar builder with an explicit open/closed state — no
//! substring inspection decides anything. Appending the terminator key
//! (`eom`) renders the whole object as one line, hands it to the caller,
//! and resets the buffer to its empty template, so a flush is atomic with
//! respect to the appends that produced it.
//!
//! The telemetry stream additionally refuses any field before `id`: a
//! telemetry line is never emitted without its leading identity field, at
//! the cost of dropping fields that arrive too early.

use std::collections::HashMap;

use serde::Serialize;

/// Terminator key closing a message object.
pub const EOM_KEY: &str = "eom";

/// The three independent output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Telemetry,
    Property,
    DeviceLog,
}

impl StreamKind {
    pub fn topic(&self) -> &'static str {
        match self {
            StreamKind::Telemetry => "telemetry",
            StreamKind::Property => "property",
            StreamKind::DeviceLog => "device_log",
        }
    }
}

/// A scalar field value. Integral floats render as integers so the emitted
/// JSON matches what devices put on the air.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Serialize for Scalar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Int(v) => serializer.serialize_i64(*v),
            Scalar::Float(v) => serializer.serialize_f64(*v),
            Scalar::Text(v) => serializer.serialize_str(v),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        if v.fract() == 0.0 && v.abs() < 1e15 {
            Scalar::Int(v as i64)
        } else {
            Scalar::Float(v)
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// What an append did.
#[derive(Debug, Clone, PartialEq)]
pub enum Append {
    /// Field stored; the object stays open.
    Accepted,
    /// Field refused by the telemetry identity guard.
    Dropped,
    /// Terminator observed: the rendered line, buffer already reset.
    Flushed(String),
}

/// One ordered key→scalar accumulator with explicit open/closed state.
#[derive(Debug)]
pub struct MessageBuffer {
    kind: StreamKind,
    fields: Vec<(String, Scalar)>,
    closed: bool,
}

impl MessageBuffer {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            closed: true, // the empty template is a well-formed closed object
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn has_id(&self) -> bool {
        self.fields.iter().any(|(k, _)| k == "id")
    }

    /// Append one field. Reopens a closed buffer, enforces the telemetry
    /// identity guard, and flushes on the terminator key.
    pub fn append(&mut self, key: &str, value: Scalar) -> Append {
        if self.kind == StreamKind::Telemetry && key != "id" && !self.has_id() {
            return Append::Dropped;
        }
        if self.closed {
            self.closed = false;
        }
        self.fields.push((key.to_string(), value));
        if key == EOM_KEY {
            let line = self.render();
            self.reset();
            return Append::Flushed(line);
        }
        Append::Accepted
    }

    /// Render the object left-to-right in append order.
    fn render(&self) -> String {
        let mut out = String::with_capacity(32 + self.fields.len() * 12);
        out.push_str("{\"topic\":");
        out.push_str(&json_str(self.kind.topic()));
        for (key, value) in &self.fields {
            out.push(',');
            out.push_str(&json_str(key));
            out.push(':');
            // Scalar serialization cannot fail; fall back to null on the
            // impossible path rather than poisoning the stream.
            out.push_str(&serde_json::to_string(value).unwrap_or_else(|_| "null".into()));
        }
        out.push('}');
        out
    }

    /// Back to the empty template.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.closed = true;
    }
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

/// All buffers, indexed by the same device ids the registry assigns.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffers: HashMap<(u16, StreamKind), MessageBuffer>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the three stream buffers for a device. Called at
    /// registration; appends to an unknown device also create on demand.
    pub fn ensure_device(&mut self, id: u16) {
        for kind in [
            StreamKind::Telemetry,
            StreamKind::Property,
            StreamKind::DeviceLog,
        ] {
            self.buffers
                .entry((id, kind))
                .or_insert_with(|| MessageBuffer::new(kind));
        }
    }

    pub fn append(&mut self, id: u16, kind: StreamKind, key: &str, value: Scalar) -> Append {
        self.buffers
            .entry((id, kind))
            .or_insert_with(|| MessageBuffer::new(kind))
            .append(key, value)
    }

    pub fn buffer(&self, id: u16, kind: StreamKind) -> Option<&MessageBuffer> {
        self.buffers.get(&(id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_flushes_one_line_and_resets() {
        let mut buf = MessageBuffer::new(StreamKind::Property);
        assert_eq!(buf.append("a", Scalar::Int(1)), Append::Accepted);
        assert_eq!(buf.append("b", Scalar::Int(2)), Append::Accepted);
        match buf.append(EOM_KEY, Scalar::Int(1)) {
            Append::Flushed(line) => {
                assert_eq!(line, r#"{"topic":"property","a":1,"b":2,"eom":1}"#);
            }
            other => panic!("expected flush, got {other:?}"),
        }
        assert!(buf.is_closed());
        // The next append starts a fresh object.
        assert_eq!(buf.append("c", Scalar::Int(3)), Append::Accepted);
        match buf.append(EOM_KEY, Scalar::Int(1)) {
            Append::Flushed(line) => {
                assert_eq!(line, r#"{"topic":"property","c":3,"eom":1}"#);
            }
            other => panic!("expected flush, got {other:?}"),
        }
    }

    #[test]
    fn telemetry_guard_drops_fields_before_id() {
        let mut buf = MessageBuffer::new(StreamKind::Telemetry);
        assert_eq!(buf.append("temp", Scalar::Int(21)), Append::Dropped);
        assert_eq!(buf.append("id", Scalar::Int(3)), Append::Accepted);
        assert_eq!(buf.append("temp", Scalar::Int(21)), Append::Accepted);
        match buf.append(EOM_KEY, Scalar::Int(1)) {
            Append::Flushed(line) => {
                assert_eq!(line, r#"{"topic":"telemetry","id":3,"temp":21,"eom":1}"#);
            }
            other => panic!("expected flush, got {other:?}"),
        }
    }

    #[test]
    fn telemetry_eom_without_id_is_dropped() {
        let mut buf = MessageBuffer::new(StreamKind::Telemetry);
        assert_eq!(buf.append(EOM_KEY, Scalar::Int(1)), Append::Dropped);
        assert!(buf.is_closed(), "guard must not open the buffer");
    }

    #[test]
    fn text_scalars_are_json_quoted() {
        let mut buf = MessageBuffer::new(StreamKind::DeviceLog);
        buf.append("msg", Scalar::from("he said \"hi\""));
        match buf.append(EOM_KEY, Scalar::Int(1)) {
            Append::Flushed(line) => {
                assert_eq!(
                    line,
                    r#"{"topic":"device_log","msg":"he said \"hi\"","eom":1}"#
                );
            }
            other => panic!("expected flush, got {other:?}"),
        }
    }

    #[test]
    fn integral_floats_render_as_integers() {
        assert_eq!(Scalar::from(21.0), Scalar::Int(21));
        assert_eq!(Scalar::from(0.5), Scalar::Float(0.5));
    }

    #[test]
    fn streams_are_independent_per_device() {
        let mut asm = MessageAssembler::new();
        asm.ensure_device(1);
        asm.ensure_device(2);
        asm.append(1, StreamKind::Telemetry, "id", Scalar::Int(1));
        asm.append(2, StreamKind::Telemetry, "id", Scalar::Int(2));
        asm.append(1, StreamKind::Telemetry, "temp", Scalar::Int(20));
        let flushed = asm.append(1, StreamKind::Telemetry, EOM_KEY, Scalar::Int(1));
        match flushed {
            Append::Flushed(line) => {
                assert_eq!(line, r#"{"topic":"telemetry","id":1,"temp":20,"eom":1}"#);
            }
            other => panic!("expected flush, got {other:?}"),
        }
        // Device 2's buffer is untouched by device 1's flush.
        assert!(!asm.buffer(2, StreamKind::Telemetry).unwrap().is_closed());
    }
}
