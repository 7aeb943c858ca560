//! Log sanitizing for text that arrived off the air or the uplink.
//! Keeps every log record on one line regardless of what a device sent us.

/// Longest preview of wire text a single log record may carry. A chatty
/// (or hostile) device cannot flood the log past this.
const MAX_PREVIEW: usize = 200;

/// Escape a wire string for single-line logging. Newlines, carriage
/// returns, and tabs become their two-character escapes, other control
/// characters become `\xNN`, backslashes are doubled, and anything past
/// [`MAX_PREVIEW`] characters is replaced with an ellipsis.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    let mut count = 0usize;
    for ch in s.chars() {
        if count == MAX_PREVIEW {
            out.push('…');
            break;
        }
        count += 1;
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
