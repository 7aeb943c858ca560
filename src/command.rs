//! Text RPC protocol shared by the gateway and the endpoints.
//!
//! Wire syntax: `[addr,addr,...:]name(p1,p2,p3)`. The optional address list
//! names target device ids (absent means broadcast to all); up to three
//! positional arguments follow the command name. Parsing is total: missing
//! parentheses or arguments degrade to absent values, and an unrecognized
//! command name dispatches to nothing. The catalog can therefore grow
//! without breaking devices running older firmware.
//!
//! Addressed commands arriving on the uplink as one line fan out into one
//! fully-qualified `id:name(args)` broadcast per address.

use log::trace;

use crate::sensors::Actuators;

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCall {
    /// Target device ids; `None` means broadcast to all devices.
    pub targets: Option<Vec<u16>>,
    pub name: String,
    /// Positional arguments as raw text; trailing arguments may be absent.
    pub args: Vec<String>,
    /// The `name(args)` portion exactly as received, used for re-emission.
    call_text: String,
}

impl CommandCall {
    /// Numeric argument `i`, if present and parseable.
    pub fn num(&self, i: usize) -> Option<f64> {
        self.args.get(i).and_then(|a| a.trim().parse().ok())
    }

    /// Text argument `i`, if present.
    pub fn text(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(|a| a.as_str())
    }

    /// Whether this call addresses the given id (broadcasts address everyone).
    pub fn addressed_to(&self, id: u16) -> bool {
        match &self.targets {
            None => true,
            Some(list) => list.contains(&id),
        }
    }
}

/// Parse one command line. Never fails; malformed pieces degrade to an
/// unaddressed call with an unknown name, which dispatches to nothing.
pub fn parse(line: &str) -> CommandCall {
    let line = line.trim();
    let (addr_part, call_part) = match line.split_once(':') {
        Some((addrs, call)) => (Some(addrs), call),
        None => (None, line),
    };

    let targets = addr_part.map(|addrs| {
        addrs
            .split(',')
            .filter_map(|tok| {
                let tok = tok.trim();
                match tok.parse::<u16>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        trace!("Ignoring unparseable address {tok:?} in command line");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
    });

    let (name, args) = match call_part.split_once('(') {
        Some((name, rest)) => {
            let inner = rest.split(')').next().unwrap_or(rest);
            let args = if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|a| a.trim().to_string()).collect()
            };
            (name.trim().to_string(), args)
        }
        None => (call_part.trim().to_string(), Vec::new()),
    };

    CommandCall {
        targets,
        name,
        args,
        call_text: call_part.trim().to_string(),
    }
}

/// Split one uplink command line into the broadcasts it produces: one
/// `id:name(args)` line per listed address, or the line itself when global.
pub fn fan_out(line: &str) -> Vec<String> {
    let call = parse(line);
    match &call.targets {
        None => vec![line.trim().to_string()],
        Some(ids) => ids
            .iter()
            .map(|id| format!("{}:{}", id, call.call_text))
            .collect(),
    }
}

/// Outcome of dispatching a call against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A board side effect was performed.
    Applied,
    /// Identity assignment; the role layer owns id bookkeeping.
    SetId { id: i32, identity: u32 },
    /// Name not in the catalog; deliberately a no-op.
    Unknown,
}

/// Apply a call's side effect through the actuator collaborator. Numeric
/// arguments are truncated at the board boundary, absent ones read as zero
/// or empty.
pub fn dispatch(call: &CommandCall, board: &mut dyn Actuators) -> Dispatch {
    match call.name.as_str() {
        "setId" => {
            let id = call.num(0).unwrap_or(-1.0) as i32;
            let identity = call.num(1).unwrap_or(0.0) as u32;
            Dispatch::SetId { id, identity }
        }
        "reset" => {
            board.reset();
            Dispatch::Applied
        }
        "text" => {
            board.display_text(call.text(0).unwrap_or(""));
            Dispatch::Applied
        }
        "icon" => {
            board.display_icon(call.text(0).unwrap_or(""));
            Dispatch::Applied
        }
        "brightness" => {
            board.set_brightness(call.num(0).unwrap_or(0.0) as u8);
            Dispatch::Applied
        }
        "rgb" => {
            board.set_color(
                call.num(0).unwrap_or(0.0) as u8,
                call.num(1).unwrap_or(0.0) as u8,
                call.num(2).unwrap_or(0.0) as u8,
            );
            Dispatch::Applied
        }
        "servo" => {
            board.servo_write(
                call.num(0).unwrap_or(0.0) as u8,
                call.num(1).unwrap_or(0.0) as u16,
            );
            Dispatch::Applied
        }
        "dwrite" => {
            board.digital_write(
                call.num(0).unwrap_or(0.0) as u8,
                call.num(1).unwrap_or(0.0) as u8,
            );
            Dispatch::Applied
        }
        "awrite" => {
            board.analog_write(
                call.num(0).unwrap_or(0.0) as u8,
                call.num(1).unwrap_or(0.0) as u16,
            );
            Dispatch::Applied
        }
        other => {
            trace!("Unrecognized command {other:?} ignored");
            Dispatch::Unknown
        }
    }
}

/// Whether a device should act on this call. Address-qualified commands
/// require a matching assigned id; `setId` instead matches the embedded
/// hardware identity, since the addressee may not hold an id yet.
pub fn accepts(call: &CommandCall, own_id: Option<u16>, own_identity: u32) -> bool {
    if call.name == "setId" {
        return call.num(1).map(|v| v as u32) == Some(own_identity);
    }
    match &call.targets {
        None => true,
        Some(_) => match own_id {
            Some(id) => call.addressed_to(id),
            None => false,
        },
    }
}
