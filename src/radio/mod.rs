//! # Radio Modem Communication Module
//!
//! Talks to the broadcast radio through a serial-attached modem that frames
//! packets as text lines (see [`framer`]). The medium is half-duplex and
//! collision-prone, so all outbound traffic funnels through one writer task
//! that enforces a minimum gap between consecutive transmissions; inbound
//! traffic is framed by a reader task and delivered as [`RadioEvent`]s over
//! an unbounded channel.
//!
//! Without the `serial` feature (or without a connected modem) the rest of
//! the system runs in loopback mode: the gateway collects outbound packets
//! into test buffers instead of a port.

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::logutil::escape_log;
use crate::metrics;

pub mod framer;

#[cfg(feature = "serial")]
use anyhow::{anyhow, Result};
#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::io::{Read, Write};
#[cfg(feature = "serial")]
use std::sync::{Arc, Mutex};

/// One packet received off the air. `sender` is the transmitting device's
/// hardware identity, stamped by the modem.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Value { name: String, value: f64, sender: u32 },
    Text { content: String, sender: u32 },
}

/// One packet queued for transmission.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioPacket {
    Value { name: String, value: f64 },
    Text(String),
}

impl RadioPacket {
    pub fn value(name: impl Into<String>, value: f64) -> Self {
        RadioPacket::Value {
            name: name.into(),
            value,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        RadioPacket::Text(content.into())
    }
}

/// Writer pacing, typically sourced from Config.
#[derive(Debug, Clone)]
pub struct RadioTuning {
    /// Minimum gap between any two transmissions (ms). The link is
    /// half-duplex; back-to-back writes collide with replies.
    pub min_send_gap_ms: u64,
}

impl Default for RadioTuning {
    fn default() -> Self {
        Self { min_send_gap_ms: 50 }
    }
}

/// Control messages for the reader/writer tasks.
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
}

/// Reader task: drains the serial port, splits lines, parses frames,
/// forwards events.
#[cfg(feature = "serial")]
pub struct RadioReader {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    pending: Vec<u8>,
    event_tx: mpsc::UnboundedSender<RadioEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

#[cfg(feature = "serial")]
impl RadioReader {
    pub async fn run(mut self) -> Result<()> {
        info!("Starting radio reader task");
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        loop {
            tokio::select! {
                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlMessage::Shutdown) | None => {
                            info!("Radio reader shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.read_available() {
                        warn!("Radio read error: {} - continuing", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<()> {
        let mut chunk = [0u8; 512];
        let n = {
            let mut port = self
                .port
                .lock()
                .map_err(|_| anyhow!("radio port lock poisoned"))?;
            match port.bytes_to_read() {
                Ok(0) => 0,
                Ok(_) => port.read(&mut chunk).unwrap_or(0),
                Err(e) => return Err(anyhow!("bytes_to_read failed: {e}")),
            }
        };
        if n == 0 {
            return Ok(());
        }
        self.pending.extend_from_slice(&chunk[..n]);
        // Split off complete lines; keep the unterminated tail.
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match framer::parse_event(line) {
                Ok(event) => {
                    metrics::inc_frames_rx();
                    if self.event_tx.send(event).is_err() {
                        return Err(anyhow!("radio event channel closed"));
                    }
                }
                Err(e) => {
                    metrics::inc_frames_bad();
                    debug!("Dropping malformed radio frame '{}': {}", escape_log(line), e);
                }
            }
        }
        // Runaway line with no terminator: drop it rather than grow forever.
        if self.pending.len() > framer::MAX_FRAME_LEN {
            metrics::inc_frames_bad();
            debug!("Dropping oversize unterminated radio data ({} bytes)", self.pending.len());
            self.pending.clear();
        }
        Ok(())
    }
}

/// Writer task: serializes all transmissions and enforces the send gap.
#[cfg(feature = "serial")]
pub struct RadioWriter {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    packet_rx: mpsc::UnboundedReceiver<RadioPacket>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tuning: RadioTuning,
    last_send: Option<Instant>,
}

#[cfg(feature = "serial")]
impl RadioWriter {
    pub async fn run(mut self) -> Result<()> {
        info!("Starting radio writer task");
        loop {
            tokio::select! {
                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlMessage::Shutdown) | None => {
                            info!("Radio writer shutting down");
                            break;
                        }
                    }
                }
                packet = self.packet_rx.recv() => {
                    let Some(packet) = packet else {
                        debug!("Radio packet channel closed");
                        break;
                    };
                    self.pace().await;
                    if let Err(e) = self.transmit(&packet) {
                        warn!("Radio write error: {} - packet dropped", e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn pace(&mut self) {
        let gap = Duration::from_millis(self.tuning.min_send_gap_ms);
        if let Some(last) = self.last_send {
            let elapsed = last.elapsed();
            if elapsed < gap {
                sleep(gap - elapsed).await;
            }
        }
    }

    fn transmit(&mut self, packet: &RadioPacket) -> Result<()> {
        let line = framer::encode_packet(packet);
        let mut port = self
            .port
            .lock()
            .map_err(|_| anyhow!("radio port lock poisoned"))?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        self.last_send = Some(Instant::now());
        metrics::inc_frames_tx();
        debug!("TX radio frame '{}'", escape_log(&line));
        Ok(())
    }
}

/// Open the modem port and build the reader/writer pair plus their channels.
/// The caller spawns the returned tasks (mirrors how the server owns its
/// task lifecycles).
#[cfg(feature = "serial")]
#[allow(clippy::type_complexity)]
pub async fn create_radio_system(
    port_name: &str,
    baud_rate: u32,
    tuning: RadioTuning,
) -> Result<(
    RadioReader,
    RadioWriter,
    mpsc::UnboundedReceiver<RadioEvent>,
    mpsc::UnboundedSender<RadioPacket>,
    mpsc::UnboundedSender<ControlMessage>,
    mpsc::UnboundedSender<ControlMessage>,
)> {
    info!("Opening radio modem on {} at {} baud", port_name, baud_rate);
    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("Failed to open radio modem {}: {}", port_name, e))?;
    // Wake the modem and discard any boot chatter.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;
    let mut purge = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge);
        }
    }

    let shared = Arc::new(Mutex::new(port));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (packet_tx, packet_rx) = mpsc::unbounded_channel();
    let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel();
    let (writer_control_tx, writer_control_rx) = mpsc::unbounded_channel();

    let reader = RadioReader {
        port: shared.clone(),
        pending: Vec::new(),
        event_tx,
        control_rx: reader_control_rx,
    };
    let writer = RadioWriter {
        port: shared,
        packet_rx,
        control_rx: writer_control_rx,
        tuning,
        last_send: None,
    };

    Ok((
        reader,
        writer,
        event_rx,
        packet_tx,
        reader_control_tx,
        writer_control_tx,
    ))
}
