//! # Uplink Channel Module
//!
//! The line-oriented channel to the host system. Assembled telemetry,
//! property, and log messages travel outbound one line at a time; command
//! payloads arrive inbound the same way. The physical link is half-duplex,
//! so the writer is a single task that writes one full line (plus its
//! framing gap) before starting the next — nothing else ever writes to the
//! uplink. Inbound framing skips empty lines.
//!
//! By default the uplink is the process's stdio, which makes the gateway
//! composable with whatever host agent supervises it. With the `serial`
//! feature a dedicated serial port can carry the uplink instead.

use anyhow::Result;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::logutil::escape_log;
use crate::metrics;

#[cfg(feature = "serial")]
use anyhow::anyhow;
#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::io::{Read, Write};
#[cfg(feature = "serial")]
use std::sync::{Arc, Mutex};

/// Writer pacing, typically sourced from Config.
#[derive(Debug, Clone, Default)]
pub struct UplinkTuning {
    /// Extra gap after each written line (ms). Zero is fine for stdio;
    /// serial hosts that postprocess line-by-line may need breathing room.
    pub line_gap_ms: u64,
}

/// Control messages for the uplink tasks.
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
}

enum Source {
    Stdio(BufReader<tokio::io::Stdin>),
    #[cfg(feature = "serial")]
    Serial(Arc<Mutex<Box<dyn SerialPort>>>),
}

enum Sink {
    Stdio(tokio::io::Stdout),
    #[cfg(feature = "serial")]
    Serial(Arc<Mutex<Box<dyn SerialPort>>>),
}

/// Reader task: frames inbound lines and forwards them to the server.
pub struct UplinkReader {
    source: Source,
    line_tx: mpsc::UnboundedSender<String>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl UplinkReader {
    pub async fn run(self) -> Result<()> {
        info!("Starting uplink reader task");
        let result = match self.source {
            Source::Stdio(reader) => run_stdio_reader(reader, self.line_tx, self.control_rx).await,
            #[cfg(feature = "serial")]
            Source::Serial(port) => run_serial_reader(port, self.line_tx, self.control_rx).await,
        };
        info!("Uplink reader shutting down");
        result
    }
}

async fn run_stdio_reader(
    mut reader: BufReader<tokio::io::Stdin>,
    line_tx: mpsc::UnboundedSender<String>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
) -> Result<()> {
    loop {
        let mut line = String::new();
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(ControlMessage::Shutdown) | None => return Ok(()),
                }
            }
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        debug!("Uplink stdin reached EOF");
                        return Ok(());
                    }
                    Ok(_) => forward_line(&line_tx, &line)?,
                    Err(e) => {
                        warn!("Uplink read error: {}", e);
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(feature = "serial")]
async fn run_serial_reader(
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    line_tx: mpsc::UnboundedSender<String>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
) -> Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut interval = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(ControlMessage::Shutdown) | None => return Ok(()),
                }
            }
            _ = interval.tick() => {
                let mut chunk = [0u8; 512];
                let n = {
                    let mut guard = port
                        .lock()
                        .map_err(|_| anyhow!("uplink port lock poisoned"))?;
                    match guard.bytes_to_read() {
                        Ok(0) => 0,
                        Ok(_) => guard.read(&mut chunk).unwrap_or(0),
                        Err(e) => {
                            warn!("Uplink bytes_to_read failed: {}", e);
                            0
                        }
                    }
                };
                if n > 0 {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let bytes: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&bytes).to_string();
                        forward_line(&line_tx, &line)?;
                    }
                }
            }
        }
    }
}

fn forward_line(line_tx: &mpsc::UnboundedSender<String>, raw: &str) -> Result<()> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(());
    }
    metrics::inc_lines_in();
    debug!("RX uplink line '{}'", escape_log(line));
    line_tx
        .send(line.to_string())
        .map_err(|_| anyhow::anyhow!("uplink line channel closed"))
}

/// Writer task: the single point of outbound uplink IO.
pub struct UplinkWriter {
    sink: Sink,
    line_rx: mpsc::UnboundedReceiver<String>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tuning: UplinkTuning,
}

impl UplinkWriter {
    pub async fn run(mut self) -> Result<()> {
        info!("Starting uplink writer task");
        loop {
            tokio::select! {
                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlMessage::Shutdown) | None => break,
                    }
                }
                line = self.line_rx.recv() => {
                    let Some(line) = line else { break };
                    if let Err(e) = self.write_line(&line).await {
                        warn!("Uplink write error: {} - line dropped", e);
                    }
                    if self.tuning.line_gap_ms > 0 {
                        sleep(Duration::from_millis(self.tuning.line_gap_ms)).await;
                    }
                }
            }
        }
        info!("Uplink writer shutting down");
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        match &mut self.sink {
            Sink::Stdio(out) => {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await?;
            }
            #[cfg(feature = "serial")]
            Sink::Serial(port) => {
                let mut guard = port
                    .lock()
                    .map_err(|_| anyhow!("uplink port lock poisoned"))?;
                guard.write_all(line.as_bytes())?;
                guard.write_all(b"\n")?;
                guard.flush()?;
            }
        }
        metrics::inc_lines_out();
        Ok(())
    }
}

/// Build an uplink over the process's stdio.
#[allow(clippy::type_complexity)]
pub fn create_stdio_uplink(
    tuning: UplinkTuning,
) -> (
    UplinkReader,
    UplinkWriter,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedSender<ControlMessage>,
    mpsc::UnboundedSender<ControlMessage>,
) {
    let (line_in_tx, line_in_rx) = mpsc::unbounded_channel();
    let (line_out_tx, line_out_rx) = mpsc::unbounded_channel();
    let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel();
    let (writer_control_tx, writer_control_rx) = mpsc::unbounded_channel();
    let reader = UplinkReader {
        source: Source::Stdio(BufReader::new(tokio::io::stdin())),
        line_tx: line_in_tx,
        control_rx: reader_control_rx,
    };
    let writer = UplinkWriter {
        sink: Sink::Stdio(tokio::io::stdout()),
        line_rx: line_out_rx,
        control_rx: writer_control_rx,
        tuning,
    };
    (
        reader,
        writer,
        line_in_rx,
        line_out_tx,
        reader_control_tx,
        writer_control_tx,
    )
}

/// Build an uplink over a dedicated serial port.
#[cfg(feature = "serial")]
#[allow(clippy::type_complexity)]
pub async fn create_serial_uplink(
    port_name: &str,
    baud_rate: u32,
    tuning: UplinkTuning,
) -> Result<(
    UplinkReader,
    UplinkWriter,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedSender<ControlMessage>,
    mpsc::UnboundedSender<ControlMessage>,
)> {
    info!("Opening uplink serial port {} at {} baud", port_name, baud_rate);
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| anyhow!("Failed to open uplink port {}: {}", port_name, e))?;
    let shared = Arc::new(Mutex::new(port));

    let (line_in_tx, line_in_rx) = mpsc::unbounded_channel();
    let (line_out_tx, line_out_rx) = mpsc::unbounded_channel();
    let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel();
    let (writer_control_tx, writer_control_rx) = mpsc::unbounded_channel();
    let reader = UplinkReader {
        source: Source::Serial(shared.clone()),
        line_tx: line_in_tx,
        control_rx: reader_control_rx,
    };
    let writer = UplinkWriter {
        sink: Sink::Serial(shared),
        line_rx: line_out_rx,
        control_rx: writer_control_rx,
        tuning,
    };
    Ok((
        reader,
        writer,
        line_in_rx,
        line_out_tx,
        reader_control_tx,
        writer_control_tx,
    ))
}
