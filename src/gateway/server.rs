use anyhow::Result;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::command::{self, Dispatch};
use crate::config::Config;
use crate::logutil::escape_log;
use crate::metrics;
use crate::radio::{RadioEvent, RadioPacket};
use crate::sensors::{Board, SimulatedBoard};
use crate::uplink;

use super::assembler::{Append, MessageAssembler, Scalar, StreamKind, EOM_KEY};
use super::diag::Diagnostics;
use super::registry::{DeviceRegistry, Registration, GATEWAY_ID};
use super::scheduler::{PollScheduler, PollTarget, SchedulerConfig, TickEvent};

/// # Gateway Server - Core Orchestrator
///
/// Owns every piece of mutable protocol state (registry, scheduler,
/// assembler, diagnostics, reported properties) and mutates it exclusively
/// from its own event loop: a `tokio::select!` over the poll ticker, the
/// radio event channel, the uplink line channel, and ctrl-c. Transports
/// live in their own tasks and communicate over channels, so no two
/// callbacks ever touch state concurrently.
///
/// ## Responsibilities
///
/// - **Polling**: round-robin token handshakes with loss accounting
/// - **Registration**: id assignment and `setId` notifications
/// - **Assembly**: routing inbound values into per-device stream buffers
/// - **Relay**: re-broadcasting uplink command lines toward the leaves
/// - **Local telemetry**: reading its own board when the cursor hits id 0
///
/// ## Usage
///
/// ```rust,no_run
/// use meshgate::config::Config;
/// use meshgate::gateway::GatewayServer;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load("config.toml").await?;
///     let mut server = GatewayServer::new(config)?;
///     server.connect_uplink().await?;
///     server.run().await
/// }
/// ```
///
/// Without a connected radio or uplink the server collects outbound
/// traffic into in-memory buffers; integration tests drive it directly
/// through [`GatewayServer::handle_radio_event`],
/// [`GatewayServer::handle_uplink_line`], and [`GatewayServer::poll_tick`].
pub struct GatewayServer {
    config: Config,
    identity: u32,
    registry: DeviceRegistry,
    scheduler: PollScheduler,
    assembler: MessageAssembler,
    diag: Diagnostics,
    board: Box<dyn Board>,
    /// Reported-property set: name → latest value, drained on local polls.
    properties: Vec<(String, Scalar)>,
    radio_tx: Option<mpsc::UnboundedSender<RadioPacket>>,
    radio_event_rx: Option<mpsc::UnboundedReceiver<RadioEvent>>,
    uplink_tx: Option<mpsc::UnboundedSender<String>>,
    uplink_line_rx: Option<mpsc::UnboundedReceiver<String>>,
    #[cfg(feature = "serial")]
    radio_control_txs: Vec<mpsc::UnboundedSender<crate::radio::ControlMessage>>,
    uplink_control_txs: Vec<mpsc::UnboundedSender<uplink::ControlMessage>>,
    test_radio: Vec<RadioPacket>,
    test_uplink: Vec<String>,
}

impl GatewayServer {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_board(config, Box::new(SimulatedBoard::new()))
    }

    /// Build a server around a specific board implementation.
    pub fn with_board(config: Config, board: Box<dyn Board>) -> Result<Self> {
        config.validate()?;
        let identity = if config.gateway.identity != 0 {
            config.gateway.identity
        } else {
            crate::sensors::random_identity()
        };
        info!(
            "Gateway '{}' identity 0x{:08X}",
            config.gateway.name, identity
        );
        let scheduler = PollScheduler::new(SchedulerConfig {
            poll_timeout: Duration::from_millis(config.gateway.poll_timeout_ms),
            registration_grace: Duration::from_millis(config.gateway.registration_grace_ms),
        });
        let mut assembler = MessageAssembler::new();
        assembler.ensure_device(GATEWAY_ID);
        let diag = Diagnostics::new(config.diagnostics.enabled);
        let mut server = Self {
            identity,
            registry: DeviceRegistry::new(identity),
            scheduler,
            assembler,
            diag,
            board,
            properties: Vec::new(),
            radio_tx: None,
            radio_event_rx: None,
            uplink_tx: None,
            uplink_line_rx: None,
            #[cfg(feature = "serial")]
            radio_control_txs: Vec::new(),
            uplink_control_txs: Vec::new(),
            test_radio: Vec::new(),
            test_uplink: Vec::new(),
            config,
        };
        server.report_property("fw", Scalar::from(env!("CARGO_PKG_VERSION")));
        let name = server.config.gateway.name.clone();
        server.report_property("name", Scalar::from(name));
        Ok(server)
    }

    /// Connect the radio modem and spawn its reader/writer tasks.
    #[cfg(feature = "serial")]
    pub async fn connect_radio(&mut self, port: &str) -> Result<()> {
        let tuning = crate::radio::RadioTuning {
            min_send_gap_ms: self.config.radio.min_send_gap_ms,
        };
        let (reader, writer, event_rx, packet_tx, reader_control_tx, writer_control_tx) =
            crate::radio::create_radio_system(port, self.config.radio.baud_rate, tuning).await?;
        self.radio_event_rx = Some(event_rx);
        self.radio_tx = Some(packet_tx);
        self.radio_control_txs.push(reader_control_tx);
        self.radio_control_txs.push(writer_control_tx);
        tokio::spawn(async move {
            if let Err(e) = reader.run().await {
                log::error!("Radio reader task failed: {}", e);
            }
        });
        tokio::spawn(async move {
            if let Err(e) = writer.run().await {
                log::error!("Radio writer task failed: {}", e);
            }
        });
        info!("Radio reader/writer tasks spawned");
        Ok(())
    }

    /// Connect the uplink (stdio, or a serial port when configured) and
    /// spawn its reader/writer tasks.
    pub async fn connect_uplink(&mut self) -> Result<()> {
        let tuning = uplink::UplinkTuning {
            line_gap_ms: self.config.uplink.line_gap_ms,
        };
        let (reader, writer, line_rx, line_tx, reader_control_tx, writer_control_tx) =
            if self.config.uplink.port.is_empty() {
                uplink::create_stdio_uplink(tuning)
            } else {
                #[cfg(feature = "serial")]
                {
                    uplink::create_serial_uplink(
                        &self.config.uplink.port,
                        self.config.uplink.baud_rate,
                        tuning,
                    )
                    .await?
                }
                #[cfg(not(feature = "serial"))]
                {
                    warn!(
                        "uplink.port set but serial support not compiled in; using stdio"
                    );
                    uplink::create_stdio_uplink(tuning)
                }
            };
        self.uplink_line_rx = Some(line_rx);
        self.uplink_tx = Some(line_tx);
        self.uplink_control_txs.push(reader_control_tx);
        self.uplink_control_txs.push(writer_control_tx);
        tokio::spawn(async move {
            if let Err(e) = reader.run().await {
                log::error!("Uplink reader task failed: {}", e);
            }
        });
        tokio::spawn(async move {
            if let Err(e) = writer.run().await {
                log::error!("Uplink writer task failed: {}", e);
            }
        });
        info!("Uplink reader/writer tasks spawned");
        Ok(())
    }

    /// Main event loop. Runs until ctrl-c or until every inbound channel
    /// has closed.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Gateway '{}' started, polling every {}ms (deadline {}ms)",
            self.config.gateway.name,
            self.config.gateway.poll_interval_ms,
            self.config.gateway.poll_timeout_ms
        );
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.gateway.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_tick();
                }

                event = async {
                    match self.radio_event_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        Some(event) => self.handle_radio_event(event),
                        None => {
                            warn!("Radio event channel closed");
                            self.radio_event_rx = None;
                        }
                    }
                }

                line = async {
                    match self.uplink_line_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match line {
                        Some(line) => self.handle_uplink_line(&line),
                        None => {
                            warn!("Uplink line channel closed");
                            self.uplink_line_rx = None;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One scheduler step. Also invoked directly by tests.
    pub fn poll_tick(&mut self) {
        let events = self.scheduler.on_tick(&self.registry, Instant::now());
        for event in events {
            match event {
                TickEvent::Lost { id, identity } => {
                    metrics::inc_polls_lost();
                    debug!(
                        "Poll of id {} (0x{:08X}) timed out; total losses {}",
                        id,
                        identity,
                        self.scheduler.losses()
                    );
                    if let Some(line) = self.diag.emit("lost", Scalar::Int(id as i64)) {
                        self.send_uplink(line);
                    }
                }
                TickEvent::Issue(PollTarget::Local) => {
                    self.emit_local();
                }
                TickEvent::Issue(PollTarget::Remote { id, identity }) => {
                    metrics::inc_polls_issued();
                    trace!("Polling id {} (0x{:08X})", id, identity);
                    self.send_radio(RadioPacket::value("poll", identity as f64));
                }
            }
        }
    }

    /// Route one inbound radio event.
    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Value {
                name,
                value,
                sender,
            } => match name.as_str() {
                "reg" => self.register_device(sender),
                "out" => self.deactivate_device(sender),
                "poll" => trace!("Ignoring echoed poll token"), // our own vocabulary
                _ => self.route_stream_value(sender, &name, value),
            },
            RadioEvent::Text { content, sender } => {
                // Command relay is gateway -> leaves; inbound strings carry
                // nothing for us.
                trace!(
                    "Ignoring radio string from 0x{:08X}: '{}'",
                    sender,
                    escape_log(&content)
                );
            }
        }
    }

    fn route_stream_value(&mut self, sender: u32, name: &str, value: f64) {
        let Some(id) = self.registry.lookup(sender) else {
            metrics::inc_events_dropped();
            debug!(
                "Dropping value '{}' from unknown identity 0x{:08X}",
                escape_log(name),
                sender
            );
            if let Some(line) = self.diag.emit("unknown", Scalar::Int(sender as i64)) {
                self.send_uplink(line);
            }
            return;
        };
        let active = self.registry.get(id).map(|e| e.active).unwrap_or(false);
        if !active {
            metrics::inc_events_dropped();
            debug!("Dropping value from deactivated id {}", id);
            return;
        }

        let (kind, key) = if let Some(rest) = name.strip_prefix("p.") {
            (StreamKind::Property, rest)
        } else if let Some(rest) = name.strip_prefix("log.") {
            (StreamKind::DeviceLog, rest)
        } else {
            (StreamKind::Telemetry, name)
        };
        match kind {
            StreamKind::Telemetry if !self.config.telemetry.enabled => return,
            StreamKind::Property if !self.config.properties.enabled => return,
            _ => {}
        }

        match self.assembler.append(id, kind, key, Scalar::from(value)) {
            Append::Flushed(line) => {
                metrics::inc_messages_flushed();
                self.send_uplink(line);
                if kind == StreamKind::Telemetry && self.scheduler.complete(sender) {
                    trace!("Poll of id {} complete", id);
                }
            }
            Append::Dropped => {
                trace!("Telemetry guard dropped '{}' from id {}", escape_log(key), id);
            }
            Append::Accepted => {}
        }
    }

    /// Handle one inbound uplink command line: execute locally when it
    /// addresses the gateway, and always re-broadcast (per split command).
    pub fn handle_uplink_line(&mut self, line: &str) {
        let call = command::parse(line);
        if command::accepts(&call, Some(GATEWAY_ID), self.identity) {
            match command::dispatch(&call, self.board.as_mut()) {
                Dispatch::SetId { .. } => {
                    // The registry is the id authority here; assignment
                    // relayed below is for the leaves.
                    debug!("setId via uplink relayed, not applied locally");
                }
                Dispatch::Applied => debug!("Applied '{}' locally", escape_log(&call.name)),
                Dispatch::Unknown => {
                    trace!("Unknown command '{}' ignored", escape_log(&call.name))
                }
            }
        }
        for out in command::fan_out(line) {
            self.send_radio(RadioPacket::text(out));
        }
    }

    fn register_device(&mut self, identity: u32) {
        let outcome = self.registry.register(identity);
        let id = outcome.id();
        match outcome {
            Registration::New(_) | Registration::Reactivated(_) => {
                self.assembler.ensure_device(id);
                self.scheduler.note_registration(Instant::now());
                metrics::inc_registrations();
                self.send_radio(RadioPacket::text(format!("setId({},{})", id, identity)));
            }
            Registration::Existing(_) => {
                // Idempotent: same id, no second assignment notification.
                // Still relax the timers; the announcement was air traffic.
                self.scheduler.note_registration(Instant::now());
            }
        }
    }

    fn deactivate_device(&mut self, identity: u32) {
        if self.registry.deactivate(identity) {
            let _ = self.scheduler.complete(identity); // abandon a poll of a leaving device
            self.send_radio(RadioPacket::text(format!("setId(-1,{})", identity)));
        }
    }

    /// Pull the gateway's own telemetry and drain its reported properties.
    /// Runs synchronously when the cursor reaches id 0.
    fn emit_local(&mut self) {
        if self.config.telemetry.enabled {
            self.append_own(StreamKind::Telemetry, "id", Scalar::Int(GATEWAY_ID as i64));
            let fields =
                crate::sensors::read_enabled_channels(self.board.as_mut(), &self.config.telemetry);
            for (key, value) in fields {
                self.append_own(StreamKind::Telemetry, key, Scalar::from(value));
            }
            self.append_own(StreamKind::Telemetry, EOM_KEY, Scalar::Int(1));
        }

        if self.config.properties.enabled && !self.properties.is_empty() {
            self.append_own(StreamKind::Property, "id", Scalar::Int(GATEWAY_ID as i64));
            for (key, value) in std::mem::take(&mut self.properties) {
                self.append_own(StreamKind::Property, &key, value);
            }
            self.append_own(StreamKind::Property, EOM_KEY, Scalar::Int(1));
        }
    }

    fn append_own(&mut self, kind: StreamKind, key: &str, value: Scalar) {
        match self.assembler.append(GATEWAY_ID, kind, key, value) {
            Append::Flushed(line) => {
                metrics::inc_messages_flushed();
                self.send_uplink(line);
            }
            Append::Dropped => {
                trace!("Own {} field '{}' dropped", kind.topic(), escape_log(key));
            }
            Append::Accepted => {}
        }
    }

    /// Record a reported property; last write per key wins. Drained on the
    /// next local poll.
    pub fn report_property(&mut self, key: &str, value: Scalar) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key.to_string(), value));
        }
    }

    /// Toggle diagnostics at runtime.
    pub fn set_diagnostics(&mut self, enabled: bool) {
        self.diag.set_enabled(enabled);
    }

    fn send_radio(&mut self, packet: RadioPacket) {
        match &self.radio_tx {
            Some(tx) => {
                if tx.send(packet).is_err() {
                    warn!("Radio packet channel closed; dropping packet");
                }
            }
            None => self.test_radio.push(packet),
        }
    }

    fn send_uplink(&mut self, line: String) {
        match &self.uplink_tx {
            Some(tx) => {
                if tx.send(line).is_err() {
                    warn!("Uplink line channel closed; dropping line");
                }
            }
            None => self.test_uplink.push(line),
        }
    }

    fn shutdown(&mut self) {
        #[cfg(feature = "serial")]
        for tx in &self.radio_control_txs {
            let _ = tx.send(crate::radio::ControlMessage::Shutdown);
        }
        for tx in &self.uplink_control_txs {
            let _ = tx.send(uplink::ControlMessage::Shutdown);
        }
        info!(
            "Gateway shutdown: {} devices known, {} polls lost",
            self.registry.len(),
            self.scheduler.losses()
        );
    }

    /// Print a status summary (used by the `status` CLI command).
    pub fn show_status(&self) {
        let snap = metrics::snapshot();
        println!("Gateway:    {} (identity 0x{:08X})", self.config.gateway.name, self.identity);
        println!(
            "Devices:    {} known, {} active",
            self.registry.len(),
            self.registry.active_count()
        );
        println!("Losses:     {}", self.scheduler.losses());
        println!(
            "Radio:      {} rx / {} tx / {} bad frames",
            snap.frames_rx, snap.frames_tx, snap.frames_bad
        );
        println!(
            "Uplink:     {} in / {} out lines, {} messages flushed",
            snap.lines_in, snap.lines_out, snap.messages_flushed
        );
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Monotonic count of abandoned polls.
    pub fn losses(&self) -> u64 {
        self.scheduler.losses()
    }

    pub fn identity(&self) -> u32 {
        self.identity
    }

    #[doc(hidden)]
    pub fn test_radio(&self) -> &Vec<RadioPacket> {
        &self.test_radio
    }

    #[doc(hidden)]
    pub fn test_uplink(&self) -> &Vec<String> {
        &self.test_uplink
    }

    #[doc(hidden)]
    pub fn test_clear_outbound(&mut self) {
        self.test_radio.clear();
        self.test_uplink.clear();
    }
}
