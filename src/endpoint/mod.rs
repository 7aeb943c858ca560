//! # Endpoint Role Module
//!
//! The leaf side of the protocol, sharing the command catalog, the radio
//! transport, and the scalar types with the gateway. An endpoint announces
//! itself until the gateway assigns it an id, answers poll tokens that name
//! its identity, applies commands addressed to it, and says goodbye on
//! shutdown. It holds no view of other leaves.

use anyhow::Result;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::command::{self, Dispatch};
use crate::config::Config;
use crate::gateway::assembler::{Scalar, EOM_KEY};
use crate::logutil::escape_log;
use crate::radio::{RadioEvent, RadioPacket};
use crate::sensors::{Board, SimulatedBoard};

/// A leaf node: polled by the gateway, addressable through the command
/// protocol, otherwise silent.
pub struct EndpointNode {
    config: Config,
    identity: u32,
    assigned_id: Option<u16>,
    board: Box<dyn Board>,
    /// Reported-property set, drained into the next poll reply.
    properties: Vec<(String, Scalar)>,
    radio_tx: Option<mpsc::UnboundedSender<RadioPacket>>,
    radio_event_rx: Option<mpsc::UnboundedReceiver<RadioEvent>>,
    #[cfg(feature = "serial")]
    radio_control_txs: Vec<mpsc::UnboundedSender<crate::radio::ControlMessage>>,
    test_radio: Vec<RadioPacket>,
}

impl EndpointNode {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_board(config, Box::new(SimulatedBoard::new()))
    }

    pub fn with_board(config: Config, board: Box<dyn Board>) -> Result<Self> {
        config.validate()?;
        let identity = if config.endpoint.identity != 0 {
            config.endpoint.identity
        } else {
            crate::sensors::random_identity()
        };
        info!("Endpoint identity 0x{:08X}", identity);
        Ok(Self {
            config,
            identity,
            assigned_id: None,
            board,
            properties: Vec::new(),
            radio_tx: None,
            radio_event_rx: None,
            #[cfg(feature = "serial")]
            radio_control_txs: Vec::new(),
            test_radio: Vec::new(),
        })
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

    /// Main event loop: announce until assigned, answer polls and commands,
    /// depart on ctrl-c.
    pub async fn run(&mut self) -> Result<()> {
        info!("Endpoint starting");
        self.announce();
        let mut announce = tokio::time::interval(Duration::from_millis(
            self.config.endpoint.announce_interval_ms,
        ));
        announce.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = announce.tick() => {
                    if self.assigned_id.is_none() {
                        self.announce();
                    }
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

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.send_radio(RadioPacket::value("out", 0.0));
        self.shutdown();
        Ok(())
    }

    fn announce(&mut self) {
        debug!("Announcing registration");
        self.send_radio(RadioPacket::value("reg", 0.0));
    }

    /// Route one inbound radio event. Values from other leaves carry
    /// nothing for an endpoint; only the poll token matters.
    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Value { name, value, .. } if name == "poll" => {
                if value as u32 == self.identity {
                    self.reply_poll();
                }
            }
            RadioEvent::Value { .. } => {}
            RadioEvent::Text { content, .. } => self.handle_command(&content),
        }
    }

    fn handle_command(&mut self, line: &str) {
        let call = command::parse(line);
        if !command::accepts(&call, self.assigned_id, self.identity) {
            trace!("Command '{}' not for us", escape_log(line));
            return;
        }
        match command::dispatch(&call, self.board.as_mut()) {
            Dispatch::SetId { id, .. } => {
                if id < 0 {
                    info!("Deactivated by gateway; dropping id {:?}", self.assigned_id);
                    self.assigned_id = None;
                } else {
                    info!("Assigned id {}", id);
                    self.assigned_id = Some(id as u16);
                }
            }
            Dispatch::Applied => debug!("Applied '{}'", escape_log(&call.name)),
            Dispatch::Unknown => trace!("Unknown command '{}' ignored", escape_log(&call.name)),
        }
    }

    /// Answer a poll token: `id` first, the enabled telemetry fields, the
    /// drained properties, and the terminator last so the gateway's
    /// property flush precedes poll completion.
    fn reply_poll(&mut self) {
        let Some(id) = self.assigned_id else {
            // Polled before we learned an id: re-announce instead.
            self.announce();
            return;
        };
        self.send_radio(RadioPacket::value("id", id as f64));
        if self.config.telemetry.enabled {
            let fields =
                crate::sensors::read_enabled_channels(self.board.as_mut(), &self.config.telemetry);
            for (key, value) in fields {
                self.send_radio(RadioPacket::value(key, value));
            }
        }
        if self.config.properties.enabled && !self.properties.is_empty() {
            self.send_radio(RadioPacket::value("p.id", id as f64));
            for (key, value) in std::mem::take(&mut self.properties) {
                let value = match value {
                    Scalar::Int(v) => v as f64,
                    Scalar::Float(v) => v,
                    // The air protocol carries numbers; text properties are
                    // a gateway-local affordance.
                    Scalar::Text(_) => continue,
                };
                self.send_radio(RadioPacket::value(format!("p.{}", key), value));
            }
            self.send_radio(RadioPacket::value("p.eom", 1.0));
        }
        self.send_radio(RadioPacket::value(EOM_KEY, 1.0));
    }

    /// Record a reported property; last write per key wins.
    pub fn report_property(&mut self, key: &str, value: Scalar) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key.to_string(), value));
        }
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

    fn shutdown(&mut self) {
        #[cfg(feature = "serial")]
        for tx in &self.radio_control_txs {
            let _ = tx.send(crate::radio::ControlMessage::Shutdown);
        }
        info!("Endpoint shutdown");
    }

    pub fn assigned_id(&self) -> Option<u16> {
        self.assigned_id
    }

    pub fn identity(&self) -> u32 {
        self.identity
    }

    #[doc(hidden)]
    pub fn test_radio(&self) -> &Vec<RadioPacket> {
        &self.test_radio
    }

    #[doc(hidden)]
    pub fn test_clear_outbound(&mut self) {
        self.test_radio.clear();
    }
}
