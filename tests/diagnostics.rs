//! Diagnostics channel gating and formatting.

mod common;

use meshgate::gateway::GatewayServer;
use meshgate::radio::RadioEvent;

fn stray_value(sender: u32) -> RadioEvent {
    RadioEvent::Value {
        name: "temp".into(),
        value: 21.0,
        sender,
    }
}

#[tokio::test]
async fn disabled_diagnostics_emit_nothing() {
    let mut server = GatewayServer::new(common::test_config()).expect("server new");
    server.handle_radio_event(stray_value(0xEE)); // unknown identity
    assert!(server.test_uplink().is_empty());
}

#[tokio::test]
async fn enabled_diagnostics_emit_one_line_per_event() {
    let mut config = common::test_config();
    config.diagnostics.enabled = true;
    let mut server = GatewayServer::new(config).expect("server new");

    server.handle_radio_event(stray_value(0xEE));
    let lines = server.test_uplink();
    assert_eq!(lines.len(), 1);
    assert!(
        lines[0].starts_with(r#"{"topic":"device_log","id":0,"#),
        "diagnostics use the device_log stream: {}",
        lines[0]
    );
    assert!(lines[0].ends_with(r#""eom":1}"#));
}

#[tokio::test]
async fn diagnostics_toggle_takes_effect_immediately() {
    let mut server = GatewayServer::new(common::test_config()).expect("server new");
    server.handle_radio_event(stray_value(0xEE));
    assert!(server.test_uplink().is_empty());

    server.set_diagnostics(true);
    server.handle_radio_event(stray_value(0xEE));
    assert_eq!(server.test_uplink().len(), 1);

    server.set_diagnostics(false);
    server.handle_radio_event(stray_value(0xEE));
    assert_eq!(server.test_uplink().len(), 1, "off again: no new line");
}
