//! Leaf-side protocol behavior: identity assignment, command acceptance,
//! and poll replies.

mod common;

use common::ProbeBoard;
use meshgate::endpoint::EndpointNode;
use meshgate::gateway::assembler::Scalar;
use meshgate::radio::{RadioEvent, RadioPacket};

const IDENTITY: u32 = 0xE1;

fn text(content: &str) -> RadioEvent {
    RadioEvent::Text {
        content: content.into(),
        sender: 0xA1, // the gateway
    }
}

fn poll(identity: u32) -> RadioEvent {
    RadioEvent::Value {
        name: "poll".into(),
        value: identity as f64,
        sender: 0xA1,
    }
}

fn assigned_node() -> EndpointNode {
    let mut node = EndpointNode::new(common::test_config()).expect("node new");
    node.handle_radio_event(text(&format!("setId(3,{})", IDENTITY)));
    assert_eq!(node.assigned_id(), Some(3));
    node.test_clear_outbound();
    node
}

fn value_names(node: &EndpointNode) -> Vec<String> {
    node.test_radio()
        .iter()
        .filter_map(|p| match p {
            RadioPacket::Value { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn set_id_matches_identity_not_assigned_id() {
    let mut node = EndpointNode::new(common::test_config()).expect("node new");
    // Assignment for some other device's identity: ignored.
    node.handle_radio_event(text("setId(7,12345)"));
    assert_eq!(node.assigned_id(), None);
    // Ours: adopted, even though we held no id to match an address against.
    node.handle_radio_event(text(&format!("setId(3,{})", IDENTITY)));
    assert_eq!(node.assigned_id(), Some(3));
}

#[tokio::test]
async fn set_id_minus_one_deactivates() {
    let mut node = assigned_node();
    node.handle_radio_event(text(&format!("setId(-1,{})", IDENTITY)));
    assert_eq!(node.assigned_id(), None);
}

#[tokio::test]
async fn addressed_command_requires_matching_id() {
    let (board, actions) = ProbeBoard::new();
    let mut node =
        EndpointNode::with_board(common::test_config(), Box::new(board)).expect("node new");
    node.handle_radio_event(text(&format!("setId(3,{})", IDENTITY)));

    node.handle_radio_event(text("4:rgb(255,0,0)"));
    assert!(actions.lock().unwrap().colors.is_empty(), "not our address");

    node.handle_radio_event(text("3:rgb(255,0,0)"));
    assert_eq!(actions.lock().unwrap().colors, vec![(255, 0, 0)]);

    node.handle_radio_event(text("rgb(0,255,0)"));
    assert_eq!(
        actions.lock().unwrap().colors,
        vec![(255, 0, 0), (0, 255, 0)],
        "global commands always apply"
    );
}

#[tokio::test]
async fn unassigned_node_ignores_addressed_commands() {
    let (board, actions) = ProbeBoard::new();
    let mut node =
        EndpointNode::with_board(common::test_config(), Box::new(board)).expect("node new");
    node.handle_radio_event(text("0:rgb(1,2,3)"));
    assert!(actions.lock().unwrap().colors.is_empty());
}

#[tokio::test]
async fn poll_reply_is_id_first_eom_last() {
    let mut config = common::test_config();
    config.telemetry.temperature = true;
    config.telemetry.light = true;
    config.telemetry.accelerometer = false;
    let mut node = EndpointNode::with_board(config, Box::new(ProbeBoard::new().0)).expect("node");
    node.handle_radio_event(text(&format!("setId(3,{})", IDENTITY)));
    node.report_property("bat", Scalar::Int(87));
    node.test_clear_outbound();

    node.handle_radio_event(poll(IDENTITY));
    let names = value_names(&node);
    assert_eq!(
        names,
        vec!["id", "temp", "light", "p.id", "p.bat", "p.eom", "eom"],
        "id leads, the telemetry terminator closes the reply"
    );

    // Properties drained: the next reply has none.
    node.test_clear_outbound();
    node.handle_radio_event(poll(IDENTITY));
    assert_eq!(value_names(&node), vec!["id", "temp", "light", "eom"]);
}

#[tokio::test]
async fn poll_for_someone_else_is_ignored() {
    let mut node = assigned_node();
    node.handle_radio_event(poll(0x9999));
    assert!(node.test_radio().is_empty());
}

#[tokio::test]
async fn poll_before_assignment_reannounces() {
    let mut node = EndpointNode::new(common::test_config()).expect("node new");
    node.test_clear_outbound();
    node.handle_radio_event(poll(IDENTITY));
    assert_eq!(value_names(&node), vec!["reg"], "no reply without an id");
}
