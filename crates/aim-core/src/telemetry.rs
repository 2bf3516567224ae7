//! Out-of-band telemetry messages.
//!
//! Three shapes travel on the wire, one JSON object per line:
//!
//! ```text
//! {"status":0}                                                  heartbeat
//! {"node":3,"name":"print","time":0.5,"debug":true,"data":...}  debug text
//! {"node_id":7,"name":"oscilloscope","data":{...}}              listener payload
//! ```
//!
//! A compiled program pushes [`Message`]s into any [`Telemetry`] sink. The
//! transport that turns them into lines lives in `aim-io`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeId;

/// One telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Operator-facing debug output. Never routed to a listener.
    Debug {
        /// Emitting node.
        node: u32,
        /// Its type name.
        name: String,
        /// Stream time in seconds at the start of the buffer.
        time: f64,
        /// Always `true`; distinguishes the shape on the wire.
        debug: bool,
        /// Free-form payload.
        data: Value,
    },
    /// Data for the listener registered under `node_id`.
    Payload {
        /// Emitting node.
        node_id: u32,
        /// Its type name.
        name: String,
        /// Listener arguments as named fields.
        data: Value,
    },
    /// Per-buffer heartbeat.
    Status {
        /// Always 0.
        status: i32,
    },
}

impl Message {
    /// Heartbeat sent after every buffer.
    pub const HEARTBEAT: Self = Self::Status { status: 0 };

    /// Debug message from `node`.
    pub fn debug(node: NodeId, name: &str, time: f64, data: impl Into<Value>) -> Self {
        Self::Debug {
            node: node.index(),
            name: name.to_string(),
            time,
            debug: true,
            data: data.into(),
        }
    }

    /// Listener payload from `node`.
    pub fn payload(node: NodeId, name: &str, data: Value) -> Self {
        Self::Payload {
            node_id: node.index(),
            name: name.to_string(),
            data,
        }
    }
}

/// Destination for messages emitted while a buffer is processed.
pub trait Telemetry {
    /// Accepts one message. Must not reorder.
    fn send(&mut self, message: Message);
}

impl Telemetry for Vec<Message> {
    fn send(&mut self, message: Message) {
        self.push(message);
    }
}

/// Telemetry sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Telemetry for Discard {
    fn send(&mut self, _message: Message) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn heartbeat_serializes_as_status_zero() {
        assert_eq!(
            serde_json::to_string(&Message::HEARTBEAT).unwrap(),
            r#"{"status":0}"#
        );
    }

    #[test]
    fn payload_uses_node_id_field() {
        let msg = Message::payload(NodeId::new(7), "oscilloscope", json!({"voice_id": 1}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"node_id": 7, "name": "oscilloscope", "data": {"voice_id": 1}})
        );
    }

    #[test]
    fn each_shape_parses_back_to_its_variant() {
        let debug: Message = serde_json::from_str(
            r#"{"node":3,"name":"print","time":0.5,"debug":true,"data":"voices=2"}"#,
        )
        .unwrap();
        assert!(matches!(debug, Message::Debug { node: 3, .. }));

        let payload: Message =
            serde_json::from_str(r#"{"node_id":7,"name":"oscilloscope","data":{}}"#).unwrap();
        assert!(matches!(payload, Message::Payload { node_id: 7, .. }));

        let status: Message = serde_json::from_str(r#"{"status":0}"#).unwrap();
        assert_eq!(status, Message::HEARTBEAT);
    }

    #[test]
    fn unknown_object_shape_does_not_parse() {
        assert!(serde_json::from_str::<Message>(r#"{"hello":"world"}"#).is_err());
    }
}
