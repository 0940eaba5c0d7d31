//! Wire frames exchanged over a [`super::Link`].
//!
//! Every frame names the namespace it belongs to, which is what lets many
//! logical connections share one physical socket.

use serde::{Deserialize, Serialize};

use crate::domain::{Payload, PeerId};

/// Reply carried back on an acknowledgement channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum AckReply {
    /// The remote handler returned a value.
    Ok(Payload),
    /// The remote handler failed; the marker is propagated verbatim.
    Error(Payload),
}

/// One frame on the wire, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client asks to open a logical connection to `namespace`.
    Connect {
        /// Target namespace.
        namespace: String,
    },
    /// Server accepted a `connect`; both sides now share `peer_id`.
    Connected {
        /// Accepted namespace.
        namespace: String,
        /// Identifier assigned by the server.
        peer_id: PeerId,
    },
    /// Either side closes the logical connection to `namespace`.
    Disconnect {
        /// Namespace being closed.
        namespace: String,
    },
    /// A named event; `ack_id` is present when the sender awaits a reply.
    Event {
        /// Namespace the event travels in.
        namespace: String,
        /// Event name.
        event: String,
        /// Opaque payload.
        #[serde(default)]
        payload: Payload,
        /// Link-local acknowledgement slot, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
    },
    /// Reply to an event that carried `ack_id`.
    Ack {
        /// Namespace the original event travelled in.
        namespace: String,
        /// Acknowledgement slot being answered.
        ack_id: u64,
        /// Handler outcome.
        reply: AckReply,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_way_event_omits_ack_id() {
        let frame = Frame::Event {
            namespace: "/chat".to_string(),
            event: "msg".to_string(),
            payload: json!("hi"),
            ack_id: None,
        };
        let Ok(value) = serde_json::to_value(&frame) else {
            panic!("serialization failed");
        };
        assert_eq!(
            value,
            json!({"type": "event", "namespace": "/chat", "event": "msg", "payload": "hi"})
        );
    }

    #[test]
    fn ack_reply_is_status_tagged() {
        let frame = Frame::Ack {
            namespace: "/".to_string(),
            ack_id: 7,
            reply: AckReply::Error(json!({"reason": "nope"})),
        };
        let Ok(value) = serde_json::to_value(&frame) else {
            panic!("serialization failed");
        };
        assert_eq!(
            value,
            json!({
                "type": "ack",
                "namespace": "/",
                "ack_id": 7,
                "reply": {"status": "error", "data": {"reason": "nope"}}
            })
        );
    }

    #[test]
    fn event_without_payload_parses_as_null() {
        let text = r#"{"type":"event","namespace":"/","event":"tick","ack_id":3}"#;
        let Ok(frame) = serde_json::from_str::<Frame>(text) else {
            panic!("frame should parse");
        };
        let Frame::Event {
            payload, ack_id, ..
        } = frame
        else {
            panic!("expected an event frame");
        };
        assert_eq!(payload, Payload::Null);
        assert_eq!(ack_id, Some(3));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let text = r#"{"type":"heartbeat","namespace":"/"}"#;
        assert!(serde_json::from_str::<Frame>(text).is_err());
    }
}
