//! Relay -> client response frames.

use everelay_core::event::Event;
use everelay_core::Seq;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub seq: Seq,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        sub_id: String,
        event: Event,
    },
    Ok {
        /// The raw `id` the client sent, echoed back verbatim. Carried as
        /// a plain string (not `EventId`) because a structurally invalid
        /// event may not have a well-formed id at all, and the client
        /// still needs it echoed to correlate the rejection.
        event_id: String,
        accepted: bool,
        reason: String,
    },
    Eose {
        sub_id: String,
    },
    Closed {
        sub_id: String,
        reason: String,
    },
    Notice {
        text: String,
    },
    Changes {
        changes: Vec<ChangeEntry>,
        last_seq: Seq,
    },
    LastSeq(Seq),
    ChangesEvent {
        sub_id: String,
        seq: Seq,
        event: Event,
    },
    ChangesEose {
        sub_id: String,
        last_seq: Seq,
    },
}

impl RelayMessage {
    /// Render as the wire-format JSON array.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            RelayMessage::Event { sub_id, event } => {
                serde_json::json!(["EVENT", sub_id, event])
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                reason,
            } => {
                serde_json::json!(["OK", event_id, accepted, reason])
            }
            RelayMessage::Eose { sub_id } => serde_json::json!(["EOSE", sub_id]),
            RelayMessage::Closed { sub_id, reason } => {
                serde_json::json!(["CLOSED", sub_id, reason])
            }
            RelayMessage::Notice { text } => serde_json::json!(["NOTICE", text]),
            RelayMessage::Changes { changes, last_seq } => {
                serde_json::json!(["CHANGES", {"changes": changes, "lastSeq": last_seq}])
            }
            RelayMessage::LastSeq(seq) => serde_json::json!(["LASTSEQ", seq]),
            RelayMessage::ChangesEvent { sub_id, seq, event } => {
                serde_json::json!(["CHANGES_EVENT", sub_id, {"seq": seq, "event": event}])
            }
            RelayMessage::ChangesEose { sub_id, last_seq } => {
                serde_json::json!(["CHANGES_EOSE", sub_id, {"lastSeq": last_seq}])
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        // Every variant serializes from known-good types, so this can't fail.
        serde_json::to_string(&self.to_value()).expect("relay message is always serializable")
    }
}
