//! NIP-01 wire codec for client and relay JSON frames.

use serde::Serialize;
use serde_json::{json, Value};

use crate::event::Event;

/// Subscription filter sent with a `REQ`. Fields left as `None` are omitted
/// from the serialized object.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Event ids referenced in an `e` tag.
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e_tags: Option<Vec<String>>,
    /// Pubkeys referenced in a `p` tag.
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
}

/// Messages a relay sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription-id>, <event>]`
    Event {
        subscription_id: String,
        event: Event,
    },
    /// `["EOSE", <subscription-id>]`
    Eose(String),
    /// `["NOTICE", <message>]`
    Notice(String),
}

/// Decode one relay frame. Anything that does not parse as a known message
/// shape yields `None` and is dropped by the caller.
pub fn decode_relay_message(text: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(text).ok()?;
    let arr = val.as_array()?;
    match arr.first()?.as_str()? {
        "EVENT" if arr.len() >= 3 => {
            let subscription_id = arr.get(1)?.as_str()?.to_string();
            let event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event {
                subscription_id,
                event,
            })
        }
        "EOSE" => Some(RelayMessage::Eose(arr.get(1)?.as_str()?.to_string())),
        "NOTICE" => Some(RelayMessage::Notice(arr.get(1)?.as_str()?.to_string())),
        _ => None,
    }
}

/// Encode `["REQ", <subscription-id>, <filter>]`.
pub fn req(subscription_id: &str, filter: &Filter) -> String {
    json!(["REQ", subscription_id, filter]).to_string()
}

/// Encode `["CLOSE", <subscription-id>]`.
pub fn close(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}

/// Encode `["EVENT", <event>]`.
pub fn event(ev: &Event) -> String {
    json!(["EVENT", ev]).to_string()
}
