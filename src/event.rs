//! Nostr event model.

use serde::{Deserialize, Serialize};

/// Profile metadata (NIP-01 `set_metadata`).
pub const KIND_METADATA: u32 = 0;
/// Plain text note.
pub const KIND_TEXT_NOTE: u32 = 1;
/// Relay recommendation. Received but not interpreted by this client.
pub const KIND_RECOMMEND_RELAY: u32 = 2;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this client interprets:
///
/// - `e` – references another event: `["e", <event-id>, <relay-hint>?, <marker>?]`
/// - `p` – references another author's public key
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string-like parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag type, i.e. the first element.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Element at `idx`, if present.
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }
}

/// Signed Nostr event as received from and sent to relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "deadbeef...",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [["e", "bb22", "", "root"]],
///   "content": "hello",
///   "sig": "cafe..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash over the serialized fields).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Unix timestamp of creation, in seconds.
    pub created_at: u64,
    /// Kind number, e.g. `0` or `1`.
    pub kind: u32,
    /// Arbitrary tags such as `e` (event reference) or `p` (pubkey reference).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Tags referencing other events, in declaration order.
    pub fn e_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|tag| tag.name() == Some("e"))
    }
}

/// Caller-supplied fields for an outbound event. The author pubkey, id and
/// signature are filled in at signing time; a missing `created_at` defaults
/// to the current time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventTemplate {
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_with_tags(tags: Vec<Tag>) -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p1".into(),
            created_at: 1,
            kind: KIND_TEXT_NOTE,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn e_tags_filters_by_name() {
        let ev = note_with_tags(vec![
            Tag::new(["p", "pk"]),
            Tag::new(["e", "bb22"]),
            Tag::new(["t", "topic"]),
            Tag::new(["e", "cc33", "", "reply"]),
        ]);
        let ids: Vec<_> = ev.e_tags().filter_map(|t| t.arg(1)).collect();
        assert_eq!(ids, vec!["bb22", "cc33"]);
    }

    #[test]
    fn tag_accessors() {
        let tag = Tag::new(["e", "bb22", "wss://relay.example", "root"]);
        assert_eq!(tag.name(), Some("e"));
        assert_eq!(tag.arg(1), Some("bb22"));
        assert_eq!(tag.arg(3), Some("root"));
        assert_eq!(tag.arg(4), None);
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = note_with_tags(vec![Tag::new(["e", "bb22"])]);
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
