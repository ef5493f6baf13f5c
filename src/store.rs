//! In-memory event store with deduplication and last-writer-wins profiles.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::event::{Event, KIND_METADATA, KIND_TEXT_NOTE};
use crate::thread::{self, Marker, ThreadNode};

/// User profile assembled from the most recently accepted metadata event for
/// a pubkey. Replaced wholesale on update, never field-merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// Author this profile belongs to. Taken from the event, not the payload.
    #[serde(skip)]
    pub pubkey: String,
    /// `created_at` of the metadata event this profile came from.
    #[serde(skip)]
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Payload fields this client does not interpret, carried verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// What an ingested event changed. The subscription synchronizer uses this to
/// decide which subscriptions need a re-issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// A text note with a previously unseen id was added.
    NewTextNote,
    /// An already-known text note was ingested again (no-op overwrite).
    DuplicateTextNote,
    /// A profile was created or replaced.
    Profile,
    /// Nothing changed: stale metadata, unparseable payload, or a kind this
    /// client does not interpret.
    None,
}

/// Process-wide event state. Owned by exactly one task; everything outside
/// that task sees cloned [`Snapshot`]s.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    text_notes: HashMap<String, Event>,
    profiles: HashMap<String, Profile>,
    following: HashSet<String>,
    relays: HashSet<String>,
}

impl EventStore {
    /// Route one validated event into the store.
    ///
    /// Text notes are upserted by id; re-ingesting a known id is a no-op
    /// (ids are content-derived, so the payload is identical). Metadata
    /// replaces the author's profile iff no profile exists or the existing
    /// one is not newer — on equal timestamps the later arrival wins.
    pub fn ingest(&mut self, ev: Event) -> StoreChange {
        match ev.kind {
            KIND_TEXT_NOTE => {
                let new = !self.text_notes.contains_key(&ev.id);
                self.text_notes.insert(ev.id.clone(), ev);
                if new {
                    StoreChange::NewTextNote
                } else {
                    StoreChange::DuplicateTextNote
                }
            }
            KIND_METADATA => {
                let mut profile: Profile = match serde_json::from_str(&ev.content) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(pubkey = %ev.pubkey, "dropping unparseable metadata: {e}");
                        return StoreChange::None;
                    }
                };
                if let Some(existing) = self.profiles.get(&ev.pubkey) {
                    if existing.updated_at > ev.created_at {
                        return StoreChange::None;
                    }
                }
                profile.pubkey = ev.pubkey.clone();
                profile.updated_at = ev.created_at;
                self.profiles.insert(ev.pubkey, profile);
                StoreChange::Profile
            }
            _ => StoreChange::None,
        }
    }

    /// Add a relay URL to the desired set. Returns whether the set changed.
    pub fn add_relay(&mut self, url: impl Into<String>) -> bool {
        self.relays.insert(url.into())
    }

    /// Remove a relay URL from the desired set. Returns whether the set changed.
    pub fn remove_relay(&mut self, url: &str) -> bool {
        self.relays.remove(url)
    }

    /// Follow a pubkey. Returns whether the set changed.
    pub fn follow(&mut self, pubkey: impl Into<String>) -> bool {
        self.following.insert(pubkey.into())
    }

    /// Unfollow a pubkey. Returns whether the set changed.
    pub fn unfollow(&mut self, pubkey: &str) -> bool {
        self.following.remove(pubkey)
    }

    pub fn text_notes(&self) -> &HashMap<String, Event> {
        &self.text_notes
    }

    pub fn profile(&self, pubkey: &str) -> Option<&Profile> {
        self.profiles.get(pubkey)
    }

    pub fn following(&self) -> &HashSet<String> {
        &self.following
    }

    pub fn relays(&self) -> &HashSet<String> {
        &self.relays
    }

    /// Every event id referenced by an `e` tag across all known text notes,
    /// deduplicated and in stable order.
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for note in self.text_notes.values() {
            for tag in note.e_tags() {
                if let Some(id) = tag.arg(1) {
                    ids.insert(id.to_string());
                }
            }
        }
        ids.into_iter().collect()
    }

    /// Cloned, read-only view for consumers outside the owning task.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            text_notes: self.text_notes.clone(),
            profiles: self.profiles.clone(),
            following: self.following.clone(),
            relays: self.relays.clone(),
        }
    }
}

/// Point-in-time copy of the store, safe to hand across task boundaries.
/// Thread reconstruction runs over snapshots, never over live state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub text_notes: HashMap<String, Event>,
    pub profiles: HashMap<String, Profile>,
    pub following: HashSet<String>,
    pub relays: HashSet<String>,
}

impl Snapshot {
    /// Notes referencing no other event, newest first.
    pub fn root_notes(&self) -> Vec<&Event> {
        thread::root_notes(&self.text_notes)
    }

    /// Replies to `parent_id` under `marker`, newest first.
    pub fn replies_of(&self, parent_id: &str, marker: Marker) -> Vec<&Event> {
        thread::replies_of(&self.text_notes, parent_id, marker)
    }

    /// Full reply tree under a root note.
    pub fn thread(&self, root_id: &str) -> Option<ThreadNode<'_>> {
        thread::thread(&self.text_notes, root_id)
    }

    pub fn profile(&self, pubkey: &str) -> Option<&Profile> {
        self.profiles.get(pubkey)
    }
}
