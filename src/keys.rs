//! Schnorr identity and event signing.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::thread_rng;
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::event::{Event, EventTemplate};

/// Local signing identity (x-only Schnorr keypair).
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    pubkey: String,
}

impl Keys {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut thread_rng());
        Self::from_keypair(keypair)
    }

    /// Load an identity from a 32-byte hex secret key.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim())?;
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)?;
        Ok(Self::from_keypair(keypair))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let pubkey = hex::encode(keypair.x_only_public_key().0.serialize());
        Self { keypair, pubkey }
    }

    /// Hex-encoded x-only public key.
    pub fn public_key(&self) -> &str {
        &self.pubkey
    }

    /// Hex-encoded secret key.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Build a signed event from a template: fill in the author pubkey and
    /// timestamp, compute the id, and sign it.
    pub fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let created_at = template.created_at.unwrap_or_else(unix_now);
        let mut ev = Event {
            id: String::new(),
            pubkey: self.pubkey.clone(),
            created_at,
            kind: template.kind,
            tags: template.tags.clone(),
            content: template.content.clone(),
            sig: String::new(),
        };
        let hash = event_hash(&ev)?;
        ev.id = hex::encode(hash);
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(&hash)?;
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        ev.sig = hex::encode(sig.as_ref());
        Ok(ev)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Check an event's id and Schnorr signature. Events arrive from untrusted
/// relays; a failure here is a reason to drop the event, not an error.
pub fn validate_event(ev: &Event) -> bool {
    let Ok(hash) = event_hash(ev) else {
        return false;
    };
    if hex::encode(hash) != ev.id {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(&ev.sig) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(pk_bytes) = hex::decode(&ev.pubkey) else {
        return false;
    };
    let Ok(pk) = XOnlyPublicKey::from_slice(&pk_bytes) else {
        return false;
    };
    let Ok(msg) = Message::from_digest_slice(&hash) else {
        return false;
    };
    Secp256k1::verification_only()
        .verify_schnorr(&sig, &msg, &pk)
        .is_ok()
}
