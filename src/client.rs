//! Relay connection management, subscription synchronization, and publishing.
//!
//! All store and connection-map mutation happens on one engine task. Socket
//! readers, handshake results and caller commands all arrive as messages on
//! a single channel, so ingestion needs no locking: arbitrary interleaving
//! across relays is absorbed by the store's idempotent upsert and
//! last-writer-wins merge.

use std::collections::{HashMap, HashSet};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::event::{EventTemplate, KIND_METADATA, KIND_TEXT_NOTE};
use crate::keys::{self, Keys};
use crate::net;
use crate::store::{EventStore, Snapshot, StoreChange};
use crate::wire::{self, Filter, RelayMessage};

/// Subscription id for followed authors' profile metadata.
pub const SUB_FOLLOWING_METADATA: &str = "following-metadata";
/// Subscription id for followed authors' text notes.
pub const SUB_FOLLOWING_NOTES: &str = "following-text-notes";
/// Subscription id for events referenced by known text notes.
pub const SUB_EVENT_REPLIES: &str = "event-replies";

/// How far back the note and reply subscriptions reach.
const LOOKBACK_SECS: u64 = 7 * 24 * 60 * 60;
/// Cap on historical text notes requested per subscription.
const NOTE_LIMIT: usize = 100;

enum Command {
    AddRelay(String),
    RemoveRelay(String),
    Follow(String),
    Unfollow(String),
    Publish {
        template: EventTemplate,
        targets: Option<Vec<String>>,
    },
    Snapshot(oneshot::Sender<Snapshot>),
    ConnectedRelays(oneshot::Sender<Vec<String>>),
    Opened {
        url: String,
        outbound: mpsc::UnboundedSender<String>,
    },
    ConnectFailed(String),
    Closed {
        url: String,
        outbound: mpsc::UnboundedSender<String>,
    },
    Frame {
        url: String,
        text: String,
    },
    Shutdown,
}

/// Cloneable handle to the engine task. Every method passes a message; none
/// of them touches shared state directly.
#[derive(Clone)]
pub struct Client {
    tx: mpsc::UnboundedSender<Command>,
    changes: watch::Receiver<u64>,
}

impl Client {
    /// Start the engine with an initial relay set and follow list.
    pub fn spawn(
        keys: Keys,
        relays: Vec<String>,
        following: Vec<String>,
        socks_proxy: Option<String>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (change_tx, change_rx) = watch::channel(0u64);
        let mut store = EventStore::default();
        for url in relays {
            store.add_relay(url);
        }
        for pubkey in following {
            store.follow(pubkey);
        }
        let engine = Engine {
            keys,
            socks_proxy,
            store,
            conns: HashMap::new(),
            connecting: HashSet::new(),
            tx: tx.downgrade(),
            changes: change_tx,
        };
        let task = tokio::spawn(engine.run(rx));
        (
            Self {
                tx,
                changes: change_rx,
            },
            task,
        )
    }

    pub fn add_relay(&self, url: impl Into<String>) {
        let _ = self.tx.send(Command::AddRelay(url.into()));
    }

    pub fn remove_relay(&self, url: impl Into<String>) {
        let _ = self.tx.send(Command::RemoveRelay(url.into()));
    }

    pub fn follow(&self, pubkey: impl Into<String>) {
        let _ = self.tx.send(Command::Follow(pubkey.into()));
    }

    pub fn unfollow(&self, pubkey: impl Into<String>) {
        let _ = self.tx.send(Command::Unfollow(pubkey.into()));
    }

    /// Sign `template` and send it to every open target connection,
    /// fire-and-forget. Targets default to the whole relay set.
    pub fn publish(&self, template: EventTemplate, targets: Option<Vec<String>>) {
        let _ = self.tx.send(Command::Publish { template, targets });
    }

    /// Read-only copy of the current store state.
    pub async fn snapshot(&self) -> Snapshot {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    /// URLs with a currently open connection.
    pub async fn connected_relays(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ConnectedRelays(tx));
        rx.await.unwrap_or_default()
    }

    /// Counter bumped on every observable store change; await it to know
    /// when to take a fresh snapshot.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    /// Stop the engine task. Open connections close as their writer handles
    /// are dropped. Dropping every handle has the same effect.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct Engine {
    keys: Keys,
    socks_proxy: Option<String>,
    store: EventStore,
    /// Writer handle per open relay connection. Dropping a sender ends that
    /// connection's writer task, which closes the socket.
    conns: HashMap<String, mpsc::UnboundedSender<String>>,
    /// URLs with a handshake in flight, to avoid dialing twice.
    connecting: HashSet<String>,
    /// Self-sender handed to connection tasks. Weak, so the command channel
    /// closes and the loop ends once the last [`Client`] handle is dropped.
    tx: mpsc::WeakUnboundedSender<Command>,
    changes: watch::Sender<u64>,
}

impl Engine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.sync_connections();
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::AddRelay(url) => {
                    if self.store.add_relay(url) {
                        self.sync_connections();
                        self.bump();
                    }
                }
                Command::RemoveRelay(url) => {
                    if self.store.remove_relay(&url) {
                        self.sync_connections();
                        self.bump();
                    }
                }
                Command::Follow(pubkey) => {
                    if self.store.follow(pubkey) {
                        self.resync_following();
                        self.bump();
                    }
                }
                Command::Unfollow(pubkey) => {
                    if self.store.unfollow(&pubkey) {
                        self.resync_following();
                        self.bump();
                    }
                }
                Command::Publish { template, targets } => self.publish(template, targets),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.store.snapshot());
                }
                Command::ConnectedRelays(reply) => {
                    let _ = reply.send(self.conns.keys().cloned().collect());
                }
                Command::Opened { url, outbound } => self.on_opened(url, outbound),
                Command::ConnectFailed(url) => {
                    self.connecting.remove(&url);
                }
                Command::Closed { url, outbound } => {
                    // Evicted on close; re-dialed only if the desired set is
                    // recomputed, never automatically. A close report from an
                    // already-replaced connection must not touch its
                    // replacement, so the report has to match the writer
                    // handle currently on file.
                    let live = self
                        .conns
                        .get(&url)
                        .is_some_and(|cur| cur.same_channel(&outbound));
                    if live {
                        self.conns.remove(&url);
                        info!(%url, "relay connection closed");
                    }
                }
                Command::Frame { url, text } => self.on_frame(&url, &text),
                Command::Shutdown => break,
            }
        }
    }

    /// Bring the live connection map in line with the desired relay set:
    /// close and evict URLs no longer desired, dial URLs not yet present,
    /// leave the rest untouched.
    fn sync_connections(&mut self) {
        let stale: Vec<String> = self
            .conns
            .keys()
            .filter(|url| !self.store.relays().contains(*url))
            .cloned()
            .collect();
        for url in stale {
            self.conns.remove(&url);
            info!(%url, "closing relay connection");
        }
        let missing: Vec<String> = self
            .store
            .relays()
            .iter()
            .filter(|url| !self.conns.contains_key(*url) && !self.connecting.contains(*url))
            .cloned()
            .collect();
        for url in missing {
            self.connecting.insert(url.clone());
            self.dial(url);
        }
    }

    /// Dial a relay off the engine task. The connection reports back as an
    /// `Opened`, `ConnectFailed` or (later) `Closed` command.
    fn dial(&self, url: String) {
        let tx = self.tx.clone();
        let proxy = self.socks_proxy.clone();
        tokio::spawn(async move {
            let ws = match net::connect(&url, proxy.as_deref()).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!(%url, "connect failed: {e}");
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Command::ConnectFailed(url));
                    }
                    return;
                }
            };
            let (mut sink, mut stream) = ws.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

            // Writer: forwards queued frames until the engine drops its
            // sender, then closes the socket.
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            // Reader: forwards inbound text frames to the engine. Frames
            // already in flight when the engine evicts the connection are
            // still delivered; ingestion is idempotent, so that is harmless.
            // The close report carries this connection's writer handle so a
            // replacement under the same URL cannot be mistaken for it.
            let reader_tx = tx.clone();
            let reader_url = url.clone();
            let reader_out = out_tx.downgrade();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let Some(sender) = reader_tx.upgrade() else {
                                return;
                            };
                            if sender
                                .send(Command::Frame {
                                    url: reader_url.clone(),
                                    text,
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                // A failed writer-handle upgrade means the engine already let
                // go of this connection; there is nothing left to evict.
                if let (Some(sender), Some(outbound)) =
                    (reader_tx.upgrade(), reader_out.upgrade())
                {
                    let _ = sender.send(Command::Closed {
                        url: reader_url,
                        outbound,
                    });
                }
            });

            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Opened { url, outbound: out_tx });
            }
        });
    }

    /// Register a freshly opened connection and issue all three
    /// subscriptions against it, so a relay added mid-session catches up
    /// without waiting for the next follow or note change. A URL removed
    /// from the desired set while its handshake was in flight is dropped
    /// here instead of registered.
    fn on_opened(&mut self, url: String, outbound: mpsc::UnboundedSender<String>) {
        self.connecting.remove(&url);
        if !self.store.relays().contains(&url) {
            return;
        }
        info!(%url, "relay connection open");
        let frames = [
            wire::req(SUB_FOLLOWING_METADATA, &self.metadata_filter()),
            wire::req(SUB_FOLLOWING_NOTES, &self.notes_filter()),
            wire::req(SUB_EVENT_REPLIES, &self.replies_filter()),
        ];
        for frame in frames {
            let _ = outbound.send(frame);
        }
        self.conns.insert(url, outbound);
    }

    /// Decode, validate and ingest one inbound frame. Malformed frames and
    /// invalid events are dropped without surfacing an error.
    fn on_frame(&mut self, url: &str, text: &str) {
        let Some(msg) = wire::decode_relay_message(text) else {
            debug!(%url, "dropping malformed frame");
            return;
        };
        match msg {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if !keys::validate_event(&event) {
                    debug!(%url, sub = %subscription_id, id = %event.id, "dropping invalid event");
                    return;
                }
                match self.store.ingest(event) {
                    StoreChange::NewTextNote => {
                        // New notes may reference new ids; refresh the
                        // replies subscription everywhere.
                        self.resync_replies();
                        self.bump();
                    }
                    StoreChange::Profile => self.bump(),
                    StoreChange::DuplicateTextNote | StoreChange::None => {}
                }
            }
            RelayMessage::Eose(sub) => debug!(%url, %sub, "end of stored events"),
            RelayMessage::Notice(msg) => warn!(%url, "relay notice: {msg}"),
        }
    }

    /// Re-issue the follow-dependent subscriptions on every open connection.
    /// A REQ under an existing subscription id replaces its filter set.
    fn resync_following(&self) {
        let frames = [
            wire::req(SUB_FOLLOWING_METADATA, &self.metadata_filter()),
            wire::req(SUB_FOLLOWING_NOTES, &self.notes_filter()),
        ];
        for outbound in self.conns.values() {
            for frame in &frames {
                let _ = outbound.send(frame.clone());
            }
        }
    }

    /// Re-issue the replies subscription on every open connection.
    fn resync_replies(&self) {
        let frame = wire::req(SUB_EVENT_REPLIES, &self.replies_filter());
        for outbound in self.conns.values() {
            let _ = outbound.send(frame.clone());
        }
    }

    fn metadata_filter(&self) -> Filter {
        Filter {
            kinds: Some(vec![KIND_METADATA]),
            authors: Some(self.authors()),
            ..Filter::default()
        }
    }

    fn notes_filter(&self) -> Filter {
        Filter {
            kinds: Some(vec![KIND_TEXT_NOTE]),
            authors: Some(self.authors()),
            since: Some(keys::unix_now().saturating_sub(LOOKBACK_SECS)),
            limit: Some(NOTE_LIMIT),
            ..Filter::default()
        }
    }

    fn replies_filter(&self) -> Filter {
        let now = keys::unix_now();
        Filter {
            ids: Some(self.store.referenced_ids()),
            since: Some(now.saturating_sub(LOOKBACK_SECS)),
            until: Some(now),
            ..Filter::default()
        }
    }

    fn authors(&self) -> Vec<String> {
        let mut authors: Vec<String> = self.store.following().iter().cloned().collect();
        authors.sort();
        authors
    }

    fn publish(&self, template: EventTemplate, targets: Option<Vec<String>>) {
        let targets =
            targets.unwrap_or_else(|| self.store.relays().iter().cloned().collect());
        let ev = match self.keys.sign(&template) {
            Ok(ev) => ev,
            Err(e) => {
                warn!("signing failed: {e}");
                return;
            }
        };
        let frame = wire::event(&ev);
        for url in targets {
            match self.conns.get(&url) {
                Some(outbound) => {
                    let _ = outbound.send(frame.clone());
                }
                // No open socket: skipped, not queued.
                None => debug!(%url, "skipping publish, no open connection"),
            }
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|v| *v += 1);
    }
}
