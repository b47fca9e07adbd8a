//! The signaling hub: owns the session table and routes offers and messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fanout_core::{
    admit, Address, Admission, Base64JsonCodec, ConnId, Frame, HubId, Intent, ItemKey, Payload,
    Protocol, Rejection, SequenceCounter, SessionCodec, SessionDescription, SessionKind,
    SignalingConfig,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::item::{Completion, Item, ItemCommand, ItemContext, ItemEntry, PendingOffer, Reply};
use super::peer::PeerConnector;
use super::{Answer, NegotiationError, NegotiationRequest};
use crate::application::observer::ConnectionObserver;

enum HubCommand {
    Negotiate {
        kind: SessionKind,
        intent: Intent,
        key: Option<ItemKey>,
        offer: SessionDescription,
        max_lifetime: Option<Duration>,
        reply: Reply,
        cancel: CancellationToken,
    },
    Send {
        key: ItemKey,
        conn_id: Option<ConnId>,
        frame: Frame,
    },
    SendAll {
        frame: Frame,
    },
    Evict {
        key: ItemKey,
        conn_id: ConnId,
    },
    Lookup {
        key: ItemKey,
        reply: oneshot::Sender<Option<SessionKind>>,
    },
}

pub(crate) struct SignalingInner {
    id: HubId,
    commands: mpsc::UnboundedSender<HubCommand>,
    active: Arc<AtomicUsize>,
    codec: Arc<dyn SessionCodec>,
    config: SignalingConfig,
    shutdown: CancellationToken,
}

/// A WebRTC signaling hub.
///
/// Cheap to clone.  The dispatch task and every session stop when
/// [`shutdown`](Self::shutdown) is called or the last clone is dropped.
#[derive(Clone)]
pub struct SignalingHub {
    inner: Arc<SignalingInner>,
}

impl SignalingHub {
    /// Creates a hub using the base64-JSON token codec.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        id: HubId,
        config: SignalingConfig,
        connector: Arc<dyn PeerConnector>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self::with_codec(id, config, connector, observer, Arc::new(Base64JsonCodec))
    }

    /// Creates a hub with a custom token codec.
    pub fn with_codec(
        id: HubId,
        config: SignalingConfig,
        connector: Arc<dyn PeerConnector>,
        observer: Arc<dyn ConnectionObserver>,
        codec: Arc<dyn SessionCodec>,
    ) -> Self {
        let (commands, requests) = mpsc::unbounded_channel();
        let (completions, finished) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak: &Weak<SignalingInner>| {
            let ctx = Arc::new(ItemContext {
                hub_id: id,
                hub: weak.clone(),
                connector,
                observer,
                codec: Arc::clone(&codec),
                conn_ids: Arc::new(SequenceCounter::starting_at(1)),
                active: Arc::clone(&active),
                completions,
                write_wait: config.write_wait,
            });
            let dispatcher = Dispatcher {
                items: HashMap::new(),
                assigned_keys: SequenceCounter::starting_at(
                    config.assigned_key_floor.saturating_add(1),
                ),
                instances: 0,
                ctx,
                shutdown: shutdown.clone(),
            };
            tokio::spawn(dispatcher.run(requests, finished));

            SignalingInner {
                id,
                commands,
                active,
                codec,
                config,
                shutdown,
            }
        });

        info!("webrtc hub {id}: started");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SignalingInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> HubId {
        self.inner.id
    }

    /// Sessions currently running.
    pub fn active_items(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Default deadline for [`negotiate_with_timeout`](Self::negotiate_with_timeout).
    pub fn negotiation_timeout(&self) -> Duration {
        self.inner.config.negotiation_timeout
    }

    // ── Negotiation ───────────────────────────────────────────────────────────

    /// Negotiates an offer, waiting until an answer is produced, the attempt
    /// fails, or `cancel` fires.
    ///
    /// Cancelling also makes the session abandon the attempt and close the
    /// partially built peer.
    ///
    /// # Errors
    ///
    /// See [`NegotiationError`].  A session that gives up on the offer
    /// yields [`NegotiationError::Failed`]; cancellation yields
    /// [`NegotiationError::Cancelled`].
    pub async fn negotiate(
        &self,
        request: NegotiationRequest,
        cancel: CancellationToken,
    ) -> Result<Answer, NegotiationError> {
        let offer = self.inner.codec.decode_offer(&request.offer)?;
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(HubCommand::Negotiate {
                kind: request.kind,
                intent: request.intent,
                key: request.key,
                offer,
                max_lifetime: request.max_lifetime,
                reply,
                cancel: cancel.clone(),
            })
            .map_err(|_| NegotiationError::HubClosed)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NegotiationError::Cancelled),
            result = response => result.unwrap_or(Err(NegotiationError::Failed)),
        }
    }

    /// Negotiates an offer with a deadline.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Timeout`] if no answer arrives in time, otherwise
    /// as [`negotiate`](Self::negotiate).
    pub async fn negotiate_with_timeout(
        &self,
        request: NegotiationRequest,
        deadline: Duration,
    ) -> Result<Answer, NegotiationError> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(deadline, self.negotiate(request, cancel.clone())).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                debug!("webrtc hub {}: negotiation timed out after {deadline:?}", self.id());
                Err(NegotiationError::Timeout)
            }
        }
    }

    /// Returns the kind of the running session with this key, if any.
    pub async fn item_kind(&self, key: ItemKey) -> Option<SessionKind> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(HubCommand::Lookup { key, reply })
            .ok()?;
        response.await.ok().flatten()
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Sends to one peer by address string.  Invalid or stale addresses are
    /// ignored.
    pub fn send(&self, address: &str, payload: impl Into<Payload>) {
        match Address::parse(address) {
            Ok(address) => self.send_to(&address, payload),
            Err(e) => trace!("webrtc hub {}: dropping send to {address:?}: {e}", self.id()),
        }
    }

    /// Sends to one peer by parsed address.
    pub fn send_to(&self, address: &Address, payload: impl Into<Payload>) {
        if self.owns(address) {
            self.submit(HubCommand::Send {
                key: address.slot,
                conn_id: Some(address.conn_id),
                frame: payload.into().into_frame(),
            });
        }
    }

    /// Sends to every connected peer of every broadcast-eligible session.
    pub fn send_all(&self, payload: impl Into<Payload>) {
        self.submit(HubCommand::SendAll {
            frame: payload.into().into_frame(),
        });
    }

    pub(crate) fn evict(&self, address: &Address) {
        if self.owns(address) {
            self.submit(HubCommand::Evict {
                key: address.slot,
                conn_id: address.conn_id,
            });
        }
    }

    /// Stops the dispatch task and completes every session.
    pub fn shutdown(&self) {
        info!("webrtc hub {}: shutting down", self.id());
        self.inner.shutdown.cancel();
    }

    fn owns(&self, address: &Address) -> bool {
        let owned = address.protocol == Protocol::Webrtc
            && address.hub_id == self.id()
            && address.slot > 0
            && address.conn_id > 0;
        if !owned {
            trace!("webrtc hub {}: {address} does not belong here", self.id());
        }
        owned
    }

    fn submit(&self, command: HubCommand) {
        let _ = self.inner.commands.send(command);
    }
}

impl std::fmt::Debug for SignalingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHub")
            .field("id", &self.id())
            .field("active_items", &self.active_items())
            .finish()
    }
}

// ── Dispatch task ─────────────────────────────────────────────────────────────

struct Dispatcher {
    items: HashMap<ItemKey, ItemEntry>,
    assigned_keys: SequenceCounter,
    instances: u64,
    ctx: Arc<ItemContext>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<HubCommand>,
        mut finished: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(done) = finished.recv() => self.on_completed(done),
                request = requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
            }
        }
        // Sessions hold a child token and complete on their own.
        self.shutdown.cancel();
        debug!("webrtc hub {}: dispatch stopped", self.ctx.hub_id);
    }

    fn handle(&mut self, request: HubCommand) {
        match request {
            HubCommand::Negotiate {
                kind,
                intent,
                key,
                offer,
                max_lifetime,
                reply,
                cancel,
            } => {
                let pending = PendingOffer {
                    offer,
                    role: kind.creator_role(),
                    reply,
                    cancel,
                };
                self.negotiate(kind, intent, key, max_lifetime, pending);
            }
            HubCommand::Send {
                key,
                conn_id,
                frame,
            } => match self.items.get(&key) {
                Some(entry) => entry.submit(ItemCommand::Send { conn_id, frame }),
                None => trace!("webrtc hub {}: no item {key}, message dropped", self.ctx.hub_id),
            },
            HubCommand::SendAll { frame } => {
                for entry in self.items.values().filter(|e| e.kind.receives_broadcast()) {
                    entry.submit(ItemCommand::Send {
                        conn_id: None,
                        frame: frame.clone(),
                    });
                }
            }
            HubCommand::Evict { key, conn_id } => {
                if let Some(entry) = self.items.get(&key) {
                    entry.submit(ItemCommand::Evict(conn_id));
                }
            }
            HubCommand::Lookup { key, reply } => {
                let kind = self
                    .items
                    .get(&key)
                    .filter(|e| e.is_running())
                    .map(|e| e.kind);
                let _ = reply.send(kind);
            }
        }
    }

    fn negotiate(
        &mut self,
        kind: SessionKind,
        intent: Intent,
        key: Option<ItemKey>,
        max_lifetime: Option<Duration>,
        mut pending: PendingOffer,
    ) {
        // Key 0 never appears in an address, so it cannot name a session.
        let key = key.filter(|k| *k != 0);
        let existing = key
            .and_then(|k| self.items.get(&k))
            .filter(|e| e.is_running())
            .map(|e| e.kind);

        if let (Some(key), Some(existing)) = (key, existing) {
            if existing != kind {
                let _ = pending.reply.send(Err(NegotiationError::KindMismatch {
                    key,
                    existing,
                    requested: kind,
                }));
                return;
            }
        }

        match admit(kind, intent, existing.is_some()) {
            Admission::Reject(Rejection::AlreadyProvisioned) => {
                let _ = pending.reply.send(Err(NegotiationError::AlreadyProvisioned {
                    key: key.unwrap_or_default(),
                }));
            }
            Admission::Reject(Rejection::NotProvisioned) => {
                let _ = pending
                    .reply
                    .send(Err(NegotiationError::NotProvisioned { key }));
            }
            Admission::Forward => {
                pending.role = kind.joiner_role();
                if let Some(entry) = key.and_then(|k| self.items.get(&k)) {
                    entry.submit(ItemCommand::Offer(pending));
                }
            }
            Admission::Create => {
                let key = key.unwrap_or_else(|| self.assign_key());
                let lifetime = max_lifetime.or_else(|| kind.default_lifetime());
                self.instances += 1;
                let entry = Item::spawn(
                    key,
                    kind,
                    self.instances,
                    lifetime,
                    Arc::clone(&self.ctx),
                    self.shutdown.child_token(),
                );
                entry.submit(ItemCommand::Offer(pending));
                self.items.insert(key, entry);
            }
        }
    }

    fn assign_key(&self) -> ItemKey {
        loop {
            let key = self.assigned_keys.next();
            if key != 0 && !self.items.contains_key(&key) {
                return key;
            }
        }
    }

    fn on_completed(&mut self, done: Completion) {
        let current = self.items.get(&done.key).map(|e| e.instance);
        if current == Some(done.instance) {
            self.items.remove(&done.key);
            debug!("webrtc hub {}: item {} released", self.ctx.hub_id, done.key);
        }
    }
}
