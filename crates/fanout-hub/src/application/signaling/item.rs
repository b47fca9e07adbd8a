//! Negotiation sessions ("items").
//!
//! One task per session.  It owns the session's peers, negotiates offers one
//! at a time in arrival order, turns peer events into observer callbacks, and
//! decides when the session is over.
//!
//! ```text
//!  Created ──offer──▶ Negotiating ──answer──▶ (peer added) ──Connected──▶ on_connect
//!                          │ step failed / cancelled
//!                          ▼
//!                 partial peer closed, reply dropped
//!
//!  lifetime cap │ anchor peer left │ last playback viewer left │ hub stopped
//!               ▼
//!          Completed: peers closed, on_close per connected peer,
//!          active count decremented, hub told to free the key
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fanout_core::{
    Address, ConnId, Frame, HubId, ItemKey, PeerRole, Protocol, SequenceCounter, SessionCodec,
    SessionDescription, SessionKind, TokenError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hub::{SignalingHub, SignalingInner};
use super::peer::{
    PeerConnector, PeerError, PeerEvent, PeerEventKind, PeerEvents, PeerSession, PeerSpec,
    PeerState,
};
use super::{Answer, NegotiationError};
use crate::application::connection::ConnectionHandle;
use crate::application::observer::{guarded, ConnectionObserver};

pub(crate) type Reply = oneshot::Sender<Result<Answer, NegotiationError>>;

/// An offer waiting to be negotiated.
pub(crate) struct PendingOffer {
    pub(crate) offer: SessionDescription,
    pub(crate) role: PeerRole,
    pub(crate) reply: Reply,
    pub(crate) cancel: CancellationToken,
}

pub(crate) enum ItemCommand {
    Offer(PendingOffer),
    /// `conn_id: None` sends to every connected peer.
    Send {
        conn_id: Option<ConnId>,
        frame: Frame,
    },
    Evict(ConnId),
}

/// Sent to the hub loop when a session ends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    pub(crate) key: ItemKey,
    pub(crate) instance: u64,
}

/// The hub loop's view of a running session.
pub(crate) struct ItemEntry {
    pub(crate) kind: SessionKind,
    pub(crate) instance: u64,
    commands: mpsc::UnboundedSender<ItemCommand>,
}

impl ItemEntry {
    /// Returns `false` once the session task has finished.
    pub(crate) fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queues a command.  If the session already ended the command is dropped,
    /// which for an offer means the caller sees [`NegotiationError::Failed`].
    pub(crate) fn submit(&self, command: ItemCommand) {
        let _ = self.commands.send(command);
    }
}

/// Everything a new session needs from its hub.
pub(crate) struct ItemContext {
    pub(crate) hub_id: HubId,
    pub(crate) hub: Weak<SignalingInner>,
    pub(crate) connector: Arc<dyn PeerConnector>,
    pub(crate) observer: Arc<dyn ConnectionObserver>,
    pub(crate) codec: Arc<dyn SessionCodec>,
    pub(crate) conn_ids: Arc<SequenceCounter>,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) completions: mpsc::UnboundedSender<Completion>,
    pub(crate) write_wait: Duration,
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("caller stopped waiting")]
    Cancelled,
    #[error("session is closing")]
    Halted,
}

/// The session was stopped while an offer was in flight.
#[derive(Debug)]
struct Halted;

fn halt_reason(shutdown: &CancellationToken) -> &'static str {
    if shutdown.is_cancelled() {
        "hub stopped"
    } else {
        "lifetime cap reached"
    }
}

struct Peer {
    address: Address,
    role: PeerRole,
    session: Box<dyn PeerSession>,
    connected: bool,
}

pub(crate) struct Item {
    key: ItemKey,
    kind: SessionKind,
    instance: u64,
    peers: HashMap<ConnId, Peer>,
    events: mpsc::UnboundedSender<PeerEvent>,
    ctx: Arc<ItemContext>,
}

impl Item {
    /// Starts a session task and returns the entry the hub loop keeps.
    pub(crate) fn spawn(
        key: ItemKey,
        kind: SessionKind,
        instance: u64,
        lifetime: Option<Duration>,
        ctx: Arc<ItemContext>,
        shutdown: CancellationToken,
    ) -> ItemEntry {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        ctx.active.fetch_add(1, Ordering::SeqCst);

        let item = Item {
            key,
            kind,
            instance,
            peers: HashMap::new(),
            events: events_tx,
            ctx,
        };
        let deadline = lifetime.map(|d| Instant::now() + d);
        tokio::spawn(item.run(commands_rx, events_rx, deadline, shutdown));

        ItemEntry {
            kind,
            instance,
            commands: commands_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ItemCommand>,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
        deadline: Option<Instant>,
        shutdown: CancellationToken,
    ) {
        info!(
            "webrtc hub {} item {}: {:?} session started",
            self.ctx.hub_id, self.key, self.kind
        );
        // Fires on hub shutdown or at the lifetime cap, whichever comes first.
        // Negotiation steps race against it too, so a stuck peer cannot hold
        // the session open.
        let halt = shutdown.child_token();
        if let Some(at) = deadline {
            let timer = halt.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep_until(at) => timer.cancel(),
                    _ = timer.cancelled() => {}
                }
            });
        }
        let _stop_timer = halt.clone().drop_guard();

        let reason = loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => break halt_reason(&shutdown),
                Some(event) = events.recv() => {
                    if let Some(reason) = self.on_peer_event(event).await {
                        break reason;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(reason) = self.on_command(command, &halt, &shutdown).await {
                            break reason;
                        }
                    }
                    None => break "hub stopped",
                },
            }
        };

        // Queued offers are dropped with their replies.
        commands.close();
        while commands.try_recv().is_ok() {}

        self.complete(reason).await;
    }

    async fn on_command(
        &mut self,
        command: ItemCommand,
        halt: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Option<&'static str> {
        match command {
            ItemCommand::Offer(pending) => {
                if self.negotiate(pending, halt).await.is_err() {
                    return Some(halt_reason(shutdown));
                }
                self.peers
                    .is_empty()
                    .then_some("no peer left after negotiation")
            }
            ItemCommand::Send {
                conn_id: Some(conn_id),
                frame,
            } => {
                if self.write(conn_id, &frame).await {
                    None
                } else {
                    self.remove_peer(conn_id, "write failed").await
                }
            }
            ItemCommand::Send {
                conn_id: None,
                frame,
            } => {
                let ids: Vec<ConnId> = self.peers.keys().copied().collect();
                let mut failed = Vec::new();
                for conn_id in ids {
                    if !self.write(conn_id, &frame).await {
                        failed.push(conn_id);
                    }
                }
                for conn_id in failed {
                    if let Some(reason) = self.remove_peer(conn_id, "write failed").await {
                        return Some(reason);
                    }
                }
                None
            }
            ItemCommand::Evict(conn_id) => self.remove_peer(conn_id, "unregistered").await,
        }
    }

    // ── Negotiation ───────────────────────────────────────────────────────────

    /// Negotiates one offer.  Returns `Err(Halted)` if the session was told
    /// to stop mid-negotiation; the reply is then dropped and the caller sees
    /// [`NegotiationError::Failed`].
    async fn negotiate(
        &mut self,
        pending: PendingOffer,
        halt: &CancellationToken,
    ) -> Result<(), Halted> {
        let PendingOffer {
            offer,
            role,
            reply,
            cancel,
        } = pending;
        if halt.is_cancelled() {
            return Err(Halted);
        }
        if cancel.is_cancelled() || reply.is_closed() {
            debug!(
                "webrtc hub {} item {}: caller gone, offer skipped",
                self.ctx.hub_id, self.key
            );
            return Ok(());
        }

        let conn_id = self.ctx.conn_ids.next();
        let address = Address::new(Protocol::Webrtc, self.ctx.hub_id, self.key, conn_id);
        let spec = PeerSpec {
            address,
            kind: self.kind,
            role,
        };
        let events = PeerEvents::new(conn_id, self.events.clone());

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = halt.cancelled() => Err(StepError::Halted),
            opened = self.ctx.connector.open(&spec, events) => opened.map_err(StepError::from),
        };
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!("{address}: negotiation abandoned: {e}");
                return match e {
                    StepError::Halted => Err(Halted),
                    _ => Ok(()),
                };
            }
        };

        let answered = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = halt.cancelled() => Err(StepError::Halted),
            answer = answer_offer(session.as_mut(), &offer) => answer,
        };
        let token = answered.and_then(|answer| Ok(self.ctx.codec.encode(&answer)?));

        match token {
            Ok(token) => match reply.send(Ok(Answer { token, address })) {
                Ok(()) => {
                    info!("{address}: answer delivered ({role:?})");
                    self.peers.insert(
                        conn_id,
                        Peer {
                            address,
                            role,
                            session,
                            connected: false,
                        },
                    );
                }
                Err(_) => {
                    debug!("{address}: caller left before the answer, peer closed");
                    close_session(session.as_mut(), &address, self.ctx.write_wait).await;
                }
            },
            Err(e) => {
                warn!("{address}: negotiation abandoned: {e}");
                close_session(session.as_mut(), &address, self.ctx.write_wait).await;
                // Dropping the reply tells the caller the negotiation failed.
                drop(reply);
                if matches!(e, StepError::Halted) {
                    return Err(Halted);
                }
            }
        }
        Ok(())
    }

    // ── Peer events ───────────────────────────────────────────────────────────

    async fn on_peer_event(&mut self, event: PeerEvent) -> Option<&'static str> {
        let conn_id = event.conn_id;
        match event.kind {
            PeerEventKind::State(PeerState::Connected) => {
                let peer = self.peers.get_mut(&conn_id)?;
                if peer.connected {
                    return None;
                }
                peer.connected = true;
                let address = peer.address;
                info!("{address}: connected");
                if let Some(handle) = self.handle_for(address) {
                    guarded("on_connect", &handle, || self.ctx.observer.on_connect(&handle));
                }
                None
            }
            PeerEventKind::State(state) if state.is_terminal() => {
                self.remove_peer(conn_id, "peer disconnected").await
            }
            PeerEventKind::State(_) => None,
            PeerEventKind::Message(data) => {
                let peer = self.peers.get(&conn_id).filter(|p| p.connected)?;
                if let Some(handle) = self.handle_for(peer.address) {
                    guarded("on_message", &handle, || {
                        self.ctx.observer.on_message(&handle, &data)
                    });
                }
                None
            }
        }
    }

    // ── Peer bookkeeping ──────────────────────────────────────────────────────

    async fn write(&mut self, conn_id: ConnId, frame: &Frame) -> bool {
        let write_wait = self.ctx.write_wait;
        let Some(peer) = self.peers.get_mut(&conn_id) else {
            return true;
        };
        if !peer.connected || !peer.session.has_data_channel() {
            return true;
        }
        match timeout(write_wait, peer.session.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("{}: write failed: {e}", peer.address);
                false
            }
            Err(_) => {
                debug!("{}: write exceeded {write_wait:?}", peer.address);
                false
            }
        }
    }

    /// Removes a peer and reports why the session should end, if it should.
    async fn remove_peer(&mut self, conn_id: ConnId, reason: &str) -> Option<&'static str> {
        let mut peer = self.peers.remove(&conn_id)?;
        info!("{}: removed ({reason})", peer.address);
        self.retire(&mut peer).await;

        if peer.role.is_anchor() {
            Some("anchor peer left")
        } else if self.kind.completes_when_empty() && self.peers.is_empty() {
            Some("last viewer left")
        } else {
            None
        }
    }

    async fn retire(&mut self, peer: &mut Peer) {
        close_session(peer.session.as_mut(), &peer.address, self.ctx.write_wait).await;
        if peer.connected {
            if let Some(handle) = self.handle_for(peer.address) {
                guarded("on_close", &handle, || self.ctx.observer.on_close(&handle));
            }
        }
    }

    async fn complete(mut self, reason: &str) {
        info!(
            "webrtc hub {} item {}: {:?} session completed ({reason})",
            self.ctx.hub_id, self.key, self.kind
        );
        let peers = std::mem::take(&mut self.peers);
        for (_, mut peer) in peers {
            self.retire(&mut peer).await;
        }

        let _ = self
            .ctx
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        let _ = self.ctx.completions.send(Completion {
            key: self.key,
            instance: self.instance,
        });
    }

    fn handle_for(&self, address: Address) -> Option<ConnectionHandle> {
        let inner = self.ctx.hub.upgrade()?;
        Some(ConnectionHandle::signaling(
            address,
            SignalingHub::from_inner(inner),
        ))
    }
}

async fn close_session(session: &mut dyn PeerSession, address: &Address, write_wait: Duration) {
    if timeout(write_wait, session.close()).await.is_err() {
        debug!("{address}: close exceeded {write_wait:?}");
    }
}

/// Runs the offer/answer steps on a fresh peer.
async fn answer_offer(
    session: &mut dyn PeerSession,
    offer: &SessionDescription,
) -> Result<SessionDescription, StepError> {
    session.set_remote_description(offer).await?;
    let answer = session.create_answer().await?;
    session.set_local_description(&answer).await?;
    Ok(session.local_description().await?)
}
