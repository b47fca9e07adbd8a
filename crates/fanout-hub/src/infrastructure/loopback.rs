//! In-process WebRTC stand-in.
//!
//! [`LoopbackConnector`] answers every offer without ICE or DTLS: the answer
//! SDP is `answer:` followed by the offer SDP.  Each peer it creates is
//! recorded as a [`LoopbackPeer`] handle through which a test (or a demo
//! binary) plays the remote browser: connect, send data-channel messages,
//! disconnect, and inspect what the hub wrote.
//!
//! Failures and slow answers can be injected per negotiation step.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{Address, Frame, SessionDescription};

use crate::application::signaling::{
    PeerConnector, PeerError, PeerEvents, PeerSession, PeerSpec, PeerState,
};

/// A step of the offer/answer exchange where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Open,
    SetRemote,
    CreateAnswer,
    SetLocal,
    LocalDescription,
}

#[derive(Debug, Default)]
struct ConnectorState {
    fail_next: Option<NegotiationStep>,
    answer_delay: Option<Duration>,
    peers: Vec<LoopbackPeer>,
}

/// A [`PeerConnector`] whose peers live in this process.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    state: Arc<Mutex<ConnectorState>>,
    opened: Arc<AtomicUsize>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next negotiation fail at `step`.
    pub fn fail_next(&self, step: NegotiationStep) {
        self.lock().fail_next = Some(step);
    }

    /// Delays every answer by `delay`.  `None` answers immediately.
    pub fn set_answer_delay(&self, delay: Option<Duration>) {
        self.lock().answer_delay = delay;
    }

    /// Every peer created so far, oldest first.
    pub fn peers(&self) -> Vec<LoopbackPeer> {
        self.lock().peers.clone()
    }

    pub fn last_peer(&self) -> Option<LoopbackPeer> {
        self.lock().peers.last().cloned()
    }

    pub fn peer(&self, address: &Address) -> Option<LoopbackPeer> {
        self.lock()
            .peers
            .iter()
            .find(|p| p.address() == *address)
            .cloned()
    }

    /// Number of `open` calls, failed ones included.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn open(
        &self,
        spec: &PeerSpec,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerSession>, PeerError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (fail_at, delay) = {
            let mut state = self.lock();
            (state.fail_next.take(), state.answer_delay)
        };
        if fail_at == Some(NegotiationStep::Open) {
            return Err(PeerError::Setup("injected failure".to_string()));
        }

        let peer = LoopbackPeer {
            shared: Arc::new(PeerShared {
                spec: spec.clone(),
                events,
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
            }),
        };
        self.lock().peers.push(peer.clone());

        Ok(Box::new(LoopbackSession {
            peer,
            fail_at,
            delay,
            remote: None,
            local: None,
        }))
    }
}

#[derive(Debug)]
struct PeerShared {
    spec: PeerSpec,
    events: PeerEvents,
    sent: Mutex<Vec<Frame>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// Remote-side handle of one loopback peer.
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    shared: Arc<PeerShared>,
}

impl LoopbackPeer {
    pub fn spec(&self) -> &PeerSpec {
        &self.shared.spec
    }

    pub fn address(&self) -> Address {
        self.shared.spec.address
    }

    /// Reports the peer as connected.
    pub fn connect(&self) {
        self.shared.events.state_changed(PeerState::Connected);
    }

    /// Reports the peer as gone.
    pub fn disconnect(&self) {
        self.shared.events.state_changed(PeerState::Disconnected);
    }

    /// Sends a data-channel message to the hub.
    pub fn deliver(&self, data: impl Into<Bytes>) {
        self.shared.events.message(data);
    }

    /// Frames the hub wrote to this peer.
    pub fn sent(&self) -> Vec<Frame> {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Makes every later data-channel write fail.
    pub fn fail_sends(&self) {
        self.shared.fail_sends.store(true, Ordering::SeqCst);
    }
}

struct LoopbackSession {
    peer: LoopbackPeer,
    fail_at: Option<NegotiationStep>,
    delay: Option<Duration>,
    remote: Option<SessionDescription>,
    local: Option<SessionDescription>,
}

impl LoopbackSession {
    fn check(&self, step: NegotiationStep) -> Result<(), PeerError> {
        if self.fail_at == Some(step) {
            return Err(PeerError::Description(format!("injected failure at {step:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for LoopbackSession {
    async fn set_remote_description(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<(), PeerError> {
        self.check(NegotiationStep::SetRemote)?;
        self.remote = Some(offer.clone());
        Ok(())
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check(NegotiationStep::CreateAnswer)?;
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| PeerError::Description("no remote description".to_string()))?;
        Ok(SessionDescription::answer(format!("answer:{}", remote.sdp)))
    }

    async fn set_local_description(
        &mut self,
        answer: &SessionDescription,
    ) -> Result<(), PeerError> {
        self.check(NegotiationStep::SetLocal)?;
        self.local = Some(answer.clone());
        Ok(())
    }

    async fn local_description(&mut self) -> Result<SessionDescription, PeerError> {
        self.check(NegotiationStep::LocalDescription)?;
        self.local
            .clone()
            .ok_or_else(|| PeerError::Description("no local description".to_string()))
    }

    fn has_data_channel(&self) -> bool {
        true
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), PeerError> {
        let shared = &self.peer.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        if shared.fail_sends.load(Ordering::SeqCst) {
            return Err(PeerError::Write("injected failure".to_string()));
        }
        shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.peer.shared.closed.store(true, Ordering::SeqCst);
    }
}
