//! The hub registry: every hub of the process, keyed by hub id.
//!
//! Application code builds one [`HubRegistry`] at startup and passes it down;
//! there is no global instance, so tests build as many isolated registries as
//! they like.
//!
//! # Hub ids
//!
//! A hub id is the creation time in Unix seconds, bumped past the previous id
//! when two hubs are created within the same second.  Ids are therefore
//! unique and increasing for the life of the registry, and an address minted
//! by a hub from a previous process run never matches a live hub.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use fanout_core::{
    least_loaded, Address, HubConfig, HubId, ItemKey, LivenessConfig, Payload, Protocol,
    SignalingConfig,
};
use thiserror::Error;
use tracing::{info, trace};

use super::hub::Hub;
use super::observer::ConnectionObserver;
use super::signaling::{PeerConnector, SignalingHub};

/// Errors returned when creating hubs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The protocol is switched off for this process.
    #[error("{0} connections are disabled")]
    Disabled(Protocol),

    /// The protocol needs the other kind of hub.
    #[error("{0} is not served by this kind of hub")]
    WrongKind(Protocol),
}

/// Which protocols may have hubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledProtocols {
    pub ws: bool,
    pub sse: bool,
    pub webrtc: bool,
}

impl EnabledProtocols {
    pub fn all() -> Self {
        Self {
            ws: true,
            sse: true,
            webrtc: true,
        }
    }

    pub fn none() -> Self {
        Self {
            ws: false,
            sse: false,
            webrtc: false,
        }
    }

    /// Returns a copy with one protocol switched on or off.
    pub fn with(mut self, protocol: Protocol, enabled: bool) -> Self {
        match protocol {
            Protocol::Ws => self.ws = enabled,
            Protocol::Sse => self.sse = enabled,
            Protocol::Webrtc => self.webrtc = enabled,
        }
        self
    }

    pub fn contains(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Ws => self.ws,
            Protocol::Sse => self.sse,
            Protocol::Webrtc => self.webrtc,
        }
    }
}

impl Default for EnabledProtocols {
    /// WebSocket only; SSE and WebRTC must be switched on explicitly.
    fn default() -> Self {
        Self::none().with(Protocol::Ws, true)
    }
}

/// A hub as stored in the registry.
#[derive(Debug, Clone)]
pub enum RegisteredHub {
    Sharded(Hub),
    Signaling(SignalingHub),
}

impl RegisteredHub {
    pub fn id(&self) -> HubId {
        match self {
            RegisteredHub::Sharded(hub) => hub.id(),
            RegisteredHub::Signaling(hub) => hub.id(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            RegisteredHub::Sharded(hub) => hub.protocol(),
            RegisteredHub::Signaling(_) => Protocol::Webrtc,
        }
    }

    fn send_to(&self, address: &Address, payload: Payload) {
        match self {
            RegisteredHub::Sharded(hub) => hub.send_to(address, payload),
            RegisteredHub::Signaling(hub) => hub.send_to(address, payload),
        }
    }

    fn send_all(&self, payload: Payload) {
        match self {
            RegisteredHub::Sharded(hub) => hub.send_all(payload),
            RegisteredHub::Signaling(hub) => hub.send_all(payload),
        }
    }

    fn shutdown(&self) {
        match self {
            RegisteredHub::Sharded(hub) => hub.shutdown(),
            RegisteredHub::Signaling(hub) => hub.shutdown(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    hubs: BTreeMap<HubId, RegisteredHub>,
    last_id: HubId,
}

impl RegistryState {
    fn next_id(&mut self) -> HubId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let id = now.max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }
}

/// Every hub of the process.
pub struct HubRegistry {
    enabled: EnabledProtocols,
    state: RwLock<RegistryState>,
}

impl HubRegistry {
    pub fn new(enabled: EnabledProtocols) -> Self {
        Self {
            enabled,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn enabled(&self) -> EnabledProtocols {
        self.enabled
    }

    // ── Creation ──────────────────────────────────────────────────────────────

    /// Creates a sharded hub for `ws` or `sse`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::WrongKind`] for `webrtc`, [`RegistryError::Disabled`]
    /// if the protocol is switched off.
    pub fn register_hub(
        &self,
        protocol: Protocol,
        config: &HubConfig,
        liveness: LivenessConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Hub, RegistryError> {
        self.check(protocol, true)?;
        let mut state = self.write();
        let id = state.next_id();
        let hub = Hub::new(protocol, id, config, liveness, observer);
        state.hubs.insert(id, RegisteredHub::Sharded(hub.clone()));
        info!("registry: {protocol} hub {id} registered");
        Ok(hub)
    }

    /// Returns the first sharded hub for `protocol`, creating it on first use.
    ///
    /// # Errors
    ///
    /// As [`register_hub`](Self::register_hub).
    pub fn get_or_register_hub(
        &self,
        protocol: Protocol,
        config: &HubConfig,
        liveness: LivenessConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Hub, RegistryError> {
        self.check(protocol, true)?;
        let mut state = self.write();
        let existing = state.hubs.values().find_map(|hub| match hub {
            RegisteredHub::Sharded(hub) if hub.protocol() == protocol => Some(hub.clone()),
            _ => None,
        });
        if let Some(hub) = existing {
            return Ok(hub);
        }
        let id = state.next_id();
        let hub = Hub::new(protocol, id, config, liveness, observer);
        state.hubs.insert(id, RegisteredHub::Sharded(hub.clone()));
        info!("registry: {protocol} hub {id} registered on first use");
        Ok(hub)
    }

    /// Creates a WebRTC signaling hub.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Disabled`] if WebRTC is switched off.
    pub fn register_signaling_hub(
        &self,
        config: SignalingConfig,
        connector: Arc<dyn PeerConnector>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<SignalingHub, RegistryError> {
        self.check(Protocol::Webrtc, false)?;
        let mut state = self.write();
        let id = state.next_id();
        let hub = SignalingHub::new(id, config, connector, observer);
        state.hubs.insert(id, RegisteredHub::Signaling(hub.clone()));
        info!("registry: webrtc hub {id} registered");
        Ok(hub)
    }

    fn check(&self, protocol: Protocol, sharded: bool) -> Result<(), RegistryError> {
        if protocol.is_sharded() != sharded {
            return Err(RegistryError::WrongKind(protocol));
        }
        if !self.enabled.contains(protocol) {
            return Err(RegistryError::Disabled(protocol));
        }
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    pub fn hub(&self, id: HubId) -> Option<RegisteredHub> {
        self.read().hubs.get(&id).cloned()
    }

    /// All hubs of one protocol, oldest first.
    pub fn hubs(&self, protocol: Protocol) -> Vec<RegisteredHub> {
        self.read()
            .hubs
            .values()
            .filter(|hub| hub.protocol() == protocol)
            .cloned()
            .collect()
    }

    /// The signaling hub with the fewest running sessions, oldest first on
    /// ties.
    pub fn least_loaded_signaling_hub(&self) -> Option<SignalingHub> {
        let hubs = self.signaling_hubs();
        let index = least_loaded(hubs.iter().map(SignalingHub::active_items))?;
        hubs.into_iter().nth(index)
    }

    /// The signaling hub currently running a session with this key.
    pub async fn signaling_hub_for_item(&self, key: ItemKey) -> Option<SignalingHub> {
        for hub in self.signaling_hubs() {
            if hub.item_kind(key).await.is_some() {
                return Some(hub);
            }
        }
        None
    }

    fn signaling_hubs(&self) -> Vec<SignalingHub> {
        self.read()
            .hubs
            .values()
            .filter_map(|hub| match hub {
                RegisteredHub::Signaling(hub) => Some(hub.clone()),
                RegisteredHub::Sharded(_) => None,
            })
            .collect()
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Sends to one connection of any hub.  Invalid or stale addresses are
    /// ignored.
    pub fn send(&self, address: &str, payload: impl Into<Payload>) {
        let address = match Address::parse(address) {
            Ok(address) => address,
            Err(e) => {
                trace!("registry: dropping send to {address:?}: {e}");
                return;
            }
        };
        match self.hub(address.hub_id) {
            Some(hub) => hub.send_to(&address, payload.into()),
            None => trace!("registry: no hub {} for {address}", address.hub_id),
        }
    }

    /// Broadcasts to every connection of every hub of one protocol.
    pub fn send_all(&self, protocol: Protocol, payload: impl Into<Payload>) {
        let payload = payload.into();
        for hub in self.hubs(protocol) {
            hub.send_all(payload.clone());
        }
    }

    /// Shuts down every hub.
    pub fn shutdown(&self) {
        for hub in self.read().hubs.values() {
            hub.shutdown();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new(EnabledProtocols::default())
    }
}
