//! Sync sessions and the session manager.
//!
//! A session drives one bidirectional exchange with one paired peer over
//! any `AsyncRead + AsyncWrite` stream. The state machine is strict:
//! `Idle → Connecting → Connected → Syncing → SyncComplete`, with
//! `Error` reachable from any non-terminal state and nothing reachable
//! out of a terminal one. Every session, successful or not, leaves a
//! history entry.
//!
//! The manager serializes sessions per (space, peer): a second attempt
//! while one is running is refused rather than queued, and cancellation
//! takes effect at the next delta or batch boundary.

use crate::batch::{BatchAssembler, BatchProcessor, DEFAULT_BATCH_BYTES, DEFAULT_BATCH_ITEMS};
use crate::clock::{SpaceClock, VectorClockStore};
use crate::delta::{ApplyOutcome, DeltaCodec, SkipReason};
use crate::error::{SyncError, SyncResult};
use crate::history::SyncHistoryLedger;
use crate::protocol::{SyncMessage, PROTOCOL_VERSION};
use crate::wire;
use haven_crypto::{derive_session_key, SymmetricKey, KEY_SIZE, SESSION_SALT_SIZE};
use haven_store::{Store, SyncHistoryEntry};
use haven_types::{now_ms, DeviceId, SpaceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// A corrupted-delta rate is only meaningful over a set at least this
/// large; below it a single bad delta would trip any threshold.
const DECRYPT_FAILURE_MIN_SET: usize = 4;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Connecting,
    Connected,
    Syncing,
    SyncComplete,
    Error,
}

impl SyncState {
    /// Whether a transition to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connected, Syncing)
                | (Syncing, SyncComplete)
                | (Idle | Connecting | Connected | Syncing, Error)
        )
    }

    /// True for states no session ever leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::SyncComplete | SyncState::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Syncing => "syncing",
            Self::SyncComplete => "sync_complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entity types to pull; empty means everything.
    pub categories: Vec<String>,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Deadline for any single message exchange.
    pub message_timeout: Duration,
    /// Deadline for the whole session.
    pub session_timeout: Duration,
    pub max_batch_items: usize,
    pub max_batch_bytes: usize,
    /// Fraction of corrupted deltas (over a non-trivial set) above which
    /// the session aborts instead of skipping: a systemic rate means a
    /// key or protocol problem, not line noise.
    pub decrypt_failure_threshold: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(300),
            max_batch_items: DEFAULT_BATCH_ITEMS,
            max_batch_bytes: DEFAULT_BATCH_BYTES,
            decrypt_failure_threshold: 0.5,
        }
    }
}

/// Counters from one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: u32,
    pub pulled: u32,
    pub conflicts: u32,
    pub skipped: u32,
}

/// One sync exchange with one peer in one space.
pub struct SyncSession {
    store: Store,
    codec: DeltaCodec,
    clocks: VectorClockStore,
    ledger: SyncHistoryLedger,
    local_device: DeviceId,
    peer: DeviceId,
    space: SpaceId,
    config: SyncConfig,
    state: Arc<Mutex<SyncState>>,
    cancelled: Arc<AtomicBool>,
}

impl SyncSession {
    pub fn new(
        store: Store,
        local_device: DeviceId,
        peer: DeviceId,
        space: SpaceId,
        config: SyncConfig,
    ) -> Self {
        Self {
            codec: DeltaCodec::new(store.clone(), local_device),
            clocks: VectorClockStore::new(store.clone()),
            ledger: SyncHistoryLedger::new(store.clone()),
            store,
            local_device,
            peer,
            space,
            config,
            state: Arc::new(Mutex::new(SyncState::Idle)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.lock().expect("session state poisoned")
    }

    /// Flag checked at every delta and batch boundary. Setting it makes
    /// the session stop there; already-applied deltas stay applied.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Runs the session as the initiating side.
    pub async fn initiate<S>(&self, stream: &mut S) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.run(stream, true).await
    }

    /// Runs the session as the responding side.
    pub async fn respond<S>(&self, stream: &mut S) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.run(stream, false).await
    }

    async fn run<S>(&self, stream: &mut S, initiator: bool) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let started_at = now_ms();
        let result = match timeout(self.config.session_timeout, self.exchange(stream, initiator))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout { phase: "session" }),
        };

        let mut entry = SyncHistoryEntry::new(
            self.space,
            self.peer,
            "bidirectional",
            started_at,
            now_ms(),
        );
        match &result {
            Ok(report) => {
                entry.entities_pushed = report.pushed;
                entry.entities_pulled = report.pulled;
                entry.conflicts_detected = report.conflicts;
                self.transition(SyncState::SyncComplete)?;
                info!(
                    space = %self.space,
                    peer = %self.peer,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    "sync complete"
                );
            }
            Err(e) => {
                entry.success = false;
                entry.error = Some(e.to_string());
                self.fail();
                error!(space = %self.space, peer = %self.peer, error = %e, "sync failed");
            }
        }
        self.ledger.record(&entry)?;
        result
    }

    async fn exchange<S>(&self, stream: &mut S, initiator: bool) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.transition(SyncState::Connecting)?;
        let session_key = if initiator {
            self.handshake_initiator(stream).await?
        } else {
            self.handshake_responder(stream).await?
        };
        self.transition(SyncState::Connected)?;
        self.transition(SyncState::Syncing)?;

        let local_clock = self.clocks.get_vector_clock(&self.space)?;
        let agreed_marker = local_clock.marker_for(&self.peer);
        let our_request = SyncMessage::SyncRequest {
            space_id: self.space,
            categories: self.config.categories.clone(),
            clock: local_clock,
        };

        // Clock exchange, then strict turn-taking: the initiator pushes
        // first while the responder applies, then the roles swap.
        let (peer_clock, peer_categories) = if initiator {
            self.send(stream, &our_request).await?;
            self.recv_sync_request(stream).await?
        } else {
            let peer = self.recv_sync_request(stream).await?;
            self.send(stream, &our_request).await?;
            peer
        };

        let mut report = SyncReport::default();
        if initiator {
            report.pushed = self
                .push_deltas(stream, &peer_clock, &peer_categories, &session_key)
                .await?;
            self.apply_pulled(stream, &session_key, agreed_marker, &mut report)
                .await?;
            self.send(
                stream,
                &SyncMessage::Complete {
                    pushed: report.pushed,
                    pulled: report.pulled,
                },
            )
            .await?;
            self.recv_complete(stream).await?;
        } else {
            self.apply_pulled(stream, &session_key, agreed_marker, &mut report)
                .await?;
            report.pushed = self
                .push_deltas(stream, &peer_clock, &peer_categories, &session_key)
                .await?;
            self.recv_complete(stream).await?;
            self.send(
                stream,
                &SyncMessage::Complete {
                    pushed: report.pushed,
                    pulled: report.pulled,
                },
            )
            .await?;
        }

        Ok(report)
    }

    async fn handshake_initiator<S>(&self, stream: &mut S) -> SyncResult<SymmetricKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let salt: [u8; SESSION_SALT_SIZE] = rand::random();
        self.send(
            stream,
            &SyncMessage::hello(self.local_device, self.space, salt.to_vec()),
        )
        .await?;

        match self.recv(stream, "handshake").await? {
            SyncMessage::HelloAck {
                accepted: true,
                device_id,
                protocol_version,
                ..
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(SyncError::Handshake(format!(
                        "peer speaks protocol {protocol_version}, expected {PROTOCOL_VERSION}"
                    )));
                }
                if device_id != self.peer {
                    return Err(SyncError::Handshake(format!(
                        "answered by {device_id}, expected {}",
                        self.peer
                    )));
                }
            }
            SyncMessage::HelloAck { message, .. } => {
                return Err(SyncError::Handshake(
                    message.unwrap_or_else(|| "rejected by peer".to_string()),
                ));
            }
            other => {
                return Err(SyncError::Handshake(format!(
                    "expected hello_ack, got {}",
                    other.kind()
                )));
            }
        }

        self.session_key(&salt)
    }

    async fn handshake_responder<S>(&self, stream: &mut S) -> SyncResult<SymmetricKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (device_id, space_id, salt) = match self.recv(stream, "handshake").await? {
            SyncMessage::Hello {
                protocol_version,
                device_id,
                space_id,
                session_salt,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    let reject = SyncMessage::hello_reject(
                        self.local_device,
                        format!("unsupported protocol version {protocol_version}"),
                    );
                    self.send(stream, &reject).await?;
                    return Err(SyncError::Handshake(format!(
                        "peer speaks protocol {protocol_version}, expected {PROTOCOL_VERSION}"
                    )));
                }
                (device_id, space_id, session_salt)
            }
            other => {
                return Err(SyncError::Handshake(format!(
                    "expected hello, got {}",
                    other.kind()
                )));
            }
        };

        if device_id != self.peer || space_id != self.space {
            let reject = SyncMessage::hello_reject(self.local_device, "unexpected peer or space");
            self.send(stream, &reject).await?;
            return Err(SyncError::Handshake(format!(
                "hello from {device_id} for space {space_id}, expected {} / {}",
                self.peer, self.space
            )));
        }

        let key = match self.session_key(&salt) {
            Ok(key) => key,
            Err(e) => {
                let reject = SyncMessage::hello_reject(self.local_device, "not paired");
                self.send(stream, &reject).await?;
                return Err(e);
            }
        };
        self.send(stream, &SyncMessage::hello_ack(self.local_device))
            .await?;
        Ok(key)
    }

    /// Derives this session's key from the stored pairing key and the
    /// initiator's salt.
    fn session_key(&self, salt: &[u8]) -> SyncResult<SymmetricKey> {
        let bytes = self
            .store
            .pairing_key(&self.peer)?
            .ok_or_else(|| SyncError::PeerNotFound(self.peer.to_string()))?;
        let key: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::Handshake("stored pairing key has wrong size".to_string()))?;
        Ok(derive_session_key(&SymmetricKey::from_bytes(key), salt)?)
    }

    async fn push_deltas<S>(
        &self,
        stream: &mut S,
        peer_clock: &SpaceClock,
        peer_categories: &[String],
        session_key: &SymmetricKey,
    ) -> SyncResult<u32>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deltas =
            self.codec
                .compute_deltas(&self.space, peer_clock, peer_categories, session_key)?;
        let pushed = deltas.len() as u32;

        let batcher = BatchProcessor::new(self.config.max_batch_items, self.config.max_batch_bytes);
        let mut batches = batcher.split(deltas);
        if batches.is_empty() {
            // Nothing to send still announces itself as one empty batch
            // so the peer always knows the transfer is over.
            batches.push(Vec::new());
        }

        let total = batches.len() as u32;
        for (index, batch) in batches.into_iter().enumerate() {
            self.check_cancelled()?;
            let batch_number = index as u32 + 1;
            debug!(
                peer = %self.peer,
                batch = batch_number,
                total,
                deltas = batch.len(),
                "sending batch"
            );
            self.send(
                stream,
                &SyncMessage::DeltaBatch {
                    batch_number,
                    total_batches: total,
                    deltas: batch,
                },
            )
            .await?;

            match self.recv(stream, "batch_ack").await? {
                SyncMessage::BatchAck { batch_number: acked } if acked == batch_number => {}
                SyncMessage::Error { code, message } => {
                    return Err(SyncError::Protocol(format!("peer error {code}: {message}")));
                }
                other => {
                    return Err(SyncError::Protocol(format!(
                        "expected ack for batch {batch_number}, got {}",
                        other.kind()
                    )));
                }
            }
        }
        Ok(pushed)
    }

    /// Receives the peer's whole delta set, then applies it. Nothing is
    /// applied until every declared batch has arrived, so a transfer cut
    /// short leaves local state untouched.
    async fn apply_pulled<S>(
        &self,
        stream: &mut S,
        session_key: &SymmetricKey,
        agreed_marker: i64,
        report: &mut SyncReport,
    ) -> SyncResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut assembler = BatchAssembler::new();
        loop {
            self.check_cancelled()?;
            match self.recv(stream, "delta_batch").await? {
                SyncMessage::DeltaBatch {
                    batch_number,
                    total_batches,
                    deltas,
                } => {
                    assembler.accept(batch_number, total_batches, deltas)?;
                    self.send(stream, &SyncMessage::BatchAck { batch_number })
                        .await?;
                    if assembler.is_complete() {
                        break;
                    }
                }
                SyncMessage::Error { code, message } => {
                    return Err(SyncError::Protocol(format!("peer error {code}: {message}")));
                }
                other => {
                    return Err(SyncError::Protocol(format!(
                        "expected delta_batch, got {}",
                        other.kind()
                    )));
                }
            }
        }

        let deltas = assembler.into_deltas()?;
        let total = deltas.len();
        let mut corrupted = 0usize;
        for delta in &deltas {
            self.check_cancelled()?;
            match self
                .codec
                .apply_delta(&self.space, delta, session_key, agreed_marker)?
            {
                ApplyOutcome::Applied => report.pulled += 1,
                ApplyOutcome::Conflicted(_) => report.conflicts += 1,
                ApplyOutcome::Skipped(SkipReason::Corrupted) => {
                    report.skipped += 1;
                    corrupted += 1;
                }
                ApplyOutcome::Skipped(_) => report.skipped += 1,
            }
        }

        if total >= DECRYPT_FAILURE_MIN_SET
            && corrupted as f64 / total as f64 > self.config.decrypt_failure_threshold
        {
            return Err(SyncError::Decryption(format!(
                "{corrupted} of {total} deltas failed to decrypt"
            )));
        }
        Ok(())
    }

    async fn recv_sync_request<S>(&self, stream: &mut S) -> SyncResult<(SpaceClock, Vec<String>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self.recv(stream, "sync_request").await? {
            SyncMessage::SyncRequest {
                space_id,
                categories,
                clock,
            } => {
                if space_id != self.space {
                    return Err(SyncError::Protocol(format!(
                        "sync request for space {space_id}, expected {}",
                        self.space
                    )));
                }
                Ok((clock, categories))
            }
            other => Err(SyncError::Protocol(format!(
                "expected sync_request, got {}",
                other.kind()
            ))),
        }
    }

    async fn recv_complete<S>(&self, stream: &mut S) -> SyncResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self.recv(stream, "complete").await? {
            SyncMessage::Complete { .. } => Ok(()),
            SyncMessage::Error { code, message } => Err(SyncError::Protocol(format!(
                "peer error {code}: {message}"
            ))),
            other => Err(SyncError::Protocol(format!(
                "expected complete, got {}",
                other.kind()
            ))),
        }
    }

    async fn send<S, M>(&self, stream: &mut S, message: &M) -> SyncResult<()>
    where
        S: AsyncWrite + Unpin + Send,
        M: serde::Serialize,
    {
        timeout(self.config.message_timeout, wire::write_message(stream, message))
            .await
            .map_err(|_| SyncError::Timeout { phase: "send" })?
            .map_err(|e| SyncError::Network(e.to_string()))
    }

    async fn recv<S>(&self, stream: &mut S, phase: &'static str) -> SyncResult<SyncMessage>
    where
        S: AsyncRead + Unpin + Send,
    {
        let message: SyncMessage =
            timeout(self.config.message_timeout, wire::read_message(stream))
                .await
                .map_err(|_| SyncError::Timeout { phase })?
                .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(message)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn transition(&self, next: SyncState) -> SyncResult<()> {
        let mut state = self.state.lock().expect("session state poisoned");
        if !state.can_transition_to(next) {
            return Err(SyncError::InvalidState(format!("{state} -> {next}")));
        }
        debug!(peer = %self.peer, from = %state, to = %next, "session transition");
        *state = next;
        Ok(())
    }

    /// Moves to `Error` unless already terminal.
    fn fail(&self) {
        let mut state = self.state.lock().expect("session state poisoned");
        if !state.is_terminal() {
            *state = SyncState::Error;
        }
    }

    /// Returns a finished session to `Idle` so it can run again. Only
    /// terminal states can be reset.
    pub fn reset(&self) -> SyncResult<()> {
        let mut state = self.state.lock().expect("session state poisoned");
        if !state.is_terminal() {
            return Err(SyncError::InvalidState(format!("{state} -> idle")));
        }
        *state = SyncState::Idle;
        self.cancelled.store(false, Ordering::Relaxed);
        Ok(())
    }
}

struct SessionHandle {
    state: Arc<Mutex<SyncState>>,
    cancelled: Arc<AtomicBool>,
}

/// Owns the live sessions, at most one per (space, peer).
pub struct SessionManager {
    store: Store,
    local_device: DeviceId,
    config: SyncConfig,
    active: Mutex<HashMap<(SpaceId, DeviceId), SessionHandle>>,
    auto_sync: AtomicBool,
}

impl SessionManager {
    pub fn new(store: Store, local_device: DeviceId, config: SyncConfig) -> Self {
        Self {
            store,
            local_device,
            config,
            active: Mutex::new(HashMap::new()),
            auto_sync: AtomicBool::new(true),
        }
    }

    /// Connects to a paired peer at its last known address and runs a
    /// full session.
    pub async fn sync_now(&self, space: SpaceId, peer: DeviceId) -> SyncResult<SyncReport> {
        let device = self
            .store
            .get_device(&peer)?
            .ok_or_else(|| SyncError::PeerNotFound(peer.to_string()))?;
        if !device.paired {
            return Err(SyncError::PeerNotFound(format!("{peer} is not paired")));
        }
        if device.address.is_empty() {
            return Err(SyncError::Network(format!("no known address for {peer}")));
        }

        let addr = format!("{}:{}", device.address, device.port);
        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SyncError::Timeout { phase: "connect" })?
            .map_err(|e| SyncError::Network(format!("connect {addr}: {e}")))?;
        self.drive(space, peer, &mut stream, true).await
    }

    /// Initiates a sync with a paired peer over an established stream.
    pub async fn sync_with<S>(
        &self,
        space: SpaceId,
        peer: DeviceId,
        stream: &mut S,
    ) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.drive(space, peer, stream, true).await
    }

    /// Answers an incoming session on an accepted stream.
    pub async fn respond_to<S>(
        &self,
        space: SpaceId,
        peer: DeviceId,
        stream: &mut S,
    ) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.drive(space, peer, stream, false).await
    }

    async fn drive<S>(
        &self,
        space: SpaceId,
        peer: DeviceId,
        stream: &mut S,
        initiator: bool,
    ) -> SyncResult<SyncReport>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let session = SyncSession::new(
            self.store.clone(),
            self.local_device,
            peer,
            space,
            self.config.clone(),
        );

        {
            let mut active = self.active.lock().expect("session map poisoned");
            if active.contains_key(&(space, peer)) {
                return Err(SyncError::SessionActive);
            }
            active.insert(
                (space, peer),
                SessionHandle {
                    state: Arc::clone(&session.state),
                    cancelled: session.cancel_flag(),
                },
            );
        }

        let result = if initiator {
            session.initiate(stream).await
        } else {
            session.respond(stream).await
        };
        self.active
            .lock()
            .expect("session map poisoned")
            .remove(&(space, peer));
        result
    }

    /// Requests cancellation of a running session. Takes effect at the
    /// next delta or batch boundary; returns false if no session is
    /// running for the pair.
    pub fn cancel(&self, space: &SpaceId, peer: &DeviceId) -> bool {
        let active = self.active.lock().expect("session map poisoned");
        match active.get(&(*space, *peer)) {
            Some(handle) => {
                handle.cancelled.store(true, Ordering::Relaxed);
                info!(%space, %peer, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// State of the running session for a pair, if any.
    pub fn session_state(&self, space: &SpaceId, peer: &DeviceId) -> Option<SyncState> {
        let active = self.active.lock().expect("session map poisoned");
        active
            .get(&(*space, *peer))
            .map(|handle| *handle.state.lock().expect("session state poisoned"))
    }

    /// Number of sessions currently running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.lock().expect("session map poisoned").len()
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_happy_path_is_legal() {
        use SyncState::*;
        for (from, to) in [
            (Idle, Connecting),
            (Connecting, Connected),
            (Connected, Syncing),
            (Syncing, SyncComplete),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        use SyncState::*;
        assert!(!Idle.can_transition_to(Syncing));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Syncing));
        assert!(!Connected.can_transition_to(SyncComplete));
        assert!(!Syncing.can_transition_to(Connected));
    }

    #[test]
    fn error_is_reachable_from_every_non_terminal_state() {
        use SyncState::*;
        for state in [Idle, Connecting, Connected, Syncing] {
            assert!(state.can_transition_to(Error), "{state}");
        }
        assert!(!SyncComplete.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use SyncState::*;
        for terminal in [SyncComplete, Error] {
            assert!(terminal.is_terminal());
            for next in [Idle, Connecting, Connected, Syncing, SyncComplete, Error] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn reset_only_works_from_terminal_states() {
        let session = SyncSession::new(
            Store::open_in_memory().unwrap(),
            DeviceId::new(),
            DeviceId::new(),
            SpaceId::new(),
            SyncConfig::default(),
        );
        assert!(matches!(
            session.reset(),
            Err(SyncError::InvalidState(_))
        ));

        session.cancel_flag().store(true, Ordering::Relaxed);
        session.fail();
        assert_eq!(session.state(), SyncState::Error);
        session.reset().unwrap();
        assert_eq!(session.state(), SyncState::Idle);
        assert!(!session.cancelled.load(Ordering::Relaxed));
    }

    #[test]
    fn session_starts_idle_and_rejects_bad_transitions() {
        let session = SyncSession::new(
            Store::open_in_memory().unwrap(),
            DeviceId::new(),
            DeviceId::new(),
            SpaceId::new(),
            SyncConfig::default(),
        );
        assert_eq!(session.state(), SyncState::Idle);
        assert!(matches!(
            session.transition(SyncState::Syncing),
            Err(SyncError::InvalidState(_))
        ));
        session.transition(SyncState::Connecting).unwrap();
        assert_eq!(session.state(), SyncState::Connecting);
    }

    #[test]
    fn manager_tracks_auto_sync() {
        let manager = SessionManager::new(
            Store::open_in_memory().unwrap(),
            DeviceId::new(),
            SyncConfig::default(),
        );
        assert!(manager.auto_sync_enabled());
        manager.set_auto_sync(false);
        assert!(!manager.auto_sync_enabled());
        assert_eq!(manager.active_sessions(), 0);
    }
}
