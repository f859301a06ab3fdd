//! Bridge facade
//!
//! [`Bridge`] is the host-facing API over an [`Engine`]: it turns the
//! engine's allocate-then-callback chain creation into one awaitable call,
//! runs a response loop per chain, and fans each chain's responses out to
//! any number of streams.
//!
//! Removal order for a chain is fixed: unregister, cancel its loop, close
//! its topic, then release it in the engine. Once unregistered, no wake or
//! publish can reach the chain again.

use crate::channel::MulticastChannel;
use crate::config::{BridgeConfig, ChainConfig};
use crate::engine::{call_blocking, Engine};
use crate::error::{BridgeError, Result};
use crate::logging;
use crate::notifier::{CallbackState, Notifier};
use crate::poll_loop::PollLoop;
use crate::registry::ChainEntry;
use crate::wake::WakeSlot;
use chainbridge_types::{ChainId, CreationOutcome, RequestStatus};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

struct Shared {
    engine: Arc<dyn Engine>,
    state: Arc<CallbackState>,
    channel: MulticastChannel<ChainId, String>,
    notifier: Notifier,
    config: BridgeConfig,
    /// `false` once shutdown has started. Guards registry inserts.
    open: Mutex<bool>,
    stopped: Notify,
}

/// Host-side handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("chains", &self.shared.state.registry.ids())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Bridge {
    /// Initialize `engine` and wrap it.
    ///
    /// Must be called from within a tokio runtime; the engine's callbacks
    /// are dispatched onto it.
    pub fn new(engine: Arc<dyn Engine>, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|err| BridgeError::Runtime(err.to_string()))?;

        let state = Arc::new(CallbackState::new());
        let notifier = Notifier::new(Arc::clone(&state), runtime);

        logging::announce(config.log_level);
        engine.init(config.log_level, notifier.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                state,
                channel: MulticastChannel::new(config.channel_capacity),
                notifier,
                config,
                open: Mutex::new(true),
                stopped: Notify::new(),
            }),
        })
    }

    /// Whether both handles refer to the same bridge
    pub fn ptr_eq(&self, other: &Bridge) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The callback sink handed to the engine at init.
    pub fn notifier(&self) -> Notifier {
        self.shared.notifier.clone()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn is_shut_down(&self) -> bool {
        !*self.shared.open.lock()
    }

    /// Whether `chain` is registered and its response loop has not failed
    pub fn is_registered(&self, chain: ChainId) -> bool {
        self.shared.state.registry.is_serving(chain)
    }

    /// Registered chains, including failed ones not yet removed
    pub fn chain_count(&self) -> usize {
        self.shared.state.registry.len()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.shared.state.registry.ids()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(BridgeError::NotInitialized);
        }
        Ok(())
    }

    /// Resolves once shutdown has started.
    async fn stopped(&self) {
        loop {
            let notified = self.shared.stopped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shut_down() {
                return;
            }
            notified.await;
        }
    }

    /// Allocate a chain and wait until the engine reports it ready.
    ///
    /// On failure the engine-side chain is released before the error is
    /// returned and nothing is registered.
    #[instrument(skip_all)]
    pub async fn create_chain(&self, config: ChainConfig) -> Result<Chain> {
        self.ensure_open()?;
        let shared = &self.shared;

        let parents: Vec<ChainId> = config
            .potential_relay_chains
            .iter()
            .copied()
            .filter(|parent| {
                let live = shared.state.registry.contains(*parent);
                if !live {
                    debug!(parent = %parent, "dropping unknown relay chain");
                }
                live
            })
            .collect();

        let request = config.allocation(parents);
        let chain = call_blocking(&shared.engine, move |engine| engine.allocate_chain(request)).await?;
        debug!(chain = %chain, "chain allocated; waiting for initialization");

        let pending = PendingCreation {
            chain,
            shared: Arc::clone(shared),
            armed: true,
        };
        let outcome = tokio::select! {
            outcome = shared.state.mailbox.get(&chain) => Some(outcome),
            _ = self.stopped() => None,
        };
        pending.settle();
        shared.state.mailbox.forget(&chain);

        match outcome {
            // The engine has been torn down along with the chain.
            None => Err(BridgeError::NotInitialized),
            Some(CreationOutcome::Failed(message)) => {
                warn!(chain = %chain, error = %message, "chain failed to initialize");
                call_blocking(&shared.engine, move |engine| engine.remove_chain(chain)).await?;
                Err(BridgeError::Creation(message))
            }
            Some(CreationOutcome::Ready) => self.register(chain).await,
        }
    }

    async fn register(&self, chain: ChainId) -> Result<Chain> {
        let shared = &self.shared;
        let wake = Arc::new(WakeSlot::new());
        let faulted = Arc::new(AtomicBool::new(false));
        let task = PollLoop {
            chain,
            engine: Arc::clone(&shared.engine),
            channel: shared.channel.clone(),
            wake: Arc::clone(&wake),
            faulted: Arc::clone(&faulted),
        }
        .spawn();
        let entry = ChainEntry::new(Arc::clone(&wake), faulted, task);

        let rejected = {
            let open = shared.open.lock();
            if *open {
                shared.state.registry.insert(chain, entry);
                None
            } else {
                Some(entry)
            }
        };
        if let Some(entry) = rejected {
            entry.stop().await;
            return Err(BridgeError::NotInitialized);
        }

        // Notifications that arrived before the insert were dropped; make
        // the loop poll at least once after it.
        wake.wake();
        info!(chain = %chain, "chain ready");

        Ok(Chain {
            id: chain,
            bridge: self.clone(),
        })
    }

    /// Submit a JSON-RPC request to `chain`.
    ///
    /// Fails with [`BridgeError::Closed`] if the chain was removed or its
    /// response loop failed, including a removal that lands while the
    /// request is with the engine.
    #[instrument(skip_all, fields(chain = %chain))]
    pub async fn send_request(&self, chain: ChainId, request: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.is_registered(chain) {
            return Err(BridgeError::Closed(chain));
        }

        let bytes = request.as_bytes().to_vec();
        let code = call_blocking(&self.shared.engine, move |engine| {
            engine.send_request(&bytes, chain)
        })
        .await?;

        match RequestStatus::from(code) {
            RequestStatus::Accepted => Ok(()),
            RequestStatus::QueueFull => Err(BridgeError::QueueFull),
            RequestStatus::Unknown(_) if !self.is_registered(chain) => {
                debug!(code, "chain went away while the request was submitted");
                Err(BridgeError::Closed(chain))
            }
            RequestStatus::Unknown(code) => Err(BridgeError::Protocol(code)),
        }
    }

    /// Stream of responses for `chain`.
    ///
    /// The stream is attached on return: every response the engine hands
    /// out afterwards is delivered to it. It ends when the chain is removed
    /// or its loop fails. For an unknown or failed chain the stream is empty.
    pub fn responses(&self, chain: ChainId) -> BoxStream<'static, String> {
        let mut subscription = self.shared.channel.attach(&chain);

        // Attach first: a removal or fault after this check closes the
        // subscription.
        if !self.is_registered(chain) {
            debug!(chain = %chain, "responses requested for unregistered chain");
            return stream::empty().boxed();
        }

        async_stream::stream! {
            while let Some(response) = subscription.recv().await {
                yield response;
            }
        }
        .boxed()
    }

    /// Remove `chain`. Removing an unknown or already removed chain is a no-op.
    #[instrument(skip_all, fields(chain = %chain))]
    pub async fn remove_chain(&self, chain: ChainId) -> Result<()> {
        let Some(entry) = self.shared.state.registry.remove(chain) else {
            debug!("remove of unregistered chain ignored");
            return Ok(());
        };
        self.release(chain, entry).await?;
        info!("chain removed");
        Ok(())
    }

    async fn release(&self, chain: ChainId, entry: ChainEntry) -> Result<()> {
        entry.stop().await;
        self.shared.channel.close(&chain);
        call_blocking(&self.shared.engine, move |engine| engine.remove_chain(chain)).await
    }

    /// Remove every chain and shut the engine down.
    ///
    /// Later calls are no-ops. Afterwards `create_chain` and `send_request`
    /// fail with [`BridgeError::NotInitialized`].
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut open = self.shared.open.lock();
            if !*open {
                return Ok(());
            }
            *open = false;
        }
        self.shared.stopped.notify_waiters();
        self.shared.state.close();

        let chains = self.shared.state.registry.drain();
        info!(chains = chains.len(), "shutting down bridge");

        for (chain, entry) in chains {
            if let Err(err) = self.release(chain, entry).await {
                warn!(chain = %chain, error = %err, "failed to release chain during shutdown");
            }
        }

        call_blocking(&self.shared.engine, |engine| engine.shutdown()).await?;
        info!("bridge shut down");
        Ok(())
    }
}

/// Engine-side chain whose creation has not settled yet.
///
/// Dropped while armed, it abandons the mailbox key so the pending outcome
/// is discarded, and releases the chain in the engine.
struct PendingCreation {
    chain: ChainId,
    shared: Arc<Shared>,
    armed: bool,
}

impl PendingCreation {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingCreation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let chain = self.chain;
        self.shared.state.mailbox.abandon(&chain);

        // Shutdown releases everything the engine still holds.
        if !*self.shared.open.lock() {
            return;
        }
        debug!(chain = %chain, "creation cancelled; releasing chain");
        let engine = Arc::clone(&self.shared.engine);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || engine.remove_chain(chain));
            }
            Err(_) => engine.remove_chain(chain),
        }
    }
}

/// A registered chain
#[derive(Debug, Clone)]
pub struct Chain {
    id: ChainId,
    bridge: Bridge,
}

impl Chain {
    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn responses(&self) -> BoxStream<'static, String> {
        self.bridge.responses(self.id)
    }

    pub async fn send_request(&self, request: &str) -> Result<()> {
        self.bridge.send_request(self.id, request).await
    }

    pub async fn close(&self) -> Result<()> {
        self.bridge.remove_chain(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AllocateChain;
    use crate::sim::SimEngine;
    use chainbridge_types::LogLevel;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn bridge() -> (SimEngine, Bridge) {
        let engine = SimEngine::new();
        let bridge = Bridge::new(Arc::new(engine.clone()), BridgeConfig::default()).unwrap();
        (engine, bridge)
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = Bridge::new(Arc::new(SimEngine::new()), BridgeConfig::default());
        assert!(matches!(result, Err(BridgeError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = BridgeConfig::default().with_channel_capacity(0);
        let result = Bridge::new(Arc::new(SimEngine::new()), config);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_init_passes_log_level() {
        let engine = SimEngine::new();
        let config = BridgeConfig::default().with_log_level(LogLevel::Debug);
        let _bridge = Bridge::new(Arc::new(engine.clone()), config).unwrap();
        assert_eq!(engine.log_level(), Some(LogLevel::Debug));
    }

    #[tokio::test]
    async fn test_unknown_relay_chains_are_dropped() {
        let (engine, bridge) = bridge();
        let relay = bridge.create_chain(ChainConfig::new("relay")).await.unwrap();

        let config = ChainConfig::new("para").with_relay_chains([relay.id(), ChainId(999)]);
        bridge.create_chain(config).await.unwrap();

        let allocations = engine.allocations();
        assert_eq!(allocations[1].parents, vec![relay.id()]);
    }

    #[tokio::test]
    async fn test_responses_for_unknown_chain_is_empty() {
        let (_engine, bridge) = bridge();
        let mut responses = bridge.responses(ChainId(42));
        assert_eq!(timeout(WAIT, responses.next()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_to_removed_chain_is_closed() {
        let (_engine, bridge) = bridge();
        let chain = bridge.create_chain(ChainConfig::new("S1")).await.unwrap();
        chain.close().await.unwrap();

        let err = chain.send_request("{}").await.unwrap_err();
        assert!(matches!(err, BridgeError::Closed(id) if id == chain.id()));
        // Removing again is a no-op.
        chain.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_debug_lists_chains() {
        let (_engine, bridge) = bridge();
        let chain = bridge.create_chain(ChainConfig::new("S1")).await.unwrap();
        let debug = format!("{bridge:?}");
        assert!(debug.contains(&format!("{:?}", chain.id())));
        bridge.shutdown().await.unwrap();
        assert!(format!("{bridge:?}").contains("shut_down: true"));
    }

    #[tokio::test]
    async fn test_faulted_chain_is_closed() {
        let (engine, bridge) = bridge();
        let chain = bridge.create_chain(ChainConfig::new("S1")).await.unwrap();
        let mut first = chain.responses();

        engine.push_response(chain.id(), vec![0xff, 0xfe]);
        assert_eq!(timeout(WAIT, first.next()).await.unwrap(), None);

        assert!(!bridge.is_registered(chain.id()));
        assert_eq!(bridge.chain_ids(), vec![chain.id()]);
        let err = chain.send_request("{}").await.unwrap_err();
        assert!(matches!(err, BridgeError::Closed(id) if id == chain.id()));

        // A stream opened after the fault ends at once.
        let mut late = chain.responses();
        assert_eq!(timeout(WAIT, late.next()).await.unwrap(), None);

        // Removal still releases it in the engine.
        chain.close().await.unwrap();
        assert_eq!(engine.removed(), vec![chain.id()]);
        assert_eq!(bridge.chain_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_creation_releases_chain() {
        let (engine, bridge) = bridge();
        engine.delay_initialization(Duration::from_millis(500));

        let create = bridge.create_chain(ChainConfig::new("S1"));
        assert!(timeout(Duration::from_millis(100), create).await.is_err());

        // The late callback finds the key abandoned and cleans up after it.
        let state = &bridge.shared.state;
        timeout(WAIT, async {
            while engine.removed().is_empty()
                || !state.mailbox.is_empty()
                || state.pending_tasks() > 0
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(engine.removed(), vec![ChainId(1)]);
        assert_eq!(engine.live_chains(), 0);
        assert_eq!(bridge.chain_count(), 0);

        // The bridge is still usable.
        engine.delay_initialization(Duration::ZERO);
        let chain = bridge.create_chain(ChainConfig::new("S1")).await.unwrap();
        assert_eq!(chain.id(), ChainId(2));
    }

    /// Sim engine whose `send_request` parks until the test lets it through
    struct GatedEngine {
        sim: SimEngine,
        entered: Mutex<Option<oneshot::Sender<()>>>,
        gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl Engine for GatedEngine {
        fn init(&self, log_level: LogLevel, notifier: Notifier) {
            self.sim.init(log_level, notifier);
        }

        fn allocate_chain(&self, request: AllocateChain) -> ChainId {
            self.sim.allocate_chain(request)
        }

        fn remove_chain(&self, chain: ChainId) {
            self.sim.remove_chain(chain);
        }

        fn send_request(&self, request: &[u8], chain: ChainId) -> u32 {
            if let Some(entered) = self.entered.lock().take() {
                let _ = entered.send(());
            }
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            self.sim.send_request(request, chain)
        }

        fn poll_response(&self, chain: ChainId) -> Option<Vec<u8>> {
            self.sim.poll_response(chain)
        }

        fn shutdown(&self) {
            self.sim.shutdown();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_racing_removal_is_closed() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let engine = GatedEngine {
            sim: SimEngine::new(),
            entered: Mutex::new(Some(entered_tx)),
            gate: Mutex::new(Some(gate_rx)),
        };
        let bridge = Bridge::new(Arc::new(engine), BridgeConfig::default()).unwrap();
        let chain = bridge.create_chain(ChainConfig::new("S1")).await.unwrap();

        let send = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.send_request("{}").await })
        };
        timeout(WAIT, entered_rx).await.unwrap().unwrap();
        chain.close().await.unwrap();
        gate_tx.send(()).unwrap();

        let err = timeout(WAIT, send).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Closed(id) if id == chain.id()));
    }
}
