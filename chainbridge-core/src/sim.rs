//! In-process engine
//!
//! [`SimEngine`] implements [`Engine`] with plain threads so the bridge can
//! be driven without a native library. It behaves like a real engine where
//! the bridge can tell the difference: initialization results and data
//! notifications arrive on threads of their own, ids are never reused, and
//! each chain has a bounded response queue.
//!
//! Tests script it with [`SimEngine::fail_spec`], [`SimEngine::force_status`],
//! [`SimEngine::delay_initialization`] and [`SimEngine::push_response`], and
//! inspect it through its counters.

use crate::engine::{AllocateChain, Engine};
use crate::notifier::Notifier;
use chainbridge_types::{ChainId, LogLevel};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Status codes of `send_request`
const ACCEPTED: u32 = 0;
const QUEUE_FULL: u32 = 1;
const NO_SUCH_CHAIN: u32 = 2;

/// Maps one request to the responses the chain will queue for it
pub type Responder = dyn Fn(ChainId, &str) -> Vec<Vec<u8>> + Send + Sync;

struct SimChain {
    queue: VecDeque<Vec<u8>>,
    max_pending: u32,
}

struct Inner {
    responder: Box<Responder>,
    notifier: Mutex<Option<Notifier>>,
    log_level: Mutex<Option<LogLevel>>,
    chains: Mutex<HashMap<ChainId, SimChain>>,
    next_id: AtomicU32,
    failures: Mutex<HashMap<String, String>>,
    forced_status: Mutex<Option<u32>>,
    init_delay: Mutex<Option<Duration>>,
    allocations: Mutex<Vec<AllocateChain>>,
    removed: Mutex<Vec<ChainId>>,
    shutdown_calls: AtomicUsize,
}

/// Thread-backed engine. Clones share state.
#[derive(Clone)]
pub struct SimEngine {
    inner: Arc<Inner>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    /// An engine that answers every request with the request itself
    pub fn new() -> Self {
        Self::with_responder(|_, request| vec![request.as_bytes().to_vec()])
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(ChainId, &str) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                responder: Box::new(responder),
                notifier: Mutex::new(None),
                log_level: Mutex::new(None),
                chains: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(1),
                failures: Mutex::new(HashMap::new()),
                forced_status: Mutex::new(None),
                init_delay: Mutex::new(None),
                allocations: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
                shutdown_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Make chains allocated with `spec` fail to initialize with `message`.
    pub fn fail_spec(&self, spec: impl Into<String>, message: impl Into<String>) {
        self.inner
            .failures
            .lock()
            .insert(spec.into(), message.into());
    }

    /// Return `status` from every `send_request` until cleared with `None`.
    pub fn force_status(&self, status: Option<u32>) {
        *self.inner.forced_status.lock() = status;
    }

    /// Hold every later initialization callback back by `delay`.
    pub fn delay_initialization(&self, delay: Duration) {
        *self.inner.init_delay.lock() = Some(delay);
    }

    /// Queue a raw response on `chain` and notify the bridge.
    ///
    /// Returns `false` if the chain is unknown.
    pub fn push_response(&self, chain: ChainId, response: impl Into<Vec<u8>>) -> bool {
        {
            let mut chains = self.inner.chains.lock();
            let Some(state) = chains.get_mut(&chain) else {
                return false;
            };
            state.queue.push_back(response.into());
        }
        self.notify_new_data(chain);
        true
    }

    /// Responses queued on `chain` that nobody has polled yet
    pub fn queued(&self, chain: ChainId) -> usize {
        self.inner
            .chains
            .lock()
            .get(&chain)
            .map_or(0, |state| state.queue.len())
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        *self.inner.log_level.lock()
    }

    pub fn allocations(&self) -> Vec<AllocateChain> {
        self.inner.allocations.lock().clone()
    }

    /// Chains released through `remove_chain`, in call order
    pub fn removed(&self) -> Vec<ChainId> {
        self.inner.removed.lock().clone()
    }

    pub fn live_chains(&self) -> usize {
        self.inner.chains.lock().len()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.inner.shutdown_calls.load(Ordering::SeqCst)
    }

    fn notifier(&self) -> Option<Notifier> {
        self.inner.notifier.lock().clone()
    }

    fn notify_new_data(&self, chain: ChainId) {
        if let Some(notifier) = self.notifier() {
            thread::spawn(move || notifier.chain_has_new_data(chain));
        }
    }

    fn initialization_error(&self, request: &AllocateChain) -> Option<String> {
        let Ok(spec) = std::str::from_utf8(&request.spec) else {
            return Some("chain specification is not valid UTF-8".to_string());
        };
        if spec.trim().is_empty() {
            return Some("chain specification is empty".to_string());
        }
        self.inner.failures.lock().get(spec).cloned()
    }
}

impl Engine for SimEngine {
    fn init(&self, log_level: LogLevel, notifier: Notifier) {
        debug!(%log_level, "sim engine initialized");
        *self.inner.log_level.lock() = Some(log_level);
        *self.inner.notifier.lock() = Some(notifier);
    }

    fn allocate_chain(&self, request: AllocateChain) -> ChainId {
        let chain = ChainId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let error = self.initialization_error(&request);

        self.inner.chains.lock().insert(
            chain,
            SimChain {
                queue: VecDeque::new(),
                max_pending: request.max_pending_requests,
            },
        );
        self.inner.allocations.lock().push(request);

        if let Some(notifier) = self.notifier() {
            let delay = *self.inner.init_delay.lock();
            thread::spawn(move || {
                if let Some(delay) = delay {
                    thread::sleep(delay);
                }
                notifier.chain_initialized(chain, error)
            });
        }
        chain
    }

    fn remove_chain(&self, chain: ChainId) {
        self.inner.chains.lock().remove(&chain);
        self.inner.removed.lock().push(chain);
    }

    fn send_request(&self, request: &[u8], chain: ChainId) -> u32 {
        if let Some(status) = *self.inner.forced_status.lock() {
            return status;
        }

        let request = String::from_utf8_lossy(request);
        {
            let mut chains = self.inner.chains.lock();
            let Some(state) = chains.get_mut(&chain) else {
                return NO_SUCH_CHAIN;
            };
            if state.queue.len() >= state.max_pending as usize {
                return QUEUE_FULL;
            }
            state
                .queue
                .extend((self.inner.responder)(chain, &*request));
        }
        trace!(chain = %chain, "request queued");

        self.notify_new_data(chain);
        ACCEPTED
    }

    fn poll_response(&self, chain: ChainId) -> Option<Vec<u8>> {
        self.inner
            .chains
            .lock()
            .get_mut(&chain)
            .and_then(|state| state.queue.pop_front())
    }

    fn shutdown(&self) {
        self.inner.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.chains.lock().clear();
        self.inner.notifier.lock().take();
    }
}
