//! Per-chain response loop
//!
//! One task per registered chain drains the engine's response queue into the
//! chain's multicast topic:
//!
//! ```text
//! loop {
//!     wait until the chain has a subscriber
//!     poll the engine
//!     some response -> publish it
//!     nothing       -> wait for the next wake
//! }
//! ```
//!
//! Responses stay queued in the engine while nobody is subscribed, and while
//! a subscriber is too far behind to take the next one. A wake
//! that lands between an empty poll and the wait is kept by the
//! [`WakeSlot`], so the loop polls again instead of sleeping on data.

use crate::channel::MulticastChannel;
use crate::engine::{call_blocking, Engine};
use crate::error::{BridgeError, Result};
use crate::wake::WakeSlot;
use chainbridge_types::ChainId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, trace, Instrument};

pub(crate) struct PollLoop {
    pub(crate) chain: ChainId,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) channel: MulticastChannel<ChainId, String>,
    pub(crate) wake: Arc<WakeSlot>,
    pub(crate) faulted: Arc<AtomicBool>,
}

impl PollLoop {
    /// Start the loop on the current runtime.
    ///
    /// A loop that fails raises its fault flag and then closes the chain's
    /// topic, so current subscribers see the stream end and later callers
    /// see the chain as closed. Cancellation through the returned handle
    /// closes nothing.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let chain = self.chain;
        let channel = self.channel.clone();
        let faulted = Arc::clone(&self.faulted);
        let span = info_span!("response_loop", chain = %chain);

        tokio::spawn(
            async move {
                if let Err(err) = self.run().await {
                    error!(error = %err, "response loop failed");
                    faulted.store(true, Ordering::Release);
                    channel.close(&chain);
                }
            }
            .instrument(span),
        )
    }

    async fn run(self) -> Result<()> {
        debug!("response loop started");
        let chain = self.chain;

        loop {
            self.channel.wait_for_subscriber(&chain).await;

            let response =
                call_blocking(&self.engine, move |engine| engine.poll_response(chain)).await?;

            match response {
                Some(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|source| BridgeError::Decode { chain, source })?;
                    let reached = self.channel.publish(&chain, text).await;
                    trace!(reached, "response published");
                }
                None => {
                    trace!("engine queue empty; waiting for wake");
                    self.wake.wait().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AllocateChain;
    use crate::notifier::Notifier;
    use chainbridge_types::LogLevel;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Engine with a single hand-fed response queue
    #[derive(Default)]
    struct QueueEngine {
        queue: Mutex<VecDeque<Vec<u8>>>,
        polls: AtomicUsize,
    }

    impl Engine for QueueEngine {
        fn init(&self, _: LogLevel, _: Notifier) {}

        fn allocate_chain(&self, _: AllocateChain) -> ChainId {
            ChainId(0)
        }

        fn remove_chain(&self, _: ChainId) {}

        fn send_request(&self, _: &[u8], _: ChainId) -> u32 {
            0
        }

        fn poll_response(&self, _: ChainId) -> Option<Vec<u8>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.queue.lock().pop_front()
        }

        fn shutdown(&self) {}
    }

    struct Started {
        channel: MulticastChannel<ChainId, String>,
        wake: Arc<WakeSlot>,
        faulted: Arc<AtomicBool>,
        task: JoinHandle<()>,
    }

    fn start(engine: Arc<QueueEngine>, capacity: usize) -> Started {
        let channel = MulticastChannel::new(capacity);
        let wake = Arc::new(WakeSlot::new());
        let faulted = Arc::new(AtomicBool::new(false));
        let task = PollLoop {
            chain: ChainId(1),
            engine,
            channel: channel.clone(),
            wake: Arc::clone(&wake),
            faulted: Arc::clone(&faulted),
        }
        .spawn();
        Started {
            channel,
            wake,
            faulted,
            task,
        }
    }

    #[tokio::test]
    async fn test_does_not_poll_without_subscriber() {
        let engine = Arc::new(QueueEngine::default());
        engine.queue.lock().push_back(b"first".to_vec());
        let started = start(Arc::clone(&engine), 16);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.polls.load(Ordering::SeqCst), 0);

        // The queued response is still delivered once someone listens.
        let mut sub = started.channel.attach(&ChainId(1));
        let first = timeout(WAIT, sub.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("first"));
        started.task.abort();
    }

    #[tokio::test]
    async fn test_wake_triggers_poll() {
        let engine = Arc::new(QueueEngine::default());
        let started = start(Arc::clone(&engine), 16);
        let mut sub = started.channel.attach(&ChainId(1));

        for n in 0..3 {
            engine.queue.lock().push_back(format!("r{n}").into_bytes());
            started.wake.wake();
            let value = timeout(WAIT, sub.recv()).await.unwrap();
            assert_eq!(value, Some(format!("r{n}")));
        }
        started.task.abort();
    }

    #[tokio::test]
    async fn test_invalid_utf8_ends_stream() {
        let engine = Arc::new(QueueEngine::default());
        engine.queue.lock().push_back(vec![0xff, 0xfe]);
        let started = start(Arc::clone(&engine), 16);

        let mut sub = started.channel.attach(&ChainId(1));
        assert_eq!(timeout(WAIT, sub.recv()).await.unwrap(), None);
        timeout(WAIT, started.task).await.unwrap().unwrap();
        assert!(started.faulted.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_slow_subscriber_leaves_responses_in_engine() {
        let engine = Arc::new(QueueEngine::default());
        for n in 0..10 {
            engine.queue.lock().push_back(format!("r{n}").into_bytes());
        }
        let started = start(Arc::clone(&engine), 2);
        let mut sub = started.channel.attach(&ChainId(1));

        // Two queued for the subscriber, one held by the blocked publish.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.queue.lock().len(), 7);

        for n in 0..10 {
            let value = timeout(WAIT, sub.recv()).await.unwrap();
            assert_eq!(value, Some(format!("r{n}")));
        }
        assert!(!started.faulted.load(Ordering::Acquire));
        started.task.abort();
    }
}
