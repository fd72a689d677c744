//! Per-client send path
//!
//! Owns the block pool, the send queue and the writer thread of one client.
//! Producers on any thread claim blocks, fill them and enqueue them; the
//! writer thread transmits them in enqueue order.
//!
//! Shutdown never kills a thread. `reset` raises the cancellation flag,
//! closes the queue to wake a blocked writer and waits a bounded time. If
//! the writer is stuck in a write, the transport is closed so the write
//! fails, and the wait is repeated once before giving up.

use arc_swap::ArcSwapOption;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use super::queue::SendQueue;
use super::writer::{FailureHook, StateCell, WriteFailure, WriterLoop, WriterState};
use crate::config::SendConfig;
use crate::connection::{ClientId, ClientRegistry, Transport};
use crate::error::SendError;
use crate::metrics::METRICS;
use crate::pool::{BufferHandle, PoolStats, SlabPool};
use crate::protocol::{Header, HEADER_LEN};

struct Worker {
    thread: JoinHandle<()>,
    /// Disconnects when the writer thread exits
    exited: Receiver<()>,
}

/// Builder for [`SendPath`]
pub struct SendPathBuilder {
    client_id: ClientId,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn ClientRegistry>,
    config: SendConfig,
    on_failure: Option<FailureHook>,
}

impl SendPathBuilder {
    /// Pool geometry and timeouts; defaults to `SendConfig::default()`
    pub fn config(mut self, config: SendConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe failed writes. The hook runs on the writer thread before the
    /// failing buffer is released and must not block.
    pub fn on_write_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WriteFailure<'_>) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> SendPath {
        let queue = SendQueue::new();
        // Nothing is accepted until the writer runs
        queue.close();

        SendPath {
            client_id: self.client_id,
            transport: self.transport,
            registry: self.registry,
            config: self.config,
            on_failure: self.on_failure,
            pool: ArcSwapOption::empty(),
            spare: Mutex::new(None),
            queue: Arc::new(queue),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Arc::new(StateCell::new(WriterState::Stopped)),
            worker: Mutex::new(None),
        }
    }
}

/// Outbound delivery for one client
pub struct SendPath {
    client_id: ClientId,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn ClientRegistry>,
    config: SendConfig,
    on_failure: Option<FailureHook>,
    /// Pool of the running writer; empty while stopped
    pool: ArcSwapOption<SlabPool>,
    /// Pool kept from the previous run, already reset
    spare: Mutex<Option<SlabPool>>,
    queue: Arc<SendQueue>,
    cancel: Arc<AtomicBool>,
    state: Arc<StateCell>,
    /// Also serializes start/reset against each other
    worker: Mutex<Option<Worker>>,
}

impl SendPath {
    pub fn builder(
        client_id: ClientId,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn ClientRegistry>,
    ) -> SendPathBuilder {
        SendPathBuilder {
            client_id,
            transport,
            registry,
            config: SendConfig::default(),
            on_failure: None,
        }
    }

    /// Send path with the given config and no failure hook
    pub fn new(
        client_id: ClientId,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn ClientRegistry>,
        config: SendConfig,
    ) -> Self {
        Self::builder(client_id, transport, registry)
            .config(config)
            .build()
    }

    /// Allocate the pool, configure the transport and spawn the writer
    pub fn start(&self) -> Result<(), SendError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SendError::AlreadyRunning(self.client_id));
        }

        self.config
            .validate()
            .map_err(|e| SendError::InvalidConfig(format!("{e:#}")))?;

        self.transport
            .set_send_timeout(self.config.write_timeout())
            .map_err(SendError::Transport)?;

        let pool = self
            .spare
            .lock()
            .take()
            .unwrap_or_else(|| SlabPool::new(&self.config));
        self.pool.store(Some(Arc::new(pool)));

        self.cancel.store(false, Ordering::Release);
        self.state.store(WriterState::Running);
        self.queue.reopen();

        let (exited_tx, exited_rx) = crossbeam::channel::bounded(0);
        let writer = WriterLoop {
            client_id: self.client_id,
            queue: self.queue.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            on_failure: self.on_failure.clone(),
            _exited: exited_tx,
        };

        let spawned = thread::Builder::new()
            .name(format!("send-{}", self.client_id))
            .spawn(move || writer.run());

        match spawned {
            Ok(thread) => {
                *worker = Some(Worker {
                    thread,
                    exited: exited_rx,
                });
                Ok(())
            }
            Err(e) => {
                self.abandon_start();
                Err(SendError::Spawn(e))
            }
        }
    }

    /// Undo a start whose writer never ran
    fn abandon_start(&self) {
        self.queue.close();
        let dropped = self.queue.drain();
        if dropped > 0 {
            METRICS.record_dropped(dropped as u64);
        }
        self.state.store(WriterState::Stopped);
        self.recycle_pool();
    }

    /// Stop the writer and return the pool to its all-free state.
    ///
    /// Buffers still queued are released without being sent. A writer that
    /// cannot be stopped is reported as [`SendError::JoinTimeout`] and the
    /// pool is left alone; calling `reset` again retries.
    pub fn reset(&self) -> Result<(), SendError> {
        let mut worker = self.worker.lock();
        let mut panicked = false;

        if let Some(running) = worker.take() {
            self.state.store(WriterState::Cancelling);
            self.cancel.store(true, Ordering::Release);
            self.queue.close();

            if let Err(e) = self.await_exit(&running) {
                *worker = Some(running);
                return Err(e);
            }
            panicked = running.thread.join().is_err();
        }

        self.queue.close();
        let dropped = self.queue.drain();
        if dropped > 0 {
            METRICS.record_dropped(dropped as u64);
            debug!(client_id = %self.client_id, dropped, "Discarded unsent buffers");
        }
        self.state.store(WriterState::Stopped);
        self.recycle_pool();

        if panicked {
            error!(client_id = %self.client_id, "Writer panicked");
            return Err(SendError::WorkerPanicked(self.client_id));
        }
        Ok(())
    }

    /// Stop the writer and free the arenas. Safe to call repeatedly.
    pub fn dispose(&self) -> Result<(), SendError> {
        self.reset()?;
        self.spare.lock().take();
        Ok(())
    }

    fn await_exit(&self, worker: &Worker) -> Result<(), SendError> {
        let timeout = self.config.join_timeout();
        if wait_for_exit(&worker.exited, timeout) {
            return Ok(());
        }

        warn!(
            client_id = %self.client_id,
            ?timeout,
            "Writer did not stop, closing transport"
        );
        if let Err(e) = self.transport.close() {
            warn!(client_id = %self.client_id, error = %e, "Failed to close transport");
        }
        if wait_for_exit(&worker.exited, timeout) {
            return Ok(());
        }

        error!(client_id = %self.client_id, "Writer stuck after transport close");
        Err(SendError::JoinTimeout {
            client: self.client_id,
            waited: timeout * 2,
        })
    }

    /// Keep the pool for the next start if nothing else holds it
    fn recycle_pool(&self) {
        let Some(pool) = self.pool.swap(None) else {
            return;
        };
        match Arc::try_unwrap(pool) {
            Ok(mut pool) => {
                pool.reset();
                *self.spare.lock() = Some(pool);
            }
            Err(_) => {
                // Producers still hold handles; the arenas go away with them
                debug!(client_id = %self.client_id, "Pool still referenced, not recycled");
            }
        }
    }

    /// Claim a block for `size` bytes; `None` when exhausted or stopped
    pub fn claim(&self, size: usize) -> Option<BufferHandle> {
        let pool = self.pool.load();
        match &*pool {
            Some(pool) => pool.claim(size),
            None => {
                trace!(client_id = %self.client_id, size, "Claim on stopped send path");
                None
            }
        }
    }

    /// Queue a filled buffer. Returns false, releasing the block, if the
    /// path is not running.
    pub fn enqueue(&self, handle: BufferHandle) -> bool {
        match self.queue.enqueue(handle) {
            Ok(()) => {
                METRICS.message_enqueued();
                true
            }
            Err(_rejected) => {
                METRICS.record_dropped(1);
                trace!(client_id = %self.client_id, "Enqueue on stopped send path");
                false
            }
        }
    }

    /// Claim a block, let `fill` write into it and queue it.
    ///
    /// Returns false without calling `fill` if no block is free. If `fill`
    /// returns false the block is released instead of queued.
    pub fn alloc_and_populate<F>(&self, size: usize, fill: F) -> bool
    where
        F: FnOnce(&mut BufferHandle) -> bool,
    {
        let Some(mut handle) = self.claim(size) else {
            return false;
        };
        if !fill(&mut handle) {
            return false;
        }
        self.enqueue(handle)
    }

    /// Like [`alloc_and_populate`](Self::alloc_and_populate) but lets `fill`
    /// fail. The block is released on error.
    pub fn try_alloc_and_populate<F, E>(&self, size: usize, fill: F) -> Result<bool, E>
    where
        F: FnOnce(&mut BufferHandle) -> Result<bool, E>,
    {
        let Some(mut handle) = self.claim(size) else {
            return Ok(false);
        };
        if !fill(&mut handle)? {
            return Ok(false);
        }
        Ok(self.enqueue(handle))
    }

    /// Copy `source[offset..offset + count]` into a fresh block.
    ///
    /// `Ok(None)` means the pool is exhausted. Requests larger than any
    /// block are rejected before anything is claimed or written.
    pub fn alloc_and_copy(
        &self,
        source: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<Option<BufferHandle>, SendError> {
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= source.len())
            .ok_or(SendError::SourceRange {
                offset,
                count,
                available: source.len(),
            })?;

        let capacity = self.config.large_block_size;
        if count > capacity {
            return Err(SendError::BoundaryViolation {
                requested: count,
                capacity,
            });
        }

        let Some(mut handle) = self.claim(count) else {
            return Ok(None);
        };
        handle.copy_from(&source[offset..end])?;
        Ok(Some(handle))
    }

    /// Frame `body` under `tag` and queue it. `Ok(false)` means dropped.
    pub fn send_packet(&self, tag: u8, body: &[u8]) -> Result<bool, SendError> {
        let capacity = self.config.large_block_size;
        let header = Header::for_body(tag, body.len())
            .filter(|header| header.total_len() <= capacity)
            .ok_or(SendError::BoundaryViolation {
                requested: body.len() + HEADER_LEN,
                capacity,
            })?;

        let total = header.total_len();
        Ok(self.alloc_and_populate(total, |handle| {
            let buf = handle.as_mut_slice();
            header.write(buf);
            buf[HEADER_LEN..total].copy_from_slice(body);
            true
        }))
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> WriterState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WriterState::Running
    }

    /// Buffers waiting for the writer
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pool statistics while running
    pub fn pool_stats(&self) -> Option<PoolStats> {
        let pool = self.pool.load();
        (*pool).as_ref().map(|pool| pool.stats())
    }

    pub fn config(&self) -> &SendConfig {
        &self.config
    }
}

impl Drop for SendPath {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            error!(client_id = %self.client_id, error = %e, "Send path dropped with a stuck writer");
        } else {
            debug!(client_id = %self.client_id, "Send path disposed");
        }
    }
}

/// True once the writer thread has exited
fn wait_for_exit(exited: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(exited.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TerminationReason;
    use std::io;

    struct Sink;

    impl Transport for Sink {
        fn send(&self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn set_send_timeout(&self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn close(&self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Ignore;

    impl ClientRegistry for Ignore {
        fn mark_pending_termination(&self, _client: ClientId, _reason: TerminationReason) {}
    }

    fn small_config() -> SendConfig {
        SendConfig {
            small_block_size: 16,
            large_block_size: 64,
            small_block_count: 2,
            large_block_count: 1,
            write_timeout_ms: 100,
            join_timeout_ms: 500,
        }
    }

    fn path() -> SendPath {
        SendPath::new(ClientId(1), Arc::new(Sink), Arc::new(Ignore), small_config())
    }

    #[test]
    fn test_stopped_path_rejects_work() {
        let path = path();
        assert_eq!(path.state(), WriterState::Stopped);
        assert!(path.claim(4).is_none());
        assert!(path.pool_stats().is_none());
        assert!(!path.alloc_and_populate(4, |_| panic!("fill must not run")));
    }

    #[test]
    fn test_start_twice_fails() {
        let path = path();
        path.start().unwrap();
        assert!(matches!(path.start(), Err(SendError::AlreadyRunning(_))));
        path.reset().unwrap();
        assert_eq!(path.state(), WriterState::Stopped);
    }

    #[test]
    fn test_start_rejects_bad_geometry() {
        let config = SendConfig {
            small_block_size: 64,
            large_block_size: 64,
            ..small_config()
        };
        let path = SendPath::new(ClientId(2), Arc::new(Sink), Arc::new(Ignore), config);

        assert!(matches!(path.start(), Err(SendError::InvalidConfig(_))));
        assert_eq!(path.state(), WriterState::Stopped);
        assert!(path.pool_stats().is_none());
        assert!(path.worker.lock().is_none());

        let config = SendConfig {
            small_block_count: 0,
            ..small_config()
        };
        let path = SendPath::new(ClientId(3), Arc::new(Sink), Arc::new(Ignore), config);
        assert!(matches!(path.start(), Err(SendError::InvalidConfig(_))));
    }

    #[test]
    fn test_abandoned_start_releases_queued_blocks() {
        let path = path();
        // State of a start whose spawn failed: pool installed, queue open
        path.pool.store(Some(Arc::new(SlabPool::new(&path.config))));
        path.queue.reopen();
        assert!(path.send_packet(crate::protocol::tag::HELLO, &[1]).unwrap());
        assert!(path.send_packet(crate::protocol::tag::HELLO, &[2]).unwrap());
        assert_eq!(path.queued(), 2);

        path.abandon_start();

        assert_eq!(path.queued(), 0);
        assert!(path.queue.is_closed());
        assert!(path.pool_stats().is_none());
        // No handle outlived the drain, so the pool was recycled
        assert!(path.spare.lock().is_some());
    }

    #[test]
    fn test_declined_fill_releases_block() {
        let path = path();
        path.start().unwrap();

        assert!(!path.alloc_and_populate(4, |_| false));
        assert_eq!(path.pool_stats().unwrap().claimed(), 0);

        let failed: Result<bool, &str> = path.try_alloc_and_populate(4, |_| Err("encode"));
        assert_eq!(failed, Err("encode"));
        assert_eq!(path.pool_stats().unwrap().claimed(), 0);
    }

    #[test]
    fn test_alloc_and_copy_bounds() {
        let path = path();
        path.start().unwrap();
        let source = [7u8; 100];

        let copied = path.alloc_and_copy(&source, 10, 12).unwrap().unwrap();
        assert_eq!(copied.payload(), &source[10..22]);
        drop(copied);

        assert!(matches!(
            path.alloc_and_copy(&source, 0, 65),
            Err(SendError::BoundaryViolation {
                requested: 65,
                capacity: 64
            })
        ));
        assert!(matches!(
            path.alloc_and_copy(&source, 90, 20),
            Err(SendError::SourceRange { .. })
        ));
        assert_eq!(path.pool_stats().unwrap().claimed(), 0);
    }

    #[test]
    fn test_reset_keeps_pool_for_restart() {
        let path = path();
        path.start().unwrap();
        let held = path.claim(4).unwrap();
        path.reset().unwrap();

        // A handle from the previous run keeps its own pool alive
        assert!(path.spare.lock().is_none());
        drop(held);

        path.start().unwrap();
        path.reset().unwrap();
        assert!(path.spare.lock().is_some());

        path.dispose().unwrap();
        path.dispose().unwrap();
        assert!(path.spare.lock().is_none());
    }
}
