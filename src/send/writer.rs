//! Writer loop
//!
//! The single consumer of a send queue. Each iteration checks the
//! cancellation flag, blocks for the next buffer, writes it and lets the
//! handle drop, which returns the block to the pool on every path.

use crossbeam::channel::Sender;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::queue::SendQueue;
use crate::connection::{ClientId, ClientRegistry, TerminationReason, Transport};
use crate::metrics::METRICS;
use crate::pool::BufferHandle;
use crate::protocol::{is_disconnect, Header, HEADER_LEN};

/// Writer thread lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterState {
    Running = 0,
    /// Shutdown requested, thread not yet gone
    Cancelling = 1,
    Stopped = 2,
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: WriterState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> WriterState {
        match self.0.load(Ordering::Acquire) {
            0 => WriterState::Running,
            1 => WriterState::Cancelling,
            _ => WriterState::Stopped,
        }
    }

    pub(crate) fn store(&self, state: WriterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Why a buffer did not make it onto the wire
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transport write failed: {0}")]
    Io(#[from] io::Error),

    /// The length prefix does not describe a frame inside the block
    #[error("header length {len} outside 3..={capacity}")]
    Malformed { len: usize, capacity: usize },
}

/// Passed to the write-failure hook while the failing buffer is still held
pub struct WriteFailure<'a> {
    pub client_id: ClientId,
    pub handle: &'a BufferHandle,
    pub error: &'a WriteError,
}

/// Observer for failed writes. Runs on the writer thread.
pub type FailureHook = Arc<dyn Fn(&WriteFailure<'_>) + Send + Sync>;

pub(crate) struct WriterLoop {
    pub(crate) client_id: ClientId,
    pub(crate) queue: Arc<SendQueue>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<dyn ClientRegistry>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) on_failure: Option<FailureHook>,
    /// Never sent on; dropping it when the thread exits is the exit signal
    pub(crate) _exited: Sender<()>,
}

impl WriterLoop {
    pub(crate) fn run(self) {
        info!(client_id = %self.client_id, "Writer started");
        METRICS.writer_started();

        loop {
            if self.cancel.load(Ordering::Acquire) {
                break;
            }
            let Some(handle) = self.queue.dequeue_blocking() else {
                break;
            };
            self.transmit(handle);
        }

        self.state.store(WriterState::Stopped);
        METRICS.writer_stopped();
        info!(client_id = %self.client_id, "Writer stopped");
    }

    fn transmit(&self, handle: BufferHandle) {
        let capacity = handle.capacity();
        let header = match Header::read(handle.as_slice()) {
            Some(header) if (HEADER_LEN..=capacity).contains(&header.total_len()) => header,
            other => {
                let len = other.map_or(0, |h| h.total_len());
                METRICS.malformed_buffer();
                warn!(client_id = %self.client_id, len, capacity, "Dropping malformed buffer");
                self.report(&handle, &WriteError::Malformed { len, capacity });
                return;
            }
        };

        let frame = &handle.as_slice()[..header.total_len()];
        match self.transport.send(frame) {
            Ok(()) => {
                METRICS.message_sent(frame.len() as u64);
                if is_disconnect(header.tag) {
                    METRICS.disconnect();
                    debug!(client_id = %self.client_id, tag = header.tag, "Disconnect packet sent");
                    self.registry
                        .mark_pending_termination(self.client_id, TerminationReason::Disconnect);
                }
            }
            Err(e) => {
                METRICS.write_failed();
                warn!(
                    client_id = %self.client_id,
                    error = %e,
                    len = frame.len(),
                    "Transport write failed"
                );
                self.registry
                    .mark_pending_termination(self.client_id, TerminationReason::WriteFailed);
                self.report(&handle, &WriteError::Io(e));
            }
        }
    }

    fn report(&self, handle: &BufferHandle, error: &WriteError) {
        if let Some(hook) = &self.on_failure {
            hook(&WriteFailure {
                client_id: self.client_id,
                handle,
                error,
            });
        }
    }
}
