use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Ordered documents of one agency's winning bets.
pub type WinnerSet = Vec<u32>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Stopped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Stopped => "stopped",
        }
    }
}

/// Terminal report of one handler. `agency_id` is `None` when the handler
/// stopped or failed before the agency identified itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletionRecord {
    pub connection_id: u64,
    pub agency_id: Option<u32>,
    pub outcome: Outcome,
}

#[derive(Clone, Debug)]
pub struct CompletionSender {
    inner: Sender<CompletionRecord>,
}

impl CompletionSender {
    /// Returns false once the orchestrator side has gone away.
    pub fn report(&self, record: CompletionRecord) -> bool {
        self.inner.send(record).is_ok()
    }
}

#[derive(Debug)]
pub struct CompletionReceiver {
    inner: Receiver<CompletionRecord>,
}

impl CompletionReceiver {
    /// Pulls up to `count` records, stopping early if every sender is gone
    /// or nothing arrives within `patience`.
    pub fn drain(&self, count: usize, patience: Duration) -> Vec<CompletionRecord> {
        let mut records = Vec::with_capacity(count);
        while records.len() < count {
            match self.inner.recv_timeout(patience) {
                Ok(record) => records.push(record),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        records
    }
}

pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (inner_tx, inner_rx) = mpsc::channel();
    (
        CompletionSender { inner: inner_tx },
        CompletionReceiver { inner: inner_rx },
    )
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryError {
    UnknownConnection { connection_id: u64 },
    ReceiverGone { connection_id: u64 },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConnection { connection_id } => write!(
                f,
                "no result channel registered for connection {connection_id} (or already delivered)"
            ),
            Self::ReceiverGone { connection_id } => write!(
                f,
                "handler for connection {connection_id} is no longer waiting for results"
            ),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Handler end of a single-slot result channel.
#[derive(Debug)]
pub struct ResultReceiver {
    inner: Receiver<WinnerSet>,
}

impl ResultReceiver {
    /// Blocks until the orchestrator delivers; `None` if the orchestrator
    /// dropped the channel without delivering (shutdown).
    pub fn wait(self) -> Option<WinnerSet> {
        self.inner.recv().ok()
    }
}

/// Orchestrator end of every result channel, keyed by connection id.
#[derive(Debug, Default)]
pub struct ResultRouter {
    senders: Mutex<HashMap<u64, SyncSender<WinnerSet>>>,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: u64) -> ResultReceiver {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, sender);
        ResultReceiver { inner: receiver }
    }

    /// Sends at most once per connection: the sender is removed on delivery.
    pub fn deliver(&self, connection_id: u64, winners: WinnerSet) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id)
            .ok_or(DeliveryError::UnknownConnection { connection_id })?;

        match sender.try_send(winners) {
            Ok(()) => Ok(()),
            // A fresh single-slot channel is never full.
            Err(TrySendError::Disconnected(_) | TrySendError::Full(_)) => {
                Err(DeliveryError::ReceiverGone { connection_id })
            }
        }
    }

    /// Drops the channel of a connection that will never get results.
    pub fn discard(&self, connection_id: u64) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id)
            .is_some()
    }

    /// Drops every remaining sender so blocked handlers wake up empty-handed.
    pub fn close_all(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = senders.len();
        senders.clear();
        closed
    }
}
