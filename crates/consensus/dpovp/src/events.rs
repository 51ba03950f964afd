//! Outbound consensus events.
//!
//! Confirmation broadcasts and double-production checks run off the insertion path. They are
//! queued to a dedicated worker thread which publishes to every registered [`EventSink`].

use crate::{confirmer::BlockConfirmData, validator::Validator};
use alloy_primitives::Address;
use dpovp_primitives::Block;
use std::{
    fmt::Debug,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Notifications produced by the consensus core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// A new block became stable. `pruned` lists side-fork blocks removed with it, whose
    /// transactions should go back to the pool.
    StableBlockChanged {
        /// New stable block
        block: Block,
        /// Pruned blocks
        pruned: Vec<Block>,
    },
    /// The fork head moved
    HeadBlockChanged(Block),
    /// This node confirmed a block and the confirmation should be broadcast
    NewConfirm(BlockConfirmData),
    /// This node mined a block
    MinedBlock(Block),
    /// A miner produced two different blocks at the same height
    EvilDeputy {
        /// Offending miner
        miner: Address,
        /// Height of the conflicting blocks
        height: u64,
    },
    /// The salary pool of the running term is still unset at its check height
    TermRewardUnset {
        /// Term without a pool
        term: u64,
        /// Height of the check
        height: u64,
    },
    /// Confirmations produced for stable blocks that lacked quorum
    StableConfirms(Vec<BlockConfirmData>),
}

/// Subscriber to consensus events
pub trait EventSink: Send + Sync + Debug {
    /// Handle one event
    fn on_event(&self, event: &ConsensusEvent);
}

#[derive(Debug)]
enum Task {
    Publish(ConsensusEvent),
    JudgeDeputy(Block),
    Shutdown,
}

/// Cheap cloneable handle queueing work for the [`EventWorker`]
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl OutboundHandle {
    /// Queue an event for every sink
    pub fn publish(&self, event: ConsensusEvent) {
        self.send(Task::Publish(event));
    }

    /// Queue a double-production check for `block`
    pub fn judge_deputy(&self, block: Block) {
        self.send(Task::JudgeDeputy(block));
    }

    fn send(&self, task: Task) {
        if let Err(err) = self.tx.send(task) {
            trace!(target: "dpovp::events", task = ?err.0, "Event worker stopped, dropping task");
        }
    }
}

/// Dedicated thread draining the outbound queue
#[derive(Debug)]
pub struct EventWorker {
    handle: OutboundHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventWorker {
    /// Spawn the worker thread
    pub fn spawn(sinks: Vec<Arc<dyn EventSink>>, validator: Arc<Validator>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        let thread = thread::Builder::new()
            .name("dpovp-events".into())
            .spawn(move || {
                debug!(target: "dpovp::events", sinks = sinks.len(), "Event worker started");
                while let Some(task) = rx.blocking_recv() {
                    match task {
                        Task::Publish(event) => {
                            for sink in &sinks {
                                sink.on_event(&event);
                            }
                        }
                        Task::JudgeDeputy(block) => {
                            if let Some(miner) = validator.judge_deputy(&block) {
                                let event = ConsensusEvent::EvilDeputy { miner, height: block.height() };
                                for sink in &sinks {
                                    sink.on_event(&event);
                                }
                            }
                        }
                        Task::Shutdown => break,
                    }
                }
                debug!(target: "dpovp::events", "Event worker stopped");
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                warn!(target: "dpovp::events", %err, "Failed to spawn event worker");
                None
            }
        };

        Self { handle: OutboundHandle { tx }, thread }
    }

    /// Handle for queueing work
    pub fn handle(&self) -> OutboundHandle {
        self.handle.clone()
    }

    /// Process everything queued so far, then stop the thread
    pub fn shutdown(mut self) {
        self.handle.send(Task::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(target: "dpovp::events", "Event worker panicked");
            }
        }
    }
}
