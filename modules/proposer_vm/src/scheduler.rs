//! Holds back "ready to build" notifications until this node's build time.

use std::time::{Duration, SystemTime};

use slotgate_common::EngineMessage;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// VM-side handle: moves the build time, or closes the dispatcher
pub struct Scheduler {
    build_time: Option<watch::Sender<SystemTime>>,
}

/// Background half forwarding messages from the chain to the engine
pub struct Dispatcher {
    build_time: watch::Receiver<SystemTime>,
    from_vm: mpsc::Receiver<EngineMessage>,
    to_engine: mpsc::Sender<EngineMessage>,
}

impl Scheduler {
    /// Create the scheduler pair. The returned sender is what the inner
    /// chain notifies; it has the same capacity as `to_engine`.
    pub fn new(
        to_engine: mpsc::Sender<EngineMessage>,
        start: SystemTime,
    ) -> (Self, Dispatcher, mpsc::Sender<EngineMessage>) {
        let (build_time_tx, build_time_rx) = watch::channel(start);
        let (from_vm_tx, from_vm_rx) = mpsc::channel(to_engine.max_capacity());
        let dispatcher = Dispatcher {
            build_time: build_time_rx,
            from_vm: from_vm_rx,
            to_engine,
        };
        (
            Self {
                build_time: Some(build_time_tx),
            },
            dispatcher,
            from_vm_tx,
        )
    }

    /// Replace the build time; the most recent value wins
    pub fn set_build_block_time(&self, time: SystemTime) {
        if let Some(build_time) = &self.build_time {
            build_time.send_replace(time);
        }
    }

    pub fn build_block_time(&self) -> Option<SystemTime> {
        self.build_time.as_ref().map(|tx| *tx.borrow())
    }

    /// Stop the dispatcher
    pub fn close(&mut self) {
        self.build_time = None;
    }
}

fn until(time: SystemTime) -> Duration {
    time.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
}

impl Dispatcher {
    pub async fn dispatch(mut self) {
        loop {
            let wait = until(*self.build_time.borrow_and_update());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = self.build_time.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }

            // Build time reached: pass messages through until it moves again
            loop {
                tokio::select! {
                    msg = self.from_vm.recv() => {
                        let Some(msg) = msg else {
                            return;
                        };
                        if let Err(e) = self.to_engine.try_send(msg) {
                            debug!("dropping message to consensus engine: {e}");
                        }
                    }
                    changed = self.build_time.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}
