//! Dwell timer
//!
//! Posts generation-tagged ticks onto the dispatcher queue every
//! [`DWELL_TICK`]. The ticker never touches recording state itself.

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{trace, warn};

use super::dispatcher::EngineMessage;
use super::recording::DWELL_TICK;

/// At most one running dwell ticker
#[derive(Debug, Default)]
pub struct DwellTicker {
    task: Option<JoinHandle<()>>,
}

impl DwellTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking for `generation`, replacing any running ticker.
    ///
    /// Without a runtime to schedule on, the dwell simply never advances.
    pub fn start(&mut self, generation: u64, tx: mpsc::UnboundedSender<EngineMessage>) {
        self.cancel();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "cannot schedule dwell timer");
                return;
            }
        };

        self.task = Some(handle.spawn(async move {
            trace!(generation, "dwell ticker started");
            let mut interval = time::interval_at(Instant::now() + DWELL_TICK, DWELL_TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(EngineMessage::Tick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop the running ticker, if any
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            trace!("dwell ticker cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for DwellTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
