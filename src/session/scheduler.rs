use std::collections::HashMap;
use futures::channel::mpsc::Sender;
use futures::SinkExt;
use log::{debug, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Refreshes the elapsed session time
    Elapsed,
    /// Re-publishes metrics of the latest sample
    Processing,
    /// Moves the aggregation window onto the chart
    WindowFlush,
}

fn timer_task(cancel: CancellationToken, kind: TimerKind, period: Duration, mut ticks: Sender<TimerKind>) -> JoinHandle<()> {
    spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = interval.tick() => {
                    if ticks.send(kind).await.is_err() {
                        break 'mainloop;
                    }
                },
            }
        }

        debug!("{:?} timer stopped", kind);
    })
}

/// The periodic timers of one session. Ticks are delivered as [`TimerKind`] messages, and all
/// timers share one root token so they can be cancelled together.
pub struct Scheduler {
    root: CancellationToken,
    ticks: Sender<TimerKind>,
    timers: HashMap<TimerKind, CancellationToken>,
}

impl Scheduler {
    pub fn new(ticks: Sender<TimerKind>) -> Self {
        Scheduler {
            root: CancellationToken::new(),
            ticks,
            timers: HashMap::new(),
        }
    }

    /// Start a timer unless it is already running. Returns false if nothing was started.
    pub fn start(&mut self, kind: TimerKind, period: Duration) -> bool {
        if self.root.is_cancelled() || self.timers.contains_key(&kind) {
            return false;
        }

        if period.is_zero() {
            warn!("Not starting {:?} timer with a zero period", kind);
            return false;
        }

        debug!("Starting {:?} timer every {:?}", kind, period);
        let cancel = self.root.child_token();
        timer_task(cancel.clone(), kind, period, self.ticks.clone());
        self.timers.insert(kind, cancel);
        true
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        !self.root.is_cancelled() && self.timers.contains_key(&kind)
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Stop every timer. Timers can not be started again afterwards.
    pub fn cancel_all(&mut self) -> bool {
        if self.root.is_cancelled() {
            return false;
        }

        self.root.cancel();
        self.timers.clear();
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
