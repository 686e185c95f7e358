//! Recurring session polling.
//!
//! One task per run drives the schedule and awaits each fetch before waiting
//! for the next tick, with missed ticks skipped. Out-of-band refreshes take
//! the same fetch lock, so a slow server never sees more than one sessions
//! request from us at a time.
//!
//! Every `start`/`stop` retires the current epoch in the [`StateManager`].
//! A fetch still in flight when its run is retired completes, but its result
//! is dropped instead of published.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionSource;
use crate::state::StateManager;

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Run {
    epoch: u64,
    interval: Duration,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

pub struct PollingController {
    source: Arc<dyn SessionSource>,
    state: Arc<StateManager>,
    fetch_lock: Arc<Mutex<()>>,
    run: Mutex<Option<Run>>,
}

impl PollingController {
    pub fn new(source: Arc<dyn SessionSource>, state: Arc<StateManager>) -> Self {
        Self {
            source,
            state,
            fetch_lock: Arc::new(Mutex::new(())),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// Start polling, or restart with `interval` if already running. The
    /// first fetch happens immediately.
    pub async fn start(&self, interval: Duration) {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let mut run = self.run.lock().await;
        if let Some(old) = run.take() {
            debug!("Restarting poller (was every {:?})", old.interval);
            old.cancel.cancel();
        }

        let epoch = self.state.advance_epoch().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.state),
            Arc::clone(&self.fetch_lock),
            epoch,
            interval,
            cancel.clone(),
        ));

        info!("Polling every {:?} (epoch {})", interval, epoch);
        *run = Some(Run {
            epoch,
            interval,
            cancel,
            _handle: handle,
        });
    }

    /// Stop polling. No state change is published after this returns.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(old) = run.take() else {
            return;
        };
        old.cancel.cancel();
        self.state.advance_epoch().await;
        info!("Polling stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    /// Schedule a single fetch after `delay`, outside the regular schedule.
    /// Ignored when the poller is idle; dropped if the run ends first.
    pub async fn refresh_after(&self, delay: Duration) -> Option<JoinHandle<()>> {
        let run = self.run.lock().await;
        let run = run.as_ref()?;
        let epoch = run.epoch;
        let cancel = run.cancel.clone();
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let fetch_lock = Arc::clone(&self.fetch_lock);

        debug!("Refresh scheduled in {:?}", delay);
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    poll_once(source.as_ref(), &state, &fetch_lock, epoch).await;
                }
            }
        }))
    }
}

async fn poll_loop(
    source: Arc<dyn SessionSource>,
    state: Arc<StateManager>,
    fetch_lock: Arc<Mutex<()>>,
    epoch: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !poll_once(source.as_ref(), &state, &fetch_lock, epoch).await {
            break;
        }
    }
    debug!("Poll loop for epoch {} exited", epoch);
}

/// Fetch and publish under the fetch lock. Returns false once `epoch` has
/// been retired.
async fn poll_once(
    source: &dyn SessionSource,
    state: &StateManager,
    fetch_lock: &Mutex<()>,
    epoch: u64,
) -> bool {
    let _guard = fetch_lock.lock().await;
    if state.current_epoch().await != epoch {
        return false;
    }
    let outcome = source.fetch_now_playing().await;
    state.apply_poll(epoch, outcome).await
}
