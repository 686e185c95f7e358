//! Watches for the Plex player app so the daemon can exit alongside it.

use crate::core::DaemonEvent;
use plex_proto::config::MonitorConfig;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Case-insensitive substring match, with exclusions winning.
pub fn is_player_process(name: &str, patterns: &[String], excludes: &[String]) -> bool {
    let name = name.to_lowercase();
    if excludes.iter().any(|e| name.contains(&e.to_lowercase())) {
        return false;
    }
    patterns.iter().any(|p| name.contains(&p.to_lowercase()))
}

/// Answers whether the player app is running. Implementations may block.
pub trait PresenceProbe: Send + 'static {
    fn is_player_running(&mut self) -> bool;
}

pub struct PlayerMonitor {
    system: System,
    own_pid: Pid,
    patterns: Vec<String>,
    excludes: Vec<String>,
}

impl PlayerMonitor {
    pub fn new(patterns: Vec<String>, excludes: Vec<String>) -> Self {
        Self {
            system: System::new(),
            own_pid: Pid::from_u32(std::process::id()),
            patterns,
            excludes,
        }
    }
}

impl PresenceProbe for PlayerMonitor {
    /// Refreshes the process table; this blocks, call it off the runtime.
    fn is_player_running(&mut self) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system.processes().iter().any(|(pid, process)| {
            *pid != self.own_pid
                && is_player_process(
                    &process.name().to_string_lossy(),
                    &self.patterns,
                    &self.excludes,
                )
        })
    }
}

async fn check<P: PresenceProbe>(mut probe: P) -> Option<(P, bool)> {
    match tokio::task::spawn_blocking(move || {
        let running = probe.is_player_running();
        (probe, running)
    })
    .await
    {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Player monitor check panicked: {}", e);
            None
        }
    }
}

pub fn start(config: MonitorConfig, event_tx: mpsc::Sender<DaemonEvent>) -> tokio::task::JoinHandle<()> {
    let monitor = PlayerMonitor::new(config.process_patterns.clone(), config.exclude_patterns.clone());
    tokio::spawn(watch(config, monitor, event_tx))
}

async fn watch<P: PresenceProbe>(
    config: MonitorConfig,
    probe: P,
    event_tx: mpsc::Sender<DaemonEvent>,
) {
    let Some((mut probe, mut was_running)) = check(probe).await else {
        return;
    };

    if was_running {
        info!("Player app is running");
    } else if config.quit_with_player {
        info!("Player app is not running, quitting");
        let _ = event_tx.send(DaemonEvent::PlayerAppExited).await;
        return;
    } else {
        info!("Player app is not running");
    }

    let mut ticker = tokio::time::interval(config.check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some((next, running)) = check(probe).await else {
            return;
        };
        probe = next;

        match (was_running, running) {
            (false, true) => info!("Player app launched"),
            (true, false) => {
                info!("Player app terminated");
                if config.quit_with_player {
                    let _ = event_tx.send(DaemonEvent::PlayerAppExited).await;
                    return;
                }
            }
            _ => {}
        }
        was_running = running;
    }
}
