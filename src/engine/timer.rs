use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fixed resale cooldown: 12 minutes.
pub const DEFAULT_COOLDOWN_MS: u64 = 720_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CooldownState {
    Unarmed,
    Armed { armed_at: u64 },
    Elapsed,
}

/// One-shot gate between sellout and resale.
///
/// Arms exactly once, fires exactly once; re-arming and re-firing are no-ops.
/// The timer itself never looks at a clock: the host schedules the wakeup
/// (see [`spawn_cooldown`]) and reports back through [`CooldownTimer::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownTimer {
    state: CooldownState,
    delay_ms: u64,
}

impl CooldownTimer {
    pub fn new(delay_ms: u64) -> Self {
        Self { state: CooldownState::Unarmed, delay_ms }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn state(&self) -> CooldownState {
        self.state
    }

    /// Arm at `now_ms`. Returns true only on the Unarmed -> Armed edge;
    /// arming an armed or elapsed timer does not reset the clock.
    pub fn arm(&mut self, now_ms: u64) -> bool {
        match self.state {
            CooldownState::Unarmed => {
                self.state = CooldownState::Armed { armed_at: now_ms };
                info!(armed_at = now_ms, delay_ms = self.delay_ms, "cooldown armed");
                true
            }
            CooldownState::Armed { .. } | CooldownState::Elapsed => {
                debug!("cooldown already armed, ignoring");
                false
            }
        }
    }

    /// Wakeup callback. Returns true only on the Armed -> Elapsed edge.
    pub fn fire(&mut self) -> bool {
        match self.state {
            CooldownState::Armed { .. } => {
                self.state = CooldownState::Elapsed;
                info!("cooldown elapsed");
                true
            }
            CooldownState::Elapsed => {
                debug!("cooldown already elapsed, ignoring duplicate firing");
                false
            }
            CooldownState::Unarmed => {
                warn!("spurious cooldown firing while unarmed, ignoring");
                false
            }
        }
    }

    pub fn is_elapsed(&self) -> bool {
        self.state == CooldownState::Elapsed
    }

    pub(crate) fn restore(state: CooldownState, delay_ms: u64) -> Self {
        Self { state, delay_ms }
    }
}

/// Wakeup messages delivered to the host's operation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    CooldownElapsed,
}

/// Adapter over the timer collaborator: schedule a one-shot wakeup and feed
/// it into the host loop as an explicit message, never as a bare callback
/// closing over engine state.
pub fn spawn_cooldown(
    delay: Duration,
    tx: mpsc::Sender<EngineSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if tx.send(EngineSignal::CooldownElapsed).await.is_err() {
            warn!("cooldown wakeup dropped, engine loop is gone");
        }
    })
}
