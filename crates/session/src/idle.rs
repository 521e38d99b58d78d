// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle session monitor.
//!
//! The host UI forwards activity and visibility signals; the monitor owns two
//! one-shot timers (warning, timeout) and restarts both on activity.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Minimum spacing between reschedules caused by high-frequency signals.
pub const ACTIVITY_THROTTLE: Duration = Duration::from_secs(1);

/// Signals the host UI forwards to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerDown,
    PointerMove,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
    VisibilityHidden,
    VisibilityVisible,
    WindowFocus,
    WindowBlur,
}

impl ActivitySignal {
    /// Whether the signal counts as the user being present.
    ///
    /// Hiding the page or losing focus does not stop the clock.
    pub fn is_activity(&self) -> bool {
        !matches!(self, Self::VisibilityHidden | Self::WindowBlur)
    }

    /// Signals that can arrive many times per second.
    pub fn is_high_frequency(&self) -> bool {
        matches!(self, Self::PointerMove | Self::Scroll)
    }
}

pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;
/// Receives the time left before the timeout fires.
pub type WarningCallback = Arc<dyn Fn(Duration) + Send + Sync>;

/// Monitor state while started.
struct Armed {
    timeout: Duration,
    warning: Duration,
    on_timeout: TimeoutCallback,
    on_warning: Option<WarningCallback>,
    scope: CancellationToken,
    last_activity: Instant,
    /// Incremented on every reschedule; timers from older epochs never fire.
    epoch: u64,
    warning_timer: Option<JoinHandle<()>>,
    timeout_timer: Option<JoinHandle<()>>,
}

impl Armed {
    fn cancel_timers(&mut self) {
        for timer in [self.warning_timer.take(), self.timeout_timer.take()].into_iter().flatten() {
            timer.abort();
        }
    }
}

#[derive(Clone, Copy)]
enum TimerKind {
    Warning,
    Timeout,
}

/// Detects user inactivity.
#[derive(Clone, Default)]
pub struct IdleMonitor {
    armed: Arc<Mutex<Option<Armed>>>,
}

impl IdleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching with a fresh clock, replacing any previous run.
    pub fn start(
        &self,
        timeout: Duration,
        warning: Duration,
        on_timeout: TimeoutCallback,
        on_warning: Option<WarningCallback>,
    ) {
        self.start_scoped(CancellationToken::new(), timeout, warning, on_timeout, on_warning);
    }

    /// Like [`start`](Self::start), but timers go quiet once `scope` is cancelled.
    pub fn start_scoped(
        &self,
        scope: CancellationToken,
        timeout: Duration,
        warning: Duration,
        on_timeout: TimeoutCallback,
        on_warning: Option<WarningCallback>,
    ) {
        let mut guard = self.armed.lock();
        if let Some(mut previous) = guard.take() {
            previous.cancel_timers();
        }
        let mut armed = Armed {
            timeout,
            warning,
            on_timeout,
            on_warning,
            scope,
            last_activity: Instant::now(),
            epoch: 0,
            warning_timer: None,
            timeout_timer: None,
        };
        self.reschedule(&mut armed);
        *guard = Some(armed);
        debug!(timeout_ms = timeout.as_millis() as u64, "idle monitor started");
    }

    /// Cancel pending timers and go inert. Safe when not started.
    pub fn stop(&self) {
        if let Some(mut armed) = self.armed.lock().take() {
            armed.cancel_timers();
            debug!("idle monitor stopped");
        }
    }

    /// Whether timers are armed and the timeout has not fired.
    pub fn is_active(&self) -> bool {
        self.armed.lock().as_ref().is_some_and(|a| !a.scope.is_cancelled())
    }

    /// Time of the last activity that restarted the clock.
    pub fn last_activity(&self) -> Option<Instant> {
        self.armed.lock().as_ref().map(|a| a.last_activity)
    }

    /// Feed one signal from the host UI.
    pub fn record(&self, signal: ActivitySignal) {
        let mut guard = self.armed.lock();
        let Some(armed) = guard.as_mut() else {
            return;
        };
        if armed.scope.is_cancelled() || !signal.is_activity() {
            return;
        }

        let now = Instant::now();
        if signal.is_high_frequency() && now.duration_since(armed.last_activity) < ACTIVITY_THROTTLE
        {
            return;
        }
        armed.last_activity = now;
        self.reschedule(armed);
    }

    /// Cancel both timers and arm them again from `last_activity`.
    fn reschedule(&self, armed: &mut Armed) {
        armed.cancel_timers();
        armed.epoch += 1;

        if !armed.warning.is_zero() {
            let delay = armed.timeout.saturating_sub(armed.warning);
            armed.warning_timer = self.spawn_timer(armed, delay, TimerKind::Warning);
        }
        armed.timeout_timer = self.spawn_timer(armed, armed.timeout, TimerKind::Timeout);
    }

    /// `None` when the deadline is beyond what the clock can represent.
    fn spawn_timer(
        &self,
        armed: &Armed,
        delay: Duration,
        kind: TimerKind,
    ) -> Option<JoinHandle<()>> {
        let Some(deadline) = armed.last_activity.checked_add(delay) else {
            warn!(delay_ms = delay.as_millis() as u64, "idle deadline out of range, not armed");
            return None;
        };
        let slot = Arc::clone(&self.armed);
        let scope = armed.scope.clone();
        let epoch = armed.epoch;

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            fire(&slot, epoch, kind);
        }))
    }
}

/// Run a timer's callback if it still belongs to the current epoch.
///
/// Callbacks run outside the lock so they may call back into the monitor.
fn fire(slot: &Mutex<Option<Armed>>, epoch: u64, kind: TimerKind) {
    match kind {
        TimerKind::Warning => {
            let callback = {
                let guard = slot.lock();
                match guard.as_ref() {
                    Some(a) if a.epoch == epoch => {
                        a.on_warning.clone().map(|cb| (cb, a.warning.min(a.timeout)))
                    }
                    _ => None,
                }
            };
            if let Some((on_warning, remaining)) = callback {
                debug!(remaining_ms = remaining.as_millis() as u64, "idle warning");
                on_warning(remaining);
            }
        }
        TimerKind::Timeout => {
            // Inert until started again; the timeout fires once.
            let fired = {
                let mut guard = slot.lock();
                if guard.as_ref().is_some_and(|a| a.epoch == epoch) {
                    guard.take()
                } else {
                    None
                }
            };
            if let Some(armed) = fired {
                debug!("idle timeout");
                (armed.on_timeout)();
            }
        }
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
