use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("full screen request denied: {0}")]
pub struct FullscreenDenied(pub String);

/// Platform side of proctoring: a browser Fullscreen API bridge, a kiosk shell, or a stub.
pub trait FullscreenPlatform: Send + Sync {
    fn request_engage(&self) -> Result<(), FullscreenDenied>;

    fn release(&self);

    /// Engagement transitions as they happen (`true` = full screen). `None` when the platform
    /// cannot report them.
    fn observe_transitions(&self) -> Option<watch::Receiver<bool>>;
}

/// Grants every request and lets the host flip engagement by hand. Used by the headless
/// driver and by tests.
#[derive(Debug)]
pub struct HeadlessFullscreen {
    engaged: watch::Sender<bool>,
}

impl HeadlessFullscreen {
    pub fn new() -> Self {
        let (engaged, _) = watch::channel(false);
        Self { engaged }
    }

    pub fn set_engaged(&self, engaged: bool) {
        self.engaged.send_replace(engaged);
    }

    pub fn is_engaged(&self) -> bool {
        *self.engaged.borrow()
    }
}

impl Default for HeadlessFullscreen {
    fn default() -> Self {
        Self::new()
    }
}

impl FullscreenPlatform for HeadlessFullscreen {
    fn request_engage(&self) -> Result<(), FullscreenDenied> {
        self.engaged.send_replace(true);
        Ok(())
    }

    fn release(&self) {
        self.engaged.send_replace(false);
    }

    fn observe_transitions(&self) -> Option<watch::Receiver<bool>> {
        Some(self.engaged.subscribe())
    }
}

/// A platform with no full-screen capability; every request is denied.
#[derive(Debug, Default)]
pub struct UnsupportedFullscreen;

impl FullscreenPlatform for UnsupportedFullscreen {
    fn request_engage(&self) -> Result<(), FullscreenDenied> {
        Err(FullscreenDenied("platform has no full-screen support".to_string()))
    }

    fn release(&self) {}

    fn observe_transitions(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProctoringState {
    Unarmed,
    Engaged,
    Violating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    Engaged,
    Denied(FullscreenDenied),
}

/// Tracks full-screen engagement for a running session. It never touches the clock:
/// time spent in a violation counts against the candidate.
pub struct ProctoringMonitor {
    platform: Arc<dyn FullscreenPlatform>,
    state: ProctoringState,
    violations: u32,
}

impl ProctoringMonitor {
    pub fn new(platform: Arc<dyn FullscreenPlatform>) -> Self {
        Self { platform, state: ProctoringState::Unarmed, violations: 0 }
    }

    /// Optimistically engaged once the request is accepted. A denial leaves the monitor
    /// unarmed.
    pub fn arm(&mut self) -> ArmOutcome {
        if self.state != ProctoringState::Unarmed {
            return ArmOutcome::Engaged;
        }
        match self.platform.request_engage() {
            Ok(()) => {
                self.state = ProctoringState::Engaged;
                ArmOutcome::Engaged
            }
            Err(denied) => ArmOutcome::Denied(denied),
        }
    }

    pub fn disarm(&mut self) {
        if self.state == ProctoringState::Unarmed {
            return;
        }
        self.state = ProctoringState::Unarmed;
        self.platform.release();
    }

    /// Returns `true` when this exit opened a new violation.
    pub fn on_exit(&mut self) -> bool {
        if self.state != ProctoringState::Engaged {
            return false;
        }
        self.state = ProctoringState::Violating;
        self.violations += 1;
        true
    }

    /// Returns `true` when this entry closed an open violation.
    pub fn on_enter(&mut self) -> bool {
        if self.state != ProctoringState::Violating {
            return false;
        }
        self.state = ProctoringState::Engaged;
        true
    }

    pub fn state(&self) -> ProctoringState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state != ProctoringState::Unarmed
    }

    pub fn violation_visible(&self) -> bool {
        self.state == ProctoringState::Violating
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn platform(&self) -> &Arc<dyn FullscreenPlatform> {
        &self.platform
    }
}
