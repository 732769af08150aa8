use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    Unarmed,
    Armed,
    Disarmed,
    Expired,
}

/// Result of advancing the clock by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not armed; nothing happened.
    Idle,
    Remaining(u64),
    /// Reached zero on this tick. Reported once; the clock disarms itself.
    Expired,
}

/// Countdown for the exam. Pure scheduling state: it is advanced one second at a time by
/// whoever owns the cadence and never performs business logic itself.
#[derive(Debug, Clone)]
pub struct Clock {
    time_limit_seconds: u64,
    remaining_seconds: u64,
    deadline: Option<OffsetDateTime>,
    state: ClockState,
}

impl Clock {
    pub fn new(time_limit_seconds: u64) -> Self {
        Self {
            time_limit_seconds,
            remaining_seconds: time_limit_seconds,
            deadline: None,
            state: ClockState::Unarmed,
        }
    }

    /// Fixes the deadline on first call. Arming again never stacks a second countdown and
    /// never moves the deadline. The countdown runs even when the deadline falls outside
    /// the representable calendar, in which case no wall-clock deadline is reported.
    pub fn arm(&mut self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.state == ClockState::Unarmed {
            self.deadline = i64::try_from(self.time_limit_seconds)
                .ok()
                .and_then(|limit| now.checked_add(Duration::seconds(limit)));
        }
        if matches!(self.state, ClockState::Unarmed | ClockState::Disarmed) {
            self.state = ClockState::Armed;
        }
        self.deadline
    }

    pub fn disarm(&mut self) {
        if self.state == ClockState::Armed {
            self.state = ClockState::Disarmed;
        }
    }

    pub fn tick(&mut self) -> Tick {
        if self.state != ClockState::Armed {
            return Tick::Idle;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.state = ClockState::Expired;
            return Tick::Expired;
        }
        Tick::Remaining(self.remaining_seconds)
    }

    pub fn is_armed(&self) -> bool {
        self.state == ClockState::Armed
    }

    pub fn has_expired(&self) -> bool {
        self.state == ClockState::Expired
    }

    pub fn deadline(&self) -> Option<OffsetDateTime> {
        self.deadline
    }

    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_seconds
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.time_limit_seconds - self.remaining_seconds
    }
}
