//! Per-attempt protocol state machine.
//!
//! One attempt is scoped to one correlation id and settles exactly once.
//! Mixing a callback subscription with a suspended future makes it easy to
//! resolve twice when deliveries race a terminal transition; routing every
//! delivery through this machine is what rules that out.

use gymgate_store::CommandStatus;

/// Phase of a single enrollment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// Preconditions passed, command not yet written.
    Requesting,
    /// Command written, device has not picked it up yet.
    Waiting,
    /// Device reported the capture is in progress.
    Processing,
    /// Terminal outcome reached; every later delivery is ignored.
    Settled(Settlement),
}

/// Terminal outcome reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
    Cancelled,
}

/// What the coordinator should do with one delivered status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing: echo of our own write, or a delivery after settlement.
    Ignore,
    /// Surface a progress notification; keep waiting.
    Progress,
    /// Resolve the attempt with the given outcome.
    Settle(Settlement),
}

/// State machine for one attempt.
#[derive(Debug)]
pub struct AttemptState {
    phase: AttemptPhase,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptState {
    pub const fn new() -> Self {
        Self {
            phase: AttemptPhase::Requesting,
        }
    }

    pub const fn phase(&self) -> AttemptPhase {
        self.phase
    }

    /// The command document has been written; deliveries may now arrive.
    pub fn command_written(&mut self) {
        if self.phase == AttemptPhase::Requesting {
            self.phase = AttemptPhase::Waiting;
        }
    }

    /// Feed one delivered status; returns what the coordinator should do.
    pub fn observe(&mut self, status: CommandStatus) -> Step {
        if matches!(self.phase, AttemptPhase::Settled(_)) {
            return Step::Ignore;
        }
        match status {
            CommandStatus::Pending => Step::Ignore,
            CommandStatus::InProgress => {
                self.phase = AttemptPhase::Processing;
                Step::Progress
            }
            CommandStatus::Completed => {
                self.phase = AttemptPhase::Settled(Settlement::Succeeded);
                Step::Settle(Settlement::Succeeded)
            }
            CommandStatus::Failed => {
                self.phase = AttemptPhase::Settled(Settlement::Failed);
                Step::Settle(Settlement::Failed)
            }
            CommandStatus::Cancelled => {
                self.phase = AttemptPhase::Settled(Settlement::Cancelled);
                Step::Settle(Settlement::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut attempt = AttemptState::new();
        assert_eq!(attempt.phase(), AttemptPhase::Requesting);

        attempt.command_written();
        assert_eq!(attempt.phase(), AttemptPhase::Waiting);

        // Echo of our own pending write changes nothing.
        assert_eq!(attempt.observe(CommandStatus::Pending), Step::Ignore);
        assert_eq!(attempt.phase(), AttemptPhase::Waiting);

        assert_eq!(attempt.observe(CommandStatus::InProgress), Step::Progress);
        assert_eq!(attempt.phase(), AttemptPhase::Processing);

        assert_eq!(
            attempt.observe(CommandStatus::Completed),
            Step::Settle(Settlement::Succeeded)
        );
        assert_eq!(attempt.phase(), AttemptPhase::Settled(Settlement::Succeeded));
    }

    #[test]
    fn device_may_fail_straight_from_waiting() {
        let mut attempt = AttemptState::new();
        attempt.command_written();
        assert_eq!(
            attempt.observe(CommandStatus::Failed),
            Step::Settle(Settlement::Failed)
        );
    }

    #[test]
    fn cancellation_settles() {
        let mut attempt = AttemptState::new();
        attempt.command_written();
        assert_eq!(attempt.observe(CommandStatus::InProgress), Step::Progress);
        assert_eq!(
            attempt.observe(CommandStatus::Cancelled),
            Step::Settle(Settlement::Cancelled)
        );
    }

    #[test]
    fn nothing_moves_a_settled_attempt() {
        let mut attempt = AttemptState::new();
        attempt.command_written();
        assert_eq!(
            attempt.observe(CommandStatus::Completed),
            Step::Settle(Settlement::Succeeded)
        );

        for status in [
            CommandStatus::Pending,
            CommandStatus::InProgress,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Cancelled,
        ] {
            assert_eq!(attempt.observe(status), Step::Ignore);
        }
        assert_eq!(attempt.phase(), AttemptPhase::Settled(Settlement::Succeeded));
    }

    #[test]
    fn repeated_progress_keeps_reporting() {
        let mut attempt = AttemptState::new();
        attempt.command_written();
        assert_eq!(attempt.observe(CommandStatus::InProgress), Step::Progress);
        assert_eq!(attempt.observe(CommandStatus::InProgress), Step::Progress);
        assert_eq!(attempt.phase(), AttemptPhase::Processing);
    }
}
