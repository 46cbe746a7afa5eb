//! CiA-402 enable/disable ladders.
//!
//! One step per cycle: the drive state decoded from the latest status
//! word selects the next control word. The machine only remembers the
//! last observed state for transition logging.

use servo_common::drive::{DriveState, control};
use tracing::debug;

/// Result of one ladder step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderStep {
    /// Control word to send; `None` keeps the current one.
    pub control_word: Option<u16>,
    /// The ladder reached its end state this step.
    pub settled: bool,
}

impl LadderStep {
    const fn command(word: u16) -> Self {
        Self {
            control_word: Some(word),
            settled: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct DriveStateMachine {
    last: Option<DriveState>,
}

impl DriveStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, status_word: u16) -> Option<DriveState> {
        let state = DriveState::from_status_word(status_word);
        if state != self.last {
            debug!(
                from = ?self.last,
                to = ?state,
                status_word = format_args!("{status_word:#06x}"),
                "drive state transition"
            );
            self.last = state;
        }
        state
    }

    /// Next step towards OPERATION_ENABLED.
    ///
    /// | State               | Control word | Settled |
    /// |---------------------|--------------|---------|
    /// | FAULT               | 0x0080       | no      |
    /// | SWITCH_ON_DISABLED  | 0x0006       | no      |
    /// | READY_TO_SWITCH_ON  | 0x0007       | no      |
    /// | SWITCHED_ON         | 0x000F       | no      |
    /// | OPERATION_ENABLED   | unchanged    | yes     |
    /// | anything else       | 0x0006       | no      |
    pub fn enable_step(&mut self, status_word: u16) -> LadderStep {
        match self.observe(status_word) {
            Some(DriveState::Fault) => LadderStep::command(control::FAULT_RESET),
            Some(DriveState::SwitchOnDisabled) => LadderStep::command(control::SHUTDOWN),
            Some(DriveState::ReadyToSwitchOn) => LadderStep::command(control::SWITCH_ON),
            Some(DriveState::SwitchedOn) => LadderStep::command(control::ENABLE_OPERATION),
            Some(DriveState::OperationEnabled) => LadderStep {
                control_word: None,
                settled: true,
            },
            _ => LadderStep::command(control::SHUTDOWN),
        }
    }

    /// Next step back to READY_TO_SWITCH_ON and below.
    ///
    /// | State               | Control word | Settled |
    /// |---------------------|--------------|---------|
    /// | OPERATION_ENABLED   | 0x0007       | no      |
    /// | SWITCHED_ON         | 0x0006       | no      |
    /// | READY_TO_SWITCH_ON  | 0x0000       | yes     |
    /// | anything else       | 0x0000       | yes     |
    pub fn disable_step(&mut self, status_word: u16) -> LadderStep {
        match self.observe(status_word) {
            Some(DriveState::OperationEnabled) => LadderStep::command(control::SWITCH_ON),
            Some(DriveState::SwitchedOn) => LadderStep::command(control::SHUTDOWN),
            _ => LadderStep {
                control_word: Some(control::DISABLE_VOLTAGE),
                settled: true,
            },
        }
    }

    pub fn last_state(&self) -> Option<DriveState> {
        self.last
    }
}
