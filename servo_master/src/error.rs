//! Error types for bring-up, runtime and console requests.

use servo_common::config::ConfigError;
use servo_common::drive::OperationMode;
use servo_common::drive::params::ParamError;
use servo_common::transport::{LinkState, TransportError};
use thiserror::Error;

/// Fatal startup and runtime errors.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no network interface confirmed within {waited_ms} ms")]
    InterfaceNotConfirmed { waited_ms: u64 },

    /// Slave reported an ERROR-flagged state while waiting.
    #[error("slave {slave} entered {state} (AL status {al_status:#06x}: {description})")]
    LinkState {
        slave: u16,
        state: LinkState,
        al_status: u16,
        description: &'static str,
    },

    #[error("timeout waiting for slave {slave} to reach {target} (last seen {observed})")]
    LinkStateTimeout {
        slave: u16,
        target: LinkState,
        observed: LinkState,
    },

    #[error("cannot advance from {from} to {to}: states must be taken in order")]
    StageSkipped { from: LinkState, to: LinkState },

    #[error("PDO mapping failed on slave {slave} at object {object:#06x}: {source}")]
    Mapping {
        slave: u16,
        object: u16,
        #[source]
        source: TransportError,
    },

    #[error("distributed clock did not activate on slave {slave}")]
    DcActivation { slave: u16 },

    #[error("RT setup error: {0}")]
    RtSetup(String),

    #[error("failed to spawn {thread} thread: {reason}")]
    ThreadSpawn { thread: &'static str, reason: String },

    #[error("{thread} thread panicked")]
    ThreadPanicked { thread: &'static str },

    /// A thread did not stop within the bounded join timeout.
    #[error("{thread} thread did not stop within {timeout_ms} ms")]
    JoinTimeout { thread: &'static str, timeout_ms: u64 },

    #[error("startup cancelled")]
    Cancelled,
}

/// Errors returned to the operator console.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("refused while the motor is enabled")]
    MotorEnabled,

    #[error("motor is not enabled")]
    MotorDisabled,

    #[error("no operation mode confirmed")]
    ModeNotConfirmed,

    #[error("parameters for {0} are not confirmed")]
    ParamsNotConfirmed(OperationMode),

    #[error("parameters are for {given}, but the active mode is {active}")]
    WrongMode {
        given: OperationMode,
        active: OperationMode,
    },

    #[error("no network interface selected")]
    NoInterface,

    #[error("target {value} out of range for {mode}")]
    TargetOutOfRange { mode: OperationMode, value: i64 },

    #[error(transparent)]
    InvalidParams(#[from] ParamError),

    #[error("parameter write {index:#06x}:{subindex} failed on slave {slave}: {source}")]
    ParamWrite {
        slave: u16,
        index: u16,
        subindex: u8,
        #[source]
        source: TransportError,
    },
}
