pub mod backend;
pub mod ir;
pub mod sim;

pub use backend::{
    compile_function, compile_module, BackendOptions, CompiledFunction, ModuleOutput,
};
pub use backend::target::{Target, TargetKind, CERULEAN_ASM, CERULEAN_RISC};

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a diagnostic was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Lowering,
    Liveness,
    Allocation,
    Frame,
    Emission,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Lowering => write!(f, "lowering"),
            Stage::Liveness => write!(f, "liveness"),
            Stage::Allocation => write!(f, "allocation"),
            Stage::Frame => write!(f, "frame"),
            Stage::Emission => write!(f, "emission"),
        }
    }
}

/// Fatal per-function backend diagnostics. None of these are retried; the
/// function that raised one produces no output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{function}: {stage}: no lowering rule for `{operation}` on {target}")]
    NoLoweringRule {
        function: String,
        stage: Stage,
        operation: String,
        target: &'static str,
    },

    #[error("{function}: {stage}: `{instr}` does not match its format: {detail}")]
    FormatMismatch {
        function: String,
        stage: Stage,
        instr: String,
        detail: String,
    },

    #[error("{function}: {stage}: unknown symbol `{symbol}` in `{operation}`")]
    UnknownSymbol {
        function: String,
        stage: Stage,
        symbol: String,
        operation: String,
    },

    #[error("{function}: {stage}: unknown label `{label}` in `{operation}`")]
    UnknownLabel {
        function: String,
        stage: Stage,
        label: String,
        operation: String,
    },

    #[error("{function}: {stage}: `{vreg}` is live into the entry block but is not a parameter")]
    IllegalLiveIn {
        function: String,
        stage: Stage,
        vreg: String,
    },

    #[error("{function}: {stage}: `{vreg}` is read by `{instr}` with no reaching definition")]
    MalformedLiveRange {
        function: String,
        stage: Stage,
        vreg: String,
        instr: String,
    },

    #[error("{function}: {stage}: {frame_size}-byte frame puts `{instr}` beyond the {bits}-bit offset range")]
    FrameOverflow {
        function: String,
        stage: Stage,
        frame_size: u32,
        instr: String,
        bits: u32,
    },

    #[error("{function}: {stage}: immediate {value} does not fit `{instr}`")]
    ImmediateRange {
        function: String,
        stage: Stage,
        value: i64,
        instr: String,
    },
}

impl BackendError {
    pub fn function(&self) -> &str {
        match self {
            BackendError::NoLoweringRule { function, .. }
            | BackendError::FormatMismatch { function, .. }
            | BackendError::UnknownSymbol { function, .. }
            | BackendError::UnknownLabel { function, .. }
            | BackendError::IllegalLiveIn { function, .. }
            | BackendError::MalformedLiveRange { function, .. }
            | BackendError::FrameOverflow { function, .. }
            | BackendError::ImmediateRange { function, .. } => function,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            BackendError::NoLoweringRule { stage, .. }
            | BackendError::FormatMismatch { stage, .. }
            | BackendError::UnknownSymbol { stage, .. }
            | BackendError::UnknownLabel { stage, .. }
            | BackendError::IllegalLiveIn { stage, .. }
            | BackendError::MalformedLiveRange { stage, .. }
            | BackendError::FrameOverflow { stage, .. }
            | BackendError::ImmediateRange { stage, .. } => *stage,
        }
    }

    /// Wrap an instruction-construction failure raised while `instr` was
    /// being built or rewritten.
    pub(crate) fn from_instr(
        function: &str,
        stage: Stage,
        instr: String,
        err: backend::instruction::InstrError,
    ) -> Self {
        use backend::instruction::InstrError;
        match err {
            InstrError::ImmediateRange { value, .. } => BackendError::ImmediateRange {
                function: function.to_string(),
                stage,
                value,
                instr,
            },
            other => BackendError::FormatMismatch {
                function: function.to_string(),
                stage,
                instr,
                detail: other.to_string(),
            },
        }
    }
}
