//! Error types shared across the analysis pipeline.
//!
//! Each subsystem gets its own `thiserror` enum; [`AnalyzerError`] unifies them at
//! the orchestrator/RPC boundary where `anyhow::Error` takes over for ad-hoc context.

use thiserror::Error;

/// The four error kinds carried through the diff aggregator and reported in artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Compilation,
    SymbolicExecution,
    SymbolicTimeout,
    Empty,
}

#[derive(Error, Debug)]
pub enum CfgError {
    #[error("empty bytecode")]
    EmptyBytecode,
    #[error("unrecognized opcode 0x{opcode:02x} at offset {offset}")]
    UnrecognizedOpcode { offset: usize, opcode: u8 },
    #[error("malformed disassembly token: {0}")]
    MalformedToken(String),
}

#[derive(Error, Debug)]
pub enum InterpreterError {
    #[error("stack underflow executing {op} at pc {pc}: need {needed}, have {available}")]
    StackUnderflow {
        op: &'static str,
        pc: usize,
        needed: usize,
        available: usize,
    },
    #[error("jump to unresolved or symbolic target at pc {pc}")]
    UnresolvedJumpTarget { pc: usize },
    #[error("jump to pc {target} which is not a valid block leader")]
    InvalidJumpTarget { target: usize },
    #[error("global symbolic-execution timeout exceeded")]
    GlobalTimeout,
    #[error("gas ceiling exceeded at pc {pc}")]
    GasCeilingExceeded { pc: usize },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error writing artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("compilation artifact missing or malformed: {0}")]
    Compilation(String),
    #[error(transparent)]
    Cfg(#[from] CfgError),
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("diff parse error: {0}")]
    DiffParse(String),
    #[error("config error: {0}")]
    Config(String),
}

impl AnalyzerError {
    /// Maps an error to the coarse-grained kind used by the diff aggregator's
    /// per-index error bookkeeping (§7 of the design: compilation failures are
    /// non-fatal, timeouts suppress only the indices still running).
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzerError::Compilation(_) => ErrorKind::Compilation,
            AnalyzerError::Interpreter(InterpreterError::GlobalTimeout) => {
                ErrorKind::SymbolicTimeout
            }
            AnalyzerError::Interpreter(_) | AnalyzerError::Cfg(_) => ErrorKind::SymbolicExecution,
            AnalyzerError::Report(_) | AnalyzerError::DiffParse(_) | AnalyzerError::Config(_) => {
                ErrorKind::Empty
            }
        }
    }
}

pub type Result<T, E = AnalyzerError> = std::result::Result<T, E>;
