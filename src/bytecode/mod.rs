pub mod cfg;
pub mod opcode;
pub mod sourcemap;

pub use cfg::{BasicBlock, Cfg, EdgeKind, Termination};
pub use opcode::{Instruction, Opcode};
