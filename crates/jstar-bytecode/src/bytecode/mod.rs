//! Bytecode core for J*: opcodes, chunk format, disassembler.
//! Re-exported at the crate root for convenient use elsewhere.

pub mod ops;
pub mod chunk;
pub mod disasm;

pub use ops::Op;
pub use chunk::{Chunk, ChunkFlags, ConstPool, ConstValue, FunctionTemplate, LineTable, UpvalueDescriptor};
