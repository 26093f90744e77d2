//! jstar-bytecode — bytecode container format for the J* VM.
//!
//! Everything needed to build, serialize, and inspect J* bytecode, without
//! depending on the compiler or the VM itself.
//!
//! ## Modules
//! - `bytecode` — the `Chunk` format, constant pool, `Op` instruction set,
//!   and the human-readable disassembler.
//!
//! ## Features
//! - **tracing**: instrumentation via `tracing`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

use std::{string::String, vec::Vec};

#[cfg(feature = "tracing")]
use tracing::info;

pub mod bytecode;

pub use bytecode::{
    chunk::{Chunk, ChunkFlags, ConstPool, ConstValue, FunctionTemplate, LineTable, UpvalueDescriptor},
    ops::Op,
};

/// Crate version (readable, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns a one-line version banner (handy for logs/tools).
pub fn version() -> String {
    format!("jstar-bytecode {VERSION}")
}

// ---------- Errors & Result ----------
use thiserror::Error;

/// Errors surfaced by chunk I/O and validation helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure while reading/writing a chunk file.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// bincode (de)serialization failure.
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    /// Invalid or unexpected chunk format.
    #[error("chunk: {0}")]
    Chunk(String),

    /// Catch-all message.
    #[error("{0}")]
    Msg(String),
}

/// Result alias used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------- Prelude ----------
pub mod prelude {
    pub use crate::{
        bytecode::{chunk, ops},
        helpers::*,
        Chunk, ChunkFlags, ConstPool, ConstValue, Error, LineTable, Op, Result,
    };
    pub use crate::version;
}

// ---------- Utility macros ----------
/// Returns an `Err(Error::Msg(..))` if the condition is false.
#[macro_export]
macro_rules! chunk_assert {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::Error::Msg(format!($($arg)*)));
        }
    };
    ($cond:expr) => {
        if !$cond {
            return Err($crate::Error::Msg("assertion failed".into()));
        }
    };
}

// ---------- Batteries-included helpers ----------
pub mod helpers {
    use super::*;
    use bytecode::chunk::{CHUNK_MAGIC, CHUNK_VERSION};

    /// Creates an empty `Chunk` ready to be filled in.
    pub fn new_chunk(stripped: bool) -> Chunk {
        Chunk::new(ChunkFlags { stripped })
    }

    /// Constant-pool shortcuts.
    pub fn k_str(c: &mut Chunk, s: &str) -> u32 {
        c.add_const(ConstValue::Str(s.into()))
    }
    pub fn k_i64(c: &mut Chunk, i: i64) -> u32 {
        c.add_const(ConstValue::I64(i))
    }
    pub fn k_f64(c: &mut Chunk, x: f64) -> u32 {
        c.add_const(ConstValue::F64(x))
    }
    pub fn k_bool(c: &mut Chunk, b: bool) -> u32 {
        c.add_const(ConstValue::Bool(b))
    }
    pub fn k_null(c: &mut Chunk) -> u32 {
        c.add_const(ConstValue::Null)
    }

    /// Checks a few chunk invariants. Extend as the format grows.
    pub fn validate_chunk(c: &Chunk) -> Result<()> {
        if c.consts.len() > (u32::MAX as usize) {
            return Err(Error::Chunk("too many constants".into()));
        }
        if let Some(main) = &c.debug.main_file {
            if main.trim().is_empty() {
                return Err(Error::Chunk("debug.main_file is empty".into()));
            }
        }
        Ok(())
    }

    /// Expected binary signature (toolchain sanity check).
    pub fn compiled_format_signature() -> (&'static [u8; 4], u16) {
        (&CHUNK_MAGIC, CHUNK_VERSION)
    }

    /// Reads a `Chunk` from a `.jsbc` file.
    pub fn read_chunk_from_file(path: impl AsRef<std::path::Path>) -> Result<Chunk> {
        let bytes = std::fs::read(path)?;
        let c = Chunk::from_bytes(&bytes).map_err(|e| Error::Chunk(format!("{e}")))?;
        validate_chunk(&c)?;
        Ok(c)
    }

    /// Writes a `Chunk` to a `.jsbc` file.
    pub fn write_chunk_to_file(mut chunk: Chunk, path: impl AsRef<std::path::Path>) -> Result<()> {
        let bytes = chunk.to_bytes();
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Storage abstraction, handy for tests or embedding.
    pub trait BytecodeIo {
        /// Loads a `Chunk` from bytes.
        fn load(&self, bytes: &[u8]) -> Result<Chunk>;
        /// Saves a `Chunk` to bytes.
        fn save(&self, chunk: &mut Chunk) -> Result<Vec<u8>>;
    }

    /// "Native" impl based on `Chunk`'s own binary format.
    pub struct NativeBytecode;
    impl BytecodeIo for NativeBytecode {
        fn load(&self, bytes: &[u8]) -> Result<Chunk> {
            Chunk::from_bytes(bytes).map_err(|e| Error::Chunk(format!("{e}")))
        }
        fn save(&self, chunk: &mut Chunk) -> Result<Vec<u8>> {
            Ok(chunk.to_bytes())
        }
    }
}

// ---------- Optional tracing integration ----------
#[cfg(feature = "tracing")]
pub fn log_chunk_short(c: &Chunk, tag: &str) {
    info!(target: "jstar-bytecode", tag, ops = c.ops.len(), consts = c.consts.len(), "chunk summary");
}

// ---------- Tests ----------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip_bytes() {
        let mut c = helpers::new_chunk(false);
        let k = helpers::k_str(&mut c, "yo");
        c.ops.push(Op::LoadConst(k));
        c.ops.push(Op::Print);
        c.ops.push(Op::Return);

        let mut bytes = c.to_bytes();
        let c2 = Chunk::from_bytes(&bytes).expect("roundtrip ok");
        assert_eq!(c2.ops.len(), 3);

        // deliberate corruption should fail the hash check
        bytes[bytes.len().saturating_sub(1)] ^= 0xFF;
        let err = Chunk::from_bytes(&bytes).unwrap_err();
        let s = format!("{err}");
        assert!(s.to_lowercase().contains("hash"));
    }

    #[test]
    fn compiled_sig_exposed() {
        let (_magic, ver) = helpers::compiled_format_signature();
        assert!(ver > 0);
    }
}
