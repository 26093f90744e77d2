//! jstar-vm — the stack-based bytecode VM for J*.
//!
//! Owns the value representation, call/exception/closure/class machinery,
//! and the evaluator that drives a [`jstar_bytecode::Chunk`] to completion.
//! This crate deliberately knows nothing about source syntax or compilation:
//! it consumes chunks built by hand or by a separate compiler crate, and
//! hands diagnostics, module resolution, and native functions off to the
//! embedder through the [`host`] collaborator seam.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hashbrown::HashMap;

pub mod call;
pub mod class;
pub mod config;
pub mod display;
pub mod eval;
pub mod exc_classes;
pub mod exception;
pub mod frame;
pub mod host;
pub mod import;
pub mod interning;
pub mod invoke;
pub mod iterator;
pub mod overload;
pub mod symbols;
pub mod upvalue;
pub mod value;

pub use config::VmOptions;
pub use exception::VmError;
pub use host::{DefaultHost, Host, HostEnv, Importer, NativeRegistry};
pub use value::Value;

use frame::Frame;
use value::{ClassObj, Gc, JStr, ModuleObj, UpvalueObj};

/// The virtual machine: operand stack, call frames, and every piece of
/// shared state the evaluator and its collaborator modules (`call`,
/// `invoke`, `overload`, `class`, `iterator`, `exc_classes`, `import`,
/// `interning`, `upvalue`) reach into via `impl Vm` blocks spread across
/// this crate.
pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) open_upvalues: Vec<Gc<UpvalueObj>>,
    pub(crate) modules: HashMap<String, Gc<ModuleObj>>,
    pub(crate) options: VmOptions,
    pub(crate) host: Box<dyn HostEnv>,
    pub(crate) interned: HashMap<String, Gc<JStr>>,
    pub(crate) exception_classes: HashMap<String, Gc<ClassObj>>,
    pub(crate) empty_tuple: Rc<Vec<Value>>,
    pub(crate) gas_left: Option<u64>,
    /// The sole async input into the evaluator (spec: "evalBreak"):
    /// polled once per dispatched instruction, settable from outside the
    /// call to `run`/`run_to_frame_depth` (e.g. a signal handler holding
    /// a clone of the `Arc`). Not latched across separate `run` calls --
    /// tripping it raises `ProgramInterrupt` at the next safe check and
    /// is reset to `false` immediately after.
    pub(crate) eval_break: Arc<AtomicBool>,
}

impl Vm {
    /// A VM with default options and a `DefaultHost` (no imports, no
    /// natives, prints to stdout) -- good enough for hand-assembled test
    /// chunks that don't need the FFI bridge.
    pub fn new() -> Vm {
        Vm::with_host(VmOptions::default(), Box::new(DefaultHost))
    }

    pub fn with_options(options: VmOptions) -> Vm {
        Vm::with_host(options, Box::new(DefaultHost))
    }

    pub fn with_host(options: VmOptions, host: Box<dyn HostEnv>) -> Vm {
        let gas_left = options.gas;
        let mut vm = Vm {
            stack: Vec::with_capacity(options.stack_size),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            modules: HashMap::new(),
            options,
            host,
            interned: HashMap::new(),
            exception_classes: HashMap::new(),
            empty_tuple: Rc::new(Vec::new()),
            gas_left,
            eval_break: Arc::new(AtomicBool::new(false)),
        };
        vm.init_exception_classes();
        vm
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Current call-stack depth, exposed for diagnostics and for building a
    /// `StackTrace` object.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns a clone of the `evalBreak` flag (spec §5/§6), for a signal
    /// handler or other external interrupter to hold onto and set without
    /// reaching into the `Vm` itself.
    pub fn eval_break_handle(&self) -> Arc<AtomicBool> {
        self.eval_break.clone()
    }

    /// Sets or clears `evalBreak` directly. Setting it to `true` raises
    /// `ProgramInterrupt` at the next instruction dispatched by the
    /// evaluator; the flag is cleared as soon as that happens.
    pub fn set_eval_break(&self, tripped: bool) {
        self.eval_break.store(tripped, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}
