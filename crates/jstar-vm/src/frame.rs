//! Call frames and exception-handler bookkeeping.

use crate::value::{ClosureObj, Gc, ModuleObj};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Except,
    Ensure,
}

/// One entry of a frame's handler stack, pushed by `OP_SETUP_EXCEPT` /
/// `OP_SETUP_ENSURE` and popped by `OP_POP_HANDLER` or consumed by the
/// unwinder. `saved_sp` is the operand-stack depth to restore before
/// jumping to `address`, so values pushed inside the protected region don't
/// leak into the handler.
pub struct HandlerRecord {
    pub kind: HandlerKind,
    pub address: usize,
    pub saved_sp: usize,
}

/// An active call's bookkeeping: instruction pointer, the base index of its
/// stack window, and its handler stack. Only closures get a persistent
/// frame; native calls execute synchronously inside `call_value` and never
/// appear here (see `value.rs` module docs and `call.rs`).
pub struct Frame {
    pub ip: usize,
    pub base: usize,
    pub closure: Gc<ClosureObj>,
    pub module: Gc<ModuleObj>,
    pub handlers: Vec<HandlerRecord>,
    /// Set while unwinding is in flight and this frame has a pending
    /// `return` value that must be honored once its `ensure` clauses finish
    /// running.
    pub pending_return: Option<crate::value::Value>,
    /// Same idea for an in-flight exception passing through an `ensure`
    /// clause.
    pub pending_exception: Option<crate::value::Value>,
}

impl Frame {
    pub fn new(closure: Gc<ClosureObj>, base: usize, module: Gc<ModuleObj>) -> Frame {
        Frame {
            ip: 0,
            base,
            closure,
            module,
            handlers: Vec::new(),
            pending_return: None,
            pending_exception: None,
        }
    }
}
