//! Iterator protocol backing `for` loops.
//!
//! State is represented uniformly as a [`Value`]: `Null` means "not started
//! yet", `Bool(false)` means "exhausted" (the truthy-state sentinel),
//! anything else is an opaque continuation token handed back
//! to `__iter__`/`__next__` on the next iteration. `List`/`Tuple` get a
//! built-in fast path keyed on a numeric index so ordinary loops over them
//! don't need a user-defined class; anything else must implement
//! `__iter__` (advance the state) and `__next__` (read the value for a
//! state).

use crate::exception::VmError;
use crate::symbols;
use crate::value::Value;
use crate::Vm;

impl Vm {
    /// `OP_FOR_ITER`: advances `state` one step (or produces the first
    /// state, if `state` is `Null`), returning the new state.
    pub fn iter_step(&mut self, target: &Value, state: &Value) -> Result<Value, VmError> {
        match target {
            Value::List(l) => Ok(step_index_state(state, l.borrow().len())),
            Value::Tuple(t) => Ok(step_index_state(state, t.len())),
            Value::Instance(_) => self.call_overload(target, symbols::ITER, &[state.clone()]),
            other => Err(VmError::Type(format!("'{}' is not iterable", other.type_name()))),
        }
    }

    /// `OP_FOR_NEXT`: reads the element for a (non-exhausted) `state`.
    pub fn iter_value(&mut self, target: &Value, state: &Value) -> Result<Value, VmError> {
        match target {
            Value::List(l) => {
                let i = index_of(state)?;
                l.borrow()
                    .get(i)
                    .cloned()
                    .ok_or_else(|| VmError::IndexOutOfBound("iterator out of range".into()))
            }
            Value::Tuple(t) => {
                let i = index_of(state)?;
                t.get(i).cloned().ok_or_else(|| VmError::IndexOutOfBound("iterator out of range".into()))
            }
            Value::Instance(_) => self.call_overload(target, symbols::NEXT, &[state.clone()]),
            other => Err(VmError::Type(format!("'{}' is not iterable", other.type_name()))),
        }
    }
}

fn step_index_state(state: &Value, len: usize) -> Value {
    let next = match state {
        Value::Null => 0,
        other => match index_of(other) {
            Ok(i) => i + 1,
            Err(_) => return Value::Bool(false),
        },
    };
    if next < len {
        Value::Float(next as f64)
    } else {
        Value::Bool(false)
    }
}

fn index_of(state: &Value) -> Result<usize, VmError> {
    state
        .as_float()
        .map(|f| f as usize)
        .ok_or_else(|| VmError::Type("bad iterator state".into()))
}
