//! jstar-natives — demo native-function registry for J*.
//!
//! The foreign-function bridge (`NativeRegistry`) lets `Native`/`NatMethod`
//! resolve a `(module, name)` pair against a host-maintained table of Rust
//! functions. This crate is one such host: a small, fixed set
//! of natives (`print`, `clock`, `assert`, `typeName`) good enough for the
//! CLI and for hand-assembled test chunks that need *some* native surface
//! without pulling in a real IO/math/regex stdlib.
//!
//! Kept as its own crate (rather than folded into `jstar-vm`) so the VM
//! never hard-codes a concrete native set -- any embedder can supply its own
//! `NativeRegistry` impl instead.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use jstar_vm::value::{NativeFn, Value};
use jstar_vm::{VmError, Vm};

/// Version of this crate, exposed for diagnostics/`--version` plumbing.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `"native"` pseudo-module's registry: resolves `(module, name)` pairs
/// against the fixed demo natives below.
#[derive(Default)]
pub struct NativeRegistry;

impl jstar_vm::host::NativeRegistry for NativeRegistry {
    fn resolve_native(&self, module: &str, name: &str) -> Option<NativeFn> {
        if module != "native" {
            return None;
        }
        natives::lookup(name)
    }
}

/// The demo natives themselves, each matching the `NativeFn` signature the
/// VM calls through: `fn(&mut Vm, &[Value]) -> Result<Value, VmError>`.
pub mod natives {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Looks up a native by name; the table `resolve_native` consults.
    pub fn lookup(name: &str) -> Option<NativeFn> {
        match name {
            "print" => Some(print as NativeFn),
            "clock" => Some(clock as NativeFn),
            "assert" => Some(assert_ as NativeFn),
            "typeName" => Some(type_name as NativeFn),
            _ => None,
        }
    }

    /// `native.print(x)` -- renders `x` (via `__str__` if overloaded) and
    /// routes it through the host's print sink, same as `OP_PRINT`.
    fn print(vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
        let v = args.first().ok_or_else(|| VmError::InvalidArg("print expects 1 argument".into()))?;
        let s = vm.to_display_string(v)?;
        vm.print(&s);
        Ok(Value::Null)
    }

    /// `native.clock()` -- wall-clock milliseconds since the Unix epoch, for
    /// scripts that need a coarse timer without a real stdlib.
    fn clock(_vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
        if !args.is_empty() {
            return Err(VmError::InvalidArg("clock expects 0 arguments".into()));
        }
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| VmError::InvalidArg(format!("system clock error: {e}")))?;
        Ok(Value::Float(since_epoch.as_millis() as f64))
    }

    /// `native.assert(cond, msg)` -- raises `AssertException` with `msg` if
    /// `cond` is falsy, otherwise returns `null`.
    fn assert_(_vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
        let cond = args.first().ok_or_else(|| VmError::InvalidArg("assert expects 2 arguments".into()))?;
        if cond.is_truthy() {
            return Ok(Value::Null);
        }
        let msg = match args.get(1).and_then(Value::as_str) {
            Some(s) => s.s.clone(),
            None => "assertion failed".to_string(),
        };
        Err(VmError::Assert(msg))
    }

    /// `native.typeName(x)` -- the runtime type name `Value::type_name`
    /// assigns `x`, e.g. `"Number"`, `"Instance"`.
    fn type_name(_vm: &mut Vm, args: &[Value]) -> Result<Value, VmError> {
        let v = args.first().ok_or_else(|| VmError::InvalidArg("typeName expects 1 argument".into()))?;
        Ok(Value::str(v.type_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jstar_vm::host::NativeRegistry as _;

    #[test]
    fn resolves_known_natives() {
        let reg = NativeRegistry;
        assert!(reg.resolve_native("native", "print").is_some());
        assert!(reg.resolve_native("native", "clock").is_some());
        assert!(reg.resolve_native("native", "assert").is_some());
        assert!(reg.resolve_native("native", "typeName").is_some());
        assert!(reg.resolve_native("native", "nope").is_none());
        assert!(reg.resolve_native("other", "print").is_none());
    }

    #[test]
    fn type_name_reports_number() {
        let mut vm = Vm::new();
        let r = natives::lookup("typeName").unwrap()(&mut vm, &[Value::Float(1.0)]).unwrap();
        assert_eq!(r.as_str().map(|s| s.s.clone()), Some("Number".to_string()));
    }

    #[test]
    fn assert_raises_on_falsy() {
        let mut vm = Vm::new();
        let f = natives::lookup("assert").unwrap();
        assert!(f(&mut vm, &[Value::Bool(false), Value::str("boom")]).is_err());
        assert!(f(&mut vm, &[Value::Bool(true), Value::str("boom")]).is_ok());
    }
}
