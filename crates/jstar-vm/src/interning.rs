//! String interning for literal constants: every string literal flows
//! through this single path, so two literals with identical content share
//! one heap allocation. Runtime-built
//! strings (concatenation, `str()`) are *not* interned -- `Value::same`
//! falls back to content comparison for those, so equality stays correct
//! either way; interning is purely a memory optimization for literals.

use crate::value::{gc, Gc, JStr, Value};
use crate::Vm;

impl Vm {
    pub fn intern_str(&mut self, s: &str) -> Value {
        if let Some(existing) = self.interned.get(s) {
            return Value::Str(existing.clone());
        }
        let obj: Gc<JStr> = gc(JStr::new(s.to_string()));
        self.interned.insert(s.to_string(), obj.clone());
        Value::Str(obj)
    }
}
