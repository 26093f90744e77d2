//! Field access, method invocation, and the subscript (`[]`) protocol.

use crate::exception::VmError;
use crate::symbols;
use crate::value::{gc, BoundMethodObj, ClassObj, Gc, Value, ValueKey};
use crate::Vm;

impl Vm {
    /// Generic attribute read: instance field, falling back to a bound
    /// method from the (flattened) class method table; module global for
    /// module values; `FieldException` otherwise.
    pub fn get_field(&mut self, receiver: &Value, name: &str) -> Result<Value, VmError> {
        match receiver {
            Value::Instance(inst) => {
                if let Some(v) = inst.borrow().fields.borrow().get(name).cloned() {
                    return Ok(v);
                }
                let class = inst.borrow().class.clone();
                if let Some(method) = class.borrow().methods.borrow().get(name).cloned() {
                    return Ok(Value::BoundMethod(gc(BoundMethodObj {
                        receiver: receiver.clone(),
                        method,
                    })));
                }
                Err(VmError::Field(format!(
                    "'{}' has no field or method '{name}'",
                    class.borrow().name.borrow().s
                )))
            }
            Value::Module(m) => m
                .borrow()
                .globals
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| VmError::Name(format!("name '{name}' is not defined"))),
            Value::Class(class) => class
                .borrow()
                .methods
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| VmError::Field(format!("class has no method '{name}'"))),
            other => Err(VmError::Field(format!(
                "'{}' has no field '{name}'",
                other.type_name()
            ))),
        }
    }

    pub fn set_field(&mut self, receiver: &Value, name: &str, value: Value) -> Result<(), VmError> {
        match receiver {
            Value::Instance(inst) => {
                inst.borrow().fields.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(m) => {
                m.borrow().globals.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(VmError::Type(format!(
                "'{}' does not support field assignment",
                other.type_name()
            ))),
        }
    }

    /// Fast path for `receiver.name(args..)`: resolves the callable without
    /// materializing an intermediate `BoundMethod`, then calls it with the
    /// receiver already occupying the call's `self` slot.
    pub fn invoke(&mut self, name: &str, argc: u8) -> Result<(), VmError> {
        let base = self.stack.len() - argc as usize - 1;
        let receiver = self.stack[base].clone();
        let method = self.resolve_method(&receiver, name)?;
        self.call_value(method, argc)
    }

    fn resolve_method(&mut self, receiver: &Value, name: &str) -> Result<Value, VmError> {
        if let Value::Instance(inst) = receiver {
            if let Some(v) = inst.borrow().fields.borrow().get(name).cloned() {
                return Ok(v);
            }
            let class = inst.borrow().class.clone();
            if let Some(m) = class.borrow().methods.borrow().get(name).cloned() {
                return Ok(m);
            }
            return Err(VmError::Method(format!(
                "'{}' has no method '{name}'",
                class.borrow().name.borrow().s
            )));
        }
        Err(VmError::Method(format!("'{}' has no method '{name}'", receiver.type_name())))
    }

    /// `super.name(args..)`: method lookup starts at `superclass`'s
    /// flattened table, bypassing whatever override the receiver's own
    /// class installed, while `self` stays bound to the receiver.
    pub fn invoke_super(&mut self, superclass: &Gc<ClassObj>, name: &str, argc: u8) -> Result<(), VmError> {
        let method = superclass
            .borrow()
            .methods
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                VmError::Method(format!("'{}' has no method '{name}'", superclass.borrow().name.borrow().s))
            })?;
        self.call_value(method, argc)
    }

    pub fn super_bind(&mut self, receiver: Value, superclass: &Gc<ClassObj>, name: &str) -> Result<Value, VmError> {
        let method = superclass
            .borrow()
            .methods
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                VmError::Method(format!("'{}' has no method '{name}'", superclass.borrow().name.borrow().s))
            })?;
        Ok(Value::BoundMethod(gc(BoundMethodObj { receiver, method })))
    }

    pub fn subscript_get(&mut self, target: &Value, index: &Value) -> Result<Value, VmError> {
        match target {
            Value::List(l) => index_seq(&l.borrow(), index),
            Value::Tuple(t) => index_seq(t, index),
            Value::Table(t) => t
                .borrow()
                .map
                .borrow()
                .get(&ValueKey(index.clone()))
                .cloned()
                .ok_or_else(|| VmError::IndexOutOfBound("key not found in table".into())),
            Value::Str(s) => {
                let i = expect_index(index, s.borrow().s.chars().count())?;
                s.borrow()
                    .s
                    .chars()
                    .nth(i)
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| VmError::IndexOutOfBound("string index out of range".into()))
            }
            Value::Instance(_) => self.call_overload(target, symbols::GET, &[index.clone()]),
            other => Err(VmError::Type(format!("'{}' is not subscriptable", other.type_name()))),
        }
    }

    pub fn subscript_set(&mut self, target: &Value, index: &Value, value: Value) -> Result<(), VmError> {
        match target {
            Value::List(l) => {
                let i = expect_index(index, l.borrow().len())?;
                l.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Table(t) => {
                t.borrow().map.borrow_mut().insert(ValueKey(index.clone()), value);
                Ok(())
            }
            Value::Tuple(_) => Err(VmError::Type("tuples are immutable".into())),
            Value::Instance(_) => {
                self.call_overload(target, symbols::SET, &[index.clone(), value])?;
                Ok(())
            }
            other => Err(VmError::Type(format!("'{}' does not support item assignment", other.type_name()))),
        }
    }

    /// Calls `target.<symbol>(args..)` if present, used by the subscript
    /// overload fallback; distinct from `resolve_method`'s error wording
    /// since a missing operator overload is a `TypeException`, not a
    /// `MethodException`.
    pub(crate) fn call_overload(&mut self, target: &Value, symbol: &str, args: &[Value]) -> Result<Value, VmError> {
        let method = if let Value::Instance(inst) = target {
            let class = inst.borrow().class.clone();
            class.borrow().methods.borrow().get(symbol).cloned()
        } else {
            None
        };
        let method = method.ok_or_else(|| {
            VmError::Type(format!("'{}' does not support this operation", target.type_name()))
        })?;
        self.stack.push(target.clone());
        for a in args {
            self.stack.push(a.clone());
        }
        self.call_value_sync(method, args.len() as u8)
    }

    /// Overload-aware `str(value)`: consults the value's class for
    /// `__str__` before falling back to the default renderer.
    pub fn to_display_string(&mut self, v: &Value) -> Result<String, VmError> {
        if let Value::Instance(inst) = v {
            let class = inst.borrow().class.clone();
            let has_str = class.borrow().methods.borrow().contains_key(symbols::STR);
            if has_str {
                let s = self.call_overload(v, symbols::STR, &[])?;
                return match s {
                    Value::Str(s) => Ok(s.borrow().s.clone()),
                    other => Err(VmError::Type(format!(
                        "__str__ must return a String, got {}",
                        other.type_name()
                    ))),
                };
            }
        }
        Ok(crate::display::describe(v))
    }
}

/// `isInt(x) ≡ trunc(x) == x`: subscript indices must be integer-valued
/// numbers, then resolved via negative-indexing normalization.
fn expect_index(index: &Value, len: usize) -> Result<usize, VmError> {
    let n = index
        .as_float()
        .ok_or_else(|| VmError::Type(format!("index must be a Number, got {}", index.type_name())))?;
    if n.trunc() != n {
        return Err(VmError::InvalidArg(format!("index must be an integer, got {n}")));
    }
    let i = n as i64;
    let i = if i < 0 { i + len as i64 } else { i };
    if i < 0 || i as usize >= len {
        return Err(VmError::IndexOutOfBound(format!("index {n} out of range (len {len})")));
    }
    Ok(i as usize)
}

fn index_seq(items: &[Value], index: &Value) -> Result<Value, VmError> {
    let i = expect_index(index, items.len())?;
    Ok(items[i].clone())
}
