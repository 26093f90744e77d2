//! Binary arithmetic/comparison dispatch: a fast path for numbers (and
//! string concatenation for `+`), falling through to the class operator-
//! overload protocol when neither fast path applies.
//!
//! `a OP b` first tries `a.__op__(b)`; if `a`'s class doesn't implement the
//! forward slot, `b.__rop__(a)` is tried before giving up with a
//! `TypeException`. Comparisons (`<`, `<=`, `>`, `>=`) only ever try the
//! forward slot on `a` - there is no reverse comparison overload. `^`
//! (exponent) has no overload slot at all: both operands must be numeric.

use crate::exception::VmError;
use crate::symbols;
use crate::value::Value;
use crate::Vm;

impl Vm {
    /// `+ - * / %`: numeric fast path, `+` also concatenates strings, then
    /// forward/reverse operator overload.
    pub fn binary_op(&mut self, mnemonic: &str, a: Value, b: Value) -> Result<Value, VmError> {
        if let (Value::Float(x), Value::Float(y)) = (&a, &b) {
            if let Some(v) = numeric_fast(mnemonic, *x, *y) {
                return v;
            }
        }
        if mnemonic == "add" {
            if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
                return Ok(Value::str(format!("{}{}", x.borrow().s, y.borrow().s)));
            }
        }

        let (fwd, rev) = symbols::overload_pair(mnemonic)
            .ok_or_else(|| VmError::Type(format!("unknown operator '{mnemonic}'")))?;

        if let Some(v) = self.try_overload(&a, fwd, &b)? {
            return Ok(v);
        }
        if let Some(v) = self.try_overload(&b, rev, &a)? {
            return Ok(v);
        }

        Err(VmError::Type(format!(
            "unsupported operand types for {mnemonic}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )))
    }

    /// `< <= > >=`: numeric fast path, then the forward-only comparison
    /// overload. No reverse fallback - a class that wants `b > a` to work
    /// has to implement the symbol itself.
    pub fn compare_op(&mut self, mnemonic: &str, a: Value, b: Value) -> Result<Value, VmError> {
        if let (Value::Float(x), Value::Float(y)) = (&a, &b) {
            if let Some(v) = numeric_fast(mnemonic, *x, *y) {
                return v;
            }
        }

        let symbol = symbols::compare_symbol(mnemonic)
            .ok_or_else(|| VmError::Type(format!("unknown operator '{mnemonic}'")))?;

        if let Some(v) = self.try_overload(&a, symbol, &b)? {
            return Ok(v);
        }

        Err(VmError::Type(format!(
            "unsupported operand types for {mnemonic}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )))
    }

    /// `^`: numeric fast path only. There is no `__pow__` overload.
    pub fn pow_op(&mut self, a: Value, b: Value) -> Result<Value, VmError> {
        match (&a, &b) {
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x.powf(*y))),
            _ => Err(VmError::Type(format!(
                "unsupported operand types for pow: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn try_overload(&mut self, receiver: &Value, symbol: &str, other: &Value) -> Result<Option<Value>, VmError> {
        let Value::Instance(inst) = receiver else { return Ok(None) };
        let class = inst.borrow().class.clone();
        let method = class.borrow().methods.borrow().get(symbol).cloned();
        let Some(method) = method else { return Ok(None) };
        self.stack.push(receiver.clone());
        self.stack.push(other.clone());
        let result = self.call_value_sync(method, 1)?;
        Ok(Some(result))
    }

    /// `a == b`: identity/structural equality for primitives and interned
    /// strings, falling back to `__eq__` for instances.
    pub fn values_equal(&mut self, a: &Value, b: &Value) -> Result<bool, VmError> {
        if let Value::Instance(inst) = a {
            let class = inst.borrow().class.clone();
            let method = class.borrow().methods.borrow().get(symbols::EQ).cloned();
            if let Some(method) = method {
                self.stack.push(a.clone());
                self.stack.push(b.clone());
                let result = self.call_value_sync(method, 1)?;
                return Ok(result.is_truthy());
            }
        }
        Ok(a.same(b))
    }

    /// Unary `-`: numeric fast path, then `__neg__`.
    pub fn unary_neg(&mut self, v: Value) -> Result<Value, VmError> {
        if let Value::Float(f) = v {
            return Ok(Value::Float(-f));
        }
        if let Value::Instance(inst) = &v {
            let class = inst.borrow().class.clone();
            let method = class.borrow().methods.borrow().get(symbols::NEG).cloned();
            if let Some(method) = method {
                self.stack.push(v.clone());
                return self.call_value_sync(method, 0);
            }
        }
        Err(VmError::Type(format!("bad operand type for unary -: '{}'", v.type_name())))
    }
}

fn numeric_fast(mnemonic: &str, x: f64, y: f64) -> Option<Result<Value, VmError>> {
    Some(Ok(match mnemonic {
        "add" => Value::Float(x + y),
        "sub" => Value::Float(x - y),
        "mul" => Value::Float(x * y),
        "div" => Value::Float(x / y),
        "mod" => Value::Float(x.rem_euclid(y)),
        "lt" => Value::Bool(x < y),
        "le" => Value::Bool(x <= y),
        "gt" => Value::Bool(x > y),
        "ge" => Value::Bool(x >= y),
        _ => return None,
    }))
}
