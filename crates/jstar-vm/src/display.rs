//! Default (non-overload-aware) value rendering, used for log lines and as
//! the fallback when a value's class doesn't define `__str__`. The
//! overload-aware version that consults a class's `__str__` lives in
//! `invoke::to_display_string`, since that one needs to call back into the
//! VM.

use crate::value::Value;

pub fn describe(v: &Value) -> String {
    match v {
        Value::Float(n) => format_float(*n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Handle(h) => format!("<handle {h}>"),
        Value::Str(s) => s.borrow().s.clone(),
        Value::Function(f) => format!("<fn {}>", f.borrow().name.as_deref().unwrap_or("?")),
        Value::Native(n) => format!("<native fn {}>", n.borrow().name),
        Value::Closure(c) => {
            format!("<fn {}>", c.borrow().function.borrow().name.as_deref().unwrap_or("?"))
        }
        Value::Class(c) => format!("<class {}>", c.borrow().name.borrow().s),
        Value::Instance(i) => {
            format!("<instance of {}>", i.borrow().class.borrow().name.borrow().s)
        }
        Value::List(l) => {
            let items: Vec<String> = l.borrow().iter().map(describe).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Tuple(t) => {
            let items: Vec<String> = t.iter().map(describe).collect();
            format!("({})", items.join(", "))
        }
        Value::Module(m) => format!("<module {}>", m.borrow().name),
        Value::BoundMethod(_) => "<bound method>".to_string(),
        Value::StackTrace(_) => "<stack trace>".to_string(),
        Value::Table(t) => format!("<table, {} entries>", t.borrow().map.len()),
    }
}

fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
