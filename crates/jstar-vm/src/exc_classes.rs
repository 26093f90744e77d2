//! Builtin exception classes and the unwinder's type-membership check.
//!
//! Every exception kind is rooted under a single guest-visible `Exception`
//! class. Builtin classes are created lazily and cached, so
//! `except Exception` (or `is Exception`) works for host-raised errors the
//! same way it does for guest `raise` statements.

use crate::exception::{GuestExc, VmError};
use crate::value::{gc, ClassObj, Gc, InstanceObj, JStr, StackTraceObj, StackTraceRecord, Value};
use crate::Vm;

const KINDS: &[&str] = &[
    "TypeException",
    "NameException",
    "FieldException",
    "MethodException",
    "ImportException",
    "StackOverflowException",
    "IndexOutOfBoundException",
    "AssertException",
    "InvalidArgException",
    "NotImplementedException",
    "SyntaxException",
    "ProgramInterrupt",
];

impl Vm {
    pub fn builtin_exception_class(&mut self, name: &str) -> Gc<ClassObj> {
        if let Some(c) = self.exception_classes.get(name) {
            return c.clone();
        }
        let root = self.exception_root_class();
        let class = if name == "Exception" {
            root
        } else {
            gc(ClassObj { name: gc(JStr::new(name.to_string())), superclass: Some(root), methods: Default::default() })
        };
        self.exception_classes.insert(name.to_string(), class.clone());
        class
    }

    fn exception_root_class(&mut self) -> Gc<ClassObj> {
        if let Some(c) = self.exception_classes.get("Exception") {
            return c.clone();
        }
        let root = gc(ClassObj { name: gc(JStr::new("Exception".into())), superclass: None, methods: Default::default() });
        self.exception_classes.insert("Exception".into(), root.clone());
        root
    }

    /// Preloads every builtin exception class, so classes created before
    /// any of them is raised for the first time still share a single
    /// `Exception` root.
    pub fn init_exception_classes(&mut self) {
        self.exception_root_class();
        for kind in KINDS {
            self.builtin_exception_class(kind);
        }
    }

    pub fn to_exception_instance(&mut self, err: &VmError) -> Value {
        if let VmError::Guest(GuestExc(v)) = err {
            return v.clone();
        }
        let class = self.builtin_exception_class(err.class_name());
        let inst = gc(InstanceObj { class, fields: Default::default() });
        inst.borrow().fields.borrow_mut().insert("message".to_string(), Value::str(err.message()));
        let exc = Value::Instance(inst);
        self.attach_fresh_stacktrace(&exc);
        exc
    }

    /// `OP_RAISE`'s precondition: the value being raised must be an
    /// instance of (some subclass of) the root `Exception` class.
    pub fn require_exception_instance(&mut self, v: &Value) -> Result<(), VmError> {
        let root = self.exception_root_class();
        if self.value_is_instance(v, &root) {
            Ok(())
        } else {
            Err(VmError::Type(format!(
                "can only raise an Exception instance, got '{}'",
                v.type_name()
            )))
        }
    }

    /// Allocates a fresh, empty `StackTrace` and stores it in `exc`'s
    /// `stacktrace` field, overwriting any prior one. Called once per
    /// explicit `raise` (or host-raised error), not on every re-entry into
    /// the unwinder as an in-flight exception threads through nested
    /// `ensure` handlers.
    pub fn attach_fresh_stacktrace(&mut self, exc: &Value) {
        if let Value::Instance(inst) = exc {
            let st = gc(StackTraceObj { frames: Default::default() });
            inst.borrow().fields.borrow_mut().insert(crate::symbols::STACKTRACE.to_string(), Value::StackTrace(st));
        }
    }

    /// Appends one `(module, function, line, depth)` record to `exc`'s
    /// `StackTrace`, innermost-frame-first (called once per frame the
    /// unwinder visits while still propagating a raise).
    pub fn record_frame_in_trace(&mut self, exc: &Value, module: &str, function: &str, line: u32, depth: usize) {
        let Value::Instance(inst) = exc else { return };
        let st = inst.borrow().fields.borrow().get(crate::symbols::STACKTRACE).cloned();
        let Some(Value::StackTrace(st)) = st else { return };
        st.borrow().frames.borrow_mut().push(StackTraceRecord {
            module: module.to_string(),
            function: function.to_string(),
            line,
            depth,
        });
    }

    /// Formats an uncaught exception as `File <module> [line N]: <Kind>:
    /// <msg>`, followed by one line per `StackTrace` record (innermost
    /// frame first). Used by `Host::on_uncaught`'s default
    /// implementation and available to embedders that want the same
    /// rendering for their own diagnostics.
    pub fn format_exception(&self, exc: &Value) -> String {
        let Value::Instance(inst) = exc else {
            return crate::display::describe(exc);
        };
        let class_name = inst.borrow().class.borrow().name.borrow().s.clone();
        let message = match inst.borrow().fields.borrow().get("message") {
            Some(Value::Str(s)) => s.borrow().s.clone(),
            _ => String::new(),
        };
        let records: Vec<crate::value::StackTraceRecord> =
            match inst.borrow().fields.borrow().get(crate::symbols::STACKTRACE) {
                Some(Value::StackTrace(st)) => st.borrow().frames.borrow().clone(),
                _ => Vec::new(),
            };
        let (module, line) = records
            .first()
            .map(|r| (r.module.as_str(), r.line))
            .unwrap_or(("?", 0));
        let mut out = format!("File {module} [line {line}]: {class_name}: {message}");
        for r in &records {
            out.push_str(&format!("\n  at {}.{} [line {}]", r.module, r.function, r.line));
        }
        out
    }

    /// `value is class`: walks `value`'s instance class chain looking for
    /// `class`. Primitives have no reified class in this implementation
    /// (see `value.rs`), so they're never `is` any class.
    pub fn value_is_instance(&self, value: &Value, class: &Gc<ClassObj>) -> bool {
        let Value::Instance(inst) = value else { return false };
        let mut cur = Some(inst.borrow().class.clone());
        while let Some(c) = cur {
            if std::rc::Rc::ptr_eq(&c, class) {
                return true;
            }
            cur = c.borrow().superclass.clone();
        }
        false
    }
}
