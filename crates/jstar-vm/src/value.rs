//! The J* value representation and heap-object kinds.
//!
//! A [`Value`] is the tagged union the evaluator pushes and pops off the
//! operand stack: a 64-bit float, a bool, null, an opaque handle (used by
//! the foreign-function bridge to hand out host resources the guest can't
//! inspect), or a reference to one of the heap object kinds below.
//!
//! Heap objects are reference-counted (`Rc<RefCell<..>>`, aliased as
//! [`Gc`]) rather than traced/collected. A mark-and-sweep collector could
//! sit behind the `GC` collaborator seam instead (see `host.rs`); this
//! workspace's collector is simply Rust's own reference counting, which
//! keeps every reachable value alive and frees unreachable ones except for
//! true reference cycles. Classes, instances and closures in this language
//! don't form reference cycles through normal programs, so this is an
//! acceptable-and-idiomatic substitution for a tracing GC.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use hashbrown::HashMap;
use jstar_bytecode::Chunk;

/// Shared, mutable heap allocation. See module docs for why `Rc` stands in
/// for a traced GC here.
pub type Gc<T> = Rc<RefCell<T>>;

pub fn gc<T>(v: T) -> Gc<T> {
    Rc::new(RefCell::new(v))
}

/// A native function pointer. Natives never keep `&mut Vm` across calls;
/// they borrow it only for the duration of the call: read the arguments,
/// possibly call back into the VM, and return exactly one value or raise.
pub type NativeFn = fn(&mut crate::Vm, &[Value]) -> Result<Value, crate::exception::VmError>;

#[derive(Clone)]
pub enum Value {
    Float(f64),
    Bool(bool),
    Null,
    /// An opaque handle: a host-assigned integer the guest can carry around
    /// (e.g. a file descriptor or a key into a side table) but never
    /// dereference directly.
    Handle(u64),
    Str(Gc<JStr>),
    Function(Gc<FunctionObj>),
    Native(Gc<NativeObj>),
    Closure(Gc<ClosureObj>),
    Class(Gc<ClassObj>),
    Instance(Gc<InstanceObj>),
    List(Gc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Module(Gc<ModuleObj>),
    BoundMethod(Gc<BoundMethodObj>),
    StackTrace(Gc<StackTraceObj>),
    Table(Gc<TableObj>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(gc(JStr::new(s.into())))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(gc(items))
    }

    /// `null` and `false` are falsy, everything else (including `0.0` and
    /// the empty string) is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Float(_) => "Number",
            Value::Bool(_) => "Boolean",
            Value::Null => "Null",
            Value::Handle(_) => "Handle",
            Value::Str(_) => "String",
            Value::Function(_) => "Function",
            Value::Native(_) => "Native",
            Value::Closure(_) => "Function",
            Value::Class(_) => "Class",
            Value::Instance(_) => "Instance",
            Value::List(_) => "List",
            Value::Tuple(_) => "Tuple",
            Value::Module(_) => "Module",
            Value::BoundMethod(_) => "BoundMethod",
            Value::StackTrace(_) => "StackTrace",
            Value::Table(_) => "Table",
        }
    }

    pub fn as_str(&self) -> Option<std::cell::Ref<'_, JStr>> {
        match self {
            Value::Str(s) => Some(s.borrow()),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Identity for reference types, value equality for primitives; this is
    /// the default `is`-style equality used before any `__eq__` overload is
    /// consulted. Strings compare by interned identity, matching the
    /// "identical content implies identical pointer" invariant.
    pub fn same(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Float(a), Float(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Null, Null) => true,
            (Handle(a), Handle(b)) => a == b,
            (Str(a), Str(b)) => Rc::ptr_eq(a, b) || {
                let (a, b) = (a.borrow(), b.borrow());
                a.hash == b.hash && a.s == b.s
            },
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Native(a), Native(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Instance(a), Instance(b)) => Rc::ptr_eq(a, b),
            (List(a), List(b)) => Rc::ptr_eq(a, b),
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b),
            (Module(a), Module(b)) => Rc::ptr_eq(a, b),
            (BoundMethod(a), BoundMethod(b)) => Rc::ptr_eq(a, b),
            (StackTrace(a), StackTrace(b)) => Rc::ptr_eq(a, b),
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Handle(h) => write!(f, "<handle {h}>"),
            Value::Str(s) => write!(f, "{:?}", s.borrow().s),
            Value::Function(fun) => write!(f, "<fn {}>", fun.borrow().name.as_deref().unwrap_or("?")),
            Value::Native(n) => write!(f, "<native {}>", n.borrow().name),
            Value::Closure(c) => {
                write!(f, "<fn {}>", c.borrow().function.borrow().name.as_deref().unwrap_or("?"))
            }
            Value::Class(c) => write!(f, "<class {}>", c.borrow().name.borrow().s),
            Value::Instance(i) => write!(f, "<instance of {}>", i.borrow().class.borrow().name.borrow().s),
            Value::List(l) => write!(f, "{:?}", l.borrow()),
            Value::Tuple(t) => write!(f, "{:?}", t),
            Value::Module(m) => write!(f, "<module {}>", m.borrow().name),
            Value::BoundMethod(_) => write!(f, "<bound method>"),
            Value::StackTrace(_) => write!(f, "<stack trace>"),
            Value::Table(t) => write!(f, "<table len={}>", t.borrow().map.len()),
        }
    }
}

/// An interned string. Two `JStr` heap objects with the same byte content
/// are only ever allocated once per VM, so identity comparison (`Rc::ptr_eq`)
/// implies content equality and vice versa -- the invariant the evaluator's
/// `OP_EQ` fast path on strings relies on.
pub struct JStr {
    pub s: String,
    pub hash: u64,
}

impl JStr {
    pub fn new(s: String) -> JStr {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        JStr { s, hash: hasher.finish() }
    }
}

pub struct FunctionObj {
    pub name: Option<String>,
    pub chunk: Rc<Chunk>,
    pub arity_most: u8,
    pub arity_least: u8,
    pub defaults: Vec<Value>,
    pub vararg: bool,
    pub upvalue_count: u16,
    pub module: Gc<ModuleObj>,
    /// Where each of this function's upvalues is captured from in its
    /// enclosing function, consumed by `MakeClosure` when building a
    /// `ClosureObj` over this template.
    pub upvalue_descriptors: Vec<jstar_bytecode::UpvalueDescriptor>,
    /// If this function is a method body, the superclass `super.foo(..)`
    /// resolves against. `None` for plain functions and for methods on a
    /// class with no superclass.
    pub owning_class_superclass: Option<Gc<ClassObj>>,
}

pub struct NativeObj {
    pub name: String,
    pub arity_most: u8,
    pub arity_least: u8,
    pub vararg: bool,
    pub func: NativeFn,
}

impl NativeObj {
    /// Sentinel `arity_most` meaning "no upper bound", used for natives
    /// bridged in from the host registry whose real arity isn't tracked
    /// here (see `host.rs`'s `NativeRegistry` seam).
    pub const UNBOUNDED_ARITY: u8 = u8::MAX;
}

pub struct ClosureObj {
    pub function: Gc<FunctionObj>,
    pub upvalues: Vec<Gc<UpvalueObj>>,
}

/// An open upvalue names a *live* slot by its absolute index into the VM's
/// flat operand stack; it is closed (the value is copied out) when the
/// owning frame returns or the slot's scope ends, so a closure can still
/// read/write a captured variable after the call that declared it returns.
pub enum UpvalueObj {
    Open(usize),
    Closed(Value),
}

pub struct ClassObj {
    pub name: Gc<JStr>,
    pub superclass: Option<Gc<ClassObj>>,
    /// Flattened method table: at class-creation time the superclass's
    /// table is shallow-copied in, then overridden by this class's own
    /// method definitions, so lookup is a single hash probe instead of a
    /// walk up the inheritance chain.
    pub methods: RefCell<HashMap<String, Value>>,
}

pub struct InstanceObj {
    pub class: Gc<ClassObj>,
    pub fields: RefCell<HashMap<String, Value>>,
}

pub struct ModuleObj {
    pub name: String,
    pub globals: RefCell<HashMap<String, Value>>,
    pub natives: RefCell<HashMap<String, NativeFn>>,
    /// The module's top-level code, wrapped in a closure and invoked once
    /// on first import; cleared afterwards (see `import.rs`).
    pub main_function: RefCell<Option<Gc<FunctionObj>>>,
    pub initialized: std::cell::Cell<bool>,
}

pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Clone)]
pub struct StackTraceRecord {
    pub module: String,
    pub function: String,
    pub line: u32,
    pub depth: usize,
}

pub struct StackTraceObj {
    pub frames: RefCell<Vec<StackTraceRecord>>,
}

pub struct TableObj {
    pub map: RefCell<HashMap<ValueKey, Value>>,
}

/// Wraps a [`Value`] so it can key a hash map: structural equality for
/// primitives and interned strings, pointer identity for everything else
/// (mirrors `Value::same`, the equality a `Table` uses -- the spec's
/// overload set has no `__hash__` slot, so this is the only hashing rule).
#[derive(Clone)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same(&other.0)
    }
}
impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Handle(h) => {
                3u8.hash(state);
                h.hash(state);
            }
            Value::Str(s) => {
                4u8.hash(state);
                s.borrow().hash.hash(state);
            }
            other => {
                5u8.hash(state);
                identity_ptr(other).hash(state);
            }
        }
    }
}

/// Best-effort pointer identity for reference-typed values, used only for
/// hashing table keys that aren't primitives or strings.
fn identity_ptr(v: &Value) -> usize {
    use Value::*;
    match v {
        Function(r) => Rc::as_ptr(r) as usize,
        Native(r) => Rc::as_ptr(r) as usize,
        Closure(r) => Rc::as_ptr(r) as usize,
        Class(r) => Rc::as_ptr(r) as usize,
        Instance(r) => Rc::as_ptr(r) as usize,
        List(r) => Rc::as_ptr(r) as usize,
        Tuple(r) => Rc::as_ptr(r) as *const () as usize,
        Module(r) => Rc::as_ptr(r) as usize,
        BoundMethod(r) => Rc::as_ptr(r) as usize,
        StackTrace(r) => Rc::as_ptr(r) as usize,
        Table(r) => Rc::as_ptr(r) as usize,
        _ => 0,
    }
}
