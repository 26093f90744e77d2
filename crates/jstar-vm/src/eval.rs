//! The evaluator: a switch-based dispatch loop over [`Op`], plus the
//! unwinder that interleaves `except`/`ensure` handlers with pending
//! return values (the `Cause::Return`/`Cause::Raise` codes below).
//!
//! Direct-threaded dispatch (computed gotos / a jump table keyed by opcode)
//! is the usual alternative; this workspace sticks to a plain `match`,
//! which `rustc` already compiles to a jump table for a dense enum like
//! [`Op`], and is far easier to keep correct by hand.

use std::rc::Rc;

use jstar_bytecode::{Chunk, ConstValue, Op};

use crate::exception::VmError;
use crate::frame::{Frame, HandlerKind, HandlerRecord};
use crate::value::{gc, ClassObj, ClosureObj, Gc, Value};
use crate::Vm;

/// What's being propagated while the unwinder searches for a handler.
enum Cause {
    Return(Value),
    Raise(Value),
}

impl Vm {
    /// Runs `chunk` as the program's entry module (named `__main__`) to
    /// completion and returns its final expression value (or `Null`).
    pub fn run(&mut self, chunk: Chunk) -> Result<Value, VmError> {
        let module = self.new_module("__main__".to_string());
        self.modules.insert("__main__".to_string(), module.clone());
        let closure = self.wrap_as_closure(chunk, module);
        if let Err(e) = self.run_closure_to_completion(closure) {
            // An exception reaching the evaluator boundary is reported
            // through the configured error callback before the VM reports
            // the run as failed; the exception instance itself (with its
            // populated `StackTrace`) stays available to the host via
            // `VmError::Guest`.
            if let VmError::Guest(crate::exception::GuestExc(exc)) = &e {
                self.notify_uncaught(&exc.clone());
            }
            return Err(e);
        }
        Ok(self.stack.pop().unwrap_or(Value::Null))
    }

    pub(crate) fn new_module(&self, name: String) -> Gc<crate::value::ModuleObj> {
        gc(crate::value::ModuleObj {
            name,
            globals: Default::default(),
            natives: Default::default(),
            main_function: std::cell::RefCell::new(None),
            initialized: std::cell::Cell::new(false),
        })
    }

    pub(crate) fn wrap_as_closure(&self, chunk: Chunk, module: Gc<crate::value::ModuleObj>) -> Gc<ClosureObj> {
        let main_fn = gc(crate::value::FunctionObj {
            name: Some(module.borrow().name.clone()),
            chunk: Rc::new(chunk),
            arity_most: 0,
            arity_least: 0,
            defaults: Vec::new(),
            vararg: false,
            upvalue_count: 0,
            module,
            upvalue_descriptors: Vec::new(),
            owning_class_superclass: None,
        });
        gc(ClosureObj { function: main_fn, upvalues: Vec::new() })
    }

    /// Pushes `closure` as a zero-arg call and drives the dispatch loop
    /// until that exact call has returned.
    pub(crate) fn run_closure_to_completion(&mut self, closure: Gc<ClosureObj>) -> Result<(), VmError> {
        let depth_before = self.frames.len();
        self.stack.push(Value::Closure(closure.clone()));
        self.call_value(Value::Closure(closure), 0)?;
        self.run_to_frame_depth(depth_before)
    }

    pub(crate) fn run_to_frame_depth(&mut self, target_depth: usize) -> Result<(), VmError> {
        while self.frames.len() > target_depth {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), VmError> {
        let frame_idx = self.frames.len() - 1;
        let chunk = self.frames[frame_idx].closure.borrow().function.borrow().chunk.clone();
        let ip = self.frames[frame_idx].ip;
        let op = chunk.ops.get(ip).copied().unwrap_or(Op::Return);
        self.frames[frame_idx].ip = ip + 1;

        if let Some(gas) = &mut self.gas_left {
            if *gas == 0 {
                return Err(VmError::Interrupt("instruction budget exhausted".into()));
            }
            *gas -= 1;
        }

        if self.eval_break.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(VmError::Interrupt("interrupted".into()));
        }

        if self.options.trace {
            log::trace!(target: "jstar_vm::eval", "{ip:05} {op}");
        }

        match self.exec_op(frame_idx, &chunk, op) {
            Ok(()) => Ok(()),
            Err(e) => {
                let exc = self.to_exception_instance(&e);
                self.unwind(Cause::Raise(exc))
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn exec_op(&mut self, frame_idx: usize, chunk: &Chunk, op: Op) -> Result<(), VmError> {
        use Op::*;

        macro_rules! base {
            () => {
                self.frames[frame_idx].base
            };
        }
        macro_rules! jump {
            ($off:expr) => {
                self.frames[frame_idx].ip = (self.frames[frame_idx].ip as i64 + $off as i64) as usize
            };
        }

        match op {
            Nop => {}

            Return => {
                let v = self.stack.pop().unwrap_or(Value::Null);
                self.unwind(Cause::Return(v))?;
            }
            ReturnVoid => {
                self.unwind(Cause::Return(Value::Null))?;
            }

            LoadConst(ix) => {
                let v = self.const_to_value(chunk, ix)?;
                self.stack.push(v);
            }
            LoadTrue => self.stack.push(Value::Bool(true)),
            LoadFalse => self.stack.push(Value::Bool(false)),
            LoadNull => self.stack.push(Value::Null),

            GetLocal(i) => {
                let v = self.stack[base!() + i as usize].clone();
                self.stack.push(v);
            }
            SetLocal(i) => {
                let v = self.stack.last().unwrap().clone();
                self.stack[base!() + i as usize] = v;
            }
            GetUpvalue(i) => {
                let uv = self.frames[frame_idx].closure.borrow().upvalues[i as usize].clone();
                let v = self.read_upvalue(&uv);
                self.stack.push(v);
            }
            SetUpvalue(i) => {
                let uv = self.frames[frame_idx].closure.borrow().upvalues[i as usize].clone();
                let v = self.stack.last().unwrap().clone();
                self.write_upvalue(&uv, v);
            }
            GetGlobal(ix) => {
                let name = self.const_str(chunk, ix)?;
                let module = self.frames[frame_idx].module.clone();
                let v = module
                    .borrow()
                    .globals
                    .borrow()
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| VmError::Name(format!("name '{name}' is not defined")))?;
                self.stack.push(v);
            }
            SetGlobal(ix) => {
                let name = self.const_str(chunk, ix)?;
                let module = self.frames[frame_idx].module.clone();
                if !module.borrow().globals.borrow().contains_key(&name) {
                    return Err(VmError::Name(format!("name '{name}' is not defined")));
                }
                let v = self.stack.pop().unwrap();
                module.borrow().globals.borrow_mut().insert(name, v);
            }
            DefineGlobal(ix) => {
                let name = self.const_str(chunk, ix)?;
                let module = self.frames[frame_idx].module.clone();
                let v = self.stack.pop().unwrap();
                module.borrow().globals.borrow_mut().insert(name, v);
            }

            Add | Sub | Mul | Div | Mod => {
                let b = self.stack.pop().unwrap();
                let a = self.stack.pop().unwrap();
                let r = self.binary_op(op.mnemonic(), a, b)?;
                self.stack.push(r);
            }
            Lt | Le | Gt | Ge => {
                let b = self.stack.pop().unwrap();
                let a = self.stack.pop().unwrap();
                let r = self.compare_op(op.mnemonic(), a, b)?;
                self.stack.push(r);
            }
            Pow => {
                let b = self.stack.pop().unwrap();
                let a = self.stack.pop().unwrap();
                let r = self.pow_op(a, b)?;
                self.stack.push(r);
            }
            Neg => {
                let v = self.stack.pop().unwrap();
                let r = self.unary_neg(v)?;
                self.stack.push(r);
            }
            Eq => {
                let b = self.stack.pop().unwrap();
                let a = self.stack.pop().unwrap();
                let r = self.values_equal(&a, &b)?;
                self.stack.push(Value::Bool(r));
            }
            Not => {
                let v = self.stack.pop().unwrap();
                self.stack.push(Value::Bool(!v.is_truthy()));
            }
            Is => {
                let class_v = self.stack.pop().unwrap();
                let v = self.stack.pop().unwrap();
                let Value::Class(c) = class_v else {
                    return Err(VmError::Type("right-hand side of 'is' must be a Class".into()));
                };
                self.stack.push(Value::Bool(self.value_is_instance(&v, &c)));
            }

            SubscrGet => {
                let index = self.stack.pop().unwrap();
                let target = self.stack.pop().unwrap();
                let v = self.subscript_get(&target, &index)?;
                self.stack.push(v);
            }
            SubscrSet => {
                let value = self.stack.pop().unwrap();
                let index = self.stack.pop().unwrap();
                let target = self.stack.pop().unwrap();
                self.subscript_set(&target, &index, value)?;
            }

            GetField(ix) => {
                let name = self.const_str(chunk, ix)?;
                let receiver = self.stack.pop().unwrap();
                let v = self.get_field(&receiver, &name)?;
                self.stack.push(v);
            }
            SetField(ix) => {
                let name = self.const_str(chunk, ix)?;
                let value = self.stack.pop().unwrap();
                let receiver = self.stack.pop().unwrap();
                self.set_field(&receiver, &name, value)?;
            }

            Jump(off) => jump!(off),
            JumpIfFalse(off) => {
                let v = self.stack.pop().unwrap();
                if !v.is_truthy() {
                    jump!(off);
                }
            }
            JumpIfTrue(off) => {
                let v = self.stack.pop().unwrap();
                if v.is_truthy() {
                    jump!(off);
                }
            }
            ForIter => {
                let len = self.stack.len();
                let state = self.stack[len - 1].clone();
                let iterable = self.stack[len - 2].clone();
                let next_state = self.iter_step(&iterable, &state)?;
                self.stack[len - 1] = next_state;
            }
            ForNext => {
                let len = self.stack.len();
                let state = self.stack[len - 1].clone();
                let iterable = self.stack[len - 2].clone();
                let v = self.iter_value(&iterable, &state)?;
                self.stack.push(v);
            }

            Call(argc) => {
                let callee = self.stack[self.stack.len() - 1 - argc as usize].clone();
                self.call_value(callee, argc)?;
            }
            Invoke(ix, argc) => {
                let name = self.const_str(chunk, ix)?;
                self.invoke(&name, argc)?;
            }
            Super(ix, argc) => {
                let name = self.const_str(chunk, ix)?;
                let superclass = self.current_superclass(frame_idx)?;
                self.invoke_super(&superclass, &name, argc)?;
            }
            SuperBind(ix) => {
                let name = self.const_str(chunk, ix)?;
                let superclass = self.current_superclass(frame_idx)?;
                let receiver = self.stack.pop().unwrap();
                let bound = self.super_bind(receiver, &superclass, &name)?;
                self.stack.push(bound);
            }

            Call0 | Call1 | Call2 | Call3 | Call4 | Call5 | Call6 | Call7 | Call8 | Call9 | Call10 => {
                let argc = op.fast_call_arity().unwrap();
                let callee = self.stack[self.stack.len() - 1 - argc as usize].clone();
                self.call_value(callee, argc)?;
            }
            Invoke0(ix) | Invoke1(ix) | Invoke2(ix) | Invoke3(ix) | Invoke4(ix) | Invoke5(ix)
            | Invoke6(ix) | Invoke7(ix) | Invoke8(ix) | Invoke9(ix) | Invoke10(ix) => {
                let argc = op.fast_call_arity().unwrap();
                let name = self.const_str(chunk, ix)?;
                self.invoke(&name, argc)?;
            }
            Super0(ix) | Super1(ix) | Super2(ix) | Super3(ix) | Super4(ix) | Super5(ix)
            | Super6(ix) | Super7(ix) | Super8(ix) | Super9(ix) | Super10(ix) => {
                let argc = op.fast_call_arity().unwrap();
                let name = self.const_str(chunk, ix)?;
                let superclass = self.current_superclass(frame_idx)?;
                self.invoke_super(&superclass, &name, argc)?;
            }

            NewList(n) => {
                let n = n as usize;
                let items = self.stack.split_off(self.stack.len() - n);
                self.stack.push(Value::list(items));
            }
            AppendList => {
                let item = self.stack.pop().unwrap();
                let Value::List(l) = self.stack.last().unwrap() else {
                    return Err(VmError::Type("append_list target is not a List".into()));
                };
                l.borrow_mut().push(item);
            }
            NewTuple(n) => {
                let n = n as usize;
                let items = self.stack.split_off(self.stack.len() - n);
                self.stack.push(Value::Tuple(if items.is_empty() {
                    self.empty_tuple.clone()
                } else {
                    Rc::new(items)
                }));
            }
            NewTable => {
                self.stack.push(Value::Table(gc(crate::value::TableObj { map: Default::default() })));
            }

            NewClass(ix) => {
                let name = self.const_str(chunk, ix)?;
                self.stack.push(self.new_class(&name));
            }
            NewSubclass(ix) => {
                let name = self.const_str(chunk, ix)?;
                let superclass = self.stack.pop().unwrap();
                let class = self.new_subclass(&name, &superclass)?;
                self.stack.push(class);
            }
            DefMethod(ix) => {
                let name = self.const_str(chunk, ix)?;
                let method = self.stack.pop().unwrap();
                let class = self.stack.last().unwrap().clone();
                if let (Value::Closure(c), Value::Class(cls)) = (&method, &class) {
                    let superclass = cls.borrow().superclass.clone();
                    c.borrow().function.borrow_mut().owning_class_superclass = superclass;
                }
                self.define_method(&class, &name, method)?;
            }
            NatMethod(ix) => {
                let name = self.const_str(chunk, ix)?;
                let module_name = self.frames[frame_idx].module.borrow().name.clone();
                let f = self
                    .host
                    .resolve_native(&module_name, &name)
                    .ok_or_else(|| VmError::Import(format!("no native bound for method '{name}'")))?;
                let native = gc(crate::value::NativeObj {
                    name: name.clone(),
                    arity_most: crate::value::NativeObj::UNBOUNDED_ARITY,
                    arity_least: 0,
                    vararg: false,
                    func: f,
                });
                let class = self.stack.last().unwrap().clone();
                self.define_method(&class, &name, Value::Native(native))?;
            }
            Native(ix) => {
                let name = self.const_str(chunk, ix)?;
                let module = self.frames[frame_idx].module.clone();
                let module_name = module.borrow().name.clone();
                let f = self
                    .host
                    .resolve_native(&module_name, &name)
                    .ok_or_else(|| VmError::Import(format!("no native bound for '{name}'")))?;
                let native = gc(crate::value::NativeObj {
                    name: name.clone(),
                    arity_most: crate::value::NativeObj::UNBOUNDED_ARITY,
                    arity_least: 0,
                    vararg: false,
                    func: f,
                });
                module.borrow().globals.borrow_mut().insert(name, Value::Native(native));
            }

            MakeClosure(func_ix, _n) => {
                let function = self.const_function(chunk, frame_idx, func_ix)?;
                let upvalues = self.capture_closure_upvalues(frame_idx, &function);
                self.stack.push(Value::Closure(gc(ClosureObj { function, upvalues })));
            }
            CloseUpvalue => {
                let top = self.stack.len() - 1;
                self.close_upvalues(top);
                self.stack.pop();
            }

            SetupExcept(off) => {
                let addr = (self.frames[frame_idx].ip as i64 + off as i64) as usize;
                self.frames[frame_idx].handlers.push(HandlerRecord {
                    kind: HandlerKind::Except,
                    address: addr,
                    saved_sp: self.stack.len(),
                });
            }
            SetupEnsure(off) => {
                let addr = (self.frames[frame_idx].ip as i64 + off as i64) as usize;
                self.frames[frame_idx].handlers.push(HandlerRecord {
                    kind: HandlerKind::Ensure,
                    address: addr,
                    saved_sp: self.stack.len(),
                });
            }
            PopHandler => {
                self.frames[frame_idx].handlers.pop();
            }
            EndTry => {
                let frame = &mut self.frames[frame_idx];
                if let Some(exc) = frame.pending_exception.take() {
                    frame.pending_return = None;
                    self.unwind(Cause::Raise(exc))?;
                } else if let Some(v) = frame.pending_return.take() {
                    self.unwind(Cause::Return(v))?;
                }
            }
            Raise => {
                let exc = self.stack.pop().unwrap();
                self.require_exception_instance(&exc)?;
                self.attach_fresh_stacktrace(&exc);
                self.unwind(Cause::Raise(exc))?;
            }

            Pop => {
                self.stack.pop();
            }
            Dup => {
                let v = self.stack.last().unwrap().clone();
                self.stack.push(v);
            }

            Unpack(n) => {
                let v = self.stack.pop().unwrap();
                let items: Vec<Value> = match &v {
                    Value::List(l) => l.borrow().clone(),
                    Value::Tuple(t) => (**t).clone(),
                    other => return Err(VmError::Type(format!("cannot unpack '{}'", other.type_name()))),
                };
                if items.len() != n as usize {
                    return Err(VmError::InvalidArg(format!(
                        "unpack expected {n} values, got {}",
                        items.len()
                    )));
                }
                for item in items {
                    self.stack.push(item);
                }
            }

            Import(ix) => {
                let name = self.const_str(chunk, ix)?;
                let m = self.import_module(&name)?;
                let module = self.frames[frame_idx].module.clone();
                module.borrow().globals.borrow_mut().insert(name, m.clone());
                self.stack.push(m);
            }
            ImportAs(ix, alias_ix) => {
                let name = self.const_str(chunk, ix)?;
                let alias = self.const_str(chunk, alias_ix)?;
                let m = self.import_module(&name)?;
                let module = self.frames[frame_idx].module.clone();
                module.borrow().globals.borrow_mut().insert(alias, m);
            }
            ImportFrom(ix) => {
                let name = self.const_str(chunk, ix)?;
                let m = self.import_module(&name)?;
                self.stack.push(m);
            }
            ImportName(ix) => {
                let name = self.const_str(chunk, ix)?;
                let source = self.stack.last().unwrap().clone();
                let module = Value::Module(self.frames[frame_idx].module.clone());
                if name == "*" {
                    self.import_all(&source, &module)?;
                } else {
                    let v = self.import_binding(&source, &name)?;
                    self.set_field(&module, &name, v)?;
                }
            }

            Print => {
                let v = self.stack.pop().unwrap();
                let s = self.to_display_string(&v)?;
                self.host.on_print(&s);
            }
        }
        Ok(())
    }

    fn const_str(&mut self, chunk: &Chunk, ix: u32) -> Result<String, VmError> {
        match chunk.consts.get(ix) {
            Some(ConstValue::Str(s)) => Ok(s.clone()),
            _ => Err(VmError::Name(format!("invalid string constant index {ix}"))),
        }
    }

    fn const_to_value(&mut self, chunk: &Chunk, ix: u32) -> Result<Value, VmError> {
        let c = chunk
            .consts
            .get(ix)
            .cloned()
            .ok_or_else(|| VmError::Name(format!("invalid constant index {ix}")))?;
        self.const_value_from(&c)
    }

    fn const_value_from(&mut self, c: &ConstValue) -> Result<Value, VmError> {
        Ok(match c {
            ConstValue::Null => Value::Null,
            ConstValue::Bool(b) => Value::Bool(*b),
            ConstValue::I64(i) => Value::Float(*i as f64),
            ConstValue::F64(f) => Value::Float(*f),
            ConstValue::Str(s) => self.intern_str(s),
            ConstValue::Bytes(_) => {
                return Err(VmError::Type("byte constants are not a runtime value".into()))
            }
        })
    }

    /// Builds a fresh `FunctionObj` from the chunk's nested `FunctionTemplate`
    /// at `ix`. Templates are plain data (no VM types), so every `MakeClosure`
    /// converts its template into a real callable against the enclosing
    /// frame's module -- cheap, since a chunk's own bytecode is shared via
    /// the `Rc` the template is wrapped in.
    fn const_function(
        &mut self,
        chunk: &Chunk,
        frame_idx: usize,
        ix: u32,
    ) -> Result<Gc<crate::value::FunctionObj>, VmError> {
        let tmpl = chunk
            .functions
            .get(ix as usize)
            .cloned()
            .ok_or_else(|| VmError::Name(format!("invalid function index {ix}")))?;
        let module = self.frames[frame_idx].module.clone();
        let mut defaults = Vec::with_capacity(tmpl.defaults.len());
        for c in &tmpl.defaults {
            defaults.push(self.const_value_from(c)?);
        }
        Ok(gc(crate::value::FunctionObj {
            name: tmpl.name,
            chunk: Rc::new(tmpl.chunk),
            arity_most: tmpl.arity_most,
            arity_least: tmpl.arity_least,
            defaults,
            vararg: tmpl.vararg,
            upvalue_count: tmpl.upvalues.len() as u16,
            module,
            upvalue_descriptors: tmpl.upvalues,
            owning_class_superclass: None,
        }))
    }

    fn capture_closure_upvalues(
        &mut self,
        frame_idx: usize,
        function: &Gc<crate::value::FunctionObj>,
    ) -> Vec<Gc<crate::value::UpvalueObj>> {
        let base = self.frames[frame_idx].base;
        let descriptors = function.borrow().upvalue_descriptors.clone();
        descriptors
            .into_iter()
            .map(|d| match d {
                jstar_bytecode::UpvalueDescriptor::Local(slot) => self.capture_upvalue(base + slot as usize),
                jstar_bytecode::UpvalueDescriptor::Upvalue(ix) => {
                    self.frames[frame_idx].closure.borrow().upvalues[ix as usize].clone()
                }
            })
            .collect()
    }

    fn current_superclass(&self, frame_idx: usize) -> Result<Gc<ClassObj>, VmError> {
        let function = self.frames[frame_idx].closure.borrow().function.clone();
        function
            .borrow()
            .owning_class_superclass
            .clone()
            .ok_or_else(|| VmError::Method("'super' used outside a method with a superclass".into()))
    }

    /// Core unwinder: searches the active frame's handler stack, running
    /// the nearest applicable `except`/`ensure` handler, or propagates
    /// into the caller's frame when the current one has none left. Reaching
    /// the bottom of the call stack while still propagating a `Raise`
    /// surfaces as an `Err` to `run`/`run_to_frame_depth`'s caller.
    fn unwind(&mut self, mut cause: Cause) -> Result<(), VmError> {
        loop {
            if self.frames.is_empty() {
                return match cause {
                    Cause::Raise(v) => Err(VmError::Guest(crate::exception::GuestExc(v))),
                    Cause::Return(v) => {
                        self.stack.push(v);
                        Ok(())
                    }
                };
            }

            // Record this frame into the raised exception's stack trace
            // before consulting its handlers, so a handler caught in the
            // same frame that raised still produces a non-empty trace.
            if let Cause::Raise(exc) = &cause {
                let exc = exc.clone();
                let depth = self.frames.len();
                let (module_name, function_name, line) = {
                    let frame = self.frames.last().unwrap();
                    let closure = frame.closure.borrow();
                    let function = closure.function.borrow();
                    let module_name = function.module.borrow().name.clone();
                    let function_name = function.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
                    let line = function.chunk.lines.line_for_pc(frame.ip as u32).unwrap_or(0);
                    (module_name, function_name, line)
                };
                self.record_frame_in_trace(&exc, &module_name, &function_name, line, depth);
            }

            let frame = self.frames.last_mut().unwrap();

            if let Some(h) = frame.handlers.pop() {
                self.stack.truncate(h.saved_sp);
                match (h.kind, &cause) {
                    (HandlerKind::Except, Cause::Raise(exc)) => {
                        self.stack.push(exc.clone());
                        self.frames.last_mut().unwrap().ip = h.address;
                        return Ok(());
                    }
                    (HandlerKind::Ensure, Cause::Raise(exc)) => {
                        let frame = self.frames.last_mut().unwrap();
                        frame.pending_exception = Some(exc.clone());
                        frame.pending_return = None;
                        frame.ip = h.address;
                        return Ok(());
                    }
                    (HandlerKind::Ensure, Cause::Return(v)) => {
                        let frame = self.frames.last_mut().unwrap();
                        frame.pending_return = Some(v.clone());
                        frame.pending_exception = None;
                        frame.ip = h.address;
                        return Ok(());
                    }
                    (HandlerKind::Except, Cause::Return(_)) => continue,
                }
            }

            let base = self.frames.last().unwrap().base;
            self.close_upvalues(base);
            self.frames.pop();
            self.stack.truncate(base);

            match cause {
                // A return only ever unwinds the one frame it belongs to;
                // once that frame's own handlers are exhausted it's done,
                // and execution resumes in the caller with the value on the
                // stack, not by searching the caller's handler stack too.
                Cause::Return(v) => {
                    self.stack.push(v);
                    return Ok(());
                }
                Cause::Raise(v) => {
                    if self.frames.is_empty() {
                        return Err(VmError::Guest(crate::exception::GuestExc(v)));
                    }
                    cause = Cause::Raise(v);
                    // fall through: keep propagating into the caller's frame
                }
            }
        }
    }
}

/// Hand-assembled-bytecode tests for the evaluator. There's no compiler in
/// this workspace, so every chunk here is built directly from `Op`s via
/// `jstar_bytecode`'s constant-pool and `FunctionTemplate` plumbing, the same
/// way `jstar-bytecode`'s own tests build chunks.
#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use jstar_bytecode::helpers;
    use jstar_bytecode::{FunctionTemplate, UpvalueDescriptor};

    use super::*;
    use crate::host::{Host, Importer, NativeRegistry};
    use crate::VmOptions;

    /// A `Host` that stashes `print`ed lines instead of writing to stdout, so
    /// tests can assert on them.
    struct Capture(Rc<RefCell<Vec<String>>>);

    impl Host for Capture {
        fn on_print(&mut self, s: &str) {
            self.0.borrow_mut().push(s.to_string());
        }
    }
    impl Importer for Capture {
        fn resolve(&mut self, _name: &str) -> Result<Option<Chunk>, String> {
            Ok(None)
        }
    }
    impl NativeRegistry for Capture {
        fn resolve_native(&self, _module: &str, _name: &str) -> Option<crate::value::NativeFn> {
            None
        }
    }

    fn run_capturing(chunk: Chunk) -> (Result<Value, VmError>, Vec<String>) {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::with_host(VmOptions::default(), Box::new(Capture(sink.clone())));
        let result = vm.run(chunk);
        let printed = sink.borrow().clone();
        (result, printed)
    }

    fn leaf_template(chunk: Chunk, least: u8, most: u8, vararg: bool, upvalues: Vec<UpvalueDescriptor>) -> FunctionTemplate {
        FunctionTemplate {
            name: None,
            chunk,
            arity_least: least,
            arity_most: most,
            defaults: Vec::new(),
            vararg,
            upvalues,
        }
    }

    #[test]
    fn fibonacci_via_recursion() {
        let mut fib = helpers::new_chunk(false);
        let k_two = helpers::k_f64(&mut fib, 2.0);
        let k_one = helpers::k_f64(&mut fib, 1.0);
        let k_fib = helpers::k_str(&mut fib, "fib");
        fib.ops.push(Op::GetLocal(1));
        fib.ops.push(Op::LoadConst(k_two));
        fib.ops.push(Op::Lt);
        fib.ops.push(Op::JumpIfFalse(2));
        fib.ops.push(Op::GetLocal(1));
        fib.ops.push(Op::Return);
        fib.ops.push(Op::GetGlobal(k_fib));
        fib.ops.push(Op::GetLocal(1));
        fib.ops.push(Op::LoadConst(k_one));
        fib.ops.push(Op::Sub);
        fib.ops.push(Op::Call1);
        fib.ops.push(Op::GetGlobal(k_fib));
        fib.ops.push(Op::GetLocal(1));
        fib.ops.push(Op::LoadConst(k_two));
        fib.ops.push(Op::Sub);
        fib.ops.push(Op::Call1);
        fib.ops.push(Op::Add);
        fib.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let fib_ix = module.add_function(leaf_template(fib, 1, 1, false, Vec::new()));
        let k_fib_global = helpers::k_str(&mut module, "fib");
        let k_ten = helpers::k_f64(&mut module, 10.0);
        module.ops.push(Op::MakeClosure(fib_ix, 0));
        module.ops.push(Op::DefineGlobal(k_fib_global));
        module.ops.push(Op::GetGlobal(k_fib_global));
        module.ops.push(Op::LoadConst(k_ten));
        module.ops.push(Op::Call1);
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("fib(10) should not raise");
        assert_eq!(printed, vec!["55".to_string()]);
    }

    #[test]
    fn ensure_runs_before_a_pending_return_is_delivered() {
        let mut f = helpers::new_chunk(false);
        let k_one = helpers::k_f64(&mut f, 1.0);
        let k_e = helpers::k_str(&mut f, "e");
        f.ops.push(Op::SetupEnsure(2)); // pc0 -> handler at pc3
        f.ops.push(Op::LoadConst(k_one)); // pc1
        f.ops.push(Op::Return); // pc2
        f.ops.push(Op::LoadConst(k_e)); // pc3
        f.ops.push(Op::Print); // pc4
        f.ops.push(Op::EndTry); // pc5

        let mut module = helpers::new_chunk(false);
        let f_ix = module.add_function(leaf_template(f, 0, 0, false, Vec::new()));
        let k_f = helpers::k_str(&mut module, "f");
        module.ops.push(Op::MakeClosure(f_ix, 0));
        module.ops.push(Op::DefineGlobal(k_f));
        module.ops.push(Op::GetGlobal(k_f));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("ensure-then-return should not raise");
        assert_eq!(printed, vec!["e".to_string(), "1".to_string()]);
    }

    #[test]
    fn nested_ensure_blocks_run_innermost_to_outermost() {
        let mut f = helpers::new_chunk(false);
        let k_one = helpers::k_f64(&mut f, 1.0);
        let k_inner = helpers::k_str(&mut f, "inner");
        let k_outer = helpers::k_str(&mut f, "outer");
        f.ops.push(Op::SetupEnsure(6)); // pc0 -> outer handler at pc7
        f.ops.push(Op::SetupEnsure(2)); // pc1 -> inner handler at pc4
        f.ops.push(Op::LoadConst(k_one)); // pc2
        f.ops.push(Op::Return); // pc3
        f.ops.push(Op::LoadConst(k_inner)); // pc4
        f.ops.push(Op::Print); // pc5
        f.ops.push(Op::EndTry); // pc6
        f.ops.push(Op::LoadConst(k_outer)); // pc7
        f.ops.push(Op::Print); // pc8
        f.ops.push(Op::EndTry); // pc9

        let mut module = helpers::new_chunk(false);
        let f_ix = module.add_function(leaf_template(f, 0, 0, false, Vec::new()));
        let k_f = helpers::k_str(&mut module, "f");
        module.ops.push(Op::MakeClosure(f_ix, 0));
        module.ops.push(Op::DefineGlobal(k_f));
        module.ops.push(Op::GetGlobal(k_f));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("nested ensure blocks should not raise");
        assert_eq!(printed, vec!["inner".to_string(), "outer".to_string(), "1".to_string()]);
    }

    #[test]
    fn an_iterator_returning_false_immediately_skips_the_loop_body() {
        let mut iter_method = helpers::new_chunk(false);
        iter_method.ops.push(Op::LoadFalse);
        iter_method.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let iter_ix = module.add_function(leaf_template(iter_method, 1, 1, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "Empty");
        let k_iter_name = helpers::k_str(&mut module, "__iter__");
        let k_done = helpers::k_str(&mut module, "done");

        module.ops.push(Op::NewClass(k_class_name)); // pc0
        module.ops.push(Op::MakeClosure(iter_ix, 0)); // pc1
        module.ops.push(Op::DefMethod(k_iter_name)); // pc2
        module.ops.push(Op::Call0); // pc3: construct instance
        module.ops.push(Op::LoadNull); // pc4: state
        module.ops.push(Op::ForIter); // pc5 (loop top)
        module.ops.push(Op::Dup); // pc6
        module.ops.push(Op::JumpIfFalse(3)); // pc7 -> pc11
        module.ops.push(Op::ForNext); // pc8 (never reached)
        module.ops.push(Op::Print); // pc9 (never reached)
        module.ops.push(Op::Jump(-6)); // pc10 (never reached)
        module.ops.push(Op::Pop); // pc11: drop state
        module.ops.push(Op::Pop); // pc12: drop instance
        module.ops.push(Op::LoadConst(k_done));
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("empty iterator should not raise");
        assert_eq!(printed, vec!["done".to_string()]);
    }

    #[test]
    fn except_handler_receives_the_raised_instance() {
        let mut err_method = helpers::new_chunk(false);
        let k_message = helpers::k_str(&mut err_method, "message");
        err_method.ops.push(Op::GetLocal(0));
        err_method.ops.push(Op::GetField(k_message));
        err_method.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let err_ix = module.add_function(leaf_template(err_method, 0, 0, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "Boom");
        let k_err_name = helpers::k_str(&mut module, "err");
        let k_message_field = helpers::k_str(&mut module, "message");
        let k_x = helpers::k_str(&mut module, "x");

        module.ops.push(Op::NewClass(k_class_name)); // pc0
        module.ops.push(Op::MakeClosure(err_ix, 0)); // pc1
        module.ops.push(Op::DefMethod(k_err_name)); // pc2
        module.ops.push(Op::Call0); // pc3: construct instance
        module.ops.push(Op::Dup); // pc4
        module.ops.push(Op::LoadConst(k_x)); // pc5
        module.ops.push(Op::SetField(k_message_field)); // pc6
        module.ops.push(Op::SetupExcept(2)); // pc7 -> handler at pc10
        module.ops.push(Op::Dup); // pc8
        module.ops.push(Op::Raise); // pc9
        module.ops.push(Op::Invoke0(k_err_name)); // pc10
        module.ops.push(Op::Print); // pc11
        module.ops.push(Op::EndTry); // pc12

        let (result, printed) = run_capturing(module);
        result.expect("caught exception should not escape as an error");
        assert_eq!(printed, vec!["x".to_string()]);
    }

    #[test]
    fn closure_keeps_captured_local_alive_after_its_frame_returns() {
        let mut inc = helpers::new_chunk(false);
        let k_one = helpers::k_f64(&mut inc, 1.0);
        inc.ops.push(Op::GetUpvalue(0));
        inc.ops.push(Op::LoadConst(k_one));
        inc.ops.push(Op::Add);
        inc.ops.push(Op::SetUpvalue(0));
        inc.ops.push(Op::Return);

        let mut mk_counter = helpers::new_chunk(false);
        let k_zero = helpers::k_f64(&mut mk_counter, 0.0);
        let inc_ix = mk_counter.add_function(leaf_template(
            inc,
            0,
            0,
            false,
            vec![UpvalueDescriptor::Local(1)],
        ));
        mk_counter.ops.push(Op::LoadConst(k_zero));
        mk_counter.ops.push(Op::MakeClosure(inc_ix, 1));
        mk_counter.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let mk_counter_ix = module.add_function(leaf_template(mk_counter, 0, 0, false, Vec::new()));
        let k_mk_counter = helpers::k_str(&mut module, "mkCounter");
        let k_c = helpers::k_str(&mut module, "c");
        module.ops.push(Op::MakeClosure(mk_counter_ix, 0));
        module.ops.push(Op::DefineGlobal(k_mk_counter));
        module.ops.push(Op::GetGlobal(k_mk_counter));
        module.ops.push(Op::Call0);
        module.ops.push(Op::DefineGlobal(k_c));
        module.ops.push(Op::GetGlobal(k_c));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Pop);
        module.ops.push(Op::GetGlobal(k_c));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Pop);
        module.ops.push(Op::GetGlobal(k_c));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("counter closure should not raise");
        assert_eq!(printed, vec!["3".to_string()]);
    }

    #[test]
    fn two_closures_over_the_same_local_share_one_upvalue() {
        let mut inc = helpers::new_chunk(false);
        let k_one = helpers::k_f64(&mut inc, 1.0);
        inc.ops.push(Op::GetUpvalue(0));
        inc.ops.push(Op::LoadConst(k_one));
        inc.ops.push(Op::Add);
        inc.ops.push(Op::SetUpvalue(0));
        inc.ops.push(Op::Return);

        let mut get = helpers::new_chunk(false);
        get.ops.push(Op::GetUpvalue(0));
        get.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let k_zero = helpers::k_f64(&mut module, 0.0);
        let inc_ix = module.add_function(leaf_template(inc, 0, 0, false, vec![UpvalueDescriptor::Local(1)]));
        let get_ix = module.add_function(leaf_template(get, 0, 0, false, vec![UpvalueDescriptor::Local(1)]));
        module.ops.push(Op::LoadConst(k_zero)); // slot1: i
        module.ops.push(Op::MakeClosure(inc_ix, 1)); // slot2: inc
        module.ops.push(Op::MakeClosure(get_ix, 1)); // slot3: get, shares inc's open upvalue
        module.ops.push(Op::GetLocal(2));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Pop);
        module.ops.push(Op::GetLocal(2));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Pop);
        module.ops.push(Op::GetLocal(3));
        module.ops.push(Op::Call0);

        let (result, _printed) = run_capturing(module);
        match result.expect("shared-upvalue program should not raise") {
            Value::Float(f) => assert_eq!(f, 2.0),
            other => panic!("expected a Float, got {other:?}"),
        }
    }

    #[test]
    fn reverse_overload_is_tried_when_the_forward_operand_has_none() {
        let mut radd = helpers::new_chunk(false);
        let k_r = helpers::k_str(&mut radd, "r");
        radd.ops.push(Op::LoadConst(k_r));
        radd.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let radd_ix = module.add_function(leaf_template(radd, 1, 1, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "N");
        let k_radd_name = helpers::k_str(&mut module, "__radd__");
        let k_one = helpers::k_f64(&mut module, 1.0);

        module.ops.push(Op::LoadConst(k_one));
        module.ops.push(Op::NewClass(k_class_name));
        module.ops.push(Op::MakeClosure(radd_ix, 0));
        module.ops.push(Op::DefMethod(k_radd_name));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Add);
        module.ops.push(Op::Print);

        let (result, printed) = run_capturing(module);
        result.expect("__radd__ fallback should not raise");
        assert_eq!(printed, vec!["r".to_string()]);
    }

    #[test]
    fn for_loop_over_a_list_visits_every_element_in_order() {
        let mut module = helpers::new_chunk(false);
        let k_ten = helpers::k_f64(&mut module, 10.0);
        let k_twenty = helpers::k_f64(&mut module, 20.0);
        let k_thirty = helpers::k_f64(&mut module, 30.0);

        module.ops.push(Op::LoadConst(k_ten)); // pc0
        module.ops.push(Op::LoadConst(k_twenty)); // pc1
        module.ops.push(Op::LoadConst(k_thirty)); // pc2
        module.ops.push(Op::NewList(3)); // pc3
        module.ops.push(Op::LoadNull); // pc4: state
        module.ops.push(Op::ForIter); // pc5 (loop top)
        module.ops.push(Op::Dup); // pc6
        module.ops.push(Op::JumpIfFalse(3)); // pc7 -> pc11
        module.ops.push(Op::ForNext); // pc8
        module.ops.push(Op::Print); // pc9
        module.ops.push(Op::Jump(-6)); // pc10 -> pc5
        module.ops.push(Op::Pop); // pc11: drop state
        module.ops.push(Op::Pop); // pc12: drop list

        let (result, printed) = run_capturing(module);
        result.expect("list iteration should not raise");
        assert_eq!(printed, vec!["10".to_string(), "20".to_string(), "30".to_string()]);
    }

    #[test]
    fn vararg_params_gather_the_trailing_arguments_into_a_tuple() {
        let mut f = helpers::new_chunk(false);
        f.ops.push(Op::GetLocal(2)); // rest
        f.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let f_ix = module.add_function(leaf_template(f, 1, 1, true, Vec::new()));
        let k_one = helpers::k_f64(&mut module, 1.0);
        let k_two = helpers::k_f64(&mut module, 2.0);
        let k_three = helpers::k_f64(&mut module, 3.0);
        module.ops.push(Op::MakeClosure(f_ix, 0));
        module.ops.push(Op::LoadConst(k_one));
        module.ops.push(Op::LoadConst(k_two));
        module.ops.push(Op::LoadConst(k_three));
        module.ops.push(Op::Call3);

        let (result, _printed) = run_capturing(module);
        match result.expect("vararg call should not raise") {
            Value::Tuple(t) => assert_eq!(t.len(), 2),
            other => panic!("expected a Tuple, got {other:?}"),
        }
    }

    #[test]
    fn missing_operator_overload_on_both_sides_is_a_type_error() {
        let mut module = helpers::new_chunk(false);
        let k_class_name = helpers::k_str(&mut module, "Plain");
        let k_one = helpers::k_f64(&mut module, 1.0);

        module.ops.push(Op::LoadConst(k_one));
        module.ops.push(Op::NewClass(k_class_name));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Add);

        let (result, _printed) = run_capturing(module);
        assert!(result.is_err());
    }

    #[test]
    fn closure_based_init_receives_its_constructor_argument() {
        let mut init = helpers::new_chunk(false);
        let k_v_field = helpers::k_str(&mut init, "v");
        init.ops.push(Op::GetLocal(0));
        init.ops.push(Op::GetLocal(1));
        init.ops.push(Op::SetField(k_v_field));
        init.ops.push(Op::LoadNull);
        init.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let init_ix = module.add_function(leaf_template(init, 1, 1, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "Box");
        let k_init_name = helpers::k_str(&mut module, "init");
        let k_v_field = helpers::k_str(&mut module, "v");
        let k_forty_two = helpers::k_f64(&mut module, 42.0);

        module.ops.push(Op::NewClass(k_class_name)); // pc0
        module.ops.push(Op::MakeClosure(init_ix, 0)); // pc1
        module.ops.push(Op::DefMethod(k_init_name)); // pc2
        module.ops.push(Op::LoadConst(k_forty_two)); // pc3
        module.ops.push(Op::Call1); // pc4: construct with init(42)
        module.ops.push(Op::GetField(k_v_field)); // pc5
        module.ops.push(Op::Print); // pc6

        let (result, printed) = run_capturing(module);
        result.expect("constructing with a closure init should not raise");
        assert_eq!(printed, vec!["42".to_string()]);
    }

    #[test]
    fn eq_overload_sees_the_real_right_hand_operand() {
        let mut eq_method = helpers::new_chunk(false);
        eq_method.ops.push(Op::GetLocal(1));
        eq_method.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let eq_ix = module.add_function(leaf_template(eq_method, 1, 1, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "AlwaysSaysWhatYouGaveIt");
        let k_eq_name = helpers::k_str(&mut module, "__eq__");

        module.ops.push(Op::NewClass(k_class_name)); // pc0
        module.ops.push(Op::MakeClosure(eq_ix, 0)); // pc1
        module.ops.push(Op::DefMethod(k_eq_name)); // pc2
        module.ops.push(Op::Call0); // pc3: construct instance
        module.ops.push(Op::LoadTrue); // pc4: the real right-hand operand
        module.ops.push(Op::Eq); // pc5
        module.ops.push(Op::Print); // pc6

        let (result, printed) = run_capturing(module);
        result.expect("__eq__ overload should not raise");
        assert_eq!(printed, vec!["true".to_string()]);
    }

    #[test]
    fn neg_overload_is_tried_for_instances() {
        let mut neg_method = helpers::new_chunk(false);
        let k_flipped = helpers::k_str(&mut neg_method, "flipped");
        neg_method.ops.push(Op::LoadConst(k_flipped));
        neg_method.ops.push(Op::Return);

        let mut module = helpers::new_chunk(false);
        let neg_ix = module.add_function(leaf_template(neg_method, 0, 0, false, Vec::new()));
        let k_class_name = helpers::k_str(&mut module, "Sign");
        let k_neg_name = helpers::k_str(&mut module, "__neg__");

        module.ops.push(Op::NewClass(k_class_name)); // pc0
        module.ops.push(Op::MakeClosure(neg_ix, 0)); // pc1
        module.ops.push(Op::DefMethod(k_neg_name)); // pc2
        module.ops.push(Op::Call0); // pc3: construct instance
        module.ops.push(Op::Neg); // pc4
        module.ops.push(Op::Print); // pc5

        let (result, printed) = run_capturing(module);
        result.expect("__neg__ overload should not raise");
        assert_eq!(printed, vec!["flipped".to_string()]);
    }

    #[test]
    fn pow_does_not_fall_back_to_an_overload() {
        let mut module = helpers::new_chunk(false);
        let k_class_name = helpers::k_str(&mut module, "NoPow");
        let k_one = helpers::k_f64(&mut module, 1.0);

        module.ops.push(Op::LoadConst(k_one));
        module.ops.push(Op::NewClass(k_class_name));
        module.ops.push(Op::Call0);
        module.ops.push(Op::Pow);

        let (result, _printed) = run_capturing(module);
        assert!(result.is_err());
    }

    #[test]
    fn eval_break_raises_program_interrupt_and_then_clears_itself() {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::with_host(VmOptions::default(), Box::new(Capture(sink)));

        let handle = vm.eval_break_handle();
        handle.store(true, std::sync::atomic::Ordering::SeqCst);

        let mut module = helpers::new_chunk(false);
        let k_one = helpers::k_f64(&mut module, 1.0);
        module.ops.push(Op::LoadConst(k_one));
        module.ops.push(Op::Print);

        let result = vm.run(module.clone());
        match result {
            Err(VmError::Guest(crate::exception::GuestExc(Value::Instance(inst)))) => {
                assert_eq!(inst.borrow().class.borrow().name.borrow().s, "ProgramInterrupt");
            }
            other => panic!("expected a ProgramInterrupt exception, got {other:?}"),
        }
        // Polled, not latched: clearing itself means a second run proceeds normally.
        assert!(!handle.load(std::sync::atomic::Ordering::SeqCst));
        let (result2, printed2) = run_capturing(module);
        result2.expect("second run should not be interrupted");
        assert_eq!(printed2, vec!["1".to_string()]);
    }
}
