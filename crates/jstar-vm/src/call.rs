//! Call protocol: resolving a callee value to code, binding arguments
//! (defaults, varargs), and pushing/retiring frames.
//!
//! Stack convention: a pending call looks like
//! `[.., callee, arg0, arg1, .., argN-1]` with `argc == N`. The callee's own
//! slot becomes local slot 0 of the new frame (so methods see `self` there
//! without any extra copying); the same frame/base convention covers every
//! calling form (plain calls, bound methods, class construction, super
//! calls).

use crate::exception::VmError;
use crate::frame::Frame;
use crate::value::{gc, Value};
use crate::Vm;

impl Vm {
    /// Resolves `callee` (already sitting `argc` slots below the stack top)
    /// and either pushes a new frame (closures) or runs the call to
    /// completion synchronously (natives), leaving exactly one return value
    /// where the callee used to be.
    pub fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), VmError> {
        if self.frames.len() >= self.options.max_frames {
            return Err(VmError::StackOverflow(format!(
                "call stack exceeded {} frames",
                self.options.max_frames
            )));
        }

        match callee {
            Value::Closure(closure) => {
                let function = closure.borrow().function.clone();
                let (least, most, vararg) = {
                    let f = function.borrow();
                    (f.arity_least, f.arity_most, f.vararg)
                };
                let defaults = function.borrow().defaults.clone();
                let base = self.stack.len() - argc as usize - 1;
                self.adjust_args(base, argc, least, most, &defaults, vararg)?;
                let module = function.borrow().module.clone();
                self.frames.push(Frame::new(closure, base, module));
                Ok(())
            }
            Value::Native(native) => {
                let (least, most, vararg) = {
                    let n = native.borrow();
                    (n.arity_least, n.arity_most, n.vararg)
                };
                let base = self.stack.len() - argc as usize - 1;
                self.adjust_args(base, argc, least, most, &[], vararg)?;
                let args: Vec<Value> = self.stack[base + 1..].to_vec();
                self.stack.truncate(base);
                let func = native.borrow().func;
                let result = func(self, &args)?;
                self.stack.push(result);
                Ok(())
            }
            Value::Class(class) => {
                let instance = gc(crate::value::InstanceObj {
                    class: class.clone(),
                    fields: Default::default(),
                });
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = Value::Instance(instance.clone());
                let init = class.borrow().methods.borrow().get(crate::symbols::INIT).cloned();
                match init {
                    Some(init_method) => {
                        // discard init's own return value; the constructed
                        // instance is always what `new` produces. init may be
                        // a closure, so it has to be driven to completion
                        // here rather than left for the outer step loop.
                        self.call_value_sync(init_method, argc)?;
                        self.stack.push(Value::Instance(instance));
                        Ok(())
                    }
                    None => {
                        if argc != 0 {
                            return Err(VmError::Type(format!(
                                "'{}' takes no arguments (got {argc})",
                                class.borrow().name.borrow().s
                            )));
                        }
                        self.stack.truncate(base + 1);
                        self.stack[base] = Value::Instance(instance);
                        Ok(())
                    }
                }
            }
            Value::BoundMethod(bm) => {
                let (receiver, method) = {
                    let b = bm.borrow();
                    (b.receiver.clone(), b.method.clone())
                };
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = receiver;
                self.call_value(method, argc)
            }
            other => Err(VmError::Type(format!("'{}' is not callable", other.type_name()))),
        }
    }

    /// Like `call_value`, but for call sites that need the result
    /// immediately rather than letting the outer step loop step into it:
    /// a closure callee pushes a frame and has to be run to completion
    /// before its return value is available, while a native or bound
    /// method already resolves synchronously.
    pub(crate) fn call_value_sync(&mut self, callee: Value, argc: u8) -> Result<Value, VmError> {
        let depth_before = self.frames.len();
        self.call_value(callee, argc)?;
        if self.frames.len() > depth_before {
            self.run_to_frame_depth(depth_before)?;
        }
        Ok(self.stack.pop().unwrap_or(Value::Null))
    }

    /// Validates argument count and pads/collects the stack window in
    /// place: missing trailing args get their default expressions, and if
    /// the function is variadic, everything past `most` is gathered into a
    /// trailing `List`.
    fn adjust_args(
        &mut self,
        base: usize,
        argc: u8,
        least: u8,
        most: u8,
        defaults: &[Value],
        vararg: bool,
    ) -> Result<(), VmError> {
        if argc < least {
            return Err(VmError::InvalidArg(format!(
                "expected at least {least} argument(s), got {argc}"
            )));
        }
        if !vararg && argc > most {
            return Err(VmError::InvalidArg(format!(
                "expected at most {most} argument(s), got {argc}"
            )));
        }

        if vararg {
            let fixed = most as usize;
            let have = argc as usize;
            let first_arg = base + 1;
            if have >= fixed {
                let extra: Vec<Value> = self.stack[first_arg + fixed..].to_vec();
                self.stack.truncate(first_arg + fixed);
                self.stack.push(Value::Tuple(std::rc::Rc::new(extra)));
            } else {
                self.push_defaults(fixed - have, defaults);
                self.stack.push(Value::Tuple(self.empty_tuple.clone()));
            }
            return Ok(());
        }

        if argc < most {
            self.push_defaults((most - argc) as usize, defaults);
        }
        Ok(())
    }

    /// Pushes the trailing `count` default values onto the stack, in order.
    /// Defaults are stored aligned to the function's trailing parameters,
    /// so the ones needed here are always the last `count` entries.
    fn push_defaults(&mut self, count: usize, defaults: &[Value]) {
        let start = defaults.len().saturating_sub(count);
        for d in &defaults[start..] {
            self.stack.push(d.clone());
        }
    }
}

