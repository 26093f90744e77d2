//! Lazy module import/initialization: a module's
//! body is compiled once, wrapped in a closure, and run exactly once, the
//! first time it's imported; later imports of the same name just return
//! the cached `Module` object.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::exception::VmError;
use crate::value::{gc, ClosureObj, FunctionObj, ModuleObj, Value};
use crate::Vm;

impl Vm {
    pub fn import_module(&mut self, name: &str) -> Result<Value, VmError> {
        if let Some(m) = self.modules.get(name) {
            return Ok(Value::Module(m.clone()));
        }

        let chunk = self
            .host
            .resolve(name)
            .map_err(VmError::Import)?
            .ok_or_else(|| VmError::Import(format!("module '{name}' not found")))?;

        let module = gc(ModuleObj {
            name: name.to_string(),
            globals: Default::default(),
            natives: Default::default(),
            main_function: RefCell::new(None),
            initialized: Cell::new(false),
        });
        self.modules.insert(name.to_string(), module.clone());

        let main_fn = gc(FunctionObj {
            name: Some(name.to_string()),
            chunk: Rc::new(chunk),
            arity_most: 0,
            arity_least: 0,
            defaults: Vec::new(),
            vararg: false,
            upvalue_count: 0,
            module: module.clone(),
            upvalue_descriptors: Vec::new(),
            owning_class_superclass: None,
        });
        let closure = gc(ClosureObj { function: main_fn, upvalues: Vec::new() });

        self.run_closure_to_completion(closure)?;
        self.stack.pop();

        module.borrow().initialized.set(true);
        Ok(Value::Module(module))
    }

    pub fn import_binding(&mut self, module: &Value, name: &str) -> Result<Value, VmError> {
        let Value::Module(m) = module else {
            return Err(VmError::Type("import target is not a module".into()));
        };
        m.borrow()
            .globals
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::Name(format!("module has no export '{name}'")))
    }

    /// Copies every global from `module` into `into`'s globals, for
    /// `import from x *`.
    pub fn import_all(&mut self, module: &Value, into: &Value) -> Result<(), VmError> {
        let Value::Module(src) = module else {
            return Err(VmError::Type("import target is not a module".into()));
        };
        let Value::Module(dst) = into else {
            return Err(VmError::Type("import destination is not a module".into()));
        };
        let items: Vec<(String, Value)> =
            src.borrow().globals.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut dst_globals = dst.borrow().globals.borrow_mut();
        for (k, v) in items {
            dst_globals.insert(k, v);
        }
        Ok(())
    }
}
