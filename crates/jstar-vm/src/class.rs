//! Class construction: creating classes, flattening inherited method
//! tables, and attaching methods.
//!
//! A subclass's method table starts as a shallow copy of its
//! superclass's *already-flattened* table, so method lookup later is a
//! single hash probe instead of a walk up the inheritance chain -- the
//! flattening happens once, here, at class-creation time.

use crate::exception::VmError;
use crate::value::{gc, ClassObj, Gc, JStr, Value};
use crate::Vm;

impl Vm {
    pub fn new_class(&mut self, name: &str) -> Value {
        Value::Class(gc(ClassObj {
            name: gc(JStr::new(name.to_string())),
            superclass: None,
            methods: Default::default(),
        }))
    }

    pub fn new_subclass(&mut self, name: &str, superclass: &Value) -> Result<Value, VmError> {
        let Value::Class(super_class) = superclass else {
            return Err(VmError::Type(format!(
                "superclass must be a Class, got '{}'",
                superclass.type_name()
            )));
        };
        let methods = super_class.borrow().methods.borrow().clone();
        Ok(Value::Class(gc(ClassObj {
            name: gc(JStr::new(name.to_string())),
            superclass: Some(super_class.clone()),
            methods: std::cell::RefCell::new(methods),
        })))
    }

    pub fn define_method(&mut self, class: &Value, name: &str, method: Value) -> Result<(), VmError> {
        let Value::Class(c) = class else {
            return Err(VmError::Type("can only define methods on a Class".into()));
        };
        c.borrow().methods.borrow_mut().insert(name.to_string(), method);
        Ok(())
    }

    pub fn superclass_of(&self, class: &Value) -> Option<Gc<ClassObj>> {
        match class {
            Value::Class(c) => c.borrow().superclass.clone(),
            _ => None,
        }
    }
}
