//! Upvalue capture and closing.
//!
//! Open upvalues are kept in one VM-wide list, sorted by *descending* stack
//! address, so closing everything at or above a given base is a single
//! prefix scan rather than a full-list walk.

use crate::value::{gc, Gc, UpvalueObj, Value};
use crate::Vm;

impl Vm {
    /// Returns the upvalue capturing `stack[index]`, reusing an existing
    /// open upvalue for that slot if one is already live -- two closures
    /// that capture the same local must observe the same upvalue object.
    pub fn capture_upvalue(&mut self, index: usize) -> Gc<UpvalueObj> {
        if let Some(pos) = self.open_upvalues.iter().position(|uv| match &*uv.borrow() {
            UpvalueObj::Open(i) => *i == index,
            UpvalueObj::Closed(_) => false,
        }) {
            return self.open_upvalues[pos].clone();
        }

        let uv = gc(UpvalueObj::Open(index));
        let pos = self
            .open_upvalues
            .iter()
            .position(|uv| match &*uv.borrow() {
                UpvalueObj::Open(i) => *i < index,
                UpvalueObj::Closed(_) => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, uv.clone());
        uv
    }

    /// Closes every open upvalue whose captured slot is `>= from`, copying
    /// the live stack value into the upvalue itself. Called when a scope
    /// ends or a frame returns, so the upvalue keeps working after the slot
    /// it pointed at is gone.
    pub fn close_upvalues(&mut self, from: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|uv| {
            let idx = match &*uv.borrow() {
                UpvalueObj::Open(i) => Some(*i),
                UpvalueObj::Closed(_) => None,
            };
            match idx {
                Some(i) if i >= from => {
                    let val = stack[i].clone();
                    *uv.borrow_mut() = UpvalueObj::Closed(val);
                    false
                }
                Some(_) => true,
                None => false,
            }
        });
    }

    pub fn read_upvalue(&self, uv: &Gc<UpvalueObj>) -> Value {
        match &*uv.borrow() {
            UpvalueObj::Open(i) => self.stack[*i].clone(),
            UpvalueObj::Closed(v) => v.clone(),
        }
    }

    pub fn write_upvalue(&mut self, uv: &Gc<UpvalueObj>, value: Value) {
        let idx = match &*uv.borrow() {
            UpvalueObj::Open(i) => Some(*i),
            UpvalueObj::Closed(_) => None,
        };
        match idx {
            Some(i) => self.stack[i] = value,
            None => *uv.borrow_mut() = UpvalueObj::Closed(value),
        }
    }
}
