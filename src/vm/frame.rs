use std::rc::Rc;

use crate::code::Instructions;
use crate::object::Closure;

/// One active call: the closure being executed, its instruction pointer, and
/// the stack slot its locals start at.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Rc<Closure>,
    pub ip: usize,
    /// First local slot. The callee itself sits at `base_pointer - 1`.
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }

    pub fn instructions(&self) -> &Instructions {
        &self.closure.func.instructions
    }
}
