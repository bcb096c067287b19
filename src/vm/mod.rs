use std::rc::Rc;

use crate::code::{Opcode, read_u16, read_u8};
use crate::compiler::{Bytecode, GLOBALS_SIZE};
use crate::object::{BUILTINS, Closure, CompiledFunction, HashObject, HashPair, Object, ObjectType};

mod frame;
pub use frame::Frame;

pub const STACK_SIZE: usize = 2048;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    // Recoverable: the program did something the language rejects.
    #[error("unsupported types for {operator}: {left} {right}")]
    TypeMismatch { operator: &'static str, left: ObjectType, right: ObjectType },
    #[error("unsupported operand type for {operator}: {operand}")]
    UnsupportedOperand { operator: &'static str, operand: ObjectType },
    #[error("index operator not supported: {collection}[{index}]")]
    IndexNotSupported { collection: ObjectType, index: ObjectType },
    #[error("unusable as hash key: {0}")]
    UnhashableKey(ObjectType),
    #[error("calling non-function and non-builtin: {0}")]
    NotCallable(ObjectType),
    #[error("wrong number of arguments: want={want}, got={got}")]
    Arity { want: usize, got: usize },

    // Fatal: aborts the unit outright.
    #[error("division by zero")]
    DivisionByZero,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("maximum call depth of {limit} frames exceeded")]
    FrameOverflow { limit: usize },
    #[error("return with no enclosing call frame")]
    FrameUnderflow,
    #[error("unknown opcode {byte} at {ip}")]
    UnknownOpcode { byte: u8, ip: usize },
    #[error("truncated {op} instruction at {ip}")]
    TruncatedInstruction { op: Opcode, ip: usize },
    #[error("function body ended without a return")]
    MissingReturn,
    #[error("constant index {0} out of range")]
    BadConstant(usize),
    #[error("constant {index} is not a function, got {found}")]
    NotAFunction { index: usize, found: ObjectType },
    #[error("global index {0} out of range")]
    BadGlobal(usize),
    #[error("free variable index {0} out of range")]
    BadFree(usize),
    #[error("builtin index {0} out of range")]
    BadBuiltin(usize),
}

impl VmError {
    /// Whether the failure points at a broken invariant (or an arithmetic
    /// fault) rather than a type or arity mistake in the program.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VmError::TypeMismatch { .. }
                | VmError::UnsupportedOperand { .. }
                | VmError::IndexNotSupported { .. }
                | VmError::UnhashableKey(_)
                | VmError::NotCallable(_)
                | VmError::Arity { .. }
        )
    }
}

type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    /// Operand stack slots, shared by every frame's locals and temporaries.
    pub stack_size: usize,
    /// Call depth at which recursion is aborted.
    pub max_frames: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { stack_size: STACK_SIZE, max_frames: MAX_FRAMES }
    }
}

/// A globals array sized for every index the compiler can hand out.
pub fn new_globals() -> Vec<Object> {
    vec![Object::Null; GLOBALS_SIZE]
}

/// Executes one compiled unit against a globals array owned by the caller.
pub struct Vm<'g> {
    constants: Vec<Object>,
    globals: &'g mut [Object],
    stack: Vec<Object>,
    /// Next free slot; the top of stack is `stack[sp - 1]`.
    sp: usize,
    frames: Vec<Frame>,
    max_frames: usize,
}

impl<'g> Vm<'g> {
    pub fn new(bytecode: Bytecode, globals: &'g mut [Object]) -> Self {
        Vm::with_options(bytecode, globals, VmOptions::default())
    }

    pub fn with_options(bytecode: Bytecode, globals: &'g mut [Object], options: VmOptions) -> Self {
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main = Rc::new(Closure { func: Rc::new(main), free: Vec::new() });
        let mut frames = Vec::with_capacity(options.max_frames.min(64));
        frames.push(Frame::new(main, 0));
        Vm {
            constants: bytecode.constants,
            globals,
            stack: vec![Object::Null; options.stack_size],
            sp: 0,
            frames,
            max_frames: options.max_frames,
        }
    }

    /// The value most recently removed from the stack. Statement-level pops
    /// leave their value in the vacated slot, which is what this reads.
    pub fn last_popped(&self) -> Object {
        self.stack.get(self.sp).cloned().unwrap_or(Object::Null)
    }

    /// Value on top of the stack, if any.
    pub fn stack_top(&self) -> Option<&Object> {
        self.sp.checked_sub(1).map(|i| &self.stack[i])
    }

    pub fn run(&mut self) -> Result<()> {
        while let Some((ip, op, operands)) = self.fetch()? {
            log::trace!("{:04} {} {:?} sp={} depth={}", ip, op, operands, self.sp, self.frames.len());
            self.execute(op, operands)?;
        }
        Ok(())
    }

    // ---- Dispatch ----

    /// Decode the instruction at the current frame's ip and advance past it.
    /// Returns `None` once the outermost frame has no instructions left.
    fn fetch(&mut self) -> Result<Option<(usize, Opcode, [usize; 2])>> {
        let depth = self.frames.len();
        let frame = self.frames.last_mut().ok_or(VmError::FrameUnderflow)?;
        let code = frame.instructions().as_bytes();
        let ip = frame.ip;
        let Some(&byte) = code.get(ip) else {
            return if depth == 1 { Ok(None) } else { Err(VmError::MissingReturn) };
        };
        let op = Opcode::try_from(byte).map_err(|byte| VmError::UnknownOpcode { byte, ip })?;

        let mut operands = [0usize; 2];
        let mut offset = ip + 1;
        for (slot, &width) in operands.iter_mut().zip(op.operand_widths()) {
            if offset + width > code.len() {
                return Err(VmError::TruncatedInstruction { op, ip });
            }
            *slot = match width {
                2 => read_u16(code, offset) as usize,
                _ => read_u8(code, offset) as usize,
            };
            offset += width;
        }
        frame.ip = offset;
        Ok(Some((ip, op, operands)))
    }

    fn execute(&mut self, op: Opcode, operands: [usize; 2]) -> Result<()> {
        let [a, b] = operands;
        match op {
            Opcode::Constant => {
                let constant = self.constants.get(a).cloned().ok_or(VmError::BadConstant(a))?;
                self.push(constant)?;
            }
            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => self.execute_binary(op)?,
            Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => self.execute_comparison(op)?,

            Opcode::True => self.push(Object::Boolean(true))?,
            Opcode::False => self.push(Object::Boolean(false))?,
            Opcode::Null => self.push(Object::Null)?,

            Opcode::Minus => {
                let operand = self.pop()?;
                match operand {
                    Object::Integer(n) => self.push(Object::Integer(n.wrapping_neg()))?,
                    other => {
                        return Err(VmError::UnsupportedOperand { operator: "-", operand: other.object_type() });
                    }
                }
            }
            Opcode::Bang => {
                let operand = self.pop()?;
                self.push(Object::Boolean(!operand.is_truthy()))?;
            }

            Opcode::Jump => self.jump(a)?,
            Opcode::JumpNotTruthy => {
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.jump(a)?;
                }
            }

            Opcode::SetGlobal => {
                let value = self.pop()?;
                let slot = self.globals.get_mut(a).ok_or(VmError::BadGlobal(a))?;
                *slot = value;
            }
            Opcode::GetGlobal => {
                let value = self.globals.get(a).cloned().ok_or(VmError::BadGlobal(a))?;
                self.push(value)?;
            }

            Opcode::SetLocal => {
                let slot = self.local_slot(a)?;
                let value = self.pop()?;
                self.stack[slot] = value;
            }
            Opcode::GetLocal => {
                let slot = self.local_slot(a)?;
                self.push(self.stack[slot].clone())?;
            }

            Opcode::GetBuiltin => {
                let builtin = BUILTINS.get(a).ok_or(VmError::BadBuiltin(a))?;
                self.push(Object::Builtin(builtin))?;
            }
            Opcode::GetFree => {
                let value = self.current_frame()?.closure.free.get(a).cloned().ok_or(VmError::BadFree(a))?;
                self.push(value)?;
            }
            Opcode::CurrentClosure => {
                let closure = self.current_frame()?.closure.clone();
                self.push(Object::Closure(closure))?;
            }

            Opcode::Array => {
                let elements = self.take_top(a)?;
                self.push(Object::array(elements))?;
            }
            Opcode::Hash => {
                let hash = self.build_hash(a)?;
                self.push(Object::Hash(Rc::new(hash)))?;
            }
            Opcode::Index => {
                let index = self.pop()?;
                let collection = self.pop()?;
                self.push(index_value(&collection, &index)?)?;
            }

            Opcode::Call => self.call(a)?,
            Opcode::ReturnValue => {
                let value = self.pop()?;
                self.return_from_frame(value)?;
            }
            Opcode::Return => self.return_from_frame(Object::Null)?,

            Opcode::Closure => self.push_closure(a, b)?,
        }
        Ok(())
    }

    // ---- Stack ----

    fn push(&mut self, value: Object) -> Result<()> {
        let slot = self.stack.get_mut(self.sp).ok_or(VmError::StackOverflow)?;
        *slot = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Remove the top `n` values, oldest first.
    fn take_top(&mut self, n: usize) -> Result<Vec<Object>> {
        let start = self.sp.checked_sub(n).ok_or(VmError::StackUnderflow)?;
        let values = self.stack[start..self.sp].to_vec();
        self.sp = start;
        Ok(values)
    }

    fn current_frame(&self) -> Result<&Frame> {
        self.frames.last().ok_or(VmError::FrameUnderflow)
    }

    fn jump(&mut self, target: usize) -> Result<()> {
        self.frames.last_mut().ok_or(VmError::FrameUnderflow)?.ip = target;
        Ok(())
    }

    fn local_slot(&self, index: usize) -> Result<usize> {
        let slot = self.current_frame()?.base_pointer + index;
        if slot >= self.stack.len() {
            return Err(VmError::StackOverflow);
        }
        Ok(slot)
    }

    // ---- Operators ----

    fn execute_binary(&mut self, op: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => Object::Integer(integer_arithmetic(op, *l, *r)?),
            (Object::String(l), Object::String(r)) if op == Opcode::Add => {
                let mut joined = String::with_capacity(l.len() + r.len());
                joined.push_str(l);
                joined.push_str(r);
                Object::string(joined)
            }
            _ => {
                return Err(VmError::TypeMismatch {
                    operator: operator_symbol(op),
                    left: left.object_type(),
                    right: right.object_type(),
                });
            }
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, op: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match op {
            Opcode::Equal => objects_equal(&left, &right),
            Opcode::NotEqual => !objects_equal(&left, &right),
            _ => match (&left, &right) {
                (Object::Integer(l), Object::Integer(r)) => l > r,
                _ => {
                    return Err(VmError::TypeMismatch {
                        operator: operator_symbol(op),
                        left: left.object_type(),
                        right: right.object_type(),
                    });
                }
            },
        };
        self.push(Object::Boolean(result))
    }

    fn build_hash(&mut self, pairs: usize) -> Result<HashObject> {
        let values = self.take_top(pairs * 2)?;
        let mut hash = HashObject::default();
        let mut values = values.into_iter();
        while let (Some(key), Some(value)) = (values.next(), values.next()) {
            let hash_key = key.hash_key().ok_or(VmError::UnhashableKey(key.object_type()))?;
            hash.pairs.insert(hash_key, HashPair { key, value });
        }
        Ok(hash)
    }

    // ---- Calls ----

    fn call(&mut self, argc: usize) -> Result<()> {
        let callee_slot = self.sp.checked_sub(argc + 1).ok_or(VmError::StackUnderflow)?;
        match self.stack[callee_slot].clone() {
            Object::Closure(closure) => self.call_closure(closure, argc),
            Object::Builtin(builtin) => {
                let result = (builtin.func)(&self.stack[callee_slot + 1..self.sp]);
                self.sp = callee_slot;
                self.push(result.unwrap_or(Object::Null))
            }
            other => Err(VmError::NotCallable(other.object_type())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> Result<()> {
        let func = &closure.func;
        if argc != func.num_parameters {
            return Err(VmError::Arity { want: func.num_parameters, got: argc });
        }
        if self.frames.len() >= self.max_frames {
            return Err(VmError::FrameOverflow { limit: self.max_frames });
        }

        let base_pointer = self.sp - argc;
        let top = base_pointer + func.num_locals;
        if top > self.stack.len() {
            return Err(VmError::StackOverflow);
        }
        // Locals beyond the arguments start out null, not whatever a previous
        // call left in those slots.
        for slot in &mut self.stack[self.sp..top] {
            *slot = Object::Null;
        }
        self.sp = top;
        self.frames.push(Frame::new(closure, base_pointer));
        Ok(())
    }

    fn return_from_frame(&mut self, value: Object) -> Result<()> {
        if self.frames.len() <= 1 {
            return Err(VmError::FrameUnderflow);
        }
        let frame = self.frames.pop().ok_or(VmError::FrameUnderflow)?;
        // Drop the callee along with its locals.
        self.sp = frame.base_pointer - 1;
        self.push(value)
    }

    fn push_closure(&mut self, index: usize, num_free: usize) -> Result<()> {
        let func = match self.constants.get(index) {
            Some(Object::CompiledFunction(func)) => func.clone(),
            Some(other) => return Err(VmError::NotAFunction { index, found: other.object_type() }),
            None => return Err(VmError::BadConstant(index)),
        };
        let free = self.take_top(num_free)?;
        log::debug!("closure over constant {} capturing {} value(s)", index, free.len());
        self.push(Object::Closure(Rc::new(Closure { func, free })))
    }
}

fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => other.name(),
    }
}

/// Two's-complement arithmetic; division truncates toward zero.
fn integer_arithmetic(op: Opcode, left: i64, right: i64) -> Result<i64> {
    Ok(match op {
        Opcode::Add => left.wrapping_add(right),
        Opcode::Sub => left.wrapping_sub(right),
        Opcode::Mul => left.wrapping_mul(right),
        Opcode::Div => {
            if right == 0 {
                return Err(VmError::DivisionByZero);
            }
            left.wrapping_div(right)
        }
        _ => {
            return Err(VmError::TypeMismatch {
                operator: operator_symbol(op),
                left: ObjectType::Integer,
                right: ObjectType::Integer,
            });
        }
    })
}

/// Integers and booleans compare by value, strings by content, and every
/// other heap value by identity. Values of different types are never equal.
pub fn objects_equal(left: &Object, right: &Object) -> bool {
    match (left, right) {
        (Object::Integer(l), Object::Integer(r)) => l == r,
        (Object::Boolean(l), Object::Boolean(r)) => l == r,
        (Object::Null, Object::Null) => true,
        (Object::String(l), Object::String(r)) => l == r,
        (Object::Array(l), Object::Array(r)) => Rc::ptr_eq(l, r),
        (Object::Hash(l), Object::Hash(r)) => Rc::ptr_eq(l, r),
        (Object::Error(l), Object::Error(r)) => Rc::ptr_eq(l, r),
        (Object::Builtin(l), Object::Builtin(r)) => std::ptr::eq(*l, *r),
        (Object::CompiledFunction(l), Object::CompiledFunction(r)) => Rc::ptr_eq(l, r),
        (Object::Closure(l), Object::Closure(r)) => Rc::ptr_eq(l, r),
        _ => false,
    }
}

/// Out-of-range array indices and absent hash keys yield null.
fn index_value(collection: &Object, index: &Object) -> Result<Object> {
    match (collection, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::Null)),
        (Object::Hash(hash), key) => {
            let hash_key = key.hash_key().ok_or(VmError::UnhashableKey(key.object_type()))?;
            Ok(hash.pairs.get(&hash_key).map(|pair| pair.value.clone()).unwrap_or(Object::Null))
        }
        _ => Err(VmError::IndexNotSupported {
            collection: collection.object_type(),
            index: index.object_type(),
        }),
    }
}
