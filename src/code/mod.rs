use std::fmt;

// ── Stack-machine opcodes ───────────────────────────────────────────
//
// Encoding: [OP:8] followed by the opcode's fixed-width big-endian operands.
// Wide (2-byte) operands address constants, jump targets and globals; narrow
// (1-byte) operands address locals, free values, builtins and counts.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Constant = 0,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    True,
    False,
    Null,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    GetGlobal,
    SetGlobal,
    GetLocal,
    SetLocal,
    GetBuiltin,
    GetFree,
    CurrentClosure,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    Closure,
}

const ALL_OPCODES: [Opcode; 30] = [
    Opcode::Constant,
    Opcode::Pop,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::True,
    Opcode::False,
    Opcode::Null,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetBuiltin,
    Opcode::GetFree,
    Opcode::CurrentClosure,
    Opcode::Array,
    Opcode::Hash,
    Opcode::Index,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Return,
    Opcode::Closure,
];

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        ALL_OPCODES.get(byte as usize).copied().ok_or(byte)
    }
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "OpConstant",
            Opcode::Pop => "OpPop",
            Opcode::Add => "OpAdd",
            Opcode::Sub => "OpSub",
            Opcode::Mul => "OpMul",
            Opcode::Div => "OpDiv",
            Opcode::True => "OpTrue",
            Opcode::False => "OpFalse",
            Opcode::Null => "OpNull",
            Opcode::Equal => "OpEqual",
            Opcode::NotEqual => "OpNotEqual",
            Opcode::GreaterThan => "OpGreaterThan",
            Opcode::Minus => "OpMinus",
            Opcode::Bang => "OpBang",
            Opcode::JumpNotTruthy => "OpJumpNotTruthy",
            Opcode::Jump => "OpJump",
            Opcode::GetGlobal => "OpGetGlobal",
            Opcode::SetGlobal => "OpSetGlobal",
            Opcode::GetLocal => "OpGetLocal",
            Opcode::SetLocal => "OpSetLocal",
            Opcode::GetBuiltin => "OpGetBuiltin",
            Opcode::GetFree => "OpGetFree",
            Opcode::CurrentClosure => "OpCurrentClosure",
            Opcode::Array => "OpArray",
            Opcode::Hash => "OpHash",
            Opcode::Index => "OpIndex",
            Opcode::Call => "OpCall",
            Opcode::ReturnValue => "OpReturnValue",
            Opcode::Return => "OpReturn",
            Opcode::Closure => "OpClosure",
        }
    }

    /// Byte width of each operand, in order.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant
            | Opcode::JumpNotTruthy
            | Opcode::Jump
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::Array
            | Opcode::Hash => &[2],
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetBuiltin
            | Opcode::GetFree
            | Opcode::Call => &[1],
            Opcode::Closure => &[2, 1],
            Opcode::Pop
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::True
            | Opcode::False
            | Opcode::Null
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::GreaterThan
            | Opcode::Minus
            | Opcode::Bang
            | Opcode::CurrentClosure
            | Opcode::Index
            | Opcode::ReturnValue
            | Opcode::Return => &[],
        }
    }

    /// Total encoded size: opcode byte plus operands.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperandError {
    #[error("{op} expects {expected} operand(s), got {got}")]
    WrongOperandCount { op: Opcode, expected: usize, got: usize },
    #[error("operand {value} of {op} does not fit in {width} byte(s)")]
    Overflow { op: Opcode, value: usize, width: usize },
}

/// Encode one instruction.
pub fn make(op: Opcode, operands: &[usize]) -> Result<Vec<u8>, OperandError> {
    let widths = op.operand_widths();
    if widths.len() != operands.len() {
        return Err(OperandError::WrongOperandCount {
            op,
            expected: widths.len(),
            got: operands.len(),
        });
    }

    let mut bytes = Vec::with_capacity(op.width());
    bytes.push(op as u8);
    for (&value, &width) in operands.iter().zip(widths) {
        match width {
            2 => {
                let v = u16::try_from(value).map_err(|_| OperandError::Overflow { op, value, width })?;
                bytes.extend_from_slice(&v.to_be_bytes());
            }
            _ => {
                let v = u8::try_from(value).map_err(|_| OperandError::Overflow { op, value, width })?;
                bytes.push(v);
            }
        }
    }
    Ok(bytes)
}

#[inline(always)]
pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline(always)]
pub fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes[offset]
}

/// Decode the operands of `op` starting at `bytes[0]`. Returns the operands
/// and the number of bytes consumed, or `None` if the buffer is truncated.
pub fn read_operands(op: Opcode, bytes: &[u8]) -> Option<(Vec<usize>, usize)> {
    let mut operands = Vec::with_capacity(op.operand_widths().len());
    let mut offset = 0;
    for &width in op.operand_widths() {
        if offset + width > bytes.len() {
            return None;
        }
        operands.push(match width {
            2 => read_u16(bytes, offset) as usize,
            _ => read_u8(bytes, offset) as usize,
        });
        offset += width;
    }
    Some((operands, offset))
}

// ── Instruction buffer ──────────────────────────────────────────────

/// A flat instruction stream. Emission returns the start position of each
/// instruction so forward jumps can be patched once their target is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Instructions(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Append an instruction and return the position it starts at.
    pub fn emit(&mut self, op: Opcode, operands: &[usize]) -> Result<usize, OperandError> {
        let encoded = make(op, operands)?;
        let pos = self.0.len();
        self.0.extend_from_slice(&encoded);
        Ok(pos)
    }

    /// Re-encode the instruction at `pos` in place. The replacement must have
    /// the same width as the original, which holds for every patch the
    /// compiler performs (jump targets, Pop → ReturnValue).
    pub fn replace(&mut self, pos: usize, op: Opcode, operands: &[usize]) -> Result<(), OperandError> {
        let encoded = make(op, operands)?;
        self.0[pos..pos + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    /// Drop everything from `pos` onwards.
    pub fn truncate(&mut self, pos: usize) {
        self.0.truncate(pos);
    }

    pub fn concat(parts: impl IntoIterator<Item = Instructions>) -> Instructions {
        Instructions(parts.into_iter().flat_map(|i| i.0).collect())
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Instructions(bytes)
    }
}

/// Disassembly: one `NNNN OpName operands` line per instruction.
impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ip = 0;
        while ip < self.0.len() {
            let op = match Opcode::try_from(self.0[ip]) {
                Ok(op) => op,
                Err(byte) => {
                    writeln!(f, "{:04} ERROR: unknown opcode {}", ip, byte)?;
                    ip += 1;
                    continue;
                }
            };
            let Some((operands, read)) = read_operands(op, &self.0[ip + 1..]) else {
                writeln!(f, "{:04} ERROR: truncated {}", ip, op)?;
                break;
            };
            write!(f, "{:04} {}", ip, op)?;
            for operand in operands {
                write!(f, " {}", operand)?;
            }
            writeln!(f)?;
            ip += 1 + read;
        }
        Ok(())
    }
}
