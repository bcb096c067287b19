use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::code::Instructions;

pub mod builtins;
pub use builtins::{BUILTINS, Builtin};

/// Runtime type tag of an [`Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Integer,
    Boolean,
    String,
    Null,
    Array,
    Hash,
    Error,
    Builtin,
    CompiledFunction,
    Closure,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Integer => "INTEGER",
            ObjectType::Boolean => "BOOLEAN",
            ObjectType::String => "STRING",
            ObjectType::Null => "NULL",
            ObjectType::Array => "ARRAY",
            ObjectType::Hash => "HASH",
            ObjectType::Error => "ERROR",
            ObjectType::Builtin => "BUILTIN",
            ObjectType::CompiledFunction => "COMPILED_FUNCTION_OBJ",
            ObjectType::Closure => "CLOSURE",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a hash-map key: the variant tag plus a 64-bit digest of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey {
    pub object_type: ObjectType,
    pub value: u64,
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a digest.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, &b| (hash ^ b as u64).wrapping_mul(FNV_PRIME))
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

/// Hash contents keyed by [`HashKey`]; iteration follows first insertion of each key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashObject {
    pub pairs: IndexMap<HashKey, HashPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

/// A runtime value. Composite variants are reference counted, so cloning an
/// `Object` never deep-copies.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
    Null,
    Array(Rc<Vec<Object>>),
    Hash(Rc<HashObject>),
    Error(Rc<str>),
    Builtin(&'static Builtin),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
}

impl Object {
    pub fn string(s: impl AsRef<str>) -> Self {
        Object::String(Rc::from(s.as_ref()))
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        Object::Error(Rc::from(message.as_ref()))
    }

    pub fn array(elements: Vec<Object>) -> Self {
        Object::Array(Rc::new(elements))
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Integer(_) => ObjectType::Integer,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::String(_) => ObjectType::String,
            Object::Null => ObjectType::Null,
            Object::Array(_) => ObjectType::Array,
            Object::Hash(_) => ObjectType::Hash,
            Object::Error(_) => ObjectType::Error,
            Object::Builtin(_) => ObjectType::Builtin,
            Object::CompiledFunction(_) => ObjectType::CompiledFunction,
            Object::Closure(_) => ObjectType::Closure,
        }
    }

    /// The key this value hashes to, or `None` when the variant is not hashable.
    /// Only Integer, Boolean and String are hashable.
    pub fn hash_key(&self) -> Option<HashKey> {
        let value = match self {
            Object::Integer(n) => *n as u64,
            Object::Boolean(b) => *b as u64,
            Object::String(s) => fnv1a_64(s.as_bytes()),
            Object::Null
            | Object::Array(_)
            | Object::Hash(_)
            | Object::Error(_)
            | Object::Builtin(_)
            | Object::CompiledFunction(_)
            | Object::Closure(_) => return None,
        };
        Some(HashKey { object_type: self.object_type(), value })
    }

    /// `false` and `null` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Boolean(false) | Object::Null)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(n) => write!(f, "{}", n),
            Object::Boolean(b) => write!(f, "{}", b),
            Object::String(s) => write!(f, "{}", s),
            Object::Null => write!(f, "null"),
            Object::Array(elements) => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            Object::Hash(hash) => {
                write!(f, "{{")?;
                for (i, pair) in hash.pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Object::Error(message) => write!(f, "ERROR: {}", message),
            Object::Builtin(_) => write!(f, "builtin function"),
            Object::CompiledFunction(func) => write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(func)),
            Object::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
        }
    }
}
