//! Host type descriptors
//!
//! Every value that crosses the bridge is described by a [`HostType`]. The
//! descriptor doubles as the "expected type hint" for inbound conversion.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Integer width and signedness.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
}

impl IntKind {
    pub fn name(self) -> &'static str {
        match self {
            IntKind::I8 => "i8",
            IntKind::I16 => "i16",
            IntKind::I32 => "i32",
            IntKind::I64 => "i64",
            IntKind::Isize => "isize",
            IntKind::U8 => "u8",
            IntKind::U16 => "u16",
            IntKind::U32 => "u32",
            IntKind::U64 => "u64",
            IntKind::Usize => "usize",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64 | IntKind::Isize
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

impl FloatKind {
    pub fn name(self) -> &'static str {
        match self {
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
        }
    }
}

/// Identity of a reflected composite type.
///
/// Two descriptors are equal when they name the same Rust type.
#[derive(Debug, Copy, Clone)]
pub struct StructType {
    name: &'static str,
    type_id: TypeId,
}

impl StructType {
    pub(crate) fn new(name: &'static str, type_id: TypeId) -> Self {
        Self { name, type_id }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for StructType {}

impl Hash for StructType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

/// Kind of a host value, as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    Bool,
    Int(IntKind),
    Float(FloatKind),
    String,
    /// Raw byte string (no encoding applied).
    Bytes,
    /// Shared ownership wrapper around the inner type.
    Pointer(Box<HostType>),
    /// Composite record passed by value.
    Struct(StructType),
    Function,
    Sequence(Box<HostType>),
    Mapping(Box<HostType>, Box<HostType>),
    /// Ordered key/value pairs built from a runtime table.
    KeyValues,
    /// Proxy handle to a runtime table.
    Table,
    /// Proxy handle to a runtime function.
    LuaFunction,
    /// Any value; no conversion preference.
    Interface,
    /// Nil, or a value of the inner type.
    Optional(Box<HostType>),
    /// Trailing parameter that collects the remaining arguments.
    Variadic(Box<HostType>),
    /// Call context of a raw function.
    Context,
    /// Result count of a raw function.
    ReturnCount,
}

impl HostType {
    pub fn name(&self) -> String {
        match self {
            HostType::Bool => "bool".to_string(),
            HostType::Int(kind) => kind.name().to_string(),
            HostType::Float(kind) => kind.name().to_string(),
            HostType::String => "String".to_string(),
            HostType::Bytes => "Bytes".to_string(),
            HostType::Pointer(inner) => format!("Ptr<{}>", inner.name()),
            HostType::Struct(ty) => ty.name().to_string(),
            HostType::Function => "HostFunction".to_string(),
            HostType::Sequence(elem) => format!("Vec<{}>", elem.name()),
            HostType::Mapping(key, value) => format!("Map<{}, {}>", key.name(), value.name()),
            HostType::KeyValues => "KeyValues".to_string(),
            HostType::Table => "Table".to_string(),
            HostType::LuaFunction => "Function".to_string(),
            HostType::Interface => "any".to_string(),
            HostType::Optional(inner) => format!("Option<{}>", inner.name()),
            HostType::Variadic(elem) => format!("Variadic<{}>", elem.name()),
            HostType::Context => "State".to_string(),
            HostType::ReturnCount => "ReturnCount".to_string(),
        }
    }

    /// True when the descriptor expresses no conversion preference.
    pub fn is_any(&self) -> bool {
        matches!(self, HostType::Interface)
    }

    /// True for the two raw calling convention markers, also behind a pointer.
    pub(crate) fn is_raw_marker(&self) -> bool {
        match self {
            HostType::Context | HostType::ReturnCount => true,
            HostType::Pointer(inner) | HostType::Optional(inner) => inner.is_raw_marker(),
            _ => false,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Name of an optional hint, `any` when absent.
pub(crate) fn hint_name(hint: Option<&HostType>) -> String {
    hint.map(HostType::name).unwrap_or_else(|| "any".to_string())
}
