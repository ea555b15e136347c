//! Host values
//!
//! [`HostValue`] is the closed set of shapes a host value can take while it
//! crosses the bridge. Composite shapes (objects, sequences, mappings) share
//! their storage so that mutation through the runtime is visible to the host.

use crate::convert::PushValue;
use crate::error::{ConversionError, Error};
use crate::function::HostFunction;
use crate::host::reflect::{Described, Reflect, StructDef};
use crate::host::types::{FloatKind, HostType, IntKind, StructType};
use crate::proxy::{Function, Table};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A host value of any supported kind.
#[derive(Clone)]
pub enum HostValue {
    Nil,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Usize(usize),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Shared composite record (ownership wrapper).
    Object(Object),
    /// Composite record by value. Crossing into the runtime promotes it to an [`Object`].
    Struct(Box<dyn Reflect>),
    Function(HostFunction),
    Sequence(Sequence),
    Mapping(Mapping),
    KeyValues(Vec<KeyValue>),
    /// Value carried behind an opaque interface; conversion recurses on it.
    Interface(Box<HostValue>),
    Table(Table),
    LuaFunction(Function),
    /// Value that pushes itself into the runtime.
    Custom(Rc<dyn PushValue>),
    /// Kind the bridge has no mapping for. Pushes as nil.
    Opaque(&'static str),
}

impl HostValue {
    /// Type descriptor of this value. `Nil` reports [`HostType::Interface`].
    pub fn host_type(&self) -> HostType {
        match self {
            HostValue::Nil => HostType::Interface,
            HostValue::Bool(_) => HostType::Bool,
            HostValue::I8(_) => HostType::Int(IntKind::I8),
            HostValue::I16(_) => HostType::Int(IntKind::I16),
            HostValue::I32(_) => HostType::Int(IntKind::I32),
            HostValue::I64(_) => HostType::Int(IntKind::I64),
            HostValue::Isize(_) => HostType::Int(IntKind::Isize),
            HostValue::U8(_) => HostType::Int(IntKind::U8),
            HostValue::U16(_) => HostType::Int(IntKind::U16),
            HostValue::U32(_) => HostType::Int(IntKind::U32),
            HostValue::U64(_) => HostType::Int(IntKind::U64),
            HostValue::Usize(_) => HostType::Int(IntKind::Usize),
            HostValue::F32(_) => HostType::Float(FloatKind::F32),
            HostValue::F64(_) => HostType::Float(FloatKind::F64),
            HostValue::String(_) => HostType::String,
            HostValue::Bytes(_) => HostType::Bytes,
            HostValue::Object(object) => {
                HostType::Pointer(Box::new(HostType::Struct(object.struct_type())))
            }
            HostValue::Struct(value) => HostType::Struct(value.struct_def().struct_type()),
            HostValue::Function(_) => HostType::Function,
            HostValue::Sequence(seq) => HostType::Sequence(Box::new(seq.elem_type().clone())),
            HostValue::Mapping(map) => HostType::Mapping(
                Box::new(map.key_type().clone()),
                Box::new(map.value_type().clone()),
            ),
            HostValue::KeyValues(_) => HostType::KeyValues,
            HostValue::Interface(_) => HostType::Interface,
            HostValue::Table(_) => HostType::Table,
            HostValue::LuaFunction(_) => HostType::LuaFunction,
            HostValue::Custom(_) => HostType::Pointer(Box::new(HostType::Interface)),
            HostValue::Opaque(_) => HostType::Interface,
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> String {
        match self {
            HostValue::Nil => "nil".to_string(),
            HostValue::Custom(_) => "custom".to_string(),
            HostValue::Opaque(name) => (*name).to_string(),
            HostValue::Interface(inner) => inner.kind_name(),
            other => other.host_type().name(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(value) => Some(*value),
            HostValue::Interface(inner) => inner.as_bool(),
            _ => None,
        }
    }

    /// Any numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            HostValue::I8(v) => *v as f64,
            HostValue::I16(v) => *v as f64,
            HostValue::I32(v) => *v as f64,
            HostValue::I64(v) => *v as f64,
            HostValue::Isize(v) => *v as f64,
            HostValue::U8(v) => *v as f64,
            HostValue::U16(v) => *v as f64,
            HostValue::U32(v) => *v as f64,
            HostValue::U64(v) => *v as f64,
            HostValue::Usize(v) => *v as f64,
            HostValue::F32(v) => *v as f64,
            HostValue::F64(v) => *v,
            HostValue::Interface(inner) => return inner.as_f64(),
            _ => return None,
        };
        Some(value)
    }

    /// Any numeric value as `i64`, truncating floats.
    pub fn as_i64(&self) -> Option<i64> {
        let value = match self {
            HostValue::I8(v) => *v as i64,
            HostValue::I16(v) => *v as i64,
            HostValue::I32(v) => *v as i64,
            HostValue::I64(v) => *v,
            HostValue::Isize(v) => *v as i64,
            HostValue::U8(v) => *v as i64,
            HostValue::U16(v) => *v as i64,
            HostValue::U32(v) => *v as i64,
            HostValue::U64(v) => *v as i64,
            HostValue::Usize(v) => *v as i64,
            HostValue::F32(v) => *v as i64,
            HostValue::F64(v) => *v as i64,
            HostValue::Interface(inner) => return inner.as_i64(),
            _ => return None,
        };
        Some(value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(value) => Some(value),
            HostValue::Interface(inner) => inner.as_str(),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            HostValue::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            HostValue::LuaFunction(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            HostValue::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            HostValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_key_values(&self) -> Option<&[KeyValue]> {
        match self {
            HostValue::KeyValues(pairs) => Some(pairs),
            _ => None,
        }
    }
}

/// Build the integer value of the given width, wrapping like an `as` cast.
pub(crate) fn int_value(kind: IntKind, value: i128) -> HostValue {
    match kind {
        IntKind::I8 => HostValue::I8(value as i8),
        IntKind::I16 => HostValue::I16(value as i16),
        IntKind::I32 => HostValue::I32(value as i32),
        IntKind::I64 => HostValue::I64(value as i64),
        IntKind::Isize => HostValue::Isize(value as isize),
        IntKind::U8 => HostValue::U8(value as u8),
        IntKind::U16 => HostValue::U16(value as u16),
        IntKind::U32 => HostValue::U32(value as u32),
        IntKind::U64 => HostValue::U64(value as u64),
        IntKind::Usize => HostValue::Usize(value as usize),
    }
}

fn int_of(value: &HostValue) -> Option<i128> {
    let value = match value {
        HostValue::I8(v) => *v as i128,
        HostValue::I16(v) => *v as i128,
        HostValue::I32(v) => *v as i128,
        HostValue::I64(v) => *v as i128,
        HostValue::Isize(v) => *v as i128,
        HostValue::U8(v) => *v as i128,
        HostValue::U16(v) => *v as i128,
        HostValue::U32(v) => *v as i128,
        HostValue::U64(v) => *v as i128,
        HostValue::Usize(v) => *v as i128,
        _ => return None,
    };
    Some(value)
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::F32(a), HostValue::F32(b)) => a == b,
            (HostValue::F64(a), HostValue::F64(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Bytes(a), HostValue::Bytes(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a.ptr_eq(b),
            (HostValue::Struct(a), HostValue::Struct(b)) => {
                a.as_any() as *const dyn Any as *const () == b.as_any() as *const dyn Any as *const ()
            }
            (HostValue::Function(a), HostValue::Function(b)) => a.ptr_eq(b),
            (HostValue::Sequence(a), HostValue::Sequence(b)) => {
                a.ptr_eq(b) || a.to_vec() == b.to_vec()
            }
            (HostValue::Mapping(a), HostValue::Mapping(b)) => {
                a.ptr_eq(b) || a.entries() == b.entries()
            }
            (HostValue::KeyValues(a), HostValue::KeyValues(b)) => a == b,
            (HostValue::Interface(a), HostValue::Interface(b)) => a == b,
            (HostValue::Table(a), HostValue::Table(b)) => a == b,
            (HostValue::LuaFunction(a), HostValue::LuaFunction(b)) => a == b,
            (HostValue::Custom(a), HostValue::Custom(b)) => Rc::ptr_eq(a, b),
            (HostValue::Opaque(a), HostValue::Opaque(b)) => a == b,
            (a, b) => match (int_of(a), int_of(b)) {
                (Some(x), Some(y)) => a.host_type() == b.host_type() && x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("Nil"),
            HostValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            HostValue::F32(v) => f.debug_tuple("F32").field(v).finish(),
            HostValue::F64(v) => f.debug_tuple("F64").field(v).finish(),
            HostValue::String(v) => f.debug_tuple("String").field(v).finish(),
            HostValue::Bytes(v) => f.debug_tuple("Bytes").field(v).finish(),
            HostValue::Sequence(seq) => f
                .debug_struct("Sequence")
                .field("elem", seq.elem_type())
                .field("items", &seq.to_vec())
                .finish(),
            HostValue::Mapping(map) => f
                .debug_struct("Mapping")
                .field("key", map.key_type())
                .field("value", map.value_type())
                .field("entries", &map.entries())
                .finish(),
            HostValue::KeyValues(pairs) => f.debug_tuple("KeyValues").field(pairs).finish(),
            HostValue::Interface(inner) => f.debug_tuple("Interface").field(inner).finish(),
            other => match int_of(other) {
                Some(value) => write!(f, "{}({})", other.kind_name(), value),
                None => write!(f, "{}", other),
            },
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("nil"),
            HostValue::Bool(v) => write!(f, "{v}"),
            HostValue::F32(v) => write!(f, "{v}"),
            HostValue::F64(v) => write!(f, "{v}"),
            HostValue::String(v) => f.write_str(v),
            HostValue::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
            HostValue::Object(object) => write!(f, "{}: {:p}", object.def().name, object.addr()),
            HostValue::Struct(value) => write!(f, "{} (by value)", value.struct_def().name),
            HostValue::Function(function) => write!(f, "host function {}", function.spec()),
            HostValue::Sequence(seq) => write!(f, "{} [{}]", self.host_type(), seq.len()),
            HostValue::Mapping(map) => write!(f, "{} [{}]", self.host_type(), map.len()),
            HostValue::KeyValues(pairs) => write!(f, "KeyValues [{}]", pairs.len()),
            HostValue::Interface(inner) => write!(f, "{inner}"),
            HostValue::Table(table) => write!(f, "table: {}", table.handle()),
            HostValue::LuaFunction(function) => write!(f, "function: {}", function.handle()),
            HostValue::Custom(_) => f.write_str("custom value"),
            HostValue::Opaque(name) => write!(f, "<{name}>"),
            other => match int_of(other) {
                Some(value) => write!(f, "{value}"),
                None => Ok(()),
            },
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => Usize,
    f32 => F32,
    f64 => F64,
    String => String,
    Object => Object,
    HostFunction => Function,
    Sequence => Sequence,
    Mapping => Mapping,
    Vec<KeyValue> => KeyValues,
    Table => Table,
    Function => LuaFunction,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<&[u8]> for HostValue {
    fn from(value: &[u8]) -> Self {
        HostValue::Bytes(value.to_vec())
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Nil
    }
}

impl<T: Described> From<Ptr<T>> for HostValue {
    fn from(ptr: Ptr<T>) -> Self {
        HostValue::Object(Object::new(ptr))
    }
}

/// Shared ownership wrapper for a host record.
///
/// Cloning a `Ptr` clones the handle, not the record: every clone, and every
/// runtime handle made from one, observes the same value.
pub struct Ptr<T>(pub(crate) Rc<RefCell<T>>);

impl<T> Ptr<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Default> Default for Ptr<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ptr").field(&*self.0.borrow()).finish()
    }
}

/// Type-erased [`Ptr`] to a reflected record.
#[derive(Clone)]
pub struct Object {
    cell: Rc<RefCell<dyn Reflect>>,
    any: Rc<dyn Any>,
    def: &'static StructDef,
}

impl Object {
    pub fn new<T: Described>(ptr: Ptr<T>) -> Self {
        let any: Rc<dyn Any> = ptr.0.clone();
        let cell: Rc<RefCell<dyn Reflect>> = ptr.0;
        Self {
            cell,
            any,
            def: T::describe(),
        }
    }

    pub fn def(&self) -> &'static StructDef {
        self.def
    }

    pub fn struct_type(&self) -> StructType {
        self.def.struct_type()
    }

    pub fn borrow(&self) -> Result<Ref<'_, dyn Reflect>, Error> {
        self.cell
            .try_borrow()
            .map_err(|_| Error::runtime(format!("{} is mutably borrowed", self.def.name)))
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, dyn Reflect>, Error> {
        self.cell
            .try_borrow_mut()
            .map_err(|_| Error::runtime(format!("{} is already borrowed", self.def.name)))
    }

    /// Recover the typed wrapper, if the record is a `T`.
    pub fn downcast<T: Described>(&self) -> Option<Ptr<T>> {
        self.any.clone().downcast::<RefCell<T>>().ok().map(Ptr)
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.any) as *const ()
    }
}

/// Shared ordered sequence with a declared element type.
#[derive(Clone)]
pub struct Sequence {
    elem: HostType,
    items: Rc<RefCell<Vec<HostValue>>>,
}

impl Sequence {
    pub fn new(elem: HostType, items: Vec<HostValue>) -> Self {
        Self {
            elem,
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn elem_type(&self) -> &HostType {
        &self.elem
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.items.borrow().get(index).cloned()
    }

    /// Replace an existing element. Returns `false` when `index` is out of range.
    pub fn set(&self, index: usize, value: HostValue) -> bool {
        match self.items.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn to_vec(&self) -> Vec<HostValue> {
        self.items.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Sequence) -> bool {
        Rc::ptr_eq(&self.items, &other.items)
    }
}

/// Key of a host mapping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    Int(i128),
    Str(String),
}

impl MapKey {
    pub fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        if let Some(int) = int_of(value) {
            return Ok(MapKey::Int(int));
        }
        match value {
            HostValue::Bool(b) => Ok(MapKey::Bool(*b)),
            HostValue::String(s) => Ok(MapKey::Str(s.clone())),
            HostValue::F32(f) if f.fract() == 0.0 => Ok(MapKey::Int(*f as i128)),
            HostValue::F64(f) if f.fract() == 0.0 => Ok(MapKey::Int(*f as i128)),
            HostValue::Interface(inner) => MapKey::from_host(inner),
            other => Err(ConversionError::new(other.kind_name(), "map key")),
        }
    }

    /// Render the key as a value of the mapping's declared key type.
    pub fn to_host(&self, ty: &HostType) -> HostValue {
        match (self, ty) {
            (MapKey::Int(i), HostType::Int(kind)) => int_value(*kind, *i),
            (MapKey::Int(i), HostType::Float(FloatKind::F32)) => HostValue::F32(*i as f32),
            (MapKey::Int(i), HostType::Float(FloatKind::F64)) => HostValue::F64(*i as f64),
            (MapKey::Int(i), _) => HostValue::I64(*i as i64),
            (MapKey::Bool(b), _) => HostValue::Bool(*b),
            (MapKey::Str(s), _) => HostValue::String(s.clone()),
        }
    }
}

/// Shared associative mapping with declared key and value types.
#[derive(Clone)]
pub struct Mapping {
    key: HostType,
    value: HostType,
    entries: Rc<RefCell<BTreeMap<MapKey, HostValue>>>,
}

impl Mapping {
    pub fn new(key: HostType, value: HostType, entries: BTreeMap<MapKey, HostValue>) -> Self {
        Self {
            key,
            value,
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    pub fn key_type(&self) -> &HostType {
        &self.key
    }

    pub fn value_type(&self) -> &HostType {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get(&self, key: &MapKey) -> Option<HostValue> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: MapKey, value: HostValue) -> Option<HostValue> {
        self.entries.borrow_mut().insert(key, value)
    }

    pub fn remove(&self, key: &MapKey) -> Option<HostValue> {
        self.entries.borrow_mut().remove(key)
    }

    pub fn entries(&self) -> Vec<(MapKey, HostValue)> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Mapping) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

/// Key of a [`KeyValue`] pair: a positional index or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => f.write_str(s),
        }
    }
}

impl From<Key> for HostValue {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(i) => HostValue::I64(i),
            Key::Str(s) => HostValue::String(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: Key,
    pub value: HostValue,
}
