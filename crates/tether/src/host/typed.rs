//! Typed conversion between Rust types and [`HostValue`]
//!
//! [`HostTyped`] is what lets a plain Rust closure be registered as a host
//! function: parameter and return descriptors come from the Rust types, and
//! values are converted at the boundary.

use crate::error::{ConversionError, Error, Result};
use crate::function::HostFunction;
use crate::host::reflect::Described;
use crate::host::types::{FloatKind, HostType, IntKind};
use crate::host::value::{HostValue, KeyValue, MapKey, Mapping, Object, Ptr, Sequence};
use crate::proxy::{Function, Table};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// A Rust type with a fixed host type descriptor.
pub trait HostTyped: Sized {
    fn host_type() -> HostType;
    fn from_host(value: HostValue) -> Result<Self, ConversionError>;
    fn into_host(self) -> HostValue;
}

fn mismatch<T: HostTyped>(value: &HostValue) -> ConversionError {
    ConversionError::new(value.kind_name(), T::host_type().name())
}

impl HostTyped for HostValue {
    fn host_type() -> HostType {
        HostType::Interface
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        Ok(value)
    }

    fn into_host(self) -> HostValue {
        self
    }
}

impl HostTyped for bool {
    fn host_type() -> HostType {
        HostType::Bool
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        value.as_bool().ok_or_else(|| mismatch::<Self>(&value))
    }

    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }
}

macro_rules! impl_host_typed_int {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl HostTyped for $ty {
                fn host_type() -> HostType {
                    HostType::Int(IntKind::$kind)
                }

                fn from_host(value: HostValue) -> Result<Self, ConversionError> {
                    match value {
                        HostValue::$kind(v) => Ok(v),
                        HostValue::F32(v) => Ok(v as $ty),
                        HostValue::F64(v) => Ok(v as $ty),
                        ref other => match other.as_i64() {
                            Some(v) => Ok(v as $ty),
                            None => Err(mismatch::<Self>(other)),
                        },
                    }
                }

                fn into_host(self) -> HostValue {
                    HostValue::$kind(self)
                }
            }
        )*
    };
}

impl_host_typed_int! {
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
}

impl HostTyped for f32 {
    fn host_type() -> HostType {
        HostType::Float(FloatKind::F32)
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| mismatch::<Self>(&value))
    }

    fn into_host(self) -> HostValue {
        HostValue::F32(self)
    }
}

impl HostTyped for f64 {
    fn host_type() -> HostType {
        HostType::Float(FloatKind::F64)
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        value.as_f64().ok_or_else(|| mismatch::<Self>(&value))
    }

    fn into_host(self) -> HostValue {
        HostValue::F64(self)
    }
}

impl HostTyped for String {
    fn host_type() -> HostType {
        HostType::String
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::String(s) => Ok(s),
            HostValue::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|_| ConversionError::new("Bytes (invalid UTF-8)", "String")),
            HostValue::Interface(inner) => String::from_host(*inner),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn into_host(self) -> HostValue {
        HostValue::String(self)
    }
}

/// `None` is nil; any other value converts as `T`.
impl<T: HostTyped> HostTyped for Option<T> {
    fn host_type() -> HostType {
        HostType::Optional(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Nil => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }

    fn into_host(self) -> HostValue {
        self.map(T::into_host).unwrap_or(HostValue::Nil)
    }
}

/// Byte string that keeps every byte as-is, embedded zeros included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl HostTyped for Bytes {
    fn host_type() -> HostType {
        HostType::Bytes
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Bytes(bytes) => Ok(Bytes(bytes)),
            HostValue::String(s) => Ok(Bytes(s.into_bytes())),
            HostValue::Interface(inner) => Bytes::from_host(*inner),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn into_host(self) -> HostValue {
        HostValue::Bytes(self.0)
    }
}

impl<T: HostTyped> HostTyped for Vec<T> {
    fn host_type() -> HostType {
        HostType::Sequence(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Sequence(seq) => seq.to_vec().into_iter().map(T::from_host).collect(),
            HostValue::Interface(inner) => Self::from_host(*inner),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn into_host(self) -> HostValue {
        let items = self.into_iter().map(T::into_host).collect();
        HostValue::Sequence(Sequence::new(T::host_type(), items))
    }
}

fn mapping_from_host<K, V, M>(value: HostValue) -> Result<M, ConversionError>
where
    K: HostTyped,
    V: HostTyped,
    M: FromIterator<(K, V)>,
{
    match value {
        HostValue::Mapping(map) => {
            let key_type = K::host_type();
            map.entries()
                .into_iter()
                .map(|(key, value)| Ok((K::from_host(key.to_host(&key_type))?, V::from_host(value)?)))
                .collect()
        }
        HostValue::Interface(inner) => mapping_from_host(*inner),
        other => Err(ConversionError::new(
            other.kind_name(),
            HostType::Mapping(Box::new(K::host_type()), Box::new(V::host_type())).name(),
        )),
    }
}

fn mapping_into_host<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> HostValue
where
    K: HostTyped,
    V: HostTyped,
{
    let mut entries = BTreeMap::new();
    for (key, value) in pairs {
        let key = key.into_host();
        match MapKey::from_host(&key) {
            Ok(map_key) => {
                entries.insert(map_key, value.into_host());
            }
            Err(err) => tracing::warn!(%err, "dropping mapping entry with unsupported key"),
        }
    }
    HostValue::Mapping(Mapping::new(K::host_type(), V::host_type(), entries))
}

impl<K, V> HostTyped for HashMap<K, V>
where
    K: HostTyped + Eq + Hash,
    V: HostTyped,
{
    fn host_type() -> HostType {
        HostType::Mapping(Box::new(K::host_type()), Box::new(V::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        mapping_from_host(value)
    }

    fn into_host(self) -> HostValue {
        mapping_into_host(self)
    }
}

impl<K, V> HostTyped for BTreeMap<K, V>
where
    K: HostTyped + Ord,
    V: HostTyped,
{
    fn host_type() -> HostType {
        HostType::Mapping(Box::new(K::host_type()), Box::new(V::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        mapping_from_host(value)
    }

    fn into_host(self) -> HostValue {
        mapping_into_host(self)
    }
}

impl<T: Described> HostTyped for Ptr<T> {
    fn host_type() -> HostType {
        HostType::Pointer(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Object(object) => object
                .downcast::<T>()
                .ok_or_else(|| ConversionError::new(object.def().name, Self::host_type().name())),
            HostValue::Struct(boxed) => T::from_host(HostValue::Struct(boxed)).map(Ptr::new),
            HostValue::Interface(inner) => Self::from_host(*inner),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn into_host(self) -> HostValue {
        HostValue::Object(Object::new(self))
    }
}

/// Ordered key/value pairs converted from a runtime table.
///
/// Positional entries come first, then named entries in the runtime's
/// iteration order, which is not guaranteed stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValues(pub Vec<KeyValue>);

impl KeyValues {
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.0.iter().find_map(|pair| match &pair.key {
            crate::host::value::Key::Str(name) if name == key => Some(&pair.value),
            _ => None,
        })
    }
}

impl HostTyped for KeyValues {
    fn host_type() -> HostType {
        HostType::KeyValues
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::KeyValues(pairs) => Ok(KeyValues(pairs)),
            HostValue::Interface(inner) => Self::from_host(*inner),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn into_host(self) -> HostValue {
        HostValue::KeyValues(self.0)
    }
}

/// Trailing parameter collecting every remaining argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> std::ops::Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T: HostTyped> HostTyped for Variadic<T> {
    fn host_type() -> HostType {
        HostType::Variadic(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> Result<Self, ConversionError> {
        Vec::<T>::from_host(value).map(Variadic)
    }

    fn into_host(self) -> HostValue {
        self.0.into_host()
    }
}

macro_rules! impl_host_typed_handle {
    ($($ty:ty => $variant:ident, $kind:ident);* $(;)?) => {
        $(
            impl HostTyped for $ty {
                fn host_type() -> HostType {
                    HostType::$kind
                }

                fn from_host(value: HostValue) -> Result<Self, ConversionError> {
                    match value {
                        HostValue::$variant(inner) => Ok(inner),
                        HostValue::Interface(inner) => Self::from_host(*inner),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                fn into_host(self) -> HostValue {
                    HostValue::$variant(self)
                }
            }
        )*
    };
}

impl_host_typed_handle! {
    Table => Table, Table;
    Function => LuaFunction, LuaFunction;
    HostFunction => Function, Function;
}

/// Values a host function returns.
///
/// Implemented for every [`HostTyped`] type, for tuples of them, for `()`
/// and for `Result`, whose error is raised in the runtime.
pub trait IntoHostValues {
    fn return_types() -> Vec<HostType>;
    fn into_host_values(self) -> Result<Vec<HostValue>>;
}

impl IntoHostValues for () {
    fn return_types() -> Vec<HostType> {
        Vec::new()
    }

    fn into_host_values(self) -> Result<Vec<HostValue>> {
        Ok(Vec::new())
    }
}

impl<T: HostTyped> IntoHostValues for T {
    fn return_types() -> Vec<HostType> {
        vec![T::host_type()]
    }

    fn into_host_values(self) -> Result<Vec<HostValue>> {
        Ok(vec![self.into_host()])
    }
}

impl<T, E> IntoHostValues for std::result::Result<T, E>
where
    T: IntoHostValues,
    E: fmt::Display,
{
    fn return_types() -> Vec<HostType> {
        T::return_types()
    }

    fn into_host_values(self) -> Result<Vec<HostValue>> {
        match self {
            Ok(value) => value.into_host_values(),
            Err(err) => Err(Error::runtime(err.to_string())),
        }
    }
}

macro_rules! impl_into_host_values_tuple {
    ($($name:ident),+) => {
        impl<$($name: HostTyped),+> IntoHostValues for ($($name,)+) {
            fn return_types() -> Vec<HostType> {
                vec![$($name::host_type()),+]
            }

            #[allow(non_snake_case)]
            fn into_host_values(self) -> Result<Vec<HostValue>> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_host()),+])
            }
        }
    };
}

impl_into_host_values_tuple!(A, B);
impl_into_host_values_tuple!(A, B, C);
impl_into_host_values_tuple!(A, B, C, D);
impl_into_host_values_tuple!(A, B, C, D, E);
impl_into_host_values_tuple!(A, B, C, D, E, F);

/// Argument lists for calls into the runtime.
pub trait IntoHostArgs {
    fn into_host_args(self) -> Vec<HostValue>;
}

impl IntoHostArgs for () {
    fn into_host_args(self) -> Vec<HostValue> {
        Vec::new()
    }
}

impl IntoHostArgs for Vec<HostValue> {
    fn into_host_args(self) -> Vec<HostValue> {
        self
    }
}

macro_rules! impl_into_host_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: Into<HostValue>),+> IntoHostArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_host_args(self) -> Vec<HostValue> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_into_host_args_tuple!(A);
impl_into_host_args_tuple!(A, B);
impl_into_host_args_tuple!(A, B, C);
impl_into_host_args_tuple!(A, B, C, D);
impl_into_host_args_tuple!(A, B, C, D, E);
impl_into_host_args_tuple!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_round_trip() {
        assert_eq!(u64::from_host(u64::MAX.into_host()), Ok(u64::MAX));
        assert_eq!(i8::from_host(HostValue::I8(-5)), Ok(-5));
        assert_eq!(i32::from_host(HostValue::F64(7.9)), Ok(7));
        assert!(i32::from_host(HostValue::from("7")).is_err());
    }

    #[test]
    fn test_string_keeps_embedded_zero() {
        let text = String::from("a\0b");
        assert_eq!(String::from_host(text.clone().into_host()), Ok(text));
        let bytes = Bytes(vec![0, 159, 146, 150]);
        assert_eq!(Bytes::from_host(bytes.clone().into_host()), Ok(bytes));
    }

    #[test]
    fn test_vec_and_map_descriptors() {
        assert_eq!(
            Vec::<i32>::host_type(),
            HostType::Sequence(Box::new(HostType::Int(IntKind::I32)))
        );
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 1u8);
        let value = scores.clone().into_host();
        assert_eq!(HashMap::<String, u8>::from_host(value), Ok(scores));
    }

    #[test]
    fn test_variadic_collects_sequence() {
        let seq = vec![1i64, 2, 3].into_host();
        let rest = Variadic::<i64>::from_host(seq).unwrap();
        assert_eq!(rest.iter().sum::<i64>(), 6);
        assert_eq!(
            Variadic::<i64>::host_type(),
            HostType::Variadic(Box::new(HostType::Int(IntKind::I64)))
        );
    }

    #[test]
    fn test_return_descriptors() {
        assert!(<()>::return_types().is_empty());
        assert_eq!(<(i32, String)>::return_types().len(), 2);
        assert_eq!(
            <std::result::Result<bool, String>>::return_types(),
            vec![HostType::Bool]
        );
        let failed: std::result::Result<bool, String> = Err("nope".into());
        assert_eq!(failed.into_host_values().unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_host_args_from_tuple() {
        let args = ("s", 2i32, true).into_host_args();
        assert_eq!(
            args,
            vec![HostValue::from("s"), HostValue::I32(2), HostValue::Bool(true)]
        );
    }
}
