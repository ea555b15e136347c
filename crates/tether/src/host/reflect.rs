//! Runtime reflection for host records
//!
//! Rust has no runtime field reflection, so records opt in through
//! [`reflect_struct!`], which generates a static [`StructDef`] and name-based
//! accessors. The struct registrar flattens the definition once; the
//! accessors are what the flattened entries dispatch to.

use crate::error::{ConversionError, Result};
use crate::host::typed::HostTyped;
use crate::host::types::{HostType, StructType};
use crate::host::value::{HostValue, Object};
use std::any::{Any, TypeId};

/// Object-safe access to a reflected record.
///
/// Member names are the exposed names declared in [`reflect_struct!`].
pub trait Reflect: Any {
    fn struct_def(&self) -> &'static StructDef;

    /// Read a data field.
    fn field(&self, name: &str) -> Option<HostValue>;

    /// Write a data field. The field is left untouched when conversion fails.
    fn set_field(&mut self, name: &str, value: HostValue) -> Option<Result<(), ConversionError>>;

    /// Borrow a composite member.
    fn nested(&self, name: &str) -> Option<&dyn Reflect>;

    fn nested_mut(&mut self, name: &str) -> Option<&mut dyn Reflect>;

    /// Invoke a method with already converted arguments.
    fn call_method(&mut self, name: &str, args: Vec<HostValue>) -> Option<Result<Vec<HostValue>>>;

    fn clone_boxed(&self) -> Box<dyn Reflect>;

    /// Move a by-value record behind a fresh shared wrapper.
    fn into_object(self: Box<Self>) -> Object;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Reflect> {
    fn clone(&self) -> Self {
        (**self).clone_boxed()
    }
}

/// Statically described record.
///
/// [`reflect_struct!`] implements this together with [`Reflect`] and [`HostTyped`].
pub trait Described: Reflect + HostTyped + Clone + Sized {
    fn describe() -> &'static StructDef;
}

/// Static description of a record's members.
#[derive(Debug)]
pub struct StructDef {
    pub name: &'static str,
    pub type_id: fn() -> TypeId,
    pub members: &'static [Member],
}

impl StructDef {
    pub fn struct_type(&self) -> StructType {
        StructType::new(self.name, (self.type_id)())
    }
}

/// One declared member of a record.
#[derive(Debug)]
pub enum Member {
    Field {
        name: &'static str,
        ty: fn() -> HostType,
    },
    /// Composite member whose own members are flattened under `name`.
    Composite {
        name: &'static str,
        def: fn() -> &'static StructDef,
    },
    Method {
        name: &'static str,
        params: fn() -> Vec<HostType>,
        returns: fn() -> Vec<HostType>,
    },
}

impl Member {
    pub fn name(&self) -> &'static str {
        match self {
            Member::Field { name, .. }
            | Member::Composite { name, .. }
            | Member::Method { name, .. } => name,
        }
    }
}

/// Convert a record held in a host value back into `T`.
///
/// Accepts the record by value, or a shared wrapper around one (the record is cloned).
pub fn struct_from_host<T: Described>(value: HostValue) -> Result<T, ConversionError> {
    let expected = T::describe().name;
    match value {
        HostValue::Struct(boxed) => boxed
            .as_any()
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ConversionError::new(boxed.struct_def().name, expected)),
        HostValue::Object(object) => match object.downcast::<T>() {
            Some(ptr) => Ok(ptr.borrow().clone()),
            None => Err(ConversionError::new(object.def().name, expected)),
        },
        HostValue::Interface(inner) => struct_from_host(*inner),
        other => Err(ConversionError::new(other.kind_name(), expected)),
    }
}

/// Implement reflection for a record type.
///
/// Sections must appear in the order `fields`, `nested`, `methods`; each is optional.
/// Names on the left are the exposed names; `nested` members are flattened with
/// the configured separator (`P1` + `X` becomes `P1_X`).
///
/// # Example
/// ```ignore
/// #[derive(Clone, Default)]
/// struct Point { x: i64, y: i64 }
///
/// impl Point {
///     fn sum_xy(&self) -> i64 { self.x + self.y }
/// }
///
/// reflect_struct! {
///     Point as "Point" {
///         fields { "X" => x: i64, "Y" => y: i64 }
///         methods { "SumXY" => sum_xy() -> i64 }
///     }
/// }
/// ```
#[macro_export]
macro_rules! reflect_struct {
    (
        $ty:ty as $type_name:literal {
            $(fields { $($fname:literal => $field:ident : $fty:ty),* $(,)? })?
            $(nested { $($nname:literal => $nfield:ident : $nty:ty),* $(,)? })?
            $(methods { $($mname:literal => $method:ident ( $($arg:ident : $aty:ty),* ) $(-> $ret:ty)?),* $(,)? })?
        }
    ) => {
        impl $crate::Described for $ty {
            fn describe() -> &'static $crate::StructDef {
                static DEF: $crate::StructDef = $crate::StructDef {
                    name: $type_name,
                    type_id: ::std::any::TypeId::of::<$ty>,
                    members: &[
                        $($($crate::Member::Field {
                            name: $fname,
                            ty: <$fty as $crate::HostTyped>::host_type,
                        },)*)?
                        $($($crate::Member::Composite {
                            name: $nname,
                            def: <$nty as $crate::Described>::describe,
                        },)*)?
                        $($($crate::Member::Method {
                            name: $mname,
                            params: || ::std::vec![$(<$aty as $crate::HostTyped>::host_type()),*],
                            returns: || $crate::__reflect_returns!($($ret)?),
                        },)*)?
                    ],
                };
                &DEF
            }
        }

        impl $crate::Reflect for $ty {
            fn struct_def(&self) -> &'static $crate::StructDef {
                <$ty as $crate::Described>::describe()
            }

            fn field(&self, name: &str) -> ::std::option::Option<$crate::HostValue> {
                match name {
                    $($($fname => ::std::option::Option::Some(
                        <$fty as $crate::HostTyped>::into_host(::std::clone::Clone::clone(&self.$field)),
                    ),)*)?
                    _ => ::std::option::Option::None,
                }
            }

            #[allow(unused_variables)]
            fn set_field(
                &mut self,
                name: &str,
                value: $crate::HostValue,
            ) -> ::std::option::Option<::std::result::Result<(), $crate::ConversionError>> {
                match name {
                    $($($fname => ::std::option::Option::Some(
                        <$fty as $crate::HostTyped>::from_host(value).map(|converted| {
                            self.$field = converted;
                        }),
                    ),)*)?
                    _ => ::std::option::Option::None,
                }
            }

            fn nested(&self, name: &str) -> ::std::option::Option<&dyn $crate::Reflect> {
                match name {
                    $($($nname => ::std::option::Option::Some(&self.$nfield as &dyn $crate::Reflect),)*)?
                    _ => ::std::option::Option::None,
                }
            }

            fn nested_mut(&mut self, name: &str) -> ::std::option::Option<&mut dyn $crate::Reflect> {
                match name {
                    $($($nname => ::std::option::Option::Some(&mut self.$nfield as &mut dyn $crate::Reflect),)*)?
                    _ => ::std::option::Option::None,
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn call_method(
                &mut self,
                name: &str,
                args: ::std::vec::Vec<$crate::HostValue>,
            ) -> ::std::option::Option<$crate::Result<::std::vec::Vec<$crate::HostValue>>> {
                let mut args = args.into_iter();
                match name {
                    $($($mname => ::std::option::Option::Some(
                        (|| -> $crate::Result<::std::vec::Vec<$crate::HostValue>> {
                            $(
                                let $arg = <$aty as $crate::HostTyped>::from_host(
                                    args.next().unwrap_or($crate::HostValue::Nil),
                                )?;
                            )*
                            $crate::IntoHostValues::into_host_values(self.$method($($arg),*))
                        })(),
                    ),)*)?
                    _ => ::std::option::Option::None,
                }
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::Reflect> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn into_object(self: ::std::boxed::Box<Self>) -> $crate::Object {
                $crate::Object::new($crate::Ptr::new(*self))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl $crate::HostTyped for $ty {
            fn host_type() -> $crate::HostType {
                $crate::HostType::Struct(<$ty as $crate::Described>::describe().struct_type())
            }

            fn from_host(
                value: $crate::HostValue,
            ) -> ::std::result::Result<Self, $crate::ConversionError> {
                $crate::struct_from_host::<$ty>(value)
            }

            fn into_host(self) -> $crate::HostValue {
                $crate::HostValue::Struct(::std::boxed::Box::new(self))
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __reflect_returns {
    () => {
        ::std::vec::Vec::new()
    };
    ($ret:ty) => {
        <$ret as $crate::IntoHostValues>::return_types()
    };
}
