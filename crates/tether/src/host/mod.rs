//! Host reflection model
//!
//! Type descriptors, tagged host values, record reflection and typed
//! conversions. Nothing in here touches the embedded runtime directly.

pub mod reflect;
pub mod typed;
pub mod types;
pub mod value;

pub use reflect::{struct_from_host, Described, Member, Reflect, StructDef};
pub use typed::{Bytes, HostTyped, IntoHostArgs, IntoHostValues, KeyValues, Variadic};
pub use types::{FloatKind, HostType, IntKind, StructType};
pub use value::{HostValue, Key, KeyValue, MapKey, Mapping, Object, Ptr, Sequence};
