//! Tether
//!
//! Bridge between host values and an embedded Lua runtime.
//!
//! ## Architecture
//!
//! - **References:** host records, sequences, mappings and functions cross
//!   into scripts as userdata handles backed by a per-runtime registry.
//! - **Proxies:** runtime tables and functions come back as [`Table`] and
//!   [`Function`] handles that keep the runtime value alive until released.
//! - **Structs:** records described with [`reflect_struct!`] expose their
//!   fields and methods, with nested records flattened into one namespace.
//! - **Functions:** typed closures are converted argument by argument; raw
//!   functions drive the call context through [`State`].
//!
//! ```
//! use tether::{ScriptRuntime, Variadic};
//!
//! let runtime = ScriptRuntime::new()?;
//! runtime.register_function("math2.sum", |values: Variadic<i64>| values.iter().sum::<i64>())?;
//! let results = runtime.evaluate("return math2.sum(1, 2, 3)")?;
//! assert_eq!(results[0].as_i64(), Some(6));
//! # Ok::<(), tether::Error>(())
//! ```

mod bridge;
pub mod convert;
pub mod error;
pub mod function;
pub mod handle;
pub mod host;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod settings;
pub mod state;
pub mod structs;
mod userdata;

pub use convert::PushValue;
pub use error::{ConversionError, Error, RegistrationError, Result};
pub use function::{CallableSpec, HostFunction, IntoHostFunction};
pub use handle::Handle;
pub use host::{
    struct_from_host, Bytes, Described, FloatKind, HostType, HostTyped, HostValue, IntKind,
    IntoHostArgs, IntoHostValues, Key, KeyValue, KeyValues, MapKey, Mapping, Member, Object, Ptr,
    Reflect, Sequence, StructDef, StructType, Variadic,
};
pub use proxy::{Function, Table};
pub use runtime::ScriptRuntime;
pub use settings::Settings;
pub use state::{ReturnCount, RuntimeType, State};
pub use structs::{Access, FieldEntry, StructLayout};

pub use mlua;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
