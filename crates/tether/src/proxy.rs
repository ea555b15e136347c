//! Proxy Handles
//!
//! [`Table`] and [`Function`] hold a strong reference to a runtime value so
//! the host can keep using it after the call that produced it returns. The
//! reference lives until `release` is called; dropping the proxy does not
//! release it, and any use after release fails with
//! [`Error::UseAfterRelease`].

use crate::bridge::Bridge;
use crate::convert::{push_strict, table_to_key_values, to_host, PushValue};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::host::{HostValue, IntoHostArgs, KeyValue};
use mlua::{FromLua, IntoLua, Lua, MultiValue, Value};
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

/// Shared machinery of both proxy kinds.
#[derive(Clone)]
struct ProxyRef {
    handle: Handle,
    bridge: Rc<Bridge>,
    kind: &'static str,
}

impl ProxyRef {
    fn new<'lua>(lua: &'lua Lua, bridge: &Rc<Bridge>, value: impl IntoLua<'lua>, kind: &'static str) -> Result<Self> {
        let key = lua.create_registry_value(value)?;
        let handle = bridge.proxies.borrow_mut().insert(key);
        trace!(%handle, kind, "proxy created");
        Ok(Self {
            handle,
            bridge: Rc::clone(bridge),
            kind,
        })
    }

    fn resolve<'lua, T: FromLua<'lua>>(&self, lua: &'lua Lua) -> Result<T> {
        let proxies = self.bridge.proxies.borrow();
        let key = proxies
            .get(self.handle)
            .ok_or(Error::UseAfterRelease { kind: self.kind })?;
        Ok(lua.registry_value::<T>(key)?)
    }

    fn is_released(&self) -> bool {
        !self.bridge.proxies.borrow().contains(self.handle)
    }

    fn release(&self) {
        let Some(key) = self.bridge.proxies.borrow_mut().remove(self.handle) else {
            return;
        };
        trace!(handle = %self.handle, kind = self.kind, "proxy released");
        // A closed runtime already dropped every registry slot.
        if let Ok(lua) = self.bridge.lua() {
            if let Err(err) = lua.remove_registry_value(key) {
                warn!(%err, kind = self.kind, "failed to drop proxy reference");
            }
        }
    }
}

impl PartialEq for ProxyRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && Rc::ptr_eq(&self.bridge, &other.bridge)
    }
}

/// Host handle to a runtime table.
#[derive(Clone, PartialEq)]
pub struct Table(ProxyRef);

impl Table {
    pub(crate) fn new<'lua>(lua: &'lua Lua, bridge: &Rc<Bridge>, table: mlua::Table<'lua>) -> Result<Self> {
        ProxyRef::new(lua, bridge, table, "table").map(Table)
    }

    pub fn handle(&self) -> Handle {
        self.0.handle
    }

    /// Read `table[key]`, converted with no type hint.
    pub fn get(&self, key: impl Into<HostValue>) -> Result<HostValue> {
        let lua = self.0.bridge.lua()?;
        let table: mlua::Table = self.0.resolve(&lua)?;
        let key = self.key(&lua, &key.into())?;
        let value: Value = table.get(key)?;
        to_host(&lua, &self.0.bridge, value, None)
    }

    /// Write `table[key] = value`.
    ///
    /// The table is left unchanged when the key kind is unsupported or the
    /// value has no runtime representation.
    pub fn set(&self, key: impl Into<HostValue>, value: impl Into<HostValue>) -> Result<()> {
        let lua = self.0.bridge.lua()?;
        let table: mlua::Table = self.0.resolve(&lua)?;
        let key = self.key(&lua, &key.into())?;
        let value = push_strict(&lua, &self.0.bridge, &value.into())?;
        table.set(key, value)?;
        Ok(())
    }

    /// Length of the positional part (`#t`, without metamethods).
    pub fn len(&self) -> Result<usize> {
        let lua = self.0.bridge.lua()?;
        let table: mlua::Table = self.0.resolve(&lua)?;
        Ok(table.raw_len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every entry as ordered key/value pairs.
    pub fn to_key_values(&self) -> Result<Vec<KeyValue>> {
        let lua = self.0.bridge.lua()?;
        let table: mlua::Table = self.0.resolve(&lua)?;
        table_to_key_values(&lua, &self.0.bridge, table)
    }

    /// Drop the strong reference. Calling it again does nothing.
    pub fn release(&self) {
        self.0.release();
    }

    pub fn is_released(&self) -> bool {
        self.0.is_released()
    }

    fn key<'lua>(&self, lua: &'lua Lua, key: &HostValue) -> Result<Value<'lua>> {
        let value = match key {
            HostValue::Nil => None,
            HostValue::F32(f) if f.is_nan() => None,
            HostValue::F64(f) if f.is_nan() => None,
            other => push_strict(lua, &self.0.bridge, other).ok(),
        };
        match value {
            Some(Value::Nil) | None => Err(Error::KeyType {
                key_type: key.kind_name(),
            }),
            Some(value) => Ok(value),
        }
    }
}

impl PushValue for Table {
    fn push_value<'lua>(&self, lua: &'lua Lua) -> Result<Value<'lua>> {
        Ok(Value::Table(self.0.resolve(lua)?))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("handle", &self.0.handle)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Host handle to a runtime function.
#[derive(Clone, PartialEq)]
pub struct Function(ProxyRef);

impl Function {
    pub(crate) fn new<'lua>(lua: &'lua Lua, bridge: &Rc<Bridge>, function: mlua::Function<'lua>) -> Result<Self> {
        ProxyRef::new(lua, bridge, function, "function").map(Function)
    }

    pub fn handle(&self) -> Handle {
        self.0.handle
    }

    /// Call the function. Results come back with no type hint: numbers as
    /// `f64`, tables and functions as new proxies.
    pub fn call(&self, args: impl IntoHostArgs) -> Result<Vec<HostValue>> {
        let lua = self.0.bridge.lua()?;
        let function: mlua::Function = self.0.resolve(&lua)?;

        let args = args
            .into_host_args()
            .iter()
            .map(|arg| push_strict(&lua, &self.0.bridge, arg))
            .collect::<Result<Vec<_>>>()?;
        let results: MultiValue = function.call(MultiValue::from_vec(args))?;

        results
            .into_iter()
            .map(|value| to_host(&lua, &self.0.bridge, value, None))
            .collect()
    }

    /// Diagnostic representation; does not call the function.
    pub fn describe(&self) -> Result<String> {
        let lua = self.0.bridge.lua()?;
        let function: mlua::Function = self.0.resolve(&lua)?;
        let info = function.info();
        let source = info.short_src.unwrap_or_else(|| "?".to_string());
        let line = info.line_defined.unwrap_or(0);
        Ok(format!(
            "function: {:p} ({} {}:{})",
            function.to_pointer(),
            info.what,
            source,
            line
        ))
    }

    pub fn release(&self) {
        self.0.release();
    }

    pub fn is_released(&self) -> bool {
        self.0.is_released()
    }
}

impl PushValue for Function {
    fn push_value<'lua>(&self, lua: &'lua Lua) -> Result<Value<'lua>> {
        Ok(Value::Function(self.0.resolve(lua)?))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("handle", &self.0.handle)
            .field("released", &self.is_released())
            .finish()
    }
}
