//! Opaque handle values
//!
//! A [`HostRef`] is what a script sees for a host object, sequence, mapping,
//! key/value list or host function. It carries only a registry handle; every
//! metamethod looks the payload up and dispatches on its kind. Dropping the
//! handle (the runtime collected it, or the runtime closed) releases the
//! registry entry.

use crate::bridge::Bridge;
use crate::convert::{push_host, to_host};
use crate::error::{Error, Result};
use crate::function::{invoke, push_results};
use crate::handle::Handle;
use crate::host::{HostValue, Key, KeyValue, MapKey, Mapping, Object};
use crate::state::RuntimeType;
use crate::structs::{Access, FieldEntry};
use mlua::{AnyUserData, Lua, MetaMethod, MultiValue, UserData, UserDataMethods, Value};
use std::rc::Rc;
use tracing::warn;

pub(crate) struct HostRef {
    handle: Handle,
    bridge: Rc<Bridge>,
}

impl HostRef {
    pub(crate) fn new(handle: Handle, bridge: Rc<Bridge>) -> Self {
        Self { handle, bridge }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn bridge(&self) -> &Rc<Bridge> {
        &self.bridge
    }

    fn payload(&self) -> Result<HostValue> {
        self.bridge
            .references
            .lookup(self.handle)
            .ok_or(Error::NotRegistered {
                handle: self.handle,
            })
    }

    fn index<'lua>(&self, lua: &'lua Lua, key: Value<'lua>) -> Result<Value<'lua>> {
        match self.payload()? {
            HostValue::Object(object) => {
                let entry = self.member(&object, &key)?;
                if entry.is_method() {
                    let method = bound_method(lua, &self.bridge, object, entry)?;
                    return Ok(Value::Function(method));
                }
                let value = entry.read(&object)?;
                self.push_member(lua, entry.exposed_name(), &value)
            }
            HostValue::Sequence(seq) => {
                let index = sequence_index(&key, seq.len())?;
                let value = seq.get(index).unwrap_or(HostValue::Nil);
                self.push_member(lua, "sequence element", &value)
            }
            HostValue::Mapping(map) => {
                let key = self.map_key(lua, &map, key)?;
                match map.get(&key) {
                    Some(value) => self.push_member(lua, "mapping value", &value),
                    None => Ok(Value::Nil),
                }
            }
            HostValue::KeyValues(pairs) => {
                let Some(key) = key_of(&key) else {
                    return Ok(Value::Nil);
                };
                match pairs.iter().find(|pair| pair.key == key) {
                    Some(KeyValue { value, .. }) => self.push_member(lua, "key/value entry", value),
                    None => Ok(Value::Nil),
                }
            }
            other => Err(Error::Unsupported {
                kind: other.kind_name(),
                operation: "indexed",
            }),
        }
    }

    fn new_index<'lua>(&self, lua: &'lua Lua, key: Value<'lua>, value: Value<'lua>) -> Result<()> {
        match self.payload()? {
            HostValue::Object(object) => {
                let entry = self.member(&object, &key)?;
                let Access::Field { ty, .. } = entry.access() else {
                    return Err(Error::MethodAssignment {
                        type_name: object.def().name.to_string(),
                        name: entry.exposed_name().to_string(),
                    });
                };
                let value = to_host(lua, &self.bridge, value, Some(ty))?;
                entry.write(&object, value)
            }
            HostValue::Sequence(seq) => {
                let index = sequence_index(&key, seq.len())?;
                let value = to_host(lua, &self.bridge, value, Some(seq.elem_type()))?;
                seq.set(index, value);
                Ok(())
            }
            HostValue::Mapping(map) => {
                let key = self.map_key(lua, &map, key)?;
                if let Value::Nil = value {
                    map.remove(&key);
                } else {
                    let value = to_host(lua, &self.bridge, value, Some(map.value_type()))?;
                    map.insert(key, value);
                }
                Ok(())
            }
            other => Err(Error::Unsupported {
                kind: other.kind_name(),
                operation: "assigned to",
            }),
        }
    }

    fn len(&self) -> Result<usize> {
        match self.payload()? {
            HostValue::Sequence(seq) => Ok(seq.len()),
            HostValue::Mapping(map) => Ok(map.len()),
            HostValue::KeyValues(pairs) => Ok(pairs.len()),
            other => Err(Error::Unsupported {
                kind: other.kind_name(),
                operation: "measured",
            }),
        }
    }

    fn call<'lua>(&self, lua: &'lua Lua, args: MultiValue<'lua>) -> mlua::Result<MultiValue<'lua>> {
        match self.payload().map_err(Error::into_lua)? {
            HostValue::Function(function) => invoke(lua, &self.bridge, "anonymous function", &function, args),
            other => Err(Error::Unsupported {
                kind: other.kind_name(),
                operation: "called",
            }
            .into_lua()),
        }
    }

    fn describe(&self) -> String {
        match self.payload() {
            Ok(payload) => format!("{}: {}", payload.kind_name(), self.handle),
            Err(_) => format!("released reference: {}", self.handle),
        }
    }

    /// Resolve a member name through the record's flattened layout.
    fn member(&self, object: &Object, key: &Value<'_>) -> Result<Rc<FieldEntry>> {
        let type_name = object.def().name;
        let name = match key {
            Value::String(name) => String::from_utf8_lossy(name.as_bytes()).into_owned(),
            other => {
                return Err(Error::KeyType {
                    key_type: format!("{} (member of {type_name})", RuntimeType::of(other)),
                })
            }
        };
        let layout = self.bridge.layout(object.def())?;
        layout.entry(&name).ok_or_else(|| Error::UnknownMember {
            type_name: type_name.to_string(),
            name,
        })
    }

    fn map_key<'lua>(&self, lua: &'lua Lua, map: &Mapping, key: Value<'lua>) -> Result<MapKey> {
        let key = to_host(lua, &self.bridge, key, Some(map.key_type()))?;
        Ok(MapKey::from_host(&key)?)
    }

    fn push_member<'lua>(&self, lua: &'lua Lua, what: &str, value: &HostValue) -> Result<Value<'lua>> {
        let (pushed, converted) = push_host(lua, &self.bridge, value)?;
        if !converted {
            warn!(member = what, kind = %value.kind_name(), "value has no runtime representation; read as nil");
        }
        Ok(pushed)
    }

    /// Whether `data` is a handle to the same host record as `object`.
    fn is_same_object(bridge: &Rc<Bridge>, data: &AnyUserData<'_>, object: &Object) -> bool {
        let Ok(other) = data.borrow::<HostRef>() else {
            return false;
        };
        match bridge.references.lookup(other.handle) {
            Some(HostValue::Object(candidate)) => candidate.ptr_eq(object),
            _ => false,
        }
    }

    fn same_payload(&self, other: &HostRef) -> bool {
        match (self.payload(), other.payload()) {
            (Ok(HostValue::Object(a)), Ok(HostValue::Object(b))) => a.ptr_eq(&b),
            (Ok(HostValue::Sequence(a)), Ok(HostValue::Sequence(b))) => a.ptr_eq(&b),
            (Ok(HostValue::Mapping(a)), Ok(HostValue::Mapping(b))) => a.ptr_eq(&b),
            (Ok(HostValue::Function(a)), Ok(HostValue::Function(b))) => a.ptr_eq(&b),
            _ => self.handle == other.handle,
        }
    }
}

impl Drop for HostRef {
    fn drop(&mut self) {
        self.bridge.references.release(self.handle);
    }
}

impl UserData for HostRef {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value<'lua>| {
            this.index(lua, key).map_err(Error::into_lua)
        });
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |lua, this, (key, value): (Value<'lua>, Value<'lua>)| {
                this.new_index(lua, key, value).map_err(Error::into_lua)
            },
        );
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| this.len().map_err(Error::into_lua));
        methods.add_meta_method(MetaMethod::Call, |lua, this, args: MultiValue<'lua>| {
            this.call(lua, args)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.describe()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData<'lua>| {
            Ok(match other.borrow::<HostRef>() {
                Ok(other) => this.same_payload(&other),
                Err(_) => false,
            })
        });
    }
}

/// Validate a sequence index. Indices are zero-based and never grow the sequence.
fn sequence_index(key: &Value<'_>, len: usize) -> Result<usize> {
    let index = match key {
        Value::Integer(i) => *i,
        Value::Number(n) if n.fract() == 0.0 => *n as i64,
        Value::Number(n) => {
            return Err(Error::InvalidIndex {
                reason: format!("{n} is not an integer"),
            })
        }
        other => {
            return Err(Error::InvalidIndex {
                reason: format!("expected a number, found {}", RuntimeType::of(other)),
            })
        }
    };
    if index < 0 {
        return Err(Error::InvalidIndex {
            reason: format!("{index} is negative"),
        });
    }
    if index as u64 >= len as u64 {
        return Err(Error::IndexOutOfRange { index, len });
    }
    Ok(index as usize)
}

fn key_of(key: &Value<'_>) -> Option<Key> {
    match key {
        Value::Integer(i) => Some(Key::Int(*i)),
        Value::Number(n) if n.fract() == 0.0 => Some(Key::Int(*n as i64)),
        Value::String(s) => Some(Key::Str(String::from_utf8_lossy(s.as_bytes()).into_owned())),
        _ => None,
    }
}

/// A method bound to one record. A leading receiver argument is dropped, so
/// both `obj:M()` and `obj.M()` work.
fn bound_method<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    object: Object,
    entry: Rc<FieldEntry>,
) -> Result<mlua::Function<'lua>> {
    let bridge = Rc::clone(bridge);
    let method = lua.create_function(move |lua, args: MultiValue| {
        call_method(lua, &bridge, &object, &entry, args).map_err(Error::into_lua)
    })?;
    Ok(method)
}

fn call_method<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    object: &Object,
    entry: &FieldEntry,
    args: MultiValue<'lua>,
) -> Result<MultiValue<'lua>> {
    let Access::Method { params, .. } = entry.access() else {
        return Err(Error::UnknownMember {
            type_name: object.def().name.to_string(),
            name: entry.exposed_name().to_string(),
        });
    };

    let mut args = args.into_vec();
    if let Some(Value::UserData(first)) = args.first() {
        if HostRef::is_same_object(bridge, first, object) {
            args.remove(0);
        }
    }

    let mut args = args.into_iter();
    let mut converted = Vec::with_capacity(params.len());
    for (position, hint) in params.iter().enumerate() {
        let value = args.next().unwrap_or(Value::Nil);
        let value = to_host(lua, bridge, value, Some(hint)).map_err(|source| Error::Argument {
            position: position + 1,
            function: entry.exposed_name().to_string(),
            source: Box::new(source),
        })?;
        converted.push(value);
    }

    let results = entry.call(object, converted)?;
    push_results(lua, bridge, entry.exposed_name(), &results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostType, IntKind, Sequence};

    #[test]
    fn test_sequence_index_validation() {
        assert_eq!(sequence_index(&Value::Integer(0), 3).unwrap(), 0);
        assert_eq!(sequence_index(&Value::Number(2.0), 3).unwrap(), 2);
        assert!(matches!(
            sequence_index(&Value::Integer(3), 3),
            Err(Error::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(
            sequence_index(&Value::Integer(-1), 3),
            Err(Error::InvalidIndex { .. })
        ));
        assert!(matches!(
            sequence_index(&Value::Number(0.5), 3),
            Err(Error::InvalidIndex { .. })
        ));
        assert!(matches!(
            sequence_index(&Value::Boolean(true), 3),
            Err(Error::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(key_of(&Value::Number(4.0)), Some(Key::Int(4)));
        assert_eq!(key_of(&Value::Number(4.5)), None);
        assert_eq!(key_of(&Value::Nil), None);
    }

    #[test]
    fn test_collection_releases_reference() {
        let lua = Rc::new(Lua::new());
        let bridge = Bridge::new(&lua, crate::settings::Settings::default());
        let seq = Sequence::new(HostType::Int(IntKind::I32), vec![HostValue::I32(1)]);

        let value = push_host(&lua, &bridge, &HostValue::Sequence(seq)).unwrap().0;
        lua.globals().set("seq", value).unwrap();
        assert_eq!(bridge.references.len(), 1);

        let len: i64 = lua.load("return #seq").eval().unwrap();
        assert_eq!(len, 1);

        lua.globals().set("seq", Value::Nil).unwrap();
        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        assert!(bridge.references.is_empty());
    }
}
