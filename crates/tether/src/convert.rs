//! Value Bridge
//!
//! Converts one host value into one runtime value and back. Outbound
//! conversion dispatches on the host kind; inbound conversion dispatches on
//! the runtime type tag, refined by an optional expected host type.

use crate::bridge::Bridge;
use crate::error::{ConversionError, Error, Result};
use crate::host::types::hint_name;
use crate::host::value::int_value;
use crate::host::{FloatKind, HostType, HostValue, Key, KeyValue};
use crate::proxy::{Function, Table};
use crate::state::RuntimeType;
use crate::userdata::HostRef;
use mlua::{Lua, Value};
use std::rc::Rc;

/// A host value that pushes itself, bypassing the default conversion.
///
/// This is the extension point for custom proxy types. Values wrapped in
/// [`HostValue::Custom`] are handed the runtime and produce their own value.
pub trait PushValue {
    fn push_value<'lua>(&self, lua: &'lua Lua) -> Result<Value<'lua>>;
}

/// Convert a host value into a runtime value.
///
/// The flag is `false` when the host kind has no runtime representation and
/// nil was produced instead; the caller decides whether that is fatal.
pub(crate) fn push_host<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    value: &HostValue,
) -> Result<(Value<'lua>, bool)> {
    let pushed = match value {
        HostValue::Nil => Value::Nil,
        HostValue::Bool(b) => Value::Boolean(*b),
        HostValue::F32(v) => Value::Number(*v as f64),
        HostValue::F64(v) => Value::Number(*v),
        HostValue::String(s) => Value::String(lua.create_string(s)?),
        HostValue::Bytes(bytes) => Value::String(lua.create_string(bytes)?),
        HostValue::Function(function) => {
            function.spec().validate("anonymous function")?;
            push_reference(lua, bridge, value.clone())?
        }
        HostValue::Object(_)
        | HostValue::Sequence(_)
        | HostValue::Mapping(_)
        | HostValue::KeyValues(_) => push_reference(lua, bridge, value.clone())?,
        // Promoted to its own shared copy: mutation from scripts stays on that copy.
        HostValue::Struct(record) => {
            let object = record.clone_boxed().into_object();
            push_reference(lua, bridge, HostValue::Object(object))?
        }
        HostValue::Interface(inner) => return push_host(lua, bridge, inner),
        HostValue::Table(table) => table.push_value(lua)?,
        HostValue::LuaFunction(function) => function.push_value(lua)?,
        HostValue::Custom(custom) => custom.push_value(lua)?,
        HostValue::Opaque(_) => return Ok((Value::Nil, false)),
        HostValue::I8(_)
        | HostValue::I16(_)
        | HostValue::I32(_)
        | HostValue::I64(_)
        | HostValue::Isize(_)
        | HostValue::U8(_)
        | HostValue::U16(_)
        | HostValue::U32(_)
        | HostValue::U64(_)
        | HostValue::Usize(_) => match value.as_i64() {
            Some(int) => Value::Integer(int),
            None => return Ok((Value::Nil, false)),
        },
    };
    Ok((pushed, true))
}

/// Convert a host value, treating a missing runtime representation as an error.
pub(crate) fn push_strict<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    value: &HostValue,
) -> Result<Value<'lua>> {
    match push_host(lua, bridge, value)? {
        (pushed, true) => Ok(pushed),
        (_, false) => Err(ConversionError::new(value.kind_name(), "runtime value").into()),
    }
}

fn push_reference<'lua>(lua: &'lua Lua, bridge: &Rc<Bridge>, value: HostValue) -> Result<Value<'lua>> {
    let handle = bridge.references.new_reference(value);
    let data = lua.create_userdata(HostRef::new(handle, Rc::clone(bridge)))?;
    Ok(Value::UserData(data))
}

/// Convert a runtime value into a host value.
///
/// `hint` is the declared host type of the receiving slot. No hint, or an
/// `any` hint, yields the most natural host representation.
pub(crate) fn to_host<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    value: Value<'lua>,
    hint: Option<&HostType>,
) -> Result<HostValue> {
    let hint = hint.filter(|ty| !ty.is_any());
    if let Some(HostType::Optional(inner)) = hint {
        return match value {
            Value::Nil => Ok(HostValue::Nil),
            value => to_host(lua, bridge, value, Some(inner)),
        };
    }
    let mismatch = |value: &Value<'lua>| -> Error {
        ConversionError::new(RuntimeType::of(value).name(), hint_name(hint)).into()
    };

    let converted = match (value, hint) {
        (
            Value::Nil,
            None
            | Some(HostType::Function)
            | Some(HostType::Pointer(_))
            | Some(HostType::Table)
            | Some(HostType::LuaFunction),
        ) => HostValue::Nil,

        (Value::Boolean(b), None | Some(HostType::Bool)) => HostValue::Bool(b),

        (Value::Integer(i), Some(HostType::Int(kind))) => int_value(*kind, i as i128),
        (Value::Number(n), Some(HostType::Int(kind))) => int_value(*kind, n as i128),
        (Value::Integer(i), Some(HostType::Float(FloatKind::F32))) => HostValue::F32(i as f32),
        (Value::Number(n), Some(HostType::Float(FloatKind::F32))) => HostValue::F32(n as f32),
        (Value::Integer(i), None | Some(HostType::Float(FloatKind::F64))) => HostValue::F64(i as f64),
        (Value::Number(n), None | Some(HostType::Float(FloatKind::F64))) => HostValue::F64(n),

        (Value::String(s), None | Some(HostType::String)) => {
            HostValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        (Value::String(s), Some(HostType::Bytes)) => HostValue::Bytes(s.as_bytes().to_vec()),

        (Value::Table(table), Some(HostType::KeyValues)) => {
            HostValue::KeyValues(table_to_key_values(lua, bridge, table)?)
        }
        (Value::Table(table), None | Some(HostType::Table)) => {
            HostValue::Table(Table::new(lua, bridge, table)?)
        }
        (Value::Function(function), None | Some(HostType::LuaFunction)) => {
            HostValue::LuaFunction(Function::new(lua, bridge, function)?)
        }

        (Value::UserData(data), hint) => {
            let payload = {
                let host_ref = match data.borrow::<HostRef>() {
                    Ok(host_ref) => host_ref,
                    Err(_) => return Err(mismatch(&Value::UserData(data.clone()))),
                };
                if !Rc::ptr_eq(host_ref.bridge(), bridge) {
                    return Err(Error::Unsupported {
                        kind: "userdata from another runtime".to_string(),
                        operation: "converted",
                    });
                }
                bridge
                    .references
                    .lookup(host_ref.handle())
                    .ok_or(Error::NotRegistered {
                        handle: host_ref.handle(),
                    })?
            };
            payload_for_hint(payload, hint)?
        }

        (other, _) => return Err(mismatch(&other)),
    };
    Ok(converted)
}

/// Match a registered payload against the expected type.
fn payload_for_hint(payload: HostValue, hint: Option<&HostType>) -> Result<HostValue> {
    let Some(hint) = hint else {
        return Ok(payload);
    };
    if payload.host_type() == *hint {
        return Ok(payload);
    }
    // A record hint on a shared record yields the pointed-to value.
    if let (HostType::Struct(expected), HostValue::Object(object)) = (hint, &payload) {
        if object.struct_type() == *expected {
            let record = object.borrow()?.clone_boxed();
            return Ok(HostValue::Struct(record));
        }
    }
    Err(ConversionError::new(payload.kind_name(), hint.name()).into())
}

/// Convert a table into ordered key/value pairs.
///
/// The positional part `1..=#t` comes first, then the remaining keys in the
/// runtime's iteration order, which is not guaranteed stable. Values are
/// converted with no type hint.
pub(crate) fn table_to_key_values<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    table: mlua::Table<'lua>,
) -> Result<Vec<KeyValue>> {
    let len = table.raw_len();
    let mut pairs = Vec::with_capacity(len);
    for index in 1..=len as i64 {
        let value: Value = table.raw_get(index)?;
        pairs.push(KeyValue {
            key: Key::Int(index),
            value: to_host(lua, bridge, value, None)?,
        });
    }

    let is_positional = |i: i64| i >= 1 && i <= len as i64;
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let key = match key {
            Value::Integer(i) if is_positional(i) => continue,
            Value::Integer(i) => Key::Int(i),
            Value::String(s) => Key::Str(String::from_utf8_lossy(s.as_bytes()).into_owned()),
            other => {
                return Err(Error::KeyType {
                    key_type: RuntimeType::of(&other).name().to_string(),
                })
            }
        };
        pairs.push(KeyValue {
            key,
            value: to_host(lua, bridge, value, None)?,
        });
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostTyped, IntKind, Ptr, Reflect, Sequence};
    use crate::settings::Settings;

    fn runtime() -> (Rc<Lua>, Rc<Bridge>) {
        let lua = Rc::new(Lua::new());
        let bridge = Bridge::new(&lua, Settings::default());
        (lua, bridge)
    }

    fn round_trip(lua: &Lua, bridge: &Rc<Bridge>, value: HostValue) -> HostValue {
        let hint = value.host_type();
        let (pushed, converted) = push_host(lua, bridge, &value).unwrap();
        assert!(converted);
        to_host(lua, bridge, pushed, Some(&hint)).unwrap()
    }

    #[test]
    fn test_primitive_round_trip() {
        let (lua, bridge) = runtime();
        let values = [
            HostValue::Bool(true),
            HostValue::I8(-128),
            HostValue::I16(i16::MAX),
            HostValue::I32(-7),
            HostValue::I64(i64::MIN),
            HostValue::Isize(42),
            HostValue::U8(255),
            HostValue::U16(65535),
            HostValue::U32(u32::MAX),
            HostValue::U64(u64::MAX),
            HostValue::Usize(9),
            HostValue::F32(1.5),
            HostValue::F64(-0.25),
            HostValue::from("embedded\0zero"),
            HostValue::Bytes(vec![0xff, 0x00, 0x7f]),
        ];
        for value in values {
            assert_eq!(round_trip(&lua, &bridge, value.clone()), value);
        }
    }

    #[test]
    fn test_numbers_default_to_f64() {
        let (lua, bridge) = runtime();
        let value = to_host(&lua, &bridge, Value::Integer(3), None).unwrap();
        assert_eq!(value, HostValue::F64(3.0));
        let truncated = to_host(&lua, &bridge, Value::Number(3.9), Some(&HostType::Int(IntKind::I32)));
        assert_eq!(truncated.unwrap(), HostValue::I32(3));
    }

    #[test]
    fn test_nil_accepted_only_for_nullable_hints() {
        let (lua, bridge) = runtime();
        let pointer = HostType::Pointer(Box::new(HostType::Interface));
        assert_eq!(to_host(&lua, &bridge, Value::Nil, Some(&pointer)).unwrap(), HostValue::Nil);
        assert_eq!(to_host(&lua, &bridge, Value::Nil, None).unwrap(), HostValue::Nil);

        let err = to_host(&lua, &bridge, Value::Nil, Some(&HostType::Int(IntKind::I64))).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert from `nil` to `i64`");
    }

    #[test]
    fn test_mismatch_names_both_types() {
        let (lua, bridge) = runtime();
        let s = Value::String(lua.create_string("x").unwrap());
        let err = to_host(&lua, &bridge, s, Some(&HostType::Bool)).unwrap_err();
        match err {
            Error::Conversion(err) => {
                assert_eq!(err.from, "string");
                assert_eq!(err.to, "bool");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unregistered_handle_is_reported() {
        let (lua, bridge) = runtime();
        let seq = Sequence::new(HostType::Int(IntKind::I64), vec![HostValue::I64(1)]);
        let (value, _) = push_host(&lua, &bridge, &HostValue::Sequence(seq)).unwrap();
        let handle = match &value {
            Value::UserData(data) => data.borrow::<HostRef>().unwrap().handle(),
            other => panic!("expected userdata, got {}", RuntimeType::of(other)),
        };

        bridge.references.release(handle);
        let err = to_host(&lua, &bridge, value, None).unwrap_err();
        assert!(matches!(err, Error::NotRegistered { handle: missing } if missing == handle));
        assert_eq!(err.to_string(), format!("no host value registered for handle {handle}"));
    }

    #[test]
    fn test_composite_values_become_references() {
        let (lua, bridge) = runtime();
        let seq = Sequence::new(HostType::Int(IntKind::I64), vec![HostValue::I64(1)]);
        let (first, _) = push_host(&lua, &bridge, &HostValue::Sequence(seq.clone())).unwrap();
        let (second, _) = push_host(&lua, &bridge, &HostValue::Sequence(seq.clone())).unwrap();
        assert!(matches!(first, Value::UserData(_)));
        assert_eq!(bridge.references.len(), 2);

        let back = to_host(&lua, &bridge, first, None).unwrap();
        assert!(back.as_sequence().unwrap().ptr_eq(&seq));
        let back = to_host(&lua, &bridge, second, Some(&Vec::<i64>::host_type())).unwrap();
        assert!(back.as_sequence().unwrap().ptr_eq(&seq));
    }

    #[test]
    fn test_reference_payload_must_match_hint() {
        let (lua, bridge) = runtime();
        let seq = Sequence::new(HostType::String, vec![]);
        let (pushed, _) = push_host(&lua, &bridge, &HostValue::Sequence(seq)).unwrap();
        let err = to_host(&lua, &bridge, pushed, Some(&Vec::<i64>::host_type())).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[test]
    fn test_unhandled_kind_pushes_nil() {
        let (lua, bridge) = runtime();
        let (pushed, converted) = push_host(&lua, &bridge, &HostValue::Opaque("channel")).unwrap();
        assert!(matches!(pushed, Value::Nil));
        assert!(!converted);
        assert!(push_strict(&lua, &bridge, &HostValue::Opaque("channel")).is_err());
    }

    #[test]
    fn test_table_to_key_values_positional_first() {
        let (lua, bridge) = runtime();
        let table: mlua::Table = lua.load("return { 'a', 'b', x = 1 }").eval().unwrap();
        let pairs = table_to_key_values(&lua, &bridge, table).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].key, Key::Int(1));
        assert_eq!(pairs[1].value, HostValue::from("b"));
        assert_eq!(pairs[2].key, Key::Str("x".into()));
        assert_eq!(pairs[2].value, HostValue::F64(1.0));
    }

    #[test]
    fn test_table_key_type_rejected() {
        let (lua, bridge) = runtime();
        let table: mlua::Table = lua.load("return { [true] = 1 }").eval().unwrap();
        let err = table_to_key_values(&lua, &bridge, table).unwrap_err();
        assert!(matches!(err, Error::KeyType { key_type } if key_type == "boolean"));
    }

    #[test]
    fn test_struct_by_value_is_copied() {
        use crate::host::Described;

        #[derive(Clone, Default)]
        struct Counter {
            value: i64,
        }

        crate::reflect_struct! {
            Counter as "Counter" {
                fields { "Value" => value: i64 }
            }
        }

        let (lua, bridge) = runtime();
        let original = Ptr::new(Counter { value: 1 });
        let by_value = original.borrow().clone().into_host();
        let (pushed, _) = push_host(&lua, &bridge, &by_value).unwrap();
        let object = to_host(&lua, &bridge, pushed, None).unwrap();
        let object = object.as_object().unwrap();
        assert_eq!(object.def().name, Counter::describe().name);
        object.borrow_mut().unwrap().set_field("Value", HostValue::I64(9));
        assert_eq!(original.borrow().value, 1);
    }
}
