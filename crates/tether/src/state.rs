//! Raw call context
//!
//! A raw host function receives a [`State`] instead of typed parameters. The
//! state exposes the narrow stack protocol: read the type tag or value at a
//! position, push values, call a callable at a position and raise an error.
//! Positions are 1-based; negative positions count down from the top.

use crate::bridge::Bridge;
use crate::convert::{push_host, to_host};
use crate::error::{Error, Result};
use crate::host::{HostType, HostValue, IntoHostArgs};
use mlua::{Lua, MultiValue, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Type tag of a runtime value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeType {
    /// Position holds no value.
    None,
    Nil,
    Boolean,
    LightUserData,
    Number,
    String,
    Table,
    Function,
    UserData,
    Thread,
}

impl RuntimeType {
    pub fn of(value: &Value<'_>) -> Self {
        match value {
            Value::Nil => RuntimeType::Nil,
            Value::Boolean(_) => RuntimeType::Boolean,
            Value::LightUserData(_) => RuntimeType::LightUserData,
            Value::Integer(_) | Value::Number(_) => RuntimeType::Number,
            Value::String(_) => RuntimeType::String,
            Value::Table(_) => RuntimeType::Table,
            Value::Function(_) => RuntimeType::Function,
            Value::Thread(_) => RuntimeType::Thread,
            Value::UserData(_) | Value::Error(_) => RuntimeType::UserData,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RuntimeType::None => "no value",
            RuntimeType::Nil => "nil",
            RuntimeType::Boolean => "boolean",
            RuntimeType::LightUserData => "lightuserdata",
            RuntimeType::Number => "number",
            RuntimeType::String => "string",
            RuntimeType::Table => "table",
            RuntimeType::Function => "function",
            RuntimeType::UserData => "userdata",
            RuntimeType::Thread => "thread",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of results a raw function pushed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReturnCount(pub usize);

struct Frame<'lua> {
    stack: Vec<Value<'lua>>,
    raised: Option<String>,
}

/// Call context handed to raw host functions.
#[derive(Clone)]
pub struct State<'lua> {
    lua: &'lua Lua,
    bridge: Rc<Bridge>,
    frame: Rc<RefCell<Frame<'lua>>>,
}

impl<'lua> State<'lua> {
    pub(crate) fn new(lua: &'lua Lua, bridge: Rc<Bridge>, args: Vec<Value<'lua>>) -> Self {
        Self {
            lua,
            bridge,
            frame: Rc::new(RefCell::new(Frame {
                stack: args,
                raised: None,
            })),
        }
    }

    /// Number of values on the stack.
    pub fn top(&self) -> usize {
        self.frame.borrow().stack.len()
    }

    fn slot(&self, index: i32) -> Option<usize> {
        let top = self.top() as i64;
        let index = index as i64;
        let slot = match index {
            0 => return None,
            i if i > 0 => i - 1,
            i => top + i,
        };
        (0..top).contains(&slot).then_some(slot as usize)
    }

    fn value(&self, index: i32) -> Option<Value<'lua>> {
        let slot = self.slot(index)?;
        self.frame.borrow().stack.get(slot).cloned()
    }

    pub fn type_of(&self, index: i32) -> RuntimeType {
        self.value(index)
            .map(|value| RuntimeType::of(&value))
            .unwrap_or(RuntimeType::None)
    }

    fn push_value(&self, value: Value<'lua>) {
        self.frame.borrow_mut().stack.push(value);
    }

    pub fn push_nil(&self) {
        self.push_value(Value::Nil);
    }

    pub fn push_bool(&self, value: bool) {
        self.push_value(Value::Boolean(value));
    }

    pub fn push_integer(&self, value: i64) {
        self.push_value(Value::Integer(value));
    }

    pub fn push_number(&self, value: f64) {
        self.push_value(Value::Number(value));
    }

    pub fn push_string(&self, value: &str) {
        self.push_bytes(value.as_bytes());
    }

    /// Push a byte string as-is, embedded zeros included.
    pub fn push_bytes(&self, value: &[u8]) {
        match self.lua.create_string(value) {
            Ok(string) => self.push_value(Value::String(string)),
            Err(err) => {
                self.push_nil();
                self.raise(err.to_string());
            }
        }
    }

    /// Push a host value through the value bridge.
    ///
    /// Returns `false` when the value has no runtime representation; nil is pushed instead.
    pub fn push(&self, value: &HostValue) -> bool {
        match push_host(self.lua, &self.bridge, value) {
            Ok((pushed, converted)) => {
                self.push_value(pushed);
                converted
            }
            Err(err) => {
                self.push_nil();
                self.raise(err.to_string());
                false
            }
        }
    }

    /// Truthiness of the value at `index`: only nil, false and absent positions are false.
    pub fn to_bool(&self, index: i32) -> bool {
        !matches!(
            self.value(index),
            None | Some(Value::Nil) | Some(Value::Boolean(false))
        )
    }

    pub fn to_integer(&self, index: i32) -> Option<i64> {
        match self.value(index)? {
            Value::Integer(value) => Some(value),
            Value::Number(value) if value.fract() == 0.0 => Some(value as i64),
            _ => None,
        }
    }

    pub fn to_number(&self, index: i32) -> Option<f64> {
        match self.value(index)? {
            Value::Integer(value) => Some(value as f64),
            Value::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_string(&self, index: i32) -> Option<String> {
        match self.value(index)? {
            Value::String(value) => Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            _ => None,
        }
    }

    /// Convert the value at `index` with an optional type hint.
    pub fn to_host(&self, index: i32, hint: Option<&HostType>) -> Result<HostValue> {
        let value = self.value(index).unwrap_or(Value::Nil);
        to_host(self.lua, &self.bridge, value, hint)
    }

    /// Call the callable at `index` and push every result. Returns the result count.
    pub fn call(&self, index: i32, args: impl IntoHostArgs) -> Result<usize> {
        let callee = match self.value(index) {
            Some(Value::Function(function)) => function,
            other => {
                let found = other
                    .as_ref()
                    .map(RuntimeType::of)
                    .unwrap_or(RuntimeType::None);
                return Err(Error::Unsupported {
                    kind: found.name().to_string(),
                    operation: "called",
                });
            }
        };

        let mut pushed = Vec::new();
        for arg in args.into_host_args() {
            let (value, converted) = push_host(self.lua, &self.bridge, &arg)?;
            if !converted {
                return Err(crate::error::ConversionError::new(arg.kind_name(), "runtime value").into());
            }
            pushed.push(value);
        }

        let results: MultiValue = callee.call(MultiValue::from_vec(pushed))?;
        let count = results.len();
        for value in results {
            self.push_value(value);
        }
        Ok(count)
    }

    /// Record an error to raise once the raw function returns.
    pub fn raise(&self, message: impl Into<String>) -> ReturnCount {
        self.frame.borrow_mut().raised = Some(message.into());
        ReturnCount(0)
    }

    /// Take the declared results from the top of the stack.
    pub(crate) fn finish(self, count: ReturnCount) -> Result<Vec<Value<'lua>>> {
        let mut frame = self.frame.borrow_mut();
        if let Some(message) = frame.raised.take() {
            return Err(Error::runtime(message));
        }
        let len = frame.stack.len();
        if count.0 > len {
            return Err(Error::runtime(format!(
                "raw function returned {} results but pushed {}",
                count.0, len
            )));
        }
        Ok(frame.stack.split_off(len - count.0))
    }
}
