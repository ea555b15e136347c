//! Function Adapter
//!
//! Wraps host functions of heterogeneous signatures behind one calling
//! convention. Two shapes are accepted:
//!
//! - typed: any number of [`HostTyped`] parameters (the last may be
//!   [`Variadic`](crate::Variadic)) and any number of returns;
//! - raw: exactly `(State) -> ReturnCount`; the function drives the stack itself.
//!
//! Shapes are checked when a function is registered or first exposed, never
//! at call time.

use crate::bridge::Bridge;
use crate::convert::{push_host, to_host};
use crate::error::{Error, RegistrationError, Result};
use crate::host::{HostType, HostTyped, HostValue, IntoHostValues, Sequence};
use crate::state::{ReturnCount, RuntimeType, State};
use mlua::{Lua, MultiValue, Value};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Declared shape of a host function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableSpec {
    params: Vec<HostType>,
    returns: Vec<HostType>,
}

impl CallableSpec {
    pub fn new(params: Vec<HostType>, returns: Vec<HostType>) -> Self {
        Self { params, returns }
    }

    pub fn params(&self) -> &[HostType] {
        &self.params
    }

    pub fn returns(&self) -> &[HostType] {
        &self.returns
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.params.last(), Some(HostType::Variadic(_)))
    }

    /// True for the exact raw shape `(State) -> ReturnCount`.
    pub fn is_raw(&self) -> bool {
        self.params == [HostType::Context] && self.returns == [HostType::ReturnCount]
    }

    /// Check the shape against both calling conventions.
    pub fn validate(&self, name: &str) -> Result<(), RegistrationError> {
        if self.is_raw() {
            return Ok(());
        }

        let mentions_marker = |types: &[HostType]| types.iter().any(HostType::is_raw_marker);
        let wants_raw = matches!(self.params.first(), Some(ty) if ty.is_raw_marker())
            || mentions_marker(&self.returns);
        if wants_raw {
            return Err(RegistrationError::InvalidRawShape {
                name: name.to_string(),
                shape: self.to_string(),
            });
        }
        if mentions_marker(&self.params) {
            return Err(RegistrationError::ContextOutsideRaw {
                name: name.to_string(),
                shape: self.to_string(),
            });
        }

        let fixed = self.params.len().saturating_sub(1);
        if self.params[..fixed]
            .iter()
            .any(|ty| matches!(ty, HostType::Variadic(_)))
        {
            return Err(RegistrationError::VariadicNotLast {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Parameters before the variadic tail.
    pub(crate) fn fixed_params(&self) -> &[HostType] {
        if self.is_variadic() {
            &self.params[..self.params.len() - 1]
        } else {
            &self.params
        }
    }

    pub(crate) fn variadic_elem(&self) -> Option<&HostType> {
        match self.params.last() {
            Some(HostType::Variadic(elem)) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for CallableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[HostType]| {
            types
                .iter()
                .map(HostType::name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.returns))
    }
}

type TypedBody = dyn Fn(Vec<HostValue>) -> Result<Vec<HostValue>>;
type RawBody = dyn for<'lua> Fn(State<'lua>) -> ReturnCount;

#[derive(Clone)]
enum Body {
    Typed(Rc<TypedBody>),
    Raw(Rc<RawBody>),
}

/// A host function ready to be registered or passed to scripts as a value.
#[derive(Clone)]
pub struct HostFunction {
    spec: Rc<CallableSpec>,
    body: Body,
}

impl HostFunction {
    pub fn wrap<Marker>(function: impl IntoHostFunction<Marker>) -> Self {
        function.into_host_function()
    }

    /// Wrap a function that drives the call context directly.
    pub fn raw<F>(function: F) -> Self
    where
        F: for<'lua> Fn(State<'lua>) -> ReturnCount + 'static,
    {
        Self {
            spec: Rc::new(CallableSpec::new(
                vec![HostType::Context],
                vec![HostType::ReturnCount],
            )),
            body: Body::Raw(Rc::new(function)),
        }
    }

    /// Build a typed function from an explicit shape.
    ///
    /// Arguments arrive already converted with the declared parameter types;
    /// a variadic tail arrives as one [`Sequence`]. The shape is validated on registration.
    pub fn from_parts<F>(params: Vec<HostType>, returns: Vec<HostType>, body: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<Vec<HostValue>> + 'static,
    {
        Self {
            spec: Rc::new(CallableSpec::new(params, returns)),
            body: Body::Typed(Rc::new(body)),
        }
    }

    pub fn spec(&self) -> &CallableSpec {
        &self.spec
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.spec, &other.spec)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostFunction").field(&self.spec.to_string()).finish()
    }
}

/// Anything that can become a [`HostFunction`].
///
/// Implemented for closures and fn items whose parameters are [`HostTyped`]
/// and whose return is [`IntoHostValues`], for raw `(State) -> ReturnCount`
/// functions, and for `HostFunction` itself.
pub trait IntoHostFunction<Marker> {
    fn into_host_function(self) -> HostFunction;
}

impl IntoHostFunction<()> for HostFunction {
    fn into_host_function(self) -> HostFunction {
        self
    }
}

#[doc(hidden)]
pub struct RawMarker;

impl<F> IntoHostFunction<RawMarker> for F
where
    F: for<'lua> Fn(State<'lua>) -> ReturnCount + 'static,
{
    fn into_host_function(self) -> HostFunction {
        HostFunction::raw(self)
    }
}

macro_rules! impl_into_host_function {
    ($($param:ident),*) => {
        impl<Func, Ret, $($param),*> IntoHostFunction<fn($($param,)*) -> Ret> for Func
        where
            Func: Fn($($param),*) -> Ret + 'static,
            Ret: IntoHostValues,
            $($param: HostTyped,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_host_function(self) -> HostFunction {
                let params = vec![$($param::host_type()),*];
                HostFunction::from_parts(params, Ret::return_types(), move |args| {
                    let mut args = args.into_iter();
                    $(
                        let $param = $param::from_host(args.next().unwrap_or(HostValue::Nil))?;
                    )*
                    (self)($($param),*).into_host_values()
                })
            }
        }
    };
}

impl_into_host_function!();
impl_into_host_function!(A);
impl_into_host_function!(A, B);
impl_into_host_function!(A, B, C);
impl_into_host_function!(A, B, C, D);
impl_into_host_function!(A, B, C, D, E);
impl_into_host_function!(A, B, C, D, E, G);

/// Run a host function on runtime arguments.
pub(crate) fn invoke<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    name: &str,
    function: &HostFunction,
    args: MultiValue<'lua>,
) -> mlua::Result<MultiValue<'lua>> {
    match &function.body {
        Body::Raw(body) => {
            let state = State::new(lua, Rc::clone(bridge), args.into_vec());
            let count = body(state.clone());
            let results = state.finish(count).map_err(Error::into_lua)?;
            Ok(MultiValue::from_vec(results))
        }
        Body::Typed(body) => {
            let args = convert_args(lua, bridge, name, function.spec(), args).map_err(Error::into_lua)?;
            let results = body(args).map_err(Error::into_lua)?;
            push_results(lua, bridge, name, &results).map_err(Error::into_lua)
        }
    }
}

fn convert_args<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    name: &str,
    spec: &CallableSpec,
    args: MultiValue<'lua>,
) -> Result<Vec<HostValue>> {
    let argument_error = |position: usize, source: Error| Error::Argument {
        position,
        function: name.to_string(),
        source: Box::new(source),
    };

    let fixed = spec.fixed_params();
    let mut args = args.into_iter();
    let mut converted = Vec::with_capacity(spec.params().len());
    for (index, hint) in fixed.iter().enumerate() {
        // Missing arguments convert from nil; extras beyond a fixed shape are ignored.
        let value = args.next().unwrap_or(Value::Nil);
        let value = to_host(lua, bridge, value, Some(hint)).map_err(|err| argument_error(index + 1, err))?;
        converted.push(value);
    }

    if let Some(elem) = spec.variadic_elem() {
        let mut rest = Vec::new();
        for (offset, value) in args.enumerate() {
            let value = to_host(lua, bridge, value, Some(elem))
                .map_err(|err| argument_error(fixed.len() + offset + 1, err))?;
            rest.push(value);
        }
        converted.push(HostValue::Sequence(Sequence::new(elem.clone(), rest)));
    }
    Ok(converted)
}

/// Push every returned host value. Kinds without a runtime representation become nil.
pub(crate) fn push_results<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    name: &str,
    results: &[HostValue],
) -> Result<MultiValue<'lua>> {
    let mut values = Vec::with_capacity(results.len());
    for value in results {
        let (pushed, converted) = push_host(lua, bridge, value)?;
        if !converted {
            warn!(function = name, kind = %value.kind_name(), "return value has no runtime representation; pushed nil");
        }
        values.push(pushed);
    }
    Ok(MultiValue::from_vec(values))
}

/// Split a dotted name into its segments.
pub(crate) fn split_name(name: &str) -> Result<Vec<&str>, RegistrationError> {
    if name.is_empty() {
        return Err(RegistrationError::EmptyName);
    }
    let segments: Vec<&str> = name.split('.').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(RegistrationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(segments)
}

/// Install `function` under a possibly dotted global name.
///
/// Intermediate tables are created as needed. The path is checked before
/// anything is created, so a conflict leaves the globals untouched.
pub(crate) fn register(lua: &Lua, bridge: &Rc<Bridge>, name: &str, function: HostFunction) -> Result<()> {
    let segments = split_name(name)?;
    function.spec().validate(name)?;
    let Some((leaf, path)) = segments.split_last() else {
        return Err(RegistrationError::EmptyName.into());
    };

    let mut table = lua.globals();
    for segment in path {
        match table.raw_get::<_, Value>(*segment)? {
            Value::Nil => break,
            Value::Table(next) => table = next,
            other => {
                return Err(RegistrationError::NamespaceConflict {
                    name: name.to_string(),
                    segment: segment.to_string(),
                    found: RuntimeType::of(&other).name().to_string(),
                }
                .into())
            }
        }
    }

    let mut table = lua.globals();
    for segment in path {
        table = match table.raw_get::<_, Value>(*segment)? {
            Value::Table(next) => next,
            _ => {
                let next = lua.create_table()?;
                table.raw_set(*segment, next.clone())?;
                next
            }
        };
    }

    debug!(name, shape = %function.spec(), raw = function.spec().is_raw(), "function registered");
    let native = native_function(lua, bridge, name, function)?;
    table.raw_set(*leaf, native)?;
    Ok(())
}

fn native_function<'lua>(
    lua: &'lua Lua,
    bridge: &Rc<Bridge>,
    name: &str,
    function: HostFunction,
) -> Result<mlua::Function<'lua>> {
    let bridge = Rc::clone(bridge);
    let name = name.to_string();
    let native = lua.create_function(move |lua, args: MultiValue| {
        invoke(lua, &bridge, &name, &function, args)
    })?;
    Ok(native)
}
