//! Script runtime management
//!
//! [`ScriptRuntime`] owns one embedded runtime instance and its bridge state.
//! Every instance is independent: registrations, references and proxies
//! never leak between instances.

use crate::bridge::Bridge;
use crate::convert::{push_strict, to_host};
use crate::error::{Error, Result};
use crate::function::{register, split_name, HostFunction, IntoHostFunction};
use crate::host::{Described, HostValue, IntoHostArgs};
use crate::settings::Settings;
use crate::state::RuntimeType;
use mlua::{ChunkMode, Lua, LuaOptions, MultiValue, StdLib, Value};
use std::io::Read;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// Script execution context
pub struct ScriptRuntime {
    lua: Rc<Lua>,
    bridge: Rc<Bridge>,
}

impl ScriptRuntime {
    pub fn new() -> Result<Self> {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Result<Self> {
        let lua = if settings.open_std_libs {
            Lua::new()
        } else {
            Lua::new_with(StdLib::NONE, LuaOptions::default())?
        };
        if let Some(limit) = settings.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        info!(
            std_libs = settings.open_std_libs,
            separator = %settings.field_separator,
            memory_limit = ?settings.memory_limit,
            "script runtime created"
        );

        let lua = Rc::new(lua);
        let bridge = Bridge::new(&lua, settings);
        Ok(Self { lua, bridge })
    }

    pub fn settings(&self) -> &Settings {
        &self.bridge.settings
    }

    /// Evaluate a chunk and return every value it returns, converted with no type hint.
    pub fn evaluate(&self, source: &str) -> Result<Vec<HostValue>> {
        self.evaluate_named(source, &self.bridge.settings.chunk_name)
    }

    /// Evaluate a chunk under an explicit chunk name (used in error messages).
    pub fn evaluate_named(&self, source: impl AsRef<[u8]>, name: &str) -> Result<Vec<HostValue>> {
        let results: MultiValue = self
            .lua
            .load(source.as_ref())
            .set_name(name)
            .set_mode(ChunkMode::Text)
            .call(())?;
        results
            .into_iter()
            .map(|value| to_host(&self.lua, &self.bridge, value, None))
            .collect()
    }

    pub fn evaluate_reader(&self, mut reader: impl Read) -> Result<Vec<HostValue>> {
        let mut source = Vec::new();
        reader.read_to_end(&mut source)?;
        self.evaluate_named(&source, &self.bridge.settings.chunk_name)
    }

    pub fn evaluate_file(&self, path: impl AsRef<Path>) -> Result<Vec<HostValue>> {
        let path = path.as_ref();
        let source = std::fs::read(path)?;
        self.evaluate_named(&source, &format!("@{}", path.display()))
    }

    /// Register a host function under a possibly dotted name (`"a.b.c"`).
    pub fn register_function<Marker>(
        &self,
        name: &str,
        function: impl IntoHostFunction<Marker>,
    ) -> Result<()> {
        register(&self.lua, &self.bridge, name, function.into_host_function())
    }

    /// Register several functions under one namespace.
    ///
    /// Every name and shape is checked before anything is installed.
    pub fn register_functions<I, S>(&self, namespace: &str, functions: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, HostFunction)>,
        S: AsRef<str>,
    {
        let functions: Vec<(String, HostFunction)> = functions
            .into_iter()
            .map(|(name, function)| {
                let name = name.as_ref();
                let full_name = if namespace.is_empty() {
                    name.to_string()
                } else {
                    format!("{namespace}.{name}")
                };
                (full_name, function)
            })
            .collect();

        for (name, function) in &functions {
            split_name(name)?;
            function.spec().validate(name)?;
        }
        debug!(namespace, count = functions.len(), "registering function list");
        for (name, function) in functions {
            register(&self.lua, &self.bridge, &name, function)?;
        }
        Ok(())
    }

    /// Register a record type so its layout is built now rather than on first use.
    pub fn register_struct<T: Described>(&self) -> Result<()> {
        self.bridge.structs.register(T::describe())?;
        Ok(())
    }

    pub fn set_global(&self, name: &str, value: impl Into<HostValue>) -> Result<()> {
        let value = push_strict(&self.lua, &self.bridge, &value.into())?;
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    pub fn get_global(&self, name: &str) -> Result<HostValue> {
        let value: Value = self.lua.globals().get(name)?;
        to_host(&self.lua, &self.bridge, value, None)
    }

    /// Call a global function by name.
    pub fn call_function(&self, name: &str, args: impl IntoHostArgs) -> Result<Vec<HostValue>> {
        let function = match self.lua.globals().get::<_, Value>(name)? {
            Value::Function(function) => function,
            other => {
                return Err(Error::Unsupported {
                    kind: format!("{} '{name}'", RuntimeType::of(&other)),
                    operation: "called",
                })
            }
        };

        let args = args
            .into_host_args()
            .iter()
            .map(|arg| push_strict(&self.lua, &self.bridge, arg))
            .collect::<Result<Vec<_>>>()?;
        let results: MultiValue = function.call(MultiValue::from_vec(args))?;
        results
            .into_iter()
            .map(|value| to_host(&self.lua, &self.bridge, value, None))
            .collect()
    }

    /// Run a full collection cycle, releasing references the runtime no longer holds.
    pub fn collect_garbage(&self) -> Result<()> {
        // Finalized handles are reclaimed on the cycle after their finalizer runs.
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Number of host values currently exposed to scripts.
    pub fn live_references(&self) -> usize {
        self.bridge.references.len()
    }

    /// Number of unreleased table and function proxies.
    pub fn live_proxies(&self) -> usize {
        self.bridge.proxies.borrow().len()
    }

    /// The underlying runtime, for operations the bridge does not cover.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistrationError;
    use crate::host::{HostTyped, HostType, Key, KeyValue, KeyValues, Ptr, Variadic};
    use crate::state::{ReturnCount, State};
    use std::collections::HashMap;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Point {
        fn sum_xy(&self) -> f64 {
            (self.x + self.y) as f64
        }

        fn shift(&mut self, dx: i64) {
            self.x += dx;
        }
    }

    crate::reflect_struct! {
        Point as "Point" {
            fields { "X" => x: i64, "Y" => y: i64 }
            methods {
                "SumXY" => sum_xy() -> f64,
                "Shift" => shift(dx: i64),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Shape {
        name: String,
        p1: Point,
        p2: Point,
    }

    crate::reflect_struct! {
        Shape as "Shape" {
            fields { "Name" => name: String }
            nested { "P1" => p1: Point, "P2" => p2: Point }
        }
    }

    fn get_hello(state: State<'_>) -> ReturnCount {
        state.push_string("hello");
        ReturnCount(1)
    }

    fn add_raw(state: State<'_>) -> ReturnCount {
        match (state.to_integer(1), state.to_integer(2)) {
            (Some(a), Some(b)) => {
                state.push_integer(a + b);
                ReturnCount(1)
            }
            _ => state.raise("add expects two integers"),
        }
    }

    fn shape() -> Ptr<Shape> {
        Ptr::new(Shape {
            name: "line".to_string(),
            p1: Point { x: 1, y: 2 },
            p2: Point { x: 3, y: 4 },
        })
    }

    #[test]
    fn test_evaluate_returns_every_value() {
        let runtime = ScriptRuntime::new().unwrap();
        let values = runtime.evaluate("return 1, 'a', true, nil").unwrap();
        assert_eq!(
            values,
            vec![
                HostValue::F64(1.0),
                HostValue::from("a"),
                HostValue::Bool(true),
                HostValue::Nil
            ]
        );
    }

    #[test]
    fn test_runtime_error_message_propagates() {
        let runtime = ScriptRuntime::new().unwrap();
        let err = runtime.evaluate("error('boom')").unwrap_err();
        assert!(matches!(err, Error::Runtime { ref message } if message == "[string \"tether\"]:1: boom"));
    }

    #[test]
    fn test_script_errors_keep_their_kind() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.set_global("p", Ptr::new(Point::default())).unwrap();
        runtime.set_global("seq", vec![1i64, 2].into_host()).unwrap();

        assert!(matches!(
            runtime.evaluate("p.X = 'abc'"),
            Err(Error::Conversion(_))
        ));
        assert!(matches!(
            runtime.evaluate("return p.Z"),
            Err(Error::UnknownMember { ref name, .. }) if name == "Z"
        ));
        assert!(matches!(
            runtime.evaluate("p.SumXY = 1"),
            Err(Error::MethodAssignment { .. })
        ));
        assert!(matches!(
            runtime.evaluate("return seq[-1]"),
            Err(Error::InvalidIndex { .. })
        ));
        assert!(matches!(
            runtime.evaluate("return seq[5]"),
            Err(Error::IndexOutOfRange { index: 5, len: 2 })
        ));

        let err = runtime.evaluate("p:Shift('far')").unwrap_err();
        assert!(matches!(err, Error::Argument { position: 1, .. }));
        assert_eq!(
            err.to_string(),
            "bad argument #1 to 'Shift': cannot convert from `string` to `i64`"
        );
    }

    struct Seven;

    impl crate::convert::PushValue for Seven {
        fn push_value<'lua>(&self, _lua: &'lua Lua) -> Result<Value<'lua>> {
            Ok(Value::Integer(7))
        }
    }

    #[test]
    fn test_custom_interface_and_pointee_values() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("ByValue", |mut p: Point| {
                p.x += 100;
                p.x
            })
            .unwrap();
        let shared = Ptr::new(Point { x: 3, y: 0 });
        runtime.set_global("q", shared.clone()).unwrap();
        runtime.set_global("c", HostValue::Custom(Rc::new(Seven))).unwrap();
        runtime
            .set_global("i", HostValue::Interface(Box::new(HostValue::I32(5))))
            .unwrap();

        let values = runtime.evaluate("return c, i, ByValue(q)").unwrap();
        assert_eq!(
            values,
            vec![HostValue::F64(7.0), HostValue::F64(5.0), HostValue::F64(103.0)]
        );
        assert_eq!(shared.borrow().x, 3);
    }

    #[test]
    fn test_optional_parameters_accept_nil() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("Greet", |name: Option<String>| match name {
                Some(name) => format!("hi {name}"),
                None => "hi stranger".to_string(),
            })
            .unwrap();
        runtime
            .register_function("Scale", |x: i64, factor: Option<i64>| x * factor.unwrap_or(1))
            .unwrap();

        let values = runtime
            .evaluate("return Greet(), Greet(nil), Greet('ann'), Scale(4), Scale(4, 3)")
            .unwrap();
        assert_eq!(
            values,
            vec![
                HostValue::from("hi stranger"),
                HostValue::from("hi stranger"),
                HostValue::from("hi ann"),
                HostValue::F64(4.0),
                HostValue::F64(12.0)
            ]
        );
        assert!(matches!(
            runtime.evaluate("return Scale(4, 'x')"),
            Err(Error::Argument { position: 2, .. })
        ));
    }

    #[test]
    fn test_flattened_fields_and_methods() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.register_struct::<Shape>().unwrap();
        let shared = shape();
        runtime.set_global("shape", shared.clone()).unwrap();

        let values = runtime
            .evaluate(
                "shape.P1_X = 10
                 return shape.P1_X, shape.P2_SumXY(), shape:P2_SumXY(), shape.Name",
            )
            .unwrap();
        assert_eq!(
            values,
            vec![
                HostValue::F64(10.0),
                HostValue::F64(7.0),
                HostValue::F64(7.0),
                HostValue::from("line")
            ]
        );
        assert_eq!(shared.borrow().p1.x, 10);
    }

    #[test]
    fn test_method_receiver_is_dropped() {
        let runtime = ScriptRuntime::new().unwrap();
        let point = Ptr::new(Point { x: 1, y: 2 });
        runtime.set_global("p", point.clone()).unwrap();

        runtime.evaluate("p:Shift(5); p.Shift(1)").unwrap();
        assert_eq!(point.borrow().x, 7);
    }

    #[test]
    fn test_member_errors() {
        let runtime = ScriptRuntime::new().unwrap();
        let shared = shape();
        runtime.set_global("shape", shared.clone()).unwrap();

        let err = runtime.evaluate("return shape.P1_K").unwrap_err();
        assert!(err.to_string().contains("'P1_K' is not a member of 'Shape'"));

        let err = runtime.evaluate("shape.P1_X = 'abc'").unwrap_err();
        assert!(err.to_string().contains("cannot convert from `string` to `i64`"));
        assert_eq!(shared.borrow().p1.x, 1);

        let err = runtime.evaluate("shape.P1_SumXY = 1").unwrap_err();
        assert!(err.to_string().contains("cannot assign to method"));
    }

    #[test]
    fn test_struct_by_value_is_promoted_to_copy() {
        let runtime = ScriptRuntime::new().unwrap();
        let original = Point { x: 1, y: 1 };
        runtime.set_global("p", original.clone().into_host()).unwrap();
        runtime.evaluate("p.X = 99").unwrap();
        assert_eq!(original.x, 1);

        let exposed = Point::from_host(runtime.get_global("p").unwrap()).unwrap();
        assert_eq!(exposed.x, 99);
    }

    #[test]
    fn test_mapping_operations() {
        let runtime = ScriptRuntime::new().unwrap();
        let scores: HashMap<String, i64> = [("a", 1), ("b", 2), ("c", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        runtime.set_global("map", scores.into_host()).unwrap();

        let values = runtime.evaluate("return #map, map.c, map.z").unwrap();
        assert_eq!(
            values,
            vec![HostValue::F64(3.0), HostValue::F64(3.0), HostValue::Nil]
        );

        assert!(runtime.evaluate("map[1] = 4").is_err());
        runtime.evaluate("map.c = nil; map.d = 4").unwrap();

        let map = runtime.get_global("map").unwrap();
        let back = HashMap::<String, i64>::from_host(map).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.get("d"), Some(&4));
        assert!(!back.contains_key("c"));
    }

    #[test]
    fn test_sequence_operations() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.set_global("seq", vec![1i64, 2, 3].into_host()).unwrap();

        let values = runtime.evaluate("seq[2] = 30; return #seq, seq[0], seq[2]").unwrap();
        assert_eq!(
            values,
            vec![HostValue::F64(3.0), HostValue::F64(1.0), HostValue::F64(30.0)]
        );

        for script in ["return seq[-1]", "return seq['key']", "return seq[1.5]", "seq[3] = 4"] {
            assert!(runtime.evaluate(script).is_err(), "{script} should fail");
        }
        let seq = runtime.get_global("seq").unwrap();
        assert_eq!(seq.as_sequence().unwrap().len(), 3);
    }

    #[test]
    fn test_raw_functions() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.register_function("GetHello", get_hello).unwrap();
        runtime.register_function("AddRaw", add_raw).unwrap();

        let values = runtime.evaluate("return GetHello(), AddRaw(2, 3)").unwrap();
        assert_eq!(values, vec![HostValue::from("hello"), HostValue::F64(5.0)]);

        let err = runtime.evaluate("return AddRaw('x')").unwrap_err();
        assert!(err.to_string().contains("add expects two integers"));
    }

    #[test]
    fn test_raw_function_calls_back_into_runtime() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function(
                "Apply",
                HostFunction::raw(|state| match state.call(1, (20i64,)) {
                    Ok(count) => ReturnCount(count),
                    Err(err) => state.raise(err.to_string()),
                }),
            )
            .unwrap();
        let values = runtime
            .evaluate("return Apply(function(x) return x + 1, x * 2 end)")
            .unwrap();
        assert_eq!(values, vec![HostValue::F64(21.0), HostValue::F64(40.0)]);
    }

    #[test]
    fn test_invalid_shapes_fail_registration() {
        let runtime = ScriptRuntime::new().unwrap();
        let by_reference = HostFunction::from_parts(
            vec![HostType::Pointer(Box::new(HostType::Context))],
            vec![HostType::ReturnCount],
            |_| Ok(Vec::new()),
        );
        let err = runtime.register_function("Bad", by_reference).unwrap_err();
        assert!(matches!(
            err,
            Error::Registration(RegistrationError::InvalidRawShape { .. })
        ));
        assert_eq!(runtime.get_global("Bad").unwrap(), HostValue::Nil);

        let err = runtime
            .register_function("", HostFunction::wrap(|| true))
            .unwrap_err();
        assert!(matches!(err, Error::Registration(RegistrationError::EmptyName)));
    }

    #[test]
    fn test_dotted_names_create_namespaces() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.register_function("go.golang.GetHello", get_hello).unwrap();
        let values = runtime.evaluate("return go.golang.GetHello()").unwrap();
        assert_eq!(values, vec![HostValue::from("hello")]);

        runtime.register_function("go.fn", get_hello).unwrap();
        let err = runtime.register_function("go.fn.GetHello", get_hello).unwrap_err();
        assert!(matches!(
            err,
            Error::Registration(RegistrationError::NamespaceConflict { .. })
        ));
    }

    #[test]
    fn test_register_function_list() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_functions(
                "test",
                [
                    ("Double", HostFunction::wrap(|x: i64| x * 2)),
                    ("Greet", HostFunction::wrap(|name: String| format!("hi {name}"))),
                ],
            )
            .unwrap();
        let values = runtime
            .evaluate("return test.Double(21), test.Greet('bob')")
            .unwrap();
        assert_eq!(values, vec![HostValue::F64(42.0), HostValue::from("hi bob")]);

        let err = runtime
            .register_functions("test", [("", HostFunction::wrap(|| 1i64))])
            .unwrap_err();
        assert!(matches!(err, Error::Registration(RegistrationError::InvalidName { .. })));
    }

    #[test]
    fn test_variadic_forwarding() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("SumAll", |base: i64, rest: Variadic<i64>| {
                base + rest.iter().sum::<i64>()
            })
            .unwrap();
        let values = runtime.evaluate("return SumAll(1000, 2, 3, 4, 5, 6)").unwrap();
        assert_eq!(values, vec![HostValue::F64(1020.0)]);

        let err = runtime.evaluate("return SumAll('x')").unwrap_err();
        assert!(err.to_string().contains("bad argument #1 to 'SumAll'"));
    }

    #[test]
    fn test_variadic_any_keeps_nil() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("CallMe", |args: Variadic<HostValue>| args.0)
            .unwrap();
        let values = runtime
            .evaluate("local s = CallMe(1, true, 'abc', nil); return s[0], s[1], s[2], s[3], #s")
            .unwrap();
        assert_eq!(
            values,
            vec![
                HostValue::F64(1.0),
                HostValue::Bool(true),
                HostValue::from("abc"),
                HostValue::Nil,
                HostValue::F64(4.0)
            ]
        );
    }

    #[test]
    fn test_result_error_is_raised() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("Checked", |x: i64| {
                if x < 0 {
                    Err(format!("{x} is negative"))
                } else {
                    Ok(x)
                }
            })
            .unwrap();
        let values = runtime
            .evaluate("local ok, err = pcall(Checked, -1); return ok, Checked(2)")
            .unwrap();
        assert_eq!(values, vec![HostValue::Bool(false), HostValue::F64(2.0)]);
        assert!(runtime
            .evaluate("Checked(-5)")
            .unwrap_err()
            .to_string()
            .contains("-5 is negative"));
    }

    #[test]
    fn test_function_proxy() {
        let runtime = ScriptRuntime::new().unwrap();
        let values = runtime
            .evaluate("return function(a, b) return a + b, { x = a } end")
            .unwrap();
        let function = values[0].as_function().unwrap();

        let results = function.call((1i64, 2i64)).unwrap();
        assert_eq!(results[0], HostValue::F64(3.0));
        let table = results[1].as_table().unwrap();
        assert_eq!(table.get("x").unwrap(), HostValue::F64(1.0));
        assert!(!function.describe().unwrap().is_empty());

        assert_eq!(runtime.live_proxies(), 2);
        table.release();
        function.release();
        assert_eq!(runtime.live_proxies(), 0);
    }

    #[test]
    fn test_table_proxy_sub_table() {
        let runtime = ScriptRuntime::new().unwrap();
        let values = runtime
            .evaluate("return { name = 'outer', inner = { x = 1, y = 2 } }")
            .unwrap();
        let outer = values[0].as_table().unwrap();
        let inner = outer.get("inner").unwrap();
        let inner = inner.as_table().unwrap();
        assert_ne!(inner, outer);
        assert_eq!(inner.get("x").unwrap(), HostValue::F64(1.0));
        assert_eq!(inner.get("y").unwrap(), HostValue::F64(2.0));

        outer.set("count", 2i64).unwrap();
        assert!(matches!(outer.set(HostValue::Nil, 1i64), Err(Error::KeyType { .. })));
        let count = runtime.evaluate("return 1").unwrap();
        assert_eq!(count.len(), 1);
        assert_eq!(outer.get("count").unwrap(), HostValue::F64(2.0));
    }

    #[test]
    fn test_key_values_in_and_out() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .register_function("Count", |kvs: KeyValues| kvs.0.len() as i64)
            .unwrap();
        runtime
            .register_function("Pick", |kvs: KeyValues, key: String| {
                kvs.get(&key).cloned().unwrap_or(HostValue::Nil)
            })
            .unwrap();
        runtime
            .register_function("Pairs", || {
                KeyValues(vec![
                    KeyValue {
                        key: Key::Str("a".into()),
                        value: HostValue::I64(1),
                    },
                    KeyValue {
                        key: Key::Int(2),
                        value: HostValue::from("two"),
                    },
                ])
            })
            .unwrap();

        let values = runtime
            .evaluate(
                "local kvs = Pairs()
                 return Count({ a = 1, b = 2 }), Pick({ a = 1, b = 2 }, 'b'), #kvs, kvs.a, kvs[2]",
            )
            .unwrap();
        assert_eq!(
            values,
            vec![
                HostValue::F64(2.0),
                HostValue::F64(2.0),
                HostValue::F64(2.0),
                HostValue::F64(1.0),
                HostValue::from("two")
            ]
        );
    }

    #[test]
    fn test_host_function_as_value() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime
            .set_global("double", HostFunction::wrap(|x: i64| x * 2))
            .unwrap();
        let values = runtime
            .evaluate("return double(21), type(double)")
            .unwrap();
        assert_eq!(values, vec![HostValue::F64(42.0), HostValue::from("userdata")]);
    }

    #[test]
    fn test_call_function_by_name() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.evaluate("function add(a, b) return a + b end").unwrap();
        let values = runtime.call_function("add", (1i64, 2i64)).unwrap();
        assert_eq!(values, vec![HostValue::F64(3.0)]);
        assert!(matches!(
            runtime.call_function("missing", ()),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn test_collection_releases_references() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.set_global("seq", vec![1i64].into_host()).unwrap();
        runtime.set_global("p", Ptr::new(Point::default())).unwrap();
        assert_eq!(runtime.live_references(), 2);

        runtime.evaluate("seq = nil; p = nil").unwrap();
        runtime.collect_garbage().unwrap();
        assert_eq!(runtime.live_references(), 0);
    }

    #[test]
    fn test_each_exposure_is_an_independent_reference() {
        let runtime = ScriptRuntime::new().unwrap();
        let point = Ptr::new(Point { x: 5, y: 0 });
        runtime.set_global("a", point.clone()).unwrap();
        runtime.set_global("b", point.clone()).unwrap();
        assert_eq!(runtime.live_references(), 2);

        let values = runtime.evaluate("local same = (a == b); a = nil; return same").unwrap();
        assert_eq!(values, vec![HostValue::Bool(true)]);
        runtime.collect_garbage().unwrap();
        assert_eq!(runtime.live_references(), 1);

        let b = Ptr::<Point>::from_host(runtime.get_global("b").unwrap()).unwrap();
        assert!(b.ptr_eq(&point));
    }

    #[test]
    fn test_custom_separator_and_no_std_libs() {
        let settings = Settings {
            field_separator: ".".to_string(),
            open_std_libs: false,
            ..Settings::default()
        };
        let runtime = ScriptRuntime::with_settings(settings).unwrap();
        runtime.set_global("shape", shape()).unwrap();
        let values = runtime
            .evaluate("return shape['P2.Y'], string, type(print)")
            .unwrap();
        assert_eq!(
            values,
            vec![HostValue::F64(4.0), HostValue::Nil, HostValue::from("function")]
        );
    }

    #[test]
    fn test_registration_required_when_auto_register_disabled() {
        let settings = Settings {
            auto_register_structs: false,
            ..Settings::default()
        };
        let runtime = ScriptRuntime::with_settings(settings).unwrap();
        runtime.set_global("p", Ptr::new(Point::default())).unwrap();
        assert!(runtime.evaluate("return p.X").is_err());

        runtime.register_struct::<Point>().unwrap();
        assert_eq!(runtime.evaluate("return p.X").unwrap(), vec![HostValue::F64(0.0)]);
    }

    #[test]
    fn test_evaluate_reader_and_file() {
        let runtime = ScriptRuntime::new().unwrap();
        let values = runtime
            .evaluate_reader(std::io::Cursor::new(b"return 'from reader'".to_vec()))
            .unwrap();
        assert_eq!(values, vec![HostValue::from("from reader")]);

        let path = std::env::temp_dir().join(format!("tether-test-{}.lua", std::process::id()));
        std::fs::write(&path, "return 6 * 7").unwrap();
        let values = runtime.evaluate_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(values, vec![HostValue::F64(42.0)]);

        assert!(matches!(
            runtime.evaluate_file(&path),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_runtimes_are_isolated() {
        let first = ScriptRuntime::new().unwrap();
        let second = ScriptRuntime::new().unwrap();
        first.register_function("OnlyHere", get_hello).unwrap();
        assert_eq!(second.get_global("OnlyHere").unwrap(), HostValue::Nil);
    }
}
