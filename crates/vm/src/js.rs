//! JavaScript interpreter flavor.
//!
//! Wraps `boa_engine` behind [`ScriptRuntime`]. Each invocation gets a fresh
//! context with the configured loop-iteration, recursion and stack limits,
//! so runaway scripts terminate deterministically even though the engine has
//! no preemptive interrupt; the runtime deadline is checked between the
//! evaluation and entry-call phases. Host calls are exposed through the
//! global `L0` object and use the shared tagged value serialization, byte
//! compatible with the Lua flavor.

use crate::host::HostApi;
use crate::job::{Entry, VmFlavor};
use crate::value::ScriptValue;
use crate::worker::ScriptRuntime;
use crate::{VmConfig, VmError, VmResult};
use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    // The host of the invocation currently executing on this worker thread.
    static ACTIVE_HOST: RefCell<Option<Arc<HostApi>>> = const { RefCell::new(None) };
}

fn with_host<T>(f: impl FnOnce(&HostApi) -> VmResult<T>) -> JsResult<T> {
    ACTIVE_HOST.with(|slot| {
        let slot = slot.borrow();
        let host = slot
            .as_ref()
            .ok_or_else(|| JsNativeError::error().with_message("no active invocation"))?;
        if host.interrupted() {
            return Err(JsNativeError::error()
                .with_message("invocation interrupted")
                .into());
        }
        f(host).map_err(|e| JsNativeError::error().with_message(e.to_string()).into())
    })
}

fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    let value = args.get(index).cloned().unwrap_or_default();
    Ok(value.to_string(context)?.to_std_string_escaped())
}

fn arg_u32(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<u32> {
    let value = args.get(index).cloned().unwrap_or_default();
    value.to_u32(context)
}

fn arg_i64(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<i64> {
    let value = args.get(index).cloned().unwrap_or_default();
    let number = value.to_number(context)?;
    Ok(number as i64)
}

fn js_to_script(value: &JsValue, context: &mut Context) -> JsResult<ScriptValue> {
    Ok(match value {
        JsValue::Null | JsValue::Undefined => ScriptValue::Null,
        JsValue::Boolean(b) => ScriptValue::Bool(*b),
        JsValue::Integer(i) => ScriptValue::Number(f64::from(*i)),
        JsValue::Rational(r) => ScriptValue::Number(*r),
        JsValue::String(s) => ScriptValue::String(s.to_std_string_escaped()),
        other => {
            let json = other.to_json(context)?;
            json_to_script(&json)
        }
    })
}

fn json_to_script(json: &serde_json::Value) -> ScriptValue {
    match json {
        serde_json::Value::Null => ScriptValue::Null,
        serde_json::Value::Bool(b) => ScriptValue::Bool(*b),
        serde_json::Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => ScriptValue::String(s.clone()),
        serde_json::Value::Array(items) => ScriptValue::Object(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| (ScriptValue::Number(i as f64), json_to_script(item)))
                .collect(),
        ),
        serde_json::Value::Object(map) => ScriptValue::Object(
            map.iter()
                .map(|(k, v)| (ScriptValue::String(k.clone()), json_to_script(v)))
                .collect(),
        ),
    }
}

fn script_to_json(value: &ScriptValue) -> serde_json::Value {
    match value {
        ScriptValue::Null => serde_json::Value::Null,
        ScriptValue::Bool(b) => serde_json::Value::Bool(*b),
        ScriptValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ScriptValue::String(s) => serde_json::Value::String(s.clone()),
        ScriptValue::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (key, val) in entries {
                map.insert(key.as_display_string(), script_to_json(val));
            }
            serde_json::Value::Object(map)
        }
    }
}

fn script_to_js(value: &ScriptValue, context: &mut Context) -> JsResult<JsValue> {
    Ok(match value {
        ScriptValue::Null => JsValue::null(),
        ScriptValue::Bool(b) => JsValue::from(*b),
        ScriptValue::Number(n) => JsValue::from(*n),
        ScriptValue::String(s) => JsValue::from(JsString::from(s.as_str())),
        ScriptValue::Object(_) => JsValue::from_json(&script_to_json(value), context)?,
    })
}

fn host_get_state(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    let bytes = with_host(|host| host.get_state(&key))?;
    match bytes {
        Some(bytes) => {
            let value = ScriptValue::from_bytes(&bytes)
                .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
            script_to_js(&value, context)
        }
        None => Ok(JsValue::null()),
    }
}

fn host_put_state(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    let value = args.get(1).cloned().unwrap_or_default();
    let script_value = js_to_script(&value, context)?;
    with_host(|host| host.put_state(&key, script_value.to_bytes()))?;
    Ok(JsValue::from(true))
}

fn host_del_state(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    with_host(|host| host.del_state(&key))?;
    Ok(JsValue::from(true))
}

fn host_get_global_state(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    let bytes = with_host(|host| host.get_global_state(&key))?;
    match bytes {
        Some(bytes) => {
            let value = ScriptValue::from_bytes(&bytes)
                .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
            script_to_js(&value, context)
        }
        None => Ok(JsValue::null()),
    }
}

fn host_set_global_state(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    let value = args.get(1).cloned().unwrap_or_default();
    let script_value = js_to_script(&value, context)?;
    with_host(|host| host.set_global_state(&key, script_value.to_bytes()))?;
    Ok(JsValue::from(true))
}

fn host_del_global_state(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let key = arg_string(args, 0, context)?;
    with_host(|host| host.del_global_state(&key))?;
    Ok(JsValue::from(true))
}

fn host_transfer(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let to = arg_string(args, 0, context)?;
    let asset_id = arg_u32(args, 1, context)?;
    let amount = arg_i64(args, 2, context)?;
    with_host(|host| host.transfer(&to, asset_id, amount))?;
    Ok(JsValue::from(true))
}

fn host_balance(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let addr = arg_string(args, 0, context)?;
    let asset_id = arg_u32(args, 1, context)?;
    let balance = with_host(|host| host.get_balance(&addr, asset_id))?;
    Ok(match balance {
        Some(amount) => JsValue::from(JsString::from(amount.as_str())),
        None => JsValue::null(),
    })
}

fn host_block_height(
    _this: &JsValue,
    _args: &[JsValue],
    _context: &mut Context,
) -> JsResult<JsValue> {
    let height = with_host(|host| Ok(host.block_height()))?;
    Ok(JsValue::from(height))
}

/// The JavaScript flavor.
pub struct JsRuntime {
    config: VmConfig,
}

impl JsRuntime {
    /// Creates a JS runtime with the given limits.
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    fn build_context(&self) -> Context {
        let mut context = Context::default();
        let limits = context.runtime_limits_mut();
        limits.set_loop_iteration_limit(self.config.exec_limit_max_opcode_count);
        limits.set_recursion_limit(self.config.exec_limit_stack_depth);
        limits.set_stack_size_limit(self.config.call_stack_size * 1024);
        context
    }

    fn register_host(&self, context: &mut Context) -> JsResult<()> {
        let l0 = ObjectInitializer::new(context)
            .function(NativeFunction::from_fn_ptr(host_get_state), js_string!("GetState"), 1)
            .function(NativeFunction::from_fn_ptr(host_put_state), js_string!("PutState"), 2)
            .function(NativeFunction::from_fn_ptr(host_del_state), js_string!("DelState"), 1)
            .function(
                NativeFunction::from_fn_ptr(host_get_global_state),
                js_string!("GetGlobalState"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host_set_global_state),
                js_string!("SetGlobalState"),
                2,
            )
            .function(
                NativeFunction::from_fn_ptr(host_del_global_state),
                js_string!("DelGlobalState"),
                1,
            )
            .function(NativeFunction::from_fn_ptr(host_transfer), js_string!("Transfer"), 3)
            .function(NativeFunction::from_fn_ptr(host_balance), js_string!("Balance"), 2)
            .function(
                NativeFunction::from_fn_ptr(host_block_height),
                js_string!("CurrentBlockHeight"),
                0,
            )
            .build();

        context.register_global_property(js_string!("L0"), l0, Attribute::all())?;
        Ok(())
    }

    fn call_entry(&self, context: &mut Context, entry: &Entry) -> JsResult<JsValue> {
        let (name, args) = match entry {
            Entry::Init(args) => (js_string!("L0Init"), self.args_value(context, None, args)?),
            Entry::Query(args) => (js_string!("L0Query"), self.args_value(context, None, args)?),
            Entry::Invoke(func, args) => (
                js_string!("L0Invoke"),
                self.args_value(context, Some(func), args)?,
            ),
        };

        let global = context.global_object();
        let func = global.get(name, context)?;
        let callable = func
            .as_callable()
            .ok_or_else(|| JsNativeError::typ().with_message("entry function missing"))?;
        callable.call(&JsValue::undefined(), &args, context)
    }

    fn args_value(
        &self,
        context: &mut Context,
        selector: Option<&str>,
        args: &[String],
    ) -> JsResult<Vec<JsValue>> {
        let array = JsArray::from_iter(
            args.iter()
                .map(|s| JsValue::from(JsString::from(s.as_str()))),
            context,
        );
        Ok(match selector {
            Some(func) => vec![
                JsValue::from(JsString::from(func)),
                JsValue::from(array),
            ],
            None => vec![JsValue::from(array)],
        })
    }
}

impl ScriptRuntime for JsRuntime {
    fn flavor(&self) -> VmFlavor {
        VmFlavor::Js
    }

    fn execute(&mut self, code: &str, entry: &Entry, host: &Arc<HostApi>) -> VmResult<ScriptValue> {
        ACTIVE_HOST.with(|slot| *slot.borrow_mut() = Some(Arc::clone(host)));
        let result = self.execute_inner(code, entry, host);
        ACTIVE_HOST.with(|slot| *slot.borrow_mut() = None);
        result
    }
}

impl JsRuntime {
    fn execute_inner(
        &mut self,
        code: &str,
        entry: &Entry,
        host: &Arc<HostApi>,
    ) -> VmResult<ScriptValue> {
        let mut context = self.build_context();
        self.register_host(&mut context)
            .map_err(|e| VmError::Execution(e.to_string()))?;

        context
            .eval(Source::from_bytes(code.as_bytes()))
            .map_err(|e| VmError::Execution(e.to_string()))?;

        if host.interrupted() {
            return Err(VmError::ExecutionTimeout);
        }

        let value = self
            .call_entry(&mut context, entry)
            .map_err(|e| VmError::Execution(e.to_string()))?;

        js_to_script(&value, &mut context).map_err(|e| VmError::Execution(e.to_string()))
    }
}
