//! Lua interpreter flavor.
//!
//! Wraps `mlua` (Lua 5.4) behind [`ScriptRuntime`]. Each invocation gets a
//! fresh interpreter with the configured memory cap and an instruction hook
//! that enforces the opcode budget, the runtime deadline and dispatcher
//! cancellation. Host calls are exposed through the global `L0` table;
//! values crossing the boundary use the shared tagged serialization.

use crate::host::HostApi;
use crate::job::{Entry, VmFlavor};
use crate::value::ScriptValue;
use crate::worker::ScriptRuntime;
use crate::{VmConfig, VmError, VmResult};
use mlua::{HookTriggers, Lua, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Instructions between hook invocations.
const HOOK_GRANULARITY: u32 = 100;

/// The Lua flavor.
pub struct LuaRuntime {
    config: VmConfig,
}

impl LuaRuntime {
    /// Creates a Lua runtime with the given limits.
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    fn to_lua<'lua>(lua: &'lua Lua, value: &ScriptValue) -> mlua::Result<Value<'lua>> {
        Ok(match value {
            ScriptValue::Null => Value::Nil,
            ScriptValue::Bool(b) => Value::Boolean(*b),
            ScriptValue::Number(n) => Value::Number(*n),
            ScriptValue::String(s) => Value::String(lua.create_string(s)?),
            ScriptValue::Object(entries) => {
                let table = lua.create_table()?;
                for (key, val) in entries {
                    table.set(Self::to_lua(lua, key)?, Self::to_lua(lua, val)?)?;
                }
                Value::Table(table)
            }
        })
    }

    fn from_lua(value: &Value<'_>) -> VmResult<ScriptValue> {
        Ok(match value {
            Value::Nil => ScriptValue::Null,
            Value::Boolean(b) => ScriptValue::Bool(*b),
            Value::Integer(i) => ScriptValue::Number(*i as f64),
            Value::Number(n) => ScriptValue::Number(*n),
            Value::String(s) => ScriptValue::String(
                s.to_str()
                    .map_err(|e| VmError::Execution(e.to_string()))?
                    .to_string(),
            ),
            Value::Table(table) => {
                let mut entries = Vec::new();
                for pair in table.clone().pairs::<Value<'_>, Value<'_>>() {
                    let (key, val) = pair.map_err(|e| VmError::Execution(e.to_string()))?;
                    entries.push((Self::from_lua(&key)?, Self::from_lua(&val)?));
                }
                ScriptValue::Object(entries)
            }
            other => {
                return Err(VmError::Execution(format!(
                    "unsupported lua value: {}",
                    other.type_name()
                )))
            }
        })
    }

    fn register_host(&self, lua: &Lua, host: &Arc<HostApi>) -> mlua::Result<()> {
        let table = lua.create_table()?;

        let api = Arc::clone(host);
        table.set(
            "GetState",
            lua.create_function(move |lua, key: String| {
                match api.get_state(&key).map_err(mlua::Error::external)? {
                    Some(bytes) => {
                        let value =
                            ScriptValue::from_bytes(&bytes).map_err(mlua::Error::external)?;
                        Self::to_lua(lua, &value)
                    }
                    None => Ok(Value::Nil),
                }
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "PutState",
            lua.create_function(move |_, (key, value): (String, Value<'_>)| {
                let script_value = Self::from_lua(&value).map_err(mlua::Error::external)?;
                api.put_state(&key, script_value.to_bytes())
                    .map_err(mlua::Error::external)?;
                Ok(true)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "DelState",
            lua.create_function(move |_, key: String| {
                api.del_state(&key).map_err(mlua::Error::external)?;
                Ok(true)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "GetGlobalState",
            lua.create_function(move |lua, key: String| {
                match api.get_global_state(&key).map_err(mlua::Error::external)? {
                    Some(bytes) => {
                        let value =
                            ScriptValue::from_bytes(&bytes).map_err(mlua::Error::external)?;
                        Self::to_lua(lua, &value)
                    }
                    None => Ok(Value::Nil),
                }
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "SetGlobalState",
            lua.create_function(move |_, (key, value): (String, Value<'_>)| {
                let script_value = Self::from_lua(&value).map_err(mlua::Error::external)?;
                api.set_global_state(&key, script_value.to_bytes())
                    .map_err(mlua::Error::external)?;
                Ok(true)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "DelGlobalState",
            lua.create_function(move |_, key: String| {
                api.del_global_state(&key).map_err(mlua::Error::external)?;
                Ok(true)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "Transfer",
            lua.create_function(move |_, (to, asset_id, amount): (String, u32, i64)| {
                api.transfer(&to, asset_id, amount)
                    .map_err(mlua::Error::external)?;
                Ok(true)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "Balance",
            lua.create_function(move |_, (addr, asset_id): (String, u32)| {
                Ok(api
                    .get_balance(&addr, asset_id)
                    .map_err(mlua::Error::external)?)
            })?,
        )?;

        let api = Arc::clone(host);
        table.set(
            "CurrentBlockHeight",
            lua.create_function(move |_, ()| Ok(api.block_height()))?,
        )?;

        lua.globals().set("L0", table)
    }

    fn call_entry<'lua>(
        &self,
        lua: &'lua Lua,
        entry: &Entry,
    ) -> mlua::Result<Value<'lua>> {
        let globals = lua.globals();
        match entry {
            Entry::Init(args) => {
                let func: mlua::Function<'_> = globals.get("L0Init")?;
                let table = lua.create_sequence_from(args.iter().cloned())?;
                func.call::<_, Value<'_>>((table,))
            }
            Entry::Query(args) => {
                let func: mlua::Function<'_> = globals.get("L0Query")?;
                let table = lua.create_sequence_from(args.iter().cloned())?;
                func.call::<_, Value<'_>>((table,))
            }
            Entry::Invoke(name, args) => {
                let func: mlua::Function<'_> = globals.get("L0Invoke")?;
                let table = lua.create_sequence_from(args.iter().cloned())?;
                func.call::<_, Value<'_>>((name.as_str(), table))
            }
        }
    }
}

impl ScriptRuntime for LuaRuntime {
    fn flavor(&self) -> VmFlavor {
        VmFlavor::Lua
    }

    fn execute(&mut self, code: &str, entry: &Entry, host: &Arc<HostApi>) -> VmResult<ScriptValue> {
        let lua = Lua::new();
        lua.set_memory_limit(self.config.max_mem * 1024 * 1024)
            .map_err(|e| VmError::Execution(e.to_string()))?;

        let opcodes = Arc::new(AtomicU64::new(0));
        let budget = self.config.exec_limit_max_opcode_count;
        let hook_host = Arc::clone(host);
        let hook_opcodes = Arc::clone(&opcodes);
        lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(HOOK_GRANULARITY),
                ..Default::default()
            },
            move |_lua, _debug| {
                if hook_host.interrupted() {
                    return Err(mlua::Error::external(VmError::ExecutionTimeout));
                }
                let used = hook_opcodes
                    .fetch_add(u64::from(HOOK_GRANULARITY), Ordering::Relaxed)
                    + u64::from(HOOK_GRANULARITY);
                if used > budget {
                    return Err(mlua::Error::external(VmError::Execution(format!(
                        "opcode budget {budget} exceeded"
                    ))));
                }
                Ok(())
            },
        );

        self.register_host(&lua, host)
            .map_err(|e| VmError::Execution(e.to_string()))?;

        lua.load(code)
            .set_name("contract")
            .exec()
            .map_err(|e| VmError::Execution(e.to_string()))?;

        let value = self
            .call_entry(&lua, entry)
            .map_err(|e| VmError::Execution(e.to_string()))?;
        Self::from_lua(&value)
    }
}
