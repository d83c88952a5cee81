//! Lua 5.4 policy evaluation.
//!
//! Every call gets its own interpreter. Nothing survives between calls:
//! globals a script sets are gone with the `Lua` instance, and concurrent
//! evaluations never share a VM.
//!
//! ## Sandbox
//!
//! - Libraries: base (minus the loaders and `print`), `string`, `table`,
//!   `math`, `utf8`. No `io`, `os`, `package`, `debug`, `coroutine`.
//! - A memory ceiling on the interpreter's allocator.
//! - An instruction-count hook that aborts the script once its wall-clock
//!   deadline has passed.
//!
//! The hook only fires between VM instructions, never inside a C library
//! function, so no library function may do unbounded work in one call:
//!
//! - `string.match`, `string.gmatch` and `string.gsub` are removed. Lua
//!   patterns backtrack without limit.
//! - `string.find` only searches for a plain substring, in linear time. Any
//!   pattern characters in the needle are taken literally.
//! - `string.rep` of an empty string returns at once.
//! - `table.insert`, `table.remove` and `table.move` are Lua code, so their
//!   loops run under the hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mlua::{Function, HookTriggers, Lua, LuaOptions, StdLib, Table, Value, VmState};
use regex::bytes::RegexBuilder;

use super::{PolicyError, PolicyEvaluator};
use crate::config::{PolicyLimits, POLICY_ENTRY_POINT};
use crate::transaction::CandidateTransaction;

/// Globals removed from the base library before any policy code runs.
const REMOVED_GLOBALS: &[&str] = &["print", "dofile", "loadfile", "load", "require"];

/// Pattern-matching functions removed from `string`.
const REMOVED_STRING_FUNCTIONS: &[&str] = &["match", "gmatch", "gsub"];

/// Longest needle `string.find` accepts.
const MAX_FIND_NEEDLE: usize = 1024;

/// Replaces the library functions whose C loops run for as long as the
/// caller's arguments say.
const PRELUDE: &str = r##"
local error, select, mtype, mmin = error, select, math.type, math.min

local rep = string.rep
string.rep = function(s, n, sep)
  if rep(s, 1) == "" and (sep == nil or rep(sep, 1) == "") then
    n = mmin(n, 1)
  end
  return rep(s, n, sep)
end

table.insert = function(t, ...)
  local e = #t + 1
  local argc = select("#", ...)
  if argc == 1 then
    t[e] = ...
    return
  elseif argc ~= 2 then
    error("wrong number of arguments to 'insert'", 2)
  end
  local pos, value = ...
  if mtype(pos) ~= "integer" or pos < 1 or pos > e then
    error("bad argument #2 to 'insert' (position out of bounds)", 2)
  end
  for i = e, pos + 1, -1 do
    t[i] = t[i - 1]
  end
  t[pos] = value
end

table.remove = function(t, pos)
  local size = #t
  pos = pos or size
  if pos ~= size and (mtype(pos) ~= "integer" or pos < 1 or pos > size + 1) then
    error("bad argument #2 to 'remove' (position out of bounds)", 2)
  end
  local value = t[pos]
  while pos < size do
    t[pos] = t[pos + 1]
    pos = pos + 1
  end
  t[pos] = nil
  return value
end

table.move = function(a1, f, e, t, a2)
  if a2 == nil then
    a2 = a1
  end
  if e >= f then
    if t > e or t <= f or a1 ~= a2 then
      for i = 0, e - f do
        a2[t + i] = a1[f + i]
      end
    else
      for i = e - f, 0, -1 do
        a2[t + i] = a1[f + i]
      end
    end
  end
  return a2
end
"##;

/// The one [`PolicyEvaluator`] this crate ships.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaPolicyEngine {
    limits: PolicyLimits,
}

impl LuaPolicyEngine {
    pub fn new(limits: PolicyLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> PolicyLimits {
        self.limits
    }

    /// Builds a sandboxed interpreter whose hook trips `expired` once the
    /// deadline passes.
    fn sandbox(&self, expired: Arc<AtomicBool>) -> Result<Lua, PolicyError> {
        let libs = StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(runtime)?;
        lua.set_memory_limit(self.limits.memory_limit)
            .map_err(runtime)?;

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals.set(*name, Value::Nil).map_err(runtime)?;
        }
        let string: Table = globals.get("string").map_err(runtime)?;
        for name in REMOVED_STRING_FUNCTIONS {
            string.set(*name, Value::Nil).map_err(runtime)?;
        }
        string
            .set("find", lua.create_function(find_plain).map_err(runtime)?)
            .map_err(runtime)?;
        lua.load(PRELUDE)
            .set_name("sandbox")
            .exec()
            .map_err(runtime)?;

        let deadline = Instant::now() + self.limits.timeout;
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.limits.hook_interval),
            move |_, _| {
                if Instant::now() >= deadline {
                    expired.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("policy deadline exceeded"));
                }
                Ok(VmState::Continue)
            },
        );

        Ok(lua)
    }

    /// Runs the chunk and resolves the entry point.
    fn load_entry_point(&self, lua: &Lua, source: &str) -> Result<Function, PolicyError> {
        let chunk = lua
            .load(source)
            .set_name("policy")
            .into_function()
            .map_err(|e| PolicyError::Load(e.to_string()))?;
        chunk.call::<()>(()).map_err(runtime)?;

        match lua.globals().get::<Value>(POLICY_ENTRY_POINT).map_err(runtime)? {
            Value::Function(f) => Ok(f),
            Value::Nil => Err(PolicyError::Runtime(format!(
                "`{POLICY_ENTRY_POINT}` is not defined"
            ))),
            other => Err(PolicyError::Runtime(format!(
                "`{POLICY_ENTRY_POINT}` is a {}, not a function",
                other.type_name()
            ))),
        }
    }

    fn with_deadline<T>(
        &self,
        run: impl FnOnce(&Lua) -> Result<T, PolicyError>,
    ) -> Result<T, PolicyError> {
        let expired = Arc::new(AtomicBool::new(false));
        let lua = self.sandbox(expired.clone())?;
        let result = run(&lua);
        if expired.load(Ordering::Relaxed) {
            return Err(PolicyError::Timeout(self.limits.timeout));
        }
        result
    }
}

impl PolicyEvaluator for LuaPolicyEngine {
    fn evaluate(&self, source: &str, tx: &CandidateTransaction) -> Result<bool, PolicyError> {
        self.with_deadline(|lua| {
            let validate = self.load_entry_point(lua, source)?;
            let candidate = bind_candidate(lua, tx).map_err(runtime)?;
            let verdict = validate.call::<Value>(candidate).map_err(runtime)?;
            Ok(matches!(verdict, Value::Boolean(true)))
        })
    }

    fn check(&self, source: &str) -> Result<(), PolicyError> {
        self.with_deadline(|lua| self.load_entry_point(lua, source).map(|_| ()))
    }
}

/// Exposes `tx` as an empty proxy table whose metatable serves the fields
/// and rejects writes.
fn bind_candidate(lua: &Lua, tx: &CandidateTransaction) -> mlua::Result<Table> {
    let fields = lua.create_table()?;
    if let Some(to) = &tx.to {
        fields.set("to", to.as_str())?;
    }
    fields.set("value", tx.value.as_str())?;
    fields.set("data", lua.create_string(&tx.data)?)?;

    let meta = lua.create_table()?;
    meta.set("__index", fields)?;
    meta.set(
        "__newindex",
        lua.create_function(|_, _: mlua::MultiValue| -> mlua::Result<()> {
            Err(mlua::Error::runtime("transaction is read-only"))
        })?,
    )?;
    meta.set("__metatable", false)?;

    let proxy = lua.create_table()?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

/// `string.find(s, needle [, init [, plain]])`, always plain. Returns the
/// 1-based inclusive span of the first match at or after `init`, or nil.
fn find_plain(
    _: &Lua,
    (haystack, needle, init, _plain): (mlua::String, mlua::String, Option<i64>, Value),
) -> mlua::Result<(Option<i64>, Option<i64>)> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > MAX_FIND_NEEDLE {
        return Err(mlua::Error::runtime(format!(
            "string.find: needle longer than {MAX_FIND_NEEDLE} bytes"
        )));
    }

    let len = haystack.len();
    let start = match init.unwrap_or(1) {
        0 => 0,
        i if i > 0 => usize::try_from(i - 1).unwrap_or(usize::MAX),
        i => len.saturating_sub(usize::try_from(i.unsigned_abs()).unwrap_or(usize::MAX)),
    };
    if start > len {
        return Ok((None, None));
    }

    let found = if needle.is_empty() {
        Some(start)
    } else {
        let literal: String = needle.iter().map(|b| format!("\\x{b:02x}")).collect();
        let literal = RegexBuilder::new(&literal)
            .unicode(false)
            .build()
            .map_err(mlua::Error::external)?;
        literal
            .find(&haystack[start..])
            .map(|m| start + m.start())
    };

    Ok(match found {
        Some(at) => (Some(at as i64 + 1), Some((at + needle.len()) as i64)),
        None => (None, None),
    })
}

fn runtime(err: mlua::Error) -> PolicyError {
    PolicyError::Runtime(err.to_string())
}
