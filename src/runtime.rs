//! Sandboxed Luau state for one preview host.
//! Fresh VM per host, heap limit, blocked globals, captured `print`, and an
//! interrupt that enforces the execution budget and host teardown.

use crate::error::{PreviewError, PreviewResult};
use mlua::{Lua, VmState};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lua heap limit per host: 1 MB.
pub const LUA_MEMORY_LIMIT_BYTES: usize = 1024 * 1024;

/// Default wall-clock budget for setup plus first render.
pub const DEFAULT_EXECUTION_BUDGET_MS: u64 = 200;

/// Default cap on the markup a component may render: 2 MB.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

/// Maximum captured `print` lines per host.
const MAX_CONSOLE_LINES: usize = 200;

const BLOCKED_GLOBALS: &[&str] = &[
    "require",
    "loadstring",
    "getfenv",
    "setfenv",
    "debug",
    "collectgarbage",
    "newproxy",
];

const TRIP_NONE: u8 = 0;
const TRIP_CANCELLED: u8 = 1;
const TRIP_BUDGET: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub memory_limit_bytes: usize,
    pub execution_budget: Duration,
    /// Rendering stops once this many bytes of markup have been produced.
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            memory_limit_bytes: LUA_MEMORY_LIMIT_BYTES,
            execution_budget: Duration::from_millis(DEFAULT_EXECUTION_BUDGET_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

pub struct Sandbox {
    lua: Lua,
    console: Arc<Mutex<Vec<String>>>,
    trip: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    started: Instant,
    budget: Duration,
    max_output_bytes: usize,
}

impl Sandbox {
    /// Creates a Lua state: sandbox, blocked globals, print capture, memory limit, interrupt.
    pub fn new(limits: SandboxLimits, cancel: Arc<AtomicBool>) -> PreviewResult<Self> {
        let lua = Lua::new();
        lua.sandbox(true)?;

        for name in BLOCKED_GLOBALS {
            let msg = format!("{} is not available in previews", name);
            lua.globals().set(
                *name,
                lua.create_function(move |_, _: mlua::MultiValue| {
                    Err::<(), _>(mlua::Error::RuntimeError(msg.clone()))
                })?,
            )?;
        }

        let console = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = console.clone();
        let print_fn = lua.create_function(move |_, args: mlua::Variadic<mlua::Value>| {
            let line = args
                .iter()
                .map(|v| v.to_string().unwrap_or_else(|_| v.type_name().to_string()))
                .collect::<Vec<_>>()
                .join("\t");
            let mut lines = sink.lock().unwrap_or_else(|e| e.into_inner());
            if lines.len() < MAX_CONSOLE_LINES {
                lines.push(line);
            }
            Ok(())
        })?;
        lua.globals().set("print", print_fn)?;

        let trip = Arc::new(AtomicU8::new(TRIP_NONE));
        let trip_flag = trip.clone();
        let cancel_flag = cancel.clone();
        let budget = limits.execution_budget;
        let started = Instant::now();
        lua.set_interrupt(move |_| match check_trip(&cancel_flag, started, budget) {
            TRIP_NONE => Ok(VmState::Continue),
            reason => {
                trip_flag.store(reason, Ordering::Relaxed);
                Err(mlua::Error::RuntimeError(trip_message(reason, budget)))
            }
        });

        lua.set_memory_limit(limits.memory_limit_bytes)?;

        Ok(Sandbox {
            lua,
            console,
            trip,
            cancel,
            started,
            budget,
            max_output_bytes: limits.max_output_bytes,
        })
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Same checks as the VM interrupt, for host-side work such as
    /// rendering Lua values into markup.
    pub fn check_limits(&self) -> PreviewResult<()> {
        match check_trip(&self.cancel, self.started, self.budget) {
            TRIP_NONE => Ok(()),
            reason => {
                self.trip.store(reason, Ordering::Relaxed);
                Err(self.tripped().unwrap_or(PreviewError::HostTornDown))
            }
        }
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Runs a setup script in the host's global environment.
    pub fn exec(&self, name: &str, source: &str) -> PreviewResult<()> {
        self.lua
            .load(source)
            .set_name(format!("={}", name))
            .exec()
            .map_err(|e| self.runtime_error(e))
    }

    /// Evaluates an expression and returns its value.
    pub fn eval(&self, name: &str, expr: &str) -> PreviewResult<mlua::Value> {
        self.lua
            .load(format!("return {}\n", expr))
            .set_name(format!("={}", name))
            .eval::<mlua::Value>()
            .map_err(|e| self.runtime_error(e))
    }

    /// Set when the interrupt stopped execution. Such errors must not be
    /// swallowed by render boundaries.
    pub fn tripped(&self) -> Option<PreviewError> {
        match self.trip.load(Ordering::Relaxed) {
            TRIP_CANCELLED => Some(PreviewError::HostTornDown),
            TRIP_BUDGET => Some(PreviewError::RuntimeError {
                message: trip_message(TRIP_BUDGET, self.budget),
            }),
            _ => None,
        }
    }

    pub fn console(&self) -> Vec<String> {
        self.console
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }

    fn runtime_error(&self, err: mlua::Error) -> PreviewError {
        if let Some(tripped) = self.tripped() {
            return tripped;
        }
        let message = match err {
            mlua::Error::MemoryError(_) => "script ran out of memory".to_string(),
            other => other.to_string(),
        };
        PreviewError::RuntimeError { message }
    }
}

fn check_trip(cancel: &AtomicBool, started: Instant, budget: Duration) -> u8 {
    if cancel.load(Ordering::Relaxed) {
        TRIP_CANCELLED
    } else if started.elapsed() > budget {
        TRIP_BUDGET
    } else {
        TRIP_NONE
    }
}

fn trip_message(reason: u8, budget: Duration) -> String {
    match reason {
        TRIP_CANCELLED => "preview host was torn down".to_string(),
        _ => format!(
            "script exceeded its execution budget of {}ms",
            budget.as_millis()
        ),
    }
}

/// Syntax-checks Luau without running it. Returns the compiler message on failure.
pub fn check_syntax(name: &str, source: &str) -> Result<(), String> {
    let lua = Lua::new();
    lua.load(source)
        .set_name(format!("={}", name))
        .into_function()
        .map(|_| ())
        .map_err(|e| match e {
            mlua::Error::SyntaxError { message, .. } => message,
            other => other.to_string(),
        })
}
