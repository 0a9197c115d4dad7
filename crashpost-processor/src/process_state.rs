// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The state of a crashed process.

use std::collections::BTreeMap;
use std::io;
use std::io::prelude::*;

use crashpost_common::signals;
use crashpost_common::utils::basename;
use crashpost_common::{FrameType, ThreadInfo};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::ModuleList;
use crate::locks::{LockTable, ThreadState};
use crate::script::ScriptThread;
use crate::system_info::SystemInfo;

/// Name of the sdk reported in the event.
pub const SDK_NAME: &str = "crashpost.stackwalk";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(into = "String")]
pub struct Address(pub u64);

impl From<u64> for Address {
    fn from(v: u64) -> Self {
        Address(v)
    }
}

impl From<Address> for u64 {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A single stack frame produced by the stack walker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrame {
    /// The program counter of this frame.
    pub instruction: u64,
    pub frame_type: FrameType,
    pub function_name: Option<String>,
    /// Source file, with the home directory already replaced by `$HOME`.
    pub source_file_name: Option<String>,
    /// The line as the debugger reported it.
    pub source_line: Option<i64>,
    /// Canonical path of the module containing `instruction`.
    pub package: Option<String>,
    /// Captured locals, if capture was enabled for this thread.
    pub vars: Option<BTreeMap<String, String>>,
}

impl StackFrame {
    /// The line number of the report, which counts from one more than the
    /// debugger does. Negative lines are dropped.
    pub fn lineno(&self) -> Option<i64> {
        self.source_line.filter(|line| *line >= 0).map(|line| line + 1)
    }

    pub fn has_vars(&self) -> bool {
        self.vars.as_ref().map_or(false, |vars| !vars.is_empty())
    }

    fn to_json(&self) -> Value {
        let mut frame = serde_json::Map::new();
        if let Some(file) = &self.source_file_name {
            frame.insert("filename".into(), json!(file));
        }
        if let Some(function) = &self.function_name {
            frame.insert("function".into(), json!(function));
        }
        if let Some(package) = &self.package {
            frame.insert("package".into(), json!(package));
        }
        frame.insert("instruction_addr".into(), json!(Address(self.instruction)));
        if let Some(lineno) = self.lineno() {
            frame.insert("lineno".into(), json!(lineno));
        }
        if let Some(vars) = &self.vars {
            frame.insert("vars".into(), json!(vars));
        }
        Value::Object(frame)
    }
}

/// The stack of one thread, newest frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    pub thread: ThreadInfo,
    pub frames: Vec<StackFrame>,
    /// Registers of the newest frame, formatted as hex.
    pub registers: Option<BTreeMap<String, String>>,
    /// Whether the fatal-signal handler was found in this stack.
    pub actually_crashed: bool,
    pub main_thread: bool,
    pub locks: LockTable,
    pub state: Option<ThreadState>,
}

impl CallStack {
    /// The `stacktrace` object of the report, frames oldest first.
    pub fn stacktrace_json(&self) -> Value {
        let mut trace = json!({
            "frames": self.frames.iter().rev().map(StackFrame::to_json).collect::<Vec<_>>(),
        });
        if let Some(registers) = &self.registers {
            trace["registers"] = json!(registers);
        }
        trace
    }

    fn to_json(&self, is_crashed: bool) -> Value {
        let mut thread = json!({
            "id": self.thread.tid,
            "name": self.thread.name,
            "crashed": is_crashed && self.actually_crashed,
            "current": is_crashed,
            "main": self.main_thread,
            "stacktrace": self.stacktrace_json(),
        });
        if let Some(state) = self.state {
            thread["state"] = json!(state.as_str());
        }
        if !self.locks.is_empty() {
            thread["held_locks"] = self.locks.to_json();
        }
        thread
    }

    /// Write a human-readable description of the stack to `f`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        if self.frames.is_empty() {
            writeln!(f, "<no frames>")?;
        }
        for (i, frame) in self.frames.iter().enumerate() {
            write!(f, "{i:2}  ")?;
            if let Some(package) = &frame.package {
                write!(f, "{}", basename(package))?;
                if let Some(function) = &frame.function_name {
                    write!(f, "!{function}")?;
                }
            } else if let Some(function) = &frame.function_name {
                write!(f, "{function}")?;
            } else {
                write!(f, "{}", Address(frame.instruction))?;
            }
            if let (Some(file), Some(line)) = (&frame.source_file_name, frame.lineno()) {
                write!(f, " [{} : {line}]", basename(file))?;
            }
            writeln!(f)?;
            writeln!(f, "    pc = {}", Address(frame.instruction))?;
            if let Some(vars) = &frame.vars {
                for (name, value) in vars {
                    writeln!(f, "    {name} = {value}")?;
                }
            }
        }
        Ok(())
    }
}

/// The state of a process as recorded by a debugger session.
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub event_id: Uuid,
    /// When the report was made.
    pub time: OffsetDateTime,
    pub program: String,
    pub program_build_id: Option<String>,
    pub sdk_version: String,
    pub app_version: Option<String>,
    /// The fatal signal number.
    pub signal: u32,
    /// Kernel thread id of the crashed thread.
    pub crashed_thread_id: u64,
    /// The index of the crashed thread in `threads`, `None` when it could
    /// not be walked.
    pub requesting_thread: Option<usize>,
    /// Stacks for each valid thread.
    pub threads: Vec<CallStack>,
    pub script_thread: Option<ScriptThread>,
    /// Information about the system on which the process crashed.
    pub system_info: SystemInfo,
    /// The modules mapped into the process, every one with a build id.
    pub modules: ModuleList,
    /// Fraction of crashed-thread frames with captured variables.
    pub stack_vars_rate: f64,
    /// The crash handler's own error message, if it set one.
    pub kcrash_error_message: Option<String>,
}

impl ProcessState {
    pub fn crashing_thread(&self) -> Option<&CallStack> {
        self.requesting_thread.map(|index| &self.threads[index])
    }

    /// `yes` when enough of the crashed thread had variables to be useful.
    pub fn stack_vars_tag(&self) -> &'static str {
        if self.stack_vars_rate > 0.25 {
            "yes"
        } else {
            "no"
        }
    }

    fn release(&self) -> String {
        format!(
            "{}@{}",
            self.program,
            self.app_version.as_deref().unwrap_or("unknown")
        )
    }

    /// Write a human-readable description of the process state to `f`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        self.print_internal(f, false)
    }

    /// Write a brief human-readable description of the process state to `f`.
    ///
    /// Only includes the summary at the top and a backtrace of the crashing thread.
    pub fn print_brief<T: Write>(&self, f: &mut T) -> io::Result<()> {
        self.print_internal(f, true)
    }

    fn print_internal<T: Write>(&self, f: &mut T, brief: bool) -> io::Result<()> {
        let sys = &self.system_info;
        writeln!(
            f,
            "Operating system: {}",
            sys.host.os_name.as_deref().unwrap_or("Linux")
        )?;
        if let Some(kernel) = &sys.kernel_version {
            writeln!(f, "                  {kernel}")?;
        }
        writeln!(
            f,
            "CPU: {}\n     {} CPU{}",
            sys.arch,
            sys.cpu_count,
            if sys.cpu_count > 1 { "s" } else { "" }
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Crash reason:  {} / {}",
            signals::name(self.signal).unwrap_or_else(|| self.signal.to_string()),
            signals::describe(self.signal)
        )?;
        if let Some(message) = &self.kcrash_error_message {
            writeln!(f, "Crash handler message: {message}")?;
        }
        writeln!(f)?;

        if let Some(requesting_thread) = self.requesting_thread {
            let stack = &self.threads[requesting_thread];
            writeln!(
                f,
                "Thread {} {} ({})",
                stack.thread.tid,
                stack.thread.name.as_deref().unwrap_or(""),
                if stack.actually_crashed {
                    "crashed"
                } else {
                    "crashed, handler not found"
                }
            )?;
            stack.print(f)?;
            writeln!(f)?;
        } else {
            writeln!(f, "Thread {} (crashed, no stack)", self.crashed_thread_id)?;
            writeln!(f)?;
        }

        if brief {
            return Ok(());
        }

        for (i, stack) in self.threads.iter().enumerate() {
            if self.requesting_thread == Some(i) {
                continue;
            }
            write!(
                f,
                "Thread {} {}",
                stack.thread.tid,
                stack.thread.name.as_deref().unwrap_or("")
            )?;
            if let Some(state) = stack.state {
                write!(f, " ({state})")?;
            }
            writeln!(f)?;
            stack.print(f)?;
            writeln!(f)?;
        }

        if let Some(script) = &self.script_thread {
            writeln!(f, "QML stack")?;
            for (i, frame) in script.frames.iter().enumerate() {
                writeln!(
                    f,
                    "{i:2}  {} [{} : {}]",
                    frame.function.as_deref().unwrap_or("<anonymous>"),
                    frame.file.as_deref().unwrap_or("?"),
                    frame.line.map(|l| l.to_string()).unwrap_or_default()
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Loaded modules:")?;
        for module in self.modules.iter() {
            writeln!(
                f,
                "{} - {}  {}  ({})",
                Address(module.base_address),
                Address(module.end_address),
                basename(&module.code_file),
                module.build_id.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }

    /// The report as a Sentry event.
    pub fn to_json(&self) -> Value {
        let sys = &self.system_info;
        let signal_description = signals::describe(self.signal);
        let crashing = self.crashing_thread();

        let mut threads: Vec<Value> = self
            .threads
            .iter()
            .enumerate()
            .map(|(i, stack)| stack.to_json(self.requesting_thread == Some(i)))
            .collect();
        if let Some(script) = &self.script_thread {
            threads.push(script.to_json());
        }

        let mut output = json!({
            "event_id": self.event_id.simple().to_string(),
            "timestamp": self.time.format(&Rfc3339).ok(),
            "platform": "native",
            "level": "fatal",
            "message": format!("Signal {} in {}", self.signal, self.program),
            "sdk": {
                "name": SDK_NAME,
                "version": self.sdk_version,
            },
            "release": self.release(),
            "dist": self.program_build_id,
            "tags": {
                "binary": self.program,
                "stack_vars_rate": format!("{:.2}", self.stack_vars_rate),
                "stack_vars": self.stack_vars_tag(),
            },
            "debug_meta": {
                "images": self.modules.iter().map(|module| json!({
                    "type": "elf",
                    "image_addr": Address(module.base_address),
                    "image_size": module.size(),
                    "debug_id": module.debug_id().map(|id| id.to_string()),
                    "code_id": module.code_id().map(|id| id.to_string()),
                    "code_file": module.code_file,
                    "arch": sys.arch,
                })).collect::<Vec<_>>(),
            },
            "threads": threads,
            "exception": {
                "values": [{
                    "type": signals::name(self.signal),
                    "value": signal_description,
                    "thread_id": self.crashed_thread_id,
                    "mechanism": {
                        "type": "crashpost",
                        "handled": false,
                        "synthetic": true,
                        "meta": {
                            "signal": {
                                "number": self.signal,
                                "name": signals::name(self.signal).unwrap_or_else(|| signal_description.clone()),
                            },
                        },
                    },
                    "stacktrace": crashing.map(CallStack::stacktrace_json),
                }],
            },
            "contexts": {
                "device": {
                    "name": sys.host.hostname,
                    "family": sys.host.chassis,
                    "simulator": sys.host.virtualization,
                    "arch": sys.arch,
                    "memory_size": sys.memory_size,
                    "free_memory": sys.free_memory,
                    "boot_time": sys.boot_time.and_then(|t| t.format(&Rfc3339).ok()),
                    "timezone": sys.host.timezone,
                    "processor_count": sys.cpu_count,
                },
                "os": {
                    "name": sys.host.os_name,
                    "version": sys.host.os_version_id,
                    "build": sys.host.os_build(),
                    "kernel_version": sys.kernel_version,
                    "raw_description": sys.raw_description,
                },
            },
        });

        if let Some(message) = &self.kcrash_error_message {
            output["extra"] = json!({ "kcrash_error_message": message });
        }
        output
    }

    /// Outputs the report as Sentry event JSON.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> Result<(), serde_json::Error> {
        let output = self.to_json();
        if pretty {
            serde_json::to_writer_pretty(f, &output)
        } else {
            serde_json::to_writer(f, &output)
        }
    }
}
