// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The debugger-session interface.
//!
//! An [`Inferior`] is a process (or core image) stopped under a debugger. It has
//! exactly one cursor: a selected thread and, within it, a selected frame. Most
//! reads are relative to that cursor, so anything that moves it is expected to
//! put it back when done.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The debugger's per-inferior thread number (not the kernel thread id).
pub type ThreadNum = u32;

/// An error reported by the debugger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferiorError {
    #[error("no frame is selected")]
    NoFrame,
    #[error("no older frame")]
    NoOlderFrame,
    #[error("frame {0} does not exist")]
    InvalidFrame(usize),
    #[error("thread {0} does not exist")]
    InvalidThread(ThreadNum),
    #[error("cannot access memory at address {0:#x}")]
    Memory(u64),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("not supported by this debugger: {0}")]
    Unsupported(&'static str),
}

/// A thread as enumerated by the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    /// The debugger's number for this thread, used to select it.
    pub num: ThreadNum,
    /// The kernel thread id (LWP).
    pub tid: u64,
    pub name: Option<String>,
    /// Threads that are not valid cannot be selected and have no frames.
    pub is_valid: bool,
    pub is_exited: bool,
}

/// The kind of a stack frame, as the unwinder classified it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Normal,
    Dummy,
    Inline,
    TailCall,
    /// A signal trampoline (`__restore_rt` and friends).
    SigTramp,
    Arch,
    Sentinel,
}

impl Default for FrameType {
    fn default() -> Self {
        FrameType::Normal
    }
}

/// Source location of a frame.
///
/// `line` is whatever the debugger reports, which is 0 when the line
/// table has an entry without a usable line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<i64>,
}

/// Where a symbol in a frame's block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Variable,
    Argument,
    Other,
}

/// The value of a symbol, as far as the debugger could read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolValue {
    /// The value printed the way the debugger prints it. `None` when it
    /// cannot be turned into a string.
    pub rendered: Option<String>,
    pub optimized_out: bool,
    /// For pointers, the unqualified name of the pointed-to type.
    pub pointee_type: Option<String>,
    /// The value as an integer, when it has one (pointers do).
    pub address: Option<u64>,
}

/// A symbol visible in a frame's block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// `None` when reading the symbol in this frame failed.
    pub value: Option<SymbolValue>,
}

impl FrameSymbol {
    pub fn is_variable_or_argument(&self) -> bool {
        matches!(self.kind, SymbolKind::Variable | SymbolKind::Argument)
    }
}

/// A register of the selected frame. `value` is `None` when it is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub value: Option<u64>,
}

/// How much work a module load should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Read the full symbol and debug information.
    Full,
    /// Only register the module so that addresses map to it.
    PresenceOnly,
}

/// A process or core image stopped under a debugger.
///
/// Cursor-relative reads (`frame_*`) apply to the selected frame of the
/// selected thread.
pub trait Inferior {
    /// `true` for a running process, `false` for a core image.
    fn is_live(&self) -> bool;
    /// The core file being inspected, if any.
    fn core_file(&self) -> Option<String>;
    /// Path of the main executable.
    fn program_path(&self) -> Option<String>;
    /// Build id of the main executable, as lowercase hex.
    fn program_build_id(&mut self) -> Option<String>;

    fn threads(&mut self) -> Vec<ThreadInfo>;
    fn selected_thread(&self) -> Option<ThreadNum>;
    fn switch_thread(&mut self, thread: ThreadNum) -> Result<(), InferiorError>;

    fn select_newest_frame(&mut self) -> Result<(), InferiorError>;
    /// Move the cursor one frame towards the caller. Fails at the outermost frame.
    fn select_older_frame(&mut self) -> Result<(), InferiorError>;
    /// Select a frame by its level, 0 being the newest.
    fn select_frame(&mut self, level: usize) -> Result<(), InferiorError>;

    fn frame_pc(&mut self) -> Result<u64, InferiorError>;
    fn frame_type(&mut self) -> Result<FrameType, InferiorError>;
    /// The function name as the symbol tables name it.
    fn frame_function(&mut self) -> Option<String>;
    fn frame_location(&mut self) -> Option<SourceLocation>;
    /// Symbols of the innermost block enclosing the frame's pc.
    fn frame_symbols(&mut self) -> Result<Vec<FrameSymbol>, InferiorError>;
    fn frame_registers(&mut self) -> Result<Vec<Register>, InferiorError>;

    /// The shared object whose text contains `address`.
    fn solib_name(&mut self, address: u64) -> Option<String>;
    /// Evaluate an expression in the selected frame and print the result.
    fn evaluate(&mut self, expression: &str) -> Result<String, InferiorError>;
    /// Read a static string variable by name.
    fn lookup_static_symbol(&mut self, name: &str) -> Result<Option<String>, InferiorError>;

    /// The `info proc mappings` report of a live process.
    fn proc_mappings(&mut self) -> Result<String, InferiorError>;
    /// Read the GNU build-id note of the ELF image mapped at `address`.
    fn read_build_id(&mut self, address: u64) -> Result<Option<String>, InferiorError>;

    /// Allow or forbid fetching debug information over the network.
    fn set_symbol_download(&mut self, enabled: bool);
    /// Load the module at `path` mapped at `address`. Returns the build id of
    /// the file that was actually loaded, if it has one.
    fn load_module(
        &mut self,
        path: &str,
        address: u64,
        mode: LoadMode,
    ) -> Result<Option<String>, InferiorError>;
}
