// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::collections::BTreeMap;

use crashpost_common::utils::basename;
use crashpost_common::{Inferior, InferiorError, ThreadInfo, ThreadNum};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::catalog::{CoreListing, ModuleCatalog, ProcMappings};
use crate::cursor::Cursor;
use crate::process_state::{CallStack, ProcessState};
use crate::script::find_script_stack;
use crate::stackwalker::{walk_thread, TraceStats, WalkOptions};
use crate::symbols::{MemoryTier, Resolver};
use crate::system_info::SystemInfo;

/// The static string the crash handler stores its own failures in.
pub const KCRASH_ERROR_MESSAGE: &str = "s_kcrashErrorMessage";

/// Configuration of a processing run.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// How much memory symbol loading and variable capture may use.
    pub tier: MemoryTier,
    /// Name of the crashed program. Defaults to the executable's file name.
    pub program: Option<String>,
    /// The fatal signal number.
    pub signal: u32,
    /// Version reported for the sdk.
    pub sdk_version: String,
    /// Version of the crashed application, if known.
    pub app_version: Option<String>,
    /// Replaced by `$HOME` in file names.
    pub home_dir: Option<String>,
    /// Command printing the host facts as JSON.
    pub host_facts_command: Option<Vec<String>>,
    /// Command listing the modules of a core file; `--core=<path>` is appended.
    pub module_lister: Vec<String>,
    /// The core file, if the inferior doesn't know it.
    pub core_path: Option<String>,
}

impl ProcessorOptions {
    pub fn new(tier: MemoryTier, signal: u32) -> ProcessorOptions {
        ProcessorOptions {
            tier,
            program: None,
            signal,
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: None,
            home_dir: None,
            host_facts_command: None,
            module_lister: vec!["eu-unstrip".to_string(), "-n".to_string()],
            core_path: None,
        }
    }

    pub fn spacious(signal: u32) -> ProcessorOptions {
        ProcessorOptions::new(MemoryTier::Spacious, signal)
    }

    pub fn some(signal: u32) -> ProcessorOptions {
        ProcessorOptions::new(MemoryTier::Some, signal)
    }

    pub fn little(signal: u32) -> ProcessorOptions {
        ProcessorOptions::new(MemoryTier::Little, signal)
    }

    pub fn cramped(signal: u32) -> ProcessorOptions {
        ProcessorOptions::new(MemoryTier::Cramped, signal)
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        ProcessorOptions::new(MemoryTier::default(), 11)
    }
}

/// An error encountered while processing.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("loading {path} mapped build id {found:?}, expected {expected}")]
    UnexpectedMapping {
        path: String,
        expected: String,
        found: Option<String>,
    },
    #[error("module {0} has no usable build id")]
    MissingBuildId(String),
    #[error("no thread is selected, cannot tell which thread crashed")]
    NoCrashedThread,
    #[error(transparent)]
    Inferior(#[from] InferiorError),
    #[error("cannot serialize the report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ProcessError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessError::UnexpectedMapping { .. } => "UnexpectedMapping",
            ProcessError::MissingBuildId(_) => "MissingBuildId",
            ProcessError::NoCrashedThread => "NoCrashedThread",
            ProcessError::Inferior(_) => "Inferior",
            ProcessError::Serialize(_) => "Serialize",
        }
    }
}

/// Everything one processing run accumulates.
struct Session {
    tier: MemoryTier,
    crashed_thread: ThreadNum,
    home_dir: Option<String>,
    catalog: Box<dyn ModuleCatalog>,
    resolver: Resolver,
    traces: BTreeMap<ThreadNum, CallStack>,
    stats: TraceStats,
}

impl Session {
    /// The trace of `thread`, computed on first use.
    fn trace(
        &mut self,
        inferior: &mut dyn Inferior,
        thread: &ThreadInfo,
    ) -> Result<&CallStack, ProcessError> {
        if !self.traces.contains_key(&thread.num) {
            let crashed = thread.num == self.crashed_thread;
            self.resolver
                .load_for_thread(inferior, &*self.catalog, thread, crashed)?;
            let options = WalkOptions {
                crashed,
                capture_frame_data: self.tier.captures_frame_data(),
                home_dir: self.home_dir.clone(),
            };
            let (stack, stats) = walk_thread(inferior, &*self.catalog, thread, &options)?;
            // Only the crashed thread counts towards the capture rate.
            if inferior.selected_thread() == Some(self.crashed_thread) {
                self.stats.frames += stats.frames;
                self.stats.frames_with_vars += stats.frames_with_vars;
            }
            self.traces.insert(thread.num, stack);
        }
        self.traces
            .get(&thread.num)
            .ok_or(ProcessError::Inferior(InferiorError::InvalidThread(thread.num)))
    }

    fn stack_vars_rate(&self) -> f64 {
        if self.stats.frames == 0 {
            return 0.0;
        }
        let rate = self.stats.frames_with_vars as f64 / self.stats.frames as f64;
        (rate * 100.0).round() / 100.0
    }
}

fn select_catalog(
    inferior: &mut dyn Inferior,
    options: &ProcessorOptions,
) -> Box<dyn ModuleCatalog> {
    if inferior.is_live() {
        return Box::new(ProcMappings::from_inferior(inferior));
    }
    match options.core_path.clone().or_else(|| inferior.core_file()) {
        Some(core) => Box::new(CoreListing::from_tool(&options.module_lister, &core)),
        None => {
            warn!("processor: no core file, the report will have no images");
            Box::new(CoreListing::default())
        }
    }
}

fn read_kcrash_error_message(inferior: &mut dyn Inferior) -> Option<String> {
    match inferior.lookup_static_symbol(KCRASH_ERROR_MESSAGE) {
        Ok(Some(message)) if !message.is_empty() => Some(message),
        Ok(_) => None,
        Err(e) => {
            trace!("processor: no crash handler message: {e}");
            None
        }
    }
}

/// Walk every thread of `inferior` and build a crash report.
///
/// The selected thread is taken to be the one that crashed. The inferior's
/// cursor is back where it was when this returns.
///
/// # Examples
///
/// ```
/// use crashpost_processor::{process_inferior, MemoryTier, ProcessorOptions};
/// use crashpost_synth::{SynthFrame, SynthInferior, SynthThread};
///
/// let mut inferior = SynthInferior::new().add_thread(
///     SynthThread::new(1, 4242)
///         .frame(SynthFrame::new(0x1000).function("crash"))
///         .frame(SynthFrame::new(0x2000).function("main")),
/// );
/// let options = ProcessorOptions::new(MemoryTier::Little, 11);
/// let state = process_inferior(&mut inferior, &options).unwrap();
/// assert_eq!(state.threads.len(), 1);
/// println!("Processed {} threads", state.threads.len());
/// ```
pub fn process_inferior(
    inferior: &mut dyn Inferior,
    options: &ProcessorOptions,
) -> Result<ProcessState, ProcessError> {
    let mut cursor = Cursor::thread(inferior);
    let crashed_thread = cursor
        .selected_thread()
        .ok_or(ProcessError::NoCrashedThread)?;
    let threads = cursor.threads();
    let crashed_info = threads
        .iter()
        .find(|t| t.num == crashed_thread)
        .cloned()
        .ok_or(ProcessError::NoCrashedThread)?;

    // Read before anything moves the cursor.
    let kcrash_error_message = read_kcrash_error_message(&mut *cursor);

    let live = cursor.is_live();
    info!(
        "processor: {} session, {} threads, tier {}",
        if live { "live" } else { "core" },
        threads.len(),
        options.tier
    );

    let catalog = select_catalog(&mut *cursor, options);
    debug!("processor: {} modules in catalog", catalog.modules().len());
    let resolver = Resolver::new(options.tier, &mut *cursor);
    let mut session = Session {
        tier: options.tier,
        crashed_thread,
        home_dir: options.home_dir.clone(),
        catalog,
        resolver,
        traces: BTreeMap::new(),
        stats: TraceStats::default(),
    };

    if crashed_info.is_valid {
        session.trace(&mut *cursor, &crashed_info)?;
    } else {
        warn!(
            "processor: crashed thread {} is not valid, reporting it without a stack",
            crashed_thread
        );
    }
    for thread in threads.iter().filter(|t| t.num != crashed_thread) {
        if !thread.is_valid {
            trace!("processor: skipping invalid thread {}", thread.num);
            continue;
        }
        match session.trace(&mut *cursor, thread) {
            Ok(_) => {}
            Err(ProcessError::Inferior(e)) => {
                warn!("processor: cannot walk thread {}: {e}", thread.num);
            }
            Err(e) => return Err(e),
        }
    }

    let script_thread = if live {
        find_script_stack(&mut *cursor, &threads, options.home_dir.as_deref())
    } else {
        None
    };

    // Every image needs a debug id, an empty or malformed build id is as
    // bad as none.
    for module in session.catalog.modules().iter() {
        if module.debug_id().is_none() {
            error!(
                "processor: {} has no usable build id ({:?})",
                module.code_file, module.build_id
            );
            return Err(ProcessError::MissingBuildId(module.code_file.clone()));
        }
    }

    let stack_vars_rate = session.stack_vars_rate();
    let mut requesting_thread = None;
    let mut stacks = Vec::new();
    for thread in &threads {
        if let Some(stack) = session.traces.remove(&thread.num) {
            if thread.num == crashed_thread {
                requesting_thread = Some(stacks.len());
            }
            stacks.push(stack);
        }
    }

    let program_path = cursor.program_path();
    let program = options
        .program
        .clone()
        .or_else(|| program_path.as_deref().map(|path| basename(path).to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let program_build_id = cursor.program_build_id();

    Ok(ProcessState {
        event_id: Uuid::new_v4(),
        time: OffsetDateTime::now_utc(),
        program,
        program_build_id,
        sdk_version: options.sdk_version.clone(),
        app_version: options.app_version.clone(),
        signal: options.signal,
        crashed_thread_id: crashed_info.tid,
        requesting_thread,
        threads: stacks,
        script_thread,
        system_info: SystemInfo::gather(options.host_facts_command.as_deref()),
        modules: session.catalog.modules().clone(),
        stack_vars_rate,
        kcrash_error_message,
    })
}
