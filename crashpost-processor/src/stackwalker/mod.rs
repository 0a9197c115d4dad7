// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Walk the stack frames of a thread.

use std::collections::BTreeMap;

use crashpost_common::utils::{canonical_path, hex_address, mangle_home};
use crashpost_common::{FrameType, Inferior, InferiorError, ThreadInfo};
use tracing::trace;

use crate::catalog::ModuleCatalog;
use crate::cursor::Cursor;
use crate::locks::{thread_state, LockTable};
use crate::process_state::{CallStack, StackFrame};

/// The fatal-signal handler installed by the crashed application.
pub const CRASH_HANDLER: &str = "KCrash::defaultCrashHandler";

/// Functions that run the application's main loop.
const MAIN_LOOP_FUNCTIONS: &[&str] = &[
    "main",
    "QCoreApplication::exec",
    "QGuiApplication::exec",
    "QApplication::exec",
];

// A corrupted stack can make the debugger unwind forever.
pub(crate) const MAX_FRAMES: usize = 1024;

fn is_main_loop(function: &str) -> bool {
    MAIN_LOOP_FUNCTIONS.iter().any(|name| {
        function == *name
            || function
                .strip_prefix(name)
                .map_or(false, |rest| rest.starts_with('('))
    })
}

/// What to collect while walking.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Clip the crash handler frames off this thread.
    pub crashed: bool,
    /// Capture local variables and registers.
    pub capture_frame_data: bool,
    /// Home directory to hide in file names.
    pub home_dir: Option<String>,
}

/// How much variable capture a walk achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub frames: usize,
    pub frames_with_vars: usize,
}

fn read_registers(inferior: &mut dyn Inferior) -> Option<BTreeMap<String, String>> {
    match inferior.frame_registers() {
        Ok(registers) => Some(
            registers
                .into_iter()
                .filter(|reg| !reg.name.starts_with("ymm"))
                .map(|reg| (reg.name, hex_address(reg.value.unwrap_or(0))))
                .collect(),
        ),
        Err(e) => {
            trace!("walker: no registers: {e}");
            None
        }
    }
}

fn read_vars(inferior: &mut dyn Inferior) -> Option<BTreeMap<String, String>> {
    match inferior.frame_symbols() {
        Ok(symbols) => Some(
            symbols
                .into_iter()
                .filter_map(|symbol| {
                    let rendered = symbol.value?.rendered?;
                    Some((symbol.name, rendered))
                })
                .collect(),
        ),
        Err(e) => {
            trace!("walker: no block for frame: {e}");
            None
        }
    }
}

fn read_frame(
    inferior: &mut dyn Inferior,
    catalog: &dyn ModuleCatalog,
    options: &WalkOptions,
) -> Result<StackFrame, InferiorError> {
    let instruction = inferior.frame_pc()?;
    let frame_type = inferior.frame_type().unwrap_or(FrameType::Normal);
    let function_name = inferior.frame_function();
    let location = inferior.frame_location();
    let package = catalog
        .owning_module(inferior, instruction)
        .map(|module| canonical_path(&module.code_file));
    let vars = if options.capture_frame_data {
        read_vars(inferior)
    } else {
        None
    };

    let (source_file_name, source_line) = match location {
        Some(location) => (
            location
                .file
                .map(|file| mangle_home(&file, options.home_dir.as_deref()).into_owned()),
            location.line,
        ),
        None => (None, None),
    };

    Ok(StackFrame {
        instruction,
        frame_type,
        function_name,
        source_file_name,
        source_line,
        package,
        vars,
    })
}

/// Walk the stack of `thread`, newest frame first.
///
/// The thread stays selected afterwards, at its newest frame. For the
/// crashed thread every frame up to and including the oldest crash handler
/// or signal trampoline frame is dropped.
pub fn walk_thread(
    inferior: &mut dyn Inferior,
    catalog: &dyn ModuleCatalog,
    thread: &ThreadInfo,
    options: &WalkOptions,
) -> Result<(CallStack, TraceStats), InferiorError> {
    inferior.switch_thread(thread.num)?;
    let mut cursor = Cursor::frames(inferior);

    let mut frames = Vec::new();
    let mut handler = None;
    let mut trampoline = None;
    let mut main_thread = false;
    let mut registers = None;

    if cursor.select_newest_frame().is_ok() {
        if options.capture_frame_data {
            registers = read_registers(&mut *cursor);
        }
        loop {
            let frame = match read_frame(&mut *cursor, catalog, options) {
                Ok(frame) => frame,
                Err(e) => {
                    trace!("walker: stopping at unreadable frame {}: {e}", frames.len());
                    break;
                }
            };
            let level = frames.len();
            if let Some(function) = &frame.function_name {
                if function.starts_with(CRASH_HANDLER) {
                    handler = Some(level);
                }
                if is_main_loop(function) {
                    main_thread = true;
                }
            }
            if frame.frame_type == FrameType::SigTramp {
                trampoline = Some(level);
            }
            frames.push(frame);

            if frames.len() >= MAX_FRAMES {
                trace!("walker: giving up after {MAX_FRAMES} frames");
                break;
            }
            if let Err(e) = cursor.select_older_frame() {
                trace!("walker: {e}");
                break;
            }
        }
    }

    let mut actually_crashed = false;
    if options.crashed {
        if let Some(clip) = handler.max(trampoline) {
            trace!("walker: clipping {} handler frames", clip + 1);
            frames.drain(..=clip);
        }
        actually_crashed = handler.is_some();
    }

    let mut locks = LockTable::new();
    for frame in &frames {
        if let Some(function) = &frame.function_name {
            locks.observe(function, thread.tid);
        }
    }
    let state = thread_state(thread.is_exited, &locks);

    let stats = TraceStats {
        frames: frames.len(),
        frames_with_vars: frames.iter().filter(|f| f.has_vars()).count(),
    };

    let stack = CallStack {
        thread: thread.clone(),
        frames,
        registers,
        actually_crashed,
        main_thread,
        locks,
        state,
    };
    Ok((stack, stats))
}

#[cfg(test)]
mod unittest;
