// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Linux signal numbers and their descriptions.

#![allow(clippy::upper_case_acronyms)]

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

/// Signal numbers from bits/signum.h.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum Signal {
    SIGHUP = 0x1u32,
    SIGINT = 0x2,
    SIGQUIT = 0x3,
    SIGILL = 0x4,
    SIGTRAP = 0x5,
    SIGABRT = 0x6,
    SIGBUS = 0x7,
    SIGFPE = 0x8,
    SIGKILL = 0x9,
    SIGUSR1 = 0xa,
    SIGSEGV = 0xb,
    SIGUSR2 = 0xc,
    SIGPIPE = 0xd,
    SIGALRM = 0xe,
    SIGTERM = 0xf,
    SIGSTKFLT = 0x10,
    SIGCHLD = 0x11,
    SIGCONT = 0x12,
    SIGSTOP = 0x13,
    SIGTSTP = 0x14,
    SIGTTIN = 0x15,
    SIGTTOU = 0x16,
    SIGURG = 0x17,
    SIGXCPU = 0x18,
    SIGXFSZ = 0x19,
    SIGVTALRM = 0x1a,
    SIGPROF = 0x1b,
    SIGWINCH = 0x1c,
    SIGIO = 0x1d,
    SIGPWR = 0x1e,
    SIGSYS = 0x1f,
}

impl Signal {
    pub fn from_number(number: u32) -> Option<Signal> {
        Signal::from_u32(number)
    }

    /// The symbolic name, e.g. `SIGSEGV`.
    pub fn name(self) -> String {
        format!("{self:?}")
    }

    /// The description glibc's `strsignal` gives.
    pub fn description(self) -> &'static str {
        match self {
            Signal::SIGHUP => "Hangup",
            Signal::SIGINT => "Interrupt",
            Signal::SIGQUIT => "Quit",
            Signal::SIGILL => "Illegal instruction",
            Signal::SIGTRAP => "Trace/breakpoint trap",
            Signal::SIGABRT => "Aborted",
            Signal::SIGBUS => "Bus error",
            Signal::SIGFPE => "Floating point exception",
            Signal::SIGKILL => "Killed",
            Signal::SIGUSR1 => "User defined signal 1",
            Signal::SIGSEGV => "Segmentation fault",
            Signal::SIGUSR2 => "User defined signal 2",
            Signal::SIGPIPE => "Broken pipe",
            Signal::SIGALRM => "Alarm clock",
            Signal::SIGTERM => "Terminated",
            Signal::SIGSTKFLT => "Stack fault",
            Signal::SIGCHLD => "Child exited",
            Signal::SIGCONT => "Continued",
            Signal::SIGSTOP => "Stopped (signal)",
            Signal::SIGTSTP => "Stopped",
            Signal::SIGTTIN => "Stopped (tty input)",
            Signal::SIGTTOU => "Stopped (tty output)",
            Signal::SIGURG => "Urgent I/O condition",
            Signal::SIGXCPU => "CPU time limit exceeded",
            Signal::SIGXFSZ => "File size limit exceeded",
            Signal::SIGVTALRM => "Virtual timer expired",
            Signal::SIGPROF => "Profiling timer expired",
            Signal::SIGWINCH => "Window changed",
            Signal::SIGIO => "I/O possible",
            Signal::SIGPWR => "Power failure",
            Signal::SIGSYS => "Bad system call",
        }
    }
}

/// The `strsignal` text for a raw signal number, including unknown ones.
pub fn describe(number: u32) -> String {
    match Signal::from_number(number) {
        Some(signal) => signal.description().to_string(),
        None => format!("Unknown signal {number}"),
    }
}

/// The symbolic name for a raw signal number, e.g. `SIGSEGV`.
pub fn name(number: u32) -> Option<String> {
    Signal::from_number(number).map(Signal::name)
}
