// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for producing crash reports from debugger sessions.
//!
//! Hand a debugger session that implements [`Inferior`][crashpost_common::Inferior]
//! to [`process_inferior`] and it walks every thread, loads the symbols it
//! needs within the configured [`MemoryTier`], and returns a [`ProcessState`]
//! that can be printed for humans or serialized as a Sentry event with
//! [`ProcessState::print_json`].
//!
//! The thread that is selected in the session when processing starts is
//! taken to be the one that crashed.

pub mod catalog;
pub mod cursor;
pub mod locks;
pub mod mi;
mod process_state;
mod processor;
pub mod script;
mod stackwalker;
mod symbols;
mod system_info;

pub use crate::catalog::{CoreListing, Module, ModuleCatalog, ModuleList, ProcMappings};
pub use crate::locks::{LockKind, LockReason, LockTable, ThreadState};
pub use crate::process_state::*;
pub use crate::processor::*;
pub use crate::script::{ScriptFrame, ScriptThread};
pub use crate::stackwalker::*;
pub use crate::symbols::*;
pub use crate::system_info::*;
