// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! This crate defines [the debugger-session interface](inferior/index.html) that the
//! crash report pipeline consumes, along with [signal descriptions](signals/index.html)
//! and [some small helpers](utils/index.html) used by related crates.
//!
//! You probably don't want to use this crate directly, the [crashpost-processor][processor]
//! crate turns an [`Inferior`] into an actual report.
//!
//! [processor]: ../crashpost_processor/index.html

pub mod inferior;
pub mod signals;
pub mod utils;

pub use inferior::*;
