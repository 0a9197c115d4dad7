// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Scoped ownership of the debugger's cursor.

use std::ops::{Deref, DerefMut};

use crashpost_common::{Inferior, ThreadNum};
use tracing::{trace, warn};

/// Borrows an [`Inferior`] for a piece of work that moves its cursor.
///
/// When dropped, the newest frame is selected again and, for guards made
/// with [`Cursor::thread`], the thread that was selected on creation is
/// switched back to first.
pub struct Cursor<'a> {
    inferior: &'a mut dyn Inferior,
    restore_thread: Option<ThreadNum>,
}

impl<'a> Cursor<'a> {
    /// Restore only the frame selection.
    pub fn frames(inferior: &'a mut dyn Inferior) -> Cursor<'a> {
        Cursor {
            inferior,
            restore_thread: None,
        }
    }

    /// Restore the currently selected thread and its newest frame.
    pub fn thread(inferior: &'a mut dyn Inferior) -> Cursor<'a> {
        let restore_thread = inferior.selected_thread();
        Cursor {
            inferior,
            restore_thread,
        }
    }
}

impl<'a> Deref for Cursor<'a> {
    type Target = dyn Inferior + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.inferior
    }
}

impl<'a> DerefMut for Cursor<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inferior
    }
}

impl<'a> Drop for Cursor<'a> {
    fn drop(&mut self) {
        if let Some(thread) = self.restore_thread {
            if let Err(e) = self.inferior.switch_thread(thread) {
                warn!("cursor: cannot switch back to thread {thread}: {e}");
            }
        }
        if let Err(e) = self.inferior.select_newest_frame() {
            trace!("cursor: cannot select the newest frame: {e}");
        }
    }
}
