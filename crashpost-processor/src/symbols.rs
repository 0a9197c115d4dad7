// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Lazy symbol loading under memory pressure.
//!
//! Loading debug info for every mapped library can take more memory than a
//! crashing desktop has left. How much the resolver may load is set by a
//! [`MemoryTier`]; everything but [`MemoryTier::Spacious`] loads only the
//! modules that frames of a walked thread actually land in.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crashpost_common::utils::canonical_path;
use crashpost_common::{Inferior, LoadMode, ThreadInfo};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::catalog::ModuleCatalog;
use crate::cursor::Cursor;
use crate::processor::ProcessError;
use crate::stackwalker::MAX_FRAMES;

/// How much memory symbol loading and frame data capture may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryTier {
    /// The debugger loaded everything already.
    #[default]
    Spacious,
    Some,
    Little,
    Cramped,
}

/// A memory tier name that isn't one of `spacious|some|little|cramped`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown memory tier {0:?}")]
pub struct ParseTierError(String);

impl FromStr for MemoryTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spacious" => Ok(MemoryTier::Spacious),
            "some" => Ok(MemoryTier::Some),
            "little" => Ok(MemoryTier::Little),
            "cramped" => Ok(MemoryTier::Cramped),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Spacious => "spacious",
            MemoryTier::Some => "some",
            MemoryTier::Little => "little",
            MemoryTier::Cramped => "cramped",
        }
    }

    /// Whether local variables and registers are captured.
    pub fn captures_frame_data(&self) -> bool {
        matches!(self, MemoryTier::Spacious | MemoryTier::Some)
    }

    /// Whether the modules of a thread are loaded before it is walked.
    pub fn loads_on_demand(&self, crashed: bool) -> bool {
        match self {
            MemoryTier::Spacious => false,
            MemoryTier::Some => true,
            MemoryTier::Little | MemoryTier::Cramped => crashed,
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        match self {
            MemoryTier::Cramped => LoadMode::PresenceOnly,
            _ => LoadMode::Full,
        }
    }

    /// Whether the debugger may fetch symbols from the network.
    pub fn allows_download(&self) -> bool {
        *self != MemoryTier::Cramped
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads the modules walked threads need, each at most once per session.
#[derive(Debug)]
pub struct Resolver {
    tier: MemoryTier,
    /// Every module a load was issued for, successful or not.
    attempted: HashSet<String>,
    loaded: HashSet<String>,
}

impl Resolver {
    pub fn new(tier: MemoryTier, inferior: &mut dyn Inferior) -> Resolver {
        if !tier.allows_download() {
            debug!("resolver: disabling symbol downloads");
            inferior.set_symbol_download(false);
        }
        Resolver {
            tier,
            attempted: HashSet::new(),
            loaded: HashSet::new(),
        }
    }

    /// Canonical paths of the modules loaded so far.
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    /// Load the modules the frames of `thread` land in.
    ///
    /// Returns how many modules were newly loaded. The loaded image must carry
    /// the build id the catalog expects for it, anything else is an
    /// [`ProcessError::UnexpectedMapping`]. The thread is left selected at its
    /// newest frame.
    pub fn load_for_thread(
        &mut self,
        inferior: &mut dyn Inferior,
        catalog: &dyn ModuleCatalog,
        thread: &ThreadInfo,
        crashed: bool,
    ) -> Result<usize, ProcessError> {
        if !self.tier.loads_on_demand(crashed) {
            return Ok(0);
        }
        inferior.switch_thread(thread.num)?;
        let mut cursor = Cursor::frames(inferior);
        let mode = self.tier.load_mode();
        let mut count = 0;

        for level in 0..MAX_FRAMES {
            if cursor.select_frame(level).is_err() {
                break;
            }
            let pc = match cursor.frame_pc() {
                Ok(pc) => pc,
                Err(e) => {
                    trace!("resolver: frame {level}: {e}");
                    break;
                }
            };
            let module = match catalog.owning_module(&mut *cursor, pc) {
                Some(module) => module,
                None => continue,
            };
            let path = canonical_path(&module.code_file);
            // A failed load is not retried either.
            if !self.attempted.insert(path.clone()) {
                continue;
            }
            debug!(
                "resolver: loading {path} at {:#x} (debug info: {})",
                module.base_address, module.has_debug_info
            );

            let found = match cursor.load_module(&path, module.base_address, mode) {
                Ok(found) => found,
                Err(e) => {
                    warn!("resolver: cannot load {path}: {e}");
                    continue;
                }
            };
            self.loaded.insert(path.clone());
            count += 1;

            if let Some(expected) = &module.build_id {
                let matches = found
                    .as_deref()
                    .map_or(false, |found| found.eq_ignore_ascii_case(expected));
                if !matches {
                    error!("resolver: {path} mapped {found:?}, expected {expected}");
                    return Err(ProcessError::UnexpectedMapping {
                        path,
                        expected: expected.clone(),
                        found,
                    });
                }
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::CoreListing;
    use crashpost_synth::*;

    const LIBFOO: &str = "/nonexistent/lib/libfoo.so.1";
    const LIBBAR: &str = "/nonexistent/lib/libbar.so.2";

    fn listing() -> CoreListing {
        CoreListing::parse(&format!(
            "0x10000+0x1000 aabbccdd@0x10200 {LIBFOO} - libfoo.so.1\n\
             0x20000+0x1000 11223344@0x20200 {LIBBAR} - libbar.so.2\n"
        ))
    }

    fn session() -> SynthInferior {
        SynthInferior::new()
            .add_image(SynthImage::new(LIBFOO, 0x10000, 0x11000).build_id("aabbccdd"))
            .add_image(SynthImage::new(LIBBAR, 0x20000, 0x21000).build_id("11223344"))
            .add_thread(
                SynthThread::new(1, 100)
                    .frame(SynthFrame::new(0x10100).function("foo").module(LIBFOO))
                    .frame(SynthFrame::new(0x10200).function("foo2").module(LIBFOO))
                    .frame(SynthFrame::new(0x20100).function("bar").module(LIBBAR))
                    .frame(SynthFrame::new(0x900).function("main")),
            )
            .add_thread(
                SynthThread::new(2, 101).frame(SynthFrame::new(0x20300).function("bar").module(LIBBAR)),
            )
    }

    fn thread(inferior: &mut SynthInferior, num: u32) -> ThreadInfo {
        inferior
            .threads()
            .into_iter()
            .find(|t| t.num == num)
            .unwrap()
    }

    #[test]
    fn test_parse_tier() {
        assert_eq!("spacious".parse::<MemoryTier>(), Ok(MemoryTier::Spacious));
        assert_eq!("Some".parse::<MemoryTier>(), Ok(MemoryTier::Some));
        assert_eq!("little".parse::<MemoryTier>(), Ok(MemoryTier::Little));
        assert_eq!("CRAMPED".parse::<MemoryTier>(), Ok(MemoryTier::Cramped));
        assert!("roomy".parse::<MemoryTier>().is_err());
        assert_eq!(MemoryTier::Little.to_string(), "little");
    }

    #[test]
    fn test_tier_policy() {
        assert!(!MemoryTier::Spacious.loads_on_demand(true));
        assert!(MemoryTier::Some.loads_on_demand(false));
        assert!(MemoryTier::Little.loads_on_demand(true));
        assert!(!MemoryTier::Little.loads_on_demand(false));
        assert!(!MemoryTier::Cramped.loads_on_demand(false));
        assert!(MemoryTier::Some.captures_frame_data());
        assert!(!MemoryTier::Little.captures_frame_data());
        assert_eq!(MemoryTier::Cramped.load_mode(), LoadMode::PresenceOnly);
        assert_eq!(MemoryTier::Little.load_mode(), LoadMode::Full);
    }

    #[test]
    fn test_loads_each_module_once() {
        let mut inferior = session();
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Some, &mut inferior);
        assert!(!inferior.download_disabled());

        let first = thread(&mut inferior, 1);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap(), 2);
        let second = thread(&mut inferior, 2);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &second, false).unwrap(), 0);

        assert_eq!(
            inferior.loads(),
            &[
                (LIBFOO.to_string(), LoadMode::Full),
                (LIBBAR.to_string(), LoadMode::Full)
            ]
        );
        let mut loaded: Vec<&str> = resolver.loaded().collect();
        loaded.sort_unstable();
        assert_eq!(loaded, [LIBBAR, LIBFOO]);
        assert_eq!(inferior.selected_frame(), 0);
    }

    #[test]
    fn test_loading_names_functions() {
        let mut inferior = session();
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Little, &mut inferior);
        assert_eq!(inferior.frame_function(), None);
        let first = thread(&mut inferior, 1);
        resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap();
        assert_eq!(inferior.frame_function().as_deref(), Some("foo"));
    }

    #[test]
    fn test_little_skips_other_threads() {
        let mut inferior = session();
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Little, &mut inferior);
        let second = thread(&mut inferior, 2);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &second, false).unwrap(), 0);
        assert!(inferior.loads().is_empty());
    }

    #[test]
    fn test_cramped_presence_only() {
        let mut inferior = session();
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Cramped, &mut inferior);
        assert!(inferior.download_disabled());
        let first = thread(&mut inferior, 1);
        resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap();
        assert!(inferior
            .loads()
            .iter()
            .all(|(_, mode)| *mode == LoadMode::PresenceOnly));
    }

    #[test]
    fn test_spacious_loads_nothing() {
        let mut inferior = session();
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Spacious, &mut inferior);
        let first = thread(&mut inferior, 1);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap(), 0);
        assert!(inferior.loads().is_empty());
    }

    #[test]
    fn test_build_id_mismatch() {
        let mut inferior = SynthInferior::new()
            .add_image(
                SynthImage::new(LIBFOO, 0x10000, 0x11000)
                    .build_id("aabbccdd")
                    .disk_build_id("deadbeef"),
            )
            .add_thread(SynthThread::new(1, 100).frame(SynthFrame::new(0x10100)));
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Some, &mut inferior);
        let first = thread(&mut inferior, 1);
        match resolver.load_for_thread(&mut inferior, &catalog, &first, true) {
            Err(ProcessError::UnexpectedMapping {
                path,
                expected,
                found,
            }) => {
                assert_eq!(path, LIBFOO);
                assert_eq!(expected, "aabbccdd");
                assert_eq!(found.as_deref(), Some("deadbeef"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(inferior.selected_frame(), 0);
    }

    #[test]
    fn test_build_id_case_is_ignored() {
        let mut inferior = SynthInferior::new()
            .add_image(SynthImage::new(LIBFOO, 0x10000, 0x11000).build_id("AABBCCDD"))
            .add_thread(SynthThread::new(1, 100).frame(SynthFrame::new(0x10100)));
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Some, &mut inferior);
        let first = thread(&mut inferior, 1);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap(), 1);
    }

    #[test]
    fn test_failed_load_is_skipped() {
        // The catalog knows libbar but the debugger can't find it.
        let mut inferior = SynthInferior::new()
            .add_thread(SynthThread::new(1, 100).frame(SynthFrame::new(0x20100)));
        let catalog = listing();
        let mut resolver = Resolver::new(MemoryTier::Some, &mut inferior);
        let first = thread(&mut inferior, 1);
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap(), 0);
        assert_eq!(inferior.loads().len(), 1);
        assert_eq!(resolver.loaded().count(), 0);

        // A failed load isn't retried.
        assert_eq!(resolver.load_for_thread(&mut inferior, &catalog, &first, true).unwrap(), 0);
        assert_eq!(inferior.loads().len(), 1);
        assert_eq!(resolver.loaded().count(), 0);
    }
}
