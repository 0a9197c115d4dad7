// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Discovery of the modules mapped into the inferior.
//!
//! A running process is asked for its memory mappings ([`ProcMappings`]), a
//! core image is described by an external module lister ([`CoreListing`]).
//! Both end up as a [`ModuleList`] behind the [`ModuleCatalog`] trait.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::process::Command;

use crashpost_common::utils::canonical_path;
use crashpost_common::Inferior;
use debugid::{CodeId, DebugId};
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while_m_n};
use nom::character::complete::{char, hex_digit1, space0, space1};
use nom::combinator::{map, map_res, opt, rest, value};
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// An ELF image mapped into the inferior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub code_file: String,
    pub base_address: u64,
    pub end_address: u64,
    /// Lowercase hex GNU build id.
    pub build_id: Option<String>,
    pub has_debug_info: bool,
}

impl Module {
    pub fn size(&self) -> u64 {
        self.end_address.saturating_sub(self.base_address)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.base_address <= address && address < self.end_address
    }

    pub fn code_id(&self) -> Option<CodeId> {
        self.build_id.clone().map(CodeId::new)
    }

    pub fn debug_id(&self) -> Option<DebugId> {
        self.build_id.as_deref().and_then(debug_id_from_build_id)
    }
}

/// Turn a GNU build id into a debug id.
///
/// The build id is zero-padded (or truncated) to 16 bytes which are then
/// read as a little-endian GUID, the same way breakpad does it.
pub fn debug_id_from_build_id(build_id: &str) -> Option<DebugId> {
    let bytes = hex::decode(build_id).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let mut data = [0u8; 16];
    let len = bytes.len().min(data.len());
    data[..len].copy_from_slice(&bytes[..len]);
    Some(DebugId::from_uuid(Uuid::from_bytes_le(data)))
}

fn compare_address_to_module(address: u64, module: &Module) -> Ordering {
    if module.contains(address) {
        Ordering::Equal
    } else if module.base_address > address {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// Modules ordered by base address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleList {
    modules: Vec<Module>,
}

impl ModuleList {
    pub fn from_modules(mut modules: Vec<Module>) -> ModuleList {
        modules.sort_by_key(|m| m.base_address);
        ModuleList { modules }
    }

    pub fn module_at_address(&self, address: u64) -> Option<&Module> {
        self.modules
            .binary_search_by(|module| compare_address_to_module(address, module))
            .ok()
            .map(|index| &self.modules[index])
    }

    pub fn module_by_path(&self, path: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.code_file == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// The modules of one session, however they were discovered.
pub trait ModuleCatalog {
    fn modules(&self) -> &ModuleList;

    /// The module whose image contains `address`.
    fn owning_module(&self, inferior: &mut dyn Inferior, address: u64) -> Option<Module>;
}

fn hex_u64(input: &str) -> IResult<&str, u64> {
    map_res(preceded(opt(tag("0x")), hex_digit1), |digits| {
        u64::from_str_radix(digits, 16)
    })(input)
}

fn perms(input: &str) -> IResult<&str, &str> {
    take_while_m_n(4, 4, |c: char| "rwxsp-".contains(c))(input)
}

/// `start end size offset [perms] objfile`
fn mapping_line(input: &str) -> IResult<&str, (u64, u64, &str)> {
    map(
        tuple((
            preceded(space0, hex_u64),
            preceded(space1, hex_u64),
            preceded(space1, hex_u64),
            preceded(space1, hex_u64),
            opt(preceded(space1, perms)),
            rest,
        )),
        |(start, end, _size, _offset, _perms, path)| (start, end, path.trim()),
    )(input)
}

/// `<build-id>@<address>`, or `-` when there is none.
fn listing_build_id(input: &str) -> IResult<&str, Option<String>> {
    alt((
        map(terminated(hex_digit1, opt(preceded(char('@'), hex_u64))), |id: &str| {
            Some(id.to_lowercase())
        }),
        value(None, terminated(char('-'), opt(preceded(char('@'), hex_u64)))),
    ))(input)
}

fn field(input: &str) -> IResult<&str, &str> {
    is_not(" \t")(input)
}

/// A parsed `eu-unstrip -n` line.
struct ListingLine<'a> {
    start: u64,
    len: u64,
    build_id: Option<String>,
    file: &'a str,
    debug_file: &'a str,
}

/// `<start>+<length> <build-id>@<address> <file> <debug-file> <name>`
fn listing_line(input: &str) -> IResult<&str, ListingLine<'_>> {
    map(
        tuple((
            preceded(space0, hex_u64),
            preceded(char('+'), hex_u64),
            preceded(space1, listing_build_id),
            preceded(space1, field),
            preceded(space1, field),
            rest,
        )),
        |(start, len, build_id, file, debug_file, _name)| ListingLine {
            start,
            len,
            build_id,
            file,
            debug_file,
        },
    )(input)
}

/// Whether `path` names a shared object (or a python module), with any
/// suffix after the extension such as `.so.5` or `.so (deleted)`.
pub fn is_library_path(path: &str) -> bool {
    [".so", ".py"].iter().any(|ext| {
        path.match_indices(ext)
            .any(|(index, _)| index > 0 && !path[index..].contains('/'))
    })
}

/// One merged file-backed region of the address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub path: String,
    pub start: u64,
    pub end: u64,
}

/// Parse the `info proc mappings` report, merging the segments of each file.
///
/// Lines are `start end size offset [perms] objfile`. Anonymous regions,
/// pseudo paths like `[heap]`, devices and memfd regions are skipped.
pub fn merge_mappings(text: &str) -> Vec<Mapping> {
    let mut merged: Vec<Mapping> = Vec::new();
    let mut by_path: HashMap<String, usize> = HashMap::new();

    for line in text.lines() {
        let (start, end, path) = match mapping_line(line) {
            Ok((_, mapping)) => mapping,
            // Headers and blank lines.
            Err(_) => continue,
        };
        if path.is_empty()
            || !path.starts_with('/')
            || path.starts_with("/dev/")
            || path.starts_with("/memfd")
        {
            continue;
        }

        match by_path.get(path) {
            Some(&index) => {
                let mapping = &mut merged[index];
                mapping.start = mapping.start.min(start);
                mapping.end = mapping.end.max(end);
            }
            None => {
                by_path.insert(path.to_string(), merged.len());
                merged.push(Mapping {
                    path: path.to_string(),
                    start,
                    end,
                });
            }
        }
    }

    merged
}

/// Modules of a running process, from its memory mappings.
#[derive(Debug, Clone, Default)]
pub struct ProcMappings {
    list: ModuleList,
}

impl ProcMappings {
    /// Read the mappings of `inferior` and the build id of each mapped file.
    ///
    /// Files without a build id are dropped unless they are the executable or
    /// a library; those are kept without one and fail the report later.
    pub fn from_inferior(inferior: &mut dyn Inferior) -> ProcMappings {
        let text = match inferior.proc_mappings() {
            Ok(text) => text,
            Err(e) => {
                warn!("catalog: cannot read process mappings: {e}");
                return ProcMappings::default();
            }
        };
        let program = inferior.program_path();

        let mut modules = Vec::new();
        for mapping in merge_mappings(&text) {
            let build_id = match inferior.read_build_id(mapping.start) {
                Ok(build_id) => build_id,
                Err(e) => {
                    debug!("catalog: no build id for {}: {e}", mapping.path);
                    None
                }
            };
            let is_program = program.as_deref() == Some(mapping.path.as_str());
            if build_id.is_none() && !is_program && !is_library_path(&mapping.path) {
                trace!("catalog: skipping data file {}", mapping.path);
                continue;
            }
            modules.push(Module {
                code_file: mapping.path,
                base_address: mapping.start,
                end_address: mapping.end,
                build_id,
                has_debug_info: false,
            });
        }

        ProcMappings {
            list: ModuleList::from_modules(modules),
        }
    }
}

impl ModuleCatalog for ProcMappings {
    fn modules(&self) -> &ModuleList {
        &self.list
    }

    fn owning_module(&self, inferior: &mut dyn Inferior, address: u64) -> Option<Module> {
        // The executable itself is not a solib, fall back to the mappings.
        let by_solib = inferior.solib_name(address).and_then(|name| {
            let path = canonical_path(&name);
            self.list
                .module_by_path(&path)
                .or_else(|| self.list.module_by_path(&name))
                .cloned()
        });
        by_solib.or_else(|| self.list.module_at_address(address).cloned())
    }
}

/// Modules of a core image, from `eu-unstrip -n --core=<core>`.
#[derive(Debug, Clone, Default)]
pub struct CoreListing {
    list: ModuleList,
}

impl CoreListing {
    /// Run the module lister (`command` plus `--core=<core>`) and parse its output.
    ///
    /// Any failure to run it leaves the listing empty.
    pub fn from_tool(command: &[String], core: &str) -> CoreListing {
        let (program, args) = match command.split_first() {
            Some(split) => split,
            None => return CoreListing::default(),
        };
        let output = Command::new(program)
            .args(args)
            .arg(format!("--core={core}"))
            .output();
        match output {
            Ok(output) if output.status.success() => {
                CoreListing::parse(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(
                    "catalog: {program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                CoreListing::default()
            }
            Err(e) => {
                warn!("catalog: cannot run {program}: {e}");
                CoreListing::default()
            }
        }
    }

    /// Parse lines of `<address>+<length> <build-id>@<address> <file> <debug-file> <name>`.
    pub fn parse(text: &str) -> CoreListing {
        let mut modules = Vec::new();
        for line in text.lines() {
            let parsed = match listing_line(line) {
                Ok((_, parsed)) => parsed,
                Err(_) => {
                    trace!("catalog: unparsable listing line {line:?}");
                    continue;
                }
            };
            if parsed.file == "." || parsed.file == "-" {
                // vDSO and other images without a backing file.
                continue;
            }
            modules.push(Module {
                code_file: parsed.file.to_string(),
                base_address: parsed.start,
                end_address: parsed.start.saturating_add(parsed.len),
                build_id: parsed.build_id,
                has_debug_info: parsed.debug_file != "-",
            });
        }
        CoreListing {
            list: ModuleList::from_modules(modules),
        }
    }
}

impl ModuleCatalog for CoreListing {
    fn modules(&self) -> &ModuleList {
        &self.list
    }

    fn owning_module(&self, _inferior: &mut dyn Inferior, address: u64) -> Option<Module> {
        self.list.module_at_address(address).cloned()
    }
}
