// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic Debugger Sessions for Testing
//!
//! This exists primarily as an internal dev-dependency of crashpost, but it is
//! also what the stackwalk binary uses to replay a recorded session.
//!
//! Basic usage is to make a [SynthInferior][], use its methods to add threads,
//! frames and images, and then hand it to the processor as an
//! [`Inferior`][crashpost_common::Inferior]. A session recorded as JSON can be
//! loaded with [`SynthInferior::from_path`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crashpost_common::*;
use serde::Deserialize;
use thiserror::Error;

/// An error loading a recorded session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot read session: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed session: {0}")]
    Json(#[from] serde_json::Error),
}

fn yes() -> bool {
    true
}

/// A stack frame, as the debugger would present it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynthFrame {
    pub pc: u64,
    pub function: Option<String>,
    pub frame_type: FrameType,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub symbols: Vec<FrameSymbol>,
    /// `None` makes register reads fail.
    pub registers: Option<Vec<Register>>,
    /// Path of the image whose symbols are needed to name `function`.
    /// Without one the name is always known.
    pub module: Option<String>,
}

impl SynthFrame {
    pub fn new(pc: u64) -> SynthFrame {
        SynthFrame {
            pc,
            ..SynthFrame::default()
        }
    }

    pub fn function(mut self, name: &str) -> SynthFrame {
        self.function = Some(name.to_string());
        self
    }

    pub fn frame_type(mut self, frame_type: FrameType) -> SynthFrame {
        self.frame_type = frame_type;
        self
    }

    pub fn location(mut self, file: &str, line: i64) -> SynthFrame {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }

    pub fn module(mut self, path: &str) -> SynthFrame {
        self.module = Some(path.to_string());
        self
    }

    /// Add a local variable that prints as `value`.
    pub fn variable(mut self, name: &str, value: &str) -> SynthFrame {
        self.symbols.push(FrameSymbol {
            name: name.to_string(),
            kind: SymbolKind::Variable,
            value: Some(SymbolValue {
                rendered: Some(value.to_string()),
                ..SymbolValue::default()
            }),
        });
        self
    }

    pub fn symbol(mut self, symbol: FrameSymbol) -> SynthFrame {
        self.symbols.push(symbol);
        self
    }

    /// Add an argument pointing at an object of type `pointee` at `address`.
    pub fn pointer_argument(mut self, name: &str, pointee: &str, address: u64) -> SynthFrame {
        self.symbols.push(FrameSymbol {
            name: name.to_string(),
            kind: SymbolKind::Argument,
            value: Some(SymbolValue {
                rendered: Some(format!("({pointee} *) {address:#x}")),
                optimized_out: false,
                pointee_type: Some(pointee.to_string()),
                address: Some(address),
            }),
        });
        self
    }

    pub fn register(mut self, name: &str, value: Option<u64>) -> SynthFrame {
        self.registers.get_or_insert_with(Vec::new).push(Register {
            name: name.to_string(),
            value,
        });
        self
    }
}

/// A thread and its frames, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthThread {
    pub num: ThreadNum,
    pub tid: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "yes")]
    pub valid: bool,
    #[serde(default)]
    pub exited: bool,
    #[serde(default)]
    pub frames: Vec<SynthFrame>,
}

impl SynthThread {
    pub fn new(num: ThreadNum, tid: u64) -> SynthThread {
        SynthThread {
            num,
            tid,
            name: None,
            valid: true,
            exited: false,
            frames: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> SynthThread {
        self.name = Some(name.to_string());
        self
    }

    pub fn invalid(mut self) -> SynthThread {
        self.valid = false;
        self
    }

    pub fn exited(mut self) -> SynthThread {
        self.exited = true;
        self
    }

    /// Append a frame older than all the frames added so far.
    pub fn frame(mut self, frame: SynthFrame) -> SynthThread {
        self.frames.push(frame);
        self
    }

    fn info(&self) -> ThreadInfo {
        ThreadInfo {
            num: self.num,
            tid: self.tid,
            name: self.name.clone(),
            is_valid: self.valid,
            is_exited: self.exited,
        }
    }
}

/// An ELF image mapped into the inferior.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthImage {
    pub path: String,
    pub start: u64,
    pub end: u64,
    /// The build id found in target memory.
    #[serde(default)]
    pub build_id: Option<String>,
    /// The build id of the file on disk, when it differs from the mapped one.
    #[serde(default)]
    pub disk_build_id: Option<String>,
    /// Whether symbols are already available before any load.
    #[serde(default)]
    pub symbols_loaded: bool,
}

impl SynthImage {
    pub fn new(path: &str, start: u64, end: u64) -> SynthImage {
        SynthImage {
            path: path.to_string(),
            start,
            end,
            build_id: None,
            disk_build_id: None,
            symbols_loaded: false,
        }
    }

    pub fn build_id(mut self, build_id: &str) -> SynthImage {
        self.build_id = Some(build_id.to_string());
        self
    }

    pub fn disk_build_id(mut self, build_id: &str) -> SynthImage {
        self.disk_build_id = Some(build_id.to_string());
        self
    }

    pub fn preloaded(mut self) -> SynthImage {
        self.symbols_loaded = true;
        self
    }
}

/// A scripted debugger session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynthInferior {
    live: bool,
    core_file: Option<String>,
    program_path: Option<String>,
    program_build_id: Option<String>,
    /// The thread selected when the session starts (the crashed one).
    selected_thread: Option<ThreadNum>,
    threads: Vec<SynthThread>,
    images: Vec<SynthImage>,
    mappings: Option<String>,
    static_symbols: HashMap<String, String>,
    evaluations: HashMap<String, String>,

    #[serde(skip)]
    frame: usize,
    #[serde(skip)]
    download_disabled: bool,
    #[serde(skip)]
    loads: Vec<(String, LoadMode)>,
}

impl SynthInferior {
    pub fn new() -> SynthInferior {
        Default::default()
    }

    /// Load a recorded session from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<SynthInferior, SessionError> {
        let f = File::open(path)?;
        SynthInferior::from_reader(BufReader::new(f))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<SynthInferior, SessionError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn live(mut self, live: bool) -> SynthInferior {
        self.live = live;
        self
    }

    pub fn core_file(mut self, path: &str) -> SynthInferior {
        self.core_file = Some(path.to_string());
        self
    }

    pub fn program(mut self, path: &str, build_id: &str) -> SynthInferior {
        self.program_path = Some(path.to_string());
        self.program_build_id = Some(build_id.to_string());
        self
    }

    /// Add a thread. The first thread added is selected unless
    /// [`select`][SynthInferior::select] says otherwise.
    pub fn add_thread(mut self, thread: SynthThread) -> SynthInferior {
        if self.selected_thread.is_none() {
            self.selected_thread = Some(thread.num);
        }
        self.threads.push(thread);
        self
    }

    pub fn select(mut self, thread: ThreadNum) -> SynthInferior {
        self.selected_thread = Some(thread);
        self.frame = 0;
        self
    }

    pub fn add_image(mut self, image: SynthImage) -> SynthInferior {
        self.images.push(image);
        self
    }

    /// Set the text of `info proc mappings`.
    pub fn mappings(mut self, text: &str) -> SynthInferior {
        self.mappings = Some(text.to_string());
        self
    }

    pub fn static_symbol(mut self, name: &str, value: &str) -> SynthInferior {
        self.static_symbols
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Make `expression` evaluate to `result`.
    pub fn evaluation(mut self, expression: &str, result: &str) -> SynthInferior {
        self.evaluations
            .insert(expression.to_string(), result.to_string());
        self
    }

    /// Every module load issued so far, in order.
    pub fn loads(&self) -> &[(String, LoadMode)] {
        &self.loads
    }

    pub fn download_disabled(&self) -> bool {
        self.download_disabled
    }

    /// The level of the selected frame.
    pub fn selected_frame(&self) -> usize {
        self.frame
    }

    fn current_thread(&self) -> Option<&SynthThread> {
        let num = self.selected_thread?;
        self.threads.iter().find(|t| t.num == num)
    }

    fn current_frame(&self) -> Result<&SynthFrame, InferiorError> {
        self.current_thread()
            .and_then(|t| t.frames.get(self.frame))
            .ok_or(InferiorError::NoFrame)
    }

    fn image_at(&self, address: u64) -> Option<&SynthImage> {
        self.images
            .iter()
            .find(|image| image.start <= address && address < image.end)
    }

    fn symbols_available(&self, frame: &SynthFrame) -> bool {
        match &frame.module {
            None => true,
            Some(path) => self
                .images
                .iter()
                .any(|image| &image.path == path && image.symbols_loaded),
        }
    }
}

impl Inferior for SynthInferior {
    fn is_live(&self) -> bool {
        self.live
    }

    fn core_file(&self) -> Option<String> {
        self.core_file.clone()
    }

    fn program_path(&self) -> Option<String> {
        self.program_path.clone()
    }

    fn program_build_id(&mut self) -> Option<String> {
        self.program_build_id.clone()
    }

    fn threads(&mut self) -> Vec<ThreadInfo> {
        self.threads.iter().map(SynthThread::info).collect()
    }

    fn selected_thread(&self) -> Option<ThreadNum> {
        self.selected_thread
    }

    fn switch_thread(&mut self, thread: ThreadNum) -> Result<(), InferiorError> {
        match self.threads.iter().find(|t| t.num == thread) {
            Some(t) if t.valid => {
                self.selected_thread = Some(thread);
                self.frame = 0;
                Ok(())
            }
            _ => Err(InferiorError::InvalidThread(thread)),
        }
    }

    fn select_newest_frame(&mut self) -> Result<(), InferiorError> {
        self.select_frame(0)
    }

    fn select_older_frame(&mut self) -> Result<(), InferiorError> {
        let depth = self.current_thread().map_or(0, |t| t.frames.len());
        if self.frame + 1 < depth {
            self.frame += 1;
            Ok(())
        } else {
            Err(InferiorError::NoOlderFrame)
        }
    }

    fn select_frame(&mut self, level: usize) -> Result<(), InferiorError> {
        let depth = self.current_thread().map_or(0, |t| t.frames.len());
        if level < depth {
            self.frame = level;
            Ok(())
        } else {
            Err(InferiorError::InvalidFrame(level))
        }
    }

    fn frame_pc(&mut self) -> Result<u64, InferiorError> {
        Ok(self.current_frame()?.pc)
    }

    fn frame_type(&mut self) -> Result<FrameType, InferiorError> {
        Ok(self.current_frame()?.frame_type)
    }

    fn frame_function(&mut self) -> Option<String> {
        let frame = self.current_frame().ok()?;
        if self.symbols_available(frame) {
            frame.function.clone()
        } else {
            None
        }
    }

    fn frame_location(&mut self) -> Option<SourceLocation> {
        let frame = self.current_frame().ok()?;
        if frame.file.is_none() && frame.line.is_none() {
            return None;
        }
        Some(SourceLocation {
            file: frame.file.clone(),
            line: frame.line,
        })
    }

    fn frame_symbols(&mut self) -> Result<Vec<FrameSymbol>, InferiorError> {
        Ok(self.current_frame()?.symbols.clone())
    }

    fn frame_registers(&mut self) -> Result<Vec<Register>, InferiorError> {
        self.current_frame()?
            .registers
            .clone()
            .ok_or(InferiorError::Unsupported("frame registers"))
    }

    fn solib_name(&mut self, address: u64) -> Option<String> {
        self.image_at(address).map(|image| image.path.clone())
    }

    fn evaluate(&mut self, expression: &str) -> Result<String, InferiorError> {
        self.evaluations
            .get(expression)
            .cloned()
            .ok_or_else(|| InferiorError::Evaluation(format!("cannot evaluate {expression}")))
    }

    fn lookup_static_symbol(&mut self, name: &str) -> Result<Option<String>, InferiorError> {
        Ok(self.static_symbols.get(name).cloned())
    }

    fn proc_mappings(&mut self) -> Result<String, InferiorError> {
        if !self.live {
            return Err(InferiorError::Command(
                "No current process: you must name one.".to_string(),
            ));
        }
        Ok(self.mappings.clone().unwrap_or_default())
    }

    fn read_build_id(&mut self, address: u64) -> Result<Option<String>, InferiorError> {
        self.images
            .iter()
            .find(|image| image.start == address)
            .map(|image| image.build_id.clone())
            .ok_or(InferiorError::Memory(address))
    }

    fn set_symbol_download(&mut self, enabled: bool) {
        self.download_disabled = !enabled;
    }

    fn load_module(
        &mut self,
        path: &str,
        _address: u64,
        mode: LoadMode,
    ) -> Result<Option<String>, InferiorError> {
        self.loads.push((path.to_string(), mode));
        let image = self
            .images
            .iter_mut()
            .find(|image| image.path == path)
            .ok_or_else(|| InferiorError::Command(format!("{path}: No such file or directory.")))?;
        image.symbols_loaded = true;
        Ok(image.disk_build_id.clone().or_else(|| image.build_id.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn two_frames() -> SynthInferior {
        SynthInferior::new().add_thread(
            SynthThread::new(1, 100)
                .frame(SynthFrame::new(0x1000).function("inner"))
                .frame(SynthFrame::new(0x2000).function("outer")),
        )
    }

    #[test]
    fn test_frame_cursor() {
        let mut inferior = two_frames();
        assert_eq!(inferior.frame_pc(), Ok(0x1000));
        inferior.select_older_frame().unwrap();
        assert_eq!(inferior.frame_function().as_deref(), Some("outer"));
        assert_eq!(
            inferior.select_older_frame(),
            Err(InferiorError::NoOlderFrame)
        );
        inferior.select_newest_frame().unwrap();
        assert_eq!(inferior.selected_frame(), 0);
    }

    #[test]
    fn test_invalid_thread() {
        let mut inferior = two_frames().add_thread(SynthThread::new(2, 101).invalid());
        assert_eq!(inferior.switch_thread(2), Err(InferiorError::InvalidThread(2)));
        assert_eq!(inferior.switch_thread(3), Err(InferiorError::InvalidThread(3)));
        assert_eq!(inferior.selected_thread(), Some(1));
    }

    #[test]
    fn test_function_needs_symbols() {
        let mut inferior = SynthInferior::new()
            .add_image(SynthImage::new("/usr/lib/libfoo.so", 0x1000, 0x2000).build_id("aa"))
            .add_thread(
                SynthThread::new(1, 100)
                    .frame(SynthFrame::new(0x1100).function("foo").module("/usr/lib/libfoo.so")),
            );
        assert_eq!(inferior.frame_function(), None);
        let loaded = inferior
            .load_module("/usr/lib/libfoo.so", 0x1000, LoadMode::Full)
            .unwrap();
        assert_eq!(loaded.as_deref(), Some("aa"));
        assert_eq!(inferior.frame_function().as_deref(), Some("foo"));
    }

    #[test]
    fn test_from_reader() {
        let session = r#"{
            "live": true,
            "threads": [
                {"num": 1, "tid": 4242, "name": "app", "frames": [
                    {"pc": 4096, "function": "main", "frame_type": "normal"}
                ]}
            ],
            "static_symbols": {"s_kcrashErrorMessage": "oops"}
        }"#;
        let mut inferior = SynthInferior::from_reader(session.as_bytes()).unwrap();
        assert!(inferior.is_live());
        assert_eq!(inferior.selected_thread(), None);
        let threads = inferior.threads();
        assert_eq!(threads.len(), 1);
        assert!(threads[0].is_valid);
        assert_eq!(
            inferior.lookup_static_symbol("s_kcrashErrorMessage"),
            Ok(Some("oops".to_string()))
        );
    }
}
