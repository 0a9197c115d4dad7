// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Stacks of the QML script engine.
//!
//! A crash inside QML code shows up in the native trace as a pile of
//! `QV4::` interpreter frames. The engine can print its own stack though:
//! we find a pointer to a `QV4::ExecutionEngine` in some frame, ask Qt's
//! debugging helpers for the script stack, and report it as an extra thread.

use crashpost_common::utils::mangle_home;
use crashpost_common::{FrameSymbol, Inferior, ThreadInfo};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::cursor::Cursor;
use crate::mi::{parse_results, MiValue};

/// The type a frame symbol must point to.
pub const ENGINE_TYPE: &str = "QV4::ExecutionEngine";

const STACK_MARKER: &str = "\"stack=[";

/// Expressions that print the script stack of the engine at `address`,
/// newest Qt first.
fn engine_expressions(address: u64) -> [String; 3] {
    [
        format!("qt_v4StackTraceForEngine((void*){address:#x})"),
        format!("qt_v4StackTrace((({ENGINE_TYPE} *){address:#x})->currentContext())"),
        format!("qt_v4StackTrace((({ENGINE_TYPE} *){address:#x})->currentContext)"),
    ]
}

/// A frame of the script stack. Fields the engine didn't report stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptFrame {
    pub file: Option<String>,
    pub function: Option<String>,
    pub line: Option<i64>,
}

impl ScriptFrame {
    pub fn to_json(&self) -> Value {
        let mut frame = json!({
            "platform": "other",
            "in_app": true,
        });
        if let Some(file) = &self.file {
            frame["filename"] = json!(file);
        }
        if let Some(function) = &self.function {
            frame["function"] = json!(function);
        }
        if let Some(line) = self.line {
            frame["lineno"] = json!(line);
        }
        frame
    }
}

/// The synthetic thread holding a script stack, newest frame first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptThread {
    pub frames: Vec<ScriptFrame>,
}

impl ScriptThread {
    pub fn to_json(&self) -> Value {
        json!({
            "id": "QML",
            "name": "QML",
            "crashed": true,
            "stacktrace": {
                "frames": self.frames.iter().rev().map(ScriptFrame::to_json).collect::<Vec<_>>(),
            },
        })
    }
}

/// Pull the MI payload out of the printed result of a stack expression.
///
/// The helpers return a C string like `"stack=[frame={...},frame={...}]"`,
/// which the debugger prints with its quotes escaped.
pub fn extract_payload(printed: &str) -> Option<String> {
    let start = printed.find(STACK_MARKER)? + STACK_MARKER.len();
    let payload = printed[start..].trim_end().strip_suffix("]\"")?;
    Some(payload.replace("\\\"", "\""))
}

/// Parse a stack payload. A single frame is treated as a list of one.
pub fn parse_stack(payload: &str, home: Option<&str>) -> Option<ScriptThread> {
    let results = match parse_results(payload) {
        Ok(results) => results,
        Err(e) => {
            warn!("script: malformed engine stack: {e}");
            return None;
        }
    };

    let frames: Vec<ScriptFrame> = results
        .iter()
        .filter(|(name, _)| name == "frame")
        .filter_map(|(_, value)| match value {
            MiValue::Tuple(_) => Some(ScriptFrame {
                file: value
                    .get("file")
                    .and_then(MiValue::as_str)
                    .map(|file| mangle_home(file, home).into_owned()),
                function: value.get("func").and_then(MiValue::as_str).map(String::from),
                line: value
                    .get("line")
                    .and_then(MiValue::as_str)
                    .and_then(|line| line.trim().parse().ok()),
            }),
            _ => None,
        })
        .collect();

    if frames.is_empty() {
        debug!("script: engine stack has no frames");
        return None;
    }
    Some(ScriptThread { frames })
}

fn is_engine_pointer(symbol: &FrameSymbol) -> Option<u64> {
    if !symbol.is_variable_or_argument() {
        return None;
    }
    let value = symbol.value.as_ref()?;
    if value.optimized_out || value.pointee_type.as_deref() != Some(ENGINE_TYPE) {
        return None;
    }
    value.address
}

/// Ask the engine referenced from the selected frame for its stack.
fn engine_stack_in_frame(inferior: &mut dyn Inferior) -> Option<String> {
    let symbols = inferior.frame_symbols().ok()?;
    for address in symbols.iter().filter_map(is_engine_pointer) {
        for expression in engine_expressions(address).iter() {
            match inferior.evaluate(expression) {
                Ok(printed) => {
                    if let Some(payload) = extract_payload(&printed) {
                        return Some(payload);
                    }
                    trace!("script: no stack in {printed:?}");
                }
                Err(e) => trace!("script: {expression} failed: {e}"),
            }
        }
    }
    None
}

/// Search the threads for a script engine and return its stack.
///
/// Stops at the first thread that yields one. The cursor goes back to the
/// thread that was selected before, at its newest frame.
pub fn find_script_stack(
    inferior: &mut dyn Inferior,
    threads: &[ThreadInfo],
    home: Option<&str>,
) -> Option<ScriptThread> {
    let mut cursor = Cursor::thread(inferior);
    for thread in threads.iter().filter(|t| t.is_valid) {
        if let Err(e) = cursor.switch_thread(thread.num) {
            debug!("script: cannot switch to thread {}: {e}", thread.num);
            continue;
        }
        if cursor.select_newest_frame().is_err() {
            continue;
        }
        loop {
            if let Some(payload) = engine_stack_in_frame(&mut *cursor) {
                debug!("script: found an engine stack in thread {}", thread.num);
                return parse_stack(&payload, home);
            }
            if cursor.select_older_frame().is_err() {
                break;
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crashpost_synth::*;

    const PRINTED: &str = r#"$1 = "stack=[frame={level=\"0\",func=\"onClicked\",file=\"/home/alice/app/main.qml\",line=\"12\",language=\"js\"},frame={level=\"1\",func=\"expression for clicked\",file=\"qrc:/Button.qml\",line=\"40\",language=\"js\"}]""#;

    #[test]
    fn test_extract_payload() {
        let payload = extract_payload(PRINTED).unwrap();
        assert!(payload.starts_with(r#"frame={level="0",func="onClicked""#));
        assert!(payload.ends_with(r#"language="js"}"#));
        assert_eq!(extract_payload("$1 = 0x0"), None);
        assert_eq!(extract_payload(r#"$1 = "stack=[frame={}"#), None);
    }

    #[test]
    fn test_parse_frames() {
        let payload = extract_payload(PRINTED).unwrap();
        let thread = parse_stack(&payload, Some("/home/alice")).unwrap();
        assert_eq!(thread.frames.len(), 2);
        assert_eq!(
            thread.frames[0],
            ScriptFrame {
                file: Some("$HOME/app/main.qml".to_string()),
                function: Some("onClicked".to_string()),
                line: Some(12),
            }
        );

        let json = thread.to_json();
        assert_eq!(json["id"], "QML");
        assert_eq!(json["crashed"], true);
        let frames = json["stacktrace"]["frames"].as_array().unwrap();
        // Oldest first.
        assert_eq!(frames[0]["function"], "expression for clicked");
        assert_eq!(frames[1]["lineno"], 12);
        assert_eq!(frames[1]["platform"], "other");
        assert_eq!(frames[1]["in_app"], true);
    }

    #[test]
    fn test_single_frame() {
        let thread = parse_stack(r#"frame={level="0",func="f",file="a.qml",line="3"}"#, None).unwrap();
        assert_eq!(thread.frames.len(), 1);
        assert_eq!(thread.frames[0].function.as_deref(), Some("f"));
    }

    #[test]
    fn test_line_only_frame() {
        let thread = parse_stack(r#"frame={line="42"}"#, None).unwrap();
        assert_eq!(
            thread.frames,
            vec![ScriptFrame {
                file: None,
                function: None,
                line: Some(42),
            }]
        );
        let json = thread.frames[0].to_json();
        assert_eq!(json["lineno"], 42);
        assert!(json.get("filename").is_none());
        assert!(json.get("function").is_none());
    }

    #[test]
    fn test_unparsable_line() {
        let thread = parse_stack(r#"frame={func="f",line="?"}"#, None).unwrap();
        assert_eq!(thread.frames[0].line, None);
    }

    #[test]
    fn test_malformed_payload() {
        assert_eq!(
            parse_stack(
                r#"frame={level="0",func="saveConfig",file="/data/main.qml",fullname="/data/project"."#,
                None
            ),
            None
        );
        assert_eq!(parse_stack("", None), None);
    }

    fn engine_session(printed: &str) -> SynthInferior {
        SynthInferior::new()
            .live(true)
            .add_thread(
                SynthThread::new(1, 100)
                    .frame(SynthFrame::new(0x10).function("raise"))
                    .frame(SynthFrame::new(0x20).function("main")),
            )
            .add_thread(
                SynthThread::new(2, 101)
                    .frame(SynthFrame::new(0x30).function("QV4::Runtime::method_callName"))
                    .frame(
                        SynthFrame::new(0x40)
                            .function("QV4::Moth::VME::interpret")
                            .pointer_argument("engine", ENGINE_TYPE, 0x5555_0000),
                    ),
            )
            .evaluation(
                "qt_v4StackTrace(((QV4::ExecutionEngine *)0x55550000)->currentContext())",
                printed,
            )
    }

    #[test]
    fn test_find_script_stack() {
        let mut inferior = engine_session(PRINTED);
        let threads = inferior.threads();
        let thread = find_script_stack(&mut inferior, &threads, None).unwrap();
        assert_eq!(thread.frames.len(), 2);
        assert_eq!(thread.frames[1].file.as_deref(), Some("qrc:/Button.qml"));

        assert_eq!(inferior.selected_thread(), Some(1));
        assert_eq!(inferior.selected_frame(), 0);
    }

    #[test]
    fn test_optimized_out_engine_is_skipped() {
        let mut inferior = SynthInferior::new()
            .add_thread(
                SynthThread::new(1, 100).frame(SynthFrame::new(0x10).symbol(FrameSymbol {
                    name: "engine".to_string(),
                    kind: crashpost_common::SymbolKind::Variable,
                    value: Some(crashpost_common::SymbolValue {
                        rendered: None,
                        optimized_out: true,
                        pointee_type: Some(ENGINE_TYPE.to_string()),
                        address: Some(0x1000),
                    }),
                })),
            )
            .evaluation("qt_v4StackTraceForEngine((void*)0x1000)", PRINTED);
        let threads = inferior.threads();
        assert_eq!(find_script_stack(&mut inferior, &threads, None), None);
    }

    #[test]
    fn test_malformed_stack_gives_no_thread() {
        let mut inferior =
            engine_session(r#"$1 = "stack=[frame={level=\"0\",func=\"f\"."]""#);
        let threads = inferior.threads();
        assert_eq!(find_script_stack(&mut inferior, &threads, None), None);
        assert_eq!(inferior.selected_thread(), Some(1));
    }
}
