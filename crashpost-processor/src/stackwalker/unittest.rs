// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

use super::*;
use crate::catalog::CoreListing;
use crate::locks::ThreadState;
use crashpost_synth::*;

fn empty_catalog() -> CoreListing {
    CoreListing::default()
}

fn crashed_options() -> WalkOptions {
    WalkOptions {
        crashed: true,
        ..WalkOptions::default()
    }
}

fn walk(inferior: &mut SynthInferior, num: u32, options: &WalkOptions) -> (CallStack, TraceStats) {
    let thread = inferior
        .threads()
        .into_iter()
        .find(|t| t.num == num)
        .unwrap();
    walk_thread(inferior, &empty_catalog(), &thread, options).unwrap()
}

fn functions(stack: &CallStack) -> Vec<&str> {
    stack
        .frames
        .iter()
        .map(|f| f.function_name.as_deref().unwrap_or("?"))
        .collect()
}

fn crashed_thread() -> SynthThread {
    SynthThread::new(1, 4242)
        .name("dolphin")
        .frame(SynthFrame::new(0x10).function("__pthread_kill_implementation"))
        .frame(SynthFrame::new(0x20).function("raise"))
        .frame(SynthFrame::new(0x30).function("KCrash::defaultCrashHandler(int)"))
        .frame(
            SynthFrame::new(0x40)
                .function("__restore_rt")
                .frame_type(FrameType::SigTramp),
        )
        .frame(SynthFrame::new(0x50).function("Foo::crash()"))
        .frame(SynthFrame::new(0x60).function("main"))
}

#[test]
fn test_clip_crash_handler() {
    let mut inferior = SynthInferior::new().add_thread(crashed_thread());
    let (stack, stats) = walk(&mut inferior, 1, &crashed_options());
    assert_eq!(functions(&stack), ["Foo::crash()", "main"]);
    assert!(stack.actually_crashed);
    assert!(stack.main_thread);
    assert_eq!(stats.frames, 2);
    assert_eq!(inferior.selected_frame(), 0);
}

#[test]
fn test_handler_older_than_trampoline() {
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(SynthFrame::new(0x10).function("a"))
            .frame(SynthFrame::new(0x20).function("b").frame_type(FrameType::SigTramp))
            .frame(SynthFrame::new(0x30).function("c"))
            .frame(SynthFrame::new(0x40).function("KCrash::defaultCrashHandler"))
            .frame(SynthFrame::new(0x50).function("d")),
    );
    let (stack, _) = walk(&mut inferior, 1, &crashed_options());
    assert_eq!(functions(&stack), ["d"]);
    assert!(stack.actually_crashed);
}

#[test]
fn test_nested_crash_clips_to_oldest_handler() {
    // A crash inside the crash handler delivers a second signal.
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(SynthFrame::new(0x10).function("KCrash::defaultCrashHandler(int)"))
            .frame(SynthFrame::new(0x20).frame_type(FrameType::SigTramp))
            .frame(SynthFrame::new(0x30).function("KCrash::defaultCrashHandler(int)"))
            .frame(SynthFrame::new(0x40).frame_type(FrameType::SigTramp))
            .frame(SynthFrame::new(0x50).function("crash")),
    );
    let (stack, _) = walk(&mut inferior, 1, &crashed_options());
    assert_eq!(functions(&stack), ["crash"]);
    assert!(stack.actually_crashed);
}

#[test]
fn test_trampoline_without_handler() {
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(SynthFrame::new(0x10).function("handler"))
            .frame(SynthFrame::new(0x20).frame_type(FrameType::SigTramp))
            .frame(SynthFrame::new(0x30).function("crash")),
    );
    let (stack, _) = walk(&mut inferior, 1, &crashed_options());
    assert_eq!(functions(&stack), ["crash"]);
    assert!(!stack.actually_crashed);
    assert!(!stack.main_thread);
}

#[test]
fn test_no_clip_markers() {
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(SynthFrame::new(0x10).function("abort"))
            .frame(SynthFrame::new(0x20).function("QApplication::exec()")),
    );
    let (stack, _) = walk(&mut inferior, 1, &crashed_options());
    assert_eq!(functions(&stack), ["abort", "QApplication::exec()"]);
    assert!(!stack.actually_crashed);
    assert!(stack.main_thread);
}

#[test]
fn test_other_threads_are_not_clipped() {
    let mut inferior = SynthInferior::new().add_thread(crashed_thread());
    let (stack, _) = walk(&mut inferior, 1, &WalkOptions::default());
    assert_eq!(stack.frames.len(), 6);
    assert!(!stack.actually_crashed);
}

#[test]
fn test_capture_registers_and_vars() {
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(
                SynthFrame::new(0x10)
                    .function("f")
                    .register("rip", Some(0x10))
                    .register("rax", None)
                    .register("ymm0", Some(0xffff))
                    .variable("count", "3"),
            )
            .frame(SynthFrame::new(0x20).function("g"))
            .frame(SynthFrame::new(0x30).function("h").variable("this", "0x0")),
    );
    let options = WalkOptions {
        capture_frame_data: true,
        ..WalkOptions::default()
    };
    let (stack, stats) = walk(&mut inferior, 1, &options);

    let registers = stack.registers.as_ref().unwrap();
    assert_eq!(registers.get("rip").map(String::as_str), Some("0x10"));
    assert_eq!(registers.get("rax").map(String::as_str), Some("0x0"));
    assert!(!registers.contains_key("ymm0"));

    let vars = stack.frames[0].vars.as_ref().unwrap();
    assert_eq!(vars.get("count").map(String::as_str), Some("3"));
    assert_eq!(stack.frames[1].vars.as_ref().map(|v| v.len()), Some(0));
    assert_eq!(
        stats,
        TraceStats {
            frames: 3,
            frames_with_vars: 2
        }
    );
}

#[test]
fn test_no_capture() {
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1).frame(
            SynthFrame::new(0x10)
                .function("f")
                .register("rip", Some(0x10))
                .variable("count", "3"),
        ),
    );
    let (stack, stats) = walk(&mut inferior, 1, &WalkOptions::default());
    assert_eq!(stack.registers, None);
    assert_eq!(stack.frames[0].vars, None);
    assert_eq!(stats.frames_with_vars, 0);
}

#[test]
fn test_locks_and_state() {
    let mut inferior = SynthInferior::new()
        .add_thread(
            SynthThread::new(1, 10)
                .frame(SynthFrame::new(0x10).function("__futex_abstimed_wait_common"))
                .frame(SynthFrame::new(0x20).function("__pthread_cond_wait"))
                .frame(SynthFrame::new(0x30).function("QWaitCondition::wait(QMutex*)"))
                .frame(SynthFrame::new(0x40).function("start_thread")),
        )
        .add_thread(
            SynthThread::new(2, 11)
                .exited()
                .frame(SynthFrame::new(0x10).function("__GI___poll")),
        );

    let (stack, _) = walk(&mut inferior, 1, &WalkOptions::default());
    assert_eq!(stack.locks.len(), 3);
    assert_eq!(stack.state, Some(ThreadState::Waiting));
    assert!(stack.locks.iter().all(|reason| reason.thread_id == 10));

    let (stack, _) = walk(&mut inferior, 2, &WalkOptions::default());
    assert_eq!(stack.state, Some(ThreadState::Terminated));
}

#[test]
fn test_frame_details() {
    let listing = CoreListing::parse(
        "0x7f0000000000+0x10000 aabbccdd@0x7f0000000200 /nonexistent/lib/libfoo.so.1 - libfoo.so.1\n",
    );
    let mut inferior = SynthInferior::new().add_thread(
        SynthThread::new(1, 1)
            .frame(
                SynthFrame::new(0x7f00_0000_1000)
                    .function("Foo::bar()")
                    .location("/home/alice/src/foo.cpp", 41),
            )
            .frame(SynthFrame::new(0x1234)),
    );
    let options = WalkOptions {
        home_dir: Some("/home/alice".to_string()),
        ..WalkOptions::default()
    };
    let thread = inferior.threads().remove(0);
    let (stack, _) = walk_thread(&mut inferior, &listing, &thread, &options).unwrap();

    let frame = &stack.frames[0];
    assert_eq!(frame.source_file_name.as_deref(), Some("$HOME/src/foo.cpp"));
    assert_eq!(frame.lineno(), Some(42));
    assert_eq!(frame.package.as_deref(), Some("/nonexistent/lib/libfoo.so.1"));
    assert_eq!(stack.frames[1].package, None);
    assert_eq!(stack.frames[1].function_name, None);
}

#[test]
fn test_invalid_thread() {
    let mut inferior = SynthInferior::new()
        .add_thread(crashed_thread())
        .add_thread(SynthThread::new(2, 2).invalid());
    let thread = inferior.threads().remove(1);
    assert!(walk_thread(&mut inferior, &empty_catalog(), &thread, &WalkOptions::default()).is_err());
}
