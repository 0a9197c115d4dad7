// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::boxed::Box;
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::ops::Deref;
use std::panic;
use std::path::Path;

use crashpost_common::signals;
use crashpost_processor::{process_inferior, MemoryTier, ProcessState, ProcessorOptions};
use crashpost_synth::SynthInferior;

use clap::{AppSettings, Arg, ArgGroup, Command};
use log::{error, info};
use simplelog::{
    ColorChoice, ConfigBuilder, Level, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};
use tempfile::NamedTempFile;

fn make_app() -> Command<'static> {
    Command::new("crashpost-stackwalk")
        .version(clap::crate_version!())
        .author(clap::crate_authors!())
        .about("Turns a recorded debugger session of a crashed program into a crash report.")
        .next_line_help(true)
        .setting(AppSettings::DeriveDisplayOrder)
        .override_usage("crashpost-stackwalk [FLAGS] [OPTIONS] <session>")
        .arg(Arg::new("json").long("json").long_help(
            "Emit the report as a Sentry event (the default).

Frames are listed oldest first, images carry a debug_id derived from their GNU build id.",
        ))
        .arg(Arg::new("human").long("human").long_help(
            "Emit a human-readable report.

The human-readable report does not have a specified format. It is intended for \
quickly inspecting a crash or debugging crashpost itself.",
        ))
        .group(ArgGroup::new("output-format").args(&["json", "human"]))
        .arg(
            Arg::new("tier")
                .long("tier")
                .possible_values(&["spacious", "some", "little", "cramped"])
                .default_value("spacious")
                .takes_value(true)
                .long_help(
                    "How much memory symbol loading may use.

* spacious (default): the debugger loaded all symbols; capture variables and registers.
* some: load the modules of every walked thread on demand; capture variables and registers.
* little: load the modules of the crashed thread only; no capture.
* cramped: like little, but only register module presence and never download symbols.",
                ),
        )
        .arg(
            Arg::new("signal")
                .long("signal")
                .default_value("11")
                .takes_value(true)
                .help("The number of the fatal signal"),
        )
        .arg(
            Arg::new("program")
                .long("program")
                .takes_value(true)
                .help("Name of the crashed program (defaults to its file name)"),
        )
        .arg(
            Arg::new("app-version")
                .long("app-version")
                .takes_value(true)
                .help("Version of the crashed program, used for the release"),
        )
        .arg(
            Arg::new("home")
                .long("home")
                .takes_value(true)
                .help("Home directory to replace by $HOME in file names (defaults to $HOME)"),
        )
        .arg(
            Arg::new("host-facts")
                .long("host-facts")
                .takes_value(true)
                .long_help(
                    "Command printing facts about the host as a JSON object.

The object may carry Hostname, Chassis, Virtualization, Timezone, OS_NAME, \
OS_VERSION_ID, OS_BUILD_ID and OS_VARIANT_ID. Without it the report has no host facts.",
                ),
        )
        .arg(
            Arg::new("module-lister")
                .long("module-lister")
                .default_value("eu-unstrip -n")
                .takes_value(true)
                .help("Command listing the modules of a core file, --core=<core> is appended"),
        )
        .arg(
            Arg::new("core")
                .long("core")
                .takes_value(true)
                .help("The core file of a post-mortem session"),
        )
        .arg(
            Arg::new("output-file")
                .long("output-file")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .long_help(
                    "Where to write the output to (if unspecified, stdout is used)

The file is replaced atomically, readers never see a partial report.",
                ),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .help("Where to write logs to (if unspecified, stderr is used)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .possible_values(&["off", "error", "warn", "info", "debug", "trace"])
                .default_value("error")
                .takes_value(true)
                .long_help(
                    "Set the logging level.

The walker and resolver are instrumented with `trace` logging, so if you want to \
debug why a frame looks the way it does, --verbose=trace is very useful (walker \
logging is prefixed with `walker:`, symbol loading with `resolver:`).",
                ),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .help("Pretty-print --json output."),
        )
        .arg(Arg::new("brief").long("brief").help(
            "Provide a briefer --human report.

Only provides the top-level summary and a backtrace of the crashing thread.",
        ))
        .arg(
            Arg::new("session")
                .required(true)
                .takes_value(true)
                .allow_invalid_utf8(true)
                .help("Path to the recorded debugger session (JSON)."),
        )
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}

fn print_report(
    state: &ProcessState,
    mut output: &mut dyn Write,
    human: bool,
    brief: bool,
    pretty: bool,
) -> io::Result<()> {
    if human {
        if brief {
            state.print_brief(&mut output)?;
        } else {
            state.print(&mut output)?;
        }
    } else {
        state.print_json(&mut output, pretty)?;
        writeln!(output)?;
    }
    output.flush()
}

/// Write to a temporary file next to `path`, then move it into place.
fn write_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    write(&mut file)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg_attr(test, allow(dead_code))]
fn main() {
    let matches = make_app().get_matches();

    let output_file = matches
        .value_of_os("output-file")
        .map(|os_str| Path::new(os_str).to_owned());

    let log_file = matches
        .value_of_os("log-file")
        .map(|os_str| Path::new(os_str).to_owned());

    let verbosity = match matches.value_of("verbose") {
        Some("off") => LevelFilter::Off,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Error,
    };

    // Init the logger (and make trace logging less noisy)
    if let Some(log_path) = log_file {
        let log_file = match File::create(&log_path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("cannot create log file {}: {}", log_path.display(), e);
                std::process::exit(1);
            }
        };
        let _ = WriteLogger::init(
            verbosity,
            ConfigBuilder::new()
                .set_location_level(LevelFilter::Off)
                .set_time_level(LevelFilter::Off)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Off)
                .build(),
            log_file,
        );
    } else {
        let _ = TermLogger::init(
            verbosity,
            ConfigBuilder::new()
                .set_location_level(LevelFilter::Off)
                .set_time_level(LevelFilter::Off)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Off)
                .set_level_color(Level::Trace, None)
                .build(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
    }

    // Set a panic hook to redirect to the logger
    panic::set_hook(Box::new(|panic_info| {
        let (filename, line) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line()))
            .unwrap_or(("<unknown>", 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .unwrap_or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<&str>()
                    .copied()
                    .unwrap_or("<cause unknown>")
            });
        error!(
            "Panic - A panic occurred at {}:{}: {}",
            filename, line, cause
        );
    }));

    let tier: MemoryTier = matches.value_of_t("tier").unwrap_or_else(|e| e.exit());
    let signal: u32 = matches.value_of_t("signal").unwrap_or_else(|e| e.exit());

    let mut options = ProcessorOptions::new(tier, signal);
    options.program = matches.value_of("program").map(String::from);
    options.app_version = matches.value_of("app-version").map(String::from);
    options.home_dir = matches
        .value_of("home")
        .map(String::from)
        .or_else(|| env::var("HOME").ok());
    options.host_facts_command = matches.value_of("host-facts").map(split_command);
    if let Some(lister) = matches.value_of("module-lister") {
        options.module_lister = split_command(lister);
    }
    options.core_path = matches.value_of("core").map(String::from);

    // --json is the default, --human switches it off. Mutual exclusion is
    // enforced by the ArgGroup.
    let human = matches.is_present("human");
    let pretty = matches.is_present("pretty");
    let brief = matches.is_present("brief");

    if pretty && human {
        error!("Humans must be hideous! (The --pretty and --human flags cannot both be set)");
        std::process::exit(1);
    }

    if brief && !human {
        error!("Robots cannot be brief! (The --brief flag is only valid for --human output)");
        std::process::exit(1);
    }

    let session_path = match matches.value_of_os("session") {
        Some(os_str) => Path::new(os_str),
        None => {
            error!("No session given");
            std::process::exit(1);
        }
    };

    let mut inferior = match SynthInferior::from_path(session_path) {
        Ok(inferior) => inferior,
        Err(err) => {
            error!("Error reading session: {}", err);
            std::process::exit(1);
        }
    };

    info!(
        "processing {} with tier {} for {}",
        session_path.display(),
        tier,
        signals::name(signal).unwrap_or_else(|| signals::describe(signal))
    );

    let state = match process_inferior(&mut inferior, &options) {
        Ok(state) => state,
        Err(err) => {
            error!("{} - Error processing session: {}", err.name(), err);
            std::process::exit(1);
        }
    };

    let written = match &output_file {
        Some(path) => write_atomically(path, |output| {
            print_report(&state, output, human, brief, pretty)
        }),
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            print_report(&state, &mut lock, human, brief, pretty)
        }
    };

    if let Err(err) = written {
        error!("Error writing report: {}", err);
        std::process::exit(1);
    }
}
