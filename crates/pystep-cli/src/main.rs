use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
    thread,
};

use pystep::{
    InputLines, Program, RecordingTracer, StdPrint,
    debugger::{DebugLimits, SessionRegistry, SessionState, dedent},
};
use tracing_subscriber::EnvFilter;

/// Stack size for `--trace` runs, enough for the default recursion limit.
const TRACE_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Source lines shown around the current line.
const CONTEXT_LINES: usize = 2;

const HELP: &str = "commands: s(tep), c(ontinue), r(un), b N, v, bt, reset, q";

struct Options {
    file: String,
    breakpoints: Vec<u32>,
    trace: bool,
}

fn main() -> ExitCode {
    init_logging();

    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("usage: pystep <file.py> [--break N]... [--trace]");
            return ExitCode::FAILURE;
        }
    };
    let code = match fs::read_to_string(&options.file) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: reading file {}: {err}", options.file);
            return ExitCode::FAILURE;
        }
    };

    let result = if options.trace {
        trace(&options.file, &code)
    } else {
        debug(&options, &code)
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut file = None;
    let mut breakpoints = Vec::new();
    let mut trace = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace" => trace = true,
            "--break" | "-b" => {
                let line = args.next().ok_or("--break needs a line number")?;
                breakpoints.push(line.parse().map_err(|_| format!("invalid line number '{line}'"))?);
            }
            _ if file.is_none() => file = Some(arg),
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }
    let file = file.ok_or("missing file")?;
    Ok(Options {
        file,
        breakpoints,
        trace,
    })
}

// ============================================================================
// --trace
// ============================================================================

/// Runs the file once without pausing and prints every recorded event.
fn trace(file: &str, code: &str) -> io::Result<ExitCode> {
    let program = match Program::compile(code, file) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let worker = thread::Builder::new().stack_size(TRACE_STACK_SIZE).spawn(move || {
        let mut tracer = RecordingTracer::new();
        let result = program.run(&mut tracer, &mut StdPrint, InputLines::empty());
        (tracer.into_events(), result)
    })?;
    let (events, result) = worker.join().map_err(|_| io::Error::other("trace thread panicked"))?;

    for event in &events {
        println!("{event}");
    }
    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            eprintln!("{failure}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// Interactive session
// ============================================================================

fn debug(options: &Options, code: &str) -> io::Result<ExitCode> {
    let registry = SessionRegistry::new(DebugLimits::new());
    let source: Vec<String> = dedent(code).lines().map(str::to_owned).collect();
    let mut state = registry.create_session(code, None);
    let id = state.id.clone();
    for &line in &options.breakpoints {
        registry.toggle_breakpoint(&id, line).map_err(io::Error::other)?;
    }

    state = registry.start_execution(&id).map_err(io::Error::other)?;
    let mut printed = 0;
    show(&state, &source, &mut printed);
    println!("{HELP}");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("(pystep) ");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let result = match command {
            "s" | "step" => registry.step_forward(&id),
            "c" | "continue" => registry.continue_execution(&id),
            "r" | "run" => registry.run_to_completion(&id),
            "b" | "break" => {
                match words.next().and_then(|word| word.parse::<u32>().ok()) {
                    Some(line) => {
                        let breakpoints = registry.toggle_breakpoint(&id, line).map_err(io::Error::other)?;
                        println!("breakpoints: {:?}", breakpoints.breakpoints);
                    }
                    None => println!("usage: b N"),
                }
                continue;
            }
            "v" | "vars" => {
                for entry in registry.get_latest_variables(&id).map_err(io::Error::other)? {
                    println!("  {} ({}) = {}", entry.name, entry.type_name, entry.value);
                }
                continue;
            }
            "bt" | "where" => {
                print_stack(&registry.get_execution_state(&id).map_err(io::Error::other)?);
                continue;
            }
            "reset" => {
                printed = 0;
                registry.reset_session(&id).and_then(|_| registry.start_execution(&id))
            }
            "q" | "quit" => break,
            _ => {
                println!("{HELP}");
                continue;
            }
        };
        state = result.map_err(io::Error::other)?;
        show(&state, &source, &mut printed);
    }

    registry.delete_session(&id);
    Ok(if state.error.is_some() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Prints new program output, then the current line or the final outcome.
fn show(state: &SessionState, source: &[String], printed: &mut usize) {
    for line in state.output.iter().skip(*printed) {
        println!("| {line}");
    }
    *printed = state.output.len();

    if let Some(error) = &state.error {
        println!("finished with error: {error}");
        return;
    }
    if state.is_finished {
        println!("finished");
        return;
    }
    let Ok(current) = usize::try_from(state.current_line) else {
        return;
    };
    let first = current.saturating_sub(CONTEXT_LINES).max(1);
    let last = (current + CONTEXT_LINES).min(source.len());
    for number in first..=last {
        let marker = if number == current { "->" } else { "  " };
        let breakpoint = if state.breakpoints.iter().any(|&b| b as usize == number) { "*" } else { " " };
        println!("{breakpoint}{marker} {number:>4} {}", source[number - 1]);
    }
}

fn print_stack(state: &SessionState) {
    for (depth, frame) in state.call_stack.iter().enumerate() {
        println!("  #{depth} {} line {} (depth {})", frame.function_name, frame.line, frame.recursion_depth);
        for (name, value) in &frame.locals {
            println!("       {name} = {}", value.value);
        }
    }
    if !state.recursive_functions.is_empty() {
        println!("  recursive: {}", state.recursive_functions.join(", "));
    }
}

/// Logs to stderr. `RUST_LOG` overrides the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
