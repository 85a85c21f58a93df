use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emu::computer::{CancelToken, Computer, RunOutcome};

const MAX_MEMORY: u32 = 1024 * 1024;
const TRACE_FILE: &str = "trace.log";

#[derive(Parser, Debug)]
#[command(version, about = "Functional simulator for a reduced ARM-like 32-bit processor.", long_about = None)]
struct Args {
    /// RAM size in bytes (1 MiB max).
    #[arg(long, default_value_t = 32_768, value_parser = parse_memory_size)]
    mem: u32,

    /// ELF executable to load and run.
    #[arg(long)]
    load: PathBuf,

    /// Do not write the trace.log file.
    #[arg(long)]
    no_trace: bool,

    /// Write structured logs to this file instead of stderr.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Cancel the run after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the final machine status as JSON instead of the register
    /// summary.
    #[arg(long)]
    status: bool,
}

fn parse_memory_size(value: &str) -> Result<u32, String> {
    let size: u32 = value
        .parse()
        .map_err(|_| String::from("expected a byte count"))?;
    if size > MAX_MEMORY {
        return Err(format!("RAM size is capped at {MAX_MEMORY} bytes"));
    }
    Ok(size)
}

fn main() -> ExitCode {
    let args = Args::parse();
    // The appender guard must live until the end of main or buffered log
    // lines are lost.
    let _guard = init_logging(args.log.as_ref());
    info!(mem = args.mem, "machine configured");

    let mut computer = Computer::new(args.mem);

    if let Err(error) = computer.load(&args.load) {
        eprintln!("unable to load {}: {error}", args.load.display());
        return ExitCode::FAILURE;
    }
    println!(
        "loaded {} - checksum is {}",
        args.load.display(),
        computer.checksum()
    );

    if !args.no_trace {
        match File::create(TRACE_FILE) {
            Ok(file) => computer.enable_tracing(Box::new(BufWriter::new(file))),
            Err(error) => eprintln!("unable to open {TRACE_FILE}: {error}, tracing disabled"),
        }
    }

    let cancel = CancelToken::new();
    if let Some(seconds) = args.timeout {
        let token = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            token.request();
        });
    }

    // Feed piped stdin into the keyboard queue. The reader thread blocks,
    // the simulator never does; the queue hands the program 0 when empty.
    let keyboard = computer.keyboard_handle();
    thread::spawn(move || {
        let mut byte = [0_u8; 1];
        let mut stdin = io::stdin();
        while let Ok(1) = stdin.read(&mut byte) {
            keyboard.lock().unwrap().push(byte[0]);
        }
    });

    let outcome = computer.run(&cancel);
    // Drop the sink so a buffered trace file is flushed.
    computer.disable_tracing();
    drain_console(&computer);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(fault) => {
            eprintln!("{fault}");
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        RunOutcome::Halted => println!("program halted after {} steps", computer.steps()),
        RunOutcome::Cancelled => println!("run cancelled after {} steps", computer.steps()),
    }

    if args.status {
        match serde_json::to_string_pretty(&computer.status()) {
            Ok(json) => println!("{json}"),
            Err(error) => {
                eprintln!("unable to serialize the machine status: {error}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_registers(&computer);
    }

    ExitCode::SUCCESS
}

fn init_logging(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
                return Some(guard);
            }
            Err(error) => {
                eprintln!(
                    "unable to open log file {}: {error}, logging to stderr",
                    path.display()
                );
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    None
}

/// Prints whatever the program wrote to the console port.
fn drain_console(computer: &Computer) {
    let console = computer.console_handle();
    let mut queue = console.lock().expect("console queue lock");
    if queue.is_empty() {
        return;
    }

    let mut stdout = io::stdout().lock();
    while let Some(byte) = queue.pop() {
        let _ = stdout.write_all(&[byte]);
    }
    let _ = stdout.write_all(b"\n");
    let _ = stdout.flush();
}

fn print_registers(computer: &Computer) {
    let status = computer.status();
    for (row, chunk) in status.registers.chunks(4).enumerate() {
        let cells: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(column, value)| format!("r{:<2} = {value}", row * 4 + column))
            .collect();
        println!("{}", cells.join("   "));
    }
}
