//! CVM driver.
//!
//! Parses an assembly source file, compiles the entry function, and runs
//! it to completion.
//!
//! # Usage
//! ```text
//! cvm <source-file> [OPTIONS]
//! ```
//!
//! # Options
//! - `--entry <name>`: Run `<name>` instead of the `.program` entry
//! - `--globals <n>`: Dynamic registers in the global environment (default 0)
//! - `--log-level <info|warn|error>`: Logger threshold
//!
//! Exit code 0 on clean termination, non-zero on any parse, compile, or
//! runtime error.

use cvm::parser::parse_file;
use cvm::utils::log;
use cvm::vm::VirtualMachine;
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let source_path = &args[1];
    let mut entry_override: Option<String> = None;
    let mut globals = 0usize;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ "--entry" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                entry_override = Some(args[i].clone());
                i += 1;
            }
            k @ "--globals" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                globals = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("--globals expects a register count, got '{}'", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            k @ "--log-level" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                match log::Level::from_name(&args[i]) {
                    Some(level) => log::init(level),
                    None => {
                        eprintln!("Unknown log level: {}", args[i]);
                        process::exit(1);
                    }
                }
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    // Individual diagnostics were already printed with line numbers.
    let program = match parse_file(source_path) {
        Ok(program) => program,
        Err(e) => {
            log::error(&format!("{}: {}", source_path, e));
            process::exit(1);
        }
    };

    let mut vm = VirtualMachine::with_globals(program, globals);
    let entry = entry_override
        .or_else(|| vm.entry_name().map(str::to_string))
        .unwrap_or_default();

    let function = match vm.compile(&entry) {
        Ok(function) => function,
        Err(e) => {
            eprintln!("Compile Error for '{}'.", e);
            process::exit(1);
        }
    };

    if let Err(e) = vm.execute(function) {
        eprintln!("Runtime Error for '{}'.", e);
        process::exit(1);
    }
}

const USAGE: &str = "\
CVM

USAGE:
    {program} <source-file> [OPTIONS]

ARGS:
    <source-file>    Assembly source file to run

OPTIONS:
    --entry <name>           Run <name> instead of the .program entry
    --globals <n>            Dynamic registers in the global environment
    --log-level <level>      Logger threshold: info, warn, error
    -h, --help               Print this help message

EXAMPLES:
    # Run a program's entry function
    {program} program.cvm

    # Run a specific function with two global registers
    {program} program.cvm --entry init --globals 2
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
