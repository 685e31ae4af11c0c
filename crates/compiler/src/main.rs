//! B-minor compiler CLI
//!
//! Command-line interface for compiling B-minor programs to x86-64
//! assembly, checking them, and pretty-printing parsed sources.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "bminorc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "B-minor compiler - compile B-minor programs to x86-64 assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a B-minor source file to AT&T-syntax assembly
    Build {
        /// Input source file
        input: PathBuf,

        /// Output assembly path
        #[arg(short, long, default_value = bminorc::DEFAULT_OUTPUT)]
        output: PathBuf,
    },

    /// Parse, resolve, and type check without generating code
    Check {
        /// Input source file
        input: PathBuf,
    },

    /// Parse a source file and pretty-print the reconstructed program
    Print {
        /// Input source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output } => run_build(&input, &output),
        Commands::Check { input } => run_check(&input),
        Commands::Print { input } => run_print(&input),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_build(input: &Path, output: &Path) {
    match bminorc::compile_file(input, output) {
        Ok(()) => println!("Compiled {} -> {}", input.display(), output.display()),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

fn run_check(input: &Path) {
    let source = read_source(input);
    match bminorc::check_source(&source) {
        Ok(_) => println!("{}: no errors", input.display()),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

fn run_print(input: &Path) {
    let source = read_source(input);
    match bminorc::parser::parse_source(&source) {
        Ok(program) => print!("{program}"),
        Err(e) => {
            eprintln!("Parse error: {e}");
            process::exit(1);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "bminorc", &mut io::stdout());
}

fn read_source(input: &Path) -> String {
    match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not open file '{}': {e}", input.display());
            process::exit(1);
        }
    }
}
