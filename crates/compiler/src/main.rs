//! Seron compiler CLI
//!
//! Compiles a single `.sn` source file to an executable, or stops early at
//! assembly (`-S`) or an object file (`-c`). Debug dumps go to stderr.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use seronc::{BuildConfig, CompilerOptions, Target};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "seronc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Seron compiler - compile .sn programs to executables", long_about = None)]
struct Cli {
    /// Input .sn source file
    input: Option<PathBuf>,

    /// Stop after code generation, only produce assembly
    #[arg(short = 'S', long = "compile-only")]
    compile_only: bool,

    /// Stop after assembling, only produce an object file
    #[arg(short = 'c')]
    assemble_only: bool,

    /// Show info messages
    #[arg(short, long)]
    verbose: bool,

    /// Dump the parsed AST to stderr
    #[arg(long)]
    dump_ast: bool,

    /// Dump the token stream to stderr
    #[arg(long)]
    dump_tokens: bool,

    /// Dump the resolved symbol tables to stderr
    #[arg(long)]
    dump_symboltable: bool,

    /// Annotate the generated assembly with origin comments
    #[arg(long)]
    asmdoc: bool,

    /// Build configuration file (TOML) naming the toolchain and libraries
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Generate shell completion scripts and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate(shell, &mut Cli::command(), "seronc", &mut io::stdout());
        return;
    }

    let Some(input) = cli.input else {
        Cli::command().print_help().ok();
        process::exit(2);
    };

    let target = if cli.compile_only {
        Target::Assembly
    } else if cli.assemble_only {
        Target::Object
    } else {
        Target::Binary
    };

    let options = CompilerOptions {
        verbose: cli.verbose,
        dump_tokens: cli.dump_tokens,
        dump_ast: cli.dump_ast,
        dump_symboltable: cli.dump_symboltable,
        asmdoc: cli.asmdoc,
        target,
    };

    let build = match cli.config {
        Some(path) => match BuildConfig::load(&path) {
            Ok(build) => build,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
        None => BuildConfig::default(),
    };

    if let Err(e) = seronc::compile_file(&input, &options, &build) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
