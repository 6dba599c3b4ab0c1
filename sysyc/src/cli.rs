use clap::Parser;
use std::path::PathBuf;
use sysyc_lib::compile::{CompileOpts, CompileOptsBuilder};

#[derive(Debug, Parser)]
#[command(author, version, about = "Backend of the SysY compiler", long_about = None)]
pub struct Args {
    /// Input file: a MIR package serialized by the frontend.
    pub input: PathBuf,

    /// Output assembly file.
    #[arg(short = 'o', long = "output", default_value = "out.s")]
    pub output: PathBuf,

    /// Set verbosity to trace and dump MIR and ARM code.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Show the code after each pass.
    #[arg(short = 'd', long = "pass-diff")]
    pub pass_diff: bool,

    /// Only run the listed passes (comma-separated).
    #[arg(short = 'r', long = "run-pass", value_delimiter = ',')]
    pub run_pass: Vec<String>,

    /// Skip the listed passes (comma-separated).
    #[arg(short = 's', long = "skip-pass", value_delimiter = ',')]
    pub skip_pass: Vec<String>,

    /// Emit assembly (accepted, no effect).
    #[arg(short = 'S', long = "asm")]
    pub asm: bool,

    /// Optimize code (accepted, no effect).
    #[arg(short = 'O', long = "optimize")]
    pub optimize: bool,

    /// Optimize code (accepted, no effect).
    #[arg(long = "O2", alias = "optimize-2")]
    pub optimize_2: bool,
}

pub fn extract_compile_opts(args: &Args) -> CompileOpts {
    if args.asm || args.optimize || args.optimize_2 {
        log::debug!("-S/-O/--O2 are accepted for driver compatibility and have no effect");
    }
    if !args.run_pass.is_empty() {
        log::info!("Only running the following passes: {}", args.run_pass.join(", "));
    }
    if !args.skip_pass.is_empty() {
        log::info!("Skipping the following passes: {}", args.skip_pass.join(", "));
    }
    CompileOptsBuilder::new()
        .verbose(args.verbose)
        .pass_diff(args.pass_diff)
        .run_pass(args.run_pass.iter().cloned())
        .skip_pass(args.skip_pass.iter().cloned())
        .build()
}
