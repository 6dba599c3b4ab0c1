mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use mir::MirPackage;
use sysyc_lib::compile::compile;

fn main() -> Result<()> {
    let args = cli::Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("input file is {}", args.input.display());
    log::info!("output file is {}", args.output.display());

    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input file `{}`", args.input.display()))?;
    let package: MirPackage = serde_json::from_str(&source)
        .with_context(|| format!("`{}` is not a MIR package", args.input.display()))?;

    if args.verbose {
        println!("{package}");
    }

    let opts = cli::extract_compile_opts(&args);
    let code = compile(package, &opts).context("compilation failed")?;

    log::info!("writing to output file: {}", args.output.display());
    std::fs::write(&args.output, code)
        .with_context(|| format!("Failed to write output file `{}`", args.output.display()))?;

    Ok(())
}
