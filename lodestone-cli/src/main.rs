use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use dcpu::{Dcpu, Memory};

mod shutdown;

/// DCPU-16 runner
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Program image to load and execute
    program: PathBuf,

    /// Print the register/state/cycle dump after execution
    #[clap(short = 'r', long)]
    registers: bool,

    /// Print a full memory dump after execution
    #[clap(short = 'm', long)]
    memory: bool,

    /// Write a raw memory snapshot to the given path
    #[clap(short = 'd', long, value_name = "PATH")]
    dump: Option<PathBuf>,
}

/// End-of-run reporting, shared by the normal and interrupted exits
fn report(cpu: &Dcpu, args: &Args) -> Result<()> {
    if args.registers {
        println!("{cpu}");
    }
    if args.memory {
        println!("{}", cpu.memory().dump_all());
    }
    if let Some(path) = &args.dump {
        let snapshot = cpu.memory().serialize(0, Memory::WORDS);
        fs::write(path, snapshot)
            .with_context(|| format!("failed to write snapshot to {path:?}"))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("LODESTONE_LOG", "info")
        .write_style_or("LODESTONE_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    shutdown::install();

    let image = fs::read(&args.program)
        .with_context(|| format!("failed to read {:?}", args.program))?;

    let mut cpu = Dcpu::new();
    let words = cpu
        .memory_mut()
        .load_image(&image)
        .with_context(|| format!("invalid program image {:?}", args.program))?;
    info!("loaded {words} words from {:?}", args.program);

    // Drive one instruction at a time so an interrupt lands between
    // instructions; the engine has no preemption point of its own.
    cpu.start();
    let start = std::time::Instant::now();
    loop {
        if shutdown::requested() {
            warn!("execution aborted");
            break;
        }
        if !cpu.step() {
            break;
        }
    }
    cpu.halt();
    info!("halted after {} cycles in {:?}", cpu.cycles(), start.elapsed());

    report(&cpu, &args)
}
