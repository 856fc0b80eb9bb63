use anyhow::{anyhow, bail, Context, Result};
use cerulean_compiler::backend::emit::{assembly, encode, hex_lines};
use cerulean_compiler::backend::regalloc::AllocOptions;
use cerulean_compiler::ir::interp::{Exit, Interpreter};
use cerulean_compiler::ir::samples::{self, Sample};
use cerulean_compiler::sim::{Machine, Outcome};
use cerulean_compiler::{compile_module, BackendOptions, Target, CERULEAN_ASM, CERULEAN_RISC};
use clap::{Parser, ValueEnum};
use log::info;

#[derive(Parser)]
#[command(name = "cerulean")]
#[command(about = "Compile built-in IR samples for the CeruleanASM and CeruleanRISC targets")]
struct Args {
    /// Sample to compile (see --list)
    #[arg(long, default_value = "sum_loop")]
    sample: String,

    /// Instruction set to generate code for
    #[arg(long, value_enum, default_value_t = TargetOpt::Asm)]
    target: TargetOpt,

    /// Output form
    #[arg(long, value_enum, default_value_t = EmitOpt::Asm)]
    emit: EmitOpt,

    /// Hand the spill scratch register to the allocator
    #[arg(long)]
    no_scratch: bool,

    /// Execute the compiled sample and compare it with the IR interpreter
    #[arg(long)]
    run: bool,

    /// List the built-in samples and exit
    #[arg(long)]
    list: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TargetOpt {
    Asm,
    Risc,
}

impl TargetOpt {
    fn target(self) -> &'static Target {
        match self {
            TargetOpt::Asm => &CERULEAN_ASM,
            TargetOpt::Risc => &CERULEAN_RISC,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EmitOpt {
    Asm,
    Ir,
    Hex,
    Json,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for name in samples::NAMES {
            if let Some(sample) = samples::by_name(name) {
                println!("{:<12} {}", sample.name, sample.about);
            }
        }
        return Ok(());
    }

    let sample = samples::by_name(&args.sample)
        .ok_or_else(|| anyhow!("unknown sample `{}` (try --list)", args.sample))?;
    let target = args.target.target();

    if let EmitOpt::Ir = args.emit {
        for f in &sample.module {
            for line in f.to_lines() {
                println!("{}", line);
            }
            println!();
        }
        if args.run {
            println!("; result: {}", describe_exit(reference(&sample)?));
        }
        return Ok(());
    }

    let options = BackendOptions {
        alloc: AllocOptions {
            reserve_spill_scratch: !args.no_scratch,
        },
    };
    let symbols = sample.symbols();
    let out = compile_module(target, &symbols, &sample.module, &options);
    for diag in &out.diagnostics {
        eprintln!("error: {}", diag);
    }
    if !out.is_clean() {
        bail!(
            "{} of {} functions failed to compile for {}",
            out.diagnostics.len(),
            sample.module.len(),
            target
        );
    }
    info!(
        "compiled `{}` for {}: {} functions",
        sample.name,
        target,
        out.functions.len()
    );

    match args.emit {
        EmitOpt::Asm => {
            for cf in &out.functions {
                print!("{}", assembly(cf));
                println!();
            }
        }
        EmitOpt::Hex => {
            for cf in &out.functions {
                let encoded = encode(target, cf)?;
                println!("{}:", cf.name);
                for line in hex_lines(&encoded) {
                    println!("    {}", line);
                }
                println!();
            }
        }
        EmitOpt::Json => {
            let json = serde_json::to_string_pretty(&out.functions)
                .context("serializing compiled functions")?;
            println!("{}", json);
        }
        EmitOpt::Ir => {}
    }

    if args.run {
        let mut machine = Machine::new(target, &out.functions, sample.memory());
        let got = machine
            .call(sample.entry, &sample.args)
            .with_context(|| format!("running `{}` on {}", sample.entry, target))?;
        let expected = reference(&sample)?;
        println!("; {} result: {}", target, describe_outcome(got));
        let matches = match (got, expected) {
            (Outcome::Return(a), Exit::Return(b)) => a == b.unwrap_or(0),
            (Outcome::Halt, Exit::Halt) => true,
            _ => false,
        };
        if !matches {
            bail!(
                "compiled result {} differs from the interpreter's {}",
                describe_outcome(got),
                describe_exit(expected)
            );
        }
    }
    Ok(())
}

fn reference(sample: &Sample) -> Result<Exit> {
    let symbols = sample.symbols();
    let mut interp = Interpreter::with_memory(&sample.module, &symbols, sample.memory());
    interp
        .call(sample.entry, &sample.args)
        .with_context(|| format!("interpreting `{}`", sample.entry))
}

fn describe_outcome(o: Outcome) -> String {
    match o {
        Outcome::Return(v) => v.to_string(),
        Outcome::Halt => "halt".to_string(),
    }
}

fn describe_exit(e: Exit) -> String {
    match e {
        Exit::Return(Some(v)) => v.to_string(),
        Exit::Return(None) => "no value".to_string(),
        Exit::Halt => "halt".to_string(),
    }
}
