use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, Result};

use lc3vm::output::{Condition, Output};
use lc3vm::{
    assemble, env, Endian, Features, Image, Op, RunEnvironment, RunError, Status, StdConsole,
};
use lc3vm::PC_START;

/// lc3vm runs programs for the LC3, a 16-bit educational computer.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file or binary image to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` file or binary image and output to terminal
    Run {
        /// `.asm` file or binary image to run
        name: PathBuf,
        #[command(flatten)]
        opts: RunOptions,
    },
    /// Create binary image to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output image, defaults to `<name>.obj`
        dest: Option<PathBuf>,
        /// Byte order of the written words
        #[arg(short, long, default_value_t)]
        endian: Endian,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print the disassembly of a `.asm` file or binary image
    Dump {
        /// `.asm` file or binary image to disassemble
        name: PathBuf,
        #[command(flatten)]
        image: ImageOptions,
    },
}

#[derive(clap::Args, Default)]
struct ImageOptions {
    /// Byte order of words in a binary image
    #[arg(short, long, default_value_t)]
    endian: Endian,
    /// Load address of a binary image, in hex. Assembled files use `.orig`
    #[arg(short, long, value_parser = parse_addr)]
    origin: Option<u16>,
}

#[derive(clap::Args, Default)]
struct RunOptions {
    #[command(flatten)]
    image: ImageOptions,
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
    /// Comma-separated quirks to enable: `jsrr-index`, `kbsr-raw`
    #[arg(short, long, default_value_t)]
    features: Features,
    /// Stop after this many instructions, even without HALT
    #[arg(long)]
    max_steps: Option<u64>,
    /// Print registers once the program stops
    #[arg(short, long)]
    registers: bool,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(lc3vm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run { name, opts } => run(&name, &opts),
            Command::Compile { name, dest, endian } => {
                Output::set_minimal(env::is_minimal_forced());
                file_message(Green, "Assembling", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let image = assemble(&contents)?;
                if image.origin() != PC_START {
                    message(
                        Cyan,
                        "Note",
                        &format!("run with `--origin {:04x}`", image.origin()),
                    );
                }

                let out_file_name = dest.unwrap_or_else(|| name.with_extension("obj"));
                fs::write(&out_file_name, image.to_bytes(endian)).into_diagnostic()?;

                message(Green, "Finished", &format!("emit {} words", image.len()));
                file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name } => {
                Output::set_minimal(env::is_minimal_forced());
                file_message(Green, "Checking", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let _ = assemble(&contents)?;
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Dump { name, image } => {
                Output::set_minimal(env::is_minimal_forced());
                let image = load(&name, &image)?;
                for (idx, word) in image.words().iter().enumerate() {
                    let addr = image.origin().wrapping_add(idx as u16);
                    println!("0x{:04x}  {:04x}  {}", addr, word, Op::decode(*word));
                }
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, &RunOptions::default())
    } else {
        println!("\n~ lc3vm v{VERSION} ~");
        println!("{}", TITLE.truecolor(255, 183, 197).bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

/// Status line on stderr, so stdout carries only program output.
fn message(color: MsgColor, left: &str, right: &str) {
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    Output::Debugger(Condition::Always).start_new_line();
    eprintln!("{left:>12} {right}");
}

fn run(name: &Path, opts: &RunOptions) -> Result<()> {
    Output::set_minimal(opts.minimal || env::is_minimal_forced());
    let image = load(name, &opts.image)?;

    let mut program = RunEnvironment::from_image(&image, StdConsole::new(), opts.features);
    program.set_trace(env::is_trace_enabled());

    message(
        MsgColor::Green,
        "Running",
        &format!("{} words at 0x{:04x}", image.len(), image.origin()),
    );
    let status = match opts.max_steps {
        Some(max_steps) => program.run_for(max_steps).into_diagnostic()?,
        None => {
            program.run().into_diagnostic()?;
            Status::Halted
        }
    };
    Output::Debugger(Condition::Always).start_new_line();

    if opts.registers {
        Output::Normal.print_registers(program.state().reg());
    }
    match status {
        Status::Halted => file_message(MsgColor::Green, "Completed", name),
        Status::Running => message(
            MsgColor::Cyan,
            "Stopped",
            &format!("after {} instructions", program.steps()),
        ),
    }
    Ok(())
}

/// Assemble `.asm` files, read anything else as a binary image.
fn load(name: &Path, opts: &ImageOptions) -> Result<Image> {
    match name.extension().and_then(|ext| ext.to_str()) {
        Some("asm") => {
            if opts.origin.is_some() {
                bail!("Cannot set origin of an assembly file, use `.orig` instead");
            }
            file_message(MsgColor::Green, "Assembling", name);
            let contents = fs::read_to_string(name).into_diagnostic()?;
            assemble(&contents)
        }
        _ => {
            file_message(MsgColor::Green, "Loading", name);
            let origin = opts.origin.unwrap_or(PC_START);
            Image::read_file(name, opts.endian, origin)
                .map_err(RunError::from)
                .into_diagnostic()
        }
    }
}

fn parse_addr(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix(['x', 'X']))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a hexadecimal address", s))
}

const TITLE: &str = r"
 _     ____ _____
| |   / ___|___ / __   ___ __ ___
| |  | |     |_ \ \ \ / / '_ ` _ \
| |__| |___ ___) | \ V /| | | | | |
|_____\____|____/   \_/ |_| |_| |_|";

const SHORT_INFO: &str = r"
Welcome to lc3vm, a virtual machine and small assembler for LC3 programs.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
