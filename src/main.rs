use anyhow::Context;
use clap::{CommandFactory, Parser};
use log::info;
use riscue::binary::{Binary, LoadError};
use riscue::{exitcode, parser, sat, Console, Emulator, MachineKind, TOOL_NAME};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;

/// MiniC to RISC-U compiler and emulator with record/replay and symbolic
/// execution. Actions run in pipeline order: sat, compile, output,
/// disassemble, load, run.
#[derive(Parser)]
#[command(name = "riscue", version)]
struct Cli {
    /// Compile MiniC sources into the in-memory binary, linked in order
    #[arg(short = 'c', long = "compile", value_name = "SOURCE", num_args = 1..)]
    compile: Vec<PathBuf>,

    /// Write the current binary to a file
    #[arg(short = 'o', long = "output", value_name = "BINARY")]
    output: Option<PathBuf>,

    /// Disassemble the current binary to a file
    #[arg(short = 's', long = "disassemble", value_name = "ASSEMBLY")]
    disassemble: Option<PathBuf>,

    /// Disassemble verbosely with source line numbers and raw words
    #[arg(short = 'S', long = "disassemble-verbose", value_name = "ASSEMBLY")]
    disassemble_verbose: Option<PathBuf>,

    /// Load a previously saved binary
    #[arg(short = 'l', long = "load", value_name = "BINARY")]
    load: Option<PathBuf>,

    /// Run the SAT solver on a DIMACS CNF file
    #[arg(long = "sat", value_name = "DIMACS")]
    sat: Option<PathBuf>,

    /// Run under mipster with this many MiB of physical memory
    #[arg(short = 'm', value_name = "MIB")]
    mipster: Option<u32>,

    /// Run under dipster (mipster plus disassembly)
    #[arg(short = 'd', value_name = "MIB")]
    dipster: Option<u32>,

    /// Run under ripster (mipster plus record/replay on crash)
    #[arg(short = 'r', value_name = "MIB")]
    ripster: Option<u32>,

    /// Run under monster (symbolic execution) with this fuzz factor
    #[arg(short = 'n', value_name = "FUZZ")]
    monster: Option<u32>,

    /// Run under hypster (nested, via the guest switch call)
    #[arg(short = 'y', value_name = "MIB")]
    hypster: Option<u32>,

    /// Run under minster (all pages pre-mapped, no page faults)
    #[arg(long = "min", value_name = "MIB")]
    minster: Option<u32>,

    /// Run under mobster (no page fault handling)
    #[arg(long = "mob", value_name = "MIB")]
    mobster: Option<u32>,

    /// Alternate mipster and hypster slices with this mipster percentage
    #[arg(long = "mix", value_name = "PCT")]
    mixter: Option<u32>,

    /// Arguments passed to the guest program
    #[arg(trailing_var_arg = true, value_name = "ARGS")]
    args: Vec<String>,
}

impl Cli {
    fn machine(&self) -> Option<(MachineKind, u32)> {
        if let Some(mib) = self.mipster {
            Some((MachineKind::Mipster, mib))
        } else if let Some(mib) = self.dipster {
            Some((MachineKind::Dipster, mib))
        } else if let Some(mib) = self.ripster {
            Some((MachineKind::Ripster, mib))
        } else if let Some(fuzz) = self.monster {
            Some((MachineKind::Monster, fuzz))
        } else if let Some(mib) = self.hypster {
            Some((MachineKind::Hypster, mib))
        } else if let Some(mib) = self.minster {
            Some((MachineKind::Minster, mib))
        } else if let Some(mib) = self.mobster {
            Some((MachineKind::Mobster, mib))
        } else {
            self.mixter.map(|mix| (MachineKind::Mixter(mix), 64))
        }
    }
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            // clap renders its own usage text
            let _ = error.print();

            process::exit(exitcode::BADARGUMENTS as i32);
        }
    };

    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    if cli.sat.is_none()
        && cli.compile.is_empty()
        && cli.output.is_none()
        && cli.disassemble.is_none()
        && cli.disassemble_verbose.is_none()
        && cli.load.is_none()
        && cli.machine().is_none()
    {
        let _ = Cli::command().print_help();

        return exitcode::NOERROR as i32;
    }

    if let Some(dimacs) = &cli.sat {
        if let Err(error) = sat::solve_dimacs(dimacs) {
            eprintln!("{}: {}", TOOL_NAME, error);

            return error.exit_code() as i32;
        }
    }

    let mut binary: Option<Binary> = None;

    if !cli.compile.is_empty() {
        match parser::compile(&cli.compile) {
            Ok(compiled) => binary = Some(compiled),
            Err(error) => {
                eprintln!("{}: {}", TOOL_NAME, error);

                return error.exit_code() as i32;
            }
        }
    }

    if let Some(path) = &cli.output {
        match &binary {
            Some(binary) => {
                if let Err(error) = binary.save(path) {
                    return report_load_error(error);
                }
            }
            None => eprintln!("{}: nothing to emit to output file {}", TOOL_NAME, path.display()),
        }
    }

    for (path, verbose) in [(&cli.disassemble, false), (&cli.disassemble_verbose, true)] {
        if let Some(path) = path {
            match &binary {
                Some(binary) => {
                    let file = match File::create(path)
                        .with_context(|| format!("could not create assembly output file {}", path.display()))
                    {
                        Ok(file) => file,
                        Err(error) => {
                            eprintln!("{}: {:#}", TOOL_NAME, error);

                            return exitcode::IOERROR as i32;
                        }
                    };

                    let mut out = BufWriter::new(file);

                    if let Err(error) = binary.disassemble(&mut out, verbose) {
                        eprintln!("{}: {}", TOOL_NAME, error);

                        return match error {
                            riscue::DisassembleError::UnknownInstruction(_) => {
                                exitcode::UNKNOWNINSTRUCTION as i32
                            }
                            riscue::DisassembleError::Io { .. } => exitcode::IOERROR as i32,
                        };
                    }

                    info!("assembly written into {}", path.display());
                }
                None => eprintln!(
                    "{}: nothing to disassemble to output file {}",
                    TOOL_NAME,
                    path.display()
                ),
            }
        }
    }

    if let Some(path) = &cli.load {
        match Binary::load(path) {
            Ok(loaded) => binary = Some(loaded),
            Err(error) => return report_load_error(error),
        }
    }

    if let Some((kind, argument)) = cli.machine() {
        let binary = match binary {
            Some(binary) => binary,
            None => {
                eprintln!("{}: nothing to run, debug, or host", TOOL_NAME);

                return exitcode::BADARGUMENTS as i32;
            }
        };

        let mut emulator = Emulator::new(binary, kind, argument, Console::Stdout);

        match emulator.run(&cli.args) {
            Ok(exit_code) => return exit_code as i32,
            Err(error) => {
                eprintln!("{}: {}", TOOL_NAME, error);

                return error.exit_code() as i32;
            }
        }
    }

    exitcode::NOERROR as i32
}

fn report_load_error(error: LoadError) -> i32 {
    eprintln!("{}: {}", TOOL_NAME, error);

    match error {
        LoadError::NothingToEmit(_) => exitcode::NOERROR as i32,
        _ => exitcode::IOERROR as i32,
    }
}
