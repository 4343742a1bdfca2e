// A MiniC to RISC-U toolchain: a single-pass compiler, an ELF32 emitter and
// loader, and a software RISC-U machine with virtual memory, a small syscall
// kernel, and four execution personalities over one decode path (plain
// emulation, disassembly, bounded record/replay, bounded symbolic execution).

use log::info;
use thiserror::Error;

pub mod binary;
pub mod bits;
pub mod instructions;
pub mod kernel;
pub mod memory;
pub mod parser;
pub mod processor;
pub mod replay;
pub mod sat;
pub mod scanner;
pub mod symbolic;
pub mod symbols;

pub use binary::{Binary, DisassembleError, LoadError};
pub use processor::{Console, Exception, Machine};

pub const TOOL_NAME: &str = "riscue";

pub mod exitcode {
    pub const NOERROR: u32 = 0;
    pub const BADARGUMENTS: u32 = 1;
    pub const IOERROR: u32 = 2;
    pub const SCANNERERROR: u32 = 3;
    pub const PARSERERROR: u32 = 4;
    pub const COMPILERERROR: u32 = 5;
    pub const OUTOFVIRTUALMEMORY: u32 = 6;
    pub const OUTOFPHYSICALMEMORY: u32 = 7;
    pub const DIVISIONBYZERO: u32 = 8;
    pub const UNKNOWNINSTRUCTION: u32 = 9;
    pub const UNKNOWNSYSCALL: u32 = 10;
    pub const MULTIPLEEXCEPTIONERROR: u32 = 11;
    pub const SYMBOLICEXECUTIONERROR: u32 = 12;
    pub const OUTOFTRACEMEMORY: u32 = 13;
    pub const UNCAUGHTEXCEPTION: u32 = 14;
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error in {file} in line {line}: {message}")]
    Scanner { file: String, line: u32, message: String },
    #[error("syntax error in {file} in line {line}: {message}")]
    Parser { file: String, line: u32, message: String },
    #[error("{message}")]
    CodeGen { message: String },
    #[error("could not access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn exit_code(&self) -> u32 {
        match self {
            CompileError::Scanner { .. } => exitcode::SCANNERERROR,
            CompileError::Parser { .. } => exitcode::PARSERERROR,
            CompileError::CodeGen { .. } => exitcode::COMPILERERROR,
            CompileError::Io { .. } => exitcode::IOERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("palloc out of physical memory")]
    OutOfPhysicalMemory,
    #[error("ealloc out of trace memory")]
    OutOfTraceMemory,
    #[error("throwing {throwing} exception in presence of {pending} exception")]
    MultipleException {
        throwing: Exception,
        pending: Exception,
    },
    #[error("{0}")]
    Symbolic(String),
    #[error("{0}")]
    Unsupported(String),
}

impl RuntimeError {
    pub fn exit_code(&self) -> u32 {
        match self {
            RuntimeError::OutOfPhysicalMemory => exitcode::OUTOFPHYSICALMEMORY,
            RuntimeError::OutOfTraceMemory => exitcode::OUTOFTRACEMEMORY,
            RuntimeError::MultipleException { .. } => exitcode::MULTIPLEEXCEPTIONERROR,
            RuntimeError::Symbolic(_) => exitcode::SYMBOLICEXECUTIONERROR,
            RuntimeError::Unsupported(_) => exitcode::BADARGUMENTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineKind {
    Mipster,
    Dipster,
    Ripster,
    Monster,
    Minster,
    Mobster,
    Hypster,
    Mixter(u32),
}

pub struct Emulator {
    pub machine: Machine,
    kind: MachineKind,
}

impl Emulator {
    // argument is the physical memory size in MiB, except for monster
    // where it is the fuzz factor and the memory is sized from the trace
    pub fn new(binary: Binary, kind: MachineKind, argument: u32, console: Console) -> Emulator {
        let megabytes = match kind {
            MachineKind::Monster => {
                bits::round_up(symbolic::MAX_TRACE_LENGTH * bits::WORD_SIZE, memory::MEGABYTE)
                    / memory::MEGABYTE
                    + 1
            }
            _ => argument,
        };

        let mut machine = Machine::new(binary, megabytes, console);

        match kind {
            MachineKind::Dipster => {
                machine.debug = true;
                machine.disassemble = true;
            }
            MachineKind::Ripster => {
                machine.debug = true;
                machine.record = true;
            }
            MachineKind::Monster => {
                machine.debug = true;
                machine.symbolic_mode = true;

                machine.symbolic = symbolic::SymbolicState::activate(argument);
            }
            _ => {}
        }

        Emulator { machine, kind }
    }

    pub fn run(&mut self, args: &[String]) -> Result<u32, RuntimeError> {
        let ctx = self.machine.current;

        self.machine.up_load_binary(ctx)?;

        // the binary name is the first guest argument
        let mut argv = vec![self.machine.binary.name.clone()];

        argv.extend_from_slice(args);

        self.machine.up_load_arguments(ctx, &argv)?;

        info!(
            "executing {} with {}MB physical memory",
            self.machine.binary.name,
            self.machine.phys.budget() / memory::MEGABYTE as u64
        );

        let exit_code = match self.kind {
            MachineKind::Mipster | MachineKind::Dipster | MachineKind::Ripster => {
                self.machine.mipster(ctx)
            }
            MachineKind::Monster => self.machine.monster(ctx),
            MachineKind::Minster => self.machine.minster(ctx),
            MachineKind::Mobster => self.machine.mobster(ctx),
            MachineKind::Hypster => self.machine.hypster(ctx),
            MachineKind::Mixter(mix) => self.machine.mixter(ctx, mix),
        }?;

        info!(
            "terminating {} with exit code {}",
            self.machine.binary.name, exit_code as i32
        );

        self.machine.print_profile();

        Ok(exit_code)
    }
}
