// The RISC-U machine: fetch-decode-execute over the current context, timer
// interrupts, exception delivery, and the per-personality dispatch (plain,
// recording, undoing, disassembling, symbolic, backtracking) that shares the
// single decode path.

use crate::binary::Binary;
use crate::bits::INSTRUCTION_SIZE;
use crate::instructions::{
    register_name, Instruction, REG_A0, REG_A7, REG_FP, REG_GP, REG_RA, REG_SP, REG_ZR,
};
use crate::kernel::{FdTable, SYSCALL_SWITCH};
use crate::memory::{
    is_valid_virtual_address, page_of_virtual_address, ContextArena, ContextId, PhysicalMemory,
};
use crate::replay::Replay;
use crate::symbolic::SymbolicState;
use crate::RuntimeError;
use log::{debug, info};
use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

// number of instructions from context switch to timer interrupt
// CAUTION: avoid interrupting any kernel activities, keep TIMESLICE large
pub const TIMESLICE: u32 = 10000000;

pub const TIMEROFF: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    None,
    PageFault,
    Syscall,
    Timer,
    InvalidAddress,
    DivisionByZero,
    UnknownInstruction,
    MaxTrace,
}

impl Exception {
    pub fn to_word(self) -> u32 {
        match self {
            Exception::None => 0,
            Exception::PageFault => 1,
            Exception::Syscall => 2,
            Exception::Timer => 3,
            Exception::InvalidAddress => 4,
            Exception::DivisionByZero => 5,
            Exception::UnknownInstruction => 6,
            Exception::MaxTrace => 7,
        }
    }

    pub fn from_word(word: u32) -> Exception {
        match word {
            1 => Exception::PageFault,
            2 => Exception::Syscall,
            3 => Exception::Timer,
            4 => Exception::InvalidAddress,
            5 => Exception::DivisionByZero,
            6 => Exception::UnknownInstruction,
            7 => Exception::MaxTrace,
            _ => Exception::None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Exception::None => "no exception",
            Exception::PageFault => "page fault",
            Exception::Syscall => "syscall",
            Exception::Timer => "timer interrupt",
            Exception::InvalidAddress => "invalid address",
            Exception::DivisionByZero => "division by zero",
            Exception::UnknownInstruction => "unknown instruction",
            Exception::MaxTrace => "trace length exceeded",
        };

        write!(f, "{}", text)
    }
}

// guest console output; tests capture it in a shared buffer
#[derive(Clone)]
pub enum Console {
    Stdout,
    Buffer(Rc<RefCell<Vec<u8>>>),
}

impl Console {
    pub fn buffer() -> (Console, Rc<RefCell<Vec<u8>>>) {
        let buffer = Rc::new(RefCell::new(Vec::new()));

        (Console::Buffer(Rc::clone(&buffer)), buffer)
    }

    pub fn write(&mut self, bytes: &[u8]) -> usize {
        match self {
            Console::Stdout => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();

                match lock.write(bytes) {
                    Ok(n) => {
                        let _ = lock.flush();
                        n
                    }
                    Err(_) => 0,
                }
            }
            Console::Buffer(buffer) => {
                buffer.borrow_mut().extend_from_slice(bytes);

                bytes.len()
            }
        }
    }
}

#[derive(Default)]
pub struct Profile {
    pub ic_lui: u64,
    pub ic_addi: u64,
    pub ic_add: u64,
    pub ic_sub: u64,
    pub ic_mul: u64,
    pub ic_divu: u64,
    pub ic_remu: u64,
    pub ic_sltu: u64,
    pub ic_lw: u64,
    pub ic_sw: u64,
    pub ic_beq: u64,
    pub ic_jal: u64,
    pub ic_jalr: u64,
    pub ic_ecall: u64,

    pub calls: u64,
    pub calls_per_procedure: Vec<u64>,

    pub iterations: u64,
    pub iterations_per_loop: Vec<u64>,

    pub loads_per_instruction: Vec<u64>,
    pub stores_per_instruction: Vec<u64>,
}

impl Profile {
    pub fn new(code_slots: usize) -> Profile {
        Profile {
            calls_per_procedure: vec![0; code_slots],
            iterations_per_loop: vec![0; code_slots],
            loads_per_instruction: vec![0; code_slots],
            stores_per_instruction: vec![0; code_slots],
            ..Profile::default()
        }
    }

    pub fn total_instructions(&self) -> u64 {
        self.ic_lui
            + self.ic_addi
            + self.ic_add
            + self.ic_sub
            + self.ic_mul
            + self.ic_divu
            + self.ic_remu
            + self.ic_sltu
            + self.ic_lw
            + self.ic_sw
            + self.ic_beq
            + self.ic_jal
            + self.ic_jalr
            + self.ic_ecall
    }
}

pub struct Machine {
    pub binary: Binary,

    pub phys: PhysicalMemory,
    pub contexts: ContextArena,
    pub current: ContextId,

    pub pc: u32,
    pub ir: u32,

    pub timer: u32,
    pub trap: bool,

    // personality flags over the shared decode path
    pub debug: bool,
    pub record: bool,
    pub undo: bool,
    pub redo: bool,
    pub disassemble: bool,
    pub symbolic_mode: bool,
    pub backtrack: bool,

    pub profile: Profile,
    pub replay: Replay,
    pub symbolic: SymbolicState,

    pub console: Console,
    pub files: FdTable,
}

impl Machine {
    pub fn new(binary: Binary, megabytes: u32, console: Console) -> Machine {
        let mut contexts = ContextArena::new();

        let current = contexts.create(None, 0);

        Machine {
            binary,
            phys: PhysicalMemory::new(megabytes),
            contexts,
            current,
            pc: 0,
            ir: 0,
            timer: TIMEROFF,
            trap: false,
            debug: false,
            record: false,
            undo: false,
            redo: false,
            disassemble: false,
            symbolic_mode: false,
            backtrack: false,
            profile: Profile::new((crate::binary::MAX_CODE_LENGTH / INSTRUCTION_SIZE) as usize),
            replay: Replay::new(),
            symbolic: SymbolicState::inactive(),
            console,
            files: FdTable::new(),
        }
    }

    pub fn reg(&self, reg: u32) -> u32 {
        self.contexts.get(self.current).regs[reg as usize]
    }

    pub fn set_reg(&mut self, reg: u32, value: u32) {
        // register zero is a hard zero on writes
        if reg != REG_ZR {
            self.contexts.get_mut(self.current).regs[reg as usize] = value;
        }
    }

    pub fn load_virtual(&self, ctx: ContextId, vaddr: u32) -> u32 {
        // assert: vaddr is valid and mapped
        let paddr = self.contexts.get(ctx).tlb(vaddr);

        self.phys.load(paddr)
    }

    pub fn store_virtual(&mut self, ctx: ContextId, vaddr: u32, data: u32) {
        // assert: vaddr is valid and mapped
        let paddr = self.contexts.get(ctx).tlb(vaddr);

        self.phys.store(paddr, data);
    }

    pub fn console_print(&mut self, text: &str) {
        self.console.write(text.as_bytes());
    }

    pub(crate) fn code_line_suffix(&self, address: u32) -> String {
        match self.binary.code_line(address) {
            Some(line) => format!("(~{})", line),
            None => String::new(),
        }
    }

    pub fn throw_exception(
        &mut self,
        exception: Exception,
        faulting_page: u32,
    ) -> Result<(), RuntimeError> {
        let context = self.contexts.get_mut(self.current);

        if context.exception != Exception::None && context.exception != exception {
            return Err(RuntimeError::MultipleException {
                throwing: exception,
                pending: context.exception,
            });
        }

        context.exception = exception;
        context.faulting_page = faulting_page;

        self.trap = true;

        debug!("context {} throws {} exception", self.current, exception);

        Ok(())
    }

    pub fn fetch(&mut self) -> Result<(), RuntimeError> {
        if !is_valid_virtual_address(self.pc) {
            return self.throw_exception(Exception::InvalidAddress, self.pc);
        }

        if !self.contexts.get(self.current).is_virtual_address_mapped(self.pc) {
            return self.throw_exception(Exception::PageFault, page_of_virtual_address(self.pc));
        }

        self.ir = self.load_virtual(self.current, self.pc);

        Ok(())
    }

    pub fn decode_execute(&mut self) -> Result<(), RuntimeError> {
        let instr = match Instruction::decode(self.ir) {
            Some(instr) => instr,
            None => {
                self.throw_exception(Exception::UnknownInstruction, 0)?;

                return Ok(());
            }
        };

        if !self.debug {
            return self.execute_instruction(instr).map(|_| ());
        }

        if self.record {
            self.record_instruction(instr);
            self.execute_instruction(instr).map(|_| ())
        } else if self.undo {
            self.undo_instruction(instr);
            Ok(())
        } else if self.disassemble {
            self.disassemble_instruction(instr)
        } else if self.symbolic_mode {
            self.symbolic_instruction(instr)
        } else if self.backtrack {
            self.backtrack_instruction(instr)
        } else {
            self.execute_instruction(instr).map(|_| ())
        }
    }

    pub fn interrupt(&mut self) -> Result<(), RuntimeError> {
        if self.timer != TIMEROFF {
            self.timer -= 1;

            if self.timer == 0 {
                if self.contexts.get(self.current).exception == Exception::None {
                    // only throw the timer exception if no other is pending
                    self.throw_exception(Exception::Timer, 0)?;
                } else {
                    // trigger the timer in the next interrupt cycle instead
                    self.timer = 1;
                }
            }
        }

        Ok(())
    }

    pub fn run_until_exception(&mut self) -> Result<ContextId, RuntimeError> {
        self.trap = false;

        while !self.trap {
            self.fetch()?;

            if !self.trap {
                self.decode_execute()?;
                self.interrupt()?;
            }
        }

        self.trap = false;

        Ok(self.current)
    }

    // plain execution semantics; loads and stores report the accessed
    // virtual address for the debugger
    fn execute_instruction(&mut self, instr: Instruction) -> Result<u32, RuntimeError> {
        match instr {
            Instruction::Lui { rd, imm } => self.do_lui(rd, imm).map(|_| 0),
            Instruction::Addi { rd, rs1, imm } => self.do_addi(rd, rs1, imm).map(|_| 0),
            Instruction::Add { rd, rs1, rs2 } => self.do_add(rd, rs1, rs2).map(|_| 0),
            Instruction::Sub { rd, rs1, rs2 } => self.do_sub(rd, rs1, rs2).map(|_| 0),
            Instruction::Mul { rd, rs1, rs2 } => self.do_mul(rd, rs1, rs2).map(|_| 0),
            Instruction::Divu { rd, rs1, rs2 } => self.do_divu(rd, rs1, rs2).map(|_| 0),
            Instruction::Remu { rd, rs1, rs2 } => self.do_remu(rd, rs1, rs2).map(|_| 0),
            Instruction::Sltu { rd, rs1, rs2 } => self.do_sltu(rd, rs1, rs2).map(|_| 0),
            Instruction::Lw { rd, rs1, imm } => self.do_lw(rd, rs1, imm),
            Instruction::Sw { rs1, imm, rs2 } => self.do_sw(rs1, imm, rs2),
            Instruction::Beq { rs1, rs2, imm } => self.do_beq(rs1, rs2, imm).map(|_| 0),
            Instruction::Jal { rd, imm } => self.do_jal(rd, imm).map(|_| 0),
            Instruction::Jalr { rd, rs1, imm } => self.do_jalr(rd, rs1, imm).map(|_| 0),
            Instruction::Ecall => self.do_ecall().map(|_| 0),
        }
    }

    fn do_lui(&mut self, rd: u32, imm: i32) -> Result<(), RuntimeError> {
        self.set_reg(rd, (imm as u32) << 12);

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_lui += 1;

        Ok(())
    }

    fn do_addi(&mut self, rd: u32, rs1: u32, imm: i32) -> Result<(), RuntimeError> {
        self.set_reg(rd, self.reg(rs1).wrapping_add(imm as u32));

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_addi += 1;

        Ok(())
    }

    fn do_add(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        self.set_reg(rd, self.reg(rs1).wrapping_add(self.reg(rs2)));

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_add += 1;

        Ok(())
    }

    fn do_sub(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        self.set_reg(rd, self.reg(rs1).wrapping_sub(self.reg(rs2)));

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_sub += 1;

        Ok(())
    }

    fn do_mul(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        // the upper 32 bits of the product are not accessible
        self.set_reg(rd, self.reg(rs1).wrapping_mul(self.reg(rs2)));

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_mul += 1;

        Ok(())
    }

    fn do_divu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if self.reg(rs2) != 0 {
            self.set_reg(rd, self.reg(rs1) / self.reg(rs2));

            self.pc += INSTRUCTION_SIZE;

            self.profile.ic_divu += 1;

            Ok(())
        } else {
            self.throw_exception(Exception::DivisionByZero, 0)
        }
    }

    fn do_remu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if self.reg(rs2) != 0 {
            self.set_reg(rd, self.reg(rs1) % self.reg(rs2));

            self.pc += INSTRUCTION_SIZE;

            self.profile.ic_remu += 1;

            Ok(())
        } else {
            self.throw_exception(Exception::DivisionByZero, 0)
        }
    }

    fn do_sltu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        let result = if self.reg(rs1) < self.reg(rs2) { 1 } else { 0 };

        self.set_reg(rd, result);

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_sltu += 1;

        Ok(())
    }

    fn do_lw(&mut self, rd: u32, rs1: u32, imm: i32) -> Result<u32, RuntimeError> {
        let vaddr = self.reg(rs1).wrapping_add(imm as u32);

        if is_valid_virtual_address(vaddr) {
            if self.contexts.get(self.current).is_virtual_address_mapped(vaddr) {
                self.set_reg(rd, self.load_virtual(self.current, vaddr));

                // the instruction address indexes the load profile
                let a = ((self.pc - self.binary.entry_point) / INSTRUCTION_SIZE) as usize;

                self.pc += INSTRUCTION_SIZE;

                self.profile.ic_lw += 1;
                self.profile.loads_per_instruction[a] += 1;
            } else {
                self.throw_exception(Exception::PageFault, page_of_virtual_address(vaddr))?;
            }
        } else {
            self.throw_exception(Exception::InvalidAddress, vaddr)?;
        }

        Ok(vaddr)
    }

    fn do_sw(&mut self, rs1: u32, imm: i32, rs2: u32) -> Result<u32, RuntimeError> {
        let vaddr = self.reg(rs1).wrapping_add(imm as u32);

        if is_valid_virtual_address(vaddr) {
            if self.contexts.get(self.current).is_virtual_address_mapped(vaddr) {
                self.store_virtual(self.current, vaddr, self.reg(rs2));

                // the instruction address indexes the store profile
                let a = ((self.pc - self.binary.entry_point) / INSTRUCTION_SIZE) as usize;

                self.pc += INSTRUCTION_SIZE;

                self.profile.ic_sw += 1;
                self.profile.stores_per_instruction[a] += 1;
            } else {
                self.throw_exception(Exception::PageFault, page_of_virtual_address(vaddr))?;
            }
        } else {
            self.throw_exception(Exception::InvalidAddress, vaddr)?;
        }

        Ok(vaddr)
    }

    fn do_beq(&mut self, rs1: u32, rs2: u32, imm: i32) -> Result<(), RuntimeError> {
        if self.reg(rs1) == self.reg(rs2) {
            self.pc = self.pc.wrapping_add(imm as u32);
        } else {
            self.pc += INSTRUCTION_SIZE;
        }

        self.profile.ic_beq += 1;

        Ok(())
    }

    fn do_jal(&mut self, rd: u32, imm: i32) -> Result<(), RuntimeError> {
        if rd != REG_ZR {
            // link first, then jump for procedure calls
            self.set_reg(rd, self.pc + INSTRUCTION_SIZE);

            self.pc = self.pc.wrapping_add(imm as u32);

            // the prologue address indexes the call profile
            let a = ((self.pc - self.binary.entry_point) / INSTRUCTION_SIZE) as usize;

            self.profile.calls += 1;
            self.profile.calls_per_procedure[a] += 1;
        } else if imm < 0 {
            // jump backwards for another loop iteration
            self.pc = self.pc.wrapping_add(imm as u32);

            let a = ((self.pc - self.binary.entry_point) / INSTRUCTION_SIZE) as usize;

            self.profile.iterations += 1;
            self.profile.iterations_per_loop[a] += 1;
        } else {
            // just jump forward
            self.pc = self.pc.wrapping_add(imm as u32);
        }

        self.profile.ic_jal += 1;

        Ok(())
    }

    fn do_jalr(&mut self, rd: u32, rs1: u32, imm: i32) -> Result<(), RuntimeError> {
        // prepare the jump with the LSB reset before linking, rd may be rs1
        let next_pc = self.reg(rs1).wrapping_add(imm as u32) & !1;

        self.set_reg(rd, self.pc + INSTRUCTION_SIZE);

        self.pc = next_pc;

        self.profile.ic_jalr += 1;

        Ok(())
    }

    fn do_ecall(&mut self) -> Result<(), RuntimeError> {
        self.profile.ic_ecall += 1;

        if self.redo {
            // on replay the recorded return value stands in for the call
            let value = self.replay.value();

            self.set_reg(REG_A0, value);

            self.pc += INSTRUCTION_SIZE;

            Ok(())
        } else if self.reg(REG_A7) == SYSCALL_SWITCH {
            if self.record {
                Err(RuntimeError::Unsupported(String::from(
                    "context switching during recording is unsupported",
                )))
            } else if self.symbolic_mode {
                Err(RuntimeError::Unsupported(String::from(
                    "context switching during symbolic execution is unsupported",
                )))
            } else {
                self.pc += INSTRUCTION_SIZE;

                self.implement_switch()
            }
        } else {
            // all system calls other than switch are handled by exception
            self.throw_exception(Exception::Syscall, 0)
        }
    }

    fn record_instruction(&mut self, instr: Instruction) {
        match instr {
            Instruction::Lui { rd, .. }
            | Instruction::Addi { rd, .. }
            | Instruction::Add { rd, .. }
            | Instruction::Sub { rd, .. }
            | Instruction::Mul { rd, .. }
            | Instruction::Divu { rd, .. }
            | Instruction::Remu { rd, .. }
            | Instruction::Sltu { rd, .. }
            | Instruction::Jal { rd, .. }
            | Instruction::Jalr { rd, .. } => {
                let value = self.reg(rd);
                let pc = self.pc;

                self.replay.record_state(pc, value);
            }
            Instruction::Lw { rd, rs1, imm } => {
                let vaddr = self.reg(rs1).wrapping_add(imm as u32);

                if is_valid_virtual_address(vaddr)
                    && self.contexts.get(self.current).is_virtual_address_mapped(vaddr)
                {
                    let value = self.reg(rd);
                    let pc = self.pc;

                    self.replay.record_state(pc, value);
                }
            }
            Instruction::Sw { rs1, imm, .. } => {
                let vaddr = self.reg(rs1).wrapping_add(imm as u32);

                if is_valid_virtual_address(vaddr)
                    && self.contexts.get(self.current).is_virtual_address_mapped(vaddr)
                {
                    let value = self.load_virtual(self.current, vaddr);
                    let pc = self.pc;

                    self.replay.record_state(pc, value);
                }
            }
            Instruction::Beq { .. } => {
                let pc = self.pc;

                self.replay.record_state(pc, 0);
            }
            Instruction::Ecall => {
                // TODO: record all side effects, not just the return value
                let value = self.reg(REG_A0);
                let pc = self.pc;

                self.replay.record_state(pc, value);
            }
        }
    }

    fn undo_instruction(&mut self, instr: Instruction) {
        match instr {
            Instruction::Lui { rd, .. }
            | Instruction::Addi { rd, .. }
            | Instruction::Add { rd, .. }
            | Instruction::Sub { rd, .. }
            | Instruction::Mul { rd, .. }
            | Instruction::Divu { rd, .. }
            | Instruction::Remu { rd, .. }
            | Instruction::Sltu { rd, .. }
            | Instruction::Lw { rd, .. }
            | Instruction::Jal { rd, .. }
            | Instruction::Jalr { rd, .. } => {
                let value = self.replay.value();

                self.set_reg(rd, value);
            }
            Instruction::Sw { rs1, imm, .. } => {
                let vaddr = self.reg(rs1).wrapping_add(imm as u32);
                let value = self.replay.value();

                self.store_virtual(self.current, vaddr, value);
            }
            Instruction::Ecall => {
                // keep the return value around for redoing the system call
                let a0 = self.reg(REG_A0);
                let value = self.replay.value();

                self.set_reg(REG_A0, value);
                self.replay.set_value(a0);
            }
            Instruction::Beq { .. } => {}
        }
    }

    fn symbolic_instruction(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        match instr {
            Instruction::Lui { rd, imm } => {
                self.do_lui(rd, imm)?;
                self.constrain_lui(rd, imm);
                Ok(())
            }
            Instruction::Addi { rd, rs1, imm } => {
                self.do_addi(rd, rs1, imm)?;
                self.constrain_addi(rd, rs1, imm)
            }
            Instruction::Add { rd, rs1, rs2 } => {
                self.do_add(rd, rs1, rs2)?;
                self.constrain_add(rd, rs1, rs2)
            }
            Instruction::Sub { rd, rs1, rs2 } => {
                self.do_sub(rd, rs1, rs2)?;
                self.constrain_sub(rd, rs1, rs2)
            }
            Instruction::Mul { rd, rs1, rs2 } => {
                self.do_mul(rd, rs1, rs2)?;
                self.constrain_mul(rd, rs1, rs2)
            }
            Instruction::Divu { rd, rs1, rs2 } => {
                self.do_divu(rd, rs1, rs2)?;
                self.constrain_divu(rd, rs1, rs2)
            }
            Instruction::Remu { rd, rs1, rs2 } => {
                self.do_remu(rd, rs1, rs2)?;
                self.constrain_remu(rd, rs1, rs2)
            }
            Instruction::Sltu { rd, rs1, rs2 } => self.constrain_sltu(rd, rs1, rs2),
            Instruction::Lw { rd, rs1, imm } => self.constrain_lw(rd, rs1, imm).map(|_| ()),
            Instruction::Sw { rs1, imm, rs2 } => self.constrain_sw(rs1, imm, rs2).map(|_| ()),
            Instruction::Beq { rs1, rs2, imm } => self.do_beq(rs1, rs2, imm),
            Instruction::Jal { rd, imm } => {
                self.do_jal(rd, imm)?;
                self.constrain_jal_jalr(rd);
                Ok(())
            }
            Instruction::Jalr { rd, rs1, imm } => {
                self.do_jalr(rd, rs1, imm)?;
                self.constrain_jal_jalr(rd);
                Ok(())
            }
            Instruction::Ecall => self.do_ecall(),
        }
    }

    fn backtrack_instruction(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        match instr {
            Instruction::Sltu { .. } => self.backtrack_sltu(),
            Instruction::Sw { .. } => self.backtrack_sw(),
            Instruction::Ecall => self.backtrack_ecall(),
            _ => Ok(()),
        }
    }

    // one line of machine-state-annotated disassembly, executing along the
    // way when the personality interprets while disassembling
    fn disassemble_instruction(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let mut line = format!(
            "{}: $pc=0x{:x}{}: {}",
            self.binary.name,
            self.pc,
            self.code_line_suffix(self.pc - self.binary.entry_point),
            instr.as_asm(self.pc)
        );

        match instr {
            Instruction::Lui { rd, imm } => {
                line.push_str(": |- ");
                line.push_str(&self.format_register_hexadecimal(rd));

                self.console_print(&line);

                self.do_lui(rd, imm)?;

                let after = format!(" -> {}\n", self.format_register_hexadecimal(rd));
                self.console_print(&after);
            }
            Instruction::Addi { rd, rs1, imm } => {
                line.push_str(&format!(
                    ": {} |- {}",
                    self.format_register_value(rs1),
                    self.format_register_value(rd)
                ));

                self.console_print(&line);

                self.do_addi(rd, rs1, imm)?;

                let after = format!(" -> {}\n", self.format_register_value(rd));
                self.console_print(&after);
            }
            Instruction::Add { rd, rs1, rs2 }
            | Instruction::Sub { rd, rs1, rs2 }
            | Instruction::Mul { rd, rs1, rs2 }
            | Instruction::Divu { rd, rs1, rs2 }
            | Instruction::Remu { rd, rs1, rs2 }
            | Instruction::Sltu { rd, rs1, rs2 } => {
                line.push_str(&format!(
                    ": {},{} |- {}",
                    self.format_register_value(rs1),
                    self.format_register_value(rs2),
                    self.format_register_value(rd)
                ));

                self.console_print(&line);

                self.execute_instruction(instr)?;

                let after = format!(" -> {}\n", self.format_register_value(rd));
                self.console_print(&after);
            }
            Instruction::Lw { rd, rs1, imm } => {
                let vaddr = self.reg(rs1).wrapping_add(imm as u32);

                line.push_str(&format!(": {}", self.format_register_hexadecimal(rs1)));

                if self.is_mapped_data(vaddr) {
                    line.push_str(&format!(
                        ",mem[0x{:x}]={} |- {}",
                        vaddr,
                        self.load_virtual(self.current, vaddr),
                        self.format_register_value(rd)
                    ));
                } else {
                    line.push_str(" |-");
                }

                self.console_print(&line);

                let vaddr = self.do_lw(rd, rs1, imm)?;

                if self.is_mapped_data(vaddr) {
                    let after = format!(
                        " -> {}=mem[0x{:x}]",
                        self.format_register_value(rd),
                        vaddr
                    );
                    self.console_print(&after);
                }

                self.console_print("\n");
            }
            Instruction::Sw { rs1, imm, rs2 } => {
                let vaddr = self.reg(rs1).wrapping_add(imm as u32);

                line.push_str(&format!(": {}", self.format_register_hexadecimal(rs1)));

                if self.is_mapped_data(vaddr) {
                    line.push_str(&format!(
                        ",{} |- mem[0x{:x}]={}",
                        self.format_register_value(rs2),
                        vaddr,
                        self.load_virtual(self.current, vaddr)
                    ));
                } else {
                    line.push_str(" |-");
                }

                self.console_print(&line);

                let vaddr = self.do_sw(rs1, imm, rs2)?;

                if self.is_mapped_data(vaddr) {
                    let after = format!(
                        " -> mem[0x{:x}]={}",
                        vaddr,
                        self.format_register_value(rs2)
                    );
                    self.console_print(&after);
                }

                self.console_print("\n");
            }
            Instruction::Beq { rs1, rs2, imm } => {
                line.push_str(&format!(
                    ": {},{} |- $pc=0x{:x}",
                    self.format_register_value(rs1),
                    self.format_register_value(rs2),
                    self.pc
                ));

                self.console_print(&line);

                self.do_beq(rs1, rs2, imm)?;

                let after = format!(" -> $pc=0x{:x}\n", self.pc);
                self.console_print(&after);
            }
            Instruction::Jal { rd, imm } => {
                line.push_str(": |- ");

                if rd != REG_ZR {
                    line.push_str(&format!("{},", self.format_register_hexadecimal(rd)));
                }

                line.push_str(&format!("$pc=0x{:x}", self.pc));

                self.console_print(&line);

                self.do_jal(rd, imm)?;

                let mut after = format!(" -> $pc=0x{:x}", self.pc);

                if rd != REG_ZR {
                    after.push_str(&format!(",{}", self.format_register_hexadecimal(rd)));
                }

                after.push('\n');
                self.console_print(&after);
            }
            Instruction::Jalr { rd, rs1, imm } => {
                line.push_str(&format!(": {} |- ", self.format_register_hexadecimal(rs1)));

                if rd != REG_ZR {
                    line.push_str(&format!("{},", self.format_register_hexadecimal(rd)));
                }

                line.push_str(&format!("$pc=0x{:x}", self.pc));

                self.console_print(&line);

                self.do_jalr(rd, rs1, imm)?;

                let mut after = format!(" -> $pc=0x{:x}", self.pc);

                if rd != REG_ZR {
                    after.push_str(&format!(",{}", self.format_register_hexadecimal(rd)));
                }

                after.push('\n');
                self.console_print(&after);
            }
            Instruction::Ecall => {
                self.console_print(&line);
                self.console_print("\n");

                self.do_ecall()?;
            }
        }

        Ok(())
    }

    fn is_mapped_data(&self, vaddr: u32) -> bool {
        is_valid_virtual_address(vaddr)
            && self.contexts.get(self.current).is_virtual_address_mapped(vaddr)
    }

    fn is_system_register(&self, reg: u32) -> bool {
        reg == REG_GP || reg == REG_FP || reg == REG_RA || reg == REG_SP
    }

    pub fn format_register_hexadecimal(&self, reg: u32) -> String {
        format!("{}=0x{:x}", register_name(reg), self.reg(reg))
    }

    pub fn format_register_octal(&self, reg: u32) -> String {
        format!("{}=0o{:o}", register_name(reg), self.reg(reg))
    }

    pub fn format_register_value(&self, reg: u32) -> String {
        if self.is_system_register(reg) {
            self.format_register_hexadecimal(reg)
        } else {
            format!("{}={}({:#x})", register_name(reg), self.reg(reg), self.reg(reg))
        }
    }

    pub fn print_profile(&self) {
        let total = self.profile.total_instructions();

        info!(
            "summary: {} executed instructions and {}KB mapped memory",
            total,
            self.phys.used() / 1024
        );

        if total == 0 {
            return;
        }

        info!(
            "init:    lui {} addi {}",
            self.profile.ic_lui, self.profile.ic_addi
        );
        info!(
            "memory:  lw {} sw {}",
            self.profile.ic_lw, self.profile.ic_sw
        );
        info!(
            "compute: add {} sub {} mul {} divu {} remu {}",
            self.profile.ic_add,
            self.profile.ic_sub,
            self.profile.ic_mul,
            self.profile.ic_divu,
            self.profile.ic_remu
        );
        info!(
            "control: sltu {} beq {} jal {} jalr {} ecall {}",
            self.profile.ic_sltu,
            self.profile.ic_beq,
            self.profile.ic_jal,
            self.profile.ic_jalr,
            self.profile.ic_ecall
        );

        self.print_per_instruction_profile("calls:  ", self.profile.calls, &self.profile.calls_per_procedure);
        self.print_per_instruction_profile("loops:  ", self.profile.iterations, &self.profile.iterations_per_loop);
        self.print_per_instruction_profile("loads:  ", self.profile.ic_lw, &self.profile.loads_per_instruction);
        self.print_per_instruction_profile("stores: ", self.profile.ic_sw, &self.profile.stores_per_instruction);
    }

    // the three hottest sites of a counter family, most frequent first
    fn print_per_instruction_profile(&self, message: &str, total: u64, counters: &[u64]) {
        let mut hottest: Vec<(usize, u64)> = counters
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, count)| *count > 0)
            .collect();

        hottest.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut line = format!("{}{}", message, total);

        for (slot, count) in hottest.into_iter().take(3) {
            let address = slot as u32 * INSTRUCTION_SIZE;

            line.push_str(&format!(
                ",{}@0x{:x}{}",
                count,
                address,
                self.code_line_suffix(address)
            ));
        }

        info!("{}", line);
    }
}
