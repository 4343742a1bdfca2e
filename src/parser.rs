// Single-pass recursive-descent parser that emits RISC-U while parsing.
// Forward references are threaded through the immediate fields of the
// emitted beq/jal words as fixup chains; the 20-instruction program entry
// stub is rewritten once the whole program is known.

use crate::binary::{string_to_words, Binary, ELF_ENTRY_POINT};
use crate::bits::{
    get_bits, is_signed_integer, round_up, sign_extend, INSTRUCTION_SIZE, REGISTER_SIZE, WORD_SIZE,
};
use crate::instructions::{
    encode_b_format, encode_i_format, encode_j_format, encode_r_format, encode_s_format,
    encode_u_format, get_funct3, get_immediate_j_format, get_opcode, get_rd, get_rs1, get_rs2,
    EncodeError, F3_ADD, F3_ADDI, F3_BEQ, F3_DIVU, F3_ECALL, F3_JALR, F3_LW, F3_MUL, F3_REMU,
    F3_SLTU, F3_SUB, F3_SW, F7_ADD, F7_DIVU, F7_MUL, F7_REMU, F7_SLTU, F7_SUB, NUMBER_OF_TEMPORARIES,
    OP_BRANCH, OP_IMM, OP_JAL, OP_JALR, OP_LUI, OP_LW, OP_OP, OP_SW, OP_SYSTEM, REG_A0, REG_A1,
    REG_A2, REG_A7, REG_FP, REG_GP, REG_RA, REG_SP, REG_T2, REG_T3, REG_TP, REG_S11, REG_ZR,
};
use crate::kernel::{
    SYSCALL_BRK, SYSCALL_EXIT, SYSCALL_OPEN, SYSCALL_READ, SYSCALL_SWITCH, SYSCALL_WRITE,
};
use crate::scanner::{Scanner, Symbol};
use crate::symbols::{Class, EntryId, SymbolTables, Table, Type};
use crate::{CompileError, TOOL_NAME};
use log::info;
use std::path::Path;

#[derive(Default)]
struct EmitCounters {
    lui: u32,
    addi: u32,
    add: u32,
    sub: u32,
    mul: u32,
    divu: u32,
    remu: u32,
    sltu: u32,
    lw: u32,
    sw: u32,
    beq: u32,
    jal: u32,
    jalr: u32,
    ecall: u32,
}

impl EmitCounters {
    fn total(&self) -> u32 {
        self.lui
            + self.addi
            + self.add
            + self.sub
            + self.mul
            + self.divu
            + self.remu
            + self.sltu
            + self.lw
            + self.sw
            + self.beq
            + self.jal
            + self.jalr
            + self.ecall
    }
}

pub struct Compiler {
    scan: Scanner,
    syms: SymbolTables,
    bin: Binary,

    allocated_temporaries: u32,

    // bytes reserved for global variables, big integers and strings
    allocated_memory: u32,

    // head of the fixup chain for return statements
    return_branches: u32,

    // return type of the procedure being compiled
    return_type: Type,

    counters: EmitCounters,

    calls: u32,
    assignments: u32,
    whiles: u32,
    ifs: u32,
    returns: u32,
}

pub fn compile<P: AsRef<Path>>(sources: &[P]) -> Result<Binary, CompileError> {
    let mut compiler = Compiler::new()?;

    for source in sources {
        compiler.compile_source(source.as_ref())?;
    }

    if sources.is_empty() {
        info!("nothing to compile, only library generated");
    }

    compiler.finish()
}

impl Compiler {
    fn new() -> Result<Compiler, CompileError> {
        let mut compiler = Compiler {
            scan: Scanner::from_bytes(String::from("library"), Vec::new()),
            syms: SymbolTables::new(),
            bin: Binary::new(),
            allocated_temporaries: 0,
            allocated_memory: 0,
            return_branches: 0,
            return_type: Type::Uint32,
            counters: EmitCounters::default(),
            calls: 0,
            assignments: 0,
            whiles: 0,
            ifs: 0,
            returns: 0,
        };

        compiler.emit_program_entry()?;

        // emit the system call wrappers, the exit wrapper must be first
        // since the entry stub falls through into it
        compiler.emit_exit()?;
        compiler.emit_read()?;
        compiler.emit_write()?;
        compiler.emit_open()?;
        compiler.emit_malloc()?;
        compiler.emit_switch()?;

        // implicitly declare the main procedure
        compiler
            .syms
            .create_entry(Table::Global, "main", 0, Class::Procedure, Type::Uint32, 0, 0);

        Ok(compiler)
    }

    fn compile_source(&mut self, source: &Path) -> Result<(), CompileError> {
        self.scan = Scanner::from_file(source)?;

        info!("compiling {}", self.scan.file);

        self.scan.next_symbol()?;

        self.compile_cstar()?;

        info!(
            "{} characters read in {} lines and {} comments",
            self.scan.read_characters, self.scan.line, self.scan.comments
        );
        info!(
            "with {} characters in {} actual symbols",
            self.scan.read_characters - self.scan.ignored_characters,
            self.scan.scanned_symbols
        );
        info!(
            "{} global variables, {} procedures, {} string literals",
            self.syms.global_variables, self.syms.procedures, self.syms.strings
        );
        info!(
            "{} calls, {} assignments, {} while, {} if, {} return",
            self.calls, self.assignments, self.whiles, self.ifs, self.returns
        );

        Ok(())
    }

    fn finish(mut self) -> Result<Binary, CompileError> {
        self.emit_bootstrapping()?;

        self.emit_data_segment()?;

        if self.syms.searches > 0 {
            info!(
                "symbol table search time was {} iterations on average and {} in total",
                self.syms.search_time / self.syms.searches,
                self.syms.search_time
            );
        }

        info!(
            "{} bytes generated with {} instructions and {} bytes of data",
            self.bin.binary_length,
            self.bin.code_length / INSTRUCTION_SIZE,
            self.bin.binary_length - self.bin.code_length
        );
        info!(
            "init:    lui {} addi {}",
            self.counters.lui, self.counters.addi
        );
        info!("memory:  lw {} sw {}", self.counters.lw, self.counters.sw);
        info!(
            "compute: add {} sub {} mul {} divu {} remu {}",
            self.counters.add,
            self.counters.sub,
            self.counters.mul,
            self.counters.divu,
            self.counters.remu
        );
        info!(
            "control: sltu {} beq {} jal {} jalr {} ecall {} of {} instructions",
            self.counters.sltu,
            self.counters.beq,
            self.counters.jal,
            self.counters.jalr,
            self.counters.ecall,
            self.counters.total()
        );

        Ok(self.bin)
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    fn parser_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Parser {
            file: self.scan.file.clone(),
            line: self.scan.line,
            message: message.into(),
        }
    }

    fn compiler_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::CodeGen {
            message: format!(
                "syntax error in {} in line {}: {}",
                self.scan.file,
                self.scan.line,
                message.into()
            ),
        }
    }

    fn encode_error(&self, error: EncodeError) -> CompileError {
        CompileError::CodeGen {
            message: format!(
                "encoding error in {} in line {}: {}",
                self.scan.file, self.scan.line, error
            ),
        }
    }

    fn syntax_error_symbol(&self, expected: Symbol) {
        eprintln!(
            "{}: syntax error in {} in line {}: \"{}\" expected but \"{}\" found",
            TOOL_NAME, self.scan.file, self.scan.line, expected, self.scan.sym
        );
    }

    fn syntax_error_unexpected(&self) {
        eprintln!(
            "{}: syntax error in {} in line {}: unexpected symbol \"{}\" found",
            TOOL_NAME, self.scan.file, self.scan.line, self.scan.sym
        );
    }

    fn type_warning(&self, expected: Type, found: Type) {
        eprintln!(
            "{}: warning in {} in line {}: type mismatch, {} expected but {} found",
            TOOL_NAME, self.scan.file, self.scan.line, expected, found
        );
    }

    // ------------------------------------------------------------------
    // temporary registers
    // ------------------------------------------------------------------

    fn talloc(&mut self) -> Result<(), CompileError> {
        // temporaries are REG_T0 to REG_T6
        if self.allocated_temporaries < NUMBER_OF_TEMPORARIES {
            self.allocated_temporaries += 1;

            Ok(())
        } else {
            Err(self.compiler_error("out of registers"))
        }
    }

    fn current_temporary(&self) -> u32 {
        // assert: allocated_temporaries > 0
        if self.allocated_temporaries < 4 {
            REG_TP + self.allocated_temporaries
        } else {
            REG_S11 + self.allocated_temporaries - 3
        }
    }

    fn previous_temporary(&self) -> u32 {
        // assert: allocated_temporaries > 1
        if self.allocated_temporaries == 4 {
            REG_T2
        } else {
            self.current_temporary() - 1
        }
    }

    fn next_temporary(&self) -> Result<u32, CompileError> {
        if self.allocated_temporaries < NUMBER_OF_TEMPORARIES {
            if self.allocated_temporaries == 3 {
                Ok(REG_T3)
            } else {
                Ok(self.current_temporary() + 1)
            }
        } else {
            Err(self.compiler_error("out of registers"))
        }
    }

    fn tfree(&mut self, number_of_temporaries: u32) {
        // assert: allocated_temporaries >= number_of_temporaries
        self.allocated_temporaries -= number_of_temporaries;
    }

    fn save_temporaries(&mut self) -> Result<(), CompileError> {
        while self.allocated_temporaries > 0 {
            // push the temporary onto the stack
            self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;
            self.emit_sw(REG_SP, 0, self.current_temporary())?;

            self.tfree(1);
        }

        Ok(())
    }

    fn restore_temporaries(&mut self, number_of_temporaries: u32) -> Result<(), CompileError> {
        while self.allocated_temporaries < number_of_temporaries {
            self.talloc()?;

            // restore the temporary from the stack
            self.emit_lw(self.current_temporary(), REG_SP, 0)?;
            self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // code emission
    // ------------------------------------------------------------------

    fn emit_instruction(&mut self, instruction: u32) -> Result<(), CompileError> {
        self.bin.store_instruction(self.bin.binary_length, instruction)?;

        self.bin.note_code_line(self.bin.binary_length, self.scan.line);

        self.bin.binary_length += INSTRUCTION_SIZE;

        Ok(())
    }

    fn emit_nop(&mut self) -> Result<(), CompileError> {
        let word = encode_i_format(0, REG_ZR, F3_ADDI, REG_ZR, OP_IMM)
            .map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.addi += 1;

        Ok(())
    }

    fn emit_lui(&mut self, rd: u32, immediate: i32) -> Result<(), CompileError> {
        let word = encode_u_format(immediate, rd, OP_LUI).map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.lui += 1;

        Ok(())
    }

    fn emit_addi(&mut self, rd: u32, rs1: u32, immediate: i32) -> Result<(), CompileError> {
        let word = encode_i_format(immediate, rs1, F3_ADDI, rd, OP_IMM)
            .map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.addi += 1;

        Ok(())
    }

    fn emit_add(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_ADD, rs2, rs1, F3_ADD, rd, OP_OP))?;

        self.counters.add += 1;

        Ok(())
    }

    fn emit_sub(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_SUB, rs2, rs1, F3_SUB, rd, OP_OP))?;

        self.counters.sub += 1;

        Ok(())
    }

    fn emit_mul(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_MUL, rs2, rs1, F3_MUL, rd, OP_OP))?;

        self.counters.mul += 1;

        Ok(())
    }

    fn emit_divu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_DIVU, rs2, rs1, F3_DIVU, rd, OP_OP))?;

        self.counters.divu += 1;

        Ok(())
    }

    fn emit_remu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_REMU, rs2, rs1, F3_REMU, rd, OP_OP))?;

        self.counters.remu += 1;

        Ok(())
    }

    fn emit_sltu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), CompileError> {
        self.emit_instruction(encode_r_format(F7_SLTU, rs2, rs1, F3_SLTU, rd, OP_OP))?;

        self.counters.sltu += 1;

        Ok(())
    }

    fn emit_lw(&mut self, rd: u32, rs1: u32, immediate: i32) -> Result<(), CompileError> {
        let word =
            encode_i_format(immediate, rs1, F3_LW, rd, OP_LW).map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.lw += 1;

        Ok(())
    }

    fn emit_sw(&mut self, rs1: u32, immediate: i32, rs2: u32) -> Result<(), CompileError> {
        let word =
            encode_s_format(immediate, rs2, rs1, F3_SW, OP_SW).map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.sw += 1;

        Ok(())
    }

    fn emit_beq(&mut self, rs1: u32, rs2: u32, immediate: i32) -> Result<(), CompileError> {
        let word = encode_b_format(immediate, rs2, rs1, F3_BEQ, OP_BRANCH)
            .map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.beq += 1;

        Ok(())
    }

    fn emit_jal(&mut self, rd: u32, immediate: i32) -> Result<(), CompileError> {
        let word = encode_j_format(immediate, rd, OP_JAL).map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.jal += 1;

        Ok(())
    }

    fn emit_jalr(&mut self, rd: u32, rs1: u32, immediate: i32) -> Result<(), CompileError> {
        let word = encode_i_format(immediate, rs1, F3_JALR, rd, OP_JALR)
            .map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.jalr += 1;

        Ok(())
    }

    fn emit_ecall(&mut self) -> Result<(), CompileError> {
        let word = encode_i_format(0, REG_ZR, F3_ECALL, REG_ZR, OP_SYSTEM)
            .map_err(|e| self.encode_error(e))?;

        self.emit_instruction(word)?;

        self.counters.ecall += 1;

        Ok(())
    }

    // ------------------------------------------------------------------
    // fixup chains
    // ------------------------------------------------------------------

    fn fixup_relative_b_format(&mut self, from_address: u32) -> Result<(), CompileError> {
        let instruction = self.bin.load_instruction(from_address);

        let word = encode_b_format(
            (self.bin.binary_length - from_address) as i32,
            get_rs2(instruction),
            get_rs1(instruction),
            get_funct3(instruction),
            get_opcode(instruction),
        )
        .map_err(|e| self.encode_error(e))?;

        self.bin.store_instruction(from_address, word)
    }

    fn fixup_relative_j_format(
        &mut self,
        from_address: u32,
        to_address: u32,
    ) -> Result<(), CompileError> {
        let instruction = self.bin.load_instruction(from_address);

        let word = encode_j_format(
            to_address.wrapping_sub(from_address) as i32,
            get_rd(instruction),
            get_opcode(instruction),
        )
        .map_err(|e| self.encode_error(e))?;

        self.bin.store_instruction(from_address, word)
    }

    // resolve a chain of jal words whose immediates link to the previous
    // chain member by absolute address, 0 ends the chain
    fn fixlink_relative(&mut self, mut from_address: u32, to_address: u32) -> Result<(), CompileError> {
        while from_address != 0 {
            let previous_address =
                get_immediate_j_format(self.bin.load_instruction(from_address)) as u32;

            self.fixup_relative_j_format(from_address, to_address)?;

            from_address = previous_address;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // loading values
    // ------------------------------------------------------------------

    fn get_variable_or_big_int(
        &mut self,
        name: &str,
        class: Class,
    ) -> Result<EntryId, CompileError> {
        if class == Class::BigInt {
            return Ok(self.syms.search_global(name, class).expect("big integers are created on first use"));
        }

        match self.syms.scoped_entry(name, class) {
            Some(entry) => Ok(entry),
            None => Err(self.parser_error(format!("{} undeclared", name))),
        }
    }

    fn load_upper_base_address(&mut self, entry: EntryId) -> Result<(), CompileError> {
        // assert: n = allocated_temporaries

        let address = self.syms.entry(entry).address;
        let scope = self.syms.entry(entry).scope;

        let lower = get_bits(address, 0, 12);
        let mut upper = get_bits(address, 12, 20);

        if lower >= 1 << 11 {
            // add 1 which is effectively 2^12 to cancel the sign extension
            // of the lower half
            upper += 1;
        }

        self.talloc()?;

        // upper part of the base address relative to the global or frame pointer
        self.emit_lui(self.current_temporary(), sign_extend(upper, 20) as i32)?;
        self.emit_add(self.current_temporary(), scope, self.current_temporary())?;

        // assert: allocated_temporaries == n + 1

        Ok(())
    }

    fn load_variable_or_big_int(
        &mut self,
        name: &str,
        class: Class,
    ) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        let entry = self.get_variable_or_big_int(name, class)?;

        let offset = self.syms.entry(entry).address;
        let scope = self.syms.entry(entry).scope;
        let typ = self.syms.entry(entry).typ;

        if is_signed_integer(offset, 12) {
            self.talloc()?;

            self.emit_lw(self.current_temporary(), scope, offset as i32)?;
        } else {
            self.load_upper_base_address(entry)?;

            self.emit_lw(
                self.current_temporary(),
                self.current_temporary(),
                sign_extend(get_bits(offset, 0, 12), 12) as i32,
            )?;
        }

        // assert: allocated_temporaries == n + 1

        Ok(typ)
    }

    fn load_integer(&mut self, value: u32) -> Result<(), CompileError> {
        // assert: n = allocated_temporaries

        if is_signed_integer(value, 12) {
            // integers in the addi range are loaded with one instruction
            self.talloc()?;

            self.emit_addi(self.current_temporary(), REG_ZR, value as i32)?;
        } else if is_signed_integer(value, 32) {
            // wider integers take one lui and one addi plus an additional
            // sub to cancel sign extension if necessary
            let lower = get_bits(value, 0, 12);
            let mut upper = get_bits(value, 12, 20);

            self.talloc()?;

            if lower >= 1 << 11 {
                // add 1 which is effectively 2^12 to cancel the sign
                // extension of the lower half
                upper += 1;

                // assert: 0 < upper <= 2^(32-12)
                self.emit_lui(self.current_temporary(), sign_extend(upper, 20) as i32)?;

                if upper == 1 << 19 {
                    // upper overflowed, cancel sign extension
                    self.emit_sub(self.current_temporary(), REG_ZR, self.current_temporary())?;
                }
            } else {
                // assert: 0 < upper < 2^(32-12)
                self.emit_lui(self.current_temporary(), sign_extend(upper, 20) as i32)?;
            }

            self.emit_addi(
                self.current_temporary(),
                self.current_temporary(),
                sign_extend(lower, 12) as i32,
            )?;
        } else {
            // larger integers are stored as big integers in the data segment
            let name = self.scan.integer.clone();

            if self.syms.search_global(&name, Class::BigInt).is_none() {
                self.allocated_memory += REGISTER_SIZE;

                let address = self.allocated_memory.wrapping_neg();

                self.syms.create_entry(
                    Table::Global,
                    &name,
                    self.scan.line,
                    Class::BigInt,
                    Type::Uint32,
                    value,
                    address,
                );
            }

            self.load_variable_or_big_int(&name, Class::BigInt)?;
        }

        // assert: allocated_temporaries == n + 1

        Ok(())
    }

    fn load_string(&mut self) -> Result<(), CompileError> {
        // assert: n = allocated_temporaries

        let string = self.scan.string.clone();

        let length = string.len() as u32 + 1;

        self.allocated_memory += round_up(length, REGISTER_SIZE);

        let address = self.allocated_memory.wrapping_neg();

        self.syms.create_entry(
            Table::Global,
            &string,
            self.scan.line,
            Class::Str,
            Type::Uint32Ptr,
            0,
            address,
        );

        self.load_integer(address)?;

        self.emit_add(self.current_temporary(), REG_GP, self.current_temporary())?;

        // assert: allocated_temporaries == n + 1

        Ok(())
    }

    // ------------------------------------------------------------------
    // procedure calls
    // ------------------------------------------------------------------

    fn help_call_codegen(
        &mut self,
        entry: Option<EntryId>,
        procedure: &str,
    ) -> Result<Type, CompileError> {
        match entry {
            None => {
                // procedure never called nor declared nor defined; the
                // default return type is uint32_t
                let address = self.bin.binary_length;

                self.syms.create_entry(
                    Table::Global,
                    procedure,
                    self.scan.line,
                    Class::Procedure,
                    Type::Uint32,
                    0,
                    address,
                );

                self.emit_jal(REG_RA, 0)?;

                Ok(Type::Uint32)
            }
            Some(entry) => {
                let typ = self.syms.entry(entry).typ;
                let address = self.syms.entry(entry).address;

                if address == 0 {
                    // procedure declared but never called nor defined
                    let here = self.bin.binary_length;

                    self.syms.entry_mut(entry).address = here;

                    self.emit_jal(REG_RA, 0)?;
                } else if get_opcode(self.bin.load_instruction(address)) == OP_JAL {
                    // procedure called and possibly declared but not defined;
                    // the fixup chain links by absolute address
                    self.emit_jal(REG_RA, address as i32)?;

                    let here = self.bin.binary_length - INSTRUCTION_SIZE;

                    self.syms.entry_mut(entry).address = here;
                } else {
                    // procedure defined, use the relative address
                    self.emit_jal(REG_RA, address.wrapping_sub(self.bin.binary_length) as i32)?;
                }

                Ok(typ)
            }
        }
    }

    fn help_procedure_prologue(
        &mut self,
        number_of_local_variable_bytes: u32,
    ) -> Result<(), CompileError> {
        // allocate memory for the return address
        self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;

        // save the return address
        self.emit_sw(REG_SP, 0, REG_RA)?;

        // allocate memory for the caller's frame pointer
        self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;

        // save the caller's frame pointer
        self.emit_sw(REG_SP, 0, REG_FP)?;

        // set the callee's frame pointer
        self.emit_addi(REG_FP, REG_SP, 0)?;

        // allocate memory for the callee's local variables
        if number_of_local_variable_bytes > 0 {
            if is_signed_integer(number_of_local_variable_bytes.wrapping_neg(), 12) {
                self.emit_addi(REG_SP, REG_SP, -(number_of_local_variable_bytes as i32))?;
            } else {
                self.load_integer(number_of_local_variable_bytes.wrapping_neg())?;

                self.emit_add(REG_SP, REG_SP, self.current_temporary())?;

                self.tfree(1);
            }
        }

        Ok(())
    }

    fn help_procedure_epilogue(
        &mut self,
        number_of_parameter_bytes: u32,
    ) -> Result<(), CompileError> {
        // deallocate memory for the callee's frame pointer and local variables
        self.emit_addi(REG_SP, REG_FP, 0)?;

        // restore the caller's frame pointer
        self.emit_lw(REG_FP, REG_SP, 0)?;

        // deallocate memory for the caller's frame pointer
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        // restore the return address
        self.emit_lw(REG_RA, REG_SP, 0)?;

        // deallocate memory for the return address and the parameters
        self.emit_addi(
            REG_SP,
            REG_SP,
            (REGISTER_SIZE + number_of_parameter_bytes) as i32,
        )?;

        // return
        self.emit_jalr(REG_ZR, REG_RA, 0)
    }

    fn compile_call(&mut self, procedure: &str) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        let entry = self.syms.scoped_entry(procedure, Class::Procedure);

        let number_of_temporaries = self.allocated_temporaries;

        self.save_temporaries()?;

        // assert: allocated_temporaries == 0

        let typ;

        if self.is_expression() {
            self.compile_expression()?;

            // TODO: check if the types and number of parameters are correct

            // push the first parameter onto the stack
            self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;
            self.emit_sw(REG_SP, 0, self.current_temporary())?;

            self.tfree(1);

            while self.scan.sym == Symbol::Comma {
                self.scan.next_symbol()?;

                self.compile_expression()?;

                // push more parameters onto the stack
                self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;
                self.emit_sw(REG_SP, 0, self.current_temporary())?;

                self.tfree(1);
            }

            if self.scan.sym == Symbol::RParenthesis {
                self.scan.next_symbol()?;

                typ = self.help_call_codegen(entry, procedure)?;
            } else {
                self.syntax_error_symbol(Symbol::RParenthesis);

                typ = Type::Uint32;
            }
        } else if self.scan.sym == Symbol::RParenthesis {
            self.scan.next_symbol()?;

            typ = self.help_call_codegen(entry, procedure)?;
        } else {
            self.syntax_error_symbol(Symbol::RParenthesis);

            typ = Type::Uint32;
        }

        // assert: allocated_temporaries == 0

        self.restore_temporaries(number_of_temporaries)?;

        self.calls += 1;

        // assert: allocated_temporaries == n

        Ok(typ)
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn is_expression(&self) -> bool {
        matches!(
            self.scan.sym,
            Symbol::Minus
                | Symbol::LParenthesis
                | Symbol::Identifier
                | Symbol::Integer
                | Symbol::Asterisk
                | Symbol::Str
                | Symbol::Character
        )
    }

    fn is_literal(&self) -> bool {
        matches!(self.scan.sym, Symbol::Integer | Symbol::Character)
    }

    fn is_star_or_div_or_modulo(&self) -> bool {
        matches!(self.scan.sym, Symbol::Asterisk | Symbol::Div | Symbol::Mod)
    }

    fn is_plus_or_minus(&self) -> bool {
        matches!(self.scan.sym, Symbol::Minus | Symbol::Plus)
    }

    fn is_comparison(&self) -> bool {
        matches!(
            self.scan.sym,
            Symbol::Equality
                | Symbol::NotEq
                | Symbol::Lt
                | Symbol::Gt
                | Symbol::Leq
                | Symbol::Geq
        )
    }

    fn is_not_rbrace_or_eof(&self) -> bool {
        !matches!(self.scan.sym, Symbol::RBrace | Symbol::Eof)
    }

    fn look_for_factor(&self) -> bool {
        !matches!(
            self.scan.sym,
            Symbol::Asterisk
                | Symbol::Minus
                | Symbol::Identifier
                | Symbol::Integer
                | Symbol::Character
                | Symbol::Str
                | Symbol::LParenthesis
                | Symbol::Eof
        )
    }

    fn look_for_statement(&self) -> bool {
        !matches!(
            self.scan.sym,
            Symbol::Asterisk
                | Symbol::Identifier
                | Symbol::While
                | Symbol::If
                | Symbol::Return
                | Symbol::Eof
        )
    }

    fn look_for_type(&self) -> bool {
        !matches!(self.scan.sym, Symbol::Uint32 | Symbol::Void | Symbol::Eof)
    }

    fn compile_factor(&mut self) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        while self.look_for_factor() {
            self.syntax_error_unexpected();

            if self.scan.sym == Symbol::Eof {
                return Err(self.parser_error("reached end of file looking for a factor"));
            } else {
                self.scan.next_symbol()?;
            }
        }

        let mut has_cast = false;
        let mut cast = Type::Uint32;

        // optional: [ cast ]
        if self.scan.sym == Symbol::LParenthesis {
            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::Uint32 {
                // cast: "(" "uint32_t" [ "*" ] ")"
                has_cast = true;

                cast = self.compile_type()?;

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            } else {
                // not a cast: "(" expression ")"
                let typ = self.compile_expression()?;

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }

                // assert: allocated_temporaries == n + 1

                return Ok(typ);
            }
        }

        // optional: -
        let negative = if self.scan.sym == Symbol::Minus {
            self.scan.integer_is_signed = true;

            self.scan.next_symbol()?;

            self.scan.integer_is_signed = false;

            true
        } else {
            false
        };

        // optional: dereference
        let dereference = if self.scan.sym == Symbol::Asterisk {
            self.scan.next_symbol()?;

            true
        } else {
            false
        };

        let mut typ;

        if self.scan.sym == Symbol::Identifier {
            let variable_or_procedure_name = self.scan.identifier.clone();

            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::LParenthesis {
                self.scan.next_symbol()?;

                // procedure call: identifier "(" ... ")"
                typ = self.compile_call(&variable_or_procedure_name)?;

                self.talloc()?;

                // retrieve the return value
                self.emit_addi(self.current_temporary(), REG_A0, 0)?;

                // reset the return register to the initial return value
                // for missing return expressions
                self.emit_addi(REG_A0, REG_ZR, 0)?;
            } else {
                // variable access: identifier
                typ = self.load_variable_or_big_int(&variable_or_procedure_name, Class::Variable)?;
            }
        } else if self.scan.sym == Symbol::Integer {
            self.load_integer(self.scan.literal)?;

            self.scan.next_symbol()?;

            typ = Type::Uint32;
        } else if self.scan.sym == Symbol::Character {
            self.talloc()?;

            self.emit_addi(self.current_temporary(), REG_ZR, self.scan.literal as i32)?;

            self.scan.next_symbol()?;

            typ = Type::Uint32;
        } else if self.scan.sym == Symbol::Str {
            self.load_string()?;

            self.scan.next_symbol()?;

            typ = Type::Uint32Ptr;
        } else if self.scan.sym == Symbol::LParenthesis {
            self.scan.next_symbol()?;

            typ = self.compile_expression()?;

            if self.scan.sym == Symbol::RParenthesis {
                self.scan.next_symbol()?;
            } else {
                self.syntax_error_symbol(Symbol::RParenthesis);
            }
        } else {
            self.syntax_error_unexpected();

            typ = Type::Uint32;

            self.talloc()?;

            self.emit_addi(self.current_temporary(), REG_ZR, 0)?;
        }

        if dereference {
            if typ != Type::Uint32Ptr {
                self.type_warning(Type::Uint32Ptr, typ);
            }

            // dereference is a word load
            self.emit_lw(self.current_temporary(), self.current_temporary(), 0)?;

            typ = Type::Uint32;
        }

        if negative {
            if typ != Type::Uint32 {
                self.type_warning(Type::Uint32, typ);

                typ = Type::Uint32;
            }

            self.emit_sub(self.current_temporary(), REG_ZR, self.current_temporary())?;
        }

        // assert: allocated_temporaries == n + 1

        if has_cast {
            Ok(cast)
        } else {
            Ok(typ)
        }
    }

    fn compile_term(&mut self) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        let ltype = self.compile_factor()?;

        // assert: allocated_temporaries == n + 1

        while self.is_star_or_div_or_modulo() {
            let operator_symbol = self.scan.sym;

            self.scan.next_symbol()?;

            let rtype = self.compile_factor()?;

            // assert: allocated_temporaries == n + 2

            if ltype != rtype {
                self.type_warning(ltype, rtype);
            }

            match operator_symbol {
                Symbol::Asterisk => self.emit_mul(
                    self.previous_temporary(),
                    self.previous_temporary(),
                    self.current_temporary(),
                )?,
                Symbol::Div => self.emit_divu(
                    self.previous_temporary(),
                    self.previous_temporary(),
                    self.current_temporary(),
                )?,
                _ => self.emit_remu(
                    self.previous_temporary(),
                    self.previous_temporary(),
                    self.current_temporary(),
                )?,
            }

            self.tfree(1);
        }

        // assert: allocated_temporaries == n + 1

        Ok(ltype)
    }

    fn compile_simple_expression(&mut self) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        let mut ltype = self.compile_term()?;

        // assert: allocated_temporaries == n + 1

        while self.is_plus_or_minus() {
            let operator_symbol = self.scan.sym;

            self.scan.next_symbol()?;

            let rtype = self.compile_term()?;

            // assert: allocated_temporaries == n + 2

            if operator_symbol == Symbol::Plus {
                if ltype == Type::Uint32Ptr {
                    if rtype == Type::Uint32 {
                        // uint32_t* + uint32_t
                        // pointer arithmetic: scale the integer by 2^2
                        self.emit_left_shift_by(self.current_temporary(), 2)?;
                    } else {
                        // uint32_t* + uint32_t* is undefined
                        self.syntax_error_message("(uint32_t*) + (uint32_t*) is undefined");
                    }
                } else if rtype == Type::Uint32Ptr {
                    // uint32_t + uint32_t*
                    // pointer arithmetic: scale the integer by 2^2
                    self.emit_left_shift_by(self.previous_temporary(), 2)?;

                    ltype = Type::Uint32Ptr;
                }

                self.emit_add(
                    self.previous_temporary(),
                    self.previous_temporary(),
                    self.current_temporary(),
                )?;
            } else {
                if ltype == Type::Uint32Ptr {
                    if rtype == Type::Uint32 {
                        // uint32_t* - uint32_t
                        // pointer arithmetic: scale the integer by 2^2
                        self.emit_left_shift_by(self.current_temporary(), 2)?;
                        self.emit_sub(
                            self.previous_temporary(),
                            self.previous_temporary(),
                            self.current_temporary(),
                        )?;
                    } else {
                        // uint32_t* - uint32_t*
                        // pointer arithmetic: subtract, then divide by the word size
                        self.emit_sub(
                            self.previous_temporary(),
                            self.previous_temporary(),
                            self.current_temporary(),
                        )?;
                        self.emit_addi(self.current_temporary(), REG_ZR, WORD_SIZE as i32)?;
                        self.emit_divu(
                            self.previous_temporary(),
                            self.previous_temporary(),
                            self.current_temporary(),
                        )?;

                        ltype = Type::Uint32;
                    }
                } else if rtype == Type::Uint32Ptr {
                    // uint32_t - uint32_t* is undefined
                    self.syntax_error_message("(uint32_t) - (uint32_t*) is undefined");
                } else {
                    // uint32_t - uint32_t
                    self.emit_sub(
                        self.previous_temporary(),
                        self.previous_temporary(),
                        self.current_temporary(),
                    )?;
                }
            }

            self.tfree(1);
        }

        // assert: allocated_temporaries == n + 1

        Ok(ltype)
    }

    fn compile_expression(&mut self) -> Result<Type, CompileError> {
        // assert: n = allocated_temporaries

        let ltype = self.compile_simple_expression()?;

        // assert: allocated_temporaries == n + 1

        // optional: ==, !=, <, >, <=, >= simple_expression
        if self.is_comparison() {
            let operator_symbol = self.scan.sym;

            self.scan.next_symbol()?;

            let rtype = self.compile_simple_expression()?;

            // assert: allocated_temporaries == n + 2

            if ltype != rtype {
                self.type_warning(ltype, rtype);
            }

            match operator_symbol {
                Symbol::Equality => {
                    // a == b iff unsigned b - a < 1
                    self.emit_sub(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;
                    self.emit_addi(self.current_temporary(), REG_ZR, 1)?;
                    self.emit_sltu(
                        self.previous_temporary(),
                        self.previous_temporary(),
                        self.current_temporary(),
                    )?;

                    self.tfree(1);
                }
                Symbol::NotEq => {
                    // a != b iff unsigned 0 < b - a
                    self.emit_sub(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;

                    self.tfree(1);

                    self.emit_sltu(self.current_temporary(), REG_ZR, self.current_temporary())?;
                }
                Symbol::Lt => {
                    // a < b
                    self.emit_sltu(
                        self.previous_temporary(),
                        self.previous_temporary(),
                        self.current_temporary(),
                    )?;

                    self.tfree(1);
                }
                Symbol::Gt => {
                    // a > b iff b < a
                    self.emit_sltu(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;

                    self.tfree(1);
                }
                Symbol::Leq => {
                    // a <= b iff 1 - (b < a)
                    self.emit_sltu(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;
                    self.emit_addi(self.current_temporary(), REG_ZR, 1)?;
                    self.emit_sub(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;

                    self.tfree(1);
                }
                _ => {
                    // a >= b iff 1 - (a < b)
                    self.emit_sltu(
                        self.previous_temporary(),
                        self.previous_temporary(),
                        self.current_temporary(),
                    )?;
                    self.emit_addi(self.current_temporary(), REG_ZR, 1)?;
                    self.emit_sub(
                        self.previous_temporary(),
                        self.current_temporary(),
                        self.previous_temporary(),
                    )?;

                    self.tfree(1);
                }
            }
        }

        // assert: allocated_temporaries == n + 1

        Ok(ltype)
    }

    fn syntax_error_message(&self, message: &str) {
        eprintln!(
            "{}: syntax error in {} in line {}: {}",
            TOOL_NAME, self.scan.file, self.scan.line, message
        );
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn compile_while(&mut self) -> Result<(), CompileError> {
        // assert: allocated_temporaries == 0

        let jump_back_to_while = self.bin.binary_length;

        let mut branch_forward_to_end = 0;

        // while ( expression )
        if self.scan.sym == Symbol::While {
            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::LParenthesis {
                self.scan.next_symbol()?;

                self.compile_expression()?;

                // the branch target is unknown here, fixup later
                branch_forward_to_end = self.bin.binary_length;

                self.emit_beq(self.current_temporary(), REG_ZR, 0)?;

                self.tfree(1);

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;

                    // zero or more statements: { statement }
                    if self.scan.sym == Symbol::LBrace {
                        self.scan.next_symbol()?;

                        while self.is_not_rbrace_or_eof() {
                            self.compile_statement()?;
                        }

                        if self.scan.sym == Symbol::RBrace {
                            self.scan.next_symbol()?;
                        } else {
                            self.syntax_error_symbol(Symbol::RBrace);

                            return Err(self.parser_error("missing } in while body"));
                        }
                    } else {
                        // only one statement without braces
                        self.compile_statement()?;
                    }
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            } else {
                self.syntax_error_symbol(Symbol::LParenthesis);
            }
        } else {
            self.syntax_error_symbol(Symbol::While);
        }

        // the unconditional jump back is a jal so branch prediction is
        // not disturbed
        self.emit_jal(
            REG_ZR,
            jump_back_to_while.wrapping_sub(self.bin.binary_length) as i32,
        )?;

        if branch_forward_to_end != 0 {
            // the first instruction after the loop body provides the
            // address for the conditional forward branch
            self.fixup_relative_b_format(branch_forward_to_end)?;
        }

        // assert: allocated_temporaries == 0

        self.whiles += 1;

        Ok(())
    }

    fn compile_if(&mut self) -> Result<(), CompileError> {
        // assert: allocated_temporaries == 0

        // if ( expression )
        if self.scan.sym == Symbol::If {
            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::LParenthesis {
                self.scan.next_symbol()?;

                self.compile_expression()?;

                // if the "if" case is not true branch to "else" (if provided)
                let branch_forward_to_else_or_end = self.bin.binary_length;

                self.emit_beq(self.current_temporary(), REG_ZR, 0)?;

                self.tfree(1);

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;

                    // zero or more statements: { statement }
                    if self.scan.sym == Symbol::LBrace {
                        self.scan.next_symbol()?;

                        while self.is_not_rbrace_or_eof() {
                            self.compile_statement()?;
                        }

                        if self.scan.sym == Symbol::RBrace {
                            self.scan.next_symbol()?;
                        } else {
                            self.syntax_error_symbol(Symbol::RBrace);

                            return Err(self.parser_error("missing } in if body"));
                        }
                    } else {
                        // only one statement without braces
                        self.compile_statement()?;
                    }

                    // optional: else
                    if self.scan.sym == Symbol::Else {
                        self.scan.next_symbol()?;

                        // if the "if" case was true skip the "else" case by
                        // unconditionally jumping to the end
                        let jump_forward_to_end = self.bin.binary_length;

                        self.emit_jal(REG_ZR, 0)?;

                        // if the "if" case was not true branch here
                        self.fixup_relative_b_format(branch_forward_to_else_or_end)?;

                        // zero or more statements: { statement }
                        if self.scan.sym == Symbol::LBrace {
                            self.scan.next_symbol()?;

                            while self.is_not_rbrace_or_eof() {
                                self.compile_statement()?;
                            }

                            if self.scan.sym == Symbol::RBrace {
                                self.scan.next_symbol()?;
                            } else {
                                self.syntax_error_symbol(Symbol::RBrace);

                                return Err(self.parser_error("missing } in else body"));
                            }
                        } else {
                            // only one statement without braces
                            self.compile_statement()?;
                        }

                        // if the "if" case was true jump here
                        let here = self.bin.binary_length;

                        self.fixup_relative_j_format(jump_forward_to_end, here)?;
                    } else {
                        // if the "if" case was not true branch here
                        self.fixup_relative_b_format(branch_forward_to_else_or_end)?;
                    }
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            } else {
                self.syntax_error_symbol(Symbol::LParenthesis);
            }
        } else {
            self.syntax_error_symbol(Symbol::If);
        }

        // assert: allocated_temporaries == 0

        self.ifs += 1;

        Ok(())
    }

    fn compile_return(&mut self) -> Result<(), CompileError> {
        // assert: allocated_temporaries == 0

        if self.scan.sym == Symbol::Return {
            self.scan.next_symbol()?;
        } else {
            self.syntax_error_symbol(Symbol::Return);
        }

        // optional: expression
        if self.scan.sym != Symbol::Semicolon {
            let typ = self.compile_expression()?;

            if typ != self.return_type {
                self.type_warning(self.return_type, typ);
            }

            // save the expression value in the return register
            self.emit_addi(REG_A0, self.current_temporary(), 0)?;

            self.tfree(1);
        } else if self.return_type != Type::Void {
            self.type_warning(self.return_type, Type::Void);
        }

        // jump to the procedure epilogue through the fixup chain using
        // the absolute address as the link
        self.emit_jal(REG_ZR, self.return_branches as i32)?;

        // new head of the fixup chain
        self.return_branches = self.bin.binary_length - INSTRUCTION_SIZE;

        // assert: allocated_temporaries == 0

        self.returns += 1;

        Ok(())
    }

    fn compile_statement(&mut self) -> Result<(), CompileError> {
        // assert: allocated_temporaries == 0

        while self.look_for_statement() {
            self.syntax_error_unexpected();

            if self.scan.sym == Symbol::Eof {
                return Err(self.parser_error("reached end of file looking for a statement"));
            } else {
                self.scan.next_symbol()?;
            }
        }

        if self.scan.sym == Symbol::Asterisk {
            // "*" ( identifier | "(" expression ")" ) "=" expression ";"
            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::Identifier {
                let ltype =
                    self.load_variable_or_big_int(&self.scan.identifier.clone(), Class::Variable)?;

                if ltype != Type::Uint32Ptr {
                    self.type_warning(Type::Uint32Ptr, ltype);
                }

                self.scan.next_symbol()?;

                if self.scan.sym == Symbol::Assign {
                    self.scan.next_symbol()?;

                    let rtype = self.compile_expression()?;

                    if rtype != Type::Uint32 {
                        self.type_warning(Type::Uint32, rtype);
                    }

                    self.emit_sw(self.previous_temporary(), 0, self.current_temporary())?;

                    self.tfree(2);

                    self.assignments += 1;
                } else {
                    self.syntax_error_symbol(Symbol::Assign);

                    self.tfree(1);
                }

                if self.scan.sym == Symbol::Semicolon {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::Semicolon);
                }
            } else if self.scan.sym == Symbol::LParenthesis {
                self.scan.next_symbol()?;

                let ltype = self.compile_expression()?;

                if ltype != Type::Uint32Ptr {
                    self.type_warning(Type::Uint32Ptr, ltype);
                }

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;

                    if self.scan.sym == Symbol::Assign {
                        self.scan.next_symbol()?;

                        let rtype = self.compile_expression()?;

                        if rtype != Type::Uint32 {
                            self.type_warning(Type::Uint32, rtype);
                        }

                        self.emit_sw(self.previous_temporary(), 0, self.current_temporary())?;

                        self.tfree(2);

                        self.assignments += 1;
                    } else {
                        self.syntax_error_symbol(Symbol::Assign);

                        self.tfree(1);
                    }

                    if self.scan.sym == Symbol::Semicolon {
                        self.scan.next_symbol()?;
                    } else {
                        self.syntax_error_symbol(Symbol::Semicolon);
                    }
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            } else {
                self.syntax_error_symbol(Symbol::LParenthesis);
            }
        } else if self.scan.sym == Symbol::Identifier {
            // identifier "=" expression ";" | identifier "(" ... ")" ";"
            let variable_or_procedure_name = self.scan.identifier.clone();

            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::LParenthesis {
                self.scan.next_symbol()?;

                self.compile_call(&variable_or_procedure_name)?;

                // reset the return register to the initial return value
                // for missing return expressions
                self.emit_addi(REG_A0, REG_ZR, 0)?;

                if self.scan.sym == Symbol::Semicolon {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::Semicolon);
                }
            } else if self.scan.sym == Symbol::Assign {
                let entry = self.get_variable_or_big_int(&variable_or_procedure_name, Class::Variable)?;

                let ltype = self.syms.entry(entry).typ;
                let offset = self.syms.entry(entry).address;
                let scope = self.syms.entry(entry).scope;

                self.scan.next_symbol()?;

                let rtype = self.compile_expression()?;

                if ltype != rtype {
                    self.type_warning(ltype, rtype);
                }

                if is_signed_integer(offset, 12) {
                    self.emit_sw(scope, offset as i32, self.current_temporary())?;

                    self.tfree(1);
                } else {
                    self.load_upper_base_address(entry)?;

                    self.emit_sw(
                        self.current_temporary(),
                        sign_extend(get_bits(offset, 0, 12), 12) as i32,
                        self.previous_temporary(),
                    )?;

                    self.tfree(2);
                }

                self.assignments += 1;

                if self.scan.sym == Symbol::Semicolon {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::Semicolon);
                }
            } else {
                self.syntax_error_unexpected();
            }
        } else if self.scan.sym == Symbol::While {
            self.compile_while()?;
        } else if self.scan.sym == Symbol::If {
            self.compile_if()?;
        } else if self.scan.sym == Symbol::Return {
            self.compile_return()?;

            if self.scan.sym == Symbol::Semicolon {
                self.scan.next_symbol()?;
            } else {
                self.syntax_error_symbol(Symbol::Semicolon);
            }
        }

        Ok(())
    }

    fn compile_type(&mut self) -> Result<Type, CompileError> {
        let mut typ = Type::Uint32;

        if self.scan.sym == Symbol::Uint32 {
            self.scan.next_symbol()?;

            if self.scan.sym == Symbol::Asterisk {
                typ = Type::Uint32Ptr;

                self.scan.next_symbol()?;
            }
        } else {
            self.syntax_error_symbol(Symbol::Uint32);
        }

        Ok(typ)
    }

    fn compile_variable(&mut self, offset: u32) -> Result<(), CompileError> {
        let typ = self.compile_type()?;

        if self.scan.sym == Symbol::Identifier {
            // TODO: check if the identifier has already been declared
            self.syms.create_entry(
                Table::Local,
                &self.scan.identifier.clone(),
                self.scan.line,
                Class::Variable,
                typ,
                0,
                offset,
            );

            self.scan.next_symbol()?;
        } else {
            self.syntax_error_symbol(Symbol::Identifier);

            self.syms.create_entry(
                Table::Local,
                "missing variable name",
                self.scan.line,
                Class::Variable,
                typ,
                0,
                offset,
            );
        }

        Ok(())
    }

    fn compile_initialization(&mut self, typ: Type) -> Result<u32, CompileError> {
        let mut initial_value = 0;

        let mut has_cast = false;
        let mut cast = Type::Uint32;

        if self.scan.sym == Symbol::Assign {
            self.scan.next_symbol()?;

            // optional: [ cast ]
            if self.scan.sym == Symbol::LParenthesis {
                has_cast = true;

                self.scan.next_symbol()?;

                cast = self.compile_type()?;

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            }

            // optional: -
            if self.scan.sym == Symbol::Minus {
                self.scan.integer_is_signed = true;

                self.scan.next_symbol()?;

                self.scan.integer_is_signed = false;

                initial_value = self.scan.literal.wrapping_neg();
            } else {
                initial_value = self.scan.literal;
            }

            if self.is_literal() {
                self.scan.next_symbol()?;
            } else {
                self.syntax_error_unexpected();
            }

            if self.scan.sym == Symbol::Semicolon {
                self.scan.next_symbol()?;
            } else {
                self.syntax_error_symbol(Symbol::Semicolon);
            }
        } else {
            self.syntax_error_symbol(Symbol::Assign);
        }

        if has_cast {
            if typ != cast {
                self.type_warning(typ, cast);
            }
        } else if typ != Type::Uint32 {
            self.type_warning(typ, Type::Uint32);
        }

        Ok(initial_value)
    }

    fn compile_procedure(&mut self, procedure: &str, typ: Type) -> Result<(), CompileError> {
        // assuming the procedure is undefined
        let mut is_undefined = true;

        let mut number_of_parameters = 0;

        // try parsing formal parameters
        if self.scan.sym == Symbol::LParenthesis {
            self.scan.next_symbol()?;

            if self.scan.sym != Symbol::RParenthesis {
                self.compile_variable(0)?;

                number_of_parameters = 1;

                while self.scan.sym == Symbol::Comma {
                    self.scan.next_symbol()?;

                    self.compile_variable(0)?;

                    number_of_parameters += 1;
                }

                // parameters get positive offsets above the saved frame
                // pointer and return address
                let mut entry = self.syms.local_head();
                let mut parameters = 0;

                while parameters < number_of_parameters {
                    let id = entry.expect("one local entry exists per parameter");

                    self.syms.entry_mut(id).address =
                        parameters * REGISTER_SIZE + 2 * REGISTER_SIZE;

                    parameters += 1;

                    entry = self.syms.next_of(id);
                }

                if self.scan.sym == Symbol::RParenthesis {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::RParenthesis);
                }
            } else {
                self.scan.next_symbol()?;
            }
        } else {
            self.syntax_error_symbol(Symbol::LParenthesis);
        }

        let entry = self.syms.search_global(procedure, Class::Procedure);

        if self.scan.sym == Symbol::Semicolon {
            // procedure declaration
            match entry {
                None => {
                    // never called nor declared nor defined
                    self.syms.create_entry(
                        Table::Global,
                        procedure,
                        self.scan.line,
                        Class::Procedure,
                        typ,
                        0,
                        0,
                    );
                }
                Some(entry) => {
                    if self.syms.entry(entry).typ != typ {
                        // already called, declared, or even defined; check
                        // the return type but otherwise ignore
                        self.type_warning(self.syms.entry(entry).typ, typ);
                    }
                }
            }

            self.scan.next_symbol()?;
        } else if self.scan.sym == Symbol::LBrace {
            // procedure definition
            match entry {
                None => {
                    let address = self.bin.binary_length;

                    self.syms.create_entry(
                        Table::Global,
                        procedure,
                        self.scan.line,
                        Class::Procedure,
                        typ,
                        0,
                        address,
                    );
                }
                Some(entry) => {
                    // already called or declared or defined
                    let address = self.syms.entry(entry).address;

                    if address != 0 {
                        if get_opcode(self.bin.load_instruction(address)) == OP_JAL {
                            // already called but not defined: resolve the chain
                            let here = self.bin.binary_length;

                            self.fixlink_relative(address, here)?;
                        } else {
                            // already defined
                            is_undefined = false;
                        }
                    }

                    if is_undefined {
                        // already called or declared but not defined
                        let line = self.scan.line;
                        let here = self.bin.binary_length;

                        if self.syms.entry(entry).typ != typ {
                            self.type_warning(self.syms.entry(entry).typ, typ);
                        }

                        let e = self.syms.entry_mut(entry);

                        e.line = line;
                        e.typ = typ;
                        e.address = here;

                        if procedure == "main" {
                            // the first source containing main names the binary
                            self.bin.name = self.scan.file.clone();

                            // account for the initial call to main
                            self.calls += 1;
                        }
                    } else {
                        eprintln!(
                            "{}: warning in {} in line {}: redefinition of procedure {} ignored",
                            TOOL_NAME, self.scan.file, self.scan.line, procedure
                        );
                    }
                }
            }

            self.scan.next_symbol()?;

            let mut number_of_local_variable_bytes = 0;

            while self.scan.sym == Symbol::Uint32 {
                number_of_local_variable_bytes += REGISTER_SIZE;

                // local variables sit at negative offsets below the frame pointer
                self.compile_variable(number_of_local_variable_bytes.wrapping_neg())?;

                if self.scan.sym == Symbol::Semicolon {
                    self.scan.next_symbol()?;
                } else {
                    self.syntax_error_symbol(Symbol::Semicolon);
                }
            }

            self.help_procedure_prologue(number_of_local_variable_bytes)?;

            // a fresh fixup chain for return statements
            self.return_branches = 0;

            self.return_type = typ;

            while self.is_not_rbrace_or_eof() {
                self.compile_statement()?;
            }

            self.return_type = Type::Uint32;

            if self.scan.sym == Symbol::RBrace {
                self.scan.next_symbol()?;
            } else {
                self.syntax_error_symbol(Symbol::RBrace);

                return Err(self.parser_error("missing } in procedure body"));
            }

            let here = self.bin.binary_length;

            self.fixlink_relative(self.return_branches, here)?;

            self.return_branches = 0;

            self.help_procedure_epilogue(number_of_parameters * REGISTER_SIZE)?;
        } else {
            self.syntax_error_unexpected();
        }

        self.syms.reset_local();

        // assert: allocated_temporaries == 0

        Ok(())
    }

    fn compile_cstar(&mut self) -> Result<(), CompileError> {
        while self.scan.sym != Symbol::Eof {
            while self.look_for_type() {
                self.syntax_error_unexpected();

                if self.scan.sym == Symbol::Eof {
                    return Err(self.parser_error("reached end of file looking for a declaration"));
                } else {
                    self.scan.next_symbol()?;
                }
            }

            if self.scan.sym == Symbol::Void {
                // void identifier: procedure declaration or definition
                self.scan.next_symbol()?;

                if self.scan.sym == Symbol::Identifier {
                    let name = self.scan.identifier.clone();

                    self.scan.next_symbol()?;

                    self.compile_procedure(&name, Type::Void)?;
                } else {
                    self.syntax_error_symbol(Symbol::Identifier);
                }
            } else {
                let typ = self.compile_type()?;

                if self.scan.sym == Symbol::Identifier {
                    let name = self.scan.identifier.clone();

                    self.scan.next_symbol()?;

                    if self.scan.sym == Symbol::LParenthesis {
                        // type identifier "(": procedure declaration or definition
                        self.compile_procedure(&name, typ)?;
                    } else {
                        let current_line_number = self.scan.line;

                        let initial_value = if self.scan.sym == Symbol::Semicolon {
                            // type identifier ";": global variable declaration
                            self.scan.next_symbol()?;

                            0
                        } else {
                            // type identifier "=": global variable definition
                            self.compile_initialization(typ)?
                        };

                        if self.syms.search_global(&name, Class::Variable).is_none() {
                            self.allocated_memory += REGISTER_SIZE;

                            let address = self.allocated_memory.wrapping_neg();

                            self.syms.create_entry(
                                Table::Global,
                                &name,
                                current_line_number,
                                Class::Variable,
                                typ,
                                initial_value,
                                address,
                            );
                        } else {
                            eprintln!(
                                "{}: warning in {} in line {}: redefinition of global variable {} ignored",
                                TOOL_NAME, self.scan.file, current_line_number, name
                            );
                        }
                    }
                } else {
                    self.syntax_error_symbol(Symbol::Identifier);
                }
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // machine code library
    // ------------------------------------------------------------------

    fn emit_round_up(&mut self, reg: u32, m: u32) -> Result<(), CompileError> {
        self.talloc()?;

        // computes value(reg) + m - 1 - (value(reg) + m - 1) % m
        self.emit_addi(reg, reg, m as i32 - 1)?;
        self.emit_addi(self.current_temporary(), REG_ZR, m as i32)?;
        self.emit_remu(self.current_temporary(), reg, self.current_temporary())?;
        self.emit_sub(reg, reg, self.current_temporary())?;

        self.tfree(1);

        Ok(())
    }

    fn emit_left_shift_by(&mut self, reg: u32, b: u32) -> Result<(), CompileError> {
        // assert: 0 <= b < 11

        // load a multiplication factor less than 2^11 to avoid sign extension
        let scratch = self.next_temporary()?;

        self.emit_addi(scratch, REG_ZR, 1 << b)?;
        self.emit_mul(reg, reg, scratch)?;

        Ok(())
    }

    fn emit_program_entry(&mut self) -> Result<(), CompileError> {
        // allocate space for the machine initialization code by emitting
        // exactly 20 nops that are rewritten later
        for _ in 0..20 {
            self.emit_nop()?;
        }

        Ok(())
    }

    fn is_undefined_procedure(&mut self, entry: EntryId) -> bool {
        if self.syms.entry(entry).class != Class::Procedure {
            return false;
        }

        let name = self.syms.entry(entry).name.clone();

        if self.syms.search_library(&name).is_some() {
            // library procedures override declared or defined procedures
            return false;
        }

        let address = self.syms.entry(entry).address;

        if address == 0 {
            // declared but not defined
            true
        } else {
            // called but not defined leaves a jal at the chain head
            get_opcode(self.bin.load_instruction(address)) == OP_JAL
        }
    }

    fn report_undefined_procedures(&mut self) -> bool {
        let mut undefined = false;

        for entry in self.syms.global_ids() {
            if self.is_undefined_procedure(entry) {
                undefined = true;

                eprintln!(
                    "{}: syntax error in {} in line {}: procedure {} undefined",
                    TOOL_NAME,
                    self.scan.file,
                    self.syms.entry(entry).line,
                    self.syms.entry(entry).name
                );
            }
        }

        undefined
    }

    fn emit_bootstrapping(&mut self) -> Result<(), CompileError> {
        /*
            1. initialize the global pointer
            2. initialize malloc's _bump pointer
            3. push the argv pointer onto the stack
            4. call the main procedure
            5. proceed to the exit wrapper
        */

        // the global pointer sits right above code and data
        let mut gp = ELF_ENTRY_POINT + self.bin.binary_length + self.allocated_memory;

        let padding = gp % REGISTER_SIZE;
        gp += padding;

        if padding != 0 {
            self.emit_nop()?;
        }

        // no more allocation in the code segment from now on
        self.bin.code_length = self.bin.binary_length;

        // reset code emission to the program entry
        self.bin.binary_length = 0;

        // assert: emitting no more than 20 instructions

        if self.report_undefined_procedures() {
            // with undefined procedures just exit with exit code 0
            self.emit_addi(REG_A0, REG_ZR, 0)?;
        } else {
            if gp < (1 << 31) - (1 << 11) {
                // avoid the sign extension that would cost a sub instruction
                // assert: generates no more than two instructions
                self.load_integer(gp)?;
            } else {
                return Err(self.compiler_error("maximum program break exceeded"));
            }

            // initialize the global pointer
            self.emit_addi(REG_GP, self.current_temporary(), 0)?;

            self.tfree(1);

            // retrieve the current program break in the return register
            self.emit_addi(REG_A0, REG_ZR, 0)?;
            self.emit_addi(REG_A7, REG_ZR, SYSCALL_BRK as i32)?;
            self.emit_ecall()?;

            // align the current program break for word access
            self.emit_round_up(REG_A0, WORD_SIZE)?;

            // set the program break to the aligned program break
            self.emit_addi(REG_A7, REG_ZR, SYSCALL_BRK as i32)?;
            self.emit_ecall()?;

            // store the aligned program break in _bump
            let entry = self
                .syms
                .search_global("_bump", Class::Variable)
                .expect("the _bump global is created with the malloc wrapper");

            let scope = self.syms.entry(entry).scope;
            let address = self.syms.entry(entry).address;

            self.emit_sw(scope, address as i32, REG_A0)?;

            // reset the return register to the initial return value
            self.emit_addi(REG_A0, REG_ZR, 0)?;

            // assert: the stack is set up with the argv pointer still missing
            //
            //    $sp
            //     |
            //     V
            // | argc | argv[0] | argv[1] | ... | argv[n]

            self.talloc()?;

            // first obtain the pointer to argv
            self.emit_addi(self.current_temporary(), REG_SP, REGISTER_SIZE as i32)?;

            // then push the argv pointer onto the stack
            //      ______________
            //     |              V
            // | &argv | argc | argv[0] | argv[1] | ... | argv[n]
            self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;
            self.emit_sw(REG_SP, 0, self.current_temporary())?;

            self.tfree(1);

            // assert: global, _bump, and stack pointers are set up
            //         with all other non-temporary registers zeroed

            let entry = self.syms.scoped_entry("main", Class::Procedure);

            self.help_call_codegen(entry, "main")?;
        }

        // exit with the exit code in the return register pushed onto the
        // stack; the exit wrapper follows immediately
        self.emit_addi(REG_SP, REG_SP, -(REGISTER_SIZE as i32))?;
        self.emit_sw(REG_SP, 0, REG_A0)?;

        // discount the nops that were overwritten in the program entry
        self.counters.addi -= self.bin.binary_length / INSTRUCTION_SIZE;

        // restore the original binary length
        self.bin.binary_length = self.bin.code_length;

        Ok(())
    }

    fn emit_data_word(&mut self, data: u32, offset: u32, source_line_number: u32) -> Result<(), CompileError> {
        // assert: offset is negative as a signed word

        self.bin
            .store_data(self.bin.binary_length.wrapping_add(offset), data)?;

        self.bin.note_data_line(
            self.allocated_memory.wrapping_add(offset),
            source_line_number,
        );

        Ok(())
    }

    fn emit_string_data(&mut self, entry: EntryId) -> Result<(), CompileError> {
        let string = self.syms.entry(entry).name.clone();
        let address = self.syms.entry(entry).address;
        let line = self.syms.entry(entry).line;

        for (i, word) in string_to_words(&string).into_iter().enumerate() {
            self.emit_data_word(word, address.wrapping_add(i as u32 * REGISTER_SIZE), line)?;
        }

        Ok(())
    }

    fn emit_data_segment(&mut self) -> Result<(), CompileError> {
        self.bin.binary_length += self.allocated_memory;

        // copy the initial values of global variables, big integers and strings
        for entry in self.syms.global_ids() {
            let class = self.syms.entry(entry).class;

            match class {
                Class::Variable | Class::BigInt => {
                    let value = self.syms.entry(entry).value;
                    let address = self.syms.entry(entry).address;
                    let line = self.syms.entry(entry).line;

                    self.emit_data_word(value, address, line)?;
                }
                Class::Str => self.emit_string_data(entry)?,
                Class::Procedure => {}
            }
        }

        self.allocated_memory = 0;

        Ok(())
    }

    // ------------------------------------------------------------------
    // system call wrappers
    // ------------------------------------------------------------------

    fn emit_exit(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms
            .create_entry(Table::Library, "exit", 0, Class::Procedure, Type::Void, 0, address);

        // load the signed 32-bit integer argument for exit
        self.emit_lw(REG_A0, REG_SP, 0)?;

        // remove the argument from the stack
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        // load the correct syscall number and invoke the syscall
        self.emit_addi(REG_A7, REG_ZR, SYSCALL_EXIT as i32)?;

        self.emit_ecall()?;

        // never returns here

        Ok(())
    }

    fn emit_read(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms
            .create_entry(Table::Library, "read", 0, Class::Procedure, Type::Uint32, 0, address);

        self.emit_lw(REG_A2, REG_SP, 0)?; // size
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A1, REG_SP, 0)?; // *buffer
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A0, REG_SP, 0)?; // fd
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_addi(REG_A7, REG_ZR, SYSCALL_READ as i32)?;

        self.emit_ecall()?;

        // jump back to the caller, the return value is in REG_A0
        self.emit_jalr(REG_ZR, REG_RA, 0)
    }

    fn emit_write(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms
            .create_entry(Table::Library, "write", 0, Class::Procedure, Type::Uint32, 0, address);

        self.emit_lw(REG_A2, REG_SP, 0)?; // size
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A1, REG_SP, 0)?; // *buffer
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A0, REG_SP, 0)?; // fd
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_addi(REG_A7, REG_ZR, SYSCALL_WRITE as i32)?;

        self.emit_ecall()?;

        self.emit_jalr(REG_ZR, REG_RA, 0)
    }

    fn emit_open(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms
            .create_entry(Table::Library, "open", 0, Class::Procedure, Type::Uint32, 0, address);

        self.emit_lw(REG_A2, REG_SP, 0)?; // mode
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A1, REG_SP, 0)?; // flags
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A0, REG_SP, 0)?; // filename
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_addi(REG_A7, REG_ZR, SYSCALL_OPEN as i32)?;

        self.emit_ecall()?;

        self.emit_jalr(REG_ZR, REG_RA, 0)
    }

    fn emit_malloc(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms.create_entry(
            Table::Library,
            "malloc",
            0,
            Class::Procedure,
            Type::Uint32Ptr,
            0,
            address,
        );

        // on levels above this machine zalloc falls back to malloc,
        // assuming that page frames are zeroed at the bottom
        self.syms.create_entry(
            Table::Library,
            "zalloc",
            0,
            Class::Procedure,
            Type::Uint32Ptr,
            0,
            address,
        );

        // allocate a data segment word for recording the state of the
        // malloc bump pointer in the compiler-declared global _bump
        self.allocated_memory += REGISTER_SIZE;

        let bump_address = self.allocated_memory.wrapping_neg();

        self.syms.create_entry(
            Table::Global,
            "_bump",
            1,
            Class::Variable,
            Type::Uint32,
            0,
            bump_address,
        );

        // do not account for _bump as a global variable
        self.syms.global_variables -= 1;

        let entry = self
            .syms
            .search_global("_bump", Class::Variable)
            .expect("created right above");

        let scope = self.syms.entry(entry).scope;
        let offset = self.syms.entry(entry).address;

        // size parameter
        self.talloc()?;

        self.emit_lw(self.current_temporary(), REG_SP, 0)?;
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        // round up the size to word alignment
        self.emit_round_up(self.current_temporary(), WORD_SIZE)?;

        // the new bump pointer
        self.talloc()?;

        // the current _bump which is returned upon success
        self.emit_lw(self.current_temporary(), scope, offset as i32)?;

        // invoke brk to set the new program break to _bump + size
        self.emit_add(REG_A0, self.current_temporary(), self.previous_temporary())?;
        self.emit_addi(REG_A7, REG_ZR, SYSCALL_BRK as i32)?;
        self.emit_ecall()?;

        // return 0 if the allocation failed, that is, if the new program
        // break is still _bump and the size is not 0
        self.emit_beq(REG_A0, self.current_temporary(), 2 * INSTRUCTION_SIZE as i32)?;
        self.emit_beq(REG_ZR, REG_ZR, 4 * INSTRUCTION_SIZE as i32)?;
        self.emit_beq(REG_ZR, self.previous_temporary(), 3 * INSTRUCTION_SIZE as i32)?;
        self.emit_addi(REG_A0, REG_ZR, 0)?;
        self.emit_beq(REG_ZR, REG_ZR, 3 * INSTRUCTION_SIZE as i32)?;

        // on success set _bump to the new program break
        // and return the original _bump
        self.emit_sw(scope, offset as i32, REG_A0)?;
        self.emit_addi(REG_A0, self.current_temporary(), 0)?;

        self.tfree(2);

        self.emit_jalr(REG_ZR, REG_RA, 0)
    }

    fn emit_switch(&mut self) -> Result<(), CompileError> {
        let address = self.bin.binary_length;

        self.syms.create_entry(
            Table::Library,
            "hypster_switch",
            0,
            Class::Procedure,
            Type::Uint32Ptr,
            0,
            address,
        );

        self.emit_lw(REG_A1, REG_SP, 0)?; // number of instructions to execute
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_lw(REG_A0, REG_SP, 0)?; // context to switch to
        self.emit_addi(REG_SP, REG_SP, REGISTER_SIZE as i32)?;

        self.emit_addi(REG_A7, REG_ZR, SYSCALL_SWITCH as i32)?;

        self.emit_ecall()?;

        // save the context we switched from in the return register
        self.emit_addi(REG_A0, REG_A1, 0)?;

        self.emit_jalr(REG_ZR, REG_RA, 0)
    }
}
