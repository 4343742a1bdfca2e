// The microkernel side of the machine: system calls, the binary and
// argument loader, shadow-context save/restore for nested machines, and the
// scheduler loops behind the machine personalities.

use crate::bits::{round_up, INSTRUCTION_SIZE, REGISTER_SIZE};
use crate::binary::string_to_words;
use crate::instructions::{
    NUMBER_OF_REGISTERS, REG_A0, REG_A1, REG_A2, REG_A7, REG_SP,
};
use crate::memory::{
    frame_address_for_page, is_valid_virtual_address, page_of_virtual_address, vctxt_exception,
    vctxt_exit_code, vctxt_faulting_page, vctxt_hi_page, vctxt_lo_page, vctxt_me_page,
    vctxt_page_table, vctxt_program_break, vctxt_program_counter, vctxt_regs, ContextId,
    VIRTUAL_MEMORY_SIZE,
};
use crate::processor::{Exception, Machine, TIMEROFF, TIMESLICE};
use crate::{exitcode, RuntimeError};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

pub const SYSCALL_EXIT: u32 = 93;
pub const SYSCALL_READ: u32 = 63;
pub const SYSCALL_WRITE: u32 = 64;
pub const SYSCALL_OPEN: u32 = 1024;
pub const SYSCALL_BRK: u32 = 214;

// TODO: fix this syscall number for spike
pub const SYSCALL_SWITCH: u32 = 401;

pub const MAX_FILENAME_LENGTH: u32 = 128;

// flags for opening read-only files; the _O_BINARY bit is a Windows
// concern that Linux and Mac do not mind about
pub const O_RDONLY: u32 = 32768; // 0x8000

// flags for opening write-only files, one triple per platform
pub const MAC_O_CREAT_TRUNC_WRONLY: u32 = 1537; // 0x0601
pub const LINUX_O_CREAT_TRUNC_WRONLY: u32 = 577; // 0x0241
pub const WINDOWS_O_BINARY_CREAT_TRUNC_WRONLY: u32 = 33537; // 0x8301

// rw-r--r-- file permissions
pub const S_IRUSR_IWUSR_IRGRP_IROTH: u32 = 420;

// host files backing guest file descriptors; 0, 1 and 2 are the standard
// streams, descriptors from 3 on are handed out here
pub struct FdTable {
    files: HashMap<u32, File>,
    next_fd: u32,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable {
            files: HashMap::new(),
            next_fd: 3,
        }
    }

    pub fn open(&mut self, name: &str, flags: u32, mode: u32) -> u32 {
        let mut options = OpenOptions::new();

        if flags == O_RDONLY || flags == 0 {
            options.read(true);
        } else if flags == MAC_O_CREAT_TRUNC_WRONLY
            || flags == LINUX_O_CREAT_TRUNC_WRONLY
            || flags == WINDOWS_O_BINARY_CREAT_TRUNC_WRONLY
        {
            options.write(true).create(true).truncate(true);

            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;

                options.mode(mode);
            }
        } else {
            return u32::MAX;
        }

        #[cfg(not(unix))]
        let _ = mode;

        match options.open(name) {
            Ok(file) => {
                let fd = self.next_fd;

                self.next_fd += 1;
                self.files.insert(fd, file);

                fd
            }
            Err(_) => u32::MAX,
        }
    }

    pub fn read(&mut self, fd: u32, buffer: &mut [u8]) -> usize {
        if fd == 0 {
            std::io::stdin().read(buffer).unwrap_or(0)
        } else {
            match self.files.get_mut(&fd) {
                Some(file) => file.read(buffer).unwrap_or(0),
                None => 0,
            }
        }
    }

    pub fn write(&mut self, fd: u32, buffer: &[u8]) -> usize {
        if fd == 2 {
            std::io::stderr().write(buffer).unwrap_or(0)
        } else {
            match self.files.get_mut(&fd) {
                Some(file) => file.write(buffer).unwrap_or(0),
                None => 0,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    Exit,
    DoNotExit,
}

impl Machine {
    fn ctx_reg(&self, ctx: ContextId, reg: u32) -> u32 {
        self.contexts.get(ctx).regs[reg as usize]
    }

    fn set_ctx_reg(&mut self, ctx: ContextId, reg: u32, value: u32) {
        self.contexts.get_mut(ctx).regs[reg as usize] = value;
    }

    fn implement_exit(&mut self, ctx: ContextId) {
        let code = self.ctx_reg(ctx, REG_A0);

        if self.disassemble {
            let line = format!(
                "(exit): {} |- ->\n",
                self.format_register_hexadecimal(REG_A0)
            );
            self.console_print(&line);
        }

        self.contexts.get_mut(ctx).exit_code = code;

        if self.symbolic_mode {
            return;
        }

        info!(
            "{} exiting with exit code {} and {}KB mallocated memory",
            self.contexts.get(ctx).name,
            code as i32,
            (self.contexts.get(ctx).program_break - self.contexts.get(ctx).original_break) / 1024
        );
    }

    fn implement_read(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        let fd = self.ctx_reg(ctx, REG_A0);
        let mut vbuffer = self.ctx_reg(ctx, REG_A1);
        let mut size = self.ctx_reg(ctx, REG_A2);

        debug!(
            "trying to read {} bytes from file with descriptor {} into buffer at 0x{:x}",
            size, fd, vbuffer
        );

        let mut read_total: u32 = 0;
        let mut bytes_to_read: u32 = REGISTER_SIZE;

        let mut failed = false;

        while size > 0 {
            if is_valid_virtual_address(vbuffer)
                && self.contexts.get(ctx).is_virtual_address_mapped(vbuffer)
            {
                if size < bytes_to_read {
                    bytes_to_read = size;
                }

                let actually_read;

                if self.symbolic_mode {
                    if self.symbolic.is_trace_space_available() {
                        let value;
                        let lo;
                        let up;

                        if self.symbolic.rc > 0 {
                            // do not read but replay value and bounds
                            let rc = self.symbolic.rc as usize;

                            value = self.symbolic.read_values[rc];
                            lo = self.symbolic.read_los[rc];
                            up = self.symbolic.read_ups[rc];

                            actually_read = bytes_to_read;

                            self.symbolic.rc -= 1;
                        } else {
                            // the buffer word holds a trace counter; put the
                            // actual value back so a partial read only
                            // overwrites the bytes it delivers
                            let mrvc = self.load_virtual(ctx, vbuffer);

                            let current = self.load_symbolic_memory(vbuffer)?;
                            let actual = self.symbolic.trace[current as usize].value;

                            self.store_virtual(ctx, vbuffer, actual);

                            actually_read = self.host_read(ctx, fd, vbuffer, bytes_to_read);

                            value = self.load_virtual(ctx, vbuffer);

                            lo = self.symbolic.fuzz_lo(value);
                            up = self.symbolic.fuzz_up(value);

                            self.store_virtual(ctx, vbuffer, mrvc);
                        }

                        let trb = if self.symbolic.mrcc == 0 {
                            // no branching yet, symbolic memory may be overwritten
                            0
                        } else {
                            self.symbolic.tc
                        };

                        self.store_symbolic_memory(vbuffer, value, 0, lo, up, trb)?;
                    } else {
                        actually_read = 0;

                        self.throw_exception(Exception::MaxTrace, 0)?;
                    }
                } else {
                    actually_read = self.host_read(ctx, fd, vbuffer, bytes_to_read);
                }

                if actually_read == bytes_to_read {
                    read_total += actually_read;

                    size -= actually_read;

                    if size > 0 {
                        vbuffer += REGISTER_SIZE;
                    }
                } else {
                    read_total += actually_read;

                    size = 0;
                }
            } else {
                failed = true;

                size = 0;

                debug!("reading into virtual address 0x{:x} failed", vbuffer);
            }
        }

        let result = if failed { u32::MAX } else { read_total };

        self.set_ctx_reg(ctx, REG_A0, result);

        if self.symbolic_mode {
            self.symbolic.reg[REG_A0 as usize].typ = 0;
            self.symbolic.reg[REG_A0 as usize].lo = result;
            self.symbolic.reg[REG_A0 as usize].up = result;
        }

        self.contexts.get_mut(ctx).pc += INSTRUCTION_SIZE;

        debug!("actually read {} bytes from file with descriptor {}", read_total, fd);

        Ok(())
    }

    // read up to four bytes into the low end of the guest word at vbuffer
    fn host_read(&mut self, ctx: ContextId, fd: u32, vbuffer: u32, bytes_to_read: u32) -> u32 {
        let word = self.load_virtual(ctx, vbuffer);

        let mut bytes = word.to_le_bytes();

        let n = self.files.read(fd, &mut bytes[..bytes_to_read as usize]);

        self.store_virtual(ctx, vbuffer, u32::from_le_bytes(bytes));

        n as u32
    }

    fn implement_write(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        let fd = self.ctx_reg(ctx, REG_A0);
        let mut vbuffer = self.ctx_reg(ctx, REG_A1);
        let mut size = self.ctx_reg(ctx, REG_A2);

        debug!(
            "trying to write {} bytes from buffer at 0x{:x} into file with descriptor {}",
            size, vbuffer, fd
        );

        let mut written_total: u32 = 0;
        let mut bytes_to_write: u32 = REGISTER_SIZE;

        let mut failed = false;

        while size > 0 {
            if is_valid_virtual_address(vbuffer)
                && self.contexts.get(ctx).is_virtual_address_mapped(vbuffer)
            {
                if size < bytes_to_write {
                    bytes_to_write = size;
                }

                let actually_written = if self.symbolic_mode {
                    // the buffer holds trace counters, not data; report the
                    // write as done without emitting anything
                    bytes_to_write
                } else {
                    let word = self.load_virtual(ctx, vbuffer);
                    let bytes = word.to_le_bytes();

                    if fd == 1 {
                        self.console.write(&bytes[..bytes_to_write as usize]) as u32
                    } else {
                        self.files.write(fd, &bytes[..bytes_to_write as usize]) as u32
                    }
                };

                if actually_written == bytes_to_write {
                    written_total += actually_written;

                    size -= actually_written;

                    if size > 0 {
                        vbuffer += REGISTER_SIZE;
                    }
                } else {
                    written_total += actually_written;

                    size = 0;
                }
            } else {
                failed = true;

                size = 0;

                debug!("writing from virtual address 0x{:x} failed", vbuffer);
            }
        }

        let result = if failed { u32::MAX } else { written_total };

        self.set_ctx_reg(ctx, REG_A0, result);

        if self.symbolic_mode {
            self.symbolic.reg[REG_A0 as usize].typ = 0;
            self.symbolic.reg[REG_A0 as usize].lo = result;
            self.symbolic.reg[REG_A0 as usize].up = result;
        }

        self.contexts.get_mut(ctx).pc += INSTRUCTION_SIZE;

        debug!(
            "actually wrote {} bytes into file with descriptor {}",
            written_total, fd
        );

        Ok(())
    }

    // fetch a null-terminated filename word by word out of guest memory;
    // None if the string is unreachable or too long
    fn down_load_string(&mut self, ctx: ContextId, mut vaddr: u32) -> Result<Option<String>, RuntimeError> {
        let mut bytes = Vec::new();

        for _ in 0..MAX_FILENAME_LENGTH / REGISTER_SIZE {
            if !is_valid_virtual_address(vaddr)
                || !self.contexts.get(ctx).is_virtual_address_mapped(vaddr)
            {
                debug!("opening file with name at 0x{:x} failed", vaddr);

                return Ok(None);
            }

            let word = if self.symbolic_mode {
                let mrvc = self.load_symbolic_memory(vaddr)?;

                let entry = self.symbolic.trace[mrvc as usize];

                if crate::symbolic::is_symbolic_value(entry.typ, entry.lo, entry.up) {
                    return Err(RuntimeError::Symbolic(format!(
                        "detected symbolic value {} in filename of open call",
                        self.format_symbolic_memory(mrvc)
                    )));
                }

                entry.value
            } else {
                self.load_virtual(ctx, vaddr)
            };

            for byte in word.to_le_bytes() {
                if byte == 0 {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }

                bytes.push(byte);
            }

            vaddr += REGISTER_SIZE;
        }

        Ok(None)
    }

    fn implement_open(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        let vfilename = self.ctx_reg(ctx, REG_A0);
        let flags = self.ctx_reg(ctx, REG_A1);
        let mode = self.ctx_reg(ctx, REG_A2);

        let fd = match self.down_load_string(ctx, vfilename)? {
            Some(name) => {
                let fd = self.files.open(&name, flags, mode);

                debug!(
                    "opened file {} with flags 0x{:x} and mode 0o{:o} returning descriptor {}",
                    name, flags, mode, fd as i32
                );

                fd
            }
            None => u32::MAX,
        };

        self.set_ctx_reg(ctx, REG_A0, fd);

        if self.symbolic_mode {
            self.symbolic.reg[REG_A0 as usize].typ = 0;
            self.symbolic.reg[REG_A0 as usize].lo = fd;
            self.symbolic.reg[REG_A0 as usize].up = fd;
        }

        self.contexts.get_mut(ctx).pc += INSTRUCTION_SIZE;

        Ok(())
    }

    fn implement_brk(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        let mut program_break = self.ctx_reg(ctx, REG_A0);

        let previous_program_break = self.contexts.get(ctx).program_break;

        let valid = program_break >= previous_program_break
            && program_break < self.ctx_reg(ctx, REG_SP)
            && program_break % REGISTER_SIZE == 0;

        if valid {
            debug!("setting program break to 0x{:x}", program_break);

            self.contexts.get_mut(ctx).program_break = program_break;

            if self.symbolic_mode {
                let size = program_break - previous_program_break;

                // the interval is a memory range, not a symbolic value
                self.symbolic.reg[REG_A0 as usize].typ = 1;
                self.symbolic.reg[REG_A0 as usize].lo = previous_program_break;
                self.symbolic.reg[REG_A0 as usize].up = size;

                if self.symbolic.mrcc > 0 {
                    if self.symbolic.is_trace_space_available() {
                        // there has been branching, record brk under vaddr 0
                        let tc = self.symbolic.tc;

                        self.store_symbolic_memory(
                            0,
                            previous_program_break,
                            1,
                            previous_program_break,
                            size,
                            tc,
                        )?;
                    } else {
                        self.throw_exception(Exception::MaxTrace, 0)?;

                        return Ok(());
                    }
                }
            }
        } else {
            // error returns the current program break
            program_break = previous_program_break;

            debug!("retrieving current program break 0x{:x}", program_break);

            self.set_ctx_reg(ctx, REG_A0, program_break);

            if self.symbolic_mode {
                self.symbolic.reg[REG_A0 as usize].typ = 0;
                self.symbolic.reg[REG_A0 as usize].lo = 0;
                self.symbolic.reg[REG_A0 as usize].up = 0;
            }
        }

        self.contexts.get_mut(ctx).pc += INSTRUCTION_SIZE;

        Ok(())
    }

    // find or create the shadow of a virtual context on this machine level
    fn cache_context(&mut self, vctxt: u32) -> ContextId {
        match self.contexts.find(Some(self.current), vctxt) {
            Some(ctx) => ctx,
            None => self.contexts.create(Some(self.current), vctxt),
        }
    }

    pub(crate) fn do_switch(&mut self, to: ContextId, timeout: u32) {
        let from = self.current;

        self.restore_context(to);

        // restore machine state
        self.pc = self.contexts.get(to).pc;

        // REG_A1 instead of REG_A0 avoids racing with the timer interrupt
        let from_handle = match self.contexts.get(from).parent {
            Some(_) => self.contexts.get(from).vctxt,
            None => from as u32 + 1,
        };

        self.set_ctx_reg(to, REG_A1, from_handle);

        self.current = to;

        self.timer = timeout;

        debug!(
            "switched from context {} to context {} with timeout {}",
            from, to, timeout
        );
    }

    pub(crate) fn implement_switch(&mut self) -> Result<(), RuntimeError> {
        let vctxt = self.reg(REG_A0);
        let timeout = self.reg(REG_A1);

        self.save_context(self.current);

        // cache the context on this machine level before switching
        let to = self.cache_context(vctxt);

        self.do_switch(to, timeout);

        Ok(())
    }

    pub(crate) fn mipster_switch(
        &mut self,
        to: ContextId,
        timeout: u32,
    ) -> Result<ContextId, RuntimeError> {
        self.do_switch(to, timeout);

        self.run_until_exception()?;

        self.save_context(self.current);

        Ok(self.current)
    }

    // on this machine level switching is native
    pub(crate) fn hypster_switch(
        &mut self,
        to: ContextId,
        timeout: u32,
    ) -> Result<ContextId, RuntimeError> {
        self.mipster_switch(to, timeout)
    }

    pub(crate) fn save_context(&mut self, ctx: ContextId) {
        // save machine state
        let pc = self.pc;

        self.contexts.get_mut(ctx).pc = pc;

        if let Some(parent) = self.contexts.get(ctx).parent {
            let vctxt = self.contexts.get(ctx).vctxt;

            let pc = self.contexts.get(ctx).pc;
            self.store_virtual(parent, vctxt_program_counter(vctxt), pc);

            let vregs = self.load_virtual(parent, vctxt_regs(vctxt));

            for r in 0..NUMBER_OF_REGISTERS {
                let value = self.contexts.get(ctx).regs[r];

                self.store_virtual(
                    parent,
                    vregs.wrapping_add(r as u32 * REGISTER_SIZE),
                    value,
                );
            }

            let program_break = self.contexts.get(ctx).program_break;
            self.store_virtual(parent, vctxt_program_break(vctxt), program_break);

            let exception = self.contexts.get(ctx).exception.to_word();
            self.store_virtual(parent, vctxt_exception(vctxt), exception);

            let faulting_page = self.contexts.get(ctx).faulting_page;
            self.store_virtual(parent, vctxt_faulting_page(vctxt), faulting_page);

            let exit_code = self.contexts.get(ctx).exit_code;
            self.store_virtual(parent, vctxt_exit_code(vctxt), exit_code);
        }
    }

    pub(crate) fn restore_context(&mut self, ctx: ContextId) {
        if let Some(parent) = self.contexts.get(ctx).parent {
            let vctxt = self.contexts.get(ctx).vctxt;

            let pc = self.load_virtual(parent, vctxt_program_counter(vctxt));
            self.contexts.get_mut(ctx).pc = pc;

            let vregs = self.load_virtual(parent, vctxt_regs(vctxt));

            for r in 0..NUMBER_OF_REGISTERS {
                let value =
                    self.load_virtual(parent, vregs.wrapping_add(r as u32 * REGISTER_SIZE));

                self.contexts.get_mut(ctx).regs[r] = value;
            }

            let program_break = self.load_virtual(parent, vctxt_program_break(vctxt));
            self.contexts.get_mut(ctx).program_break = program_break;

            let exception = self.load_virtual(parent, vctxt_exception(vctxt));
            self.contexts.get_mut(ctx).exception = Exception::from_word(exception);

            let faulting_page = self.load_virtual(parent, vctxt_faulting_page(vctxt));
            self.contexts.get_mut(ctx).faulting_page = faulting_page;

            let exit_code = self.load_virtual(parent, vctxt_exit_code(vctxt));
            self.contexts.get_mut(ctx).exit_code = exit_code;

            // mirror the mapped frames one level up; the shadow table is
            // only mapped from the beginning up and from the end down
            let table = self.load_virtual(parent, vctxt_page_table(vctxt));

            let mut page = self.load_virtual(parent, vctxt_lo_page(vctxt));
            let me = self.load_virtual(parent, vctxt_me_page(vctxt));

            while page <= me {
                let frame_address = frame_address_for_page(table, page);

                if self.contexts.get(parent).is_virtual_address_mapped(frame_address) {
                    let frame = self.load_virtual(parent, frame_address);

                    let host_frame = self
                        .contexts
                        .get(parent)
                        .frame_for_page(page_of_virtual_address(frame));

                    self.contexts.get_mut(ctx).map_page(page, host_frame);
                }

                page += 1;
            }

            self.store_virtual(parent, vctxt_lo_page(vctxt), page);

            let mut page = self.load_virtual(parent, vctxt_hi_page(vctxt));

            loop {
                let frame_address = frame_address_for_page(table, page);

                let frame = if self
                    .contexts
                    .get(parent)
                    .is_virtual_address_mapped(frame_address)
                {
                    self.load_virtual(parent, frame_address)
                } else {
                    0
                };

                if frame == 0 {
                    break;
                }

                let host_frame = self
                    .contexts
                    .get(parent)
                    .frame_for_page(page_of_virtual_address(frame));

                self.contexts.get_mut(ctx).map_page(page, host_frame);

                page -= 1;
            }

            self.store_virtual(parent, vctxt_hi_page(vctxt), page);
        }
    }

    pub(crate) fn map_and_store(
        &mut self,
        ctx: ContextId,
        vaddr: u32,
        data: u32,
    ) -> Result<(), RuntimeError> {
        // assert: is_valid_virtual_address(vaddr)

        if !self.contexts.get(ctx).is_virtual_address_mapped(vaddr) {
            let frame = self.phys.palloc()?;

            self.contexts
                .get_mut(ctx)
                .map_page(page_of_virtual_address(vaddr), frame);
        }

        if self.symbolic_mode {
            if self.symbolic.is_trace_space_available() {
                // initialized memory is always tracked
                let tc = self.symbolic.tc;

                self.store_symbolic_memory(vaddr, data, 0, data, data, tc)
            } else {
                Err(RuntimeError::OutOfTraceMemory)
            }
        } else {
            self.store_virtual(ctx, vaddr, data);

            Ok(())
        }
    }

    pub fn up_load_binary(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        // assert: the entry point is a multiple of PAGE_SIZE and REGISTER_SIZE

        let entry_point = self.binary.entry_point;
        let binary_length = self.binary.binary_length;
        let code_length = self.binary.code_length;

        {
            let context = self.contexts.get_mut(ctx);

            context.pc = entry_point;
            context.lo_page = page_of_virtual_address(entry_point);
            context.me_page = page_of_virtual_address(entry_point);
            context.original_break = entry_point + binary_length;
            context.program_break = entry_point + binary_length;
        }

        let mut baddr = 0;

        if self.symbolic_mode {
            // code is never constrained ...
            self.symbolic_mode = false;

            while baddr < code_length {
                let data = self.binary.load_data(baddr);

                self.map_and_store(ctx, entry_point + baddr, data)?;

                baddr += REGISTER_SIZE;
            }

            // ... but data is
            self.symbolic_mode = true;
        }

        while baddr < binary_length {
            let data = self.binary.load_data(baddr);

            self.map_and_store(ctx, entry_point + baddr, data)?;

            baddr += REGISTER_SIZE;
        }

        let name = self.binary.name.clone();

        self.contexts.get_mut(ctx).name = name;

        Ok(())
    }

    fn up_load_string(&mut self, ctx: ContextId, s: &str, sp: u32) -> Result<u32, RuntimeError> {
        let bytes = round_up(s.len() as u32 + 1, REGISTER_SIZE);

        // allocate memory for storing the string
        let sp = sp - bytes;

        for (i, word) in string_to_words(s).into_iter().enumerate() {
            self.map_and_store(ctx, sp + i as u32 * REGISTER_SIZE, word)?;
        }

        Ok(sp)
    }

    pub fn up_load_arguments(
        &mut self,
        ctx: ContextId,
        argv: &[String],
    ) -> Result<(), RuntimeError> {
        /* upload arguments like a UNIX system

            SP
            |
            V
         | argc | argv[0] | ... | argv[n] | 0 | env[0] | ... | env[m] | 0 |

           with argc > 0, n == argc - 1, and m == 0 (the env is empty) */

        // the call stack grows top down
        let mut sp = VIRTUAL_MEMORY_SIZE;

        let argc = argv.len() as u32;

        let mut vargv = Vec::with_capacity(argv.len());

        // push the program parameters onto the stack
        for argument in argv {
            sp = self.up_load_string(ctx, argument, sp)?;

            vargv.push(sp);
        }

        // null value terminating the env table
        sp -= REGISTER_SIZE;
        self.map_and_store(ctx, sp, 0)?;

        // null value terminating the argv table
        sp -= REGISTER_SIZE;
        self.map_and_store(ctx, sp, 0)?;

        // the argv table itself
        for pointer in vargv.into_iter().rev() {
            sp -= REGISTER_SIZE;
            self.map_and_store(ctx, sp, pointer)?;
        }

        sp -= REGISTER_SIZE;
        self.map_and_store(ctx, sp, argc)?;

        self.set_ctx_reg(ctx, REG_SP, sp);

        // bound the stack pointer for symbolic execution
        if self.symbolic_mode {
            self.symbolic.reg[REG_SP as usize].typ = 0;
            self.symbolic.reg[REG_SP as usize].lo = sp;
            self.symbolic.reg[REG_SP as usize].up = sp;
        }

        Ok(())
    }

    fn handle_system_call(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        self.contexts.get_mut(ctx).exception = Exception::None;

        let a7 = self.ctx_reg(ctx, REG_A7);

        if a7 == SYSCALL_BRK {
            self.implement_brk(ctx)?;
        } else if a7 == SYSCALL_READ {
            self.implement_read(ctx)?;
        } else if a7 == SYSCALL_WRITE {
            self.implement_write(ctx)?;
        } else if a7 == SYSCALL_OPEN {
            self.implement_open(ctx)?;
        } else if a7 == SYSCALL_EXIT {
            self.implement_exit(ctx);

            // TODO: exit only if all contexts have exited
            return Ok(HandleResult::Exit);
        } else {
            self.console_print(&format!("unknown system call {}\n", a7));

            self.contexts.get_mut(ctx).exit_code = exitcode::UNKNOWNSYSCALL;

            return Ok(HandleResult::Exit);
        }

        if self.contexts.get(ctx).exception == Exception::MaxTrace {
            // exiting during symbolic execution, no exit code necessary
            self.contexts.get_mut(ctx).exception = Exception::None;

            Ok(HandleResult::Exit)
        } else {
            Ok(HandleResult::DoNotExit)
        }
    }

    fn handle_page_fault(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        self.contexts.get_mut(ctx).exception = Exception::None;

        let page = self.contexts.get(ctx).faulting_page;
        let frame = self.phys.palloc()?;

        // TODO: use this table to unmap and reuse frames
        self.contexts.get_mut(ctx).map_page(page, frame);

        Ok(HandleResult::DoNotExit)
    }

    fn handle_division_by_zero(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        self.contexts.get_mut(ctx).exception = Exception::None;

        if self.record {
            self.print_replay_banner("division by zero, replaying...");

            self.replay_trace()?;

            self.contexts.get_mut(ctx).exit_code = exitcode::NOERROR;
        } else {
            self.console_print("division by zero\n");

            self.contexts.get_mut(ctx).exit_code = exitcode::DIVISIONBYZERO;
        }

        Ok(HandleResult::Exit)
    }

    fn handle_max_trace(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        self.contexts.get_mut(ctx).exception = Exception::None;

        self.contexts.get_mut(ctx).exit_code = exitcode::OUTOFTRACEMEMORY;

        Ok(HandleResult::Exit)
    }

    fn handle_timer(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        self.contexts.get_mut(ctx).exception = Exception::None;

        // the scheduler seam: the caller reselects the next context
        Ok(HandleResult::DoNotExit)
    }

    fn handle_exception(&mut self, ctx: ContextId) -> Result<HandleResult, RuntimeError> {
        match self.contexts.get(ctx).exception {
            Exception::Syscall => self.handle_system_call(ctx),
            Exception::PageFault => self.handle_page_fault(ctx),
            Exception::DivisionByZero => self.handle_division_by_zero(ctx),
            Exception::MaxTrace => self.handle_max_trace(ctx),
            Exception::Timer => self.handle_timer(ctx),
            Exception::UnknownInstruction => {
                let message = format!(
                    "context {} throws unknown instruction exception\n",
                    self.contexts.get(ctx).name
                );
                self.console_print(&message);

                self.contexts.get_mut(ctx).exit_code = exitcode::UNKNOWNINSTRUCTION;

                Ok(HandleResult::Exit)
            }
            exception => {
                let message = format!(
                    "context {} throws uncaught {} exception\n",
                    self.contexts.get(ctx).name,
                    exception
                );
                self.console_print(&message);

                self.contexts.get_mut(ctx).exit_code = exitcode::UNCAUGHTEXCEPTION;

                Ok(HandleResult::Exit)
            }
        }
    }

    pub fn mipster(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        info!("mipster");

        let mut to = to;
        let mut timeout = TIMESLICE;

        loop {
            let from = self.mipster_switch(to, timeout)?;

            if let Some(parent) = self.contexts.get(from).parent {
                // the parent is in charge of handling exceptions
                to = parent;

                timeout = TIMEROFF;
            } else if self.handle_exception(from)? == HandleResult::Exit {
                return Ok(self.contexts.get(from).exit_code);
            } else {
                // a round-robin over the used contexts would go here
                to = from;

                timeout = TIMESLICE;
            }
        }
    }

    pub fn hypster(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        info!("hypster");

        let mut to = to;

        loop {
            let from = self.hypster_switch(to, TIMESLICE)?;

            if self.handle_exception(from)? == HandleResult::Exit {
                return Ok(self.contexts.get(from).exit_code);
            }

            to = from;
        }
    }

    pub fn mixter(&mut self, to: ContextId, mix: u32) -> Result<u32, RuntimeError> {
        // works with mipsters and hypsters in a configured ratio
        info!("mixter ({}% mipster/{}% hypster)", mix, 100 - mix);

        let mslice = (TIMESLICE as u64 * mix as u64 / 100) as u32;

        let mut native = mslice > 0;
        let mut timeout = if native { mslice } else { TIMESLICE };

        let mut to = to;

        loop {
            let from = if native {
                self.mipster_switch(to, timeout)?
            } else {
                self.hypster_switch(to, timeout)?
            };

            if let Some(parent) = self.contexts.get(from).parent {
                to = parent;

                timeout = TIMEROFF;
            } else if self.handle_exception(from)? == HandleResult::Exit {
                return Ok(self.contexts.get(from).exit_code);
            } else {
                to = from;

                if native {
                    if mslice != TIMESLICE {
                        native = false;

                        timeout = TIMESLICE - mslice;
                    }
                } else if mslice > 0 {
                    native = true;

                    timeout = mslice;
                }
            }
        }
    }

    fn minmob(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        let mut to = to;
        let mut timeout = TIMESLICE;

        loop {
            let from = self.mipster_switch(to, timeout)?;

            if let Some(parent) = self.contexts.get(from).parent {
                to = parent;

                timeout = TIMEROFF;
            } else {
                // minster and mobster refuse to handle page faults
                if self.contexts.get(from).exception == Exception::PageFault {
                    let message = format!(
                        "context {} throws uncaught {} exception\n",
                        self.contexts.get(from).name,
                        Exception::PageFault
                    );
                    self.console_print(&message);

                    return Ok(exitcode::UNCAUGHTEXCEPTION);
                } else if self.handle_exception(from)? == HandleResult::Exit {
                    return Ok(self.contexts.get(from).exit_code);
                }

                to = from;

                timeout = TIMESLICE;
            }
        }
    }

    fn map_unmapped_pages(&mut self, ctx: ContextId) -> Result<(), RuntimeError> {
        // assert: the page table is only mapped from the beginning up

        let mut page = self.contexts.get(ctx).lo_page;

        while self.contexts.get(ctx).is_page_mapped(page) {
            page += 1;
        }

        while self.phys.available() {
            let frame = self.phys.palloc()?;

            self.contexts.get_mut(ctx).map_page(page, frame);

            page += 1;
        }

        Ok(())
    }

    pub fn minster(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        info!("minster");

        // pre-map all physically available pages so virtual behaves like
        // physical memory; CAUTION: consumes memory even when not accessed
        self.map_unmapped_pages(to)?;

        self.minmob(to)
    }

    pub fn mobster(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        info!("mobster");

        // page faults are left to a higher-level machine
        self.minmob(to)
    }

    pub fn monster(&mut self, to: ContextId) -> Result<u32, RuntimeError> {
        info!("monster");

        let mut b: u64 = 0;

        let mut to = to;
        let mut timeout = TIMESLICE;

        loop {
            let from = self.mipster_switch(to, timeout)?;

            if let Some(parent) = self.contexts.get(from).parent {
                to = parent;

                timeout = TIMEROFF;
            } else {
                if self.handle_exception(from)? == HandleResult::Exit {
                    self.backtrack_trace()?;

                    if b == 0 {
                        self.console_print("backtracking ");
                    } else {
                        // overwrite the previous count in place
                        let digits = b.to_string().len();

                        for _ in 0..digits {
                            self.console_print("\u{8}");
                        }
                    }

                    b += 1;

                    self.console_print(&b.to_string());

                    if self.pc == 0 {
                        self.console_print("\n");

                        return Ok(exitcode::NOERROR);
                    }
                }

                to = from;

                timeout = TIMESLICE;
            }
        }
    }
}
