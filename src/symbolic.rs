// Symbolic execution overlay: registers carry intervals and at most one
// linear constraint on a memory word; every speculative write goes through
// an append-only trace whose per-word most recent entry is referenced from
// the page table slot. Comparisons split into cases, exits backtrack through
// the trace.

use crate::bits::INSTRUCTION_SIZE;
use crate::instructions::{register_name, NUMBER_OF_REGISTERS, REG_FP, REG_SP, REG_ZR};
use crate::memory::page_of_virtual_address;
use crate::processor::{Exception, Machine};
use crate::RuntimeError;
use log::debug;

pub const MAX_TRACE_LENGTH: u32 = 100000;

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEntry {
    pub pc: u32,
    pub tc: u32, // trace counter of the previous value at the same location
    pub value: u32,
    pub typ: u32, // 0 is integer interval, 1 is memory range
    pub lo: u32,
    pub up: u32,
    pub vaddr: u32, // 0 records brk, below 32 a register, otherwise memory
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegState {
    pub typ: u32, // 0 is integer interval, 1 is memory range
    pub lo: u32,
    pub up: u32,

    // at most one tracked linear constraint: the register holds the value
    // of the memory word at vaddr plus the offset interval colo..coup, or
    // colo..coup minus that value if hasmn is set
    pub hasco: u32,
    pub vaddr: u32,
    pub hasmn: u32,
    pub colo: u32,
    pub coup: u32,
}

pub struct SymbolicState {
    pub trace: Vec<TraceEntry>,
    pub tc: u32,

    pub reg: [RegState; NUMBER_OF_REGISTERS],

    // trace counter of the most recent constraint (the last decision point)
    pub mrcc: u32,

    // read history replayed while re-exploring after a backtrack
    pub rc: u32,
    pub read_values: Vec<u32>,
    pub read_los: Vec<u32>,
    pub read_ups: Vec<u32>,

    // power-of-two widening of read values into input intervals
    pub fuzz: u32,
}

impl SymbolicState {
    pub fn inactive() -> SymbolicState {
        SymbolicState {
            trace: Vec::new(),
            tc: 0,
            reg: [RegState::default(); NUMBER_OF_REGISTERS],
            mrcc: 0,
            rc: 0,
            read_values: Vec::new(),
            read_los: Vec::new(),
            read_ups: Vec::new(),
            fuzz: 0,
        }
    }

    pub fn activate(fuzz: u32) -> SymbolicState {
        SymbolicState {
            trace: vec![TraceEntry::default(); MAX_TRACE_LENGTH as usize],
            tc: 0,
            reg: [RegState::default(); NUMBER_OF_REGISTERS],
            mrcc: 0,
            rc: 0,
            read_values: vec![0; MAX_TRACE_LENGTH as usize],
            read_los: vec![0; MAX_TRACE_LENGTH as usize],
            read_ups: vec![0; MAX_TRACE_LENGTH as usize],
            fuzz,
        }
    }

    pub fn is_trace_space_available(&self) -> bool {
        self.tc + 1 < MAX_TRACE_LENGTH
    }

    fn ealloc(&mut self) {
        self.tc += 1;
    }

    fn efree(&mut self) {
        // assert: tc > 0
        self.tc -= 1;
    }

    pub fn fuzz_lo(&self, value: u32) -> u32 {
        if self.fuzz >= 32 {
            0
        } else if value > ((1u32 << self.fuzz) - 1) / 2 {
            value - ((1u32 << self.fuzz) - 1) / 2
        } else {
            0
        }
    }

    pub fn fuzz_up(&self, value: u32) -> u32 {
        if self.fuzz >= 32 {
            u32::MAX
        } else if u32::MAX - value < (1u32 << self.fuzz) / 2 {
            u32::MAX
        } else if value > ((1u32 << self.fuzz) - 1) / 2 {
            value + (1u32 << self.fuzz) / 2
        } else {
            (1u32 << self.fuzz).wrapping_sub(1)
        }
    }
}

// there are 2^32 values if the result is 0
fn cardinality(lo: u32, up: u32) -> u32 {
    up.wrapping_sub(lo).wrapping_add(1)
}

fn combined_cardinality(lo1: u32, up1: u32, lo2: u32, up2: u32) -> u32 {
    let c1 = cardinality(lo1, up1);
    let c2 = cardinality(lo2, up2);

    if c1.wrapping_add(c2) <= c1 {
        // at least 2^32 values
        0
    } else if c1.wrapping_add(c2) <= c2 {
        0
    } else {
        c1 + c2
    }
}

pub fn is_symbolic_value(typ: u32, lo: u32, up: u32) -> bool {
    if typ != 0 {
        // memory range
        false
    } else {
        // non-singleton interval
        lo != up
    }
}

impl Machine {
    fn code_context(&self) -> String {
        format!(
            "0x{:x}{}",
            self.pc,
            self.code_line_suffix(self.pc.wrapping_sub(self.binary.entry_point))
        )
    }

    pub(crate) fn format_symbolic_memory(&self, svc: u32) -> String {
        let entry = self.symbolic.trace[svc as usize];

        let mut text = format!("@{}{{@{}@0x{:x}", svc, entry.tc, entry.pc);

        if entry.pc >= self.binary.entry_point {
            text.push_str(&self.code_line_suffix(entry.pc - self.binary.entry_point));
        }

        if entry.vaddr == 0 {
            text.push_str(&format!(
                ";0x{:x}=0x{:x}=malloc({})}}",
                entry.value, entry.lo, entry.up
            ));

            return text;
        } else if entry.vaddr < NUMBER_OF_REGISTERS as u32 {
            text.push_str(&format!(";{}={}", register_name(entry.vaddr), entry.value));
        } else {
            text.push_str(&format!(";0x{:x}={}", entry.vaddr, entry.value));
        }

        if entry.typ != 0 {
            if entry.lo == entry.up {
                text.push_str(&format!("({})}}", entry.lo));
            } else {
                text.push_str(&format!("({},{})}}", entry.lo, entry.up));
            }
        } else if entry.lo == entry.up {
            text.push_str(&format!("[{}]}}", entry.lo));
        } else {
            text.push_str(&format!("[{},{}]}}", entry.lo, entry.up));
        }

        text
    }

    // loads and stores through a malloc-returned pointer must stay inside
    // the block; concrete pointers pass, symbolic pointers are a design
    // violation
    fn is_safe_address(&self, vaddr: u32, reg: u32) -> Result<bool, RuntimeError> {
        let r = self.symbolic.reg[reg as usize];

        if r.typ != 0 {
            if vaddr < r.lo {
                // access below the start address of the mallocated block
                Ok(false)
            } else if vaddr - r.lo >= r.up {
                // access above the end address of the mallocated block
                Ok(false)
            } else {
                Ok(true)
            }
        } else if r.lo == r.up {
            Ok(true)
        } else {
            Err(RuntimeError::Symbolic(format!(
                "detected unsupported symbolic access of memory interval at {}",
                self.code_context()
            )))
        }
    }

    pub(crate) fn load_symbolic_memory(&self, vaddr: u32) -> Result<u32, RuntimeError> {
        // assert: vaddr is valid and mapped
        let mrvc = self.load_virtual(self.current, vaddr);

        if mrvc <= self.symbolic.tc {
            Ok(mrvc)
        } else {
            Err(RuntimeError::Symbolic(format!(
                "detected most recent value counter {} at vaddr 0x{:x} greater than current trace counter {}",
                mrvc, vaddr, self.symbolic.tc
            )))
        }
    }

    pub(crate) fn store_symbolic_memory(
        &mut self,
        vaddr: u32,
        value: u32,
        typ: u32,
        lo: u32,
        up: u32,
        trb: u32,
    ) -> Result<(), RuntimeError> {
        let mrvc = if vaddr == 0 {
            // tracking the program break and size for malloc
            0
        } else if vaddr < NUMBER_OF_REGISTERS as u32 {
            // tracking a register value for sltu
            self.symbolic.mrcc
        } else {
            // assert: vaddr is valid and mapped
            let mrvc = self.load_symbolic_memory(vaddr)?;

            let entry = self.symbolic.trace[mrvc as usize];

            if value == entry.value && typ == entry.typ && lo == entry.lo && up == entry.up {
                // prevent tracking identical updates
                return Ok(());
            }

            mrvc
        };

        if trb < mrvc {
            // the current value at vaddr does not need to be tracked,
            // just overwrite it in the trace
            let entry = &mut self.symbolic.trace[mrvc as usize];

            entry.value = value;
            entry.typ = typ;
            entry.lo = lo;
            entry.up = up;

            // assert: entry.vaddr == vaddr

            debug!("overwriting {}", self.format_symbolic_memory(mrvc));
        } else if self.symbolic.is_trace_space_available() {
            // the current value at vaddr is from before the most recent
            // branch, track it by creating a new trace event
            self.symbolic.ealloc();

            let tc = self.symbolic.tc;

            self.symbolic.trace[tc as usize] = TraceEntry {
                pc: self.pc,
                tc: mrvc,
                value,
                typ,
                lo,
                up,
                vaddr,
            };

            if vaddr < NUMBER_OF_REGISTERS as u32 {
                if vaddr > 0 {
                    // register tracking marks the most recent constraint
                    self.symbolic.mrcc = tc;
                }
            } else {
                // assert: vaddr is valid and mapped
                self.store_virtual(self.current, vaddr, tc);
            }

            debug!("storing {}", self.format_symbolic_memory(tc));
        } else {
            self.throw_exception(Exception::MaxTrace, 0)?;
        }

        Ok(())
    }

    fn store_constrained_memory(
        &mut self,
        vaddr: u32,
        lo: u32,
        up: u32,
        trb: u32,
    ) -> Result<(), RuntimeError> {
        if vaddr >= self.contexts.get(self.current).program_break
            && vaddr < self.reg(REG_SP)
        {
            // do not constrain free memory
            return Ok(());
        }

        let mrvc = self.load_virtual(self.current, vaddr);

        if mrvc < trb {
            // potentially aliased constrained memory is not supported
            return Err(RuntimeError::Symbolic(String::from(
                "detected potentially aliased constrained memory",
            )));
        }

        // always track constrained memory by using tc as the most recent branch
        let tc = self.symbolic.tc;

        self.store_symbolic_memory(vaddr, lo, 0, lo, up, tc)
    }

    fn store_register_memory(&mut self, reg: u32, value: u32) -> Result<(), RuntimeError> {
        // always track register memory by using tc as the most recent branch
        let tc = self.symbolic.tc;

        self.store_symbolic_memory(reg, value, 0, value, value, tc)
    }

    fn constrain_memory(
        &mut self,
        reg: u32,
        lo: u32,
        up: u32,
        trb: u32,
    ) -> Result<(), RuntimeError> {
        let r = self.symbolic.reg[reg as usize];

        if r.hasco != 0 {
            if r.hasmn != 0 {
                self.store_constrained_memory(
                    r.vaddr,
                    r.colo.wrapping_sub(lo),
                    r.coup.wrapping_sub(up),
                    trb,
                )
            } else {
                self.store_constrained_memory(
                    r.vaddr,
                    lo.wrapping_sub(r.colo),
                    up.wrapping_sub(r.coup),
                    trb,
                )
            }
        } else {
            Ok(())
        }
    }

    fn set_constraint(&mut self, reg: u32, hasco: u32, vaddr: u32, hasmn: u32, colo: u32, coup: u32) {
        let r = &mut self.symbolic.reg[reg as usize];

        r.hasco = hasco;
        r.vaddr = vaddr;
        r.hasmn = hasmn;
        r.colo = colo;
        r.coup = coup;
    }

    fn set_interval(&mut self, reg: u32, typ: u32, lo: u32, up: u32) {
        let r = &mut self.symbolic.reg[reg as usize];

        r.typ = typ;
        r.lo = lo;
        r.up = up;
    }

    pub(crate) fn constrain_lui(&mut self, rd: u32, imm: i32) {
        if rd != REG_ZR {
            self.set_interval(rd, 0, (imm as u32) << 12, (imm as u32) << 12);

            // rd has no constraint
            self.set_constraint(rd, 0, 0, 0, 0, 0);
        }
    }

    pub(crate) fn constrain_addi(&mut self, rd: u32, rs1: u32, imm: i32) -> Result<(), RuntimeError> {
        if rd == REG_ZR {
            return Ok(());
        }

        let r1 = self.symbolic.reg[rs1 as usize];

        if r1.typ != 0 {
            self.set_interval(rd, r1.typ, r1.lo, r1.up);

            // rd has no constraint if rs1 is a memory range
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            return Ok(());
        }

        self.set_interval(
            rd,
            0,
            r1.lo.wrapping_add(imm as u32),
            r1.up.wrapping_add(imm as u32),
        );

        if r1.hasco != 0 {
            if r1.hasmn != 0 {
                // the constraint already has a minuend and cannot take an addend
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in operand of addi at {}",
                    self.code_context()
                )))
            } else {
                // rd inherits the rs1 constraint
                self.set_constraint(
                    rd,
                    r1.hasco,
                    r1.vaddr,
                    0,
                    r1.colo.wrapping_add(imm as u32),
                    r1.coup.wrapping_add(imm as u32),
                );

                Ok(())
            }
        } else {
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            Ok(())
        }
    }

    pub(crate) fn constrain_add(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if rd == REG_ZR {
            return Ok(());
        }

        let r1 = self.symbolic.reg[rs1 as usize];
        let r2 = self.symbolic.reg[rs2 as usize];

        if r1.typ != 0 {
            if r2.typ != 0 {
                // adding two pointers is undefined
                return Err(RuntimeError::Symbolic(format!(
                    "undefined addition of two pointers at {}",
                    self.code_context()
                )));
            }

            self.set_interval(rd, r1.typ, r1.lo, r1.up);
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            return Ok(());
        } else if r2.typ != 0 {
            self.set_interval(rd, r2.typ, r2.lo, r2.up);
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            return Ok(());
        }

        // interval semantics of add with overflow widening to the full range
        if combined_cardinality(r1.lo, r1.up, r2.lo, r2.up) == 0 {
            self.set_interval(rd, 0, 0, u32::MAX);
        } else {
            self.set_interval(rd, 0, r1.lo.wrapping_add(r2.lo), r1.up.wrapping_add(r2.up));
        }

        if r1.hasco != 0 {
            if r2.hasco != 0 {
                // more than one constraint cannot be tracked for add but
                // their earlier presence must taint later comparisons
                self.set_constraint(rd, r1.hasco + r2.hasco, 0, 0, 0, 0);

                Ok(())
            } else if r1.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in left operand of add at {}",
                    self.code_context()
                )))
            } else {
                // rd inherits the rs1 constraint since rs2 has none
                self.set_constraint(
                    rd,
                    r1.hasco,
                    r1.vaddr,
                    0,
                    r1.colo.wrapping_add(r2.lo),
                    r1.coup.wrapping_add(r2.up),
                );

                Ok(())
            }
        } else if r2.hasco != 0 {
            if r2.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in right operand of add at {}",
                    self.code_context()
                )))
            } else {
                // rd inherits the rs2 constraint since rs1 has none
                self.set_constraint(
                    rd,
                    r2.hasco,
                    r2.vaddr,
                    0,
                    r1.lo.wrapping_add(r2.colo),
                    r1.up.wrapping_add(r2.coup),
                );

                Ok(())
            }
        } else {
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            Ok(())
        }
    }

    pub(crate) fn constrain_sub(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if rd == REG_ZR {
            return Ok(());
        }

        let r1 = self.symbolic.reg[rs1 as usize];
        let r2 = self.symbolic.reg[rs2 as usize];

        if r1.typ != 0 {
            if r2.typ != 0 {
                if r1.lo == r2.lo && r1.up == r2.up {
                    // pointer difference within the same block is concrete
                    let value = self.reg(rd);

                    self.set_interval(rd, 0, value, value);
                    self.set_constraint(rd, 0, 0, 0, 0, 0);

                    return Ok(());
                }

                // subtracting incompatible pointers
                self.throw_exception(Exception::InvalidAddress, 0)?;

                return Ok(());
            } else {
                self.set_interval(rd, r1.typ, r1.lo, r1.up);
                self.set_constraint(rd, 0, 0, 0, 0, 0);

                return Ok(());
            }
        } else if r2.typ != 0 {
            self.set_interval(rd, r2.typ, r2.lo, r2.up);
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            return Ok(());
        }

        if combined_cardinality(r1.lo, r1.up, r2.lo, r2.up) == 0 {
            self.set_interval(rd, 0, 0, u32::MAX);
        } else {
            self.set_interval(rd, 0, r1.lo.wrapping_sub(r2.up), r1.up.wrapping_sub(r2.lo));
        }

        if r1.hasco != 0 {
            if r2.hasco != 0 {
                self.set_constraint(rd, r1.hasco + r2.hasco, 0, 0, 0, 0);

                Ok(())
            } else if r1.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in left operand of sub at {}",
                    self.code_context()
                )))
            } else {
                self.set_constraint(
                    rd,
                    r1.hasco,
                    r1.vaddr,
                    0,
                    r1.colo.wrapping_sub(r2.up),
                    r1.coup.wrapping_sub(r2.lo),
                );

                Ok(())
            }
        } else if r2.hasco != 0 {
            if r2.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in right operand of sub at {}",
                    self.code_context()
                )))
            } else {
                // the subtrahend constraint turns rd into a minuend
                self.set_constraint(
                    rd,
                    r2.hasco,
                    r2.vaddr,
                    1,
                    r1.lo.wrapping_sub(r2.coup),
                    r1.up.wrapping_sub(r2.colo),
                );

                Ok(())
            }
        } else {
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            Ok(())
        }
    }

    pub(crate) fn constrain_mul(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if rd == REG_ZR {
            return Ok(());
        }

        let r1 = self.symbolic.reg[rs1 as usize];
        let r2 = self.symbolic.reg[rs2 as usize];

        self.set_interval(rd, 0, r1.lo.wrapping_mul(r2.lo), r1.up.wrapping_mul(r2.up));

        if r1.hasco != 0 {
            if r2.hasco != 0 {
                // non-linear expressions are not supported
                Err(RuntimeError::Symbolic(format!(
                    "detected non-linear expression in mul at {}",
                    self.code_context()
                )))
            } else if r1.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in left operand of mul at {}",
                    self.code_context()
                )))
            } else {
                // assert: the rs2 interval is a singleton
                self.set_constraint(
                    rd,
                    r1.hasco,
                    r1.vaddr,
                    0,
                    r1.colo.wrapping_add(r1.lo.wrapping_mul(r2.lo.wrapping_sub(1))),
                    r1.coup.wrapping_add(r1.up.wrapping_mul(r2.up.wrapping_sub(1))),
                );

                Ok(())
            }
        } else if r2.hasco != 0 {
            if r2.hasmn != 0 {
                Err(RuntimeError::Symbolic(format!(
                    "detected invalid minuend expression in right operand of mul at {}",
                    self.code_context()
                )))
            } else {
                // assert: the rs1 interval is a singleton
                self.set_constraint(
                    rd,
                    r2.hasco,
                    r2.vaddr,
                    0,
                    r1.lo.wrapping_sub(1).wrapping_mul(r2.lo).wrapping_add(r2.colo),
                    r1.up.wrapping_sub(1).wrapping_mul(r2.up).wrapping_add(r2.coup),
                );

                Ok(())
            }
        } else {
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            Ok(())
        }
    }

    pub(crate) fn constrain_divu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        let r1 = self.symbolic.reg[rs1 as usize];
        let r2 = self.symbolic.reg[rs2 as usize];

        if r2.lo != 0 {
            if r2.up >= r2.lo {
                // 0 is not in the divisor interval
                if rd != REG_ZR {
                    self.set_interval(rd, 0, r1.lo / r2.lo, r1.up / r2.up);

                    if r1.hasco != 0 {
                        if r2.hasco != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected non-linear expression in divu at {}",
                                self.code_context()
                            )));
                        } else if r1.hasmn != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected invalid minuend expression in left operand of divu at {}",
                                self.code_context()
                            )));
                        } else {
                            // assert: the rs2 interval is a singleton
                            self.set_constraint(
                                rd,
                                r1.hasco,
                                r1.vaddr,
                                0,
                                r1.colo.wrapping_sub(r1.lo.wrapping_sub(r1.lo / r2.lo)),
                                r1.coup.wrapping_sub(r1.up.wrapping_sub(r1.up / r2.up)),
                            );
                        }
                    } else if r2.hasco != 0 {
                        if r2.hasmn != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected invalid minuend expression in right operand of divu at {}",
                                self.code_context()
                            )));
                        } else {
                            // assert: the rs1 interval is a singleton
                            self.set_constraint(
                                rd,
                                r2.hasco,
                                r2.vaddr,
                                0,
                                r2.colo.wrapping_sub(r2.lo.wrapping_sub(r1.lo / r2.lo)),
                                r2.coup.wrapping_sub(r2.up.wrapping_sub(r1.up / r2.up)),
                            );
                        }
                    } else {
                        self.set_constraint(rd, 0, 0, 0, 0, 0);
                    }
                }

                Ok(())
            } else {
                // the wrapped divisor interval contains 0
                self.throw_exception(Exception::DivisionByZero, 0)
            }
        } else {
            Ok(())
        }
    }

    pub(crate) fn constrain_remu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        let r1 = self.symbolic.reg[rs1 as usize];
        let r2 = self.symbolic.reg[rs2 as usize];

        if r2.lo != 0 {
            if r2.up >= r2.lo {
                // 0 is not in the divisor interval
                if rd != REG_ZR {
                    self.set_interval(rd, 0, r1.lo % r2.lo, r1.up % r2.up);

                    if r1.hasco != 0 {
                        if r2.hasco != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected non-linear expression in remu at {}",
                                self.code_context()
                            )));
                        } else if r1.hasmn != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected invalid minuend expression in left operand of remu at {}",
                                self.code_context()
                            )));
                        } else {
                            // assert: the rs2 interval is a singleton
                            self.set_constraint(
                                rd,
                                r1.hasco,
                                r1.vaddr,
                                0,
                                r1.colo.wrapping_sub(r1.lo.wrapping_sub(r1.lo % r2.lo)),
                                r1.coup.wrapping_sub(r1.up.wrapping_sub(r1.up % r2.up)),
                            );
                        }
                    } else if r2.hasco != 0 {
                        if r2.hasmn != 0 {
                            return Err(RuntimeError::Symbolic(format!(
                                "detected invalid minuend expression in right operand of remu at {}",
                                self.code_context()
                            )));
                        } else {
                            // assert: the rs1 interval is a singleton
                            self.set_constraint(
                                rd,
                                r2.hasco,
                                r2.vaddr,
                                0,
                                r2.colo.wrapping_sub(r2.lo.wrapping_sub(r1.lo % r2.lo)),
                                r2.coup.wrapping_sub(r2.up.wrapping_sub(r1.up % r2.up)),
                            );
                        }
                    } else {
                        self.set_constraint(rd, 0, 0, 0, 0, 0);
                    }
                }

                Ok(())
            } else {
                self.throw_exception(Exception::DivisionByZero, 0)
            }
        } else {
            Ok(())
        }
    }

    pub(crate) fn constrain_sltu(&mut self, rd: u32, rs1: u32, rs2: u32) -> Result<(), RuntimeError> {
        if rd != REG_ZR {
            let r1 = self.symbolic.reg[rs1 as usize];
            let r2 = self.symbolic.reg[rs2 as usize];

            if r1.hasco != 0 && r1.vaddr == 0 {
                // constrained memory at vaddr 0 means more than one
                // constrained memory location is behind the operand
                return Err(RuntimeError::Symbolic(format!(
                    "{} constrained memory locations in left sltu operand at {}",
                    r1.hasco,
                    self.code_context()
                )));
            }

            if r2.hasco != 0 && r2.vaddr == 0 {
                return Err(RuntimeError::Symbolic(format!(
                    "{} constrained memory locations in right sltu operand at {}",
                    r2.hasco,
                    self.code_context()
                )));
            }

            // a local copy of mrcc so the alias check sees the old value
            let trb = self.symbolic.mrcc;

            let (lo1, up1) = if r1.typ != 0 {
                (self.reg(rs1), self.reg(rs1))
            } else {
                (r1.lo, r1.up)
            };

            let (lo2, up2) = if r2.typ != 0 {
                (self.reg(rs2), self.reg(rs2))
            } else {
                (r2.lo, r2.up)
            };

            self.create_constraints(rd, rs1, rs2, lo1, up1, lo2, up2, trb, 0)?;
        }

        self.pc += INSTRUCTION_SIZE;

        self.profile.ic_sltu += 1;

        Ok(())
    }

    fn take_branch(&mut self, rd: u32, b: u32, how_many_more: u32) -> Result<(), RuntimeError> {
        if how_many_more > 0 {
            // record that rd must be set to b when this case is resumed
            self.store_register_memory(rd, b)?;

            // record frame and stack pointer so they roll back too
            let fp = self.reg(REG_FP);
            let sp = self.reg(REG_SP);

            self.store_register_memory(REG_FP, fp)?;
            self.store_register_memory(REG_SP, sp)?;

            Ok(())
        } else {
            self.set_reg(rd, b);

            self.set_interval(rd, 0, b, b);
            self.set_constraint(rd, 0, 0, 0, 0, 0);

            Ok(())
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_constraints(
        &mut self,
        rd: u32,
        rs1: u32,
        rs2: u32,
        lo1: u32,
        up1: u32,
        lo2: u32,
        up2: u32,
        trb: u32,
        how_many_more: u32,
    ) -> Result<(), RuntimeError> {
        if lo1 <= up1 {
            if lo2 <= up2 {
                // neither interval is wrapped around
                if up1 < lo2 {
                    // the rs1 interval is strictly less than the rs2 interval
                    self.constrain_memory(rs1, lo1, up1, trb)?;
                    self.constrain_memory(rs2, lo2, up2, trb)?;

                    self.take_branch(rd, 1, how_many_more)
                } else if up2 <= lo1 {
                    // the rs2 interval is less than or equal to the rs1 interval
                    self.constrain_memory(rs1, lo1, up1, trb)?;
                    self.constrain_memory(rs2, lo2, up2, trb)?;

                    self.take_branch(rd, 0, how_many_more)
                } else if lo2 == up2 {
                    // the rs2 interval is a singleton

                    // construct the constraint for the false case
                    self.constrain_memory(rs1, lo2, up1, trb)?;
                    self.constrain_memory(rs2, lo2, up2, trb)?;

                    // record that rd is false in that case
                    self.store_register_memory(rd, 0)?;

                    let fp = self.reg(REG_FP);
                    let sp = self.reg(REG_SP);

                    self.store_register_memory(REG_FP, fp)?;
                    self.store_register_memory(REG_SP, sp)?;

                    // construct the constraint for the true case
                    self.constrain_memory(rs1, lo1, lo2.wrapping_sub(1), trb)?;
                    self.constrain_memory(rs2, lo2, up2, trb)?;

                    self.take_branch(rd, 1, how_many_more)
                } else if lo1 == up1 {
                    // the rs1 interval is a singleton

                    // construct the constraint for the false case
                    self.constrain_memory(rs1, lo1, up1, trb)?;
                    self.constrain_memory(rs2, lo2, lo1, trb)?;

                    self.store_register_memory(rd, 0)?;

                    let fp = self.reg(REG_FP);
                    let sp = self.reg(REG_SP);

                    self.store_register_memory(REG_FP, fp)?;
                    self.store_register_memory(REG_SP, sp)?;

                    // construct the constraint for the true case
                    self.constrain_memory(rs1, lo1, up1, trb)?;
                    self.constrain_memory(rs2, lo1.wrapping_add(1), up2, trb)?;

                    self.take_branch(rd, 1, how_many_more)
                } else {
                    // non-singleton interval intersections have no witness
                    Err(RuntimeError::Symbolic(String::from(
                        "detected non-singleton interval intersection",
                    )))
                }
            } else {
                // the rs2 interval is wrapped around but rs1 is not

                // unwrap rs2 and use the higher portion first
                self.create_constraints(rd, rs1, rs2, lo1, up1, lo2, u32::MAX, trb, 1)?;

                // then use the lower portion of rs2
                self.create_constraints(rd, rs1, rs2, lo1, up1, 0, up2, trb, 0)
            }
        } else if lo2 <= up2 {
            // the rs1 interval is wrapped around but rs2 is not
            self.create_constraints(rd, rs1, rs2, lo1, u32::MAX, lo2, up2, trb, 1)?;
            self.create_constraints(rd, rs1, rs2, 0, up1, lo2, up2, trb, 0)
        } else {
            // both intervals are wrapped around, up to four rectangles

            self.create_constraints(rd, rs1, rs2, lo1, u32::MAX, lo2, u32::MAX, trb, 3)?;
            self.create_constraints(rd, rs1, rs2, lo1, u32::MAX, 0, up2, trb, 2)?;
            self.create_constraints(rd, rs1, rs2, 0, up1, 0, up2, trb, 1)?;
            self.create_constraints(rd, rs1, rs2, 0, up1, lo2, u32::MAX, trb, 0)
        }
    }

    pub(crate) fn constrain_lw(&mut self, rd: u32, rs1: u32, imm: i32) -> Result<u32, RuntimeError> {
        let vaddr = self.reg(rs1).wrapping_add(imm as u32);

        if self.is_safe_address(vaddr, rs1)? {
            if self.contexts.get(self.current).is_virtual_address_mapped(vaddr) {
                if rd != REG_ZR {
                    let mrvc = self.load_symbolic_memory(vaddr)?;

                    let entry = self.symbolic.trace[mrvc as usize];

                    // interval semantics of lw
                    self.set_reg(rd, entry.value);
                    self.set_interval(rd, entry.typ, entry.lo, entry.up);

                    // assert: vaddr == entry.vaddr

                    if is_symbolic_value(entry.typ, entry.lo, entry.up) {
                        // vaddr is constrained by rd if the interval is not a singleton
                        self.set_constraint(rd, 1, vaddr, 0, 0, 0);
                    } else {
                        self.set_constraint(rd, 0, 0, 0, 0, 0);
                    }
                }

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

    pub(crate) fn constrain_sw(&mut self, rs1: u32, imm: i32, rs2: u32) -> Result<u32, RuntimeError> {
        let vaddr = self.reg(rs1).wrapping_add(imm as u32);

        if self.is_safe_address(vaddr, rs1)? {
            if self.contexts.get(self.current).is_virtual_address_mapped(vaddr) {
                let r2 = self.symbolic.reg[rs2 as usize];

                if r2.hasco != 0 && r2.vaddr == 0 {
                    // more than one constrained memory location is behind the
                    // stored operand; the store would be malformed
                    return Err(RuntimeError::Symbolic(format!(
                        "{} constrained memory locations in sw operand at {}",
                        r2.hasco,
                        self.code_context()
                    )));
                }

                let value = self.reg(rs2);
                let trb = self.symbolic.mrcc;

                self.store_symbolic_memory(vaddr, value, r2.typ, r2.lo, r2.up, trb)?;

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

    pub(crate) fn constrain_jal_jalr(&mut self, rd: u32) {
        if rd != REG_ZR {
            let value = self.reg(rd);

            self.symbolic.reg[rd as usize].lo = value;
            self.symbolic.reg[rd as usize].up = value;
        }
    }

    pub(crate) fn backtrack_sltu(&mut self) -> Result<(), RuntimeError> {
        let tc = self.symbolic.tc;
        let entry = self.symbolic.trace[tc as usize];

        debug!("backtracking sltu {}", self.format_symbolic_memory(tc));

        let vaddr = entry.vaddr;

        if vaddr < NUMBER_OF_REGISTERS as u32 {
            if vaddr > 0 {
                // the register is identified by vaddr
                self.set_reg(vaddr, entry.value);
                self.set_interval(vaddr, entry.typ, entry.lo, entry.up);
                self.set_constraint(vaddr, 0, 0, 0, 0, 0);

                // restoring the most recent constraint counter
                self.symbolic.mrcc = entry.tc;

                if vaddr != REG_FP && vaddr != REG_SP {
                    // stop backtracking and try the next case
                    self.pc += INSTRUCTION_SIZE;

                    self.profile.ic_sltu += 1;
                }
            }
        } else {
            self.store_virtual(self.current, vaddr, entry.tc);
        }

        self.symbolic.efree();

        Ok(())
    }

    pub(crate) fn backtrack_sw(&mut self) -> Result<(), RuntimeError> {
        let tc = self.symbolic.tc;
        let entry = self.symbolic.trace[tc as usize];

        debug!("backtracking sw {}", self.format_symbolic_memory(tc));

        self.store_virtual(self.current, entry.vaddr, entry.tc);

        self.symbolic.efree();

        Ok(())
    }

    pub(crate) fn backtrack_ecall(&mut self) -> Result<(), RuntimeError> {
        let tc = self.symbolic.tc;
        let entry = self.symbolic.trace[tc as usize];

        debug!("backtracking ecall {}", self.format_symbolic_memory(tc));

        if entry.vaddr == 0 {
            // backtracking brk
            let program_break = self.contexts.get(self.current).program_break;

            if program_break == entry.lo.wrapping_add(entry.up) {
                self.contexts.get_mut(self.current).program_break = entry.lo;
            } else {
                return Err(RuntimeError::Symbolic(format!(
                    "brk backtracking error at {} with current program break 0x{:x} unequal 0x{:x} which is previous program break 0x{:x} plus size {}",
                    self.format_symbolic_memory(tc),
                    program_break,
                    entry.lo.wrapping_add(entry.up),
                    entry.lo,
                    entry.up
                )));
            }
        } else {
            // backtracking read
            self.symbolic.rc += 1;

            // record value, lower and upper bound for re-exploration
            let rc = self.symbolic.rc as usize;

            self.symbolic.read_values[rc] = entry.value;
            self.symbolic.read_los[rc] = entry.lo;
            self.symbolic.read_ups[rc] = entry.up;

            self.store_virtual(self.current, entry.vaddr, entry.tc);
        }

        self.symbolic.efree();

        Ok(())
    }

    // walk the trace backwards, undoing speculative effects until a case
    // split resumes forward execution or everything is undone
    pub fn backtrack_trace(&mut self) -> Result<(), RuntimeError> {
        debug!(
            "backtracking {} from exit code {}",
            self.contexts.get(self.current).name,
            self.contexts.get(self.current).exit_code
        );

        self.symbolic_mode = false;
        self.backtrack = true;

        while self.backtrack {
            let tc = self.symbolic.tc;

            self.pc = self.symbolic.trace[tc as usize].pc;

            if self.pc == 0 {
                // all code has been backtracked to the data segment
                self.backtrack = false;
            } else {
                let savepc = self.pc;

                self.fetch()?;
                self.decode_execute()?;

                if self.pc != savepc {
                    // backtracking stopped by sltu taking the next case
                    self.backtrack = false;
                }
            }
        }

        self.symbolic_mode = true;

        let pc = self.pc;

        self.contexts.get_mut(self.current).pc = pc;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinalities() {
        assert_eq!(cardinality(5, 5), 1);
        assert_eq!(cardinality(0, u32::MAX), 0);
        assert_eq!(combined_cardinality(0, 0, 0, 0), 2);
        assert_eq!(combined_cardinality(0, u32::MAX - 1, 0, 1), 0);
    }

    #[test]
    fn symbolic_values_are_non_singleton_intervals() {
        assert!(!is_symbolic_value(1, 0, 100));
        assert!(!is_symbolic_value(0, 7, 7));
        assert!(is_symbolic_value(0, 0, 1));
    }

    #[test]
    fn fuzzing_widens_reads() {
        let state = SymbolicState::activate(4);

        // 2^4 wide window around the value, clipped at the domain edges
        assert_eq!(state.fuzz_lo(100), 93);
        assert_eq!(state.fuzz_up(100), 108);
        assert_eq!(state.fuzz_lo(3), 0);
        assert_eq!(state.fuzz_up(u32::MAX - 2), u32::MAX);

        let full = SymbolicState::activate(32);

        assert_eq!(full.fuzz_lo(12345), 0);
        assert_eq!(full.fuzz_up(12345), u32::MAX);

        let none = SymbolicState::activate(0);

        assert_eq!(none.fuzz_lo(9), 9);
        assert_eq!(none.fuzz_up(9), 9);
    }
}
