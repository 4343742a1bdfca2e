// Guest physical memory, page tables and execution contexts. The guest sees
// a 2GiB virtual address space in 4KiB pages; page table entries hold byte
// offsets into the host-side frame pool, with 0 meaning unmapped. Frame 0 is
// reserved so that 0 stays a valid sentinel.

use crate::bits::REGISTER_SIZE;
use crate::instructions::NUMBER_OF_REGISTERS;
use crate::processor::Exception;
use crate::RuntimeError;
use log::{debug, trace};

pub const MEGABYTE: u32 = 1048576;

pub const VIRTUAL_MEMORY_SIZE: u32 = 2147483648; // 2GB of virtual memory

pub const PAGE_SIZE: u32 = 4096;

pub const NUMBER_OF_PAGES: usize = (VIRTUAL_MEMORY_SIZE / PAGE_SIZE) as usize;

pub fn is_valid_virtual_address(vaddr: u32) -> bool {
    // memory is word-addressed for lack of byte-sized data
    vaddr < VIRTUAL_MEMORY_SIZE && vaddr % REGISTER_SIZE == 0
}

pub fn page_of_virtual_address(vaddr: u32) -> u32 {
    vaddr / PAGE_SIZE
}

// MB-granular bump pool of zeroed page frames
pub struct PhysicalMemory {
    mem: Vec<u32>,

    budget: u64, // configured page frame memory in bytes
    next_page_frame: u32, // byte offset of the next free frame
    allocated: u64,
    free: u64,
}

impl PhysicalMemory {
    pub fn new(megabytes: u32) -> PhysicalMemory {
        let megabytes = megabytes.min(4096);

        PhysicalMemory {
            // frame 0 is reserved as the unmapped sentinel
            mem: vec![0; (PAGE_SIZE / 4) as usize],
            budget: megabytes as u64 * MEGABYTE as u64,
            next_page_frame: PAGE_SIZE,
            allocated: 0,
            free: 0,
        }
    }

    pub fn available(&self) -> bool {
        self.free > 0 || self.allocated + MEGABYTE as u64 <= self.budget
    }

    fn excess(&self) -> bool {
        // tolerate twice as much memory mapped on demand than configured
        self.available() || self.allocated + MEGABYTE as u64 <= 2 * self.budget
    }

    pub fn used(&self) -> u64 {
        self.allocated - self.free
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn palloc(&mut self) -> Result<u32, RuntimeError> {
        // assert: the pool grows in MEGABYTE blocks, so frames stay aligned

        if self.free == 0 {
            if self.excess() {
                self.free = MEGABYTE as u64;

                self.mem.extend(std::iter::repeat(0).take((MEGABYTE / 4) as usize));

                self.allocated += MEGABYTE as u64;
            } else {
                return Err(RuntimeError::OutOfPhysicalMemory);
            }
        }

        let frame = self.next_page_frame;

        self.next_page_frame += PAGE_SIZE;

        self.free -= PAGE_SIZE as u64;

        Ok(frame)
    }

    pub fn pfree(&mut self, _frame: u32) {
        // TODO: implement free list of page frames
    }

    pub fn load(&self, paddr: u32) -> u32 {
        self.mem[(paddr / 4) as usize]
    }

    pub fn store(&mut self, paddr: u32, data: u32) {
        self.mem[(paddr / 4) as usize] = data;
    }
}

pub type ContextId = usize;

pub struct Context {
    pub pc: u32,
    pub regs: [u32; NUMBER_OF_REGISTERS],
    pub pt: Vec<u32>,

    // the mapped heap range grows from lo_page up to me_page, the stack
    // from hi_page down
    pub lo_page: u32,
    pub me_page: u32,
    pub hi_page: u32,

    pub original_break: u32,
    pub program_break: u32,

    pub exception: Exception,
    pub faulting_page: u32,

    pub exit_code: u32,

    pub parent: Option<ContextId>, // None means the context is ours
    pub vctxt: u32, // shadow address inside the parent's address space

    pub name: String,

    next: Option<ContextId>,
    prev: Option<ContextId>,
}

impl Context {
    fn reset(&mut self, parent: Option<ContextId>, vctxt: u32) {
        self.pc = 0;
        self.regs = [0; NUMBER_OF_REGISTERS];
        self.pt.iter_mut().for_each(|entry| *entry = 0);

        self.lo_page = 0;
        self.me_page = 0;
        self.hi_page = page_of_virtual_address(VIRTUAL_MEMORY_SIZE - REGISTER_SIZE);

        self.original_break = 0;
        self.program_break = 0;

        self.exception = Exception::None;
        self.faulting_page = 0;

        self.exit_code = 0;

        self.parent = parent;
        self.vctxt = vctxt;

        self.name = String::new();
    }

    pub fn frame_for_page(&self, page: u32) -> u32 {
        self.pt[page as usize]
    }

    pub fn is_page_mapped(&self, page: u32) -> bool {
        self.frame_for_page(page) != 0
    }

    pub fn is_virtual_address_mapped(&self, vaddr: u32) -> bool {
        // assert: is_valid_virtual_address(vaddr)
        self.is_page_mapped(page_of_virtual_address(vaddr))
    }

    pub fn tlb(&self, vaddr: u32) -> u32 {
        // assert: is_valid_virtual_address(vaddr)
        // assert: is_virtual_address_mapped(vaddr)

        let page = page_of_virtual_address(vaddr);
        let frame = self.frame_for_page(page);

        let paddr = vaddr - page * PAGE_SIZE + frame;

        trace!(
            "tlb access: vaddr 0x{:x} page 0x{:x} frame 0x{:x} paddr 0x{:x}",
            vaddr,
            page * PAGE_SIZE,
            frame,
            paddr
        );

        paddr
    }

    pub fn map_page(&mut self, page: u32, frame: u32) {
        // assert: 0 <= page < NUMBER_OF_PAGES

        self.pt[page as usize] = frame;

        if page <= page_of_virtual_address(self.program_break.wrapping_sub(REGISTER_SIZE)) {
            // exploit spatial locality in page table caching
            if page < self.lo_page {
                self.lo_page = page;
            } else if page > self.me_page {
                self.me_page = page;
            }
        }

        debug!("page 0x{:04x} mapped to frame 0x{:x}", page, frame);
    }
}

// contexts live in a doubly-linked used list threaded through an arena;
// deleted contexts go on a free list for reuse
pub struct ContextArena {
    slots: Vec<Context>,
    used_head: Option<ContextId>,
    free: Vec<ContextId>,
}

impl ContextArena {
    pub fn new() -> ContextArena {
        ContextArena {
            slots: Vec::new(),
            used_head: None,
            free: Vec::new(),
        }
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.slots[id]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.slots[id]
    }

    pub fn create(&mut self, parent: Option<ContextId>, vctxt: u32) -> ContextId {
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id].reset(parent, vctxt);

                id
            }
            None => {
                let mut context = Context {
                    pc: 0,
                    regs: [0; NUMBER_OF_REGISTERS],
                    pt: vec![0; NUMBER_OF_PAGES],
                    lo_page: 0,
                    me_page: 0,
                    hi_page: 0,
                    original_break: 0,
                    program_break: 0,
                    exception: Exception::None,
                    faulting_page: 0,
                    exit_code: 0,
                    parent,
                    vctxt,
                    name: String::new(),
                    next: None,
                    prev: None,
                };

                context.reset(parent, vctxt);

                self.slots.push(context);

                self.slots.len() - 1
            }
        };

        // new contexts go to the head of the used list
        self.slots[id].next = self.used_head;
        self.slots[id].prev = None;

        if let Some(head) = self.used_head {
            self.slots[head].prev = Some(id);
        }

        self.used_head = Some(id);

        debug!("created context {} with parent {:?}", id, parent);

        id
    }

    pub fn find(&self, parent: Option<ContextId>, vctxt: u32) -> Option<ContextId> {
        let mut cursor = self.used_head;

        while let Some(id) = cursor {
            let context = &self.slots[id];

            if context.parent == parent && context.vctxt == vctxt {
                return Some(id);
            }

            cursor = context.next;
        }

        None
    }

    pub fn delete(&mut self, id: ContextId) {
        let (prev, next) = (self.slots[id].prev, self.slots[id].next);

        if let Some(next) = next {
            self.slots[next].prev = prev;
        }

        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.used_head = next,
        }

        self.slots[id].next = None;
        self.slots[id].prev = None;

        self.free.push(id);
    }

    pub fn used_head(&self) -> Option<ContextId> {
        self.used_head
    }
}

// word offsets of the context record as it appears inside a guest address
// space; save_context and restore_context mirror machine state through this
// layout when a context belongs to a nested machine
pub fn vctxt_program_counter(vctxt: u32) -> u32 {
    vctxt + 2 * REGISTER_SIZE
}

pub fn vctxt_regs(vctxt: u32) -> u32 {
    vctxt + 3 * REGISTER_SIZE
}

pub fn vctxt_page_table(vctxt: u32) -> u32 {
    vctxt + 4 * REGISTER_SIZE
}

pub fn vctxt_lo_page(vctxt: u32) -> u32 {
    vctxt + 5 * REGISTER_SIZE
}

pub fn vctxt_me_page(vctxt: u32) -> u32 {
    vctxt + 6 * REGISTER_SIZE
}

pub fn vctxt_hi_page(vctxt: u32) -> u32 {
    vctxt + 7 * REGISTER_SIZE
}

pub fn vctxt_program_break(vctxt: u32) -> u32 {
    vctxt + 9 * REGISTER_SIZE
}

pub fn vctxt_exception(vctxt: u32) -> u32 {
    vctxt + 10 * REGISTER_SIZE
}

pub fn vctxt_faulting_page(vctxt: u32) -> u32 {
    vctxt + 11 * REGISTER_SIZE
}

pub fn vctxt_exit_code(vctxt: u32) -> u32 {
    vctxt + 12 * REGISTER_SIZE
}

pub fn frame_address_for_page(table: u32, page: u32) -> u32 {
    table.wrapping_add(page.wrapping_mul(REGISTER_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palloc_returns_distinct_zeroed_frames() {
        let mut phys = PhysicalMemory::new(1);

        let a = phys.palloc().unwrap();
        let b = phys.palloc().unwrap();

        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(a % PAGE_SIZE, 0);
        assert_eq!(phys.load(a), 0);
        assert_eq!(phys.load(b + PAGE_SIZE - 4), 0);
    }

    #[test]
    fn palloc_fails_beyond_twice_the_budget() {
        let mut phys = PhysicalMemory::new(1);

        // two megabytes of frames are tolerated on a one megabyte budget
        for _ in 0..(2 * MEGABYTE / PAGE_SIZE) {
            phys.palloc().unwrap();
        }

        assert!(phys.palloc().is_err());
    }

    #[test]
    fn tlb_translates_within_frames() {
        let mut arena = ContextArena::new();
        let id = arena.create(None, 0);

        arena.get_mut(id).map_page(16, 8192);

        assert!(arena.get(id).is_virtual_address_mapped(16 * PAGE_SIZE + 8));
        assert_eq!(arena.get(id).tlb(16 * PAGE_SIZE + 8), 8200);
        assert!(!arena.get(id).is_virtual_address_mapped(17 * PAGE_SIZE));
    }

    #[test]
    fn contexts_are_cached_and_reused() {
        let mut arena = ContextArena::new();

        let parent = arena.create(None, 0);
        let child = arena.create(Some(parent), 0x9000);

        assert_eq!(arena.find(Some(parent), 0x9000), Some(child));
        assert_eq!(arena.find(Some(parent), 0x9004), None);

        arena.delete(child);

        assert_eq!(arena.find(Some(parent), 0x9000), None);

        // the freed slot is recycled
        assert_eq!(arena.create(Some(parent), 0xa000), child);
    }
}
