// Scoped symbol tables: globals live in a fixed-width hash table, locals in
// a per-procedure list, builtin procedures in the library table. Entries are
// arena-allocated and linked through indices.

use crate::instructions::{REG_FP, REG_GP};
use std::fmt;

pub const HASH_TABLE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Variable,
    BigInt,
    Str,
    Procedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Uint32,
    Uint32Ptr,
    Void,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Uint32 => write!(f, "uint32_t"),
            Type::Uint32Ptr => write!(f, "uint32_t*"),
            Type::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Global,
    Local,
    Library,
}

pub type EntryId = u32;

#[derive(Debug)]
pub struct Entry {
    pub name: String,
    pub line: u32,
    pub class: Class,
    pub typ: Type,
    pub value: u32,
    pub address: u32,
    pub scope: u32, // REG_GP for globals, REG_FP for locals
    next: Option<EntryId>,
}

pub struct SymbolTables {
    arena: Vec<Entry>,

    global: [Option<EntryId>; HASH_TABLE_SIZE],
    local: Option<EntryId>,
    library: Option<EntryId>,

    pub global_variables: u32,
    pub procedures: u32,
    pub strings: u32,

    pub searches: u32,
    pub search_time: u32,
}

// FNV-1a over the identifier bytes, folded into the bucket count
fn hash(name: &str) -> usize {
    let mut h: u32 = 2166136261;

    for byte in name.bytes() {
        h ^= byte as u32;
        h = h.wrapping_mul(16777619);
    }

    h as usize % HASH_TABLE_SIZE
}

impl SymbolTables {
    pub fn new() -> SymbolTables {
        SymbolTables {
            arena: Vec::new(),
            global: [None; HASH_TABLE_SIZE],
            local: None,
            library: None,
            global_variables: 0,
            procedures: 0,
            strings: 0,
            searches: 0,
            search_time: 0,
        }
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.arena[id as usize]
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        &mut self.arena[id as usize]
    }

    pub fn create_entry(
        &mut self,
        table: Table,
        name: &str,
        line: u32,
        class: Class,
        typ: Type,
        value: u32,
        address: u32,
    ) -> EntryId {
        let id = self.arena.len() as EntryId;

        let mut entry = Entry {
            name: name.to_string(),
            line,
            class,
            typ,
            value,
            address,
            scope: REG_GP,
            next: None,
        };

        // new entries go to the head of their list
        match table {
            Table::Global => {
                let bucket = hash(name);

                entry.next = self.global[bucket];
                self.global[bucket] = Some(id);

                match class {
                    Class::Variable => self.global_variables += 1,
                    Class::Procedure => self.procedures += 1,
                    Class::Str => self.strings += 1,
                    Class::BigInt => {}
                }
            }
            Table::Local => {
                entry.scope = REG_FP;
                entry.next = self.local;
                self.local = Some(id);
            }
            Table::Library => {
                entry.next = self.library;
                self.library = Some(id);
            }
        }

        self.arena.push(entry);

        id
    }

    fn search_list(&mut self, head: Option<EntryId>, name: &str, class: Class) -> Option<EntryId> {
        self.searches += 1;

        let mut cursor = head;

        while let Some(id) = cursor {
            self.search_time += 1;

            let entry = &self.arena[id as usize];

            if entry.name == name && entry.class == class {
                return Some(id);
            }

            cursor = entry.next;
        }

        None
    }

    pub fn search_global(&mut self, name: &str, class: Class) -> Option<EntryId> {
        let head = self.global[hash(name)];

        self.search_list(head, name, class)
    }

    // lookup policy: local variables override global variables, library
    // procedures override user procedures of the same name
    pub fn scoped_entry(&mut self, name: &str, class: Class) -> Option<EntryId> {
        let overriding = match class {
            Class::Variable => self.search_list(self.local, name, Class::Variable),
            Class::Procedure => self.search_list(self.library, name, Class::Procedure),
            _ => None,
        };

        match overriding {
            Some(id) => Some(id),
            None => self.search_global(name, class),
        }
    }

    pub fn search_library(&mut self, name: &str) -> Option<EntryId> {
        self.search_list(self.library, name, Class::Procedure)
    }

    pub fn local_head(&self) -> Option<EntryId> {
        self.local
    }

    pub fn next_of(&self, id: EntryId) -> Option<EntryId> {
        self.arena[id as usize].next
    }

    pub fn reset_local(&mut self) {
        self.local = None;
    }

    // all global entries in bucket order, head to tail
    pub fn global_ids(&self) -> Vec<EntryId> {
        let mut ids = Vec::new();

        for bucket in 0..HASH_TABLE_SIZE {
            let mut cursor = self.global[bucket];

            while let Some(id) = cursor {
                ids.push(id);

                cursor = self.arena[id as usize].next;
            }
        }

        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_override_globals() {
        let mut syms = SymbolTables::new();

        let global =
            syms.create_entry(Table::Global, "x", 1, Class::Variable, Type::Uint32, 0, 4);
        let local =
            syms.create_entry(Table::Local, "x", 2, Class::Variable, Type::Uint32Ptr, 0, 8);

        assert_eq!(syms.scoped_entry("x", Class::Variable), Some(local));

        syms.reset_local();

        assert_eq!(syms.scoped_entry("x", Class::Variable), Some(global));
    }

    #[test]
    fn library_overrides_user_procedures() {
        let mut syms = SymbolTables::new();

        syms.create_entry(Table::Global, "exit", 3, Class::Procedure, Type::Void, 0, 100);
        let library =
            syms.create_entry(Table::Library, "exit", 0, Class::Procedure, Type::Void, 0, 20);

        assert_eq!(syms.scoped_entry("exit", Class::Procedure), Some(library));
    }

    #[test]
    fn classes_do_not_collide() {
        let mut syms = SymbolTables::new();

        syms.create_entry(Table::Global, "n", 1, Class::Variable, Type::Uint32, 7, 4);

        assert_eq!(syms.search_global("n", Class::Procedure), None);
        assert!(syms.search_global("n", Class::Variable).is_some());
    }

    #[test]
    fn collisions_chain_within_buckets() {
        let mut syms = SymbolTables::new();

        // enough entries to force bucket collisions
        for i in 0..2000 {
            let name = format!("id{}", i);

            syms.create_entry(Table::Global, &name, 1, Class::Variable, Type::Uint32, i, 0);
        }

        for i in 0..2000 {
            let name = format!("id{}", i);
            let id = syms.search_global(&name, Class::Variable).unwrap();

            assert_eq!(syms.entry(id).value, i);
        }
    }
}
