// In-memory code and data buffer plus the ELF32 envelope. The file format
// is a fixed 84-byte ELF header, one word of code length, then the raw
// code+data words; on load the header is byte-compared against a freshly
// built template.

use crate::bits::{INSTRUCTION_SIZE, REGISTER_SIZE};
use crate::instructions::Instruction;
use crate::memory::{PAGE_SIZE, VIRTUAL_MEMORY_SIZE};
use crate::CompileError;
use log::info;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

pub const MAX_BINARY_LENGTH: u32 = 262144; // 256KB = MAX_CODE_LENGTH + MAX_DATA_LENGTH
pub const MAX_CODE_LENGTH: u32 = 245760; // 240KB
pub const MAX_DATA_LENGTH: u32 = 16384; // 16KB

pub const ELF_HEADER_LEN: u32 = 84; // 52 byte file header + 32 byte program header

// according to RISC-V pk
pub const ELF_ENTRY_POINT: u32 = 65536; // 0x10000

const ELF_HEADER_WORDS: usize = ELF_HEADER_LEN as usize / 4;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not access {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("failed to load code from input file {0}")]
    Invalid(String),
    #[error("nothing to emit to output file {0}")]
    NothingToEmit(String),
}

#[derive(Debug, Error)]
pub enum DisassembleError {
    #[error("could not access {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("unknown instruction with 0x{0:x} opcode detected")]
    UnknownInstruction(u32),
}

pub struct Binary {
    words: Vec<u32>,

    pub binary_length: u32, // bytes of code plus data
    pub code_length: u32, // bytes of code only
    pub entry_point: u32,

    // source line per emitted word; absent in loaded binaries
    pub code_line_number: Option<Vec<u32>>,
    pub data_line_number: Option<Vec<u32>>,

    pub name: String,
}

impl Binary {
    pub fn new() -> Binary {
        Binary {
            words: vec![0; (MAX_BINARY_LENGTH / 4) as usize],
            binary_length: 0,
            code_length: 0,
            entry_point: ELF_ENTRY_POINT,
            code_line_number: Some(vec![0; (MAX_CODE_LENGTH / INSTRUCTION_SIZE) as usize]),
            data_line_number: Some(vec![0; (MAX_DATA_LENGTH / REGISTER_SIZE) as usize]),
            name: String::from("library"),
        }
    }

    pub fn load_instruction(&self, baddr: u32) -> u32 {
        self.words[(baddr / REGISTER_SIZE) as usize]
    }

    pub fn store_instruction(&mut self, baddr: u32, instruction: u32) -> Result<(), CompileError> {
        if baddr >= MAX_CODE_LENGTH {
            return Err(CompileError::CodeGen {
                message: String::from("maximum code length exceeded"),
            });
        }

        self.words[(baddr / REGISTER_SIZE) as usize] = instruction;

        Ok(())
    }

    pub fn load_data(&self, baddr: u32) -> u32 {
        self.words[(baddr / REGISTER_SIZE) as usize]
    }

    pub fn store_data(&mut self, baddr: u32, data: u32) -> Result<(), CompileError> {
        if baddr >= MAX_CODE_LENGTH + MAX_DATA_LENGTH {
            return Err(CompileError::CodeGen {
                message: String::from("maximum data length exceeded"),
            });
        }

        self.words[(baddr / REGISTER_SIZE) as usize] = data;

        Ok(())
    }

    // the first emission at an address wins, fixups keep the original line
    pub fn note_code_line(&mut self, baddr: u32, line: u32) {
        if let Some(lines) = self.code_line_number.as_mut() {
            let slot = (baddr / INSTRUCTION_SIZE) as usize;

            if lines[slot] == 0 {
                lines[slot] = line;
            }
        }
    }

    pub fn note_data_line(&mut self, daddr: u32, line: u32) {
        if let Some(lines) = self.data_line_number.as_mut() {
            lines[(daddr / REGISTER_SIZE) as usize] = line;
        }
    }

    pub fn code_line(&self, baddr: u32) -> Option<u32> {
        self.code_line_number
            .as_ref()
            .map(|lines| lines[(baddr / INSTRUCTION_SIZE) as usize])
    }

    pub fn data_line(&self, daddr: u32) -> Option<u32> {
        self.data_line_number
            .as_ref()
            .map(|lines| lines[(daddr / REGISTER_SIZE) as usize])
    }

    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        if self.binary_length == 0 {
            return Err(LoadError::NothingToEmit(path.display().to_string()));
        }

        let io_error = |source| LoadError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut file = File::create(path).map_err(io_error)?;

        let mut bytes =
            Vec::with_capacity((ELF_HEADER_LEN + REGISTER_SIZE + self.binary_length) as usize);

        for word in create_elf_header(self.binary_length) {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        bytes.extend_from_slice(&self.code_length.to_le_bytes());

        for i in 0..(self.binary_length / REGISTER_SIZE) as usize {
            bytes.extend_from_slice(&self.words[i].to_le_bytes());
        }

        file.write_all(&bytes).map_err(io_error)?;

        info!(
            "{} bytes with {} instructions and {} bytes of data written into {}",
            ELF_HEADER_LEN + REGISTER_SIZE + self.binary_length,
            self.code_length / INSTRUCTION_SIZE,
            self.binary_length - self.code_length,
            path.display()
        );

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Binary, LoadError> {
        let io_error = |source| LoadError::Io {
            path: path.display().to_string(),
            source,
        };
        let invalid = || LoadError::Invalid(path.display().to_string());

        let mut file = File::open(path).map_err(io_error)?;

        let mut header_bytes = [0u8; ELF_HEADER_LEN as usize];

        file.read_exact(&mut header_bytes).map_err(|_| invalid())?;

        let mut header = [0u32; ELF_HEADER_WORDS];

        for (i, chunk) in header_bytes.chunks_exact(4).enumerate() {
            header[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }

        let (entry_point, binary_length) = validate_elf_header(&header).ok_or_else(invalid)?;

        let mut word_bytes = [0u8; 4];

        file.read_exact(&mut word_bytes).map_err(|_| invalid())?;

        let code_length = u32::from_le_bytes(word_bytes);

        if binary_length > MAX_BINARY_LENGTH {
            return Err(invalid());
        }

        let mut body = vec![0u8; binary_length as usize];

        file.read_exact(&mut body).map_err(|_| invalid())?;

        // anything beyond the declared length rejects the file
        if file.read(&mut word_bytes).map_err(io_error)? != 0 {
            return Err(invalid());
        }

        let mut binary = Binary::new();

        binary.binary_length = binary_length;
        binary.code_length = code_length;
        binary.entry_point = entry_point;

        // no source line numbers in binaries
        binary.code_line_number = None;
        binary.data_line_number = None;

        binary.name = path.display().to_string();

        for (i, chunk) in body.chunks_exact(4).enumerate() {
            binary.words[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }

        info!(
            "{} bytes with {} instructions and {} bytes of data loaded from {}",
            ELF_HEADER_LEN + REGISTER_SIZE + binary_length,
            code_length / INSTRUCTION_SIZE,
            binary_length - code_length,
            path.display()
        );

        Ok(binary)
    }

    pub fn disassemble(&self, out: &mut dyn Write, verbose: bool) -> Result<(), DisassembleError> {
        let io_error = |source| DisassembleError::Io {
            path: String::from("assembly output"),
            source,
        };

        let mut pc = 0;

        while pc < self.code_length {
            let ir = self.load_instruction(pc);

            let instruction =
                Instruction::decode(ir).ok_or(DisassembleError::UnknownInstruction(ir & 0x7f))?;

            self.write_code_context(out, pc, ir, verbose).map_err(io_error)?;

            writeln!(out, "{}", instruction.as_asm(pc)).map_err(io_error)?;

            pc += INSTRUCTION_SIZE;
        }

        while pc < self.binary_length {
            let data = self.load_data(pc);

            if verbose {
                write!(out, "{:x}", pc).map_err(io_error)?;

                if let Some(line) = self.data_line(pc - self.code_length) {
                    write!(out, "(~{})", line).map_err(io_error)?;
                }

                writeln!(out, ": 0x{:08x}: .word 0x{:x}", data, data).map_err(io_error)?;
            } else {
                writeln!(out, "{:x}: .word 0x{:x}", pc, data).map_err(io_error)?;
            }

            pc += REGISTER_SIZE;
        }

        Ok(())
    }

    fn write_code_context(
        &self,
        out: &mut dyn Write,
        pc: u32,
        ir: u32,
        verbose: bool,
    ) -> io::Result<()> {
        write!(out, "{:x}", pc)?;

        if verbose {
            if let Some(line) = self.code_line(pc) {
                write!(out, "(~{})", line)?;
            }

            write!(out, ": 0x{:08x}", ir)?;
        }

        write!(out, ": ")
    }
}

// strings are emitted into the data segment as zero-padded little-endian
// words including the terminating zero
pub fn string_to_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();

    bytes.push(0);

    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }

    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

pub fn create_elf_header(binary_length: u32) -> [u32; ELF_HEADER_WORDS] {
    let mut header = [0u32; ELF_HEADER_WORDS];

    // ELF32 file header
    header[0] = 127 // magic number part 0 is 0x7F
        + ((b'E' as u32) << 8)
        + ((b'L' as u32) << 16)
        + ((b'F' as u32) << 24);
    header[1] = 1 // file class is ELFCLASS32
        + (1 << 8) // object file data structures endianness is ELFDATA2LSB
        + (1 << 16); // version of the object file format
    header[2] = 0; // ABI version and start of padding bytes
    header[3] = 0; // more padding bytes
    header[4] = 2 // object file type is ET_EXEC
        + (243 << 16); // target architecture is RV32
    header[5] = 1; // version of the object file format
    header[6] = ELF_ENTRY_POINT; // entry point address
    header[7] = 13 * 4; // program header offset
    header[8] = 0; // section header offset
    header[9] = 0; // flags
    header[10] = (13 * 4) // elf header size
        + ((8 * 4) << 16); // size of program header entry
    header[11] = 1; // number of program header entries
    header[12] = 0; // number of section header entries

    // ELF32 program header table
    header[13] = 1; // type of segment is LOAD
    header[14] = ELF_HEADER_LEN + 4; // segment offset in file
    header[15] = ELF_ENTRY_POINT; // virtual address in memory
    header[16] = 0; // physical address (reserved)
    header[17] = binary_length; // size of segment in file
    header[18] = binary_length; // size of segment in memory
    header[19] = 7; // segment attributes is RWX
    header[20] = PAGE_SIZE; // alignment of segment

    header
}

pub fn validate_elf_header(header: &[u32; ELF_HEADER_WORDS]) -> Option<(u32, u32)> {
    let new_entry_point = header[15];
    let new_binary_length = header[17];

    if new_binary_length != header[18] {
        // segment size in file is not the same as segment size in memory
        return None;
    }

    match (VIRTUAL_MEMORY_SIZE - PAGE_SIZE).checked_sub(new_binary_length) {
        // binary does not fit into the virtual address space
        Some(limit) if new_entry_point <= limit => {}
        _ => return None,
    }

    let valid_header = create_elf_header(new_binary_length);

    if header != &valid_header {
        return None;
    }

    Some((new_entry_point, new_binary_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_validates_against_itself() {
        let header = create_elf_header(1024);

        assert_eq!(validate_elf_header(&header), Some((ELF_ENTRY_POINT, 1024)));
    }

    #[test]
    fn tampered_headers_are_rejected() {
        let mut header = create_elf_header(1024);
        header[4] = 2; // drop the architecture
        assert_eq!(validate_elf_header(&header), None);

        let mut header = create_elf_header(1024);
        header[18] = 2048; // file and memory sizes disagree
        assert_eq!(validate_elf_header(&header), None);

        let mut header = create_elf_header(1024);
        header[19] = 5; // wrong segment attributes
        assert_eq!(validate_elf_header(&header), None);
    }

    #[test]
    fn oversized_binaries_are_rejected() {
        let header = create_elf_header(VIRTUAL_MEMORY_SIZE - PAGE_SIZE);

        assert_eq!(validate_elf_header(&header), None);
    }

    #[test]
    fn string_packing() {
        assert_eq!(string_to_words(""), vec![0]);
        assert_eq!(string_to_words("abc"), vec![u32::from_le_bytes(*b"abc\0")]);
        assert_eq!(
            string_to_words("abcd"),
            vec![u32::from_le_bytes(*b"abcd"), 0]
        );
    }
}
