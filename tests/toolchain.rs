// End-to-end scenarios over the demo programs plus randomized properties of
// the encoder and the comparison encodings.

use proptest::prelude::*;
use riscue::binary::{create_elf_header, validate_elf_header, Binary, ELF_ENTRY_POINT};
use riscue::instructions::{
    encode_b_format, encode_i_format, encode_j_format, encode_r_format, encode_s_format,
    encode_u_format, get_immediate_b_format, get_immediate_i_format, get_immediate_j_format,
    get_immediate_s_format, get_immediate_u_format, Instruction,
};
use riscue::memory::PAGE_SIZE;
use riscue::{exitcode, parser, Console, Emulator, MachineKind};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

fn compile(sources: &[PathBuf]) -> Binary {
    parser::compile(sources).expect("demo programs compile")
}

fn run(sources: &[&str], kind: MachineKind, argument: u32, args: &[String]) -> (u32, String) {
    let sources: Vec<PathBuf> = sources.iter().map(|name| demo(name)).collect();

    run_binary(compile(&sources), kind, argument, args)
}

fn run_binary(
    binary: Binary,
    kind: MachineKind,
    argument: u32,
    args: &[String],
) -> (u32, String) {
    let (console, buffer) = Console::buffer();

    let mut emulator = Emulator::new(binary, kind, argument, console);

    let exit_code = emulator.run(args).expect("the machine runs to completion");

    let bytes = buffer.borrow().clone();

    (exit_code, String::from_utf8_lossy(&bytes).into_owned())
}

#[test]
fn countdown_runs_to_zero() {
    let (exit_code, output) = run(&["countdown.c"], MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);
    assert_eq!(output, "");
}

#[test]
fn hello_world_prints_in_word_chunks() {
    let (exit_code, output) = run(&["hello-world.c"], MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);
    assert_eq!(output, "Hello World!    ");
}

#[test]
fn integer_prints_all_bases() {
    let (exit_code, output) = run(&["lib.c", "integer.c"], MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);
    assert_eq!(
        output,
        "85 in decimal:     85\n\
         'U' in ASCII:      85\n\
         \"85\" string:       85\n\
         85 in hexadecimal: 0x55\n\
         85 in octal:       00125\n\
         85 in binary:      1010101\n"
    );
}

#[test]
fn negative_prints_twos_complement_renderings() {
    let (exit_code, output) = run(&["lib.c", "negative.c"], MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);

    assert!(output.contains("       -85 in decimal:     -85\n"));
    assert!(output.contains("       -85 in hexadecimal: 0xFFFFFFAB\n"));
    assert!(output.contains("       -85 in binary:      11111111111111111111111110101011\n"));
    assert!(output.contains("UINT32_MAX in hexadecimal: 0xFFFFFFFF\n"));
    assert!(output.contains(" INT32_MAX in decimal:     2147483647\n"));
    assert!(output.contains(" INT32_MIN in decimal:     -2147483648\n"));
}

#[test]
fn bitwise_shifts_and_accumulates() {
    let (exit_code, output) = run(&["lib.c", "bitwise.c"], MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);

    // mirror the arithmetic of the demo program
    let mut expected = String::new();

    let mut i: u32 = 3;
    let mut u: u32 = 3;
    let mut j: u32 = 0;

    while i != 0 {
        expected.push_str(&format!("{:032b} in binary = {} in decimal\n", i, i));

        j = i;
        i = i.wrapping_mul(64);
        u = u.wrapping_add(i);
    }

    expected.push_str(&format!("{:032b} in binary = {} in decimal\n", u, u));

    i = j;

    while i != 0 {
        expected.push_str(&format!("{:032b} in binary = {} in decimal\n", i, i));

        i >>= 6;
    }

    assert_eq!(output, expected);
}

#[test]
fn quine_reproduces_its_source() {
    let (exit_code, output) = run(&["lib.c", "quine.c"], MachineKind::Mipster, 1, &[]);

    let source = fs::read_to_string(demo("quine.c")).unwrap();

    assert_eq!(exit_code, 0);
    assert_eq!(output.trim_end(), source.trim_end());
}

#[test]
fn written_binaries_reload_byte_identically() {
    let binary = compile(&[demo("countdown.c")]);

    let dir = tempfile::tempdir().unwrap();

    let first = dir.path().join("countdown.bin");
    let second = dir.path().join("countdown2.bin");

    binary.save(&first).unwrap();

    let reloaded = Binary::load(&first).unwrap();

    assert_eq!(reloaded.binary_length, binary.binary_length);
    assert_eq!(reloaded.code_length, binary.code_length);
    assert_eq!(reloaded.entry_point, binary.entry_point);

    reloaded.save(&second).unwrap();

    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

    // and the reloaded binary still runs
    let (exit_code, _) = run_binary(reloaded, MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, 0);
}

#[test]
fn zeroed_first_instruction_is_rejected_at_run_time() {
    let binary = compile(&[demo("countdown.c")]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tampered.bin");

    binary.save(&path).unwrap();

    // zero the first code word right after the header and code length
    let mut bytes = fs::read(&path).unwrap();

    bytes[88..92].copy_from_slice(&[0, 0, 0, 0]);

    fs::write(&path, &bytes).unwrap();

    let tampered = Binary::load(&path).unwrap();

    let (exit_code, output) = run_binary(tampered, MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, exitcode::UNKNOWNINSTRUCTION);
    assert!(output.contains("unknown instruction"));
}

fn divzero_source(dir: &Path) -> PathBuf {
    let path = dir.join("divzero.c");

    fs::write(
        &path,
        "uint32_t main() {\n  uint32_t x;\n  uint32_t y;\n  x = 7;\n  y = 0;\n  return x / y;\n}\n",
    )
    .unwrap();

    path
}

#[test]
fn division_by_zero_exits_under_mipster() {
    let dir = tempfile::tempdir().unwrap();

    let binary = compile(&[divzero_source(dir.path())]);

    let (exit_code, output) = run_binary(binary, MachineKind::Mipster, 1, &[]);

    assert_eq!(exit_code, exitcode::DIVISIONBYZERO);
    assert!(output.contains("division by zero"));
}

#[test]
fn division_by_zero_replays_under_ripster() {
    let dir = tempfile::tempdir().unwrap();

    let binary = compile(&[divzero_source(dir.path())]);

    let (exit_code, output) = run_binary(binary, MachineKind::Ripster, 1, &[]);

    assert_eq!(exit_code, 0);
    assert!(output.contains("division by zero, replaying"));
    // the faulting division shows up in the replayed disassembly
    assert!(output.contains("divu"));
}

#[test]
fn hypster_and_mixter_run_natively() {
    let (exit_code, _) = run(&["countdown.c"], MachineKind::Hypster, 1, &[]);
    assert_eq!(exit_code, 0);

    let (exit_code, _) = run(&["countdown.c"], MachineKind::Mixter(50), 1, &[]);
    assert_eq!(exit_code, 0);
}

#[test]
fn minster_premaps_and_mobster_refuses_page_faults() {
    let (exit_code, _) = run(&["lib.c", "integer.c"], MachineKind::Minster, 1, &[]);
    assert_eq!(exit_code, 0);

    // a store far beyond the program break crosses into an unmapped page,
    // which mobster refuses to handle
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bigheap.c");

    fs::write(
        &path,
        "uint32_t main() {\n  uint32_t* p;\n  p = malloc(16384);\n  *(p + 3000) = 1;\n  return *(p + 3000);\n}\n",
    )
    .unwrap();

    let binary = compile(&[path.clone()]);

    let (exit_code, _) = run_binary(binary, MachineKind::Mipster, 1, &[]);
    assert_eq!(exit_code, 1);

    let binary = compile(&[path]);

    let (exit_code, output) = run_binary(binary, MachineKind::Mobster, 1, &[]);
    assert_eq!(exit_code, exitcode::UNCAUGHTEXCEPTION);
    assert!(output.contains("page fault"));
}

#[test]
fn dipster_disassembles_while_executing() {
    let (exit_code, output) = run(&["countdown.c"], MachineKind::Dipster, 1, &[]);

    assert_eq!(exit_code, 0);
    assert!(output.contains("addi $gp,"));
    assert!(output.contains("(exit): $a0=0x0 |- ->"));
}

#[test]
fn page_tables_cover_every_touched_address() {
    let binary = compile(&[demo("countdown.c")]);

    let (console, _buffer) = Console::buffer();

    let mut emulator = Emulator::new(binary, MachineKind::Mipster, 1, console);

    emulator.run(&[]).unwrap();

    let machine = &emulator.machine;
    let context = machine.contexts.get(machine.current);

    let mut mapped = 0;

    for page in 0..(riscue::memory::VIRTUAL_MEMORY_SIZE / PAGE_SIZE) {
        if context.is_page_mapped(page) {
            mapped += 1;

            let frame = context.frame_for_page(page);

            // frames are page-aligned, non-null, and inside the pool
            assert_eq!(frame % PAGE_SIZE, 0);
            assert_ne!(frame, 0);
            assert!((frame as u64) < 2 * machine.phys.budget() + PAGE_SIZE as u64);

            // the tlb lands inside the frame
            let vaddr = page * PAGE_SIZE + 8;
            assert_eq!(context.tlb(vaddr), frame + 8);
        }
    }

    // code and data plus at least one stack page
    assert!(mapped >= 2);
}

fn branching_source(dir: &Path) -> PathBuf {
    let path = dir.join("branch.c");

    fs::write(
        &path,
        "uint32_t main(uint32_t argc, uint32_t* argv) {\n\
         \x20 uint32_t fd;\n\
         \x20 uint32_t x;\n\
         \x20 uint32_t* buf;\n\
         \x20 buf = malloc(4);\n\
         \x20 *buf = 0;\n\
         \x20 fd = open((uint32_t*) *(argv + 1), 32768, 0);\n\
         \x20 read(fd, buf, 4);\n\
         \x20 x = *buf;\n\
         \x20 if (x < 1)\n\
         \x20   return 0;\n\
         \x20 return 1;\n\
         }\n",
    )
    .unwrap();

    path
}

#[test]
fn monster_enumerates_both_branch_outcomes() {
    let dir = tempfile::tempdir().unwrap();

    // an empty input file: reads hit EOF and fuzzing widens the value
    let input = dir.path().join("input");
    fs::File::create(&input).unwrap().write_all(b"").unwrap();

    let binary = compile(&[branching_source(dir.path())]);

    let args = vec![input.display().to_string()];

    let (exit_code, output) = run_binary(binary, MachineKind::Monster, 1, &args);

    assert_eq!(exit_code, 0);
    assert!(output.contains("backtracking"));

    // one case split, so the engine backtracks exactly twice; the count is
    // rewritten in place with backspaces
    assert!(output.ends_with("2\n"));
}

#[test]
fn concrete_witness_reaches_the_symbolic_exit() {
    let dir = tempfile::tempdir().unwrap();

    let input = dir.path().join("input");
    fs::File::create(&input).unwrap().write_all(b"").unwrap();

    // the lower bound of the fuzzed read is 0, so a plain run over the
    // same input takes the first explored branch
    let binary = compile(&[branching_source(dir.path())]);

    let args = vec![input.display().to_string()];

    let (exit_code, _) = run_binary(binary, MachineKind::Mipster, 1, &args);

    assert_eq!(exit_code, 0);
}

#[test]
fn disassembly_round_trips_through_decode() {
    let binary = compile(&[demo("hello-world.c")]);

    let mut assembly = Vec::new();

    binary.disassemble(&mut assembly, true).unwrap();

    let text = String::from_utf8(assembly).unwrap();

    // one line per instruction and data word
    assert_eq!(
        text.lines().count() as u32,
        binary.binary_length / 4
    );
    assert!(text.contains("ecall"));
    assert!(text.contains(".word"));
}

#[test]
fn elf_header_is_stable() {
    let header = create_elf_header(4096);

    assert_eq!(validate_elf_header(&header), Some((ELF_ENTRY_POINT, 4096)));

    // the header bytes never change for a given length
    assert_eq!(header, create_elf_header(4096));
}

proptest! {
    // encoder round-trips are bit-exact and lossless over the field ranges
    #[test]
    fn i_format_round_trip(imm in -2048i32..2048, rs1 in 0u32..32, rd in 0u32..32) {
        let word = encode_i_format(imm, rs1, 0, rd, 19).unwrap();

        prop_assert_eq!(get_immediate_i_format(word), imm);
        prop_assert_eq!(riscue::instructions::get_rs1(word), rs1);
        prop_assert_eq!(riscue::instructions::get_rd(word), rd);
    }

    #[test]
    fn s_format_round_trip(imm in -2048i32..2048, rs1 in 0u32..32, rs2 in 0u32..32) {
        let word = encode_s_format(imm, rs2, rs1, 2, 35).unwrap();

        prop_assert_eq!(get_immediate_s_format(word), imm);
        prop_assert_eq!(riscue::instructions::get_rs1(word), rs1);
        prop_assert_eq!(riscue::instructions::get_rs2(word), rs2);
    }

    #[test]
    fn b_format_round_trip(imm in -2048i32..2048, rs1 in 0u32..32, rs2 in 0u32..32) {
        // branch offsets are even
        let imm = imm * 2;

        let word = encode_b_format(imm, rs2, rs1, 0, 99).unwrap();

        prop_assert_eq!(get_immediate_b_format(word), imm);
    }

    #[test]
    fn j_format_round_trip(imm in -(1i32 << 19)..(1i32 << 19), rd in 0u32..32) {
        let imm = imm * 2;

        let word = encode_j_format(imm, rd, 111).unwrap();

        prop_assert_eq!(get_immediate_j_format(word), imm);
        prop_assert_eq!(riscue::instructions::get_rd(word), rd);
    }

    #[test]
    fn u_format_round_trip(imm in -(1i32 << 19)..(1i32 << 19), rd in 0u32..32) {
        let word = encode_u_format(imm, rd, 55).unwrap();

        prop_assert_eq!(get_immediate_u_format(word), imm);
    }

    #[test]
    fn r_format_decodes_to_the_same_instruction(rd in 0u32..32, rs1 in 0u32..32, rs2 in 0u32..32) {
        let instruction = Instruction::Sltu { rd, rs1, rs2 };

        prop_assert_eq!(
            Instruction::decode(instruction.encode().unwrap()),
            Some(instruction)
        );

        let word = encode_r_format(32, rs2, rs1, 0, rd, 51);

        prop_assert_eq!(
            Instruction::decode(word),
            Some(Instruction::Sub { rd, rs1, rs2 })
        );
    }

    // unsigned < is a total linear order under the compiler's comparison
    // encodings: exactly one of a < b, b < a, a == b holds
    #[test]
    fn sltu_encodings_form_a_total_order(a in any::<u32>(), b in any::<u32>()) {
        let sltu = |x: u32, y: u32| (x < y) as u32;

        // a == b is emitted as (b - a) <u 1
        let eq = sltu(b.wrapping_sub(a), 1);

        prop_assert_eq!(sltu(a, b) + sltu(b, a) + eq, 1);

        // a != b is emitted as 0 <u (b - a)
        prop_assert_eq!(sltu(0, b.wrapping_sub(a)), 1 - eq);

        // a <= b and a >= b are emitted through 1 - sltu
        prop_assert_eq!((1 - sltu(b, a)) + sltu(b, a), 1);
        prop_assert_eq!(1 - sltu(a, b), sltu(b, a) + eq);
    }

    // sign shrink and extend are mutually inverse over every width
    #[test]
    fn sign_round_trip(n in any::<u32>(), b in 1u32..32) {
        let shrunk = riscue::bits::sign_shrink(riscue::bits::sign_extend(n % (1 << b), b), b);

        prop_assert_eq!(shrunk, n % (1 << b));
    }
}
