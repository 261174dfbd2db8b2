use std::fs;
use std::path::{Path, PathBuf};

use br_asm::{AsmErrorKind, Assembler, assemble};
use br_vm::runtime::{disasm, natives};
use br_vm::{Fault, Image, Limits, VM, Word};
use tempfile::{TempDir, tempdir};

fn write(dir: &TempDir, name: &str, src: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, src).unwrap();
    path
}

fn machine(path: &Path) -> VM {
    let image = assemble(path).unwrap();
    let mut vm = VM::from_image(&image, &Limits::default()).unwrap();
    natives::install(&mut vm).unwrap();
    vm
}

fn stack_u64(vm: &VM) -> Vec<u64> {
    vm.stack.as_slice().iter().map(|w| w.as_u64()).collect()
}

#[test]
fn image_survives_a_trip_through_a_file() {
    let dir = tempdir().unwrap();
    let src = write(
        &dir,
        "hello.basm",
        "\
%define MSG \"hello, world\"
%entry main
main:
    push MSG
    push 12
    int 7
    push -2.5
    halt
",
    );

    let image = assemble(&src).unwrap();
    let out = dir.path().join("hello.br");
    let written = image.save(&out).unwrap();
    assert_eq!(written, fs::metadata(&out).unwrap().len() as usize);

    let loaded = Image::load(&out, &Limits::default()).unwrap();
    assert_eq!(loaded, image);

    let direct = VM::from_image(&image, &Limits::default()).unwrap();
    let from_file = VM::load_file(&out, &Limits::default()).unwrap();
    assert_eq!(direct.program, from_file.program);
    assert_eq!(direct.memory.as_slice(), from_file.memory.as_slice());
    assert_eq!(&from_file.memory.as_slice()[..12], b"hello, world");
}

#[test]
fn assembling_twice_gives_identical_bytes() {
    let dir = tempdir().unwrap();
    write(&dir, "lib.basm", "helper: push \"lib\"\nret\n");
    let main = write(
        &dir,
        "main.basm",
        "%entry main\n%define A 1\n%define B 2\nmain: push A\npush B\ncall helper\nhalt\n%include \"lib.basm\"\n",
    );

    let first = assemble(&main).unwrap().encode();
    let second = assemble(&main).unwrap().encode();
    assert_eq!(first, second);
}

#[test]
fn addition_runs_to_halt() {
    let dir = tempdir().unwrap();
    let path = write(&dir, "add.basm", "%entry 0\npush 2\npush 3\nplusi\nhalt\n");

    let mut vm = machine(&path);
    assert_eq!(vm.program.len(), 4);
    vm.run(None).unwrap();
    assert!(vm.halted);
    assert_eq!(stack_u64(&vm), [5]);
}

#[test]
fn step_limit_interrupts_a_loop() {
    let dir = tempdir().unwrap();
    let path = write(&dir, "loop.basm", "%entry loop\nloop: push 1\njmp loop\n");

    let mut vm = machine(&path);
    vm.run(Some(5)).unwrap();
    assert_eq!(vm.steps, 5);
    assert!(!vm.halted);
}

#[test]
fn duplicate_label_from_an_include() {
    let dir = tempdir().unwrap();
    write(&dir, "dup.basm", "nop\nstart: nop\n");
    let main = write(&dir, "main.basm", "%entry start\nstart: nop\n%include \"dup.basm\"\n");

    let err = assemble(&main).unwrap_err();
    assert_eq!(err.kind, AsmErrorKind::DuplicateLabel("start".into()));

    let location = err.location.as_ref().unwrap();
    assert!(location.file.ends_with("dup.basm"));
    assert_eq!(location.line, 2);
    assert!(err.to_string().contains("label `start` is already defined"));
}

#[test]
fn read64_near_the_end_of_memory() {
    let cap = Limits::default().memory_capacity as u64;
    let dir = tempdir().unwrap();

    let bad = write(&dir, "bad.basm", &format!("%entry 0\npush {}\nread64\nhalt\n", cap - 4));
    let mut vm = machine(&bad);
    assert_eq!(vm.run(None), Err(Fault::IllegalMemoryAccess));
    assert_eq!(stack_u64(&vm), [cap - 4]);

    let good = write(&dir, "good.basm", &format!("%entry 0\npush {}\nread64\nhalt\n", cap - 8));
    let mut vm = machine(&good);
    vm.run(None).unwrap();
    assert_eq!(stack_u64(&vm), [0]);
}

#[test]
fn interrupt_one_past_the_native_table() {
    let dir = tempdir().unwrap();
    let path = write(&dir, "int.basm", "%entry 0\nint 8\n");

    let mut vm = machine(&path);
    assert_eq!(vm.natives_len(), 8);
    assert_eq!(vm.run(None), Err(Fault::IllegalOperand));
    assert_eq!(vm.ip, 0);
}

#[test]
fn division_by_zero_keeps_the_stack() {
    let dir = tempdir().unwrap();
    let path = write(&dir, "div.basm", "%entry 0\npush 7\npush 0\ndivi\nhalt\n");

    let mut vm = machine(&path);
    assert_eq!(vm.run(None), Err(Fault::DivisionByZero));
    assert_eq!(stack_u64(&vm), [7, 0]);
}

#[test]
fn forward_references_into_included_files() {
    let dir = tempdir().unwrap();
    write(&dir, "lib/math.basm", "%include \"square.basm\"\n");
    write(
        &dir,
        "lib/square.basm",
        "; x -- x*x\nsquare:\n    swap 1\n    dup 0\n    multi\n    swap 1\n    ret\n",
    );
    let main = write(
        &dir,
        "main.basm",
        "%entry main\nmain:\n    push 9\n    call square\n    halt\n%include \"lib/math.basm\"\n",
    );

    let mut vm = machine(&main);
    vm.run(None).unwrap();
    assert_eq!(stack_u64(&vm), [81]);
}

#[test]
fn self_inclusion_hits_the_depth_limit() {
    let dir = tempdir().unwrap();
    let path = write(&dir, "loop.basm", "nop\n%include \"loop.basm\"\n");

    let err = assemble(&path).unwrap_err();
    assert_eq!(err.kind, AsmErrorKind::IncludeDepthExceeded { max: 10 });
    assert_eq!(err.location.unwrap().line, 2);
}

#[test]
fn heap_pointers_come_after_static_data() {
    let dir = tempdir().unwrap();
    let path = write(
        &dir,
        "heap.basm",
        "\
%entry 0
    push \"0123456789\"
    pop
    push 32
    int 0      ; alloc
    dup 0
    push 255
    write8
    dup 0
    read8
    swap 1
    int 1      ; free
    halt
",
    );

    let mut vm = machine(&path);
    vm.run(None).unwrap();
    assert_eq!(stack_u64(&vm), [255]);
    assert_eq!(vm.memory.as_slice()[16], 255);
    assert_eq!(vm.heap.allocations(), 0);
}

#[test]
fn in_memory_sources_include_relative_to_their_name() {
    let dir = tempdir().unwrap();
    write(&dir, "consts.basm", "%define ANSWER 42\n");

    let name = dir.path().join("virtual.basm");
    let mut asm = Assembler::new();
    asm.translate_source(&name.display().to_string(), "%entry 0\n%include \"consts.basm\"\npush ANSWER\nhalt\n")
        .unwrap();

    let image = asm.image().unwrap();
    assert_eq!(image.program[0].operand, Word::from_u64(42));
}

#[test]
fn disassembly_reassembles_to_the_same_program() {
    let dir = tempdir().unwrap();
    let path = write(
        &dir,
        "prog.basm",
        "\
%entry main
main:
    push -3
    push 2.5
    dup 1
    swap 1
    call sub
    jmp_if main
    halt
sub:
    not
    ret
",
    );
    let image = assemble(&path).unwrap();

    let mut listing = Vec::new();
    disasm::disassemble(&image.program, &mut listing).unwrap();
    let listing = String::from_utf8(listing).unwrap();
    assert!(listing.starts_with("push -3\n"));

    let mut asm = Assembler::new();
    asm.translate_source("listing.basm", &format!("%entry 0\n{}", listing))
        .unwrap();
    assert_eq!(asm.image().unwrap().program, image.program);
}
