//! End-to-end pipeline tests: patch text -> graph -> bytecode -> VM.
//! Ensures that:
//! - compiled patches produce the expected audio and register contents
//! - the whole chain is deterministic
//! - bad programs degrade to silence instead of failing loudly

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::Arc;

use patchvm::bytecode::{BytecodeHeader, HEADER_WORDS, MAGIC};
use patchvm::compiler::{compile, CompileError};
use patchvm::patch::parse_patch;
use patchvm::registry::ModuleRegistry;
use patchvm::vm::Vm;
use patchvm::BLOCK_SIZE;

const SR: f32 = 48_000.0;

// Allocation shim: counts allocations per thread so one test can prove the
// audio path is allocation-free without seeing the other tests' traffic.
thread_local! {
    static THREAD_ALLOCS: Cell<u64> = const { Cell::new(0) };
}

struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = THREAD_ALLOCS.try_with(|count| count.set(count.get() + 1));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn allocations_on_this_thread() -> u64 {
    THREAD_ALLOCS.with(|count| count.get())
}

fn build_vm(patch_text: &str) -> Vm {
    let registry = Arc::new(ModuleRegistry::with_builtins());
    let graph = parse_patch(patch_text).expect("patch parses");
    let program = compile(&graph, &registry).expect("patch compiles");
    let mut vm = Vm::new(registry, SR, true);
    vm.load_program(program);
    vm
}

#[test]
fn tone_chain_reaches_both_channels_scaled() {
    let mut vm = build_vm(
        r#"{
            "modules": [
                {"id": 1, "name": "sine_gen", "data": {"freq": 440.0}},
                {"id": 2, "name": "gain", "data": {"gain": 0.5}},
                {"id": 3, "name": "audio_out"}
            ],
            "connections": [
                {"from": "1:out", "to": "2:in"},
                {"from": "2:out", "to": "3:L"},
                {"from": "2:out", "to": "3:R"}
            ]
        }"#,
    );

    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];
    {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        vm.process(&[], &mut outs, BLOCK_SIZE);
    }

    assert_eq!(left, right, "both channels fed from the same register");
    assert!(
        left.iter().all(|&s| (-0.5..=0.5).contains(&s)),
        "gain 0.5 bounds the sine"
    );
    assert!(
        left.iter().any(|&s| s.abs() > 0.1),
        "output should contain signal, not silence"
    );
}

#[test]
fn math_chain_sums_latched_constants() {
    let mut vm = build_vm(
        r#"{
            "modules": [
                {"id": 1, "name": "float", "data": {"in": 10.0}},
                {"id": 2, "name": "float", "data": {"in": 20.0}},
                {"id": 3, "name": "add"}
            ],
            "connections": [
                {"from": "1:out", "to": "3:in1"},
                {"from": "2:out", "to": "3:in2"}
            ]
        }"#,
    );
    vm.process(&[], &mut [], BLOCK_SIZE);

    // Registers: r0 = const 10, r1 = float#1 out, r2 = const 20,
    // r3 = float#2 out, r4 = add out.
    let sum = vm.register_snapshot(4).expect("add output register");
    assert!(sum.iter().all(|&s| s == 30.0), "every lane holds 10 + 20");
}

#[test]
fn int_latch_truncates() {
    let mut vm = build_vm(r#"{"modules": [{"id": 1, "name": "int", "data": {"in": 99.8}}]}"#);
    vm.process(&[], &mut [], BLOCK_SIZE);

    let out = vm.register_snapshot(1).expect("int output register");
    assert!(out.iter().all(|&s| s == 99.0));
}

#[test]
fn cyclic_patch_is_rejected() {
    let registry = ModuleRegistry::with_builtins();
    let graph = parse_patch(
        r#"{
            "modules": [
                {"id": 1, "name": "add"},
                {"id": 2, "name": "gain"}
            ],
            "connections": [
                {"from": "1:out", "to": "2:in"},
                {"from": "2:out", "to": "1:in1"}
            ]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        compile(&graph, &registry),
        Err(CompileError::CycleDetected)
    ));
}

#[test]
fn bad_magic_program_yields_silence_and_no_instances() {
    let registry = Arc::new(ModuleRegistry::with_builtins());
    let mut vm = Vm::new(registry, SR, true);
    vm.load_program(vec![0xDEADBEEF, 1, 4, 1]);

    let mut left = [0.9f32; BLOCK_SIZE];
    let mut right = [0.9f32; BLOCK_SIZE];
    {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        vm.process(&[], &mut outs, BLOCK_SIZE);
    }

    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    assert_eq!(vm.instance_count(), 0);
}

#[test]
fn every_node_is_instantiated_exactly_once_per_program() {
    let mut vm = build_vm(
        r#"{
            "modules": [
                {"id": 10, "name": "phasor_gen", "data": {"freq": 2.0}},
                {"id": 11, "name": "float", "data": {"in": 0.5}},
                {"id": 12, "name": "threshold"},
                {"id": 13, "name": "adsr",
                 "data": {"attack_s": 0.01, "decay_s": 0.05, "sustain": 0.7, "release_s": 0.1}},
                {"id": 14, "name": "sine_gen", "data": {"freq": 220.0}},
                {"id": 15, "name": "mul"},
                {"id": 16, "name": "audio_out"}
            ],
            "connections": [
                {"from": "10:out", "to": "12:signal"},
                {"from": "11:out", "to": "12:threshold"},
                {"from": "12:out", "to": "13:gate"},
                {"from": "14:out", "to": "15:in1"},
                {"from": "13:out", "to": "15:in2"},
                {"from": "15:out", "to": "16:L"},
                {"from": "15:out", "to": "16:R"}
            ]
        }"#,
    );

    for _ in 0..4 {
        vm.process(&[], &mut [], BLOCK_SIZE);
    }
    // audio_out is lowered to AUDIO_OUT rather than an instance, so the
    // six processing nodes are the live set.
    assert_eq!(vm.instance_count(), 6);
}

#[test]
fn gated_envelope_patch_produces_audio_once_gate_opens() {
    // phasor at 30 Hz crosses the 0.5 threshold within a couple of blocks,
    // opening the envelope over the sine.
    let mut vm = build_vm(
        r#"{
            "modules": [
                {"id": 1, "name": "phasor_gen", "data": {"freq": 30.0}},
                {"id": 2, "name": "float", "data": {"in": 0.5}},
                {"id": 3, "name": "threshold"},
                {"id": 4, "name": "adsr",
                 "data": {"attack_s": 0.001, "decay_s": 0.05, "sustain": 0.8, "release_s": 0.05}},
                {"id": 5, "name": "sine_gen", "data": {"freq": 330.0}},
                {"id": 6, "name": "mul"},
                {"id": 7, "name": "audio_out"}
            ],
            "connections": [
                {"from": "1:out", "to": "3:signal"},
                {"from": "2:out", "to": "3:threshold"},
                {"from": "3:out", "to": "4:gate"},
                {"from": "5:out", "to": "6:in1"},
                {"from": "4:out", "to": "6:in2"},
                {"from": "6:out", "to": "7:L"},
                {"from": "6:out", "to": "7:R"}
            ]
        }"#,
    );

    let mut heard = false;
    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];
    for _ in 0..64 {
        left.fill(0.0);
        right.fill(0.0);
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            vm.process(&[], &mut outs, BLOCK_SIZE);
        }
        heard |= left.iter().any(|&s| s.abs() > 0.05);
        assert!(left.iter().all(|&s| s.abs() <= 1.0));
    }
    assert!(heard, "gated voice should become audible within 64 blocks");
}

#[test]
fn steady_state_blocks_do_not_allocate() {
    let mut vm = build_vm(
        r#"{
            "modules": [
                {"id": 1, "name": "saw_gen", "data": {"freq": 110.0}},
                {"id": 2, "name": "lopass", "data": {"cutoff": 900.0, "Q": 1.2}},
                {"id": 3, "name": "gain", "data": {"gain": 0.25}},
                {"id": 4, "name": "audio_out"}
            ],
            "connections": [
                {"from": "1:out", "to": "2:in"},
                {"from": "2:out", "to": "3:in"},
                {"from": "3:out", "to": "4:L"},
                {"from": "3:out", "to": "4:R"}
            ]
        }"#,
    );

    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];

    // First block pays the lazy instantiation cost.
    {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        vm.process(&[], &mut outs, BLOCK_SIZE);
    }

    let before = allocations_on_this_thread();
    for _ in 0..32 {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        vm.process(&[], &mut outs, BLOCK_SIZE);
    }
    let after = allocations_on_this_thread();
    assert_eq!(after - before, 0, "process must not allocate after warm-up");
}

#[test]
fn recompiling_a_reparsed_patch_is_byte_identical() {
    let registry = ModuleRegistry::with_builtins();
    let text = r#"{
        "modules": [
            {"id": 2, "name": "gain", "data": {"gain": 0.5}},
            {"id": 1, "name": "sine_gen", "data": {"freq": 440.0}},
            {"id": 3, "name": "audio_out"}
        ],
        "connections": [
            {"from": "1:out", "to": "2:in"},
            {"from": "2:out", "to": "3:L"},
            {"from": "2:out", "to": "3:R"}
        ]
    }"#;

    let first = compile(&parse_patch(text).unwrap(), &registry).unwrap();
    let second = compile(&parse_patch(text).unwrap(), &registry).unwrap();
    assert_eq!(first, second);

    let header = BytecodeHeader::read(&first).unwrap();
    assert_eq!(header.magic, MAGIC);
    assert_eq!(
        header.program_size_words as usize,
        first.len(),
        "header word count covers header plus instructions"
    );
    assert_eq!(first.len() - HEADER_WORDS, 26, "canonical tone program body");
}

#[test]
fn voice_controller_drives_a_polyphonic_voice() {
    let registry = Arc::new(ModuleRegistry::with_builtins());
    let graph = parse_patch(
        r#"{
            "modules": [
                {"id": 1, "name": "voice_controller"},
                {"id": 2, "name": "sine_gen"},
                {"id": 3, "name": "adsr",
                 "data": {"attack_s": 0.001, "decay_s": 0.02, "sustain": 0.7, "release_s": 0.05}},
                {"id": 4, "name": "mul"},
                {"id": 5, "name": "audio_out"}
            ],
            "connections": [
                {"from": "1:v0_pitch", "to": "2:freq"},
                {"from": "1:v0_gate", "to": "3:gate"},
                {"from": "2:out", "to": "4:in1"},
                {"from": "3:out", "to": "4:in2"},
                {"from": "4:out", "to": "5:L"},
                {"from": "4:out", "to": "5:R"}
            ]
        }"#,
    )
    .unwrap();
    let program = compile(&graph, &registry).unwrap();

    let mut vm = Vm::new(registry, SR, true);
    vm.load_program(program);
    let mut notes = vm.note_events().expect("note queue available once");

    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];

    // Silent until a note arrives.
    {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        vm.process(&[], &mut outs, BLOCK_SIZE);
    }
    assert!(left.iter().all(|&s| s == 0.0));

    notes
        .push(patchvm::dsp::voice::NoteEvent::On {
            note: 69,
            velocity: 100,
        })
        .unwrap();

    let mut heard = false;
    for _ in 0..16 {
        left.fill(0.0);
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            vm.process(&[], &mut outs, BLOCK_SIZE);
        }
        heard |= left.iter().any(|&s| s.abs() > 0.05);
    }
    assert!(heard, "note-on should open the gate and sound the voice");
}
