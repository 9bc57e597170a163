//! The register-based DSP virtual machine.
//!
//! The VM owns the loaded bytecode, a register file of audio blocks, and
//! the live module instances. `load_program` runs on the control thread
//! and may allocate; `process` runs on the audio thread once per block and
//! walks the instruction stream straight-line - no allocation in steady
//! state, no locks, no blocking.
//!
//! The host must not call `load_program` concurrently with `process`;
//! drivers here serialize the two behind a mutex held only for the
//! duration of a callback (stop-swap-restart, see `audio`).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::bytecode::{BytecodeHeader, OpCode, HEADER_WORDS, MAGIC, NULL_REG, VERSION};
use crate::dsp::{self, modules, DspModule};
use crate::logging::{Component, LogTx};
use crate::registry::ModuleRegistry;
use crate::{Block, BLOCK_SIZE, SILENT_BLOCK};

/// Upper bound on ports of any single instruction. The widest module is
/// `voice_controller` with 24 outputs.
const MAX_PORTS: usize = 32;

/// Capacity of the host -> voice_controller note ring.
const NOTE_QUEUE_CAPACITY: usize = 256;

/// What the VM knows about the external audio sink it feeds. Held by weak
/// reference: the driver owns itself, the VM only observes it.
pub trait AudioSink: Send + Sync {
    /// Opaque device identifier the host selected.
    fn device_id(&self) -> u32;
    fn sample_rate(&self) -> f32;
}

pub struct Vm {
    registry: Arc<ModuleRegistry>,
    sample_rate: f32,
    test_mode: bool,
    bytecode: Vec<u32>,
    registers: Vec<Block>,
    /// Live modules keyed by node id - a patch may use the same module
    /// type many times.
    instances: HashMap<u32, Box<dyn DspModule>>,
    /// Scratch blocks modules write into before results are copied to
    /// registers; keeps hostile in/out register aliasing impossible.
    out_scratch: Vec<Block>,
    log: LogTx,
    audio_sink: Weak<dyn AudioSink>,
    /// Producer half handed to the host once via `note_events`.
    note_tx: Option<Producer<dsp::voice::NoteEvent>>,
    /// Consumer half moved into the first voice_controller instance.
    note_rx: Option<Consumer<dsp::voice::NoteEvent>>,
}

impl Vm {
    pub fn new(registry: Arc<ModuleRegistry>, sample_rate: f32, test_mode: bool) -> Vm {
        let (note_tx, note_rx) = RingBuffer::new(NOTE_QUEUE_CAPACITY);
        Vm {
            registry,
            sample_rate,
            test_mode,
            bytecode: Vec::new(),
            registers: Vec::new(),
            instances: HashMap::new(),
            out_scratch: vec![SILENT_BLOCK; MAX_PORTS],
            log: LogTx::detached(),
            audio_sink: Weak::<NoSink>::new(),
            note_tx: Some(note_tx),
            note_rx: Some(note_rx),
        }
    }

    /// Install the audio-thread-safe log channel. Without one, records are
    /// discarded.
    pub fn set_logger(&mut self, log: LogTx) {
        self.log = log;
    }

    /// Record the external sink this VM feeds.
    pub fn set_audio_sink(&mut self, sink: Weak<dyn AudioSink>) {
        self.audio_sink = sink;
    }

    /// Hand out the producer side of the note-event ring consumed by the
    /// patch's `voice_controller`. Yields once; later calls return `None`.
    pub fn note_events(&mut self) -> Option<Producer<dsp::voice::NoteEvent>> {
        self.note_tx.take()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Currently loaded program, header included. Empty when no program.
    pub fn program(&self) -> &[u32] {
        &self.bytecode
    }

    /// Number of live module instances. Modules are created lazily on
    /// first dispatch, so this grows during the first processed block.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Read a register. Test-mode only; returns `None` otherwise, and for
    /// out-of-range indices.
    pub fn register_snapshot(&self, index: usize) -> Option<&Block> {
        if !self.test_mode {
            return None;
        }
        self.registers.get(index)
    }

    /// Replace the loaded program. Control thread only.
    ///
    /// On a bad header the VM logs, drops the program, and emits silence
    /// until a valid one arrives; it never panics or propagates an error
    /// into the audio path. Existing module instances are discarded either
    /// way. The note-event queue belongs to the first `voice_controller`
    /// this VM ever instantiates; hosts swapping between voice patches
    /// should build a fresh VM.
    pub fn load_program(&mut self, bytecode: Vec<u32>) {
        self.bytecode = bytecode;
        self.instances.clear();

        let Some(header) = BytecodeHeader::read(&self.bytecode) else {
            self.log.error(
                Component::Vm,
                "program too short for header",
                self.bytecode.len() as u32,
                0,
            );
            self.bytecode.clear();
            return;
        };
        if header.magic != MAGIC {
            self.log
                .error(Component::Vm, "bad program magic", header.magic, MAGIC);
            self.bytecode.clear();
            return;
        }
        if header.version != VERSION {
            self.log
                .error(Component::Vm, "program version mismatch", header.version, VERSION);
            self.bytecode.clear();
            return;
        }

        self.registers
            .resize(header.num_registers as usize, SILENT_BLOCK);

        if self.audio_sink.upgrade().is_none() {
            self.log
                .info(Component::Vm, "program loaded headless", header.program_size_words, 0);
        } else {
            self.log.info(
                Component::Vm,
                "program loaded",
                header.program_size_words,
                header.num_registers,
            );
        }
    }

    /// Execute one block. Audio thread.
    ///
    /// `outputs` are the host's channel buffers; pass an empty slice to
    /// run headless (the sink opcode becomes a no-op and registers stay
    /// inspectable via `register_snapshot`). `n_frames` must equal
    /// [`BLOCK_SIZE`]; the driver guarantees it.
    pub fn process(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], n_frames: usize) {
        debug_assert_eq!(n_frames, BLOCK_SIZE);
        let frames = n_frames.min(BLOCK_SIZE);

        if self.bytecode.len() <= HEADER_WORDS {
            for channel in outputs.iter_mut() {
                let n = frames.min(channel.len());
                channel[..n].fill(0.0);
            }
            return;
        }

        let mut pc = HEADER_WORDS;
        while pc < self.bytecode.len() {
            match OpCode::from_word(self.bytecode[pc]) {
                Some(OpCode::NoOp) => pc += 1,
                Some(OpCode::LoadK) => {
                    if pc + 3 > self.bytecode.len() {
                        self.log
                            .error(Component::Vm, "truncated LOAD_K", pc as u32, 0);
                        return;
                    }
                    let dest = self.bytecode[pc + 1] as usize;
                    let value = f32::from_bits(self.bytecode[pc + 2]);
                    let Some(register) = self.registers.get_mut(dest) else {
                        self.log.error(
                            Component::Vm,
                            "LOAD_K register out of range",
                            dest as u32,
                            pc as u32,
                        );
                        return;
                    };
                    register.fill(value);
                    pc += 3;
                }
                Some(OpCode::Proc) => {
                    let Some(advance) = self.exec_proc(pc) else {
                        return;
                    };
                    pc += advance;
                }
                Some(OpCode::AudioOut) => {
                    let Some(advance) = self.exec_audio_out(pc, outputs, frames) else {
                        return;
                    };
                    pc += advance;
                }
                Some(OpCode::End) => return,
                None => {
                    self.log.error(
                        Component::Vm,
                        "unknown opcode",
                        self.bytecode[pc],
                        pc as u32,
                    );
                    return;
                }
            }
        }
    }

    /// Run one `PROC`. Returns how far to advance the program counter, or
    /// `None` to abort the block.
    fn exec_proc(&mut self, pc: usize) -> Option<usize> {
        if pc + 5 > self.bytecode.len() {
            self.log
                .error(Component::Vm, "truncated PROC", pc as u32, 0);
            return None;
        }
        let node_id = self.bytecode[pc + 1];
        let module_id = self.bytecode[pc + 2];
        let n_in = self.bytecode[pc + 3] as usize;
        let n_out = self.bytecode[pc + 4] as usize;
        if n_in > MAX_PORTS || n_out > MAX_PORTS {
            self.log
                .error(Component::Vm, "PROC port count too large", node_id, pc as u32);
            return None;
        }
        let operands = pc + 5;
        let advance = 5 + n_in + n_out;
        if pc + advance > self.bytecode.len() {
            self.log
                .error(Component::Vm, "PROC runs past end of program", node_id, pc as u32);
            return None;
        }

        let instance = match self.instances.entry(node_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let module = build_module(
                    module_id,
                    self.sample_rate,
                    self.test_mode,
                    &mut self.note_rx,
                );
                match module {
                    Some(module) => entry.insert(module),
                    None => {
                        self.log
                            .error(Component::Vm, "unknown module id", module_id, pc as u32);
                        return None;
                    }
                }
            }
        };

        // Gather inputs straight from the register file; NULL_REG means
        // the port is unconnected.
        let mut in_refs: [Option<&Block>; MAX_PORTS] = [None; MAX_PORTS];
        for i in 0..n_in {
            let word = self.bytecode[operands + i];
            if word == NULL_REG {
                continue;
            }
            match self.registers.get(word as usize) {
                Some(register) => in_refs[i] = Some(register),
                None => {
                    self.log.error(
                        Component::Vm,
                        "PROC input register out of range",
                        word,
                        pc as u32,
                    );
                    return None;
                }
            }
        }
        for i in 0..n_out {
            let word = self.bytecode[operands + n_in + i];
            if word as usize >= self.registers.len() {
                self.log.error(
                    Component::Vm,
                    "PROC output register out of range",
                    word,
                    pc as u32,
                );
                return None;
            }
        }

        instance.process(
            &in_refs[..n_in],
            &mut self.out_scratch[..n_out],
            &mut self.log,
        );

        for i in 0..n_out {
            let register = self.bytecode[operands + n_in + i] as usize;
            self.registers[register] = self.out_scratch[i];
        }
        Some(advance)
    }

    /// Run one `AUDIO_OUT`: copy source registers into the host's channel
    /// buffers where present.
    fn exec_audio_out(
        &mut self,
        pc: usize,
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> Option<usize> {
        if pc + 2 > self.bytecode.len() {
            self.log
                .error(Component::Vm, "truncated AUDIO_OUT", pc as u32, 0);
            return None;
        }
        let n_in = self.bytecode[pc + 1] as usize;
        if n_in > MAX_PORTS || pc + 2 + n_in > self.bytecode.len() {
            self.log
                .error(Component::Vm, "AUDIO_OUT runs past end of program", pc as u32, 0);
            return None;
        }

        for i in 0..n_in {
            let word = self.bytecode[pc + 2 + i];
            let Some(register) = self.registers.get(word as usize) else {
                self.log.error(
                    Component::Vm,
                    "AUDIO_OUT register out of range",
                    word,
                    pc as u32,
                );
                return None;
            };
            if let Some(channel) = outputs.get_mut(i) {
                let n = frames.min(channel.len());
                channel[..n].copy_from_slice(&register[..n]);
            }
        }
        Some(2 + n_in)
    }
}

/// The factory switch: stable module id -> fresh instance. The only place
/// where type identity is resolved at runtime.
fn build_module(
    module_id: u32,
    sample_rate: f32,
    test_mode: bool,
    note_rx: &mut Option<Consumer<dsp::voice::NoteEvent>>,
) -> Option<Box<dyn DspModule>> {
    use crate::dsp::{arith, audio_out, envelope, filter, latch, oscillator, voice};

    let module: Box<dyn DspModule> = match module_id {
        // The in-VM sink never drives hardware; see dsp::audio_out.
        modules::AUDIO_OUT => Box::new(audio_out::AudioOut::silent(test_mode)),
        modules::SINE_GEN => Box::new(oscillator::SineGen::new(sample_rate)),
        modules::PHASOR_GEN => Box::new(oscillator::PhasorGen::new(sample_rate)),
        modules::SAW_GEN => Box::new(oscillator::SawGen::new(sample_rate)),
        modules::PULSE_GEN => Box::new(oscillator::PulseGen::new(sample_rate)),
        modules::LOPASS => Box::new(filter::SvFilter::lopass(sample_rate)),
        modules::HIPASS => Box::new(filter::SvFilter::hipass(sample_rate)),
        modules::BANDPASS => Box::new(filter::SvFilter::bandpass(sample_rate)),
        modules::BIQUAD => Box::new(filter::Biquad::new(sample_rate)),
        modules::ADD => Box::new(arith::Add),
        modules::MUL => Box::new(arith::Mul),
        modules::GAIN => Box::new(arith::Gain),
        modules::FLOAT => Box::new(latch::FloatLatch::new()),
        modules::INT => Box::new(latch::IntLatch::new()),
        modules::THRESHOLD => Box::new(arith::Threshold),
        modules::ADSR => Box::new(envelope::Adsr::new(sample_rate)),
        modules::VOICE_CONTROLLER => Box::new(voice::VoiceController::new(note_rx.take())),
        _ => return None,
    };
    Some(module)
}

/// Placeholder for "no sink attached"; `Weak::new` needs a sized type.
struct NoSink;

impl AudioSink for NoSink {
    fn device_id(&self) -> u32 {
        u32::MAX
    }
    fn sample_rate(&self) -> f32 {
        0.0
    }
}
