//! patchvm - modular synthesis patches compiled to bytecode for a
//! block-based register VM.
//!
//! A patch is a JSON-described graph of DSP modules. The pipeline:
//!
//! 1. [`patch::parse_patch`] turns patch text into a [`patch::PatchGraph`]
//! 2. [`compiler::compile`] lowers the graph to bytecode (topological
//!    sort, register allocation, instruction emission)
//! 3. [`vm::Vm`] executes the bytecode one audio block at a time on the
//!    audio thread, driving the module library in [`dsp`]
//!
//! The host audio driver lives in [`audio`]; diagnostics from the audio
//! thread travel through the ring channel in [`logging`].

pub mod audio;
pub mod bytecode;
pub mod compiler;
pub mod dsp;
pub mod logging;
pub mod patch;
pub mod registry;
pub mod vm;

/// Samples per processing block. Every VM register holds exactly one block.
pub const BLOCK_SIZE: usize = 64;

/// One block of audio-rate samples, the unit registers and modules work in.
pub type Block = [f32; BLOCK_SIZE];

/// A block of silence, for initializing registers and muting outputs.
pub const SILENT_BLOCK: Block = [0.0; BLOCK_SIZE];
