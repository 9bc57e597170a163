//! Bytecode format shared by the compiler and the VM.
//!
//! A program is a flat `Vec<u32>`: a four-word header followed by an
//! instruction stream. All operands are 32-bit words; float constants are
//! carried as their raw IEEE-754 bits.

use std::fmt::Write;

use crate::registry::ModuleRegistry;

/// Identifies a patchvm bytecode buffer ("PVM1").
pub const MAGIC: u32 = u32::from_be_bytes(*b"PVM1");

/// Bumped whenever the instruction encoding changes.
pub const VERSION: u32 = 1;

/// Words in the header preceding the instruction stream.
pub const HEADER_WORDS: usize = 4;

/// Operand marking an unconnected input port. Never a valid register
/// index; the compiler allocates registers counting up from zero.
pub const NULL_REG: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    /// Does nothing. Reserved for patching out instructions in place.
    NoOp = 0x00,
    /// `LOAD_K dest_reg, raw_bits` - broadcast a constant into a register.
    LoadK = 0x01,
    /// `PROC node_id, module_id, n_in, n_out, in_regs.., out_regs..`
    Proc = 0x02,
    /// `AUDIO_OUT n_in, in_regs..` - copy registers to the host buffers.
    AudioOut = 0x03,
    /// End of program for this block.
    End = 0xFF,
}

impl OpCode {
    pub fn from_word(word: u32) -> Option<OpCode> {
        match word {
            0x00 => Some(OpCode::NoOp),
            0x01 => Some(OpCode::LoadK),
            0x02 => Some(OpCode::Proc),
            0x03 => Some(OpCode::AudioOut),
            0xFF => Some(OpCode::End),
            _ => None,
        }
    }
}

/// The four words at the front of every program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeHeader {
    pub magic: u32,
    pub version: u32,
    /// Total program length in words, header included.
    pub program_size_words: u32,
    /// Registers the VM must provide before executing.
    pub num_registers: u32,
}

impl BytecodeHeader {
    /// Decode the header from the front of a word buffer. Returns `None`
    /// when the buffer is shorter than a header.
    pub fn read(words: &[u32]) -> Option<BytecodeHeader> {
        if words.len() < HEADER_WORDS {
            return None;
        }
        Some(BytecodeHeader {
            magic: words[0],
            version: words[1],
            program_size_words: words[2],
            num_registers: words[3],
        })
    }

    pub fn write(&self, out: &mut Vec<u32>) {
        out.push(self.magic);
        out.push(self.version);
        out.push(self.program_size_words);
        out.push(self.num_registers);
    }
}

fn reg_name(word: u32) -> String {
    if word == NULL_REG {
        "-".to_owned()
    } else {
        format!("r{word}")
    }
}

/// Render a program as a human-readable listing, one instruction per line.
/// Module ids are resolved to names through the registry where possible.
/// Stops at the first malformed instruction.
pub fn disasm(words: &[u32], registry: &ModuleRegistry) -> String {
    let mut text = String::new();
    match BytecodeHeader::read(words) {
        Some(h) => {
            let _ = writeln!(
                text,
                "header magic={:#010x} version={} words={} registers={}",
                h.magic, h.version, h.program_size_words, h.num_registers
            );
        }
        None => return "truncated header\n".to_owned(),
    }

    let mut pc = HEADER_WORDS;
    while pc < words.len() {
        match OpCode::from_word(words[pc]) {
            Some(OpCode::NoOp) => {
                let _ = writeln!(text, "{pc:4}  NO_OP");
                pc += 1;
            }
            Some(OpCode::LoadK) => {
                if pc + 2 >= words.len() {
                    let _ = writeln!(text, "{pc:4}  LOAD_K <truncated>");
                    break;
                }
                let value = f32::from_bits(words[pc + 2]);
                let _ = writeln!(text, "{pc:4}  LOAD_K    r{} <- {value}", words[pc + 1]);
                pc += 3;
            }
            Some(OpCode::Proc) => {
                if pc + 4 >= words.len() {
                    let _ = writeln!(text, "{pc:4}  PROC <truncated>");
                    break;
                }
                let node_id = words[pc + 1];
                let module_id = words[pc + 2];
                let n_in = words[pc + 3] as usize;
                let n_out = words[pc + 4] as usize;
                if pc + 5 + n_in + n_out > words.len() {
                    let _ = writeln!(text, "{pc:4}  PROC <truncated>");
                    break;
                }
                let name = registry.name_of(module_id).unwrap_or("?");
                let ins: Vec<String> = (0..n_in)
                    .map(|i| reg_name(words[pc + 5 + i]))
                    .collect();
                let outs: Vec<String> = (0..n_out)
                    .map(|i| reg_name(words[pc + 5 + n_in + i]))
                    .collect();
                let _ = writeln!(
                    text,
                    "{pc:4}  PROC      node {node_id} {name} [{}] -> [{}]",
                    ins.join(" "),
                    outs.join(" ")
                );
                pc += 5 + n_in + n_out;
            }
            Some(OpCode::AudioOut) => {
                if pc + 1 >= words.len() {
                    let _ = writeln!(text, "{pc:4}  AUDIO_OUT <truncated>");
                    break;
                }
                let n_in = words[pc + 1] as usize;
                if pc + 2 + n_in > words.len() {
                    let _ = writeln!(text, "{pc:4}  AUDIO_OUT <truncated>");
                    break;
                }
                let ins: Vec<String> = (0..n_in)
                    .map(|i| reg_name(words[pc + 2 + i]))
                    .collect();
                let _ = writeln!(text, "{pc:4}  AUDIO_OUT [{}]", ins.join(" "));
                pc += 2 + n_in;
            }
            Some(OpCode::End) => {
                let _ = writeln!(text, "{pc:4}  END");
                break;
            }
            None => {
                let _ = writeln!(text, "{pc:4}  ??? {:#010x}", words[pc]);
                break;
            }
        }
    }
    text
}
