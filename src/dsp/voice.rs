//! The `voice_controller` module: turns note events into per-voice
//! control signals.
//!
//! Notes arrive from the host (UI, sequencer, MIDI bridge) through a
//! bounded SPSC ring rather than through the bytecode - they are
//! asynchronous control, not signal flow. The producer half comes from
//! [`crate::vm::Vm::note_events`]; the consumer half is moved into the
//! controller when the VM instantiates it. The module drains the ring at
//! the top of each block and publishes, per voice, a pitch (Hz), a gate
//! (0/1), and a velocity (0..1) block.

use rtrb::Consumer;

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::Block;

/// Fixed polyphony of the controller.
pub const NUM_VOICES: usize = 8;

/// Control outputs per voice: pitch, gate, velocity.
pub const OUTPUTS_PER_VOICE: usize = 3;

/// One note message from the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoteEvent {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[derive(Debug, Clone, Copy)]
struct VoiceSlot {
    note: u8,
    freq: f32,
    velocity: f32,
    gate: bool,
    /// Block counter value when the voice last started, for stealing.
    started: u64,
}

impl VoiceSlot {
    fn silent() -> VoiceSlot {
        VoiceSlot {
            note: 0,
            freq: 0.0,
            velocity: 0.0,
            gate: false,
            started: 0,
        }
    }
}

pub struct VoiceController {
    events: Option<Consumer<NoteEvent>>,
    voices: [VoiceSlot; NUM_VOICES],
    clock: u64,
}

impl VoiceController {
    /// `events` is `None` when the host never requested a note queue or a
    /// second controller was instantiated; the controller then holds all
    /// gates low.
    pub fn new(events: Option<Consumer<NoteEvent>>) -> VoiceController {
        VoiceController {
            events,
            voices: [VoiceSlot::silent(); NUM_VOICES],
            clock: 0,
        }
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        // First free voice, else steal the longest-running one.
        let index = self
            .voices
            .iter()
            .position(|v| !v.gate)
            .unwrap_or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.started)
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            });
        let slot = &mut self.voices[index];
        slot.note = note;
        slot.freq = midi_note_to_freq(note);
        slot.velocity = velocity as f32 / 127.0;
        slot.gate = true;
        slot.started = self.clock;
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut() {
            if voice.gate && voice.note == note {
                voice.gate = false;
            }
        }
    }
}

impl DspModule for VoiceController {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        let required_outputs = NUM_VOICES * OUTPUTS_PER_VOICE;
        if !validate_ports(
            modules::VOICE_CONTROLLER,
            inputs,
            &[],
            outputs,
            required_outputs,
            log,
        ) {
            return;
        }

        // Take the consumer so draining does not hold a borrow of self.
        if let Some(mut events) = self.events.take() {
            while let Ok(event) = events.pop() {
                match event {
                    NoteEvent::On { note, velocity } => self.note_on(note, velocity),
                    NoteEvent::Off { note } => self.note_off(note),
                }
            }
            self.events = Some(events);
        }

        for (v, voice) in self.voices.iter().enumerate() {
            let base = v * OUTPUTS_PER_VOICE;
            outputs[base].fill(voice.freq);
            outputs[base + 1].fill(if voice.gate { 1.0 } else { 0.0 });
            outputs[base + 2].fill(voice.velocity);
        }
        self.clock += 1;
    }
}
