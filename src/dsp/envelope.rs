//! The `adsr` envelope module.

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::{Block, BLOCK_SIZE};

/*
Level
  1.0 ┐     /\________
      │    /  \       \
  0.7 │   /    \_______\___
      │  /              \  \
  0.0 └─/────────────────\──\─> Time
      Attack Decay Sustain Release

Gate high drives Attack -> Decay -> Sustain; gate low drives Release.
Segments are exponential: each stage is a one-pole chase toward a target,

    level += coef * (target - level)    per sample
    coef   = 1 - exp(-1 / (time_s * sample_rate))

which gives the familiar analog RC shape rather than straight lines. The
attack chases slightly past 1.0 so it actually arrives instead of
approaching forever; it hands over to Decay when the level crosses 1.0.

Stage times and the sustain level are re-read once per block from the
first sample of their inputs, matching the block-rate parameter
convention of the rest of the library.
*/

/// Attack aims here so the exponential segment reaches 1.0 in roughly the
/// configured time.
const ATTACK_OVERSHOOT_TARGET: f32 = 1.3;

/// Below this level a release is considered finished.
const SILENCE_FLOOR: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

pub struct Adsr {
    stage: Stage,
    level: f32,
    sample_rate: f32,
}

impl Adsr {
    pub fn new(sample_rate: f32) -> Adsr {
        Adsr {
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn chase_coef(&self, time_s: f32) -> f32 {
        let samples = (time_s * self.sample_rate).max(1.0);
        1.0 - (-1.0 / samples).exp()
    }
}

impl DspModule for Adsr {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::ADSR, inputs, &[0, 1, 2, 3, 4], outputs, 1, log) {
            return;
        }
        let gate = inputs[0].unwrap();
        let attack = self.chase_coef(inputs[1].unwrap()[0]);
        let decay = self.chase_coef(inputs[2].unwrap()[0]);
        let sustain = inputs[3].unwrap()[0].clamp(0.0, 1.0);
        let release = self.chase_coef(inputs[4].unwrap()[0]);

        for i in 0..BLOCK_SIZE {
            let gate_high = gate[i] > 0.5;
            match self.stage {
                Stage::Idle | Stage::Release if gate_high => self.stage = Stage::Attack,
                Stage::Attack | Stage::Decay | Stage::Sustain if !gate_high => {
                    self.stage = Stage::Release
                }
                _ => {}
            }

            match self.stage {
                Stage::Idle => self.level = 0.0,
                Stage::Attack => {
                    self.level += attack * (ATTACK_OVERSHOOT_TARGET - self.level);
                    if self.level >= 1.0 {
                        self.level = 1.0;
                        self.stage = Stage::Decay;
                    }
                }
                Stage::Decay => {
                    self.level += decay * (sustain - self.level);
                    if (self.level - sustain).abs() < 1.0e-3 {
                        self.level = sustain;
                        self.stage = Stage::Sustain;
                    }
                }
                Stage::Sustain => self.level = sustain,
                Stage::Release => {
                    self.level += release * (0.0 - self.level);
                    if self.level < SILENCE_FLOOR {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
            }
            outputs[0][i] = self.level;
        }
    }
}
