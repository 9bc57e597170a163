//! Oscillator modules: `sine_gen`, `saw_gen`, `pulse_gen`, `phasor_gen`.

use std::f32::consts::TAU;

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::{Block, BLOCK_SIZE};

/*
Phase and band-limiting
=======================

Every oscillator here is a phase accumulator. Each sample it advances by

    phase_inc = frequency / sample_rate      (cycles per sample)

and wraps back into [0, 1) after a full cycle. The waveform is a function
of the current phase.

A sine of the phase is already band-limited: it has exactly one partial.
Saw and pulse waves jump, and a jump sampled naively sprays aliases across
the spectrum. We remove most of that with polyBLEP: near each
discontinuity, subtract a two-sample polynomial approximation of the
band-limited step residual. The correction only touches samples within one
phase_inc of the jump, so the cheap naive waveform is untouched elsewhere.

    poly_blep(t, dt):
        t < dt:        2t/dt - (t/dt)^2 - 1     (just after the jump)
        t > 1 - dt:    (u/dt)^2 + 2u/dt + 1     with u = t - 1 (just before)
        otherwise:     0

The phasor is the phase itself, published as a signal in [0, 1). It is a
control/timing source, so it stays naive on purpose: correcting its wrap
would bend the very ramp patches use it for.
*/

/// PolyBLEP residual for a downward unit step at phase 0.
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// `sine_gen`: phase-accumulator sine with audio-rate frequency input.
pub struct SineGen {
    phase: f32, // radians, [0, TAU)
    sample_rate: f32,
}

impl SineGen {
    pub fn new(sample_rate: f32) -> SineGen {
        SineGen {
            phase: 0.0,
            sample_rate,
        }
    }
}

impl DspModule for SineGen {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::SINE_GEN, inputs, &[0], outputs, 1, log) {
            return;
        }
        let freq = inputs[0].unwrap();
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = self.phase.sin();
            let phase_inc = TAU * freq[i] / self.sample_rate;
            self.phase = (self.phase + phase_inc).rem_euclid(TAU);
        }
    }
}

/// `saw_gen`: polyBLEP band-limited sawtooth in [-1, 1], audio-rate freq.
pub struct SawGen {
    phase: f32, // normalized, [0, 1)
    sample_rate: f32,
}

impl SawGen {
    pub fn new(sample_rate: f32) -> SawGen {
        SawGen {
            phase: 0.0,
            sample_rate,
        }
    }
}

impl DspModule for SawGen {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::SAW_GEN, inputs, &[0], outputs, 1, log) {
            return;
        }
        let freq = inputs[0].unwrap();
        for i in 0..BLOCK_SIZE {
            let phase_inc = (freq[i] / self.sample_rate).clamp(0.0, 0.5);
            let naive = 2.0 * self.phase - 1.0;
            outputs[0][i] = naive - poly_blep(self.phase, phase_inc);
            self.phase = (self.phase + phase_inc).rem_euclid(1.0);
        }
    }
}

/// `pulse_gen`: polyBLEP pulse wave. Frequency and width are taken as
/// scalars from the first sample of their inputs; width is clamped inside
/// (0, 1).
pub struct PulseGen {
    phase: f32,
    sample_rate: f32,
}

impl PulseGen {
    pub fn new(sample_rate: f32) -> PulseGen {
        PulseGen {
            phase: 0.0,
            sample_rate,
        }
    }
}

impl DspModule for PulseGen {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::PULSE_GEN, inputs, &[0, 1], outputs, 1, log) {
            return;
        }
        let phase_inc = (inputs[0].unwrap()[0] / self.sample_rate).clamp(0.0, 0.5);
        let width = inputs[1].unwrap()[0].clamp(0.01, 0.99);
        for i in 0..BLOCK_SIZE {
            let naive = if self.phase < width { 1.0 } else { -1.0 };
            // One corrected edge at phase 0, the opposite one at `width`.
            let corrected = naive + poly_blep(self.phase, phase_inc)
                - poly_blep((self.phase - width).rem_euclid(1.0), phase_inc);
            outputs[0][i] = corrected;
            self.phase = (self.phase + phase_inc).rem_euclid(1.0);
        }
    }
}

/// `phasor_gen`: naive rising ramp in [0, 1), wrapping at 1. Audio-rate
/// frequency input.
pub struct PhasorGen {
    phase: f32,
    sample_rate: f32,
}

impl PhasorGen {
    pub fn new(sample_rate: f32) -> PhasorGen {
        PhasorGen {
            phase: 0.0,
            sample_rate,
        }
    }
}

impl DspModule for PhasorGen {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::PHASOR_GEN, inputs, &[0], outputs, 1, log) {
            return;
        }
        let freq = inputs[0].unwrap();
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = self.phase;
            let phase_inc = freq[i] / self.sample_rate;
            self.phase = (self.phase + phase_inc).rem_euclid(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogTx;
    use crate::SILENT_BLOCK;

    const SR: f32 = 48_000.0;

    fn freq_block(hz: f32) -> Block {
        [hz; BLOCK_SIZE]
    }

    #[test]
    fn sine_matches_closed_form() {
        let mut osc = SineGen::new(SR);
        let mut log = LogTx::detached();
        let freq = freq_block(440.0);
        let mut outputs = [SILENT_BLOCK];
        osc.process(&[Some(&freq)], &mut outputs, &mut log);

        // sample n should be sin(2*pi*f*n / sr)
        for n in [0usize, 5, 17, 63] {
            let expected = (TAU * 440.0 * n as f32 / SR).sin();
            assert!(
                (outputs[0][n] - expected).abs() < 1e-4,
                "sample {n}: expected {expected}, got {}",
                outputs[0][n]
            );
        }
    }

    #[test]
    fn sine_phase_continues_across_blocks() {
        let mut osc = SineGen::new(SR);
        let mut log = LogTx::detached();
        let freq = freq_block(440.0);
        let mut first = [SILENT_BLOCK];
        let mut second = [SILENT_BLOCK];
        osc.process(&[Some(&freq)], &mut first, &mut log);
        osc.process(&[Some(&freq)], &mut second, &mut log);

        let expected = (TAU * 440.0 * BLOCK_SIZE as f32 / SR).sin();
        assert!((second[0][0] - expected).abs() < 1e-3);
    }

    #[test]
    fn saw_stays_in_range_and_moves() {
        let mut osc = SawGen::new(SR);
        let mut log = LogTx::detached();
        let freq = freq_block(880.0);
        let mut outputs = [SILENT_BLOCK];
        for _ in 0..8 {
            osc.process(&[Some(&freq)], &mut outputs, &mut log);
        }
        assert!(outputs[0].iter().all(|s| s.abs() <= 1.01));
        assert!(outputs[0].iter().any(|s| s.abs() > 0.5));
    }

    #[test]
    fn pulse_width_shapes_duty_cycle() {
        let mut osc = PulseGen::new(SR);
        let mut log = LogTx::detached();
        let freq = freq_block(100.0);
        let width = [0.25; BLOCK_SIZE];

        // 100 Hz at 48 kHz is a 480-sample period: collect several blocks.
        let mut high = 0usize;
        let mut total = 0usize;
        let mut outputs = [SILENT_BLOCK];
        for _ in 0..32 {
            osc.process(&[Some(&freq), Some(&width)], &mut outputs, &mut log);
            high += outputs[0].iter().filter(|&&s| s > 0.0).count();
            total += BLOCK_SIZE;
        }
        let duty = high as f32 / total as f32;
        assert!(
            (duty - 0.25).abs() < 0.05,
            "expected ~25% duty cycle, got {duty}"
        );
    }

    #[test]
    fn phasor_ramps_and_wraps() {
        let mut osc = PhasorGen::new(SR);
        let mut log = LogTx::detached();
        let freq = freq_block(1_000.0);
        let mut outputs = [SILENT_BLOCK];
        let mut wrapped = false;
        let mut last = -1.0;
        for _ in 0..4 {
            osc.process(&[Some(&freq)], &mut outputs, &mut log);
            for &s in outputs[0].iter() {
                assert!((0.0..1.0).contains(&s), "phasor out of range: {s}");
                if s < last {
                    wrapped = true;
                }
                last = s;
            }
        }
        assert!(wrapped, "phasor should wrap within 256 samples at 1 kHz");
    }

    #[test]
    fn unconnected_freq_silences_output() {
        let mut osc = SawGen::new(SR);
        let mut log = LogTx::detached();
        let mut outputs = [[0.4; BLOCK_SIZE]];
        osc.process(&[None], &mut outputs, &mut log);
        assert_eq!(outputs[0], SILENT_BLOCK);
    }
}
