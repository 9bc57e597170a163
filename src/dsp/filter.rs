//! Filter modules: `lopass`, `hipass`, `bandpass` (one SVF family) and
//! `biquad`.

use std::f32::consts::{PI, TAU};

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::{Block, BLOCK_SIZE};

/*
State Variable Filter (TPT form)
================================

One structure yields low-pass, band-pass, and high-pass outputs at once;
the three filter modules differ only in which output they publish.

The discretization is the topology-preserving transform: pre-warp the
cutoff, then solve the integrator loop implicitly per sample.

    g = tan(pi * cutoff / sample_rate)     integrator coefficient
    k = 1 / Q                              damping
    h = 1 / (1 + g * (g + k))

    v3 = x - ic2eq
    v1 = h * (ic1eq + g * v3)              band-pass
    v2 = ic2eq + g * v1                    low-pass
    hp = x - k * v1 - v2                   high-pass

    ic1eq = 2 * v1 - ic1eq                 trapezoidal state update
    ic2eq = 2 * v2 - ic2eq

Coefficients are recomputed every sample from the cutoff and Q inputs, so
audio-rate sweeps work without zipper artifacts. Cutoff is clamped to
[0, 0.49 * sample_rate] and Q to [0.1, 100] to keep the implicit solve
stable.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SvfOutput {
    Low,
    High,
    Band,
}

/// Shared implementation of the three SVF-family modules.
pub struct SvFilter {
    output: SvfOutput,
    module_id: u32,
    ic1eq: f32, // first integrator memory
    ic2eq: f32, // second integrator memory
    sample_rate: f32,
}

impl SvFilter {
    fn new(output: SvfOutput, module_id: u32, sample_rate: f32) -> SvFilter {
        SvFilter {
            output,
            module_id,
            ic1eq: 0.0,
            ic2eq: 0.0,
            sample_rate,
        }
    }

    /// `lopass`: 2-pole low-pass.
    pub fn lopass(sample_rate: f32) -> SvFilter {
        SvFilter::new(SvfOutput::Low, modules::LOPASS, sample_rate)
    }

    /// `hipass`: 2-pole high-pass.
    pub fn hipass(sample_rate: f32) -> SvFilter {
        SvFilter::new(SvfOutput::High, modules::HIPASS, sample_rate)
    }

    /// `bandpass`: 2-pole band-pass; rejects DC by construction.
    pub fn bandpass(sample_rate: f32) -> SvFilter {
        SvFilter::new(SvfOutput::Band, modules::BANDPASS, sample_rate)
    }
}

impl DspModule for SvFilter {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(self.module_id, inputs, &[0, 1, 2], outputs, 1, log) {
            return;
        }
        let signal = inputs[0].unwrap();
        let cutoff = inputs[1].unwrap();
        let q = inputs[2].unwrap();

        for i in 0..BLOCK_SIZE {
            let fc = cutoff[i].clamp(0.0, 0.49 * self.sample_rate);
            let g = (PI * fc / self.sample_rate).tan();
            let k = 1.0 / q[i].clamp(0.1, 100.0);
            let h = 1.0 / (1.0 + g * (g + k));

            let x = signal[i];
            let v3 = x - self.ic2eq;
            let v1 = h * (self.ic1eq + g * v3);
            let v2 = self.ic2eq + g * v1;
            self.ic1eq = 2.0 * v1 - self.ic1eq;
            self.ic2eq = 2.0 * v2 - self.ic2eq;

            outputs[0][i] = match self.output {
                SvfOutput::Low => v2,
                SvfOutput::Band => v1,
                SvfOutput::High => x - k * v1 - v2,
            };
        }
    }
}

/// `biquad`: RBJ low-pass. Unlike the SVF family, cutoff and Q are scalars
/// read from the first sample of their inputs and the coefficients are
/// computed once per block. State is transposed direct form II.
pub struct Biquad {
    z1: f32,
    z2: f32,
    sample_rate: f32,
}

impl Biquad {
    pub fn new(sample_rate: f32) -> Biquad {
        Biquad {
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        }
    }
}

impl DspModule for Biquad {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::BIQUAD, inputs, &[0, 1, 2], outputs, 1, log) {
            return;
        }
        let signal = inputs[0].unwrap();
        let fc = inputs[1].unwrap()[0].clamp(1.0, 0.49 * self.sample_rate);
        let q = inputs[2].unwrap()[0].clamp(0.1, 100.0);

        let w0 = TAU * fc / self.sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b0 = (1.0 - cos_w0) / (2.0 * a0);
        let b1 = (1.0 - cos_w0) / a0;
        let b2 = b0;
        let a1 = (-2.0 * cos_w0) / a0;
        let a2 = (1.0 - alpha) / a0;

        for i in 0..BLOCK_SIZE {
            let x = signal[i];
            let y = b0 * x + self.z1;
            self.z1 = b1 * x - a1 * y + self.z2;
            self.z2 = b2 * x - a2 * y;
            outputs[0][i] = y;
        }
    }
}
