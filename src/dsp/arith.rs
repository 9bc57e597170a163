//! Element-wise arithmetic modules: `add`, `mul`, `gain`, `threshold`.

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::{Block, BLOCK_SIZE};

/// `add`: element-wise sum of two signals.
pub struct Add;

impl DspModule for Add {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::ADD, inputs, &[0, 1], outputs, 1, log) {
            return;
        }
        let (in1, in2) = (inputs[0].unwrap(), inputs[1].unwrap());
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = in1[i] + in2[i];
        }
    }
}

/// `mul`: element-wise product of two signals.
pub struct Mul;

impl DspModule for Mul {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::MUL, inputs, &[0, 1], outputs, 1, log) {
            return;
        }
        let (in1, in2) = (inputs[0].unwrap(), inputs[1].unwrap());
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = in1[i] * in2[i];
        }
    }
}

/// `gain`: multiplies a signal by an audio-rate gain. Same arithmetic as
/// `mul`; kept separate so patches read as intent (`in`/`gain` ports).
pub struct Gain;

impl DspModule for Gain {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::GAIN, inputs, &[0, 1], outputs, 1, log) {
            return;
        }
        let (signal, gain) = (inputs[0].unwrap(), inputs[1].unwrap());
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = signal[i] * gain[i];
        }
    }
}

/// `threshold`: per-element comparator, 1.0 where `signal > threshold`,
/// else 0.0. Useful for turning any signal into a gate.
pub struct Threshold;

impl DspModule for Threshold {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::THRESHOLD, inputs, &[0, 1], outputs, 1, log) {
            return;
        }
        let (signal, threshold) = (inputs[0].unwrap(), inputs[1].unwrap());
        for i in 0..BLOCK_SIZE {
            outputs[0][i] = if signal[i] > threshold[i] { 1.0 } else { 0.0 };
        }
    }
}
