//! Scalar latches: the `float` and `int` modules.
//!
//! A latch samples `in[0]` when the input is connected, holds that value
//! across blocks, and broadcasts it over the whole output. Patches use
//! them to name a value once and fan it out to several consumers.

use super::{modules, validate_ports, DspModule};
use crate::logging::LogTx;
use crate::Block;

/// `float`: latches and re-emits a scalar unchanged.
pub struct FloatLatch {
    value: f32,
}

impl FloatLatch {
    pub fn new() -> FloatLatch {
        FloatLatch { value: 0.0 }
    }
}

impl Default for FloatLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl DspModule for FloatLatch {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::FLOAT, inputs, &[], outputs, 1, log) {
            return;
        }
        if let Some(Some(input)) = inputs.first() {
            self.value = input[0];
        }
        outputs[0].fill(self.value);
    }
}

/// `int`: like `float` but truncates toward zero on latch.
pub struct IntLatch {
    value: i64,
}

impl IntLatch {
    pub fn new() -> IntLatch {
        IntLatch { value: 0 }
    }
}

impl Default for IntLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl DspModule for IntLatch {
    fn process(&mut self, inputs: &[Option<&Block>], outputs: &mut [Block], log: &mut LogTx) {
        if !validate_ports(modules::INT, inputs, &[], outputs, 1, log) {
            return;
        }
        if let Some(Some(input)) = inputs.first() {
            self.value = input[0] as i64;
        }
        outputs[0].fill(self.value as f32);
    }
}
