//! Host audio driver: the external collaborator that owns the callback
//! thread and feeds the VM's `AUDIO_OUT` opcode.
//!
//! The VM itself never touches hardware. The driver opens a cpal output
//! stream on a host-selected device, chunks each callback into
//! [`BLOCK_SIZE`]-frame pieces, and calls `vm.process` per chunk with
//! stereo block buffers, interleaving the result into the device buffer.
//!
//! Program swaps are serialized against the callback by the shared
//! `Mutex<Vm>`: the host locks it, loads, and unlocks. The callback never
//! holds the lock longer than one buffer.

use std::sync::{Arc, Mutex, Weak};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::vm::{AudioSink, Vm};
use crate::BLOCK_SIZE;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no output device at index {0}")]
    NoSuchDevice(usize),
    #[error(transparent)]
    Devices(#[from] cpal::DevicesError),
    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// One selectable output device, as shown by the device picker. The index
/// is the opaque id the core carries around.
#[derive(Debug, Clone)]
pub struct DeviceChoice {
    pub index: usize,
    pub name: String,
    pub sample_rate: u32,
}

/// Enumerate output devices of the default host.
pub fn output_devices() -> Result<Vec<DeviceChoice>, AudioError> {
    let host = cpal::default_host();
    let mut choices = Vec::new();
    for (index, device) in host.output_devices()?.enumerate() {
        let name = device
            .name()
            .unwrap_or_else(|_| format!("output device {index}"));
        let sample_rate = device
            .default_output_config()
            .map(|config| config.sample_rate().0)
            .unwrap_or(0);
        choices.push(DeviceChoice {
            index,
            name,
            sample_rate,
        });
    }
    Ok(choices)
}

/// What the VM sees of a running stream (via `Vm::set_audio_sink`).
pub struct StreamHandle {
    device_id: u32,
    sample_rate: f32,
}

impl AudioSink for StreamHandle {
    fn device_id(&self) -> u32 {
        self.device_id
    }
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

/// A live output stream. Dropping it stops audio.
pub struct OutputStream {
    _stream: cpal::Stream,
    handle: Arc<StreamHandle>,
}

impl OutputStream {
    pub fn handle(&self) -> Arc<StreamHandle> {
        self.handle.clone()
    }
}

/// Open the device at `device_index` and start pulling blocks from `vm`.
///
/// `monitor` optionally receives a copy of the left channel for
/// visualization; pushes that do not fit are dropped.
pub fn start_output(
    device_index: usize,
    vm: Arc<Mutex<Vm>>,
    mut monitor: Option<rtrb::Producer<f32>>,
) -> Result<OutputStream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .output_devices()?
        .nth(device_index)
        .ok_or(AudioError::NoSuchDevice(device_index))?;
    let supported = device.default_output_config()?;
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;

    let handle = Arc::new(StreamHandle {
        device_id: device_index as u32,
        sample_rate: config.sample_rate.0 as f32,
    });
    {
        let sink: Weak<dyn AudioSink> = Arc::downgrade(&(handle.clone() as Arc<dyn AudioSink>));
        let mut vm = vm.lock().unwrap();
        vm.set_audio_sink(sink);
    }

    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _| {
            let mut vm = vm.lock().unwrap();
            let total_frames = data.len() / channels;
            let mut frames_done = 0;

            while frames_done < total_frames {
                let n = (total_frames - frames_done).min(BLOCK_SIZE);
                left.fill(0.0);
                right.fill(0.0);
                {
                    let mut outs: [&mut [f32]; 2] = [&mut left[..n], &mut right[..n]];
                    vm.process(&[], &mut outs, BLOCK_SIZE);
                }

                let frame_base = frames_done * channels;
                for i in 0..n {
                    let frame = &mut data[frame_base + i * channels..frame_base + (i + 1) * channels];
                    frame[0] = left[i];
                    if channels > 1 {
                        frame[1] = right[i];
                    }
                    for sample in frame.iter_mut().skip(2) {
                        *sample = 0.0;
                    }
                }

                if let Some(producer) = monitor.as_mut() {
                    for &sample in &left[..n] {
                        let _ = producer.push(sample);
                    }
                }
                frames_done += n;
            }
        },
        |err| eprintln!("audio stream error: {err}"),
        None,
    )?;
    stream.play()?;

    Ok(OutputStream {
        _stream: stream,
        handle,
    })
}
