//! Application state machine: device picker, then the running patch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::DefaultTerminal;
use rtrb::{Consumer, RingBuffer};

use patchvm::audio::{output_devices, start_output, DeviceChoice, OutputStream};
use patchvm::bytecode::disasm;
use patchvm::logging::{self, format_record, LogRecord};
use patchvm::registry::ModuleRegistry;
use patchvm::vm::Vm;

use crate::ui;

/// Samples kept for the level meter.
const MONITOR_CAPACITY: usize = 4096;

/// Pending log records the ring can hold between UI frames.
const LOG_CAPACITY: usize = 512;

/// Log lines kept on screen.
const LOG_HISTORY: usize = 200;

enum Screen {
    PickDevice,
    Running(Running),
}

struct Running {
    _stream: OutputStream,
    device_name: String,
    sample_rate: f32,
    listing: String,
    log_rx: logging::LogRx,
    monitor_rx: Consumer<f32>,
    peak: f32,
}

pub struct App {
    registry: Arc<ModuleRegistry>,
    program: Vec<u32>,
    devices: Vec<DeviceChoice>,
    selected: usize,
    screen: Screen,
    log_lines: Vec<String>,
    should_quit: bool,
}

impl App {
    pub fn new(registry: Arc<ModuleRegistry>, program: Vec<u32>) -> App {
        App {
            registry,
            program,
            devices: Vec::new(),
            selected: 0,
            screen: Screen::PickDevice,
            log_lines: Vec::new(),
            should_quit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> EyreResult<()> {
        self.devices = output_devices().wrap_err("failed to enumerate output devices")?;
        if self.devices.is_empty() {
            return Err(eyre!("no audio output devices available"));
        }

        while !self.should_quit {
            self.poll_running_state();

            terminal.draw(|frame| match &self.screen {
                Screen::PickDevice => {
                    ui::render_device_picker(frame, &self.devices, self.selected)
                }
                Screen::Running(running) => ui::render_running(
                    frame,
                    &running.device_name,
                    running.sample_rate,
                    &running.listing,
                    running.peak,
                    &self.log_lines,
                ),
            })?;

            if event::poll(Duration::from_millis(16))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) -> EyreResult<()> {
        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Up if matches!(self.screen, Screen::PickDevice) => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down if matches!(self.screen, Screen::PickDevice) => {
                self.selected = (self.selected + 1).min(self.devices.len().saturating_sub(1));
            }
            KeyCode::Enter if matches!(self.screen, Screen::PickDevice) => {
                self.start_selected_device()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn start_selected_device(&mut self) -> EyreResult<()> {
        let choice = &self.devices[self.selected];
        let sample_rate = choice.sample_rate as f32;

        let (log_tx, log_rx) = logging::channel(LOG_CAPACITY);
        let mut vm = Vm::new(self.registry.clone(), sample_rate, false);
        vm.set_logger(log_tx);
        vm.load_program(self.program.clone());

        let listing = disasm(&self.program, &self.registry);
        let vm = Arc::new(Mutex::new(vm));
        let (monitor_tx, monitor_rx) = RingBuffer::new(MONITOR_CAPACITY);
        let stream = start_output(choice.index, vm, Some(monitor_tx))
            .wrap_err("failed to start audio stream")?;

        self.screen = Screen::Running(Running {
            _stream: stream,
            device_name: choice.name.clone(),
            sample_rate,
            listing,
            log_rx,
            monitor_rx,
            peak: 0.0,
        });
        Ok(())
    }

    /// Drain the audio-side rings: log records into the scrollback, the
    /// monitor tap into a fresh peak reading.
    fn poll_running_state(&mut self) {
        let Screen::Running(running) = &mut self.screen else {
            return;
        };

        let log_lines = &mut self.log_lines;
        running.log_rx.drain(|record: LogRecord| {
            log_lines.push(format_record(&record));
            if log_lines.len() > LOG_HISTORY {
                log_lines.remove(0);
            }
        });

        let mut peak = 0.0f32;
        let mut heard = false;
        while let Ok(sample) = running.monitor_rx.pop() {
            peak = peak.max(sample.abs());
            heard = true;
        }
        if heard {
            // Fall back slowly so short blocks stay visible.
            running.peak = peak.max(running.peak * 0.8);
        }
    }
}
