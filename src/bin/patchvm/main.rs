//! patchvm - terminal front end for the patch VM.
//!
//! Pick an output device, then listen to a compiled patch while watching
//! the program listing and the audio-thread log.
//!
//! Run with: cargo run [path/to/patch.json]

mod app;
mod ui;

use std::sync::Arc;

use color_eyre::eyre::{Result as EyreResult, WrapErr};

use patchvm::compiler::compile;
use patchvm::patch::parse_patch;
use patchvm::registry::ModuleRegistry;

use app::App;

/// Built-in demo: saw -> low-pass -> gain -> stereo out.
const DEMO_PATCH: &str = include_str!("../../../data/patches/tone.json");

fn main() -> EyreResult<()> {
    color_eyre::install()?;

    let patch_text = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read patch file {path}"))?,
        None => DEMO_PATCH.to_owned(),
    };

    let registry = Arc::new(ModuleRegistry::with_builtins());
    let graph = parse_patch(&patch_text).wrap_err("patch did not parse")?;
    let program = compile(&graph, &registry).wrap_err("patch did not compile")?;

    let mut terminal = ratatui::init();
    let result = App::new(registry, program).run(&mut terminal);
    ratatui::restore();
    result
}
