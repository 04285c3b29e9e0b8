// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands.
//!
//! The `record` command runs the whole pipeline against the built-in
//! software core, so it works on any machine; a hardware core would be wired
//! in here instead.

use chrono::Local;
use omxcam::core::MediaCore;
use omxcam::core::virtual_core::{ComponentRole, VirtualCore};
use omxcam::pipeline::{self, CaptureConfig, ComponentNames, FileSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Record a video and write the raw Annex-B stream to a file.
pub fn record(
    duration_secs: u64,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => CaptureConfig::load(&path)?,
        None => CaptureConfig::default(),
    };

    let output = output.unwrap_or_else(|| {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        PathBuf::from(format!("video_{}.h264", timestamp))
    });

    let names = ComponentNames::default();
    let core = Arc::new(
        VirtualCore::builder()
            .component(&names.source, ComponentRole::Camera)
            .component(&names.encoder, ComponentRole::Encoder)
            .component(&names.sink, ComponentRole::Sink)
            .build(),
    );

    // Ctrl-C stops the fill loop; teardown still runs.
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))?;

    let mut sink = FileSink::create(&output)?;
    let stats = pipeline::record(
        core as Arc<dyn MediaCore>,
        &names,
        &config,
        &mut sink,
        Duration::from_secs(duration_secs),
        &stop,
    )?;

    println!(
        "wrote {} payloads ({} bytes) to {}",
        stats.payloads,
        stats.bytes,
        output.display()
    );
    Ok(())
}

/// Print the default configuration, ready to be edited and passed back with
/// `record --config`.
pub fn print_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let config = CaptureConfig::default();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
