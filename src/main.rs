//! Inky Photo Frame
//!
//! Shows photos from a local folder (and optionally iCloud Photos) on a
//! six-color e-paper panel, one every refresh interval.
//!
//! ```bash
//! # Run the frame with the default config
//! inky-frame
//!
//! # Show one photo into a PNG instead of the panel
//! inky-frame --preview /tmp/frame.png run --once
//!
//! # Run the processing pipeline on a single file
//! inky-frame process IMG_0001.jpg processed.png
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

mod config;
mod constants;
mod display;
mod loader;
mod photo;
mod processor;
mod scheduler;
mod selection;
mod source;
mod state;

use crate::config::{Config, LoggingConfig, find_config_path};
use crate::display::Display;
use crate::processor::PhotoProcessor;
use crate::scheduler::Frame;
use crate::selection::Selector;
use crate::source::icloud::clear_cache;
use crate::source::{Catalog, HelperClient, IcloudSource, LocalSource, PhotoSource};

/// E-paper photo frame
#[derive(Parser)]
#[command(name = "inky-frame", version)]
struct Cli {
    /// Config file (default: ./config.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write frames to this PNG instead of driving the panel
    #[arg(long, global = true)]
    preview: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame (default)
    Run {
        /// Show a single photo and exit
        #[arg(long)]
        once: bool,
    },

    /// Process one image the way the frame would and save it as PNG
    Process { input: PathBuf, output: PathBuf },

    /// List every photo the configured sources provide
    List,

    /// Delete downloaded iCloud photos
    ClearCache,

    /// Blank the panel to white
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- Configuration ---
    let config_path = find_config_path(cli.config.as_deref());
    let fresh = !config_path.exists();
    let config = Config::load(Some(&config_path))?;

    init_logging(&config.logging, cli.verbose)?;
    if fresh {
        log::warn!("Generated default config at {}; edit it and restart to customize", config_path.display());
    } else {
        log::debug!("Loaded config from {}", config.path.display());
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => run_frame(&config, cli.preview.as_deref(), once),
        Commands::Process { input, output } => process_one(&config, &input, &output),
        Commands::List => list_photos(&config),
        Commands::ClearCache => clear_icloud_cache(&config),
        Commands::Clear => clear_panel(&config, cli.preview.as_deref()),
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { LevelFilter::Debug } else { config.level_filter().unwrap_or(LevelFilter::Info) };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.to_string()));

    if let Some(path) = config.file() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { console: io::stderr(), file })));
    }

    builder.init();
    Ok(())
}

/// Log sink writing every record to the console and the log file.
struct Tee<W: Write> {
    console: W,
    file: File,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A broken console must not cost the file its records
        let _ = self.console.write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

// --- Sources ---

fn build_catalog(config: &Config, watch: bool) -> Catalog {
    let mut sources: Vec<Box<dyn PhotoSource>> = Vec::new();

    let local_path = config.photo.local_path();
    match LocalSource::new(&local_path, config.photo.recursive) {
        Ok(mut local) => {
            if watch && config.photo.watch {
                if let Err(e) = local.watch() {
                    log::warn!("New photos will only appear on refresh: {}", e);
                }
            }
            sources.push(Box::new(local));
        }
        Err(e) => log::error!("Local photos unavailable: {}", e),
    }

    if config.icloud.enabled {
        // validate() guarantees an Apple ID here
        if let Some(apple_id) = config.icloud.apple_id() {
            let client = HelperClient::new(&config.icloud.helper, apple_id, &config.icloud.session_path());
            match IcloudSource::new(client, &config.icloud.cache_path()) {
                Ok(icloud) => sources.push(Box::new(icloud)),
                Err(e) => log::error!("iCloud photos unavailable: {}", e),
            }
        }
    }

    Catalog::new(sources)
}

// --- Commands ---

fn run_frame(config: &Config, preview: Option<&Path>, once: bool) -> Result<()> {
    // A panel that cannot be reached at startup is fatal
    let display = Display::open(&config.display, preview).context("Failed to initialize display")?;
    let (width, height) = display.resolution();
    log::info!("Palette saturation {:.2}", display.saturation());

    let catalog = build_catalog(config, !once);
    let processor = PhotoProcessor::new(width, height, &config.processing);
    let selector = Selector::new(config.photo.selection_mode);
    let hint = format!("Add photos to {}", config.photo.local_path);

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("Stop requested, finishing the current refresh");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut frame = Frame::new(catalog, selector, processor, display, config.display.refresh_interval(), hint);
    frame.run(&stop, once.then_some(1));
    Ok(())
}

fn process_one(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let processor = PhotoProcessor::new(config.display.width, config.display.height, &config.processing);
    processor
        .process_and_save(input, output)
        .with_context(|| format!("Failed to process {}", input.display()))?;
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}

fn list_photos(config: &Config) -> Result<()> {
    let mut catalog = build_catalog(config, false);
    catalog.refresh();

    for photo in catalog.photos() {
        let cached = if photo.cached_path.is_some() { "" } else { "  (not downloaded)" };
        println!("{}\t{}{}", photo.source, photo.name, cached);
    }
    println!("{} photos", catalog.len());
    Ok(())
}

fn clear_icloud_cache(config: &Config) -> Result<()> {
    let cache = config.icloud.cache_path();
    let removed = clear_cache(&cache).with_context(|| format!("Failed to clear {}", cache.display()))?;
    println!("Removed {} cached photos from {}", removed, cache.display());
    Ok(())
}

fn clear_panel(config: &Config, preview: Option<&Path>) -> Result<()> {
    let mut display = Display::open(&config.display, preview).context("Failed to initialize display")?;
    display.clear().context("Failed to clear display")?;
    log::info!("Display cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_console_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.log");
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();

        let mut tee = Tee { console: Vec::new(), file };
        writeln!(tee, "INFO Displayed local:a.jpg").unwrap();
        tee.flush().unwrap();

        assert_eq!(tee.console, b"INFO Displayed local:a.jpg\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO Displayed local:a.jpg\n");
    }
}
