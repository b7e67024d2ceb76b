//! Command-line host for the editor shell: mounts the controller against a
//! YAML configuration and prints the resulting image data as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use crossbeam_channel::RecvTimeoutError;
use design_model::{DesignPatch, Filter, ShownImageDimensions};
use editor_shell::bridge::{CurrentImageData, CurrentImgDataFn, FnCell, StateUpdate, UpdateStateFn};
use editor_shell::config::EditorConfig;
use editor_shell::events::{FeedbackMessage, StatePatch};
use editor_shell::platform::unload_guard::{ExitSignal, UnloadDecision};
use editor_shell::tasks::loader::FsImageFetcher;
use editor_shell::watch::{ConfigEvent, start_config_watcher};
use editor_shell::{EditorController, MountOptions};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(
    name = "editor-shell",
    version,
    about = "image editor shell load orchestration host"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Rendered image size reported to the editor, e.g. 800x600
    #[arg(long = "shown", value_name = "WxH", value_parser = parse_dimensions)]
    shown: Option<ShownImageDimensions>,
    /// Apply a filter through the host bridge (marks the design as unsaved)
    #[arg(long = "apply-filter", value_name = "NAME")]
    apply_filter: Option<String>,
    /// Re-apply the configuration whenever the file changes
    #[arg(long)]
    watch: bool,
    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(
        format!("editor_shell={level}")
            .parse()
            .context("invalid log directive")?,
    );
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn parse_dimensions(value: &str) -> Result<ShownImageDimensions, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let parse = |side: &str| {
        side.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| format!("invalid dimension '{side}'"))
    };
    Ok(ShownImageDimensions::new(parse(w)?, parse(h)?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    loading: bool,
    have_not_saved_changes: bool,
    feedback: Option<FeedbackMessage>,
    current: Option<CurrentImageData>,
}

fn print_report(
    controller: &EditorController,
    current_img_data: &FnCell<CurrentImgDataFn>,
    pretty: bool,
) -> Result<()> {
    let state = controller.state();
    let report = Report {
        loading: state.is_loading_globally(),
        have_not_saved_changes: state.have_not_saved_changes,
        feedback: state.feedback,
        current: current_img_data.get().and_then(|current| current()),
    };
    let json = if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("failed to serialise report")?;
    println!("{json}");
    Ok(())
}

fn load_config(path: &Path) -> Result<EditorConfig> {
    EditorConfig::from_yaml_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?
        .validated()
        .context("invalid configuration values")
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        shown,
        apply_filter,
        watch,
        pretty,
        verbose,
    } = Args::parse();
    init_tracing(verbose)?;

    let cfg = load_config(&config)?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let exit = ExitSignal::new();
    let update_state = Arc::new(FnCell::<UpdateStateFn>::new());
    let current_img_data = Arc::new(FnCell::<CurrentImgDataFn>::new());
    let controller = EditorController::mount(
        cfg,
        MountOptions::new(Arc::new(FsImageFetcher))
            .unload_signal(Arc::new(exit.clone()))
            .update_state_slot(update_state.clone())
            .current_img_data_slot(current_img_data.clone()),
    );
    controller.wait_idle().await;
    tracing::debug!(
        unload_handlers = exit.subscriber_count(),
        "editor mounted"
    );

    if let Some(shown) = shown {
        controller.set_shown_image_dimensions(shown);
    }
    if let Some(name) = apply_filter {
        let filter = Filter::from_identifier(&name)
            .ok_or_else(|| anyhow!("unknown filter '{name}'"))?;
        let update = update_state
            .get()
            .ok_or_else(|| anyhow!("editor did not expose a state update handle"))?;
        update(StateUpdate::Patch(StatePatch::from(DesignPatch {
            filter: Some(Some(filter)),
            ..DesignPatch::default()
        })));
    }
    print_report(&controller, &current_img_data, pretty)?;

    if !watch {
        controller.unmount();
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let _watcher = start_config_watcher(&config, tx).context("failed to watch configuration")?;
    let (events_tx, mut events_rx) = mpsc::channel::<ConfigEvent>(16);
    {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            while !cancel.is_cancelled() {
                match rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(event) => {
                        if events_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
    }

    let mut vetoed = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => match exit.request() {
                UnloadDecision::Allow => break,
                UnloadDecision::Veto if vetoed => {
                    tracing::warn!("exiting with unsaved changes");
                    break;
                }
                UnloadDecision::Veto => {
                    vetoed = true;
                    tracing::info!("there are unsaved changes; press Ctrl-C again to exit");
                }
            },
            Some(event) = events_rx.recv() => match event {
                ConfigEvent::Changed(path) => match load_config(&path) {
                    Ok(next) => {
                        controller.update_config(next);
                        controller.wait_idle().await;
                        print_report(&controller, &current_img_data, pretty)?;
                    }
                    Err(err) => tracing::warn!("ignoring configuration change: {err:#}"),
                },
                ConfigEvent::Removed(path) => {
                    tracing::warn!(path = %path.display(), "configuration removed; keeping the last applied one");
                }
            },
        }
    }

    cancel.cancel();
    controller.unmount();
    Ok(())
}
