use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc_model::{Bookmark, PanelSide, ViewerPreferences};
use pdf_engine::{default_engine, OpenSource, PdfEngine};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::Storage;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use viewer_core::{DualPaneController, PanelEvent};

const DATA_DIR_ENV: &str = "TWINPAGE_DATA_DIR";
const DEFAULT_LOG_FILTER: &str = "warn,twinpage_cli=info";

#[derive(Debug, Parser)]
#[command(name = "twinpage-cli")]
#[command(about = "Side-by-side document comparison, headless")]
pub struct Cli {
    /// Registry root. Defaults to $TWINPAGE_DATA_DIR, then the platform data dir.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage stored document sets.
    Sets {
        #[command(subcommand)]
        command: SetsCommand,
    },
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render two documents side by side and print panel events.
    Compare {
        #[arg(value_name = "LEFT")]
        left: PathBuf,
        #[arg(value_name = "RIGHT")]
        right: PathBuf,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Render a stored document set.
    Open {
        #[arg(value_name = "SET_ID")]
        id: String,
        /// Scroll both panels to this page and bookmark it.
        #[arg(long)]
        page: Option<u32>,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Show or change viewer preferences.
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum SetsCommand {
    List,
    Create {
        name: String,
        #[arg(value_name = "ORIGINAL")]
        original: PathBuf,
        #[arg(value_name = "TRANSLATED")]
        translated: PathBuf,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum PrefsCommand {
    Show,
    Set {
        #[arg(long)]
        scale: Option<f32>,
        #[arg(long)]
        band_rows: Option<u32>,
        #[arg(long)]
        facing: Option<bool>,
    },
}

#[derive(Debug, Args)]
struct ViewArgs {
    /// Write rendered pages as PNG files into this directory.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
    /// Raster scale, overriding the stored preference.
    #[arg(long)]
    scale: Option<f32>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Sets { command } => run_sets(&storage(cli.data_dir)?, command),
        Commands::Info { file } => run_info(&file),
        Commands::Compare { left, right, view } => {
            let prefs = view.apply(stored_preferences(cli.data_dir));
            block_on(compare_with_backend(&left, &right, &prefs, None, view.out.as_deref()))?;
            Ok(())
        }
        Commands::Open { id, page, view } => {
            let storage = storage(cli.data_dir)?;
            let prefs = view.apply(storage.load_preferences()?);
            let set = storage.mark_opened(&id)?;

            let page = page.or(set.bookmark.map(|bookmark| bookmark.page));
            let current = block_on(compare_with_backend(
                set.path_for(PanelSide::Left),
                set.path_for(PanelSide::Right),
                &prefs,
                page,
                view.out.as_deref(),
            ))?;

            // Bookmark the page the left panel settled on, which can differ
            // from the requested one when the document is too short to scroll.
            if let Some(page) = current.or(page) {
                storage.set_bookmark(&id, Some(Bookmark { page, zoom: prefs.render_scale }))?;
            }
            Ok(())
        }
        Commands::Prefs { command } => run_prefs(&storage(cli.data_dir)?, command),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

impl ViewArgs {
    fn apply(&self, prefs: ViewerPreferences) -> ViewerPreferences {
        ViewerPreferences { render_scale: self.scale.unwrap_or(prefs.render_scale), ..prefs }
            .sanitized()
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn storage(data_dir: Option<PathBuf>) -> Result<Storage> {
    let root = data_dir.or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from));

    match root {
        Some(root) => Ok(Storage::with_root(root)),
        None => Storage::from_default_project().context("no data directory available"),
    }
}

/// Preferences from the registry, or defaults when there is none.
fn stored_preferences(data_dir: Option<PathBuf>) -> ViewerPreferences {
    let loaded = storage(data_dir).and_then(|storage| Ok(storage.load_preferences()?));
    loaded.unwrap_or_else(|err| {
        tracing::warn!(error = %err, "using default preferences");
        ViewerPreferences::default()
    })
}

fn run_sets(storage: &Storage, command: SetsCommand) -> Result<()> {
    match command {
        SetsCommand::List => print_json(&storage.list()?),
        SetsCommand::Create { name, original, translated } => {
            ensure_pdf_exists(&original)?;
            ensure_pdf_exists(&translated)?;
            let set = storage
                .create(&name, &original, &translated)
                .context("failed to create document set")?;
            print_json(&set)
        }
        SetsCommand::Delete { id } => {
            storage.delete(&id)?;
            println!("deleted:{id}");
            Ok(())
        }
    }
}

fn run_prefs(storage: &Storage, command: PrefsCommand) -> Result<()> {
    let mut prefs = storage.load_preferences()?;

    if let PrefsCommand::Set { scale, band_rows, facing } = command {
        if let Some(scale) = scale {
            prefs.render_scale = scale;
        }
        if let Some(band_rows) = band_rows {
            prefs.band_rows = band_rows;
        }
        if let Some(facing) = facing {
            prefs.facing = facing;
        }
        prefs = prefs.sanitized();
        storage.save_preferences(&prefs)?;
    }

    print_json(&prefs)
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let first_page_size_pt = if page_count > 0 {
        let size = engine.page_size(handle, 0)?;
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };

    let payload = InfoOutput { path: file.display().to_string(), page_count, first_page_size_pt };
    print_json(&payload)?;

    engine.close(handle)?;

    Ok(())
}

/// Run [`compare`] on the pdfium backend when it is compiled in and the
/// system library binds, otherwise on the lopdf backend.
async fn compare_with_backend(
    left: &Path,
    right: &Path,
    prefs: &ViewerPreferences,
    page: Option<u32>,
    out: Option<&Path>,
) -> Result<Option<u32>> {
    #[cfg(feature = "pdfium")]
    {
        use pdf_engine::pdfium_backend::PdfiumEngine;

        match PdfiumEngine::from_system_library() {
            Ok(left_engine) => {
                let right_engine = PdfiumEngine::from_system_library()?;
                return compare(left_engine, right_engine, left, right, prefs, page, out).await;
            }
            Err(err) => tracing::warn!(error = %err, "pdfium unavailable, using lopdf"),
        }
    }

    compare(default_engine(), default_engine(), left, right, prefs, page, out).await
}

/// Drive a controller over `left` and `right` until both panels settle.
///
/// Returns the left panel's current page when a page was requested. Fails
/// only when neither document could be loaded.
async fn compare<E: PdfEngine + Send + 'static>(
    left_engine: E,
    right_engine: E,
    left: &Path,
    right: &Path,
    prefs: &ViewerPreferences,
    page: Option<u32>,
    out: Option<&Path>,
) -> Result<Option<u32>> {
    let mut controller = DualPaneController::new(left_engine, right_engine, prefs);
    let mut events = controller.subscribe().context("event stream already taken")?;

    let report = controller.open(left, right).await;
    if let Some(page) = page {
        scroll_to_page(&mut controller, page);
    }
    let (left_phase, right_phase) = controller.wait_idle().await;
    let current = page.and_then(|_| controller.panel(PanelSide::Left).current_page());
    tracing::info!(?left_phase, ?right_phase, ?current, "comparison settled");

    print_events(&mut events)?;

    if let Some(out) = out {
        write_pages(&controller, out)?;
    }
    controller.dispose().await;

    if report.both_failed() {
        anyhow::bail!("neither document could be loaded");
    }
    Ok(current)
}

fn scroll_to_page<E: PdfEngine + Send + 'static>(
    controller: &mut DualPaneController<E>,
    page: u32,
) {
    let offset = controller.panel(PanelSide::Left).layout().page_start_offset(page);
    match offset {
        Some(offset) => {
            controller.scroll(PanelSide::Left, offset);
        }
        None => tracing::warn!(page, "page is outside the left document"),
    }
}

fn print_events(events: &mut UnboundedReceiver<PanelEvent>) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn write_pages<E: PdfEngine>(controller: &DualPaneController<E>, out: &Path) -> Result<()> {
    fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    for side in PanelSide::BOTH {
        for (page, image) in controller.surfaces(side) {
            let path = out.join(format!("{side}-page-{page}.png"));
            image
                .save(&path)
                .with_context(|| format!("failed to write image to {}", path.display()))?;
            tracing::debug!(path = %path.display(), "page written");
        }
    }

    Ok(())
}

fn block_on<T, F: std::future::Future<Output = Result<T>>>(future: F) -> Result<T> {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .context("failed to start runtime")?
        .block_on(future)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
