// Command-line front end for the image analysis service.
//
// Each subcommand corresponds to one view: the auth forms, the analysis screen and the
// history list. The session token persists between runs in the session file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use image_analyser::analysis::AnalyzeView;
use image_analyser::config::ClientConfig;
use image_analyser::overlay;
use image_analyser::{
    logging, AnalyzeFlow, AnalyzeMode, AnalyzeStatus, ApiClient, AuthError, AuthFlow, FileStore,
    HistoryEntry, HistoryFlow, HistoryState, ImageFile, MainView, Mode, SessionStore, ViewRouter,
};

#[derive(Parser)]
#[command(name = "image-analyser", version, about = "Detect and describe objects in images")]
struct Cli {
    /// Overrides API_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account, then log in with it
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long = "confirm")]
        password_confirmation: String,
    },
    /// Forget the stored session token
    Logout,
    /// Show the session state and the current view
    Status,
    /// Upload an image for detection and description
    Analyse {
        image: PathBuf,
        /// Use the separate /detect and /describe endpoints
        #[arg(long)]
        split: bool,
        /// Write a copy of the image with detection boxes drawn on it
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// List previous analyses
    History {
        /// Write each entry's image, with boxes, into this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

struct App {
    api: ApiClient,
    router: ViewRouter,
}

impl App {
    fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let store = FileStore::new(&config.session_path);
        let session = SessionStore::load(Arc::new(store))
            .with_context(|| format!("Failed to read {}", config.session_path.display()))?;
        let router = ViewRouter::new(session.subscribe());
        let api = ApiClient::from_config(config, session)?;
        Ok(Self { api, router })
    }

    /// Resolves `path`; fails when the session does not allow that view.
    fn enter(&mut self, path: &str) -> anyhow::Result<()> {
        let mode = self.router.navigate(path);
        if mode.path() != path {
            bail!("{} requires a session, redirected to {}", path, mode.path());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let mut app = App::new(&config)?;

    match cli.command {
        Command::Login { email, password } => {
            let auth = AuthFlow::new(app.api.clone());
            report_auth(auth.login(&email, &password).await)?;
            after_login(&mut app).await
        }
        Command::Register {
            email,
            password,
            password_confirmation,
        } => {
            let auth = AuthFlow::new(app.api.clone());
            report_auth(
                auth.register(&email, &password, &password_confirmation)
                    .await,
            )?;
            after_login(&mut app).await
        }
        Command::Logout => {
            AuthFlow::new(app.api.clone()).logout().await?;
            let mode = app.router.on_session_change();
            println!("Logged out. Now at {}", mode.path());
            Ok(())
        }
        Command::Status => {
            let session = app.api.session().session();
            println!("Backend:       {}", app.api.base_url());
            println!("Authenticated: {}", session.is_authenticated());
            println!("View:          {}", app.router.current().path());
            Ok(())
        }
        Command::Analyse {
            image,
            split,
            annotate,
        } => {
            app.enter("/image-analysis")?;
            let mode = if split {
                AnalyzeMode::Split
            } else {
                AnalyzeMode::Combined
            };
            analyse(&app, &image, mode, annotate.as_deref()).await
        }
        Command::History { export } => {
            app.enter("/history")?;
            show_history(&app, export.as_deref()).await
        }
    }
}

fn report_auth(result: Result<(), AuthError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(AuthError::Invalid(errors)) => {
            for (field, message) in [
                ("email", errors.email),
                ("password", errors.password),
                ("confirm", errors.password_confirmation),
            ] {
                if let Some(message) = message {
                    eprintln!("  --{field}: {message}");
                }
            }
            bail!("Please fix the fields above")
        }
        Err(e) => bail!("{e}"),
    }
}

async fn after_login(app: &mut App) -> anyhow::Result<()> {
    let mode = app.router.on_session_change();
    println!("Logged in. Now at {}", mode.path());
    if mode == Mode::Authenticated(MainView::History) {
        show_history(app, None).await?;
    }
    Ok(())
}

async fn analyse(
    app: &App,
    path: &Path,
    mode: AnalyzeMode,
    annotate: Option<&Path>,
) -> anyhow::Result<()> {
    let file = ImageFile::open(path)
        .await
        .with_context(|| format!("Cannot use {}", path.display()))?;

    let flow = AnalyzeFlow::new(app.api.clone(), mode);
    flow.select_file(file.clone()).await;
    println!("Processing {} ...", file.name());

    match flow.analyze().await {
        Ok(_) => {}
        // rendered from the view state below, next to any detections that arrived
        Err(e) if e.shown_in_view() => {}
        Err(e) => bail!(e),
    }
    let view = flow.view().await;
    print_analysis(&view, file.dimensions());

    if let Some(out) = annotate {
        let img = image::load_from_memory(file.bytes())?;
        overlay::annotate(&img, &view.overlays())
            .save(out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        println!("Annotated image written to {}", out.display());
    }

    match view.status {
        AnalyzeStatus::Error(message) => bail!(message),
        _ => Ok(()),
    }
}

fn print_analysis(view: &AnalyzeView, (width, height): (u32, u32)) {
    println!("Image: {}x{}", width, height);
    if !view.description.is_empty() {
        println!("Description: {}", view.description);
    }
    for b in view.overlays() {
        println!(
            "  [{}] at ({}, {}) size {}x{}",
            b.label, b.left, b.top, b.width, b.height
        );
    }
    if let Some(message) = view.message() {
        println!("Note: {message}");
    }
}

async fn show_history(app: &App, export: Option<&Path>) -> anyhow::Result<()> {
    let flow = HistoryFlow::new(app.api.clone());
    let entries = flow.fetch_history().await;
    let entries = match entries {
        Ok(entries) => entries,
        Err(_) => {
            if let HistoryState::Error(message) = flow.state().await {
                bail!(message);
            }
            bail!(image_analyser::history::GENERIC_HISTORY_ERROR);
        }
    };

    println!("Analysis history");
    if entries.is_empty() {
        println!("  No analyses yet. Run `image-analyser analyse <image>` to start one.");
        return Ok(());
    }

    for (index, entry) in entries.iter().enumerate() {
        println!("  Image {}", index + 1);
        println!("    Description: {}", entry.description);
        println!("    Objects detected: {}", entry.detections.len());
    }

    if let Some(dir) = export {
        std::fs::create_dir_all(dir)?;
        for (index, entry) in entries.iter().enumerate() {
            let out = dir.join(format!("image-{}.png", index + 1));
            export_entry(entry, &out)
                .with_context(|| format!("Failed to export image {}", index + 1))?;
        }
        println!("Exported {} images to {}", entries.len(), dir.display());
    }
    Ok(())
}

fn export_entry(entry: &HistoryEntry, out: &Path) -> anyhow::Result<()> {
    let bytes = entry.decode_image()?;
    let img = image::load_from_memory(&bytes)?;
    overlay::annotate(&img, &entry.overlays()).save(out)?;
    Ok(())
}
