//! Command implementations

use std::path::PathBuf;
use std::sync::Arc;

use blight_core::api::HttpSyncApi;
use blight_core::auth::{HttpAuthApi, SessionManager, SessionPersistence};
use blight_core::config::Config;
use blight_core::db::{PredictionRepository, RemedyRepository};
use blight_core::models::{PredictionRecord, RemedyRecord};
use blight_core::reachability::ReachabilityMonitor;
use blight_core::store::LocalStore;
use blight_core::sync::{FlowOutcome, SyncEngine, SyncError};

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::session_store::KeyringSessionStore;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Login { email, password } => login(cli.db_path, &email, &password).await,
        Commands::Logout { all } => logout(cli.db_path, all).await,
        Commands::Status => status(cli.db_path).await,
        Commands::Sync => sync(cli.db_path).await,
        Commands::History { limit, json } => history(cli.db_path, limit, json).await,
        Commands::Remedies { code, json } => remedies(cli.db_path, code.as_deref(), json).await,
    }
}

struct AppContext {
    store: Arc<LocalStore>,
    session: Arc<SessionManager>,
    engine: Arc<SyncEngine>,
}

/// Wire the full engine: store, session, API client, sync engine.
///
/// The CLI has no platform connectivity signal, so the monitor starts
/// online and transport failures surface through the flows instead.
async fn build_context(db_path: Option<PathBuf>) -> Result<AppContext, CliError> {
    let config = Config::from_env();
    let base_url = config
        .api_base_url()
        .map_err(|error| CliError::Config(error.to_string()))?
        .to_string();

    let store = Arc::new(open_store(db_path.or(config.database_path)).await);

    let auth_api = Arc::new(HttpAuthApi::new(&base_url)?);
    let session = Arc::new(SessionManager::new(
        auth_api,
        Arc::new(KeyringSessionStore::new()),
    ));
    session.restore().await?;

    let sync_api = Arc::new(HttpSyncApi::new(&base_url, Arc::clone(&session))?);
    let monitor = ReachabilityMonitor::new(true);
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        sync_api,
        Arc::clone(&session),
        monitor,
    ));

    Ok(AppContext {
        store,
        session,
        engine,
    })
}

async fn open_store(db_path: Option<PathBuf>) -> LocalStore {
    let path = db_path.unwrap_or_else(default_db_path);
    if let Some(parent) = path.parent() {
        if let Err(error) = std::fs::create_dir_all(parent) {
            tracing::warn!("Could not create data directory {}: {error}", parent.display());
        }
    }
    LocalStore::open(&path).await
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("blight")
        .join("blight.db")
}

async fn login(db_path: Option<PathBuf>, email: &str, password: &str) -> Result<(), CliError> {
    let ctx = build_context(db_path).await?;
    let user = ctx.session.login(email, password).await?;
    let email_label = user.email.as_deref().unwrap_or("(no email)");
    println!("Signed in as {email_label}");

    // Warm the offline cache right away.
    if let Some(report) = ctx.engine.trigger().await {
        print_report_line("remedies", &report.remedies);
        print_report_line("models", &report.models);
    }
    Ok(())
}

async fn logout(db_path: Option<PathBuf>, all: bool) -> Result<(), CliError> {
    let ctx = build_context(db_path).await?;
    if !ctx.session.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    if all {
        ctx.session.logout_all().await?;
        println!("Signed out everywhere.");
    } else {
        ctx.session.logout().await?;
        println!("Signed out.");
    }
    Ok(())
}

async fn status(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = build_context(db_path).await?;

    match ctx.session.current_user() {
        Some(user) => {
            let email_label = user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in as {email_label}");
        }
        None => println!("Not signed in."),
    }

    if !ctx.store.is_available() {
        println!("Offline cache unavailable; captures are not persisted on this device.");
        return Ok(());
    }

    match ctx.engine.overview().await {
        Ok(overview) => {
            println!(
                "Pending uploads: {}",
                overview.pending_predictions
            );
            match overview.last_full_sync {
                Some(at) => println!("Last full sync: {}", at.to_rfc3339()),
                None => println!("Last full sync: never"),
            }
        }
        Err(error) => println!("Sync status unavailable: {error}"),
    }
    Ok(())
}

async fn sync(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = build_context(db_path).await?;
    if !ctx.session.is_authenticated() {
        return Err(CliError::NotSignedIn);
    }

    match ctx.engine.trigger().await {
        None => println!("Sync skipped (offline or already running)."),
        Some(report) => {
            print_report_line("predictions", &report.predictions);
            print_report_line("remedies", &report.remedies);
            print_report_line("models", &report.models);
        }
    }
    Ok(())
}

fn print_report_line(flow: &str, result: &Result<FlowOutcome, SyncError>) {
    match result {
        Ok(outcome) if outcome.rejected > 0 => println!(
            "{flow}: {} synced, {} rejected (kept for retry)",
            outcome.synced, outcome.rejected
        ),
        Ok(outcome) => println!("{flow}: {} synced", outcome.synced),
        Err(error) => println!("{flow}: failed ({error})"),
    }
}

async fn history(db_path: Option<PathBuf>, limit: usize, json: bool) -> Result<(), CliError> {
    let session = KeyringSessionStore::new()
        .load_session()?
        .ok_or(CliError::NotSignedIn)?;
    let store = open_store(db_path.or_else(|| Config::from_env().database_path)).await;

    let captures = store
        .predictions()?
        .list(&session.user.id, limit, 0)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&captures)?);
        return Ok(());
    }
    if captures.is_empty() {
        println!("No captures yet.");
        return Ok(());
    }
    for capture in &captures {
        println!("{}", format_capture(capture));
    }
    Ok(())
}

fn format_capture(capture: &PredictionRecord) -> String {
    let mark = if capture.synced { "synced" } else { "pending" };
    format!(
        "{}  {:<24} {:>5.1}%  [{}]",
        capture.created_at.format("%Y-%m-%d %H:%M"),
        capture.top_prediction,
        capture.confidence * 100.0,
        mark
    )
}

async fn remedies(
    db_path: Option<PathBuf>,
    code: Option<&str>,
    json: bool,
) -> Result<(), CliError> {
    let store = open_store(db_path.or_else(|| Config::from_env().database_path)).await;
    let repo = store.remedies()?;

    if let Some(code) = code {
        let Some(remedy) = repo.get_by_code(code).await? else {
            println!("No cached remedy for code {code}. Run `blight sync` to refresh the cache.");
            return Ok(());
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&remedy)?);
        } else {
            print_remedy(&remedy);
        }
        return Ok(());
    }

    let all = repo.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    if all.is_empty() {
        println!("Remedy cache is empty. Run `blight sync` while online.");
        return Ok(());
    }
    for remedy in &all {
        println!(
            "{:<20} {:<28} severity: {}",
            remedy.disease_code, remedy.disease_name, remedy.severity
        );
    }
    Ok(())
}

fn print_remedy(remedy: &RemedyRecord) {
    println!("{} ({})", remedy.disease_name, remedy.disease_code);
    println!("Severity: {}", remedy.severity);
    println!("{}", remedy.description);
    if !remedy.treatments.is_empty() {
        println!("Treatments:");
        for treatment in &remedy.treatments {
            println!("  - {treatment}");
        }
    }
    if !remedy.prevention_measures.is_empty() {
        println!("Prevention:");
        for measure in &remedy.prevention_measures {
            println!("  - {measure}");
        }
    }
}
