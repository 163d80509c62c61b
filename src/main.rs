use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use assessment_player_core::{
    config::{Config, LogFormat},
    session::{AttemptKey, SessionPosition, SessionStore},
    AccommodationResolver, AssessmentDocument, Navigator,
};

#[derive(Parser)]
#[command(
    name = "assessment-inspect",
    about = "Inspect navigation, sessions and tool resolution for an assessment document"
)]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the question list and navigation tree
    Structure {
        /// Assessment document (JSON)
        file: String,
    },

    /// Resolve accommodation tools
    Resolve {
        /// Assessment document (JSON)
        file: String,

        /// Scope resolution to one item identifier
        #[arg(long)]
        item: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "tools")]
        format: ResolveFormat,
    },

    /// Load or create the attempt session for a document
    Session {
        /// Assessment document (JSON)
        file: String,

        /// Authenticated user id; omitted means the anonymous device id
        #[arg(long)]
        user: Option<String>,

        /// Assignment id
        #[arg(long)]
        assignment: Option<String>,

        /// Move to this position and persist it
        #[arg(long)]
        goto: Option<usize>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResolveFormat {
    /// Resolved tool list and auto-activation
    Tools,
    /// Provenance report as Markdown
    Markdown,
    /// Provenance report as JSON
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "assessment-inspect starting"
    );

    match cli.command {
        Commands::Structure { file } => structure(&file),
        Commands::Resolve { file, item, format } => resolve(&config, &file, item.as_deref(), format),
        Commands::Session {
            file,
            user,
            assignment,
            goto,
        } => session(&config, &file, user.as_deref(), assignment.as_deref(), goto),
    }
}

fn load(file: &str) -> anyhow::Result<AssessmentDocument> {
    AssessmentDocument::from_path(file).with_context(|| format!("failed to load {}", file))
}

fn structure(file: &str) -> anyhow::Result<()> {
    let doc = load(file)?;
    let navigator = Navigator::new(&doc);
    let output = json!({
        "assessmentId": doc.assessment_id(),
        "format": doc.format().to_string(),
        "questionRefs": navigator.question_refs(),
        "sections": navigator.sections(),
        "tree": navigator.tree(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn resolve(
    config: &Config,
    file: &str,
    item: Option<&str>,
    format: ResolveFormat,
) -> anyhow::Result<()> {
    let doc = load(file)?;
    let mut resolver = AccommodationResolver::from_config(&config.resolver);
    if format != ResolveFormat::Tools && !config.resolver.provenance_enabled {
        warn!("Provenance disabled by configuration, enabling it for this report");
        resolver = resolver.with_provenance(true);
    }
    let resolved = resolver.resolve_for_item(&doc, item);

    match format {
        ResolveFormat::Tools => {
            let output = json!({
                "tools": resolved.tools,
                "autoActivate": resolved.auto_activate,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        ResolveFormat::Markdown => {
            let report = resolved
                .provenance
                .context("resolution produced no provenance report")?;
            println!("{}", report.to_markdown());
        }
        ResolveFormat::Json => {
            let report = resolved
                .provenance
                .context("resolution produced no provenance report")?;
            println!("{}", report.to_json()?);
        }
    }
    Ok(())
}

fn session(
    config: &Config,
    file: &str,
    user: Option<&str>,
    assignment: Option<&str>,
    goto: Option<usize>,
) -> anyhow::Result<()> {
    let doc = load(file)?;
    let navigator = Navigator::new(&doc);
    let store = SessionStore::from_config(&config.storage);

    let assessment_id = doc.assessment_id();
    let mut key = AttemptKey::new(&assessment_id);
    if let Some(user) = user {
        key = key.with_user(user);
    }
    if let Some(assignment) = assignment {
        key = key.with_assignment(assignment);
    }

    let mut session =
        store.load_or_create(&key, &navigator.item_identifiers(), &doc.context_declarations);

    if let Some(index) = goto {
        let index = navigator.go_to(index)?;
        let identifier = navigator
            .question_refs()
            .get(index)
            .map(|r| r.identifier.clone())
            .context("validated position has no question")?;
        let section = navigator.section_for_item(&identifier).map(String::from);
        session = store.save(
            session
                .set_current_position(SessionPosition {
                    current_item_index: index as i64,
                    current_section_identifier: section,
                })?
                .upsert_visited_item(identifier),
        );
    }

    if store.is_degraded() {
        warn!("Session storage degraded, this attempt will not survive a restart");
    }

    let state = navigator.state(session.navigation_state.current_item_index)?;
    let output = json!({
        "session": session,
        "navigation": state,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
