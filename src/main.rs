//! Entry point of the `copilot` CLI.
//!
//! ```sh
//! copilot init
//! copilot index ~/projects/webapp --rebuild
//! copilot search "where is the login handler" -k 3
//! copilot ask "how do I add a route?"
//! copilot history -n 6
//! ```
//!
//! Set `RUST_LOG=debug` to see requests and storage activity on stderr.

use std::error::Error;
use std::fs;
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use context_copilot::commands::{Cli, Commands};
use context_copilot::completion::OpenAiCompletion;
use context_copilot::config::{self, CopilotConfig};
use context_copilot::copilot::Copilot;
use context_copilot::embedding::SentenceEmbedder;
use context_copilot::ingest::{self, IngestOptions};
use context_copilot::memory::MemoryBuffer;
use context_copilot::models::TurnRole;
use context_copilot::search::ScoredRecord;
use context_copilot::template::{self, ChatTemplate, DEFAULT_TEMPLATE};
use context_copilot::vector_store::VectorStore;

static TRACING: OnceCell<()> = OnceCell::new();

/// Characters of each hit shown by `search`.
const PREVIEW_CHARS: usize = 150;

/// Turns shown by `history` without `-n`.
const HISTORY_TURNS: usize = 30;

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = || load_config(cli.config.as_deref());

    match cli.command {
        Commands::Init => {
            debug!("Initializing configuration");
            init()?;
        }
        Commands::Index { dir, rebuild } => {
            let config = config()?;
            let mut store = VectorStore::open(&config.db_url, config.corpus.clone())?;
            let embedder = SentenceEmbedder::load()?;
            let report = ingest::ingest_directory(
                &mut store,
                &embedder,
                &dir,
                &IngestOptions::from_config(&config, rebuild),
            )?;
            if report.files == 0 {
                print_colored(Color::Yellow, "No readable project files found.\n")?;
            } else {
                print_colored(
                    Color::Green,
                    &format!(
                        "Indexed {} files ({} chunks) into {}\n",
                        report.files, report.chunks, config.db_url
                    ),
                )?;
            }
        }
        Commands::Search { query, k } => {
            let config = config()?;
            let copilot = Copilot::from_config(
                &config,
                ChatTemplate::default(),
                SentenceEmbedder::load()?,
                OpenAiCompletion::new(&config),
            )?;
            let hits = copilot.search(&query, k.unwrap_or(config.top_k))?;
            print_hits(&hits)?;
        }
        Commands::Ask {
            question,
            no_context,
            template,
            session,
        } => {
            let mut config = config()?;
            if let Some(session) = session {
                config.session_name = session;
            }
            let template = resolve_template(template.as_deref())?;
            let completion = OpenAiCompletion::new(&config);
            let copilot =
                Copilot::from_config(&config, template, SentenceEmbedder::load()?, completion)?;

            let reply = if no_context {
                copilot.chat_without_context(&question).await?
            } else {
                copilot.chat(&question).await?
            };
            print_colored(Color::Yellow, &format!("{reply}\n"))?;
        }
        Commands::History { n, session } => {
            let config = config()?;
            let session = session.unwrap_or_else(|| config.session_name.clone());
            let memory = MemoryBuffer::open(&config.db_url, &session, config.memory_window)?;
            for turn in memory.recent(n.unwrap_or(HISTORY_TURNS))? {
                let color = match turn.role {
                    TurnRole::User => Color::Cyan,
                    TurnRole::Assistant => Color::Yellow,
                };
                print_colored(
                    color,
                    &format!(
                        "[{}] {}: {}\n",
                        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        turn.role,
                        turn.content
                    ),
                )?;
            }
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<CopilotConfig, Box<dyn Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    if explicit.is_none() && !path.exists() {
        warn!(
            "No config at {}; using defaults. Run `copilot init` to create one.",
            path.display()
        );
        return Ok(CopilotConfig::default());
    }
    let config = config::load_config(&path)?;
    debug!("Config loaded: {:?}", config);
    Ok(config)
}

fn default_config_path() -> Result<PathBuf, Box<dyn Error>> {
    Ok(context_copilot::config_dir()?.join("config.yaml"))
}

/// An explicitly named template must exist; the default one falls back to the
/// built-in copilot template.
fn resolve_template(name: Option<&str>) -> Result<ChatTemplate, Box<dyn Error>> {
    match name {
        Some(name) => Ok(template::load_template(name)?),
        None => match template::load_template(DEFAULT_TEMPLATE) {
            Ok(template) => Ok(template),
            Err(e) => {
                debug!("Using built-in template: {}", e);
                Ok(ChatTemplate::default_copilot())
            }
        },
    }
}

fn print_hits(hits: &[ScoredRecord]) -> Result<(), Box<dyn Error>> {
    if hits.is_empty() {
        print_colored(Color::Yellow, "No indexed context. Run `copilot index <dir>` first.\n")?;
        return Ok(());
    }
    print_colored(Color::Green, "Top related contexts:\n")?;
    for (rank, hit) in hits.iter().enumerate() {
        print_colored(
            Color::Cyan,
            &format!(
                "{}. [{:.4}] {}\n",
                rank + 1,
                hit.score,
                hit.record.source_location
            ),
        )?;
        let preview: String = hit
            .record
            .text
            .chars()
            .take(PREVIEW_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        print_colored(Color::White, &format!("   {preview} ...\n"))?;
    }
    Ok(())
}

fn print_colored(color: Color, text: &str) -> std::io::Result<()> {
    let mut out = stdout();
    out.execute(SetForegroundColor(color))?
        .execute(Print(text))?
        .execute(ResetColor)?;
    out.flush()
}

/// Write the default config and template into the config directory.
///
/// Existing files are left untouched.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = context_copilot::config_dir()?;
    let templates_dir = config_dir.join("templates");
    info!("Creating template config directory: {}", templates_dir.display());
    fs::create_dir_all(&templates_dir)?;

    let template_path = templates_dir.join(format!("{DEFAULT_TEMPLATE}.yaml"));
    write_if_missing(
        &template_path,
        &serde_yaml::to_string(&ChatTemplate::default_copilot())?,
    )?;

    let config_path = config_dir.join("config.yaml");
    let config = CopilotConfig {
        db_url: config_dir.join("copilot.db").display().to_string(),
        ..CopilotConfig::default()
    };
    write_if_missing(&config_path, &serde_yaml::to_string(&config)?)?;

    print_colored(
        Color::Green,
        &format!("Configuration ready in {}\n", config_dir.display()),
    )?;
    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> std::io::Result<()> {
    if path.exists() {
        info!("Keeping existing {}", path.display());
        return Ok(());
    }
    info!("Creating {}", path.display());
    fs::write(path, content)
}
