use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use glitchq::api::HttpTransport;
use glitchq::cache::{DiskStore, MemoryStore};
use glitchq::game::{Visit, auctions, character, locations, skills};
use glitchq::{Config, Result, Session};

#[derive(Parser)]
#[command(name = "glitchq", version, about = "Query the Glitch API: skill queues, streets and auctions")]
struct Cli {
    /// Character whose token and cache to use
    #[arg(long, global = true)]
    character: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep responses in memory only for this run
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the authenticated player
    Whoami,
    /// Show learnable skills on the way to the configured targets
    Queue,
    /// Show the next skill to learn
    Next,
    /// Start learning a skill
    Learn { skill: String },
    /// Show the skill currently being learned
    Learning,
    /// List requirements still missing for a skill
    Blocking { skill: String },
    /// Walk the street graph outward (defaults to the current street)
    Explore { street: Option<String> },
    /// List streets with an active project
    Projects,
    /// List subway streets
    Subways,
    /// List open auctions
    Auctions {
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete this character's cached responses
    ClearCache,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glitchq=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(character) = cli.character {
        config.character = character;
    }

    if let Command::ClearCache = cli.command {
        let root = config.cache_root()?;
        DiskStore::new(&root).clear()?;
        println!("cleared {}", root.display());
        return Ok(());
    }

    let session = if cli.no_cache {
        let token = config.token()?;
        let transport = HttpTransport::new(&config.base_url, config.timeout())?;
        Session::new(config, Arc::new(transport), Arc::new(MemoryStore::new()), &token)
    } else {
        Session::from_config(config)?
    };

    match cli.command {
        Command::Whoami => print_json(&character::me(&session).await?),
        Command::Queue => {
            let chains = skills::load_targets(&session.config().targets_path())?;
            let queue = skills::learn_queue(&session, &chains).await?;
            for unknown in &queue.unknown {
                tracing::warn!(skill = %unknown.id, required_by = ?unknown.required_by, "unknown skill");
            }
            for cycle in &queue.cycles {
                tracing::warn!(skill = %cycle.skill, prerequisite = %cycle.prerequisite, "prerequisite cycle");
            }
            if let Some(chain) = queue.chain {
                println!("target chain {}", chain + 1);
            }
            for skill in &queue.skills {
                println!("{:>8}s  {}  {}", skill.time_remaining, skill.id, skill.name);
            }
            Ok(())
        }
        Command::Next => {
            let chains = skills::load_targets(&session.config().targets_path())?;
            match skills::next_skill(&session, &chains).await? {
                Some(skill) => println!("{}  {}", skill.id, skill.name),
                None => println!("nothing to learn"),
            }
            Ok(())
        }
        Command::Learn { skill } => print_json(&skills::learn(&session, &skill).await?),
        Command::Learning => print_json(&skills::now_learning(&session).await?),
        Command::Blocking { skill } => {
            let blockers = skills::blocking_requirements(&session, &skill).await?;
            for cycle in &blockers.cycles {
                tracing::warn!(skill = %cycle.skill, prerequisite = %cycle.prerequisite, "prerequisite cycle");
            }
            for req in blockers.requirements {
                println!("{}  {}", req.kind, req.display_name());
            }
            Ok(())
        }
        Command::Explore { street } => {
            let start = match street {
                Some(street) => street,
                None => character::current_street(&session).await?,
            };
            let visits: Arc<Mutex<Vec<Visit>>> = Arc::default();
            let sink = Arc::clone(&visits);
            locations::explore(&session, &start, move |distance, street, via_subway| {
                if let Ok(mut visits) = sink.lock() {
                    visits.push(Visit {
                        distance,
                        via_subway,
                        street: street.clone(),
                    });
                }
            })
            .await?;

            let mut visits = visits.lock().map(|v| v.clone()).unwrap_or_default();
            visits.sort_by(|a, b| (a.distance, &a.street.id).cmp(&(b.distance, &b.street.id)));
            for visit in visits {
                let marker = if visit.via_subway { " (subway)" } else { "" };
                println!(
                    "{:>3}  {}  {}{}",
                    visit.distance, visit.street.id, visit.street.name, marker
                );
            }
            Ok(())
        }
        Command::Projects => {
            for street in locations::active_projects(&session).await? {
                println!("{}  {}", street.id, street.name);
            }
            Ok(())
        }
        Command::Subways => {
            for tsid in locations::subways(&session).await? {
                println!("{}", tsid);
            }
            Ok(())
        }
        Command::Auctions { category } => {
            print_json(&auctions::list(&session, category.as_deref()).await?)
        }
        Command::ClearCache => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
