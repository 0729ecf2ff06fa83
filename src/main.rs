use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod aggregate;
mod anonymize;
mod config;
mod db;
mod error;
mod models;
mod report;

use config::SkillTemplate;

#[derive(Parser)]
#[command(name = "peer-feedback-report")]
#[command(about = "Self vs. peer feedback reports with anonymity-preserving assembly", long_about = None)]
struct Cli {
    /// TOML skill template; the built-in product-manager template otherwise
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a concluded demo cycle
    Seed,
    /// Import shared-link responses for a cycle from a CSV file
    Import {
        #[arg(long)]
        cycle: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print per-skill peer statistics and self/peer gaps
    Stats {
        #[arg(long)]
        cycle: Uuid,
    },
    /// Assemble and render the report for a concluded cycle
    Report {
        #[arg(long)]
        cycle: Uuid,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let template = SkillTemplate::load(cli.template.as_deref())?;

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the feedback Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let cycle_id = db::seed(&pool).await?;
            println!("Seed data inserted for cycle {cycle_id}.");
        }
        Commands::Import { cycle, csv } => {
            let inserted = db::import_csv(&pool, cycle, &csv).await?;
            println!("Inserted {inserted} responses from {}.", csv.display());
        }
        Commands::Stats { cycle } => {
            let inputs = db::fetch_cycle_inputs(&pool, cycle).await?;
            let result = aggregate::aggregate(&inputs.responses, &inputs.self_ratings, &template)?;

            if inputs.responses.is_empty() {
                println!("No responses recorded for this cycle.");
            }

            println!("Peer ratings across {} responses:", inputs.responses.len());
            for skill in &template.skills {
                let Some(stat) = result.stats.get(&skill.key) else {
                    continue;
                };
                let average = stat
                    .average
                    .map(|avg| format!("{avg:.2}"))
                    .unwrap_or_else(|| "n/a".to_string());
                let gap = result
                    .gaps
                    .get(&skill.key)
                    .copied()
                    .flatten()
                    .map(|gap| format!("{gap:+.1}"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "- {}: avg {} from {} ratings, {} can't say, gap {}",
                    skill.name, average, stat.responded_count, stat.cant_say_count, gap
                );
            }
        }
        Commands::Report { cycle, format, out } => {
            let inputs = db::fetch_cycle_inputs(&pool, cycle).await?;
            let built = report::build_report(&inputs, &template)?;
            let rendered = match format {
                Format::Markdown => report::render_markdown(&built, &template),
                Format::Json => report::render_json(&built)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}
