use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

mod app;
mod config;
mod db;
mod error;
mod fetcher;
mod models;
mod sync;
mod validator;

use app::App;
use config::Config;
use models::{Article, Group, GroupId};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save a link
    Add {
        url: String,
        /// Fetch previews right away
        #[arg(long)]
        sync: bool,
    },
    /// Create a group
    AddGroup { name: String },
    /// List saved links, newest first
    List {
        #[arg(long)]
        group: Option<GroupId>,
        #[arg(long)]
        json: bool,
    },
    /// List groups by name
    Groups {
        #[arg(long)]
        json: bool,
    },
    /// Put a link into a group
    Assign { article: String, group: GroupId },
    /// Take a link out of a group
    Unassign { article: String, group: GroupId },
    /// Delete a link and its cached preview
    Delete { article: String },
    /// Delete a group; its links are kept
    DeleteGroup { group: GroupId },
    /// Fetch previews for links that have none yet
    Sync,
    /// Show the preview data for a URL without saving it
    Preview { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let mut app = App::new(&config)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path))?;

    match cli.command {
        Command::Add { url, sync } => {
            let article = app.add_article(&url).await?;
            println!("Saved {} ({})", article.url, article.id);
            if sync {
                run_sync(&mut app).await?;
            }
        }
        Command::AddGroup { name } => {
            let group = app.add_group(&name).await?;
            println!("Created group {} ({})", group.name, group.id);
        }
        Command::List { group, json } => {
            app.set_group_filter(group).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&app.articles)?);
            } else {
                print_articles(&app.articles, &app.groups);
            }
        }
        Command::Groups { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&app.groups)?);
            } else {
                for group in &app.groups {
                    println!("{:>4}  {} ({} links)", group.id, group.name, group.article_ids.len());
                }
            }
        }
        Command::Assign { article, group } => {
            app.assign_group(&article, group).await?;
            println!("Added {} to group {}", article, group);
        }
        Command::Unassign { article, group } => {
            app.unassign_group(&article, group).await?;
            println!("Removed {} from group {}", article, group);
        }
        Command::Delete { article } => {
            app.delete_article(&article).await?;
            println!("Deleted {}", article);
        }
        Command::DeleteGroup { group } => {
            app.delete_group(group).await?;
            println!("Deleted group {}", group);
        }
        Command::Sync => run_sync(&mut app).await?,
        Command::Preview { url } => {
            let meta = app.preview(&url).await?;
            println!("title: {}", meta.title.as_deref().unwrap_or("-"));
            println!("image: {}", meta.image_url.as_deref().unwrap_or("-"));
        }
    }

    Ok(())
}

async fn run_sync(app: &mut App) -> anyhow::Result<()> {
    // Ctrl-C stops the pass after the current fetch
    let engine = app.sync_engine().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine.cancel();
        }
    });

    let report = app.sync_blocking().await?;
    interrupt.abort();

    match report {
        Some(report) => {
            println!(
                "Synced {} links: {} fetched, {} skipped, {} failed{}",
                report.snapshot,
                report.fetched,
                report.skipped,
                report.failed,
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
        None => println!("No links waiting for a preview"),
    }
    Ok(())
}

fn print_articles(articles: &[Article], groups: &[Group]) {
    for article in articles {
        println!(
            "{}  {}  {}",
            article.id,
            article.created_at.format("%Y-%m-%d %H:%M"),
            article.url
        );
        if let Some(preview) = &article.preview {
            println!("    {}", preview.title.as_deref().unwrap_or("(untitled)"));
            if let Some(image) = &preview.image_url {
                println!("    {}", image);
            }
        }
        let names: Vec<&str> = article
            .group_ids
            .iter()
            .filter_map(|id| groups.iter().find(|g| g.id == *id))
            .map(|g| g.name.as_str())
            .collect();
        if !names.is_empty() {
            println!("    [{}]", names.join(", "));
        }
    }
}
