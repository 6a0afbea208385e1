//! smallworld command-line entry point.
//!
//! Logging goes to stderr as JSON; command results go to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use smallworld_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "smallworld", version, about = "Read and post to a smaller world from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the posts of a world.
    Feed {
        #[arg(long)]
        world: String,

        /// Number of pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,

        /// Keep polling and print the first page whenever it changes.
        #[arg(long)]
        watch: bool,
    },

    /// Create a post in your world.
    Post {
        /// World whose feed is updated with the new post.
        #[arg(long)]
        world: String,

        #[arg(long)]
        body: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// React to a post with an emoji.
    React {
        #[arg(long)]
        post: String,

        #[arg(long)]
        emoji: String,
    },

    /// Remove one of your reactions from a post.
    Unreact {
        #[arg(long)]
        post: String,

        /// Id of the reaction to remove.
        #[arg(long)]
        reaction: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    tracing::info!(base_url = %config.api_base_url, "starting smallworld");

    let app = commands::App::new(config)?;
    let output = match cli.command {
        Command::Feed { world, pages, watch: false } => serde_json::to_value(app.feed(&world, pages).await?)?,
        Command::Feed { world, watch: true, .. } => {
            app.watch(&world).await?;
            return Ok(());
        }
        Command::Post { world, body, title } => serde_json::to_value(app.post(&world, title.as_deref(), &body).await?)?,
        Command::React { post, emoji } => serde_json::to_value(app.react(&post, &emoji).await?)?,
        Command::Unreact { post, reaction } => serde_json::to_value(app.unreact(&post, &reaction).await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
