//! `kidneysphere` -- command-line front end for site search and notifications.
//!
//! # Usage
//!
//! ```text
//! kidneysphere search <query...> [--types article,case] [--pages N]
//! kidneysphere notifications
//! kidneysphere mark-read <cases|moments|all>
//! kidneysphere watch
//! ```
//!
//! # Environment variables
//!
//! | Variable                | Required | Default               | Description                      |
//! |-------------------------|----------|-----------------------|----------------------------------|
//! | `SUPABASE_URL`          | yes      | --                    | Project URL                      |
//! | `SUPABASE_ANON_KEY`     | yes      | --                    | Public anon key                  |
//! | `SUPABASE_ACCESS_TOKEN` | no       | --                    | Signed-in user's JWT             |
//! | `KS_STATE_DIR`          | no       | `$HOME/.kidneysphere` | Where watermarks are kept        |
//! | `REQUEST_TIMEOUT_SECS`  | no       | `30`                  | HTTP timeout                     |
//! | `WATCH_INTERVAL_SECS`   | no       | `60`                  | Poll interval for `watch`        |

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kidneysphere_client::config::ClientConfig;
use kidneysphere_client::debounce::Debouncer;
use kidneysphere_client::notifications::{CategoryFeed, NotificationAggregator, NotificationSnapshot};
use kidneysphere_client::search::{SearchAggregator, SearchSnapshot};
use kidneysphere_client::store::FileWatermarkStore;
use kidneysphere_client::supabase::SupabaseBackend;
use kidneysphere_client::watch::NotificationPoller;
use kidneysphere_core::display::{format_datetime, relative_time};
use kidneysphere_core::notifications::{Category, NotificationItem};
use kidneysphere_core::search::SearchType;

/// Site search and "new since last seen" notifications.
#[derive(Parser, Debug)]
#[command(name = "kidneysphere", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Search the whole site.
    Search {
        /// Search terms, joined with spaces.
        #[arg(required = true)]
        query: Vec<String>,

        /// Restrict to these types (comma separated).
        #[arg(long, value_delimiter = ',')]
        types: Vec<SearchType>,

        /// Number of result pages to load.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        pages: u32,
    },
    /// Show unread items per category.
    Notifications,
    /// Mark a category, or everything, as read.
    MarkRead {
        #[arg(value_enum)]
        target: MarkTarget,
    },
    /// Poll for notifications until interrupted.
    Watch,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum MarkTarget {
    Cases,
    Moments,
    All,
}

impl MarkTarget {
    fn category(self) -> Option<Category> {
        match self {
            Self::Cases => Some(Category::Cases),
            Self::Moments => Some(Category::Moments),
            Self::All => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kidneysphere_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env()?;

    tracing::debug!(
        configured = config.is_configured(),
        signed_in = config.access_token.is_some(),
        state_dir = %config.state_dir.display(),
        "Configuration loaded"
    );

    let backend = Arc::new(SupabaseBackend::new(&config));

    match cli.command {
        Command::Search {
            query,
            types,
            pages,
        } => {
            let types: BTreeSet<SearchType> = types.into_iter().collect();
            run_search(backend, &config, &query.join(" "), &types, pages).await
        }
        Command::Notifications => {
            let aggregator = notification_aggregator(backend, &config);
            let snapshot = aggregator.refresh().await?;
            print_notifications(&snapshot);
            Ok(())
        }
        Command::MarkRead { target } => {
            let aggregator = notification_aggregator(backend, &config);
            let marks = match target.category() {
                Some(category) => vec![aggregator.mark_read(category).await?],
                None => aggregator.mark_all_read().await?,
            };
            for mark in marks {
                println!("{}: read up to {}", mark.category, format_datetime(&mark.since));
            }
            Ok(())
        }
        Command::Watch => {
            let aggregator = Arc::new(notification_aggregator(backend, &config));
            let poller = NotificationPoller::new(aggregator, config.watch_interval);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping");
                }
                on_signal.cancel();
            });

            let refreshes = poller.run(cancel, print_notifications).await;
            if refreshes == 0 {
                bail!("no notification refresh succeeded");
            }
            Ok(())
        }
    }
}

fn notification_aggregator(
    backend: Arc<SupabaseBackend>,
    config: &ClientConfig,
) -> NotificationAggregator<Arc<SupabaseBackend>, FileWatermarkStore> {
    NotificationAggregator::new(backend, FileWatermarkStore::in_dir(&config.state_dir))
}

async fn run_search(
    backend: Arc<SupabaseBackend>,
    config: &ClientConfig,
    query: &str,
    types: &BTreeSet<SearchType>,
    pages: u32,
) -> anyhow::Result<()> {
    let aggregator = SearchAggregator::new(backend, Debouncer::new(config.debounce));

    // The query is still empty here, so narrowing the filter fetches nothing.
    if !types.is_empty() {
        for kind in SearchType::ALL {
            if !types.contains(&kind) {
                aggregator.toggle_type(kind).await?;
            }
        }
    }

    let mut outcome = aggregator.set_query(query).await;
    for _ in 1..pages {
        if outcome.is_err() || !aggregator.has_more().await {
            break;
        }
        outcome = aggregator.load_more().await;
    }

    while let Some(notice) = aggregator.take_notice().await {
        eprintln!("{notice}");
    }
    print_search(&aggregator.snapshot().await);
    outcome?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_search(snapshot: &SearchSnapshot) {
    println!("{}", snapshot.hint);
    if snapshot.query.is_empty() {
        return;
    }
    println!("{} result(s) for \"{}\"", snapshot.results.len(), snapshot.query);
    for view in &snapshot.results {
        println!();
        println!("[{}] {}", view.type_label, view.title);
        println!("    {}", view.url);
        if let Some(snippet) = &view.snippet {
            println!("    {snippet}");
        }
        if !view.meta.is_empty() {
            println!("    {}", view.meta);
        }
    }
    if snapshot.has_more {
        println!();
        println!("More results available (use --pages).");
    }
}

fn print_notifications(snapshot: &NotificationSnapshot) {
    println!("{}", snapshot.hint);
    for feed in &snapshot.feeds {
        print_feed(feed);
    }
}

fn print_feed(feed: &CategoryFeed) {
    let now = Utc::now();
    println!();
    println!(
        "== {} ({} new since {})",
        feed.category.label(),
        feed.count(),
        format_datetime(&feed.watermark.since)
    );
    if let Some(error) = &feed.error {
        println!("   failed to load: {error}");
    }
    if feed.items.is_empty() && feed.error.is_none() {
        println!("   no new {}", feed.category.label());
    }
    for item in &feed.items {
        let when = item
            .created_at()
            .map(|ts| relative_time(&ts, &now))
            .unwrap_or_default();
        println!("   {when:>10}  {}", item.headline());
        let (board, text) = match item {
            NotificationItem::Post(p) => (p.board_label.as_deref(), p.summary.as_str()),
            NotificationItem::Reply(r) => (r.board_label.as_deref(), r.body.as_str()),
            NotificationItem::Moment(m) => (None, m.content.as_str()),
        };
        if let Some(board) = board {
            println!("               {board}");
        }
        if !text.is_empty() {
            println!("               {text}");
        }
        println!("               {}", item.href());
    }
}
