use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use present_box::clock::{request_time_from_header, FixedClock, RequestClock, SystemClock};
use present_box::grant::SqliteItemGranter;
use present_box::model::{CampaignMaster, ItemType};
use present_box::viewer::SqliteViewerVerifier;
use present_box::{config, db};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Request time as Unix seconds (defaults to now)
    #[arg(long, global = true, conflicts_with = "date")]
    at: Option<i64>,

    /// Request time as an RFC 2822 date, as sent in the request header
    #[arg(long, global = true)]
    date: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print an example config file
    InitConfig,
    /// Apply database migrations
    Migrate,
    /// Create a user and bind a viewer (device) to it
    AddUser {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        viewer: String,
    },
    /// Register an item master
    AddItem {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        item_type: i64,
        #[arg(long)]
        name: String,
    },
    /// Register a present-all campaign
    SeedCampaign {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
        #[arg(long)]
        item_type: i64,
        #[arg(long)]
        item_id: i64,
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value = "")]
        message: String,
    },
    /// Materialize active campaigns into the user's present box
    Distribute {
        #[arg(long)]
        user: i64,
    },
    /// List a page of pending presents
    List {
        #[arg(long)]
        user: i64,
        /// 1-based page number
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
        /// Skip the campaign distribution that normally precedes listing
        #[arg(long)]
        no_distribute: bool,
    },
    /// Receive presents
    Claim {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        viewer: String,
        #[arg(long = "id", required = true)]
        ids: Vec<i64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_item_type(code: i64) -> Result<ItemType> {
    ItemType::from_code(code).with_context(|| format!("unknown item type {code}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::InitConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let request_at = match (args.at, args.date.as_deref()) {
        (Some(at), _) => FixedClock(at).request_time()?,
        (None, Some(date)) => request_time_from_header(Some(date))?,
        (None, None) => SystemClock.request_time()?,
    };

    match args.command {
        Command::InitConfig => {}
        Command::Migrate => info!("migrations applied"),
        Command::AddUser { user, viewer } => {
            db::create_user(&pool, user, request_at).await?;
            db::register_device(&pool, user, &viewer, request_at).await?;
            info!(user, "user created");
        }
        Command::AddItem {
            id,
            item_type,
            name,
        } => {
            db::insert_item_master(&pool, id, parse_item_type(item_type)?, &name).await?;
        }
        Command::SeedCampaign {
            id,
            start,
            end,
            item_type,
            item_id,
            amount,
            message,
        } => {
            let campaign = CampaignMaster {
                id,
                registered_start_at: start,
                registered_end_at: end,
                item_type: parse_item_type(item_type)?,
                item_id,
                amount,
                present_message: message,
            };
            db::insert_campaign(&pool, &campaign, request_at).await?;
        }
        Command::Distribute { user } => {
            let presents = present_box::distribute(&pool, user, request_at).await?;
            print_json(&presents)?;
        }
        Command::List {
            user,
            page,
            no_distribute,
        } => {
            if !no_distribute && page >= 1 {
                present_box::distribute(&pool, user, request_at).await?;
            }
            let page = present_box::list(&pool, user, page, cfg.present.page_size).await?;
            print_json(&page)?;
        }
        Command::Claim { user, viewer, ids } => {
            let viewers = SqliteViewerVerifier::new(pool.clone());
            let outcome = present_box::claim(
                &pool,
                &viewers,
                &SqliteItemGranter,
                user,
                &viewer,
                &ids,
                request_at,
            )
            .await?;
            print_json(&outcome)?;
        }
    }

    pool.close().await;
    Ok(())
}
