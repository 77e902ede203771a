use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use larder_api::{
    config,
    db,
    entities::user::UserRole,
    errors::ServiceError,
    events::{self, EventSender},
    services::{
        commerce::product_catalog_service::{CreateProductInput, ProductView, VariantInput},
        users::UserView,
    },
    AppState,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "larder", about = "Operator tasks for the Larder storefront", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Create an admin account, or promote an existing one
    CreateAdmin {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Insert catalog products; skips slugs that already exist
    Seed {
        /// JSON array of products; built-in demo catalog when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    if let Commands::Migrate = cli.command {
        db::run_migrations(&pool).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
    tokio::spawn(events::process_events(rx));
    let state = AppState::build(Arc::new(pool), cfg, Arc::new(EventSender::new(tx)))?;

    match cli.command {
        Commands::Migrate => {}
        Commands::CreateAdmin {
            name,
            email,
            password,
        } => {
            let admin = create_admin(&state, &name, &email, &password).await?;
            if cli.json {
                print_json(&admin)?;
            } else {
                println!("Admin {} ready (id {})", admin.email, admin.id);
            }
        }
        Commands::Seed { file } => {
            let products = match file {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_str::<Vec<CreateProductInput>>(&raw)
                        .with_context(|| format!("{} is not a product list", path.display()))?
                }
                None => demo_catalog(),
            };
            let created = seed(&state, products).await?;
            if cli.json {
                print_json(&created)?;
            } else {
                println!("Seeded {} product(s)", created.len());
                for product in &created {
                    println!("  {} ({})", product.name, product.slug);
                }
            }
        }
    }

    Ok(())
}

async fn create_admin(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
) -> Result<UserView> {
    let users = &state.services.users;
    if let Some(existing) = users.find_by_email(email).await? {
        info!(user_id = %existing.id, "promoting existing account");
        return Ok(users.set_role(existing.id, UserRole::Admin).await?);
    }
    let user = users
        .create_user(name, email, password, UserRole::Admin)
        .await?;
    Ok(user.into())
}

async fn seed(state: &AppState, products: Vec<CreateProductInput>) -> Result<Vec<ProductView>> {
    let catalog = &state.services.catalog;
    let mut created = Vec::with_capacity(products.len());
    for input in products {
        match catalog.create_product(input).await {
            Ok(view) => created.push(view),
            Err(ServiceError::Conflict(msg)) => debug!("skipping: {}", msg),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

fn demo_catalog() -> Vec<CreateProductInput> {
    fn variant(label: &str, price: i64, quantity: i32) -> VariantInput {
        VariantInput {
            label: label.to_string(),
            price: Decimal::from(price),
            quantity,
        }
    }

    vec![
        CreateProductInput {
            name: "Toor Dal".into(),
            sku: "DAL-TOOR".into(),
            slug: None,
            description: Some("Unpolished split pigeon peas".into()),
            category: "pulses".into(),
            brand: None,
            tags: vec!["dal".into(), "protein".into()],
            image_url: None,
            is_featured: true,
            variants: vec![variant("500g", 120, 80), variant("1kg", 230, 40)],
        },
        CreateProductInput {
            name: "Basmati Rice".into(),
            sku: "RICE-BASMATI".into(),
            slug: None,
            description: Some("Aged long-grain rice".into()),
            category: "grains".into(),
            brand: Some("Larder Select".into()),
            tags: vec!["rice".into()],
            image_url: None,
            is_featured: true,
            variants: vec![variant("1kg", 180, 60), variant("5kg", 850, 12)],
        },
        CreateProductInput {
            name: "Cold Pressed Groundnut Oil".into(),
            sku: "OIL-GROUNDNUT".into(),
            slug: None,
            description: None,
            category: "oils".into(),
            brand: None,
            tags: vec!["oil".into(), "cold-pressed".into()],
            image_url: None,
            is_featured: false,
            variants: vec![variant("1L", 320, 15)],
        },
    ]
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
