//! # Seed Data Generator
//!
//! Populates the database with a demo catalog and promotions for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./vend_dev.db
//! cargo run -p vend-db --bin seed
//!
//! # Specify database path
//! cargo run -p vend-db --bin seed -- --db ./data/vend.db
//! ```
//!
//! ## Generated Data
//! - One product per (style, size) with attribute ids for brand, category,
//!   size and colour
//! - Three promotions: a multi-buy running for 30 days, a single-unit markdown
//!   running for 7 days, and an expired one (useful for checking the index)

use chrono::{Duration, Utc};
use serde_json::json;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vend_core::{Money, NewPromotion, Product};
use vend_db::{Database, DbConfig};

/// (sku prefix, name, base price cents, brand id, category id, colour id)
const STYLES: &[(&str, &str, i64, i64, i64, i64)] = &[
    ("SHIRT-LIN", "Linen Shirt", 1200, 1, 1, 1),
    ("SHIRT-OXF", "Oxford Shirt", 1500, 1, 1, 2),
    ("TEE-CRW", "Crew Tee", 600, 2, 2, 3),
    ("TEE-VNK", "V-Neck Tee", 650, 2, 2, 1),
    ("CHINO-SLM", "Slim Chino", 2800, 3, 3, 4),
    ("SOCK-ANK", "Ankle Socks", 300, 4, 4, 3),
];

/// (size label, size id)
const SIZES: &[(&str, i64)] = &[("S", 1), ("M", 2), ("L", 3), ("XL", 4)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vend=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./vend_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Vend Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./vend_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(path = %db_path, "Seeding database");
    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        return Ok(());
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------
    let mut shirts = Vec::new();
    let mut socks = Vec::new();
    let mut inserted = 0usize;

    for &(prefix, name, price_cents, brand_id, category_id, colour_id) in STYLES {
        for &(size, size_id) in SIZES {
            let product = Product {
                sku: Some(format!("{prefix}-{size}")),
                brand_id: Some(brand_id),
                category_id: Some(category_id),
                size_id: Some(size_id),
                colour_id: Some(colour_id),
                ..Product::new(0, format!("{name} {size}"), Money::from_cents(price_cents))
            };

            let stored = match db.products().insert(&product).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(name = %product.name, error = %e, "Failed to insert product");
                    continue;
                }
            };
            inserted += 1;

            if prefix.starts_with("SHIRT") {
                shirts.push(stored.id);
            } else if prefix.starts_with("SOCK") {
                socks.push(stored.id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Promotions
    // -------------------------------------------------------------------------
    let now = Utc::now();
    let promotions = db.promotions();

    let multi_buy = promotions
        .insert(&NewPromotion {
            name: "Shirts: 3 or more at $9.00".to_string(),
            quantity: 3,
            promotion_price_cents: 900,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(30),
            active: true,
        })
        .await?;

    let markdown = promotions
        .insert(&NewPromotion {
            name: "Socks markdown".to_string(),
            quantity: 1,
            promotion_price_cents: 250,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(7),
            active: true,
        })
        .await?;

    let expired = promotions
        .insert(&NewPromotion {
            name: "Last season clearance".to_string(),
            quantity: 1,
            promotion_price_cents: 500,
            starts_at: now - Duration::days(60),
            ends_at: now - Duration::days(30),
            active: true,
        })
        .await?;

    for &product_id in &shirts {
        promotions.insert_association(product_id, multi_buy.id).await?;
        promotions.insert_association(product_id, expired.id).await?;
    }
    for &product_id in &socks {
        promotions.insert_association(product_id, markdown.id).await?;
    }

    let summary = json!({
        "database": db_path,
        "products": inserted,
        "promotions": [multi_buy.name, markdown.name, expired.name],
        "associations": promotions.associations().await?.len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    db.close().await;
    Ok(())
}
