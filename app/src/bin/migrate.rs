//! Migration runner binary
//!
//! Usage:
//!   cargo run --bin migrate           - Run all pending migrations
//!   cargo run --bin migrate rollback  - Rollback the last migration
//!   cargo run --bin migrate status    - Show migration status
//!   cargo run --bin migrate fresh     - Drop all tables and re-run migrations

use console::style;
use ppm::{Config, DatabaseConfig, DbConnection, Migrator};
use sea_orm_migration::prelude::*;
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() {
    Config::init(Path::new("."));
    let config = Config::get::<DatabaseConfig>().unwrap_or_default();

    let conn = match DbConnection::connect(&config).await {
        Ok(conn) => conn,
        Err(e) => fail("Failed to connect to database", e),
    };
    let db = conn.inner();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("up");

    let result = match command {
        "up" | "migrate" => {
            println!("Running migrations...");
            Migrator::up(db, None)
                .await
                .map(|_| println!("Migrations completed successfully!"))
        }
        "down" | "rollback" => {
            let steps: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
            println!("Rolling back {} migration(s)...", steps);
            Migrator::down(db, Some(steps))
                .await
                .map(|_| println!("Rollback completed successfully!"))
        }
        "status" => {
            println!("Migration status:");
            Migrator::status(db).await
        }
        "fresh" => {
            println!(
                "{} Dropping all tables and re-running migrations...",
                style("WARNING:").yellow().bold()
            );
            Migrator::fresh(db)
                .await
                .map(|_| println!("Database refreshed successfully!"))
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Usage: migrate [up|rollback|status|fresh]");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        fail("Migration failed", e);
    }
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{} {}: {}", style("Error:").red().bold(), context, error);
    std::process::exit(1);
}
