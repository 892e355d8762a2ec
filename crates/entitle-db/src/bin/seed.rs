//! # Seed Data Generator
//!
//! Populates a development database with rules and orders.
//!
//! ## Usage
//! ```bash
//! # 5 courses, 50 buyers (default)
//! cargo run -p entitle-db --bin seed
//!
//! # Custom amounts
//! cargo run -p entitle-db --bin seed -- --courses 10 --buyers 500
//!
//! # Specify database path
//! cargo run -p entitle-db --bin seed -- --db ./data/entitle.db
//! ```
//!
//! ## Generated Data
//! - One rule per course (`C001` → `AI_<hex>`), limits cycling through 3, 5, 10
//! - One purchase per buyer, spread over the last 24 hours
//! - Every tenth buyer also refunds, an hour after buying

use chrono::{Duration, Utc};
use entitle_core::{EntitlementRule, Order, DEFAULT_VALIDITY_DAYS};
use entitle_db::{Database, DbConfig};
use std::env;

const DAILY_LIMITS: &[i64] = &[3, 5, 10];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut courses: usize = 5;
    let mut buyers: usize = 50;
    let mut db_path = String::from("./entitle_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--courses" | "-c" => {
                if i + 1 < args.len() {
                    courses = args[i + 1].parse().unwrap_or(5);
                    i += 1;
                }
            }
            "--buyers" | "-b" => {
                if i + 1 < args.len() {
                    buyers = args[i + 1].parse().unwrap_or(50);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Entitlement Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --courses <N>  Number of courses/rules (default: 5)");
                println!("  -b, --buyers <N>   Number of buyers (default: 50)");
                println!("  -d, --db <PATH>    Database file path (default: ./entitle_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let courses = courses.max(1);

    println!("🌱 Entitlement Seed Data Generator");
    println!("==================================");
    println!("Database: {}", db_path);
    println!("Courses:  {}", courses);
    println!("Buyers:   {}", buyers);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.rules().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} rules", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();
    let start = std::time::Instant::now();

    let mut course_ids = Vec::with_capacity(courses);
    for idx in 0..courses {
        let course_id = format!("C{:03}", idx + 1);
        let product_id = format!("AI_{:08x}", 0x5eed_0000_u32 + idx as u32);
        let rule = EntitlementRule::new(
            course_id.clone(),
            product_id,
            DAILY_LIMITS[idx % DAILY_LIMITS.len()],
            DEFAULT_VALIDITY_DAYS,
            now - Duration::days(60),
        )?;
        db.rules().insert(&rule).await?;
        course_ids.push(course_id);
    }
    println!("✓ Inserted {} rules", courses);

    let mut refunds = 0;
    for idx in 0..buyers {
        let phone = format!("138{:08}", idx);
        let course_id = &course_ids[idx % course_ids.len()];
        let bought_at = now - Duration::minutes(((idx * 1440) / buyers.max(1)) as i64 + 1);

        db.orders()
            .insert(&Order {
                order_id: format!("ORD{:06}", idx),
                phone: phone.clone(),
                course_id: course_id.clone(),
                purchase_time: bought_at,
                is_refund: false,
                created_at: bought_at,
                is_deleted: false,
            })
            .await?;

        if idx % 10 == 9 {
            let refunded_at = (bought_at + Duration::hours(1)).min(now);
            db.orders()
                .insert(&Order {
                    order_id: format!("REF{:06}", idx),
                    phone,
                    course_id: course_id.clone(),
                    purchase_time: bought_at,
                    is_refund: true,
                    created_at: refunded_at,
                    is_deleted: false,
                })
                .await?;
            refunds += 1;
        }
    }

    let elapsed = start.elapsed();

    println!("✓ Inserted {} purchases, {} refunds", buyers, refunds);
    println!();
    println!("==================================");
    println!("✅ Seed complete in {:.2}s", elapsed.as_secs_f64());

    db.close().await;

    Ok(())
}
