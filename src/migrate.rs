//! `mdash init`: create the database and the base table of every active
//! plan source, without contacting the remote API.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;
use crate::db;
use crate::import::prepare_table;
use crate::plan::ImportPlan;

pub async fn run_init(config: &Config, cli_plan: Option<PathBuf>) -> Result<()> {
    let pool = db::connect(config).await?;
    println!("init");
    println!("  database: {}", config.db.path.display());

    match cli_plan.or_else(|| config.import.plan.clone()) {
        Some(path) => {
            let plan = ImportPlan::load(&path)?;
            let mut tx = pool.begin().await?;
            for spec in plan.active() {
                prepare_table(&mut tx, spec).await?;
                println!("  table {} ready (time column {})", spec.table, spec.tempo_col);
            }
            tx.commit().await?;
        }
        None => {
            tracing::info!("no import plan configured, only the database was created");
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
