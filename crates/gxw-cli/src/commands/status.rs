//! `gxw status` command implementation
//!
//! Shows recent runs and the row count of every warehouse table.

use crate::commands::connect;
use crate::config::GxwConfig;
use crate::error::Result;
use crate::output::{counts_table, runs_table};
use gxw_warehouse::report::WarehouseCounts;
use gxw_warehouse::runs::RunStore;

pub async fn run(config: &GxwConfig, limit: usize) -> Result<()> {
    let pool = connect(config).await?;
    let runs = RunStore::new(pool.clone()).list(limit).await?;
    let counts = WarehouseCounts::load(&pool).await?;

    if runs.is_empty() {
        println!("No runs recorded.");
        println!("Run 'gxw run' to load studies.");
    } else {
        println!("Recent runs:");
        println!("{}", runs_table(&runs));
    }
    println!();
    println!("Warehouse:");
    println!("{}", counts_table(&counts));
    Ok(())
}
