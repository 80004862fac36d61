//! `gxw report` command implementation

use crate::commands::{connect, print_json};
use crate::config::GxwConfig;
use crate::error::Result;
use crate::output::run_report_tables;
use gxw_warehouse::report::RunReport;

pub async fn run(config: &GxwConfig, run_id: &str, json: bool) -> Result<()> {
    let pool = connect(config).await?;
    let report = RunReport::load(&pool, run_id).await?;

    if json {
        return print_json(&report);
    }
    for table in run_report_tables(&report) {
        println!("{table}");
    }
    Ok(())
}
