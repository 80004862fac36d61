//! Table rendering for command results

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use gxw_warehouse::correlation::CorrelationSummary;
use gxw_warehouse::load::types::{BatchResult, FailurePoint, RunSummary, StudyReport};
use gxw_warehouse::report::{RunReport, WarehouseCounts};
use gxw_warehouse::runs::RunRecord;

const STUDY_HEADER: [&str; 9] = [
    "Study",
    "State",
    "Batches",
    "Skipped",
    "Written",
    "Deduplicated",
    "Rejected",
    "Malformed",
    "Failure",
];

pub fn new_table<T: ToString>(header: impl IntoIterator<Item = T>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header.into_iter().map(|h| h.to_string()).collect::<Vec<_>>());
    table
}

pub fn describe_failure(failure: &FailurePoint) -> String {
    match (failure.table, failure.batch_index) {
        (Some(table), Some(batch)) => {
            let last = failure
                .last_committed_batch
                .map_or_else(|| "none".to_string(), |b| b.to_string());
            format!("{table} batch {batch} (last committed {last}): {}", failure.error)
        }
        (Some(table), None) => format!("{table}: {}", failure.error),
        _ => failure.error.clone(),
    }
}

fn study_row(study: &str, state: String, totals: &BatchResult, failure: String) -> Vec<String> {
    vec![
        study.to_string(),
        state,
        totals.committed_batches.to_string(),
        totals.skipped_batches.to_string(),
        totals.rows_written.to_string(),
        totals.rows_deduplicated.to_string(),
        totals.rows_rejected.to_string(),
        totals.rows_malformed.to_string(),
        failure,
    ]
}

fn report_row(report: &StudyReport) -> Vec<String> {
    let state = if report.resumed {
        format!("{} (resumed)", report.state)
    } else {
        report.state.to_string()
    };
    let failure = report.failure.as_ref().map(describe_failure).unwrap_or_default();
    study_row(&report.study_id, state, &report.totals, failure)
}

pub fn run_summary_table(summary: &RunSummary) -> Table {
    let mut table = new_table(STUDY_HEADER);
    for report in &summary.studies {
        table.add_row(report_row(report));
    }
    for study in &summary.skipped_studies {
        table.add_row(study_row(
            study,
            "completed earlier".to_string(),
            &BatchResult::default(),
            String::new(),
        ));
    }
    table.add_row(study_row(
        "total",
        format!("{} elapsed ms", summary.elapsed_ms),
        &summary.totals,
        String::new(),
    ));
    table
}

pub fn run_report_tables(report: &RunReport) -> Vec<Table> {
    let mut run = new_table(["Run", "Status", "Started", "Finished", "Config hash"]);
    run.add_row(vec![
        report.run.run_id.clone(),
        report.run.status.to_string(),
        report.run.started_at.clone(),
        report.run.finished_at.clone().unwrap_or_default(),
        report.run.config_hash.clone(),
    ]);

    let mut studies = new_table(STUDY_HEADER);
    for record in &report.studies {
        match &record.report {
            Some(study) => studies.add_row(report_row(study)),
            None => studies.add_row(study_row(
                &record.study_id,
                record.status.clone(),
                &BatchResult::default(),
                record.error.clone().unwrap_or_default(),
            )),
        };
    }
    studies.add_row(study_row(
        "total",
        format!("{} completed, {} failed", report.completed_studies(), report.failed_studies()),
        &report.totals,
        String::new(),
    ));

    let mut tables = vec![run, studies];
    if !report.checkpoints.is_empty() {
        let mut checkpoints = new_table(["Study", "Table", "Batches", "Last batch"]);
        for checkpoint in &report.checkpoints {
            checkpoints.add_row(vec![
                checkpoint.study_id.clone(),
                checkpoint.table.to_string(),
                checkpoint.batches.to_string(),
                checkpoint.last_batch.to_string(),
            ]);
        }
        tables.push(checkpoints);
    }
    tables
}

pub fn runs_table(runs: &[RunRecord]) -> Table {
    let mut table = new_table(["Run", "Status", "Started", "Finished"]);
    for run in runs {
        table.add_row(vec![
            run.run_id.clone(),
            run.status.to_string(),
            run.started_at.clone(),
            run.finished_at.clone().unwrap_or_default(),
        ]);
    }
    table
}

pub fn counts_table(counts: &WarehouseCounts) -> Table {
    let mut table = new_table(["Table", "Rows"]);
    for count in &counts.tables {
        table.add_row(vec![count.table.to_string(), count.rows.to_string()]);
    }
    table
}

pub fn correlation_table(summary: &CorrelationSummary) -> Table {
    let mut table = new_table([
        "Study",
        "Genes",
        "Samples",
        "Illnesses",
        "Pairs",
        "Replaced",
        "Elapsed ms",
        "Status",
    ]);
    for study in &summary.studies {
        table.add_row(vec![
            study.study_id.clone(),
            study.genes.to_string(),
            study.samples.to_string(),
            study.illnesses.to_string(),
            study.correlations_written.to_string(),
            study.correlations_replaced.to_string(),
            study.elapsed_ms.to_string(),
            "refreshed".to_string(),
        ]);
    }
    let unfinished = summary
        .failures
        .iter()
        .map(|f| (f.study_id.clone(), format!("failed: {}", f.error)))
        .chain(summary.not_started.iter().map(|id| (id.clone(), "not started".to_string())));
    for (study, status) in unfinished {
        let mut row = vec![study];
        row.extend(std::iter::repeat(String::new()).take(6));
        row.push(status);
        table.add_row(row);
    }
    table
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gxw_common::types::TableId;
    use gxw_warehouse::correlation::{CorrelationFailure, StudyCorrelation};
    use gxw_warehouse::load::types::StudyState;

    fn failed_report() -> StudyReport {
        StudyReport {
            study_id: "GSE2".into(),
            state: StudyState::Failed,
            resumed: true,
            tables: Vec::new(),
            totals: BatchResult::default(),
            elapsed_ms: 12,
            failure: Some(FailurePoint {
                table: Some(TableId::Gene),
                batch_index: Some(3),
                last_committed_batch: Some(2),
                error: "Connection lost: reset".into(),
            }),
        }
    }

    #[test]
    fn test_describe_failure() {
        let report = failed_report();
        let text = describe_failure(report.failure.as_ref().unwrap());
        assert_eq!(text, "dim_gene batch 3 (last committed 2): Connection lost: reset");

        let early = FailurePoint {
            table: None,
            batch_index: None,
            last_committed_batch: None,
            error: "unreadable".into(),
        };
        assert_eq!(describe_failure(&early), "unreadable");
    }

    #[test]
    fn test_summary_table_lists_every_study() {
        let summary = RunSummary::new("run-1", vec![failed_report()], vec!["GSE1".into()], 40);
        let rendered = run_summary_table(&summary).to_string();
        assert!(rendered.contains("GSE1"));
        assert!(rendered.contains("completed earlier"));
        assert!(rendered.contains("failed (resumed)"));
        assert!(rendered.contains("total"));
    }

    #[test]
    fn test_correlation_table_shows_unfinished_studies() {
        let summary = CorrelationSummary {
            studies: vec![StudyCorrelation {
                study_id: "GSE1".into(),
                genes: 4,
                correlations_written: 12,
                ..Default::default()
            }],
            failures: vec![CorrelationFailure {
                study_id: "GSE2".into(),
                error: "Connection lost: reset".into(),
            }],
            not_started: vec!["GSE3".into()],
            ..Default::default()
        };
        let rendered = correlation_table(&summary).to_string();
        assert!(rendered.contains("refreshed"));
        assert!(rendered.contains("failed: Connection lost: reset"));
        assert!(rendered.contains("not started"));
    }
}
