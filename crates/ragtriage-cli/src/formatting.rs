//! Plain-text output for the score, compare and triage commands.

use ragtriage_core::cost::{BudgetStatus, CostAlert, CostSummary};
use ragtriage_core::report::ScoreReport;
use ragtriage_core::trend::{MetricDelta, TrendReport};
use ragtriage_core::types::DiagnosisSummary;

// Score command

pub fn print_score_report(evaluation_id: &str, report: &ScoreReport) {
    println!(
        "Evaluation {evaluation_id}: {:.1}/100 {}",
        report.overall, report.grade.label
    );
    println!("{}", report.grade.description);
    println!(
        "Reliability: {:?} ({})",
        report.reliability.level, report.reliability.message
    );
    println!("Evaluated metrics: {}", report.evaluated_metrics);

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &report.warnings {
            println!("  - {}", w.message);
        }
    }

    println!();
    println!("Recommendation: {}", report.grade.recommendation);
}

// Compare command

fn format_delta(d: &MetricDelta) -> String {
    format!(
        "{:<24} {:>7.3} -> {:>7.3} {:>+8.3} {:>+8.1}%",
        d.metric_id, d.previous, d.current, d.delta, d.percent_change
    )
}

pub fn print_trend_report(evaluation_id: &str, report: Option<&TrendReport>) {
    let Some(report) = report else {
        println!("No earlier evaluation to compare {evaluation_id} with.");
        return;
    };

    println!(
        "Evaluation {evaluation_id} vs {}: {:+.1} points ({:?})",
        report.previous_id, report.score_delta, report.trend
    );
    if report.per_metric_delta.is_empty() {
        println!("No metrics in common.");
        return;
    }

    println!();
    println!(
        "{:<24} {:>7}    {:>7} {:>8} {:>9}",
        "metric", "before", "after", "delta", "change"
    );
    for d in &report.per_metric_delta {
        println!("{}", format_delta(d));
    }

    if let Some(d) = &report.top_improvement {
        println!();
        println!("Top improvement: {} ({:+.3})", d.metric_id, d.delta);
    }
    if let Some(d) = &report.top_regression {
        println!("Top regression:  {} ({:+.3})", d.metric_id, d.delta);
    }
}

// Triage command

pub fn print_diagnosis_summary(summary: &DiagnosisSummary) {
    println!("Failed cases: {}", summary.total_failed);
    println!(
        "  heuristic:    {} ({} trivial, {} retrieval)",
        summary.heuristic_classified,
        summary.breakdown.trivial_failures,
        summary.breakdown.retrieval_failures
    );
    println!("  llm judge:    {}", summary.llm_judge_analyzed);
    println!("  not analyzed: {}", summary.not_analyzed);
    println!(
        "Diagnosis cost: ${:.4} ({:.1}% of cases needed no judge call)",
        summary.diagnosis_cost,
        summary.cost_savings_percent()
    );
}

pub fn print_cost_summary(summary: &CostSummary) {
    if summary.entry_count == 0 {
        return;
    }
    println!();
    println!(
        "Cost: ${:.4} over {} call(s)",
        summary.total_cost, summary.entry_count
    );
    for share in &summary.by_provider_model {
        println!(
            "  {:<32} ${:>9.4} {:>6.1}%",
            share.key, share.cost, share.percentage_of_total
        );
    }
    if !summary.by_metric.is_empty() {
        println!("By metric:");
        for share in &summary.by_metric {
            println!(
                "  {:<32} ${:>9.4} {:>6.1}%",
                share.key, share.cost, share.percentage_of_total
            );
        }
    }
}

pub fn print_budgets(budgets: &[BudgetStatus], alerts: &[CostAlert]) {
    if budgets.is_empty() {
        return;
    }
    println!();
    println!("Budgets:");
    for status in budgets {
        let blocked = if status.blocked { " BLOCKED" } else { "" };
        println!(
            "  {:<20} ${:.4} / ${:.2} ({:.1}%){blocked}",
            status.budget.id, status.budget.current_usage, status.budget.limit, status.percentage_used
        );
    }
    for alert in alerts {
        println!("  [{:?}] {}", alert.severity, alert.message);
    }
}
