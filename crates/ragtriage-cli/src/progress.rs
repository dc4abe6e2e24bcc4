//! Indicatif-based progress display for the triage command.
//!
//! Receives triage events over the broadcast channel and renders a single
//! bar for the judge stage. Everything goes to stderr so stdout stays
//! machine-readable.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use ragtriage_core::TriageEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

const MICRODOLLARS_PER_USD: f64 = 1_000_000.0;

pub struct ProgressDisplay {
    bar: Mutex<Option<ProgressBar>>,
    judged: AtomicU64,
    not_analyzed: AtomicU64,
    cost_micros: AtomicU64,
    start_time: Instant,
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            judged: AtomicU64::new(0),
            not_analyzed: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Process events until the run completes or the channel closes.
    pub async fn run(self, mut rx: broadcast::Receiver<TriageEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        match self.bar.lock().as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn update_message(&self) {
        let Some(bar) = self.bar.lock().clone() else {
            return;
        };
        let cost = self.cost_micros.load(Ordering::Relaxed) as f64 / MICRODOLLARS_PER_USD;
        bar.set_message(format!(
            "{} {} {} {} {}",
            style("✓").green(),
            style(self.judged.load(Ordering::Relaxed)).green().bold(),
            style("✗").red(),
            style(self.not_analyzed.load(Ordering::Relaxed)).red().bold(),
            style(format!("${cost:.4}")).cyan(),
        ));
    }

    fn advance(&self) {
        if let Some(bar) = self.bar.lock().as_ref() {
            bar.inc(1);
        }
        self.update_message();
    }

    /// Returns true once the run is complete.
    fn handle_event(&self, event: TriageEvent) -> bool {
        match event {
            TriageEvent::TriageStarted {
                evaluation_id,
                total_failed,
            } => {
                eprintln!(
                    "{} Triaging {} ({total_failed} failed cases)",
                    style("→").cyan().bold(),
                    style(&evaluation_id).bold(),
                );
            }

            TriageEvent::HeuristicsCompleted {
                trivial_failures,
                retrieval_failures,
                ambiguous_cases,
            } => {
                eprintln!(
                    "  heuristics: {trivial_failures} trivial, {retrieval_failures} retrieval, {ambiguous_cases} ambiguous"
                );
            }

            TriageEvent::SamplingCompleted {
                ambiguous_cases,
                sampled,
            } => {
                eprintln!("  sampling: {sampled} of {ambiguous_cases} ambiguous cases sent to the judge");
                if sampled > 0 {
                    let bar_style = ProgressStyle::with_template(
                        "{spinner:.green} judge [{bar:30.cyan/blue}] {pos}/{len} {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓▒░  ");
                    let bar = ProgressBar::new(sampled);
                    bar.set_style(bar_style);
                    bar.enable_steady_tick(std::time::Duration::from_millis(100));
                    *self.bar.lock() = Some(bar);
                    self.update_message();
                }
            }

            TriageEvent::CaseJudged { cost_usd, .. } => {
                self.judged.fetch_add(1, Ordering::Relaxed);
                let micros = (cost_usd.max(0.0) * MICRODOLLARS_PER_USD).round() as u64;
                self.cost_micros.fetch_add(micros, Ordering::Relaxed);
                self.advance();
            }

            TriageEvent::CaseNotAnalyzed { case_id, reason } => {
                self.not_analyzed.fetch_add(1, Ordering::Relaxed);
                if reason != "cancelled" {
                    self.println(format!(
                        "{} {case_id}: {reason}",
                        style("✗").red().bold()
                    ));
                }
                self.advance();
            }

            TriageEvent::BudgetAlert { alert } => {
                self.println(format!("{} {}", style("⚠").yellow().bold(), alert.message));
            }

            TriageEvent::TriageCompleted { cancelled, .. } => {
                if let Some(bar) = self.bar.lock().take() {
                    bar.finish_and_clear();
                }
                let status = if cancelled {
                    style("CANCELLED").red().bold()
                } else {
                    style("COMPLETED").green().bold()
                };
                eprintln!(
                    "{} Triage {status} in {:.1}s",
                    style("✓").green().bold(),
                    self.start_time.elapsed().as_secs_f64()
                );
                return true;
            }
        }
        false
    }
}
