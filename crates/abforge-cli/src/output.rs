//! Terminal rendering of reports

use colored::Colorize;

use abforge_agent::{PipelineReport, PreflightReport, StageOutcome};
use abforge_core::CodeModificationResult;

pub fn ok(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn failed(message: &str) {
    println!("{} {}", "✗".red().bold(), message);
}

pub fn warn(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn skipped(message: &str) {
    println!("{} {}", "-".dimmed(), message.dimmed());
}

pub fn heading(title: &str) {
    println!("\n{}", title.bold());
}

pub fn pipeline(report: &PipelineReport) {
    heading(&format!("Experiment {}", report.experiment_key));
    for stage in &report.stages {
        let line = |detail: &str| format!("{}: {}", stage.stage, detail);
        match &stage.outcome {
            StageOutcome::Completed(detail) => ok(&line(detail)),
            StageOutcome::Skipped(detail) => skipped(&line(detail)),
            StageOutcome::Warned(detail) => warn(&line(detail)),
            StageOutcome::Failed(detail) => failed(&line(detail)),
        }
    }
    modifications(&report.modifications);

    if let Some(url) = &report.preview_url {
        println!("  preview:    {}", url.cyan());
    }
    if let Some(id) = &report.experiment_id {
        println!("  experiment: {}", id);
    }
    if let Some(pr) = &report.pull_request {
        println!("  pull:       #{} {}", pr.number, pr.url.cyan());
    }
}

pub fn modifications(results: &[CodeModificationResult]) {
    for result in results {
        let file = result.file.display().to_string();
        if result.success {
            println!("  {} {}", "patched".green(), file);
            for change in &result.changes {
                println!("      {}", change.dimmed());
            }
        } else {
            println!("  {} {}", "failed".red(), file);
            for error in &result.errors {
                println!("      {}", error);
            }
        }
    }
}

pub fn preflight(key: &str, report: &PreflightReport) {
    heading(&format!("Preflight {}", key));
    for check in &report.checks {
        let line = format!("{}: {}", check.name, check.detail);
        if check.passed {
            ok(&line);
        } else {
            failed(&line);
        }
    }
    for warning in &report.warnings {
        warn(warning);
    }
    println!();
    if report.success() {
        ok(&format!(
            "ready to deploy ({} warning(s))",
            report.warnings.len()
        ));
    } else {
        failed(&format!("{} error(s) block deployment", report.errors.len()));
    }
}
