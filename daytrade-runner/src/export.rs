//! Reporting and export: JSON report, per-policy trajectory CSV and a
//! Markdown summary.
//!
//! The JSON report carries a `schema_version`; newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use daytrade_core::{Panel, Trajectory};

use crate::compare::{ComparisonReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &ComparisonReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize ComparisonReport to JSON")
}

/// Deserialize a report, rejecting unknown schema versions.
///
/// Trajectories are not part of the JSON and come back empty.
pub fn import_json(json: &str) -> Result<ComparisonReport> {
    let report: ComparisonReport =
        serde_json::from_str(json).context("failed to deserialize ComparisonReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// One row per simulated day: the day's date, the value after holding the
/// pick through that day, and the pick.
pub fn export_trajectory_csv(trajectory: &Trajectory, panel: &Panel) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "value", "pick"])?;

    for (k, pick) in trajectory.picks.iter().enumerate() {
        let day = trajectory.start + k;
        let Some(date) = panel.dates().get(day) else {
            bail!("trajectory day {day} is outside a panel of {} rows", panel.height());
        };
        let value = trajectory.values.get(k + 1).copied().unwrap_or(f64::NAN);
        wtr.write_record([&date.to_string(), &format!("{value:.6}"), pick])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the artifact set of one comparison run.
///
/// Creates `{output_dir}/{run_id[..12]}_{timestamp}/` containing
/// `report.json`, `report.md` and one `{policy}.csv` trajectory per policy.
/// Returns the created directory.
pub fn save_artifacts(report: &ComparisonReport, panel: &Panel, output_dir: &Path) -> Result<PathBuf> {
    let short_id: String = report.run_id.chars().take(12).collect();
    let dirname = format!(
        "{}_{}",
        short_id,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("report.json"), export_json(report)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(report))?;

    for outcome in &report.policies {
        let csv = export_trajectory_csv(&outcome.trajectory, panel)
            .with_context(|| format!("failed to export trajectory of {}", outcome.name))?;
        std::fs::write(run_dir.join(format!("{}.csv", outcome.name)), csv)?;
    }

    Ok(run_dir)
}

/// Load a report from an artifact directory's report.json.
pub fn load_report(dir: &Path) -> Result<ComparisonReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

pub fn generate_report(report: &ComparisonReport) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Policy Comparison\n\n");

    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run | {} |\n", report.run_id));
    md.push_str(&format!(
        "| Period | {} to {} (rows {}..={}) |\n",
        report.start_date, report.end_date, report.start, report.end
    ));
    md.push_str(&format!("| Tickers | {} |\n", report.tickers.len()));
    md.push_str(&format!("| Initial Value | {} |\n", report.initial_value));
    md.push('\n');

    md.push_str("## Policies\n\n");
    md.push_str("| Policy | Final | Percentile | Total Return | CAGR | Sharpe | Max DD | Hit Rate | Welch p |\n");
    md.push_str("| --- | --- | --- | --- | --- | --- | --- | --- | --- |\n");
    for p in &report.policies {
        let m = &p.metrics;
        md.push_str(&format!(
            "| {} | {:.4} | {} | {} | {} | {:.3} | {} | {} | {} |\n",
            p.name,
            p.final_value,
            p.percentile.map_or("-".into(), |v| format!("{v:.1}")),
            pct(m.total_return),
            pct(m.annualized_return),
            m.sharpe,
            pct(m.max_drawdown),
            m.hit_rate.map_or("-".into(), pct),
            p.vs_index
                .welch_t
                .map_or("-".into(), |t| format!("{:.4}", t.p_value)),
        ));
    }
    md.push('\n');

    let r = &report.random;
    md.push_str(&format!("## Random Baseline ({} trials, seed {})\n\n", r.trials, r.seed));
    md.push_str("| Mean | Std | P10 | Median | P90 |\n");
    md.push_str("| --- | --- | --- | --- | --- |\n");
    md.push_str(&format!(
        "| {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
        r.mean, r.std, r.p10, r.median, r.p90
    ));

    md
}

fn pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}
