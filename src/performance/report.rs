//! Report Generation
//!
//! Fixed-width plain-text renderings for console and CI logs. Output is a
//! pure function of the input so reports can be diffed between runs.

use super::capacity::{CapacityReport, LoadSnapshot};
use super::load::{DriverKind, LoadTestResult};
use super::memory::format_bytes;
use super::regression::RegressionResult;

/// Visual flag only; the regression detector is the actual gate
const P95_WARN_MS: f64 = 500.0;
const P99_WARN_MS: f64 = 1000.0;

const RULE: &str = "========================================";

fn flag(value: f64, limit: f64) -> &'static str {
    if value > limit {
        " ⚠"
    } else {
        ""
    }
}

/// `~` for estimated fields, a space otherwise so columns stay aligned
fn marker(result: &LoadTestResult, field: &str) -> char {
    if result.is_approximated(field) || result.is_approximated("responseTime") {
        '~'
    } else {
        ' '
    }
}

pub fn generate_load_test_report(result: &LoadTestResult) -> String {
    let rt = &result.response_time;
    let mut out = String::new();

    out.push_str(&format!(
        "{RULE}\n\
         LOAD TEST REPORT: {}\n\
         {RULE}\n\
         Driver:       {}\n\
         Timestamp:    {}\n\
         Concurrency:  {}\n\
         Duration:     {:.1}s\n\n",
        result.scenario,
        match result.driver {
            DriverKind::Http => "http",
            DriverKind::VirtualUser => "virtual_user",
        },
        result.timestamp.to_rfc3339(),
        result.concurrency,
        result.duration,
    ));

    out.push_str(&format!(
        "REQUESTS:\n\
         - Total:        {:>10}\n\
         - Successful:   {:>10}\n\
         - Failed:       {:>10}\n\
         - Error rate:   {:>9.2}%\n\
         - Throughput:   {:>10.2} req/s\n\n",
        result.total_requests,
        result.successful_requests,
        result.failed_requests,
        result.error_rate,
        result.throughput,
    ));

    out.push_str("RESPONSE TIME (ms):\n");
    let rows = [
        ("min", rt.min, ""),
        ("mean", rt.mean, ""),
        ("p50", rt.p50, ""),
        ("p75", rt.p75, ""),
        ("p90", rt.p90, ""),
        ("p95", rt.p95, flag(rt.p95, P95_WARN_MS)),
        ("p99", rt.p99, flag(rt.p99, P99_WARN_MS)),
        ("p999", rt.p999, ""),
        ("max", rt.max, ""),
    ];
    for (field, value, warn) in rows {
        out.push_str(&format!(
            "- {:<6}{}{:>10.2}{}\n",
            field,
            marker(result, field),
            value,
            warn
        ));
    }

    let usage = &result.resource_usage;
    out.push_str(&format!(
        "\nRESOURCES:\n\
         - Memory start: {}\n\
         - Memory end:   {}\n\
         - Memory delta: {:+} B\n\
         - Memory peak:  {:.2} MB\n",
        format_bytes(usage.memory_start),
        format_bytes(usage.memory_end),
        usage.memory_delta,
        usage.memory_peak_mb,
    ));

    if let Some(capacity) = &result.capacity_metrics {
        out.push_str(&format!(
            "\nCONNECTIONS:\n\
             - Opened:       {:>10}\n\
             - Completed:    {:>10}\n\
             - Failed:       {:>10}\n",
            capacity.connections_opened, capacity.connections_completed, capacity.connections_failed,
        ));
    }

    if !result.errors.is_empty() {
        out.push_str("\nERRORS:\n");
        for error in &result.errors {
            out.push_str(&format!("- {:<28}{:>10}\n", error.kind, error.count));
        }
    }

    if !result.approximated.is_empty() {
        out.push_str(&format!(
            "\n~ estimated, not reported by the load tool: {}\n",
            result.approximated.join(", ")
        ));
    }

    out
}

pub fn generate_regression_report(results: &[RegressionResult]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{RULE}\nREGRESSION REPORT (p95)\n{RULE}\n"));

    if results.is_empty() {
        out.push_str("No benchmarks compared.\n");
        return out;
    }

    out.push_str(&format!(
        "{:<3}{:<32}{:>12}{:>12}{:>10}{:>14}\n",
        "", "Benchmark", "Current", "Baseline", "Change", "Samples"
    ));
    for r in results {
        out.push_str(&format!(
            "{:<3}{:<32}{:>10.2}ms{:>10.2}ms{:>+9.1}%{:>14}\n",
            if r.is_regression { "⚠" } else { "✅" },
            r.benchmark,
            r.current,
            r.baseline,
            r.percent_change,
            format!("{}/{}", r.current_samples, r.baseline_samples),
        ));
    }

    let regressions = results.iter().filter(|r| r.is_regression).count();
    out.push_str(&format!(
        "\n{} of {} benchmarks regressed (tolerance {:.0}%)\n",
        regressions,
        results.len(),
        results
            .first()
            .map(|r| (r.threshold - 1.0) * 100.0)
            .unwrap_or_default(),
    ));
    out
}

fn snapshot_line(label: &str, snapshot: &Option<LoadSnapshot>) -> String {
    match snapshot {
        Some(s) => format!(
            "- {:<8}{:>6} users {:>10.2} req/s  p95 {:>8.2}ms  p99 {:>8.2}ms  errors {:>6.2}%\n",
            label, s.concurrency, s.throughput, s.p95, s.p99, s.error_rate
        ),
        None => format!("- {:<8}n/a\n", label),
    }
}

fn optional(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

pub fn generate_capacity_report(report: &CapacityReport) -> String {
    let limits = &report.capacity_limits;
    let mut out = String::new();

    out.push_str(&format!(
        "{RULE}\n\
         CAPACITY REPORT: {}\n\
         {RULE}\n\
         Timestamp: {}\n\n\
         LIMITS:\n\
         - Max concurrent users:     {}{}\n\
         - Max WebSocket conns:      {}\n\
         - Max database conns:       {}\n\
         - Max throughput:           {:.2} req/s\n\n",
        report.scenario,
        report.timestamp.to_rfc3339(),
        limits.max_concurrent_users,
        if report.capacity_validated {
            ""
        } else {
            " ⚠ (not validated)"
        },
        optional(limits.max_websocket_connections),
        optional(limits.max_database_connections),
        limits.max_throughput,
    ));

    out.push_str("LOAD PROFILE:\n");
    let metrics = &report.performance_metrics;
    out.push_str(&snapshot_line("normal", &metrics.normal_load));
    out.push_str(&snapshot_line("peak", &metrics.peak_load));
    out.push_str(&snapshot_line("stress", &metrics.stress_load));

    out.push_str("\nBOTTLENECKS:\n");
    if report.bottlenecks.is_empty() {
        out.push_str("- none detected\n");
    }
    for b in &report.bottlenecks {
        let at = b
            .concurrency
            .map(|c| format!(" at {} users", c))
            .unwrap_or_default();
        out.push_str(&format!("⚠ {}{}: {}\n  {}\n", b.component, at, b.limit, b.recommendation));
    }

    if !report.recommendations.is_empty() {
        out.push_str("\nRECOMMENDATIONS:\n");
        for rec in &report.recommendations {
            out.push_str(&format!("- {}\n", rec));
        }
    }

    out
}
