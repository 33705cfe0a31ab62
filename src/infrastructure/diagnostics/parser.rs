//! Parsers for the textual output of `bpcomp` and `tracecomp`.

use crate::domain::errors::DiagnosticsError;
use crate::domain::models::TraceDiagnostic;

const BPCOMP: &str = "bpcomp";
const TRACECOMP: &str = "tracecomp";

/// Extract `maxdiff` from bpcomp's summary.
///
/// The value is the last field of the line starting with `maxdiff`, e.g.
/// `maxdiff     : 0.0428571`.
pub fn parse_bpcomp(output: &str) -> Result<f64, DiagnosticsError> {
    let line = output
        .lines()
        .find(|line| line.starts_with("maxdiff"))
        .ok_or_else(|| malformed(BPCOMP, "no maxdiff line"))?;

    let value = line
        .split_whitespace()
        .last()
        .ok_or_else(|| malformed(BPCOMP, "empty maxdiff line"))?;

    parse_number(BPCOMP, value)
}

/// Extract per-trace effective sizes and relative differences from tracecomp.
///
/// Rows look like `name effsize rel_diff`; the header row starts with `name`.
/// Rows whose second and third fields are not numbers are ignored, but at
/// least one trace row is required.
pub fn parse_tracecomp(output: &str) -> Result<Vec<TraceDiagnostic>, DiagnosticsError> {
    let mut traces = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] == "name" {
            continue;
        }

        let (Ok(effective_size), Ok(relative_diff)) =
            (fields[1].parse::<f64>(), fields[2].parse::<f64>())
        else {
            continue;
        };

        if !effective_size.is_finite() || !relative_diff.is_finite() {
            return Err(malformed(
                TRACECOMP,
                &format!("non-finite statistics for {}", fields[0]),
            ));
        }

        traces.push(TraceDiagnostic {
            name: fields[0].to_string(),
            effective_size,
            relative_diff,
        });
    }

    if traces.is_empty() {
        return Err(malformed(TRACECOMP, "no trace rows"));
    }

    Ok(traces)
}

fn parse_number(tool: &str, value: &str) -> Result<f64, DiagnosticsError> {
    match value.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(malformed(tool, &format!("expected a number, got {value:?}"))),
    }
}

fn malformed(tool: &str, detail: &str) -> DiagnosticsError {
    DiagnosticsError::MalformedOutput {
        tool: tool.to_string(),
        detail: detail.to_string(),
    }
}
