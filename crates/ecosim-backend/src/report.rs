//! Biomass report format shared by every backend.
//!
//! A report is CSV text with one header row and one row per node:
//!
//! ```text
//! node_id,1,2,3
//! 5,2000.0,2110.5,2203.9
//! 7,350.0,342.1,330.0
//! ```
//!
//! Header columns after `node_id` are timesteps. The last column of each
//! row is the most recent sample. Values are fractional on the wire and
//! truncated toward zero when read back as whole-unit biomass.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ecosim_types::NodeId;

use crate::error::BackendError;

/// Header label of the node column.
const NODE_COLUMN: &str = "node_id";

/// Read the latest biomass per node out of a report.
///
/// # Errors
///
/// Returns [`BackendError::MalformedReport`] if the header is missing, a
/// node id or value does not parse, or a row carries no samples.
pub fn parse_biomass_report(report: &str) -> Result<BTreeMap<NodeId, i64>, BackendError> {
    let mut lines = report.lines().map(str::trim).filter(|l| !l.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| BackendError::MalformedReport("empty report".to_owned()))?;
    if header.split(',').next().map(str::trim) != Some(NODE_COLUMN) {
        return Err(BackendError::MalformedReport(format!(
            "expected `{NODE_COLUMN}` header, found `{header}`"
        )));
    }

    let mut latest = BTreeMap::new();
    for line in lines {
        let mut cells = line.split(',').map(str::trim);
        let raw_node = cells.next().unwrap_or_default();
        let node = raw_node.parse::<i32>().map_err(|e| {
            BackendError::MalformedReport(format!("bad node id `{raw_node}`: {e}"))
        })?;
        let raw_value = cells
            .last()
            .ok_or_else(|| BackendError::MalformedReport(format!("node {node} has no samples")))?;
        let value = raw_value.parse::<f64>().map_err(|e| {
            BackendError::MalformedReport(format!("bad biomass `{raw_value}` for node {node}: {e}"))
        })?;
        if !value.is_finite() {
            return Err(BackendError::MalformedReport(format!(
                "non-finite biomass for node {node}"
            )));
        }
        latest.insert(NodeId::new(node), truncate_biomass(value));
    }

    Ok(latest)
}

/// Render a report from per-timestep samples, oldest first.
pub fn render_biomass_report(history: &[(u32, BTreeMap<NodeId, f64>)]) -> String {
    let mut nodes: Vec<NodeId> = history
        .iter()
        .flat_map(|(_, sample)| sample.keys().copied())
        .collect();
    nodes.sort_unstable();
    nodes.dedup();

    let mut out = String::from(NODE_COLUMN);
    for (timestep, _) in history {
        let _ = write!(out, ",{timestep}");
    }
    out.push('\n');

    for node in nodes {
        let _ = write!(out, "{node}");
        for (_, sample) in history {
            let value = sample.get(&node).copied().unwrap_or(0.0);
            let _ = write!(out, ",{value:.2}");
        }
        out.push('\n');
    }
    out
}

/// Convert a fractional biomass to whole units, truncating toward zero.
#[allow(clippy::cast_possible_truncation)]
pub fn truncate_biomass(value: f64) -> i64 {
    value.trunc() as i64
}
