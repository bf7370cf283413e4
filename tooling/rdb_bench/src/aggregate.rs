//! Grouping of trial records into per-variant means.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::{GapPolicy, GroupedBlock, GroupedDataset, GroupedRow, TrialRecord, Variant};

/// Averages repeated trials.
///
/// Produces one block per variant, in variant order. Inside a block there is
/// one row per (op-count, value-size) key, sorted by value size and then
/// op-count. Keys whose trials all failed follow `gap_policy`.
pub fn aggregate(
    records: &[TrialRecord],
    variants: &[Variant],
    gap_policy: GapPolicy,
) -> GroupedDataset {
    let out_of_range = records
        .iter()
        .filter(|r| r.variant_index == 0 || r.variant_index > variants.len())
        .count();
    if out_of_range > 0 {
        warn!(
            out_of_range,
            variants = variants.len(),
            "Ignoring records for unknown variants"
        );
    }

    let blocks = variants
        .iter()
        .enumerate()
        .map(|(pos, variant)| {
            let variant_index = pos + 1;
            GroupedBlock {
                variant_index,
                label: variant.label.clone(),
                rows: aggregate_variant(records, variant_index, gap_policy),
            }
        })
        .collect();

    GroupedDataset { blocks }
}

fn aggregate_variant(
    records: &[TrialRecord],
    variant_index: usize,
    gap_policy: GapPolicy,
) -> Vec<GroupedRow> {
    // Keyed by (value_size, op_count) so iteration order is the output order.
    let mut groups: BTreeMap<(u64, u64), Vec<f64>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.variant_index == variant_index) {
        let samples = groups
            .entry((record.value_size, record.op_count))
            .or_default();
        if let Some(gas) = record.outcome.measurement() {
            samples.push(gas);
        }
    }

    groups
        .into_iter()
        .filter_map(|((value_size, op_count), samples)| {
            let mean = average(&samples);
            if mean.is_none() && gap_policy == GapPolicy::Omit {
                return None;
            }
            Some(GroupedRow {
                op_count,
                value_size,
                variant_index,
                mean,
            })
        })
        .collect()
}

fn average(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}
