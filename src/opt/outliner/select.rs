//! Cost model and the choice of which occurrences to outline.

use rustc_hash::FxHashMap;

use crate::{
    ir::{
        encoding::{INVOKE_UNITS, MOVE_RESULT_UNITS, RETURN_UNITS},
        MethodId, Pool,
    },
    opt::outliner::candidate::{Fingerprint, Occurrence},
    pass::metrics::as_metric,
    Result,
};

/// Fixed cost of a method beyond its instructions: the method and code item headers
/// and its entries in the method tables.
pub const HELPER_OVERHEAD_UNITS: usize = 8;

/// Code units saved by outlining `sites` occurrences of `fingerprint`. Negative when
/// the helper costs more than the call sites save.
///
/// # Errors
///
/// Returns [`crate::Error::EncodingOverflow`] if an instruction has no encoding.
pub fn estimate_savings(fingerprint: &Fingerprint, sites: usize, pool: &Pool) -> Result<i64> {
    let body = fingerprint.body_units(pool)?;
    let call = INVOKE_UNITS + fingerprint.result.map_or(0, |_| MOVE_RESULT_UNITS);
    let helper = body + RETURN_UNITS + HELPER_OVERHEAD_UNITS;
    Ok((as_metric(body) - as_metric(call)) * as_metric(sites) - as_metric(helper))
}

/// A fingerprint chosen for outlining with the occurrences it replaces.
#[derive(Debug, Clone)]
pub struct Group {
    /// The shared body.
    pub fingerprint: Fingerprint,
    /// Non-overlapping occurrences in program order.
    pub occurrences: Vec<Occurrence>,
    /// Estimated savings in code units.
    pub savings: i64,
}

/// Outcome of [`select`].
#[derive(Debug, Default)]
pub struct Selection {
    /// Chosen groups, in commit order.
    pub groups: Vec<Group>,
    /// Fingerprints seen at least twice.
    pub repeated: usize,
    /// Occurrences of chosen groups dropped because an earlier choice covers them.
    pub rejected_overlap: usize,
}

/// Keeps the occurrences of `occurrences` (sorted) that overlap neither each other nor
/// `taken`.
fn disjoint(
    occurrences: &[Occurrence],
    taken: &FxHashMap<(MethodId, usize), Vec<(usize, usize)>>,
) -> Vec<Occurrence> {
    let mut kept: Vec<Occurrence> = Vec::new();
    for occ in occurrences {
        let blocked = taken
            .get(&(occ.method, occ.big_block))
            .is_some_and(|ranges| ranges.iter().any(|&(s, e)| occ.start < e && s < occ.end()));
        if blocked || kept.last().is_some_and(|prev| prev.overlaps(occ)) {
            continue;
        }
        kept.push(occ.clone());
    }
    kept
}

/// Picks the groups to outline.
///
/// Fingerprints are ranked by estimated savings, ties broken by the position of their
/// first occurrence, and committed greedily: each takes the occurrences no earlier
/// choice covers, and is kept only if those still save more than `threshold` units.
///
/// # Errors
///
/// Never fails on well-formed fingerprints; encoding failures drop the fingerprint.
pub fn select(
    table: Vec<(Fingerprint, Vec<Occurrence>)>,
    pool: &Pool,
    min_insns: usize,
    threshold: i64,
) -> Result<Selection> {
    let mut selection = Selection::default();
    let no_claims = FxHashMap::default();
    let mut ranked = Vec::new();
    for (fingerprint, mut occurrences) in table {
        if occurrences.len() < 2 || fingerprint.len() < min_insns {
            continue;
        }
        selection.repeated += 1;
        occurrences.sort_by_key(Occurrence::key);
        let best = disjoint(&occurrences, &no_claims);
        let Ok(savings) = estimate_savings(&fingerprint, best.len(), pool) else {
            continue;
        };
        if savings > threshold {
            ranked.push(Group {
                fingerprint,
                occurrences,
                savings,
            });
        }
    }
    ranked.sort_by(|a, b| {
        b.savings
            .cmp(&a.savings)
            .then_with(|| a.occurrences[0].key().cmp(&b.occurrences[0].key()))
            .then_with(|| b.fingerprint.len().cmp(&a.fingerprint.len()))
    });

    let mut taken: FxHashMap<(MethodId, usize), Vec<(usize, usize)>> = FxHashMap::default();
    for group in ranked {
        let kept = disjoint(&group.occurrences, &taken);
        if kept.len() < 2 {
            continue;
        }
        let savings = estimate_savings(&group.fingerprint, kept.len(), pool)?;
        if savings <= threshold {
            continue;
        }
        selection.rejected_overlap += group.occurrences.len() - kept.len();
        for occ in &kept {
            taken
                .entry((occ.method, occ.big_block))
                .or_default()
                .push((occ.start, occ.end()));
        }
        selection.groups.push(Group {
            fingerprint: group.fingerprint,
            occurrences: kept,
            savings,
        });
    }
    Ok(selection)
}
