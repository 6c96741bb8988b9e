//! Re-rooting a match list at one of its labels.

use std::collections::BTreeSet;

use tracing::debug;

use crate::specification::{Condition, Match, PathCondition, Projection, Specification};

/// Labels referenced by `matches` that they do not define themselves.
fn outer_references(matches: &[Match], defined: &BTreeSet<String>, refs: &mut BTreeSet<String>) {
    let mut defined = defined.clone();
    for m in matches {
        for p in m.path_conditions() {
            if !defined.contains(&p.label_right) {
                refs.insert(p.label_right.clone());
            }
        }
        defined.insert(m.unknown.name.clone());
        for e in m.existential_conditions() {
            outer_references(&e.matches, &defined, refs);
        }
    }
}

/// Rebuild `all` as a specification whose first given is `all[target]`.
///
/// The first `givens` entries of `all` are the original givens. Labels are
/// bound in connectivity order starting at the target, always taking the
/// lowest-indexed label adjacent to those already bound. Each path
/// condition moves to whichever endpoint is bound later, inverted if that
/// is its right-hand label. Each existential condition moves to the
/// latest-bound label it references, but never onto the new given.
///
/// An original given that only existential conditions reach stays a given
/// of the result, after the target. Other labels the target cannot reach
/// are left out.
pub(super) fn reroot(all: &[Match], givens: usize, target: usize) -> Option<Specification> {
    let position = |name: &str| all.iter().position(|m| m.unknown.name == name);
    let edges: Vec<(usize, usize, &PathCondition)> = all
        .iter()
        .enumerate()
        .flat_map(|(owner, m)| {
            m.path_conditions()
                .filter_map(move |p| position(&p.label_right).map(|right| (owner, right, p)))
        })
        .collect();

    let mut rank: Vec<Option<usize>> = vec![None; all.len()];
    rank[target] = Some(0);
    let mut emitted = vec![target];
    while let Some(next) = (0..all.len()).find(|&k| {
        rank[k].is_none()
            && edges.iter().any(|&(a, b, _)| {
                (a == k && rank[b].is_some()) || (b == k && rank[a].is_some())
            })
    }) {
        rank[next] = Some(emitted.len());
        emitted.push(next);
    }
    if emitted.len() < 2 {
        return None;
    }

    let mut built: Vec<Match> = emitted
        .iter()
        .map(|&k| Match {
            unknown: all[k].unknown.clone(),
            conditions: Vec::new(),
        })
        .collect();

    for &(owner, right, p) in &edges {
        let (Some(owner_rank), Some(right_rank)) = (rank[owner], rank[right]) else {
            continue;
        };
        if owner_rank > right_rank {
            built[owner_rank].conditions.push(Condition::Path(p.clone()));
        } else {
            built[right_rank]
                .conditions
                .push(Condition::Path(p.inverted(&all[owner].unknown.name)));
        }
    }

    let mut extra_givens: Vec<usize> = Vec::new();
    for (owner, m) in all.iter().enumerate() {
        if rank[owner].is_none() {
            continue;
        }
        for e in m.existential_conditions() {
            let mut refs = BTreeSet::from([m.unknown.name.clone()]);
            outer_references(&e.matches, &BTreeSet::new(), &mut refs);
            let mut attach = 1;
            for r in &refs {
                let k = position(r);
                match (k, k.and_then(|k| rank[k])) {
                    (_, Some(bound)) => attach = attach.max(bound),
                    (Some(k), None) if k < givens => {
                        if !extra_givens.contains(&k) {
                            extra_givens.push(k);
                        }
                    }
                    _ => {
                        debug!(label = %r, owner = %all[owner].unknown.name, "existential references an unreachable label");
                        return None;
                    }
                }
            }
            built[attach].conditions.push(Condition::Existential(e.clone()));
        }
    }

    extra_givens.sort_unstable();
    let given = std::iter::once(target)
        .chain(extra_givens)
        .map(|k| all[k].unknown.clone())
        .collect();
    match Specification::new(given, built.split_off(1), Projection::empty()) {
        Ok(spec) => Some(spec),
        Err(err) => {
            debug!(error = %err, "re-rooted specification is invalid");
            None
        }
    }
}
