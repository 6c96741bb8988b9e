//! Which facts a satisfied purge condition deletes.

use std::collections::BTreeSet;

use crate::error::KyroFactResult;
use crate::fact::FactReference;

/// The deletions for one purge root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgePlan {
    /// The purge root every condition was evaluated from.
    pub root: FactReference,
    /// Facts that satisfied a condition. These survive the purge.
    pub triggers: BTreeSet<FactReference>,
    /// Ancestors of the root that will be deleted.
    pub doomed: BTreeSet<FactReference>,
}

/// Compute the facts to delete below `root`.
///
/// Every transitive successor of the root is deleted except the triggers
/// and their predecessor closures. The root itself is a predecessor of each
/// trigger and therefore always survives.
pub fn purge_plan<S, P>(
    root: &FactReference,
    triggers: &[FactReference],
    mut successors: S,
    mut predecessors: P,
) -> KyroFactResult<PurgePlan>
where
    S: FnMut(&FactReference) -> KyroFactResult<Vec<FactReference>>,
    P: FnMut(&FactReference) -> KyroFactResult<Vec<FactReference>>,
{
    let mut kept = BTreeSet::new();
    let mut stack: Vec<FactReference> = triggers.to_vec();
    while let Some(current) = stack.pop() {
        if kept.contains(&current) {
            continue;
        }
        stack.extend(predecessors(&current)?);
        kept.insert(current);
    }

    let mut reached = BTreeSet::new();
    let mut stack = successors(root)?;
    while let Some(current) = stack.pop() {
        if reached.contains(&current) {
            continue;
        }
        stack.extend(successors(&current)?);
        reached.insert(current);
    }

    Ok(PurgePlan {
        root: root.clone(),
        triggers: triggers.iter().cloned().collect(),
        doomed: reached.difference(&kept).cloned().collect(),
    })
}
