//! Purge conditions.
//!
//! A purge condition is a specification whose given is the type to purge
//! and whose matches find a trigger fact. Once a trigger exists, the
//! successors of the purged fact may be deleted. Purging is a one-way
//! ratchet, so conditions may not contain negative existentials, and every
//! read specification that reaches a purged type must exclude the trigger
//! itself.

mod plan;

use std::collections::HashMap;

use crate::error::PurgeError;
use crate::specification::{
    apply_matches, describe_existential, Condition, ExistentialCondition, Label, Match, PathCondition,
    Projection, Role, Specification,
};

pub use plan::{purge_plan, PurgePlan};

/// The registered purge conditions of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeConditions {
    specifications: Vec<Specification>,
}

/// Builder returned by [`PurgeConditions::purge`].
#[derive(Debug, Clone)]
pub struct PurgeBuilder {
    conditions: PurgeConditions,
    fact_type: String,
}

impl PurgeBuilder {
    /// Purge when a `trigger_type` fact reaches the purged fact through `roles`.
    ///
    /// ```
    /// use kyrofact::purge::PurgeConditions;
    /// use kyrofact::specification::Role;
    ///
    /// let conditions = PurgeConditions::new()
    ///     .purge("Office")
    ///     .when_exists("Office.Closure", [Role::new("office", "Office")])
    ///     .unwrap();
    /// assert_eq!(conditions.len(), 1);
    /// ```
    pub fn when_exists(
        self,
        trigger_type: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<PurgeConditions, PurgeError> {
        self.when_exists_matching(trigger_type, roles, |m| m)
    }

    /// Like [`when_exists`](Self::when_exists), with further conditions on the trigger.
    pub fn when_exists_matching(
        self,
        trigger_type: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
        refine: impl FnOnce(Match) -> Match,
    ) -> Result<PurgeConditions, PurgeError> {
        let trigger_type = trigger_type.into();
        let given = label_for(&self.fact_type, None);
        let trigger = label_for(&trigger_type, Some(&given));
        let m = refine(Match::new(trigger, trigger_type).successor_of(given.clone(), roles));
        let spec = Specification::new(vec![Label::new(given, self.fact_type)], vec![m], Projection::empty())
            .map_err(|e| PurgeError::InvalidCondition { reason: e.to_string() })?;
        self.conditions.with_specification(spec)
    }
}

/// A label name for a fact type: its last segment with a lowercase initial.
fn label_for(fact_type: &str, taken: Option<&str>) -> String {
    let segment = fact_type.rsplit('.').next().unwrap_or(fact_type);
    let mut chars = segment.chars();
    let mut name: String = chars
        .next()
        .map(|c| c.to_lowercase().chain(chars).collect())
        .unwrap_or_default();
    if taken == Some(name.as_str()) {
        name.push('2');
    }
    name
}

impl PurgeConditions {
    /// No conditions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a condition for facts of `fact_type`.
    #[must_use]
    pub fn purge(self, fact_type: impl Into<String>) -> PurgeBuilder {
        PurgeBuilder {
            conditions: self,
            fact_type: fact_type.into(),
        }
    }

    /// Register a condition given as a specification.
    pub fn with_specification(mut self, spec: Specification) -> Result<Self, PurgeError> {
        validate_condition(&spec)?;
        self.specifications.push(spec);
        Ok(self)
    }

    /// Combine two sets of conditions.
    #[must_use]
    pub fn merge(mut self, other: PurgeConditions) -> Self {
        for spec in other.specifications {
            if !self.specifications.contains(&spec) {
                self.specifications.push(spec);
            }
        }
        self
    }

    /// The conditions as specifications, in registration order.
    #[must_use]
    pub fn specifications(&self) -> &[Specification] {
        &self.specifications
    }

    /// Number of registered conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specifications.len()
    }

    /// True when no conditions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specifications.is_empty()
    }

    /// Check every registered condition for monotonicity.
    pub fn validate(&self) -> Result<(), PurgeError> {
        self.specifications.iter().try_for_each(validate_condition)
    }

    /// Verify that `spec` excludes the trigger of every purge condition on
    /// every type it matches.
    pub fn check_compliance(&self, spec: &Specification) -> Result<(), PurgeError> {
        let reasons: Vec<String> = spec
            .all_matches()
            .into_iter()
            .flat_map(|m| self.missing_conditions(m))
            .collect();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(PurgeError::NonCompliant { reasons })
        }
    }

    fn missing_conditions(&self, m: &Match) -> Vec<String> {
        self.specifications
            .iter()
            .filter(|c| c.given.first().is_some_and(|g| g.fact_type == m.unknown.fact_type))
            .filter(|c| {
                !m.existential_conditions()
                    .any(|e| !e.exists && is_equivalent(&e.matches, c, &m.unknown.name))
            })
            .map(|c| {
                format!(
                    "The match for {} is missing purge conditions:\n{}",
                    m.unknown.fact_type,
                    describe_existential(&required_condition(c, &m.unknown.name), 0)
                )
            })
            .collect()
    }

    /// Render every condition in descriptive form.
    #[must_use]
    pub fn describe(&self) -> String {
        self.specifications
            .iter()
            .map(|s| format!("purge {s}"))
            .collect()
    }
}

fn validate_condition(spec: &Specification) -> Result<(), PurgeError> {
    let [given] = spec.given.as_slice() else {
        return Err(PurgeError::InvalidCondition {
            reason: format!("a purge condition has exactly one given, found {}", spec.given.len()),
        });
    };
    if spec.matches.is_empty() {
        return Err(PurgeError::InvalidCondition {
            reason: format!("the purge condition for {} has no trigger", given.fact_type),
        });
    }
    if let Some(reversal) = find_negative(&spec.matches) {
        return Err(PurgeError::ReversiblePurge {
            purged: given.fact_type.clone(),
            trigger: reversal
                .matches
                .first()
                .map_or_else(String::new, |m| m.unknown.fact_type.clone()),
            description: spec.to_string(),
        });
    }
    Ok(())
}

fn find_negative(matches: &[Match]) -> Option<&ExistentialCondition> {
    matches.iter().find_map(|m| {
        m.existential_conditions()
            .find_map(|e| if e.exists { find_negative(&e.matches) } else { Some(e) })
    })
}

/// The negative existential a read of `unknown` must carry for `condition`.
fn required_condition(condition: &Specification, unknown: &str) -> ExistentialCondition {
    let renames: HashMap<String, String> = condition
        .given
        .iter()
        .map(|g| (g.name.clone(), unknown.to_string()))
        .collect();
    ExistentialCondition {
        exists: false,
        matches: apply_matches(&condition.matches, &renames),
    }
}

fn labels_in_order<'a>(matches: &'a [Match], out: &mut Vec<&'a Label>) {
    for m in matches {
        out.push(&m.unknown);
        for e in m.existential_conditions() {
            labels_in_order(&e.matches, out);
        }
    }
}

/// True when `matches` is the purge condition's match list up to label names.
fn is_equivalent(matches: &[Match], condition: &Specification, unknown: &str) -> bool {
    let mut theirs = Vec::new();
    labels_in_order(&condition.matches, &mut theirs);
    let mut ours = Vec::new();
    labels_in_order(matches, &mut ours);
    if theirs.len() != ours.len() || theirs.iter().zip(&ours).any(|(a, b)| a.fact_type != b.fact_type) {
        return false;
    }
    let mut renames: HashMap<String, String> = theirs
        .iter()
        .zip(&ours)
        .map(|(a, b)| (a.name.clone(), b.name.clone()))
        .collect();
    for g in &condition.given {
        renames.insert(g.name.clone(), unknown.to_string());
    }
    let renamed = apply_matches(&condition.matches, &renames);
    renamed.len() == matches.len()
        && renamed
            .iter()
            .zip(matches)
            .all(|(a, b)| a.unknown == b.unknown && same_conditions(&a.conditions, &b.conditions))
}

/// Path conditions compare in any order; existential conditions in order.
fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    let paths = |c: &[Condition]| -> Vec<PathCondition> { c.iter().filter_map(Condition::as_path).cloned().collect() };
    let existentials = |c: &[Condition]| -> Vec<ExistentialCondition> {
        c.iter()
            .filter_map(|c| match c {
                Condition::Existential(e) => Some(e.clone()),
                Condition::Path(_) => None,
            })
            .collect()
    };
    let (left, right) = (paths(a), paths(b));
    left.len() == right.len() && left.iter().all(|p| right.contains(p)) && existentials(a) == existentials(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office_closure() -> PurgeConditions {
        PurgeConditions::new()
            .purge("Office")
            .when_exists("Office.Closure", [Role::new("office", "Office")])
            .unwrap()
    }

    #[test]
    fn test_when_exists_builds_condition() {
        let conditions = office_closure();
        assert_eq!(
            conditions.specifications()[0].to_string(),
            "(office: Office) {\n    closure: Office.Closure [\n        closure->office: Office = office\n    ]\n}\n"
        );
    }

    #[test]
    fn test_negative_existential_is_reversible() {
        let err = PurgeConditions::new()
            .purge("Office")
            .when_exists_matching("Office.Closure", [Role::new("office", "Office")], |m| {
                m.where_no([Match::new("reopening", "Office.Reopening")
                    .successor_of("closure", [Role::new("officeClosure", "Office.Closure")])])
            })
            .unwrap_err();
        match err {
            PurgeError::ReversiblePurge { purged, trigger, .. } => {
                assert_eq!(purged, "Office");
                assert_eq!(trigger, "Office.Reopening");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_condition_is_reported() {
        let spec = Specification::parse(
            "(company: Company) { office: Office [ office->company: Company = company ] } => office",
        )
        .unwrap();
        let err = office_closure().check_compliance(&spec).unwrap_err();
        let PurgeError::NonCompliant { reasons } = err else {
            panic!("expected non-compliance");
        };
        assert_eq!(
            reasons,
            vec![
                "The match for Office is missing purge conditions:\n\
                 !E {\n    closure: Office.Closure [\n        closure->office: Office = office\n    ]\n}\n"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_matching_negative_condition_complies() {
        let spec = Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                    !E {
                        c: Office.Closure [
                            c->office: Office = office
                        ]
                    }
                ]
            } => office",
        )
        .unwrap();
        assert!(office_closure().check_compliance(&spec).is_ok());
    }

    #[test]
    fn test_positive_condition_does_not_comply() {
        let spec = Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                    E {
                        c: Office.Closure [
                            c->office: Office = office
                        ]
                    }
                ]
            } => office",
        )
        .unwrap();
        assert!(office_closure().check_compliance(&spec).is_err());
    }

    #[test]
    fn test_compliance_reaches_collections() {
        let spec = Specification::parse(
            "(company: Company) { } => {
                offices = {
                    office: Office [
                        office->company: Company = company
                    ]
                } => office
            }",
        )
        .unwrap();
        assert!(office_closure().check_compliance(&spec).is_err());
    }

    #[test]
    fn test_describe_and_merge() {
        let conditions = office_closure().merge(office_closure());
        assert_eq!(conditions.len(), 1);
        assert!(conditions.describe().starts_with("purge (office: Office) {"));
    }

    #[test]
    fn test_condition_needs_single_given() {
        let spec = Specification::parse(
            "(a: Office, b: Company) { c: Office.Closure [ c->office: Office = a ] }",
        )
        .unwrap();
        assert!(matches!(
            PurgeConditions::new().with_specification(spec),
            Err(PurgeError::InvalidCondition { .. })
        ));
    }
}
