//! Structural validation of specifications.

use std::collections::HashSet;

use crate::error::SpecificationError;

use super::{Condition, Label, Match, PathCondition, Projection, Specification};

#[derive(Debug, Clone, Default)]
struct Scope {
    labels: Vec<Label>,
}

impl Scope {
    fn type_of(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.fact_type.as_str())
    }

    fn define(&mut self, label: &Label) -> Result<(), SpecificationError> {
        if self.type_of(&label.name).is_some() {
            return Err(SpecificationError::DuplicateLabel {
                label: label.name.clone(),
            });
        }
        self.labels.push(label.clone());
        Ok(())
    }

    fn unknown_label(&self, label: &str) -> SpecificationError {
        SpecificationError::UnknownLabel {
            label: label.to_string(),
            known: self.labels.iter().map(|l| l.name.clone()).collect(),
        }
    }
}

pub(super) fn validate_specification(spec: &Specification) -> Result<(), SpecificationError> {
    let mut scope = Scope::default();
    for g in &spec.given {
        scope.define(g)?;
    }
    validate_matches(&spec.matches, &mut scope)?;
    if matches!(spec.projection, Projection::Collection { .. }) {
        return Err(SpecificationError::InvalidProjection {
            reason: "a collection must be a named component of a compound projection".to_string(),
        });
    }
    validate_projection(&spec.projection, &scope, true)
}

fn validate_matches(matches: &[Match], scope: &mut Scope) -> Result<(), SpecificationError> {
    for m in matches {
        if scope.type_of(&m.unknown.name).is_some() {
            return Err(SpecificationError::DuplicateLabel {
                label: m.unknown.name.clone(),
            });
        }
        if m.path_conditions().next().is_none() {
            return Err(SpecificationError::MatchWithoutPath {
                label: m.unknown.name.clone(),
            });
        }
        for p in m.path_conditions() {
            validate_path(m, p, scope)?;
        }
        scope.define(&m.unknown)?;
        for c in &m.conditions {
            if let Condition::Existential(e) = c {
                let mut nested = scope.clone();
                validate_matches(&e.matches, &mut nested)?;
            }
        }
    }
    Ok(())
}

fn validate_path(m: &Match, p: &PathCondition, scope: &Scope) -> Result<(), SpecificationError> {
    let Some(right_type) = scope.type_of(&p.label_right) else {
        return Err(scope.unknown_label(&p.label_right));
    };
    let left_end = p
        .roles_left
        .last()
        .map_or(m.unknown.fact_type.as_str(), |r| r.predecessor_type.as_str());
    let right_end = p
        .roles_right
        .last()
        .map_or(right_type, |r| r.predecessor_type.as_str());
    if left_end != right_end {
        return Err(SpecificationError::RoleTypeMismatch {
            left: left_end.to_string(),
            right: right_end.to_string(),
        });
    }
    Ok(())
}

/// Collections are allowed only as direct components of the top-level
/// compound or of a collection's own compound projection.
fn validate_projection(
    projection: &Projection,
    scope: &Scope,
    collections_allowed: bool,
) -> Result<(), SpecificationError> {
    match projection {
        Projection::Simple { label } | Projection::Field { label, .. } | Projection::Hash { label } => {
            if scope.type_of(label).is_none() {
                return Err(scope.unknown_label(label));
            }
            Ok(())
        }
        Projection::Compound { components } => {
            let mut names = HashSet::new();
            for c in components {
                if !names.insert(c.name.as_str()) {
                    return Err(SpecificationError::InvalidProjection {
                        reason: format!("component '{}' is defined more than once", c.name),
                    });
                }
                if !collections_allowed && matches!(c.projection, Projection::Collection { .. }) {
                    return Err(SpecificationError::InvalidProjection {
                        reason: format!("collection '{}' is nested inside another compound", c.name),
                    });
                }
                let nested_allowed = matches!(c.projection, Projection::Collection { .. });
                validate_projection(&c.projection, scope, nested_allowed)?;
            }
            Ok(())
        }
        Projection::Collection { matches, projection } => {
            let mut nested = scope.clone();
            validate_matches(matches, &mut nested)?;
            if matches!(projection.as_ref(), Projection::Collection { .. }) {
                return Err(SpecificationError::InvalidProjection {
                    reason: "a collection must be a named component of a compound projection".to_string(),
                });
            }
            validate_projection(projection, &nested, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SpecificationError;
    use crate::specification::{Label, Match, PathCondition, Projection, Role, Specification};

    #[test]
    fn test_match_without_path_rejected() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("office", "Office")],
            Projection::simple("office"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SpecificationError::MatchWithoutPath {
                label: "office".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("office", "Office").successor_of("nobody", [Role::new("company", "Company")])],
            Projection::simple("office"),
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::UnknownLabel { ref label, .. } if label == "nobody"));
    }

    #[test]
    fn test_role_type_mismatch_rejected() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("office", "Office").successor_of("company", [Role::new("company", "Tenant")])],
            Projection::simple("office"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SpecificationError::RoleTypeMismatch {
                left: "Tenant".to_string(),
                right: "Company".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("company", "Office").successor_of("company", [Role::new("company", "Company")])],
            Projection::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_join_through_common_predecessor_accepted() {
        let spec = Specification::new(
            vec![Label::new("office", "Office")],
            vec![Match::new("peer", "Office").join(PathCondition::new(
                vec![Role::new("company", "Company")],
                "office",
                vec![Role::new("company", "Company")],
            ))],
            Projection::simple("peer"),
        );
        assert!(spec.is_ok());
    }

    #[test]
    fn test_projection_label_must_be_bound() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![],
            Projection::field("office", "city"),
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::UnknownLabel { .. }));
    }

    #[test]
    fn test_collection_inside_nested_compound_rejected() {
        let err = Specification::parse(
            "(company: Company) { } => {
                inner = {
                    offices = {
                        office: Office [
                            office->company: Company = company
                        ]
                    } => office
                }
            }",
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::InvalidProjection { .. }));
    }

    #[test]
    fn test_top_level_collection_rejected() {
        let err = Specification::new(
            vec![Label::new("company", "Company")],
            vec![],
            Projection::collection(vec![], Projection::simple("company")),
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::InvalidProjection { .. }));
    }
}
