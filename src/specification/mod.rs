//! The declarative specification model.
//!
//! A [`Specification`] names typed inputs (the given), a sequence of
//! [`Match`]es that each introduce one new label joined to earlier labels by
//! predecessor role chains, and a [`Projection`] that shapes the output.
//! The model is pure data: beyond validation it only supports descriptive
//! rendering and label substitution.

mod builder;
mod describe;
mod parser;
mod validation;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SpecificationError;

pub use builder::SpecificationBuilder;
pub(crate) use describe::{describe_existential, describe_matches};
pub use parser::parse_specification;

/// A named, typed variable in a specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Label {
    pub name: String,
    #[serde(rename = "type")]
    pub fact_type: String,
}

impl Label {
    /// A label named `name` of type `fact_type`.
    #[must_use]
    pub fn new(name: impl Into<String>, fact_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fact_type: fact_type.into(),
        }
    }
}

/// One step along a predecessor edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Role {
    pub name: String,
    pub predecessor_type: String,
}

impl Role {
    /// A step through `name` to a `predecessor_type` fact.
    #[must_use]
    pub fn new(name: impl Into<String>, predecessor_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predecessor_type: predecessor_type.into(),
        }
    }
}

/// The only join primitive.
///
/// Following `roles_left` from the match's unknown and `roles_right` from
/// `label_right` must arrive at the same fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PathCondition {
    pub roles_left: Vec<Role>,
    pub label_right: String,
    pub roles_right: Vec<Role>,
}

impl PathCondition {
    /// Join the unknown through `roles_left` to `label_right` through `roles_right`.
    #[must_use]
    pub fn new(roles_left: Vec<Role>, label_right: impl Into<String>, roles_right: Vec<Role>) -> Self {
        Self {
            roles_left,
            label_right: label_right.into(),
            roles_right,
        }
    }

    /// Swap the two sides, re-anchoring the condition on `label_right`.
    #[must_use]
    pub fn inverted(&self, unknown: &str) -> Self {
        Self {
            roles_left: self.roles_right.clone(),
            label_right: unknown.to_string(),
            roles_right: self.roles_left.clone(),
        }
    }
}

/// A polarity plus a nested match list evaluated in the current context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExistentialCondition {
    /// `true` for `E {}`, `false` for `!E {}`.
    pub exists: bool,
    /// Evaluated with every enclosing label in scope.
    pub matches: Vec<Match>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Path(PathCondition),
    Existential(ExistentialCondition),
}

impl Condition {
    /// The path condition, if this is one.
    #[must_use]
    pub const fn as_path(&self) -> Option<&PathCondition> {
        match self {
            Self::Path(p) => Some(p),
            Self::Existential(_) => None,
        }
    }
}

/// Introduces one new label, bound to prior labels by its conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    /// The label this match introduces.
    pub unknown: Label,
    /// Path conditions first, then existentials.
    pub conditions: Vec<Condition>,
}

impl Match {
    /// A match with no conditions yet.
    #[must_use]
    pub fn new(name: impl Into<String>, fact_type: impl Into<String>) -> Self {
        Self {
            unknown: Label::new(name, fact_type),
            conditions: Vec::new(),
        }
    }

    /// Path conditions of this match, in declaration order.
    pub fn path_conditions(&self) -> impl Iterator<Item = &PathCondition> {
        self.conditions.iter().filter_map(Condition::as_path)
    }

    /// Existential conditions of this match, in declaration order.
    pub fn existential_conditions(&self) -> impl Iterator<Item = &ExistentialCondition> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Existential(e) => Some(e),
            Condition::Path(_) => None,
        })
    }

    /// Unknown joined to `label` through `roles` from the unknown side.
    #[must_use]
    pub fn successor_of(mut self, label: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.conditions.push(Condition::Path(PathCondition::new(
            roles.into_iter().collect(),
            label,
            Vec::new(),
        )));
        self
    }

    /// Unknown reached from `label` by walking `roles` up from it.
    #[must_use]
    pub fn predecessor_of(mut self, label: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.conditions.push(Condition::Path(PathCondition::new(
            Vec::new(),
            label,
            roles.into_iter().collect(),
        )));
        self
    }

    /// Add a general path condition.
    #[must_use]
    pub fn join(mut self, condition: PathCondition) -> Self {
        self.conditions.push(Condition::Path(condition));
        self
    }

    /// Require the nested matches to produce a row.
    #[must_use]
    pub fn where_exists(mut self, matches: impl IntoIterator<Item = Match>) -> Self {
        self.conditions.push(Condition::Existential(ExistentialCondition {
            exists: true,
            matches: matches.into_iter().collect(),
        }));
        self
    }

    /// Require the nested matches to produce no row.
    #[must_use]
    pub fn where_no(mut self, matches: impl IntoIterator<Item = Match>) -> Self {
        self.conditions.push(Condition::Existential(ExistentialCondition {
            exists: false,
            matches: matches.into_iter().collect(),
        }));
        self
    }
}

/// A named component of a compound projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NamedProjection {
    pub name: String,
    pub projection: Projection,
}

/// The shape of query output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    /// The fact bound to a label.
    Simple { label: String },
    /// One field of the fact bound to a label.
    Field { label: String, field: String },
    /// The hash of the fact bound to a label.
    Hash { label: String },
    /// A record of named sub-projections. Empty means "no projection".
    Compound { components: Vec<NamedProjection> },
    /// A nested specification correlated to the enclosing labels.
    Collection {
        matches: Vec<Match>,
        projection: Box<Projection>,
    },
}

impl Projection {
    /// Project the fact bound to `label`.
    #[must_use]
    pub fn simple(label: impl Into<String>) -> Self {
        Self::Simple { label: label.into() }
    }

    /// Project one field of `label`.
    #[must_use]
    pub fn field(label: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Field {
            label: label.into(),
            field: field.into(),
        }
    }

    /// Project the hash of `label`.
    #[must_use]
    pub fn hash(label: impl Into<String>) -> Self {
        Self::Hash { label: label.into() }
    }

    /// A record of named components.
    #[must_use]
    pub fn compound<S: Into<String>>(components: impl IntoIterator<Item = (S, Projection)>) -> Self {
        Self::Compound {
            components: components
                .into_iter()
                .map(|(name, projection)| NamedProjection {
                    name: name.into(),
                    projection,
                })
                .collect(),
        }
    }

    /// A nested collection projected per row.
    #[must_use]
    pub fn collection(matches: Vec<Match>, projection: Projection) -> Self {
        Self::Collection {
            matches,
            projection: Box::new(projection),
        }
    }

    /// The empty projection.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Compound {
            components: Vec::new(),
        }
    }

    /// True for the empty projection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Compound { components } if components.is_empty())
    }

    /// Named collections directly inside this projection.
    pub fn collections(&self) -> impl Iterator<Item = (&str, &[Match], &Projection)> {
        let components: &[NamedProjection] = match self {
            Self::Compound { components } => components,
            _ => &[],
        };
        components.iter().filter_map(|c| match &c.projection {
            Self::Collection { matches, projection } => {
                Some((c.name.as_str(), matches.as_slice(), projection.as_ref()))
            }
            _ => None,
        })
    }
}

/// A declarative query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specification {
    /// Inputs, bound by the caller.
    pub given: Vec<Label>,
    /// Unknowns, bound in order.
    pub matches: Vec<Match>,
    /// What each row produces.
    pub projection: Projection,
}

impl Specification {
    /// Create and validate a specification.
    pub fn new(
        given: Vec<Label>,
        matches: Vec<Match>,
        projection: Projection,
    ) -> Result<Self, SpecificationError> {
        let spec = Self {
            given,
            matches,
            projection,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse the descriptive text form.
    pub fn parse(text: &str) -> Result<Self, SpecificationError> {
        parse_specification(text)
    }

    /// Check structural well-formedness.
    pub fn validate(&self) -> Result<(), SpecificationError> {
        validation::validate_specification(self)
    }

    /// Given labels followed by top-level match labels.
    #[must_use]
    pub fn result_labels(&self) -> Vec<String> {
        self.given
            .iter()
            .map(|g| g.name.clone())
            .chain(self.matches.iter().map(|m| m.unknown.name.clone()))
            .collect()
    }

    /// Given types in order.
    #[must_use]
    pub fn given_types(&self) -> Vec<&str> {
        self.given.iter().map(|g| g.fact_type.as_str()).collect()
    }

    /// Every match, including those nested in existential conditions and collections.
    #[must_use]
    pub fn all_matches(&self) -> Vec<&Match> {
        let mut out = Vec::new();
        collect_matches(&self.matches, &mut out);
        collect_projection_matches(&self.projection, &mut out);
        out
    }

    /// Rename labels throughout the specification.
    #[must_use]
    pub fn apply(&self, renames: &HashMap<String, String>) -> Self {
        Self {
            given: self.given.iter().map(|l| rename_label(l, renames)).collect(),
            matches: apply_matches(&self.matches, renames),
            projection: apply_projection(&self.projection, renames),
        }
    }

    /// Embed this specification as a collection inside a larger one.
    ///
    /// Each given is renamed to the corresponding enclosing label; the
    /// matches and projection become a [`Projection::Collection`].
    pub fn as_collection(&self, enclosing: &[&str]) -> Result<Projection, SpecificationError> {
        if enclosing.len() != self.given.len() {
            return Err(SpecificationError::InvalidProjection {
                reason: format!(
                    "collection expects {} enclosing labels, received {}",
                    self.given.len(),
                    enclosing.len()
                ),
            });
        }
        let renames: HashMap<String, String> = self
            .given
            .iter()
            .zip(enclosing)
            .map(|(g, e)| (g.name.clone(), (*e).to_string()))
            .collect();
        let renamed = self.apply(&renames);
        Ok(Projection::collection(renamed.matches, renamed.projection))
    }
}

fn collect_matches<'a>(matches: &'a [Match], out: &mut Vec<&'a Match>) {
    for m in matches {
        out.push(m);
        for e in m.existential_conditions() {
            collect_matches(&e.matches, out);
        }
    }
}

fn collect_projection_matches<'a>(projection: &'a Projection, out: &mut Vec<&'a Match>) {
    for (_, matches, inner) in projection.collections() {
        collect_matches(matches, out);
        collect_projection_matches(inner, out);
    }
}

fn rename(name: &str, renames: &HashMap<String, String>) -> String {
    renames.get(name).cloned().unwrap_or_else(|| name.to_string())
}

fn rename_label(label: &Label, renames: &HashMap<String, String>) -> Label {
    Label::new(rename(&label.name, renames), label.fact_type.clone())
}

pub(crate) fn apply_matches(matches: &[Match], renames: &HashMap<String, String>) -> Vec<Match> {
    matches
        .iter()
        .map(|m| Match {
            unknown: rename_label(&m.unknown, renames),
            conditions: m
                .conditions
                .iter()
                .map(|c| match c {
                    Condition::Path(p) => Condition::Path(PathCondition {
                        roles_left: p.roles_left.clone(),
                        label_right: rename(&p.label_right, renames),
                        roles_right: p.roles_right.clone(),
                    }),
                    Condition::Existential(e) => Condition::Existential(ExistentialCondition {
                        exists: e.exists,
                        matches: apply_matches(&e.matches, renames),
                    }),
                })
                .collect(),
        })
        .collect()
}

fn apply_projection(projection: &Projection, renames: &HashMap<String, String>) -> Projection {
    match projection {
        Projection::Simple { label } => Projection::simple(rename(label, renames)),
        Projection::Field { label, field } => Projection::field(rename(label, renames), field.clone()),
        Projection::Hash { label } => Projection::hash(rename(label, renames)),
        Projection::Compound { components } => Projection::Compound {
            components: components
                .iter()
                .map(|c| NamedProjection {
                    name: c.name.clone(),
                    projection: apply_projection(&c.projection, renames),
                })
                .collect(),
        },
        Projection::Collection { matches, projection } => Projection::Collection {
            matches: apply_matches(matches, renames),
            projection: Box::new(apply_projection(projection, renames)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offices() -> Specification {
        Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                ]
            } => office",
        )
        .unwrap()
    }

    #[test]
    fn test_result_labels() {
        assert_eq!(offices().result_labels(), vec!["company", "office"]);
    }

    #[test]
    fn test_apply_renames_everywhere() {
        let renames: HashMap<String, String> =
            [("company".to_string(), "c".to_string())].into_iter().collect();
        let renamed = offices().apply(&renames);
        assert_eq!(renamed.given[0].name, "c");
        assert_eq!(
            renamed.matches[0].path_conditions().next().unwrap().label_right,
            "c"
        );
    }

    #[test]
    fn test_as_collection_renames_given() {
        let projection = offices().as_collection(&["parent"]).unwrap();
        let Projection::Collection { matches, projection } = projection else {
            panic!("expected collection");
        };
        assert_eq!(matches[0].path_conditions().next().unwrap().label_right, "parent");
        assert_eq!(*projection, Projection::simple("office"));
    }

    #[test]
    fn test_as_collection_arity() {
        assert!(offices().as_collection(&[]).is_err());
    }

    #[test]
    fn test_all_matches_includes_nested() {
        let spec = Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                    !E {
                        closure: Office.Closure [
                            closure->office: Office = office
                        ]
                    }
                ]
            } => {
                managers = {
                    manager: Manager [
                        manager->office: Office = office
                    ]
                } => manager
            }",
        )
        .unwrap();
        let names: Vec<&str> = spec.all_matches().iter().map(|m| m.unknown.name.as_str()).collect();
        assert_eq!(names, vec!["office", "closure", "manager"]);
    }
}
