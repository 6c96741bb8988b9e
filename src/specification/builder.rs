//! Combinator front end for building specifications in Rust code.
//!
//! ```
//! use kyrofact::specification::{Match, Projection, Role, SpecificationBuilder};
//!
//! let spec = SpecificationBuilder::new()
//!     .given("company", "Company")
//!     .matching(
//!         Match::new("office", "Office")
//!             .successor_of("company", [Role::new("company", "Company")])
//!             .where_no([Match::new("closure", "Office.Closure")
//!                 .successor_of("office", [Role::new("office", "Office")])]),
//!     )
//!     .select(Projection::simple("office"))
//!     .unwrap();
//!
//! assert_eq!(spec.matches.len(), 1);
//! ```

use crate::error::SpecificationError;

use super::{Label, Match, Projection, Specification};

/// Fluent builder for [`Specification`].
#[derive(Debug, Clone, Default)]
pub struct SpecificationBuilder {
    given: Vec<Label>,
    matches: Vec<Match>,
}

impl SpecificationBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a labeled input.
    #[must_use]
    pub fn given(mut self, name: impl Into<String>, fact_type: impl Into<String>) -> Self {
        self.given.push(Label::new(name, fact_type));
        self
    }

    /// Append a match.
    #[must_use]
    pub fn matching(mut self, m: Match) -> Self {
        self.matches.push(m);
        self
    }

    /// Finish with a projection, validating the result.
    pub fn select(self, projection: Projection) -> Result<Specification, SpecificationError> {
        Specification::new(self.given, self.matches, projection)
    }

    /// Finish projecting the fact bound to the last match (or the last given).
    pub fn select_last(self) -> Result<Specification, SpecificationError> {
        let label = self
            .matches
            .last()
            .map(|m| m.unknown.name.clone())
            .or_else(|| self.given.last().map(|g| g.name.clone()))
            .ok_or_else(|| SpecificationError::InvalidProjection {
                reason: "specification has no labels to project".to_string(),
            })?;
        self.select(Projection::simple(label))
    }

    /// Finish without a projection.
    pub fn build(self) -> Result<Specification, SpecificationError> {
        self.select(Projection::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::Role;

    #[test]
    fn test_builder_matches_parser() {
        let built = SpecificationBuilder::new()
            .given("company", "Company")
            .matching(Match::new("office", "Office").successor_of("company", [Role::new("company", "Company")]))
            .select_last()
            .unwrap();
        let parsed = Specification::parse(
            "(company: Company) { office: Office [ office->company: Company = company ] } => office",
        )
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn test_select_last_without_labels_fails() {
        assert!(SpecificationBuilder::new().select_last().is_err());
    }
}
