//! Canonical indented text rendering.
//!
//! The descriptive form is used for feed identity hashing, logging, and
//! fixture-based tests. [`super::parse_specification`] accepts exactly this
//! form, so rendering then parsing yields the same specification.

use std::fmt::{self, Write as _};

use super::{Condition, ExistentialCondition, Label, Match, PathCondition, Projection, Role, Specification};

const INDENT: &str = "    ";

fn indent(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn describe_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| format!("->{}: {}", r.name, r.predecessor_type))
        .collect()
}

pub(crate) fn describe_path_condition(condition: &PathCondition, unknown: &str, depth: usize) -> String {
    format!(
        "{}{}{} = {}{}\n",
        indent(depth),
        unknown,
        describe_roles(&condition.roles_left),
        condition.label_right,
        describe_roles(&condition.roles_right)
    )
}

pub(crate) fn describe_existential(condition: &ExistentialCondition, depth: usize) -> String {
    let op = if condition.exists { "" } else { "!" };
    format!(
        "{}{}E {{\n{}{}}}\n",
        indent(depth),
        op,
        describe_matches(&condition.matches, depth + 1),
        indent(depth)
    )
}

pub(crate) fn describe_match(m: &Match, depth: usize) -> String {
    let conditions: String = m
        .conditions
        .iter()
        .map(|c| match c {
            Condition::Path(p) => describe_path_condition(p, &m.unknown.name, depth + 1),
            Condition::Existential(e) => describe_existential(e, depth + 1),
        })
        .collect();
    format!(
        "{}{}: {} [\n{}{}]\n",
        indent(depth),
        m.unknown.name,
        m.unknown.fact_type,
        conditions,
        indent(depth)
    )
}

pub(crate) fn describe_matches(matches: &[Match], depth: usize) -> String {
    matches.iter().map(|m| describe_match(m, depth)).collect()
}

pub(crate) fn describe_projection(projection: &Projection, depth: usize) -> String {
    match projection {
        Projection::Simple { label } => label.clone(),
        Projection::Field { label, field } => format!("{label}.{field}"),
        Projection::Hash { label } => format!("#{label}"),
        Projection::Compound { components } => {
            let mut out = String::from("{\n");
            for c in components {
                let _ = writeln!(
                    out,
                    "{}{} = {}",
                    indent(depth + 1),
                    c.name,
                    describe_projection(&c.projection, depth + 1)
                );
            }
            out.push_str(&indent(depth));
            out.push('}');
            out
        }
        Projection::Collection { matches, projection } => {
            let mut out = format!("{{\n{}{}}}", describe_matches(matches, depth + 1), indent(depth));
            if !projection.is_empty() {
                out.push_str(" => ");
                out.push_str(&describe_projection(projection, depth));
            }
            out
        }
    }
}

fn describe_given(given: &[Label]) -> String {
    given
        .iter()
        .map(|g| format!("{}: {}", g.name, g.fact_type))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a specification at the given depth.
pub(crate) fn describe_specification(spec: &Specification, depth: usize) -> String {
    let mut out = format!(
        "{}({}) {{\n{}{}}}",
        indent(depth),
        describe_given(&spec.given),
        describe_matches(&spec.matches, depth + 1),
        indent(depth)
    );
    if !spec.projection.is_empty() {
        out.push_str(" => ");
        out.push_str(&describe_projection(&spec.projection, depth));
    }
    out.push('\n');
    out
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_specification(self, 0))
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_match(self, 0))
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_projection(self, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::{Match, Role};

    #[test]
    fn test_describe_with_negative_existential() {
        let spec = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("office", "Office")
                .successor_of("company", [Role::new("company", "Company")])
                .where_no([Match::new("closure", "Office.Closure")
                    .successor_of("office", [Role::new("office", "Office")])])],
            Projection::simple("office"),
        )
        .unwrap();

        let expected = "\
(company: Company) {
    office: Office [
        office->company: Company = company
        !E {
            closure: Office.Closure [
                closure->office: Office = office
            ]
        }
    ]
} => office
";
        assert_eq!(spec.to_string(), expected);
    }

    #[test]
    fn test_describe_compound_with_collection() {
        let spec = Specification::new(
            vec![Label::new("company", "Company")],
            vec![Match::new("office", "Office")
                .successor_of("company", [Role::new("company", "Company")])],
            Projection::compound([
                ("city", Projection::field("office", "city")),
                ("id", Projection::hash("office")),
                (
                    "managers",
                    Projection::collection(
                        vec![Match::new("manager", "Manager")
                            .successor_of("office", [Role::new("office", "Office")])],
                        Projection::simple("manager"),
                    ),
                ),
            ]),
        )
        .unwrap();

        let expected = "\
(company: Company) {
    office: Office [
        office->company: Company = company
    ]
} => {
    city = office.city
    id = #office
    managers = {
        manager: Manager [
            manager->office: Office = office
        ]
    } => manager
}
";
        assert_eq!(spec.to_string(), expected);
    }

    #[test]
    fn test_describe_empty_projection_omits_arrow() {
        let spec = Specification::new(
            vec![Label::new("office", "Office")],
            vec![Match::new("closure", "Office.Closure")
                .successor_of("office", [Role::new("office", "Office")])],
            Projection::empty(),
        )
        .unwrap();
        assert!(spec.to_string().ends_with("}\n"));
        assert!(!spec.to_string().contains("=>"));
    }
}
