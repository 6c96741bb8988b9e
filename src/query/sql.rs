//! SQL text generation for compiled plans.
//!
//! The target is a PostgreSQL-shaped schema with two tables:
//! `fact(fact_id, fact_type_id, hash, data)` and
//! `edge(predecessor_fact_id, successor_fact_id, role_id)`.

use std::collections::BTreeSet;

use serde::Serialize;

use super::description::{
    plan_joins, ExistentialConditionDescription, InputDescription, JoinStep, OutputDescription,
    QueryDescription, QueryParameter,
};

/// Query text with its positional parameters and output labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlQuery {
    /// The query text, with `$n` placeholders.
    pub sql: String,
    /// Values for the placeholders, in `$n` order.
    pub parameters: Vec<QueryParameter>,
    /// The vertex each output column pair belongs to.
    pub labels: Vec<OutputDescription>,
}

/// Generate SQL for a plan. Unsatisfiable plans have no SQL.
#[must_use]
pub fn generate_sql(description: &QueryDescription, schema: &str) -> Option<SqlQuery> {
    let root = description.root_fact_index()?;
    let mut written = BTreeSet::from([root]);
    let steps = plan_joins(&description.edges, &description.inputs, &mut written);
    let joins: String = steps.iter().map(|step| join_clause(step, schema)).collect();

    let columns = if description.outputs.is_empty() {
        "1 AS present".to_string()
    } else {
        description
            .outputs
            .iter()
            .map(|o| {
                let i = o.fact_index;
                format!("f{i}.hash as hash{i}, f{i}.fact_id as id{i}, f{i}.data as data{i}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    let inputs = description
        .inputs
        .iter()
        .map(input_clause)
        .collect::<Vec<_>>()
        .join(" AND ");
    let existentials: String = description
        .existential_conditions
        .iter()
        .map(|c| format!(" AND {}", existential_clause(c, &written, schema)))
        .collect();
    let order = if description.outputs.is_empty() {
        String::new()
    } else {
        let keys = description
            .outputs
            .iter()
            .map(|o| format!("f{}.fact_id ASC", o.fact_index))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {keys}")
    };

    Some(SqlQuery {
        sql: format!("SELECT {columns} FROM {schema}.fact f{root}{joins} WHERE {inputs}{existentials}{order}"),
        parameters: description.parameters.clone(),
        labels: description.outputs.clone(),
    })
}

fn input_clause(input: &InputDescription) -> String {
    let i = input.fact_index;
    format!(
        "f{i}.fact_type_id = ${} AND f{i}.hash = ${}",
        input.fact_type_parameter, input.fact_hash_parameter
    )
}

fn join_clause(step: &JoinStep<'_>, schema: &str) -> String {
    match step {
        JoinStep::Successor(e) => format!(
            " JOIN {schema}.edge e{n} ON e{n}.predecessor_fact_id = f{p}.fact_id AND e{n}.role_id = ${r} \
             JOIN {schema}.fact f{s} ON f{s}.fact_id = e{n}.successor_fact_id",
            n = e.edge_index,
            p = e.predecessor_fact_index,
            s = e.successor_fact_index,
            r = e.role_parameter
        ),
        JoinStep::Predecessor(e) => format!(
            " JOIN {schema}.edge e{n} ON e{n}.successor_fact_id = f{s}.fact_id AND e{n}.role_id = ${r} \
             JOIN {schema}.fact f{p} ON f{p}.fact_id = e{n}.predecessor_fact_id",
            n = e.edge_index,
            p = e.predecessor_fact_index,
            s = e.successor_fact_index,
            r = e.role_parameter
        ),
        JoinStep::Closing(e) => format!(
            " JOIN {schema}.edge e{n} ON e{n}.predecessor_fact_id = f{p}.fact_id \
             AND e{n}.successor_fact_id = f{s}.fact_id AND e{n}.role_id = ${r}",
            n = e.edge_index,
            p = e.predecessor_fact_index,
            s = e.successor_fact_index,
            r = e.role_parameter
        ),
        JoinStep::Cross(f) => format!(" CROSS JOIN {schema}.fact f{f}"),
    }
}

/// The first step of a correlated subquery becomes its FROM clause, and its
/// join to the outer vertex moves into the WHERE clause.
fn first_clause(step: &JoinStep<'_>, schema: &str) -> (String, Option<String>) {
    match step {
        JoinStep::Successor(e) => (
            format!(
                "{schema}.edge e{n} JOIN {schema}.fact f{s} ON f{s}.fact_id = e{n}.successor_fact_id",
                n = e.edge_index,
                s = e.successor_fact_index
            ),
            Some(format!(
                "e{n}.predecessor_fact_id = f{p}.fact_id AND e{n}.role_id = ${r}",
                n = e.edge_index,
                p = e.predecessor_fact_index,
                r = e.role_parameter
            )),
        ),
        JoinStep::Predecessor(e) => (
            format!(
                "{schema}.edge e{n} JOIN {schema}.fact f{p} ON f{p}.fact_id = e{n}.predecessor_fact_id",
                n = e.edge_index,
                p = e.predecessor_fact_index
            ),
            Some(format!(
                "e{n}.successor_fact_id = f{s}.fact_id AND e{n}.role_id = ${r}",
                n = e.edge_index,
                s = e.successor_fact_index,
                r = e.role_parameter
            )),
        ),
        JoinStep::Closing(e) => (
            format!("{schema}.edge e{n}", n = e.edge_index),
            Some(format!(
                "e{n}.predecessor_fact_id = f{p}.fact_id AND e{n}.successor_fact_id = f{s}.fact_id AND e{n}.role_id = ${r}",
                n = e.edge_index,
                p = e.predecessor_fact_index,
                s = e.successor_fact_index,
                r = e.role_parameter
            )),
        ),
        JoinStep::Cross(f) => (format!("{schema}.fact f{f}"), None),
    }
}

fn existential_clause(
    condition: &ExistentialConditionDescription,
    outer: &BTreeSet<usize>,
    schema: &str,
) -> String {
    let mut written = outer.clone();
    let steps = plan_joins(&condition.edges, &condition.inputs, &mut written);

    let mut clauses = Vec::new();
    let mut from = String::new();
    if let Some((first, rest)) = steps.split_first() {
        let (table, correlation) = first_clause(first, schema);
        from = format!(" FROM {table}");
        from.extend(rest.iter().map(|step| join_clause(step, schema)));
        clauses.extend(correlation);
    }
    clauses.extend(condition.inputs.iter().map(input_clause));
    clauses.extend(
        condition
            .existential_conditions
            .iter()
            .map(|c| existential_clause(c, &written, schema)),
    );
    let filter = if clauses.is_empty() {
        "TRUE".to_string()
    } else {
        clauses.join(" AND ")
    };
    let keyword = if condition.exists { "EXISTS" } else { "NOT EXISTS" };
    format!("{keyword} (SELECT 1{from} WHERE {filter})")
}
