//! The query compiler.
//!
//! [`ResultDescriptionBuilder`] binds a [`Specification`](crate::specification::Specification)
//! to a tuple of given facts and produces a [`ResultDescription`]: a join
//! plan per result level. [`generate_sql`] renders a plan as SQL text;
//! the in-memory store executes plans directly in the same join order.

mod builder;
mod description;
mod schema;
mod sql;

pub use builder::{ResultDescription, ResultDescriptionBuilder};
pub use description::{
    plan_joins, EdgeDescription, ExistentialConditionDescription, FactDescription, InputDescription,
    JoinStep, OutputDescription, QueryDescription, QueryParameter,
};
pub use schema::{Schema, SchemaMap};
pub use sql::{generate_sql, SqlQuery};
