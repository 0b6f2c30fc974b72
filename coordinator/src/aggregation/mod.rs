//! Aggregation of per-worker partial results
//!
//! Combinators consume pending responses in canonical range order, wait for
//! all of them, and fold the partials into the final value.

mod combinators;
mod operator;

pub use combinators::{
    agg_add, agg_matrix, agg_mean, agg_min_max, agg_scalar, agg_var, bind, get_results,
    merge_moments, wait_for,
};
pub use operator::{AggregateFunction, AggregateUnaryOperator, Direction};
