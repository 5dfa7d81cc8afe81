//! Narrow linear-programming interface used by the fairness optimizer.
//!
//! Callers describe a maximisation problem over non-negative variables as an
//! objective vector plus constraint rows; an implementation returns either a
//! variable assignment or a typed failure. Nothing else in the pipeline
//! depends on how the program is solved.

mod simplex;

pub use simplex::DenseSimplex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Relation {
    LessOrEqual,
    GreaterOrEqual,
    Equal,
}

/// Sparse constraint row: `Σ coefficient·x[index] (relation) rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub terms: Vec<(usize, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

impl Constraint {
    pub fn le(terms: Vec<(usize, f64)>, rhs: f64) -> Self {
        Self {
            terms,
            relation: Relation::LessOrEqual,
            rhs,
        }
    }

    pub fn ge(terms: Vec<(usize, f64)>, rhs: f64) -> Self {
        Self {
            terms,
            relation: Relation::GreaterOrEqual,
            rhs,
        }
    }
}

/// Maximise `objective · x` subject to `constraints`, with `x ≥ 0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearProgram {
    pub variables: usize,
    pub objective: Vec<f64>,
    pub constraints: Vec<Constraint>,
}

impl LinearProgram {
    pub fn new(variables: usize) -> Self {
        Self {
            variables,
            objective: vec![0.0; variables],
            constraints: Vec::new(),
        }
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub values: Vec<f64>,
    pub objective: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    #[error("no feasible point satisfies the constraints")]
    Infeasible,
    #[error("objective is unbounded")]
    Unbounded,
    #[error("pivot limit of {0} iterations reached")]
    IterationLimit(usize),
    #[error("constraint references variable {index} of {variables}")]
    MalformedProgram { index: usize, variables: usize },
}

pub trait LinearSolver: Send + Sync {
    fn solve(&self, program: &LinearProgram) -> Result<Solution, SolverError>;
}
