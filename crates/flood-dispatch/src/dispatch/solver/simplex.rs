use super::{LinearProgram, LinearSolver, Relation, Solution, SolverError};

const EPS: f64 = 1e-9;
const FEASIBILITY_TOLERANCE: f64 = 1e-7;
const DEFAULT_MAX_ITERATIONS: usize = 50_000;

/// Two-phase tableau simplex with Bland's rule.
///
/// Dense storage keeps it simple; it is sized for dispatch problems with a
/// few hundred variables, not for general-purpose LP work.
#[derive(Debug, Clone)]
pub struct DenseSimplex {
    max_iterations: usize,
}

impl DenseSimplex {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }
}

impl Default for DenseSimplex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl LinearSolver for DenseSimplex {
    fn solve(&self, program: &LinearProgram) -> Result<Solution, SolverError> {
        let mut tableau = Tableau::build(program)?;
        let mut iterations = 0;

        if tableau.artificial_count > 0 {
            let phase_one: Vec<f64> = (0..tableau.width)
                .map(|col| if col >= tableau.artificial_start { -1.0 } else { 0.0 })
                .collect();
            tableau.optimize(
                &phase_one,
                tableau.width,
                self.max_iterations,
                &mut iterations,
            )?;

            let infeasibility: f64 = tableau
                .basis
                .iter()
                .zip(tableau.rhs.iter())
                .filter(|(col, _)| **col >= tableau.artificial_start)
                .map(|(_, value)| *value)
                .sum();
            if infeasibility > FEASIBILITY_TOLERANCE {
                return Err(SolverError::Infeasible);
            }
            tableau.evict_artificials();
        }

        let mut phase_two = vec![0.0; tableau.width];
        for (col, coefficient) in program.objective.iter().enumerate() {
            phase_two[col] = *coefficient;
        }
        let allowed = tableau.artificial_start;
        tableau.optimize(&phase_two, allowed, self.max_iterations, &mut iterations)?;

        let mut values = vec![0.0; program.variables];
        for (row, col) in tableau.basis.iter().enumerate() {
            if *col < program.variables {
                values[*col] = tableau.rhs[row].max(0.0);
            }
        }
        let objective = values
            .iter()
            .zip(program.objective.iter())
            .map(|(value, coefficient)| value * coefficient)
            .sum();

        Ok(Solution { values, objective })
    }
}

struct Tableau {
    rows: Vec<Vec<f64>>,
    rhs: Vec<f64>,
    basis: Vec<usize>,
    width: usize,
    artificial_start: usize,
    artificial_count: usize,
}

impl Tableau {
    fn build(program: &LinearProgram) -> Result<Self, SolverError> {
        let variables = program.variables;
        let mut normalized = Vec::with_capacity(program.constraints.len());

        for constraint in &program.constraints {
            let mut coefficients = vec![0.0; variables];
            for (index, value) in &constraint.terms {
                if *index >= variables {
                    return Err(SolverError::MalformedProgram {
                        index: *index,
                        variables,
                    });
                }
                coefficients[*index] += value;
            }

            let (relation, rhs) = if constraint.rhs < 0.0 {
                coefficients.iter_mut().for_each(|value| *value = -*value);
                let flipped = match constraint.relation {
                    Relation::LessOrEqual => Relation::GreaterOrEqual,
                    Relation::GreaterOrEqual => Relation::LessOrEqual,
                    Relation::Equal => Relation::Equal,
                };
                (flipped, -constraint.rhs)
            } else {
                (constraint.relation, constraint.rhs)
            };
            normalized.push((coefficients, relation, rhs));
        }

        let slack_count = normalized
            .iter()
            .filter(|(_, relation, _)| *relation != Relation::Equal)
            .count();
        let artificial_count = normalized
            .iter()
            .filter(|(_, relation, _)| *relation != Relation::LessOrEqual)
            .count();
        let artificial_start = variables + slack_count;
        let width = artificial_start + artificial_count;

        let mut rows = Vec::with_capacity(normalized.len());
        let mut rhs = Vec::with_capacity(normalized.len());
        let mut basis = Vec::with_capacity(normalized.len());
        let mut next_slack = variables;
        let mut next_artificial = artificial_start;

        for (coefficients, relation, value) in normalized {
            let mut row = vec![0.0; width];
            row[..variables].copy_from_slice(&coefficients);
            match relation {
                Relation::LessOrEqual => {
                    row[next_slack] = 1.0;
                    basis.push(next_slack);
                    next_slack += 1;
                }
                Relation::GreaterOrEqual => {
                    row[next_slack] = -1.0;
                    next_slack += 1;
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
                Relation::Equal => {
                    row[next_artificial] = 1.0;
                    basis.push(next_artificial);
                    next_artificial += 1;
                }
            }
            rows.push(row);
            rhs.push(value);
        }

        Ok(Self {
            rows,
            rhs,
            basis,
            width,
            artificial_start,
            artificial_count,
        })
    }

    /// Maximise `cost · x` over columns `< allowed`, starting from the current basis.
    fn optimize(
        &mut self,
        cost: &[f64],
        allowed: usize,
        max_iterations: usize,
        iterations: &mut usize,
    ) -> Result<(), SolverError> {
        loop {
            let Some(entering) = self.entering_column(cost, allowed) else {
                return Ok(());
            };
            let Some(leaving) = self.leaving_row(entering) else {
                return Err(SolverError::Unbounded);
            };
            if *iterations >= max_iterations {
                return Err(SolverError::IterationLimit(max_iterations));
            }
            self.pivot(leaving, entering);
            *iterations += 1;
        }
    }

    /// Bland's rule: lowest-index column with a positive reduced cost.
    fn entering_column(&self, cost: &[f64], allowed: usize) -> Option<usize> {
        (0..allowed).find(|col| {
            if self.basis.contains(col) {
                return false;
            }
            let basic_cost: f64 = self
                .rows
                .iter()
                .zip(self.basis.iter())
                .map(|(row, basic)| cost[*basic] * row[*col])
                .sum();
            cost[*col] - basic_cost > EPS
        })
    }

    /// Minimum-ratio test, ties broken by the lowest basic column index.
    fn leaving_row(&self, entering: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (row_index, row) in self.rows.iter().enumerate() {
            let coefficient = row[entering];
            if coefficient <= EPS {
                continue;
            }
            let ratio = self.rhs[row_index] / coefficient;
            best = match best {
                None => Some((row_index, ratio)),
                Some((current, current_ratio)) => {
                    if ratio < current_ratio - EPS
                        || ((ratio - current_ratio).abs() <= EPS
                            && self.basis[row_index] < self.basis[current])
                    {
                        Some((row_index, ratio))
                    } else {
                        Some((current, current_ratio))
                    }
                }
            };
        }
        best.map(|(row_index, _)| row_index)
    }

    fn pivot(&mut self, pivot_row: usize, pivot_col: usize) {
        let divisor = self.rows[pivot_row][pivot_col];
        for value in self.rows[pivot_row].iter_mut() {
            *value /= divisor;
        }
        self.rhs[pivot_row] /= divisor;

        let pivot_values = self.rows[pivot_row].clone();
        let pivot_rhs = self.rhs[pivot_row];

        for (row_index, row) in self.rows.iter_mut().enumerate() {
            if row_index == pivot_row {
                continue;
            }
            let factor = row[pivot_col];
            if factor.abs() <= EPS {
                row[pivot_col] = 0.0;
                continue;
            }
            for (value, pivot_value) in row.iter_mut().zip(pivot_values.iter()) {
                *value -= factor * pivot_value;
                if value.abs() < 1e-12 {
                    *value = 0.0;
                }
            }
            self.rhs[row_index] -= factor * pivot_rhs;
            if self.rhs[row_index].abs() < 1e-12 {
                self.rhs[row_index] = 0.0;
            }
        }

        self.basis[pivot_row] = pivot_col;
    }

    /// After phase one, swap zero-valued artificials out of the basis where possible.
    fn evict_artificials(&mut self) {
        for row_index in 0..self.rows.len() {
            if self.basis[row_index] < self.artificial_start {
                continue;
            }
            let replacement = (0..self.artificial_start)
                .find(|col| self.rows[row_index][*col].abs() > EPS && !self.basis.contains(col));
            if let Some(col) = replacement {
                self.pivot(row_index, col);
            }
        }
    }
}
