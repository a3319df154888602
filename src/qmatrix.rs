use ndarray::{Array1, Array2};

use crate::error::{ModelError, Result};
use crate::pattern::{pattern_index, pattern_len};

/// Generator of the joint coalescent/mutation process on `(n, r)` states.
///
/// `u` is the per-lineage red→green rate, `v` the green→red rate and `theta`
/// the scaled population size of the branch. The action on a vector of
/// partial likelihoods `F` is
///
/// ```text
/// (QF)(n,r) = -(n(n-1)/θ + r u + (n-r) v) F(n,r)
///             + r u F(n,r-1) + (n-r) v F(n,r+1)
///             + (n+1)/θ (r F(n+1,r+1) + (n-r) F(n+1,r))
/// ```
#[derive(Debug, Clone, Copy)]
pub struct QMatrix {
    allele_count: u32,
    u: f64,
    v: f64,
    theta: f64,
}

impl QMatrix {
    pub fn new(allele_count: u32, u: f64, v: f64, theta: f64) -> Self {
        Self {
            allele_count,
            u,
            v,
            theta,
        }
    }

    pub fn dim(&self) -> usize {
        pattern_len(self.allele_count)
    }

    fn diagonal(&self, n: u32, r: u32) -> f64 {
        let nf = n as f64;
        let rf = r as f64;
        -(nf * (nf - 1.0) / self.theta + rf * self.u + (nf - rf) * self.v)
    }

    /// `y = Q x`.
    pub fn multiply(&self, x: &[f64], y: &mut [f64]) {
        let big_n = self.allele_count;
        for n in 1..=big_n {
            let nf = n as f64;
            for r in 0..=n {
                let rf = r as f64;
                let mut acc = self.diagonal(n, r) * x[pattern_index(n, r)];
                if r > 0 {
                    acc += rf * self.u * x[pattern_index(n, r - 1)];
                }
                if r < n {
                    acc += (nf - rf) * self.v * x[pattern_index(n, r + 1)];
                }
                if n < big_n {
                    let c = (nf + 1.0) / self.theta;
                    acc += c
                        * (rf * x[pattern_index(n + 1, r + 1)]
                            + (nf - rf) * x[pattern_index(n + 1, r)]);
                }
                y[pattern_index(n, r)] = acc;
            }
        }
    }

    /// Maximum absolute column sum.
    pub fn one_norm(&self) -> f64 {
        let big_n = self.allele_count;
        let mut cols = vec![0.0f64; self.dim()];
        for n in 1..=big_n {
            let nf = n as f64;
            for r in 0..=n {
                let rf = r as f64;
                cols[pattern_index(n, r)] += self.diagonal(n, r).abs();
                if r > 0 {
                    cols[pattern_index(n, r - 1)] += rf * self.u;
                }
                if r < n {
                    cols[pattern_index(n, r + 1)] += (nf - rf) * self.v;
                }
                if n < big_n {
                    let c = (nf + 1.0) / self.theta;
                    cols[pattern_index(n + 1, r + 1)] += c * rf;
                    cols[pattern_index(n + 1, r)] += c * (nf - rf);
                }
            }
        }
        cols.into_iter().fold(0.0, f64::max)
    }

    /// Within-level block `A_n[r][r']` of Q for lineage count `n`.
    fn level_block(&self, n: u32) -> Array2<f64> {
        let size = (n + 1) as usize;
        let nf = n as f64;
        let mut a = Array2::zeros((size, size));
        for r in 0..=n {
            let ri = r as usize;
            let rf = r as f64;
            a[(ri, ri)] = self.diagonal(n, r);
            if r > 0 {
                a[(ri, ri - 1)] = rf * self.u;
            }
            if r < n {
                a[(ri, ri + 1)] = (nf - rf) * self.v;
            }
        }
        a
    }

    /// Left null vector `π` with `πᵀ Q = 0`, scaled so the `n = 1` entries
    /// sum to one. Indexed like a pattern matrix.
    pub fn find_orthogonal_vector(&self) -> Result<Vec<f64>> {
        let big_n = self.allele_count;
        let mut x = vec![0.0f64; self.dim()];
        if big_n == 0 {
            return Ok(x);
        }
        let total = self.u + self.v;
        if !(total > 0.0) {
            return Err(ModelError::numerical("mutation rates sum to zero"));
        }
        x[pattern_index(1, 0)] = self.u / total;
        x[pattern_index(1, 1)] = self.v / total;

        for n in 2..=big_n {
            // Column (n, r) of πᵀQ: Σ_r' π(n, r') A_n[r'][r] + coalescent
            // inflow from level n-1 must vanish.
            let size = (n + 1) as usize;
            let a = self.level_block(n);
            let prev = n - 1;
            let c = nf(n) / self.theta;
            let mut rhs = Array1::<f64>::zeros(size);
            for r in 0..=prev {
                let p = x[pattern_index(prev, r)];
                rhs[(r + 1) as usize] -= c * r as f64 * p;
                rhs[r as usize] -= c * (nf(prev) - r as f64) * p;
            }
            let level = solve(a.t().to_owned(), rhs)?;
            for r in 0..=n {
                x[pattern_index(n, r)] = level[r as usize];
            }
        }
        Ok(x)
    }
}

fn nf(n: u32) -> f64 {
    n as f64
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        let mut best = a[(col, col)].abs();
        for row in (col + 1)..n {
            let v = a[(row, col)].abs();
            if v > best {
                best = v;
                pivot = row;
            }
        }
        if best == 0.0 || !best.is_finite() {
            return Err(ModelError::numerical(
                "singular level block while solving for root probabilities",
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap((col, k), (pivot, k));
            }
            b.swap(col, pivot);
        }
        let diag = a[(col, col)];
        for row in (col + 1)..n {
            let f = a[(row, col)] / diag;
            if f == 0.0 {
                continue;
            }
            for k in col..n {
                a[(row, k)] -= f * a[(col, k)];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[(row, k)] * x[k];
        }
        x[row] = acc / a[(row, row)];
    }
    Ok(x)
}
