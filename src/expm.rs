use crate::error::Result;
use crate::pattern::BiallelicPatternProbabilityMatrix;
use crate::qmatrix::QMatrix;

const TAYLOR_TOL: f64 = 1e-17;
const MAX_TAYLOR_TERMS: usize = 80;
// Largest ‖hQ‖₁ handled by one Taylor sub-step.
const STEP_NORM: f64 = 2.0;

/// Computes `exp(Q t) x` for the `(n, r)` generator without forming the
/// dense matrix.
///
/// The interval is split into `s = ⌈‖Qt‖₁ / 2⌉` sub-steps and each sub-step
/// is a truncated Taylor series driven by the sparse action of `Q`.
#[derive(Debug, Clone, Default)]
pub struct MatrixExponentiator {
    term: Vec<f64>,
    next: Vec<f64>,
    acc: Vec<f64>,
}

impl MatrixExponentiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exp_qt_x(
        &mut self,
        allele_count: u32,
        u: f64,
        v: f64,
        theta: f64,
        length: f64,
        x: &BiallelicPatternProbabilityMatrix,
    ) -> Result<BiallelicPatternProbabilityMatrix> {
        let q = QMatrix::new(allele_count, u, v, theta);
        let dim = q.dim();
        let mut y: Vec<f64> = x.values().to_vec();
        if length <= 0.0 || dim == 0 {
            return BiallelicPatternProbabilityMatrix::from_values(allele_count, y);
        }

        let norm = q.one_norm() * length;
        let steps = (norm / STEP_NORM).ceil().max(1.0) as usize;
        let h = length / steps as f64;

        self.term.resize(dim, 0.0);
        self.next.resize(dim, 0.0);
        self.acc.resize(dim, 0.0);

        for _ in 0..steps {
            self.term.copy_from_slice(&y);
            self.acc.copy_from_slice(&y);
            let mut prev_small = false;
            for k in 1..=MAX_TAYLOR_TERMS {
                q.multiply(&self.term, &mut self.next);
                let scale = h / k as f64;
                let mut term_max = 0.0f64;
                let mut acc_max = 0.0f64;
                for i in 0..dim {
                    let t = self.next[i] * scale;
                    self.term[i] = t;
                    self.acc[i] += t;
                    term_max = term_max.max(t.abs());
                    acc_max = acc_max.max(self.acc[i].abs());
                }
                let small = term_max <= TAYLOR_TOL * acc_max.max(f64::MIN_POSITIVE);
                if small && prev_small {
                    break;
                }
                prev_small = small;
            }
            y.copy_from_slice(&self.acc);
        }

        for v in y.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        BiallelicPatternProbabilityMatrix::from_values(allele_count, y)
    }
}
