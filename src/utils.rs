pub fn logsumexp(vals: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for &v in vals {
        if v > max {
            max = v;
        }
    }
    if !max.is_finite() {
        return max;
    }
    let mut sum = 0.0;
    for &v in vals {
        sum += (v - max).exp();
    }
    max + sum.ln()
}

/// Lanczos approximation of ln Γ(x) for x > 0.
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.001_208_650_973_866_179,
        -5.395_239_384_953e-6,
    ];
    if x <= 0.0 {
        return f64::INFINITY;
    }
    let z = x - 1.0;
    let mut sum = 1.000_000_000_190_015_f64;
    for (i, &c) in COEFFS.iter().enumerate() {
        sum += c / (z + 1.0 + i as f64);
    }
    let t = z + 5.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (z + 0.5) * t.ln() - t + sum.ln()
}

pub fn ln_factorial(n: u32) -> f64 {
    // Exact summation for small n keeps hand-checked tables exact.
    if n < 32 {
        let mut s = 0.0;
        for i in 2..=n {
            s += (i as f64).ln();
        }
        return s;
    }
    ln_gamma(n as f64 + 1.0)
}

pub fn ln_choose(n: u32, k: u32) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

/// Binomial coefficient as a float, built by the multiplicative recurrence.
pub fn choose(n: u32, k: u32) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut c = 1.0;
    for i in 1..=k {
        c = c * (n - k + i) as f64 / i as f64;
    }
    c
}

/// Log Beta density on (0, 1).
pub fn ln_beta_pdf(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return f64::NEG_INFINITY;
    }
    (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() + ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b)
}

/// Natural logs of Stirling numbers of the second kind S(n, k) for k = 0..=n.
pub fn ln_stirling2_row(n: usize) -> Vec<f64> {
    // S(i, k) = k S(i-1, k) + S(i-1, k-1), carried in log space.
    let mut row = vec![f64::NEG_INFINITY; n + 1];
    row[0] = 0.0;
    for i in 1..=n {
        let mut next = vec![f64::NEG_INFINITY; n + 1];
        for k in 1..=i {
            let stay = if k <= i - 1 {
                (k as f64).ln() + row[k]
            } else {
                f64::NEG_INFINITY
            };
            next[k] = logsumexp(&[stay, row[k - 1]]);
        }
        row = next;
    }
    row
}
