//! Numerical helpers: percentiles, special functions and a simplex minimizer

use std::f64::consts::PI;
use thiserror::Error;

/// Sort a copy of `values` in ascending order.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Percentile of already sorted data using linear interpolation between the
/// two closest ranks, the same convention as `numpy.percentile` (linear).
///
/// Returns `None` for empty input or `q` outside `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let frac = position - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile of unsorted data. See [`quantile_sorted`].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_sorted(&sorted(values), q)
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the absolute value of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // reflection: Γ(x)Γ(1-x) = π / sin(πx)
        (PI / (PI * x).sin()).abs().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + LANCZOS_G + 0.5;
        let series = LANCZOS_COEFFS
            .iter()
            .enumerate()
            .skip(1)
            .fold(LANCZOS_COEFFS[0], |acc, (i, c)| acc + c / (x + i as f64));
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
    }
}

// Terms shrink by roughly a factor z, so for z near 1 (short tenure, long
// horizon) the series needs tens of thousands of terms to settle.
const HYP2F1_MAX_TERMS: usize = 100_000;

/// Gauss hypergeometric function `2F1(a, b; c; z)` for `0 <= z < 1` by direct
/// power series. Returns NaN when the series does not settle.
pub fn hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
    let mut term = 1.0;
    let mut sum = 1.0;
    for n in 0..HYP2F1_MAX_TERMS {
        let n = n as f64;
        term *= (a + n) * (b + n) / ((c + n) * (n + 1.0)) * z;
        sum += term;
        if !sum.is_finite() {
            return sum;
        }
        if term.abs() <= f64::EPSILON * sum.abs() {
            return sum;
        }
    }
    f64::NAN
}

/// `ln 2F1(a, b; c; z)`, falling back to the Euler transformation
/// `(1-z)^(c-a-b) 2F1(c-a, c-b; c; z)` when the direct series overflows.
pub fn ln_hyp2f1(a: f64, b: f64, c: f64, z: f64) -> f64 {
    let direct = hyp2f1(a, b, c, z);
    if direct.is_finite() && direct > 0.0 {
        return direct.ln();
    }
    hyp2f1(c - a, c - b, c, z).ln() + (c - a - b) * (1.0 - z).ln()
}

/// `ln(exp(x) + exp(y))` without overflow.
pub fn log_add_exp(x: f64, y: f64) -> f64 {
    let max = x.max(y);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + ((x - max).exp() + (y - max).exp()).ln()
}

/// Pearson correlation coefficient; `None` for fewer than two points or a
/// constant series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Why a minimisation was abandoned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    #[error("max iterations ({0}) reached")]
    MaxIterations(usize),
    #[error("objective is not finite")]
    NonFinite,
}

/// Nelder-Mead stopping rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadOptions {
    /// Iteration cap for a single simplex run.
    pub max_iters: usize,
    /// Largest allowed spread of simplex vertices around the best one.
    pub x_tolerance: f64,
    /// Largest allowed spread of objective values across the simplex.
    pub f_tolerance: f64,
    /// Edge length of the initial simplex.
    pub initial_step: f64,
    /// Number of times the simplex is rebuilt around the incumbent.
    pub max_restarts: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iters: 10_000,
            x_tolerance: 1e-8,
            f_tolerance: 1e-10,
            initial_step: 0.5,
            max_restarts: 5,
        }
    }
}

/// Result of a successful minimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

/// Minimise `objective` starting from `x0`.
///
/// The simplex is restarted around the incumbent until a restart no longer
/// improves the objective by more than `f_tolerance`, which guards against
/// premature collapse of the simplex. Non-finite objective values are treated
/// as `+inf`.
pub fn nelder_mead<F>(
    objective: F,
    x0: &[f64],
    opts: &NelderMeadOptions,
) -> Result<Minimum, OptimizeError>
where
    F: Fn(&[f64]) -> f64,
{
    let mut best = simplex_search(&objective, x0, opts)?;
    for _ in 0..opts.max_restarts {
        let next = simplex_search(&objective, &best.x, opts)?;
        let improvement = best.value - next.value;
        let iterations = best.iterations + next.iterations;
        if improvement > 0.0 {
            best = Minimum { iterations, ..next };
        } else {
            best.iterations = iterations;
        }
        if improvement <= opts.f_tolerance {
            break;
        }
    }
    Ok(best)
}

fn simplex_search<F>(
    objective: &F,
    x0: &[f64],
    opts: &NelderMeadOptions,
) -> Result<Minimum, OptimizeError>
where
    F: Fn(&[f64]) -> f64,
{
    let eval = |x: &[f64]| {
        let value = objective(x);
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    };

    let n = x0.len();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut vertex = x0.to_vec();
        vertex[i] += opts.initial_step;
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|x| eval(x)).collect();

    for iteration in 0..opts.max_iters {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        if !values[0].is_finite() {
            return Err(OptimizeError::NonFinite);
        }
        if has_converged(&simplex, &values, opts) {
            return Ok(Minimum {
                x: simplex[0].clone(),
                value: values[0],
                iterations: iteration,
            });
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();

        let reflected = along(&centroid, &worst, -1.0);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = along(&centroid, &worst, -2.0);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }
        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted, accept) = if f_reflected < values[n] {
            let point = along(&centroid, &worst, -0.5);
            let value = eval(&point);
            (point, value, value <= f_reflected)
        } else {
            let point = along(&centroid, &worst, 0.5);
            let value = eval(&point);
            (point, value, value < values[n])
        };
        if accept {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let anchor = simplex[0].clone();
        for i in 1..=n {
            simplex[i] = along(&anchor, &simplex[i], 0.5);
            values[i] = eval(&simplex[i]);
        }
    }

    Err(OptimizeError::MaxIterations(opts.max_iters))
}

/// `origin + t * (towards - origin)`
fn along(origin: &[f64], towards: &[f64], t: f64) -> Vec<f64> {
    origin
        .iter()
        .zip(towards.iter())
        .map(|(o, w)| o + t * (w - o))
        .collect()
}

fn has_converged(simplex: &[Vec<f64>], values: &[f64], opts: &NelderMeadOptions) -> bool {
    let best = &simplex[0];
    let f_spread = values[1..]
        .iter()
        .map(|v| (v - values[0]).abs())
        .fold(0.0, f64::max);
    let x_spread = simplex[1..]
        .iter()
        .flat_map(|vertex| vertex.iter().zip(best.iter()).map(|(a, b)| (a - b).abs()))
        .fold(0.0, f64::max);
    f_spread <= opts.f_tolerance && x_spread <= opts.x_tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_linear_interpolation() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        // position 0.99 * 3 = 2.97
        let q = quantile(&values, 0.99).unwrap();
        assert!((q - 3.97).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&values, 1.5), None);
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert!(ln_gamma(1.0).abs() < 1e-12);
        assert!(ln_gamma(2.0).abs() < 1e-12);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-10);
        assert!((ln_gamma(0.1) - 2.252_712_651_734_206).abs() < 1e-9);
        // ln(99!) via direct summation
        let ln_fact: f64 = (1..100).map(|k| (k as f64).ln()).sum();
        assert!((ln_gamma(100.0) - ln_fact).abs() < 1e-8);
    }

    #[test]
    fn test_hyp2f1_closed_forms() {
        // 2F1(1, 1; 2; z) = -ln(1 - z) / z
        for z in [0.1_f64, 0.5, 0.9] {
            let expected = -(1.0 - z).ln() / z;
            assert!((hyp2f1(1.0, 1.0, 2.0, z) - expected).abs() < 1e-10);
        }
        // 2F1(a, b; b; z) = (1 - z)^(-a)
        let expected = (1.0_f64 - 0.3).powf(-2.5);
        assert!((hyp2f1(2.5, 4.0, 4.0, 0.3) - expected).abs() < 1e-10);
        assert_eq!(hyp2f1(3.0, 2.0, 5.0, 0.0), 1.0);
    }

    #[test]
    fn test_ln_hyp2f1_matches_direct_series() {
        let direct = hyp2f1(3.0, 4.5, 6.0, 0.4).ln();
        assert!((ln_hyp2f1(3.0, 4.5, 6.0, 0.4) - direct).abs() < 1e-10);
    }

    #[test]
    fn test_log_add_exp() {
        let value = log_add_exp(1000.0, 1000.0);
        assert!((value - (1000.0 + 2.0_f64.ln())).abs() < 1e-9);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!((log_add_exp(0.0, f64::NEG_INFINITY)).abs() < 1e-12);
    }

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-12);
        let inverse = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &inverse).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&xs, &[1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }

    #[test]
    fn test_nelder_mead_rosenbrock() {
        let rosenbrock = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let minimum = nelder_mead(rosenbrock, &[-1.2, 1.0], &NelderMeadOptions::default()).unwrap();
        assert!((minimum.x[0] - 1.0).abs() < 1e-4);
        assert!((minimum.x[1] - 1.0).abs() < 1e-4);
        assert!(minimum.value < 1e-8);
    }

    #[test]
    fn test_nelder_mead_skips_non_finite_regions() {
        // ln is undefined for x <= 0; the simplex must stay in the valid region
        let objective = |x: &[f64]| x[0] - x[0].ln();
        let minimum = nelder_mead(objective, &[3.0], &NelderMeadOptions::default()).unwrap();
        assert!((minimum.x[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_nelder_mead_reports_failures() {
        let opts = NelderMeadOptions {
            max_iters: 3,
            ..NelderMeadOptions::default()
        };
        let bowl = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>();
        assert_eq!(
            nelder_mead(bowl, &[5.0, 5.0], &opts),
            Err(OptimizeError::MaxIterations(3))
        );

        let nowhere = |_: &[f64]| f64::NAN;
        assert_eq!(
            nelder_mead(nowhere, &[0.0], &NelderMeadOptions::default()),
            Err(OptimizeError::NonFinite)
        );
    }
}
