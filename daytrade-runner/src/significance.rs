//! Two-sample significance tests.
//!
//! Implements from first principles:
//! - Lanczos approximation for ln(Gamma)
//! - Regularized incomplete beta function and Student's t CDF
//! - Standard normal CDF
//! - Welch's unequal-variance t-test
//! - Mann-Whitney U test (normal approximation with tie correction)
//! - Two-sample Kolmogorov-Smirnov test (asymptotic p-value)
//!
//! All tests are two-sided. Non-finite values are dropped before testing.
//!
//! Daily returns are autocorrelated and fat-tailed, so treat the p-values as
//! a ranking aid rather than literal false-positive probabilities.

use serde::{Deserialize, Serialize};

// ─── Math primitives ─────────────────────────────────────────────────

/// Lanczos approximation for ln(Gamma(x)), g=7, n=9.
fn ln_gamma(x: f64) -> f64 {
    #[allow(clippy::excessive_precision)]
    const COEFFICIENTS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    const G: f64 = 7.0;
    use std::f64::consts::PI;

    if x < 0.5 {
        // Reflection: Gamma(x) * Gamma(1-x) = pi / sin(pi*x)
        let s = (PI * x).sin();
        if s.abs() < 1e-300 {
            return f64::INFINITY;
        }
        return PI.ln() - s.abs().ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let sum = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, &c)| acc + c / (x + i as f64));
    let t = x + G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized incomplete beta I_x(a, b), continued fraction by modified Lentz.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if !(0.0..=1.0).contains(&x) {
        return f64::NAN;
    }
    if x == 0.0 || x == 1.0 {
        return x;
    }
    if x > (a + 1.0) / (a + b + 2.0) {
        return 1.0 - incomplete_beta(b, a, 1.0 - x);
    }

    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-30;
    let clamp = |v: f64| if v.abs() < TINY { TINY } else { v };

    let ln_prefix =
        a * x.ln() + b * (1.0 - x).ln() - ln_gamma(a) - ln_gamma(b) + ln_gamma(a + b) - a.ln();

    let mut c = 1.0_f64;
    let mut d = 1.0 / clamp(1.0 - (a + b) * x / (a + 1.0));
    let mut f = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;

        let even = m * (b - m) * x / ((a + 2.0 * m - 1.0) * (a + 2.0 * m));
        d = 1.0 / clamp(1.0 + even * d);
        c = clamp(1.0 + even / c);
        f *= c * d;

        let odd = -((a + m) * (a + b + m) * x) / ((a + 2.0 * m) * (a + 2.0 * m + 1.0));
        d = 1.0 / clamp(1.0 + odd * d);
        c = clamp(1.0 + odd / c);
        let delta = c * d;
        f *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    ln_prefix.exp() * f
}

/// Student's t CDF: P(T <= t) with `df` degrees of freedom.
pub fn t_cdf(t: f64, df: f64) -> f64 {
    if df <= 0.0 || t.is_nan() {
        return f64::NAN;
    }
    if t == 0.0 {
        return 0.5;
    }
    let ib = incomplete_beta(df / 2.0, 0.5, df / (df + t * t));
    if t > 0.0 {
        1.0 - 0.5 * ib
    } else {
        0.5 * ib
    }
}

/// Standard normal CDF.
///
/// Uses the complementary error function's Chebyshev fit (|error| < 1.2e-7).
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

/// Statistic and two-sided p-value of one test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(with = "crate::nan_as_null")]
    pub statistic: f64,
    #[serde(with = "crate::nan_as_null")]
    pub p_value: f64,
}

/// All three tests for one pair of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceReport {
    pub sample_size: usize,
    pub population_size: usize,
    pub welch_t: Option<TestResult>,
    pub mann_whitney_u: Option<TestResult>,
    pub kolmogorov_smirnov: Option<TestResult>,
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Run every test of `sample` against `population`.
pub fn compare_samples(sample: &[f64], population: &[f64]) -> SignificanceReport {
    SignificanceReport {
        sample_size: sample.iter().filter(|v| v.is_finite()).count(),
        population_size: population.iter().filter(|v| v.is_finite()).count(),
        welch_t: welch_t_test(sample, population),
        mann_whitney_u: mann_whitney_u(sample, population),
        kolmogorov_smirnov: ks_two_sample(sample, population),
    }
}

/// Welch's t-test for a difference in means.
///
/// Returns `None` with fewer than two values on either side.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (a, b) = (finite(a), finite(b));
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (ma, va) = mean_var(&a);
    let (mb, vb) = mean_var(&b);

    let sa = va / na;
    let sb = vb / nb;
    let se = (sa + sb).sqrt();
    if se < 1e-15 {
        // Both samples constant: identical means are indistinguishable,
        // different means are certain.
        let same = (ma - mb).abs() < 1e-15;
        return Some(TestResult {
            statistic: if same { 0.0 } else { f64::INFINITY.copysign(ma - mb) },
            p_value: if same { 1.0 } else { 0.0 },
        });
    }

    let t = (ma - mb) / se;
    let df = (sa + sb).powi(2) / (sa * sa / (na - 1.0) + sb * sb / (nb - 1.0));
    let p = 2.0 * (1.0 - t_cdf(t.abs(), df));
    Some(TestResult {
        statistic: t,
        p_value: p.clamp(0.0, 1.0),
    })
}

/// Mann-Whitney U test. The statistic is U of the first sample.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (a, b) = (finite(a), finite(b));
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (n1, n2) = (a.len(), b.len());

    let mut pooled: Vec<(f64, bool)> = a
        .iter()
        .map(|&v| (v, true))
        .chain(b.iter().map(|&v| (v, false)))
        .collect();
    pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

    // Average ranks over ties, accumulating the tie correction term.
    let n = pooled.len();
    let mut rank_sum_a = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        let avg_rank = (i + j + 1) as f64 / 2.0;
        let in_a = pooled[i..j].iter().filter(|(_, from_a)| *from_a).count();
        rank_sum_a += avg_rank * in_a as f64;
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let (n1f, n2f, nf) = (n1 as f64, n2 as f64, n as f64);
    let u = rank_sum_a - n1f * (n1f + 1.0) / 2.0;
    let mu = n1f * n2f / 2.0;
    let var = n1f * n2f / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)).max(1.0));
    if var <= 0.0 {
        return Some(TestResult {
            statistic: u,
            p_value: 1.0,
        });
    }

    let diff = u - mu;
    let corrected = (diff.abs() - 0.5).max(0.0);
    let z = corrected / var.sqrt();
    Some(TestResult {
        statistic: u,
        p_value: (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0),
    })
}

/// Two-sample Kolmogorov-Smirnov test. The statistic is D = sup |F_a - F_b|.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (mut a, mut b) = (finite(a), finite(b));
    if a.is_empty() || b.is_empty() {
        return None;
    }
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j) = (0, 0);
    let mut d = 0.0_f64;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let en = (n1 * n2 / (n1 + n2)).sqrt();
    Some(TestResult {
        statistic: d,
        p_value: kolmogorov_q((en + 0.12 + 0.11 / en) * d),
    })
}

/// Kolmogorov distribution tail Q(λ) = 2 Σ (-1)^(k-1) exp(-2 k² λ²).
fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = sign * (-2.0 * k * k * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}
