// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Log-domain numerics for the change-point detector.  Everything here is
//! written to survive extreme magnitudes: max-shifted logsumexp, a Lanczos
//! log-gamma, and a sigma clamp in the Student-t density.

/// Minimum scale parameter; avoids division by zero in degenerate fits.
pub const SIGMA_EPS: f64 = 1e-15;

/// `log(Σ exp(x_i))` with max-shift.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

// Lanczos approximation, g = 7, 9 coefficients.
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function.
pub fn lgamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection: Γ(x)Γ(1−x) = π / sin(πx).
        let pi = std::f64::consts::PI;
        (pi / (pi * x).sin()).ln() - lgamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = LANCZOS_COEFFS[0];
        for (i, c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
            acc += c / (x + i as f64);
        }
        let t = x + LANCZOS_G + 0.5;
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
    }
}

/// Log density of the Student-t with `nu` degrees of freedom, location
/// `mu`, scale `sigma` (clamped to [`SIGMA_EPS`]).
pub fn student_t_logpdf(x: f64, nu: f64, mu: f64, sigma: f64) -> f64 {
    let sigma = sigma.max(SIGMA_EPS);
    let z = (x - mu) / sigma;
    lgamma((nu + 1.0) / 2.0)
        - lgamma(nu / 2.0)
        - 0.5 * (nu * std::f64::consts::PI).ln()
        - sigma.ln()
        - (nu + 1.0) / 2.0 * (1.0 + z * z / nu).ln()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
