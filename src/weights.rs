use crate::{DenseVec, DenseVecView};

/// Added to marginals before inverting or taking logs.
pub const MARGINAL_EPSILON: f32 = 1e-4;

/// Default `A` parameter of the Jain-Prabhu-Varma propensity model.
pub const JPV_A: f32 = 0.55;
/// Default `B` parameter of the Jain-Prabhu-Varma propensity model.
pub const JPV_B: f32 = 1.5;

pub fn uniform(n_labels: usize) -> DenseVec {
    DenseVec::ones(n_labels)
}

/// `1 / (m + ε)`; selecting by these weights maximizes expected macro recall.
pub fn inverse_marginal(marginals: DenseVecView) -> DenseVec {
    marginals.mapv(|m| 1. / (m + MARGINAL_EPSILON))
}

/// `-ln(m + ε)`
pub fn log_marginal(marginals: DenseVecView) -> DenseVec {
    marginals.mapv(|m| -(m + MARGINAL_EPSILON).ln())
}

/// `1 / sqrt(m + ε)`
pub fn sqrt_marginal(marginals: DenseVecView) -> DenseVec {
    marginals.mapv(|m| 1. / (m + MARGINAL_EPSILON).sqrt())
}

/// `(m + ε)^-β`; interpolates between uniform (β = 0) and inverse marginal (β = 1).
pub fn power_law(marginals: DenseVecView, beta: f32) -> DenseVec {
    marginals.mapv(|m| (m + MARGINAL_EPSILON).powf(-beta))
}

/// Fraction of instances carrying each label.
pub fn label_priors(label_counts: &[usize], n_instances: usize) -> DenseVec {
    let n = n_instances.max(1) as f32;
    label_counts.iter().map(|&c| c as f32 / n).collect()
}

/// Inverse label propensities under the Jain-Prabhu-Varma model:
/// `1 + C (n_j + B)^-A` with `C = (ln N - 1)(B + 1)^A`.
pub fn jpv_inverse_propensity(
    label_counts: &[usize],
    n_instances: usize,
    a: f32,
    b: f32,
) -> DenseVec {
    let c = ((n_instances as f32).ln() - 1.) * (b + 1.).powf(a);
    label_counts
        .iter()
        .map(|&n_j| 1. + c * (n_j as f32 + b).powf(-a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn test_marginal_weights() {
        let m = array![0.5, 0.01, 0.];
        let w = inverse_marginal(m.view());
        assert_approx_eq!(1. / 0.5001, w[0]);
        assert_approx_eq!(1e4, w[2], 1e-1);
        assert!(w[1] > w[0]);

        let w = log_marginal(m.view());
        assert_approx_eq!(-(0.5001f32).ln(), w[0]);
        assert!(w[2] > w[1] && w[1] > w[0]);

        let w = sqrt_marginal(m.view());
        assert_approx_eq!(1. / 0.5001f32.sqrt(), w[0]);

        assert_eq!(uniform(3), power_law(m.view(), 0.));
        let w = power_law(m.view(), 1.);
        assert_approx_eq!(inverse_marginal(m.view())[1], w[1], 1e-2);
    }

    #[test]
    fn test_label_priors() {
        assert_eq!(array![0.5, 0.25, 0.], label_priors(&[2, 1, 0], 4));
    }

    #[test]
    fn test_jpv_inverse_propensity() {
        let w = jpv_inverse_propensity(&[1000, 10, 0], 1000, JPV_A, JPV_B);
        let c = (1000f32.ln() - 1.) * 2.5f32.powf(0.55);
        assert_approx_eq!(1. + c * 1001.5f32.powf(-0.55), w[0]);
        assert_approx_eq!(1. + c * 1.5f32.powf(-0.55), w[2]);
        // Rarer labels are less likely to be observed, hence larger inverse propensities
        assert!(w[2] > w[1] && w[1] > w[0] && w[0] > 1.);
    }
}
