// Finite-difference checks of the surrogate kernels' vector-Jacobian products.
// Each check perturbs one input coordinate, re-evaluates Σ C ∘ K and compares
// the central difference with the analytical VJP.

use approx::assert_relative_eq;
use ndarray::{Array2, ArrayView2};
use rust_data_poisoning::data::ImageShape;
use rust_data_poisoning::kernel::{ConvNtk, Kernel, KernelKind, LinearKernel, ReluNtk, SurrogateKind};
use rust_data_poisoning::utils::SimpleRng;

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = SimpleRng::new(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range_f64(0.05, 0.95))
}

fn weighted_sum(k: &Array2<f64>, c: ArrayView2<'_, f64>) -> f64 {
    (k * &c).sum()
}

// Central differences of Σ C ∘ K(x, y) with respect to y.
fn numeric_rhs(kernel: &dyn Kernel, x: &Array2<f64>, y: &Array2<f64>, c: &Array2<f64>, kind: KernelKind) -> Array2<f64> {
    let h = 1e-6;
    let mut grad = Array2::<f64>::zeros(y.dim());
    for i in 0..y.nrows() {
        for j in 0..y.ncols() {
            let mut plus = y.clone();
            plus[[i, j]] += h;
            let mut minus = y.clone();
            minus[[i, j]] -= h;
            let fp = weighted_sum(&kernel.evaluate(x.view(), plus.view(), kind), c.view());
            let fm = weighted_sum(&kernel.evaluate(x.view(), minus.view(), kind), c.view());
            grad[[i, j]] = (fp - fm) / (2.0 * h);
        }
    }
    grad
}

// Central differences of Σ C ∘ K(x, x) with respect to x.
fn numeric_gram(kernel: &dyn Kernel, x: &Array2<f64>, c: &Array2<f64>, kind: KernelKind) -> Array2<f64> {
    let h = 1e-6;
    let mut grad = Array2::<f64>::zeros(x.dim());
    for i in 0..x.nrows() {
        for j in 0..x.ncols() {
            let mut plus = x.clone();
            plus[[i, j]] += h;
            let mut minus = x.clone();
            minus[[i, j]] -= h;
            let fp = weighted_sum(&kernel.evaluate(plus.view(), plus.view(), kind), c.view());
            let fm = weighted_sum(&kernel.evaluate(minus.view(), minus.view(), kind), c.view());
            grad[[i, j]] = (fp - fm) / (2.0 * h);
        }
    }
    grad
}

fn assert_matrices_close(analytic: &Array2<f64>, numeric: &Array2<f64>) {
    assert_eq!(analytic.dim(), numeric.dim());
    for (a, n) in analytic.iter().zip(numeric.iter()) {
        assert_relative_eq!(*a, *n, epsilon = 1e-6, max_relative = 1e-4);
    }
}

// ============================================================================
// Linear Kernel Tests
// ============================================================================

mod linear_kernel_tests {
    use super::*;

    #[test]
    fn test_linear_vjp_rhs() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let x = random_matrix(3, 4, 1);
        let y = random_matrix(2, 4, 2);
        let c = random_matrix(3, 2, 3) - 0.5;

        let analytic = kernel.vjp_rhs(x.view(), y.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_rhs(&kernel, &x, &y, &c, KernelKind::Ntk));
    }

    #[test]
    fn test_linear_vjp_gram_with_asymmetric_cotangent() {
        let kernel = LinearKernel::new(2.0, 0.1);
        let x = random_matrix(3, 5, 4);
        let c = random_matrix(3, 3, 5) - 0.5;

        let analytic = kernel.vjp_gram(x.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_gram(&kernel, &x, &c, KernelKind::Ntk));
    }
}

// ============================================================================
// ReLU NTK / NNGP Tests
// ============================================================================

mod relu_kernel_tests {
    use super::*;

    #[test]
    fn test_ntk_vjp_rhs() {
        let kernel = ReluNtk::new(2, 1.76, 0.18);
        let x = random_matrix(3, 4, 10);
        let y = random_matrix(2, 4, 11);
        let c = random_matrix(3, 2, 12) - 0.5;

        let analytic = kernel.vjp_rhs(x.view(), y.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_rhs(&kernel, &x, &y, &c, KernelKind::Ntk));
    }

    #[test]
    fn test_nngp_vjp_rhs() {
        let kernel = ReluNtk::new(1, 1.76, 0.18);
        let x = random_matrix(2, 3, 20);
        let y = random_matrix(3, 3, 21);
        let c = random_matrix(2, 3, 22) - 0.5;

        let analytic = kernel.vjp_rhs(x.view(), y.view(), c.view(), KernelKind::Nngp);
        assert_matrices_close(&analytic, &numeric_rhs(&kernel, &x, &y, &c, KernelKind::Nngp));
    }

    #[test]
    fn test_ntk_vjp_gram_includes_diagonal() {
        let kernel = ReluNtk::new(2, 1.76, 0.18);
        let x = random_matrix(3, 4, 30);
        let c = random_matrix(3, 3, 31) - 0.5;

        let analytic = kernel.vjp_gram(x.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_gram(&kernel, &x, &c, KernelKind::Ntk));
    }

    #[test]
    fn test_surrogate_build_matches_direct_construction() {
        let x = random_matrix(2, 3, 40);
        let built = SurrogateKind::Fnn.build(ImageShape::new(1, 1, 3), 2, 1.76, 0.18);
        let direct = ReluNtk::new(2, 1.76, 0.18);

        let a = built.evaluate(x.view(), x.view(), KernelKind::Ntk);
        let b = direct.evaluate(x.view(), x.view(), KernelKind::Ntk);
        for (u, v) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*u, *v);
        }
    }
}

// ============================================================================
// Convolutional Kernel Tests
// ============================================================================

mod conv_kernel_tests {
    use super::*;

    // 4×4 → 2×2 → 1×1 through the two strided blocks, with clipped windows
    // on the padded border.
    fn small_kernel() -> ConvNtk {
        ConvNtk::new(ImageShape::new(4, 4, 2), 1.76, 0.18)
    }

    #[test]
    fn test_conv_ntk_vjp_rhs() {
        let kernel = small_kernel();
        let x = random_matrix(3, 32, 50);
        let y = random_matrix(2, 32, 51);
        let c = random_matrix(3, 2, 52) - 0.5;

        let analytic = kernel.vjp_rhs(x.view(), y.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_rhs(&kernel, &x, &y, &c, KernelKind::Ntk));
    }

    #[test]
    fn test_conv_nngp_vjp_rhs() {
        let kernel = ConvNtk::new(ImageShape::new(3, 3, 1), 1.76, 0.18);
        let x = random_matrix(2, 9, 53);
        let y = random_matrix(3, 9, 54);
        let c = random_matrix(2, 3, 55) - 0.5;

        let analytic = kernel.vjp_rhs(x.view(), y.view(), c.view(), KernelKind::Nngp);
        assert_matrices_close(&analytic, &numeric_rhs(&kernel, &x, &y, &c, KernelKind::Nngp));
    }

    #[test]
    fn test_conv_ntk_vjp_gram_includes_diagonal() {
        let kernel = small_kernel();
        let x = random_matrix(3, 32, 56);
        let c = random_matrix(3, 3, 57) - 0.5;

        let analytic = kernel.vjp_gram(x.view(), c.view(), KernelKind::Ntk);
        assert_matrices_close(&analytic, &numeric_gram(&kernel, &x, &c, KernelKind::Ntk));
    }

    #[test]
    fn test_conv_nngp_vjp_gram_diagonal_only() {
        let kernel = ConvNtk::new(ImageShape::new(5, 3, 2), 2.0, 0.1);
        let x = random_matrix(2, 30, 58);
        let c = Array2::from_diag(&ndarray::arr1(&[0.7, -1.2]));

        let analytic = kernel.vjp_gram(x.view(), c.view(), KernelKind::Nngp);
        assert_matrices_close(&analytic, &numeric_gram(&kernel, &x, &c, KernelKind::Nngp));
    }

    #[test]
    fn test_cnn_surrogate_builds_conv_kernel() {
        let shape = ImageShape::new(4, 4, 2);
        let x = random_matrix(2, shape.len(), 59);
        let built = SurrogateKind::Cnn.build(shape, 7, 1.76, 0.18);

        let a = built.evaluate(x.view(), x.view(), KernelKind::Ntk);
        let b = small_kernel().evaluate(x.view(), x.view(), KernelKind::Ntk);
        for (u, v) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*u, *v);
        }
    }

    #[test]
    fn test_conv_kernel_depends_on_pixel_layout() {
        // Swapping two pixels changes the kernel even though the dense
        // inner product between the rows is unchanged.
        let kernel = small_kernel();
        let x = random_matrix(1, 32, 60);
        let y = random_matrix(1, 32, 61);
        let mut y_swapped = y.clone();
        for ch in 0..2 {
            y_swapped.swap([0, ch], [0, 15 * 2 + ch]);
        }
        let mut x_swapped = x.clone();
        for ch in 0..2 {
            x_swapped.swap([0, ch], [0, 15 * 2 + ch]);
        }

        let base = kernel.evaluate(x.view(), y.view(), KernelKind::Ntk)[[0, 0]];
        let moved = kernel.evaluate(x_swapped.view(), y_swapped.view(), KernelKind::Ntk)[[0, 0]];
        assert!((base - moved).abs() > 1e-9);
    }
}
