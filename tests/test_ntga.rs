//! Integration tests for the neural tangent generalization attack
//!
//! This file covers:
//! - Gradient of the held-out loss against finite differences
//! - Independence of the gradient from the test sub-batch size
//! - Block-wise PGD: budget, determinism, partial trailing blocks
//! - The end-to-end `run_ntga` entry point

use approx::assert_relative_eq;
use ndarray::Array2;
use rust_data_poisoning::config::NtgaConfig;
use rust_data_poisoning::data::{Dataset, ImageShape};
use rust_data_poisoning::kernel::{ConvNtk, LinearKernel, ReluNtk};
use rust_data_poisoning::loss::Loss;
use rust_data_poisoning::ntga::{adversarial_loss, loss_and_gradient, run_ntga, KernelRegression, Ntga, Objective, PgdParams};
use rust_data_poisoning::PoisonError;

const EPS: f64 = 8.0 / 255.0;

fn matrices(samples: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    Dataset::synthetic(ImageShape::new(2, 2, 1), 2, samples, 0.2, seed).to_matrices()
}

fn objective(loss: Loss, t: Option<f64>, batch_size: usize) -> Objective {
    Objective {
        loss,
        t,
        targeted: false,
        batch_size,
    }
}

// ============================================================================
// Gradient Tests
// ============================================================================

mod gradient_tests {
    use super::*;

    fn check_finite_difference(predictor: &KernelRegression<'_>, obj: &Objective) {
        let (x, y) = matrices(4, 1);
        let (xt, yt) = matrices(5, 2);
        let (_, grad) = loss_and_gradient(predictor, x.view(), y.view(), xt.view(), yt.view(), obj).unwrap();

        let h = 1e-6;
        for i in 0..x.nrows() {
            for j in 0..x.ncols() {
                let mut plus = x.clone();
                plus[[i, j]] += h;
                let mut minus = x.clone();
                minus[[i, j]] -= h;
                let fp = adversarial_loss(predictor, plus.view(), y.view(), xt.view(), yt.view(), obj).unwrap();
                let fm = adversarial_loss(predictor, minus.view(), y.view(), xt.view(), yt.view(), obj).unwrap();
                let numeric = (fp - fm) / (2.0 * h);
                assert_relative_eq!(grad[[i, j]], numeric, epsilon = 1e-6, max_relative = 1e-3);
            }
        }
    }

    #[test]
    fn test_linear_mse_infinite_time_gradient() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let predictor = KernelRegression::new(&kernel, 0.1);
        check_finite_difference(&predictor, &objective(Loss::Mse, None, 2));
    }

    #[test]
    fn test_relu_ntk_cross_entropy_finite_time_gradient() {
        let kernel = ReluNtk::new(1, 1.76, 0.18);
        let predictor = KernelRegression::new(&kernel, 0.1);
        check_finite_difference(&predictor, &objective(Loss::CrossEntropy, Some(4.0), 3));
    }

    #[test]
    fn test_conv_ntk_cross_entropy_finite_time_gradient() {
        let kernel = ConvNtk::new(ImageShape::new(2, 2, 1), 1.76, 0.18);
        let predictor = KernelRegression::new(&kernel, 0.1);
        check_finite_difference(&predictor, &objective(Loss::CrossEntropy, Some(64.0), 2));
    }

    #[test]
    fn test_gradient_independent_of_sub_batch_size() {
        let kernel = ReluNtk::new(1, 1.76, 0.18);
        let predictor = KernelRegression::new(&kernel, 1e-2);
        let (x, y) = matrices(4, 3);
        let (xt, yt) = matrices(7, 4);

        let (v_full, g_full) =
            loss_and_gradient(&predictor, x.view(), y.view(), xt.view(), yt.view(), &objective(Loss::CrossEntropy, Some(64.0), 100)).unwrap();
        for batch_size in [1, 2, 3] {
            let (v, g) = loss_and_gradient(
                &predictor,
                x.view(),
                y.view(),
                xt.view(),
                yt.view(),
                &objective(Loss::CrossEntropy, Some(64.0), batch_size),
            )
            .unwrap();
            assert_relative_eq!(v, v_full, epsilon = 1e-12, max_relative = 1e-9);
            for (a, b) in g.iter().zip(g_full.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_targeted_negates_value_and_gradient() {
        let kernel = LinearKernel::new(1.0, 0.1);
        let predictor = KernelRegression::new(&kernel, 1e-2);
        let (x, y) = matrices(3, 5);
        let (xt, yt) = matrices(3, 6);

        let plain = objective(Loss::Mse, None, 10);
        let targeted = Objective { targeted: true, ..plain };
        let (v, g) = loss_and_gradient(&predictor, x.view(), y.view(), xt.view(), yt.view(), &plain).unwrap();
        let (vt, gt) = loss_and_gradient(&predictor, x.view(), y.view(), xt.view(), yt.view(), &targeted).unwrap();

        assert_relative_eq!(vt, -v);
        for (a, b) in gt.iter().zip(g.iter()) {
            assert_relative_eq!(*a, -*b);
        }
    }
}

// ============================================================================
// Block PGD Tests
// ============================================================================

mod pgd_tests {
    use super::*;

    fn linear_attack(kernel: &LinearKernel, block_size: usize, nb_iter: usize) -> Ntga<'_> {
        Ntga::new(
            KernelRegression::new(kernel, 1e-4),
            objective(Loss::CrossEntropy, Some(64.0), 30),
            PgdParams::new(EPS, nb_iter),
            block_size,
        )
    }

    #[test]
    fn test_two_blocks_single_step_stay_in_budget() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let attack = linear_attack(&kernel, 2, 1);
        let (x, y) = matrices(4, 7);
        let (xt, yt) = matrices(6, 8);

        let (adv, reports) = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 0).unwrap();

        assert_eq!(adv.dim(), x.dim());
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.rows == 2));
        for (&a, &c) in adv.iter().zip(x.iter()) {
            assert!((a - c).abs() <= EPS + 1e-12);
            assert!((0.0..=1.0).contains(&a));
            // eps_iter = 1.1 eps, so an interior pixel either stays or lands on the ball's surface
            if c >= EPS && c <= 1.0 - EPS && a != c {
                assert_relative_eq!((a - c).abs(), EPS, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        let kernel = ReluNtk::new(1, 1.76, 0.18);
        let attack = Ntga::new(
            KernelRegression::new(&kernel, 1e-4),
            objective(Loss::CrossEntropy, Some(64.0), 4),
            PgdParams { rand_init: true, ..PgdParams::new(EPS, 3) },
            3,
        );
        let (x, y) = matrices(6, 9);
        let (xt, yt) = matrices(4, 10);

        let (a, _) = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 42).unwrap();
        let (b, _) = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_partial_trailing_block_is_attacked() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let attack = linear_attack(&kernel, 2, 2);
        let (x, y) = matrices(5, 11);
        let (xt, yt) = matrices(4, 12);

        let (adv, reports) = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 0).unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].rows, 1);
        assert!(adv.row(4).iter().zip(x.row(4).iter()).any(|(a, c)| a != c));
    }

    #[test]
    fn test_small_step_increases_held_out_loss() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let obj = objective(Loss::Mse, None, 8);
        let attack = Ntga::new(KernelRegression::new(&kernel, 1e-2), obj, PgdParams::new(1e-4, 1), 4)
            .without_block_evaluation();
        let (x, y) = matrices(4, 13);
        let (xt, yt) = matrices(8, 14);

        let (adv, reports) = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 0).unwrap();
        assert!(reports.is_empty());

        let predictor = KernelRegression::new(&kernel, 1e-2);
        let before = adversarial_loss(&predictor, x.view(), y.view(), xt.view(), yt.view(), &obj).unwrap();
        let after = adversarial_loss(&predictor, adv.view(), y.view(), xt.view(), yt.view(), &obj).unwrap();
        assert!(after > before, "{} !> {}", after, before);
    }

    #[test]
    fn test_infinite_pixel_is_numerical_error() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let attack = linear_attack(&kernel, 2, 1);
        let (mut x, y) = matrices(4, 17);
        let (xt, yt) = matrices(3, 18);
        x[[3, 1]] = f64::INFINITY;

        let result = attack.generate(x.view(), y.view(), xt.view(), yt.view(), 0);
        assert!(matches!(result, Err(PoisonError::Numerical(_))));
    }

    #[test]
    fn test_poison_dataset_keeps_labels_and_indices() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let attack = linear_attack(&kernel, 2, 1);
        let train = Dataset::synthetic(ImageShape::new(2, 2, 1), 2, 4, 0.2, 15);
        let test = Dataset::synthetic(ImageShape::new(2, 2, 1), 2, 4, 0.2, 16);

        let (poisoned, _) = attack.poison_dataset(&train, &test, 0).unwrap();
        assert_eq!(poisoned.indices(), train.indices());
        for (p, c) in poisoned.samples().iter().zip(train.samples()) {
            assert_eq!(p.label, c.label);
            for (a, b) in p.image.iter().zip(&c.image) {
                assert!(((a - b).abs() as f64) <= EPS + 1e-6);
            }
        }
    }

    #[test]
    fn test_poison_dataset_rejects_mismatched_test_set() {
        let kernel = LinearKernel::new(1.76, 0.18);
        let attack = linear_attack(&kernel, 2, 1);
        let train = Dataset::synthetic(ImageShape::new(2, 2, 1), 2, 4, 0.2, 0);
        let test = Dataset::synthetic(ImageShape::new(3, 3, 1), 2, 4, 0.2, 0);

        assert!(matches!(attack.poison_dataset(&train, &test, 0), Err(PoisonError::Shape(_))));
    }
}

// ============================================================================
// Entry Point Tests
// ============================================================================

mod run_ntga_tests {
    use super::*;

    #[test]
    fn test_run_ntga_linear_surrogate() {
        let config = NtgaConfig {
            surrogate: "linear".to_string(),
            block_size: 3,
            nb_iter: 2,
            batch_size: 2,
            ..NtgaConfig::default()
        };
        let train = Dataset::synthetic(ImageShape::new(2, 2, 3), 3, 6, 0.1, 1);
        let test = Dataset::synthetic(ImageShape::new(2, 2, 3), 3, 3, 0.1, 2);

        let (poisoned, reports) = run_ntga(&config, &train, &test).unwrap();
        assert_eq!(poisoned.len(), 6);
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| (0.0..=1.0).contains(&r.poisoned_accuracy)));
    }

    #[test]
    fn test_run_ntga_cnn_surrogate() {
        let config = NtgaConfig {
            surrogate: "cnn".to_string(),
            block_size: 4,
            nb_iter: 2,
            batch_size: 3,
            ..NtgaConfig::default()
        };
        let train = Dataset::synthetic(ImageShape::new(4, 4, 3), 2, 4, 0.1, 3);
        let test = Dataset::synthetic(ImageShape::new(4, 4, 3), 2, 3, 0.1, 4);

        let (poisoned, reports) = run_ntga(&config, &train, &test).unwrap();
        assert_eq!(poisoned.len(), 4);
        assert_eq!(reports.len(), 1);
        assert_eq!(poisoned.indices(), train.indices());
        for (p, c) in poisoned.samples().iter().zip(train.samples()) {
            assert!(p.image.iter().zip(&c.image).all(|(a, b)| ((a - b).abs() as f64) <= EPS + 1e-6));
        }
        assert!(poisoned.samples().iter().zip(train.samples()).any(|(p, c)| p.image != c.image));
    }

    #[test]
    fn test_run_ntga_rejects_unknown_surrogate() {
        let config = NtgaConfig {
            surrogate: "resnet".to_string(),
            ..NtgaConfig::default()
        };
        let train = Dataset::synthetic(ImageShape::new(2, 2, 3), 2, 2, 0.1, 1);
        let result = run_ntga(&config, &train, &train);
        assert!(matches!(result, Err(PoisonError::Config(_))));
    }
}
