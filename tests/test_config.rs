//! Tests for configuration parsing
//!
//! This file tests the config module including:
//! - Loading the shipped JSON configs
//! - Defaults for missing fields
//! - Rejecting unknown fields, invalid JSON and out-of-range values

use rust_data_poisoning::config::{load_ntga_config, load_rem_config, ModelKind, NtgaConfig, RemConfig, DEFAULT_EPS};
use rust_data_poisoning::data::DatasetKind;
use rust_data_poisoning::kernel::SurrogateKind;
use rust_data_poisoning::loss::Loss;
use rust_data_poisoning::PoisonError;
use std::fs;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

// ============================================================================
// Shipped Config Tests
// ============================================================================

mod shipped_config_tests {
    use super::*;

    #[test]
    fn test_load_ntga_c10() {
        let config = load_ntga_config("config/ntga_c10.json").expect("Failed to load ntga_c10");

        assert_eq!(config.dataset, DatasetKind::Cifar10);
        assert_eq!(config.surrogate_kind().unwrap(), SurrogateKind::Fnn);
        assert_eq!(config.t, Some(64.0));
        assert_eq!(config.block_size, 512);
        assert_eq!(config.loss, Loss::CrossEntropy);
        assert!((config.eps_iter() - DEFAULT_EPS / 10.0 * 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_load_ntga_c10_cnn() {
        let config = load_ntga_config("config/ntga_c10_cnn.json").expect("Failed to load ntga_c10_cnn");

        assert_eq!(config.surrogate_kind().unwrap(), SurrogateKind::Cnn);
        assert_eq!(config.t, Some(64.0));
        assert_eq!(config.w_var, 1.76);
        assert_eq!(config.b_var, 0.18);
    }

    #[test]
    fn test_load_ntga_linear_infinite_time() {
        let config = load_ntga_config("config/ntga_c10_linear.json").expect("Failed to load linear config");

        assert_eq!(config.surrogate_kind().unwrap(), SurrogateKind::Linear);
        assert_eq!(config.t, None);
        assert_eq!(config.loss, Loss::Mse);
        assert_eq!(config.block_size, 256);
        assert_eq!(config.nb_iter, 10);
    }

    #[test]
    fn test_load_rem_configs() {
        let c10 = load_rem_config("config/rem_c10.json").expect("Failed to load rem_c10");
        assert_eq!(c10.model, ModelKind::Cnn);
        assert_eq!(c10.max_rounds, None);
        assert!((c10.step_size() - c10.eps / 2.0).abs() < 1e-9);
        assert!((c10.robust_eps() - c10.eps / 2.0).abs() < 1e-9);

        let svhn = load_rem_config("config/rem_svhn_mlp.json").expect("Failed to load rem_svhn_mlp");
        assert_eq!(svhn.dataset, DatasetKind::Svhn);
        assert_eq!(svhn.model, ModelKind::Mlp);
        assert_eq!(svhn.hidden, 512);
        assert_eq!(svhn.max_rounds, Some(50));
    }
}

// ============================================================================
// Defaults and Validation Tests
// ============================================================================

mod validation_tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let (_dir, path) = write_config("{}");
        let ntga = load_ntga_config(&path).unwrap();
        let rem = load_rem_config(&path).unwrap();

        assert_eq!(ntga.nb_iter, NtgaConfig::default().nb_iter);
        assert_eq!(ntga.batch_size, 30);
        assert_eq!(rem.batch_size, RemConfig::default().batch_size);
        assert_eq!(rem.train_steps, 10);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let (_dir, path) = write_config(r#"{ "block_sise": 10 }"#);
        assert!(matches!(load_ntga_config(&path), Err(PoisonError::Json(_))));
    }

    #[test]
    fn test_invalid_json() {
        let (_dir, path) = write_config("{ not json");
        assert!(matches!(load_rem_config(&path), Err(PoisonError::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_ntga_config("config/does_not_exist.json"),
            Err(PoisonError::Io(_))
        ));
    }

    #[test]
    fn test_surrogate_defaults_to_cnn() {
        let (_dir, path) = write_config("{}");
        let config = load_ntga_config(&path).unwrap();
        assert_eq!(config.surrogate_kind().unwrap(), SurrogateKind::Cnn);
    }

    #[test]
    fn test_unknown_surrogate_is_config_error() {
        let (_dir, path) = write_config(r#"{ "surrogate": "resnet" }"#);
        assert!(matches!(load_ntga_config(&path), Err(PoisonError::Config(_))));
    }

    #[test]
    fn test_unsupported_dataset() {
        let (_dir, path) = write_config(r#"{ "dataset": "mnist" }"#);
        assert!(load_rem_config(&path).is_err());
    }

    #[test]
    fn test_out_of_range_values() {
        let bad_ntga = NtgaConfig {
            clip_min: 1.0,
            clip_max: 0.0,
            ..NtgaConfig::default()
        };
        assert!(matches!(bad_ntga.validate(), Err(PoisonError::Config(_))));

        let bad_rem = RemConfig {
            max_rounds: Some(0),
            ..RemConfig::default()
        };
        assert!(matches!(bad_rem.validate(), Err(PoisonError::Config(_))));

        let bad_ratio = RemConfig {
            robust_ratio: 1.5,
            ..RemConfig::default()
        };
        assert!(bad_ratio.validate().is_err());
    }

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!("mlp".parse::<ModelKind>().unwrap(), ModelKind::Mlp);
        assert!(matches!("resnet".parse::<ModelKind>(), Err(PoisonError::Config(_))));
    }
}
