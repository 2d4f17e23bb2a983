//! Round trip of poisoned datasets through the PNG exporter.

use rust_data_poisoning::data::{export::to_u8, Dataset, ImageShape, PoisonExporter, Sample};

fn rgb_dataset() -> Dataset {
    let shape = ImageShape::new(3, 2, 3);
    let samples = [4usize, 9, 31]
        .iter()
        .enumerate()
        .map(|(k, &index)| Sample {
            image: (0..shape.len()).map(|i| ((i * 37 + k * 11) % 101) as f32 / 100.0).collect(),
            label: k,
            index,
        })
        .collect();
    Dataset::new("roundtrip", shape, 3, samples).unwrap()
}

// ============================================================================
// Exporter Tests
// ============================================================================

mod exporter_tests {
    use super::*;

    #[test]
    fn test_export_round_trip_within_quantization() {
        let dir = tempfile::tempdir().unwrap();
        let ds = rgb_dataset();
        let exporter = PoisonExporter::new(dir.path(), "c10");

        let written = exporter.export(&ds).unwrap();
        assert_eq!(written, 3);

        for sample in ds.samples() {
            let path = dir.path().join("c10").join("data").join(format!("{}.png", sample.index));
            assert!(path.exists(), "missing {}", path.display());

            let loaded = exporter.load(sample.index).unwrap();
            assert_eq!(loaded.len(), sample.image.len());
            for (&a, &b) in loaded.iter().zip(&sample.image) {
                assert!((a - b).abs() <= 0.5 / 255.0 + 1e-6);
                assert_eq!(to_u8(a), to_u8(b));
            }
        }
    }

    #[test]
    fn test_export_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ds = rgb_dataset();
        let exporter = PoisonExporter::new(dir.path(), "svhn");
        exporter.export(&ds).unwrap();
        exporter.export(&ds).unwrap();

        let files = std::fs::read_dir(exporter.dir()).unwrap().count();
        assert_eq!(files, 3);
    }
}
