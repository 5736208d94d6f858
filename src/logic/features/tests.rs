//! Extractor tests against a real (temporary) filesystem

#[cfg(test)]
mod integration_tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::logic::features::layout::*;
    use crate::logic::features::{ExtractionError, ExtractorConfig, FeatureExtractor, FeatureRecord};
    use crate::logic::sensor::{EventKind, KernelEvent};

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(&ExtractorConfig::default()).unwrap()
    }

    fn event(kind: EventKind, path: &str, context: Vec<u8>) -> KernelEvent {
        KernelEvent::new(7, 100, 4242, 1, kind, path, context).unwrap()
    }

    #[test]
    fn test_write_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("report.docx");
        fs::write(&file, vec![0u8; 4096]).unwrap();

        let record = extractor()
            .extract(&event(EventKind::FileWrite, file.to_str().unwrap(), vec![]))
            .unwrap();

        assert!(!record.degraded);
        assert_eq!(record.event_id.0, 7);
        assert_eq!(record.get(IDX_EVENT_WEIGHT), 0.3);
        assert_eq!(record.get(IDX_EXTENSION_RISK), 0.0);
        assert!(record.get(IDX_FILE_SIZE) > 0.3);
        assert!(record.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_deterministic() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x7q2kz9w.locked");
        fs::write(&file, b"ciphertext").unwrap();
        let ev = event(EventKind::FileWrite, file.to_str().unwrap(), (0..=255).collect());

        let ex = extractor();
        let a = ex.extract(&ev).unwrap();
        let b = ex.extract(&ev).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(IDX_EXTENSION_RISK), 0.9);
        assert!((a.get(IDX_CONTEXT_ENTROPY) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_write_to_deleted_file_fails() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone.txt");

        let err = extractor()
            .extract(&event(EventKind::FileWrite, gone.to_str().unwrap(), vec![]))
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MetadataUnavailable { kind: std::io::ErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn test_create_does_not_need_metadata() {
        let record = extractor()
            .extract(&event(EventKind::FileCreate, "C:\\Users\\bob\\Documents\\new.txt", vec![]))
            .unwrap();
        assert_eq!(record.get(IDX_SENSITIVE_DIR), 1.0);
        assert_eq!(record.get(IDX_FILE_SIZE), 0.0);
    }

    #[test]
    fn test_protected_and_suspicious_signals() {
        let ex = extractor();

        let protected = ex
            .extract(&event(EventKind::FileCreate, "C:\\Users\\test\\FILE_RAHASIA.txt", vec![]))
            .unwrap();
        assert_eq!(protected.get(IDX_PROTECTED_TARGET), 1.0);

        let image = ex
            .extract(&event(EventKind::ProcessCreate, "C:\\Temp\\cryptolocker.exe", vec![]))
            .unwrap();
        assert_eq!(image.get(IDX_SUSPICIOUS_IMAGE), 1.0);
        assert_eq!(image.get(IDX_TEMP_OR_HIDDEN), 1.0);
        assert_eq!(image.get(IDX_EXTENSION_RISK), 0.7);
    }

    #[test]
    fn test_empty_path_rejected_for_artifacts() {
        let err = extractor().extract(&event(EventKind::FileCreate, "", vec![])).unwrap_err();
        assert_eq!(err, ExtractionError::EmptyPath { kind: EventKind::FileCreate });

        let net = extractor()
            .extract(&event(EventKind::NetworkConnect, "10.0.0.5:4444", vec![]))
            .unwrap();
        assert_eq!(net.get(IDX_NETWORK), 1.0);
        assert_eq!(net.get(IDX_EXTENSION_RISK), 0.0);
    }

    #[test]
    fn test_worst_case_record() {
        let record = FeatureRecord::worst_case(&event(EventKind::FileDelete, "C:\\x", vec![]));
        assert!(record.degraded);
        assert!(record.values.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = ExtractorConfig {
            sensitive_dirs: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            FeatureExtractor::new(&config),
            Err(ExtractionError::InvalidPattern { .. })
        ));
    }
}
