use std::fs;
use tempfile::tempdir;

#[cfg(test)]
mod config_tests {
    use super::*;
    use sacct_eff::config::{Config, DEFAULT_FORMAT};

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        // Logging defaults
        assert_eq!(config.logging.level, "ERROR");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "console");

        // Display defaults
        assert_eq!(config.display.format, DEFAULT_FORMAT);
        assert_eq!(config.display.color, None);
        assert_eq!(config.display.column_gap, 2);

        // Threshold defaults
        assert_eq!(config.thresholds.high_low, 20.0);
        assert_eq!(config.thresholds.high_good, 80.0);
        assert_eq!(config.thresholds.mid_low, 20.0);
        assert_eq!(config.thresholds.mid_high, 90.0);
        assert_eq!(config.thresholds.mid_good, 60.0);
        assert_eq!(config.thresholds.cpu_tolerance, 1.05);

        // Query defaults
        assert_eq!(config.query.sacct, "sacct");
        assert_eq!(config.query.scontrol, "scontrol");
        assert_eq!(config.query.delimiter, "^|^");
        assert_eq!(config.query.user_window_days, 7);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sacct-eff.toml");
        fs::write(
            &path,
            r#"
[display]
format = "JobID,State,CPUEff"
color = false

[thresholds]
high_good = 75.0
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.display.format, "JobID,State,CPUEff");
        assert_eq!(config.display.color, Some(false));
        assert_eq!(config.display.column_gap, 2);
        assert_eq!(config.thresholds.high_good, 75.0);
        assert_eq!(config.thresholds.mid_high, 90.0);
        assert_eq!(config.query.delimiter, "^|^");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_query_and_threshold_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[query]
sacct = "/opt/slurm/bin/sacct"
user_window_days = 14

[display]
color = true

[thresholds]
cpu_tolerance = 1.1
"#,
        )
        .unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.query.sacct, "/opt/slurm/bin/sacct");
        assert_eq!(loaded.query.scontrol, "scontrol");
        assert_eq!(loaded.query.user_window_days, 14);
        assert_eq!(loaded.display.color, Some(true));
        assert_eq!(loaded.thresholds.cpu_tolerance, 1.1);
        assert_eq!(loaded.thresholds.high_good, 80.0);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[display\nformat = ").unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        let missing = dir.path().join("missing.toml");
        assert!(Config::load_from_file(&missing).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.query.delimiter = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.mid_high = 150.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.high_low = 90.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.cpu_tolerance = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.query.user_window_days = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.logging.output = "file".to_string();
        config.paths.log_directory = dir.path().join("nested").join("logs");

        assert!(config.validate().is_ok());
        assert!(config.paths.log_directory.is_dir());
    }
}
