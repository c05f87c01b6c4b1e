use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::{Parser, ValueEnum};
use rotating_log_writer::{
    Compression, CompressionPolicy, Config, RetentionPolicy, RotationPolicy,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse a duration string for clap (e.g., "7 days", "1 week", "168h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| {
        format!(
            "Invalid duration format: '{}'. Use formats like '7 days', '1 week', '168h'. Error: {}",
            s, e
        )
    })
}

/// Parse a bytesize string for clap (e.g., "100MB", "1.5GB", "512MiB")
fn parse_bytesize(s: &str) -> Result<ByteSize, String> {
    s.parse().map_err(|e| {
        format!(
            "Invalid size format: '{}'. Use formats like '100MB', '1.5GB', '512MiB'. Error: {}",
            s, e
        )
    })
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RotationConfig {
    /// Maximum size of the active log file (accepts human-readable sizes like "10MB", "1GiB")
    #[arg(
        long = "max-segment-size",
        env = "ROTLOG_MAX_SEGMENT_SIZE",
        default_value = "10MB",
        value_parser = parse_bytesize
    )]
    #[serde(with = "bytesize_serde")]
    pub max_segment_size: ByteSize,

    /// Rotate a non-empty log file once it has been active this long (e.g. "1h", "1 day")
    #[arg(
        long = "max-segment-age",
        env = "ROTLOG_MAX_SEGMENT_AGE",
        value_parser = parse_duration
    )]
    #[serde(with = "humantime_serde")]
    pub max_segment_age: Option<Duration>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_segment_size: ByteSize::mb(10),
            max_segment_age: None,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Maximum number of backups to keep
    #[arg(long = "max-backups", env = "ROTLOG_MAX_BACKUPS", default_value = "5")]
    pub max_backups: usize,

    /// Maximum total size of all backups, 0 for no limit (accepts human-readable sizes)
    #[arg(
        long = "max-total-size",
        env = "ROTLOG_MAX_TOTAL_SIZE",
        default_value = "0",
        value_parser = parse_bytesize
    )]
    #[serde(with = "bytesize_serde")]
    pub max_total_size: ByteSize,

    /// Maximum age of backups to keep (e.g. "7 days", "1 week")
    #[arg(long = "max-age", env = "ROTLOG_MAX_AGE", value_parser = parse_duration)]
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: 5,
            max_total_size: ByteSize::b(0),
            max_age: None,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Codec applied to rotated log files
    #[arg(long = "compress", env = "ROTLOG_COMPRESS", value_enum, default_value = "gzip")]
    #[serde(rename = "codec")]
    pub compress: CompressionKind,

    /// Gzip compression level (0-9)
    #[arg(
        long = "compression-level",
        env = "ROTLOG_COMPRESSION_LEVEL",
        default_value = "6",
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    pub level: u32,

    /// Compress inside the rotating write instead of on a background thread
    #[arg(long = "foreground-compression", default_value = "false")]
    pub foreground: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            compress: CompressionKind::Gzip,
            level: 6,
            foreground: false,
        }
    }
}

#[derive(Default, Debug, Parser, Clone, Serialize, Deserialize)]
#[command(name = "rotlog")]
#[command(about = "Copy stdin into a size-rotated log file.")]
#[command(version)]
#[serde(default, deny_unknown_fields)]
pub struct RotlogConfig {
    /// Path of the active log file; backups are created next to it
    #[arg(long = "path", env = "ROTLOG_PATH")]
    pub path: Option<PathBuf>,

    // rotation
    #[command(flatten)]
    #[serde(rename = "rotation")]
    pub rotation: RotationConfig,

    // retention
    #[command(flatten)]
    #[serde(rename = "retention")]
    pub retention: RetentionConfig,

    // compression
    #[command(flatten)]
    #[serde(rename = "compression")]
    pub compression: CompressionConfig,

    /// Load the configuration from a YAML file instead of the command line
    #[arg(long = "config", env = "ROTLOG_CONFIG")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl RotlogConfig {
    pub fn new() -> Result<Self> {
        let cli = Self::parse();

        let config = match &cli.config_file {
            Some(path) => Self::from_yaml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            // load from CLI args
            None => cli,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: RotlogConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Some(path) = &self.path else {
            anyhow::bail!("a log file path is required (--path or `path:` in the config file)");
        };

        if path.file_name().is_none() {
            anyhow::bail!("log file path must name a file, got: {}", path.display());
        }

        if self.rotation.max_segment_size.as_u64() == 0 {
            anyhow::bail!("max segment size must be greater than zero");
        }

        if self.compression.level > 9 {
            anyhow::bail!(
                "compression level must be between 0 and 9, got: {}",
                self.compression.level
            );
        }

        Ok(())
    }

    /// Builds the writer configuration.
    pub fn writer_config(&self) -> Result<Config> {
        self.validate()?;
        let path = self
            .path
            .clone()
            .context("a log file path is required")?;

        let mut rotation =
            RotationPolicy::default().with_max_segment_bytes(self.rotation.max_segment_size.as_u64());
        if let Some(age) = self.rotation.max_segment_age {
            rotation = rotation.with_max_segment_age(age);
        }

        let mut retention = RetentionPolicy::default().with_max_backups(self.retention.max_backups);
        if self.retention.max_total_size.as_u64() > 0 {
            retention = retention.with_max_total_size(self.retention.max_total_size.as_u64());
        }
        if let Some(age) = self.retention.max_age {
            retention = retention.with_max_age(age);
        }

        let compression = match self.compression.compress {
            CompressionKind::None => CompressionPolicy::disabled(),
            CompressionKind::Gzip => CompressionPolicy::default()
                .with_compression(Compression::Gzip {
                    level: self.compression.level,
                })
                .with_background(!self.compression.foreground),
        };

        Ok(Config::new(path, rotation, retention).with_compression_policy(compression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = RotlogConfig::try_parse_from(["rotlog", "--path", "/tmp/app.log"]).unwrap();
        config.validate().unwrap();

        let writer_config = config.writer_config().unwrap();
        assert_eq!(writer_config.base_path, PathBuf::from("/tmp/app.log"));
        assert_eq!(
            writer_config.rotation_policy.max_segment_bytes,
            ByteSize::mb(10).as_u64()
        );
        assert_eq!(writer_config.retention_policy.max_backups, 5);
        assert_eq!(writer_config.retention_policy.max_total_size, None);
        assert_eq!(
            writer_config.compression_policy.compression,
            Compression::Gzip { level: 6 }
        );
        assert!(writer_config.compression_policy.background);
    }

    #[test]
    fn test_cli_overrides() {
        let config = RotlogConfig::try_parse_from([
            "rotlog",
            "--path",
            "app.log",
            "--max-segment-size",
            "1KiB",
            "--max-segment-age",
            "1h",
            "--max-backups",
            "2",
            "--max-total-size",
            "4KiB",
            "--max-age",
            "7 days",
            "--compress",
            "none",
        ])
        .unwrap();

        let writer_config = config.writer_config().unwrap();
        assert_eq!(writer_config.rotation_policy.max_segment_bytes, 1024);
        assert_eq!(
            writer_config.rotation_policy.max_segment_age,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(writer_config.retention_policy.max_backups, 2);
        assert_eq!(writer_config.retention_policy.max_total_size, Some(4096));
        assert_eq!(
            writer_config.retention_policy.max_age,
            Some(Duration::from_secs(7 * 24 * 3600))
        );
        assert_eq!(
            writer_config.compression_policy.compression,
            Compression::None
        );
    }

    #[test]
    fn test_cli_rejects_bad_level() {
        let result = RotlogConfig::try_parse_from([
            "rotlog",
            "--path",
            "app.log",
            "--compression-level",
            "12",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_path_is_rejected() {
        let config = RotlogConfig::try_parse_from(["rotlog"]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotlog.yaml");
        fs::write(
            &path,
            r#"
path: /var/log/app/app.log
rotation:
  max_segment_size: 1 MiB
  max_segment_age: 30m
retention:
  max_backups: 3
compression:
  codec: gzip
  level: 9
  foreground: true
"#,
        )
        .unwrap();

        let config = RotlogConfig::from_yaml_file(&path).unwrap();
        let writer_config = config.writer_config().unwrap();

        assert_eq!(writer_config.rotation_policy.max_segment_bytes, 1024 * 1024);
        assert_eq!(
            writer_config.rotation_policy.max_segment_age,
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(writer_config.retention_policy.max_backups, 3);
        assert_eq!(
            writer_config.compression_policy.compression,
            Compression::Gzip { level: 9 }
        );
        assert!(!writer_config.compression_policy.background);
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotlog.yaml");
        fs::write(&path, "path: app.log\nmax_files: 3\n").unwrap();

        assert!(RotlogConfig::from_yaml_file(&path).is_err());
    }
}
