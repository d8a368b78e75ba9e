use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_core::{DetectorConfig, LbphParams, SessionBudget, DEFAULT_ADMIT_THRESHOLD};
use warden_hw::CameraConfig;

/// CLI configuration.
///
/// Built from defaults, then an optional TOML file (`--config` or
/// `WARDEN_CONFIG`), then `WARDEN_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub lbph: LbphParams,
    /// Root of the face sample dataset.
    pub dataset_dir: PathBuf,
    /// Trained model artifact.
    pub model_path: PathBuf,
    /// SeetaFace detector model file.
    pub detector_model: PathBuf,
    /// SQLite database holding registration details.
    pub db_path: PathBuf,
    /// Chi-square distance below which a face is admitted.
    pub admit_threshold: f64,
    /// Maximum frames pulled per verification.
    pub frame_budget: u32,
    pub verify_timeout_secs: u64,
    pub samples_per_enroll: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            lbph: LbphParams::default(),
            dataset_dir: data_dir.join("dataset"),
            model_path: data_dir.join("model.json"),
            detector_model: data_dir.join("seeta_fd_frontal_v1.0.bin"),
            db_path: data_dir.join("warden.db"),
            admit_threshold: DEFAULT_ADMIT_THRESHOLD,
            frame_budget: 100,
            verify_timeout_secs: 15,
            samples_per_enroll: warden_core::session::DEFAULT_SAMPLES_PER_ENROLL,
        }
    }
}

impl Config {
    /// Load the configuration the binary runs with.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("WARDEN_CONFIG").map(PathBuf::from));

        let mut config = match &file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());

        tracing::debug!(config_file = ?file, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `WARDEN_*` overrides. Unparseable values are ignored with a
    /// warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WARDEN_CAMERA_DEVICE") {
            self.camera.device = v;
        }
        if let Some(v) = lookup("WARDEN_DATASET_DIR") {
            self.dataset_dir = v.into();
        }
        if let Some(v) = lookup("WARDEN_MODEL_PATH") {
            self.model_path = v.into();
        }
        if let Some(v) = lookup("WARDEN_DETECTOR_MODEL") {
            self.detector_model = v.into();
        }
        if let Some(v) = lookup("WARDEN_DB_PATH") {
            self.db_path = v.into();
        }
        if let Some(v) = lookup("WARDEN_CLAHE") {
            self.camera.clahe = !matches!(v.as_str(), "0" | "false" | "no" | "off");
        }

        parse_into(&lookup, "WARDEN_ADMIT_THRESHOLD", &mut self.admit_threshold);
        parse_into(&lookup, "WARDEN_FRAME_BUDGET", &mut self.frame_budget);
        parse_into(&lookup, "WARDEN_VERIFY_TIMEOUT_SECS", &mut self.verify_timeout_secs);
        parse_into(&lookup, "WARDEN_SAMPLES_PER_ENROLL", &mut self.samples_per_enroll);
        parse_into(&lookup, "WARDEN_MIN_FACE_SIZE", &mut self.detector.min_face_size);
        parse_into(&lookup, "WARDEN_WARMUP_FRAMES", &mut self.camera.warmup_frames);
    }

    /// Budget for a camera-driven verification.
    pub fn verify_budget(&self) -> SessionBudget {
        SessionBudget {
            max_frames: Some(self.frame_budget),
            timeout: Some(Duration::from_secs(self.verify_timeout_secs)),
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("warden")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.admit_threshold, 45.0);
        assert_eq!(config.samples_per_enroll, 20);
        assert!(config.dataset_dir.ends_with("warden/dataset"));
    }

    #[test]
    fn test_toml_partial() {
        let config = Config::from_toml(
            r#"
            admit_threshold = 38.5
            dataset_dir = "/srv/warden/faces"

            [camera]
            device = "/dev/video2"
            clahe = true

            [detector]
            min_face_size = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.admit_threshold, 38.5);
        assert_eq!(config.dataset_dir, PathBuf::from("/srv/warden/faces"));
        assert_eq!(config.camera.device, "/dev/video2");
        assert!(config.camera.clahe);
        assert_eq!(config.camera.width, CameraConfig::default().width);
        assert_eq!(config.detector.min_face_size, 60);
        assert_eq!(config.frame_budget, 100);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("admit_treshold = 10").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("WARDEN_CAMERA_DEVICE", "/dev/video4"),
            ("WARDEN_ADMIT_THRESHOLD", "50"),
            ("WARDEN_FRAME_BUDGET", "12"),
            ("WARDEN_MIN_FACE_SIZE", "80"),
            ("WARDEN_CLAHE", "1"),
            ("WARDEN_DB_PATH", "/tmp/w.db"),
        ]));
        assert_eq!(config.camera.device, "/dev/video4");
        assert_eq!(config.admit_threshold, 50.0);
        assert_eq!(config.frame_budget, 12);
        assert_eq!(config.detector.min_face_size, 80);
        assert!(config.camera.clahe);
        assert_eq!(config.db_path, PathBuf::from("/tmp/w.db"));
    }

    #[test]
    fn test_bad_override_keeps_value() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("WARDEN_SAMPLES_PER_ENROLL", "lots")]));
        assert_eq!(config.samples_per_enroll, 20);
    }

    #[test]
    fn test_verify_budget() {
        let config = Config {
            frame_budget: 30,
            verify_timeout_secs: 5,
            ..Config::default()
        };
        assert_eq!(
            config.verify_budget(),
            SessionBudget {
                max_frames: Some(30),
                timeout: Some(Duration::from_secs(5)),
            }
        );
    }
}
