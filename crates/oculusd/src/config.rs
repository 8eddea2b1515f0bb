use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Daemon configuration, loaded from `OCULUS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the SQLite databases, or `:memory:`.
    pub store_uri: String,
    /// Database file stem inside `store_uri`.
    pub database_name: String,
    /// Table holding detection records.
    pub collection_name: String,
    /// Where uploads are written and served from.
    pub upload_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Records returned by a history query.
    pub history_limit: usize,
    /// ONNX Runtime intra-op threads per model session.
    pub intra_threads: usize,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        Ok(Self {
            store_uri: required("OCULUS_STORE_URI")?,
            database_name: required("OCULUS_DATABASE_NAME")?,
            collection_name: required("OCULUS_COLLECTION_NAME")?,
            upload_dir: required("OCULUS_UPLOAD_DIR").map(PathBuf::from)?,
            bind_addr: env_parse(&lookup, "OCULUS_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8000)))?,
            model_dir: lookup("OCULUS_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
            history_limit: env_parse(&lookup, "OCULUS_HISTORY_LIMIT", 50)?,
            intra_threads: env_parse(&lookup, "OCULUS_INTRA_THREADS", 2)?,
        })
    }

    /// YOLOv8 object detection model.
    pub fn object_model_path(&self) -> PathBuf {
        self.model_dir.join("yolov8m.onnx")
    }

    /// YOLOv8 pose model.
    pub fn pose_model_path(&self) -> PathBuf {
        self.model_dir.join("yolov8m-pose.onnx")
    }

    /// SCRFD face detection model.
    pub fn face_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// FER+ emotion classification model.
    pub fn emotion_model_path(&self) -> PathBuf {
        self.model_dir.join("emotion-ferplus-8.onnx")
    }
}

/// Optional variable: absent means `default`, present but unparsable is an error.
fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("OCULUS_STORE_URI", "/var/lib/oculus"),
        ("OCULUS_DATABASE_NAME", "oculus"),
        ("OCULUS_COLLECTION_NAME", "detections"),
        ("OCULUS_UPLOAD_DIR", "static/uploads"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.store_uri, "/var/lib/oculus");
        assert_eq!(config.upload_dir, PathBuf::from("static/uploads"));
        assert_eq!(config.bind_addr, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.object_model_path(), PathBuf::from("models/yolov8m.onnx"));
    }

    #[test]
    fn test_each_required_variable() {
        for (missing, _) in REQUIRED {
            let pairs: Vec<_> = REQUIRED.into_iter().filter(|(k, _)| *k != missing).collect();
            assert_eq!(
                Config::from_lookup(lookup(&pairs)),
                Err(ConfigError::Missing(missing))
            );
        }
    }

    #[test]
    fn test_blank_required_is_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("OCULUS_STORE_URI", "  ");
        assert_eq!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Missing("OCULUS_STORE_URI"))
        );
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OCULUS_BIND_ADDR", "0.0.0.0:9000"));
        pairs.push(("OCULUS_HISTORY_LIMIT", "10"));
        pairs.push(("OCULUS_MODEL_DIR", "/opt/models"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.emotion_model_path(), PathBuf::from("/opt/models/emotion-ferplus-8.onnx"));

        pairs.push(("OCULUS_INTRA_THREADS", "many"));
        assert_eq!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid {
                key: "OCULUS_INTRA_THREADS",
                value: "many".into()
            })
        );
    }
}
