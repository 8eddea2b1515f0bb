use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::Path;

/// Capability switches and threshold for one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub objects: bool,
    pub poses: bool,
    pub emotions: bool,
    pub threshold: Option<i64>,
}

impl UploadOptions {
    /// Form fields besides the file. Flags are only sent when enabled.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        for (enabled, name) in [
            (self.objects, "detect_objects"),
            (self.poses, "detect_poses"),
            (self.emotions, "detect_emotions"),
        ] {
            if enabled {
                fields.push((name, "on".to_string()));
            }
        }
        if let Some(threshold) = self.threshold {
            fields.push(("confidence_threshold", threshold.to_string()));
        }
        fields
    }
}

/// Thin JSON client for the oculusd HTTP API.
pub struct OculusClient {
    http: reqwest::Client,
    base: String,
}

impl OculusClient {
    pub fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: server.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn upload(&self, path: &Path, options: &UploadOptions) -> Result<Value> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?
            .to_string();

        let mut form = Form::new().part("file", Part::bytes(content).file_name(filename));
        for (name, value) in options.form_fields() {
            form = form.text(name, value);
        }

        let request = self.http.post(self.url("/upload")).multipart(form);
        Self::send(request).await
    }

    pub async fn verify(&self, record_id: &str, index: usize) -> Result<Value> {
        let body = json!({ "record_id": record_id, "object_index": index });
        Self::send(self.http.post(self.url("/verify_detection")).json(&body)).await
    }

    pub async fn history(&self, search: Option<&str>) -> Result<Value> {
        let mut request = self.http.get(self.url("/history"));
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }
        Self::send(request).await
    }

    pub async fn clear(&self) -> Result<Value> {
        Self::send(self.http.post(self.url("/history/clear"))).await
    }

    pub async fn analytics(&self, limit: Option<usize>) -> Result<Value> {
        let mut request = self.http.get(self.url("/analytics"));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        Self::send(request).await
    }

    pub async fn health(&self) -> Result<Value> {
        Self::send(self.http.get(self.url("/health"))).await
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("request to oculusd failed")?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("oculusd returned a non-JSON response ({status})"))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("oculusd returned {status}: {message}");
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields_only_enabled_flags() {
        let options = UploadOptions {
            objects: true,
            poses: false,
            emotions: true,
            threshold: Some(45),
        };
        assert_eq!(
            options.form_fields(),
            vec![
                ("detect_objects", "on".to_string()),
                ("detect_emotions", "on".to_string()),
                ("confidence_threshold", "45".to_string()),
            ]
        );
        assert!(UploadOptions::default().form_fields().is_empty());
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = OculusClient::new("http://localhost:8000/");
        assert_eq!(client.url("/health"), "http://localhost:8000/health");
    }
}
