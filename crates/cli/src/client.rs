//! API client for communicating with the prediction server

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// A request the server rejected
#[derive(Debug, Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// API client for the prediction server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(e) => ApiError {
                    status: status.as_u16(),
                    code: e.code,
                    message: e.error,
                },
                Err(_) => ApiError {
                    status: status.as_u16(),
                    code: "unexpected_response".to_string(),
                    message: body,
                },
            };
            return Err(error.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn predict_status(&self, case_id: &str, case_data: Option<serde_json::Value>) -> Result<PredictionResponse> {
        self.post("api/v1/predict/status", &PredictRequest::new(case_id, case_data))
            .await
    }

    pub async fn predict_time(&self, case_id: &str, case_data: Option<serde_json::Value>) -> Result<PredictionResponse> {
        self.post("api/v1/predict/processing-time", &PredictRequest::new(case_id, case_data))
            .await
    }

    pub async fn explain(&self, case_id: &str, case_data: Option<serde_json::Value>) -> Result<ExplanationResponse> {
        match case_data {
            Some(_) => {
                self.post("api/v1/predict/explain", &PredictRequest::new(case_id, case_data))
                    .await
            }
            None => self.get(&format!("api/v1/predict/explain/{}", case_id)).await,
        }
    }

    pub async fn summary(&self, case_id: &str, case_data: Option<serde_json::Value>) -> Result<SummaryResponse> {
        self.post("api/v1/predict/summary", &PredictRequest::new(case_id, case_data))
            .await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.get("api/v1/models").await
    }

    pub async fn active_model(&self) -> Result<ActiveModel> {
        self.get("api/v1/models/active").await
    }

    pub async fn switch_model(&self, model_type: &str) -> Result<ActiveModel> {
        self.post(
            "api/v1/models/switch",
            &SwitchRequest {
                model_type: model_type.to_string(),
            },
        )
        .await
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_data: Option<serde_json::Value>,
}

impl PredictRequest {
    fn new(case_id: &str, case_data: Option<serde_json::Value>) -> Self {
        Self {
            case_id: case_id.to_string(),
            case_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub model_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub approved: f64,
    pub rfe: f64,
    pub denied: f64,
}

impl StatusBreakdown {
    /// Outcome name and probability of the most likely outcome
    pub fn most_likely(&self) -> (&'static str, f64) {
        [("approved", self.approved), ("rfe", self.rfe), ("denied", self.denied)]
            .into_iter()
            .fold(("approved", f64::NEG_INFINITY), |best, next| if next.1 > best.1 { next } else { best })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub id: String,
    pub case_id: String,
    pub predicted_status: StatusBreakdown,
    pub estimated_days_remaining: u32,
    pub confidence_interval: (u32, u32),
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub feature: String,
    pub impact: String,
    pub contribution: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationResponse {
    pub top_factors: Vec<Factor>,
    pub feature_importance: BTreeMap<String, f64>,
    pub model_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryFactor {
    pub feature: String,
    pub impact: String,
    pub contribution: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub top_factors: Vec<SummaryFactor>,
    pub confidence_level: String,
    pub model_confidence: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub trained: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveModel {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn prediction_body() -> String {
        json!({
            "id": "3f6c3c1e-8d1f-4a55-9a84-7c1f0f1c2b10",
            "case_id": "case-1",
            "predicted_status": { "approved": 0.72, "rfe": 0.18, "denied": 0.10 },
            "estimated_days_remaining": 45,
            "confidence_interval": [33, 58],
            "model_version": "v1.0.0-heuristic",
            "generated_at": "2026-03-01T12:00:00Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_predict_status_posts_case_id() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/predict/status")
            .match_body(mockito::Matcher::Json(json!({ "case_id": "case-1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(prediction_body())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let prediction = client.predict_status("case-1", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(prediction.confidence_interval, (33, 58));
        assert_eq!(prediction.predicted_status.most_likely().0, "approved");
    }

    #[tokio::test]
    async fn test_explain_without_data_uses_get() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/predict/explain/case-9")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "top_factors": [{
                        "feature": "prior_travel",
                        "impact": "positive",
                        "contribution": 0.15,
                        "description": "Previous US travel history"
                    }],
                    "feature_importance": { "prior_travel": 0.15 },
                    "model_confidence": 0.8
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let explanation = client.explain("case-9", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(explanation.top_factors[0].feature, "prior_travel");
    }

    #[tokio::test]
    async fn test_rejection_carries_error_code() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/models/switch")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "error": "backend 'baseline' has no trained model; train it before switching",
                    "code": "model_not_trained"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.switch_model("baseline").await.unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();

        assert_eq!(api_error.status, 400);
        assert_eq!(api_error.code, "model_not_trained");
    }

    #[tokio::test]
    async fn test_list_models() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    { "type": "heuristic", "version": "v1.0.0-heuristic", "metrics": {}, "trained": true, "is_active": true },
                    { "type": "baseline", "version": "v1.0.0-baseline", "trained_at": "2026-02-01T00:00:00Z",
                      "metrics": { "status_accuracy": 0.81 }, "trained": true, "is_active": false }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let models = client.list_models().await.unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[1].metrics["status_accuracy"], 0.81);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
