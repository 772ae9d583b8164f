use reqwest::blocking::{multipart, Client};
use thiserror::Error;

use crate::metrics::FaceMetrics;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/predict";

/// Face-shape classification returned by the prediction endpoint.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub shape: String,
    pub confidence: f64,
}

impl Prediction {
    /// Confidence as a display percentage with one fractional digit.
    pub fn confidence_percent(&self) -> f64 {
        (self.confidence * 1000.0).round() / 10.0
    }
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("prediction request could not be sent")]
    Transport(#[from] reqwest::Error),
    /// Message taken verbatim from the server (`error` field or text body).
    #[error("{0}")]
    Server(String),
    /// Non-2xx JSON response without a usable `error` field.
    #[error("prediction request failed")]
    Failed,
    /// Non-JSON response with an empty body, or a JSON body that does not
    /// parse at all.
    #[error("unreadable response from server")]
    UnreadableResponse,
    /// 2xx JSON response missing `shape` or `confidence`.
    #[error("incomplete response from server")]
    IncompleteResponse,
}

pub struct PredictClient {
    api_url: String,
    client: Client,
}

impl PredictClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: Client::new(),
        }
    }

    /// POST one image as multipart form data. Quality metric fields are
    /// attached only when the camera flow produced them.
    pub fn predict(
        &self,
        image: Vec<u8>,
        filename: &str,
        mime: &str,
        metrics: Option<&FaceMetrics>,
    ) -> Result<Prediction, PredictError> {
        let mut form = multipart::Form::new().part(
            "image",
            multipart::Part::bytes(image)
                .file_name(filename.to_string())
                .mime_str(mime)?,
        );
        if let Some(m) = metrics {
            for (field, value) in metric_fields(m) {
                form = form.text(field, value);
            }
        }

        let response = self.client.post(&self.api_url).multipart(form).send()?;
        let ok = response.status().is_success();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text()?;

        parse_response(ok, content_type.as_deref(), &body)
    }
}

/// Quality scores as decimal strings with three fractional digits, the way
/// the endpoint expects them.
fn metric_fields(metrics: &FaceMetrics) -> [(&'static str, String); 4] {
    [
        ("face_detection_score", format!("{:.3}", metrics.detection_score)),
        ("face_overall_score", format!("{:.3}", metrics.overall_score)),
        ("face_center_score", format!("{:.3}", metrics.center_score)),
        ("face_size_score", format!("{:.3}", metrics.size_score)),
    ]
}

/// Interpret one endpoint response.
///
/// A non-JSON content type is surfaced as its text body (or a generic
/// unreadable-response failure when empty). A non-2xx JSON body is surfaced
/// through its `error` field when one exists. A 2xx body must carry a
/// string `shape` and a numeric `confidence`.
fn parse_response(
    ok: bool,
    content_type: Option<&str>,
    body: &str,
) -> Result<Prediction, PredictError> {
    let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
    if !is_json {
        let text = body.trim();
        return Err(if text.is_empty() {
            PredictError::UnreadableResponse
        } else {
            PredictError::Server(text.to_string())
        });
    }

    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|_| PredictError::UnreadableResponse)?;

    if !ok {
        return Err(match payload.get("error").and_then(|v| v.as_str()) {
            Some(message) if !message.is_empty() => PredictError::Server(message.to_string()),
            _ => PredictError::Failed,
        });
    }

    let shape = payload.get("shape").and_then(|v| v.as_str());
    let confidence = payload.get("confidence").and_then(|v| v.as_f64());
    match (shape, confidence) {
        (Some(shape), Some(confidence)) => Ok(Prediction {
            shape: shape.to_string(),
            confidence,
        }),
        _ => Err(PredictError::IncompleteResponse),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const JSON: Option<&str> = Some("application/json; charset=utf-8");

    #[test]
    fn success_response_parses() {
        let p = parse_response(true, JSON, r#"{"shape":"oval","confidence":0.873}"#).unwrap();
        assert_eq!(p.shape, "oval");
        assert!((p.confidence - 0.873).abs() < 1e-9);
        assert!((p.confidence_percent() - 87.3).abs() < 1e-9);
    }

    #[test]
    fn server_error_field_is_surfaced_verbatim() {
        let err = parse_response(false, JSON, r#"{"error":"model unavailable"}"#).unwrap_err();
        assert_eq!(err.to_string(), "model unavailable");
    }

    #[test]
    fn non_2xx_without_error_field_is_generic() {
        let err = parse_response(false, JSON, r#"{"status":"oops"}"#).unwrap_err();
        assert!(matches!(err, PredictError::Failed));
        assert_eq!(err.to_string(), "prediction request failed");
    }

    #[test]
    fn non_json_body_is_surfaced_as_text() {
        let err = parse_response(false, Some("text/html"), "  Bad Gateway \n").unwrap_err();
        assert_eq!(err.to_string(), "Bad Gateway");

        let err = parse_response(true, None, "").unwrap_err();
        assert!(matches!(err, PredictError::UnreadableResponse));
    }

    #[test]
    fn missing_fields_are_incomplete() {
        let err = parse_response(true, JSON, r#"{"shape":"oval"}"#).unwrap_err();
        assert!(matches!(err, PredictError::IncompleteResponse));

        let err = parse_response(true, JSON, r#"{"shape":3,"confidence":0.5}"#).unwrap_err();
        assert!(matches!(err, PredictError::IncompleteResponse));
    }

    #[test]
    fn unparseable_json_is_unreadable() {
        let err = parse_response(true, JSON, "not json at all").unwrap_err();
        assert!(matches!(err, PredictError::UnreadableResponse));
    }

    #[test]
    fn metric_fields_use_three_fractional_digits() {
        let metrics = FaceMetrics {
            detection_score: 0.8,
            center_score: 0.90312,
            size_score: 0.5,
            overall_score: 0.70449,
            timestamp: Instant::now(),
        };

        let fields = metric_fields(&metrics);
        assert_eq!(fields[0], ("face_detection_score", "0.800".to_string()));
        assert_eq!(fields[1], ("face_overall_score", "0.704".to_string()));
        assert_eq!(fields[2], ("face_center_score", "0.903".to_string()));
        assert_eq!(fields[3], ("face_size_score", "0.500".to_string()));
    }
}
