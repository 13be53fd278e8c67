use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query},
    http::{request::Parts, HeaderMap, Method, Uri},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// The original request as handed to a guarded handler, with the body already buffered.
#[derive(Debug, Clone)]
pub struct RawRequest {
    parts: Parts,
    body: Bytes,
    report_id: Option<String>,
}

impl RawRequest {
    pub fn new(parts: Parts, body: Bytes) -> Self {
        Self {
            parts,
            body,
            report_id: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Report id allocated for this call when the route generates reports.
    pub fn report_id(&self) -> Option<&str> {
        self.report_id.as_deref()
    }

    pub(crate) fn set_report_id(&mut self, report_id: String) {
        self.report_id = Some(report_id);
    }

    pub async fn path<T>(&self) -> AppResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let mut parts = self.parts.clone();
        Path::<T>::from_request_parts(&mut parts, &())
            .await
            .map(|Path(value)| value)
            .map_err(|e| AppError::Validation(e.body_text()))
    }

    pub fn query<T: DeserializeOwned>(&self) -> AppResult<T> {
        Query::<T>::try_from_uri(&self.parts.uri)
            .map(|Query(value)| value)
            .map_err(|e| AppError::Validation(e.body_text()))
    }

    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
    }

    /// Query string as a flat JSON object, for the audit trail.
    pub fn query_value(&self) -> Value {
        let pairs = Query::<Vec<(String, String)>>::try_from_uri(&self.parts.uri)
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();

        let mut map = BTreeMap::<String, Value>::new();
        for (key, value) in pairs {
            match map.get_mut(&key) {
                Some(Value::Array(values)) => values.push(Value::String(value)),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value)]);
                }
                None => {
                    map.insert(key, Value::String(value));
                }
            }
        }

        Value::Object(map.into_iter().collect())
    }

    /// JSON body for the audit trail. `GET` bodies and non-JSON payloads are not kept.
    pub fn body_value(&self) -> Option<Value> {
        if self.parts.method == Method::GET || self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde::Deserialize;
    use serde_json::json;

    fn raw(method: Method, uri: &str, body: &'static str) -> RawRequest {
        let (parts, _) = Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        RawRequest::new(parts, Bytes::from_static(body.as_bytes()))
    }

    #[derive(Deserialize)]
    struct Window {
        plate: String,
        max_time_interval: Option<i64>,
    }

    #[test]
    fn parses_typed_query() {
        let request = raw(Method::GET, "/cars/path?plate=ABC1D23&max_time_interval=60", "");
        let window: Window = request.query().unwrap();
        assert_eq!(window.plate, "ABC1D23");
        assert_eq!(window.max_time_interval, Some(60));
    }

    #[test]
    fn query_errors_are_validation_failures() {
        let request = raw(Method::GET, "/cars/path?max_time_interval=soon", "");
        assert!(matches!(request.query::<Window>(), Err(AppError::Validation(_))));
    }

    #[test]
    fn repeated_query_keys_become_arrays() {
        let request = raw(Method::GET, "/x?plate=A&plate=B&page=2", "");
        assert_eq!(
            request.query_value(),
            json!({ "page": "2", "plate": ["A", "B"] })
        );
    }

    #[test]
    fn body_is_kept_only_for_json_writes() {
        assert_eq!(raw(Method::GET, "/x", r#"{"a":1}"#).body_value(), None);
        assert_eq!(raw(Method::POST, "/x", "not json").body_value(), None);
        assert_eq!(
            raw(Method::POST, "/x", r#"{"plate":"ABC1D23"}"#).body_value(),
            Some(json!({ "plate": "ABC1D23" }))
        );
    }
}
