// Request parameters
//
// Fields may arrive in the query string, an urlencoded form body or a JSON
// object body. Body fields override query fields with the same name.

use axum::{
    async_trait,
    extract::{FromRequest, Query, Request},
    http::header,
    Form, Json,
};
use serde_json::Value;
use std::collections::HashMap;

use super::error::ApiError;

#[derive(Debug, Default, Clone)]
pub struct FormParams(HashMap<String, String>);

impl FormParams {
    /// Trimmed non-empty value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &str) -> Result<&str, ApiError> {
        self.get(name)
            .ok_or_else(|| ApiError::BadRequest(format!("missing parameter `{}`", name)))
    }
}

#[async_trait]
impl<S> FromRequest<S> for FormParams
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = Query::<HashMap<String, String>>::try_from_uri(req.uri())
            .map(|Query(query)| query)
            .unwrap_or_default();

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(body) = Json::<HashMap<String, Value>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            for (name, value) in body {
                let value = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                params.insert(name, value);
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(body) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            params.extend(body);
        }

        Ok(Self(params))
    }
}
