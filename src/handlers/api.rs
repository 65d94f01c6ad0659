use axum::response::Json;
use serde_json::{Value, json};

use crate::errors::AppResult;

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> AppResult<Json<Value>> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        let response = health_check().await.unwrap();
        assert_eq!(response.0["status"], "OK");
    }
}
