use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::{Value, json};

use crate::config::ConfigError;
use crate::error::Result;
use crate::health::{RowState, split_rows};
use crate::template::{Template, TemplateData};

/// Fields available to an HTTP check template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpData {
    pub url: String,
    /// 0 when no response was received
    pub status_code: u16,
    /// Non-success status text, empty on 2xx
    pub error: String,
    /// Raw response body; pipe through `jsonParse` to read JSON
    pub body: String,
}

impl TemplateData for HttpData {
    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "URL" => json!(self.url),
            "StatusCode" => json!(self.status_code),
            "Error" => json!(self.error),
            "Body" => json!(self.body),
            _ => return None,
        };
        Some(value)
    }
}

/// GETs a URL and renders the response through a template
#[derive(Debug)]
pub struct HttpCheck {
    url: Url,
    template: Template,
    interval: Duration,
    client: Client,
    pub(crate) rows: RowState,
}

impl HttpCheck {
    /// Requests time out after half the poll interval
    pub fn new(url: &str, template: &str, interval: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let template = Template::parse(template)?;
        template.render(&HttpData {
            url: url.to_string(),
            ..HttpData::default()
        })?;

        let client = Client::builder().timeout(interval / 2).build()?;

        Ok(Self {
            url,
            template,
            interval,
            client,
            rows: RowState::default(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Issue one request; any failure becomes a single error row
    pub async fn probe(&self) -> Vec<String> {
        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "health request failed");
                return vec![e.to_string()];
            }
        };

        let status = response.status();
        let error = if status.is_success() {
            String::new()
        } else {
            status.to_string()
        };
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return vec![e.to_string()],
        };

        let data = HttpData {
            url: self.url.to_string(),
            status_code: status.as_u16(),
            error,
            body,
        };
        match self.template.render(&data) {
            Ok(text) => split_rows(&text),
            Err(e) => vec![e.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::get};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn http_check_probe_renders_json_body_field() {
        let url = serve(Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({ "ok": true })) }),
        ))
        .await;
        let check = HttpCheck::new(&url, "{{.Body | jsonParse}}.ok", Duration::from_secs(2)).unwrap();

        assert_eq!(check.probe().await, vec!["true"]);
    }

    #[tokio::test]
    async fn http_check_probe_exposes_status_and_error() {
        let url = serve(Router::new().route(
            "/health",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let check = HttpCheck::new(
            &url,
            "{{.StatusCode}} {{.Error}}\n{{.Body | upper}}",
            Duration::from_secs(2),
        )
        .unwrap();

        assert_eq!(
            check.probe().await,
            vec!["503 503 Service Unavailable", "DOWN"]
        );
    }

    #[tokio::test]
    async fn http_check_probe_reports_connection_error_as_row() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/health", listener.local_addr().unwrap());
        drop(listener);
        let check = HttpCheck::new(&url, "{{.StatusCode}}", Duration::from_secs(2)).unwrap();

        let rows = check.probe().await;

        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_empty());
    }

    #[test]
    fn http_check_new_rejects_bad_template() {
        assert!(HttpCheck::new("http://localhost/", "{{.Nope}}", Duration::from_secs(1)).is_err());
        assert!(HttpCheck::new("http://localhost/", "no action", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn http_check_new_rejects_bad_url() {
        assert!(HttpCheck::new("::nope", "{{.Body}}", Duration::from_secs(1)).is_err());
    }
}
