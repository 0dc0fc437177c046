use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{with_retry, FlagDefinitionClient, TargetingClient};
use crate::errors::UpstreamError;
use crate::evaluation::{EvaluationContext, FlagDefinition, TargetingDecision};

/// `GET {base}/flags/{flagKey}` against the Flag Definition Service.
#[derive(Debug, Clone)]
pub struct HttpFlagDefinitionClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpFlagDefinitionClient {
    pub fn new(client: Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    fn flag_url(&self, flag_key: &str) -> Result<Url, UpstreamError> {
        endpoint(&self.base_url, &["flags", flag_key])
    }
}

#[async_trait]
impl FlagDefinitionClient for HttpFlagDefinitionClient {
    async fn fetch_flag_definition(&self, flag_key: &str) -> Result<FlagDefinition, UpstreamError> {
        let url = &self.flag_url(flag_key)?;
        let client = &self.client;

        with_retry("fetch_flag_definition", self.timeout, move || async move {
            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            debug!(flag_key = flag_key, status = status.as_u16(), "flag service responded");

            match status {
                s if s.is_success() => Ok(response.json::<FlagDefinition>().await?),
                StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(flag_key.to_string())),
                s => Err(UpstreamError::Unavailable(format!("flag service returned {}", s))),
            }
        })
        .await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetingRequest<'a> {
    flag_key: &'a str,
    context: &'a EvaluationContext,
}

/// `POST {base}/evaluate` against the Targeting Service.
#[derive(Debug, Clone)]
pub struct HttpTargetingClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTargetingClient {
    pub fn new(client: Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl TargetingClient for HttpTargetingClient {
    async fn fetch_targeting_decision(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<TargetingDecision, UpstreamError> {
        let url = &endpoint(&self.base_url, &["evaluate"])?;
        let body = &TargetingRequest { flag_key, context };
        let client = &self.client;

        with_retry("fetch_targeting_decision", self.timeout, move || async move {
            let response = client.post(url.clone()).json(body).send().await?;
            let status = response.status();
            debug!(flag_key = flag_key, status = status.as_u16(), "targeting service responded");

            match status {
                s if s.is_success() => Ok(response.json::<TargetingDecision>().await?),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    let detail = response.text().await.unwrap_or_default();
                    Err(UpstreamError::InvalidContext(rejection_message(status, &detail)))
                }
                s => Err(UpstreamError::Unavailable(format!("targeting service returned {}", s))),
            }
        })
        .await
    }
}

/// Append path segments to a base URL, percent-encoding each one.
fn endpoint(base_url: &Url, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| UpstreamError::InvalidResponse(format!("{} cannot be a base URL", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn rejection_message(status: StatusCode, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        format!("targeting service rejected the context ({})", status)
    } else {
        detail.to_string()
    }
}
