//! Stripe REST client for the payout flow.
//!
//! Requests are form-encoded. Ambiguous failures (network errors, 409, 429,
//! 5xx, or an explicit `Stripe-Should-Retry: true`) are retried with the same
//! `Idempotency-Key`, so a retried create never produces a second object.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::domain::event::BalanceTransaction;
use crate::domain::repository::PaymentGateway;
use crate::domain::types::{
    ConnectedAccount, CreatedPayout, CreatedTransfer, PayoutRequest, TransferRequest,
};
use crate::error::ProcessorError;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
const STRIPE_ACCOUNT: &str = "Stripe-Account";
const STRIPE_SHOULD_RETRY: &str = "Stripe-Should-Retry";
const CURRENCY: &str = "usd";

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    max_network_retries: u32,
    retry_base_delay: Duration,
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_owned(),
            secret_key: secret_key.to_owned(),
            max_network_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retries(mut self, max_network_retries: u32, retry_base_delay: Duration) -> Self {
        self.max_network_retries = max_network_retries;
        self.retry_base_delay = retry_base_delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, ProcessorError> {
        let mut attempt = 0;
        loop {
            let retryable = match build().bearer_auth(&self.secret_key).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .context("decode processor response")
                        .map_err(ProcessorError::Transport);
                }
                Ok(response) => {
                    if attempt >= self.max_network_retries || !should_retry(&response) {
                        return Err(api_error(response).await);
                    }
                    format!("status {}", response.status())
                }
                Err(e) => {
                    if attempt >= self.max_network_retries || e.is_builder() {
                        return Err(ProcessorError::Transport(
                            anyhow::Error::new(e).context("send processor request"),
                        ));
                    }
                    e.to_string()
                }
            };
            attempt += 1;
            let delay = self.retry_base_delay * 2_u32.pow(attempt - 1);
            warn!(attempt, cause = %retryable, delay_ms = delay.as_millis() as u64, "retrying processor request");
            tokio::time::sleep(delay).await;
        }
    }
}

fn should_retry(response: &Response) -> bool {
    match response
        .headers()
        .get(STRIPE_SHOULD_RETRY)
        .and_then(|v| v.to_str().ok())
    {
        Some("true") => return true,
        Some("false") => return false,
        _ => {}
    }
    let status = response.status();
    status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn api_error(response: Response) -> ProcessorError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    parse_api_error(status, &body)
}

/// Decode a processor error body; non-JSON bodies keep their raw text.
pub fn parse_api_error(status: u16, body: &str) -> ProcessorError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ProcessorError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message.unwrap_or_default(),
        },
        Err(_) => ProcessorError::Api {
            status,
            code: None,
            message: body.to_owned(),
        },
    }
}

fn metadata_fields(metadata: &BTreeMap<String, String>) -> impl Iterator<Item = (String, String)> {
    metadata
        .iter()
        .map(|(key, value)| (format!("metadata[{key}]"), value.clone()))
}

pub fn transfer_form(request: &TransferRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_owned(), request.amount_cents.to_string()),
        ("currency".to_owned(), CURRENCY.to_owned()),
        ("destination".to_owned(), request.destination.clone()),
    ];
    form.extend(metadata_fields(&request.metadata));
    form
}

pub fn payout_form(request: &PayoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_owned(), request.amount_cents.to_string()),
        ("currency".to_owned(), CURRENCY.to_owned()),
    ];
    form.extend(metadata_fields(&request.metadata));
    form
}

impl PaymentGateway for StripeClient {
    async fn get_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        let url = self.url(&format!("/v1/accounts/{account_id}"));
        self.send(|| self.http.get(&url)).await
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> Result<CreatedTransfer, ProcessorError> {
        let url = self.url("/v1/transfers");
        let form = transfer_form(request);
        self.send(|| {
            self.http
                .post(&url)
                .header(IDEMPOTENCY_KEY, idempotency_key)
                .form(&form)
        })
        .await
    }

    async fn create_payout(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> Result<CreatedPayout, ProcessorError> {
        let url = self.url("/v1/payouts");
        let form = payout_form(request);
        self.send(|| {
            self.http
                .post(&url)
                .header(IDEMPOTENCY_KEY, idempotency_key)
                .header(STRIPE_ACCOUNT, &request.connected_account)
                .form(&form)
        })
        .await
    }

    async fn get_balance_transaction(&self, id: &str) -> Result<BalanceTransaction, ProcessorError> {
        let url = self.url(&format!("/v1/balance_transactions/{id}?expand%5B%5D=source"));
        self.send(|| self.http.get(&url)).await
    }
}
