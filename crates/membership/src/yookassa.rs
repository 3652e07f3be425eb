//! YooKassa v3 adapter
//!
//! Basic-auth REST client. Checkout creation sends a deterministic
//! `Idempotence-Key` so retried calls cannot double-create; status fetches
//! are retried with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::error::{ClubError, ClubResult};
use crate::provider::{CreatedPayment, PaymentProvider, ProviderPaymentStatus, ProviderRecord};

const API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct YookassaAdapter {
    http: reqwest::Client,
    base_url: String,
    shop_id: String,
    secret_key: String,
    return_url: String,
}

#[derive(Debug, Deserialize)]
struct RemoteAmount {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RemoteConfirmation {
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemotePayment {
    id: String,
    status: String,
    amount: RemoteAmount,
    confirmation: Option<RemoteConfirmation>,
}

fn map_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "succeeded" => ProviderPaymentStatus::Paid,
        "canceled" => ProviderPaymentStatus::Failed,
        "expired" => ProviderPaymentStatus::Expired,
        _ => ProviderPaymentStatus::Pending,
    }
}

/// Major-unit money formatting the provider expects, e.g. 2990 -> "2990.00"
pub fn format_amount(amount_minor: i64) -> String {
    format!("{amount_minor}.00")
}

impl YookassaAdapter {
    pub fn new(shop_id: &str, secret_key: &str, return_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(API_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: "https://api.yookassa.ru/v3".to_string(),
            shop_id: shop_id.to_string(),
            secret_key: secret_key.to_string(),
            return_url: return_url.to_string(),
        }
    }

    /// For tests: point the adapter at a local mock server.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.shop_id, self.secret_key);
        format!("Basic {}", BASE64.encode(raw))
    }

    async fn fetch_payment(&self, external_id: &str) -> ClubResult<RemotePayment> {
        let url = format!("{}/payments/{external_id}", self.base_url);
        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
        let payment = Retry::spawn(strategy, || async {
            let response = self
                .http
                .get(&url)
                .header("Authorization", self.auth_header())
                .send()
                .await?
                .error_for_status()?;
            response.json::<RemotePayment>().await
        })
        .await?;
        Ok(payment)
    }
}

#[async_trait]
impl PaymentProvider for YookassaAdapter {
    async fn create_payment(
        &self,
        amount_minor: i64,
        description: &str,
        metadata: serde_json::Value,
        idempotency_key: &str,
    ) -> ClubResult<CreatedPayment> {
        let body = json!({
            "amount": { "value": format_amount(amount_minor), "currency": "RUB" },
            "confirmation": { "type": "redirect", "return_url": self.return_url },
            "capture": true,
            "description": description,
            "metadata": metadata,
        });

        let response = self
            .http
            .post(format!("{}/payments", self.base_url))
            .header("Authorization", self.auth_header())
            .header("Idempotence-Key", idempotency_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let payment: RemotePayment = response.json().await?;

        let redirect_url = payment
            .confirmation
            .and_then(|c| c.confirmation_url)
            .ok_or_else(|| {
                ClubError::Provider("provider returned no confirmation URL".to_string())
            })?;
        Ok(CreatedPayment {
            external_id: payment.id,
            redirect_url,
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> ClubResult<ProviderPaymentStatus> {
        let payment = self.fetch_payment(external_id).await?;
        Ok(map_status(&payment.status))
    }

    async fn get_payment_raw(&self, external_id: &str) -> ClubResult<ProviderRecord> {
        let payment = self.fetch_payment(external_id).await?;
        Ok(ProviderRecord {
            external_id: payment.id,
            status: map_status(&payment.status),
            amount_value: payment.amount.value,
            currency: payment.amount.currency,
        })
    }
}
