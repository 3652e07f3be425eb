//! Payment provider adapter seam
//!
//! A single pluggable provider. Checkout creation is NOT best-effort: a
//! failure there aborts payment creation. Status fetches are retried by
//! the concrete adapter.

use async_trait::async_trait;

use crate::error::ClubResult;

/// Provider-side payment status, normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

/// A checkout created at the provider
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub external_id: String,
    pub redirect_url: String,
}

/// Raw provider record used by the webhook handler to re-verify status and
/// amount instead of trusting the webhook body.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub external_id: String,
    pub status: ProviderPaymentStatus,
    /// Amount in major units formatted by the provider, e.g. "2990.00".
    pub amount_value: String,
    pub currency: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a checkout. `idempotency_key` must be derived
    /// deterministically from the internal payment id so retries are safe.
    async fn create_payment(
        &self,
        amount_minor: i64,
        description: &str,
        metadata: serde_json::Value,
        idempotency_key: &str,
    ) -> ClubResult<CreatedPayment>;

    async fn get_payment_status(&self, external_id: &str) -> ClubResult<ProviderPaymentStatus>;

    async fn get_payment_raw(&self, external_id: &str) -> ClubResult<ProviderRecord>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory provider fake

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::error::ClubError;

    #[derive(Default)]
    pub struct FakeProvider {
        pub records: Mutex<HashMap<String, ProviderRecord>>,
        pub fail_create: bool,
        pub created: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub fn with_record(self, record: ProviderRecord) -> Self {
            self.records
                .lock()
                .unwrap()
                .insert(record.external_id.clone(), record);
            self
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_payment(
            &self,
            amount_minor: i64,
            _description: &str,
            _metadata: serde_json::Value,
            idempotency_key: &str,
        ) -> ClubResult<CreatedPayment> {
            if self.fail_create {
                return Err(ClubError::Provider("provider unavailable".to_string()));
            }
            self.created.lock().unwrap().push(idempotency_key.to_string());
            let external_id = format!("ext-{idempotency_key}");
            self.records.lock().unwrap().insert(
                external_id.clone(),
                ProviderRecord {
                    external_id: external_id.clone(),
                    status: ProviderPaymentStatus::Pending,
                    amount_value: format!("{amount_minor}.00"),
                    currency: "RUB".to_string(),
                },
            );
            Ok(CreatedPayment {
                external_id,
                redirect_url: "https://pay.example/checkout".to_string(),
            })
        }

        async fn get_payment_status(
            &self,
            external_id: &str,
        ) -> ClubResult<ProviderPaymentStatus> {
            Ok(self.get_payment_raw(external_id).await?.status)
        }

        async fn get_payment_raw(&self, external_id: &str) -> ClubResult<ProviderRecord> {
            self.records
                .lock()
                .unwrap()
                .get(external_id)
                .cloned()
                .ok_or_else(|| ClubError::Provider(format!("unknown payment {external_id}")))
        }
    }
}
