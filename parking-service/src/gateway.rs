//! Payment gateway seam.
//!
//! The gateway's HMAC signature over `order_id|payment_id` is the only thing
//! that proves a payment happened; everything else in a callback is
//! client-supplied and untrusted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const RAZORPAY_API: &str = "https://api.razorpay.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the client-side checkout.
    fn key_id(&self) -> &str;

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder>;

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Returns the gateway's refund id.
    async fn refund(&self, payment_id: &str, amount: i64) -> Result<String>;
}

/// Hex HMAC-SHA256 of `order_id|payment_id`, as the checkout widget reports it.
pub fn razorpay_signature(secret: &str, order_id: &str, payment_id: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {}", e))?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signature_matches(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

pub struct RazorpayGateway {
    key_id: String,
    key_secret: String,
    http: Client,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String) -> Self {
        Self {
            key_id,
            key_secret,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        let order = self
            .http
            .post(format!("{}/orders", RAZORPAY_API))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({ "amount": amount, "currency": currency, "receipt": receipt }))
            .send()
            .await
            .context("razorpay order request failed")?
            .error_for_status()
            .context("razorpay rejected the order")?
            .json::<GatewayOrder>()
            .await
            .context("unexpected razorpay order response")?;

        info!(order_id = %order.id, amount, currency, "razorpay order created");
        Ok(order)
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        signature_matches(&self.key_secret, order_id, payment_id, signature)
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Result<String> {
        let refund = self
            .http
            .post(format!("{}/payments/{}/refund", RAZORPAY_API, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({ "amount": amount }))
            .send()
            .await
            .context("razorpay refund request failed")?
            .error_for_status()
            .context("razorpay rejected the refund")?
            .json::<RefundResponse>()
            .await
            .context("unexpected razorpay refund response")?;

        info!(payment_id, refund_id = %refund.id, amount, "razorpay refund issued");
        Ok(refund.id)
    }
}

/// Local stand-in for development and tests. Orders are minted in process and
/// signatures use the configured secret, so a client can complete checkout by
/// calling [`SandboxGateway::sign`].
pub struct SandboxGateway {
    secret: String,
    refunds: Mutex<Vec<(String, i64)>>,
    refuse_refunds: AtomicBool,
}

impl SandboxGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            refunds: Mutex::new(Vec::new()),
            refuse_refunds: AtomicBool::new(false),
        }
    }

    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        razorpay_signature(&self.secret, order_id, payment_id).unwrap_or_default()
    }

    /// `(payment_id, amount)` for every refund issued so far.
    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn refuse_refunds(&self, refuse: bool) {
        self.refuse_refunds.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn key_id(&self) -> &str {
        "sandbox"
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        Ok(GatewayOrder {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        })
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        signature_matches(&self.secret, order_id, payment_id, signature)
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Result<String> {
        if self.refuse_refunds.load(Ordering::SeqCst) {
            anyhow::bail!("sandbox refused refund for {}", payment_id);
        }
        self.refunds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((payment_id.to_string(), amount));
        Ok(format!("rfnd_{}", Uuid::new_v4().simple()))
    }
}
