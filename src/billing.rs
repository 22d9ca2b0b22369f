//! Billing gate in front of every authenticated outbound message.
//!
//! One round trip per send. A network or protocol failure lets the message
//! through (fail-open) so an outage of the billing service never blocks
//! conversation; an explicit denial always blocks and opens the paywall.

use crate::config::BillingConfig;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Answer of the billing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDecision {
    pub allowed: bool,
    #[serde(default)]
    pub credits_balance: Option<i64>,
    /// Machine-readable denial reason, e.g. `insufficient_credits`.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message for the paywall.
    #[serde(default)]
    pub message: Option<String>,
}

/// Why the paywall opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaywallReason {
    /// The guest used up their free messages.
    GuestLimit,
    /// The account has no credits left.
    InsufficientCredits,
    /// Denied for another reason reported by the billing service.
    Denied(String),
}

impl PaywallReason {
    /// Map a billing denial reason.
    #[must_use]
    pub fn from_billing(reason: Option<&str>) -> Self {
        match reason.map(str::trim) {
            None | Some("" | "insufficient_credits") => Self::InsufficientCredits,
            Some("guest_limit") => Self::GuestLimit,
            Some(other) => Self::Denied(other.to_owned()),
        }
    }
}

/// Check-and-deduct round trip.
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Check the caller may send one message and deduct its cost.
    async fn check_and_deduct(&self) -> anyhow::Result<BillingDecision>;
}

/// Outcome of [`BillingGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingVerdict {
    Allowed {
        credits_balance: Option<i64>,
    },
    Denied {
        reason: PaywallReason,
        message: Option<String>,
        credits_balance: Option<i64>,
    },
}

/// Fail-open wrapper around an optional [`BillingClient`].
#[derive(Clone, Default)]
pub struct BillingGate {
    client: Option<Arc<dyn BillingClient>>,
}

impl BillingGate {
    /// Gate backed by `client`; `None` allows everything.
    #[must_use]
    pub fn new(client: Option<Arc<dyn BillingClient>>) -> Self {
        Self { client }
    }

    /// Whether a billing client is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Run the round trip.
    pub async fn check(&self) -> BillingVerdict {
        let Some(client) = &self.client else {
            return BillingVerdict::Allowed {
                credits_balance: None,
            };
        };
        match client.check_and_deduct().await {
            Ok(decision) if decision.allowed => {
                debug!(balance = ?decision.credits_balance, "billing allowed message");
                BillingVerdict::Allowed {
                    credits_balance: decision.credits_balance,
                }
            }
            Ok(decision) => {
                let reason = PaywallReason::from_billing(decision.reason.as_deref());
                info!(?reason, balance = ?decision.credits_balance, "billing denied message");
                BillingVerdict::Denied {
                    reason,
                    message: decision.message,
                    credits_balance: decision.credits_balance,
                }
            }
            Err(e) => {
                warn!(error = %e, "billing check failed, allowing message");
                BillingVerdict::Allowed {
                    credits_balance: None,
                }
            }
        }
    }
}

/// [`BillingClient`] over HTTP: `POST <endpoint>` with a bearer token.
///
/// `2xx` responses carry a JSON [`BillingDecision`]. `402` and `403` are
/// denials whatever their body says; any other status is an error (and
/// therefore fails open at the gate).
pub struct HttpBillingClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpBillingClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] when no endpoint is configured.
    pub fn new(config: &BillingConfig, token: impl Into<String>) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| SessionError::Config("billing.endpoint is not set".to_owned()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SessionError::Billing(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn check_and_deduct(&self) -> anyhow::Result<BillingDecision> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "action": "chat_message" }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let payment_required = status == reqwest::StatusCode::PAYMENT_REQUIRED;
        if payment_required || status == reqwest::StatusCode::FORBIDDEN {
            // A denial stays a denial even when the body is not a decision.
            let mut decision =
                serde_json::from_str::<BillingDecision>(&body).unwrap_or_else(|e| {
                    debug!(%status, error = %e, "denial body is not a billing decision");
                    BillingDecision {
                        allowed: false,
                        credits_balance: None,
                        reason: payment_required.then(|| "insufficient_credits".to_owned()),
                        message: Some(body.trim().to_owned()).filter(|m| !m.is_empty()),
                    }
                });
            decision.allowed = false;
            return Ok(decision);
        }
        anyhow::bail!("billing endpoint returned {status}: {body}")
    }
}
