//! Signed activity delivery
//!
//! Serializes an activity, signs the request with the sending identity,
//! and POSTs it to a target inbox. A single `deliver_to_actor` call is
//! exactly one attempt: failures surface immediately and retrying is a
//! separate, composable concern (see `retry`).

use crate::activity::Activity;
use crate::actor::Actor;
use crate::error::{FederationError, Result};
use crate::fetch::{ACTIVITY_CONTENT_TYPE, ensure_allowed_url};
use crate::keys::SigningKey;
use crate::signature::sign_request;
use std::sync::Arc;
use url::Url;

/// Activity delivery service
///
/// Cheap to clone; all clones share the HTTP connection pool.
#[derive(Clone)]
pub struct Deliverer {
    http_client: reqwest::Client,
    allow_private_destinations: bool,
    /// Concurrency bound for fan-out delivery
    max_concurrent: usize,
}

/// Result of one fan-out delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Target inbox URI
    pub inbox: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// HTTP status code if the inbox answered
    pub status: Option<u16>,
}

/// Deduplicate identical inbox URIs while keeping distinct personal
/// inboxes on the same domain.
fn unique_inbox_targets(inboxes: Vec<Url>) -> Vec<Url> {
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox in inboxes {
        if seen.insert(inbox.to_string()) {
            targets.push(inbox);
        }
    }

    targets
}

impl Deliverer {
    pub fn new(
        http_client: reqwest::Client,
        allow_private_destinations: bool,
        max_concurrent: usize,
    ) -> Self {
        Self {
            http_client,
            allow_private_destinations,
            max_concurrent,
        }
    }

    /// Deliver an activity to a target actor's inbox
    ///
    /// Exactly one signed POST; no retry, no backoff. The caller decides
    /// whether dependent local-state changes proceed after a failure.
    ///
    /// # Errors
    /// `Delivery` when the POST fails at the transport or the inbox
    /// answers with a non-2xx status.
    pub async fn deliver_to_actor(
        &self,
        signing_key: &SigningKey,
        activity: &Activity,
        target: &Actor,
    ) -> Result<()> {
        self.deliver_to_inbox(signing_key, activity, &target.inbox)
            .await
    }

    /// Deliver an activity to one inbox URL
    pub async fn deliver_to_inbox(
        &self,
        signing_key: &SigningKey,
        activity: &Activity,
        inbox: &Url,
    ) -> Result<()> {
        ensure_allowed_url(inbox, self.allow_private_destinations)?;

        // 1. Serialize activity
        let body = activity
            .to_bytes()
            .map_err(|e| FederationError::Validation(format!("Failed to serialize activity: {}", e)))?;

        // 2. Sign request
        let sig_headers = sign_request(
            "POST",
            inbox.as_str(),
            Some(&body),
            &signing_key.private_key_pem,
            &signing_key.key_id,
        )?;

        // 3. POST to inbox with signed headers
        let mut request = self
            .http_client
            .post(inbox.clone())
            .header("Content-Type", ACTIVITY_CONTENT_TYPE)
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await.map_err(|e| {
            crate::metrics::DELIVERIES_TOTAL
                .with_label_values(&["transport_error"])
                .inc();
            FederationError::Delivery {
                inbox: inbox.to_string(),
                status: None,
                reason: e.to_string(),
            }
        })?;

        // 4. Handle response
        let status = response.status();
        if !status.is_success() {
            crate::metrics::DELIVERIES_TOTAL
                .with_label_values(&["rejected"])
                .inc();
            return Err(FederationError::Delivery {
                inbox: inbox.to_string(),
                status: Some(status.as_u16()),
                reason: format!("inbox rejected activity: HTTP {}", status),
            });
        }

        crate::metrics::DELIVERIES_TOTAL
            .with_label_values(&["success"])
            .inc();
        crate::metrics::ACTIVITIES_SENT_TOTAL
            .with_label_values(&[&activity.metric_label()])
            .inc();

        tracing::info!(inbox = %inbox, activity = %activity.id, "Delivered activity");
        Ok(())
    }

    /// Deliver one activity to many inboxes concurrently
    ///
    /// Independent targets have no ordering dependency, so deliveries
    /// run in parallel under a concurrency bound. Identical inbox URIs
    /// are deduplicated first.
    pub async fn deliver_to_many(
        &self,
        signing_key: &SigningKey,
        activity: &Activity,
        inboxes: Vec<Url>,
    ) -> Vec<DeliveryOutcome> {
        use tokio::sync::Semaphore;

        let total_targets = inboxes.len();
        let targets = unique_inbox_targets(inboxes);

        tracing::info!(
            unique = targets.len(),
            total = total_targets,
            activity = %activity.id,
            "Fan-out delivery"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let activity = Arc::new(activity.clone());
        let signing_key = Arc::new(signing_key.clone());

        let mut tasks = Vec::new();

        for inbox in targets {
            let semaphore = semaphore.clone();
            let activity = activity.clone();
            let signing_key = signing_key.clone();
            let deliverer = self.clone();

            let task = tokio::spawn(async move {
                // Closed only if the semaphore is dropped, which fan-out never does
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return DeliveryOutcome {
                            inbox: inbox.to_string(),
                            success: false,
                            error: Some("delivery pool closed".to_string()),
                            status: None,
                        };
                    }
                };

                let result = deliverer
                    .deliver_to_inbox(&signing_key, &activity, &inbox)
                    .await;

                match result {
                    Ok(()) => DeliveryOutcome {
                        inbox: inbox.to_string(),
                        success: true,
                        error: None,
                        status: None,
                    },
                    Err(err) => {
                        let status = match &err {
                            FederationError::Delivery { status, .. } => *status,
                            _ => None,
                        };
                        DeliveryOutcome {
                            inbox: inbox.to_string(),
                            success: false,
                            error: Some(err.to_string()),
                            status,
                        }
                    }
                }
            });

            tasks.push(task);
        }

        let mut outcomes = Vec::new();
        for task in tasks {
            if let Ok(outcome) = task.await {
                outcomes.push(outcome);
            }
        }

        let success_count = outcomes.iter().filter(|o| o.success).count();
        tracing::info!(
            succeeded = success_count,
            failed = outcomes.len() - success_count,
            "Fan-out delivery complete"
        );

        outcomes
    }
}
