// Service Bus REST client (QueueDirectory + MessageBroker)

use crate::auth::Credential;
use crate::wire::{self, BATCH_CONTENT_TYPE, BROKER_PROPERTIES_HEADER};
use async_trait::async_trait;
use chrono::Utc;
use jobrelay_core::config::BrokerSettings;
use jobrelay_core::domain::{BrokerMessage, NamespaceQueueLocator, OutgoingMessage};
use jobrelay_core::port::{MessageBroker, QueueDirectory};
use jobrelay_core::{AppError, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Entries requested per `$Resources/Queues` page
pub const QUEUE_PAGE_SIZE: usize = 100;

const ADMIN_API_VERSION: &str = "2021-05";

/// Upper bound of one HTTP exchange, long polls included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Wait used for the follow-up head requests of a multi-message receive
const FOLLOW_UP_WAIT_SECS: u64 = 1;

const ERROR_EXCERPT_CHARS: usize = 200;

/// Application properties stamped on a message forwarded to a parking queue
pub const DEAD_LETTER_REASON_PROPERTY: &str = "deadLetterReason";
pub const DEAD_LETTER_DESCRIPTION_PROPERTY: &str = "deadLetterDescription";

/// Broker adapter over the Service Bus REST surface.
///
/// Holds one read-only HTTP client shared by every task; no per-queue
/// sender or receiver state is kept between calls.
#[derive(Clone)]
pub struct ServiceBusRestClient {
    http: reqwest::Client,
    credential: Credential,
    host_suffix: String,
    dead_letter_suffix: String,
}

impl ServiceBusRestClient {
    pub fn new(
        credential: Credential,
        host_suffix: impl Into<String>,
        dead_letter_suffix: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Broker(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credential,
            host_suffix: host_suffix.into(),
            dead_letter_suffix: dead_letter_suffix.into(),
        })
    }

    pub fn from_settings(settings: &BrokerSettings) -> Result<Self> {
        let credential = Credential::from_settings(&settings.credential)?;
        Self::new(
            credential,
            settings.host_suffix.clone(),
            settings.dead_letter_suffix.clone(),
        )
    }

    /// `https://{namespace}{host_suffix}`, also the SAS resource
    pub fn namespace_uri(&self, namespace: &str) -> String {
        format!("https://{}{}", namespace, self.host_suffix)
    }

    /// Queue that receives the dead-lettered messages of `queue`
    pub fn parking_queue(&self, queue: &str) -> String {
        format!("{}{}", queue, self.dead_letter_suffix)
    }

    pub fn is_parking_queue(&self, queue: &str) -> bool {
        !self.dead_letter_suffix.is_empty() && queue.ends_with(&self.dead_letter_suffix)
    }

    fn endpoint(&self, namespace: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.namespace_uri(namespace))
            .map_err(|e| AppError::Broker(format!("invalid namespace {}: {}", namespace, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Broker(format!("invalid namespace {}", namespace)))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    fn lock_endpoint(&self, source: &NamespaceQueueLocator, message: &BrokerMessage) -> Result<Url> {
        self.endpoint(
            source.namespace(),
            &[
                source.queue(),
                "messages",
                &message.message_id,
                &message.lock_token,
            ],
        )
    }

    fn request(&self, method: Method, namespace: &str, url: Url) -> Result<RequestBuilder> {
        let authorization = self
            .credential
            .authorization(&self.namespace_uri(namespace), Utc::now())?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, authorization))
    }

    async fn execute(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Broker(format!("{}: {}", context, e)))?;
        ensure_success(response, context).await
    }

    /// Settle-style call without body on the locked message URL
    async fn lock_call(
        &self,
        method: Method,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
        context: &str,
    ) -> Result<()> {
        let url = self.lock_endpoint(source, message)?;
        let request = self
            .request(method, source.namespace(), url)?
            .header(CONTENT_LENGTH, "0");
        self.execute(request, context).await?;
        debug!(source = %source, message_id = %message.message_id, context, "Lock call done");
        Ok(())
    }

    /// One head request: `None` when nothing arrived within `wait_secs`
    async fn receive_one(
        &self,
        source: &NamespaceQueueLocator,
        wait_secs: u64,
    ) -> Result<Option<BrokerMessage>> {
        let mut url = self.endpoint(source.namespace(), &[source.queue(), "messages", "head"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &wait_secs.to_string());

        let request = self
            .request(Method::POST, source.namespace(), url)?
            .header(CONTENT_LENGTH, "0");
        let response = self.execute(request, "receive").await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let broker_properties = response
            .headers()
            .get(BROKER_PROPERTIES_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Broker(format!(
                    "receive on {} returned no {} header",
                    source, BROKER_PROPERTIES_HEADER
                ))
            })?;
        let user_properties = wire::user_properties(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Broker(format!("reading message body from {}: {}", source, e)))?;

        wire::decode_message(&broker_properties, user_properties, body).map(Some)
    }
}

async fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Broker(format!(
        "{} failed with {}: {}",
        context,
        status,
        excerpt(&body)
    )))
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_EXCERPT_CHARS).collect()
}

#[async_trait]
impl QueueDirectory for ServiceBusRestClient {
    async fn list_queues(&self, namespace: &str) -> Result<Vec<String>> {
        let mut queues = Vec::new();
        let mut skip = 0usize;

        loop {
            let mut url = self.endpoint(namespace, &["$Resources", "Queues"])?;
            url.query_pairs_mut()
                .append_pair("api-version", ADMIN_API_VERSION)
                .append_pair("$skip", &skip.to_string())
                .append_pair("$top", &QUEUE_PAGE_SIZE.to_string());

            let request = self.request(Method::GET, namespace, url)?;
            let feed = self
                .execute(request, "list queues")
                .await?
                .text()
                .await
                .map_err(|e| AppError::Broker(format!("reading queue feed of {}: {}", namespace, e)))?;

            let page = wire::parse_queue_feed(&feed)?;
            let fetched = page.len();
            queues.extend(page);
            if fetched < QUEUE_PAGE_SIZE {
                break;
            }
            skip += fetched;
        }

        queues.retain(|queue| !self.is_parking_queue(queue));
        info!(namespace, count = queues.len(), "Queues listed");
        Ok(queues)
    }
}

#[async_trait]
impl MessageBroker for ServiceBusRestClient {
    async fn send_batch(
        &self,
        target: &NamespaceQueueLocator,
        batch: &[OutgoingMessage],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(target.namespace(), &[target.queue(), "messages"])?;
        let request = self
            .request(Method::POST, target.namespace(), url)?
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(wire::encode_batch(batch)?);

        self.execute(request, "send batch").await?;
        debug!(target = %target, size = batch.len(), "Batch sent");
        Ok(())
    }

    async fn receive(
        &self,
        source: &NamespaceQueueLocator,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<BrokerMessage>> {
        let mut received = Vec::new();
        while received.len() < max_messages {
            let wait_secs = if received.is_empty() {
                max_wait.as_secs()
            } else {
                FOLLOW_UP_WAIT_SECS
            };
            match self.receive_one(source, wait_secs).await? {
                Some(message) => received.push(message),
                None => break,
            }
        }
        Ok(received)
    }

    async fn complete(
        &self,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
    ) -> Result<()> {
        self.lock_call(Method::DELETE, source, message, "complete")
            .await
    }

    async fn abandon(
        &self,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
    ) -> Result<()> {
        self.lock_call(Method::PUT, source, message, "abandon").await
    }

    /// Forward to the parking queue, then complete the original
    async fn dead_letter(
        &self,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
        reason: &str,
        description: &str,
    ) -> Result<()> {
        let parking =
            NamespaceQueueLocator::new(source.namespace(), self.parking_queue(source.queue()))?;

        let parked = OutgoingMessage {
            message_id: Some(message.message_id.clone()),
            body: message.body.clone(),
            subject: message.subject.clone(),
            properties: message.properties.clone(),
        }
        .with_property(DEAD_LETTER_REASON_PROPERTY, reason)
        .with_property(DEAD_LETTER_DESCRIPTION_PROPERTY, description);

        if let Err(e) = self.send_batch(&parking, &[parked]).await {
            warn!(source = %source, parking = %parking, error = %e, "Forwarding to parking queue failed");
            return Err(e);
        }
        self.complete(source, message).await
    }

    async fn renew_lock(
        &self,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
    ) -> Result<()> {
        self.lock_call(Method::POST, source, message, "renew lock")
            .await
    }
}
