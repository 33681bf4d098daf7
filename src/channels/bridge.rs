//! HTTP bridge transport — drives an already paired WhatsApp session.
//!
//! The session itself (QR pairing, browser client) lives in a sidecar that
//! exposes a small JSON API. Acks are long-polled from `/acks` by a
//! background task and fanned out through an [`AckBus`].

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::{
    AckBus, AckEvent, AckLevel, AckSubscription, MessageHandle, MessageId, RecipientId, Transport,
};
use crate::contacts::PhoneIdentity;
use crate::error::TransportError;

/// Server-side hold time of one `/acks` long-poll.
const ACK_POLL_TIMEOUT_SECS: u64 = 25;
/// Pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Interval between `/status` checks while waiting for the session.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Pause after an empty `/acks` batch, for bridges that answer without holding.
const EMPTY_POLL_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct SessionStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    auth_failure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NumberLookup {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeAck {
    offset: u64,
    id: String,
    ack: i64,
}

/// Transport backed by the session bridge's HTTP API.
pub struct BridgeTransport {
    client: reqwest::Client,
    base_url: String,
    ready_timeout: Duration,
    bus: AckBus,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(base_url: impl Into<String>, ready_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ready_timeout,
            bus: AckBus::new(),
            poller: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Spawn the ack poller if it is not running yet.
    fn start_ack_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            return;
        }
        let client = self.client.clone();
        let url = self.url("/acks");
        let bus = self.bus.clone();
        *poller = Some(tokio::spawn(poll_acks(client, url, bus)));
    }

    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::SendFailed(format!("bridge returned {status}: {body}")))
    }
}

/// Long-poll `/acks` forever, publishing every event on `bus`.
async fn poll_acks(client: reqwest::Client, url: String, bus: AckBus) {
    let mut offset: u64 = 0;
    info!("Listening for message acknowledgments...");

    loop {
        let resp = client
            .get(&url)
            .query(&[("offset", offset), ("timeout", ACK_POLL_TIMEOUT_SECS)])
            .timeout(Duration::from_secs(ACK_POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!("Ack poll error: {e}");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        let acks: Vec<BridgeAck> = match resp.json().await {
            Ok(a) => a,
            Err(e) => {
                warn!("Ack poll parse error: {e}");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        if acks.is_empty() {
            tokio::time::sleep(EMPTY_POLL_PAUSE).await;
            continue;
        }

        for ack in acks {
            offset = offset.max(ack.offset + 1);
            let Some(level) = AckLevel::from_code(ack.ack) else {
                debug!(message_id = %ack.id, code = ack.ack, "Ignoring ack with unknown level");
                continue;
            };
            bus.publish(AckEvent {
                message_id: MessageId(ack.id),
                ack: level,
            });
        }
    }
}

fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        "whatsapp-bridge"
    }

    async fn ready(&self) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        let mut qr_announced = false;

        loop {
            match self.client.get(self.url("/status")).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<SessionStatus>().await {
                    Err(e) => debug!("Bridge status not parseable yet: {e}"),
                    Ok(status) => {
                        if let Some(reason) = status.auth_failure {
                            return Err(TransportError::AuthFailed(reason));
                        }
                        if status.ready {
                            info!(bridge = %self.base_url, "WhatsApp session ready");
                            self.start_ack_poller();
                            return Ok(());
                        }
                        if status.qr.is_some() && !qr_announced {
                            info!("Session not paired: scan the QR code shown by the bridge (first run only)");
                            qr_announced = true;
                        }
                    }
                },
                Ok(resp) => debug!(status = %resp.status(), "Bridge status not available yet"),
                Err(e) => debug!("Bridge not reachable yet: {e}"),
            }

            if tokio::time::Instant::now() + READY_POLL_INTERVAL > deadline {
                return Err(TransportError::NotReady(self.ready_timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn resolve_recipient(
        &self,
        identity: &PhoneIdentity,
    ) -> Result<Option<RecipientId>, TransportError> {
        let resp = self
            .client
            .get(self.url(&format!("/numbers/{identity}")))
            .send()
            .await?;
        let lookup: NumberLookup = Self::check_response(resp).await?.json().await?;
        Ok(lookup.id.map(RecipientId))
    }

    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<MessageHandle, TransportError> {
        let body = serde_json::json!({
            "to": to.0,
            "text": text,
        });
        let resp = self
            .client
            .post(self.url("/messages/text"))
            .json(&body)
            .send()
            .await?;
        let handle: MessageHandle = Self::check_response(resp).await?.json().await?;
        debug!(to = %to, message_id = %handle.id, "Text dispatched");
        Ok(handle)
    }

    async fn send_image(
        &self,
        to: &RecipientId,
        image: &Path,
        caption: &str,
    ) -> Result<MessageHandle, TransportError> {
        let file_name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.jpg");

        let file_bytes = tokio::fs::read(image).await?;
        let part = Part::bytes(file_bytes)
            .file_name(file_name.to_string())
            .mime_str(image_mime(image))?;

        let form = Form::new()
            .text("to", to.0.clone())
            .text("caption", caption.to_string())
            .part("file", part);

        let resp = self
            .client
            .post(self.url("/messages/image"))
            .multipart(form)
            .send()
            .await?;
        let handle: MessageHandle = Self::check_response(resp).await?.json().await?;
        debug!(to = %to, message_id = %handle.id, file = file_name, "Image dispatched");
        Ok(handle)
    }

    fn subscribe_acks(&self) -> AckSubscription {
        self.bus.subscribe()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::channels::{AckWait, wait_for_ack};
    use crate::contacts::identity;

    #[test]
    fn mime_from_extension() {
        assert_eq!(image_mime(Path::new("img/expo.jpeg")), "image/jpeg");
        assert_eq!(image_mime(Path::new("promo.PNG")), "image/png");
        assert_eq!(image_mime(Path::new("noext")), "image/jpeg");
    }

    #[tokio::test]
    async fn unreachable_number_resolves_to_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/numbers/51987654321")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":null}"#)
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(1));
        let resolved = transport.resolve_recipient(&identity("51987654321")).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn reachable_number_and_text_send() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/numbers/51987654321")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"51987654321@c.us"}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/messages/text")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "to": "51987654321@c.us",
                "text": "hola"
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"msg-1","ack":0}"#)
            .create_async()
            .await;

        let transport = BridgeTransport::new(format!("{}/", server.url()), Duration::from_secs(1));
        let to = transport
            .resolve_recipient(&identity("51987654321"))
            .await
            .unwrap()
            .unwrap();
        let handle = transport.send_text(&to, "hola").await.unwrap();
        send.assert_async().await;
        assert_eq!(handle.id, MessageId("msg-1".into()));
        assert_eq!(handle.ack, AckLevel::Pending);
    }

    #[tokio::test]
    async fn failed_send_surfaces_bridge_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/messages/text")
            .with_status(500)
            .with_body("session closed")
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(1));
        let err = transport
            .send_text(&RecipientId("x@c.us".into()), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(ref m) if m.contains("session closed")));
    }

    #[tokio::test]
    async fn image_send_uses_multipart() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", "/messages/image")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::Regex("promo caption".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"img-1","ack":1}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("expo.jpeg");
        std::fs::write(&image, b"\xFF\xD8\xFFfake").unwrap();

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(1));
        let handle = transport
            .send_image(&RecipientId("x@c.us".into()), &image, "promo caption")
            .await
            .unwrap();
        send.assert_async().await;
        assert_eq!(handle.ack, AckLevel::Server);
    }

    #[tokio::test]
    async fn auth_failure_stops_ready_wait() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/status")
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":false,"auth_failure":"session revoked"}"#)
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(10));
        let err = transport.ready().await.unwrap_err();
        assert!(matches!(err, TransportError::AuthFailed(ref r) if r == "session revoked"));
    }

    #[tokio::test]
    async fn unparseable_status_keeps_waiting_until_timeout() {
        let mut server = mockito::Server::new_async().await;
        let status = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body("starting...")
            .expect_at_least(2)
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(3));
        let err = transport.ready().await.unwrap_err();
        status.assert_async().await;
        assert!(matches!(err, TransportError::NotReady(d) if d == Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn empty_ack_batches_do_not_spin() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/status")
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":true}"#)
            .create_async()
            .await;
        let acks = server
            .mock("GET", Matcher::Regex("^/acks".into()))
            .with_header("content-type", "application/json")
            .with_body("[]")
            .expect_at_least(1)
            .expect_at_most(3)
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(5));
        transport.ready().await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        transport.shutdown().await.unwrap();

        acks.assert_async().await;
    }

    #[tokio::test]
    async fn ready_session_streams_acks() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/status")
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":true}"#)
            .create_async()
            .await;
        let _acks = server
            .mock("GET", Matcher::Regex("^/acks".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"[{"offset":0,"id":"other","ack":3},{"offset":1,"id":"msg-1","ack":1}]"#)
            .create_async()
            .await;

        let transport = BridgeTransport::new(server.url(), Duration::from_secs(5));
        let sub = transport.subscribe_acks();
        transport.ready().await.unwrap();

        let handle = MessageHandle {
            id: MessageId("msg-1".into()),
            ack: AckLevel::Pending,
        };
        let result = wait_for_ack(sub, &handle, AckLevel::Server, Duration::from_secs(5)).await;
        assert_eq!(result, AckWait::Confirmed(AckLevel::Server));

        transport.shutdown().await.unwrap();
    }
}
