use super::traits::{MessagingPlatform, ResourceKind};
use crate::config::LarkConfig;
use crate::providers::sanitize_api_error;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

const FEISHU_BASE_URL: &str = "https://open.feishu.cn/open-apis";
const LARK_BASE_URL: &str = "https://open.larksuite.com/open-apis";

/// Refresh tenant token this many seconds before the announced expiry.
const LARK_TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(120);
/// Fallback tenant token TTL when `expire`/`expires_in` is absent.
const LARK_DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7200);
/// Feishu/Lark API business code for expired/invalid tenant access token.
const LARK_INVALID_ACCESS_TOKEN_CODE: i64 = 99_991_663;
const LARK_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedTenantToken {
    value: String,
    refresh_after: Instant,
}

fn extract_lark_response_code(body: &serde_json::Value) -> Option<i64> {
    body.get("code").and_then(serde_json::Value::as_i64)
}

fn is_lark_invalid_access_token(body: &serde_json::Value) -> bool {
    extract_lark_response_code(body) == Some(LARK_INVALID_ACCESS_TOKEN_CODE)
}

fn should_refresh_lark_tenant_token(status: StatusCode, body: &serde_json::Value) -> bool {
    status == StatusCode::UNAUTHORIZED || is_lark_invalid_access_token(body)
}

fn extract_lark_token_ttl_seconds(body: &serde_json::Value) -> u64 {
    body.get("expire")
        .or_else(|| body.get("expires_in"))
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_i64().and_then(|i| u64::try_from(i).ok()))
        })
        .unwrap_or(LARK_DEFAULT_TOKEN_TTL.as_secs())
        .max(1)
}

fn next_token_refresh_deadline(now: Instant, ttl_seconds: u64) -> Instant {
    let ttl = Duration::from_secs(ttl_seconds.max(1));
    let refresh_in = ttl
        .checked_sub(LARK_TOKEN_REFRESH_SKEW)
        .unwrap_or(Duration::from_secs(1));
    now + refresh_in
}

/// Fail unless both the HTTP status and the body `code` report success.
fn ensure_lark_success(
    status: StatusCode,
    body: &serde_json::Value,
    context: &str,
) -> anyhow::Result<()> {
    if !status.is_success() {
        anyhow::bail!(
            "Lark {context} failed: status={status}, body={}",
            sanitize_api_error(&body.to_string())
        );
    }

    let code = extract_lark_response_code(body).unwrap_or(0);
    if code != 0 {
        let msg = body
            .get("msg")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("Lark {context} failed: code={code}, msg={msg}");
    }

    Ok(())
}

fn text_content(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

/// HTTP client for the Lark/Feishu open platform.
#[derive(Clone)]
pub struct LarkClient {
    app_id: String,
    app_secret: String,
    base_url: String,
    http: reqwest::Client,
    /// Cached tenant access token
    tenant_token: Arc<RwLock<Option<CachedTenantToken>>>,
}

impl LarkClient {
    pub fn new(config: &LarkConfig) -> anyhow::Result<Self> {
        let base_url = match config.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ if config.use_feishu => FEISHU_BASE_URL.to_string(),
            _ => LARK_BASE_URL.to_string(),
        };
        let http = reqwest::Client::builder()
            .timeout(LARK_HTTP_TIMEOUT)
            .build()
            .context("Failed to build Lark HTTP client")?;

        Ok(Self {
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            base_url,
            http,
            tenant_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Get or refresh tenant access token
    async fn get_tenant_access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.tenant_token.read().await;
            if let Some(ref token) = *cached {
                if Instant::now() < token.refresh_after {
                    return Ok(token.value.clone());
                }
            }
        }

        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let resp = self
            .http
            .post(self.url("auth/v3/tenant_access_token/internal"))
            .json(&body)
            .send()
            .await
            .context("Lark tenant_access_token request failed")?;
        let status = resp.status();
        let data: serde_json::Value = resp.json().await?;
        ensure_lark_success(status, &data, "tenant_access_token")?;

        let token = data
            .get("tenant_access_token")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing tenant_access_token in response"))?
            .to_string();

        let ttl_seconds = extract_lark_token_ttl_seconds(&data);
        let refresh_after = next_token_refresh_deadline(Instant::now(), ttl_seconds);

        *self.tenant_token.write().await = Some(CachedTenantToken {
            value: token.clone(),
            refresh_after,
        });

        Ok(token)
    }

    /// Invalidate cached token (called when API reports an expired tenant token).
    async fn invalidate_token(&self) {
        *self.tenant_token.write().await = None;
    }

    async fn read_json(request: RequestBuilder) -> anyhow::Result<(StatusCode, serde_json::Value)> {
        let resp = request.send().await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<serde_json::Value>(&raw)
            .unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
        Ok((status, parsed))
    }

    /// Send an authorized JSON request, refreshing the tenant token and
    /// retrying once when Lark reports it expired.
    async fn call_json<F>(&self, context: &str, build: F) -> anyhow::Result<serde_json::Value>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.get_tenant_access_token().await?;
        let (mut status, mut body) = Self::read_json(build(&token))
            .await
            .with_context(|| format!("Lark {context} request failed"))?;

        if should_refresh_lark_tenant_token(status, &body) {
            tracing::warn!("Lark tenant token rejected during {context}; refreshing");
            self.invalidate_token().await;
            let token = self.get_tenant_access_token().await?;
            (status, body) = Self::read_json(build(&token))
                .await
                .with_context(|| format!("Lark {context} retry failed"))?;
        }

        ensure_lark_success(status, &body, context)?;
        Ok(body)
    }

    /// Binary download with the same token refresh behaviour as [`Self::call_json`].
    async fn call_bytes<F>(&self, context: &str, build: F) -> anyhow::Result<Vec<u8>>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let mut retried = false;
        loop {
            let token = self.get_tenant_access_token().await?;
            let resp = build(&token)
                .send()
                .await
                .with_context(|| format!("Lark {context} request failed"))?;
            let status = resp.status();
            if status.is_success() {
                let bytes = resp.bytes().await?;
                return Ok(bytes.to_vec());
            }

            let raw = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str::<serde_json::Value>(&raw)
                .unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
            if !retried && should_refresh_lark_tenant_token(status, &body) {
                tracing::warn!("Lark tenant token rejected during {context}; refreshing");
                self.invalidate_token().await;
                retried = true;
                continue;
            }
            ensure_lark_success(status, &body, context)?;
            anyhow::bail!("Lark {context} failed: status={status}");
        }
    }

    async fn reply_message(
        &self,
        msg_id: &str,
        msg_type: &str,
        content: String,
    ) -> anyhow::Result<String> {
        let url = self.url(&format!("im/v1/messages/{msg_id}/reply"));
        let body = serde_json::json!({
            "msg_type": msg_type,
            "content": content,
            "uuid": Uuid::new_v4().to_string(),
        });
        let data = self
            .call_json("reply", |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        Ok(data
            .pointer("/data/message_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl MessagingPlatform for LarkClient {
    fn name(&self) -> &str {
        "lark"
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let url = self.url("im/v1/messages?receive_id_type=chat_id");
        let body = serde_json::json!({
            "receive_id": chat_id,
            "msg_type": "text",
            "content": text_content(text),
        });
        self.call_json("send", |token| {
            self.http.post(&url).bearer_auth(token).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn reply_text(&self, msg_id: &str, text: &str) -> anyhow::Result<()> {
        self.reply_message(msg_id, "text", text_content(text)).await?;
        Ok(())
    }

    async fn reply_card(&self, msg_id: &str, card: &serde_json::Value) -> anyhow::Result<String> {
        let card_id = self
            .reply_message(msg_id, "interactive", card.to_string())
            .await?;
        if card_id.is_empty() {
            anyhow::bail!("Lark reply succeeded but returned no message_id");
        }
        Ok(card_id)
    }

    async fn patch_card(&self, card_id: &str, card: &serde_json::Value) -> anyhow::Result<()> {
        let url = self.url(&format!("im/v1/messages/{card_id}"));
        let body = serde_json::json!({ "content": card.to_string() });
        self.call_json("patch", |token| {
            self.http.patch(&url).bearer_auth(token).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        msg_id: &str,
        file_key: &str,
        kind: ResourceKind,
    ) -> anyhow::Result<Vec<u8>> {
        let url = self.url(&format!(
            "im/v1/messages/{msg_id}/resources/{file_key}?type={}",
            kind.as_str()
        ));
        self.call_bytes("resource download", |token| {
            self.http.get(&url).bearer_auth(token)
        })
        .await
    }

    async fn upload_image(&self, image: Vec<u8>) -> anyhow::Result<String> {
        let url = self.url("im/v1/images");
        let data = self
            .call_json("image upload", |token| {
                // Form is not Clone, so it is rebuilt per attempt.
                let form = Form::new()
                    .text("image_type", "message")
                    .part("image", Part::bytes(image.clone()).file_name("image.png"));
                self.http.post(&url).bearer_auth(token).multipart(form)
            })
            .await?;

        data.pointer("/data/image_key")
            .and_then(serde_json::Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Lark image upload returned no image_key"))
    }

    async fn download_image(&self, image_key: &str) -> anyhow::Result<Vec<u8>> {
        let url = self.url(&format!("im/v1/images/{image_key}"));
        self.call_bytes("image download", |token| {
            self.http.get(&url).bearer_auth(token)
        })
        .await
    }
}
