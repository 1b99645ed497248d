use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{BotStatusReport, RecorderProvider, ScheduleRequest, TimeWindow};
use crate::core::types::RemoteCalendarEvent;

/// HTTP client for the recording provider's REST API.
///
/// Every call carries a bounded request timeout so a stalled provider call
/// cannot stall an entire sweep; callers treat a timeout as a transient
/// failure for that one entity and move on.
pub struct HttpRecorderProvider {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Deserialize)]
struct ScheduleResponse {
    bot_id: String,
}

impl HttpRecorderProvider {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{context} failed ({status}): {body}"));
        }
        Ok(response)
    }
}

#[async_trait]
impl RecorderProvider for HttpRecorderProvider {
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RemoteCalendarEvent>> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let res = self
            .authed(self.client.get(&url))
            .query(&[
                ("from", window.from.to_rfc3339()),
                ("to", window.to.to_rfc3339()),
            ])
            .send()
            .await?;
        let res = Self::check(res, "list_events").await?;
        Ok(res.json().await?)
    }

    async fn get_event(&self, event_id: &str) -> Result<RemoteCalendarEvent> {
        let url = format!("{}/events/{}", self.base_url, event_id);
        let res = self.authed(self.client.get(&url)).send().await?;
        let res = Self::check(res, "get_event").await?;
        Ok(res.json().await?)
    }

    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport> {
        let url = format!("{}/bots/{}", self.base_url, bot_id);
        let res = self.authed(self.client.get(&url)).send().await?;
        let res = Self::check(res, "get_bot_status").await?;
        Ok(res.json().await?)
    }

    async fn schedule_recording(&self, request: &ScheduleRequest) -> Result<String> {
        let url = format!("{}/bots", self.base_url);
        let res = self
            .authed(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        let res = Self::check(res, "schedule_recording").await?;
        let parsed: ScheduleResponse = res.json().await?;
        Ok(parsed.bot_id)
    }

    async fn unschedule_recording(&self, bot_id: &str) -> Result<()> {
        let url = format!("{}/bots/{}", self.base_url, bot_id);
        let res = self.authed(self.client.delete(&url)).send().await?;
        Self::check(res, "unschedule_recording").await?;
        Ok(())
    }
}
