//! Twilio Messages API adapter for confirmation texts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::ConfirmationSender;

/// Twilio REST client for outbound SMS
pub struct TwilioSender {
    /// Account SID (also the basic-auth user)
    account_sid: String,
    auth_token: String,
    /// Sending number in E.164
    from_number: String,
    client: reqwest::Client,
}

/// Successful message create response
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// Error body returned on 4xx
#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

impl TwilioSender {
    pub fn new(
        client: reqwest::Client,
        account_sid: String,
        auth_token: String,
        from_number: String,
    ) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            client,
        }
    }

    /// Build API URL
    fn api_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }
}

#[async_trait]
impl ConfirmationSender for TwilioSender {
    async fn send(&self, to: &str, body: &str) -> Result<String> {
        let response = self
            .client
            .post(self.api_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .context("Failed to send Twilio message")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Twilio response")?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TwilioError>(&text)
                .map(|e| match e.code {
                    Some(code) => format!("{} (code {})", e.message, code),
                    None => e.message,
                })
                .unwrap_or(text);
            anyhow::bail!("Twilio API error ({}): {}", status, detail);
        }

        let message: MessageResource =
            serde_json::from_str(&text).context("Failed to parse Twilio response")?;
        Ok(message.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let sender = TwilioSender::new(
            reqwest::Client::new(),
            "AC123".to_string(),
            "token".to_string(),
            "+15550000000".to_string(),
        );
        assert_eq!(
            sender.api_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }
}
