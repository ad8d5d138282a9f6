use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::error::PageError;

pub async fn fetch_login_token(client: &Client, api_url: &url::Url) -> Result<String, PageError> {
    let resp: Value = client
        .get(api_url.as_str())
        .query(&[
            ("action", "query"),
            ("meta", "tokens"),
            ("type", "login"),
            ("format", "json"),
        ])
        .send()
        .await?
        .json()
        .await?;

    resp["query"]["tokens"]["logintoken"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| PageError::Auth {
            reason: "no login token returned".into(),
        })
}

pub async fn login_bot_password(
    client: &Client,
    api_url: &url::Url,
    username: &str,
    password: &str,
) -> Result<(), PageError> {
    let token = fetch_login_token(client, api_url).await?;

    let resp: Value = client
        .post(api_url.as_str())
        .form(&[
            ("action", "login"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", &token),
            ("format", "json"),
        ])
        .send()
        .await?
        .json()
        .await?;

    let result = resp["login"]["result"].as_str().unwrap_or("");
    if result == "Success" {
        info!(username, "Login successful");
        Ok(())
    } else {
        let reason = resp["login"]["reason"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string();
        Err(PageError::Auth { reason })
    }
}
