use std::time::Duration;
use log::{debug, warn};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort liveness ping to a push monitor
#[derive(Debug, Clone)]
pub struct Heartbeat {
    client: Option<reqwest::Client>,
    url: Option<String>,
}

impl Heartbeat {
    pub fn new(url: Option<String>) -> Self {
        let url = url.filter(|u| !u.trim().is_empty());
        let client = match url {
            Some(_) => match reqwest::Client::builder().timeout(HEARTBEAT_TIMEOUT).build() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Heartbeat disabled, failed to build HTTP client: {}", e);
                    None
                }
            },
            None => None,
        };
        Self { client, url }
    }

    pub fn disabled() -> Self {
        Self { client: None, url: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Send one GET; every failure is swallowed
    pub async fn pulse(&self) {
        let (Some(client), Some(url)) = (&self.client, &self.url) else {
            return;
        };
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => debug!("Heartbeat sent"),
            Ok(resp) => debug!("Heartbeat answered {}", resp.status()),
            Err(e) => debug!("Heartbeat failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_heartbeat_is_a_no_op() {
        let hb = Heartbeat::new(None);
        assert!(!hb.is_enabled());
        hb.pulse().await;
        assert!(!Heartbeat::new(Some("  ".to_string())).is_enabled());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_swallowed() {
        let hb = Heartbeat::new(Some("http://127.0.0.1:9/push".to_string()));
        assert!(hb.is_enabled());
        hb.pulse().await;
    }
}
