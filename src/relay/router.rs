//! Kind-based relay routing
//!
//! App-only kinds stay on the special relays so the public network never sees
//! fleet directives. Everything else goes to the public relays.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use super::{Filter, RelayError};
use crate::record::{RawEvent, APP_ONLY_KINDS};

/// Connection state of one relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    pub url: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accept only ws:// and wss:// URLs with a host
pub fn validate_relay_url(raw: &str) -> Result<(), RelayError> {
    let invalid = |reason: &str| RelayError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

fn is_app_only(kind: u16) -> bool {
    APP_ONLY_KINDS.contains(&kind)
}

pub struct RelayRouter {
    public: RwLock<Vec<String>>,
    special: RwLock<Vec<String>>,
    user: RwLock<Vec<String>>,
    statuses: DashMap<String, RelayStatus>,
}

impl RelayRouter {
    pub fn new(public: Vec<String>, special: Vec<String>) -> Self {
        Self {
            public: RwLock::new(public),
            special: RwLock::new(special),
            user: RwLock::new(Vec::new()),
            statuses: DashMap::new(),
        }
    }

    pub async fn public_relays(&self) -> Vec<String> {
        self.public.read().await.clone()
    }

    pub async fn user_relays(&self) -> Vec<String> {
        self.user.read().await.clone()
    }

    /// Static special relays followed by user-added ones
    pub async fn special_relays(&self) -> Vec<String> {
        let mut relays = self.special.read().await.clone();
        for url in self.user.read().await.iter() {
            if !relays.contains(url) {
                relays.push(url.clone());
            }
        }
        relays
    }

    /// Every relay the router knows about, deduplicated
    pub async fn all_relays(&self) -> Vec<String> {
        let mut relays = self.public_relays().await;
        for url in self.special_relays().await {
            if !relays.contains(&url) {
                relays.push(url);
            }
        }
        relays
    }

    /// Split filters per relay. Filters naming any app-only kind go to special
    /// relays, the rest (including kind-less filters) to public relays.
    pub async fn route_filters(&self, filters: &[Filter]) -> HashMap<String, Vec<Filter>> {
        let (special_filters, public_filters): (Vec<Filter>, Vec<Filter>) =
            filters.iter().cloned().partition(|f| {
                f.kinds
                    .as_ref()
                    .map_or(false, |kinds| kinds.iter().copied().any(is_app_only))
            });

        let mut routes: HashMap<String, Vec<Filter>> = HashMap::new();
        if !public_filters.is_empty() {
            for url in self.public_relays().await {
                routes.entry(url).or_default().extend(public_filters.iter().cloned());
            }
        }
        if !special_filters.is_empty() {
            for url in self.special_relays().await {
                routes.entry(url).or_default().extend(special_filters.iter().cloned());
            }
        }
        routes
    }

    /// Relays an event should be published to
    pub async fn route_event(&self, event: &RawEvent) -> Result<Vec<String>, RelayError> {
        if is_app_only(event.kind) {
            let special = self.special_relays().await;
            if special.is_empty() {
                return Err(RelayError::NoSpecialRelays(event.kind));
            }
            Ok(special)
        } else {
            Ok(self.public_relays().await)
        }
    }

    pub async fn add_user_relay(&self, url: &str) -> Result<(), RelayError> {
        validate_relay_url(url)?;
        if self.all_relays().await.iter().any(|r| r == url) {
            return Err(RelayError::DuplicateRelay(url.to_string()));
        }

        self.user.write().await.push(url.to_string());
        info!(relay = %url, "User relay added");
        Ok(())
    }

    /// Remove a relay from whichever list holds it
    pub async fn remove_relay(&self, url: &str) -> Result<(), RelayError> {
        let mut removed = false;
        for list in [&self.user, &self.special, &self.public] {
            let mut relays = list.write().await;
            let before = relays.len();
            relays.retain(|r| r != url);
            removed |= relays.len() != before;
        }

        if !removed {
            return Err(RelayError::UnknownRelay(url.to_string()));
        }
        self.statuses.remove(url);
        info!(relay = %url, "Relay removed");
        Ok(())
    }

    pub fn set_status(&self, url: &str, connected: bool, error: Option<String>) {
        self.statuses.insert(
            url.to_string(),
            RelayStatus {
                url: url.to_string(),
                connected,
                error,
            },
        );
    }

    /// Known statuses sorted by URL
    pub fn statuses(&self) -> Vec<RelayStatus> {
        let mut statuses: Vec<RelayStatus> =
            self.statuses.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    pub fn connected_count(&self) -> usize {
        self.statuses.iter().filter(|entry| entry.connected).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ACK_KIND, DIRECTIVE_KIND, METADATA_KIND};

    fn router() -> RelayRouter {
        RelayRouter::new(
            vec!["wss://relay.damus.io".to_string()],
            vec!["ws://localhost:3334".to_string()],
        )
    }

    fn event(kind: u16) -> RawEvent {
        RawEvent {
            id: "e".to_string(),
            pubkey: "p".to_string(),
            created_at: 1,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_validate_relay_url() {
        assert!(validate_relay_url("wss://relay.damus.io").is_ok());
        assert!(validate_relay_url("ws://localhost:3334").is_ok());
        assert!(validate_relay_url("https://relay.damus.io").is_err());
        assert!(validate_relay_url("relay.damus.io").is_err());
    }

    #[tokio::test]
    async fn test_route_filters_splits_by_kind() {
        let router = router();
        let filters = vec![
            Filter::new().kinds([DIRECTIVE_KIND, ACK_KIND]),
            Filter::new().kinds([METADATA_KIND]),
        ];
        let routes = router.route_filters(&filters).await;

        assert_eq!(routes.len(), 2);
        assert_eq!(routes["ws://localhost:3334"], vec![filters[0].clone()]);
        assert_eq!(routes["wss://relay.damus.io"], vec![filters[1].clone()]);
    }

    #[tokio::test]
    async fn test_route_event() {
        let router = router();
        assert_eq!(
            router.route_event(&event(DIRECTIVE_KIND)).await.unwrap(),
            vec!["ws://localhost:3334"]
        );
        assert_eq!(
            router.route_event(&event(METADATA_KIND)).await.unwrap(),
            vec!["wss://relay.damus.io"]
        );
    }

    #[tokio::test]
    async fn test_app_only_without_special_relays() {
        let router = RelayRouter::new(vec!["wss://relay.damus.io".to_string()], vec![]);
        assert_eq!(
            router.route_event(&event(ACK_KIND)).await.unwrap_err(),
            RelayError::NoSpecialRelays(ACK_KIND)
        );
    }

    #[tokio::test]
    async fn test_user_relays() {
        let router = router();
        router.add_user_relay("wss://fleet.example.com").await.unwrap();
        assert_eq!(
            router.special_relays().await,
            vec!["ws://localhost:3334", "wss://fleet.example.com"]
        );

        assert_eq!(
            router.add_user_relay("wss://fleet.example.com").await.unwrap_err(),
            RelayError::DuplicateRelay("wss://fleet.example.com".to_string())
        );
        assert!(router.add_user_relay("http://nope").await.is_err());

        router.remove_relay("wss://fleet.example.com").await.unwrap();
        assert!(router.user_relays().await.is_empty());
        assert!(router.remove_relay("wss://fleet.example.com").await.is_err());
    }

    #[test]
    fn test_statuses_sorted() {
        let router = router();
        router.set_status("wss://b", true, None);
        router.set_status("wss://a", false, Some("refused".to_string()));

        let statuses = router.statuses();
        assert_eq!(statuses[0].url, "wss://a");
        assert_eq!(router.connected_count(), 1);
    }
}
