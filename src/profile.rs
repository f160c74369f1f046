//! Profile cache - display identities from kind 0 metadata

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feed::{fallback_author, Author};
use crate::record::{RawEvent, METADATA_KIND};
use crate::relay::{EventLog, Filter, RelayError};

/// Kind 0 metadata, as much of it as is displayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub pubkey: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataContent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    about: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Profile {
    /// Parse a kind 0 record. Returns None for other kinds or unreadable content.
    pub fn from_event(event: &RawEvent) -> Option<Self> {
        if event.kind != METADATA_KIND {
            return None;
        }

        let content: MetadataContent = match serde_json::from_str(&event.content) {
            Ok(content) => content,
            Err(e) => {
                debug!(pubkey = %event.pubkey, error = %e, "Unreadable profile metadata");
                return None;
            }
        };

        Some(Self {
            pubkey: event.pubkey.clone(),
            name: non_empty(content.name),
            display_name: non_empty(content.display_name),
            picture: non_empty(content.picture),
            about: non_empty(content.about),
            created_at: event.created_at,
        })
    }

    pub fn author(&self) -> Author {
        let fallback = fallback_author(&self.pubkey);
        Author {
            name: self
                .display_name
                .clone()
                .or_else(|| self.name.clone())
                .unwrap_or(fallback.name),
            picture: self.picture.clone().unwrap_or_default(),
        }
    }
}

/// Two-character badge for a signer: the last two characters, upper case
pub fn pubkey_shorthand(pubkey: &str) -> String {
    let start = pubkey
        .char_indices()
        .rev()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    pubkey[start..].to_uppercase()
}

/// Concurrent profile cache
#[derive(Debug, Default)]
pub struct ProfileCache {
    profiles: DashMap<String, Profile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pubkey: &str) -> Option<Profile> {
        self.profiles.get(pubkey).map(|p| p.value().clone())
    }

    /// Insert unless a newer profile for the same pubkey is cached
    pub fn insert(&self, profile: Profile) -> bool {
        match self.profiles.entry(profile.pubkey.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().created_at >= profile.created_at {
                    return false;
                }
                existing.insert(profile);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(profile);
                true
            }
        }
    }

    /// Cached identity, or the fallback shorthand
    pub fn author_for(&self, pubkey: &str) -> Author {
        self.profiles
            .get(pubkey)
            .map(|p| p.author())
            .unwrap_or_else(|| fallback_author(pubkey))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Cache first, then a one-shot query
    pub async fn fetch_profile(
        &self,
        log: &dyn EventLog,
        pubkey: &str,
    ) -> Result<Option<Profile>, RelayError> {
        if let Some(profile) = self.get(pubkey) {
            return Ok(Some(profile));
        }

        let filter = Filter::new()
            .kinds([METADATA_KIND])
            .authors([pubkey.to_string()])
            .limit(1);
        for event in log.query(vec![filter]).await? {
            if let Some(profile) = Profile::from_event(&event) {
                self.insert(profile);
            }
        }

        Ok(self.get(pubkey))
    }

    /// Fetch every uncached profile in one query. Returns how many were added.
    pub async fn fetch_profiles(
        &self,
        log: &dyn EventLog,
        pubkeys: &[String],
    ) -> Result<usize, RelayError> {
        let missing: Vec<String> = pubkeys
            .iter()
            .filter(|p| !self.profiles.contains_key(p.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let filter = Filter::new()
            .kinds([METADATA_KIND])
            .limit(missing.len())
            .authors(missing);
        let mut added = 0;
        for event in log.query(vec![filter]).await? {
            if let Some(profile) = Profile::from_event(&event) {
                if self.insert(profile) {
                    added += 1;
                }
            }
        }

        debug!(added, "Fetched profiles");
        Ok(added)
    }
}
