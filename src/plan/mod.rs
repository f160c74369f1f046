//! Signal plan - which fleet directive is in effect
//!
//! A pure projection over the directives the feed holds:
//!
//! 1. reduce to each authorized signer's latest directive
//! 2. the newest directive overall picks the candidate action
//! 3. signers whose latest directive carries that action have signed
//! 4. if none of them has spoken within the timeout the plan decays to inactive
//!
//! Ties on `created_at` are broken by the lexically lowest id, so every replica
//! derives the same plan from the same records.

pub mod service;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::feed::ProcessedEvent;
use crate::record::DIRECTIVE_KIND;

pub use service::{default_tick_interval, spawn_plan_task, PlanEngine};

/// Ordered, de-duplicated set of signers whose directives count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AuthorizedSigners {
    signers: Vec<String>,
}

impl AuthorizedSigners {
    pub fn new<I, S>(signers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for signer in signers.into_iter().map(Into::into) {
            if !unique.contains(&signer) {
                unique.push(signer);
            }
        }
        Self { signers: unique }
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.signers.iter().any(|s| s == pubkey)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.signers.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.signers
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

impl From<Vec<String>> for AuthorizedSigners {
    fn from(signers: Vec<String>) -> Self {
        Self::new(signers)
    }
}

impl From<AuthorizedSigners> for Vec<String> {
    fn from(signers: AuthorizedSigners) -> Self {
        signers.signers
    }
}

/// Signer pubkey → that signer's latest directive
pub type LatestDirectiveView = BTreeMap<String, ProcessedEvent>;

/// Reduce directives to one per authorized signer: greatest `created_at`,
/// then lowest event id.
pub fn latest_directive_view<'a, I>(signals: I, authorized: &AuthorizedSigners) -> LatestDirectiveView
where
    I: IntoIterator<Item = &'a ProcessedEvent>,
{
    let mut view = LatestDirectiveView::new();

    for event in signals {
        if event.kind != DIRECTIVE_KIND || !authorized.contains(&event.pubkey) {
            continue;
        }

        let replace = match view.get(&event.pubkey) {
            Some(current) => {
                event.created_at > current.created_at
                    || (event.created_at == current.created_at && event.id < current.id)
            }
            None => true,
        };
        if replace {
            view.insert(event.pubkey.clone(), event.clone());
        }
    }

    view
}

/// Earliest adopter of the winning action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredBy {
    pub pubkey: String,
    pub timestamp: u64,
}

/// The action currently in effect and who backs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPlan {
    pub action: Option<String>,
    /// In authorized-set order
    pub signed_pubkeys: Vec<String>,
    /// In authorized-set order
    pub pending_pubkeys: Vec<String>,
    pub triggered_by: Option<TriggeredBy>,
    pub is_active: bool,
}

impl SignalPlan {
    /// No action in effect; everyone pending
    pub fn inactive(authorized: &AuthorizedSigners) -> Self {
        Self {
            action: None,
            signed_pubkeys: Vec::new(),
            pending_pubkeys: authorized.as_slice().to_vec(),
            triggered_by: None,
            is_active: false,
        }
    }
}

/// Derive the plan at `now` (unix seconds)
pub fn derive_plan(
    view: &LatestDirectiveView,
    authorized: &AuthorizedSigners,
    now: u64,
    timeout_secs: u64,
) -> SignalPlan {
    let entries: Vec<&ProcessedEvent> = view
        .values()
        .filter(|e| authorized.contains(&e.pubkey))
        .collect();

    // Equal timestamps: lowest signer wins
    let newest = entries.iter().copied().max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| b.pubkey.cmp(&a.pubkey))
    });
    let Some(newest) = newest else {
        return SignalPlan::inactive(authorized);
    };
    let action = newest.action.as_str();

    let matching: Vec<&ProcessedEvent> = entries
        .iter()
        .copied()
        .filter(|e| e.action == action)
        .collect();

    let most_recent = matching
        .iter()
        .map(|e| e.created_at)
        .max()
        .unwrap_or(newest.created_at);
    if now.saturating_sub(most_recent) > timeout_secs {
        return SignalPlan::inactive(authorized);
    }

    let triggered_by = matching
        .iter()
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.pubkey.cmp(&b.pubkey))
        })
        .map(|e| TriggeredBy {
            pubkey: e.pubkey.clone(),
            timestamp: e.created_at,
        });

    let (signed_pubkeys, pending_pubkeys): (Vec<String>, Vec<String>) = authorized
        .iter()
        .cloned()
        .partition(|signer| matching.iter().any(|e| &e.pubkey == signer));

    SignalPlan {
        action: Some(action.to_string()),
        signed_pubkeys,
        pending_pubkeys,
        triggered_by,
        is_active: true,
    }
}

/// Current unix time in seconds
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
