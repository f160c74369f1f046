//! Record model - directives and acknowledgements
//!
//! Two record kinds travel over the relays:
//! - Kind 33321 (directive): addressable, one slot per signer (`d=hyperqube`).
//!   Issued by authorized signers to announce an upgrade or a reboot.
//! - Kind 3333 (acknowledgement): emitted by a node after acting on a directive.
//!
//! Raw records carry untyped tag arrays. [`parse_record`] validates a raw record
//! once and produces a closed [`Record`] variant, so nothing downstream has to
//! look at tag arrays again.

pub mod builder;
pub mod validate;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub use builder::{build_acknowledgement, build_directive, AckFields, DirectiveFields};
pub use validate::{validate_acknowledgement, validate_directive, ValidationError};

/// Directive record kind (addressable)
pub const DIRECTIVE_KIND: u16 = 33321;

/// Acknowledgement record kind
pub const ACK_KIND: u16 = 3333;

/// Profile metadata kind
pub const METADATA_KIND: u16 = 0;

/// The single addressable directive slot per signer
pub const DIRECTIVE_SLOT: &str = "hyperqube";

/// Kinds that are only routed to app-specific relays
pub const APP_ONLY_KINDS: [u16; 2] = [DIRECTIVE_KIND, ACK_KIND];

/// A tag: name followed by one or more values
pub type Tag = Vec<String>;

/// A signed record as delivered by a relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl RawEvent {
    /// First value of the first tag named `name`
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }

    /// All tags named `name`, in record order
    pub fn tags_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Tag> + 'n
    where
        'a: 'n,
    {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }

    /// The record without id and signature
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Whether `id` matches the record's content
    pub fn has_valid_id(&self) -> bool {
        self.unsigned().event_id() == self.id
    }
}

pub(crate) fn tag_value<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// A record before signing. Signing happens outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Content-addressed id: hex SHA-256 of `[0, pubkey, created_at, kind, tags, content]`
    pub fn event_id(&self) -> String {
        let commitment = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        let digest = Sha256::digest(commitment.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Attach an externally produced signature
    pub fn into_signed(self, sig: String) -> RawEvent {
        RawEvent {
            id: self.event_id(),
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

//=============================================================================
// TAG VALUES
//=============================================================================

/// Fleet-wide action a directive can announce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Upgrade,
    Reboot,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Upgrade => "upgrade",
            Action::Reboot => "reboot",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "upgrade" => Some(Action::Upgrade),
            "reboot" => Some(Action::Reboot),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Success,
    Failure,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Success => "success",
            AckStatus::Failure => "failure",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "success" => Some(AckStatus::Success),
            "failure" => Some(AckStatus::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a signer's directive slot: `33321:<pubkey>:hyperqube`
pub fn directive_address(signer: &str) -> String {
    format!("{}:{}:{}", DIRECTIVE_KIND, signer, DIRECTIVE_SLOT)
}

/// Extract the signer pubkey from a directive address
pub fn parse_directive_address(address: &str) -> Option<&str> {
    let rest = address.strip_prefix("33321:")?;
    let signer = rest.strip_suffix(":hyperqube")?;
    validate::is_pubkey(signer).then_some(signer)
}

//=============================================================================
// TYPED RECORDS
//=============================================================================

/// Action-specific directive payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DirectiveAction {
    Upgrade,
    Reboot { genesis_url: String, required_by: u64 },
}

impl DirectiveAction {
    pub fn action(&self) -> Action {
        match self {
            DirectiveAction::Upgrade => Action::Upgrade,
            DirectiveAction::Reboot { .. } => Action::Reboot,
        }
    }
}

/// A validated directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: String,
    pub signer: String,
    pub issued_at: u64,
    pub network: String,
    pub version: String,
    pub version_hash: String,
    #[serde(flatten)]
    pub action: DirectiveAction,
    pub content: String,
}

/// Reference to a directive slot, with an optional relay hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveRef {
    pub address: String,
    pub relay_hint: Option<String>,
}

/// Reference to a directive signer, with an optional relay hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRef {
    pub pubkey: String,
    pub relay_hint: Option<String>,
}

/// Execution outcome carried by an acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckOutcome {
    Success,
    Failure { error: String },
}

impl AckOutcome {
    pub fn status(&self) -> AckStatus {
        match self {
            AckOutcome::Success => AckStatus::Success,
            AckOutcome::Failure { .. } => AckStatus::Failure,
        }
    }
}

/// A validated acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub id: String,
    pub node_pubkey: String,
    pub issued_at: u64,
    pub directive_refs: Vec<DirectiveRef>,
    pub signer_refs: Vec<SignerRef>,
    pub action: Action,
    pub network: String,
    pub version: String,
    #[serde(flatten)]
    pub outcome: AckOutcome,
    pub node_id: String,
    pub action_at: u64,
    pub content: String,
}

/// A validated record of one of the two supported kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Directive(Directive),
    Acknowledgement(Acknowledgement),
}

/// Validate a raw record and lift it into its typed variant
pub fn parse_record(raw: &RawEvent) -> Result<Record, ValidationError> {
    match raw.kind {
        DIRECTIVE_KIND => parse_directive(raw).map(Record::Directive),
        ACK_KIND => parse_acknowledgement(raw).map(Record::Acknowledgement),
        other => Err(ValidationError::UnsupportedKind(other)),
    }
}

fn parse_directive(raw: &RawEvent) -> Result<Directive, ValidationError> {
    validate_directive(raw)?;

    let action = match validate::action_tag(raw)? {
        Action::Upgrade => DirectiveAction::Upgrade,
        Action::Reboot => DirectiveAction::Reboot {
            genesis_url: validate::exactly_one(raw, "genesis_url")?.to_string(),
            required_by: validate::decimal(raw, "required_by")?,
        },
    };

    Ok(Directive {
        id: raw.id.clone(),
        signer: raw.pubkey.clone(),
        issued_at: raw.created_at,
        network: validate::exactly_one(raw, "network")?.to_string(),
        version: validate::exactly_one(raw, "version")?.to_string(),
        version_hash: validate::exactly_one(raw, "hash")?.to_string(),
        action,
        content: raw.content.clone(),
    })
}

fn parse_acknowledgement(raw: &RawEvent) -> Result<Acknowledgement, ValidationError> {
    validate_acknowledgement(raw)?;

    let directive_refs = raw
        .tags_named("a")
        .map(|tag| DirectiveRef {
            address: tag.get(1).cloned().unwrap_or_default(),
            relay_hint: tag.get(2).cloned(),
        })
        .collect();
    let signer_refs = raw
        .tags_named("p")
        .map(|tag| SignerRef {
            pubkey: tag.get(1).cloned().unwrap_or_default(),
            relay_hint: tag.get(2).cloned(),
        })
        .collect();

    let outcome = match validate::status_tag(raw)? {
        AckStatus::Success => AckOutcome::Success,
        AckStatus::Failure => AckOutcome::Failure {
            error: validate::exactly_one(raw, "error")?.to_string(),
        },
    };

    Ok(Acknowledgement {
        id: raw.id.clone(),
        node_pubkey: raw.pubkey.clone(),
        issued_at: raw.created_at,
        directive_refs,
        signer_refs,
        action: validate::action_tag(raw)?,
        network: validate::exactly_one(raw, "network")?.to_string(),
        version: validate::exactly_one(raw, "version")?.to_string(),
        outcome,
        node_id: validate::exactly_one(raw, "node_id")?.to_string(),
        action_at: validate::decimal(raw, "action_at")?,
        content: raw.content.clone(),
    })
}
