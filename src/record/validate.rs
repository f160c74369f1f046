//! Shape validation for directive and acknowledgement records
//!
//! Pure structural checks over tag arrays. Signatures are not verified here.

use super::{
    parse_directive_address, AckStatus, Action, RawEvent, ACK_KIND, DIRECTIVE_KIND,
    DIRECTIVE_SLOT,
};

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required '{0}' tag")]
    MissingRequiredAttribute(String),

    #[error("'{0}' tag must appear exactly once")]
    DuplicateAttribute(String),

    #[error("{action} action requires a '{attribute}' tag")]
    MissingActionSpecificAttribute { action: Action, attribute: String },

    #[error("failure status requires an 'error' tag")]
    MissingErrorDetail,

    #[error("invalid '{attribute}' tag: {reason}")]
    InvalidAttribute { attribute: String, reason: String },

    #[error("expected kind {expected}, found {found}")]
    WrongKind { expected: u16, found: u16 },

    #[error("unsupported kind {0}")]
    UnsupportedKind(u16),
}

impl ValidationError {
    fn invalid(attribute: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidAttribute {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check that a kind 33321 record carries every tag a directive needs
pub fn validate_directive(event: &RawEvent) -> Result<(), ValidationError> {
    expect_kind(event, DIRECTIVE_KIND)?;

    let slot = exactly_one(event, "d")?;
    if slot != DIRECTIVE_SLOT {
        return Err(ValidationError::invalid(
            "d",
            format!("expected '{}', found '{}'", DIRECTIVE_SLOT, slot),
        ));
    }

    exactly_one(event, "version")?;

    let hash = exactly_one(event, "hash")?;
    if !is_lower_hex(hash) {
        return Err(ValidationError::invalid("hash", "must be lowercase hex"));
    }

    exactly_one(event, "network")?;

    if action_tag(event)? == Action::Reboot {
        let genesis_url = action_specific(event, Action::Reboot, "genesis_url")?;
        check_url("genesis_url", genesis_url)?;

        let required_by = action_specific(event, Action::Reboot, "required_by")?;
        if !is_decimal(required_by) {
            return Err(ValidationError::invalid("required_by", "must be a decimal timestamp"));
        }
    }

    Ok(())
}

/// Check that a kind 3333 record carries every tag an acknowledgement needs
pub fn validate_acknowledgement(event: &RawEvent) -> Result<(), ValidationError> {
    expect_kind(event, ACK_KIND)?;

    // Several `a`/`p` tags are allowed so relays can be hinted more than once
    let mut addresses = 0;
    for tag in event.tags_named("a") {
        addresses += 1;
        let address = tag.get(1).map(String::as_str).unwrap_or_default();
        if parse_directive_address(address).is_none() {
            return Err(ValidationError::invalid(
                "a",
                format!("'{}' is not a directive address", address),
            ));
        }
        if let Some(hint) = tag.get(2) {
            check_url("a", hint)?;
        }
    }
    if addresses == 0 {
        return Err(ValidationError::MissingRequiredAttribute("a".to_string()));
    }

    let mut signers = 0;
    for tag in event.tags_named("p") {
        signers += 1;
        let pubkey = tag.get(1).map(String::as_str).unwrap_or_default();
        if !is_pubkey(pubkey) {
            return Err(ValidationError::invalid("p", "must be a 64-character hex pubkey"));
        }
        if let Some(hint) = tag.get(2) {
            check_url("p", hint)?;
        }
    }
    if signers == 0 {
        return Err(ValidationError::MissingRequiredAttribute("p".to_string()));
    }

    exactly_one(event, "version")?;
    exactly_one(event, "network")?;
    action_tag(event)?;
    let status = status_tag(event)?;
    exactly_one(event, "node_id")?;
    decimal(event, "action_at")?;

    let error = at_most_one(event, "error")?;
    if status == AckStatus::Failure && error.is_none() {
        return Err(ValidationError::MissingErrorDetail);
    }

    Ok(())
}

fn expect_kind(event: &RawEvent, expected: u16) -> Result<(), ValidationError> {
    if event.kind != expected {
        return Err(ValidationError::WrongKind {
            expected,
            found: event.kind,
        });
    }
    Ok(())
}

/// Value of a tag that must appear exactly once
pub(crate) fn exactly_one<'a>(event: &'a RawEvent, name: &str) -> Result<&'a str, ValidationError> {
    at_most_one(event, name)?
        .ok_or_else(|| ValidationError::MissingRequiredAttribute(name.to_string()))
}

fn at_most_one<'a>(event: &'a RawEvent, name: &str) -> Result<Option<&'a str>, ValidationError> {
    let mut tags = event.tags_named(name);
    let Some(first) = tags.next() else {
        return Ok(None);
    };
    if tags.next().is_some() {
        return Err(ValidationError::DuplicateAttribute(name.to_string()));
    }
    first
        .get(1)
        .map(|value| Some(value.as_str()))
        .ok_or_else(|| ValidationError::invalid(name, "tag has no value"))
}

fn action_specific<'a>(
    event: &'a RawEvent,
    action: Action,
    name: &str,
) -> Result<&'a str, ValidationError> {
    at_most_one(event, name)?.ok_or_else(|| ValidationError::MissingActionSpecificAttribute {
        action,
        attribute: name.to_string(),
    })
}

pub(crate) fn action_tag(event: &RawEvent) -> Result<Action, ValidationError> {
    let value = exactly_one(event, "action")?;
    Action::from_tag(value)
        .ok_or_else(|| ValidationError::invalid("action", format!("unknown action '{}'", value)))
}

pub(crate) fn status_tag(event: &RawEvent) -> Result<AckStatus, ValidationError> {
    let value = exactly_one(event, "status")?;
    AckStatus::from_tag(value)
        .ok_or_else(|| ValidationError::invalid("status", format!("unknown status '{}'", value)))
}

pub(crate) fn decimal(event: &RawEvent, name: &str) -> Result<u64, ValidationError> {
    let value = exactly_one(event, name)?;
    if !is_decimal(value) {
        return Err(ValidationError::invalid(name, "must be a decimal timestamp"));
    }
    value
        .parse()
        .map_err(|_| ValidationError::invalid(name, "timestamp out of range"))
}

fn check_url(attribute: &str, value: &str) -> Result<(), ValidationError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ValidationError::invalid(attribute, e.to_string()))
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// 64-character lowercase hex public key
pub fn is_pubkey(value: &str) -> bool {
    value.len() == 64 && is_lower_hex(value)
}
