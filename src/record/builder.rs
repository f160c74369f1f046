//! Unsigned record builders
//!
//! Lays out tags in the canonical order. The result still has to be signed by
//! whoever holds the key before it can be published.

use serde::{Deserialize, Serialize};

use super::{
    directive_address, AckStatus, Action, Tag, UnsignedEvent, ValidationError, ACK_KIND,
    DIRECTIVE_KIND, DIRECTIVE_SLOT,
};

/// Fields for a new directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveFields {
    pub pubkey: String,
    pub version: String,
    pub hash: String,
    pub network: String,
    pub action: Action,
    #[serde(default)]
    pub content: String,
    /// Required for reboot
    #[serde(default)]
    pub genesis_url: Option<String>,
    /// Required for reboot
    #[serde(default)]
    pub required_by: Option<u64>,
}

/// Fields for a new acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFields {
    /// The acknowledging node's pubkey
    pub pubkey: String,
    /// Signer of the directive being acknowledged
    pub directive_pubkey: String,
    pub version: String,
    pub network: String,
    pub action: Action,
    pub status: AckStatus,
    pub node_id: String,
    #[serde(default)]
    pub content: String,
    /// Required when status is failure
    #[serde(default)]
    pub error: Option<String>,
    /// Relay hint appended to the `a` and `p` tags
    #[serde(default)]
    pub relay_url: Option<String>,
    /// When the node acted; defaults to the record timestamp
    #[serde(default)]
    pub action_at: Option<u64>,
}

fn tag(name: &str, value: impl Into<String>) -> Tag {
    vec![name.to_string(), value.into()]
}

/// Build an unsigned kind 33321 directive
pub fn build_directive(
    fields: &DirectiveFields,
    created_at: u64,
) -> Result<UnsignedEvent, ValidationError> {
    let mut tags = vec![
        tag("d", DIRECTIVE_SLOT),
        tag("version", &fields.version),
        tag("hash", &fields.hash),
        tag("network", &fields.network),
        tag("action", fields.action.as_str()),
    ];

    if fields.action == Action::Reboot {
        let genesis_url = fields.genesis_url.as_deref().ok_or_else(|| {
            ValidationError::MissingActionSpecificAttribute {
                action: Action::Reboot,
                attribute: "genesis_url".to_string(),
            }
        })?;
        let required_by = fields.required_by.ok_or_else(|| {
            ValidationError::MissingActionSpecificAttribute {
                action: Action::Reboot,
                attribute: "required_by".to_string(),
            }
        })?;

        tags.push(tag("genesis_url", genesis_url));
        tags.push(tag("required_by", required_by.to_string()));
    }

    Ok(UnsignedEvent {
        pubkey: fields.pubkey.clone(),
        created_at,
        kind: DIRECTIVE_KIND,
        tags,
        content: fields.content.clone(),
    })
}

/// Build an unsigned kind 3333 acknowledgement
pub fn build_acknowledgement(
    fields: &AckFields,
    created_at: u64,
) -> Result<UnsignedEvent, ValidationError> {
    let with_hint = |mut t: Tag| {
        if let Some(url) = &fields.relay_url {
            t.push(url.clone());
        }
        t
    };

    let mut tags = vec![
        with_hint(tag("a", directive_address(&fields.directive_pubkey))),
        with_hint(tag("p", &fields.directive_pubkey)),
        tag("version", &fields.version),
        tag("network", &fields.network),
        tag("action", fields.action.as_str()),
        tag("status", fields.status.as_str()),
        tag("node_id", &fields.node_id),
        tag("action_at", fields.action_at.unwrap_or(created_at).to_string()),
    ];

    if fields.status == AckStatus::Failure {
        let error = fields.error.as_deref().ok_or(ValidationError::MissingErrorDetail)?;
        tags.push(tag("error", error));
    }

    Ok(UnsignedEvent {
        pubkey: fields.pubkey.clone(),
        created_at,
        kind: ACK_KIND,
        tags,
        content: fields.content.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER: &str = "80ebe917ae63946ebf7577bcf68d43ff89f102a6596d41e7f1bd6f43c311dc89";

    fn upgrade() -> DirectiveFields {
        DirectiveFields {
            pubkey: SIGNER.to_string(),
            version: "1.2.3".to_string(),
            hash: "abc123def456".to_string(),
            network: "hqz".to_string(),
            action: Action::Upgrade,
            content: "Scheduled upgrade to version 1.2.3".to_string(),
            genesis_url: None,
            required_by: None,
        }
    }

    fn success_ack() -> AckFields {
        AckFields {
            pubkey: SIGNER.to_string(),
            directive_pubkey: SIGNER.to_string(),
            version: "1.2.3".to_string(),
            network: "hqz".to_string(),
            action: Action::Upgrade,
            status: AckStatus::Success,
            node_id: "node_xyz".to_string(),
            content: String::new(),
            error: None,
            relay_url: None,
            action_at: Some(99),
        }
    }

    #[test]
    fn test_directive_tag_order() {
        let event = build_directive(&upgrade(), 1_700_000_000).unwrap();
        let names: Vec<&str> = event.tags.iter().map(|t| t[0].as_str()).collect();

        assert_eq!(names, ["d", "version", "hash", "network", "action"]);
        assert_eq!(event.kind, DIRECTIVE_KIND);
        assert_eq!(event.created_at, 1_700_000_000);
    }

    #[test]
    fn test_upgrade_ignores_reboot_fields() {
        let mut fields = upgrade();
        fields.genesis_url = Some("http://example.com/genesis".to_string());
        let event = build_directive(&fields, 1).unwrap();
        assert_eq!(event.tags.len(), 5);
    }

    #[test]
    fn test_reboot_without_genesis_rejected() {
        let mut fields = upgrade();
        fields.action = Action::Reboot;
        fields.required_by = Some(10);

        let err = build_directive(&fields, 1).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingActionSpecificAttribute { ref attribute, .. } if attribute == "genesis_url"
        ));
    }

    #[test]
    fn test_ack_relay_hint() {
        let mut fields = success_ack();
        fields.relay_url = Some("wss://relay.example.com".to_string());
        let event = build_acknowledgement(&fields, 100).unwrap();

        assert_eq!(event.tags[0].len(), 3);
        assert_eq!(event.tags[1], vec!["p", SIGNER, "wss://relay.example.com"]);
        assert_eq!(event.tags[7], vec!["action_at", "99"]);
    }

    #[test]
    fn test_failure_ack_requires_error() {
        let mut fields = success_ack();
        fields.status = AckStatus::Failure;
        assert_eq!(
            build_acknowledgement(&fields, 1).unwrap_err(),
            ValidationError::MissingErrorDetail
        );

        fields.error = Some("disk full".to_string());
        let event = build_acknowledgement(&fields, 1).unwrap();
        assert_eq!(event.tags.last().unwrap(), &vec!["error", "disk full"]);
    }
}
