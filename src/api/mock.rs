//! Canned records for demos and UI development, timestamped relative to now

use crate::record::{parse_record, RawEvent, Record, Tag, ValidationError};

const DIRECTIVE_SIGNER_1: &str = "1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b";
const DIRECTIVE_SIGNER_2: &str = "4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e";

fn tags(pairs: &[(&str, String)]) -> Vec<Tag> {
    pairs
        .iter()
        .map(|(name, value)| vec![name.to_string(), value.clone()])
        .collect()
}

fn s(value: &str) -> String {
    value.to_string()
}

/// Two directives and two acknowledgements, one of them a failure
pub fn mock_events(now: u64) -> Vec<RawEvent> {
    vec![
        RawEvent {
            id: s("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2"),
            pubkey: s(DIRECTIVE_SIGNER_1),
            created_at: now.saturating_sub(3600),
            kind: 33321,
            tags: tags(&[
                ("d", s("hyperqube")),
                ("action", s("upgrade")),
                ("version", s("1.2.3")),
                ("hash", s("abc123def456")),
                ("network", s("hqz")),
            ]),
            content: s("Scheduled upgrade to version 1.2.3"),
            sig: "b1c2d3e4f5a6b7c8d9e0f1a2".repeat(5) + "b3c4d5e6",
        },
        RawEvent {
            id: s("c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2c3d4"),
            pubkey: s("7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b"),
            created_at: now.saturating_sub(3500),
            kind: 3333,
            tags: tags(&[
                ("a", format!("33321:{}:hyperqube", DIRECTIVE_SIGNER_1)),
                ("p", s(DIRECTIVE_SIGNER_1)),
                ("status", s("success")),
                ("action", s("upgrade")),
                ("version", s("1.2.3")),
                ("network", s("hqz")),
                ("node_id", s("node_xyz")),
                ("action_at", now.saturating_sub(3500).to_string()),
            ]),
            content: s("Upgrade to 1.2.3 completed successfully."),
            sig: "d4e5f6a7b8c9d0e1f2a3b4c5".repeat(5) + "d6e7f8a9",
        },
        RawEvent {
            id: s("e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6"),
            pubkey: s(DIRECTIVE_SIGNER_2),
            created_at: now.saturating_sub(1800),
            kind: 33321,
            tags: tags(&[
                ("d", s("hyperqube")),
                ("action", s("reboot")),
                ("version", s("1.2.3")),
                ("hash", s("def789abc012")),
                ("network", s("hqz")),
                ("genesis_url", s("http://example.com/genesis")),
                ("required_by", (now + 3600).to_string()),
            ]),
            content: s("Node reboot command issued."),
            sig: "f6a7b8c9d0e1f2a3b4c5d6e7".repeat(5) + "f8a9b0c1",
        },
        RawEvent {
            id: s("a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8"),
            pubkey: s("0a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b"),
            created_at: now.saturating_sub(1700),
            kind: 3333,
            tags: tags(&[
                ("a", format!("33321:{}:hyperqube", DIRECTIVE_SIGNER_2)),
                ("p", s(DIRECTIVE_SIGNER_2)),
                ("status", s("failure")),
                ("action", s("reboot")),
                ("version", s("1.2.3")),
                ("network", s("hqz")),
                ("node_id", s("node_abc")),
                ("action_at", now.saturating_sub(1700).to_string()),
                ("error", s("Failed to fetch genesis file.")),
            ]),
            content: s("Reboot failed for node_abc."),
            sig: "b8c9d0e1f2a3b4c5d6e7f8a9".repeat(5) + "b0c1d2e3",
        },
    ]
}

/// Validate every mock record; the first failure aborts
pub fn validated_mock_events(now: u64) -> Result<Vec<Record>, ValidationError> {
    mock_events(now).iter().map(parse_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_events_validate() {
        let records = validated_mock_events(1_700_000_000).unwrap();
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], Record::Directive(_)));
        assert!(matches!(records[3], Record::Acknowledgement(_)));
    }

    #[test]
    fn test_mock_signatures_are_128_hex() {
        for event in mock_events(0) {
            assert_eq!(event.sig.len(), 128);
        }
    }
}
