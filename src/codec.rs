//! Snapshot encoding helpers for provider implementations.
//!
//! Failures map onto the provider error taxonomy so a provider can push them
//! straight onto its change stream.

use crate::error::ProviderError;
use crate::types::MembersState;
use serde::{Deserialize, Serialize};

/// Wire encoding of a state payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Json,
    MessagePack,
}

/// Encode a state snapshot.
pub fn encode_state(
    state: &MembersState,
    encoding: Encoding,
) -> std::result::Result<Vec<u8>, ProviderError> {
    match encoding {
        Encoding::Json => {
            serde_json::to_vec(state).map_err(|e| ProviderError::Encoding(e.to_string()))
        }
        // Named fields so decoding does not depend on field order.
        Encoding::MessagePack => {
            rmp_serde::to_vec_named(state).map_err(|e| ProviderError::Encoding(e.to_string()))
        }
    }
}

/// Decode a state snapshot. An empty payload means the provider has no data.
pub fn decode_state(
    bytes: &[u8],
    encoding: Encoding,
) -> std::result::Result<MembersState, ProviderError> {
    if bytes.is_empty() {
        return Err(ProviderError::DataNotFound("empty members payload".to_string()));
    }
    match encoding {
        Encoding::Json => {
            serde_json::from_slice(bytes).map_err(|e| ProviderError::Decoding(e.to_string()))
        }
        Encoding::MessagePack => {
            rmp_serde::from_slice(bytes).map_err(|e| ProviderError::Decoding(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemberId, MemberSnapshot};

    fn sample() -> MembersState {
        vec![
            (
                MemberId::from("ada"),
                MemberSnapshot::new("ada@example.com", "Ada", "Lovelace").with_beacon_id(1),
            ),
            (
                MemberId::from("grace"),
                MemberSnapshot::new("grace@example.com", "Grace", "Hopper").with_tracking(None),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_json_and_msgpack_decode_what_they_encode() {
        for encoding in [Encoding::Json, Encoding::MessagePack] {
            let bytes = encode_state(&sample(), encoding).unwrap();
            let decoded = decode_state(&bytes, encoding).unwrap();
            assert_eq!(decoded, sample());
        }
    }

    #[test]
    fn test_decode_ordered_json() {
        let bytes = br#"[{"beaconid": 5, "email": "e", "givenName": "Ada", "familyName": "Lovelace"}]"#;
        let state = decode_state(bytes, Encoding::Json).unwrap();
        match state {
            MembersState::Ordered(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].display_name(), "Ada Lovelace");
            }
            other => panic!("Expected ordered state, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_decoding_error() {
        let result = decode_state(b"{not json", Encoding::Json);
        assert!(matches!(result, Err(ProviderError::Decoding(_))));
    }

    #[test]
    fn test_empty_payload_is_data_not_found() {
        let result = decode_state(&[], Encoding::MessagePack);
        assert!(matches!(result, Err(ProviderError::DataNotFound(_))));
    }
}
