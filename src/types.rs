//! Core types for the member relay.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque key identifying a member with the provider.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({:?})", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        MemberId(s.to_string())
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        MemberId(s)
    }
}

impl Borrow<str> for MemberId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Build an ordered identifier list from anything string-like.
pub fn member_ids<I, S>(ids: I) -> Vec<MemberId>
where
    I: IntoIterator<Item = S>,
    S: Into<MemberId>,
{
    ids.into_iter().map(Into::into).collect()
}

/// A member record as emitted by the provider.
///
/// `display_name` is always `given_name + " " + family_name`. It is computed
/// on every construction path, deserialization included, and has no setter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    #[serde(rename = "beaconid")]
    beacon_id: u16,
    email: String,
    given_name: String,
    family_name: String,
    display_name: String,
    tracking: Option<bool>,
}

impl MemberSnapshot {
    /// Create a snapshot with a beacon id derived from the email and
    /// tracking enabled.
    pub fn new(
        email: impl Into<String>,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        let email = email.into();
        let beacon_id = derive_beacon_id(&email);
        Self::build(beacon_id, email, given_name.into(), family_name.into(), Some(true))
    }

    fn build(
        beacon_id: u16,
        email: String,
        given_name: String,
        family_name: String,
        tracking: Option<bool>,
    ) -> Self {
        let display_name = format!("{} {}", given_name, family_name);
        Self {
            beacon_id,
            email,
            given_name,
            family_name,
            display_name,
            tracking,
        }
    }

    /// Override the beacon id.
    pub fn with_beacon_id(mut self, beacon_id: u16) -> Self {
        self.beacon_id = beacon_id;
        self
    }

    /// Override the tracking flag (`None` = unknown).
    pub fn with_tracking(mut self, tracking: Option<bool>) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn beacon_id(&self) -> u16 {
        self.beacon_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn given_name(&self) -> &str {
        &self.given_name
    }

    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn tracking(&self) -> Option<bool> {
        self.tracking
    }
}

/// Wire shape accepted when decoding a snapshot. An incoming `displayName`
/// is ignored like any other unknown key.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberSnapshotRepr {
    #[serde(rename = "beaconid")]
    beacon_id: u16,
    email: String,
    given_name: String,
    family_name: String,
    #[serde(default)]
    tracking: Option<bool>,
}

impl<'de> Deserialize<'de> for MemberSnapshot {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = MemberSnapshotRepr::deserialize(deserializer)?;
        Ok(MemberSnapshot::build(
            repr.beacon_id,
            repr.email,
            repr.given_name,
            repr.family_name,
            repr.tracking,
        ))
    }
}

/// Derive a stable 16-bit beacon id from the first bytes of the email's SHA-256.
fn derive_beacon_id(email: &str) -> u16 {
    let digest = Sha256::digest(email.as_bytes());
    u16::from_be_bytes([digest[0], digest[1]])
}

/// State snapshot emitted by the provider's change stream.
///
/// Providers emit either a keyed mapping or an ordered list; both describe the
/// same set of members. Encoded untagged: a JSON object or a JSON array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MembersState {
    Keyed(BTreeMap<MemberId, MemberSnapshot>),
    Ordered(Vec<MemberSnapshot>),
}

impl MembersState {
    /// Empty keyed state.
    pub fn empty() -> Self {
        MembersState::Keyed(BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        match self {
            MembersState::Keyed(map) => map.len(),
            MembersState::Ordered(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a member by key. Ordered states have no keys.
    pub fn get(&self, id: &str) -> Option<&MemberSnapshot> {
        match self {
            MembersState::Keyed(map) => map.get(id),
            MembersState::Ordered(_) => None,
        }
    }

    /// Iterate snapshots in key order (keyed) or list order (ordered).
    pub fn snapshots(&self) -> Box<dyn Iterator<Item = &MemberSnapshot> + '_> {
        match self {
            MembersState::Keyed(map) => Box::new(map.values()),
            MembersState::Ordered(list) => Box::new(list.iter()),
        }
    }
}

impl FromIterator<(MemberId, MemberSnapshot)> for MembersState {
    fn from_iter<T: IntoIterator<Item = (MemberId, MemberSnapshot)>>(iter: T) -> Self {
        MembersState::Keyed(iter.into_iter().collect())
    }
}

impl FromIterator<MemberSnapshot> for MembersState {
    fn from_iter<T: IntoIterator<Item = MemberSnapshot>>(iter: T) -> Self {
        MembersState::Ordered(iter.into_iter().collect())
    }
}

/// Actions flowing through the application's dispatch pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MembersAction {
    /// Register interest in these members (inbound).
    Register(Vec<MemberId>),
    /// The provider emitted a new state (outbound).
    StateChanged(MembersState),
}

impl MembersAction {
    pub fn as_register(&self) -> Option<&[MemberId]> {
        match self {
            MembersAction::Register(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_state_changed(&self) -> Option<&MembersState> {
        match self {
            MembersAction::StateChanged(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_register(&self) -> bool {
        self.as_register().is_some()
    }

    pub fn is_state_changed(&self) -> bool {
        self.as_state_changed().is_some()
    }
}
