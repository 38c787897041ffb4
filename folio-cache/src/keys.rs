//! Namespaced cache keys.
//!
//! `CacheKey`'s private inner enum means a key can only be produced by one of
//! the three namespace constructors. Nothing outside this module can address
//! an arbitrary string in the cache.

use folio_core::{AssetId, AssetKind, TeamId};
use std::fmt;
use uuid::Uuid;

/// The namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    /// `team:{id}:members`: a set of user ids.
    TeamMembers,
    /// `folder:{id}` / `note:{id}`: a JSON snapshot.
    AssetMetadata,
    /// `asset:{id}:acl`: a map of user id to access level.
    AssetAcl,
}

/// A key in one of the cache namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: KeyInner,
    encoded: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyInner {
    TeamMembers(TeamId),
    AssetMetadata(AssetKind, AssetId),
    AssetAcl(AssetId),
}

impl CacheKey {
    fn from_inner(inner: KeyInner) -> Self {
        let encoded = match inner {
            KeyInner::TeamMembers(team_id) => format!("team:{}:members", team_id),
            KeyInner::AssetMetadata(kind, id) => format!("{}:{}", kind.as_str(), id),
            KeyInner::AssetAcl(id) => format!("asset:{}:acl", id),
        };
        Self { inner, encoded }
    }

    /// Membership set for a team.
    pub fn team_members(team_id: TeamId) -> Self {
        Self::from_inner(KeyInner::TeamMembers(team_id))
    }

    /// Metadata snapshot for a folder or note.
    pub fn asset_metadata(kind: AssetKind, asset_id: AssetId) -> Self {
        Self::from_inner(KeyInner::AssetMetadata(kind, asset_id))
    }

    /// ACL map for an asset. Folders and notes share one namespace.
    pub fn asset_acl(asset_id: AssetId) -> Self {
        Self::from_inner(KeyInner::AssetAcl(asset_id))
    }

    pub fn namespace(&self) -> KeyNamespace {
        match self.inner {
            KeyInner::TeamMembers(_) => KeyNamespace::TeamMembers,
            KeyInner::AssetMetadata(..) => KeyNamespace::AssetMetadata,
            KeyInner::AssetAcl(_) => KeyNamespace::AssetAcl,
        }
    }

    /// The encoded key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Parse an encoded key back into a `CacheKey`.
    ///
    /// Returns `None` for anything outside the three namespaces.
    pub fn decode(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let inner = match parts.as_slice() {
            ["team", id, "members"] => KeyInner::TeamMembers(id.parse().ok()?),
            ["asset", id, "acl"] => KeyInner::AssetAcl(Uuid::parse_str(id).ok()?),
            [kind, id] => KeyInner::AssetMetadata(kind.parse().ok()?, Uuid::parse_str(id).ok()?),
            _ => return None,
        };
        Some(Self::from_inner(inner))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_formats() {
        let id = Uuid::parse_str("0190f7a2-58c3-7c8e-9b1a-3f2d4c5b6a79").unwrap();
        assert_eq!(CacheKey::team_members(7).as_str(), "team:7:members");
        assert_eq!(
            CacheKey::asset_metadata(AssetKind::Folder, id).as_str(),
            "folder:0190f7a2-58c3-7c8e-9b1a-3f2d4c5b6a79"
        );
        assert_eq!(
            CacheKey::asset_metadata(AssetKind::Note, id).as_str(),
            "note:0190f7a2-58c3-7c8e-9b1a-3f2d4c5b6a79"
        );
        assert_eq!(
            CacheKey::asset_acl(id).as_str(),
            "asset:0190f7a2-58c3-7c8e-9b1a-3f2d4c5b6a79:acl"
        );
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let id = Uuid::now_v7();
        let folder = CacheKey::asset_metadata(AssetKind::Folder, id);
        let note = CacheKey::asset_metadata(AssetKind::Note, id);
        let acl = CacheKey::asset_acl(id);
        assert_ne!(folder, note);
        assert_ne!(folder.as_str(), acl.as_str());
        assert_eq!(acl.namespace(), KeyNamespace::AssetAcl);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert!(CacheKey::decode("session:abc").is_none());
        assert!(CacheKey::decode("team:x:members").is_none());
        assert!(CacheKey::decode("asset:not-a-uuid:acl").is_none());
        assert!(CacheKey::decode("").is_none());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(team in any::<i64>(), bytes in any::<[u8; 16]>()) {
            let id = Uuid::from_bytes(bytes);
            for key in [
                CacheKey::team_members(team),
                CacheKey::asset_metadata(AssetKind::Folder, id),
                CacheKey::asset_metadata(AssetKind::Note, id),
                CacheKey::asset_acl(id),
            ] {
                prop_assert_eq!(CacheKey::decode(key.as_str()), Some(key.clone()));
            }
        }
    }
}
