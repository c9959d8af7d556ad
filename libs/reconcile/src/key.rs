//! Object keys.
//!
//! A key is `namespace/name` for namespaced objects and `name` for
//! cluster-scoped ones.

use kube::{Resource, ResourceExt};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("empty key")]
    Empty,

    #[error("unexpected key format: {0:?}")]
    Malformed(String),
}

/// Key for an object.
pub fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}

/// Split a key into its namespace (if any) and name.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => {
            Ok(((!ns.is_empty()).then_some(ns), name))
        }
        _ => Err(KeyError::Malformed(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmkit_api::{ArpTable, Credential, CredentialSpec};

    #[test]
    fn test_cluster_scoped_key() {
        let table = ArpTable::for_node("node-a");
        assert_eq!(object_key(&table), "node-a");
    }

    #[test]
    fn test_namespaced_key() {
        let mut cred = Credential::new("alice", CredentialSpec::default());
        cred.metadata.namespace = Some("tenants".to_string());
        assert_eq!(object_key(&cred), "tenants/alice");
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("node-a"), Ok((None, "node-a")));
        assert_eq!(split_key("tenants/alice"), Ok((Some("tenants"), "alice")));
        assert_eq!(split_key("/alice"), Ok((None, "alice")));
        assert_eq!(split_key(""), Err(KeyError::Empty));
        assert!(matches!(split_key("a/b/c"), Err(KeyError::Malformed(_))));
        assert!(matches!(split_key("ns/"), Err(KeyError::Malformed(_))));
    }
}
