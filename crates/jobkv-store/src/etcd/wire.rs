//! Payloads of the etcd v2 HTTP API.

use jobkv_model::StoreNode;
use serde::{Deserialize, Serialize};

use crate::{Fetched, RoleGrant, StoreError, StoreUser};

pub(super) const INDEX_HEADER: &str = "x-etcd-index";
pub(super) const CLUSTER_ID_HEADER: &str = "x-etcd-cluster-id";

#[derive(Debug, Deserialize)]
struct Reply {
    node: StoreNode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply {
    #[serde(default, alias = "error_code")]
    error_code: Option<u32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: Option<u64>,
}

/// Decode a keys API reply.
pub(super) fn decode_reply(
    key: &str,
    status: u16,
    header_index: Option<u64>,
    body: &str,
) -> Result<Fetched, StoreError> {
    if !(200..300).contains(&status) {
        return Err(classify(key, status, header_index, body));
    }
    let reply: Reply = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("{e} in reply for {key}")))?;
    let store_index = header_index.unwrap_or(reply.node.modified_index);
    Ok(Fetched {
        node: reply.node,
        store_index,
    })
}

/// Map an error reply onto the store error taxonomy.
pub(super) fn classify(key: &str, status: u16, header_index: Option<u64>, body: &str) -> StoreError {
    let Ok(reply) = serde_json::from_str::<ErrorReply>(body) else {
        return StoreError::Rejected {
            error_code: None,
            status: Some(status),
            message: body.trim().to_string(),
        };
    };
    let index = reply.index.or(header_index).unwrap_or_default();
    let key = key.to_string();

    match reply.error_code {
        Some(100) => StoreError::KeyNotFound { key, index },
        Some(101) => StoreError::CompareFailed { key },
        Some(102) => StoreError::NotAFile { key },
        Some(104) => StoreError::NotADirectory { key },
        Some(105) => StoreError::AlreadyExists { key },
        Some(108) => StoreError::DirectoryNotEmpty { key },
        Some(401) => StoreError::IndexCleared { index },
        error_code => StoreError::Rejected {
            error_code,
            status: Some(status),
            message: match reply.cause {
                Some(cause) if !cause.is_empty() => format!("{} ({cause})", reply.message),
                _ => reply.message,
            },
        },
    }
}

#[derive(Debug, Serialize)]
struct KvPermissions<'a> {
    read: &'a [String],
    write: &'a [String],
}

#[derive(Debug, Serialize)]
struct Permissions<'a> {
    kv: KvPermissions<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct RoleBody<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<Permissions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grant: Option<Permissions<'a>>,
}

impl<'a> RoleBody<'a> {
    /// Creation sets the permissions, updates add to them.
    pub(super) fn new(grant: &'a RoleGrant, exists: bool) -> Self {
        let perms = Permissions {
            kv: KvPermissions {
                read: &grant.read,
                write: &grant.write,
            },
        };
        let (permissions, grant_field) = if exists {
            (None, Some(perms))
        } else {
            (Some(perms), None)
        };
        Self {
            role: &grant.role,
            permissions,
            grant: grant_field,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct UserBody<'a> {
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    roles: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grant: Option<&'a [String]>,
}

impl<'a> UserBody<'a> {
    pub(super) fn new(user: &'a StoreUser, exists: bool) -> Self {
        let roles = (!user.roles.is_empty()).then_some(user.roles.as_slice());
        Self {
            user: &user.user,
            password: user.password.as_deref(),
            roles: if exists { None } else { roles },
            grant: if exists { roles } else { None },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoleRef {
    Name(String),
    Described { role: String },
}

#[derive(Debug, Deserialize)]
struct UserReply {
    user: String,
    #[serde(default)]
    roles: Option<Vec<RoleRef>>,
}

pub(super) fn decode_user(body: &str) -> Result<StoreUser, StoreError> {
    let reply: UserReply =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(format!("user record: {e}")))?;
    Ok(StoreUser {
        user: reply.user,
        password: None,
        roles: reply
            .roles
            .unwrap_or_default()
            .into_iter()
            .map(|r| match r {
                RoleRef::Name(role) | RoleRef::Described { role } => role,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_success_with_header_index() {
        let body = r#"{"action":"get","node":{"key":"/k","value":"v","modifiedIndex":4,"createdIndex":2}}"#;
        let fetched = decode_reply("/k", 200, Some(9), body).unwrap();
        assert_eq!(fetched.node.value.as_deref(), Some("v"));
        assert_eq!(fetched.node.modified_index, 4);
        assert_eq!(fetched.store_index, 9);

        let fallback = decode_reply("/k", 201, None, body).unwrap();
        assert_eq!(fallback.store_index, 4);
    }

    #[test]
    fn classifies_error_codes() {
        let not_found = r#"{"errorCode":100,"message":"Key not found","cause":"/k","index":12}"#;
        assert_eq!(
            classify("/k", 404, Some(3), not_found),
            StoreError::KeyNotFound {
                key: "/k".into(),
                index: 12
            }
        );

        let cas = r#"{"errorCode":101,"message":"Compare failed","cause":"[1 != 2]","index":8}"#;
        assert_eq!(
            classify("/k", 412, None, cas),
            StoreError::CompareFailed { key: "/k".into() }
        );

        let exists = r#"{"errorCode":105,"message":"Key already exists","index":8}"#;
        assert!(matches!(
            classify("/k", 412, None, exists),
            StoreError::AlreadyExists { .. }
        ));

        let cleared = r#"{"errorCode":401,"message":"The event in requested index is outdated and cleared","index":2010}"#;
        assert_eq!(
            classify("/k", 400, None, cleared),
            StoreError::IndexCleared { index: 2010 }
        );
    }

    #[test]
    fn auth_failures_are_flagged() {
        let insufficient = r#"{"errorCode":110,"message":"The request requires user authentication","cause":"Insufficient credentials","index":0}"#;
        assert!(classify("/k", 401, None, insufficient).is_auth_expired());

        let alt_field = r#"{"error_code":110,"message":"denied"}"#;
        assert!(classify("/k", 403, None, alt_field).is_auth_expired());

        let plain = "unauthorized\n";
        let err = classify("/k", 401, None, plain);
        assert!(err.is_auth_expired());
        assert_eq!(
            err,
            StoreError::Rejected {
                error_code: None,
                status: Some(401),
                message: "unauthorized".into()
            }
        );
    }

    #[test]
    fn role_body_switches_between_create_and_update() {
        let grant = RoleGrant::new("alice-pcocc")
            .read("/pcocc/cluster/*")
            .read_write("/pcocc/global/users/alice/*");

        let created = serde_json::to_value(RoleBody::new(&grant, false)).unwrap();
        assert_eq!(created["role"], "alice-pcocc");
        assert_eq!(created["permissions"]["kv"]["read"][0], "/pcocc/cluster/*");
        assert!(created.get("grant").is_none());

        let updated = serde_json::to_value(RoleBody::new(&grant, true)).unwrap();
        assert_eq!(
            updated["grant"]["kv"]["write"][0],
            "/pcocc/global/users/alice/*"
        );
        assert!(updated.get("permissions").is_none());
    }

    #[test]
    fn user_body_and_reply() {
        let user = StoreUser {
            user: "alice".into(),
            password: None,
            roles: vec!["alice-pcocc".into()],
        };
        let update = serde_json::to_value(UserBody::new(&user, true)).unwrap();
        assert_eq!(update["grant"][0], "alice-pcocc");
        assert!(update.get("password").is_none());
        assert!(update.get("roles").is_none());

        let described = r#"{"user":"alice","roles":[{"role":"alice-pcocc","permissions":{}}]}"#;
        assert_eq!(decode_user(described).unwrap().roles, ["alice-pcocc"]);

        let named = r#"{"user":"alice","roles":["a","b"]}"#;
        assert_eq!(decode_user(named).unwrap().roles, ["a", "b"]);
    }
}
