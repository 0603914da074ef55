use axum::http::HeaderMap;

/// Header carrying the shared bridge API key, checked before any business
/// logic runs.
pub const API_KEY_HEADER: &str = "x-nexus-api-key";
/// Header carrying the caller-asserted user id a tool call acts on behalf of.
pub const USER_ID_HEADER: &str = "x-nexus-user-id";

#[derive(Debug)]
pub struct BridgeIdentity {
    pub user_id: String,
}

/// Verifies the shared key and extracts the acting user id. Both checks are
/// one explicit gate in front of every bridge route — there is no implicit
/// trust of the caller-supplied user id without the key also matching.
pub fn authenticate(headers: &HeaderMap, expected_key: &str) -> Result<BridgeIdentity, &'static str> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing X-Nexus-Api-Key header")?;

    if presented != expected_key {
        return Err("invalid X-Nexus-Api-Key");
    }

    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing X-Nexus-User-Id header")?;

    if user_id.trim().is_empty() {
        return Err("X-Nexus-User-Id must not be empty");
    }

    Ok(BridgeIdentity {
        user_id: user_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(key: Option<&str>, user: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(k) = key {
            h.insert(API_KEY_HEADER, HeaderValue::from_str(k).unwrap());
        }
        if let Some(u) = user {
            h.insert(USER_ID_HEADER, HeaderValue::from_str(u).unwrap());
        }
        h
    }

    #[test]
    fn rejects_missing_key() {
        let h = headers(None, Some("u1"));
        assert!(authenticate(&h, "secret").is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let h = headers(Some("wrong"), Some("u1"));
        assert!(authenticate(&h, "secret").is_err());
    }

    #[test]
    fn rejects_missing_user_id() {
        let h = headers(Some("secret"), None);
        assert!(authenticate(&h, "secret").is_err());
    }

    #[test]
    fn accepts_matching_key_and_user() {
        let h = headers(Some("secret"), Some("u1"));
        let identity = authenticate(&h, "secret").unwrap();
        assert_eq!(identity.user_id, "u1");
    }
}
