//! Session key parsing and tenant-scope validation

/// Check that a session key falls within the claimed tenant + agent scope.
///
/// Two shapes are accepted:
/// - canonical: `tenant:<tenantId>:scope:<agentScope>:<suffix>`
/// - legacy compact: `<tenantId>:<agentScope>:<suffix>`
///
/// Both tenant and scope components must match exactly (case-sensitive).
/// Any other shape is rejected. This check runs before any state mutation
/// and has no side effects.
pub fn is_within_tenant_scope(tenant_id: &str, agent_scope: &str, session_key: &str) -> bool {
    if tenant_id.is_empty() || agent_scope.is_empty() || session_key.is_empty() {
        return false;
    }
    let parts: Vec<&str> = session_key.split(':').collect();
    if parts.first() == Some(&"tenant") {
        return parts.len() >= 5
            && parts[1] == tenant_id
            && parts[2] == "scope"
            && parts[3] == agent_scope
            && !parts[4].is_empty();
    }
    parts.len() >= 3 && parts[0] == tenant_id && parts[1] == agent_scope && !parts[2].is_empty()
}

/// Lowercased, trimmed agent id.
pub fn normalize_agent_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Resolve the agent id encoded in a session key.
///
/// Keys that carry an `agent:<id>` marker anywhere in their component list
/// resolve to that id; everything else belongs to the default agent.
pub fn agent_id_from_session_key(session_key: &str) -> String {
    let parts: Vec<&str> = session_key.split(':').collect();
    for window in parts.windows(2) {
        if window[0] == "agent" && !window[1].is_empty() {
            return normalize_agent_id(window[1]);
        }
    }
    "main".to_string()
}

/// The main session key for an agent.
pub fn agent_main_session_key(agent_id: &str) -> String {
    format!("agent:{}:main", normalize_agent_id(agent_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_scoped_key() {
        assert!(is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant:tenant-acme:scope:butler:contact:zhangsan"
        ));
    }

    #[test]
    fn accepts_legacy_compact_key() {
        assert!(is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant-acme:butler:contact:zhangsan"
        ));
    }

    #[test]
    fn rejects_tenant_mismatch() {
        assert!(!is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant:tenant-other:scope:butler:contact:zhangsan"
        ));
        assert!(!is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant-other:butler:x"
        ));
    }

    #[test]
    fn rejects_scope_mismatch_case_sensitively() {
        assert!(!is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant:tenant-acme:scope:Butler:x"
        ));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_within_tenant_scope("tenant-acme", "butler", ""));
        assert!(!is_within_tenant_scope("tenant-acme", "butler", "tenant-acme"));
        assert!(!is_within_tenant_scope("tenant-acme", "butler", "tenant-acme:butler"));
        assert!(!is_within_tenant_scope("tenant-acme", "butler", "tenant:tenant-acme:butler:x"));
        assert!(!is_within_tenant_scope("", "butler", "tenant::scope:butler:x"));
    }

    #[test]
    fn rejects_empty_suffix() {
        assert!(!is_within_tenant_scope(
            "tenant-acme",
            "butler",
            "tenant:tenant-acme:scope:butler:"
        ));
    }

    #[test]
    fn resolves_agent_id_from_key() {
        assert_eq!(agent_id_from_session_key("agent:butler:main"), "butler");
        assert_eq!(
            agent_id_from_session_key("tenant:t1:scope:s1:agent:Ops:chat"),
            "ops"
        );
        assert_eq!(agent_id_from_session_key("global"), "main");
    }

    #[test]
    fn builds_main_session_key() {
        assert_eq!(agent_main_session_key(" Butler "), "agent:butler:main");
    }
}
