use permita_core::{TenantId, WILDCARD};
use serde::{Deserialize, Serialize};

use crate::GrantType;

/// Matching key of a grant independent of the grantee.
///
/// Every field accepts `*`. On the stored side a wildcard matches any concrete value. Store
/// queries may also use `*` to disable filtering for a position (see [`GrantScope::covers`]);
/// authorization decisions use [`GrantScope::matches_concrete`], where requested values are
/// always literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantScope {
    /// Tenant the scope applies to.
    pub tenant_id: TenantId,
    /// Grant type of the scope.
    pub grant_type: GrantType,
    /// Activity name, activity group name or resource identifier.
    pub qualifier: String,
}

impl GrantScope {
    /// Creates a scope from its three positions.
    #[must_use]
    pub fn new(tenant_id: TenantId, grant_type: GrantType, qualifier: impl Into<String>) -> Self {
        Self {
            tenant_id,
            grant_type,
            qualifier: qualifier.into(),
        }
    }

    /// Returns whether a stored scope covers a store query, where a `*` in the query
    /// disables filtering for that position.
    #[must_use]
    pub fn covers(&self, query: &GrantScope) -> bool {
        (query.tenant_id.is_wildcard() || tenant_matches(&self.tenant_id, &query.tenant_id))
            && (query.grant_type.is_wildcard()
                || grant_type_matches(&self.grant_type, &query.grant_type))
            && (query.qualifier == WILDCARD
                || qualifier_matches(self.qualifier.as_str(), query.qualifier.as_str()))
    }

    /// Returns whether a stored scope authorizes a concrete request.
    ///
    /// Only the stored side may hold wildcards; a requested `*` is compared literally.
    #[must_use]
    pub fn matches_concrete(&self, requested: &GrantScope) -> bool {
        tenant_matches(&self.tenant_id, &requested.tenant_id)
            && grant_type_matches(&self.grant_type, &requested.grant_type)
            && qualifier_matches(self.qualifier.as_str(), requested.qualifier.as_str())
    }
}

fn tenant_matches(stored: &TenantId, requested: &TenantId) -> bool {
    stored.is_wildcard() || stored == requested
}

fn grant_type_matches(stored: &GrantType, requested: &GrantType) -> bool {
    stored.is_wildcard() || stored == requested
}

/// Returns whether a stored qualifier pattern matches a concrete qualifier.
///
/// Only a whole `*` or a terminal `/*` segment is a wildcard. Any other `*`, `%` or `_`
/// is a literal character.
#[must_use]
pub fn qualifier_matches(pattern: &str, value: &str) -> bool {
    if pattern == WILDCARD || pattern == value {
        return true;
    }

    pattern
        .strip_suffix(WILDCARD)
        .filter(|prefix| prefix.ends_with('/'))
        .is_some_and(|prefix| value.starts_with(prefix))
}

/// Lists every stored qualifier that would match the given concrete qualifier.
///
/// For `X/path/leaf` this yields `*`, `X/path/leaf`, `X/*` and `X/path/*`, which lets stores
/// match hierarchical grants by plain equality.
#[must_use]
pub fn qualifier_candidates(value: &str) -> Vec<String> {
    let mut candidates = vec![WILDCARD.to_owned(), value.to_owned()];

    for (index, _) in value.match_indices('/') {
        let candidate = format!("{}{WILDCARD}", &value[..=index]);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates.dedup();
    candidates
}

#[cfg(test)]
mod tests {
    use permita_core::TenantId;
    use proptest::prelude::*;

    use super::{GrantScope, qualifier_candidates, qualifier_matches};
    use crate::GrantType;

    fn tenant(value: &str) -> TenantId {
        match TenantId::new(value) {
            Ok(tenant) => tenant,
            Err(error) => panic!("invalid tenant in test: {error}"),
        }
    }

    #[test]
    fn hierarchical_prefixes_match_leaf() {
        let leaf = "X/path/to/leaf";
        for pattern in ["X/*", "X/path/*", "X/path/to/*", "X/path/to/leaf", "*"] {
            assert!(qualifier_matches(pattern, leaf), "{pattern} should match");
        }
        assert!(!qualifier_matches("Y/*", leaf));
        assert!(!qualifier_matches("X/path/to/leaf/*", leaf));
        assert!(!qualifier_matches("X/pa*", leaf));
    }

    #[test]
    fn embedded_metacharacters_are_literal() {
        assert!(!qualifier_matches("X/%", "X/anything"));
        assert!(!qualifier_matches("X/_", "X/a"));
        assert!(qualifier_matches("50%_off", "50%_off"));
        assert!(!qualifier_matches("X*/leaf", "Xyz/leaf"));
    }

    #[test]
    fn candidates_cover_each_path_segment() {
        let candidates = qualifier_candidates("X/path/to/leaf");
        assert_eq!(
            candidates,
            vec!["*", "X/path/to/leaf", "X/*", "X/path/*", "X/path/to/*"]
        );
    }

    #[test]
    fn wildcard_tenant_grant_covers_every_tenant() {
        let stored = GrantScope::new(TenantId::wildcard(), GrantType::Activity, "Foo");
        let requested = GrantScope::new(tenant("T2"), GrantType::Activity, "Foo");
        assert!(stored.covers(&requested));

        let stored = GrantScope::new(tenant("T1"), GrantType::Activity, "Foo");
        assert!(!stored.covers(&requested));
    }

    #[test]
    fn requested_wildcards_are_literal_for_decisions() {
        let document = || GrantType::Resource("Document".to_owned());
        let narrow = GrantScope::new(tenant("T1"), document(), "D/1");

        let any_resource = GrantScope::new(tenant("T1"), document(), "*");
        assert!(!narrow.matches_concrete(&any_resource));

        let any_tenant = GrantScope::new(TenantId::wildcard(), document(), "D/1");
        assert!(!narrow.matches_concrete(&any_tenant));

        let any_type = GrantScope::new(tenant("T1"), GrantType::Wildcard, "D/1");
        assert!(!narrow.matches_concrete(&any_type));

        let everything = GrantScope::new(tenant("T1"), GrantType::Wildcard, "*");
        assert!(everything.matches_concrete(&any_resource));
    }

    #[test]
    fn query_wildcards_disable_filtering() {
        let stored = GrantScope::new(tenant("T1"), GrantType::Resource("Site".to_owned()), "S/1");
        let requested = GrantScope::new(TenantId::wildcard(), GrantType::Wildcard, "*");
        assert!(stored.covers(&requested));
    }

    proptest! {
        #[test]
        fn matching_agrees_with_candidates(
            pattern in "[a-c/*%_]{0,8}",
            value in "[a-c/%_]{1,8}",
        ) {
            let expected = qualifier_candidates(value.as_str()).contains(&pattern);
            prop_assert_eq!(qualifier_matches(pattern.as_str(), value.as_str()), expected);
        }

        #[test]
        fn every_candidate_matches_its_source(value in "[a-z]{1,4}(/[a-z]{1,4}){0,4}") {
            for candidate in qualifier_candidates(value.as_str()) {
                prop_assert!(qualifier_matches(candidate.as_str(), value.as_str()));
            }
        }
    }
}
