//! Vocabulary contexts and the long-name/short-name resolver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A bidirectional mapping between long (canonical, URI-like) names and their
/// short aliases, plus a diagnostic count of compactions performed against it.
///
/// The default context is built once at startup and is immutable afterwards,
/// except for the compaction counter. Per-request contexts are created by the
/// API layer and discarded at request end.
#[derive(Debug)]
pub struct VocabularyContext {
    url: String,
    long_to_short: HashMap<String, String>,
    short_to_long: HashMap<String, String>,
    compactions: AtomicU64,
}

impl VocabularyContext {
    pub fn new(url: &str, entries: &[(&str, &str)]) -> Self {
        let mut long_to_short = HashMap::new();
        let mut short_to_long = HashMap::new();
        for (long_name, short_name) in entries {
            long_to_short.insert((*long_name).to_string(), (*short_name).to_string());
            short_to_long.insert((*short_name).to_string(), (*long_name).to_string());
        }
        Self {
            url: url.to_string(),
            long_to_short,
            short_to_long,
            compactions: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of compactions credited to this context. Best-effort under
    /// concurrency; the counter is diagnostic only.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    fn credit_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    fn short_name_of(&self, long_name: &str) -> Option<&str> {
        self.long_to_short.get(long_name).map(String::as_str)
    }

    fn long_name_of(&self, short_name: &str) -> Option<&str> {
        self.short_to_long.get(short_name).map(String::as_str)
    }
}

/// Resolver over the process-wide default context plus an optional per-request
/// override context.
pub struct NameResolver {
    default_context: Arc<VocabularyContext>,
}

impl NameResolver {
    pub fn new(default_context: Arc<VocabularyContext>) -> Self {
        Self { default_context }
    }

    pub fn default_context(&self) -> &Arc<VocabularyContext> {
        &self.default_context
    }

    /// Compacts a long name to its alias.
    ///
    /// Names under the default vocabulary's base URI are compacted by prefix
    /// stripping without a table lookup. Otherwise the default context's table
    /// is consulted first, then the override context unless it is the default
    /// context itself. Unresolved names are returned unchanged; an unresolved
    /// name is never an error.
    pub fn alias(
        &self,
        long_name: &str,
        override_context: Option<&Arc<VocabularyContext>>,
    ) -> String {
        if let Some(rest) = long_name.strip_prefix(self.default_context.url.as_str()) {
            self.default_context.credit_compaction();
            return rest.to_string();
        }

        if let Some(short_name) = self.default_context.short_name_of(long_name) {
            self.default_context.credit_compaction();
            return short_name.to_string();
        }

        if let Some(context) = override_context {
            if !Arc::ptr_eq(context, &self.default_context) {
                if let Some(short_name) = context.short_name_of(long_name) {
                    context.credit_compaction();
                    return short_name.to_string();
                }
            }
        }

        long_name.to_string()
    }

    /// Expands a short name back to its long form, checking the override
    /// context first, then the default context. Identity fallback, as for
    /// [`NameResolver::alias`].
    pub fn expand(
        &self,
        short_name: &str,
        override_context: Option<&Arc<VocabularyContext>>,
    ) -> String {
        if let Some(context) = override_context {
            if !Arc::ptr_eq(context, &self.default_context) {
                if let Some(long_name) = context.long_name_of(short_name) {
                    return long_name.to_string();
                }
            }
        }

        if let Some(long_name) = self.default_context.long_name_of(short_name) {
            return long_name.to_string();
        }

        short_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{NameResolver, VocabularyContext};
    use std::sync::Arc;

    const CORE_URL: &str = "https://uri.etsi.org/ngsi-ld/default-context/";

    fn resolver() -> NameResolver {
        let default_context = Arc::new(VocabularyContext::new(
            CORE_URL,
            &[("https://example.org/vocab/temperature", "temperature")],
        ));
        NameResolver::new(default_context)
    }

    #[test]
    fn default_url_prefix_is_stripped_without_table_lookup() {
        let resolver = resolver();
        let alias = resolver.alias(
            "https://uri.etsi.org/ngsi-ld/default-context/batteryLevel",
            None,
        );
        assert_eq!(alias, "batteryLevel");
        assert_eq!(resolver.default_context().compactions(), 1);
    }

    #[test]
    fn default_table_match_credits_default_context() {
        let resolver = resolver();
        let alias = resolver.alias("https://example.org/vocab/temperature", None);
        assert_eq!(alias, "temperature");
        assert_eq!(resolver.default_context().compactions(), 1);
    }

    #[test]
    fn override_table_match_credits_override_context() {
        let resolver = resolver();
        let override_context = Arc::new(VocabularyContext::new(
            "https://tenant.example.org/context/",
            &[("https://tenant.example.org/vocab/pressure", "pressure")],
        ));

        let alias = resolver.alias(
            "https://tenant.example.org/vocab/pressure",
            Some(&override_context),
        );
        assert_eq!(alias, "pressure");
        assert_eq!(override_context.compactions(), 1);
        assert_eq!(resolver.default_context().compactions(), 0);
    }

    #[test]
    fn override_equal_to_default_is_not_consulted_twice() {
        let resolver = resolver();
        let same = resolver.default_context().clone();
        let alias = resolver.alias("https://example.org/vocab/temperature", Some(&same));
        assert_eq!(alias, "temperature");
        assert_eq!(resolver.default_context().compactions(), 1);
    }

    #[test]
    fn unresolved_names_fall_back_to_identity() {
        let resolver = resolver();
        let alias = resolver.alias("https://elsewhere.org/unknown", None);
        assert_eq!(alias, "https://elsewhere.org/unknown");
        assert_eq!(resolver.default_context().compactions(), 0);
    }

    #[test]
    fn expand_round_trips_known_aliases() {
        let resolver = resolver();
        assert_eq!(
            resolver.expand("temperature", None),
            "https://example.org/vocab/temperature"
        );
        assert_eq!(resolver.expand("unmapped", None), "unmapped");
    }
}
