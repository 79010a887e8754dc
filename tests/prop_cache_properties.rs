// Property tests for the namespaced cache
//
// - Cache keys do not depend on parameter insertion order, and distinct
//   parameter sets produce distinct keys
// - A namespace never holds more than its configured number of entries, and
//   eviction always removes the oldest-created entry

use content_gateway::tiered_cache::generate_api_key;
use content_gateway::{NamespacePolicy, TieredCache};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

fn param_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9&=%+ -]{0,12}", 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_cache_key_ignores_insertion_order(params in param_map(), seed in any::<u64>()) {
        let mut entries: Vec<(String, String)> = params.into_iter().collect();
        let forward: HashMap<String, String> = entries.iter().cloned().collect();

        // Deterministic shuffle driven by the seed
        let len = entries.len().max(1);
        entries.rotate_left((seed as usize) % len);
        entries.reverse();
        let mut shuffled = HashMap::new();
        for (k, v) in entries {
            shuffled.insert(k, v);
        }

        prop_assert_eq!(
            generate_api_key("search", &forward),
            generate_api_key("search", &shuffled)
        );
    }

    #[test]
    fn prop_cache_key_distinguishes_params(a in param_map(), b in param_map()) {
        prop_assume!(a != b);
        let a: HashMap<String, String> = a.into_iter().collect();
        let b: HashMap<String, String> = b.into_iter().collect();
        prop_assert_ne!(generate_api_key("genre", &a), generate_api_key("genre", &b));
    }

    #[test]
    fn prop_namespace_size_is_bounded(max_entries in 1usize..20, inserts in 1usize..60) {
        let cache: TieredCache = TieredCache::new([("api", NamespacePolicy::new(600, max_entries))]);

        for i in 0..inserts {
            let key = format!("key-{}", i);
            let stored = cache.set("api", &key, json!(i), None);
            prop_assert!(stored);
            let stats = cache.stats();
            prop_assert!(stats.namespace("api").unwrap().keys <= max_entries);
        }

        // The newest entries survive, the oldest are gone
        let kept = inserts.min(max_entries);
        for i in 0..inserts {
            let key = format!("key-{}", i);
            let present = cache.exists("api", &key);
            prop_assert_eq!(present, i >= inserts - kept);
        }

        let evictions = cache.stats().namespace("api").unwrap().evictions;
        prop_assert_eq!(evictions as usize, inserts - kept);
    }
}
