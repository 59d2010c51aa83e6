use ensemble_engine::application::ml::model_cache::ModelCache;
use ensemble_engine::domain::ml::learner::BaseLearner;
use ensemble_engine::domain::ml::regression_tree::RegressionTree;
use std::time::Duration;

fn trained_tree(level: f64) -> Box<dyn BaseLearner> {
    let mut tree = RegressionTree::default();
    tree.fit(&[vec![0.0], vec![1.0], vec![2.0]], &[level, level, level])
        .unwrap();
    Box::new(tree)
}

#[test]
fn test_overflow_evicts_exactly_the_least_recently_used() {
    let max_size = 4;
    // Touch order decides the victim, not insertion order
    for victim in 0..max_size {
        let cache = ModelCache::new(max_size, Duration::from_secs(3600));
        let mut now = 1_000;
        for i in 0..max_size {
            cache.put_at(&format!("m{}", i), trained_tree(i as f64), "h", now);
            now += 10;
        }
        for i in (0..max_size).filter(|&i| i != victim) {
            assert!(cache.get_at(&format!("m{}", i), now).is_some());
            now += 10;
        }

        let evicted = cache.put_at("overflow", trained_tree(9.0), "h", now);
        assert_eq!(evicted, Some(format!("m{}", victim)));
        assert_eq!(cache.len(), max_size);
        assert!(!cache.contains(&format!("m{}", victim)));
        assert_eq!(cache.stats().evictions, 1);
    }
}

#[test]
fn test_ttl_expiry_is_a_miss_while_still_stored() {
    let ttl = Duration::from_millis(500);
    let cache = ModelCache::new(8, ttl);
    cache.put_at("btc", trained_tree(1.0), "h", 10_000);

    assert!(cache.get_at("btc", 10_000 + 500).is_some());
    assert!(cache.get_at("btc", 10_000 + 501).is_none());
    assert!(cache.contains("btc"));

    let stats = cache.stats();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_cached_copy_predicts_like_the_original() {
    let cache = ModelCache::new(2, Duration::from_secs(60));
    cache.put("eth", trained_tree(4.5), "abc");

    let copy = cache.get("eth").unwrap();
    assert!(copy.is_trained());
    assert_eq!(copy.predict(&[0.5]), 4.5);
    assert!(cache.get_matching("eth", "abc").is_some());
    assert!(cache.get_matching("eth", "changed").is_none());
    assert!(cache.get("sol").is_none());
}
