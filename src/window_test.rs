use super::*;

fn ids(range: std::ops::RangeInclusive<u32>) -> Vec<u32> {
    range.collect()
}

#[test]
fn unbounded_merge_appends() {
    let merged = merge_bounded(&[1, 2], &[3], None, None);
    assert_eq!(merged, vec![1, 2, 3]);
}

#[test]
fn merge_within_limit_does_not_trim() {
    let merged = merge_bounded(&[1, 2], &[3], Some(3), None);
    assert_eq!(merged, vec![1, 2, 3]);
}

#[test]
fn merge_past_limit_trims_oldest() {
    let merged = merge_bounded(&[1, 2, 3], &[4, 5], Some(3), None);
    assert_eq!(merged, vec![3, 4, 5]);
}

#[test]
fn slack_defers_eviction_until_threshold() {
    let existing = ids(1..=1000);
    let merged = merge_bounded(&existing, &[1001], Some(1000), Some(evict_threshold(1000)));
    assert_eq!(merged.len(), 1001);
    assert_eq!(merged.first(), Some(&1));
}

#[test]
fn crossing_threshold_trims_back_to_limit() {
    let existing = ids(1..=1200);
    let merged = merge_bounded(&existing, &[1201], Some(1000), Some(evict_threshold(1000)));
    assert_eq!(merged.len(), 1000);
    assert_eq!(merged.first(), Some(&202));
    assert_eq!(merged.last(), Some(&1201));
}

#[test]
fn oversized_batch_keeps_its_newest_tail() {
    let merged = merge_bounded(&[1, 2], &[3, 4, 5, 6, 7], Some(3), None);
    assert_eq!(merged, vec![5, 6, 7]);
}

#[test]
fn merge_does_not_modify_inputs() {
    let existing = vec![1, 2, 3];
    let incoming = vec![4];
    let _ = merge_bounded(&existing, &incoming, Some(2), None);
    assert_eq!(existing, vec![1, 2, 3]);
    assert_eq!(incoming, vec![4]);
}

#[test]
fn evict_threshold_is_one_point_two_times_limit() {
    assert_eq!(evict_threshold(1000), 1200);
    assert_eq!(evict_threshold(10), 12);
    assert_eq!(evict_threshold(0), 0);
}

#[test]
fn newest_returns_tail_of_limit() {
    let items = ids(1..=5);
    assert_eq!(newest(&items, Some(2)), &[4, 5]);
    assert_eq!(newest(&items, Some(10)).len(), 5);
    assert_eq!(newest(&items, None).len(), 5);
}

#[test]
fn repeated_merges_never_exceed_threshold() {
    let mut seq: Vec<u32> = Vec::new();
    for batch in 0..500_u32 {
        let incoming: Vec<u32> = (0..3).map(|i| batch * 3 + i).collect();
        seq = merge_bounded(&seq, &incoming, Some(100), Some(evict_threshold(100)));
        assert!(seq.len() <= 120);
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
    }
}
