use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roarbuf::{Bitmap, Error};

#[test]
fn iteration_is_sorted_and_complete() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut bm = Bitmap::new();
    let mut model: Vec<u64> = Vec::new();
    for _ in 0..30_000 {
        let x = rng.random_range(0..1u64 << 34);
        if bm.set(x) {
            model.push(x);
        }
    }
    model.sort_unstable();
    let got: Vec<u64> = bm.iter().collect();
    assert_eq!(got, model);

    // `&Bitmap` iterates too.
    let again: Vec<u64> = (&bm).into_iter().collect();
    assert_eq!(again, model);
}

#[test]
fn iteration_spans_array_and_bitmap_containers() {
    let mut bm = Bitmap::new();
    // Key 0 dense enough to promote; a later key stays a small array.
    for i in 0..5_000u64 {
        bm.set(i);
    }
    bm.set(1 << 40);
    bm.set((1 << 40) + 9);

    let v = bm.to_vec();
    assert_eq!(v.len(), 5_002);
    assert_eq!(v[0], 0);
    assert_eq!(v[4_999], 4_999);
    assert_eq!(v[5_000], 1 << 40);
    assert_eq!(v[5_001], (1 << 40) + 9);
}

#[test]
fn range_iters_partition_the_key_space() {
    let mut bm = Bitmap::new();
    for i in 0..40u64 {
        for j in 0..50u64 {
            bm.set(i << 16 | j);
        }
    }
    for n in [1usize, 2, 3, 7, 40, 100] {
        let parts = bm.range_iters(n);
        assert_eq!(parts.len(), n.max(1));
        let mut all: Vec<u64> = Vec::new();
        for p in parts {
            let chunk: Vec<u64> = p.collect();
            // Each slice is itself sorted and disjoint from the ones
            // before it.
            assert!(chunk.windows(2).all(|w| w[0] < w[1]));
            if let (Some(&last), Some(&first)) = (all.last(), chunk.first()) {
                assert!(last < first);
            }
            all.extend(chunk);
        }
        assert_eq!(all, bm.to_vec(), "n = {n}");
    }
}

#[test]
fn select_and_rank_are_inverse() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut bm = Bitmap::new();
    for _ in 0..20_000 {
        bm.set(rng.random_range(0..1u64 << 28));
    }
    let card = bm.cardinality();
    for i in (0..card).step_by(97) {
        let x = bm.select(i).expect("i < cardinality");
        assert_eq!(bm.rank(x), Some(i + 1), "value {x}");
    }
}

#[test]
fn select_matches_sorted_order() {
    let mut bm = Bitmap::new();
    let values = [5u64, 100, 65_536, 1 << 33, u64::MAX - 1];
    for &v in &values {
        bm.set(v);
    }
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(bm.select(i as u64), Ok(v));
    }
}

#[test]
fn select_past_the_end_is_an_error() {
    let mut bm = Bitmap::new();
    assert_eq!(
        bm.select(0),
        Err(Error::OutOfBounds {
            index: 0,
            cardinality: 0
        })
    );
    bm.set(10);
    assert!(bm.select(0).is_ok());
    assert_eq!(
        bm.select(1),
        Err(Error::OutOfBounds {
            index: 1,
            cardinality: 1
        })
    );
}

#[test]
fn rank_of_absent_values_is_none() {
    let mut bm = Bitmap::new();
    bm.set(100);
    bm.set(1 << 20);
    assert_eq!(bm.rank(100), Some(1));
    assert_eq!(bm.rank(1 << 20), Some(2));
    assert_eq!(bm.rank(99), None);
    assert_eq!(bm.rank(1 << 30), None);
}

#[test]
fn view_select_and_rank_match_the_owned_bitmap() {
    let mut rng = StdRng::seed_from_u64(63);
    let mut bm = Bitmap::new();
    for _ in 0..10_000 {
        bm.set(rng.random_range(0..1u64 << 26));
    }
    let view = Bitmap::from_buffer(bm.to_buffer());
    let card = bm.cardinality();
    for i in (0..card).step_by(131) {
        let x = bm.select(i).expect("i < cardinality");
        assert_eq!(view.select(i), Ok(x));
        assert_eq!(view.rank(x), bm.rank(x));
    }
}
