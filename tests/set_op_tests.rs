use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roarbuf::{and, and_not, fast_and, fast_or, fast_par_or, or, Bitmap};

fn random_bitmap(rng: &mut StdRng, n: usize, max: u64) -> Bitmap {
    let mut bm = Bitmap::new();
    for _ in 0..n {
        bm.set(rng.random_range(0..max));
    }
    bm
}

#[test]
fn evens_and_odds_are_disjoint() {
    let n = 2_000_000u64;
    let mut a = Bitmap::new();
    let mut b = Bitmap::new();
    for i in 0..n {
        if i % 2 == 0 {
            a.set(i);
        } else {
            b.set(i);
        }
    }
    assert_eq!(a.cardinality(), n / 2);
    assert_eq!(b.cardinality(), n / 2);
    assert!(and(&a, &b).is_empty());
    assert_eq!(or(&a, &b).cardinality(), n);

    let mut c = a.clone();
    c.and_with(&b);
    assert!(c.is_empty());
}

#[test]
fn inclusion_exclusion_and_difference_laws() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..10 {
        let a = random_bitmap(&mut rng, 8_000, 1 << 24);
        let b = random_bitmap(&mut rng, 8_000, 1 << 24);

        let union = or(&a, &b);
        let inter = and(&a, &b);
        let diff = and_not(&a, &b);

        // |A ∪ B| + |A ∩ B| = |A| + |B|
        assert_eq!(
            union.cardinality() + inter.cardinality(),
            a.cardinality() + b.cardinality()
        );
        // A ∪ B ⊇ A and A ∩ B ⊆ A
        assert_eq!(and(&union, &a), a);
        assert_eq!(and(&inter, &a), inter);
        // (A \ B) ∩ B = ∅
        assert!(and(&diff, &b).is_empty());
        // (A \ B) ∪ (A ∩ B) = A
        assert_eq!(or(&diff, &inter), a);
    }
}

#[test]
fn in_place_forms_match_fresh_forms() {
    let mut rng = StdRng::seed_from_u64(4);
    let a = random_bitmap(&mut rng, 20_000, 1 << 26);
    let b = random_bitmap(&mut rng, 20_000, 1 << 26);

    let mut x = a.clone();
    x.and_with(&b);
    assert_eq!(x, and(&a, &b));

    let mut x = a.clone();
    x.or_with(&b);
    assert_eq!(x, or(&a, &b));

    let mut x = a.clone();
    x.and_not_with(&b);
    assert_eq!(x, and_not(&a, &b));
}

#[test]
fn operators_delegate_to_the_set_ops() {
    let a: Bitmap = (0..1000u64).collect();
    let b: Bitmap = (500..1500u64).collect();

    assert_eq!(&a & &b, and(&a, &b));
    assert_eq!(&a | &b, or(&a, &b));
    assert_eq!(&a - &b, and_not(&a, &b));

    let mut c = a.clone();
    c |= &b;
    assert_eq!(c.cardinality(), 1500);
    c -= &b;
    assert_eq!(c, and_not(&a, &b));
    let mut c = a.clone();
    c &= &b;
    assert_eq!(c.cardinality(), 500);
}

#[test]
fn or_promotes_dense_results_correctly() {
    // Two arrays whose union crosses the array limit inside one key.
    let a: Bitmap = (0..4000u64).map(|i| 2 * i).collect();
    let b: Bitmap = (0..4000u64).map(|i| 2 * i + 1).collect();
    let res = or(&a, &b);
    assert_eq!(res.cardinality(), 8000);
    assert_eq!(res.to_vec(), (0..8000).collect::<Vec<_>>());
}

#[test]
fn fast_or_matches_a_pairwise_fold() {
    let mut rng = StdRng::seed_from_u64(1234);
    let bitmaps: Vec<Bitmap> = (0..300)
        .map(|_| random_bitmap(&mut rng, 300, 100_000_000))
        .collect();
    let refs: Vec<&Bitmap> = bitmaps.iter().collect();

    let fast = fast_or(&refs);
    let mut fold = Bitmap::new();
    for bm in &bitmaps {
        fold.or_with(bm);
    }
    assert_eq!(fast.cardinality(), fold.cardinality());
    assert_eq!(fast.to_vec(), fold.to_vec());
}

#[test]
fn fast_par_or_matches_fast_or() {
    let mut rng = StdRng::seed_from_u64(777);
    let bitmaps: Vec<Bitmap> = (0..40)
        .map(|_| random_bitmap(&mut rng, 2_000, 1 << 30))
        .collect();
    let refs: Vec<&Bitmap> = bitmaps.iter().collect();

    let serial = fast_or(&refs);
    for workers in [1, 2, 4, 13] {
        let par = fast_par_or(workers, &refs);
        assert_eq!(par.to_vec(), serial.to_vec());
    }
}

#[test]
fn fast_or_handles_dense_and_sparse_keys_together() {
    // One key collects enough cardinality for a bitmap container while
    // others stay tiny arrays.
    let mut bitmaps = Vec::new();
    for g in 0..8u64 {
        let mut bm = Bitmap::new();
        for i in 0..1000u64 {
            bm.set(g * 1000 + i); // dense shared key 0
            bm.set((g + 1) << 32 | i); // sparse per-input key
        }
        bitmaps.push(bm);
    }
    let refs: Vec<&Bitmap> = bitmaps.iter().collect();
    let res = fast_or(&refs);
    assert_eq!(res.cardinality(), 8_000 + 8_000);
    for g in 0..8u64 {
        assert!(res.contains(g * 1000 + 999));
        assert!(res.contains((g + 1) << 32 | 999));
    }
}

#[test]
fn fast_and_folds_all_inputs() {
    let a: Bitmap = (0..30_000u64).collect();
    let b: Bitmap = (10_000..40_000u64).collect();
    let c: Bitmap = (0..100_000u64).filter(|x| x % 2 == 0).collect();

    let res = fast_and(&[&a, &b, &c]);
    let expect: Vec<u64> = (10_000..30_000).filter(|x| x % 2 == 0).collect();
    assert_eq!(res.to_vec(), expect);

    assert!(fast_and(&[]).is_empty());
    assert_eq!(fast_and(&[&a]), a);
}

#[test]
fn empty_operands_are_absorbed() {
    let empty = Bitmap::new();
    let a: Bitmap = (0..100u64).collect();

    assert!(and(&a, &empty).is_empty());
    assert!(and(&empty, &a).is_empty());
    assert_eq!(or(&a, &empty), a);
    assert_eq!(or(&empty, &a), a);
    assert_eq!(and_not(&a, &empty), a);
    assert!(and_not(&empty, &a).is_empty());
    assert!(fast_or(&[]).is_empty());
}
