use gymvec::{spaces::Space, ActionSpace, BoxSpace, Discrete, MultiBinary, MultiDiscrete, SpaceSpec};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

proptest! {
    // Discrete sampling always within bounds and deterministic per seed
    #[test]
    fn discrete_sampling_contains_and_deterministic(n in 1u32..1000, seed in any::<u64>()) {
        let d = Discrete::new(n);
        let mut rng1 = StdRng::seed_from_u64(seed);
        let mut rng2 = StdRng::seed_from_u64(seed);
        for _ in 0..100 {
            let v1 = d.sample(&mut rng1);
            let v2 = d.sample(&mut rng2);
            prop_assert!(d.contains(&v1));
            prop_assert_eq!(v1, v2);
        }
    }

    #[test]
    fn multibinary_sampling_valid(n in 1usize..256, seed in any::<u64>()) {
        let mb = MultiBinary::new(n);
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..50 {
            let v = mb.sample(&mut rng);
            prop_assert!(mb.contains(&v));
            prop_assert_eq!(v.len(), n);
        }
    }

    #[test]
    fn multidiscrete_sampling_valid(nvec in proptest::collection::vec(1u32..10_000, 1..8), seed in any::<u64>()) {
        let md = MultiDiscrete::new(nvec.clone());
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..50 {
            let v = md.sample(&mut rng);
            prop_assert!(md.contains(&v));
            prop_assert_eq!(v.len(), nvec.len());
        }
    }

    // A worker's sampler seeded with (base, index) replays the same actions.
    #[test]
    fn seeded_action_space_is_reproducible(base in any::<u64>(), index in 0usize..64) {
        let seed = gymvec::utils::worker_seed(base, index);
        let spec: SpaceSpec = BoxSpace::uniform(&[3], -2.0, 2.0).into();
        let mut a = ActionSpace::new(spec.clone());
        let mut b = ActionSpace::new(spec);
        a.seed(Some(seed));
        b.seed(Some(seed));
        for _ in 0..20 {
            let x = a.sample();
            prop_assert!(a.contains(&x));
            prop_assert_eq!(x, b.sample());
        }
    }
}

#[test]
fn boxspace_sampling_contains_and_deterministic() {
    let mut rng1 = StdRng::seed_from_u64(12345);
    let mut rng2 = StdRng::seed_from_u64(12345);

    let b3 = BoxSpace::new(vec![0.0, -1.0, 2.5], vec![1.0, 1.0, 3.5]);
    for _ in 0..100 {
        let v1 = b3.sample(&mut rng1);
        let v2 = b3.sample(&mut rng2);
        assert!(b3.contains(&v1));
        assert_eq!(v1, v2);
    }

    // Unbounded dimensions still sample finite values.
    let open = BoxSpace::new(vec![f32::MIN, 0.0], vec![f32::MAX, 1.0]);
    for _ in 0..50 {
        let v = open.sample(&mut rng1);
        assert!(open.contains(&v));
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
