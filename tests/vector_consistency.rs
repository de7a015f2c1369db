use gymvec::{
    boxed, make, Action, CartPoleEnv, DummyVectorEnv, Env, GymError, InfoValue, KwArgs, RenderFrame,
    RunningMeanStd, Step, VectorEnvConfig, VectorEnvNormObs,
};

fn cartpoles(n: u64) -> DummyVectorEnv {
    DummyVectorEnv::from_fns((0..n).map(|i| move || Ok(boxed(CartPoleEnv::new(i)))), VectorEnvConfig::default())
        .unwrap()
}

fn rows(batch: &ndarray::ArrayD<f32>) -> Vec<Vec<f32>> {
    batch.outer_iter().map(|r| r.iter().copied().collect()).collect()
}

// Ensure a vector env with N=1 produces the same rollout as a single env
// when seeds and actions are the same.
#[test]
fn single_vs_vector_n1_same_rollout() {
    let mut single = CartPoleEnv::default();
    let (obs_s, _info_s) = single.reset(Some(0));

    let mut vec_env = cartpoles(1);
    let reset = vec_env.reset(None, Some(0)).unwrap();
    assert_eq!(rows(&reset.observations)[0], obs_s.to_vec());

    let actions = [1u32, 1, 0, 1, 0, 0, 1, 1, 1, 0];
    for a in actions {
        let s_single: Step<_> = single.step(a);
        let s_vec = vec_env.step(&[Action::Discrete(a)], None).unwrap();
        assert_eq!(rows(&s_vec.observations)[0], s_single.observation.to_vec());
        assert!((s_single.reward - s_vec.rewards[0]).abs() < 1e-6);
        assert_eq!(s_single.terminated, s_vec.terminated[0]);
        assert_eq!(s_single.truncated, s_vec.truncated[0]);
        if s_single.terminated || s_single.truncated { break; }
    }
}

#[test]
fn four_workers_full_then_subset() {
    let mut v = cartpoles(4);
    let reset = v.reset(None, Some(100)).unwrap();
    assert_eq!(reset.env_ids, vec![0, 1, 2, 3]);
    assert_eq!(reset.observations.shape(), &[4, 4]);
    for (k, info) in reset.infos.iter().enumerate() {
        assert_eq!(info.get("env_id"), Some(&InfoValue::I64(k as i64)));
    }

    let all = v.step(&[0, 1, 0, 1].map(Action::Discrete), None).unwrap();
    assert_eq!(all.env_ids, vec![0, 1, 2, 3]);
    assert_eq!(all.len(), 4);
    let before = rows(&all.observations);

    let sub = v.step(&[Action::Discrete(1), Action::Discrete(1)], Some(&[1, 3])).unwrap();
    assert_eq!(sub.env_ids, vec![1, 3]);
    assert_eq!(sub.observations.shape(), &[2, 4]);
    assert_eq!(sub.infos[1].get("env_id"), Some(&InfoValue::I64(3)));

    // Workers 0 and 2 were not touched: their step counters stayed at 1.
    let steps = v.get_env_attr("steps", None).unwrap();
    assert_eq!(steps, vec![InfoValue::I64(1), InfoValue::I64(2), InfoValue::I64(1), InfoValue::I64(2)]);
    let after = rows(&v.step(&[Action::Discrete(0)], Some(&[0])).unwrap().observations);
    assert_ne!(after[0], before[0]);
}

#[test]
fn reset_then_step_starts_from_fresh_state() {
    let mut v = cartpoles(2);
    v.reset(None, Some(7)).unwrap();
    for _ in 0..5 {
        v.step(&[Action::Discrete(1), Action::Discrete(1)], None).unwrap();
    }
    let reset = v.reset(None, Some(7)).unwrap();
    let stepped = v.step(&[Action::Discrete(0), Action::Discrete(0)], None).unwrap();

    let mut reference = CartPoleEnv::new(0);
    let (obs, _) = reference.reset(Some(8));
    assert_eq!(rows(&reset.observations)[1], obs.to_vec());
    assert_eq!(rows(&stepped.observations)[1], reference.step(0).observation.to_vec());
    assert_eq!(v.get_env_attr("steps", None).unwrap(), vec![InfoValue::I64(1), InfoValue::I64(1)]);
}

#[test]
fn close_twice_and_use_after_close() {
    let mut v = cartpoles(3);
    v.reset(None, None).unwrap();
    v.close().unwrap();
    v.close().unwrap();
    assert!(v.is_closed());
    assert!(matches!(v.step(&vec![Action::Discrete(0); 3], None), Err(GymError::Precondition(_))));
    assert!(matches!(v.render(None), Err(GymError::Precondition(_))));
}

#[test]
fn seeding_gives_reproducible_samples_per_index() {
    let mut a = cartpoles(3);
    let mut b = cartpoles(5);
    assert_eq!(a.seed(Some(42)).unwrap(), vec![vec![42], vec![43], vec![44]]);
    b.seed(Some(42)).unwrap();
    // Same (base, index) means the same sampler stream whatever the pool size.
    for _ in 0..10 {
        let xs = a.sample_actions(None).unwrap();
        let ys = b.sample_actions(Some(&[0, 1, 2])).unwrap();
        assert_eq!(xs, ys);
    }
    // Unseeded workers still report the seed they drew.
    assert!(a.seed(None).unwrap().iter().all(|s| s.len() == 1));
}

#[test]
fn registry_envs_run_in_a_pool() {
    let mut kwargs = KwArgs::new();
    kwargs.insert("max_episode_steps".into(), "3".into());
    let mut v = DummyVectorEnv::from_fns((0..2).map(|_| || make("Pendulum-v1", &kwargs)), VectorEnvConfig::default())
        .unwrap();
    v.reset(None, Some(0)).unwrap();
    let mut last = None;
    for _ in 0..3 {
        let actions = v.sample_actions(None).unwrap();
        last = Some(v.step(&actions, None).unwrap());
    }
    assert_eq!(last.unwrap().truncated.to_vec(), vec![true, true]);
    let frames = v.render(None).unwrap();
    assert!(frames.iter().all(|f| matches!(f, Some(RenderFrame::Text(_)))));
}

#[test]
fn eval_pool_reads_training_stats_without_updating_them() {
    let mut train = VectorEnvNormObs::new(cartpoles(4), true);
    let mut eval = VectorEnvNormObs::new(cartpoles(2), false);
    eval.set_obs_rms(train.get_obs_rms());

    train.reset(None, Some(0)).unwrap();
    for _ in 0..3 {
        train.step(&vec![Action::Discrete(1); 4], None).unwrap();
    }
    let snapshot = train.get_obs_rms().read().unwrap().clone();
    assert_eq!(snapshot.count(), 16);

    let out = eval.reset(None, Some(1)).unwrap();
    assert_eq!(out.observations.shape(), &[2, 4]);
    assert!(out.observations.iter().all(|x| x.abs() <= 10.0));
    assert_eq!(*eval.get_obs_rms().read().unwrap(), snapshot);

    // A raw twin of the eval pool sees the same unnormalized observations.
    let mut twin = cartpoles(2);
    let raw = twin.reset(None, Some(1)).unwrap();
    assert_eq!(out.observations, snapshot.norm(&raw.observations).unwrap());

    for _ in 0..3 {
        let normed = eval.step(&vec![Action::Discrete(0); 2], None).unwrap();
        let raw = twin.step(&vec![Action::Discrete(0); 2], None).unwrap();
        assert_eq!(normed.observations, snapshot.norm(&raw.observations).unwrap());

        // Same thing written out: (obs - mean) / sqrt(var + eps), clipped to 10.
        let mean = snapshot.mean().to_owned().into_raw_vec();
        let var = snapshot.var().to_owned().into_raw_vec();
        for (got, want) in rows(&normed.observations).iter().zip(rows(&raw.observations)) {
            for j in 0..4 {
                let z = (f64::from(want[j]) - mean[j]) / (var[j] + f64::from(f32::EPSILON)).sqrt();
                let z = z.clamp(-10.0, 10.0) as f32;
                assert!((got[j] - z).abs() <= 1e-5 * (1.0 + z.abs()), "{} vs {z}", got[j]);
            }
        }
    }
    assert_eq!(*eval.get_obs_rms().read().unwrap(), snapshot);
}

#[test]
fn training_pool_folds_each_batch_in_before_normalizing() {
    let mut train = VectorEnvNormObs::new(cartpoles(3), true);
    let mut twin = cartpoles(3);
    let mut mirror = RunningMeanStd::new();

    let normed = train.reset(None, Some(7)).unwrap();
    let raw = twin.reset(None, Some(7)).unwrap();
    mirror.update(&raw.observations).unwrap();
    assert_eq!(normed.observations, mirror.norm(&raw.observations).unwrap());

    for t in 0..4u32 {
        let actions: Vec<Action> = (0..3).map(|i| Action::Discrete((t + i) % 2)).collect();
        let normed = train.step(&actions, None).unwrap();
        let raw = twin.step(&actions, None).unwrap();
        mirror.update(&raw.observations).unwrap();
        assert_eq!(normed.observations, mirror.norm(&raw.observations).unwrap());
    }
    assert_eq!(mirror.count(), 15);
    assert_eq!(*train.get_obs_rms().read().unwrap(), mirror);

    // Turning updates off freezes the statistics.
    train.set_update_obs_rms(false);
    train.step(&vec![Action::Discrete(0); 3], None).unwrap();
    assert_eq!(*train.get_obs_rms().read().unwrap(), mirror);
}
