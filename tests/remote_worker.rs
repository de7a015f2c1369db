use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use gymvec::vector::worker::protocol::{decode_frame, read_frame, write_frame, Request, Response};
use gymvec::{
    boxed, Action, BoxSpace, Discrete, Env, EnvWorker, GymError, Info, RemoteEnvServer, RemoteEnvWorker,
    RemoteVectorEnv, SpaceSpec, Step, VectorEnv, VectorEnvConfig,
};

/// Every step takes `delay`; observations carry the env tag.
struct Slow {
    tag: f32,
    delay: Duration,
}

impl Env for Slow {
    type Obs = Vec<f32>;
    type Act = u32;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) { (vec![self.tag], Info::new()) }

    fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
        thread::sleep(self.delay);
        Step::new(vec![self.tag], 0.0, false, false, Info::new())
    }

    fn action_space(&self) -> SpaceSpec { Discrete::new(2).into() }

    fn observation_space(&self) -> SpaceSpec { BoxSpace::uniform(&[1], 0.0, 10.0).into() }
}

fn host(tag: f32, delay: Duration) -> SocketAddr {
    let server = RemoteEnvServer::bind("127.0.0.1:0", move || Ok(boxed(Slow { tag, delay }))).unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn();
    addr
}

fn tags(batch: &gymvec::StepBatch) -> Vec<f32> { batch.observations.iter().copied().collect() }

#[test]
fn async_pool_returns_fast_workers_first() {
    let delays = [10, 20, 1500, 1500].map(Duration::from_millis);
    let addrs: Vec<SocketAddr> = delays.iter().enumerate().map(|(i, d)| host(i as f32, *d)).collect();
    let config = VectorEnvConfig::new().with_wait_num(2).with_timeout(Duration::from_secs(1));
    let mut pool = RemoteVectorEnv::connect(addrs, Duration::from_secs(5), config).unwrap();
    pool.reset(None, None).unwrap();

    let started = Instant::now();
    let first = pool.step(&vec![Action::Discrete(0); 4], None).unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(first.env_ids, vec![0, 1]);
    assert_eq!(tags(&first), vec![0.0, 1.0]);
    assert_eq!(pool.outstanding(), &[2, 3]);

    // The fast workers can go again while the slow ones are still running.
    let second = pool.step(&vec![Action::Discrete(1); 2], Some(&[0, 1])).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second.env_ids, vec![0, 1]);

    let mut rest = Vec::new();
    while !pool.outstanding().is_empty() {
        rest.extend(pool.poll().unwrap().env_ids);
    }
    rest.sort_unstable();
    assert_eq!(rest, vec![2, 3]);
    pool.close().unwrap();
}

#[test]
fn zero_timeout_wait_does_not_block() {
    let mut slow = RemoteEnvWorker::connect(host(0.0, Duration::from_millis(300)), Duration::from_secs(5)).unwrap();
    slow.reset(None).unwrap();
    slow.send_step(Action::Discrete(0)).unwrap();

    let started = Instant::now();
    let ready = RemoteEnvWorker::wait(&[&slow], 1, Some(Duration::ZERO));
    assert!(ready.is_empty());
    assert!(started.elapsed() < Duration::from_millis(100));

    let ready = RemoteEnvWorker::wait(&[&slow], 1, None);
    assert_eq!(ready, vec![0]);
    assert_eq!(slow.recv().unwrap().into_step().unwrap().observation.iter().copied().collect::<Vec<_>>(), vec![0.0]);
}

#[test]
fn close_with_outstanding_requests_does_not_hang() {
    let delays = [10, 3000, 3000].map(Duration::from_millis);
    let workers = delays
        .iter()
        .enumerate()
        .map(|(i, d)| {
            RemoteEnvWorker::connect(host(i as f32, *d), Duration::from_secs(5))
                .map(|w| w.with_close_grace(Duration::from_millis(100)))
        })
        .collect::<gymvec::Result<Vec<_>>>()
        .unwrap();
    let mut pool = VectorEnv::new(workers, VectorEnvConfig::new().with_wait_num(1)).unwrap();
    pool.reset(None, None).unwrap();
    let first = pool.step(&vec![Action::Discrete(0); 3], None).unwrap();
    assert_eq!(first.env_ids, vec![0]);
    assert_eq!(pool.outstanding(), &[1, 2]);

    let started = Instant::now();
    pool.close().unwrap();
    pool.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn dead_host_is_reported_not_waited_on() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    // Answers the handshake, then hangs up on the first real request.
    let fake = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let frame = read_frame(&mut stream).unwrap().unwrap();
        assert_eq!(decode_frame::<Request>(&frame).unwrap(), Request::Spaces);
        let spaces = Response::Spaces {
            action: Discrete::new(2).into(),
            observation: BoxSpace::uniform(&[1], 0.0, 1.0).into(),
        };
        write_frame(&mut stream, &spaces).unwrap();
        read_frame(&mut stream).unwrap();
    });

    let mut w = RemoteEnvWorker::connect(addr, Duration::from_secs(5)).unwrap();
    w.send(None).unwrap();
    fake.join().unwrap();

    let ready = RemoteEnvWorker::wait(&[&w], 1, Some(Duration::from_secs(5)));
    assert_eq!(ready, vec![0]);
    assert!(matches!(w.recv(), Err(GymError::WorkerDied(_))));
    // Further sends fail fast and close still succeeds.
    assert!(matches!(w.send(None), Err(GymError::WorkerDied(_))));
    w.close().unwrap();
    w.close().unwrap();
}

/// Unbounded observation space; every step observes NaN.
struct Unbounded;

impl Env for Unbounded {
    type Obs = Vec<f32>;
    type Act = u32;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) { (vec![f32::INFINITY], Info::new()) }

    fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
        Step::new(vec![f32::NAN], 0.0, false, false, Info::new())
    }

    fn action_space(&self) -> SpaceSpec { Discrete::new(2).into() }

    fn observation_space(&self) -> SpaceSpec { BoxSpace::uniform(&[1], f32::NEG_INFINITY, f32::INFINITY).into() }
}

#[test]
fn non_finite_values_cross_the_connection() {
    let server = RemoteEnvServer::bind("127.0.0.1:0", || Ok(boxed(Unbounded))).unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn();

    let mut w = RemoteEnvWorker::connect(addr, Duration::from_secs(5)).unwrap();
    assert_eq!(w.observation_space(), &SpaceSpec::from(BoxSpace::uniform(&[1], f32::NEG_INFINITY, f32::INFINITY)));
    let (obs, _) = w.reset(None).unwrap();
    assert_eq!(obs.iter().copied().collect::<Vec<_>>(), vec![f32::INFINITY]);
    let step = w.step(Action::Discrete(0)).unwrap();
    assert!(step.observation.iter().all(|x| x.is_nan()));
    // The connection is still healthy afterwards.
    let step = w.step(Action::Discrete(1)).unwrap();
    assert!(step.observation.iter().all(|x| x.is_nan()));
    w.reset(None).unwrap();
    w.close().unwrap();
}

#[test]
fn silent_host_fails_connect_within_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    // Accepts, never answers, and holds the socket until the client gives up.
    let silent = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink);
    });

    let started = Instant::now();
    let result = RemoteEnvWorker::connect(addr, Duration::from_millis(200));
    assert!(matches!(result, Err(GymError::WorkerDied(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    silent.join().unwrap();
}
