use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use refcount_map::RefCountMap;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_get_create(c: &mut Criterion) {
    c.bench_function("refcount_map_get_create_10k", |b| {
        b.iter_batched(
            || RefCountMap::<String, u64>::new(|| 0),
            |m| {
                // Hold refs so every get builds a fresh entry.
                let refs: Vec<_> = lcg(1).take(10_000).map(|x| m.get(key(x)).0).collect();
                black_box((m, refs))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("refcount_map_get_hit", |b| {
        let m = RefCountMap::from_key(|k: &String| k.len());
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        let _held: Vec<_> = keys.iter().map(|k| m.get(k.clone()).0).collect();
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap().clone();
            black_box(m.get(k));
        })
    });
}

fn bench_get_release_churn(c: &mut Criterion) {
    c.bench_function("refcount_map_get_release_churn", |b| {
        let m = RefCountMap::new(|| 1u64);
        let mut keys = lcg(11).map(key);
        b.iter(|| {
            // Nothing else holds the key: build, publish, then evict.
            let (r, existed) = m.get(keys.next().unwrap());
            black_box(existed);
            drop(r);
        })
    });
}

fn bench_load(c: &mut Criterion) {
    c.bench_function("refcount_map_load", |b| {
        let m = RefCountMap::new(|| 1u64);
        let keys: Vec<_> = lcg(13).take(10_000).map(key).collect();
        let _held: Vec<_> = keys.iter().map(|k| m.get(k.clone()).0).collect();
        let mut it = keys.iter().cycle();
        b.iter(|| black_box(m.load(it.next().unwrap())))
    });
}

fn bench_clone_drop_refs(c: &mut Criterion) {
    c.bench_function("refcount_map_clone_drop_ref", |b| {
        let m = RefCountMap::new(|| 1u64);
        let (r, _) = m.get("key".to_string());
        b.iter(|| {
            let x = r.clone();
            black_box(&x);
            drop(x);
        })
    });
}

fn bench_contended_get(c: &mut Criterion) {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2_000;
    c.bench_function("refcount_map_contended_get_4t", |b| {
        let m = RefCountMap::new(|| 1u64);
        let hot: Vec<_> = (0..64u64).map(key).collect();
        b.iter(|| {
            let barrier = Barrier::new(THREADS);
            thread::scope(|s| {
                for t in 0..THREADS {
                    let (m, hot, barrier) = (&m, &hot, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        for i in 0..PER_THREAD {
                            let k = hot[(i * 7 + t) % hot.len()].clone();
                            black_box(m.get(k));
                        }
                    });
                }
            });
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_get_create, bench_get_hit, bench_get_release_churn, bench_load,
        bench_clone_drop_refs, bench_contended_get
}
criterion_main!(benches);
