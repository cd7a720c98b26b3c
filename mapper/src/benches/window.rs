use criterion::{criterion_group, Criterion};
use foldwork_mapper::{map, merge_map, Tokio};
use futures::{stream, StreamExt};
use std::{convert::Infallible, hint::black_box, time::Duration};
use tokio::runtime::Builder;

/// Number of elements mapped per iteration.
const ITEMS: u64 = 256;

/// Simulated latency of a transform. Every eighth element is slow.
fn latency(item: u64) -> Duration {
    if item % 8 == 0 {
        Duration::from_millis(4)
    } else {
        Duration::from_micros(250)
    }
}

fn bench_window(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().enable_time().build().unwrap();
    let spawner = Tokio::new(runtime.handle().clone());
    for max_workers in [4, 16, 64] {
        c.bench_function(
            &format!("{}/fn=chunked workers={max_workers}", module_path!()),
            |b| {
                b.to_async(&runtime).iter(|| async {
                    let result = map(&spawner, 0..ITEMS, max_workers, |item| async move {
                        tokio::time::sleep(latency(item)).await;
                        Ok::<_, Infallible>(item)
                    })
                    .await;
                    black_box(result.unwrap());
                });
            },
        );
        c.bench_function(
            &format!("{}/fn=merge workers={max_workers}", module_path!()),
            |b| {
                b.to_async(&runtime).iter(|| async {
                    let merged = merge_map(
                        spawner.clone(),
                        stream::iter(0..ITEMS),
                        max_workers,
                        |item| async move {
                            tokio::time::sleep(latency(item)).await;
                            Ok::<_, Infallible>(item)
                        },
                    )
                    .unwrap();
                    let count = merged.map(Result::unwrap).count().await;
                    black_box(count);
                });
            },
        );
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_window,
}
