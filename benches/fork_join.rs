use criterion::{criterion_group, criterion_main, Criterion};

use weft::prelude::*;

/// One fork-join wave: a root task spawns `width` children, waits for all of
/// them, and folds their payloads. The manager and its worker threads live
/// across iterations so only scheduling cost is measured.
fn fork_join_wave(manager: &TaskManager, width: u32) {
    let root = manager.create_task(move |ctx| {
        let mut batch = ctx.create_batch();
        for i in 0..width {
            batch.add(ctx.create_task(move |child| {
                child.write_data(&i.to_le_bytes());
            }));
        }
        ctx.submit_batch(&batch);
        ctx.wait_for(|| batch.are_all_finished());

        let mut total = 0u64;
        for handle in batch.handles() {
            let mut bytes = [0u8; 4];
            ctx.read_payload(handle, &mut bytes);
            total += u64::from(u32::from_le_bytes(bytes));
        }
        ctx.write_data(&total.to_le_bytes());
    });

    manager.submit_task(&root);
    manager.run_tasks_using_this_thread_until(|| manager.is_finished(&root));
    manager.release_task(root);
}

fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork_join");

    for &width in &[16u32, 64, 200] {
        let manager = TaskManager::with_config(Config {
            worker_threads: 4,
            arena_capacity: 1024,
        });
        group.bench_function(format!("wave/{width}"), |b| {
            b.iter(|| fork_join_wave(&manager, width));
        });
    }

    group.finish();
}

fn bench_spawn_release(c: &mut Criterion) {
    let manager = TaskManager::with_config(Config {
        worker_threads: 1,
        arena_capacity: 1024,
    });

    c.bench_function("create_release", |b| {
        b.iter(|| {
            let handle = manager.create_task(|_| {});
            manager.submit_task(&handle);
            manager.run_tasks_using_this_thread_until(|| manager.is_finished(&handle));
            manager.release_task(handle);
        });
    });
}

criterion_group!(benches, bench_fork_join, bench_spawn_release);
criterion_main!(benches);
