//! Presence merge benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;
use tether_core::Presence;
use tether_protocol::{Meta, PresenceDiff, PresenceEntry, PresenceMap};

fn roster(users: usize, conns: usize) -> PresenceMap {
    (0..users)
        .map(|u| {
            let metas = (0..conns)
                .map(|c| Meta::new(format!("{u}-{c}"), json!({"email": format!("user{u}@example.com")})))
                .collect();
            (u.to_string(), PresenceEntry::new(metas))
        })
        .collect()
}

fn bench_sync_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_state");

    for users in [10, 1_000] {
        let state = roster(users, 2);
        group.bench_function(format!("resync_{users}"), |b| {
            b.iter_batched(
                || {
                    let mut presence = Presence::new();
                    presence.sync_state(state.clone());
                    presence
                },
                |mut presence| presence.sync_state(black_box(state.clone())),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_sync_diff(c: &mut Criterion) {
    let state = roster(1_000, 1);

    c.bench_function("presence_diff_join_leave", |b| {
        b.iter_batched(
            || {
                let mut presence = Presence::new();
                presence.sync_state(state.clone());
                presence
            },
            |mut presence| {
                presence.sync_diff(black_box(
                    PresenceDiff::default().join("500", Meta::new("500-new", json!({}))),
                ));
                presence.sync_diff(black_box(
                    PresenceDiff::default().leave("500", Meta::new("500-0", json!({}))),
                ))
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_sync_state, bench_sync_diff);
criterion_main!(benches);
