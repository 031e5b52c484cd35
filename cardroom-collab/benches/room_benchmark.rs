use std::hint::black_box;

use cardroom_collab::authority::{RoomAuthority, RoomConfig};
use cardroom_collab::broadcast::{BroadcastGroup, SessionInfo};
use cardroom_collab::UserId;
use cardroom_core::{Activity, Card, Message};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn activity_with_cards(n: usize) -> Activity {
    let mut activity = Activity::new();
    for i in 0..n {
        activity.insert_card(Card::note(format!("card-{i}"), format!("Card {i}")));
    }
    activity
}

fn bench_message_decode(c: &mut Criterion) {
    let text = Message::card_reorder("card-1", 3).encode().unwrap();

    c.bench_function("reorder_decode", |b| {
        b.iter(|| black_box(Message::decode(black_box(&text)).unwrap()))
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let snapshot = Message::snapshot(&activity_with_cards(100));

    c.bench_function("snapshot_encode_100_cards", |b| {
        b.iter(|| black_box(snapshot.encode().unwrap()))
    });
}

fn bench_apply_reorder(c: &mut Criterion) {
    let base = activity_with_cards(100);
    let reorder = Message::card_reorder("card-0", 99);

    c.bench_function("apply_reorder_100_cards", |b| {
        b.iter_batched(
            || base.clone(),
            |mut activity| black_box(activity.apply(black_box(&reorder))),
            BatchSize::SmallInput,
        )
    });
}

fn bench_broadcast_fan_out(c: &mut Criterion) {
    let mut group = BroadcastGroup::new(1024);
    let mut receivers: Vec<_> = (0..100)
        .map(|i| group.add_session(SessionInfo::new(UserId::new(format!("user-{i}")))))
        .collect();
    let message = Message::name("Trip");

    c.bench_function("broadcast_100_sessions", |b| {
        b.iter(|| {
            black_box(group.broadcast(black_box(&message)).unwrap());
            for rx in receivers.iter_mut() {
                let _ = rx.try_recv();
            }
        })
    });
}

fn bench_authority_mutate(c: &mut Criterion) {
    let mut room = RoomAuthority::new("bench", &RoomConfig::default());
    let session = SessionInfo::new(UserId::new("alice"));
    let mut attachment = room.attach(session.clone());
    let mut i = 0u64;

    c.bench_function("authority_mutate_name", |b| {
        b.iter(|| {
            i += 1;
            let outcome = room
                .mutate(session.session_id, &session.user_id, Message::name(format!("n{i}")))
                .unwrap();
            let _ = attachment.frames.try_recv();
            black_box(outcome)
        })
    });
}

criterion_group!(
    benches,
    bench_message_decode,
    bench_snapshot_encode,
    bench_apply_reorder,
    bench_broadcast_fan_out,
    bench_authority_mutate,
);
criterion_main!(benches);
