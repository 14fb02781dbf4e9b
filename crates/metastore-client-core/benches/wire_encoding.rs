//! Benchmarks for the wire encodings and the event-feed contiguity check.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use metastore_client_core::notification::{check_event_sequence, NotificationEventResponse};
use metastore_client_core::protocol::{MessageType, ProtocolWriter, TType, WireEncoding};
use metastore_client_core::rpc::messages::{ThriftRead, ThriftWrite};
use metastore_client_core::NotificationEvent;

fn events(count: i64) -> Vec<NotificationEvent> {
    (1..=count)
        .map(|id| NotificationEvent {
            event_id: id,
            event_time: 1_700_000_000 + id as i32,
            event_type: "INSERT".to_string(),
            db_name: Some("sales".to_string()),
            table_name: Some("orders".to_string()),
            message: format!("{{\"server\":\"meta0\",\"files\":[\"part-{id:05}\"]}}"),
            ..NotificationEvent::default()
        })
        .collect()
}

fn encode(encoding: WireEncoding, response: &NotificationEventResponse) -> Vec<u8> {
    let mut writer = encoding.writer();
    writer.write_message_begin("get_next_notification", MessageType::Reply, 1);
    writer.write_struct_begin();
    writer.write_field_begin(TType::Struct, 0);
    response.write(writer.as_mut());
    writer.write_field_stop();
    writer.write_struct_end();
    writer.take().to_vec()
}

/// Benchmark encoding a page of notification events.
fn bench_encode_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_events");

    for count in [10, 100, 1000] {
        let response = NotificationEventResponse { events: events(count) };
        group.throughput(Throughput::Elements(count as u64));
        for encoding in [WireEncoding::Binary, WireEncoding::Compact] {
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}"), count),
                &response,
                |b, r| b.iter(|| black_box(encode(encoding, r))),
            );
        }
    }

    group.finish();
}

/// Benchmark decoding a page of notification events.
fn bench_decode_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_events");

    for count in [10, 100, 1000] {
        let response = NotificationEventResponse { events: events(count) };
        group.throughput(Throughput::Elements(count as u64));
        for encoding in [WireEncoding::Binary, WireEncoding::Compact] {
            let mut writer = encoding.writer();
            response.write(writer.as_mut());
            let bytes = writer.take();
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}"), count),
                &bytes,
                |b, bytes| {
                    b.iter(|| {
                        let mut reader = encoding.reader(bytes);
                        black_box(NotificationEventResponse::read(reader.as_mut()).unwrap())
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark measuring a buffered reply before decoding it.
fn bench_message_len(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_len");
    let response = NotificationEventResponse { events: events(100) };

    for encoding in [WireEncoding::Binary, WireEncoding::Compact] {
        let bytes = encode(encoding, &response);
        group.bench_function(format!("{encoding:?}"), |b| {
            b.iter(|| black_box(encoding.message_len(&bytes).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the contiguity check over a page of events.
fn bench_check_event_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_event_sequence");

    for count in [100, 1000] {
        let page = events(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("strict", count), &page, |b, page| {
            b.iter_batched(
                || page.clone(),
                |page| black_box(check_event_sequence(0, page, false, None).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_events,
    bench_decode_events,
    bench_message_len,
    bench_check_event_sequence,
);
criterion_main!(benches);
