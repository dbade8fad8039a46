// benches/connection_pool_bench.rs

//! Wire codec benchmarks. A live TCP connection can't be exercised inside
//! a criterion benchmark without a real server on the other end, so these
//! measure the per-message encode/decode work every pooled connection
//! does on the way in and out — the cost a bigger pool amortizes across
//! more concurrent callers.

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, criterion_group, criterion_main};
use orbiter::core::protocol::resp::{RespCodec, RespFrame};
use tokio_util::codec::{Decoder, Encoder};

fn encode_command(name: &str, args: &[&[u8]]) -> BytesMut {
    let frame = RespFrame::command(name, args.iter().map(|a| Bytes::copy_from_slice(a)));
    let mut buf = BytesMut::new();
    RespCodec.encode(frame, &mut buf).unwrap();
    buf
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp_encode");

    group.bench_function("get", |b| {
        b.iter(|| {
            let frame = RespFrame::command("GET", [Bytes::from_static(b"my-distributed-map")]);
            let mut buf = BytesMut::new();
            RespCodec.encode(frame, &mut buf).unwrap();
        });
    });

    group.bench_function("hset_many_fields", |b| {
        let args: Vec<Bytes> = (0..32)
            .flat_map(|i| [Bytes::from(format!("field{i}")), Bytes::from(format!("value{i}"))])
            .collect();
        b.iter(|| {
            let frame = RespFrame::command("HSET", args.clone());
            let mut buf = BytesMut::new();
            RespCodec.encode(frame, &mut buf).unwrap();
        });
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp_decode");

    let get_reply = {
        let mut buf = BytesMut::new();
        RespCodec
            .encode(RespFrame::BulkString(Bytes::from_static(b"some cached value")), &mut buf)
            .unwrap();
        buf
    };
    group.bench_function("bulk_string_reply", |b| {
        b.iter(|| {
            let mut buf = get_reply.clone();
            RespCodec.decode(&mut buf).unwrap()
        });
    });

    let array_reply = {
        let mut buf = BytesMut::new();
        let items = (0..50).map(|i| RespFrame::BulkString(Bytes::from(format!("member{i}")))).collect();
        RespCodec.encode(RespFrame::Array(items), &mut buf).unwrap();
        buf
    };
    group.bench_function("array_reply_50_elements", |b| {
        b.iter(|| {
            let mut buf = array_reply.clone();
            RespCodec.decode(&mut buf).unwrap()
        });
    });

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp_round_trip");

    group.bench_function("set_then_parse_ok", |b| {
        b.iter(|| {
            let mut request = encode_command("SET", &[b"my-distributed-map:entry:1", b"payload"]);
            let _ = RespCodec.decode(&mut request);

            let mut reply = BytesMut::new();
            RespCodec.encode(RespFrame::SimpleString("OK".to_string()), &mut reply).unwrap();
            RespCodec.decode(&mut reply).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_round_trip);
criterion_main!(benches);
