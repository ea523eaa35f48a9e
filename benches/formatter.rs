use bytes::Bytes;
use criterion::*;
use castle::prelude::protocol;
use castle::prelude::protocol::{KafkaRequest, RequestFormatter};

fn criterion_benchmark(c: &mut Criterion) {
    let formatter = RequestFormatter::new(Some("castle".to_string()));

    let mut produce_req = protocol::ProduceRequest::new(1, 1000);
    for partition in 0..4 {
        produce_req.add(
            "purchases",
            partition,
            Some(Bytes::from_static(
                b"a-reasonably-sized-pretend-record-batch-of-some-length",
            )),
        );
    }
    produce_req.set_version(7);

    let mut buffer = Vec::with_capacity(1 << 10);
    formatter.append_request(&mut buffer, &produce_req, 0).unwrap();
    let frame_len = buffer.len();

    let mut encoder_group = c.benchmark_group("formatter");
    encoder_group.throughput(Throughput::Bytes(frame_len as u64));
    encoder_group.bench_with_input(
        BenchmarkId::new("append_request", frame_len),
        &produce_req,
        |b, req| {
            b.iter(|| {
                buffer.clear();
                formatter.append_request(&mut buffer, req, 0).unwrap();
            });
        },
    );
    encoder_group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
