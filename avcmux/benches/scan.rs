use avcmux::bitstream::annex_b_to_length_prefixed;
use avcmux::NalScanner;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

criterion_group!(benches, scan);
criterion_main!(benches);

const NAL_COUNT: usize = 1000;
const NAL_LEN: usize = 1000;

fn synthetic_stream() -> Vec<u8> {
    let mut stream = Vec::with_capacity(NAL_COUNT * (NAL_LEN + 4));
    for nal_idx in 0..NAL_COUNT {
        stream.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9a]);
        stream.extend((2..NAL_LEN).map(|byte_idx| ((nal_idx + byte_idx) % 0xfe + 1) as u8));
    }
    stream
}

pub fn scan(c: &mut Criterion) {
    let stream = synthetic_stream();
    let mut group = c.benchmark_group("annex_b");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("scan", |b| {
        b.iter(|| NalScanner.scan(black_box(&stream)).map(|nal| nal.len()).sum::<usize>())
    });
    group.bench_function("to_length_prefixed", |b| {
        b.iter(|| annex_b_to_length_prefixed(black_box(&stream)).map(|data| data.len()))
    });
    group.finish();
}
