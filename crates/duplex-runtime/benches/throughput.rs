//! Pipe and socket throughput across write sizes
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use duplex_runtime::{pipe, socketpair, ChannelConfig, Task};

const CHUNKS: [usize; 4] = [64, 512, 4096, 32768];

fn config() -> ChannelConfig {
    ChannelConfig::new().default_buffer_size(64 * 1024)
}

fn ping_pong(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe-same-thread");
    let task = Task::standalone();
    for &chunk in &CHUNKS {
        let (rd, wr) = pipe(&config());
        let data = vec![0xa5u8; chunk];
        let mut buf = vec![0u8; chunk];
        group.throughput(Throughput::Bytes(chunk as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, _| {
            b.iter(|| {
                let n = wr.write(&task, &data).unwrap_or(0);
                let mut got = 0;
                while got < n {
                    got += rd.read(&task, &mut buf[got..n]).unwrap_or(n);
                }
            })
        });
    }
    group.finish();
}

fn streaming(c: &mut Criterion) {
    const TOTAL: usize = 1 << 20;
    let mut group = c.benchmark_group("socket-two-threads");
    group.throughput(Throughput::Bytes(TOTAL as u64));
    for &chunk in &CHUNKS {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let (s0, s1) = socketpair(&config());
                let reader = Arc::clone(&s1);
                let handle = thread::spawn(move || {
                    let task = Task::standalone();
                    let mut buf = vec![0u8; chunk];
                    let mut got = 0;
                    while got < TOTAL {
                        match reader.read(&task, &mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => got += n,
                        }
                    }
                    got
                });
                let task = Task::standalone();
                let data = vec![0x5au8; chunk];
                let mut sent = 0;
                while sent < TOTAL {
                    let want = chunk.min(TOTAL - sent);
                    match s0.write(&task, &data[..want]) {
                        Ok(n) => sent += n,
                        Err(_) => break,
                    }
                }
                handle.join().unwrap_or(0)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, ping_pong, streaming);
criterion_main!(benches);
