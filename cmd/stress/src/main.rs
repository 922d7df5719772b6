//! Stress test - many streams with descriptor passing
//!
//! Each pair of threads shares a socket pair. The producer writes a known
//! byte pattern in irregular chunks and every few writes attaches the read
//! end of a fresh pipe holding its sequence number. The consumer checks
//! every byte and every passed pipe.
//!
//! Usage: `stress [pairs] [megabytes-per-pair]`

use duplex::{kinfo, kwarn};
use duplex::{
    parse_rights, rights_space, ChanError, CmsgBuilder, DescriptorTable, FdFlags, FdTable,
    MsgFlags, OpenFile, PendingSignals, Shutdown, Task,
};
use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const PATTERN_MOD: u64 = 251;
const PASS_EVERY: u64 = 16;
const MAX_CHUNK: usize = 9000;

fn new_task() -> (Task, Arc<FdTable>) {
    let fds = Arc::new(FdTable::default());
    let task = Task::new(fds.clone(), Arc::new(PendingSignals::new()));
    (task, fds)
}

/// Deterministic chunk sizes
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn produce(sock: Arc<OpenFile>, total: u64, seed: u64) -> Result<u64, ChanError> {
    let (task, fds) = new_task();
    let mut rng = Lcg(seed);
    let mut chunk = vec![0u8; MAX_CHUNK];
    let mut pos = 0u64;
    let mut writes = 0u64;
    let mut passed = 0u64;

    while pos < total {
        let len = (1 + rng.next() as usize % MAX_CHUNK).min((total - pos) as usize);
        for (i, b) in chunk[..len].iter_mut().enumerate() {
            *b = ((pos + i as u64) % PATTERN_MOD) as u8;
        }
        writes += 1;
        let n = if writes % PASS_EVERY == 0 {
            let (rd, wr) = duplex::pipe();
            wr.write(&task, &passed.to_le_bytes())?;
            let fd = fds.insert(rd, FdFlags::empty())?;
            let control = CmsgBuilder::new().rights(&[fd]).build();
            let n = sock.sendmsg(&task, &[IoSlice::new(&chunk[..len])], &control, MsgFlags::empty())?;
            fds.close(fd)?;
            passed += 1;
            n
        } else {
            sock.write(&task, &chunk[..len])?
        };
        pos += n as u64;
    }
    sock.shutdown(Shutdown::Write)?;
    Ok(passed)
}

fn consume(sock: Arc<OpenFile>, verified: Arc<AtomicU64>) -> Result<u64, String> {
    let (task, fds) = new_task();
    let mut buf = vec![0u8; MAX_CHUNK];
    let mut control = vec![0u8; rights_space(4)];
    let mut pos = 0u64;
    let mut next_seq = 0u64;

    loop {
        let got = sock
            .recvmsg(&task, &mut [IoSliceMut::new(&mut buf)], &mut control, MsgFlags::empty())
            .map_err(|e| e.to_string())?;
        let groups = parse_rights(&control[..got.control_len]).map_err(|e| e.to_string())?;
        for fd in groups.into_iter().flatten() {
            let file = fds.get(fd).map_err(|e| e.to_string())?;
            let mut seq = [0u8; 8];
            file.read(&task, &mut seq).map_err(|e| e.to_string())?;
            let seq = u64::from_le_bytes(seq);
            if seq != next_seq {
                return Err(format!("passed pipe {} arrived, expected {}", seq, next_seq));
            }
            next_seq += 1;
            fds.close(fd).map_err(|e| e.to_string())?;
        }
        if got.bytes == 0 && got.control_len == 0 {
            break;
        }
        for &b in &buf[..got.bytes] {
            if b != (pos % PATTERN_MOD) as u8 {
                return Err(format!("byte {} corrupted", pos));
            }
            pos += 1;
        }
        verified.fetch_add(got.bytes as u64, Ordering::Relaxed);
    }
    if fds.open_count() != 0 {
        kwarn!("{} descriptors left open", fds.open_count());
    }
    Ok(next_seq)
}

fn main() {
    println!("=== Duplex Stress Test ===\n");

    let pairs: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);
    let megabytes: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(16);

    println!("{} stream pairs, {} MiB each", pairs, megabytes);
    duplex::config().print();

    let verified = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(pairs);

    for p in 0..pairs {
        let (a, b) = duplex::socketpair();
        let producer = thread::spawn(move || produce(a, megabytes << 20, p as u64 + 1));
        let counter = verified.clone();
        let consumer = thread::spawn(move || consume(b, counter));
        handles.push((p, producer, consumer));
    }

    let mut failures = 0;
    for (p, producer, consumer) in handles {
        match (producer.join(), consumer.join()) {
            (Ok(Ok(sent)), Ok(Ok(got))) if sent == got => {
                kinfo!("pair {}: {} descriptors passed", p, got);
            }
            (Ok(Ok(sent)), Ok(Ok(got))) => {
                println!("pair {}: sent {} descriptors, received {}", p, sent, got);
                failures += 1;
            }
            (Ok(Err(e)), _) => {
                println!("pair {}: producer failed: {}", p, e);
                failures += 1;
            }
            (_, Ok(Err(e))) => {
                println!("pair {}: consumer failed: {}", p, e);
                failures += 1;
            }
            _ => {
                println!("pair {}: thread panicked", p);
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let total = verified.load(Ordering::Relaxed);
    println!("\n=== Results ===");
    println!("Bytes verified: {}", total);
    println!("Elapsed:        {:?}", elapsed);
    println!(
        "Throughput:     {:.1} MiB/s",
        total as f64 / (1u64 << 20) as f64 / elapsed.as_secs_f64()
    );
    println!("Failures:       {}", failures);
    if failures > 0 {
        std::process::exit(1);
    }
}
