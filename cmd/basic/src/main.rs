//! Basic duplex example
//!
//! Pipe round trip, then a socket pair passing an open pipe end from one
//! task to another.
//!
//! # Environment Variables
//!
//! - `DUPLEX_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `DUPLEX_FLUSH_EPRINT=1` - Flush debug output immediately

use duplex::{kdebug, kinfo};
use duplex::{
    parse_rights, rights_space, ChanError, CmsgBuilder, DescriptorTable, FdFlags, FdTable,
    MsgFlags, PendingSignals, PollEvents, Task,
};
use std::error::Error;
use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;
use std::thread;

// DUPLEX_LOG_LEVEL=debug cargo run -p duplex-basic
fn main() -> Result<(), Box<dyn Error>> {
    println!("=== Duplex Basic Example ===\n");

    duplex::config().print();

    // Pipe round trip
    let task = Task::standalone();
    let (rd, wr) = duplex::pipe();
    let n = wr.write(&task, b"hello through a pipe")?;
    kinfo!("wrote {} bytes, poll(reader) = {:?}", n, rd.poll());
    let mut buf = [0u8; 64];
    let got = rd.read(&task, &mut buf)?;
    println!("pipe: {:?}", String::from_utf8_lossy(&buf[..got]));
    drop(wr);
    let eof = rd.read(&task, &mut buf)?;
    println!("pipe: read {} after writer closed (poll = {:?})\n", eof, rd.poll());

    // Descriptor passing between two tasks, each with its own table
    let (a, b) = duplex::socketpair();
    let sender_fds = Arc::new(FdTable::default());
    let sender = Task::new(sender_fds.clone(), Arc::new(PendingSignals::new()));

    let receiver = thread::spawn(move || -> Result<String, ChanError> {
        let fds = Arc::new(FdTable::default());
        let task = Task::new(fds.clone(), Arc::new(PendingSignals::new()));
        let mut data = [0u8; 32];
        let mut control = vec![0u8; rights_space(1)];
        let got = b.recvmsg(&task, &mut [IoSliceMut::new(&mut data)], &mut control, MsgFlags::empty())?;
        kdebug!("recvmsg: {} bytes, {} control bytes, flags {:?}", got.bytes, got.control_len, got.flags);

        let received = parse_rights(&control[..got.control_len])?;
        let fd = received
            .first()
            .and_then(|group| group.first())
            .copied()
            .ok_or(ChanError::BadDescriptor)?;
        let file = fds.get(fd)?;
        let mut note = [0u8; 64];
        let n = file.read(&task, &mut note)?;
        fds.close(fd)?;
        Ok(format!(
            "{:?} + fd {} carrying {:?}",
            String::from_utf8_lossy(&data[..got.bytes]),
            fd,
            String::from_utf8_lossy(&note[..n])
        ))
    });

    let (inner_rd, inner_wr) = duplex::pipe();
    inner_wr.write(&sender, b"a note inside the passed pipe")?;
    drop(inner_wr);
    let fd = sender_fds.insert(inner_rd, FdFlags::empty())?;
    let control = CmsgBuilder::new().rights(&[fd]).build();
    a.sendmsg(&sender, &[IoSlice::new(b"here is a pipe")], &control, MsgFlags::empty())?;
    sender_fds.close(fd)?;
    kinfo!("sent fd {}, writable = {}", fd, a.poll().contains(PollEvents::OUT));

    match receiver.join() {
        Ok(result) => println!("socket: {}", result?),
        Err(_) => println!("socket: receiver panicked"),
    }

    println!("\n=== Done ===");
    Ok(())
}
