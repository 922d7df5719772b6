//! Connected Unix-domain stream sockets
//!
//! Each socket end reads from one channel and writes to the other, so a
//! socket pair is two channels crossed over. `sendmsg`/`recvmsg` carry
//! `SCM_RIGHTS` control messages in the Linux `cmsghdr` layout.

use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

use duplex_core::cmsg::{parse_rights, CmsgWriter};
use duplex_core::error::ChanResult;
use duplex_core::flags::{MsgFlags, PollEvents};
use duplex_core::kdebug;

use crate::config::ChannelConfig;
use crate::endpoint::Endpoint;
use crate::file::{BufferSide, FileKind, FileOps, OpenFile, RecvResult, Shutdown};
use crate::task::Task;

#[derive(Debug)]
pub struct SocketEnd {
    rx: Endpoint,
    tx: Endpoint,
}

impl SocketEnd {
    /// Endpoint this socket reads from
    pub fn rx(&self) -> &Endpoint {
        &self.rx
    }

    /// Endpoint this socket writes to
    pub fn tx(&self) -> &Endpoint {
        &self.tx
    }
}

/// Create a connected pair of stream sockets
pub fn socketpair(config: &ChannelConfig) -> (Arc<OpenFile>, Arc<OpenFile>) {
    let (a_rx, b_tx) = Endpoint::connect(config);
    let (b_rx, a_tx) = Endpoint::connect(config);
    (
        OpenFile::new(SocketEnd { rx: a_rx, tx: a_tx }),
        OpenFile::new(SocketEnd { rx: b_rx, tx: b_tx }),
    )
}

impl FileOps for SocketEnd {
    fn kind(&self) -> FileKind {
        FileKind::Socket
    }

    fn readv(&self, task: &Task, iov: &mut [IoSliceMut<'_>], nonblock: bool) -> ChanResult<usize> {
        self.rx.recv(task, iov, None, MsgFlags::empty(), nonblock)
    }

    fn writev(&self, task: &Task, iov: &[IoSlice<'_>], nonblock: bool) -> ChanResult<usize> {
        self.tx.send(task, iov, &[], MsgFlags::empty(), nonblock)
    }

    fn poll(&self) -> PollEvents {
        let mut events = self.rx.poll() | self.tx.poll();
        // HUP only once both directions are gone
        if !(self.rx.poll().contains(PollEvents::HUP) && self.tx.poll().contains(PollEvents::ERR)) {
            events.remove(PollEvents::HUP);
        }
        events
    }

    /// Both channels, or neither
    fn pass(&self) -> ChanResult<()> {
        self.rx.pass()?;
        if let Err(err) = self.tx.pass() {
            self.rx.unpass();
            return Err(err);
        }
        Ok(())
    }

    fn unpass(&self) {
        self.rx.unpass();
        self.tx.unpass();
    }

    fn sendmsg(
        &self,
        task: &Task,
        iov: &[IoSlice<'_>],
        control: &[u8],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        let groups = parse_rights(control)?;
        let rights = groups
            .iter()
            .map(|fds| fds.iter().map(|&fd| task.fds().get(fd)).collect::<ChanResult<Vec<_>>>())
            .collect::<ChanResult<Vec<_>>>()?;
        self.tx.send(task, iov, &rights, flags, nonblock)
    }

    fn recvmsg(
        &self,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        control: &mut [u8],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<RecvResult> {
        let mut writer = CmsgWriter::new(control);
        let bytes = self.rx.recv(task, iov, Some(&mut writer), flags, nonblock)?;
        Ok(RecvResult {
            bytes,
            control_len: writer.len(),
            flags: if writer.truncated() {
                MsgFlags::CTRUNC
            } else {
                MsgFlags::empty()
            },
        })
    }

    fn shutdown(&self, how: Shutdown) -> ChanResult<()> {
        kdebug!("shutdown {:?}", how);
        if matches!(how, Shutdown::Read | Shutdown::Both) {
            self.rx.close();
        }
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            self.tx.close();
        }
        Ok(())
    }

    fn sockatmark(&self) -> ChanResult<bool> {
        Ok(self.rx.sockatmark())
    }

    fn bytes_available(&self) -> ChanResult<usize> {
        Ok(self.rx.bytes_available())
    }

    fn capacity(&self, side: BufferSide) -> ChanResult<usize> {
        Ok(match side {
            BufferSide::Send => self.tx.capacity(),
            BufferSide::Receive => self.rx.capacity(),
        })
    }

    fn resize(&self, side: BufferSide, size: usize) -> ChanResult<usize> {
        Ok(match side {
            BufferSide::Send => self.tx.resize(size),
            BufferSide::Receive => self.rx.resize(size),
        })
    }

    fn set_sigpipe(&self, enabled: bool) -> ChanResult<()> {
        self.tx.channel().set_sigpipe(enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdtable::{DescriptorTable, FdTable, Reservation};
    use crate::pipe::pipe;
    use crate::signal::PendingSignals;
    use duplex_core::cmsg::{rights_space, CmsgBuilder, SOL_SOCKET};
    use duplex_core::error::ChanError;
    use duplex_core::flags::FdFlags;
    use std::thread;
    use std::time::Duration;

    fn config() -> ChannelConfig {
        ChannelConfig::new()
            .min_buffer_size(64)
            .default_buffer_size(4096)
            .wait_slice(Duration::from_millis(2))
    }

    fn process(max_fds: usize) -> (Task, Arc<FdTable>) {
        let fds = Arc::new(FdTable::new(max_fds));
        let task = Task::new(fds.clone(), Arc::new(PendingSignals::new()));
        (task, fds)
    }

    /// Fresh objects to pass around, each also open in `table`
    fn open_objects(table: &FdTable, count: usize) -> (Vec<Arc<OpenFile>>, Vec<i32>) {
        let objects: Vec<Arc<OpenFile>> = (0..count).map(|_| pipe(&config()).0).collect();
        let fds = objects
            .iter()
            .map(|f| table.insert(Arc::clone(f), FdFlags::empty()).unwrap())
            .collect();
        (objects, fds)
    }

    fn recvmsg(
        sock: &OpenFile,
        task: &Task,
        len: usize,
        control_space: usize,
        flags: MsgFlags,
    ) -> (Vec<u8>, Vec<Vec<i32>>, MsgFlags) {
        let mut buf = vec![0u8; len];
        let mut control = vec![0u8; control_space];
        let r = sock
            .recvmsg(task, &mut [IoSliceMut::new(&mut buf)], &mut control, flags)
            .unwrap();
        buf.truncate(r.bytes);
        let fds = parse_rights(&control[..r.control_len]).unwrap();
        (buf, fds, r.flags)
    }

    #[test]
    fn test_passed_descriptors_keep_identity() {
        let (sender, sender_fds) = process(64);
        let (receiver, receiver_fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, fds) = open_objects(&sender_fds, 3);

        let control = CmsgBuilder::new().rights(&fds).build();
        assert_eq!(
            s0.sendmsg(&sender, &[IoSlice::new(b"hi")], &control, MsgFlags::empty()),
            Ok(2)
        );
        for fd in &fds {
            sender_fds.close(*fd).unwrap();
        }

        let (data, got, flags) = recvmsg(&s1, &receiver, 8, rights_space(3), MsgFlags::empty());
        assert_eq!(data, b"hi");
        assert_eq!(flags, MsgFlags::empty());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].len(), 3);
        for (fd, object) in got[0].iter().zip(&objects) {
            assert!(Arc::ptr_eq(&receiver_fds.get(*fd).unwrap(), object));
            assert_eq!(Arc::strong_count(object), 2);
        }
        // Nothing in flight any more: the sending socket may itself travel
        assert_eq!(s0.pass(), Ok(()));
        s0.unpass();
    }

    #[test]
    fn test_truncated_control_releases_the_rest() {
        let (sender, sender_fds) = process(64);
        let (receiver, receiver_fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, fds) = open_objects(&sender_fds, 3);

        let control = CmsgBuilder::new().rights(&fds).build();
        s0.sendmsg(&sender, &[IoSlice::new(b"abc")], &control, MsgFlags::empty())
            .unwrap();
        for fd in &fds {
            sender_fds.close(*fd).unwrap();
        }

        let (data, got, flags) = recvmsg(&s1, &receiver, 8, rights_space(2), MsgFlags::empty());
        assert_eq!(data, b"abc");
        assert!(flags.contains(MsgFlags::CTRUNC));
        assert_eq!(got, vec![vec![0, 1]]);
        assert!(Arc::ptr_eq(&receiver_fds.get(0).unwrap(), &objects[0]));
        assert!(Arc::ptr_eq(&receiver_fds.get(1).unwrap(), &objects[1]));
        assert_eq!(Arc::strong_count(&objects[0]), 2);
        assert_eq!(Arc::strong_count(&objects[1]), 2);
        assert_eq!(Arc::strong_count(&objects[2]), 1);
        assert_eq!(receiver_fds.open_count(), 2);
        assert_eq!(s0.pass(), Ok(()));
        s0.unpass();
    }

    #[test]
    fn test_no_control_buffer_sets_ctrunc() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&fds, 1);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"z")], &control, MsgFlags::empty())
            .unwrap();
        fds.close(numbers[0]).unwrap();

        let (data, got, flags) = recvmsg(&s1, &task, 4, 0, MsgFlags::empty());
        assert_eq!(data, b"z");
        assert!(got.is_empty());
        assert!(flags.contains(MsgFlags::CTRUNC));
        assert_eq!(Arc::strong_count(&objects[0]), 1);
    }

    #[test]
    fn test_pass_endpoint_holding_descriptors_is_refused() {
        let (task, fds) = process(64);
        let (a0, a1) = socketpair(&config());
        let (x0, x1) = socketpair(&config());

        // x1 has a descriptor waiting to be read
        let (_objects, pending) = open_objects(&fds, 1);
        let control = CmsgBuilder::new().rights(&pending).build();
        x0.sendmsg(&task, &[IoSlice::new(b"p")], &control, MsgFlags::empty())
            .unwrap();

        assert_eq!(a0.write(&task, b"before"), Ok(6));
        let x1_fd = fds.insert(Arc::clone(&x1), FdFlags::empty()).unwrap();
        let refs = Arc::strong_count(&x1);
        let control = CmsgBuilder::new().rights(&[x1_fd]).build();
        assert_eq!(
            a0.sendmsg(&task, &[IoSlice::new(b"after")], &control, MsgFlags::empty()),
            Err(ChanError::PermissionDenied)
        );
        assert_eq!(Arc::strong_count(&x1), refs);

        // Channel A holds exactly what it held before the refused call
        assert!(!a1.sockatmark().unwrap());
        let (data, got, flags) = recvmsg(&a1, &task, 64, rights_space(4), MsgFlags::DONTWAIT);
        assert_eq!(data, b"before");
        assert!(got.is_empty());
        assert_eq!(flags, MsgFlags::empty());
        assert_eq!(a1.recv(&task, &mut [0u8; 8], MsgFlags::DONTWAIT), Err(ChanError::WouldBlock));
    }

    /// Table whose reservation shuts down the receiving socket first
    struct ShutdownOnReserve {
        inner: FdTable,
        socket: Arc<OpenFile>,
    }

    impl DescriptorTable for ShutdownOnReserve {
        fn reserve(&self, count: usize) -> ChanResult<Reservation> {
            self.socket.shutdown(Shutdown::Read)?;
            self.inner.reserve(count)
        }

        fn install(&self, reservation: Reservation, files: Vec<Arc<OpenFile>>, flags: FdFlags) -> Vec<i32> {
            self.inner.install(reservation, files, flags)
        }

        fn unreserve(&self, reservation: Reservation) {
            self.inner.unreserve(reservation)
        }

        fn get(&self, fd: i32) -> ChanResult<Arc<OpenFile>> {
            self.inner.get(fd)
        }

        fn close(&self, fd: i32) -> ChanResult<()> {
            self.inner.close(fd)
        }
    }

    #[test]
    fn test_shutdown_during_reservation_releases_once() {
        let (sender, sender_fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, fds) = open_objects(&sender_fds, 1);
        let control = CmsgBuilder::new().rights(&fds).build();
        s0.sendmsg(&sender, &[IoSlice::new(b"x")], &control, MsgFlags::empty())
            .unwrap();
        sender_fds.close(fds[0]).unwrap();
        assert_eq!(Arc::strong_count(&objects[0]), 2);

        let table = Arc::new(ShutdownOnReserve {
            inner: FdTable::new(64),
            socket: Arc::clone(&s1),
        });
        let receiver = Task::new(table.clone(), Arc::new(PendingSignals::new()));
        let (data, got, flags) = recvmsg(&s1, &receiver, 8, rights_space(1), MsgFlags::empty());
        assert!(data.is_empty());
        assert!(got.is_empty());
        assert_eq!(flags, MsgFlags::empty());
        assert_eq!(table.inner.open_count(), 0);
        assert_eq!(Arc::strong_count(&objects[0]), 1);
        assert_eq!(s0.pass(), Ok(()));
        s0.unpass();
    }

    #[test]
    fn test_control_only_receive_waits_for_delivery() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let mut cbuf = vec![0u8; rights_space(1)];
        assert_eq!(
            s1.recvmsg(&task, &mut [], &mut cbuf, MsgFlags::DONTWAIT).err(),
            Some(ChanError::WouldBlock)
        );

        let (objects, numbers) = open_objects(&fds, 1);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"d")], &control, MsgFlags::empty())
            .unwrap();
        fds.close(numbers[0]).unwrap();

        let r = s1.recvmsg(&task, &mut [], &mut cbuf, MsgFlags::DONTWAIT).unwrap();
        assert_eq!((r.bytes, r.control_len), (0, rights_space(1)));
        let got = parse_rights(&cbuf[..r.control_len]).unwrap();
        assert!(Arc::ptr_eq(&fds.get(got[0][0]).unwrap(), &objects[0]));

        // The normal byte of that message is still there
        assert_eq!(s1.read(&task, &mut [0u8; 4]), Ok(1));
        s0.shutdown(Shutdown::Write).unwrap();
        let r = s1.recvmsg(&task, &mut [], &mut cbuf, MsgFlags::DONTWAIT).unwrap();
        assert_eq!((r.bytes, r.control_len), (0, 0));
    }

    #[test]
    fn test_socket_cannot_carry_itself() {
        let (task, fds) = process(64);
        let (s0, _s1) = socketpair(&config());
        let own = fds.insert(Arc::clone(&s0), FdFlags::empty()).unwrap();
        let control = CmsgBuilder::new().rights(&[own]).build();
        assert_eq!(
            s0.sendmsg(&task, &[IoSlice::new(b"x")], &control, MsgFlags::empty()),
            Err(ChanError::PermissionDenied)
        );
        assert_eq!(s0.bytes_available(), Ok(0));
    }

    #[test]
    fn test_peek_skips_control_and_keeps_data() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&fds, 1);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"peek")], &control, MsgFlags::empty())
            .unwrap();
        assert!(s1.sockatmark().unwrap());

        let (data, got, _) = recvmsg(&s1, &task, 8, rights_space(1), MsgFlags::PEEK);
        assert_eq!(data, b"peek");
        assert!(got.is_empty());
        assert!(s1.sockatmark().unwrap());

        let (data, got, _) = recvmsg(&s1, &task, 8, rights_space(1), MsgFlags::empty());
        assert_eq!(data, b"peek");
        assert!(Arc::ptr_eq(&fds.get(got[0][0]).unwrap(), &objects[0]));
        assert!(!s1.sockatmark().unwrap());
    }

    #[test]
    fn test_waitall_stops_at_control_boundary() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (_objects, numbers) = open_objects(&fds, 1);
        s0.write(&task, b"ab").unwrap();
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"cd")], &control, MsgFlags::empty())
            .unwrap();
        assert_eq!(s1.bytes_available(), Ok(2));

        let (data, got, flags) = recvmsg(&s1, &task, 4, rights_space(1), MsgFlags::WAITALL);
        assert_eq!(data, b"ab");
        assert!(got.is_empty());
        assert_eq!(flags, MsgFlags::empty());

        let (data, got, _) = recvmsg(&s1, &task, 4, rights_space(1), MsgFlags::WAITALL);
        assert_eq!(data, b"cd");
        assert_eq!(got[0].len(), 1);
    }

    #[test]
    fn test_plain_read_discards_control() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&fds, 2);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"data")], &control, MsgFlags::empty())
            .unwrap();
        for fd in &numbers {
            fds.close(*fd).unwrap();
        }
        let mut buf = [0u8; 8];
        assert_eq!(s1.read(&task, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"data");
        for object in &objects {
            assert_eq!(Arc::strong_count(object), 1);
        }
    }

    #[test]
    fn test_dropping_sockets_releases_descriptors_in_flight() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&fds, 2);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"x")], &control, MsgFlags::empty())
            .unwrap();
        for fd in &numbers {
            fds.close(*fd).unwrap();
        }
        assert_eq!(Arc::strong_count(&objects[0]), 2);
        drop(s0);
        drop(s1);
        for object in &objects {
            assert_eq!(Arc::strong_count(object), 1);
        }
    }

    #[test]
    fn test_full_descriptor_table_discards_control() {
        let (sender, sender_fds) = process(64);
        let (receiver, _receiver_fds) = process(0);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&sender_fds, 1);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&sender, &[IoSlice::new(b"kept")], &control, MsgFlags::empty())
            .unwrap();
        sender_fds.close(numbers[0]).unwrap();

        let mut buf = [0u8; 8];
        let mut cbuf = vec![0u8; rights_space(1)];
        assert_eq!(
            s1.recvmsg(&receiver, &mut [IoSliceMut::new(&mut buf)], &mut cbuf, MsgFlags::empty()),
            Err(ChanError::TooManyDescriptors)
        );
        assert_eq!(Arc::strong_count(&objects[0]), 1);
        assert!(!s1.sockatmark().unwrap());
        assert_eq!(s1.read(&receiver, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"kept");
    }

    #[test]
    fn test_cmsg_cloexec_sets_fd_flags() {
        let (task, fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (_objects, numbers) = open_objects(&fds, 1);
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&task, &[IoSlice::new(b"e")], &control, MsgFlags::empty())
            .unwrap();
        let flags = MsgFlags::CMSG_CLOEXEC | MsgFlags::CMSG_CLOFORK;
        let (_, got, _) = recvmsg(&s1, &task, 4, rights_space(1), flags);
        assert_eq!(fds.flags(got[0][0]), Ok(FdFlags::CLOEXEC | FdFlags::CLOFORK));
    }

    #[test]
    fn test_bad_control_is_rejected_before_the_channel() {
        let (task, _fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let bogus = CmsgBuilder::new().raw(SOL_SOCKET, 99, &[0u8; 4]).build();
        assert!(matches!(
            s0.sendmsg(&task, &[IoSlice::new(b"x")], &bogus, MsgFlags::empty()),
            Err(ChanError::InvalidArgument(_))
        ));
        let unknown_fd = CmsgBuilder::new().rights(&[42]).build();
        assert_eq!(
            s0.sendmsg(&task, &[IoSlice::new(b"x")], &unknown_fd, MsgFlags::empty()),
            Err(ChanError::BadDescriptor)
        );
        assert_eq!(s1.bytes_available(), Ok(0));
    }

    #[test]
    fn test_control_larger_than_buffer() {
        let small = config().default_buffer_size(64);
        let (task, fds) = process(64);
        let (s0, _s1) = socketpair(&small);
        let (_objects, numbers) = open_objects(&fds, 6);
        let control = CmsgBuilder::new().rights(&numbers).build();
        assert_eq!(
            s0.sendmsg(&task, &[IoSlice::new(b"x")], &control, MsgFlags::DONTWAIT),
            Err(ChanError::MessageTooLarge)
        );
    }

    #[test]
    fn test_shutdown_directions() {
        let (task, _fds) = process(8);
        let (s0, s1) = socketpair(&config().sigpipe(false));
        s0.write(&task, b"last").unwrap();
        s0.shutdown(Shutdown::Write).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(s1.read(&task, &mut buf), Ok(4));
        assert_eq!(s1.read(&task, &mut buf), Ok(0));
        assert_eq!(s0.write(&task, b"more"), Err(ChanError::BrokenPipe));

        // s1 can still talk to s0
        assert_eq!(s1.write(&task, b"back"), Ok(4));
        assert_eq!(s0.read(&task, &mut buf), Ok(4));

        s0.shutdown(Shutdown::Read).unwrap();
        assert_eq!(s1.write(&task, b"gone"), Err(ChanError::BrokenPipe));
        assert!(s0.poll().contains(PollEvents::HUP) || s1.poll().contains(PollEvents::ERR));
    }

    #[test]
    fn test_buffer_sizes_per_direction() {
        let (s0, s1) = socketpair(&config());
        assert_eq!(s0.resize(BufferSide::Send, 1024), Ok(1024));
        assert_eq!(s1.capacity(BufferSide::Receive), Ok(1024));
        assert_eq!(s1.capacity(BufferSide::Send), Ok(4096));
        // A reader's request is recorded, not applied
        assert_eq!(s1.resize(BufferSide::Receive, 64), Ok(1024));
    }

    #[test]
    fn test_descriptor_crosses_threads() {
        let (sender, sender_fds) = process(64);
        let (receiver, receiver_fds) = process(64);
        let (s0, s1) = socketpair(&config());
        let (objects, numbers) = open_objects(&sender_fds, 1);

        let handle = thread::spawn(move || {
            let (data, got, _) = recvmsg(&s1, &receiver, 4, rights_space(1), MsgFlags::empty());
            (data, receiver_fds.get(got[0][0]).unwrap())
        });
        thread::sleep(Duration::from_millis(10));
        let control = CmsgBuilder::new().rights(&numbers).build();
        s0.sendmsg(&sender, &[IoSlice::new(b"fd")], &control, MsgFlags::empty())
            .unwrap();
        let (data, file) = handle.join().unwrap();
        assert_eq!(data, b"fd");
        assert!(Arc::ptr_eq(&file, &objects[0]));
    }
}
