//! Flag sets for send/receive calls, poll readiness and descriptor state

use bitflags::bitflags;

bitflags! {
    /// Per-call flags for `send`/`recv`/`sendmsg`/`recvmsg`.
    ///
    /// Bit values match Linux so a syscall layer can pass them through.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MsgFlags: u32 {
        const PEEK = libc::MSG_PEEK as u32;
        const CTRUNC = libc::MSG_CTRUNC as u32;
        const DONTWAIT = libc::MSG_DONTWAIT as u32;
        const WAITALL = libc::MSG_WAITALL as u32;
        const NOSIGNAL = libc::MSG_NOSIGNAL as u32;
        const CMSG_CLOEXEC = libc::MSG_CMSG_CLOEXEC as u32;
        /// Not defined by libc; lives in an otherwise unused high bit.
        const CMSG_CLOFORK = 1 << 31;
    }
}

impl MsgFlags {
    /// Flags a caller may pass to a send operation
    pub const SEND_MASK: MsgFlags = MsgFlags::DONTWAIT.union(MsgFlags::NOSIGNAL);

    /// Flags a caller may pass to a receive operation
    pub const RECV_MASK: MsgFlags = MsgFlags::PEEK
        .union(MsgFlags::DONTWAIT)
        .union(MsgFlags::WAITALL)
        .union(MsgFlags::CMSG_CLOEXEC)
        .union(MsgFlags::CMSG_CLOFORK);

    /// Descriptor flags requested for descriptors received with these flags
    pub fn fd_flags(self) -> FdFlags {
        let mut flags = FdFlags::empty();
        if self.contains(MsgFlags::CMSG_CLOEXEC) {
            flags |= FdFlags::CLOEXEC;
        }
        if self.contains(MsgFlags::CMSG_CLOFORK) {
            flags |= FdFlags::CLOFORK;
        }
        flags
    }
}

bitflags! {
    /// Readiness bits reported by `poll`
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PollEvents: u16 {
        const IN = libc::POLLIN as u16;
        const OUT = libc::POLLOUT as u16;
        const ERR = libc::POLLERR as u16;
        const HUP = libc::POLLHUP as u16;
    }
}

bitflags! {
    /// Per-descriptor flags kept in a descriptor table slot
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct FdFlags: u8 {
        const CLOEXEC = 1 << 0;
        const CLOFORK = 1 << 1;
    }
}

bitflags! {
    /// Per-open-file status flags shared by every descriptor referring to it
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct StatusFlags: u8 {
        const NONBLOCK = 1 << 0;
    }
}
