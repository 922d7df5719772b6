//! Channel engine
//!
//! One `Channel` carries bytes in a single direction between a reading and
//! a writing endpoint. Pipes use one; a socket pair uses two.
//!
//! # Locking
//!
//! - `state` (mutex): the segment queue and the open/closed flags. Held
//!   for every queue mutation by either side.
//! - `pass` (spinlock): the `passing`/`passed` pair. Taken on its own, or
//!   while holding some channel's `state`, never the other way round.
//!
//! The descriptor table is only called with `state` released. A receive
//! that needs table slots reserves them unlocked and re-checks that the
//! front segment did not change meanwhile.
//!
//! # Descriptor passing
//!
//! A passed file sits in the ring as an `OwnershipToken` handle inside an
//! `SCM_RIGHTS` record. Every handle leaves the ring exactly once, either
//! into a receiver's descriptor table or back through `release`.

use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use duplex_core::cmsg::{decode_records, encode_handle, rights_record_size, CmsgWriter, Record, RecordHeader};
use duplex_core::constants::SIGPIPE;
use duplex_core::error::{ChanError, ChanResult, Transfer};
use duplex_core::flags::{MsgFlags, PollEvents};
use duplex_core::segment::{SegmentQueue, SEGMENT_HEADER_SIZE};
use duplex_core::spinlock::SpinLock;
use duplex_core::token::OwnershipToken;
use duplex_core::{kdebug, ktrace, kwarn};

use crate::config::ChannelConfig;
use crate::fdtable::Reservation;
use crate::file::{iov_len, iov_len_mut, OpenFile};
use crate::pledge::{Pledges, Role};
use crate::task::Task;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PassCounters {
    /// Descriptors in flight on this channel
    passing: u32,
    /// Times an endpoint of this channel is itself in flight elsewhere
    passed: u32,
}

struct ChannelState {
    queue: SegmentQueue,
    any_reading: bool,
    any_writing: bool,
    /// Last size asked for by the reading side
    requested_read_size: usize,
    /// Bumped whenever the front segment is consumed or the ring drained
    read_generation: u64,
}

/// Control data taken off the ring, settled once the lock is dropped
struct Delivery {
    handles: Vec<u64>,
    reservation: Option<Reservation>,
    truncated: bool,
}

pub struct Channel {
    state: Mutex<ChannelState>,
    data_ready: Condvar,
    space_ready: Condvar,
    pass: SpinLock<PassCounters>,
    pledges: Pledges,
    sigpipe: AtomicBool,
    min_size: usize,
    max_size: usize,
    wait_slice: Duration,
    yield_hint: bool,
}

impl Channel {
    pub fn new(config: &ChannelConfig) -> Arc<Self> {
        if let Err(err) = config.validate() {
            kwarn!("{}, using normalised bounds {:?}", err, config.size_bounds());
        }
        let (min_size, max_size) = config.size_bounds();
        let size = config.clamp_size(config.default_buffer_size);
        Arc::new(Self {
            state: Mutex::new(ChannelState {
                queue: SegmentQueue::new(size),
                any_reading: true,
                any_writing: true,
                requested_read_size: size,
                read_generation: 0,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            pass: SpinLock::new(PassCounters::default()),
            pledges: Pledges::new(),
            sigpipe: AtomicBool::new(config.sigpipe),
            min_size,
            max_size,
            wait_slice: config.wait_slice,
            yield_hint: config.yield_hint,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn capacity(&self) -> usize {
        self.lock().queue.size()
    }

    /// Ring bytes in use, headers and control records included
    pub fn used(&self) -> usize {
        self.lock().queue.used()
    }

    /// Normal bytes the next read can return without blocking
    pub fn bytes_available(&self) -> usize {
        let state = self.lock();
        readable_spans(&state.queue).iter().map(|&(_, len)| len).sum()
    }

    pub fn requested_read_size(&self) -> usize {
        self.lock().requested_read_size
    }

    pub fn any_reading(&self) -> bool {
        self.lock().any_reading
    }

    pub fn any_writing(&self) -> bool {
        self.lock().any_writing
    }

    /// Next unread byte begins a segment carrying control data
    pub fn sockatmark(&self) -> bool {
        self.lock().queue.front().map_or(false, |h| h.has_ancillary())
    }

    pub fn set_sigpipe(&self, enabled: bool) {
        self.sigpipe.store(enabled, Ordering::Relaxed);
    }

    pub fn sigpipe_enabled(&self) -> bool {
        self.sigpipe.load(Ordering::Relaxed)
    }

    pub fn pledges(&self) -> &Pledges {
        &self.pledges
    }

    pub fn poll(&self, role: Role) -> PollEvents {
        let state = self.lock();
        let mut events = PollEvents::empty();
        match role {
            Role::Read => {
                if !state.queue.is_empty() {
                    events |= PollEvents::IN;
                }
                if !state.any_writing {
                    events |= PollEvents::HUP;
                }
            }
            Role::Write => {
                if state.queue.writable(false) > 0 {
                    events |= PollEvents::OUT;
                }
                if !state.any_reading {
                    events |= PollEvents::ERR;
                }
            }
        }
        events
    }

    // ------------------------------------------------------------------
    // Pass accounting
    // ------------------------------------------------------------------

    /// `(passing, passed)` snapshot
    pub fn pass_counts(&self) -> (u32, u32) {
        let counters = *self.pass.lock();
        (counters.passing, counters.passed)
    }

    /// An endpoint of this channel is about to travel on another channel.
    ///
    /// Refused while this channel holds descriptors in flight: the
    /// endpoint would end up owning a reference to itself.
    pub fn mark_passed(&self) -> ChanResult<()> {
        let mut counters = self.pass.lock();
        if counters.passing > 0 {
            return Err(ChanError::PermissionDenied);
        }
        counters.passed += 1;
        Ok(())
    }

    pub fn unmark_passed(&self) {
        let mut counters = self.pass.lock();
        counters.passed = counters.passed.saturating_sub(1);
    }

    fn begin_passing(&self) -> ChanResult<()> {
        let mut counters = self.pass.lock();
        if counters.passed > 0 {
            return Err(ChanError::PermissionDenied);
        }
        counters.passing += 1;
        Ok(())
    }

    fn end_passing(&self) {
        let mut counters = self.pass.lock();
        counters.passing = counters.passing.saturating_sub(1);
    }

    /// Account for one file about to be written on this channel
    fn pass_one(&self, file: &OpenFile) -> ChanResult<()> {
        self.begin_passing()?;
        if let Err(err) = file.pass() {
            self.end_passing();
            return Err(err);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Write `iov` preceded by one `SCM_RIGHTS` record per non-empty group.
    ///
    /// All control data goes in under one lock hold together with at
    /// least the first normal byte. A short count is returned as soon as
    /// the ring fills after some normal bytes went in.
    pub fn send(
        &self,
        task: &Task,
        iov: &[IoSlice<'_>],
        rights: &[Vec<Arc<OpenFile>>],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        let total = iov_len(iov);
        let control_bytes: usize = rights
            .iter()
            .filter(|group| !group.is_empty())
            .map(|group| rights_record_size(group.len()))
            .sum();
        if total == 0 && control_bytes == 0 {
            return Ok(0);
        }
        let required = if control_bytes > 0 {
            control_bytes + SEGMENT_HEADER_SIZE + usize::from(total > 0)
        } else {
            0
        };

        let _pledge = (!nonblock).then(|| self.pledges.pledge(Role::Write, task.id()));
        let mut state = self.lock();
        let mut progress = Transfer::new();
        let mut control_done = control_bytes == 0;
        let mut yielded = false;

        loop {
            if !state.any_reading {
                drop(state);
                self.broken_pipe(task, flags);
                return progress.fail(ChanError::BrokenPipe);
            }
            if !control_done {
                if required > state.queue.size() {
                    return Err(ChanError::MessageTooLarge);
                }
                if state.queue.free() >= required {
                    let before = state.queue.used();
                    let result = self.enqueue_control(&mut state.queue, rights);
                    if state.queue.used() != before {
                        self.data_ready.notify_all();
                    }
                    result?;
                    control_done = true;
                }
            }
            if control_done {
                let n = enqueue_normal(&mut state.queue, iov, progress.done());
                if n > 0 {
                    progress.add(n);
                    self.data_ready.notify_all();
                }
                if progress.done() > 0 || total == 0 {
                    break;
                }
            }
            state = match self.wait(state, Role::Write, task, nonblock, &mut yielded) {
                Ok(guard) => guard,
                Err(err) => return progress.fail(err),
            };
        }

        ktrace!("send {} of {} bytes, {} control bytes", progress.done(), total, control_bytes);
        Ok(progress.done())
    }

    fn enqueue_control(&self, queue: &mut SegmentQueue, rights: &[Vec<Arc<OpenFile>>]) -> ChanResult<()> {
        rights
            .iter()
            .filter(|group| !group.is_empty())
            .try_for_each(|group| self.enqueue_rights(queue, group))
    }

    /// Write one `SCM_RIGHTS` record, or nothing at all
    fn enqueue_rights(&self, queue: &mut SegmentQueue, files: &[Arc<OpenFile>]) -> ChanResult<()> {
        let mark = queue.mark();
        queue.enqueue(&RecordHeader::rights(files.len()).encode(), true);

        let mut tokens: Vec<(OwnershipToken<OpenFile>, &Arc<OpenFile>)> = Vec::with_capacity(files.len());
        for file in files {
            if let Err(err) = self.pass_one(file) {
                kwarn!(
                    "refusing to pass descriptor {} of {}: {}",
                    tokens.len(),
                    files.len(),
                    err
                );
                for (token, file) in tokens.drain(..) {
                    file.unpass();
                    self.end_passing();
                    drop(token);
                }
                let removed = queue.unenqueue(mark);
                ktrace!("rolled back {} control bytes", removed);
                return Err(ChanError::PermissionDenied);
            }
            let token = OwnershipToken::mint(Arc::clone(file));
            queue.enqueue(&encode_handle(token.handle()), true);
            tokens.push((token, file));
        }

        // The ring owns the references from here on
        for (token, _) in tokens {
            let _ = token.into_raw();
        }
        Ok(())
    }

    fn broken_pipe(&self, task: &Task, flags: MsgFlags) {
        if self.sigpipe_enabled() && !flags.contains(MsgFlags::NOSIGNAL) {
            task.signals().raise(SIGPIPE);
        }
        kdebug!("write on channel with no reader");
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Read into `iov`, delivering passed files into `control` when given.
    ///
    /// Control data is drained first and only at the start of a call. A
    /// read never continues into a later segment that carries control
    /// data, `WAITALL` included. Without `control`, control data met at
    /// the front is discarded and its files released.
    pub fn recv(
        &self,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        control: Option<&mut CmsgWriter<'_>>,
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        let total = iov_len_mut(iov);
        if total == 0 && control.is_none() {
            return Ok(0);
        }

        let _pledge = (!nonblock).then(|| self.pledges.pledge(Role::Read, task.id()));
        let mut state = self.lock();
        let mut yielded = false;

        if flags.contains(MsgFlags::PEEK) {
            return self.peek(state, task, iov, nonblock, &mut yielded);
        }

        let waitall = flags.contains(MsgFlags::WAITALL);
        let mut progress = Transfer::new();
        let mut delivery: Option<Delivery> = None;

        loop {
            if !state.any_reading {
                // Read side shut down meanwhile; the ring was drained by `close`
                break;
            }
            let front = match state.queue.front() {
                Some(front) => front,
                None => {
                    // A control-only call is satisfied by a delivery alone
                    let satisfied = (total > 0 && progress.done() == total)
                        || (progress.done() > 0 && !waitall);
                    if satisfied || delivery.is_some() || !state.any_writing {
                        break;
                    }
                    state = match self.wait(state, Role::Read, task, nonblock, &mut yielded) {
                        Ok(guard) => guard,
                        Err(err) => return progress.fail(err),
                    };
                    continue;
                }
            };

            if front.has_ancillary() {
                if progress.done() > 0 || delivery.is_some() {
                    break;
                }
                let generation = state.read_generation;
                let mut region = vec![0u8; front.ancillary_len as usize];
                state.queue.copy_out(SEGMENT_HEADER_SIZE, &mut region);
                let records = decode_records(&region);
                let handles: Vec<u64> = records.iter().flat_map(Record::handles).collect();
                let foreign = records.iter().any(|r| !r.header.is_rights());
                let deliverable = control
                    .as_ref()
                    .map_or(0, |writer| writer.rights_capacity().min(handles.len()));

                let reservation = if deliverable > 0 {
                    drop(state);
                    let reserved = task.fds().reserve(deliverable);
                    state = self.lock();
                    let unchanged = state.any_reading
                        && state.read_generation == generation
                        && state.queue.front() == Some(front);
                    if !unchanged {
                        // Consumed or drained meanwhile
                        if let Ok(reservation) = reserved {
                            drop(state);
                            task.fds().unreserve(reservation);
                            state = self.lock();
                        }
                        continue;
                    }
                    Some(reserved)
                } else {
                    None
                };

                state.queue.dequeue(None, region.len());
                state.read_generation += 1;
                self.space_ready.notify_all();

                let reservation = match reservation {
                    None => None,
                    Some(Ok(reservation)) => Some(reservation),
                    Some(Err(err)) => {
                        drop(state);
                        kwarn!("dropping {} passed descriptors: {}", handles.len(), err);
                        self.release(handles);
                        return Err(err);
                    }
                };
                delivery = Some(Delivery {
                    truncated: foreign || deliverable < handles.len(),
                    handles,
                    reservation,
                });
                continue;
            }

            let n = match cursor_mut(iov, progress.done()) {
                Some(dst) => {
                    let n = dst.len().min(front.normal_len as usize);
                    state.queue.dequeue(Some(&mut dst[..n]), n);
                    n
                }
                None => break,
            };
            progress.add(n);
            state.read_generation += 1;
            self.space_ready.notify_all();
            if progress.done() == total {
                break;
            }
        }
        drop(state);

        if let Some(delivery) = delivery {
            self.deliver(task, delivery, control, flags);
        }
        ktrace!("recv {} of {} bytes", progress.done(), total);
        Ok(progress.done())
    }

    /// Copy normal bytes without consuming them; control data is skipped
    fn peek<'a>(
        &'a self,
        mut state: MutexGuard<'a, ChannelState>,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        nonblock: bool,
        yielded: &mut bool,
    ) -> ChanResult<usize> {
        while state.queue.is_empty() {
            if !state.any_writing {
                return Ok(0);
            }
            state = self.wait(state, Role::Read, task, nonblock, yielded)?;
        }

        let mut copied = 0;
        for (mut position, mut remaining) in readable_spans(&state.queue) {
            while remaining > 0 {
                let dst = match cursor_mut(iov, copied) {
                    Some(dst) => dst,
                    None => return Ok(copied),
                };
                let n = dst.len().min(remaining);
                state.queue.copy_out(position, &mut dst[..n]);
                position += n;
                remaining -= n;
                copied += n;
            }
        }
        Ok(copied)
    }

    /// Install delivered files and release the rest
    fn deliver(&self, task: &Task, delivery: Delivery, control: Option<&mut CmsgWriter<'_>>, flags: MsgFlags) {
        let Delivery { handles, reservation, truncated } = delivery;
        let mut files = self.settle(handles);

        match (control, reservation) {
            (Some(writer), Some(reservation)) => {
                let keep = reservation.len().min(files.len());
                let dropped = files.split_off(keep);
                let fds = task.fds().install(reservation, files, flags.fd_flags());
                writer.push_rights(&fds);
                if truncated {
                    writer.mark_truncated();
                    kdebug!("control truncated, releasing {} descriptors", dropped.len());
                }
                drop(dropped);
            }
            (Some(writer), None) => {
                if truncated {
                    writer.mark_truncated();
                }
                drop(files);
            }
            (None, reservation) => {
                if let Some(reservation) = reservation {
                    task.fds().unreserve(reservation);
                }
                drop(files);
            }
        }
    }

    /// Take back ownership of handles leaving the ring
    fn settle(&self, handles: Vec<u64>) -> Vec<Arc<OpenFile>> {
        handles
            .into_iter()
            .map(|raw| {
                // Safety: every handle in an SCM_RIGHTS record was produced by
                // `into_raw` in `enqueue_rights`, and the record has just been
                // removed from the ring, so no one else can redeem it.
                let file = unsafe { OwnershipToken::<OpenFile>::from_raw(raw) }.redeem();
                file.unpass();
                self.end_passing();
                file
            })
            .collect()
    }

    fn release(&self, handles: Vec<u64>) {
        drop(self.settle(handles));
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Sleep for at most one wait slice, or yield once to a pledged peer.
    ///
    /// The caller re-checks its condition after every return.
    fn wait<'a>(
        &'a self,
        state: MutexGuard<'a, ChannelState>,
        role: Role,
        task: &Task,
        nonblock: bool,
        yielded: &mut bool,
    ) -> ChanResult<MutexGuard<'a, ChannelState>> {
        if nonblock {
            return Err(ChanError::WouldBlock);
        }
        task.interrupt().check()?;

        if self.yield_hint && !*yielded {
            if let Some(peer) = self.pledges.holder(role.opposite()) {
                *yielded = true;
                drop(state);
                task.hint().yield_to(peer);
                return Ok(self.lock());
            }
        }
        *yielded = false;

        let condvar = match role {
            Role::Read => &self.data_ready,
            Role::Write => &self.space_ready,
        };
        let (state, _) = condvar
            .wait_timeout(state, self.wait_slice)
            .unwrap_or_else(PoisonError::into_inner);
        task.interrupt().check()?;
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Sizing and teardown
    // ------------------------------------------------------------------

    /// Resize the ring on behalf of `role`.
    ///
    /// The writer's request is applied, clamped to the configured bounds
    /// and never below the bytes currently buffered. The reader's request
    /// is only recorded. Returns the resulting capacity.
    pub fn resize(&self, role: Role, requested: usize) -> usize {
        let mut state = self.lock();
        match role {
            Role::Read => {
                state.requested_read_size = requested;
                state.queue.size()
            }
            Role::Write => {
                let target = requested
                    .clamp(self.min_size, self.max_size)
                    .max(state.queue.used());
                if target != state.queue.size() {
                    kdebug!("resize {} -> {} ({} used)", state.queue.size(), target, state.queue.used());
                    state.queue.resize(target);
                    self.space_ready.notify_all();
                }
                target
            }
        }
    }

    /// Close one side. Waiters on both sides wake and re-check.
    ///
    /// Once the reader is gone nothing can consume the ring, so its
    /// contents are dropped and any files in flight released.
    pub fn close(&self, role: Role) {
        let orphaned = {
            let mut state = self.lock();
            match role {
                Role::Read if state.any_reading => {
                    state.any_reading = false;
                    state.read_generation += 1;
                    drain_handles(&mut state.queue)
                }
                Role::Write if state.any_writing => {
                    state.any_writing = false;
                    Vec::new()
                }
                _ => return,
            }
        };
        self.data_ready.notify_all();
        self.space_ready.notify_all();
        kdebug!("closed {:?} side, releasing {} descriptors", role, orphaned.len());
        self.release(orphaned);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let handles = drain_handles(&mut state.queue);
        if !handles.is_empty() {
            kdebug!("channel dropped with {} descriptors in flight", handles.len());
        }
        self.release(handles);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Channel")
            .field("queue", &state.queue)
            .field("any_reading", &state.any_reading)
            .field("any_writing", &state.any_writing)
            .field("pass", &*self.pass.lock())
            .finish()
    }
}

/// `(position, len)` of the normal bytes one read may consume, front first
fn readable_spans(queue: &SegmentQueue) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if queue.is_empty() {
        return spans;
    }
    let mut position = 0;
    loop {
        let header = queue.header_at(position);
        if position > 0 && header.has_ancillary() {
            break;
        }
        if header.normal_len > 0 {
            spans.push((
                position + SEGMENT_HEADER_SIZE + header.ancillary_len as usize,
                header.normal_len as usize,
            ));
        }
        match queue.next_position(position) {
            Some(next) => position = next,
            None => break,
        }
    }
    spans
}

/// Remove everything from `queue`, returning the handles it carried
fn drain_handles(queue: &mut SegmentQueue) -> Vec<u64> {
    let mut handles = Vec::new();
    while let Some(header) = queue.front() {
        if header.has_ancillary() {
            let mut region = vec![0u8; header.ancillary_len as usize];
            queue.copy_out(SEGMENT_HEADER_SIZE, &mut region);
            handles.extend(decode_records(&region).iter().flat_map(Record::handles));
        }
        queue.dequeue(None, header.body_len());
    }
    handles
}

/// Append as much of `iov` past the first `skip` bytes as fits
fn enqueue_normal(queue: &mut SegmentQueue, iov: &[IoSlice<'_>], mut skip: usize) -> usize {
    let mut written = 0;
    for slice in iov {
        let src: &[u8] = slice;
        if skip >= src.len() {
            skip -= src.len();
            continue;
        }
        let src = &src[skip..];
        skip = 0;
        let n = queue.writable(false).min(src.len());
        if n == 0 {
            break;
        }
        queue.enqueue(&src[..n], false);
        written += n;
        if n < src.len() {
            break;
        }
    }
    written
}

/// Unfilled remainder of the first scatter buffer past `skip` bytes
fn cursor_mut<'a>(iov: &'a mut [IoSliceMut<'_>], mut skip: usize) -> Option<&'a mut [u8]> {
    for slice in iov.iter_mut() {
        let len = slice.len();
        if skip >= len {
            skip -= len;
            continue;
        }
        return Some(&mut slice[skip..]);
    }
    None
}
