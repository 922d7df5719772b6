//! Descriptor tables
//!
//! The channel only needs three things from a task's descriptor table
//! when it delivers passed files: reserve several numbers at once, fill
//! them, or hand them back untouched. `DescriptorTable` is that seam;
//! `FdTable` is a bounded in-process implementation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use duplex_core::error::{ChanError, ChanResult};
use duplex_core::flags::FdFlags;
use duplex_core::spinlock::SpinLock;

use crate::file::OpenFile;

/// Descriptor numbers held back for a pending `install`
#[must_use = "a reservation must be installed or unreserved"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    fds: Vec<i32>,
}

impl Reservation {
    pub fn fds(&self) -> &[i32] {
        &self.fds
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

pub trait DescriptorTable: Send + Sync {
    /// Reserve `count` descriptor numbers, all or nothing
    fn reserve(&self, count: usize) -> ChanResult<Reservation>;

    /// Fill reserved numbers with `files` in order.
    ///
    /// Numbers left over when `files` is shorter than the reservation are
    /// released. Returns the numbers now open.
    fn install(&self, reservation: Reservation, files: Vec<Arc<OpenFile>>, flags: FdFlags) -> Vec<i32>;

    /// Release reserved numbers without opening them
    fn unreserve(&self, reservation: Reservation);

    fn get(&self, fd: i32) -> ChanResult<Arc<OpenFile>>;

    fn close(&self, fd: i32) -> ChanResult<()>;
}

enum Slot {
    Free,
    Reserved,
    Open { file: Arc<OpenFile>, flags: FdFlags },
}

impl Slot {
    #[inline]
    fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

/// Bounded table handing out the lowest free number first
pub struct FdTable {
    slots: SpinLock<Vec<Slot>>,
    max_fds: usize,
    open_count: AtomicU32,
}

impl FdTable {
    pub fn new(max_fds: usize) -> Self {
        Self {
            slots: SpinLock::new(Vec::new()),
            max_fds,
            open_count: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn max_fds(&self) -> usize {
        self.max_fds
    }

    /// Number of open descriptors
    #[inline]
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Open `file` at the lowest free number
    pub fn insert(&self, file: Arc<OpenFile>, flags: FdFlags) -> ChanResult<i32> {
        let reservation = self.reserve(1)?;
        Ok(self.install(reservation, vec![file], flags)[0])
    }

    /// Duplicate `fd` onto the lowest free number; the copy has no fd flags
    pub fn dup(&self, fd: i32) -> ChanResult<i32> {
        let file = self.get(fd)?;
        self.insert(file, FdFlags::empty())
    }

    pub fn flags(&self, fd: i32) -> ChanResult<FdFlags> {
        let slots = self.slots.lock();
        match index(fd).and_then(|i| slots.get(i)) {
            Some(Slot::Open { flags, .. }) => Ok(*flags),
            _ => Err(ChanError::BadDescriptor),
        }
    }

    /// Copy for a child process; `CLOFORK` entries stay behind
    pub fn fork(&self) -> FdTable {
        let slots = self.slots.lock();
        let mut open = 0;
        let copied = slots
            .iter()
            .map(|slot| match slot {
                Slot::Open { file, flags } if !flags.contains(FdFlags::CLOFORK) => {
                    open += 1;
                    Slot::Open { file: Arc::clone(file), flags: *flags }
                }
                _ => Slot::Free,
            })
            .collect();
        FdTable {
            slots: SpinLock::new(copied),
            max_fds: self.max_fds,
            open_count: AtomicU32::new(open),
        }
    }

    /// Close every `CLOEXEC` entry, as on exec
    pub fn close_on_exec(&self) {
        let closed: Vec<Arc<OpenFile>> = {
            let mut slots = self.slots.lock();
            slots
                .iter_mut()
                .filter(|s| matches!(s, Slot::Open { flags, .. } if flags.contains(FdFlags::CLOEXEC)))
                .filter_map(|s| match std::mem::replace(s, Slot::Free) {
                    Slot::Open { file, .. } => Some(file),
                    _ => None,
                })
                .collect()
        };
        self.open_count.fetch_sub(closed.len() as u32, Ordering::Relaxed);
        // Files drop here, outside the table lock
        drop(closed);
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new(duplex_core::constants::DEFAULT_MAX_FDS)
    }
}

impl DescriptorTable for FdTable {
    fn reserve(&self, count: usize) -> ChanResult<Reservation> {
        let mut slots = self.slots.lock();
        let mut fds = Vec::with_capacity(count);
        for (i, slot) in slots.iter().enumerate() {
            if fds.len() == count {
                break;
            }
            if slot.is_free() {
                fds.push(i);
            }
        }
        let missing = count - fds.len();
        if slots.len() + missing > self.max_fds {
            return Err(ChanError::TooManyDescriptors);
        }
        for i in &fds {
            slots[*i] = Slot::Reserved;
        }
        for _ in 0..missing {
            fds.push(slots.len());
            slots.push(Slot::Reserved);
        }
        Ok(Reservation {
            fds: fds.into_iter().map(|i| i as i32).collect(),
        })
    }

    fn install(&self, reservation: Reservation, files: Vec<Arc<OpenFile>>, flags: FdFlags) -> Vec<i32> {
        debug_assert!(files.len() <= reservation.len());
        let mut installed = Vec::with_capacity(files.len());
        let mut slots = self.slots.lock();
        let mut files = files.into_iter();
        for fd in reservation.fds {
            let slot = &mut slots[fd as usize];
            debug_assert!(matches!(slot, Slot::Reserved));
            match files.next() {
                Some(file) => {
                    *slot = Slot::Open { file, flags };
                    installed.push(fd);
                }
                None => *slot = Slot::Free,
            }
        }
        self.open_count.fetch_add(installed.len() as u32, Ordering::Relaxed);
        installed
    }

    fn unreserve(&self, reservation: Reservation) {
        let mut slots = self.slots.lock();
        for fd in reservation.fds {
            if let Some(slot) = slots.get_mut(fd as usize) {
                if matches!(slot, Slot::Reserved) {
                    *slot = Slot::Free;
                }
            }
        }
    }

    fn get(&self, fd: i32) -> ChanResult<Arc<OpenFile>> {
        let slots = self.slots.lock();
        match index(fd).and_then(|i| slots.get(i)) {
            Some(Slot::Open { file, .. }) => Ok(Arc::clone(file)),
            _ => Err(ChanError::BadDescriptor),
        }
    }

    fn close(&self, fd: i32) -> ChanResult<()> {
        let file = {
            let mut slots = self.slots.lock();
            let slot = index(fd)
                .and_then(|i| slots.get_mut(i))
                .ok_or(ChanError::BadDescriptor)?;
            if !matches!(slot, Slot::Open { .. }) {
                return Err(ChanError::BadDescriptor);
            }
            match std::mem::replace(slot, Slot::Free) {
                Slot::Open { file, .. } => file,
                _ => return Err(ChanError::BadDescriptor),
            }
        };
        self.open_count.fetch_sub(1, Ordering::Relaxed);
        // Closing may tear down a channel; keep that outside the table lock
        drop(file);
        Ok(())
    }
}

#[inline]
fn index(fd: i32) -> Option<usize> {
    usize::try_from(fd).ok()
}
