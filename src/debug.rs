//! Real-time safe diagnostics for the separator.
//!
//! `sep_log!` may be called from `process_block` on any number of audio
//! threads: the message is formatted in place into a preallocated slot of a
//! bounded multi-producer queue, with no allocation and no locking. `prepare`
//! and `reset` drain the queue into the `log` facade. Without the `debug`
//! feature the macro compiles to nothing.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const QUEUE_SLOTS: usize = 128;
    const MSG_BYTES: usize = 256;

    pub struct RtMessage {
        len: usize,
        bytes: [u8; MSG_BYTES],
    }

    impl RtMessage {
        fn as_str(&self) -> &str {
            // Writes only ever stop on a char boundary.
            std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
        }
    }

    impl fmt::Write for RtMessage {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut n = s.len().min(MSG_BYTES - self.len);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    struct Slot {
        // `seq` when free for the producer claiming `seq`, `seq + 1` once that
        // message is published, `seq + QUEUE_SLOTS` after it is consumed.
        stamp: AtomicUsize,
        msg: UnsafeCell<RtMessage>,
    }

    /// Bounded multi-producer queue shared by every separator in the process.
    /// A full queue drops the message and counts it.
    pub struct RtLogQueue {
        slots: Box<[Slot]>,
        write_seq: AtomicUsize,
        read_seq: AtomicUsize,
        dropped: AtomicUsize,
    }

    // A slot's message is only touched by the thread that won its sequence
    // number on `write_seq` or `read_seq`, and only while its stamp says so.
    unsafe impl Sync for RtLogQueue {}

    impl RtLogQueue {
        fn new() -> Self {
            let slots = (0..QUEUE_SLOTS)
                .map(|i| Slot {
                    stamp: AtomicUsize::new(i),
                    msg: UnsafeCell::new(RtMessage {
                        len: 0,
                        bytes: [0; MSG_BYTES],
                    }),
                })
                .collect();
            Self {
                slots,
                write_seq: AtomicUsize::new(0),
                read_seq: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
            }
        }

        pub fn push(&self, args: fmt::Arguments) {
            let mut seq = self.write_seq.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[seq % QUEUE_SLOTS];
                let stamp = slot.stamp.load(Ordering::Acquire);
                let lag = stamp.wrapping_sub(seq) as isize;
                if lag == 0 {
                    match self.write_seq.compare_exchange_weak(
                        seq,
                        seq.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: winning `seq` gives this thread sole
                            // access until the stamp is advanced.
                            let msg = unsafe { &mut *slot.msg.get() };
                            msg.len = 0;
                            let _ = fmt::write(msg, args);
                            slot.stamp.store(seq.wrapping_add(1), Ordering::Release);
                            return;
                        }
                        Err(current) => seq = current,
                    }
                } else if lag < 0 {
                    // Slot still holds an unread message from the previous lap.
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                } else {
                    seq = self.write_seq.load(Ordering::Relaxed);
                }
            }
        }

        /// Hands published messages to `sink` in claim order. Stops at the
        /// first slot whose producer has not finished writing.
        pub fn drain(&self, mut sink: impl FnMut(&str)) {
            let mut seq = self.read_seq.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[seq % QUEUE_SLOTS];
                let stamp = slot.stamp.load(Ordering::Acquire);
                if stamp != seq.wrapping_add(1) {
                    return;
                }
                match self.read_seq.compare_exchange_weak(
                    seq,
                    seq.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: published and claimed by this reader; no
                        // producer reuses it before the stamp below.
                        let msg = unsafe { &*slot.msg.get() };
                        sink(msg.as_str());
                        slot.stamp
                            .store(seq.wrapping_add(QUEUE_SLOTS), Ordering::Release);
                        seq = seq.wrapping_add(1);
                    }
                    Err(current) => seq = current,
                }
            }
        }

        pub fn take_dropped(&self) -> usize {
            self.dropped.swap(0, Ordering::Relaxed)
        }
    }

    static QUEUE: OnceLock<RtLogQueue> = OnceLock::new();

    /// Allocates the queue. Non-real-time only.
    pub fn init_logger() {
        QUEUE.get_or_init(RtLogQueue::new);
    }

    pub fn log_args(args: fmt::Arguments) {
        if let Some(queue) = QUEUE.get() {
            queue.push(args);
        }
    }

    pub fn drain_to_log() {
        let Some(queue) = QUEUE.get() else {
            return;
        };
        queue.drain(|msg| log::debug!(target: "stemperator::rt", "{}", msg));
        let dropped = queue.take_dropped();
        if dropped > 0 {
            log::warn!(target: "stemperator::rt", "{} real-time messages dropped", dropped);
        }
    }

}

#[cfg(feature = "debug")]
pub(crate) fn sep_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn sep_log_inner(_args: fmt::Arguments) {}

pub(crate) fn init() {
    #[cfg(feature = "debug")]
    logger::init_logger();
}

pub(crate) fn drain() {
    #[cfg(feature = "debug")]
    logger::drain_to_log();
}

#[macro_export]
macro_rules! sep_log {
    ($($arg:tt)*) => {
        $crate::debug::sep_log_inner(format_args!($($arg)*))
    };
}
