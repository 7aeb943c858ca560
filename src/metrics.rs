//! Process-wide counters for the radio and uplink paths.
//! Plain atomics; a snapshot accessor feeds the `status` command and tests.

use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RX: AtomicU64 = AtomicU64::new(0);
static FRAMES_TX: AtomicU64 = AtomicU64::new(0);
static FRAMES_BAD: AtomicU64 = AtomicU64::new(0);
static POLLS_ISSUED: AtomicU64 = AtomicU64::new(0);
static POLLS_LOST: AtomicU64 = AtomicU64::new(0);
static LINES_IN: AtomicU64 = AtomicU64::new(0);
static LINES_OUT: AtomicU64 = AtomicU64::new(0);
static MESSAGES_FLUSHED: AtomicU64 = AtomicU64::new(0);
static REGISTRATIONS: AtomicU64 = AtomicU64::new(0);
static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_rx() {
    FRAMES_RX.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_tx() {
    FRAMES_TX.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_bad() {
    FRAMES_BAD.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_polls_issued() {
    POLLS_ISSUED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_polls_lost() {
    POLLS_LOST.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lines_in() {
    LINES_IN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lines_out() {
    LINES_OUT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_flushed() {
    MESSAGES_FLUSHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_registrations() {
    REGISTRATIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_dropped() {
    EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of all counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_rx: u64,
    pub frames_tx: u64,
    pub frames_bad: u64,
    pub polls_issued: u64,
    pub polls_lost: u64,
    pub lines_in: u64,
    pub lines_out: u64,
    pub messages_flushed: u64,
    pub registrations: u64,
    pub events_dropped: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        frames_rx: FRAMES_RX.load(Ordering::Relaxed),
        frames_tx: FRAMES_TX.load(Ordering::Relaxed),
        frames_bad: FRAMES_BAD.load(Ordering::Relaxed),
        polls_issued: POLLS_ISSUED.load(Ordering::Relaxed),
        polls_lost: POLLS_LOST.load(Ordering::Relaxed),
        lines_in: LINES_IN.load(Ordering::Relaxed),
        lines_out: LINES_OUT.load(Ordering::Relaxed),
        messages_flushed: MESSAGES_FLUSHED.load(Ordering::Relaxed),
        registrations: REGISTRATIONS.load(Ordering::Relaxed),
        events_dropped: EVENTS_DROPPED.load(Ordering::Relaxed),
    }
}
