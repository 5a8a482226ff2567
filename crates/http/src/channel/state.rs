use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one [`Connection`](super::Connection).
///
/// `Idle -> Active -> (Draining) -> Closed`, where `Closed` is terminal and
/// reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionStatus {
    Idle = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Idle,
            1 => ConnectionStatus::Active,
            2 => ConnectionStatus::Draining,
            _ => ConnectionStatus::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Draining => "draining",
            ConnectionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(ConnectionStatus::Idle as u8))
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionStatus, to: ConnectionStatus) -> bool {
        self.0.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// `Idle -> Active`
    pub(crate) fn activate(&self) -> bool {
        self.transition(ConnectionStatus::Idle, ConnectionStatus::Active)
    }

    /// `Active -> Draining`
    pub(crate) fn drain(&self) -> bool {
        self.transition(ConnectionStatus::Active, ConnectionStatus::Draining)
    }

    /// `Draining -> Active`, when the next exchange starts on a kept-alive connection.
    pub(crate) fn reactivate(&self) -> bool {
        self.transition(ConnectionStatus::Draining, ConnectionStatus::Active)
    }

    /// Moves to `Closed` from any state. Only the first caller gets `true`.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(ConnectionStatus::Closed as u8, Ordering::AcqRel) != ConnectionStatus::Closed as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn walks_forward_only() {
        let state = StateCell::new();
        assert_eq!(state.get(), ConnectionStatus::Idle);

        assert!(!state.drain());
        assert!(state.activate());
        assert!(!state.activate());
        assert!(state.drain());
        assert_eq!(state.get(), ConnectionStatus::Draining);

        assert!(state.close());
        assert!(!state.close());
        assert!(!state.reactivate());
        assert_eq!(state.get(), ConnectionStatus::Closed);
    }

    #[test]
    fn exactly_one_close_under_contention() {
        for _ in 0..64 {
            let state = Arc::new(StateCell::new());
            state.activate();
            let winners = Arc::new(AtomicUsize::new(0));

            let handles = (0..8)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        if state.close() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
