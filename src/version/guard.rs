//! Reentrancy detection for cells whose computation can loop back to itself.
//!
//! A cell holds one [`Reentrancy`] flag. Entering hands out a token that
//! clears the flag when dropped; a second `enter` while a token is alive
//! returns `None`, and the caller falls back to its last cached snapshot.

use std::cell::Cell;

#[derive(Debug, Default)]
pub struct Reentrancy {
    active: Cell<bool>,
}

/// Proof that the owning cell is currently computing.
#[derive(Debug)]
pub struct ReentrancyToken<'a> {
    guard: &'a Reentrancy,
}

impl Reentrancy {
    pub fn new() -> Reentrancy {
        return Reentrancy { active: Cell::new(false) };
    }

    #[inline]
    pub fn enter(&self) -> Option<ReentrancyToken<'_>> {
        if self.active.replace(true) {
            return None;
        }
        return Some(ReentrancyToken { guard: self });
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        return self.active.get();
    }
}

impl Drop for ReentrancyToken<'_> {
    fn drop(&mut self) {
        self.guard.active.set(false);
    }
}
