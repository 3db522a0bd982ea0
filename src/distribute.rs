//! Fair flow-control credit distribution
//!
//! The credit budget bounds how many messages may be outstanding across the
//! whole connection pool. When the budget covers every ready connection, each
//! gets an equal share (remainder to the earliest-ready connections). When it
//! does not, the whole budget rotates round-robin through the ready list, one
//! position per pass, so every connection receives delivery opportunities at
//! the same long-run rate.

use crate::registry::ConnectionRegistry;

/// Credit assignment state: the budget plus the rotation cursor
#[derive(Debug)]
pub(crate) struct Distributor {
    budget: u64,
    /// Key of the connection credited by the most recent rotation pass
    last_active: Option<String>,
}

impl Distributor {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            last_active: None,
        }
    }

    /// Whether a connection joining a ready set of size `ready_len_before`
    /// changes any assignment. In rotation mode (budget already smaller than
    /// the ready set) the newcomer's fair share is 0 and the active
    /// connection is unaffected, so no pass is needed.
    pub fn pass_needed_on_ready(&self, ready_len_before: usize) -> bool {
        self.budget >= ready_len_before as u64
    }

    /// Adjust the rotation cursor before `key` is removed from the ready
    /// list, so the next pass credits the removed connection's successor
    /// instead of restarting the rotation.
    pub fn on_removed(&mut self, key: &str, ready_before: &[String]) {
        if self.last_active.as_deref() != Some(key) {
            return;
        }
        let len = ready_before.len();
        self.last_active = if len <= 1 {
            None
        } else {
            ready_before
                .iter()
                .position(|r| r == key)
                .map(|i| ready_before[(i + len - 1) % len].clone())
        };
    }

    /// Run one distribution pass over the ready list (ordered by ready time).
    ///
    /// An empty ready set assigns nothing; the caller still reports the pass
    /// as complete.
    pub fn distribute(&mut self, ready: &[String], registry: &ConnectionRegistry) {
        if ready.is_empty() {
            return;
        }

        let count = ready.len() as u64;
        if self.budget >= count {
            let share = self.budget / count;
            let extra = (self.budget % count) as usize;
            for (i, key) in ready.iter().enumerate() {
                let credit = share + u64::from(i < extra);
                registry.set_credit(key, credit);
            }
        } else {
            let active = self.next_active_index(ready);
            for (i, key) in ready.iter().enumerate() {
                let credit = if i == active { self.budget } else { 0 };
                registry.set_credit(key, credit);
            }
            self.last_active = Some(ready[active].clone());
        }
    }

    fn next_active_index(&self, ready: &[String]) -> usize {
        self.last_active
            .as_deref()
            .and_then(|last| ready.iter().position(|r| r == last))
            .map(|i| (i + 1) % ready.len())
            .unwrap_or(0)
    }
}
