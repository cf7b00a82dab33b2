//! Allowlist and blocklist. An address is never simultaneously present in
//! both: `allow()` always removes from `block`, and `block()` refuses an
//! allowlisted address outright.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::error::CoreError;

#[derive(Debug, Default)]
pub struct AccessLists {
    allow: HashSet<Ipv4Addr>,
    block: HashSet<Ipv4Addr>,
}

impl AccessLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, addr: Ipv4Addr) -> bool {
        self.allow.contains(&addr)
    }

    pub fn is_blocked(&self, addr: Ipv4Addr) -> bool {
        self.block.contains(&addr)
    }

    /// Refuses to block an allowlisted address (kind `precondition`, §7).
    pub fn block(&mut self, addr: Ipv4Addr) -> Result<(), CoreError> {
        if self.allow.contains(&addr) {
            return Err(CoreError::blocking_allowlisted(addr));
        }
        self.block.insert(addr);
        Ok(())
    }

    /// Implicitly removes `addr` from the blocklist (§6).
    pub fn allow(&mut self, addr: Ipv4Addr) {
        self.block.remove(&addr);
        self.allow.insert(addr);
    }

    pub fn remove_block(&mut self, addr: Ipv4Addr) {
        self.block.remove(&addr);
    }

    pub fn remove_allow(&mut self, addr: Ipv4Addr) {
        self.allow.remove(&addr);
    }

    pub fn blocklist(&self) -> Vec<Ipv4Addr> {
        self.block.iter().copied().collect()
    }

    pub fn allowlist(&self) -> Vec<Ipv4Addr> {
        self.allow.iter().copied().collect()
    }

    pub fn blocklist_len(&self) -> usize {
        self.block.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_then_block_is_rejected() {
        let mut lists = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        lists.allow(addr);
        assert!(lists.block(addr).is_err());
        assert!(lists.is_allowed(addr));
        assert!(!lists.is_blocked(addr));
    }

    #[test]
    fn block_then_allow_flips_state() {
        let mut lists = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        lists.block(addr).unwrap();
        lists.allow(addr);
        assert!(lists.is_allowed(addr));
        assert!(!lists.is_blocked(addr));
    }

    #[test]
    fn block_is_idempotent() {
        let mut lists = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        lists.block(addr).unwrap();
        lists.block(addr).unwrap();
        assert_eq!(lists.blocklist_len(), 1);
    }

    #[test]
    fn allow_is_idempotent() {
        let mut lists = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        lists.allow(addr);
        lists.allow(addr);
        assert_eq!(lists.allowlist().len(), 1);
    }

    #[test]
    fn never_in_both_lists() {
        let mut lists = AccessLists::new();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        lists.block(addr).unwrap();
        lists.allow(addr);
        assert!(!(lists.is_allowed(addr) && lists.is_blocked(addr)));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Block,
        Allow,
        RemoveBlock,
        RemoveAllow,
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Op::Block),
            Just(Op::Allow),
            Just(Op::RemoveBlock),
            Just(Op::RemoveAllow),
        ]
    }

    proptest::proptest! {
        /// No matter what sequence of block/allow/remove operations runs
        /// against a single address, it is never allowed and blocked at
        /// the same time (invariant 2).
        #[test]
        fn mutual_exclusion_holds_under_any_op_sequence(ops in proptest::collection::vec(op_strategy(), 0..50)) {
            let mut lists = AccessLists::new();
            let addr = Ipv4Addr::new(10, 0, 0, 1);
            for op in ops {
                match op {
                    Op::Block => { let _ = lists.block(addr); }
                    Op::Allow => lists.allow(addr),
                    Op::RemoveBlock => lists.remove_block(addr),
                    Op::RemoveAllow => lists.remove_allow(addr),
                }
                proptest::prop_assert!(!(lists.is_allowed(addr) && lists.is_blocked(addr)));
            }
        }
    }
}
