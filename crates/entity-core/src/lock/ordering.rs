//! Lock acquisition ordering: the deadlock-freedom
//! argument rests entirely on every critical section acquiring in the
//! same global order.

use crate::error::EntityCoreError;
use crate::instance_id::InstanceId;

/// Sorts `ids` into the mandated acquisition order: lexicographic on
/// `(name, key)`. Does not deduplicate — targeting the same id twice in
/// one critical section is a caller bug, not something to silently fix.
pub fn sort_targets(mut ids: Vec<InstanceId>) -> Vec<InstanceId> {
    ids.sort();
    ids
}

/// Verifies a caller-supplied target list already matches the mandated
/// total order, rather than trusting a sender's claimed ordering.
pub fn verify_sorted(ids: &[InstanceId]) -> Result<(), EntityCoreError> {
    if ids.windows(2).all(|pair| pair[0] <= pair[1]) {
        Ok(())
    } else {
        Err(EntityCoreError::LockOrderingViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str, key: &str) -> InstanceId {
        InstanceId::new(name, key).unwrap()
    }

    #[test]
    fn sorts_by_name_then_key() {
        let sorted = sort_targets(vec![id("stringstore", "a"), id("counter", "b"), id("counter", "a")]);
        assert_eq!(sorted, vec![id("counter", "a"), id("counter", "b"), id("stringstore", "a")]);
    }

    #[test]
    fn verify_sorted_accepts_correctly_ordered_input() {
        let ids = vec![id("counter", "a"), id("counter", "b"), id("stringstore", "a")];
        assert!(verify_sorted(&ids).is_ok());
    }

    #[test]
    fn verify_sorted_rejects_out_of_order_input() {
        let ids = vec![id("stringstore", "a"), id("counter", "a")];
        assert!(matches!(verify_sorted(&ids), Err(EntityCoreError::LockOrderingViolation)));
    }
}
