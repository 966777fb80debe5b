//! Sync table allow-list.
//!
//! Only these back-office tables participate in sync. The reconciliation
//! service rejects pushes for anything else, so adding a table here is a
//! deliberate, reviewed change on both sides.

/// Tables allowed to participate in device sync.
pub const SYNCABLE_TABLES: &[&str] = &["employees", "attendance", "pay_records", "settings"];

/// Whether `table` is on the sync allow-list.
pub fn is_syncable(table: &str) -> bool {
    SYNCABLE_TABLES.contains(&table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_membership() {
        assert!(is_syncable("employees"));
        assert!(is_syncable("pay_records"));
        assert!(!is_syncable("audit_internal"));
        assert!(!is_syncable(""));
        // Case-sensitive on purpose: table names are canonical lowercase.
        assert!(!is_syncable("Employees"));
    }
}
