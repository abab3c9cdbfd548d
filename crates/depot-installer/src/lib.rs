mod executor;
mod fs_utils;
mod layout;
mod receipts;
mod rollback;
mod snapshot;
mod transactions;

pub use executor::{execute_plan, ExecuteError, ExecutionResult};
pub use layout::{default_user_prefix, PrefixLayout};
pub use receipts::{
    read_install_receipts, read_installed_index, receipts_for, write_install_receipt,
    InstallReason, InstallReceipt,
};
pub use rollback::{
    latest_rollback_candidate_txid, rollback_transaction, RollbackOutcome,
};
pub use transactions::{
    append_transaction_journal_entry, clear_active_transaction, current_unix_timestamp,
    next_transaction_id, read_active_transaction, read_transaction_journal_records,
    read_transaction_metadata, set_active_transaction, update_transaction_status,
    write_transaction_metadata, TransactionJournalEntry, TransactionMetadata, TransactionStatus,
};
