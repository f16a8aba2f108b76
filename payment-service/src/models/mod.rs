mod transaction;

pub use transaction::{
    Metadata, NewTransaction, ParseStatusError, StatusPolicy, Transaction, TransactionFilter,
    TransactionPatch, TransactionStatus, UpsertOutcome, LEGACY_USDC_AMOUNT_KEY,
};
