pub mod backup;
pub mod editor;
pub mod transaction;

pub use backup::{BackupInfo, BackupStore};
pub use editor::{EditOptions, EditResult, Editor, NoopValidator};
pub use transaction::{Transaction, TxnFileError, TxnOptions, TxnResult, TxnState, TxnStatus};
