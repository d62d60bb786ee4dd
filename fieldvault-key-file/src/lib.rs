//! File-backed master key and key vault for `fieldvault`.
//!
//! Suitable for single-host deployments and development. Layout:
//! ```text
//! master.key                         (96 bytes, 0600 permissions)
//! vault/
//! └── encryption/                    (database)
//!     └── __keyVault/                (collection)
//!         ├── <uuid>.json            (one file per data key record)
//!         └── default.json           (hard link to the active record)
//! ```
//!
//! Both files are published by hard-linking a fully written temporary file,
//! which fails atomically if the target already exists. That gives the
//! insert-if-absent semantics the key vault needs across processes.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod master_key;
mod vault;

pub use master_key::FileMasterKey;
pub use vault::FileKeyVault;
