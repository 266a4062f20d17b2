//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use encoding_guardian::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{GuardError, Result};

// Encoding
pub use crate::encoding::codecs::{DecodedWith, Encoding, EncodingTable};
pub use crate::encoding::validator::{ValidationMode, Verdict, validate, validate_with};

// Scanner
pub use crate::scanner::quarantine::{QuarantineEntry, QuarantineStore};
pub use crate::scanner::repair::{RepairEngine, RepairOutcome};
pub use crate::scanner::scan::{ScanTally, Scanner};
pub use crate::scanner::walker::{DirectoryWalker, WalkerConfig};

// Guardian
pub use crate::daemon::clock::{Clock, ManualClock, SharedClock, SystemClock};
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{Guardian, GuardianArgs};

// Gate
pub use crate::gate::{GateReport, GateSettings, GateVerdict, check_staged};
