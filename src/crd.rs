//! `UpgradeConfig` CRD type definition.

pub mod spec;
pub mod status;
pub mod types;

#[allow(unused_imports)]
pub use spec::{Update, UpgradeConfig, UpgradeConfigSpec};
#[allow(unused_imports)]
pub use status::{NodeDrainStatus, NotificationEventStatus, UpgradeConfigStatus, UpgradeHistory};
#[allow(unused_imports)]
pub use types::UpgradePhase;
