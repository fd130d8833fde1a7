//! Vendor REST Clients
//!
//! One client per vendor surface, all sending through the [`Transport`]
//! port:
//! - Cloud Manager (OCCM): Cloud Volumes ONTAP, volumes, aggregates, accounts
//! - StorageGRID: grid and tenant administration
//! - Unified Manager: inventory queries
//! - AWS Cloud Volumes Service: file systems and snapshots
//! - Azure Resource Manager: Azure NetApp Files
//!
//! [`Transport`]: crate::domain::ports::Transport

pub mod aws_cvs;
pub mod azure;
pub mod cloudmanager;
pub mod storagegrid;
pub mod transport;
pub mod unified_manager;

pub use aws_cvs::{AwsCvsClient, AwsCvsConfig};
pub use azure::{ApiStyle, AzureClient, AzureConfig};
pub use cloudmanager::{CloudManagerClient, CloudManagerConfig, RestReply};
pub use storagegrid::{StorageGridClient, StorageGridConfig};
pub use transport::{HttpTransport, TransportConfig};
pub use unified_manager::{UnifiedManagerClient, UnifiedManagerConfig};
