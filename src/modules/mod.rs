//! Configuration-Management Modules
//!
//! One module per vendor resource type:
//! - Cloud Manager: volumes, aggregates, CVO on AWS, Azure and GCP, NSS accounts
//! - StorageGRID: tenant accounts, buckets/containers
//! - Azure NetApp Files: accounts, capacity pools, volumes
//! - AWS Cloud Volumes Service: snapshots
//! - Unified Manager: node inventory

pub mod aws_cvs_snapshot;
pub mod azure_netapp_account;
pub mod azure_netapp_capacity_pool;
pub mod azure_netapp_volume;
pub mod cloudmanager_aggregate;
pub mod cloudmanager_cvo_aws;
pub mod cloudmanager_cvo_azure;
pub mod cloudmanager_cvo_gcp;
pub mod cloudmanager_nss_account;
pub mod cloudmanager_volume;
pub mod connection;
pub mod cvo;
pub mod sg_grid_account;
pub mod sg_org_container;
pub mod um_list_nodes;

pub use aws_cvs_snapshot::AwsCvsSnapshot;
pub use azure_netapp_account::AzureNetAppAccount;
pub use azure_netapp_capacity_pool::AzureNetAppCapacityPool;
pub use azure_netapp_volume::AzureNetAppVolume;
pub use cloudmanager_aggregate::CloudManagerAggregate;
pub use cloudmanager_cvo_aws::CloudManagerCvoAws;
pub use cloudmanager_cvo_azure::CloudManagerCvoAzure;
pub use cloudmanager_cvo_gcp::CloudManagerCvoGcp;
pub use cloudmanager_nss_account::CloudManagerNssAccount;
pub use cloudmanager_volume::CloudManagerVolume;
pub use sg_grid_account::SgGridAccount;
pub use sg_org_container::SgOrgContainer;
pub use um_list_nodes::UmListNodes;

use crate::domain::ports::{ModuleContext, ModuleRef, ModuleResult};
use crate::error::{Error, Result};
use schemars::schema::RootSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Lookup table of every available module
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, ModuleRef>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        let all: [ModuleRef; 13] = [
            Arc::new(CloudManagerVolume),
            Arc::new(CloudManagerAggregate),
            Arc::new(CloudManagerCvoAws),
            Arc::new(CloudManagerCvoAzure),
            Arc::new(CloudManagerCvoGcp),
            Arc::new(CloudManagerNssAccount),
            Arc::new(SgGridAccount),
            Arc::new(SgOrgContainer),
            Arc::new(AzureNetAppAccount),
            Arc::new(AzureNetAppCapacityPool),
            Arc::new(AzureNetAppVolume),
            Arc::new(AwsCvsSnapshot),
            Arc::new(UmListNodes),
        ];
        Self {
            modules: all.into_iter().map(|m| (m.name(), m)).collect(),
        }
    }

    /// Find a module by name
    pub fn get(&self, name: &str) -> Result<ModuleRef> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    /// Names of all modules, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    /// JSON Schema of a module's parameters
    pub fn schema(&self, name: &str) -> Result<RootSchema> {
        Ok(self.get(name)?.schema())
    }

    /// Run a module to completion
    ///
    /// Errors never escape: they become a failed result carrying the error
    /// text.
    pub async fn run(&self, name: &str, args: Value, ctx: &ModuleContext) -> ModuleResult {
        let outcome = match self.get(name) {
            Ok(module) => {
                info!(module = name, check_mode = ctx.check_mode, "running module");
                module.run(args, ctx).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                info!(module = name, changed = result.changed, "module finished");
                result
            }
            Err(e) => {
                error!(module = name, category = ?e.category(), "module failed: {}", e);
                ModuleResult::failure(e.to_string())
            }
        }
    }
}
