//! Cloud Volumes ONTAP working environments on Azure

use super::connection::CloudManagerConnection;
use super::cvo::{is_licensed_serial, validate_version, CvoClient, CvoProvider, CvoRequest};
use crate::domain::ports::{Module, ModuleContext, ModuleResult, State};
use crate::error::Result;
use crate::reconcile::{ensure, parse_args, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const NAME: &str = "cloudmanager_cvo_azure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AzureLicenseType {
    #[default]
    AzureCotStandardPaygo,
    AzureCotPremiumPaygo,
    AzureCotPremiumByol,
    AzureCotExplorePaygo,
    AzureHaCotStandardPaygo,
    AzureHaCotPremiumPaygo,
    AzureHaCotPremiumByol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum AzureEncryptionType {
    #[default]
    AZURE,
    NONE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum StorageType {
    #[default]
    #[serde(rename = "Premium_LRS")]
    PremiumLrs,
    #[serde(rename = "Standard_LRS")]
    StandardLrs,
    #[serde(rename = "StandardSSD_LRS")]
    StandardSsdLrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DiskSizeUnit {
    GB,
    #[default]
    TB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BlobTierLevel {
    #[default]
    Normal,
    Cool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum BlobCapacityTier {
    #[default]
    Blob,
    NONE,
}

/// One Azure resource tag
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AzureTag {
    pub tag_key: String,
    pub tag_value: String,
}

fn default_instance_type() -> String {
    "Standard_DS4_v2".into()
}

fn default_ontap_version() -> String {
    "latest".into()
}

fn default_disk_size() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

/// Parameters of `cloudmanager_cvo_azure`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CvoAzureArgs {
    #[serde(flatten)]
    pub connection: CloudManagerConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    /// Connector client ID
    pub client_id: String,
    pub subscription_id: String,
    pub location: String,
    /// Subnet name inside `vnet_id`
    pub subnet_id: String,
    /// Virtual network name
    pub vnet_id: String,
    pub cidr: String,
    pub svm_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnet_resource_group: Option<String>,
    /// Resource group of the system, `<name>-rg` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub allow_deploy_in_existing_rg: bool,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub license_type: AzureLicenseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub data_encryption_type: AzureEncryptionType,
    #[serde(default)]
    pub storage_type: StorageType,
    #[serde(default = "default_disk_size")]
    pub disk_size: u64,
    #[serde(default)]
    pub disk_size_unit: DiskSizeUnit,
    #[serde(default = "default_ontap_version")]
    pub ontap_version: String,
    #[serde(default = "default_true")]
    pub use_latest_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub tier_level: BlobTierLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nss_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_speed_state: Option<String>,
    #[serde(default)]
    pub capacity_tier: BlobCapacityTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_account: Option<String>,
    #[serde(default)]
    pub backup_volumes_to_cbs: bool,
    #[serde(default)]
    pub enable_compliance: bool,
    #[serde(default)]
    pub enable_monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_tag: Option<Vec<AzureTag>>,
    #[serde(default)]
    pub is_ha: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node2: Option<String>,
}

impl ModuleArgs for CvoAzureArgs {}

impl CvoAzureArgs {
    fn resource_group(&self) -> String {
        self.resource_group
            .clone()
            .unwrap_or_else(|| format!("{}-rg", self.name))
    }

    /// Resource ID of the virtual network
    fn vnet_path(&self) -> String {
        let group = self
            .vnet_resource_group
            .clone()
            .unwrap_or_else(|| self.resource_group());
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
            self.subscription_id, group, self.vnet_id
        )
    }
}

impl CvoRequest for CvoAzureArgs {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> State {
        self.state
    }

    fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    fn nss_account(&self) -> Option<&str> {
        self.nss_account.as_deref()
    }

    fn validate_for_create(&self) -> Result<()> {
        validate_version(self.use_latest_version, &self.ontap_version)?;
        ensure(
            self.serial_number.is_some() || self.license_type != AzureLicenseType::AzureCotPremiumByol,
            "serial_number parameter required when having license_type as azure-cot-premium-byol",
        )?;
        if self.is_ha && self.license_type == AzureLicenseType::AzureHaCotPremiumByol {
            ensure(
                self.platform_serial_number_node1.is_some() && self.platform_serial_number_node2.is_some(),
                "both platform_serial_number_node1 and platform_serial_number_node2 parameters are required \
                 when having ha type as true and license_type as azure-ha-cot-premium-byol",
            )?;
        }
        Ok(())
    }

    fn needs_nss_account(&self) -> bool {
        if self.serial_number.is_some() {
            is_licensed_serial(self.serial_number.as_deref())
                && self.license_type == AzureLicenseType::AzureCotPremiumByol
        } else {
            is_licensed_serial(self.platform_serial_number_node1.as_deref())
                && is_licensed_serial(self.platform_serial_number_node2.as_deref())
                && self.license_type == AzureLicenseType::AzureHaCotPremiumByol
        }
    }

    fn create_api(&self) -> String {
        format!(
            "/occm/api/azure/{}/working-environments",
            if self.is_ha { "ha" } else { "vsa" }
        )
    }

    fn create_body(&self, tenant_id: &str, nss_account: Option<&str>) -> Value {
        let vnet_path = self.vnet_path();
        let mut body = json!({
            "name": self.name,
            "region": self.location,
            "subscriptionId": self.subscription_id,
            "tenantId": tenant_id,
            "storageType": self.storage_type,
            "dataEncryptionType": self.data_encryption_type,
            "optimizedNetworkUtilization": true,
            "diskSize": {
                "size": self.disk_size,
                "unit": self.disk_size_unit,
            },
            "svmPassword": self.svm_password,
            "backupVolumesToCbs": self.backup_volumes_to_cbs,
            "enableCompliance": self.enable_compliance,
            "enableMonitoring": self.enable_monitoring,
            "cidr": self.cidr,
            "resourceGroup": self.resource_group(),
            "subnetId": format!("{}/subnets/{}", vnet_path, self.subnet_id),
            "vnetId": vnet_path,
            "vsaMetadata": {
                "ontapVersion": self.ontap_version,
                "useLatestVersion": self.use_latest_version,
                "licenseType": self.license_type,
                "instanceType": self.instance_type,
            },
        });
        if self.resource_group.is_some() {
            body["allowDeployInExistingRg"] = json!(self.allow_deploy_in_existing_rg);
        }
        if self.capacity_tier == BlobCapacityTier::Blob {
            body["capacityTier"] = json!(self.capacity_tier);
            body["tierLevel"] = json!(self.tier_level);
        }
        if let Some(state) = &self.writing_speed_state {
            body["writingSpeedState"] = json!(state);
        }
        if let Some(serial) = &self.serial_number {
            body["serialNumber"] = json!(serial);
        }
        if let Some(group) = &self.security_group_id {
            body["securityGroupId"] = json!(group);
        }
        if let Some(account) = &self.cloud_provider_account {
            body["cloudProviderAccount"] = json!(account);
        }
        if let Some(nss) = nss_account {
            body["nssAccount"] = json!(nss);
        }
        if let Some(tags) = &self.azure_tag {
            body["azureTags"] = tags
                .iter()
                .map(|t| json!({"tagKey": t.tag_key, "tagValue": t.tag_value}))
                .collect();
        }
        if self.is_ha {
            let mut ha_params = Map::new();
            if let Some(serial) = &self.platform_serial_number_node1 {
                ha_params.insert("platformSerialNumberNode1".into(), json!(serial));
            }
            if let Some(serial) = &self.platform_serial_number_node2 {
                ha_params.insert("platformSerialNumberNode2".into(), json!(serial));
            }
            body["haParams"] = Value::Object(ha_params);
        }
        body
    }
}

/// The `cloudmanager_cvo_azure` module
pub struct CloudManagerCvoAzure;

#[async_trait]
impl Module for CloudManagerCvoAzure {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<CvoAzureArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: CvoAzureArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);
        let cvo = CvoClient::new(client, CvoProvider::Azure)?;
        let mut helper = ReconcileHelper::from_args(&args)?;
        cvo.apply(&args, &mut helper, ctx.check_mode).await
    }
}
