//! Cloud Volumes ONTAP working environments on GCP
//!
//! HA pairs span four VPCs. Networks and subnets are referenced by their
//! compute resource paths, with VPC0 optionally living in a shared VPC host
//! project given by `network_project_id`.

use super::connection::CloudManagerConnection;
use super::cvo::{is_licensed_serial, validate_version, CvoClient, CvoProvider, CvoRequest};
use crate::clients::cloudmanager::api_root_path;
use crate::domain::ports::{Module, ModuleContext, ModuleResult, State};
use crate::error::Result;
use crate::reconcile::{ensure, parse_args, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const NAME: &str = "cloudmanager_cvo_gcp";

const GOOGLE_API_URL: &str = "https://www.googleapis.com/compute/v1/projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum GcpLicenseType {
    #[default]
    GcpCotStandardPaygo,
    GcpCotExplorePaygo,
    GcpCotPremiumPaygo,
    GcpCotPremiumByol,
    GcpHaCotStandardPaygo,
    GcpHaCotPremiumPaygo,
    GcpHaCotExplorePaygo,
    GcpHaCotPremiumByol,
}

impl GcpLicenseType {
    fn is_byol(self) -> bool {
        matches!(self, GcpLicenseType::GcpCotPremiumByol | GcpLicenseType::GcpHaCotPremiumByol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum GcpVolumeSizeUnit {
    GB,
    TB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum GcpVolumeType {
    PdStandard,
    PdSsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageTierLevel {
    #[default]
    Standard,
    Nearline,
    Coldline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum GcpCapacityTier {
    CloudStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum GcpEncryptionType {
    GCP,
}

/// One GCP resource label
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GcpLabel {
    pub label_key: String,
    pub label_value: String,
}

fn default_instance_type() -> String {
    "n1-standard-8".into()
}

fn default_ontap_version() -> String {
    "latest".into()
}

fn default_writing_speed_state() -> String {
    "NORMAL".into()
}

fn default_true() -> bool {
    true
}

/// Parameters of `cloudmanager_cvo_gcp`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CvoGcpArgs {
    #[serde(flatten)]
    pub connection: CloudManagerConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    /// Connector client ID
    pub client_id: String,
    /// Service account used for tiering to cloud storage
    pub gcp_service_account: String,
    pub project_id: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svm_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_project_id: Option<String>,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub license_type: GcpLicenseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_volume_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_volume_size_unit: Option<GcpVolumeSizeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_volume_type: Option<GcpVolumeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_tier: Option<GcpCapacityTier>,
    #[serde(default)]
    pub tier_level: StorageTierLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_encryption_type: Option<GcpEncryptionType>,
    #[serde(default = "default_writing_speed_state")]
    pub writing_speed_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_labels: Option<Vec<GcpLabel>>,
    #[serde(default = "default_ontap_version")]
    pub ontap_version: String,
    #[serde(default = "default_true")]
    pub use_latest_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nss_account: Option<String>,
    #[serde(default)]
    pub backup_volumes_to_cbs: bool,
    #[serde(default)]
    pub enable_compliance: bool,
    #[serde(default)]
    pub is_ha: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediator_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node1_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node2_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet0_node_and_data_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet1_cluster_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet2_ha_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet3_data_replication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc0_node_and_data_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc1_cluster_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc2_ha_connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc3_data_replication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc0_firewall_rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc1_firewall_rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc2_firewall_rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc3_firewall_rule_name: Option<String>,
}

impl ModuleArgs for CvoGcpArgs {}

impl CvoGcpArgs {
    /// Region of `zone`, `us-east4-b` lies in `us-east4`
    fn region(&self) -> &str {
        self.zone
            .rsplit_once('-')
            .map(|(region, _)| region)
            .unwrap_or(self.zone.as_str())
    }

    fn network_project(&self) -> &str {
        self.network_project_id.as_deref().unwrap_or(self.project_id.as_str())
    }

    fn subnet_path(&self, project: &str, subnet: &str) -> String {
        format!("projects/{}/regions/{}/subnetworks/{}", project, self.region(), subnet)
    }

    fn network_url(project: &str, vpc: &str) -> String {
        format!("{}/{}/global/networks/{}", GOOGLE_API_URL, project, vpc)
    }

    fn ha_params(&self) -> Value {
        let mut params = Map::new();
        let mut set = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                params.insert(key.to_string(), json!(value));
            }
        };
        set("platformSerialNumberNode1", self.platform_serial_number_node1.clone());
        set("platformSerialNumberNode2", self.platform_serial_number_node2.clone());
        set("mediatorZone", self.mediator_zone.clone());
        set("node1Zone", self.node1_zone.clone());
        set("node2Zone", self.node2_zone.clone());
        set(
            "subnet0NodeAndDataConnectivity",
            self.subnet0_node_and_data_connectivity
                .as_deref()
                .map(|s| self.subnet_path(self.network_project(), s)),
        );
        set(
            "subnet1ClusterConnectivity",
            self.subnet1_cluster_connectivity
                .as_deref()
                .map(|s| self.subnet_path(&self.project_id, s)),
        );
        set(
            "subnet2HAConnectivity",
            self.subnet2_ha_connectivity
                .as_deref()
                .map(|s| self.subnet_path(&self.project_id, s)),
        );
        set(
            "subnet3DataReplication",
            self.subnet3_data_replication
                .as_deref()
                .map(|s| self.subnet_path(&self.project_id, s)),
        );
        set(
            "vpc0NodeAndDataConnectivity",
            self.vpc0_node_and_data_connectivity
                .as_deref()
                .map(|v| Self::network_url(self.network_project(), v)),
        );
        set(
            "vpc1ClusterConnectivity",
            self.vpc1_cluster_connectivity
                .as_deref()
                .map(|v| Self::network_url(&self.project_id, v)),
        );
        set(
            "vpc2HAConnectivity",
            self.vpc2_ha_connectivity
                .as_deref()
                .map(|v| Self::network_url(&self.project_id, v)),
        );
        set(
            "vpc3DataReplication",
            self.vpc3_data_replication
                .as_deref()
                .map(|v| Self::network_url(&self.project_id, v)),
        );
        set("vpc0FirewallRuleName", self.vpc0_firewall_rule_name.clone());
        set("vpc1FirewallRuleName", self.vpc1_firewall_rule_name.clone());
        set("vpc2FirewallRuleName", self.vpc2_firewall_rule_name.clone());
        set("vpc3FirewallRuleName", self.vpc3_firewall_rule_name.clone());
        Value::Object(params)
    }
}

impl CvoRequest for CvoGcpArgs {
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
            !self.is_ha || self.subnet_id.is_some(),
            "subnet_id parameter required when having is_ha as true",
        )
    }

    fn needs_nss_account(&self) -> bool {
        is_licensed_serial(self.platform_serial_number.as_deref()) && self.license_type.is_byol()
    }

    fn create_api(&self) -> String {
        format!(
            "/occm/api/gcp/{}/working-environments",
            if self.is_ha { "ha" } else { "vsa" }
        )
    }

    /// Existing systems are deleted through the API root they report
    fn delete_api(&self, current: &Value) -> String {
        match current.get("cloudProviderName") {
            Some(_) => format!("{}/working-environments", api_root_path(current)),
            None => self.create_api(),
        }
    }

    fn create_body(&self, tenant_id: &str, nss_account: Option<&str>) -> Value {
        let mut body = json!({
            "name": self.name,
            "region": self.zone,
            "tenantId": tenant_id,
            "vpcId": self.vpc_id,
            "gcpServiceAccount": self.gcp_service_account,
            "gcpVolumeSize": {
                "size": self.gcp_volume_size,
                "unit": self.gcp_volume_size_unit,
            },
            "gcpVolumeType": self.gcp_volume_type,
            "svmPassword": self.svm_password,
            "backupVolumesToCbs": self.backup_volumes_to_cbs,
            "enableCompliance": self.enable_compliance,
            "vsaMetadata": {
                "ontapVersion": self.ontap_version,
                "licenseType": self.license_type,
                "useLatestVersion": self.use_latest_version,
                "instanceType": self.instance_type,
            },
        });
        if let Some(tier) = self.capacity_tier {
            body["capacityTier"] = json!(tier);
            body["tierLevel"] = json!(self.tier_level);
        }
        if let Some(encryption) = self.data_encryption_type {
            body["dataEncryptionType"] = json!(encryption);
        }
        body["writingSpeedState"] = json!(self.writing_speed_state);
        if let Some(rule) = &self.firewall_rule {
            body["firewallRule"] = json!(rule);
        }
        if let Some(serial) = &self.platform_serial_number {
            body["platformSerialNumber"] = json!(serial);
        }
        if let Some(nss) = nss_account {
            body["nssAccount"] = json!(nss);
        }
        if let Some(labels) = &self.gcp_labels {
            body["gcpLabels"] = labels
                .iter()
                .map(|l| json!({"labelKey": l.label_key, "labelValue": l.label_value}))
                .collect();
        }
        if let Some(subnet) = &self.subnet_id {
            body["subnetId"] = json!(self.subnet_path(self.network_project(), subnet));
            body["subnetPath"] = body["subnetId"].clone();
        }
        if self.is_ha {
            body["haParams"] = self.ha_params();
        }
        body
    }
}

/// The `cloudmanager_cvo_gcp` module
pub struct CloudManagerCvoGcp;

#[async_trait]
impl Module for CloudManagerCvoGcp {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<CvoGcpArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: CvoGcpArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);
        let cvo = CvoClient::new(client, CvoProvider::Gcp)?;
        let mut helper = ReconcileHelper::from_args(&args)?;
        cvo.apply(&args, &mut helper, ctx.check_mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ApiResponse, HttpMethod};
    use crate::error::Error;
    use crate::testing::MockTransport;
    use assert_matches::assert_matches;

    fn default_args() -> Value {
        json!({
            "state": "present",
            "name": "testcvo",
            "client_id": "test",
            "project_id": "default-project",
            "zone": "us-east4-b",
            "gcp_service_account": "service@project.iam.gserviceaccount.com",
            "vpc_id": "default",
            "subnet_id": "default",
            "refresh_token": "myrefresh_token",
            "is_ha": false
        })
    }

    fn with_request_id(body: Value, id: &str) -> ApiResponse {
        ApiResponse::new(200, body.to_string()).with_header("OnCloud-Request-Id", id)
    }

    #[test]
    fn test_region_of_zone() {
        let args: CvoGcpArgs = serde_json::from_value(default_args()).unwrap();
        assert_eq!(args.region(), "us-east4");
    }

    #[tokio::test]
    async fn test_create_single_node() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"gcpVsaWorkingEnvironments": []}))
            .reply(200, json!([{"publicId": "workspace-abc"}]))
            .reply_raw(with_request_id(json!({"publicId": "VsaWorkingEnvironment-gcp1"}), "req-1"))
            .reply(200, json!({"status": 1}));

        let mut args = default_args();
        args["capacity_tier"] = json!("cloudStorage");
        args["gcp_labels"] = json!([{"label_key": "env", "label_value": "test"}]);
        let result = CloudManagerCvoGcp.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.extra["working_environment_id"], "VsaWorkingEnvironment-gcp1");

        let requests = mock.requests();
        assert!(requests[3].url.ends_with("/occm/api/gcp/vsa/working-environments"));
        let body = requests[3].json_body().cloned().unwrap();
        assert_eq!(body["region"], "us-east4-b");
        assert_eq!(body["vpcId"], "default");
        assert_eq!(body["subnetId"], "projects/default-project/regions/us-east4/subnetworks/default");
        assert_eq!(body["capacityTier"], "cloudStorage");
        assert_eq!(body["tierLevel"], "standard");
        assert_eq!(body["writingSpeedState"], "NORMAL");
        assert_eq!(body["gcpLabels"], json!([{"labelKey": "env", "labelValue": "test"}]));
        assert_eq!(body["vsaMetadata"]["instanceType"], "n1-standard-8");
        assert!(body.get("haParams").is_none());
    }

    #[tokio::test]
    async fn test_create_ha_with_shared_vpc() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"gcpVsaWorkingEnvironments": []}))
            .reply(200, json!({"nssAccounts": [{"publicId": "nss-1"}]}))
            .reply_raw(with_request_id(json!({"publicId": "we-ha"}), "req-2"))
            .reply(200, json!({"status": 1}));

        let mut args = default_args();
        args["is_ha"] = json!(true);
        args["workspace_id"] = json!("workspace-abc");
        args["license_type"] = json!("gcp-ha-cot-premium-byol");
        args["platform_serial_number"] = json!("90920130000000001020");
        args["network_project_id"] = json!("host-project");
        args["vpc0_node_and_data_connectivity"] = json!("vpc0");
        args["vpc1_cluster_connectivity"] = json!("vpc1");
        args["subnet0_node_and_data_connectivity"] = json!("subnet0");
        args["subnet1_cluster_connectivity"] = json!("subnet1");
        args["vpc0_firewall_rule_name"] = json!("rule0");
        args["mediator_zone"] = json!("us-east4-c");
        let result = CloudManagerCvoGcp.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);

        let requests = mock.requests();
        assert!(requests[2].url.ends_with("/occm/api/accounts"));
        assert!(requests[3].url.ends_with("/occm/api/gcp/ha/working-environments"));
        let body = requests[3].json_body().cloned().unwrap();
        assert_eq!(body["nssAccount"], "nss-1");
        assert_eq!(body["subnetId"], "projects/host-project/regions/us-east4/subnetworks/default");
        let ha = &body["haParams"];
        assert_eq!(
            ha["vpc0NodeAndDataConnectivity"],
            "https://www.googleapis.com/compute/v1/projects/host-project/global/networks/vpc0"
        );
        assert_eq!(
            ha["vpc1ClusterConnectivity"],
            "https://www.googleapis.com/compute/v1/projects/default-project/global/networks/vpc1"
        );
        assert_eq!(ha["subnet0NodeAndDataConnectivity"], "projects/host-project/regions/us-east4/subnetworks/subnet0");
        assert_eq!(ha["subnet1ClusterConnectivity"], "projects/default-project/regions/us-east4/subnetworks/subnet1");
        assert_eq!(ha["vpc0FirewallRuleName"], "rule0");
        assert_eq!(ha["mediatorZone"], "us-east4-c");
        assert!(ha.get("vpc2HAConnectivity").is_none());
    }

    #[tokio::test]
    async fn test_latest_version_conflict() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"gcpVsaWorkingEnvironments": []}));
        let mut args = default_args();
        args["ontap_version"] = json!("ONTAP-9.10.1.gcp");
        let err = CloudManagerCvoGcp.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
    }

    #[tokio::test]
    async fn test_delete_uses_reported_api_root() {
        let mock = MockTransport::new();
        mock.token()
            .reply(
                200,
                json!({"gcpVsaWorkingEnvironments": [{
                    "name": "testcvo",
                    "publicId": "VsaWorkingEnvironment-gcp1",
                    "cloudProviderName": "GCP",
                    "isHA": true
                }]}),
            )
            .reply_raw(with_request_id(json!({}), "req-3"))
            .reply(200, json!({"status": 1}));

        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerCvoGcp.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        let calls = mock.calls();
        assert_eq!(calls[2].0, HttpMethod::Delete);
        assert!(calls[2]
            .1
            .ends_with("/occm/api/gcp/ha/working-environments/VsaWorkingEnvironment-gcp1"));
    }

    #[tokio::test]
    async fn test_absent_and_missing_is_noop() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"gcpVsaWorkingEnvironments": []}));
        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerCvoGcp.run(args, &mock.context()).await.unwrap();
        assert!(!result.changed);
        assert!(result.warnings.is_empty());
        assert_eq!(mock.remaining(), 0);
    }
}
