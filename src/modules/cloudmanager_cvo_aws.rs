//! Cloud Volumes ONTAP working environments on AWS
//!
//! Single node systems sit in one subnet of a VPC; HA pairs spread their
//! nodes and mediator over the subnets given in the HA parameters.

use super::connection::CloudManagerConnection;
use super::cvo::{is_licensed_serial, validate_version, CvoClient, CvoProvider, CvoRequest};
use crate::domain::ports::{Module, ModuleContext, ModuleResult, State};
use crate::error::Result;
use crate::reconcile::{ensure, parse_args, schema_of, ModuleArgs, ReconcileHelper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const NAME: &str = "cloudmanager_cvo_aws";

const SINGLE_NODE_API: &str = "/occm/api/vsa/working-environments";
const HA_API: &str = "/occm/api/aws/ha/working-environments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseType {
    #[default]
    CotStandardPaygo,
    CotPremiumPaygo,
    CotExplorePaygo,
    CotPremiumByol,
    HaCotStandardPaygo,
    HaCotPremiumPaygo,
    HaCotPremiumByol,
    HaCotExplorePaygo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DataEncryptionType {
    #[default]
    AWS,
    NONE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum EbsSizeUnit {
    GB,
    #[default]
    TB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EbsVolumeType {
    #[default]
    Gp2,
    Io1,
    Sc1,
    St1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TierLevel {
    #[default]
    Normal,
    Ia,
    IaSingle,
    Intelligent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum CvoCapacityTier {
    #[default]
    S3,
    NONE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstanceTenancy {
    #[default]
    Default,
    Dedicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FailoverMode {
    PrivateIP,
    FloatingIP,
}

/// One AWS resource tag
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AwsTag {
    pub tag_key: String,
    pub tag_value: String,
}

fn default_instance_type() -> String {
    "m5.2xlarge".into()
}

fn default_ontap_version() -> String {
    "latest".into()
}

fn default_ebs_volume_size() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

/// Parameters of `cloudmanager_cvo_aws`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CvoAwsArgs {
    #[serde(flatten)]
    pub connection: CloudManagerConnection,
    #[serde(default)]
    pub state: State,
    pub name: String,
    /// Connector client ID
    pub client_id: String,
    pub region: String,
    pub svm_password: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub license_type: LicenseType,
    /// Tenant (workspace) ID, the first tenant when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Required for single node systems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub data_encryption_type: DataEncryptionType,
    #[serde(default = "default_ebs_volume_size")]
    pub ebs_volume_size: u64,
    #[serde(default)]
    pub ebs_volume_size_unit: EbsSizeUnit,
    #[serde(default)]
    pub ebs_volume_type: EbsVolumeType,
    #[serde(default = "default_ontap_version")]
    pub ontap_version: String,
    #[serde(default = "default_true")]
    pub use_latest_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number: Option<String>,
    #[serde(default)]
    pub tier_level: TierLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nss_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_speed_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u64>,
    #[serde(default)]
    pub capacity_tier: CvoCapacityTier,
    #[serde(default)]
    pub instance_tenancy: InstanceTenancy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile_name: Option<String>,
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
    #[serde(default = "default_true")]
    pub optimized_network_utilization: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_tag: Option<Vec<AwsTag>>,
    #[serde(default)]
    pub is_ha: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_serial_number_node2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_mode: Option<FailoverMode>,
    #[serde(default = "default_true")]
    pub mediator_assign_public_ip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node1_subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node2_subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediator_subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediator_key_pair_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_floating_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_floating_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_floating_ip2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svm_floating_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_ids: Option<Vec<String>>,
}

impl ModuleArgs for CvoAwsArgs {}

impl CvoAwsArgs {
    fn ha_params(&self) -> Value {
        let mut params = Map::new();
        params.insert("mediatorAssignPublicIP".into(), json!(self.mediator_assign_public_ip));
        let optional = [
            ("failoverMode", self.failover_mode.map(|m| json!(m))),
            ("node1SubnetId", self.node1_subnet_id.as_ref().map(|v| json!(v))),
            ("node2SubnetId", self.node2_subnet_id.as_ref().map(|v| json!(v))),
            ("mediatorSubnetId", self.mediator_subnet_id.as_ref().map(|v| json!(v))),
            ("mediatorKeyPairName", self.mediator_key_pair_name.as_ref().map(|v| json!(v))),
            ("clusterFloatingIP", self.cluster_floating_ip.as_ref().map(|v| json!(v))),
            ("dataFloatingIP", self.data_floating_ip.as_ref().map(|v| json!(v))),
            ("dataFloatingIP2", self.data_floating_ip2.as_ref().map(|v| json!(v))),
            ("svmFloatingIP", self.svm_floating_ip.as_ref().map(|v| json!(v))),
            ("routeTableIds", self.route_table_ids.as_ref().map(|v| json!(v))),
            (
                "platformSerialNumberNode1",
                self.platform_serial_number_node1.as_ref().map(|v| json!(v)),
            ),
            (
                "platformSerialNumberNode2",
                self.platform_serial_number_node2.as_ref().map(|v| json!(v)),
            ),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.insert(key.into(), value);
            }
        }
        Value::Object(params)
    }
}

impl CvoRequest for CvoAwsArgs {
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
            self.platform_serial_number.is_none() || self.license_type == LicenseType::CotPremiumByol,
            "platform_serial_number parameter required only when having license_type as cot-premium-byol",
        )?;
        ensure(
            self.iops.is_some() == (self.ebs_volume_type == EbsVolumeType::Io1),
            "iops parameter required when having ebs_volume_type as io1",
        )?;
        if self.is_ha && self.license_type == LicenseType::HaCotPremiumByol {
            ensure(
                self.platform_serial_number_node1.is_some() && self.platform_serial_number_node2.is_some(),
                "both platform_serial_number_node1 and platform_serial_number_node2 parameters are required \
                 when having ha type as true and license_type as ha-cot-premium-byol",
            )?;
        }
        if !self.is_ha {
            ensure(
                self.subnet_id.is_some() && self.vpc_id.is_some(),
                "subnet_id and vpc_id are required when is_ha is false",
            )?;
        }
        Ok(())
    }

    fn needs_nss_account(&self) -> bool {
        if self.platform_serial_number.is_some() {
            is_licensed_serial(self.platform_serial_number.as_deref())
                && self.license_type == LicenseType::CotPremiumByol
        } else {
            is_licensed_serial(self.platform_serial_number_node1.as_deref())
                && is_licensed_serial(self.platform_serial_number_node2.as_deref())
                && self.license_type == LicenseType::HaCotPremiumByol
        }
    }

    fn create_api(&self) -> String {
        let api = if self.is_ha { HA_API } else { SINGLE_NODE_API };
        api.to_string()
    }

    fn create_body(&self, tenant_id: &str, nss_account: Option<&str>) -> Value {
        let mut body = json!({
            "name": self.name,
            "region": self.region,
            "tenantId": tenant_id,
            "vpcId": self.vpc_id,
            "dataEncryptionType": self.data_encryption_type,
            "ebsVolumeSize": {
                "size": self.ebs_volume_size,
                "unit": self.ebs_volume_size_unit,
            },
            "ebsVolumeType": self.ebs_volume_type,
            "svmPassword": self.svm_password,
            "backupVolumesToCbs": self.backup_volumes_to_cbs,
            "enableCompliance": self.enable_compliance,
            "enableMonitoring": self.enable_monitoring,
            "optimizedNetworkUtilization": self.optimized_network_utilization,
            "instanceTenancy": self.instance_tenancy,
            "vsaMetadata": {
                "ontapVersion": self.ontap_version,
                "useLatestVersion": self.use_latest_version,
                "licenseType": self.license_type,
                "instanceType": self.instance_type,
            },
        });
        if self.capacity_tier == CvoCapacityTier::S3 {
            body["capacityTier"] = json!(self.capacity_tier);
            body["tierLevel"] = json!(self.tier_level);
        }
        if let Some(serial) = &self.platform_serial_number {
            body["vsaMetadata"]["platformSerialNumber"] = json!(serial);
        }
        if let Some(nss) = nss_account {
            body["nssAccount"] = json!(nss);
        }
        if let Some(state) = &self.writing_speed_state {
            body["writingSpeedState"] = json!(state);
        }
        if let Some(iops) = self.iops {
            body["iops"] = json!(iops);
        }
        if let Some(profile) = &self.instance_profile_name {
            body["instanceProfileName"] = json!(profile);
        }
        if let Some(group) = &self.security_group_id {
            body["securityGroupId"] = json!(group);
        }
        if let Some(account) = &self.cloud_provider_account {
            body["cloudProviderAccount"] = json!(account);
        }
        if let Some(kms_key_id) = &self.kms_key_id {
            body["awsEncryptionParameters"] = json!({"kmsKeyId": kms_key_id});
        }
        if let Some(tags) = &self.aws_tag {
            body["awsTags"] = tags
                .iter()
                .map(|t| json!({"tagKey": t.tag_key, "tagValue": t.tag_value}))
                .collect();
        }
        if self.is_ha {
            body["haParams"] = self.ha_params();
        } else {
            body["subnetId"] = json!(self.subnet_id);
        }
        body
    }
}

/// The `cloudmanager_cvo_aws` module
pub struct CloudManagerCvoAws;

#[async_trait]
impl Module for CloudManagerCvoAws {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> schemars::schema::RootSchema {
        schema_of::<CvoAwsArgs>()
    }

    async fn run(&self, args: Value, ctx: &ModuleContext) -> Result<ModuleResult> {
        let args: CvoAwsArgs = parse_args(NAME, args)?;
        let client = args.connection.client(Some(&args.client_id), ctx);
        let cvo = CvoClient::new(client, CvoProvider::Aws)?;
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
            "name": "TestA",
            "client_id": "test",
            "region": "us-west-1",
            "vpc_id": "vpc-test",
            "subnet_id": "subnet-test",
            "svm_password": "password",
            "refresh_token": "myrefresh_token",
            "is_ha": false
        })
    }

    fn with_request_id(status: u16, body: Value, id: &str) -> ApiResponse {
        ApiResponse::new(status, body.to_string()).with_header("OnCloud-Request-Id", id)
    }

    fn existing() -> Value {
        json!({
            "vsaWorkingEnvironments": [{"name": "TestA", "publicId": "VsaWorkingEnvironment-abcdefg12345"}]
        })
    }

    #[tokio::test]
    async fn test_create_single_node() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"vsaWorkingEnvironments": []}))
            .reply(200, json!([{"publicId": "workspace-abc"}]))
            .reply_raw(with_request_id(
                200,
                json!({"publicId": "VsaWorkingEnvironment-abcdefg12345"}),
                "req-1",
            ))
            .reply(200, json!({"status": 0}))
            .reply(200, json!({"status": 1}));

        let result = CloudManagerCvoAws.run(default_args(), &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(
            result.extra["working_environment_id"],
            json!("VsaWorkingEnvironment-abcdefg12345")
        );

        let requests = mock.requests();
        assert!(requests[3].url.ends_with(SINGLE_NODE_API));
        let body = requests[3].json_body().cloned().unwrap();
        assert_eq!(body["tenantId"], "workspace-abc");
        assert_eq!(body["subnetId"], "subnet-test");
        assert_eq!(body["vsaMetadata"]["licenseType"], "cot-standard-paygo");
        assert_eq!(body["vsaMetadata"]["instanceType"], "m5.2xlarge");
        assert_eq!(body["ebsVolumeSize"], json!({"size": 1, "unit": "TB"}));
        assert_eq!(body["capacityTier"], "S3");
        assert!(requests[5].url.ends_with("/occm/api/audit/activeTask/req-1"));
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_create_ha() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"vsaWorkingEnvironments": []}))
            .reply_raw(with_request_id(200, json!({"publicId": "we-ha"}), "req-2"))
            .reply(200, json!({"status": 1}));

        let mut args = default_args();
        args["is_ha"] = json!(true);
        args["workspace_id"] = json!("workspace-abc");
        args["license_type"] = json!("ha-cot-standard-paygo");
        args["failover_mode"] = json!("FloatingIP");
        args["node1_subnet_id"] = json!("subnet-1");
        let result = CloudManagerCvoAws.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);

        let requests = mock.requests();
        assert!(requests[2].url.ends_with(HA_API));
        let body = requests[2].json_body().cloned().unwrap();
        assert_eq!(
            body["haParams"],
            json!({
                "mediatorAssignPublicIP": true,
                "failoverMode": "FloatingIP",
                "node1SubnetId": "subnet-1"
            })
        );
        assert!(body.get("subnetId").is_none());
    }

    #[tokio::test]
    async fn test_create_task_failure() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, json!({"vsaWorkingEnvironments": []}))
            .reply(200, json!([{"publicId": "workspace-abc"}]))
            .reply_raw(with_request_id(200, json!({"publicId": "we"}), "req-3"))
            .reply(200, json!({"status": -1, "error": "quota exceeded"}));

        let err = CloudManagerCvoAws.run(default_args(), &mock.context()).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"), "{}", err);
    }

    #[tokio::test]
    async fn test_existing_warns() {
        let mock = MockTransport::new();
        mock.token().reply(200, existing());
        let result = CloudManagerCvoAws.run(default_args(), &mock.context()).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.warnings, vec!["TestA already exists".to_string()]);
        assert_eq!(result.extra["working_environment_id"], Value::Null);
    }

    #[tokio::test]
    async fn test_delete() {
        let mock = MockTransport::new();
        mock.token()
            .reply(200, existing())
            .reply_raw(with_request_id(200, json!({}), "req-4"))
            .reply(200, json!({"status": 1}));

        let mut args = default_args();
        args["state"] = json!("absent");
        let result = CloudManagerCvoAws.run(args, &mock.context()).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls()[2].0, HttpMethod::Delete);
        assert!(mock.calls()[2]
            .1
            .ends_with("/occm/api/vsa/working-environments/VsaWorkingEnvironment-abcdefg12345"));
    }

    #[tokio::test]
    async fn test_check_mode_does_not_create() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"vsaWorkingEnvironments": []}));
        let ctx = mock.context().with_check_mode(true);
        let result = CloudManagerCvoAws.run(default_args(), &ctx).await.unwrap();
        assert!(result.changed);
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_single_node_requires_vpc() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"vsaWorkingEnvironments": []}));
        let mut args = default_args();
        args.as_object_mut().unwrap().remove("vpc_id");
        let err = CloudManagerCvoAws.run(args, &mock.context()).await.unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
    }

    #[tokio::test]
    async fn test_io1_requires_iops() {
        let mock = MockTransport::new();
        mock.token().reply(200, json!({"vsaWorkingEnvironments": []}));
        let mut args = default_args();
        args["ebs_volume_type"] = json!("io1");
        let err = CloudManagerCvoAws.run(args, &mock.context()).await.unwrap_err();
        assert_eq!(err.to_string(), "iops parameter required when having ebs_volume_type as io1");
    }

    #[test]
    fn test_byol_needs_nss_account() {
        let mut args: CvoAwsArgs = parse_args(NAME, default_args()).unwrap();
        assert!(!args.needs_nss_account());
        args.license_type = LicenseType::CotPremiumByol;
        args.platform_serial_number = Some("90920130000000001020".into());
        assert!(args.needs_nss_account());
        args.platform_serial_number = Some("Eval-90920130000000001020".into());
        assert!(!args.needs_nss_account());
    }
}
