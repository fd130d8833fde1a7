//! Connection parameters shared by the modules of one vendor surface
//!
//! Each group is flattened into the module arguments and knows how to build
//! its client from the run context.

use crate::clients::{
    AwsCvsClient, AwsCvsConfig, AzureClient, AzureConfig, CloudManagerClient, CloudManagerConfig,
    StorageGridClient, StorageGridConfig, UnifiedManagerClient, UnifiedManagerConfig,
};
use crate::domain::ports::ModuleContext;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Cloud Manager credentials
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloudManagerConnection {
    /// Auth0 refresh token
    pub refresh_token: String,
}

impl CloudManagerConnection {
    pub fn client(&self, client_id: Option<&str>, ctx: &ModuleContext) -> CloudManagerClient {
        let mut config = CloudManagerConfig::new(&self.refresh_token);
        if let Some(client_id) = client_id {
            config = config.with_client_id(client_id);
        }
        CloudManagerClient::new(config, ctx.transport.clone())
            .with_poll_interval(ctx.poll_interval_override)
    }
}

/// StorageGRID admin node and token
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageGridConnection {
    pub api_url: String,
    pub auth_token: String,
    #[serde(default = "default_true")]
    pub validate_certs: bool,
}

impl StorageGridConnection {
    pub fn client(&self, ctx: &ModuleContext) -> StorageGridClient {
        StorageGridClient::new(
            StorageGridConfig {
                api_url: self.api_url.clone(),
                auth_token: self.auth_token.clone(),
                validate_certs: self.validate_certs,
            },
            ctx.transport.clone(),
        )
    }
}

/// Unified Manager host and basic auth credentials
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnifiedManagerConnection {
    pub hostname: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(default = "default_true")]
    pub validate_certs: bool,
}

impl UnifiedManagerConnection {
    pub fn client(&self, ctx: &ModuleContext) -> UnifiedManagerClient {
        UnifiedManagerClient::new(
            UnifiedManagerConfig {
                hostname: self.hostname.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                port: self.http_port,
                validate_certs: self.validate_certs,
            },
            ctx.transport.clone(),
        )
    }
}

/// AWS Cloud Volumes Service endpoint and keys
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AwsCvsConnection {
    pub api_url: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub validate_certs: bool,
}

impl AwsCvsConnection {
    pub fn client(&self, ctx: &ModuleContext) -> AwsCvsClient {
        AwsCvsClient::new(
            AwsCvsConfig {
                api_url: self.api_url.clone(),
                api_key: self.api_key.clone(),
                secret_key: self.secret_key.clone(),
                validate_certs: self.validate_certs,
            },
            ctx.transport.clone(),
        )
        .with_poll_interval(ctx.poll_interval_override)
    }
}

/// Azure subscription and service principal
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AzureConnection {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Bearer token for Resource Manager, instead of the service principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub resource_group: String,
}

impl AzureConnection {
    pub fn client(&self, ctx: &ModuleContext) -> AzureClient {
        let mut config = AzureConfig::new(&self.subscription_id);
        config.tenant = self.tenant.clone();
        config.client_id = self.client_id.clone();
        config.secret = self.secret.clone();
        config.auth_token = self.auth_token.clone();
        config.api_style = ctx.azure_api_style;
        AzureClient::new(config, ctx.transport.clone()).with_poll_interval(ctx.poll_interval_override)
    }
}
