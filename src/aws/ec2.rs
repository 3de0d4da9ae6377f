//! Instance address lookup through the EC2 Query API (`DescribeInstances`).
//!
//! The response is XML. Only two things are read from it: the first
//! network interface's `privateIpAddress` and, on failure, the
//! `<Code>`/`<Message>` of the first error.
//!
//! Environments with a configured management role are looked up under that
//! role (STS `AssumeRole`); the others use the broker's own credentials.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use super::sigv4::SigV4Signer;
use super::sts::{session_name, StsClient};
use crate::errors::AppError;
use crate::models::RequestContext;
use crate::services::http::ServiceClient;
use crate::services::InstanceDirectory;

const SERVICE: &str = "ec2";
const API_VERSION: &str = "2016-11-15";

static NETWORK_INTERFACE_SET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<networkInterfaceSet>(.*?)</networkInterfaceSet>")
        .expect("invalid networkInterfaceSet regex")
});

/// `<item>` boundaries and `privateIpAddress` values, in document order.
static ITEM_OR_PRIVATE_IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)item>|<privateIpAddress>\s*([^<\s]+)\s*</privateIpAddress>")
        .expect("invalid item/privateIpAddress regex")
});

static ERROR_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Code>([^<]*)</Code>").expect("invalid error code regex"));

static ERROR_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Message>([^<]*)</Message>").expect("invalid error message regex"));

/// Private address of the first network interface of the first instance
/// in a `DescribeInstancesResponse`.
///
/// Only the first interface `<item>` is read, and only its own
/// `privateIpAddress`. Addresses nested deeper (`privateIpAddressesSet`) or
/// belonging to later interfaces are ignored.
pub fn first_interface_private_ip(xml: &str) -> Option<String> {
    let interfaces = NETWORK_INTERFACE_SET.captures(xml)?.get(1)?.as_str();

    // depth 0: before the first item, 1: directly inside it, >1: nested
    let mut depth = 0usize;
    for cap in ITEM_OR_PRIVATE_IP.captures_iter(interfaces) {
        match (cap.get(1), cap.get(2)) {
            (Some(slash), _) if slash.as_str() == "/" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return None;
                }
            }
            (Some(_), _) => depth += 1,
            (None, Some(ip)) if depth == 1 => return Some(ip.as_str().to_string()),
            _ => {}
        }
    }
    None
}

/// `"<Code>: <Message>"` from an EC2 error response.
pub fn error_summary(xml: &str) -> Option<String> {
    let code = ERROR_CODE.captures(xml)?.get(1)?.as_str().to_string();
    let message = ERROR_MESSAGE
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();
    Some(format!("{}: {}", code, message))
}

pub struct Ec2InstanceDirectory {
    endpoint: String,
    signer: Option<SigV4Signer>,
    http: ServiceClient,
    sts: Option<StsClient>,
    roles: HashMap<String, String>,
}

impl Ec2InstanceDirectory {
    pub fn new(endpoint: impl Into<String>, signer: Option<SigV4Signer>, http: ServiceClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            signer,
            http,
            sts: None,
            roles: HashMap::new(),
        }
    }

    /// Look up instances of the environments in `roles` (env id → role ARN)
    /// under their own role, assumed through `sts`.
    pub fn with_environment_roles(mut self, sts: StsClient, roles: HashMap<String, String>) -> Self {
        self.sts = Some(sts);
        self.roles = roles;
        self
    }

    pub fn from_config(aws: &crate::config::AwsConfig, http: ServiceClient) -> Self {
        let directory = Self::new(
            aws.ec2_endpoint.clone(),
            SigV4Signer::from_config(aws, SERVICE),
            http.clone(),
        );
        if aws.environment_roles.is_empty() {
            return directory;
        }
        directory.with_environment_roles(
            StsClient::new(aws.sts_endpoint.clone(), http),
            aws.environment_roles.clone(),
        )
    }

    /// Signer for lookups in `environment_id`: assumed-role credentials when
    /// the environment has a role, the broker's own otherwise.
    async fn signer_for(&self, environment_id: &str) -> Result<SigV4Signer, AppError> {
        let base = self.signer.as_ref().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("AWS credentials are not configured"))
        })?;

        match (self.roles.get(environment_id), &self.sts) {
            (Some(role_arn), Some(sts)) => {
                let creds = sts
                    .assume_role(base, role_arn, &session_name(environment_id))
                    .await?;
                Ok(creds.signer(base.region(), SERVICE))
            }
            _ => Ok(base.clone()),
        }
    }

    fn describe_instances_body(instance_id: &str) -> String {
        format!(
            "Action=DescribeInstances&Version={}&InstanceId.1={}",
            API_VERSION,
            urlencoding::encode(instance_id)
        )
    }
}

#[async_trait]
impl InstanceDirectory for Ec2InstanceDirectory {
    async fn private_ip_address(
        &self,
        _ctx: &RequestContext,
        environment_id: &str,
        instance_id: &str,
    ) -> Result<Option<String>, AppError> {
        let signer = self.signer_for(environment_id).await?;

        let body = Self::describe_instances_body(instance_id);
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        signer.sign("POST", &self.endpoint, &mut headers, body.as_bytes())?;

        tracing::debug!(environment_id, instance_id, "DescribeInstances");
        let (status, text) = self
            .http
            .post_raw(SERVICE, &self.endpoint, headers, body.into_bytes())
            .await?;

        if !status.is_success() {
            let summary = error_summary(&text).unwrap_or_else(|| format!("status={}", status));
            return Err(AppError::upstream(SERVICE, summary));
        }

        Ok(first_interface_private_ip(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, header_exists, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DESCRIBE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>8f7724cf-496f-496e-8fe3-example</requestId>
    <reservationSet>
        <item>
            <reservationId>r-1234567890abcdef0</reservationId>
            <instancesSet>
                <item>
                    <instanceId>i-1</instanceId>
                    <privateIpAddress>10.0.9.9</privateIpAddress>
                    <networkInterfaceSet>
                        <item>
                            <networkInterfaceId>eni-1</networkInterfaceId>
                            <privateIpAddress>10.0.0.5</privateIpAddress>
                            <privateIpAddressesSet>
                                <item>
                                    <privateIpAddress>10.0.0.5</privateIpAddress>
                                    <primary>true</primary>
                                </item>
                            </privateIpAddressesSet>
                        </item>
                        <item>
                            <networkInterfaceId>eni-2</networkInterfaceId>
                            <privateIpAddress>10.0.1.7</privateIpAddress>
                        </item>
                    </networkInterfaceSet>
                </item>
            </instancesSet>
        </item>
    </reservationSet>
</DescribeInstancesResponse>"#;

    const ERROR_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Errors><Error><Code>InvalidInstanceID.NotFound</Code><Message>The instance ID 'i-404' does not exist</Message></Error></Errors><RequestID>abc</RequestID></Response>"#;

    fn directory(endpoint: &str) -> Ec2InstanceDirectory {
        Ec2InstanceDirectory::new(
            endpoint,
            Some(SigV4Signer::new("AKIDEXAMPLE", "secret", None, "us-east-1", "ec2")),
            ServiceClient::new(Duration::from_secs(5), 0).unwrap(),
        )
    }

    const ASSUME_ROLE_RESPONSE: &str = "<AssumeRoleResponse><AssumeRoleResult><Credentials>\
        <AccessKeyId>ASIAENVONE</AccessKeyId>\
        <SecretAccessKey>envOneSecret</SecretAccessKey>\
        <SessionToken>envOneToken</SessionToken>\
        <Expiration>2026-10-19T12:15:00Z</Expiration>\
        </Credentials></AssumeRoleResult></AssumeRoleResponse>";

    fn directory_with_roles(base_uri: &str) -> Ec2InstanceDirectory {
        let http = ServiceClient::new(Duration::from_secs(5), 0).unwrap();
        let roles = HashMap::from([(
            "env-1".to_string(),
            "arn:aws:iam::111122223333:role/env-mgmt".to_string(),
        )]);
        Ec2InstanceDirectory::new(
            format!("{}/ec2/", base_uri),
            Some(SigV4Signer::new("AKIDEXAMPLE", "secret", None, "us-east-1", "ec2")),
            http.clone(),
        )
        .with_environment_roles(StsClient::new(format!("{}/sts/", base_uri), http), roles)
    }

    #[test]
    fn test_first_interface_ip_skips_instance_level_address() {
        assert_eq!(first_interface_private_ip(DESCRIBE_RESPONSE), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn test_no_interfaces_yields_none() {
        let xml = "<DescribeInstancesResponse><reservationSet/></DescribeInstancesResponse>";
        assert_eq!(first_interface_private_ip(xml), None);

        let xml = "<instancesSet><item><networkInterfaceSet></networkInterfaceSet></item></instancesSet>";
        assert_eq!(first_interface_private_ip(xml), None);
    }

    #[test]
    fn test_first_interface_without_address_does_not_borrow_the_next() {
        let xml = "<networkInterfaceSet>\
            <item><networkInterfaceId>eni-1</networkInterfaceId>\
              <privateIpAddressesSet><item><privateIpAddress>10.0.0.6</privateIpAddress></item></privateIpAddressesSet>\
            </item>\
            <item><networkInterfaceId>eni-2</networkInterfaceId><privateIpAddress>10.0.1.7</privateIpAddress></item>\
            </networkInterfaceSet>";
        assert_eq!(first_interface_private_ip(xml), None);
    }

    #[test]
    fn test_first_interface_address_after_nested_set() {
        let xml = "<networkInterfaceSet><item>\
            <privateIpAddressesSet><item><privateIpAddress>10.0.0.6</privateIpAddress></item></privateIpAddressesSet>\
            <privateIpAddress>10.0.0.5</privateIpAddress>\
            </item></networkInterfaceSet>";
        assert_eq!(first_interface_private_ip(xml), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn test_error_summary() {
        assert_eq!(
            error_summary(ERROR_RESPONSE).as_deref(),
            Some("InvalidInstanceID.NotFound: The instance ID 'i-404' does not exist")
        );
        assert_eq!(error_summary("<ok/>"), None);
    }

    #[tokio::test]
    async fn test_lookup_sends_signed_describe_instances() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .and(body_string_contains("Action=DescribeInstances"))
            .and(body_string_contains("Version=2016-11-15"))
            .and(body_string_contains("InstanceId.1=i-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIBE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let ip = directory(&format!("{}/", mock_server.uri()))
            .private_ip_address(&RequestContext::default(), "env-1", "i-1")
            .await
            .unwrap();

        assert_eq!(ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_lookup_error_response_is_upstream_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(ERROR_RESPONSE))
            .mount(&mock_server)
            .await;

        let err = directory(&mock_server.uri())
            .private_ip_address(&RequestContext::default(), "env-1", "i-404")
            .await
            .unwrap_err();

        match err {
            AppError::Upstream { service, message } => {
                assert_eq!(service, "ec2");
                assert!(message.starts_with("InvalidInstanceID.NotFound"), "message: {}", message);
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_uses_assumed_role_of_the_environment() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sts/"))
            .and(header_regex("authorization", r"Credential=AKIDEXAMPLE/\d{8}/us-east-1/sts/"))
            .and(body_string_contains("Action=AssumeRole"))
            .and(body_string_contains("RoleSessionName=connbroker-env-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ASSUME_ROLE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/ec2/"))
            .and(header("x-amz-security-token", "envOneToken"))
            .and(header_regex("authorization", r"Credential=ASIAENVONE/\d{8}/us-east-1/ec2/"))
            .and(body_string_contains("InstanceId.1=i-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIBE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let ip = directory_with_roles(&mock_server.uri())
            .private_ip_address(&RequestContext::default(), "env-1", "i-1")
            .await
            .unwrap();

        assert_eq!(ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_lookup_without_role_uses_broker_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sts/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ASSUME_ROLE_RESPONSE))
            .expect(0)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/ec2/"))
            .and(header_regex("authorization", r"Credential=AKIDEXAMPLE/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIBE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let ip = directory_with_roles(&mock_server.uri())
            .private_ip_address(&RequestContext::default(), "env-2", "i-1")
            .await
            .unwrap();

        assert_eq!(ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_assume_role_failure_skips_lookup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sts/"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<ErrorResponse><Error><Code>AccessDenied</Code><Message>denied</Message></Error></ErrorResponse>",
            ))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/ec2/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIBE_RESPONSE))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = directory_with_roles(&mock_server.uri())
            .private_ip_address(&RequestContext::default(), "env-1", "i-1")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upstream { service: "sts", .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_lookup_without_credentials_fails() {
        let dir = Ec2InstanceDirectory::new(
            "http://127.0.0.1:1/",
            None,
            ServiceClient::new(Duration::from_secs(1), 0).unwrap(),
        );
        let result = dir
            .private_ip_address(&RequestContext::default(), "env-1", "i-1")
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
