//! Built-in Landing Zone Catalog
//!
//! Network: VPC with one public and one private subnet, internet and NAT
//! gateways, and VPC flow logs into a retained log group.
//! Logging: access-log bucket, log bucket with lifecycle rules that notifies
//! an encrypted SQS queue with dead-letter redrive.
//! Guard rails: account-wide S3 public access block.

use serde_json::json;

use crate::error::SynthesisError;
use crate::fragments::{Fragment, FragmentCatalog, Output, PropertyValue as V, ResourceType as T};
use crate::params::Parameter;

const CIDR_PATTERN: &str = r"(\d{1,3}\.){3}\d{1,3}/(1[6-9]|2[0-8])";

fn all_public_access_blocked() -> V {
    V::map([
        ("BlockPublicAcls", V::literal(true)),
        ("BlockPublicPolicy", V::literal(true)),
        ("IgnorePublicAcls", V::literal(true)),
        ("RestrictPublicBuckets", V::literal(true)),
    ])
}

fn sse_s3() -> V {
    V::literal(json!({
        "ServerSideEncryptionConfiguration": [
            {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}
        ]
    }))
}

fn bucket_arn(bucket: &str) -> V {
    V::join("", vec![V::literal("arn:aws:s3:::"), V::name_of(bucket)])
}

fn account_id() -> V {
    V::literal(json!({"Ref": "AWS::AccountId"}))
}

pub fn parameters() -> Vec<Parameter> {
    vec![
        Parameter::string("VpcCidr")
            .with_default("10.0.0.0/16")
            .with_pattern(CIDR_PATTERN)
            .with_description("CIDR block of the workload VPC"),
        Parameter::string("PublicSubnet1Cidr")
            .with_default("10.0.0.0/24")
            .with_pattern(CIDR_PATTERN),
        Parameter::string("PrivateSubnet1Cidr")
            .with_default("10.0.1.0/24")
            .with_pattern(CIDR_PATTERN),
        Parameter::enumeration("MapPublicIpOnLaunch", ["true", "false"])
            .with_default("false")
            .with_description("Assign public IPs to instances in the public subnet"),
        Parameter::number("LogRetentionDays")
            .with_default("365")
            .with_range(1.0, 3653.0),
        Parameter::number("LogExpirationDays")
            .with_default("2555")
            .with_range(1.0, 3650.0)
            .with_description("Days before log objects expire"),
        Parameter::number("MessageRetentionSeconds")
            .with_default("345600")
            .with_range(60.0, 1_209_600.0),
        Parameter::number("MaxReceiveCount")
            .with_default("5")
            .with_range(1.0, 1000.0),
        Parameter::string("GuardRailFunctionArn")
            .with_pattern(r"arn:aws[a-z-]*:lambda:[a-z0-9-]+:\d{12}:function:[A-Za-z0-9_-]+")
            .with_description("Lambda backing the account public access block resource"),
    ]
}

pub fn network() -> Vec<Fragment> {
    let first_az = V::literal(json!({"Fn::Select": [0, {"Fn::GetAZs": ""}]}));

    vec![
        Fragment::new("Vpc", T::VPC)
            .with_property("CidrBlock", V::param("VpcCidr"))
            .with_property("EnableDnsSupport", V::literal(true))
            .with_property("EnableDnsHostnames", V::literal(true)),
        Fragment::new("InternetGateway", T::INTERNET_GATEWAY),
        Fragment::new("GatewayAttachment", T::GATEWAY_ATTACHMENT)
            .with_property("VpcId", V::reference("Vpc"))
            .with_property("InternetGatewayId", V::reference("InternetGateway")),
        Fragment::new("PublicSubnet1", T::SUBNET)
            .with_property("VpcId", V::reference("Vpc"))
            .with_property("CidrBlock", V::param("PublicSubnet1Cidr"))
            .with_property("AvailabilityZone", first_az.clone())
            .with_property(
                "MapPublicIpOnLaunch",
                V::when("MapPublicIpOnLaunch", V::literal(true), V::literal(false)),
            ),
        Fragment::new("PrivateSubnet1", T::SUBNET)
            .with_property("VpcId", V::reference("Vpc"))
            .with_property("CidrBlock", V::param("PrivateSubnet1Cidr"))
            .with_property("AvailabilityZone", first_az)
            .with_property("MapPublicIpOnLaunch", V::literal(false)),
        Fragment::new("PublicRouteTable", T::ROUTE_TABLE)
            .with_property("VpcId", V::reference("Vpc")),
        Fragment::new("PublicDefaultRoute", T::ROUTE)
            .with_property("RouteTableId", V::reference("PublicRouteTable"))
            .with_property("DestinationCidrBlock", V::literal("0.0.0.0/0"))
            .with_property("GatewayId", V::reference("InternetGateway"))
            .depends_on("GatewayAttachment"),
        Fragment::new("PublicSubnet1RouteTableAssociation", T::ROUTE_TABLE_ASSOCIATION)
            .with_property("SubnetId", V::reference("PublicSubnet1"))
            .with_property("RouteTableId", V::reference("PublicRouteTable")),
        Fragment::new("NatGatewayEip", T::EIP)
            .with_property("Domain", V::literal("vpc"))
            .depends_on("GatewayAttachment"),
        Fragment::new("NatGateway", T::NAT_GATEWAY)
            .with_property("AllocationId", V::get_att("NatGatewayEip", "AllocationId"))
            .with_property("SubnetId", V::reference("PublicSubnet1")),
        Fragment::new("PrivateRouteTable", T::ROUTE_TABLE)
            .with_property("VpcId", V::reference("Vpc")),
        Fragment::new("PrivateDefaultRoute", T::ROUTE)
            .with_property("RouteTableId", V::reference("PrivateRouteTable"))
            .with_property("DestinationCidrBlock", V::literal("0.0.0.0/0"))
            .with_property("NatGatewayId", V::reference("NatGateway")),
        Fragment::new("PrivateSubnet1RouteTableAssociation", T::ROUTE_TABLE_ASSOCIATION)
            .with_property("SubnetId", V::reference("PrivateSubnet1"))
            .with_property("RouteTableId", V::reference("PrivateRouteTable")),
        Fragment::new("FlowLogGroup", T::LOG_GROUP)
            .with_property(
                "LogGroupName",
                V::join(
                    "/",
                    vec![V::literal(""), V::literal("vpc"), V::literal("flow-logs"), V::name_of("Vpc")],
                ),
            )
            .with_property("RetentionInDays", V::param("LogRetentionDays"))
            .with_exception(
                "encryption",
                "CloudWatch Logs encrypts log data at rest with service-managed keys",
            ),
        Fragment::new("FlowLogRole", T::IAM_ROLE)
            .with_property(
                "AssumeRolePolicyDocument",
                V::literal(json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": {"Service": "vpc-flow-logs.amazonaws.com"},
                        "Action": "sts:AssumeRole"
                    }]
                })),
            )
            .with_property(
                "Policies",
                V::List(vec![V::map([
                    ("PolicyName", V::literal("flow-log-delivery")),
                    (
                        "PolicyDocument",
                        V::map([
                            ("Version", V::literal("2012-10-17")),
                            (
                                "Statement",
                                V::List(vec![V::map([
                                    ("Effect", V::literal("Allow")),
                                    (
                                        "Action",
                                        V::literal(json!([
                                            "logs:CreateLogStream",
                                            "logs:PutLogEvents",
                                            "logs:DescribeLogStreams"
                                        ])),
                                    ),
                                    ("Resource", V::get_att("FlowLogGroup", "Arn")),
                                ])]),
                            ),
                        ]),
                    ),
                ])]),
            ),
        Fragment::new("VpcFlowLog", T::FLOW_LOG)
            .with_property("ResourceId", V::reference("Vpc"))
            .with_property("ResourceType", V::literal("VPC"))
            .with_property("TrafficType", V::literal("ALL"))
            .with_property("LogDestinationType", V::literal("cloud-watch-logs"))
            .with_property("LogGroupName", V::reference("FlowLogGroup"))
            .with_property("DeliverLogsPermissionArn", V::get_att("FlowLogRole", "Arn")),
    ]
}

pub fn logging() -> Vec<Fragment> {
    vec![
        Fragment::new("AccessLogBucket", T::S3_BUCKET)
            .named(["AccessLogs"])
            .account_scoped()
            .with_property("BucketName", V::name_of("AccessLogBucket"))
            .with_property("BucketEncryption", sse_s3())
            .with_property("PublicAccessBlockConfiguration", all_public_access_blocked())
            .with_property(
                "LifecycleConfiguration",
                V::map([(
                    "Rules",
                    V::List(vec![V::map([
                        ("Id", V::literal("expire-access-logs")),
                        ("Status", V::literal("Enabled")),
                        ("ExpirationInDays", V::param("LogExpirationDays")),
                    ])]),
                )]),
            )
            .with_exception(
                "access-logging",
                "Target of S3 server access logs; logging it would recurse",
            ),
        Fragment::new("AccessLogBucketPolicy", T::BUCKET_POLICY)
            .with_property("Bucket", V::reference("AccessLogBucket"))
            .with_property(
                "PolicyDocument",
                V::map([
                    ("Version", V::literal("2012-10-17")),
                    (
                        "Statement",
                        V::List(vec![V::map([
                            ("Sid", V::literal("AllowServerAccessLogDelivery")),
                            ("Effect", V::literal("Allow")),
                            ("Principal", V::literal(json!({"Service": "logging.s3.amazonaws.com"}))),
                            ("Action", V::literal("s3:PutObject")),
                            (
                                "Resource",
                                V::join("", vec![bucket_arn("AccessLogBucket"), V::literal("/*")]),
                            ),
                            (
                                "Condition",
                                V::map([(
                                    "StringEquals",
                                    V::map([("aws:SourceAccount", account_id())]),
                                )]),
                            ),
                        ])]),
                    ),
                ]),
            ),
        Fragment::new("LogBucket", T::S3_BUCKET)
            .named(["Logs"])
            .account_scoped()
            .with_property("BucketName", V::name_of("LogBucket"))
            .with_property("BucketEncryption", sse_s3())
            .with_property("PublicAccessBlockConfiguration", all_public_access_blocked())
            .with_property("VersioningConfiguration", V::literal(json!({"Status": "Enabled"})))
            .with_property(
                "LoggingConfiguration",
                V::map([
                    ("DestinationBucketName", V::reference("AccessLogBucket")),
                    ("LogFilePrefix", V::literal("logs/")),
                ]),
            )
            .with_property(
                "LifecycleConfiguration",
                V::map([(
                    "Rules",
                    V::List(vec![V::map([
                        ("Id", V::literal("archive-then-expire")),
                        ("Status", V::literal("Enabled")),
                        (
                            "Transitions",
                            V::literal(json!([{"StorageClass": "GLACIER", "TransitionInDays": 90}])),
                        ),
                        ("ExpirationInDays", V::param("LogExpirationDays")),
                        ("NoncurrentVersionExpiration", V::literal(json!({"NoncurrentDays": 30}))),
                    ])]),
                )]),
            )
            .with_property(
                "NotificationConfiguration",
                V::map([(
                    "QueueConfigurations",
                    V::List(vec![V::map([
                        ("Event", V::literal("s3:ObjectCreated:*")),
                        ("Queue", V::get_att("LogEventQueue", "Arn")),
                    ])]),
                )]),
            )
            // S3 checks the queue policy when the notification is created.
            .depends_on("LogEventQueuePolicy"),
        Fragment::new("LogDeadLetterQueue", T::SQS_QUEUE)
            .with_property("QueueName", V::name_of("LogDeadLetterQueue"))
            .with_property("SqsManagedSseEnabled", V::literal(true))
            .with_property("MessageRetentionPeriod", V::literal(1_209_600)),
        Fragment::new("LogEventQueue", T::SQS_QUEUE)
            .with_property("QueueName", V::name_of("LogEventQueue"))
            .with_property("SqsManagedSseEnabled", V::literal(true))
            .with_property("MessageRetentionPeriod", V::param("MessageRetentionSeconds"))
            .with_property("VisibilityTimeout", V::literal(300))
            .with_property(
                "RedrivePolicy",
                V::map([
                    ("deadLetterTargetArn", V::get_att("LogDeadLetterQueue", "Arn")),
                    ("maxReceiveCount", V::param("MaxReceiveCount")),
                ]),
            ),
        Fragment::new("LogEventQueuePolicy", T::QUEUE_POLICY)
            .with_property("Queues", V::List(vec![V::reference("LogEventQueue")]))
            .with_property(
                "PolicyDocument",
                V::map([
                    ("Version", V::literal("2012-10-17")),
                    (
                        "Statement",
                        V::List(vec![V::map([
                            ("Sid", V::literal("AllowLogBucketNotifications")),
                            ("Effect", V::literal("Allow")),
                            ("Principal", V::literal(json!({"Service": "s3.amazonaws.com"}))),
                            ("Action", V::literal("sqs:SendMessage")),
                            ("Resource", V::get_att("LogEventQueue", "Arn")),
                            (
                                "Condition",
                                V::map([
                                    // Built from the derived name: a GetAtt here would
                                    // make the bucket and this policy depend on each other.
                                    ("ArnLike", V::map([("aws:SourceArn", bucket_arn("LogBucket"))])),
                                    ("StringEquals", V::map([("aws:SourceAccount", account_id())])),
                                ]),
                            ),
                        ])]),
                    ),
                ]),
            ),
    ]
}

pub fn guard_rails() -> Vec<Fragment> {
    vec![Fragment::new("AccountPublicAccessBlock", "Custom::AccountPublicAccessBlock")
        .with_property("ServiceToken", V::param("GuardRailFunctionArn"))
        .with_property("BlockPublicAcls", V::literal(true))
        .with_property("BlockPublicPolicy", V::literal(true))
        .with_property("IgnorePublicAcls", V::literal(true))
        .with_property("RestrictPublicBuckets", V::literal(true))]
}

pub fn outputs() -> Vec<Output> {
    vec![
        Output::new("VpcId", V::reference("Vpc")).exported("Workload VPC"),
        Output::new("PublicSubnet1Id", V::reference("PublicSubnet1")).exported("Public subnet"),
        Output::new("PrivateSubnet1Id", V::reference("PrivateSubnet1")).exported("Private subnet"),
        Output::new("LogBucketName", V::name_of("LogBucket")).exported("Central log bucket"),
        Output::new("LogEventQueueArn", V::get_att("LogEventQueue", "Arn"))
            .exported("Queue receiving log object notifications"),
        Output::new("LogDeadLetterQueueUrl", V::reference("LogDeadLetterQueue")),
    ]
}

/// The complete landing-zone catalog.
pub fn landing_zone_catalog() -> Result<FragmentCatalog, SynthesisError> {
    let mut catalog = FragmentCatalog::new()
        .with_description("Compliance landing zone: network, logging pipeline and guard rails");
    for parameter in parameters() {
        catalog.add_parameter(parameter)?;
    }
    for fragment in network().into_iter().chain(logging()).chain(guard_rails()) {
        catalog.register(fragment)?;
    }
    for output in outputs() {
        catalog.add_output(output)?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_order;

    #[test]
    fn test_catalog_builds() {
        let catalog = landing_zone_catalog().unwrap();
        assert_eq!(catalog.len(), network().len() + logging().len() + guard_rails().len());
    }

    #[test]
    fn test_catalog_is_acyclic() {
        let catalog = landing_zone_catalog().unwrap();
        let order = resolve_order(catalog.list()).unwrap();
        let pos = |id: &str| order.iter().position(|f| f.id == id).unwrap();

        assert!(pos("Vpc") < pos("PublicSubnet1"));
        assert!(pos("GatewayAttachment") < pos("PublicDefaultRoute"));
        assert!(pos("LogEventQueuePolicy") < pos("LogBucket"));
        assert!(pos("LogDeadLetterQueue") < pos("LogEventQueue"));
    }
}
