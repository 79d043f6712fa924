use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::cloud::{
    CallerIdentity, CloudApi, ClusterSpec, InstanceSpec, LoadBalancerRef, NodePoolSpec, Tag,
};
use crate::command::{pointer_str, pointer_strings, ToolCommand};
use crate::error::ProviderResult;

/// [CloudApi] backed by the `aws` command line tool.
#[derive(Debug, Clone)]
pub struct AwsCli {
    cmd: ToolCommand,
    region: String,
}

impl AwsCli {
    pub fn new(program: PathBuf, profile: &str, region: &str) -> Self {
        Self {
            cmd: ToolCommand::new(program)
                .with_base_args(["--output", "json", "--profile", profile, "--region", region])
                .with_env("AWS_PAGER", ""),
            region: region.to_string(),
        }
    }

    async fn json(&self, args: &[&str]) -> ProviderResult<serde_json::Value> {
        self.cmd.json(args).await
    }

    async fn call(&self, args: &[&str]) -> ProviderResult<()> {
        self.cmd.output(args, None).await.map(|_| ())
    }

    /// Like [AwsCli::json] but a missing resource becomes `None`.
    async fn json_if_exists(&self, args: &[&str]) -> ProviderResult<Option<serde_json::Value>> {
        match self.json(args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `ResourceType=vpc,Tags=[{Key=a,Value=b}]` as taken by `--tag-specifications`.
fn tag_specification(resource_type: &str, tags: &[Tag]) -> String {
    let tags = tags
        .iter()
        .map(|t| format!("{{Key={},Value={}}}", t.key, t.value))
        .collect::<Vec<_>>()
        .join(",");
    format!("ResourceType={resource_type},Tags=[{tags}]")
}

/// `Key=a,Value=b` pairs as taken by IAM and ECR `--tags`.
fn key_value_tags(tags: &[Tag]) -> Vec<String> {
    tags.iter()
        .map(|t| format!("Key={},Value={}", t.key, t.value))
        .collect()
}

/// `a=b,c=d` as taken by EKS `--tags`.
fn map_tags(tags: &[Tag]) -> String {
    tags.iter()
        .map(|t| format!("{}={}", t.key, t.value))
        .collect::<Vec<_>>()
        .join(",")
}

fn vpc_filter(vpc_id: &str) -> String {
    format!("Name=vpc-id,Values={vpc_id}")
}

#[async_trait]
impl CloudApi for AwsCli {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity> {
        let out = self.json(&["sts", "get-caller-identity"]).await?;
        Ok(CallerIdentity {
            account_id: pointer_str(&out, "/Account", "aws sts get-caller-identity")?,
            arn: pointer_str(&out, "/Arn", "aws sts get-caller-identity")?,
        })
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn availability_zones(&self) -> ProviderResult<Vec<String>> {
        let out = self
            .json(&[
                "ec2",
                "describe-availability-zones",
                "--filters",
                "Name=state,Values=available",
            ])
            .await?;
        Ok(pointer_strings(&out, "/AvailabilityZones", "ZoneName"))
    }

    async fn create_vpc(&self, cidr: &str, tags: &[Tag]) -> ProviderResult<String> {
        let spec = tag_specification("vpc", tags);
        let out = self
            .json(&["ec2", "create-vpc", "--cidr-block", cidr, "--tag-specifications", spec.as_str()])
            .await?;
        pointer_str(&out, "/Vpc/VpcId", "aws ec2 create-vpc")
    }

    async fn vpc_state(&self, vpc_id: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&["ec2", "describe-vpcs", "--vpc-ids", vpc_id])
            .await?;
        Ok(out.and_then(|o| o.pointer("/Vpcs/0/State")?.as_str().map(str::to_string)))
    }

    async fn enable_vpc_dns(&self, vpc_id: &str) -> ProviderResult<()> {
        for attribute in ["--enable-dns-support", "--enable-dns-hostnames"] {
            self.call(&[
                "ec2",
                "modify-vpc-attribute",
                "--vpc-id",
                vpc_id,
                attribute,
                "{\"Value\":true}",
            ])
            .await?;
        }
        Ok(())
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ProviderResult<()> {
        self.call(&["ec2", "delete-vpc", "--vpc-id", vpc_id]).await
    }

    async fn create_internet_gateway(&self, tags: &[Tag]) -> ProviderResult<String> {
        let spec = tag_specification("internet-gateway", tags);
        let out = self
            .json(&["ec2", "create-internet-gateway", "--tag-specifications", spec.as_str()])
            .await?;
        pointer_str(
            &out,
            "/InternetGateway/InternetGatewayId",
            "aws ec2 create-internet-gateway",
        )
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "attach-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
            "--vpc-id",
            vpc_id,
        ])
        .await
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "detach-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
            "--vpc-id",
            vpc_id,
        ])
        .await
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "delete-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
        ])
        .await
    }

    async fn internet_gateways_in_vpc(&self, vpc_id: &str) -> ProviderResult<Vec<String>> {
        let filter = format!("Name=attachment.vpc-id,Values={vpc_id}");
        let out = self
            .json(&["ec2", "describe-internet-gateways", "--filters", filter.as_str()])
            .await?;
        Ok(pointer_strings(&out, "/InternetGateways", "InternetGatewayId"))
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &str,
        zone: &str,
        tags: &[Tag],
    ) -> ProviderResult<String> {
        let spec = tag_specification("subnet", tags);
        let out = self
            .json(&[
                "ec2",
                "create-subnet",
                "--vpc-id",
                vpc_id,
                "--cidr-block",
                cidr,
                "--availability-zone",
                zone,
                "--tag-specifications",
                spec.as_str(),
            ])
            .await?;
        pointer_str(&out, "/Subnet/SubnetId", "aws ec2 create-subnet")
    }

    async fn subnet_state(&self, subnet_id: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&["ec2", "describe-subnets", "--subnet-ids", subnet_id])
            .await?;
        Ok(out.and_then(|o| o.pointer("/Subnets/0/State")?.as_str().map(str::to_string)))
    }

    async fn enable_public_ips(&self, subnet_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "modify-subnet-attribute",
            "--subnet-id",
            subnet_id,
            "--map-public-ip-on-launch",
        ])
        .await
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ProviderResult<()> {
        self.call(&["ec2", "delete-subnet", "--subnet-id", subnet_id])
            .await
    }

    async fn create_route_table(&self, vpc_id: &str, tags: &[Tag]) -> ProviderResult<String> {
        let spec = tag_specification("route-table", tags);
        let out = self
            .json(&[
                "ec2",
                "create-route-table",
                "--vpc-id",
                vpc_id,
                "--tag-specifications",
                spec.as_str(),
            ])
            .await?;
        pointer_str(&out, "/RouteTable/RouteTableId", "aws ec2 create-route-table")
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        gateway_id: &str,
    ) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "create-route",
            "--route-table-id",
            route_table_id,
            "--destination-cidr-block",
            "0.0.0.0/0",
            "--gateway-id",
            gateway_id,
        ])
        .await
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "associate-route-table",
            "--route-table-id",
            route_table_id,
            "--subnet-id",
            subnet_id,
        ])
        .await
    }

    async fn non_main_route_tables(&self, vpc_id: &str) -> ProviderResult<Vec<String>> {
        let filter = vpc_filter(vpc_id);
        let out = self
            .json(&["ec2", "describe-route-tables", "--filters", filter.as_str()])
            .await?;

        let tables = out
            .pointer("/RouteTables")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(tables
            .iter()
            .filter(|table| {
                let is_main = table
                    .get("Associations")
                    .and_then(|a| a.as_array())
                    .map(|a| {
                        a.iter()
                            .any(|assoc| assoc.get("Main").and_then(|m| m.as_bool()) == Some(true))
                    })
                    .unwrap_or(false);
                !is_main
            })
            .filter_map(|table| table.get("RouteTableId").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "delete-route-table",
            "--route-table-id",
            route_table_id,
        ])
        .await
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &[Tag],
    ) -> ProviderResult<String> {
        let spec = tag_specification("security-group", tags);
        let out = self
            .json(&[
                "ec2",
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
                "--vpc-id",
                vpc_id,
                "--tag-specifications",
                spec.as_str(),
            ])
            .await?;
        pointer_str(&out, "/GroupId", "aws ec2 create-security-group")
    }

    async fn non_default_security_groups(&self, vpc_id: &str) -> ProviderResult<Vec<String>> {
        let filter = vpc_filter(vpc_id);
        let out = self
            .json(&["ec2", "describe-security-groups", "--filters", filter.as_str()])
            .await?;
        let groups = out
            .pointer("/SecurityGroups")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(groups
            .iter()
            .filter(|g| g.get("GroupName").and_then(|n| n.as_str()) != Some("default"))
            .filter_map(|g| g.get("GroupId").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn delete_security_group(&self, group_id: &str) -> ProviderResult<()> {
        self.call(&["ec2", "delete-security-group", "--group-id", group_id])
            .await
    }

    async fn network_interfaces(&self, vpc_id: &str) -> ProviderResult<Vec<String>> {
        let filter = vpc_filter(vpc_id);
        let out = self
            .json(&["ec2", "describe-network-interfaces", "--filters", filter.as_str()])
            .await?;
        Ok(pointer_strings(&out, "/NetworkInterfaces", "NetworkInterfaceId"))
    }

    async fn delete_network_interface(&self, interface_id: &str) -> ProviderResult<()> {
        self.call(&[
            "ec2",
            "delete-network-interface",
            "--network-interface-id",
            interface_id,
        ])
        .await
    }

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &str,
        tags: &[Tag],
    ) -> ProviderResult<String> {
        let tags = key_value_tags(tags);
        let mut args: Vec<&str> = vec![
            "iam",
            "create-role",
            "--role-name",
            name,
            "--assume-role-policy-document",
            trust_policy,
        ];
        if !tags.is_empty() {
            args.push("--tags");
            args.extend(tags.iter().map(String::as_str));
        }
        let out = self.json(&args).await?;
        pointer_str(&out, "/Role/Arn", "aws iam create-role")
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()> {
        self.call(&[
            "iam",
            "attach-role-policy",
            "--role-name",
            role_name,
            "--policy-arn",
            policy_arn,
        ])
        .await
    }

    async fn attached_role_policies(&self, role_name: &str) -> ProviderResult<Vec<String>> {
        let out = self
            .json(&[
                "iam",
                "list-attached-role-policies",
                "--role-name",
                role_name,
            ])
            .await?;
        Ok(pointer_strings(&out, "/AttachedPolicies", "PolicyArn"))
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()> {
        self.call(&[
            "iam",
            "detach-role-policy",
            "--role-name",
            role_name,
            "--policy-arn",
            policy_arn,
        ])
        .await
    }

    async fn delete_role(&self, role_name: &str) -> ProviderResult<()> {
        self.call(&["iam", "delete-role", "--role-name", role_name])
            .await
    }

    async fn find_repository(&self, name: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&["ecr", "describe-repositories", "--repository-names", name])
            .await?;
        Ok(out.and_then(|o| {
            o.pointer("/repositories/0/repositoryUri")?
                .as_str()
                .map(str::to_string)
        }))
    }

    async fn create_repository(&self, name: &str, tags: &[Tag]) -> ProviderResult<String> {
        let tags = key_value_tags(tags);
        let mut args: Vec<&str> = vec!["ecr", "create-repository", "--repository-name", name];
        if !tags.is_empty() {
            args.push("--tags");
            args.extend(tags.iter().map(String::as_str));
        }
        let out = self.json(&args).await?;
        pointer_str(&out, "/repository/repositoryUri", "aws ecr create-repository")
    }

    async fn image_tags(&self, repository: &str) -> ProviderResult<Vec<String>> {
        let out = self
            .json(&[
                "ecr",
                "list-images",
                "--repository-name",
                repository,
                "--filter",
                "tagStatus=TAGGED",
            ])
            .await?;
        Ok(pointer_strings(&out, "/imageIds", "imageTag"))
    }

    async fn delete_repository(&self, name: &str) -> ProviderResult<()> {
        self.call(&[
            "ecr",
            "delete-repository",
            "--repository-name",
            name,
            "--force",
        ])
        .await
    }

    async fn registry_password(&self) -> ProviderResult<String> {
        let out = self.cmd.output(&["ecr", "get-login-password"], None).await?;
        Ok(out.trim().to_string())
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> ProviderResult<String> {
        let vpc_config = format!(
            "subnetIds={},endpointPublicAccess=true,endpointPrivateAccess=false",
            spec.subnet_ids.join(",")
        );
        let tags = map_tags(&spec.tags);
        let mut args: Vec<&str> = vec![
            "eks",
            "create-cluster",
            "--name",
            &spec.name,
            "--kubernetes-version",
            &spec.kubernetes_version,
            "--role-arn",
            &spec.role_arn,
            "--resources-vpc-config",
            vpc_config.as_str(),
        ];
        if !tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        let out = self.json(&args).await?;
        pointer_str(&out, "/cluster/arn", "aws eks create-cluster")
    }

    async fn cluster_status(&self, name: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&["eks", "describe-cluster", "--name", name])
            .await?;
        Ok(out.and_then(|o| o.pointer("/cluster/status")?.as_str().map(str::to_string)))
    }

    async fn delete_cluster(&self, name: &str) -> ProviderResult<()> {
        self.call(&["eks", "delete-cluster", "--name", name]).await
    }

    async fn create_node_pool(&self, spec: &NodePoolSpec) -> ProviderResult<String> {
        let scaling = format!(
            "minSize={n},maxSize={n},desiredSize={n}",
            n = spec.node_count
        );
        let tags = map_tags(&spec.tags);
        let mut args: Vec<&str> = vec![
            "eks",
            "create-nodegroup",
            "--cluster-name",
            &spec.cluster_name,
            "--nodegroup-name",
            &spec.name,
            "--node-role",
            &spec.node_role_arn,
            "--instance-types",
            &spec.instance_type,
            "--scaling-config",
            scaling.as_str(),
            "--subnets",
        ];
        args.extend(spec.subnet_ids.iter().map(String::as_str));
        if !tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        let out = self.json(&args).await?;
        pointer_str(&out, "/nodegroup/nodegroupArn", "aws eks create-nodegroup")
    }

    async fn node_pool_status(&self, cluster: &str, name: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&[
                "eks",
                "describe-nodegroup",
                "--cluster-name",
                cluster,
                "--nodegroup-name",
                name,
            ])
            .await?;
        Ok(out.and_then(|o| o.pointer("/nodegroup/status")?.as_str().map(str::to_string)))
    }

    async fn delete_node_pool(&self, cluster: &str, name: &str) -> ProviderResult<()> {
        self.call(&[
            "eks",
            "delete-nodegroup",
            "--cluster-name",
            cluster,
            "--nodegroup-name",
            name,
        ])
        .await
    }

    async fn write_kubeconfig(&self, cluster: &str, path: &Path) -> ProviderResult<()> {
        let path = path.to_string_lossy().to_string();
        self.call(&[
            "eks",
            "update-kubeconfig",
            "--name",
            cluster,
            "--kubeconfig",
            path.as_str(),
        ])
        .await
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        // The CLI base64 encodes binary user data read through `fileb://`.
        let mut user_data = tempfile::NamedTempFile::with_suffix(".gz")?;
        user_data.write_all(&spec.user_data)?;
        user_data.flush()?;
        let user_data_arg = format!("fileb://{}", user_data.path().display());

        let tag_spec = tag_specification("instance", &spec.tags);
        let mut args: Vec<&str> = vec![
            "ec2",
            "run-instances",
            "--count",
            "1",
            "--image-id",
            &spec.image_id,
            "--instance-type",
            &spec.instance_type,
            "--subnet-id",
            &spec.subnet_id,
            "--user-data",
            user_data_arg.as_str(),
            "--tag-specifications",
            tag_spec.as_str(),
        ];
        if !spec.security_group_ids.is_empty() {
            args.push("--security-group-ids");
            args.extend(spec.security_group_ids.iter().map(String::as_str));
        }

        let out = self.json(&args).await?;
        pointer_str(&out, "/Instances/0/InstanceId", "aws ec2 run-instances")
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<Option<String>> {
        let out = self
            .json_if_exists(&["ec2", "describe-instances", "--instance-ids", instance_id])
            .await?;
        Ok(out.and_then(|o| {
            o.pointer("/Reservations/0/Instances/0/State/Name")?
                .as_str()
                .map(str::to_string)
        }))
    }

    async fn console_output(&self, instance_id: &str) -> ProviderResult<String> {
        let out = self
            .json(&[
                "ec2",
                "get-console-output",
                "--instance-id",
                instance_id,
                "--latest",
            ])
            .await?;
        // No `Output` key until the instance has written to its console.
        Ok(out
            .pointer("/Output")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn terminate_instance(&self, instance_id: &str) -> ProviderResult<()> {
        self.call(&["ec2", "terminate-instances", "--instance-ids", instance_id])
            .await
    }

    async fn load_balancers_in_vpc(&self, vpc_id: &str) -> ProviderResult<Vec<LoadBalancerRef>> {
        let mut found = Vec::new();

        let v2 = self.json(&["elbv2", "describe-load-balancers"]).await?;
        if let Some(items) = v2.pointer("/LoadBalancers").and_then(|v| v.as_array()) {
            found.extend(
                items
                    .iter()
                    .filter(|lb| lb.get("VpcId").and_then(|v| v.as_str()) == Some(vpc_id))
                    .filter_map(|lb| lb.get("LoadBalancerArn").and_then(|v| v.as_str()))
                    .map(|arn| LoadBalancerRef {
                        id: arn.to_string(),
                        classic: false,
                    }),
            );
        }

        let classic = self.json(&["elb", "describe-load-balancers"]).await?;
        if let Some(items) = classic
            .pointer("/LoadBalancerDescriptions")
            .and_then(|v| v.as_array())
        {
            found.extend(
                items
                    .iter()
                    .filter(|lb| lb.get("VPCId").and_then(|v| v.as_str()) == Some(vpc_id))
                    .filter_map(|lb| lb.get("LoadBalancerName").and_then(|v| v.as_str()))
                    .map(|name| LoadBalancerRef {
                        id: name.to_string(),
                        classic: true,
                    }),
            );
        }

        Ok(found)
    }

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancerRef) -> ProviderResult<()> {
        if load_balancer.classic {
            self.call(&[
                "elb",
                "delete-load-balancer",
                "--load-balancer-name",
                load_balancer.id.as_str(),
            ])
            .await
        } else {
            self.call(&[
                "elbv2",
                "delete-load-balancer",
                "--load-balancer-arn",
                load_balancer.id.as_str(),
            ])
            .await
        }
    }
}
