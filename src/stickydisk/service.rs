//! Client for the sticky disk provisioning service
//!
//! The service listens on the VM host over gRPC. Messages are declared with
//! prost and calls go through a plain `tonic::client::Grpc`.

use crate::error::SetupResult;
use async_trait::async_trait;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// Address of the VM host running the provisioning agent
pub const STICKY_DISK_HOST: &str = "192.168.127.1";

/// Default gRPC port of the provisioning agent
pub const DEFAULT_GRPC_PORT: u16 = 5557;

/// Default region when the runner does not set one
pub const DEFAULT_REGION: &str = "eu-central";

const GET_STICKY_DISK: &str = "/stickydisk.v1.StickyDiskService/GetStickyDisk";
const COMMIT_STICKY_DISK: &str = "/stickydisk.v1.StickyDiskService/CommitStickyDisk";

/// Wire messages of `stickydisk.v1`
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetStickyDiskRequest {
        #[prost(string, tag = "1")]
        pub sticky_disk_key: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub region: ::prost::alloc::string::String,
        #[prost(string, tag = "3")]
        pub installation_model_id: ::prost::alloc::string::String,
        #[prost(string, tag = "4")]
        pub vm_id: ::prost::alloc::string::String,
        #[prost(string, tag = "5")]
        pub sticky_disk_type: ::prost::alloc::string::String,
        #[prost(string, tag = "6")]
        pub sticky_disk_token: ::prost::alloc::string::String,
        #[prost(string, tag = "7")]
        pub repo_name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetStickyDiskResponse {
        #[prost(string, tag = "1")]
        pub expose_id: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub disk_identifier: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CommitStickyDiskRequest {
        #[prost(string, tag = "1")]
        pub expose_id: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub sticky_disk_key: ::prost::alloc::string::String,
        #[prost(string, tag = "3")]
        pub vm_id: ::prost::alloc::string::String,
        #[prost(bool, tag = "4")]
        pub should_commit: bool,
        #[prost(string, tag = "5")]
        pub repo_name: ::prost::alloc::string::String,
        #[prost(string, tag = "6")]
        pub sticky_disk_token: ::prost::alloc::string::String,
        #[prost(int64, optional, tag = "7")]
        pub fs_disk_usage_bytes: ::core::option::Option<i64>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct CommitStickyDiskResponse {}
}

/// Runner identity sent with every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickyDiskContext {
    pub region: String,
    pub installation_model_id: String,
    pub vm_id: String,
    pub token: String,
    pub repo_name: String,
    pub grpc_port: u16,
}

impl StickyDiskContext {
    /// Read the context from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the context through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let grpc_port = match var("BLACKSMITH_STICKY_DISK_GRPC_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                debug!("Ignoring invalid sticky disk port '{}'", raw);
                DEFAULT_GRPC_PORT
            }),
            None => DEFAULT_GRPC_PORT,
        };

        Self {
            region: var("BLACKSMITH_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            installation_model_id: var("BLACKSMITH_INSTALLATION_MODEL_ID").unwrap_or_default(),
            vm_id: var("VM_ID").unwrap_or_default(),
            token: var("BLACKSMITH_STICKYDISK_TOKEN").unwrap_or_default(),
            repo_name: var("GITHUB_REPO_NAME").unwrap_or_default(),
            grpc_port,
        }
    }

    /// URI of the provisioning agent
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", STICKY_DISK_HOST, self.grpc_port)
    }
}

/// A provisioned disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredDisk {
    pub device: String,
    pub expose_id: String,
}

/// Commit or discard of a provisioned disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub expose_id: String,
    pub sticky_disk_key: String,
    /// `false` lets the service roll the disk back
    pub should_commit: bool,
    /// Bytes in use on the filesystem, when known
    pub fs_usage_bytes: Option<u64>,
}

impl CommitRequest {
    fn into_proto(self, context: &StickyDiskContext) -> proto::CommitStickyDiskRequest {
        proto::CommitStickyDiskRequest {
            expose_id: self.expose_id,
            sticky_disk_key: self.sticky_disk_key,
            vm_id: context.vm_id.clone(),
            should_commit: self.should_commit,
            repo_name: context.repo_name.clone(),
            sticky_disk_token: context.token.clone(),
            fs_disk_usage_bytes: self
                .fs_usage_bytes
                .filter(|bytes| *bytes > 0)
                .and_then(|bytes| i64::try_from(bytes).ok()),
        }
    }
}

/// Provisioning service boundary
#[async_trait]
pub trait StickyDiskService: Send + Sync {
    /// Provision (or reattach) the disk stored under `key`
    async fn get_sticky_disk(&self, key: &str) -> SetupResult<AcquiredDisk>;

    /// Commit or discard a disk obtained from [`get_sticky_disk`](Self::get_sticky_disk)
    async fn commit_sticky_disk(&self, request: CommitRequest) -> SetupResult<()>;
}

/// gRPC implementation of [`StickyDiskService`]
#[derive(Clone)]
pub struct GrpcStickyDiskService {
    channel: Channel,
    context: StickyDiskContext,
}

impl GrpcStickyDiskService {
    /// Create a client; the connection is established on first use
    pub fn connect_lazy(context: StickyDiskContext) -> SetupResult<Self> {
        let endpoint = context.endpoint();
        info!("Creating sticky disk client for {}", endpoint);
        let channel = Endpoint::from_shared(endpoint)?.connect_lazy();
        Ok(Self { channel, context })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> SetupResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {}", e)))?;

        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(message),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl StickyDiskService for GrpcStickyDiskService {
    async fn get_sticky_disk(&self, key: &str) -> SetupResult<AcquiredDisk> {
        debug!("Getting sticky disk for {}", key);
        let request = proto::GetStickyDiskRequest {
            sticky_disk_key: key.to_string(),
            region: self.context.region.clone(),
            installation_model_id: self.context.installation_model_id.clone(),
            vm_id: self.context.vm_id.clone(),
            sticky_disk_type: "stickydisk".to_string(),
            sticky_disk_token: self.context.token.clone(),
            repo_name: self.context.repo_name.clone(),
        };

        let response: proto::GetStickyDiskResponse = self.unary(GET_STICKY_DISK, request).await?;
        Ok(AcquiredDisk {
            device: response.disk_identifier,
            expose_id: response.expose_id,
        })
    }

    async fn commit_sticky_disk(&self, request: CommitRequest) -> SetupResult<()> {
        let message = request.into_proto(&self.context);
        let _: proto::CommitStickyDiskResponse = self.unary(COMMIT_STICKY_DISK, message).await?;
        Ok(())
    }
}
