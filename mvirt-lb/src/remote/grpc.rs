//! gRPC client for the provider's LoadBalancerService.

use async_trait::async_trait;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::debug;

use super::{RemoteError, RemoteLb, Result};
use crate::config::{ConfigError, ProviderConfig};
use crate::topology::{Backend, BackendSet, HealthChecker, Listener, Topology};

/// Generated protobuf types for the provider API.
pub mod proto {
    tonic::include_proto!("mvirt.lb");
}

use proto::load_balancer_service_client::LoadBalancerServiceClient;

impl From<Status> for RemoteError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::ResourceExhausted => RemoteError::RateLimited(message),
            Code::DeadlineExceeded | Code::Cancelled => RemoteError::Timeout(message),
            Code::Unavailable | Code::Internal | Code::Unknown | Code::Aborted => {
                RemoteError::Unavailable(message)
            }
            Code::NotFound => RemoteError::NotFound(message),
            Code::AlreadyExists | Code::FailedPrecondition => RemoteError::Conflict(message),
            Code::InvalidArgument | Code::OutOfRange => RemoteError::Invalid(message),
            Code::Unauthenticated | Code::PermissionDenied => RemoteError::Unauthorized(message),
            _ => RemoteError::Rejected(format!("{:?}: {}", status.code(), message)),
        }
    }
}

impl From<&Backend> for proto::Backend {
    fn from(b: &Backend) -> Self {
        proto::Backend {
            address: b.address.clone(),
            port: u32::from(b.port),
        }
    }
}

impl From<&HealthChecker> for proto::HealthChecker {
    fn from(h: &HealthChecker) -> Self {
        proto::HealthChecker {
            protocol: h.protocol.to_string(),
            port: u32::from(h.port),
            url_path: h.url_path.clone(),
            interval_ms: h.interval_ms,
            timeout_ms: h.timeout_ms,
            retries: h.retries,
        }
    }
}

impl From<&BackendSet> for proto::BackendSet {
    fn from(s: &BackendSet) -> Self {
        proto::BackendSet {
            name: s.name.clone(),
            policy: s.policy.clone(),
            health_checker: Some((&s.health_checker).into()),
            backends: s.backends.iter().map(Into::into).collect(),
        }
    }
}

impl From<&Listener> for proto::Listener {
    fn from(l: &Listener) -> Self {
        proto::Listener {
            name: l.name.clone(),
            default_backend_set_name: l.default_backend_set_name.clone(),
            protocol: l.protocol.to_string(),
            port: u32::from(l.port),
        }
    }
}

fn port_from_proto(port: u32, what: &str) -> Result<u16> {
    u16::try_from(port)
        .map_err(|_| RemoteError::Malformed(format!("{} port {} out of range", what, port)))
}

fn health_checker_from_proto(h: Option<proto::HealthChecker>, set: &str) -> Result<HealthChecker> {
    let Some(h) = h else {
        return Ok(HealthChecker::default());
    };
    Ok(HealthChecker {
        protocol: h
            .protocol
            .parse()
            .map_err(|e| RemoteError::Malformed(format!("backend set {}: {}", set, e)))?,
        port: port_from_proto(h.port, "health check")?,
        url_path: h.url_path,
        interval_ms: h.interval_ms,
        timeout_ms: h.timeout_ms,
        retries: h.retries,
    })
}

/// Convert the provider's view of a load balancer into a `Topology`.
pub fn topology_from_proto(t: proto::Topology) -> Result<Topology> {
    let mut backend_sets = Vec::with_capacity(t.backend_sets.len());
    for s in t.backend_sets {
        let health_checker = health_checker_from_proto(s.health_checker, &s.name)?;
        let mut backends = Vec::with_capacity(s.backends.len());
        for b in s.backends {
            backends.push(Backend::new(b.address, port_from_proto(b.port, "backend")?));
        }
        backend_sets.push(BackendSet {
            name: s.name,
            policy: s.policy,
            health_checker,
            backends: backends.into_iter().collect(),
        });
    }

    let mut listeners = Vec::with_capacity(t.listeners.len());
    for l in t.listeners {
        listeners.push(Listener {
            protocol: l
                .protocol
                .parse()
                .map_err(|e| RemoteError::Malformed(format!("listener {}: {}", l.name, e)))?,
            port: port_from_proto(l.port, "listener")?,
            name: l.name,
            default_backend_set_name: l.default_backend_set_name,
        });
    }

    Topology::from_parts(backend_sets, listeners).map_err(|e| RemoteError::Malformed(e.to_string()))
}

/// `RemoteLb` over gRPC. Every request carries region, compartment, subnet
/// and credential metadata from the provider configuration.
#[derive(Clone)]
pub struct GrpcRemoteLb {
    client: LoadBalancerServiceClient<Channel>,
    metadata: Vec<(&'static str, AsciiMetadataValue)>,
}

impl GrpcRemoteLb {
    /// Build a client. The connection is established lazily on first use.
    pub fn new(config: &ProviderConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut metadata = vec![
            ("x-region", metadata_value(&config.region, "region")?),
            (
                "x-compartment-id",
                metadata_value(&config.compartment_id, "compartment")?,
            ),
        ];
        if !config.subnet_ids.is_empty() {
            metadata.push((
                "x-subnet-ids",
                metadata_value(&config.subnet_ids.join(","), "subnet id")?,
            ));
        }
        if let Some(token) = &config.auth_token {
            metadata.push((
                "authorization",
                metadata_value(&format!("Bearer {}", token), "auth token")?,
            ));
        }

        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| ConfigError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                reason: e.to_string(),
            })?
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout);

        Ok(Self {
            client: LoadBalancerServiceClient::new(endpoint.connect_lazy()),
            metadata,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(*key, value.clone());
        }
        request
    }

    fn client(&self) -> LoadBalancerServiceClient<Channel> {
        self.client.clone()
    }
}

fn metadata_value(
    value: &str,
    field: &'static str,
) -> std::result::Result<AsciiMetadataValue, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidMetadata(field))
}

#[async_trait]
impl RemoteLb for GrpcRemoteLb {
    async fn fetch_topology(&self, load_balancer_id: &str) -> Result<Topology> {
        debug!("Fetching topology of load balancer {}", load_balancer_id);
        let response = self
            .client()
            .get_topology(self.request(proto::GetTopologyRequest {
                load_balancer_id: load_balancer_id.to_string(),
            }))
            .await?;
        topology_from_proto(response.into_inner())
    }

    async fn create_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &BackendSet,
    ) -> Result<()> {
        debug!(
            "Creating backend set {} on {}",
            backend_set.name, load_balancer_id
        );
        self.client()
            .create_backend_set(self.request(proto::CreateBackendSetRequest {
                load_balancer_id: load_balancer_id.to_string(),
                backend_set: Some(backend_set.into()),
            }))
            .await?;
        Ok(())
    }

    async fn update_backend_set(
        &self,
        load_balancer_id: &str,
        name: &str,
        policy: &str,
        health_checker: &HealthChecker,
    ) -> Result<()> {
        debug!("Updating backend set {} on {}", name, load_balancer_id);
        self.client()
            .update_backend_set(self.request(proto::UpdateBackendSetRequest {
                load_balancer_id: load_balancer_id.to_string(),
                name: name.to_string(),
                policy: policy.to_string(),
                health_checker: Some(health_checker.into()),
            }))
            .await?;
        Ok(())
    }

    async fn delete_backend_set(&self, load_balancer_id: &str, name: &str) -> Result<()> {
        debug!("Deleting backend set {} on {}", name, load_balancer_id);
        self.client()
            .delete_backend_set(self.request(proto::DeleteBackendSetRequest {
                load_balancer_id: load_balancer_id.to_string(),
                name: name.to_string(),
            }))
            .await?;
        Ok(())
    }

    async fn add_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()> {
        debug!(
            "Adding backend {} to {} on {}",
            backend, backend_set_name, load_balancer_id
        );
        self.client()
            .add_backend(self.request(proto::BackendRequest {
                load_balancer_id: load_balancer_id.to_string(),
                backend_set_name: backend_set_name.to_string(),
                backend: Some(backend.into()),
            }))
            .await?;
        Ok(())
    }

    async fn remove_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()> {
        debug!(
            "Removing backend {} from {} on {}",
            backend, backend_set_name, load_balancer_id
        );
        self.client()
            .remove_backend(self.request(proto::BackendRequest {
                load_balancer_id: load_balancer_id.to_string(),
                backend_set_name: backend_set_name.to_string(),
                backend: Some(backend.into()),
            }))
            .await?;
        Ok(())
    }

    async fn create_listener(&self, load_balancer_id: &str, listener: &Listener) -> Result<()> {
        debug!("Creating listener {} on {}", listener, load_balancer_id);
        self.client()
            .create_listener(self.request(proto::CreateListenerRequest {
                load_balancer_id: load_balancer_id.to_string(),
                listener: Some(listener.into()),
            }))
            .await?;
        Ok(())
    }

    async fn delete_listener(&self, load_balancer_id: &str, name: &str) -> Result<()> {
        debug!("Deleting listener {} on {}", name, load_balancer_id);
        self.client()
            .delete_listener(self.request(proto::DeleteListenerRequest {
                load_balancer_id: load_balancer_id.to_string(),
                name: name.to_string(),
            }))
            .await?;
        Ok(())
    }
}
