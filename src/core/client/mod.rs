// Kubernetes
pub mod kube_client;
pub mod kube_resources;
pub mod mappers;
pub mod nodes;

// Alert backends
pub mod alertmanager_client;
pub mod http_client;
pub mod multi_prometheus_client;
pub mod prometheus_client;
