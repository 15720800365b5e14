//! Pod cluster backends for the Decap build scheduler.
//!
//! Provides the Kubernetes implementation of [`PodCluster`]: build pods are
//! created, deleted and watched in a single namespace.

pub mod kubernetes;

pub use decap_core::cluster::{BuildPodSpec, PodCluster, PodObservation};
pub use kubernetes::KubernetesCluster;
