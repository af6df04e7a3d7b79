// JobRelay Infrastructure - Kubernetes Adapters
// Implements: WorkloadLauncher, ClusterInspector

pub mod launcher;
pub mod manifest;

pub use launcher::KubeWorkloadLauncher;
pub use manifest::build_job_manifest;
