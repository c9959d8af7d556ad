use std::borrow::Borrow;

use k8s_openapi::api::core::v1::Pod;

/// Pods that are not being deleted.
pub fn alive_pods<P: Borrow<Pod>>(pods: impl IntoIterator<Item = P>) -> Vec<P> {
    pods.into_iter()
        .filter(|pod| pod.borrow().metadata.deletion_timestamp.is_none())
        .collect()
}

/// Whether the scheduler has reported it cannot place `pod`.
pub fn is_unschedulable(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "PodScheduled" && c.status == "False")
        })
        .is_some_and(|c| c.reason.as_deref() == Some("Unschedulable"))
}
