//! Small constructors for core/v1 building blocks.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    DownwardAPIVolumeFile, DownwardAPIVolumeSource, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    HostPathVolumeSource, ObjectFieldSelector, PersistentVolumeClaimVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub(crate) const PULL_ALWAYS: &str = "Always";

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn env_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(field_selector(field_path)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn host_path_volume(name: &str, path: impl Into<String>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn claim_volume(name: &str, claim_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn empty_dir_volume(name: &str, medium: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: medium.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Downward API volume exposing one metadata field as the file `path`.
pub(crate) fn field_volume(name: &str, path: &str, field_path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        downward_api: Some(DownwardAPIVolumeSource {
            items: Some(vec![DownwardAPIVolumeFile {
                path: path.to_string(),
                field_ref: Some(field_selector(field_path)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

pub(crate) fn sub_path_mount(
    name: &str,
    mount_path: &str,
    sub_path: &str,
    read_only: bool,
) -> VolumeMount {
    VolumeMount {
        sub_path: Some(sub_path.to_string()),
        ..mount(name, mount_path, read_only)
    }
}

pub(crate) fn string_map<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn field_selector(field_path: &str) -> ObjectFieldSelector {
    ObjectFieldSelector {
        field_path: field_path.to_string(),
        ..Default::default()
    }
}

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Quantity in canonical binary SI form: the largest power-of-1024 suffix
/// that divides `value` exactly, e.g. `2147483648` becomes `2Gi`.
pub fn binary_si(value: i64) -> Quantity {
    let mut scaled = value;
    let mut suffix = "";
    if value != 0 {
        for next in BINARY_SUFFIXES {
            if scaled % 1024 != 0 {
                break;
            }
            scaled /= 1024;
            suffix = next;
        }
    }
    Quantity(format!("{scaled}{suffix}"))
}
