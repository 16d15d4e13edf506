//! Admission rules for the standalone CRD family.
//!
//! Each rule is a pure function over the typed objects so the policies are
//! testable without a server; the warp layer only does review plumbing.

use crate::crd::infra::{
    VSphereClusterTemplate, VSphereDeploymentZone, VSphereFailureDomain, VSphereMachine,
    VSphereMachineTemplate, VSphereVM,
};
use crate::controllers::deployment_zone::validate_topology;

pub type Verdict = std::result::Result<(), String>;

const MIN_NUM_CPUS: i32 = 1;
const MIN_MEMORY_MIB: i64 = 512;
const MIN_DISK_GIB: i32 = 1;

/// VSphereMachine creation and update rules.
pub fn validate_machine(old: Option<&VSphereMachine>, new: &VSphereMachine) -> Verdict {
    if new.spec.template.is_empty() {
        return Err("spec.template must not be empty".to_string());
    }
    check_hardware(new.spec.num_cpus, new.spec.memory_mib, new.spec.disk_gib)?;
    if let Some(old) = old {
        immutable("spec.template", &old.spec.template, &new.spec.template)?;
    }
    Ok(())
}

/// VSphereClusterTemplate creation and update rules. Templates are stamped
/// out by ClusterClass; the whole spec is frozen after creation.
pub fn validate_cluster_template(
    old: Option<&VSphereClusterTemplate>,
    new: &VSphereClusterTemplate,
) -> Verdict {
    if new.spec.template.spec.server.is_empty() {
        return Err("spec.template.spec.server must not be empty".to_string());
    }
    if let Some(old) = old {
        if to_json(&old.spec) != to_json(&new.spec) {
            return Err("spec.template is immutable".to_string());
        }
    }
    Ok(())
}

/// VSphereMachineTemplate creation and update rules. Same hardware bounds as
/// a machine; the whole spec is frozen after creation.
pub fn validate_machine_template(
    old: Option<&VSphereMachineTemplate>,
    new: &VSphereMachineTemplate,
) -> Verdict {
    let spec = &new.spec.template.spec;
    if spec.template.is_empty() {
        return Err("spec.template.spec.template must not be empty".to_string());
    }
    check_hardware(spec.num_cpus, spec.memory_mib, spec.disk_gib)?;
    if let Some(old) = old {
        if to_json(&old.spec) != to_json(&new.spec) {
            return Err("spec.template is immutable".to_string());
        }
    }
    Ok(())
}

/// VSphereVM creation and update rules.
pub fn validate_vm(old: Option<&VSphereVM>, new: &VSphereVM) -> Verdict {
    if new.spec.template.is_empty() {
        return Err("spec.template must not be empty".to_string());
    }
    check_hardware(new.spec.num_cpus, new.spec.memory_mib, MIN_DISK_GIB)?;
    if let Some(old) = old {
        immutable("spec.template", &old.spec.template, &new.spec.template)?;
        immutable("spec.server", &old.spec.server, &new.spec.server)?;
    }
    Ok(())
}

/// VSphereDeploymentZone creation and update rules.
pub fn validate_deployment_zone(
    old: Option<&VSphereDeploymentZone>,
    new: &VSphereDeploymentZone,
) -> Verdict {
    if new.spec.server.is_empty() {
        return Err("spec.server must not be empty".to_string());
    }
    if new.spec.failure_domain.is_empty() {
        return Err("spec.failureDomain must not be empty".to_string());
    }
    if let Some(old) = old {
        immutable("spec.server", &old.spec.server, &new.spec.server)?;
        immutable(
            "spec.failureDomain",
            &old.spec.failure_domain,
            &new.spec.failure_domain,
        )?;
    }
    Ok(())
}

/// VSphereFailureDomain creation and update rules.
pub fn validate_failure_domain(
    old: Option<&VSphereFailureDomain>,
    new: &VSphereFailureDomain,
) -> Verdict {
    validate_topology(new)?;
    if let Some(old) = old {
        immutable("spec.region.name", &old.spec.region.name, &new.spec.region.name)?;
        immutable("spec.zone.name", &old.spec.zone.name, &new.spec.zone.name)?;
    }
    Ok(())
}

fn check_hardware(num_cpus: i32, memory_mib: i64, disk_gib: i32) -> Verdict {
    if num_cpus < MIN_NUM_CPUS {
        return Err(format!("spec.numCpus must be at least {}", MIN_NUM_CPUS));
    }
    if memory_mib < MIN_MEMORY_MIB {
        return Err(format!("spec.memoryMib must be at least {}", MIN_MEMORY_MIB));
    }
    if disk_gib < MIN_DISK_GIB {
        return Err(format!("spec.diskGib must be at least {}", MIN_DISK_GIB));
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn immutable(field: &str, old: &str, new: &str) -> Verdict {
    if old != new {
        return Err(format!("{} is immutable", field));
    }
    Ok(())
}
