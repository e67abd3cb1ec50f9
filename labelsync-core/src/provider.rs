//! Node provider-ID parsing.
//!
//! ```text
//! azure:///subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachines/<vm>
//! azure:///subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachineScaleSets/<vmss>/virtualMachines/<instance>
//! ```
//!
//! Scale-set instances resolve to the scale set itself: tags live on the
//! scale set, not on individual instances.

use crate::error::ProviderIdError;
use crate::types::{ResourceId, ResourceKind};

const SCHEME: &str = "azure://";

/// Parse a node's `spec.providerID` into the identity of its compute resource.
pub fn parse_provider_id(provider_id: &str) -> Result<ResourceId, ProviderIdError> {
    if provider_id.is_empty() {
        return Err(ProviderIdError::Empty);
    }
    let Some(path) = provider_id.strip_prefix(SCHEME) else {
        return Err(ProviderIdError::UnsupportedScheme(provider_id.to_owned()));
    };

    let malformed = |reason: &str| ProviderIdError::Malformed {
        provider_id: provider_id.to_owned(),
        reason: reason.to_owned(),
    };

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if segments.len() < 8 {
        return Err(malformed("expected at least 8 path segments"));
    }

    expect_segment(&segments, 0, "subscriptions").map_err(|r| malformed(&r))?;
    expect_segment(&segments, 2, "resourceGroups").map_err(|r| malformed(&r))?;
    expect_segment(&segments, 4, "providers").map_err(|r| malformed(&r))?;
    expect_segment(&segments, 5, "Microsoft.Compute").map_err(|r| malformed(&r))?;

    let subscription_id = non_empty(segments[1]).ok_or_else(|| malformed("empty subscription"))?;
    let resource_group = non_empty(segments[3]).ok_or_else(|| malformed("empty resource group"))?;
    let name = non_empty(segments[7]).ok_or_else(|| malformed("empty resource name"))?;

    let kind = if segments[6].eq_ignore_ascii_case(ResourceKind::VirtualMachine.arm_type()) {
        ResourceKind::VirtualMachine
    } else if segments[6].eq_ignore_ascii_case(ResourceKind::VirtualMachineScaleSet.arm_type()) {
        ResourceKind::VirtualMachineScaleSet
    } else {
        return Err(ProviderIdError::UnsupportedResourceType(
            segments[6].to_owned(),
        ));
    };

    Ok(ResourceId {
        subscription_id: subscription_id.to_owned(),
        resource_group: resource_group.to_owned(),
        kind,
        name: name.to_owned(),
    })
}

fn expect_segment(segments: &[&str], index: usize, expected: &str) -> Result<(), String> {
    if segments[index].eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!(
            "expected '{expected}' at segment {index}, found '{}'",
            segments[index]
        ))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
