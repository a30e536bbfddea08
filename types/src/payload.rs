//! Payloads carried by the two delivery lanes.

use serde::{Deserialize, Serialize};

use crate::{ResourceId, WireRecord};

/// One record for the streamed lane (`diagnostics/append`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamedRecord {
    pub resource_id: ResourceId,
    pub record: WireRecord,
}

/// Full record list for the snapshot lane (`diagnostics/replace`).
///
/// An empty `records` list positively clears the resource on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub resource_id: ResourceId,
    pub records: Vec<WireRecord>,
}

impl ResourceSnapshot {
    #[must_use]
    pub fn empty(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            records: Vec::new(),
        }
    }
}

/// Parameters of `diagnostics/clearResource`; no identifier clears everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let snap = ResourceSnapshot::empty(ResourceId::from_uri("file:///a.py"));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["resourceId"], "file:///a.py");
        assert_eq!(json["records"], serde_json::json!([]));
    }

    #[test]
    fn clear_all_omits_resource_id() {
        let json = serde_json::to_value(ClearResource::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));

        let parsed: ClearResource = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(parsed.resource_id.is_none());
    }
}
