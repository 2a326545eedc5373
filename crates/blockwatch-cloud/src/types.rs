//! Typed records returned by the Block Storage and Identity APIs.
//!
//! Only the fields the exporter reads are modelled; everything else in the
//! API response is ignored. Several string fields are `null` for some
//! records (unnamed volumes, untyped volumes), so they decode to `""`.

use serde::{Deserialize, Deserializer, Serialize};

// ── Block storage ──────────────────────────────────────────────────

/// A volume as listed by `GET /volumes/detail`.
///
/// The tenant id is an extension attribute delivered in the same record;
/// it is flattened in so callers see a single shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub status: String,
    /// Cinder reports this as the string "true"/"false".
    #[serde(default, deserialize_with = "null_as_default")]
    pub bootable: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_type: String,
    #[serde(flatten)]
    pub tenant: VolumeTenantExt,
}

/// `os-vol-tenant-attr` extension fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VolumeTenantExt {
    #[serde(
        rename = "os-vol-tenant-attr:tenant_id",
        default,
        deserialize_with = "null_as_default"
    )]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_id: String,
    #[serde(default)]
    pub size: u64,
}

/// A Cinder worker service (`cinder-volume`, `cinder-scheduler`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub binary: String,
    pub host: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub zone: String,
    /// Administrative status: "enabled" or "disabled".
    pub status: String,
    /// Liveness as reported by the service: "up" or "down".
    pub state: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Per-project quota ceilings. Negative values mean unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaSet {
    #[serde(default)]
    pub gigabytes: i64,
    #[serde(default)]
    pub volumes: i64,
    #[serde(default)]
    pub snapshots: i64,
}

/// Per-project quota usage (`os-quota-sets/{id}?usage=true`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaUsageSet {
    #[serde(default)]
    pub gigabytes: QuotaDetail,
    #[serde(default)]
    pub volumes: QuotaDetail,
    #[serde(default)]
    pub snapshots: QuotaDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaDetail {
    #[serde(default)]
    pub in_use: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub reserved: i64,
}

// ── Identity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
