//! Global ECMP policy.
//!
//! Every knob defaults to enabled; the System row's `ecmp_config` map
//! only ever turns things off. Changes are pushed to the provider once
//! per flip.

use crate::bridge::ReconcileCtx;
use crate::schema;
use log::error;
use std::collections::BTreeMap;
use switchd_provider::EcmpHashField;

const HASH_KEYS: [(EcmpHashField, &str); 5] = [
    (EcmpHashField::SrcIp, "hash_srcip_enabled"),
    (EcmpHashField::DstIp, "hash_dstip_enabled"),
    (EcmpHashField::SrcPort, "hash_srcport_enabled"),
    (EcmpHashField::DstPort, "hash_dstport_enabled"),
    (EcmpHashField::Resilient, "resilient_hash_enabled"),
];

/// ECMP settings as last pushed to the provider. Absent hash entries
/// read as enabled.
pub struct EcmpConfig {
    pub enabled: bool,
    pub hash: BTreeMap<EcmpHashField, bool>,
}

impl Default for EcmpConfig {
    fn default() -> Self {
        EcmpConfig {
            enabled: true,
            hash: BTreeMap::new(),
        }
    }
}

/// Pushes ECMP changes from the System row's `ecmp_config` map.
pub fn reconcile(ecmp: &mut EcmpConfig, ctx: &mut ReconcileCtx<'_>) {
    let Some((_, row)) = ctx.store.table(schema::SYSTEM).rows().next() else {
        return;
    };
    if !row.column_modified_since("ecmp_config", ctx.since) {
        return;
    }

    let enabled = row.get_bool("ecmp_config:enabled", true);
    if enabled != ecmp.enabled {
        match ctx.provider.set_ecmp_enabled(enabled) {
            Ok(()) => ecmp.enabled = enabled,
            Err(err) => error!("failed to set ECMP enable: {}", err),
        }
    }

    for (field, key) in HASH_KEYS {
        let wanted = row.get_bool(&format!("ecmp_config:{}", key), true);
        let current = ecmp.hash.get(&field).copied().unwrap_or(true);
        if wanted != current {
            match ctx.provider.set_ecmp_hash(field, wanted) {
                Ok(()) => {
                    ecmp.hash.insert(field, wanted);
                }
                Err(err) => error!("failed to set ECMP hash {:?}: {}", field, err),
            }
        }
    }
}
