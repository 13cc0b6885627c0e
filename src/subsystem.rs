//! The fixed set of collectible subsystems and the per-subsystem Nitro endpoint policy.

/// One collectible appliance subsystem.
///
/// Each variant names both a self-metrics label and a row in the Nitro endpoint table (§4.2):
/// `endpoint()` gives the stat/config object id Nitro expects after `nitro/v1/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
	/// `stat/ns` - appliance-wide CPU/memory/network counters.
	Ns,
	/// `stat/ssl` - SSL session/handshake counters.
	Ssl,
	/// `stat/lbvserver` - load-balancing virtual server state and embedded per-service stats.
	LbVServer,
	/// `config/lbvserver` - load-balancing virtual server configuration (mapping-dependent).
	LbVServerCfg,
	/// `stat/gslbvserver`, then a targeted `?statbindings=yes` fetch per GSLB vserver.
	GslbVServer,
	/// The `gslbservice` entries embedded in a targeted GSLB vserver fetch.
	GslbService,
	/// `stat/service` - per-service counters (mapping-dependent for vserver relabeling).
	Service,
}
impl SubsystemKind {
	/// Every subsystem, in the order the original tool registers its collection tasks.
	pub const ALL: [Self; 7] = [
		Self::Ns,
		Self::Ssl,
		Self::LbVServer,
		Self::LbVServerCfg,
		Self::GslbVServer,
		Self::GslbService,
		Self::Service,
	];

	/// The label value used for this subsystem across self-metrics and log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Ns => "ns",
			Self::Ssl => "ssl",
			Self::LbVServer => "lbvserver",
			Self::LbVServerCfg => "lbvserver_cfg",
			Self::GslbVServer => "gslb_vserver",
			Self::GslbService => "gslb_service",
			Self::Service => "service",
		}
	}

	/// The Nitro object id appended to `stat/` or `config/` for a non-targeted fetch.
	///
	/// `GslbService` has no stand-alone endpoint of its own - its records only ever arrive
	/// embedded in a targeted [`SubsystemKind::GslbVServer`] fetch - so callers must not invoke
	/// this for that variant.
	pub const fn endpoint(self) -> &'static str {
		match self {
			Self::Ns => "ns",
			Self::Ssl => "ssl",
			Self::LbVServer => "lbvserver",
			Self::LbVServerCfg => "lbvserver",
			Self::GslbVServer => "gslbvserver",
			Self::GslbService => "gslbvserver",
			Self::Service => "service",
		}
	}

	/// Whether this is the `config/` Nitro API rather than the `stat/` one.
	pub const fn is_config(self) -> bool {
		matches!(self, Self::LbVServerCfg)
	}

	/// Whether this subsystem's collection tick must wait for the appliance's
	/// [`crate::vipmap::VipMap`] to be loaded before running.
	///
	/// `service` always relabels against bound virtual-server names, so it gates
	/// unconditionally. `lbvserver_cfg` only needs the map when mapping refresh is actually
	/// enabled for the appliance - otherwise `vip_map` never loads and the subsystem would be
	/// starved forever.
	pub const fn awaits_mapping_load(self, collect_mappings: bool) -> bool {
		match self {
			Self::Service => true,
			Self::LbVServerCfg => collect_mappings,
			_ => false,
		}
	}

	/// Whether this subsystem is driven by a plain all-objects fetch (`Api { target: None }`) as
	/// opposed to a two-phase all-then-targeted fetch (GSLB).
	pub const fn is_single_shot(self) -> bool {
		!matches!(self, Self::GslbVServer | Self::GslbService)
	}

	/// Look up the variant matching a configured subsystem id (as written in `metrics:` entries).
	pub fn parse(id: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.as_str() == id)
	}

	/// Whether this subsystem has its own schedulable collection run.
	///
	/// `GslbService` has no standalone `Api` fetch - its records only ever arrive embedded in a
	/// targeted [`SubsystemKind::GslbVServer`] fetch - so the scheduler never ticks it directly.
	pub const fn is_schedulable(self) -> bool {
		!matches!(self, Self::GslbService)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_variant_has_a_distinct_label() {
		let labels: std::collections::HashSet<_> =
			SubsystemKind::ALL.iter().map(|kind| kind.as_str()).collect();

		assert_eq!(labels.len(), SubsystemKind::ALL.len());
	}

	#[test]
	fn mapping_dependent_subsystems_match_the_documented_set() {
		assert!(SubsystemKind::Service.awaits_mapping_load(false));
		assert!(SubsystemKind::Service.awaits_mapping_load(true));
		assert!(!SubsystemKind::LbVServerCfg.awaits_mapping_load(false));
		assert!(SubsystemKind::LbVServerCfg.awaits_mapping_load(true));
		assert!(!SubsystemKind::Ns.awaits_mapping_load(true));
		assert!(!SubsystemKind::LbVServer.awaits_mapping_load(true));
	}

	#[test]
	fn gslb_subsystems_share_the_gslbvserver_endpoint() {
		assert_eq!(SubsystemKind::GslbVServer.endpoint(), "gslbvserver");
		assert_eq!(SubsystemKind::GslbService.endpoint(), "gslbvserver");
		assert!(!SubsystemKind::GslbVServer.is_single_shot());
	}

	#[test]
	fn parse_round_trips_with_as_str_for_schedulable_subsystems() {
		for kind in SubsystemKind::ALL {
			assert_eq!(SubsystemKind::parse(kind.as_str()), Some(kind));
		}

		assert_eq!(SubsystemKind::parse("bogus"), None);
		assert!(!SubsystemKind::GslbService.is_schedulable());
		assert!(SubsystemKind::GslbVServer.is_schedulable());
	}
}
