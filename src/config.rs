//! The effective per-zone configuration snapshot.
//!
//! Loading and merging configuration files is the business of the caller;
//! the engine only ever sees an immutable [`ZoneConfig`] per zone pass.

use domain::base::iana::SecAlg;

/// How long a revoked trust anchor is kept around before it is deleted for
/// good (RFC 5011 remove hold-down).
pub const REMOVE_HOLD_DOWN: u32 = 30 * 86400;

/// How long a freshly published trust anchor must be visible before it may
/// be promoted (RFC 5011 add hold-down). Bounded by the key TTL at use
/// sites.
pub const ADD_HOLD_DOWN: u32 = 30 * 86400;

/// NSEC3 operation of a zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Nsec3Mode {
    #[default]
    Off,
    On,
    OptOut,
}

/// How the SOA serial is maintained on re-signing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerialFormat {
    /// Increment the on-disk serial in place.
    #[default]
    Incremental,
    /// Stamp the serial with the current unix time; the on-disk serial is
    /// left alone.
    UnixTime,
}

/// The configuration of one zone, treated as an immutable snapshot for the
/// duration of a zone-processing pass.
#[derive(Clone, Debug)]
pub struct ZoneConfig {
    /// KSK lifetime in seconds; 0 disables KSK management.
    pub ksk_lifetime: u32,
    /// ZSK lifetime in seconds; 0 disables ZSK generation.
    pub zsk_lifetime: u32,
    /// Primary signing algorithm.
    pub algorithm: SecAlg,
    /// Optional secondary algorithm carried concurrently, e.g. during an
    /// algorithm rollover.
    pub second_algorithm: Option<SecAlg>,
    pub ksk_bits: u32,
    pub zsk_bits: u32,
    /// Maximum record TTL in the zone.
    pub max_ttl: u32,
    /// TTL of the DNSKEY records.
    pub key_ttl: u32,
    /// Assumed delay for a change to reach all secondaries and resolvers.
    pub propagation: u32,
    /// Assumed propagation delay on the parent side of a hierarchical KSK
    /// rollover.
    pub parent_propagation: u32,
    /// Maximum time between successive signings regardless of key changes.
    pub resign_interval: u32,
    /// Tolerance subtracted from lifetime comparisons so a rollover is not
    /// missed by a few seconds of clock skew.
    pub clock_skew: u32,
    pub nsec3: Nsec3Mode,
    pub serial_format: SerialFormat,
    /// Dynamic-update zone: never touch the serial, always re-sign.
    pub dynamic_zone: bool,
    /// Check for new keyset files even outside hierarchical mode.
    pub always_check_keysets: bool,
    /// Randomness source handed to the key generator.
    pub random_device: Option<String>,
    /// Keyset directory; the value `".."` selects hierarchical
    /// (parent-relative) operation.
    pub keyset_dir: Option<String>,
    /// Command run after a zone was signed, with the zone name and the
    /// signed file as arguments.
    pub dist_cmd: Option<String>,
    /// Name of the unsigned zone file within the zone directory.
    pub zone_file: String,
    /// Name of the signed zone file within the zone directory.
    pub signed_file: String,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        ZoneConfig {
            ksk_lifetime: 365 * 86400,
            zsk_lifetime: 90 * 86400,
            algorithm: SecAlg::RSASHA256,
            second_algorithm: None,
            ksk_bits: 2048,
            zsk_bits: 1024,
            max_ttl: 8 * 3600,
            key_ttl: 4 * 3600,
            propagation: 300,
            parent_propagation: 300,
            resign_interval: 86400,
            clock_skew: 150,
            nsec3: Nsec3Mode::Off,
            serial_format: SerialFormat::Incremental,
            dynamic_zone: false,
            always_check_keysets: false,
            random_device: None,
            keyset_dir: None,
            dist_cmd: None,
            zone_file: "zone.db".into(),
            signed_file: "zone.db.signed".into(),
        }
    }
}

impl ZoneConfig {
    /// Whether the zone operates in hierarchical keyset mode, i.e. its
    /// keyset is handed to the zone one directory up.
    pub fn is_hierarchical(&self) -> bool {
        self.keyset_dir.as_deref() == Some("..")
    }

    /// The lifetime after which a deprecated ZSK may be deleted for good:
    /// by then no cached signature can still refer to it.
    pub fn deprecated_lifetime(&self) -> u32 {
        self.max_ttl + self.propagation
    }
}
