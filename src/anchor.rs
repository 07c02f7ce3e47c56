//! Automated trust-anchor (RFC 5011) KSK maintenance.

use crate::config::{ZoneConfig, ADD_HOLD_DOWN, REMOVE_HOLD_DOWN};
use crate::env::Env;
use crate::generate::KeyGenerator;
use crate::keys::KeyStatus;
use crate::log::RunContext;
use crate::rollover::generate_into;
use crate::zone::ZoneRecord;

/// The outcome of one trust-anchor pass over a zone.
pub struct AnchorStatus {
    /// The zone must be re-signed.
    pub resign: bool,
    /// The zone carries a standby key and is managed per RFC 5011; the
    /// ordinary KSK rollover must stay away from it.
    pub is_rfc5011: bool,
}

/// Maintain the RFC 5011 state of a zone's key signing keys.
///
/// Walks the leading run of KSKs (the store order guarantees they precede
/// all ZSKs), purging revoked keys whose remove hold-down time has passed
/// and tracking the active and standby keys. While scanning, the *last*
/// matching key wins as the candidate, so the newest active and standby
/// keys are the canonical ones. When the active key is past its effective
/// expiration and the standby key has been around longer than the add
/// hold-down time, the actual rollover runs: a fresh standby key is
/// generated, the old standby becomes active and the old active key is
/// revoked with its expiration stamped to now.
pub fn ksk_5011_status(
    zone: &mut ZoneRecord,
    env: &impl Env,
    generator: &impl KeyGenerator,
    ctx: &mut RunContext,
) -> AnchorStatus {
    let conf = zone.conf.clone();
    let now = env.seconds_since_epoch();

    let mut resign = false;
    let mut removed_revoked = false;
    let mut active: Option<u16> = None;
    let mut standby: Option<u16> = None;

    let mut index = 0;
    while index < zone.keys.len() {
        let Some(record) = zone.keys.get(index) else {
            break;
        };
        if !record.is_ksk() {
            break;
        }
        let tag = record.tag();
        let expiration = record.effective_expiration(conf.ksk_lifetime);

        match record.status() {
            KeyStatus::Revoked => {
                if now > expiration.saturating_add(REMOVE_HOLD_DOWN) {
                    match zone.keys.destroy(index) {
                        Ok(()) => {
                            ctx.info(
                                env,
                                format_args!("\"{}\": removed revoked key {tag}", zone.name),
                            );
                            resign = true;
                            removed_revoked = true;
                            continue;
                        }
                        Err(err) => {
                            ctx.error(
                                env,
                                format_args!(
                                    "\"{}\": unable to remove revoked key {tag}: {err}",
                                    zone.name
                                ),
                            );
                        }
                    }
                }
            }
            KeyStatus::Published => standby = Some(tag),
            KeyStatus::Active => active = Some(tag),
            _ => (),
        }
        index += 1;
    }

    let Some(active_tag) = active else {
        return AnchorStatus {
            resign,
            is_rfc5011: false,
        };
    };
    if standby.is_none() && !removed_revoked {
        return AnchorStatus {
            resign,
            is_rfc5011: false,
        };
    }

    if let Some(standby_tag) = standby {
        let expired = zone
            .keys
            .find_by_tag_or_name(active_tag, Some(&zone.name))
            .ok()
            .and_then(|i| zone.keys.get(i))
            .is_some_and(|r| now > r.effective_expiration(conf.ksk_lifetime));
        let standby_settled = zone
            .keys
            .find_by_tag_or_name(standby_tag, Some(&zone.name))
            .ok()
            .and_then(|i| zone.keys.get(i))
            .is_some_and(|r| {
                now > r
                    .generation_time()
                    .saturating_add(ADD_HOLD_DOWN.min(conf.key_ttl))
            });

        if expired && standby_settled {
            resign |= rollover(zone, &conf, active_tag, standby_tag, now, env, generator, ctx);
        }
    }

    AnchorStatus {
        resign,
        is_rfc5011: true,
    }
}

/// Perform the actual RFC 5011 rollover step.
#[allow(clippy::too_many_arguments)]
fn rollover(
    zone: &mut ZoneRecord,
    conf: &ZoneConfig,
    active_tag: u16,
    standby_tag: u16,
    now: u32,
    env: &impl Env,
    generator: &impl KeyGenerator,
    ctx: &mut RunContext,
) -> bool {
    // Generate the replacement standby first; if that fails, the zone is
    // left untouched for the next pass.
    let fresh = match generate_into(zone, conf.algorithm, true, now, generator) {
        Ok(index) => index,
        Err(err) => {
            ctx.error(
                env,
                format_args!(
                    "\"{}\": unable to generate standby key signing key: {err}",
                    zone.name
                ),
            );
            return false;
        }
    };
    if let Err(err) = zone.keys.set_status(fresh, KeyStatus::Published, false, now) {
        ctx.error(
            env,
            format_args!(
                "\"{}\": unable to pre-publish key signing key: {err}",
                zone.name
            ),
        );
        return false;
    }

    let result = (|| {
        let standby = zone.keys.find_by_tag_or_name(standby_tag, Some(&zone.name))?;
        zone.keys.set_status(standby, KeyStatus::Active, false, now)?;
        let active = zone.keys.find_by_tag_or_name(active_tag, Some(&zone.name))?;
        zone.keys.set_status(active, KeyStatus::Revoked, false, now)?;
        if let Some(record) = zone.keys.get_mut(active) {
            record.set_expiration(now)?;
        }
        Ok::<(), crate::error::KeyError>(())
    })();
    match result {
        Ok(()) => {
            ctx.info(
                env,
                format_args!(
                    "\"{}\": trust anchor rollover: {standby_tag} active, {active_tag} revoked",
                    zone.name
                ),
            );
            true
        }
        Err(err) => {
            ctx.error(
                env,
                format_args!("\"{}\": trust anchor rollover failed: {err}", zone.name),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::fake::{FakeCmd, FakeEnv};
    use crate::generate::fake::FakeKeyGenerator;
    use crate::keys::record::EXT_ACTIVE;
    use crate::keys::record::EXT_PUBLISHED;
    use crate::keys::testutil::create_key;
    use crate::parse::format_timestamp;

    const NOW: u32 = 1_700_000_000;

    fn env() -> FakeEnv {
        FakeEnv {
            cmd: FakeCmd::new(["keyroll"]),
            stdout: Default::default(),
            stderr: Default::default(),
            now: Some(NOW),
        }
    }

    fn meta(generation: u32, lifetime_days: u32) -> String {
        format!(
            ";%\tgenerationtime={}\n;%\tlifetime={lifetime_days}d\n",
            format_timestamp(generation)
        )
    }

    fn make_zone(dir: &std::path::Path) -> ZoneRecord {
        let conf = ZoneConfig::default();
        std::fs::write(dir.join(&conf.zone_file), "; zone\n").unwrap();
        std::fs::write(dir.join(&conf.signed_file), "; signed\n").unwrap();
        ZoneRecord::load("example.net.".into(), dir.to_path_buf(), conf).unwrap()
    }

    #[test]
    fn plain_zone_is_not_rfc5011() {
        let dir = tempfile::tempdir().unwrap();
        create_key(
            dir.path(),
            "example.net.",
            8,
            600,
            true,
            false,
            Some(EXT_ACTIVE),
            NOW - 1_000,
            &meta(NOW - 1_000, 365),
        );
        let mut zone = make_zone(dir.path());
        let gen = FakeKeyGenerator::new(700, NOW);
        let mut ctx = RunContext::new(false);

        let status = ksk_5011_status(&mut zone, &env(), &gen, &mut ctx);
        assert!(!status.is_rfc5011);
        assert!(!status.resign);
        assert_eq!(zone.keys.len(), 1);
    }

    #[test]
    fn rollover_revokes_expired_active() {
        let dir = tempfile::tempdir().unwrap();
        // Active key generated 100 days ago with a 90 day lifetime.
        let old_gen = NOW - 100 * 86400;
        create_key(
            dir.path(),
            "example.net.",
            8,
            601,
            true,
            false,
            Some(EXT_ACTIVE),
            old_gen,
            &meta(old_gen, 90),
        );
        // Standby key well past the add hold-down time.
        let standby_gen = NOW - 86400;
        create_key(
            dir.path(),
            "example.net.",
            8,
            602,
            true,
            false,
            Some(EXT_PUBLISHED),
            standby_gen,
            &meta(standby_gen, 90),
        );
        let mut zone = make_zone(dir.path());
        let gen = FakeKeyGenerator::new(700, NOW);
        let mut ctx = RunContext::new(false);

        let status = ksk_5011_status(&mut zone, &env(), &gen, &mut ctx);
        assert!(status.is_rfc5011);
        assert!(status.resign);
        assert_eq!(ctx.error_count(), 0);

        let by_tag = |tag| {
            let i = zone.keys.find_by_tag_or_name(tag, None).unwrap();
            zone.keys.get(i).unwrap()
        };
        assert_eq!(by_tag(601).status(), KeyStatus::Revoked);
        assert_eq!(by_tag(601).expiration_time(), NOW);
        assert_eq!(by_tag(602).status(), KeyStatus::Active);
        assert_eq!(by_tag(700).status(), KeyStatus::Published);
        assert_eq!(zone.keys.len(), 3);
    }

    #[test]
    fn add_hold_down_blocks_early_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let old_gen = NOW - 100 * 86400;
        create_key(
            dir.path(),
            "example.net.",
            8,
            611,
            true,
            false,
            Some(EXT_ACTIVE),
            old_gen,
            &meta(old_gen, 90),
        );
        // Standby introduced exactly min(ADD_HOLD_DOWN, key_ttl) seconds
        // ago: not settled yet.
        let standby_gen = NOW - ZoneConfig::default().key_ttl;
        create_key(
            dir.path(),
            "example.net.",
            8,
            612,
            true,
            false,
            Some(EXT_PUBLISHED),
            standby_gen,
            &meta(standby_gen, 90),
        );
        let mut zone = make_zone(dir.path());
        let gen = FakeKeyGenerator::new(700, NOW);
        let mut ctx = RunContext::new(false);

        let status = ksk_5011_status(&mut zone, &env(), &gen, &mut ctx);
        assert!(status.is_rfc5011);
        assert!(!status.resign);
        assert_eq!(zone.keys.len(), 2);
        let i = zone.keys.find_by_tag_or_name(611, None).unwrap();
        assert_eq!(zone.keys.get(i).unwrap().status(), KeyStatus::Active);
    }

    #[test]
    fn newest_candidates_win() {
        let dir = tempfile::tempdir().unwrap();
        let old_gen = NOW - 100 * 86400;
        create_key(
            dir.path(),
            "example.net.",
            8,
            621,
            true,
            false,
            Some(EXT_ACTIVE),
            old_gen,
            &meta(old_gen, 90),
        );
        // Two settled standby keys; the later one in store order is taken.
        create_key(
            dir.path(),
            "example.net.",
            8,
            622,
            true,
            false,
            Some(EXT_PUBLISHED),
            NOW - 3 * 86400,
            &meta(NOW - 3 * 86400, 90),
        );
        create_key(
            dir.path(),
            "example.net.",
            8,
            623,
            true,
            false,
            Some(EXT_PUBLISHED),
            NOW - 86400,
            &meta(NOW - 86400, 90),
        );
        let mut zone = make_zone(dir.path());
        let gen = FakeKeyGenerator::new(700, NOW);
        let mut ctx = RunContext::new(false);

        let status = ksk_5011_status(&mut zone, &env(), &gen, &mut ctx);
        assert!(status.resign);
        let newer = zone.keys.find_by_tag_or_name(623, None).unwrap();
        assert_eq!(zone.keys.get(newer).unwrap().status(), KeyStatus::Active);
        let older = zone.keys.find_by_tag_or_name(622, None).unwrap();
        assert_eq!(zone.keys.get(older).unwrap().status(), KeyStatus::Published);
    }

    #[test]
    fn revoked_key_removed_after_hold_down() {
        let dir = tempfile::tempdir().unwrap();
        let dead_exp = NOW - REMOVE_HOLD_DOWN - 1;
        let dead = create_key(
            dir.path(),
            "example.net.",
            8,
            631,
            true,
            true,
            Some(EXT_ACTIVE),
            NOW - 200 * 86400,
            &format!(
                ";%\tgenerationtime={}\n;%\texpirationtime={}\n",
                format_timestamp(NOW - 200 * 86400),
                format_timestamp(dead_exp)
            ),
        );
        create_key(
            dir.path(),
            "example.net.",
            8,
            632,
            true,
            false,
            Some(EXT_ACTIVE),
            NOW - 86400,
            &meta(NOW - 86400, 365),
        );
        // A trailing ZSK must not be touched by the KSK walk.
        create_key(
            dir.path(),
            "example.net.",
            8,
            633,
            false,
            false,
            Some(EXT_ACTIVE),
            NOW - 86400,
            "",
        );
        let mut zone = make_zone(dir.path());
        let gen = FakeKeyGenerator::new(700, NOW);
        let mut ctx = RunContext::new(false);

        let status = ksk_5011_status(&mut zone, &env(), &gen, &mut ctx);
        // A removal counts as RFC 5011 activity even without a standby.
        assert!(status.is_rfc5011);
        assert!(status.resign);
        assert!(!dir.path().join(format!("{dead}.key")).exists());
        assert_eq!(zone.keys.len(), 2);
        let zsk = zone.keys.find_by_tag_or_name(633, None).unwrap();
        assert_eq!(zone.keys.get(zsk).unwrap().status(), KeyStatus::Active);
    }
}
