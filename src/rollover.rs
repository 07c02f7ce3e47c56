//! KSK and ZSK succession decisions for one zone.

use domain::base::iana::SecAlg;

use crate::env::Env;
use crate::error::KeyError;
use crate::generate::{generate_key, KeyGenerator};
use crate::keys::KeyStatus;
use crate::log::RunContext;
use crate::parent;
use crate::zone::ZoneRecord;

/// Generate a key for the zone and insert it into its store.
///
/// Returns the index of the new record. A freshly generated key is active
/// by the file convention; callers wanting a published key transition it
/// afterwards.
pub(crate) fn generate_into(
    zone: &mut ZoneRecord,
    algorithm: SecAlg,
    ksk: bool,
    now: u32,
    generator: &impl KeyGenerator,
) -> Result<usize, KeyError> {
    let record = generate_key(
        generator,
        &zone.directory,
        &zone.name,
        &zone.conf,
        algorithm,
        ksk,
        now,
    )?;
    let tag = record.tag();
    zone.keys.insert(record);
    zone.keys.find_by_tag_or_name(tag, Some(&zone.name))
}

/// Ensure the zone's KSK population is healthy.
///
/// Returns whether the zone must be re-signed. A missing active KSK is
/// replaced immediately; an existing one is handed to the hierarchical
/// rollover protocol, whose own progress is picked up on later passes via
/// file times rather than through the return value.
pub fn ksk_status(
    zone: &mut ZoneRecord,
    parent_signed: bool,
    env: &impl Env,
    generator: &impl KeyGenerator,
    ctx: &mut RunContext,
) -> bool {
    let conf = zone.conf.clone();
    if conf.ksk_lifetime == 0 {
        return false;
    }
    let now = env.seconds_since_epoch();

    match zone
        .keys
        .nth_of_algorithm(true, conf.algorithm, KeyStatus::Active, 1)
    {
        None => {
            match generate_into(zone, conf.algorithm, true, now, generator) {
                Ok(index) => {
                    let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
                    ctx.info(
                        env,
                        format_args!("\"{}\": generated new key signing key {tag}", zone.name),
                    );
                    return true;
                }
                Err(err) => {
                    ctx.error(
                        env,
                        format_args!(
                            "\"{}\": unable to generate new key signing key: {err}",
                            zone.name
                        ),
                    );
                    return false;
                }
            }
        }
        Some(_) => {
            parent::ksk_rollover(zone, parent_signed, env, generator, ctx);
        }
    }

    if let Some(second) = conf.second_algorithm {
        if second != conf.algorithm
            && zone
                .keys
                .nth_of_algorithm(true, second, KeyStatus::Active, 1)
                .is_none()
        {
            match generate_into(zone, second, true, now, generator) {
                Ok(index) => {
                    let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
                    ctx.info(
                        env,
                        format_args!(
                            "\"{}\": generated new key signing key {tag} for second algorithm",
                            zone.name
                        ),
                    );
                    return true;
                }
                Err(err) => {
                    ctx.error(
                        env,
                        format_args!(
                            "\"{}\": unable to generate key signing key for second algorithm: {err}",
                            zone.name
                        ),
                    );
                }
            }
        }
    }
    false
}

/// Ensure the zone's ZSK population is healthy.
///
/// Returns whether the zone must be re-signed. The steps, in order: purge
/// deprecated keys past their hold time, replace or roll the active key,
/// pre-stage a published successor, and cover a configured second
/// algorithm.
pub fn zsk_status(
    zone: &mut ZoneRecord,
    env: &impl Env,
    generator: &impl KeyGenerator,
    ctx: &mut RunContext,
) -> bool {
    let conf = zone.conf.clone();
    let now = env.seconds_since_epoch();
    let mut resign = false;

    // Deprecated keys are no longer needed once every resolver cache has
    // seen signatures of the successor.
    let deprecated_lifetime = conf.deprecated_lifetime();
    let mut index = 0;
    while index < zone.keys.len() {
        let expired = zone.keys.get(index).is_some_and(|r| {
            !r.is_ksk() && r.status() == KeyStatus::Deprecated && r.age(now) > deprecated_lifetime
        });
        if !expired {
            index += 1;
            continue;
        }
        let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
        match zone.keys.destroy(index) {
            Ok(()) => {
                ctx.info(
                    env,
                    format_args!("\"{}\": removed old zone signing key {tag}", zone.name),
                );
                resign = true;
            }
            Err(err) => {
                ctx.error(
                    env,
                    format_args!(
                        "\"{}\": unable to remove zone signing key {tag}: {err}",
                        zone.name
                    ),
                );
                index += 1;
            }
        }
    }

    let active = zone
        .keys
        .nth_of_algorithm(false, conf.algorithm, KeyStatus::Active, 1);
    let had_active = active.is_some();
    match active {
        None => {
            if conf.zsk_lifetime != 0 {
                match generate_into(zone, conf.algorithm, false, now, generator) {
                    Ok(index) => {
                        let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
                        ctx.info(
                            env,
                            format_args!("\"{}\": generated new zone signing key {tag}", zone.name),
                        );
                        resign = true;
                    }
                    Err(err) => {
                        ctx.error(
                            env,
                            format_args!(
                                "\"{}\": unable to generate new zone signing key: {err}",
                                zone.name
                            ),
                        );
                    }
                }
            }
        }
        Some(index) => {
            let (lifetime, age, tag) = match zone.keys.get(index) {
                Some(r) => (
                    if r.lifetime() != 0 {
                        r.lifetime()
                    } else {
                        conf.zsk_lifetime
                    },
                    r.age(now),
                    r.tag(),
                ),
                None => (0, 0, 0),
            };
            if lifetime != 0 && age > lifetime.saturating_sub(conf.clock_skew) {
                // A second active key takes precedence over a published
                // one as the successor during an odd intermediate state.
                let successor = zone
                    .keys
                    .nth_of_algorithm(false, conf.algorithm, KeyStatus::Active, 2)
                    .filter(|&s| s != index)
                    .or_else(|| {
                        zone.keys.nth_of_algorithm(
                            false,
                            conf.algorithm,
                            KeyStatus::Published,
                            1,
                        )
                    });
                if let Some(successor) = successor {
                    let visible_long_enough = zone
                        .keys
                        .get(successor)
                        .is_some_and(|r| r.age(now) > conf.key_ttl + conf.propagation);
                    if visible_long_enough {
                        let succ_tag = zone
                            .keys
                            .get(successor)
                            .map(|r| r.tag())
                            .unwrap_or_default();
                        let result = zone
                            .keys
                            .set_status(successor, KeyStatus::Active, false, now)
                            .and_then(|()| {
                                zone.keys.set_status(index, KeyStatus::Deprecated, false, now)
                            });
                        match result {
                            Ok(()) => {
                                ctx.info(
                                    env,
                                    format_args!(
                                        "\"{}\": lifetime of zone signing key {tag} exceeded; \
                                         rolling over to {succ_tag}",
                                        zone.name
                                    ),
                                );
                                resign = true;
                            }
                            Err(err) => {
                                ctx.error(
                                    env,
                                    format_args!(
                                        "\"{}\": zone signing key rollover {tag} -> {succ_tag} \
                                         failed: {err}",
                                        zone.name
                                    ),
                                );
                            }
                        }
                    } else {
                        ctx.info(
                            env,
                            format_args!(
                                "\"{}\": lifetime of zone signing key {tag} exceeded, but the \
                                 successor is not visible long enough yet; deferring rollover",
                                zone.name
                            ),
                        );
                    }
                }
            }
        }
    }

    // Pre-stage a successor so that the next rollover never has to wait
    // for key propagation.
    if conf.zsk_lifetime != 0
        && zone
            .keys
            .nth_of_algorithm(false, conf.algorithm, KeyStatus::Published, 1)
            .is_none()
    {
        let needed = !had_active
            || zone
                .keys
                .nth_of_algorithm(false, conf.algorithm, KeyStatus::Active, 1)
                .and_then(|i| zone.keys.get(i))
                .is_some_and(|r| {
                    let lifetime = if r.lifetime() != 0 {
                        r.lifetime()
                    } else {
                        conf.zsk_lifetime
                    };
                    r.age(now).saturating_add(conf.resign_interval)
                        > lifetime.saturating_sub(conf.clock_skew)
                });
        if needed {
            match generate_into(zone, conf.algorithm, false, now, generator) {
                Ok(index) => {
                    let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
                    match zone.keys.set_status(index, KeyStatus::Published, false, now) {
                        Ok(()) => {
                            ctx.info(
                                env,
                                format_args!(
                                    "\"{}\": generated standby zone signing key {tag}",
                                    zone.name
                                ),
                            );
                            resign = true;
                        }
                        Err(err) => {
                            ctx.error(
                                env,
                                format_args!(
                                    "\"{}\": unable to pre-publish zone signing key {tag}: {err}",
                                    zone.name
                                ),
                            );
                        }
                    }
                }
                Err(err) => {
                    ctx.error(
                        env,
                        format_args!(
                            "\"{}\": unable to generate standby zone signing key: {err}",
                            zone.name
                        ),
                    );
                }
            }
        }
    }

    if let Some(second) = conf.second_algorithm {
        if second != conf.algorithm
            && conf.zsk_lifetime != 0
            && zone
                .keys
                .nth_of_algorithm(false, second, KeyStatus::Active, 1)
                .is_none()
        {
            match generate_into(zone, second, false, now, generator) {
                Ok(index) => {
                    let tag = zone.keys.get(index).map(|r| r.tag()).unwrap_or_default();
                    ctx.info(
                        env,
                        format_args!(
                            "\"{}\": generated new zone signing key {tag} for second algorithm",
                            zone.name
                        ),
                    );
                    resign = true;
                }
                Err(err) => {
                    ctx.error(
                        env,
                        format_args!(
                            "\"{}\": unable to generate zone signing key for second algorithm: \
                             {err}",
                            zone.name
                        ),
                    );
                }
            }
        }
    }

    resign
}
