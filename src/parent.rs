//! The parent-file handshake for hierarchical KSK rollovers.
//!
//! A child zone below a signed parent rolls its KSK in three steps
//! coordinated through a transient `parent-<zone>` file. The file's first
//! line carries the phase, its body the DNSKEY record the parent must know
//! about in that phase. The file's own modification time is the only phase
//! clock.

use std::path::Path;

use crate::env::Env;
use crate::error::KeyError;
use crate::generate::KeyGenerator;
use crate::keys::{KeyRecord, KeyStatus};
use crate::log::RunContext;
use crate::rollover::generate_into;
use crate::util;
use crate::zone::ZoneRecord;

const PHASE_PREFIX: &str = "; KSK rollover phase";

/// Drive the hierarchical KSK rollover of one zone a step forward, if due.
///
/// Best-effort by design: every failure is logged against the run context
/// and the zone is left for the next pass. The caller never learns whether
/// anything happened; the signing decision picks the changes up through
/// file times.
pub(crate) fn ksk_rollover(
    zone: &mut ZoneRecord,
    parent_signed: bool,
    env: &impl Env,
    generator: &impl KeyGenerator,
    ctx: &mut RunContext,
) {
    let conf = zone.conf.clone();
    if !conf.is_hierarchical() || !parent_signed {
        return;
    }
    let now = env.seconds_since_epoch();
    let parent_path = zone.parent_file_path();

    if !parent_path.exists() {
        let Some(active) = zone
            .keys
            .nth_of_algorithm(true, conf.algorithm, KeyStatus::Active, 1)
        else {
            return;
        };
        let due = zone.keys.get(active).is_some_and(|r| {
            let lifetime = if r.lifetime() != 0 {
                r.lifetime()
            } else {
                conf.ksk_lifetime
            };
            lifetime != 0 && r.age(now) > lifetime.saturating_sub(conf.clock_skew)
        });
        if !due {
            return;
        }

        if let Err(err) = generate_into(zone, conf.algorithm, true, now, generator) {
            ctx.error(
                env,
                format_args!(
                    "\"{}\": unable to generate successor key signing key: {err}",
                    zone.name
                ),
            );
            return;
        }
        // The outgoing key is the oldest active one; its record goes into
        // the phase 1 file so the parent keeps vouching for it.
        let Some(outgoing) = zone
            .keys
            .nth_of_algorithm(true, conf.algorithm, KeyStatus::Active, 1)
            .and_then(|i| zone.keys.get(i))
        else {
            ctx.error(
                env,
                format_args!("\"{}\": active key signing key disappeared", zone.name),
            );
            return;
        };
        match write_parent_file(&parent_path, 1, outgoing, conf.key_ttl, now) {
            Ok(()) => ctx.info(
                env,
                format_args!(
                    "\"{}\": key signing key rollover started (phase 1)",
                    zone.name
                ),
            ),
            Err(err) => ctx.error(
                env,
                format_args!("\"{}\": unable to write parent file: {err}", zone.name),
            ),
        }
        return;
    }

    let phase = match read_phase(&parent_path) {
        Ok(phase) => phase,
        Err(err) => {
            ctx.error(
                env,
                format_args!("\"{}\": bad parent file: {err}", zone.name),
            );
            return;
        }
    };
    let file_age = now.saturating_sub(util::file_mtime(&parent_path).unwrap_or(now));

    match phase {
        1 => {
            if file_age <= conf.propagation + conf.key_ttl {
                return;
            }
            let Some(successor) = zone
                .keys
                .nth_of_algorithm(true, conf.algorithm, KeyStatus::Active, 2)
                .and_then(|i| zone.keys.get(i))
            else {
                ctx.error(
                    env,
                    format_args!(
                        "\"{}\": parent file at phase 1 but no successor key signing key",
                        zone.name
                    ),
                );
                return;
            };
            match write_parent_file(&parent_path, 2, successor, conf.key_ttl, now) {
                Ok(()) => ctx.info(
                    env,
                    format_args!(
                        "\"{}\": key signing key rollover entering phase 2",
                        zone.name
                    ),
                ),
                Err(err) => ctx.error(
                    env,
                    format_args!("\"{}\": unable to write parent file: {err}", zone.name),
                ),
            }
        }
        2 => {
            if file_age <= conf.parent_propagation + conf.key_ttl {
                return;
            }
            if let Err(err) = util::unlink(&parent_path) {
                ctx.error(
                    env,
                    format_args!("\"{}\": unable to remove parent file: {err}", zone.name),
                );
                return;
            }
            let Some(outgoing) = zone
                .keys
                .nth_of_algorithm(true, conf.algorithm, KeyStatus::Active, 1)
            else {
                ctx.error(
                    env,
                    format_args!(
                        "\"{}\": parent file at phase 2 but no outgoing key signing key",
                        zone.name
                    ),
                );
                return;
            };
            let tag = zone.keys.get(outgoing).map(|r| r.tag()).unwrap_or_default();
            match zone.keys.remove(outgoing) {
                Ok(()) => ctx.info(
                    env,
                    format_args!(
                        "\"{}\": key signing key rollover done; retired key {tag}",
                        zone.name
                    ),
                ),
                Err(err) => ctx.error(
                    env,
                    format_args!(
                        "\"{}\": unable to retire key signing key {tag}: {err}",
                        zone.name
                    ),
                ),
            }
        }
        other => {
            ctx.error(
                env,
                format_args!(
                    "\"{}\": {}",
                    zone.name,
                    KeyError::CorruptState(format!("parent file at unknown phase {other}"))
                ),
            );
        }
    }
}

/// Read the phase from the first line of a parent file.
fn read_phase(path: &Path) -> Result<u8, KeyError> {
    let contents = util::read_file(path)?;
    let first = contents.lines().next().unwrap_or_default();
    let phase = first
        .strip_prefix(PHASE_PREFIX)
        .and_then(|rest| rest.trim().parse::<u8>().ok())
        .ok_or_else(|| {
            KeyError::CorruptState(format!("unrecognized parent file header '{first}'"))
        })?;
    if phase == 1 || phase == 2 {
        Ok(phase)
    } else {
        Err(KeyError::CorruptState(format!(
            "parent file at unknown phase {phase}"
        )))
    }
}

/// Write a parent file and stamp it with the engine clock.
fn write_parent_file(
    path: &Path,
    phase: u8,
    record: &KeyRecord,
    ttl: u32,
    now: u32,
) -> Result<(), KeyError> {
    let mut out = format!("{PHASE_PREFIX}{phase}\n");
    out.push_str(&wrapped_dnskey(record, ttl));
    util::write_file(path, &out)?;
    util::touch(path, now)
}

/// Render a DNSKEY record in the multi-line form used in parent and
/// keyset files.
fn wrapped_dnskey(record: &KeyRecord, ttl: u32) -> String {
    let mut out = format!(
        "{} {} IN DNSKEY  {} {} {} (\n",
        record.name(),
        ttl,
        record.flags(),
        record.protocol(),
        record.algorithm().to_int()
    );
    let key = record.pubkey();
    let mut rest = key;
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(56));
        out.push_str("\t\t\t");
        out.push_str(chunk);
        out.push('\n');
        rest = tail;
    }
    out.push_str(&format!("\t\t\t) ; key id = {}\n", record.tag()));
    out
}
