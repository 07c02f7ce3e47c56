//! Deciding on and carrying out the re-signing of a zone.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::SerialFormat;
use crate::env::Env;
use crate::error::KeyError;
use crate::log::RunContext;
use crate::util;
use crate::zone::ZoneRecord;

//------------ SignReason ----------------------------------------------------

/// Why a zone needs re-signing. The first matching reason is reported even
/// though any of them alone suffices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignReason {
    /// Operator override.
    Forced,
    /// A key management step changed the key set this pass.
    KeyChange,
    /// A child keyset file is newer than the signed zone.
    NewKeyset,
    /// The aggregated DNSKEY file is newer than the signed zone.
    KeyDbNewer,
    /// The zone source file is newer than the signed zone.
    ZoneFileNewer,
    /// The re-sign interval has passed.
    ResignInterval,
    /// Dynamic zones are re-signed on every pass.
    DynamicZone,
}

impl fmt::Display for SignReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignReason::Forced => "forced",
            SignReason::KeyChange => "changed keys",
            SignReason::NewKeyset => "new keyset",
            SignReason::KeyDbNewer => "modified dnskey file",
            SignReason::ZoneFileNewer => "modified zone file",
            SignReason::ResignInterval => "re-sign interval passed",
            SignReason::DynamicZone => "dynamic zone",
        })
    }
}

/// Whether the zone needs re-signing, and why.
pub fn sign_reason(
    zone: &ZoneRecord,
    key_change: bool,
    force: bool,
    now: u32,
) -> Option<SignReason> {
    if force {
        return Some(SignReason::Forced);
    }
    if key_change {
        return Some(SignReason::KeyChange);
    }

    let conf = &zone.conf;
    let signed_time = util::file_mtime(zone.signed_file_path()).unwrap_or(0);

    if (conf.is_hierarchical() || conf.always_check_keysets)
        && newer_keyset_exists(&zone.directory, signed_time)
    {
        return Some(SignReason::NewKeyset);
    }
    if util::file_mtime(zone.keydb_path()).unwrap_or(0) > signed_time {
        return Some(SignReason::KeyDbNewer);
    }
    if util::file_mtime(zone.zone_file_path()).unwrap_or(0) > signed_time {
        return Some(SignReason::ZoneFileNewer);
    }
    if now.saturating_sub(signed_time)
        > conf.resign_interval.saturating_sub(conf.clock_skew)
    {
        return Some(SignReason::ResignInterval);
    }
    if conf.dynamic_zone {
        return Some(SignReason::DynamicZone);
    }
    None
}

/// Whether any `keyset-` file in the directory is newer than the given
/// time. Unreadable directories count as "no".
fn newer_keyset_exists(dir: &Path, signed_time: u32) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("keyset-"))
        .any(|e| util::file_mtime(e.path()).unwrap_or(0) > signed_time)
}

//------------ ZoneSigner ----------------------------------------------------

/// The external signing capability. The production implementation shells
/// out; tests fabricate the signed zone file directly.
pub trait ZoneSigner {
    fn sign(&self, zone: &ZoneRecord) -> Result<(), KeyError>;
}

/// Shells out to `dnssec-signzone` (or a compatible program).
pub struct CommandZoneSigner {
    program: PathBuf,
}

impl CommandZoneSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandZoneSigner {
            program: program.into(),
        }
    }
}

impl Default for CommandZoneSigner {
    fn default() -> Self {
        Self::new("dnssec-signzone")
    }
}

impl ZoneSigner for CommandZoneSigner {
    fn sign(&self, zone: &ZoneRecord) -> Result<(), KeyError> {
        let conf = &zone.conf;
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&zone.directory)
            .arg("-o")
            .arg(&zone.name)
            .arg("-f")
            .arg(&conf.signed_file);
        match conf.nsec3 {
            crate::config::Nsec3Mode::Off => (),
            crate::config::Nsec3Mode::On => {
                cmd.arg("-3").arg("-");
            }
            crate::config::Nsec3Mode::OptOut => {
                cmd.arg("-3").arg("-").arg("-A");
            }
        }
        if conf.serial_format == SerialFormat::UnixTime {
            cmd.arg("-N").arg("unixtime");
        }
        if let Some(device) = conf.random_device.as_deref() {
            cmd.arg("-r").arg(device);
        }
        if conf.is_hierarchical() {
            // Also emit the keyset file for the parent.
            cmd.arg("-g");
        }
        cmd.arg(&conf.zone_file);

        let output = cmd.output().map_err(|err| {
            KeyError::Signing(format!(
                "cannot run '{}' for {}: {err}",
                self.program.display(),
                zone.name
            ))
        })?;
        if !output.status.success() {
            return Err(KeyError::Signing(format!(
                "'{}' failed for {} ({}): {}",
                self.program.display(),
                zone.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // The signer reports the signed file name on success.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .is_some_and(|l| l.ends_with(conf.signed_file.as_str()))
        {
            return Err(KeyError::Signing(format!(
                "'{}' did not confirm signing of {}",
                self.program.display(),
                zone.name
            )));
        }
        Ok(())
    }
}

//------------ The signing pass ----------------------------------------------

/// Run the signing decision and, if due, the signing itself for one zone.
///
/// Even when no signing is needed the parent keyset is synchronized, so a
/// pending hierarchical rollover keeps making progress. Returns whether the
/// zone was signed.
pub fn process_zone(
    zone: &mut ZoneRecord,
    key_change: bool,
    force: bool,
    dry_run: bool,
    env: &impl Env,
    signer: &impl ZoneSigner,
    ctx: &mut RunContext,
) -> bool {
    let now = env.seconds_since_epoch();
    let Some(reason) = sign_reason(zone, key_change, force, now) else {
        ctx.info(
            env,
            format_args!("\"{}\": no signing necessary", zone.name),
        );
        sync_parent_keyset(zone, env, ctx);
        return false;
    };

    ctx.info(
        env,
        format_args!("\"{}\": re-signing necessary: {reason}", zone.name),
    );
    if dry_run {
        return false;
    }

    if let Err(err) = write_key_db(zone) {
        ctx.error(
            env,
            format_args!("\"{}\": unable to write dnskey file: {err}", zone.name),
        );
        return false;
    }

    if zone.conf.serial_format == SerialFormat::Incremental && !zone.conf.dynamic_zone {
        match increment_serial(&zone.zone_file_path()) {
            Ok(serial) => ctx.info(
                env,
                format_args!("\"{}\": incremented serial to {serial}", zone.name),
            ),
            Err(err) => {
                ctx.error(
                    env,
                    format_args!(
                        "\"{}\": unable to increment zone serial: {err}",
                        zone.name
                    ),
                );
                return false;
            }
        }
    }

    if let Err(err) = signer.sign(zone) {
        ctx.error(env, format_args!("\"{}\": {err}", zone.name));
        return false;
    }
    ctx.info(env, format_args!("\"{}\": signed", zone.name));

    sync_parent_keyset(zone, env, ctx);
    distribute(zone, env, ctx);
    true
}

/// Write the aggregated DNSKEY file consumed by the signer.
///
/// The store order puts key signing keys first, which is also the order the
/// file must list them in.
pub fn write_key_db(zone: &ZoneRecord) -> Result<(), KeyError> {
    let mut out = format!(";\n;\tDNSKEY records for zone {}\n;\n", zone.name);
    for record in zone.keys.iter() {
        if record.generation_time() != 0 {
            out.push_str(&format!(
                ";%\tgenerationtime={}\n",
                crate::parse::format_timestamp(record.generation_time())
            ));
        }
        if record.lifetime() != 0 {
            out.push_str(&format!(";%\tlifetime={}d\n", record.lifetime() / 86400));
        }
        if record.expiration_time() != 0 {
            out.push_str(&format!(
                ";%\texpirationtime={}\n",
                crate::parse::format_timestamp(record.expiration_time())
            ));
        }
        out.push_str(&record.dnskey_line(Some(zone.conf.key_ttl)));
        out.push('\n');
    }
    util::write_file(zone.keydb_path(), &out)
}

/// Increment the SOA serial of a zone file in place.
///
/// The serial is the first all-digit token after the SOA keyword once the
/// mname and rname fields are skipped; comments and parentheses do not
/// count as tokens.
pub(crate) fn increment_serial(path: &Path) -> Result<u32, KeyError> {
    let text = util::read_file(path)?;
    let (start, end) = find_serial_span(&text).ok_or_else(|| {
        KeyError::Parse(format!("no SOA serial found in '{}'", path.display()))
    })?;
    let old: u32 = text[start..end]
        .parse()
        .map_err(|_| KeyError::Parse(format!("bad SOA serial in '{}'", path.display())))?;
    let new = old.wrapping_add(1);

    let mut updated = String::with_capacity(text.len() + 10);
    updated.push_str(&text[..start]);
    updated.push_str(&new.to_string());
    updated.push_str(&text[end..]);
    util::write_file(path, &updated)?;
    Ok(new)
}

/// Locate the byte span of the SOA serial within zone file text.
fn find_serial_span(text: &str) -> Option<(usize, usize)> {
    let mut soa_seen = false;
    let mut fields_skipped = 0;
    for (start, end) in token_spans(text) {
        let token = &text[start..end];
        if !soa_seen {
            soa_seen = token.eq_ignore_ascii_case("SOA");
            continue;
        }
        if token == "(" {
            continue;
        }
        // The mname and rname fields precede the serial.
        if fields_skipped < 2 {
            fields_skipped += 1;
            continue;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            return Some((start, end));
        }
        return None;
    }
    None
}

/// Whitespace-separated token spans, with `;` comments blanked per line.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    let mut comment = false;
    for (i, c) in text.char_indices() {
        if comment {
            if c == '\n' {
                comment = false;
            }
            continue;
        }
        if c == ';' {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
            comment = true;
            continue;
        }
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Copy the parent file, or failing that the keyset file, up to the parent
/// zone's directory when it changed. Only meaningful in hierarchical mode.
fn sync_parent_keyset(zone: &ZoneRecord, env: &impl Env, ctx: &mut RunContext) {
    if !zone.conf.is_hierarchical() {
        return;
    }
    let Some(parent_dir) = zone.parent_directory() else {
        return;
    };

    let parent_file = zone.parent_file_path();
    let (source, name) = if parent_file.exists() {
        (parent_file, zone.parent_file_name())
    } else {
        (
            zone.directory.join(zone.keyset_file_name()),
            zone.keyset_file_name(),
        )
    };
    if !source.exists() {
        return;
    }

    match util::copy_if_changed(&source, &parent_dir.join(&name)) {
        Ok(true) => ctx.info(
            env,
            format_args!("\"{}\": keyset propagated to parent", zone.name),
        ),
        Ok(false) => (),
        Err(err) => ctx.error(
            env,
            format_args!(
                "\"{}\": unable to propagate keyset to parent: {err}",
                zone.name
            ),
        ),
    }
}

/// Run the configured distribution command after a successful signing.
fn distribute(zone: &ZoneRecord, env: &impl Env, ctx: &mut RunContext) {
    let Some(cmd) = zone.conf.dist_cmd.as_deref() else {
        return;
    };
    let result = Command::new(cmd)
        .arg(&zone.name)
        .arg(zone.signed_file_path())
        .output();
    match result {
        Ok(output) if output.status.success() => ctx.info(
            env,
            format_args!("\"{}\": distribution command succeeded", zone.name),
        ),
        Ok(output) => ctx.error(
            env,
            format_args!(
                "\"{}\": distribution command failed ({}): {}",
                zone.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ),
        Err(err) => ctx.error(
            env,
            format_args!(
                "\"{}\": unable to run distribution command: {err}",
                zone.name
            ),
        ),
    }
}

//------------ FakeZoneSigner ------------------------------------------------


#[cfg(test)]
mod tests {
    use super::fake::FakeZoneSigner;
    use super::*;
    use crate::config::ZoneConfig;
    use crate::env::fake::{FakeCmd, FakeEnv};
    use crate::keys::record::{EXT_ACTIVE, EXT_PUBLISHED};
    use crate::keys::testutil::create_key;

    const NOW: u32 = 30_000_000;

    fn env() -> FakeEnv {
        FakeEnv {
            cmd: FakeCmd::new(["keyroll"]),
            stdout: Default::default(),
            stderr: Default::default(),
            now: Some(NOW),
        }
    }

    fn make_zone(dir: &Path, conf: ZoneConfig, signed_at: u32) -> ZoneRecord {
        let zone_file = dir.join(&conf.zone_file);
        util::write_file(
            &zone_file,
            "example.net. IN SOA ns1.example.net. hostmaster.example.net. (\n\
             \t42\t; serial\n\t3600 900 604800 3600 )\n",
        )
        .unwrap();
        util::touch(&zone_file, signed_at.saturating_sub(10)).unwrap();
        let signed = dir.join(&conf.signed_file);
        util::write_file(&signed, "; signed\n").unwrap();
        util::touch(&signed, signed_at).unwrap();
        ZoneRecord::load("example.net.".into(), dir.to_path_buf(), conf).unwrap()
    }

    #[test]
    fn reasons_in_order() {
        let dir = tempfile::tempdir().unwrap();
        // Freshly signed: nothing to do.
        let zone = make_zone(dir.path(), ZoneConfig::default(), NOW - 100);
        assert_eq!(sign_reason(&zone, false, false, NOW), None);
        assert_eq!(
            sign_reason(&zone, false, true, NOW),
            Some(SignReason::Forced)
        );
        assert_eq!(
            sign_reason(&zone, true, false, NOW),
            Some(SignReason::KeyChange)
        );

        // Zone file touched after the last signing.
        util::touch(zone.zone_file_path(), NOW - 50).unwrap();
        assert_eq!(
            sign_reason(&zone, false, false, NOW),
            Some(SignReason::ZoneFileNewer)
        );
        util::touch(zone.zone_file_path(), NOW - 200).unwrap();

        // A fresh dnskey file.
        util::write_file(zone.keydb_path(), "; keys\n").unwrap();
        util::touch(zone.keydb_path(), NOW - 50).unwrap();
        assert_eq!(
            sign_reason(&zone, false, false, NOW),
            Some(SignReason::KeyDbNewer)
        );
        util::touch(zone.keydb_path(), NOW - 200).unwrap();

        // Re-sign interval exceeded.
        let conf = zone.conf.clone();
        let late = NOW - 100 + conf.resign_interval.saturating_sub(conf.clock_skew) + 1;
        assert_eq!(
            sign_reason(&zone, false, false, late),
            Some(SignReason::ResignInterval)
        );
    }

    #[test]
    fn keyset_check_only_in_hierarchical_mode() {
        let dir = tempfile::tempdir().unwrap();
        let zone = make_zone(dir.path(), ZoneConfig::default(), NOW - 100);
        let keyset = dir.path().join("keyset-child.example.net.");
        util::write_file(&keyset, "; keyset\n").unwrap();
        util::touch(&keyset, NOW - 10).unwrap();
        assert_eq!(sign_reason(&zone, false, false, NOW), None);

        let mut conf = ZoneConfig::default();
        conf.always_check_keysets = true;
        let zone = ZoneRecord::load("example.net.".into(), dir.path().to_path_buf(), conf)
            .unwrap();
        assert_eq!(
            sign_reason(&zone, false, false, NOW),
            Some(SignReason::NewKeyset)
        );
    }

    #[test]
    fn serial_increment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone.db");
        util::write_file(
            &path,
            "; 99 not a serial\n\
             example.net. 3600 IN SOA ns1.example.net. host.example.net. (\n\
             \t\t2024010100 ; serial\n\
             \t\t3600 900 604800 3600 )\n",
        )
        .unwrap();
        assert_eq!(increment_serial(&path).unwrap(), 2024010101);
        assert!(util::read_file(&path).unwrap().contains("2024010101"));

        // No SOA record at all.
        util::write_file(&path, "example.net. IN NS ns1.example.net.\n").unwrap();
        assert!(increment_serial(&path).is_err());
    }

    #[test]
    fn signing_pass_writes_key_db_and_signs() {
        let dir = tempfile::tempdir().unwrap();
        create_key(
            dir.path(),
            "example.net.",
            8,
            800,
            false,
            false,
            Some(EXT_ACTIVE),
            NOW - 500,
            "",
        );
        create_key(
            dir.path(),
            "example.net.",
            8,
            801,
            true,
            false,
            Some(EXT_PUBLISHED),
            NOW - 400,
            "",
        );
        let mut zone = make_zone(dir.path(), ZoneConfig::default(), NOW - 100);
        let env = env();
        let signer = FakeZoneSigner::new(NOW);
        let mut ctx = RunContext::new(false);

        assert!(process_zone(
            &mut zone, true, false, false, &env, &signer, &mut ctx
        ));
        assert_eq!(signer.calls.get(), 1);
        assert_eq!(ctx.error_count(), 0);

        let db = util::read_file(zone.keydb_path()).unwrap();
        // KSK listed before ZSK.
        let ksk_pos = db.find("257 3 8").unwrap();
        let zsk_pos = db.find("256 3 8").unwrap();
        assert!(ksk_pos < zsk_pos);
        // Serial went up.
        assert!(util::read_file(zone.zone_file_path())
            .unwrap()
            .contains("\t43\t"));
    }

    #[test]
    fn dry_run_does_not_sign() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = make_zone(dir.path(), ZoneConfig::default(), NOW - 100);
        let env = env();
        let signer = FakeZoneSigner::new(NOW);
        let mut ctx = RunContext::new(false);

        assert!(!process_zone(
            &mut zone, false, true, true, &env, &signer, &mut ctx
        ));
        assert_eq!(signer.calls.get(), 0);
        assert!(!zone.keydb_path().exists());
    }

    #[test]
    fn failed_signer_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = make_zone(dir.path(), ZoneConfig::default(), NOW - 100);
        let env = env();
        let signer = FakeZoneSigner::new(NOW);
        signer.fail.set(true);
        let mut ctx = RunContext::new(false);

        assert!(!process_zone(
            &mut zone, false, true, false, &env, &signer, &mut ctx
        ));
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn keyset_is_propagated_without_signing() {
        let root = tempfile::tempdir().unwrap();
        let parent_dir = root.path().join("example.net");
        let child_dir = parent_dir.join("sub.example.net");
        std::fs::create_dir_all(&child_dir).unwrap();

        let mut conf = ZoneConfig::default();
        conf.keyset_dir = Some("..".into());
        let zone_file = child_dir.join(&conf.zone_file);
        util::write_file(&zone_file, "; zone\n").unwrap();
        util::touch(&zone_file, NOW - 200).unwrap();
        let signed = child_dir.join(&conf.signed_file);
        util::write_file(&signed, "; signed\n").unwrap();
        util::touch(&signed, NOW - 100).unwrap();
        let keyset = child_dir.join("keyset-sub.example.net.");
        util::write_file(&keyset, "; keyset\n").unwrap();
        util::touch(&keyset, NOW - 150).unwrap();

        let mut zone = ZoneRecord::load(
            "sub.example.net.".into(),
            child_dir.clone(),
            conf,
        )
        .unwrap();
        let env = env();
        let signer = FakeZoneSigner::new(NOW);
        let mut ctx = RunContext::new(false);

        // Keyset is older than the signed zone, so no signing happens, but
        // the parent copy is still made.
        assert!(!process_zone(
            &mut zone, false, false, false, &env, &signer, &mut ctx
        ));
        assert!(parent_dir.join("keyset-sub.example.net.").exists());
        assert_eq!(ctx.error_count(), 0);
    }
}
