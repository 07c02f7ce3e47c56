//! Parsing of key files and their naming convention.
//!
//! The filename grammar is `K<zone>+<alg:3>+<tag:5><ext>` where `<ext>` is
//! `.key` for the public key and `.private`, `.published` or `.depreciated`
//! for the private side; which private-side sibling exists determines the
//! key's status. A retired key has the leading `K` lower-cased so that scans
//! skip it without deleting data.

use std::path::Path;

use domain::base::iana::SecAlg;
use domain::utils::base64;

use crate::error::KeyError;
use crate::keys::record::{
    KeyRecord, KeyStatus, EXT_ACTIVE, EXT_DEPRECATED, EXT_KEY, EXT_PUBLISHED, FLAG_ZONE,
};
use crate::parse::parse_timestamp;
use crate::util;

/// Whether a directory entry name is a candidate public key file.
pub fn is_key_file_name(name: &str) -> bool {
    name.starts_with('K') && name.ends_with(EXT_KEY)
}

/// Parse `K<zone>+<alg:3>+<tag:5>.key` into its parts.
pub fn parse_file_name(name: &str) -> Result<(String, SecAlg, u16), KeyError> {
    let malformed = || KeyError::Parse(format!("malformed key file name '{name}'"));

    let base = name
        .strip_prefix('K')
        .and_then(|rest| rest.strip_suffix(EXT_KEY))
        .ok_or_else(malformed)?;

    // The zone name itself may not contain '+', so split from the right.
    let (rest, tag) = base.rsplit_once('+').ok_or_else(malformed)?;
    let (zone, alg) = rest.rsplit_once('+').ok_or_else(malformed)?;

    if alg.len() != 3 || tag.len() != 5 || zone.is_empty() {
        return Err(malformed());
    }
    let alg: u8 = alg.parse().map_err(|_| malformed())?;
    let tag: u16 = tag.parse().map_err(|_| malformed())?;
    if tag == 0 {
        return Err(KeyError::Parse(format!(
            "key file '{name}' carries the reserved tag 0"
        )));
    }

    let mut zone = zone.to_lowercase();
    if !zone.ends_with('.') {
        zone.push('.');
    }
    Ok((zone, SecAlg::from_int(alg), tag))
}

/// Determine the status of a key from which private-side sibling exists.
fn status_from_siblings(dir: &Path, base: &str) -> KeyStatus {
    for (ext, status) in [
        (EXT_ACTIVE, KeyStatus::Active),
        (EXT_PUBLISHED, KeyStatus::Published),
        (EXT_DEPRECATED, KeyStatus::Deprecated),
    ] {
        if dir.join(format!("{base}{ext}")).exists() {
            return status;
        }
    }
    KeyStatus::Sep
}

/// Parse one public key file (filename plus body) into a [`KeyRecord`].
pub fn parse_key_file(dir: &Path, file_name: &str) -> Result<KeyRecord, KeyError> {
    let (zone, algorithm, tag) = parse_file_name(file_name)?;
    let path = dir.join(file_name);
    let body = util::read_file(&path)?;

    let mut generation_time = 0;
    let mut expiration_time = 0;
    let mut lifetime = 0;
    let mut record_text = String::new();

    for line in body.lines() {
        if let Some(meta) = line.strip_prefix(";%") {
            let meta = meta.trim();
            if let Some(v) = meta.strip_prefix("generationtime=") {
                generation_time = parse_timestamp(v.trim())
                    .map_err(|e| KeyError::Parse(format!("{}: {e}", path.display())))?;
            } else if let Some(v) = meta.strip_prefix("expirationtime=") {
                expiration_time = parse_timestamp(v.trim())
                    .map_err(|e| KeyError::Parse(format!("{}: {e}", path.display())))?;
            } else if let Some(v) = meta.strip_prefix("lifetime=") {
                lifetime = parse_lifetime(v.trim())
                    .ok_or_else(|| KeyError::Parse(format!("{}: bad lifetime", path.display())))?;
            }
            continue;
        }
        if line.trim_start().starts_with(';') {
            continue;
        }
        if line.trim().is_empty() && record_text.is_empty() {
            continue;
        }
        // The record may wrap across lines within parentheses; collect it
        // all and tokenize afterwards. Trailing per-line comments go.
        let line = line.split(';').next().unwrap_or("");
        record_text.push_str(line);
        record_text.push(' ');
        if !record_text.contains('(') || record_text.contains(')') {
            break;
        }
    }

    let parts = parse_dnskey_text(&record_text)
        .map_err(|msg| KeyError::Parse(format!("{}: {msg}", path.display())))?;

    if !parts.owner.eq_ignore_ascii_case(&zone) {
        return Err(KeyError::Parse(format!(
            "{}: owner '{}' does not match zone '{zone}'",
            path.display(),
            parts.owner
        )));
    }
    if parts.algorithm != algorithm {
        return Err(KeyError::Parse(format!(
            "{}: record algorithm {} does not match file name",
            path.display(),
            parts.algorithm
        )));
    }
    if parts.flags & FLAG_ZONE == 0 {
        return Err(KeyError::Parse(format!(
            "{}: zone key flag is not set",
            path.display()
        )));
    }
    // Reject unusable base64 early rather than at signing time.
    base64::decode::<Vec<u8>>(&parts.pubkey)
        .map_err(|e| KeyError::Parse(format!("{}: bad public key: {e}", path.display())))?;

    let base = file_name.strip_suffix(EXT_KEY).unwrap_or(file_name);
    let status = status_from_siblings(dir, base);
    let file_time = util::file_mtime(&path).unwrap_or(0);

    let mut record = KeyRecord::new(
        zone,
        algorithm,
        tag,
        parts.flags,
        parts.protocol,
        parts.pubkey,
        status,
        file_time,
        dir.to_path_buf(),
    );
    record.set_meta(generation_time, lifetime, expiration_time);
    Ok(record)
}

/// Lifetimes are written as `<N>d`; accept a bare number of seconds too.
fn parse_lifetime(value: &str) -> Option<u32> {
    if let Some(days) = value.strip_suffix('d') {
        days.parse::<u32>().ok()?.checked_mul(86400)
    } else {
        value.parse().ok()
    }
}

/// The fields of a DNSKEY record line.
pub(crate) struct DnskeyParts {
    pub owner: String,
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: SecAlg,
    pub pubkey: String,
}

/// Tokenize a DNSKEY record, tolerating an optional TTL, an optional class
/// and parenthesized line wrapping of the key material.
pub(crate) fn parse_dnskey_text(text: &str) -> Result<DnskeyParts, String> {
    let mut tokens = text
        .split_whitespace()
        .filter(|t| *t != "(" && *t != ")")
        .peekable();

    let mut owner = tokens
        .next()
        .ok_or_else(|| "empty record".to_string())?
        .to_lowercase();
    if !owner.ends_with('.') {
        owner.push('.');
    }

    // An optional TTL directly before the type keyword is skipped.
    if tokens
        .peek()
        .is_some_and(|t| t.chars().all(|c| c.is_ascii_digit()))
    {
        tokens.next();
    }
    if tokens.peek().is_some_and(|t| t.eq_ignore_ascii_case("IN")) {
        tokens.next();
    }

    match tokens.next() {
        Some(t) if t.eq_ignore_ascii_case("DNSKEY") => (),
        Some(t) => return Err(format!("record type is '{t}', not DNSKEY")),
        None => return Err("record type missing".into()),
    }

    let flags: u16 = tokens
        .next()
        .ok_or("flags missing")?
        .parse()
        .map_err(|_| "bad flags field".to_string())?;
    let protocol: u8 = tokens
        .next()
        .ok_or("protocol missing")?
        .parse()
        .map_err(|_| "bad protocol field".to_string())?;
    let algorithm: u8 = tokens
        .next()
        .ok_or("algorithm missing")?
        .parse()
        .map_err(|_| "bad algorithm field".to_string())?;

    // The rest is the public key, possibly wrapped; embedded whitespace is
    // insignificant.
    let pubkey: String = tokens.collect::<Vec<_>>().concat();
    if pubkey.is_empty() {
        return Err("public key missing".into());
    }

    Ok(DnskeyParts {
        owner,
        flags,
        protocol,
        algorithm: SecAlg::from_int(algorithm),
        pubkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::record::{FLAG_SEP, FLAG_ZONE};

    #[test]
    fn file_names() {
        let (zone, alg, tag) = parse_file_name("Kexample.net.+008+12345.key").unwrap();
        assert_eq!(zone, "example.net.");
        assert_eq!(alg, SecAlg::RSASHA256);
        assert_eq!(tag, 12345);

        // A missing trailing dot is supplied, upper case folded.
        let (zone, _, _) = parse_file_name("KExample.NET+005+00001.key").unwrap();
        assert_eq!(zone, "example.net.");

        parse_file_name("Kexample.net.+8+12345.key").unwrap_err();
        parse_file_name("Kexample.net.+008+0.key").unwrap_err();
        parse_file_name("Kexample.net.+008+00000.key").unwrap_err();
        parse_file_name("example.net.+008+12345.key").unwrap_err();
    }

    #[test]
    fn retired_keys_are_not_candidates() {
        assert!(is_key_file_name("Kexample.net.+008+12345.key"));
        assert!(!is_key_file_name("kexample.net.+008+12345.key"));
        assert!(!is_key_file_name("Kexample.net.+008+12345.private"));
    }

    #[test]
    fn dnskey_text_variants() {
        let simple = "example.net. IN DNSKEY  256 3 8 AwEAAcvQ W7bC";
        let parts = parse_dnskey_text(simple).unwrap();
        assert_eq!(parts.owner, "example.net.");
        assert_eq!(parts.flags, 256);
        assert_eq!(parts.protocol, 3);
        assert_eq!(parts.algorithm, SecAlg::RSASHA256);
        assert_eq!(parts.pubkey, "AwEAAcvQW7bC");

        // TTL token and parenthesized wrapping.
        let wrapped = "example.net. 14400 IN DNSKEY 257 3 8 ( AwEA AcvQ W7bC )";
        let parts = parse_dnskey_text(wrapped).unwrap();
        assert_eq!(parts.flags, 257);
        assert_eq!(parts.pubkey, "AwEAAcvQW7bC");

        // Class may be absent.
        let bare = "example.net. DNSKEY 256 3 8 AwEAAcvQW7bC";
        parse_dnskey_text(bare).unwrap();

        assert!(parse_dnskey_text("example.net. IN A 192.0.2.1").is_err());
    }

    fn write_key(dir: &Path, base: &str, body: &str) {
        std::fs::write(dir.join(format!("{base}.key")), body).unwrap();
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = "Kexample.net.+008+12345";
        let body = concat!(
            ";%\tgenerationtime=20250101000000\n",
            ";%\tlifetime=30d\n",
            ";%\texpirationtime=20260101000000\n",
            "example.net. IN DNSKEY  257 3 8 AwEAAcvQW7bC\n",
        );
        write_key(dir.path(), base, body);
        std::fs::write(dir.path().join(format!("{base}.private")), "key").unwrap();

        let rec = parse_key_file(dir.path(), &format!("{base}.key")).unwrap();
        assert_eq!(rec.name(), "example.net.");
        assert_eq!(rec.tag(), 12345);
        assert_eq!(rec.flags(), FLAG_ZONE | FLAG_SEP);
        assert!(rec.is_ksk());
        assert_eq!(rec.status(), KeyStatus::Active);
        assert_eq!(rec.lifetime(), 30 * 86400);
        assert_eq!(rec.generation_time(), parse_timestamp("20250101000000").unwrap());
        assert_eq!(rec.expiration_time(), parse_timestamp("20260101000000").unwrap());

        // Serializing produces the identical body.
        assert_eq!(rec.key_file_contents(), body);
    }

    #[test]
    fn status_from_missing_siblings_is_sep() {
        let dir = tempfile::tempdir().unwrap();
        let base = "Kexample.net.+008+12345";
        write_key(
            dir.path(),
            base,
            "example.net. IN DNSKEY  257 3 8 AwEAAcvQW7bC\n",
        );
        let rec = parse_key_file(dir.path(), &format!("{base}.key")).unwrap();
        assert_eq!(rec.status(), KeyStatus::Sep);
    }

    #[test]
    fn mismatches_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = "Kexample.net.+008+12345";

        // Owner does not match the file name.
        write_key(
            dir.path(),
            base,
            "other.net. IN DNSKEY  256 3 8 AwEAAcvQW7bC\n",
        );
        assert!(matches!(
            parse_key_file(dir.path(), &format!("{base}.key")),
            Err(KeyError::Parse(_))
        ));

        // Algorithm does not match the file name.
        write_key(
            dir.path(),
            base,
            "example.net. IN DNSKEY  256 3 5 AwEAAcvQW7bC\n",
        );
        assert!(matches!(
            parse_key_file(dir.path(), &format!("{base}.key")),
            Err(KeyError::Parse(_))
        ));

        // Zone key flag missing.
        write_key(
            dir.path(),
            base,
            "example.net. IN DNSKEY  1 3 8 AwEAAcvQW7bC\n",
        );
        assert!(matches!(
            parse_key_file(dir.path(), &format!("{base}.key")),
            Err(KeyError::Parse(_))
        ));
    }
}
