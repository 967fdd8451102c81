//! Relay identities, and the hex-identifier grammar used to look them up.
//!
//! A relay's primary key in the registry is its 20-byte RSA identity
//! digest (see [`RelayId`]). Ed25519 identities, when known, come from
//! either the descriptor's signing certificate or the microdescriptor,
//! and are never used as the registry's primary key.

use tor_llcrypto::pk::rsa::RsaIdentity;

/// The registry's primary key: a relay's 20-byte RSA identity digest.
pub type RelayId = RsaIdentity;

/// How a verbose nickname or hex-identifier asserted a binding between a
/// nickname and an identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NicknameAssertion {
    /// No nickname was given.
    None,
    /// `$HEXDIGEST=NICK`: the relay must be listed as Named with this
    /// nickname in the consensus.
    Named,
    /// `$HEXDIGEST~NICK`: the relay's nickname must merely match; no
    /// claim is made about Named status.
    Unverified,
}

/// A parsed `id-with-optional-name` identifier, per the grammar:
///
/// ```text
/// HEXDIGEST             ::= 40 hex chars
/// id-with-optional-name ::= ("$")? HEXDIGEST (("=" | "~") NICKNAME)?
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedHexId {
    /// The identity digest.
    pub id: RelayId,
    /// The nickname asserted alongside the digest, if any.
    pub nickname: Option<String>,
    /// What kind of assertion the nickname carries.
    pub assertion: NicknameAssertion,
}

/// Parse a hex identifier per the grammar documented on [`ParsedHexId`].
///
/// Returns `None` for anything that doesn't match the grammar, including
/// a `HEXDIGEST` of the wrong length or containing non-hex characters.
/// This function never fails loudly: a malformed identity string is
/// absence of information, not an error (see the crate's error-handling
/// design).
pub fn parse_hex_id(s: &str) -> Option<ParsedHexId> {
    let s = s.strip_prefix('$').unwrap_or(s);

    let (hex_part, rest) = match s.find(['=', '~']) {
        Some(pos) => (&s[..pos], Some((&s[pos..pos + 1], &s[pos + 1..]))),
        None => (s, None),
    };

    if hex_part.len() != 40 {
        return None;
    }
    let id = RelayId::from_hex(hex_part)?;

    let (nickname, assertion) = match rest {
        None => (None, NicknameAssertion::None),
        Some((sep, nick)) if !nick.is_empty() => {
            let assertion = if sep == "=" {
                NicknameAssertion::Named
            } else {
                NicknameAssertion::Unverified
            };
            (Some(nick.to_string()), assertion)
        }
        Some(_) => return None,
    };

    Some(ParsedHexId {
        id,
        nickname,
        assertion,
    })
}

/// Format a verbose nickname: `$HEXDIGEST`, `$HEXDIGEST=NICK` (named), or
/// `$HEXDIGEST~NICK` (not named).
///
/// `nickname` should be `None` when the relay has no nickname; `named`
/// is ignored in that case.
pub fn format_verbose_nickname(id: &RelayId, nickname: Option<&str>, named: bool) -> String {
    match nickname {
        None => format!("{}", id),
        Some(nick) => {
            let joiner = if named { '=' } else { '~' };
            format!("{}{}{}", id, joiner, nick)
        }
    }
}

/// Case-insensitive nickname equality, as used throughout the family and
/// lookup logic (Tor nicknames are ASCII).
pub fn nicknames_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    fn id(b: u8) -> RelayId {
        RelayId::from([b; 20])
    }

    #[test]
    fn parse_bare_digest() {
        let hex = format!("{}", id(0x11)); // "$1111...11"
        let parsed = parse_hex_id(&hex).unwrap();
        assert_eq!(parsed.id, id(0x11));
        assert_eq!(parsed.nickname, None);
        assert_eq!(parsed.assertion, NicknameAssertion::None);
    }

    #[test]
    fn parse_named() {
        let digest_hex = hex::encode([0x22_u8; 20]);
        let s = format!("${}=bob", digest_hex);
        let parsed = parse_hex_id(&s).unwrap();
        assert_eq!(parsed.id, id(0x22));
        assert_eq!(parsed.nickname.as_deref(), Some("bob"));
        assert_eq!(parsed.assertion, NicknameAssertion::Named);
    }

    #[test]
    fn parse_unverified() {
        let digest_hex = hex::encode([0x33_u8; 20]);
        let s = format!("{}~carol", digest_hex);
        let parsed = parse_hex_id(&s).unwrap();
        assert_eq!(parsed.nickname.as_deref(), Some("carol"));
        assert_eq!(parsed.assertion, NicknameAssertion::Unverified);
    }

    #[test]
    fn reject_malformed() {
        assert!(parse_hex_id("not-hex-at-all").is_none());
        assert!(parse_hex_id("1234").is_none());
        assert!(parse_hex_id(&("ab".repeat(19))).is_none()); // 38 chars
        let digest_hex = hex::encode([0x44_u8; 20]);
        assert!(parse_hex_id(&format!("{}=", digest_hex)).is_none()); // empty nickname
    }

    #[test]
    fn verbose_nickname_roundtrip() {
        let i = id(0x55);
        let v = format_verbose_nickname(&i, Some("dave"), true);
        assert!(v.ends_with("=dave"));
        let parsed = parse_hex_id(&v).unwrap();
        assert_eq!(parsed.id, i);
        assert_eq!(parsed.assertion, NicknameAssertion::Named);

        let v2 = format_verbose_nickname(&i, Some("dave"), false);
        assert!(v2.ends_with("~dave"));

        let v3 = format_verbose_nickname(&i, None, false);
        assert!(!v3.contains('=') && !v3.contains('~'));
    }
}
