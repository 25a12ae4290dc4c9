use std::borrow::Cow;

fn escape_bytes<'a, S: Into<Cow<'a, str>>>(lit: S, needs_escape: fn(u8) -> bool) -> Cow<'a, str> {
    #[inline]
    fn xdigit(c: u8) -> u8 {
        c + if c < 10 { b'0' } else { b'a' - 10 }
    }

    let lit = lit.into();
    let mut output: Option<Vec<u8>> = None;
    for (i, &c) in lit.as_bytes().iter().enumerate() {
        if needs_escape(c) {
            let output = output.get_or_insert_with(|| {
                // guess: up to 4 escaped chars
                let mut out = Vec::with_capacity(lit.len() + 12);
                out.extend(lit[..i].as_bytes());
                out
            });
            output.push(b'\\');
            output.push(xdigit(c >> 4));
            output.push(xdigit(c & 0xF));
        } else if let Some(ref mut output) = output {
            output.push(c);
        }
    }
    if let Some(output) = output {
        // unchecked conversion is safe here: the input is valid UTF-8
        // and only single ASCII bytes are replaced by ASCII sequences
        Cow::Owned(unsafe { String::from_utf8_unchecked(output) })
    } else {
        lit
    }
}

/// Escape a filter literal.
///
/// Literal values appearing in an LDAP filter can contain any character,
/// but NUL, parentheses, asterisk and backslash itself must be escaped
/// as a backslash followed by two hex digits. The function doesn't
/// allocate the return value unless there's need to escape the input.
pub fn ldap_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(c: u8) -> bool {
        c == b'\\' || c == b'*' || c == b'(' || c == b')' || c == 0
    }

    escape_bytes(lit, needs_escape)
}

/// Escape an attribute value in a distinguished name (DN).
///
/// For example, a DN might be `uid=test_user,ou=Users,dc=example,dc=com`,
/// where each attribute value can contain any character, but the special
/// characters (space, double quote, number sign, plus sign, comma,
/// semicolon, angle brackets, equals sign, backslash, NUL) must be
/// escaped when constructing the DN.
pub fn dn_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(c: u8) -> bool {
        c == b' '
            || c == b'"'
            || c == b'#'
            || c == b'+'
            || c == b','
            || c == b';'
            || c == b'<'
            || c == b'='
            || c == b'>'
            || c == b'\\'
            || c == 0
    }

    escape_bytes(lit, needs_escape)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escape_filter_literal() {
        assert_eq!(ldap_escape("a*b(c)d\\e"), "a\\2ab\\28c\\29d\\5ce");
    }

    #[test]
    fn no_alloc_when_clean() {
        assert!(matches!(ldap_escape("alice"), Cow::Borrowed("alice")));
    }

    #[test]
    fn escape_dn_value() {
        assert_eq!(dn_escape("Doe, John #1"), "Doe\\2c\\20John\\20\\231");
    }
}
